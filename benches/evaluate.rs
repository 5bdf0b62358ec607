use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use arbiter_core::{
    EntityUid, PolicyEngine, Request, RequestContext, Schema, ValidationMode, Value,
};

struct Scenario {
    name: String,
    engine: PolicyEngine,
    request: Request,
}

/// `policies` permits, each scoped to its own group, with the requesting
/// user placed `depth` levels below the group the last policy names.
fn build_scenario(policies: usize, depth: usize) -> Scenario {
    let mut text = String::new();
    for i in 0..policies {
        text.push_str(&format!(
            "@id(\"p{i}\")\npermit (principal in Group::\"g{i}\", action == Action::\"view\", resource)\n\
             when {{ context.level >= {i} && resource.owner like \"*team*\" }};\n"
        ));
    }

    let target = policies.saturating_sub(1);
    let mut entities = vec![
        r#"{"uid": {"type": "User", "id": "alice"}, "parents": [{"type": "Group", "id": "chain0"}]}"#
            .to_string(),
        r#"{"uid": {"type": "Doc", "id": "d"}, "attrs": {"owner": "the-team-lead"}}"#.to_string(),
    ];
    for level in 0..depth {
        let parent = if level + 1 == depth {
            format!("g{target}")
        } else {
            format!("chain{}", level + 1)
        };
        entities.push(format!(
            r#"{{"uid": {{"type": "Group", "id": "chain{level}"}}, "parents": [{{"type": "Group", "id": "{parent}"}}]}}"#
        ));
    }
    let entities_json = format!("[{}]", entities.join(","));

    let engine = PolicyEngine::builder()
        .with_policies(text)
        .with_entities_json(entities_json)
        .build()
        .expect("benchmark policies compile");

    let uid = |s: &str| s.parse::<EntityUid>().expect("benchmark uid parses");
    let request = Request::new(
        uid(r#"User::"alice""#),
        uid(r#"Action::"view""#),
        uid(r#"Doc::"d""#),
        RequestContext::new().with_attr("level", Value::Long(policies as i64)),
    );

    Scenario {
        name: format!("policies={policies}/depth={depth}"),
        engine,
        request,
    }
}

fn benchmark_evaluate(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluate");
    group.sample_size(40);

    let scenarios: Vec<_> = [(1, 1), (10, 1), (10, 8), (100, 1), (100, 8)]
        .into_iter()
        .map(|(policies, depth)| build_scenario(policies, depth))
        .collect();

    for scenario in &scenarios {
        group.bench_with_input(
            BenchmarkId::from_parameter(&scenario.name),
            scenario,
            |b, s| {
                b.iter(|| {
                    let response = s
                        .engine
                        .authorize(black_box(&s.request))
                        .expect("benchmark requests are valid");
                    black_box(response.reasons.len());
                });
            },
        );
    }

    group.finish();
}

fn benchmark_validate(c: &mut Criterion) {
    let mut group = c.benchmark_group("validate");
    group.sample_size(20);

    let schema: Schema = r#"{
        "": {
            "entityTypes": {
                "User": {"memberOfTypes": ["Group"]},
                "Group": {"memberOfTypes": ["Group"]},
                "Doc": {"shape": {"type": "Record", "attributes": {"owner": {"type": "String"}}}}
            },
            "actions": {
                "view": {"appliesTo": {
                    "principalTypes": ["User"],
                    "resourceTypes": ["Doc"],
                    "context": {"type": "Record", "attributes": {"level": {"type": "Long"}}}
                }}
            }
        }
    }"#
    .parse()
    .expect("benchmark schema parses");

    for policies in [10, 100] {
        let scenario = build_scenario(policies, 1);
        group.bench_with_input(BenchmarkId::from_parameter(policies), &scenario, |b, s| {
            b.iter(|| {
                let result = s
                    .engine
                    .validate_with_schema(black_box(&schema), ValidationMode::Strict)
                    .expect("engine is open");
                black_box(result.passed);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_evaluate, benchmark_validate);
criterion_main!(benches);
