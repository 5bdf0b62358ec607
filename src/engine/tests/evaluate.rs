#[parameterized(
    alice_views_vacation_photo = { "alice", "viewPhoto", r#"PhotoFlash::Photo::"beach.jpg""#, false, Decision::Allow },
    alice_views_private_photo = { "alice", "viewPhoto", r#"PhotoFlash::Photo::"passport.jpg""#, false, Decision::Allow },
    alice_cannot_list = { "alice", "listAlbums", r#"PhotoFlash::Album::"vacation""#, true, Decision::Deny },
    staff_views_when_authenticated = { "bob", "viewPhoto", r#"PhotoFlash::Photo::"beach.jpg""#, true, Decision::Allow },
    staff_denied_unauthenticated = { "bob", "viewPhoto", r#"PhotoFlash::Photo::"beach.jpg""#, false, Decision::Deny },
    staff_views_unknown_photo = { "bob", "viewPhoto", r#"PhotoFlash::Photo::"missing.jpg""#, true, Decision::Allow },
    contractor_views_public_photo = { "carol", "viewPhoto", r#"PhotoFlash::Photo::"beach.jpg""#, true, Decision::Allow },
    contractor_forbidden_private_photo = { "carol", "viewPhoto", r#"PhotoFlash::Photo::"passport.jpg""#, true, Decision::Deny },
    contractor_lists_albums = { "carol", "listAlbums", r#"PhotoFlash::Album::"vacation""#, true, Decision::Allow },
    unknown_user_denied = { "dave", "viewPhoto", r#"PhotoFlash::Photo::"beach.jpg""#, true, Decision::Deny },
)]
fn test_photo_requests(
    user: &str,
    action: &str,
    resource: &str,
    authenticated: bool,
    expected: Decision,
) {
    let engine = photo_engine();
    let request = photo_request(user, action, resource, authenticated);
    assert_eq!(engine.is_authorized(&request).unwrap(), expected);
}

#[parameterized(
    permit_reason = { "alice", r#"PhotoFlash::Photo::"beach.jpg""#, Decision::Allow, &["alice-views-vacation"] },
    forbid_reason = { "carol", r#"PhotoFlash::Photo::"passport.jpg""#, Decision::Deny, &["no-private-for-contractors"] },
    default_deny_has_no_reason = { "dave", r#"PhotoFlash::Photo::"beach.jpg""#, Decision::Deny, &[] },
)]
fn test_authorize_reasons(user: &str, resource: &str, decision: Decision, reasons: &[&str]) {
    let engine = photo_engine();
    let response = engine
        .authorize(&photo_request(user, "viewPhoto", resource, true))
        .unwrap();
    assert_eq!(response.decision, decision);
    assert_eq!(response.reasons, reasons);
    assert!(response.errors.is_empty());
    assert_eq!(response.version, Some(engine.current_version().unwrap()));
}

#[test]
fn test_authorize_response_snapshot() {
    let engine = photo_engine();
    let response = engine
        .authorize(&photo_request(
            "carol",
            "viewPhoto",
            r#"PhotoFlash::Photo::"beach.jpg""#,
            true,
        ))
        .unwrap();
    snapshot_response!(response, @r###"
    {
      "decision": "Allow",
      "reasons": [
        "staff-view"
      ],
      "errors": [],
      "version": {
        "hash": "[hash]",
        "loaded_at": "[timestamp]"
      }
    }
    "###);
}

#[test]
fn test_policy_errors_are_reported_not_fatal() {
    let engine = engine_from_policy(
        r#"
        @id("needs-level")
        permit (principal, action, resource) when { principal.jobLevel > 2 };

        @id("overflow")
        permit (principal, action, resource) when { 9223372036854775807 + 1 > 0 };

        @id("everyone")
        permit (principal, action == Action::"view", resource);
        "#,
    );

    // The principal is not in the (empty) store, so both conditions fail.
    let view = simple_request(r#"User::"ghost""#, r#"Action::"view""#, r#"Photo::"a""#);
    let response = engine.authorize(&view).unwrap();
    assert_eq!(response.decision, Decision::Allow);
    assert_eq!(response.reasons, ["everyone"]);
    let failed: HashSet<&str> = response.errors.iter().map(|e| e.policy_id.as_str()).collect();
    assert_eq!(failed, HashSet::from(["needs-level", "overflow"]));

    let edit = simple_request(r#"User::"ghost""#, r#"Action::"edit""#, r#"Photo::"a""#);
    assert_deny(engine.is_authorized(&edit).unwrap());
}

#[test]
fn test_forbid_overrides_permit() {
    let engine = engine_from_policy(
        r#"
        permit (principal, action, resource);
        forbid (principal == User::"mallory", action, resource);
        "#,
    );
    let request = simple_request(r#"User::"mallory""#, r#"Action::"view""#, r#"Photo::"a""#);
    let response = engine.authorize(&request).unwrap();
    assert_eq!(response.decision, Decision::Deny);
    assert_eq!(response.reasons, ["policy1"]);

    let request = simple_request(r#"User::"alice""#, r#"Action::"view""#, r#"Photo::"a""#);
    assert_allow(engine.is_authorized(&request).unwrap());
}

#[test]
fn test_context_and_extensions() {
    let engine = engine_from_policy(
        r#"
        permit (principal, action == Action::"login", resource)
        when {
            context.source.isInRange(ip("10.0.0.0/8")) &&
            context.session.toMinutes() < 60 &&
            context.score.greaterThan(decimal("0.5"))
        };
        "#,
    );
    let request = |source: &str, session: &str, score: &str| {
        let json = format!(
            r#"{{
                "principal": "User::\"alice\"",
                "action": "Action::\"login\"",
                "resource": "App::\"portal\"",
                "context": {{
                    "source": {{"__extn": {{"fn": "ip", "arg": "{source}"}}}},
                    "session": {{"__extn": {{"fn": "duration", "arg": "{session}"}}}},
                    "score": {{"__extn": {{"fn": "decimal", "arg": "{score}"}}}}
                }}
            }}"#
        );
        engine.is_authorized_json(&json).unwrap()
    };

    assert!(request("10.1.2.3", "30m", "0.75"));
    assert!(!request("192.168.0.1", "30m", "0.75"));
    assert!(!request("10.1.2.3", "2h", "0.75"));
    assert!(!request("10.1.2.3", "30m", "0.25"));
}

#[parameterized(
    text_form = { r#"{"principal": "PhotoFlash::User::\"alice\"", "action": "PhotoFlash::Action::\"viewPhoto\"", "resource": "PhotoFlash::Photo::\"beach.jpg\"", "context": {"authenticated": false}}"#, true },
    entity_form = { r#"{"principal": {"__entity": {"type": "PhotoFlash::User", "id": "bob"}}, "action": {"type": "PhotoFlash::Action", "id": "viewPhoto"}, "resource": {"type": "PhotoFlash::Photo", "id": "beach.jpg"}, "context": {"authenticated": true}}"#, true },
    context_as_string = { r#"{"principal": "PhotoFlash::User::\"bob\"", "action": "PhotoFlash::Action::\"viewPhoto\"", "resource": "PhotoFlash::Photo::\"beach.jpg\"", "context": "{\"authenticated\": false}"}"#, false },
)]
fn test_is_authorized_json(json: &str, expected: bool) {
    let engine = photo_engine();
    assert_eq!(engine.is_authorized_json(json).unwrap(), expected);
}

#[parameterized(
    not_json = { "not json" },
    missing_resource = { r#"{"principal": "User::\"a\"", "action": "Action::\"b\""}"# },
    bad_uid = { r#"{"principal": "User::alice", "action": "Action::\"b\"", "resource": "R::\"c\""}"# },
    context_not_record = { r#"{"principal": "User::\"a\"", "action": "Action::\"b\"", "resource": "R::\"c\"", "context": [1]}"# },
)]
fn test_is_authorized_json_rejects_malformed_requests(json: &str) {
    let engine = photo_engine();
    assert!(matches!(
        engine.is_authorized_json(json),
        Err(PolicyError::Eval(EvalError::InvalidRequest(_)))
    ));
}

#[test]
fn test_hierarchy_membership_through_entities() {
    let engine = PolicyEngine::builder()
        .with_policies(
            r#"
            permit (principal in Org::"acme", action, resource in Folder::"root");
            "#,
        )
        .with_entities_json(
            r#"[
                {"uid": {"type": "User", "id": "ann"}, "parents": [{"type": "Team", "id": "eng"}]},
                {"uid": {"type": "Team", "id": "eng"}, "parents": [{"type": "Org", "id": "acme"}]},
                {"uid": {"type": "Org", "id": "acme"}},
                {"uid": {"type": "Doc", "id": "plan"}, "parents": [{"type": "Folder", "id": "sub"}]},
                {"uid": {"type": "Folder", "id": "sub"}, "parents": [{"type": "Folder", "id": "root"}]},
                {"uid": {"type": "Folder", "id": "root"}, "parents": [{"type": "Folder", "id": "sub"}]}
            ]"#,
        )
        .build()
        .unwrap();

    let allowed = simple_request(r#"User::"ann""#, r#"Action::"read""#, r#"Doc::"plan""#);
    assert_allow(engine.is_authorized(&allowed).unwrap());

    let outsider = simple_request(r#"User::"bo""#, r#"Action::"read""#, r#"Doc::"plan""#);
    assert_deny(engine.is_authorized(&outsider).unwrap());

    let entities = engine.current_snapshot().unwrap().entities().clone();
    let ann = uid(r#"User::"ann""#);
    assert!(!entities.is_descendant(&ann, &ann));
    assert!(entities.is_in(&ann, &ann));
    // The folder cycle terminates.
    assert!(!entities.is_descendant(&uid(r#"Doc::"plan""#), &uid(r#"Org::"acme""#)));
}

#[test]
fn test_exact_match_policy_with_empty_entities() {
    let engine = engine_from_policy(
        r#"permit(principal == User::"alice", action == Action::"update", resource == Photo::"VacationPhoto94.jpg");"#,
    );
    engine.load_entities("[]").unwrap();

    let request = |resource: &str| {
        simple_request(r#"User::"alice""#, r#"Action::"update""#, resource)
    };
    assert_allow(
        engine
            .is_authorized(&request(r#"Photo::"VacationPhoto94.jpg""#))
            .unwrap(),
    );
    assert_deny(
        engine
            .is_authorized(&request(r#"Photo::"VacationPhoto95.jpg""#))
            .unwrap(),
    );
}

#[test]
fn test_long_conditions_through_the_engine() {
    let chain = vec!["true"; 1_500].join(" && ");
    let engine = engine_from_policy(&format!(
        "permit(principal, action, resource) when {{ {chain} }};"
    ));
    let request = simple_request(r#"User::"alice""#, r#"Action::"view""#, r#"Photo::"a""#);
    assert_allow(engine.is_authorized(&request).unwrap());

    engine
        .set_policies(&format!(
            "permit(principal, action, resource) when {{ {chain} && false }};"
        ))
        .unwrap();
    assert_deny(engine.is_authorized(&request).unwrap());

    let version = engine.current_version().unwrap();
    let nested = format!("{}true{}", "(".repeat(100_000), ")".repeat(100_000));
    let result = engine.set_policies(&format!(
        "permit(principal, action, resource) when {{ {nested} }};"
    ));
    assert!(matches!(result, Err(PolicyError::Parse(_))));
    assert_eq!(engine.current_version().unwrap(), version);
    assert_deny(engine.is_authorized(&request).unwrap());
}
