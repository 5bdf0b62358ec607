use std::collections::HashSet;
use std::sync::Arc;

use super::*;
use crate::snapshot_response;
use crate::types::{EntityUid, RequestContext};
use yare::parameterized;


const PHOTO_POLICIES: &str = r#"
@id("alice-views-vacation")
permit (
    principal == PhotoFlash::User::"alice",
    action == PhotoFlash::Action::"viewPhoto",
    resource in PhotoFlash::Album::"vacation"
);

@id("staff-view")
permit (
    principal in PhotoFlash::UserGroup::"staff",
    action in [PhotoFlash::Action::"viewPhoto", PhotoFlash::Action::"listAlbums"],
    resource
) when {
    principal.jobLevel >= 3 && context.authenticated
};

@id("no-private-for-contractors")
forbid (
    principal in PhotoFlash::UserGroup::"contractors",
    action,
    resource
) when {
    resource has private && resource.private
};
"#;

const PHOTO_ENTITIES: &str = r#"[
    {
        "uid": {"type": "PhotoFlash::User", "id": "alice"},
        "attrs": {"department": "photo", "jobLevel": 1},
        "parents": []
    },
    {
        "uid": {"type": "PhotoFlash::User", "id": "bob"},
        "attrs": {"department": "ops", "jobLevel": 4},
        "parents": [{"type": "PhotoFlash::UserGroup", "id": "staff"}]
    },
    {
        "uid": {"type": "PhotoFlash::User", "id": "carol"},
        "attrs": {"department": "ops", "jobLevel": 5},
        "parents": [
            {"type": "PhotoFlash::UserGroup", "id": "staff"},
            {"type": "PhotoFlash::UserGroup", "id": "contractors"}
        ]
    },
    {"uid": {"type": "PhotoFlash::UserGroup", "id": "staff"}},
    {"uid": {"type": "PhotoFlash::UserGroup", "id": "contractors"}},
    {
        "uid": {"type": "PhotoFlash::Photo", "id": "beach.jpg"},
        "attrs": {"private": false},
        "parents": [{"type": "PhotoFlash::Album", "id": "vacation"}]
    },
    {
        "uid": {"type": "PhotoFlash::Photo", "id": "passport.jpg"},
        "attrs": {"private": true},
        "parents": [{"type": "PhotoFlash::Album", "id": "vacation"}]
    },
    {"uid": {"type": "PhotoFlash::Album", "id": "vacation"}}
]"#;

const PHOTO_SCHEMA: &str = r#"{
    "PhotoFlash": {
        "entityTypes": {
            "User": {
                "memberOfTypes": ["UserGroup"],
                "shape": {"type": "Record", "attributes": {
                    "department": {"type": "String"},
                    "jobLevel": {"type": "Long"}
                }}
            },
            "UserGroup": {},
            "Photo": {
                "memberOfTypes": ["Album"],
                "shape": {"type": "Record", "attributes": {
                    "private": {"type": "Boolean"}
                }}
            },
            "Album": {}
        },
        "actions": {
            "viewPhoto": {"appliesTo": {
                "principalTypes": ["User"],
                "resourceTypes": ["Photo"],
                "context": {"type": "Record", "attributes": {
                    "authenticated": {"type": "Boolean"}
                }}
            }},
            "listAlbums": {"appliesTo": {
                "principalTypes": ["User"],
                "resourceTypes": ["Album"],
                "context": {"type": "Record", "attributes": {
                    "authenticated": {"type": "Boolean"}
                }}
            }}
        }
    }
}"#;

#[derive(Clone)]
struct SharedLogBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

struct SharedLogWriter(Arc<std::sync::Mutex<Vec<u8>>>);

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedLogBuffer {
    type Writer = SharedLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        SharedLogWriter(Arc::clone(&self.0))
    }
}

impl std::io::Write for SharedLogWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Installs a global DEBUG subscriber writing into a shared buffer, once.
fn log_sink() -> SharedLogBuffer {
    use std::sync::OnceLock;

    static LOG_SINK: OnceLock<SharedLogBuffer> = OnceLock::new();
    LOG_SINK
        .get_or_init(|| {
            let sink = SharedLogBuffer(Arc::new(std::sync::Mutex::new(Vec::new())));
            let subscriber = tracing_subscriber::fmt()
                .with_ansi(false)
                .without_time()
                .with_target(false)
                .with_max_level(tracing::Level::DEBUG)
                .with_writer(sink.clone())
                .finish();
            tracing::subscriber::set_global_default(subscriber)
                .expect("global test subscriber should initialize");
            tracing::callsite::rebuild_interest_cache();
            sink
        })
        .clone()
}

fn photo_engine() -> PolicyEngine {
    PolicyEngine::builder()
        .with_policies(PHOTO_POLICIES)
        .with_entities_json(PHOTO_ENTITIES)
        .build()
        .expect("photo policies and entities should load")
}

fn engine_from_policy(policy_text: &str) -> PolicyEngine {
    PolicyEngine::builder()
        .with_policies(policy_text)
        .build()
        .expect("policy should load")
}

fn uid(text: &str) -> EntityUid {
    text.parse().expect("valid entity uid")
}

fn photo_request(user: &str, action: &str, resource: &str, authenticated: bool) -> Request {
    Request::new(
        uid(&format!(r#"PhotoFlash::User::"{user}""#)),
        uid(&format!(r#"PhotoFlash::Action::"{action}""#)),
        uid(resource),
        RequestContext::new().with_attr("authenticated", authenticated),
    )
}

fn simple_request(principal: &str, action: &str, resource: &str) -> Request {
    Request::new(
        uid(principal),
        uid(action),
        uid(resource),
        RequestContext::new(),
    )
}

fn assert_allow(decision: Decision) {
    assert_eq!(decision, Decision::Allow);
}

fn assert_deny(decision: Decision) {
    assert_eq!(decision, Decision::Deny);
}

include!("core.rs");
include!("evaluate.rs");
