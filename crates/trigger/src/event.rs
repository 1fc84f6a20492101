//! Change event classification.
//!
//! Events carry no type tag. A body is a resource change when it parses as a
//! resource with a non-empty `type` and non-null `attributes`; otherwise it is
//! a policy change when it parses as a policy with a non-empty `body`.

use tracing::info;
use warden_core::{Policy, Resource};

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Resource(Resource),
    Policy(Policy),
    /// Neither shape matched; carries the reason for logging.
    Unrecognized(String),
}

pub fn classify(body: &str) -> ChangeEvent {
    if let Ok(resource) = serde_json::from_str::<Resource>(body) {
        let has_attributes = resource.attributes.as_ref().is_some_and(|a| !a.is_null());
        if has_attributes && !resource.resource_type.is_empty() {
            info!(resource_id = %resource.id, "found new/updated resource");
            return ChangeEvent::Resource(resource);
        }
    }

    match serde_json::from_str::<Policy>(body) {
        Ok(policy) if !policy.body.is_empty() => {
            info!(policy_id = %policy.id, "found new/updated policy");
            ChangeEvent::Policy(policy)
        }
        Ok(policy) => ChangeEvent::Unrecognized(format!("policy '{}' has an empty body", policy.id)),
        Err(e) => ChangeEvent::Unrecognized(format!("not a resource or a policy: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use warden_core::Severity;

    use super::*;

    #[test]
    fn resource_needs_type_and_attributes() {
        let event = classify(r#"{"id":"r1","type":"AWS.S3.Bucket","attributes":{"Name":"b"},"integrationId":"i1"}"#);
        match event {
            ChangeEvent::Resource(r) => {
                assert_eq!(r.id, "r1");
                assert_eq!(r.integration_id, "i1");
            }
            other => panic!("expected resource, got {other:?}"),
        }
    }

    #[test]
    fn policy_when_resource_shape_incomplete() {
        let body = r#"{"id":"p1","body":"def policy(r): return False","severity":"HIGH","resourceTypes":["AWS.S3.Bucket"],"suppressions":["prod.*"],"versionId":"v2"}"#;
        match classify(body) {
            ChangeEvent::Policy(p) => {
                assert_eq!(p.id, "p1");
                assert_eq!(p.severity, Severity::High);
                assert_eq!(p.version_id, "v2");
                assert_eq!(p.suppressions, ["prod.*"]);
            }
            other => panic!("expected policy, got {other:?}"),
        }
    }

    #[test]
    fn null_attributes_fall_through_to_policy() {
        let body = r#"{"id":"x","type":"AWS.S3.Bucket","attributes":null,"body":"def policy(r): return True"}"#;
        assert!(matches!(classify(body), ChangeEvent::Policy(_)));
    }

    #[test]
    fn unrecognized_shapes() {
        assert!(matches!(classify(r#"{"id":"p1","body":""}"#), ChangeEvent::Unrecognized(_)));
        assert!(matches!(
            classify(r#"{"id":"r1","type":"","attributes":{}}"#),
            ChangeEvent::Unrecognized(_)
        ));
        assert!(matches!(classify("not json"), ChangeEvent::Unrecognized(_)));
        assert!(matches!(classify("[1,2,3]"), ChangeEvent::Unrecognized(_)));
    }
}
