//! Path containment properties
//!
//! Whatever the caller passes, a resolved path stays under the root and a
//! rejected path never yields a location.

use cgate_policy::{AccessPolicy, AccessPolicyConfig, PolicyError};
use proptest::prelude::*;

fn segment() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("..".to_string()),
        Just(".".to_string()),
        "[a-z]{1,8}",
        "[a-z]{1,6}\\.(rs|ts|py)",
    ]
}

proptest! {
    #[test]
    fn prop_resolved_paths_stay_inside_root(segments in proptest::collection::vec(segment(), 1..8)) {
        let dir = tempfile::tempdir().unwrap();
        let policy = AccessPolicy::new(dir.path(), AccessPolicyConfig::default()).unwrap();
        let raw = segments.join("/");

        match policy.resolve(&raw) {
            Ok(path) => {
                let abs = policy.absolute(&path);
                prop_assert!(abs.starts_with(policy.root()));
                prop_assert!(!path.segments().iter().any(|s| s == ".." || s == "."));
            }
            Err(err) => {
                prop_assert!(
                    matches!(err, PolicyError::PathViolation { .. } | PolicyError::InvalidPath(_)),
                    "unexpected error for {raw}: {err}"
                );
            }
        }
    }

    #[test]
    fn prop_leading_escape_is_always_rejected(depth in 1..6usize, tail in "[a-z]{1,8}\\.rs") {
        let dir = tempfile::tempdir().unwrap();
        let policy = AccessPolicy::new(dir.path(), AccessPolicyConfig::default()).unwrap();
        let mut raw = "../".repeat(depth);
        raw.push_str(&tail);

        let err = policy.resolve(&raw).unwrap_err();
        prop_assert!(err.is_path_violation());
    }
}

#[test]
fn test_check_write_rejects_escape_before_rules() {
    let dir = tempfile::tempdir().unwrap();
    let policy = AccessPolicy::new(dir.path(), AccessPolicyConfig::default()).unwrap();

    // Escape wins even when the extension would also fail.
    let err = policy.check_write("../outside.exe", 1).unwrap_err();
    assert!(err.is_path_violation());
}

#[test]
fn test_config_roundtrips_through_toml_defaults() {
    let config: AccessPolicyConfig = toml::from_str("max_file_size = 2048").unwrap();
    assert_eq!(config.max_file_size, 2048);
    assert!(config.allowed_extensions.contains("rs"));
    assert!(config.blocked_patterns.iter().any(|p| p == ".cgate/**"));
}
