//! Pipeline properties: cipher round-trip, redaction, path containment

use cgate_policy::{AccessPolicy, AccessPolicyConfig};
use cgate_security::{
    is_sealed, sanitize, validate_file_path, CompiledPatterns, ContentCipher, MasterKey,
    PathRejection,
};
use proptest::prelude::*;

fn cipher() -> ContentCipher {
    ContentCipher::new(MasterKey::from_bytes([42u8; 32])).with_iterations(500)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_seal_open_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..4096)) {
        let cipher = cipher();
        let sealed = cipher.seal(&data).unwrap();
        prop_assert!(is_sealed(&sealed));
        prop_assert_eq!(cipher.open(&sealed).unwrap(), data.clone());
        if !data.is_empty() {
            prop_assert_ne!(sealed.as_bytes(), data.as_slice());
        }
    }

    #[test]
    fn prop_sanitized_output_never_contains_token(body in "[A-Za-z0-9]{24,48}") {
        let patterns = CompiledPatterns::builtin().unwrap();
        let secret = format!("sk-{body}");
        let content = format!("const apiKey = \"{secret}\";\nconsole.log(apiKey);\n");
        let result = sanitize(&content, "prop.ts", &patterns);
        prop_assert!(result.sensitive_data_found);
        prop_assert!(!result.sanitized.contains(&secret));
        prop_assert!(result.sanitized.contains("[REDACTED:api_token]"));
    }
}

#[tokio::test]
async fn test_outside_root_paths_are_path_violations() {
    let dir = tempfile::tempdir().unwrap();
    let policy = AccessPolicy::new(dir.path(), AccessPolicyConfig::default()).unwrap();

    for raw in ["../../etc/passwd", "/etc/passwd", "src/../../x.rs", "a/b/../../../c.ts"] {
        let result = validate_file_path(raw, &policy).await;
        assert!(!result.is_valid, "{raw} should be invalid");
        assert_eq!(result.rejection, Some(PathRejection::PathViolation), "{raw}");
    }
}
