//! Isolation guarantees across a session

use std::sync::Arc;

use cgate_policy::{AccessPolicy, AccessPolicyConfig};
use cgate_sandbox::{OperationKind, Sandbox, SandboxConfig, SandboxError};
use cgate_security::{is_sealed, ContentCipher, MasterKey};

async fn open(dir: &std::path::Path) -> Sandbox {
    let policy = Arc::new(AccessPolicy::new(dir, AccessPolicyConfig::default()).unwrap());
    Sandbox::initialize(policy, SandboxConfig::default()).await.unwrap()
}

#[tokio::test]
async fn test_rejected_writes_touch_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let sb = open(dir.path()).await;

    let cases: [(&str, &[u8]); 4] = [
        ("../../etc/passwd", b"root"),
        ("/tmp/abs.rs", b"x"),
        ("payload.exe", b"MZ"),
        (".env", b"SECRET=1"),
    ];
    for (path, content) in cases {
        let err = sb.write_file(path, content).await.unwrap_err();
        assert!(err.is_policy_rejection(), "{path}: {err}");
    }
    let oversized = vec![b'a'; 2 * 1024 * 1024];
    assert!(sb.write_file("big.txt", &oversized).await.unwrap_err().is_policy_rejection());

    assert!(sb.written_files().await.is_empty());
    assert!(!dir.path().join("payload.exe").exists());
    assert!(!dir.path().join(".env").exists());
}

#[tokio::test]
async fn test_sealed_write_stores_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let sb = open(dir.path()).await;
    let cipher = ContentCipher::new(MasterKey::from_bytes([1u8; 32])).with_iterations(500);

    let receipt = sb
        .write_file_sealed("config/secrets.json", br#"{"password":"hunter22"}"#, &cipher)
        .await
        .unwrap();
    assert!(receipt.sealed);

    let read = sb.read_file("config/secrets.json").await.unwrap();
    let stored = String::from_utf8(read.content).unwrap();
    assert!(is_sealed(&stored));
    assert!(!stored.contains("hunter22"));
    assert_eq!(cipher.open(&stored).unwrap(), br#"{"password":"hunter22"}"#);
}

#[tokio::test]
async fn test_log_persists_across_sessions() {
    let dir = tempfile::tempdir().unwrap();
    {
        let sb = open(dir.path()).await;
        sb.write_file("a.rs", b"fn a() {}").await.unwrap();
    }
    let sb = open(dir.path()).await;
    let kinds: Vec<_> = sb.operations().iter().map(|r| r.kind).collect();
    assert_eq!(
        kinds,
        vec![OperationKind::Initialize, OperationKind::Write, OperationKind::Initialize]
    );
    assert!(sb.log().verify_integrity().is_ok());
    assert_eq!(sb.written_files().await.len(), 1);
}

#[tokio::test]
async fn test_concurrent_writes_serialize() {
    let dir = tempfile::tempdir().unwrap();
    let sb = Arc::new(open(dir.path()).await);

    let mut handles = Vec::new();
    for i in 0..16 {
        let sb = Arc::clone(&sb);
        handles.push(tokio::spawn(async move {
            sb.write_file(format!("src/f{i}.rs"), format!("pub fn f{i}() {{}}").as_bytes())
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(sb.written_files().await.len(), 16);
    assert!(sb.log().verify_integrity().is_ok());
}

#[tokio::test]
async fn test_reset_restores_context_from_project() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("package.json"), "{\"name\":\"a\"}").unwrap();
    let sb = open(dir.path()).await;
    sb.write_file("package.json", b"{\"name\":\"edited\"}").await.unwrap();

    sb.reset().await.unwrap();
    let mirrored = std::fs::read_to_string(sb.mirror_dir().join("package.json")).unwrap();
    assert_eq!(mirrored, "{\"name\":\"a\"}");
    assert!(!matches!(sb.clean(false).await, Err(SandboxError::Busy(_))));
}
