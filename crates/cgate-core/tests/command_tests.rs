//! End-to-end behavior of the command surface

use std::sync::Arc;
use std::time::Duration;

use cgate_confidence::{InMemoryProjectMemory, MetricKind, ScoringConfig};
use cgate_core::{CgateConfig, CgateError, ConfidenceSandbox, DeployOutcome, ExitStatus, ReasonCode};
use cgate_decision::{DecisionDetail, DeploymentTier, GateThresholds};
use cgate_policy::ProjectPath;
use cgate_security::{is_sealed, SecurityConfig};
use cgate_test_utils::{ScriptedTestRunner, TempProject, API_KEY_LINE, LOGIN_TEST_TS, LOGIN_TS, MALICIOUS_JS};
use pretty_assertions::assert_eq;

fn fast_config() -> CgateConfig {
    CgateConfig::default().with_security(SecurityConfig::default().with_kdf_iterations(1_000))
}

async fn open_with(project: &TempProject, config: CgateConfig, runner: Arc<ScriptedTestRunner>) -> ConfidenceSandbox {
    ConfidenceSandbox::open(project.path(), config, Arc::new(InMemoryProjectMemory::new()), runner)
        .await
        .unwrap()
}

async fn open(project: &TempProject) -> ConfidenceSandbox {
    open_with(project, fast_config(), Arc::new(ScriptedTestRunner::passing())).await
}

#[tokio::test]
async fn review_tier_denies_unforced_deploy() {
    let project = TempProject::new();
    let gate = open(&project).await;

    let outcome = gate.execute("src/login.ts", LOGIN_TS).await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.confidence, 74);
    assert_eq!(outcome.decision.tier, DeploymentTier::ReviewRequired);
    assert!(outcome.output.contains("add tests for this file"));

    let decision = gate.check_deployment_permission("src/login.ts", 80).await.unwrap();
    assert_eq!(decision.tier, DeploymentTier::ReviewRequired);
    assert!(decision.reason.contains("review"));

    let DeployOutcome::Denied { decision } = gate.deploy("src/login.ts", false).await.unwrap() else {
        panic!("expected denial");
    };
    assert_eq!(decision.tier, DeploymentTier::ReviewRequired);
    assert!(matches!(decision.detail, DecisionDetail::Review(_)));
    assert_eq!(project.read("src/login.ts"), None);
}

#[tokio::test]
async fn forced_deploy_writes_project_file() {
    let project = TempProject::new();
    let gate = open(&project).await;
    gate.execute("src/login.ts", LOGIN_TS).await.unwrap();

    let outcome = gate.deploy("src/login.ts", true).await.unwrap();
    let DeployOutcome::Deployed { receipt, forced } = outcome else {
        panic!("expected deployment");
    };
    assert!(forced);
    assert_eq!(receipt.path.to_string(), "src/login.ts");
    assert_eq!(project.read("src/login.ts").as_deref(), Some(LOGIN_TS));
}

#[tokio::test]
async fn forced_deploy_still_enforces_policy() {
    let project = TempProject::new();
    let gate = open(&project).await;

    let err = gate.deploy("tools/run.exe", true).await.unwrap_err();
    assert_eq!(err.reason_code(), ReasonCode::PolicyViolation);
    assert_eq!(err.exit_status(), ExitStatus::PolicyViolation);

    let err = gate.deploy(".cgate/keys/master.key", true).await.unwrap_err();
    assert_eq!(err.reason_code(), ReasonCode::PolicyViolation);
    assert!(!project.join("tools/run.exe").exists());
}

#[tokio::test]
async fn traversal_is_a_path_violation() {
    let project = TempProject::new();
    let gate = open(&project).await;

    let err = gate.execute("../../etc/passwd", "root:x:0:0").await.unwrap_err();
    assert_eq!(err.reason_code(), ReasonCode::PathViolation);
    assert_eq!(err.exit_status(), ExitStatus::AccessDenied);
    assert!(gate.sandbox().written_files().await.is_empty());
}

#[tokio::test]
async fn malicious_content_never_auto_deploys() {
    let project = TempProject::new();
    let gate = open(&project).await;

    let outcome = gate.execute("src/danger.js", MALICIOUS_JS).await.unwrap();
    assert_ne!(outcome.decision.tier, DeploymentTier::AutoDeploy);

    let decision = gate.check_deployment_permission("src/danger.js", 96).await.unwrap();
    assert_eq!(decision.tier, DeploymentTier::ReviewRequired);
    assert!(decision.overridden);
    let DecisionDetail::Review(package) = &decision.detail else {
        panic!("expected review package");
    };
    assert!(!package.security_findings.is_empty());
}

#[tokio::test]
async fn high_confidence_deploys_without_force() {
    let project = TempProject::new().with_file("src/login.test.ts", LOGIN_TEST_TS);
    let runner = Arc::new(ScriptedTestRunner::passing());
    let config = fast_config().with_gate(GateThresholds {
        auto_deploy: 80,
        ..GateThresholds::default()
    });
    let gate = open_with(&project, config, Arc::clone(&runner)).await;

    let outcome = gate.execute("src/login.ts", LOGIN_TS).await.unwrap();
    assert_eq!(outcome.metrics.get(MetricKind::TestExecution), 25);
    assert_eq!(outcome.decision.tier, DeploymentTier::AutoDeploy);

    let requests = runner.requests();
    assert_eq!(requests.len(), 1);
    let expected: ProjectPath = "src/login.test.ts".parse().unwrap();
    assert_eq!(requests[0].tests, vec![expected]);

    assert!(gate.deploy("src/login.ts", false).await.unwrap().is_deployed());
    assert_eq!(project.read("src/login.ts").as_deref(), Some(LOGIN_TS));
}

#[tokio::test]
async fn secrets_are_sealed_in_the_mirror() {
    let project = TempProject::new();
    let gate = open(&project).await;

    let outcome = gate.execute("src/config.ts", API_KEY_LINE).await.unwrap();
    assert!(outcome.output.contains("sealed"));
    assert!(outcome.metrics.get(MetricKind::RiskAssessment) < 10);

    let path: ProjectPath = "src/config.ts".parse().unwrap();
    let stored = std::fs::read_to_string(gate.sandbox().mirror_path(&path)).unwrap();
    assert!(is_sealed(&stored));
    assert!(!stored.contains("sk-1234567890abcdef"));
    assert!(project.join(".cgate/keys/master.key").exists());

    let report = gate.get_confidence("src/config.ts").await.unwrap();
    assert!(report.sealed);
    assert_eq!(report.total, outcome.confidence);

    gate.deploy("src/config.ts", true).await.unwrap();
    assert_eq!(project.read("src/config.ts").as_deref(), Some(API_KEY_LINE));
}

#[tokio::test]
async fn sealed_entries_survive_kdf_reconfiguration() {
    let project = TempProject::new();
    let first = open(&project).await;
    let outcome = first.execute("src/config.ts", API_KEY_LINE).await.unwrap();
    drop(first);

    let config = CgateConfig::default().with_security(SecurityConfig::default().with_kdf_iterations(2_000));
    let reopened = open_with(&project, config, Arc::new(ScriptedTestRunner::passing())).await;
    let report = reopened.get_confidence("src/config.ts").await.unwrap();
    assert!(report.sealed);
    assert_eq!(report.total, outcome.confidence);

    reopened.deploy("src/config.ts", true).await.unwrap();
    assert_eq!(project.read("src/config.ts").as_deref(), Some(API_KEY_LINE));
}

#[tokio::test]
async fn binary_content_is_rejected_before_writing() {
    let project = TempProject::new();
    let gate = open(&project).await;

    let err = gate.execute("src/blob.ts", &"\u{0}".repeat(64)).await.unwrap_err();
    assert!(matches!(err, CgateError::UnsafeContent { .. }));
    assert_eq!(err.exit_status(), ExitStatus::ValidationFailure);
    assert!(err.remediation().contains("text source"));
    assert!(gate.sandbox().written_files().await.is_empty());
}

#[tokio::test]
async fn run_tests_reports_failures() {
    let project = TempProject::new().with_file("src/login.test.ts", LOGIN_TEST_TS);
    let runner = Arc::new(ScriptedTestRunner::passing().then(1, 0).then(0, 2));
    let gate = open_with(&project, fast_config(), Arc::clone(&runner)).await;

    gate.execute("src/login.ts", LOGIN_TS).await.unwrap();
    let outcome = gate.run_tests(&["src/login.ts"][..]).await.unwrap();
    assert!(!outcome.success);
    assert!(outcome.output.contains("0 passed, 2 failed"));
    assert_eq!(outcome.metrics.get(MetricKind::TestExecution), 0);
    assert_eq!(runner.calls(), 2);
}

#[tokio::test]
async fn confidence_is_cached_for_unchanged_content() {
    let project = TempProject::new().with_file("src/login.test.ts", LOGIN_TEST_TS);
    let runner = Arc::new(ScriptedTestRunner::passing());
    let gate = open_with(&project, fast_config(), Arc::clone(&runner)).await;

    let outcome = gate.execute("src/login.ts", LOGIN_TS).await.unwrap();
    let first = gate.get_confidence("src/login.ts").await.unwrap();
    let second = gate.get_confidence("src/login.ts").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.total, outcome.confidence);
    assert_eq!(runner.calls(), 1);
}

#[tokio::test]
async fn test_timeout_degrades_only_its_metric() {
    let project = TempProject::new().with_file("src/login.test.ts", LOGIN_TEST_TS);
    let runner = Arc::new(ScriptedTestRunner::passing().with_delay(Duration::from_secs(30)));
    let config = fast_config().with_scoring(ScoringConfig::default().with_test_timeout(Duration::from_millis(50)));
    let gate = open_with(&project, config, runner).await;

    let outcome = gate.execute("src/login.ts", LOGIN_TS).await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.metrics.get(MetricKind::TestExecution), 0);
    assert_eq!(outcome.metrics.get(MetricKind::SyntaxValidation), 20);
}

#[tokio::test]
async fn reset_discards_candidates() {
    let project = TempProject::new();
    let gate = open(&project).await;
    gate.execute("src/login.ts", LOGIN_TS).await.unwrap();
    assert_eq!(gate.rescan().await.len(), 1);

    gate.reset().await.unwrap();
    assert!(gate.rescan().await.is_empty());
    let err = gate.deploy("src/login.ts", true).await.unwrap_err();
    assert_eq!(err.reason_code(), ReasonCode::NotFound);
}

#[tokio::test]
async fn scan_reports_existing_secrets() {
    let project = TempProject::new().with_file("src/keys.ts", API_KEY_LINE);
    let gate = open(&project).await;

    let report = gate.scan_file("src/keys.ts").await.unwrap();
    assert!(report.sensitive_data_found);
    assert_eq!(project.read("src/keys.ts").as_deref(), Some(API_KEY_LINE));

    let err = gate.scan_file("../outside.ts").await.unwrap_err();
    assert_eq!(err.reason_code(), ReasonCode::PathViolation);
}

#[tokio::test]
async fn project_config_file_is_honoured() {
    let project = TempProject::new().with_file(".cgate/config.toml", "[scoring]\nrun_tests = false\n");
    let gate = ConfidenceSandbox::open_project(project.path()).await.unwrap();
    assert!(!gate.config().scoring.run_tests);

    let outcome = gate.execute("src/login.ts", LOGIN_TS).await.unwrap();
    assert_eq!(outcome.metrics.get(MetricKind::TestExecution), 12);
}
