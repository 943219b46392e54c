//! End-to-end executions through the dispatcher against a scripted host

mod common;

use common::*;
use provisioner_core::constants::{ambient, mirrors, UNKNOWN};
use provisioner_core::context::VariableType;
use provisioner_core::detection::GeoOsDetectionService;
use provisioner_core::events::{ProgressEventKind, StepStatus};
use provisioner_core::interaction::{InteractionPrompt, InteractionResponse, ResolveOutcome};
use provisioner_core::orchestration::{ExecutionDispatcher, ExecutionRequest};
use provisioner_core::registry::{ParameterSpec, ScriptClassification, ScriptDefinition, ScriptRegistry};
use provisioner_core::scripts::{register_builtin_scripts, DETECT_SYSTEM};
use provisioner_core::ssh::CommandResult;
use provisioner_core::step::{PromptStep, RemoteCommandStep};
use provisioner_core::{ExecutionState, ProvisionerError};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const UBUNTU_OS_RELEASE: &str = r#"NAME="Ubuntu"
VERSION_ID="22.04"
ID=ubuntu
ID_LIKE=debian
VERSION_CODENAME=jammy
"#;

fn registry_with(definitions: Vec<ScriptDefinition>) -> ScriptRegistry {
    let registry = ScriptRegistry::new();
    for definition in definitions {
        registry.register(definition).unwrap();
    }
    registry
}

fn three_step_static() -> ScriptDefinition {
    ScriptDefinition::new("three-steps", ScriptClassification::Static)
        .with_step(RemoteCommandStep::new("first", "echo one"))
        .with_step(RemoteCommandStep::new("second", "echo two"))
        .with_step(RemoteCommandStep::new("third", "echo three"))
}

#[tokio::test]
async fn test_static_script_reports_each_step_then_completes() {
    let harness = Harness::new(registry_with(vec![three_step_static()]));
    let mut events = harness.transport.subscribe("s-a");

    let report = harness
        .dispatcher
        .execute(ExecutionRequest::new("s-a", "three-steps", target()))
        .await;

    assert!(report.is_success(), "{:?}", report.error);
    assert_eq!(report.state, ExecutionState::Completed);
    assert_eq!(report.steps.len(), 3);

    let events = drain(&mut events);
    assert_eq!(events.first().unwrap().kind, ProgressEventKind::Started);
    assert_eq!(events.last().unwrap().kind, ProgressEventKind::Completed);
    assert_eq!(terminal_count(&events), 1);

    let completed: Vec<_> = events
        .iter()
        .filter(|e| e.kind == ProgressEventKind::StepCompleted)
        .collect();
    assert_eq!(completed.len(), 3);
    assert!(completed.iter().all(|e| e.status == Some(StepStatus::Success)));
    assert_eq!(
        completed
            .iter()
            .map(|e| e.step_name.clone().unwrap())
            .collect::<Vec<_>>(),
        vec!["first", "second", "third"]
    );

    let percentages: Vec<u8> = events.iter().filter_map(|e| e.percentage).collect();
    assert!(percentages.windows(2).all(|w| w[0] <= w[1]));

    assert_eq!(
        harness.host.commands(),
        vec!["echo one", "echo two", "echo three"]
    );
    assert!(harness.dispatcher.active_sessions().is_empty());
}

#[tokio::test]
async fn test_missing_required_parameter_fails_before_any_step() {
    let script = ScriptDefinition::new("greet", ScriptClassification::Configurable)
        .with_parameter(ParameterSpec::required("app_name", VariableType::String))
        .with_step(RemoteCommandStep::new("greet", "echo ${app_name}"));
    let harness = Harness::new(registry_with(vec![script]));
    let mut events = harness.transport.subscribe("s-b");

    let report = harness
        .dispatcher
        .execute(ExecutionRequest::new("s-b", "greet", target()))
        .await;

    assert_eq!(report.state, ExecutionState::Failed);
    assert!(matches!(
        report.error,
        Some(ProvisionerError::ParameterValidation(_))
    ));

    let events = drain(&mut events);
    assert_eq!(kinds(&events), vec![ProgressEventKind::Error]);
    let payload = events[0].payload.clone().unwrap();
    assert_eq!(payload["code"], "parameter_validation_error");
    assert_eq!(payload["correlationId"], json!(report.execution_id));
    assert_eq!(
        payload["fields"],
        json!([{ "field": "app_name", "message": "is required" }])
    );

    assert_eq!(harness.host.connects(), 0);
    assert!(harness.host.commands().is_empty());
}

#[tokio::test]
async fn test_configurable_parameters_are_coerced_and_bound() {
    let script = ScriptDefinition::new("listen", ScriptClassification::Configurable)
        .with_parameter(ParameterSpec::required("port", VariableType::Int))
        .with_parameter(ParameterSpec::optional("host", VariableType::String).with_default("0.0.0.0"))
        .with_step(RemoteCommandStep::new("listen", "serve --bind ${host}:${port}"));
    let harness = Harness::new(registry_with(vec![script]));

    let report = harness
        .dispatcher
        .execute(ExecutionRequest::new("s-coerce", "listen", target()).with_parameter("port", "8080"))
        .await;

    assert!(report.is_success(), "{:?}", report.error);
    assert_eq!(harness.host.commands(), vec!["serve --bind 0.0.0.0:8080"]);
    assert_eq!(report.snapshot.variables["port"], json!(8080));
}

#[tokio::test]
async fn test_static_script_rejects_parameters() {
    let harness = Harness::new(registry_with(vec![three_step_static()]));
    let mut events = harness.transport.subscribe("s-static");

    let report = harness
        .dispatcher
        .execute(ExecutionRequest::new("s-static", "three-steps", target()).with_parameter("force", true))
        .await;

    match report.error {
        Some(ProvisionerError::ParameterValidation(fields)) => {
            assert_eq!(fields.len(), 1);
            assert_eq!(fields[0].field, "force");
            assert_eq!(fields[0].message, "script takes no parameters");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(kinds(&drain(&mut events)), vec![ProgressEventKind::Error]);
}

#[tokio::test]
async fn test_failing_step_stops_the_chain() {
    let script = ScriptDefinition::new("four-steps", ScriptClassification::Static)
        .with_step(RemoteCommandStep::new("one", "echo one"))
        .with_step(RemoteCommandStep::new("two", "apt-get install broken"))
        .with_step(RemoteCommandStep::new("three", "echo three"))
        .with_step(RemoteCommandStep::new("four", "echo four"));
    let harness = Harness::new(registry_with(vec![script]));
    harness
        .host
        .respond("apt-get install broken", CommandResult::failure(100, "E: Unable to locate package"));
    let mut events = harness.transport.subscribe("s-c");

    let report = harness
        .dispatcher
        .execute(ExecutionRequest::new("s-c", "four-steps", target()))
        .await;

    assert_eq!(report.state, ExecutionState::Failed);
    assert_eq!(report.steps.len(), 2);
    assert!(!harness.host.ran("echo three"));
    assert!(!harness.host.ran("echo four"));

    let events = drain(&mut events);
    let failed: Vec<_> = events
        .iter()
        .filter(|e| e.kind == ProgressEventKind::StepFailed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].step_name.as_deref(), Some("two"));
    assert!(failed[0].message.as_deref().unwrap().contains("Unable to locate package"));

    let last = events.last().unwrap();
    assert_eq!(last.kind, ProgressEventKind::Error);
    assert_eq!(last.payload.as_ref().unwrap()["code"], "command_execution_error");
    assert_eq!(terminal_count(&events), 1);

    // the connection went back to the pool despite the failure
    let stats = harness.pool.stats();
    assert_eq!(stats[0].leased, 0);
    assert_eq!(stats[0].idle, 1);
}

#[tokio::test]
async fn test_unanswered_prompt_falls_back_to_default() {
    let script = ScriptDefinition::new("paint", ScriptClassification::Interactive)
        .with_step(PromptStep::new(
            "choose-color",
            InteractionPrompt::text("Which color?", Some("blue".to_string())),
            "color",
        ))
        .with_step(RemoteCommandStep::new("paint", "echo color=${color}"));
    let harness =
        Harness::with_interaction_timeout(registry_with(vec![script]), Duration::from_millis(50));
    let mut events = harness.transport.subscribe("s-d");

    let report = harness
        .dispatcher
        .execute(ExecutionRequest::new("s-d", "paint", target()))
        .await;

    assert!(report.is_success(), "{:?}", report.error);
    assert!(harness.host.ran("echo color=blue"));

    let events = drain(&mut events);
    assert!(kinds(&events).contains(&ProgressEventKind::InteractionRequested));
    assert_eq!(events.last().unwrap().kind, ProgressEventKind::Completed);
}

#[tokio::test]
async fn test_configurable_script_cannot_prompt() {
    let script = ScriptDefinition::new("tune", ScriptClassification::Configurable)
        .with_step(PromptStep::new(
            "ask-level",
            InteractionPrompt::text("Level?", Some("3".to_string())),
            "level",
        ))
        .with_step(RemoteCommandStep::new("apply", "echo level=${level}"));
    let harness = Harness::new(registry_with(vec![script]));
    let mut events = harness.transport.subscribe("s-tune");

    let report = harness
        .dispatcher
        .execute(ExecutionRequest::new("s-tune", "tune", target()))
        .await;

    assert_eq!(report.state, ExecutionState::Failed);
    let error = report.error.expect("prompt should be refused");
    assert_eq!(error.error_code(), "interaction_rejected");
    assert!(harness.host.commands().is_empty());
    assert!(!harness.broker.is_pending("s-tune"));

    let events = drain(&mut events);
    assert!(!kinds(&events).contains(&ProgressEventKind::InteractionRequested));
    assert_eq!(terminal_count(&events), 1);
}

#[tokio::test]
async fn test_prompt_without_default_times_out() {
    let script = ScriptDefinition::new("ask", ScriptClassification::Interactive)
        .with_step(PromptStep::new(
            "ask-name",
            InteractionPrompt::text("Name?", None),
            "name",
        ))
        .with_step(RemoteCommandStep::new("greet", "echo ${name}"));
    let harness =
        Harness::with_interaction_timeout(registry_with(vec![script]), Duration::from_millis(50));
    let mut events = harness.transport.subscribe("s-timeout");

    let report = harness
        .dispatcher
        .execute(ExecutionRequest::new("s-timeout", "ask", target()))
        .await;

    assert_eq!(report.state, ExecutionState::Failed);
    assert!(matches!(
        report.error,
        Some(ProvisionerError::InteractionTimeout { .. })
    ));
    assert!(harness.host.commands().is_empty());

    let events = drain(&mut events);
    assert_eq!(events.last().unwrap().kind, ProgressEventKind::Timeout);
    assert_eq!(terminal_count(&events), 1);
}

#[tokio::test]
async fn test_operator_answer_resumes_execution() {
    let script = ScriptDefinition::new("paint", ScriptClassification::Interactive)
        .with_step(PromptStep::new(
            "choose-color",
            InteractionPrompt::text("Which color?", Some("blue".to_string())),
            "color",
        ))
        .with_step(RemoteCommandStep::new("paint", "echo color=${color}"));
    let harness = Harness::new(registry_with(vec![script]));
    let mut events = harness.transport.subscribe("s-answer");

    let execution = harness
        .dispatcher
        .spawn(ExecutionRequest::new("s-answer", "paint", target()));

    let requested = next_of_kind(&mut events, ProgressEventKind::InteractionRequested).await;
    let payload = requested.payload.unwrap();
    let correlation_id = payload["correlationId"].as_str().unwrap().to_string();
    assert_eq!(payload["defaultValue"], "blue");
    assert_eq!(
        harness.dispatcher.state("s-answer"),
        Some(ExecutionState::WaitingForInput)
    );

    let response = InteractionResponse {
        session_id: "s-answer".to_string(),
        correlation_id: correlation_id.clone(),
        value: "green".to_string(),
    };
    assert_eq!(harness.dispatcher.respond(response.clone()), ResolveOutcome::Accepted);
    assert_eq!(harness.dispatcher.respond(response), ResolveOutcome::Rejected);

    let report = execution.await.unwrap();
    assert!(report.is_success(), "{:?}", report.error);
    assert!(harness.host.ran("echo color=green"));
}

#[tokio::test]
async fn test_geo_cascade_stops_at_first_answer_and_selects_china_mirrors() {
    let endpoints: Vec<String> = (1..=4).map(|i| format!("https://geo-{i}.test/")).collect();
    let registry = ScriptRegistry::new();
    register_builtin_scripts(
        &registry,
        Arc::new(GeoOsDetectionService::new(Duration::from_secs(2), &endpoints)),
    )
    .unwrap();
    let harness = Harness::new(registry);
    harness
        .host
        .respond("/etc/os-release", CommandResult::success(UBUNTU_OS_RELEASE))
        .respond("uname -m", CommandResult::success("x86_64\n"))
        .respond("geo-1.test", CommandResult::success(""))
        .respond("geo-2.test", CommandResult::failure(22, "404"))
        .respond("geo-3.test", CommandResult::success("CN\n"))
        .respond("geo-4.test", CommandResult::success("US"));

    let report = harness
        .dispatcher
        .execute(ExecutionRequest::new("s-e", DETECT_SYSTEM, target()))
        .await;

    assert!(report.is_success(), "{:?}", report.error);
    let ambient_values = &report.snapshot.ambient;
    assert_eq!(ambient_values[ambient::OS_ID], "ubuntu");
    assert_eq!(ambient_values[ambient::OS_FAMILY], "debian");
    assert_eq!(ambient_values[ambient::PACKAGE_MANAGER], "apt");
    assert_eq!(ambient_values[ambient::ARCH], "x86_64");
    assert_eq!(ambient_values[ambient::COUNTRY_CODE], "CN");
    assert_eq!(ambient_values[ambient::MIRROR_REGION], "china");
    assert_eq!(ambient_values[ambient::PACKAGE_MIRROR], mirrors::CN_UBUNTU);
    assert_eq!(ambient_values[ambient::DOCKER_MIRROR], mirrors::CN_DOCKER_CE);

    assert!(harness.host.ran("geo-3.test"));
    assert!(!harness.host.ran("geo-4.test"));
    assert!(!harness.host.ran("lsb_release"));
}

#[tokio::test]
async fn test_unreachable_geo_services_fall_back_to_official_mirrors() {
    let endpoints = vec!["https://geo-1.test/".to_string()];
    let registry = ScriptRegistry::new();
    register_builtin_scripts(
        &registry,
        Arc::new(GeoOsDetectionService::new(Duration::from_secs(2), &endpoints)),
    )
    .unwrap();
    let harness = Harness::new(registry);
    harness
        .host
        .respond("/etc/os-release", CommandResult::success(UBUNTU_OS_RELEASE))
        .respond("geo-1.test", CommandResult::failure(6, "could not resolve host"));

    let report = harness
        .dispatcher
        .execute(ExecutionRequest::new("s-offline", DETECT_SYSTEM, target()))
        .await;

    assert!(report.is_success(), "{:?}", report.error);
    assert_eq!(report.snapshot.ambient[ambient::COUNTRY_CODE], UNKNOWN);
    assert_eq!(report.snapshot.ambient[ambient::MIRROR_REGION], "official");
    assert_eq!(
        report.snapshot.ambient[ambient::PACKAGE_MIRROR],
        mirrors::OFFICIAL_UBUNTU
    );
}

#[tokio::test]
async fn test_cancel_between_steps() {
    let script = ScriptDefinition::new("slow", ScriptClassification::Static)
        .with_step(RemoteCommandStep::new("wait", "sleep-marker"))
        .with_step(RemoteCommandStep::new("after", "echo never"));
    let harness = Harness::new(registry_with(vec![script]));
    harness.host.respond_after(
        "sleep-marker",
        Duration::from_millis(150),
        CommandResult::success(""),
    );
    let mut events = harness.transport.subscribe("s-cancel");

    let execution = harness
        .dispatcher
        .spawn(ExecutionRequest::new("s-cancel", "slow", target()));
    next_of_kind(&mut events, ProgressEventKind::StepProgress).await;
    assert!(harness.dispatcher.cancel("s-cancel"));

    let report = execution.await.unwrap();
    assert_eq!(report.state, ExecutionState::Cancelled);
    assert_eq!(report.error, Some(ProvisionerError::Cancelled));
    assert!(!harness.host.ran("echo never"));

    let terminal = next_of_kind(&mut events, ProgressEventKind::Error).await;
    assert_eq!(terminal.status, Some(StepStatus::Cancelled));
    assert!(!harness.dispatcher.cancel("s-cancel"));
}

#[tokio::test]
async fn test_second_execution_on_busy_session_is_rejected() {
    let script = ScriptDefinition::new("ask", ScriptClassification::Interactive)
        .with_step(PromptStep::new(
            "ask-name",
            InteractionPrompt::text("Name?", None),
            "name",
        ));
    let harness = Harness::new(registry_with(vec![script]));
    let mut events = harness.transport.subscribe("s-busy");

    let first = harness
        .dispatcher
        .spawn(ExecutionRequest::new("s-busy", "ask", target()));
    next_of_kind(&mut events, ProgressEventKind::InteractionRequested).await;

    let second = harness
        .dispatcher
        .execute(ExecutionRequest::new("s-busy", "ask", target()))
        .await;
    assert!(matches!(
        second.error,
        Some(ProvisionerError::ExecutionAlreadyActive(ref s)) if s == "s-busy"
    ));
    assert!(second.execution_id.is_empty());

    // cancelling wakes the pending prompt
    assert!(harness.dispatcher.cancel("s-busy"));
    let report = first.await.unwrap();
    assert_eq!(report.state, ExecutionState::Cancelled);
    assert!(!harness.broker.is_pending("s-busy"));

    let rest = drain(&mut events);
    assert_eq!(terminal_count(&rest), 1);
    let step_failed = rest
        .iter()
        .find(|e| e.kind == ProgressEventKind::StepFailed)
        .unwrap();
    assert_eq!(step_failed.status, Some(StepStatus::Cancelled));
}

#[tokio::test]
async fn test_dropped_session_is_retried_once_on_a_new_connection() {
    let script = ScriptDefinition::new("flaky", ScriptClassification::Static)
        .with_step(RemoteCommandStep::new("flaky-step", "echo flaky"))
        .with_step(RemoteCommandStep::new("next", "echo next"));
    let harness = Harness::new(registry_with(vec![script]));
    harness.host.drop_once_on("echo flaky");

    let report = harness
        .dispatcher
        .execute(ExecutionRequest::new("s-drop", "flaky", target()))
        .await;

    assert!(report.is_success(), "{:?}", report.error);
    assert_eq!(report.step("flaky-step").unwrap().attempts, 2);
    assert_eq!(report.step("next").unwrap().attempts, 1);
    assert_eq!(harness.host.connects(), 2);
    assert_eq!(harness.host.live_sessions(), 1);
}

#[tokio::test]
async fn test_dropped_session_fails_when_reconnect_disabled() {
    let script = ScriptDefinition::new("flaky", ScriptClassification::Static)
        .with_step(RemoteCommandStep::new("flaky-step", "echo flaky"));
    let harness = Harness::new(registry_with(vec![script]));
    harness.host.drop_once_on("echo flaky");
    let dispatcher = ExecutionDispatcher::new(
        Arc::clone(&harness.registry),
        Arc::clone(&harness.pool),
        Arc::clone(&harness.broker),
        Arc::clone(&harness.reporter),
    )
    .with_reconnect_on_drop(false);

    let report = dispatcher
        .execute(ExecutionRequest::new("s-drop", "flaky", target()))
        .await;

    assert_eq!(report.state, ExecutionState::Failed);
    assert!(report.error.as_ref().unwrap().is_connection_lost());
    assert_eq!(harness.host.connects(), 1);
}

#[tokio::test]
async fn test_unreachable_host_reports_generic_message() {
    let harness = Harness::new(registry_with(vec![three_step_static()]));
    harness.host.reject_auth();
    let mut events = harness.transport.subscribe("s-auth");

    let report = harness
        .dispatcher
        .execute(ExecutionRequest::new("s-auth", "three-steps", target()))
        .await;

    assert!(matches!(
        report.error,
        Some(ProvisionerError::Connection { attempts: 1, .. })
    ));
    let events = drain(&mut events);
    assert_eq!(kinds(&events), vec![ProgressEventKind::Error]);
    assert_eq!(
        events[0].message.as_deref(),
        Some("Server unreachable, retry later")
    );
    assert_eq!(events[0].payload.as_ref().unwrap()["code"], "connection_error");
}

#[tokio::test]
async fn test_unknown_script() {
    let harness = Harness::new(ScriptRegistry::new());
    let mut events = harness.transport.subscribe("s-unknown");

    let report = harness
        .dispatcher
        .execute(ExecutionRequest::new("s-unknown", "does-not-exist", target()))
        .await;

    assert!(matches!(report.error, Some(ProvisionerError::ScriptNotFound(_))));
    let events = drain(&mut events);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].payload.as_ref().unwrap()["code"], "script_not_found");
    assert!(report.into_result().is_err());
}
