//! End-to-end runs over in-process workers.

use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::*;
use crate::agents::{AgentResult, AgentRole};
use crate::canary::{CanaryConfig, Cohort};
use crate::classifier::FailureType;
use crate::errors::RunError;
use crate::events::types;
use crate::testing::{EchoAgent, FailingAgent, ScriptedAgent, TestHarness};

async fn settle(harness: &TestHarness, run_id: Uuid) -> Run {
    tokio::time::timeout(Duration::from_secs(10), harness.orchestrator.wait_for_settled(run_id))
        .await
        .expect("run did not settle in time")
        .unwrap()
}

fn request() -> RunRequest {
    RunRequest::new("acme", "build a todo app")
}

#[tokio::test]
async fn test_control_run_succeeds() {
    let harness = TestHarness::echo();
    let run_id = harness.orchestrator.submit_run(request());
    let run = settle(&harness, run_id).await;

    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.pipeline_version, Cohort::Control);
    assert_eq!(run.iteration, 1);
    assert_eq!(
        run.status_history(),
        vec![
            RunStatus::Pending,
            RunStatus::Planning,
            RunStatus::Generating,
            RunStatus::Evaluating,
            RunStatus::Succeeded,
        ]
    );
    assert_eq!(run.step_spans().len(), 5);
    assert_eq!(run.tokens_used, 500);
    assert!((run.cost_usd - 0.05).abs() < 1e-9);
    assert!(run.ended_at.is_some());
    assert!(run.outcome.as_ref().is_some_and(RunOutcome::is_success));

    let events = harness.events.events_for_run(run_id);
    assert_eq!(events.first().unwrap().event_type, types::RUN_SUBMITTED);
    assert_eq!(events.last().unwrap().event_type, types::RUN_COMPLETED);
    assert_eq!(events.last().unwrap().data["status"], "succeeded");

    harness.shutdown().await;
}

#[tokio::test]
async fn test_experimental_cohort_runs_extended_pipeline() {
    let harness = TestHarness::builder()
        .with_canary_config(CanaryConfig::default().with_canary_percent(1.0))
        .build();
    let run_id = harness.orchestrator.submit_run(request());
    let run = settle(&harness, run_id).await;

    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.pipeline_version, Cohort::Experimental);
    let steps: Vec<String> = run
        .step_spans()
        .iter()
        .filter_map(|span| match &span.kind {
            SpanKind::Step { step_id, .. } => Some(step_id.clone()),
            SpanKind::Transition { .. } => None,
        })
        .collect();
    assert_eq!(steps.len(), 7);
    assert!(steps.contains(&"dev_ops.package".to_string()));
    assert!(steps.contains(&"reviewer.review".to_string()));

    harness.shutdown().await;
}

#[tokio::test]
async fn test_success_outcome_carries_artifacts_and_report() {
    let harness = TestHarness::builder()
        .with_agent(
            ScriptedAgent::new(AgentRole::CodegenEngineer)
                .then_ok(AgentResult::new(serde_json::json!({"artifacts": {"main.rs": "fn main() {}"}}))),
        )
        .with_agent(ScriptedAgent::new(AgentRole::QaEvaluator).then_ok(AgentResult::new(
            serde_json::json!({"passed": true, "score": 0.92, "recommendations": ["add docs"]}),
        )))
        .build();
    let run_id = harness.orchestrator.submit_run(request());
    let run = settle(&harness, run_id).await;

    match run.outcome {
        Some(RunOutcome::Succeeded { artifacts, report }) => {
            assert_eq!(artifacts["main.rs"], "fn main() {}");
            assert_eq!(report.score, Some(0.92));
            assert!(report.passed);
            assert_eq!(report.recommendations, vec!["add docs".to_string()]);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    harness.shutdown().await;
}

#[tokio::test]
async fn test_failing_tests_regenerate_code() {
    let codegen = Arc::new(EchoAgent::new(AgentRole::CodegenEngineer));
    let harness = TestHarness::builder()
        .with_shared_agent(codegen.clone())
        .with_agent(
            ScriptedAgent::new(AgentRole::QaEvaluator).then_fail("qa run", "AssertionError: expected 3, got 2"),
        )
        .build();
    let run_id = harness.orchestrator.submit_run(request());
    let run = settle(&harness, run_id).await;

    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.iteration, 2);
    assert_eq!(run.replan_count, 1);
    assert_eq!(run.retry_count, 0);
    assert_eq!(run.failure_signals.len(), 1);
    assert_eq!(run.failure_signals[0].failure_type, FailureType::TestAssert);
    assert_eq!(codegen.call_count(), 2);

    let history = run.status_history();
    let regen = history
        .windows(2)
        .any(|w| w == [RunStatus::Evaluating, RunStatus::Generating]);
    assert!(regen, "expected evaluating -> generating in {history:?}");

    // The regenerated attempt sees the failure.
    let second = &codegen.calls()[1];
    assert_eq!(second.input["feedback"]["failure_type"], "test_assert");
    assert_eq!(second.input["iteration"], 2);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_reported_failure_regenerates() {
    let harness = TestHarness::builder()
        .with_agent(ScriptedAgent::new(AgentRole::QaEvaluator).then_ok(
            AgentResult::new(serde_json::json!({"passed": false})).with_logs("AssertionError: 1 != 2"),
        ))
        .build();
    let run_id = harness.orchestrator.submit_run(request());
    let run = settle(&harness, run_id).await;

    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.iteration, 2);
    assert_eq!(run.failure_signals[0].failure_type, FailureType::TestAssert);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_transient_failure_retries_in_place() {
    let harness = TestHarness::builder()
        .with_agent(
            ScriptedAgent::new(AgentRole::SystemDesigner)
                .then_fail("upstream hiccup", "ConnectionResetError: connection reset by peer"),
        )
        .build();
    let run_id = harness.orchestrator.submit_run(request());
    let run = settle(&harness, run_id).await;

    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.iteration, 1);
    assert_eq!(run.retry_count, 1);
    assert_eq!(run.replan_count, 0);
    assert_eq!(run.failure_signals[0].failure_type, FailureType::Transient);

    let attempts: Vec<u32> = run
        .step_spans()
        .iter()
        .filter_map(|span| match &span.kind {
            SpanKind::Step { step_id, attempt, .. } if step_id == "system_designer.design" => Some(*attempt),
            _ => None,
        })
        .collect();
    assert_eq!(attempts, vec![0, 1]);
    assert_eq!(harness.events.events_of_type(types::RUN_RETRY_SCHEDULED).len(), 1);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_rate_limit_honours_retry_after() {
    let harness = TestHarness::builder()
        .with_agent(
            ScriptedAgent::new(AgentRole::ProductArchitect)
                .then_fail("throttled", "429 Too Many Requests\nRetry-After: 0"),
        )
        .build();
    let run_id = harness.orchestrator.submit_run(request());
    let run = settle(&harness, run_id).await;

    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.retry_count, 1);
    let signal = &run.failure_signals[0];
    assert_eq!(signal.failure_type, FailureType::RateLimit);
    assert_eq!(signal.retry_after(), Some(Duration::ZERO));

    let retry = &harness.events.events_of_type(types::RUN_RETRY_SCHEDULED)[0];
    assert_eq!(retry.data["delay_ms"], 0);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_retry_after_past_duration_limit_fails_now() {
    let harness = TestHarness::builder()
        .with_agent(
            ScriptedAgent::new(AgentRole::ProductArchitect)
                .then_fail("throttled", "429 Too Many Requests\nRetry-After: 3600"),
        )
        .build();
    let run_id = harness.orchestrator.submit_run(
        request().with_limits(RunLimits::default().with_max_duration(Duration::from_secs(1))),
    );
    let run = tokio::time::timeout(Duration::from_secs(2), harness.orchestrator.wait_for_settled(run_id))
        .await
        .expect("run parked on a retry delay")
        .unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.retry_count, 0);
    assert_eq!(run.failure_signals[0].failure_type, FailureType::RateLimit);
    match run.outcome {
        Some(RunOutcome::Failed { reason, .. }) => assert!(reason.contains("max_duration_secs"), "{reason}"),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(harness.events.events_of_type(types::RUN_RETRY_SCHEDULED).is_empty());

    let completed = harness.events.events_of_type(types::RUN_COMPLETED);
    assert_eq!(completed[0].data["error"]["type"], "LimitExceeded");
    assert_eq!(completed[0].data["error"]["limit"], "max_duration_secs");

    harness.shutdown().await;
}

#[tokio::test]
async fn test_idle_pool_keeps_serving_runs() {
    let harness = TestHarness::echo();
    let lease = Duration::from_millis(harness.pool.config().lease_ttl_ms);

    let first = harness.orchestrator.submit_run(request());
    assert_eq!(settle(&harness, first).await.status, RunStatus::Succeeded);

    tokio::time::sleep(lease * 3).await;

    assert_eq!(harness.pool.get_worker_stats().total, 4);
    assert!(harness.events.events_of_type(types::WORKER_EVICTED).is_empty());
    let second = harness.orchestrator.submit_run(request());
    assert_eq!(settle(&harness, second).await.status, RunStatus::Succeeded);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_consecutive_unknown_failures_replan_then_exhaust() {
    let harness = TestHarness::builder()
        .with_agent(FailingAgent::new(
            AgentRole::SystemDesigner,
            "widget crashed",
            "something odd happened",
        ))
        .with_orchestrator_config(OrchestratorConfig::default().with_max_iterations(2))
        .build();
    let run_id = harness.orchestrator.submit_run(request());
    let run = settle(&harness, run_id).await;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.iteration, 2);
    assert_eq!(run.retry_count, 1);
    assert_eq!(run.replan_count, 1);
    assert_eq!(run.failure_signals.len(), 3);
    assert!(!run.failure_signals[0].synthetic);
    assert!(run.failure_signals[1].synthetic);
    assert!(run.failure_signals[1].requires_replan);

    match run.outcome {
        Some(RunOutcome::Failed { reason, failure_chain }) => {
            assert!(reason.contains("Iteration budget exhausted"));
            assert_eq!(failure_chain.len(), 3);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    harness.shutdown().await;
}

#[tokio::test]
async fn test_iteration_budget_fails_run() {
    let harness = TestHarness::builder()
        .with_agent(FailingAgent::new(AgentRole::QaEvaluator, "qa run", "AssertionError: boom"))
        .with_orchestrator_config(OrchestratorConfig::default().with_max_iterations(3))
        .build();
    let run_id = harness.orchestrator.submit_run(request());
    let run = settle(&harness, run_id).await;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.iteration, 3);
    assert_eq!(run.replan_count, 2);
    assert!(run
        .failure_signals
        .iter()
        .all(|s| s.failure_type == FailureType::TestAssert));

    let sample = harness.canary.sample(run_id).unwrap();
    let record = sample.outcome.unwrap();
    assert!(!record.success);
    assert_eq!(record.replan_count, 2);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_cost_limit_escalates() {
    let harness = TestHarness::echo();
    let run_id = harness
        .orchestrator
        .submit_run(request().with_limits(RunLimits::default().with_max_cost(0.025)));
    let run = settle(&harness, run_id).await;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.step_spans().len(), 3);
    match run.outcome {
        Some(RunOutcome::Failed { reason, .. }) => assert!(reason.contains("max_cost_usd"), "{reason}"),
        other => panic!("unexpected outcome: {other:?}"),
    }

    harness.shutdown().await;
}

#[tokio::test]
async fn test_missing_workers_fail_run() {
    let harness = TestHarness::builder().with_workers(2, 0).build();
    let run_id = harness.orchestrator.submit_run(request());
    let run = settle(&harness, run_id).await;

    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.step_spans().is_empty());
    match run.outcome {
        Some(RunOutcome::Failed { reason, .. }) => assert!(reason.contains("Worker pool exhausted")),
        other => panic!("unexpected outcome: {other:?}"),
    }

    harness.shutdown().await;
}

fn security_harness() -> TestHarness {
    TestHarness::builder()
        .with_agent(
            ScriptedAgent::new(AgentRole::SecurityCompliance)
                .then_fail("scan flagged output", "hardcoded secret found in config.py"),
        )
        .build()
}

#[tokio::test]
async fn test_security_finding_pauses_and_approval_replans() {
    let harness = security_harness();
    let run_id = harness.orchestrator.submit_run(request());
    let paused = settle(&harness, run_id).await;

    assert_eq!(paused.status, RunStatus::AwaitingApproval);
    assert_eq!(paused.pause, Some(PauseReason::Security));
    assert_eq!(paused.failure_signals[0].failure_type, FailureType::Security);

    let resumed = harness
        .orchestrator
        .approve_run(run_id, true, Some("false positive".to_string()))
        .unwrap();
    assert_eq!(resumed.iteration, 2);
    assert_eq!(resumed.approvals.len(), 1);
    assert!(resumed.approvals[0].approved);

    let run = settle(&harness, run_id).await;
    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.replan_count, 1);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_security_rejection_fails_run() {
    let harness = security_harness();
    let run_id = harness.orchestrator.submit_run(request());
    settle(&harness, run_id).await;

    let run = harness.orchestrator.approve_run(run_id, false, None).unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.rollback_count, 0);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_security_without_pause_replans() {
    let harness = security_harness();
    let run_id = harness.orchestrator.submit_run(
        request().with_review(ReviewConfig::default().with_pause_on_security(false)),
    );
    let run = settle(&harness, run_id).await;

    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.iteration, 2);
    assert!(run.approvals.is_empty());

    harness.shutdown().await;
}

#[tokio::test]
async fn test_final_review_approve_and_reject() {
    let harness = TestHarness::echo();
    let review = ReviewConfig::default().with_approval();

    let approved = harness.orchestrator.submit_run(request().with_review(review.clone()));
    let rejected = harness.orchestrator.submit_run(request().with_review(review));

    for run_id in [approved, rejected] {
        let run = settle(&harness, run_id).await;
        assert_eq!(run.status, RunStatus::AwaitingApproval);
        assert_eq!(run.pause, Some(PauseReason::FinalReview));
        assert!(run.ended_at.is_none());
    }

    let run = harness.orchestrator.approve_run(approved, true, None).unwrap();
    assert_eq!(run.status, RunStatus::Succeeded);
    assert!(run.outcome.as_ref().is_some_and(RunOutcome::is_success));

    let run = harness
        .orchestrator
        .approve_run(rejected, false, Some("wrong stack".to_string()))
        .unwrap();
    assert_eq!(run.status, RunStatus::RolledBack);
    assert_eq!(run.rollback_count, 1);
    assert_eq!(
        run.outcome,
        Some(RunOutcome::RolledBack {
            reason: "wrong stack".to_string()
        })
    );

    let record = harness.canary.sample(rejected).unwrap().outcome.unwrap();
    assert!(!record.success);
    assert_eq!(record.rollback_count, 1);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_approval_requires_pause() {
    let harness = TestHarness::echo();
    let run_id = harness.orchestrator.submit_run(request());
    settle(&harness, run_id).await;

    let err = harness.orchestrator.approve_run(run_id, true, None).unwrap_err();
    assert_eq!(
        err,
        RunError::NotAwaitingApproval {
            run_id,
            status: "succeeded".to_string()
        }
    );

    let missing = Uuid::new_v4();
    assert_eq!(
        harness.orchestrator.get_run_status(missing).unwrap_err(),
        RunError::NotFound { run_id: missing }
    );

    harness.shutdown().await;
}

#[tokio::test]
async fn test_second_decision_is_rejected() {
    let harness = TestHarness::echo();
    let run_id = harness
        .orchestrator
        .submit_run(request().with_review(ReviewConfig::default().with_approval()));
    settle(&harness, run_id).await;

    harness.orchestrator.approve_run(run_id, false, None).unwrap();
    let err = harness.orchestrator.approve_run(run_id, true, None).unwrap_err();
    assert!(matches!(err, RunError::NotAwaitingApproval { .. }));

    let run = harness.orchestrator.get_run_status(run_id).unwrap();
    assert_eq!(run.status, RunStatus::RolledBack);
    assert_eq!(run.approvals.len(), 1);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_completion_recorded_once_per_run() {
    let harness = TestHarness::echo();
    let run_id = harness.orchestrator.submit_run(request());
    let run = settle(&harness, run_id).await;

    let sample = harness.canary.sample(run_id).unwrap();
    assert_eq!(sample.cohort, run.pipeline_version);
    let record = sample.outcome.unwrap();
    assert!(record.success);
    assert_eq!(record.metrics["iterations"], 1);
    assert_eq!(record.metrics["tokens_used"], 500);

    let completed = harness.events.events_of_type(types::RUN_COMPLETED);
    assert_eq!(completed.iter().filter(|e| e.run_id == Some(run_id)).count(), 1);

    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_concurrent_runs() {
    let harness = TestHarness::builder()
        .with_workers(4, 4)
        .with_canary_config(CanaryConfig::default().with_canary_percent(0.5))
        .build();

    let run_ids: Vec<Uuid> = (0..20)
        .map(|i| {
            harness
                .orchestrator
                .submit_run(RunRequest::new(format!("tenant-{}", i % 4), "build"))
        })
        .collect();

    for run_id in &run_ids {
        let run = settle(&harness, *run_id).await;
        assert_eq!(run.status, RunStatus::Succeeded);
    }

    assert_eq!(harness.orchestrator.run_count(), 20);
    assert_eq!(harness.orchestrator.list_runs().len(), 20);
    assert_eq!(harness.canary.sample_count(), 20);

    let stats = harness.pool.get_queue_stats();
    assert_eq!(stats.total_pending, 0);
    let steps: usize = harness
        .orchestrator
        .list_runs()
        .iter()
        .map(|run| run.step_spans().len())
        .sum();
    assert_eq!(stats.completed, steps as u64);
    assert_eq!(harness.pool.tracked_tasks(), 0);

    harness.shutdown().await;
}
