//! Assignment and coordination scenarios: dependency chains, concurrent
//! agents, phase ordering, decision logging, and context propagation.

use super::test_helpers::*;
use crate::{
    coordinator::RequestOutcome,
    models::{ArtifactKind, TaskStatus},
    MarcusError,
};

fn assigned_task_id(outcome: &RequestOutcome) -> Option<String> {
    match outcome {
        RequestOutcome::Assigned { task, .. } => Some(task.id.clone()),
        _ => None,
    }
}

#[tokio::test]
async fn single_agent_walks_a_linear_chain_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let board = shared_board();
    board.inner().put_task(task("a", "Design schema"));
    board
        .inner()
        .put_task(task_with("b", "Implement schema", &[], &["a"]));
    board
        .inner()
        .put_task(task_with("c", "Migrate data", &[], &["b"]));

    let coordinator = build_coordinator(dir.path(), board.clone()).await;
    let agent = register(&coordinator, "kai", &[]).await;

    let mut sequence = Vec::new();
    for _ in 0..3 {
        let outcome = coordinator.request_next_task(&agent).await.unwrap();
        let task_id = assigned_task_id(&outcome).expect("chain should keep yielding work");
        coordinator
            .report_completion(&agent, &task_id, "done")
            .await
            .unwrap();
        sequence.push(task_id);
    }

    assert_eq!(sequence, vec!["a", "b", "c"]);
    assert!(matches!(
        coordinator.request_next_task(&agent).await.unwrap(),
        RequestOutcome::NoWork
    ));
}

#[tokio::test]
async fn two_agents_split_parallel_branches() {
    let dir = tempfile::tempdir().unwrap();
    let board = shared_board();
    let mut root = task("a", "Root work");
    root.status = TaskStatus::Done;
    board.inner().put_task(root);
    board
        .inner()
        .put_task(task_with("b", "Left branch", &[], &["a"]));
    board
        .inner()
        .put_task(task_with("c", "Right branch", &[], &["a"]));

    let coordinator = build_coordinator(dir.path(), board.clone()).await;
    let first = register(&coordinator, "kai", &[]).await;
    let second = register(&coordinator, "noor", &[]).await;

    let (outcome_a, outcome_b) = tokio::join!(
        coordinator.request_next_task(&first),
        coordinator.request_next_task(&second)
    );
    let task_a = assigned_task_id(&outcome_a.unwrap()).unwrap();
    let task_b = assigned_task_id(&outcome_b.unwrap()).unwrap();

    // Never the same task twice.
    assert_ne!(task_a, task_b);
    assert!(["b", "c"].contains(&task_a.as_str()));
    assert!(["b", "c"].contains(&task_b.as_str()));
}

#[tokio::test]
async fn concurrent_requests_for_one_task_assign_it_once() {
    let dir = tempfile::tempdir().unwrap();
    let board = shared_board();
    board.inner().put_task(task("only", "The one task"));

    let coordinator = build_coordinator(dir.path(), board.clone()).await;
    let first = register(&coordinator, "kai", &[]).await;
    let second = register(&coordinator, "noor", &[]).await;

    let (outcome_a, outcome_b) = tokio::join!(
        coordinator.request_next_task(&first),
        coordinator.request_next_task(&second)
    );

    let assigned = [outcome_a.unwrap(), outcome_b.unwrap()]
        .iter()
        .filter(|o| matches!(o, RequestOutcome::Assigned { .. }))
        .count();
    assert_eq!(assigned, 1, "exactly one agent may win the only task");
}

#[tokio::test]
async fn phase_ordering_holds_tests_until_implementation_is_done() {
    let dir = tempfile::tempdir().unwrap();
    let board = shared_board();
    board.inner().put_task(task_with(
        "impl-api",
        "Impl API",
        &["component:api", "phase:implementation"],
        &[],
    ));
    board.inner().put_task(task_with(
        "test-api",
        "Test API",
        &["component:api", "phase:testing"],
        &[],
    ));

    let coordinator = build_coordinator(dir.path(), board.clone()).await;
    let agent = register(&coordinator, "kai", &[]).await;

    let outcome = coordinator.request_next_task(&agent).await.unwrap();
    assert_eq!(assigned_task_id(&outcome).unwrap(), "impl-api");

    // While the implementation is merely in progress, the test task stays
    // out of reach for everyone.
    let other = register(&coordinator, "noor", &[]).await;
    assert!(matches!(
        coordinator.request_next_task(&other).await.unwrap(),
        RequestOutcome::NoWork
    ));

    coordinator
        .report_completion(&agent, "impl-api", "implemented")
        .await
        .unwrap();
    let outcome = coordinator.request_next_task(&other).await.unwrap();
    assert_eq!(assigned_task_id(&outcome).unwrap(), "test-api");
}

#[tokio::test]
async fn skills_route_tasks_to_the_matching_agent() {
    let dir = tempfile::tempdir().unwrap();
    let board = shared_board();
    board.inner().put_task(task_with(
        "backend",
        "Service endpoints",
        &["skill:python", "component:api"],
        &[],
    ));
    board.inner().put_task(task_with(
        "frontend",
        "Dashboard widgets",
        &["skill:typescript", "component:ui"],
        &[],
    ));

    let coordinator = build_coordinator(dir.path(), board.clone()).await;
    let pythonista = register(&coordinator, "kai", &["python", "api"]).await;

    let outcome = coordinator.request_next_task(&pythonista).await.unwrap();
    assert_eq!(assigned_task_id(&outcome).unwrap(), "backend");
}

#[tokio::test]
async fn repeated_request_returns_already_assigned() {
    let dir = tempfile::tempdir().unwrap();
    let board = shared_board();
    board.inner().put_task(task("t1", "Only task"));

    let coordinator = build_coordinator(dir.path(), board.clone()).await;
    let agent = register(&coordinator, "kai", &[]).await;

    let first = coordinator.request_next_task(&agent).await.unwrap();
    assert!(matches!(first, RequestOutcome::Assigned { .. }));

    let second = coordinator.request_next_task(&agent).await.unwrap();
    match second {
        RequestOutcome::AlreadyAssigned { task, .. } => assert_eq!(task.id, "t1"),
        other => panic!("expected AlreadyAssigned, got {other:?}"),
    }
}

#[tokio::test]
async fn register_is_idempotent_on_name_and_role() {
    let dir = tempfile::tempdir().unwrap();
    let board = shared_board();
    let coordinator = build_coordinator(dir.path(), board.clone()).await;

    let first = coordinator
        .register_agent("kai", "backend", ["python".to_string()].into())
        .await
        .unwrap();
    let second = coordinator
        .register_agent("kai", "backend", ["rust".to_string()].into())
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    // Latest declaration wins.
    assert!(second.capabilities.contains("rust"));
    assert!(!second.capabilities.contains("python"));

    let other_role = coordinator
        .register_agent("kai", "reviewer", Default::default())
        .await
        .unwrap();
    assert_ne!(first.id, other_role.id);
}

#[tokio::test]
async fn decision_grammar_is_enforced_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let board = shared_board();
    board.inner().put_task(task("t1", "Pick a database"));

    let coordinator = build_coordinator(dir.path(), board.clone()).await;
    let agent = register(&coordinator, "kai", &[]).await;

    let decision = coordinator
        .log_decision(
            &agent,
            "t1",
            "I chose PostgreSQL because we need ACID. This affects all data models.",
        )
        .await
        .unwrap();
    assert_eq!(decision.what, "PostgreSQL");
    assert_eq!(decision.why, "we need ACID");
    assert_eq!(decision.affects, "all data models");

    let err = coordinator
        .log_decision(&agent, "t1", "Using PostgreSQL")
        .await
        .unwrap_err();
    assert!(matches!(err, MarcusError::MalformedDecision(_)));

    // The malformed attempt left no record behind.
    let status = coordinator.get_project_status().await.unwrap();
    assert_eq!(status.recent.len(), 1);
}

#[tokio::test]
async fn context_carries_predecessor_artifacts_downstream() {
    let dir = tempfile::tempdir().unwrap();
    let board = shared_board();
    board.inner().put_task(task("user-api", "User API"));
    board
        .inner()
        .put_task(task_with("order-api", "Order API", &[], &["user-api"]));

    let coordinator = build_coordinator(dir.path(), board.clone()).await;
    let agent = register(&coordinator, "kai", &[]).await;

    let outcome = coordinator.request_next_task(&agent).await.unwrap();
    assert_eq!(assigned_task_id(&outcome).unwrap(), "user-api");
    coordinator
        .log_decision(
            &agent,
            "user-api",
            "I chose cursor pagination because offsets drift. This affects list endpoints.",
        )
        .await
        .unwrap();
    coordinator
        .report_completion(&agent, "user-api", "OpenAPI spec for the user API")
        .await
        .unwrap();

    let outcome = coordinator.request_next_task(&agent).await.unwrap();
    let RequestOutcome::Assigned { task, context } = outcome else {
        panic!("expected order-api to be assigned");
    };
    assert_eq!(task.id, "order-api");
    assert_eq!(context.predecessors.len(), 1);
    let upstream = &context.predecessors[0];
    assert_eq!(upstream.task_id, "user-api");
    assert!(upstream
        .artifacts
        .iter()
        .any(|a| a.kind == ArtifactKind::Doc && a.summary.contains("OpenAPI")));
    assert!(upstream.decisions.iter().any(|d| d.what == "cursor pagination"));
    assert!(context.omitted.is_empty());
}

#[tokio::test]
async fn completion_is_idempotent_and_done_is_terminal() {
    let dir = tempfile::tempdir().unwrap();
    let board = shared_board();
    board.inner().put_task(task("t1", "Finish me"));

    let coordinator = build_coordinator(dir.path(), board.clone()).await;
    let agent = register(&coordinator, "kai", &[]).await;

    coordinator.request_next_task(&agent).await.unwrap();
    coordinator
        .report_completion(&agent, "t1", "done")
        .await
        .unwrap();

    // Second completion: no-op acknowledgement.
    coordinator
        .report_completion(&agent, "t1", "done again")
        .await
        .unwrap();
    assert_eq!(
        board.inner().get_task("t1").unwrap().status,
        TaskStatus::Done
    );

    // Progress on a finished task no longer holds a lease.
    let err = coordinator
        .report_progress(&agent, "t1", 50, "still going?")
        .await
        .unwrap_err();
    assert!(matches!(err, MarcusError::LeaseExpired { .. }));
}

#[tokio::test]
async fn blocker_flow_keeps_the_lease_and_resumes_on_progress() {
    let dir = tempfile::tempdir().unwrap();
    let board = shared_board();
    board.inner().put_task(task("t1", "Tricky task"));

    let coordinator = build_coordinator(dir.path(), board.clone()).await;
    let agent = register(&coordinator, "kai", &[]).await;
    coordinator.request_next_task(&agent).await.unwrap();

    coordinator
        .report_blocker(&agent, "t1", "waiting on credentials")
        .await
        .unwrap();
    assert_eq!(
        board.inner().get_task("t1").unwrap().status,
        TaskStatus::Blocked
    );
    // Still leased by the reporting agent.
    let status = coordinator.get_agent_status(&agent).await.unwrap();
    assert_eq!(status.lease.unwrap().task_id, "t1");

    coordinator
        .report_progress(&agent, "t1", 60, "credentials arrived")
        .await
        .unwrap();
    assert_eq!(
        board.inner().get_task("t1").unwrap().status,
        TaskStatus::InProgress
    );

    let comments = board.inner().comments_for("t1");
    assert!(comments.iter().any(|c| c.contains("[blocker]")));
    assert!(comments.iter().any(|c| c.contains("[progress 60%]")));
}

#[tokio::test]
async fn progress_at_one_hundred_percent_completes_the_task() {
    let dir = tempfile::tempdir().unwrap();
    let board = shared_board();
    board.inner().put_task(task("t1", "Almost there"));

    let coordinator = build_coordinator(dir.path(), board.clone()).await;
    let agent = register(&coordinator, "kai", &[]).await;
    coordinator.request_next_task(&agent).await.unwrap();

    coordinator
        .report_progress(&agent, "t1", 100, "shipped")
        .await
        .unwrap();
    assert_eq!(
        board.inner().get_task("t1").unwrap().status,
        TaskStatus::Done
    );
    let status = coordinator.get_agent_status(&agent).await.unwrap();
    assert!(status.lease.is_none());
    assert_eq!(status.recent_completions, vec!["t1".to_string()]);
}

#[tokio::test]
async fn project_status_reports_counts_and_blocked_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let board = shared_board();
    board.inner().put_task(task("t1", "Open task"));
    let mut blocked = task("t2", "Stuck task");
    blocked.status = TaskStatus::Blocked;
    board.inner().put_task(blocked);

    let coordinator = build_coordinator(dir.path(), board.clone()).await;
    let status = coordinator.get_project_status().await.unwrap();

    assert_eq!(status.counts.get("todo"), Some(&1));
    assert_eq!(status.counts.get("blocked"), Some(&1));
    assert_eq!(status.blocked.len(), 1);
    assert_eq!(status.blocked[0].id, "t2");
    assert!(status.active_leases.is_empty());
}

#[tokio::test]
async fn get_task_context_requires_no_lease() {
    let dir = tempfile::tempdir().unwrap();
    let board = shared_board();
    let mut done = task("p", "Finished prerequisite");
    done.status = TaskStatus::Done;
    board.inner().put_task(done);
    board
        .inner()
        .put_task(task_with("t", "Dependent", &[], &["p"]));

    let coordinator = build_coordinator(dir.path(), board.clone()).await;
    let context = coordinator.get_task_context("t").await.unwrap();
    assert_eq!(context.task_id, "t");
    assert_eq!(context.predecessors.len(), 1);

    let err = coordinator.get_task_context("missing").await.unwrap_err();
    assert!(matches!(err, MarcusError::NotFound(_)));
}
