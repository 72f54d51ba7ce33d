//! End-to-end pipeline scenarios over a scripted LLM.
//!
//! Each test drives the real orchestrator, critic loop, validators and
//! sandbox; only the model is stubbed.

use async_trait::async_trait;
use dagprobe_core::{Dataset, Metadata, Sandbox};
use llm::testing::ScriptedModel;
use llm::{ChatModel, ChatRequest, LlmRunner, RetryConfig};
use orchestrator::{
    Critic, CriticLoop, CriticLoopConfig, DagBuilder, DifficultyFilter, EventKind, EventPublisher,
    Orchestrator, RunConfig, RunEvent,
};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

fn dataset() -> Arc<Dataset> {
    Arc::new(serde_json::from_value(json!({"total": 42, "count": 7})).unwrap())
}

fn fast_runner(model: impl ChatModel + 'static) -> LlmRunner {
    LlmRunner::new(Arc::new(model))
        .with_retry(RetryConfig::new(0).with_initial_backoff(1).with_jitter(false))
}

fn good_dag(key: &str) -> serde_json::Value {
    json!({
        "description": format!("read {key}"),
        "nodes": [{
            "node_id": "n1",
            "operation": format!("return dataset.{key}"),
            "function_name": "ret",
            "inputs": {"x": format!("dataset.{key}")},
            "expected_output_type": "int",
            "layer": 0,
            "code": "fn ret(x) { x }"
        }],
        "edges": [],
        "final_answer_node": "n1"
    })
}

fn approve_layer() -> String {
    json!({"is_valid": true, "issues": [], "node_assessments": []}).to_string()
}

/// Routes each request by prompt content, so concurrent questions can share
/// one model.
struct RoutingModel {
    questions: serde_json::Value,
    /// Question text fragment -> DAG response.
    dags: Vec<(String, serde_json::Value)>,
}

#[async_trait]
impl ChatModel for RoutingModel {
    async fn complete(&self, request: &ChatRequest) -> llm::Result<String> {
        let prompt = &request.prompt;
        if prompt.contains("analytical questions") {
            return Ok(self.questions.to_string());
        }
        if prompt.contains("Review LAYER") {
            return Ok(approve_layer());
        }
        for (fragment, dag) in &self.dags {
            if prompt.contains(fragment.as_str()) {
                return Ok(dag.to_string());
            }
        }
        Err(llm::LlmError::Provider(format!(
            "no scripted route for prompt head: {}",
            prompt.chars().take(80).collect::<String>()
        )))
    }

    fn name(&self) -> &str {
        "routing"
    }
}

async fn drain(rx: &mut mpsc::Receiver<RunEvent>) -> Vec<RunEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn cancel_pair() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

// Scenario 1: single trivial question passes on the first iteration.
#[tokio::test]
async fn test_single_trivial_question() {
    let model = RoutingModel {
        questions: json!({"questions": [
            {"id": "q1", "text": "What is total?", "difficulty_rank": 1,
             "reasoning": "direct read", "relevant_data_keys": ["total"]}
        ]}),
        dags: vec![("What is total?".to_string(), good_dag("total"))],
    };
    let orchestrator = Orchestrator::new(fast_runner(model));
    let config = RunConfig {
        num_questions: 1,
        dataset_name: "toy".to_string(),
        ..RunConfig::default()
    };
    let (publisher, mut rx) = EventPublisher::channel("run-1");
    let (_tx, cancel) = cancel_pair();

    let report = orchestrator
        .execute_run(dataset(), Arc::new(Metadata::default()), &config, publisher, cancel)
        .await
        .unwrap();

    assert_eq!(report.summary.total, 1);
    assert_eq!(report.summary.passed, 1);
    assert_eq!(report.summary.pass_rate, 1.0);
    assert_eq!(report.summary.total_iterations, 1);

    let trace = &report.question_traces[0];
    assert_eq!(trace.iterations, 1);
    let result = trace.execution_result.as_ref().unwrap();
    assert_eq!(result.final_answer, Some(json!(42)));

    // Event order mirrors the state machine.
    let kinds: Vec<EventKind> = drain(&mut rx).await.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::RunStarted,
            EventKind::QuestionsGenerated,
            EventKind::DagBuilt,
            EventKind::CriticResult,
            EventKind::ExecutionDone,
            EventKind::QuestionComplete,
            EventKind::RunComplete,
        ]
    );

    // Report round-trips through JSON unchanged.
    let text = serde_json::to_string(&report).unwrap();
    let back: orchestrator::RunReport = serde_json::from_str(&text).unwrap();
    assert_eq!(report, back);
}

// Scenario 2: a cyclic DAG is rejected structurally, the rebuilt DAG passes.
#[tokio::test]
async fn test_cycle_rejected_then_recovered() {
    let cyclic = json!({
        "description": "two nodes chasing each other",
        "nodes": [
            {"node_id": "a", "operation": "start", "function_name": "fa",
             "inputs": {"x": "dataset.total"}, "expected_output_type": "int",
             "layer": 0, "code": "fn fa(x) { x }"},
            {"node_id": "b", "operation": "loop back", "function_name": "fb",
             "inputs": {"x": "prev_node.a.output"}, "expected_output_type": "int",
             "layer": 1, "code": "fn fb(x) { x }"}
        ],
        "edges": [
            {"source": "a", "target": "b"},
            {"source": "b", "target": "a"}
        ],
        "final_answer_node": "b"
    });

    let builder_model = ScriptedModel::new(vec![
        Ok(cyclic.to_string()),
        Ok(good_dag("total").to_string()),
    ]);
    let critic_model = ScriptedModel::always(approve_layer());
    let critic_loop = CriticLoop::new(
        DagBuilder::new(fast_runner(builder_model)),
        Critic::new(fast_runner(critic_model)),
        dagprobe_core::DagExecutor::new(Sandbox::default()),
        CriticLoopConfig::default(),
    );

    let question = dagprobe_core::Question {
        id: "q1".to_string(),
        text: "What is total?".to_string(),
        difficulty_rank: 1,
        difficulty_level: dagprobe_core::DifficultyLevel::Easy,
        reasoning: String::new(),
        relevant_data_keys: vec![],
    };
    let (publisher, _rx) = EventPublisher::channel("run-2");
    let (_tx, cancel) = cancel_pair();

    let trace = critic_loop
        .run_question(question, &dataset(), &Metadata::default(), &publisher, &cancel)
        .await;

    assert_eq!(trace.iterations, 2);
    assert!(trace.passed());
    let first_feedback = &trace.feedback_history[0];
    assert!(!first_feedback.is_approved);
    assert!(first_feedback
        .specific_errors
        .iter()
        .any(|e| e.contains("Cycle")));
    // The retry prompt carried the rejected DAG and the feedback.
    assert!(trace.messages.iter().any(|m| m.role == "user"
        && m.content.contains("COMPLETE REPLACEMENT")
        && m.content.contains("Cycle")));
}

// Scenario 3: an import in node code is rejected even with valid topology.
#[tokio::test]
async fn test_sandbox_violation_rejected() {
    let importing = json!({
        "description": "tries to import",
        "nodes": [{
            "node_id": "n1", "operation": "escape", "function_name": "f",
            "inputs": {"x": "dataset.total"}, "expected_output_type": "int",
            "layer": 0,
            "code": "fn f(x) {\n  import \"os\";\n  1\n}"
        }],
        "edges": [],
        "final_answer_node": "n1"
    });

    let critic_loop = CriticLoop::new(
        DagBuilder::new(fast_runner(ScriptedModel::always(importing.to_string()))),
        Critic::new(fast_runner(ScriptedModel::always(approve_layer()))),
        dagprobe_core::DagExecutor::new(Sandbox::default()),
        CriticLoopConfig::default(),
    );
    let question = dagprobe_core::Question {
        id: "q1".to_string(),
        text: "What is total?".to_string(),
        difficulty_rank: 1,
        difficulty_level: dagprobe_core::DifficultyLevel::Easy,
        reasoning: String::new(),
        relevant_data_keys: vec![],
    };
    let (publisher, _rx) = EventPublisher::channel("run-3");
    let (_tx, cancel) = cancel_pair();

    let trace = critic_loop
        .run_question(question, &dataset(), &Metadata::default(), &publisher, &cancel)
        .await;

    // Rejected every iteration; the scan message names the import.
    assert!(!trace.passed());
    assert_eq!(trace.iterations, 3);
    for feedback in &trace.feedback_history {
        assert!(!feedback.is_approved);
        assert!(feedback
            .specific_errors
            .iter()
            .any(|e| e.contains("import")));
    }
}

// Scenario 4: execution failure after approval is terminal for that question
// while other questions of the run complete normally.
#[tokio::test]
async fn test_execution_failure_does_not_poison_run() {
    let exploding = json!({
        "description": "divides by zero",
        "nodes": [{
            "node_id": "n1", "operation": "explode", "function_name": "f",
            "inputs": {"x": "dataset.count"}, "expected_output_type": "int",
            "layer": 0, "code": "fn f(x) { x / 0 }"
        }],
        "edges": [],
        "final_answer_node": "n1"
    });
    let model = RoutingModel {
        questions: json!({"questions": [
            {"id": "q-ok", "text": "What is total?", "difficulty_rank": 1,
             "reasoning": "", "relevant_data_keys": ["total"]},
            {"id": "q-bad", "text": "What is count?", "difficulty_rank": 2,
             "reasoning": "", "relevant_data_keys": ["count"]}
        ]}),
        dags: vec![
            ("What is total?".to_string(), good_dag("total")),
            ("What is count?".to_string(), exploding),
        ],
    };
    let orchestrator = Orchestrator::new(fast_runner(model));
    let config = RunConfig {
        num_questions: 2,
        dataset_name: "toy".to_string(),
        ..RunConfig::default()
    };
    let (publisher, _rx) = EventPublisher::channel("run-4");
    let (_tx, cancel) = cancel_pair();

    let report = orchestrator
        .execute_run(dataset(), Arc::new(Metadata::default()), &config, publisher, cancel)
        .await
        .unwrap();

    assert_eq!(report.summary.total, 2);
    assert_eq!(report.summary.passed, 1);
    assert_eq!(report.completed_question_ids(), vec!["q-ok".to_string()]);
    assert_eq!(report.failed_question_ids(), vec!["q-bad".to_string()]);

    let bad = report
        .question_traces
        .iter()
        .find(|t| t.question.id == "q-bad")
        .unwrap();
    // No rebuild was attempted after the approved DAG failed at runtime.
    assert_eq!(bad.iterations, 1);
    let result = bad.execution_result.as_ref().unwrap();
    assert!(!result.success);
    assert!(result.error.as_deref().unwrap().contains("ZeroDivisionError"));
}

// Scenario 5: a builder that never produces a valid DAG exhausts the loop.
#[tokio::test]
async fn test_exhaustion_trace_shape() {
    let model = RoutingModel {
        questions: json!({"questions": [
            {"id": "q1", "text": "What is total?", "difficulty_rank": 1,
             "reasoning": "", "relevant_data_keys": []}
        ]}),
        dags: vec![(
            "What is total?".to_string(),
            json!({"nodes": [], "edges": [], "final_answer_node": ""}),
        )],
    };
    let orchestrator = Orchestrator::new(fast_runner(model));
    let config = RunConfig {
        num_questions: 1,
        dataset_name: "toy".to_string(),
        ..RunConfig::default()
    };
    let (publisher, _rx) = EventPublisher::channel("run-5");
    let (_tx, cancel) = cancel_pair();

    let report = orchestrator
        .execute_run(dataset(), Arc::new(Metadata::default()), &config, publisher, cancel)
        .await
        .unwrap();

    assert_eq!(report.failed_question_ids(), vec!["q1".to_string()]);
    let trace = &report.question_traces[0];
    assert!(trace.execution_result.is_none());
    assert_eq!(trace.dag_history.len(), 3);
    assert_eq!(trace.feedback_history.len(), 3);
    assert_eq!(trace.iterations, 3);
}

// Scenario 6: two questions run concurrently; per-question event order holds
// and the collected report is independent of interleaving.
#[tokio::test]
async fn test_fan_out_ordering() {
    let questions = json!({"questions": [
        {"id": "q1", "text": "What is total?", "difficulty_rank": 1,
         "reasoning": "", "relevant_data_keys": ["total"]},
        {"id": "q2", "text": "What is count?", "difficulty_rank": 2,
         "reasoning": "", "relevant_data_keys": ["count"]}
    ]});
    let dags = vec![
        ("What is total?".to_string(), good_dag("total")),
        ("What is count?".to_string(), good_dag("count")),
    ];

    let run = |questions: serde_json::Value, dags: Vec<(String, serde_json::Value)>| async {
        let orchestrator = Orchestrator::new(fast_runner(RoutingModel { questions, dags }));
        let config = RunConfig {
            num_questions: 2,
            dataset_name: "toy".to_string(),
            ..RunConfig::default()
        };
        let (publisher, mut rx) = EventPublisher::channel("run-6");
        let (_tx, cancel) = cancel_pair();
        let report = orchestrator
            .execute_run(dataset(), Arc::new(Metadata::default()), &config, publisher, cancel)
            .await
            .unwrap();
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        (report, events)
    };

    let (report_a, events) = run(questions.clone(), dags.clone()).await;
    let (report_b, _) = run(questions, dags).await;

    // Per-question subsequence follows the state machine.
    for qid in ["q1", "q2"] {
        let kinds: Vec<EventKind> = events
            .iter()
            .filter(|e| e.payload.get("question_id").and_then(|v| v.as_str()) == Some(qid))
            .map(|e| e.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::DagBuilt,
                EventKind::CriticResult,
                EventKind::ExecutionDone,
                EventKind::QuestionComplete,
            ],
            "event order for {qid}"
        );
    }

    // Traces sorted by difficulty rank, identical outcomes across runs.
    let ids: Vec<&str> = report_a
        .question_traces
        .iter()
        .map(|t| t.question.id.as_str())
        .collect();
    assert_eq!(ids, vec!["q1", "q2"]);
    assert_eq!(
        report_a.completed_question_ids(),
        report_b.completed_question_ids()
    );
    assert_eq!(report_a.summary.passed, report_b.summary.passed);
    assert_eq!(
        report_a.question_traces[0].execution_result.as_ref().unwrap().final_answer,
        Some(json!(42))
    );
    assert_eq!(
        report_a.question_traces[1].execution_result.as_ref().unwrap().final_answer,
        Some(json!(7))
    );
}

// Ingest gate: an empty dataset aborts before any LLM call.
#[tokio::test]
async fn test_empty_dataset_rejected_before_llm() {
    let model = ScriptedModel::new(vec![]);
    let orchestrator = Orchestrator::new(fast_runner(model));
    let (publisher, mut rx) = EventPublisher::channel("run-7");
    let (_tx, cancel) = cancel_pair();

    let result = orchestrator
        .execute_run(
            Arc::new(Dataset::default()),
            Arc::new(Metadata::default()),
            &RunConfig::default(),
            publisher,
            cancel,
        )
        .await;

    assert!(matches!(
        result,
        Err(orchestrator::OrchestratorError::Validation(_))
    ));
    let events = drain(&mut rx).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::Error);
}

// Difficulty filter narrows the fan-out.
#[tokio::test]
async fn test_difficulty_filter() {
    let model = RoutingModel {
        questions: json!({"questions": [
            {"id": "q1", "text": "What is total?", "difficulty_rank": 1,
             "reasoning": "", "relevant_data_keys": []},
            {"id": "q2", "text": "What is count?", "difficulty_rank": 2,
             "reasoning": "", "relevant_data_keys": []},
            {"id": "q3", "text": "What is the ratio?", "difficulty_rank": 3,
             "reasoning": "", "relevant_data_keys": []}
        ]}),
        dags: vec![
            ("What is total?".to_string(), good_dag("total")),
            ("What is count?".to_string(), good_dag("count")),
            ("What is the ratio?".to_string(), good_dag("total")),
        ],
    };
    let orchestrator = Orchestrator::new(fast_runner(model));
    let config = RunConfig {
        num_questions: 3,
        difficulty: DifficultyFilter::Easy,
        dataset_name: "toy".to_string(),
        ..RunConfig::default()
    };
    let (publisher, _rx) = EventPublisher::channel("run-8");
    let (_tx, cancel) = cancel_pair();

    let report = orchestrator
        .execute_run(dataset(), Arc::new(Metadata::default()), &config, publisher, cancel)
        .await
        .unwrap();

    // Of three questions only rank 1 is easy.
    assert_eq!(report.summary.total, 1);
    assert_eq!(report.question_traces[0].question.id, "q1");
}
