//! The control protocol: JSON request/response envelopes and the static
//! tool registry.
//!
//! Every request is `{tool, arguments}`; every response is
//! `{ok, value | error}`. Tools are a closed enum dispatched in one match;
//! an unknown tool name is `MalformedInput`, never a crash. The same
//! dispatch serves both transports (HTTP POST and stdio frames).

use crate::{
    coordinator::Coordinator,
    error::ErrorKind,
    MarcusError, Result,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    pub tool: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
}

/// Wire error shape: `{kind, message, retriable}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolError {
    pub kind: ErrorKind,
    pub message: String,
    pub retriable: bool,
}

impl ToolResponse {
    pub fn success(value: Value) -> Self {
        Self {
            ok: true,
            value: Some(value),
            error: None,
        }
    }

    pub fn failure(err: &MarcusError) -> Self {
        Self {
            ok: false,
            value: None,
            error: Some(ToolError {
                kind: err.kind(),
                message: err.to_string(),
                retriable: err.retriable(),
            }),
        }
    }
}

/// The statically known tool registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolName {
    RegisterAgent,
    RequestNextTask,
    ReportTaskProgress,
    ReportBlocker,
    ReportTaskCompletion,
    LogDecision,
    GetTaskContext,
    GetProjectStatus,
    GetAgentStatus,
}

impl FromStr for ToolName {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "register_agent" => Ok(ToolName::RegisterAgent),
            "request_next_task" => Ok(ToolName::RequestNextTask),
            "report_task_progress" => Ok(ToolName::ReportTaskProgress),
            "report_blocker" => Ok(ToolName::ReportBlocker),
            "report_task_completion" => Ok(ToolName::ReportTaskCompletion),
            "log_decision" => Ok(ToolName::LogDecision),
            "get_task_context" => Ok(ToolName::GetTaskContext),
            "get_project_status" => Ok(ToolName::GetProjectStatus),
            "get_agent_status" => Ok(ToolName::GetAgentStatus),
            _ => Err(format!("unknown tool: {s}")),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RegisterAgentArgs {
    name: String,
    role: String,
    #[serde(default)]
    skills: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AgentArgs {
    agent_id: String,
}

#[derive(Debug, Deserialize)]
struct ProgressArgs {
    agent_id: String,
    task_id: String,
    percent: u8,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct BlockerArgs {
    agent_id: String,
    task_id: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct CompletionArgs {
    agent_id: String,
    task_id: String,
    #[serde(default)]
    summary: String,
}

#[derive(Debug, Deserialize)]
struct DecisionArgs {
    agent_id: String,
    task_id: String,
    text: String,
}

#[derive(Debug, Deserialize)]
struct TaskArgs {
    task_id: String,
}

#[derive(Debug, Deserialize, Default)]
struct ProjectStatusArgs {
    project_id: Option<String>,
}

/// Routes one request to the coordinator. Infallible by construction: every
/// failure becomes an error response.
pub async fn dispatch(coordinator: &Coordinator, request: ToolRequest) -> ToolResponse {
    match handle(coordinator, request).await {
        Ok(value) => ToolResponse::success(value),
        Err(err) => {
            debug!("tool request failed: {err}");
            ToolResponse::failure(&err)
        }
    }
}

async fn handle(coordinator: &Coordinator, request: ToolRequest) -> Result<Value> {
    let tool = ToolName::from_str(&request.tool).map_err(MarcusError::MalformedInput)?;

    match tool {
        ToolName::RegisterAgent => {
            let args: RegisterAgentArgs = parse_args(request.arguments)?;
            let agent = coordinator
                .register_agent(&args.name, &args.role, args.skills.into_iter().collect())
                .await?;
            Ok(serde_json::json!({ "agent_id": agent.id }))
        }
        ToolName::RequestNextTask => {
            let args: AgentArgs = parse_args(request.arguments)?;
            let outcome = coordinator.request_next_task(&args.agent_id).await?;
            to_value(&outcome)
        }
        ToolName::ReportTaskProgress => {
            let args: ProgressArgs = parse_args(request.arguments)?;
            let ack = coordinator
                .report_progress(&args.agent_id, &args.task_id, args.percent, &args.message)
                .await?;
            to_value(&ack)
        }
        ToolName::ReportBlocker => {
            let args: BlockerArgs = parse_args(request.arguments)?;
            let outcome = coordinator
                .report_blocker(&args.agent_id, &args.task_id, &args.description)
                .await?;
            to_value(&outcome)
        }
        ToolName::ReportTaskCompletion => {
            let args: CompletionArgs = parse_args(request.arguments)?;
            let ack = coordinator
                .report_completion(&args.agent_id, &args.task_id, &args.summary)
                .await?;
            to_value(&ack)
        }
        ToolName::LogDecision => {
            let args: DecisionArgs = parse_args(request.arguments)?;
            let decision = coordinator
                .log_decision(&args.agent_id, &args.task_id, &args.text)
                .await?;
            Ok(serde_json::json!({ "decision_id": decision.id }))
        }
        ToolName::GetTaskContext => {
            let args: TaskArgs = parse_args(request.arguments)?;
            let context = coordinator.get_task_context(&args.task_id).await?;
            to_value(&context)
        }
        ToolName::GetProjectStatus => {
            let args: ProjectStatusArgs = parse_optional_args(request.arguments)?;
            if let Some(project_id) = &args.project_id {
                if project_id != coordinator.project_id() {
                    return Err(MarcusError::NotFound(format!("project {project_id}")));
                }
            }
            let status = coordinator.get_project_status().await?;
            to_value(&status)
        }
        ToolName::GetAgentStatus => {
            let args: AgentArgs = parse_args(request.arguments)?;
            let status = coordinator.get_agent_status(&args.agent_id).await?;
            to_value(&status)
        }
    }
}

fn parse_args<T: for<'de> Deserialize<'de>>(arguments: Value) -> Result<T> {
    serde_json::from_value(arguments)
        .map_err(|e| MarcusError::MalformedInput(format!("invalid arguments: {e}")))
}

fn parse_optional_args<T: for<'de> Deserialize<'de> + Default>(arguments: Value) -> Result<T> {
    if arguments.is_null() {
        return Ok(T::default());
    }
    parse_args(arguments)
}

fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Stdio transport: one JSON request envelope per line on stdin, one JSON
/// response envelope per line on stdout. Malformed frames get an error
/// response rather than killing the stream.
pub async fn run_stdio(
    coordinator: Arc<Coordinator>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut lines = stdin.lines();

    info!("stdio transport ready");
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("stdin closed, stopping stdio transport");
                    return Ok(());
                };
                if line.trim().is_empty() {
                    continue;
                }
                let response = match serde_json::from_str::<ToolRequest>(&line) {
                    Ok(request) => dispatch(&coordinator, request).await,
                    Err(e) => ToolResponse::failure(&MarcusError::MalformedInput(format!(
                        "invalid request frame: {e}"
                    ))),
                };
                let mut frame = serde_json::to_string(&response)?;
                frame.push('\n');
                stdout.write_all(frame.as_bytes()).await?;
                stdout.flush().await?;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("stdio transport stopping");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        advisor::NoopAdvisor,
        board::{BoardAdapter, LocalBoard, Retrying},
        config::{
            ApiConfig, BoardConfig, Config, ContextConfig, InferenceConfig, LeaseConfig,
            ProviderKind, RankerWeights, ReconcilerConfig,
        },
        journal::Journal,
        ledger::AssignmentLedger,
        models::{task_fixture, TaskStatus},
    };

    fn test_config(data_dir: std::path::PathBuf) -> Config {
        Config {
            project_id: "default".to_string(),
            data_dir,
            board: BoardConfig {
                provider: ProviderKind::Local,
                base_url: None,
                token: None,
            },
            lease: LeaseConfig {
                ttl_secs: 600,
                retry_k: 3,
            },
            ranker: RankerWeights {
                skill: 3.0,
                prio: 2.0,
                age: 1.0,
                unblk: 1.5,
                misf: 2.0,
            },
            inference: InferenceConfig {
                pattern_confidence: 0.8,
                ai_confidence: 0.7,
                max_ai_pairs_per_batch: 20,
                cache_ttl_secs: 300,
                enable_ai: false,
            },
            advisor: crate::config::AdvisorConfig {
                base_url: None,
                token: None,
            },
            reconciler: ReconcilerConfig {
                interval_secs: 30,
                revert_orphans: true,
            },
            context: ContextConfig {
                max_bytes: 65_536,
                include_pattern_hints: true,
            },
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            op_deadline_secs: 5,
        }
    }

    async fn coordinator_with_board(
        dir: &std::path::Path,
    ) -> (Arc<Coordinator>, Arc<Retrying<LocalBoard>>) {
        let board = Arc::new(Retrying::new(LocalBoard::in_memory()));
        let ledger = Arc::new(
            AssignmentLedger::open(dir.join("ledger.log")).await.unwrap(),
        );
        let journal = Arc::new(Journal::open(dir).await.unwrap());
        let coordinator = Arc::new(Coordinator::new(
            test_config(dir.to_path_buf()),
            board.clone() as Arc<dyn BoardAdapter>,
            ledger,
            journal,
            Arc::new(NoopAdvisor),
        ));
        (coordinator, board)
    }

    fn request(tool: &str, arguments: serde_json::Value) -> ToolRequest {
        ToolRequest {
            tool: tool.to_string(),
            arguments,
        }
    }

    #[tokio::test]
    async fn unknown_tool_is_malformed_input() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, _board) = coordinator_with_board(dir.path()).await;

        let response = dispatch(
            &coordinator,
            request("do_something_else", serde_json::json!({})),
        )
        .await;
        assert!(!response.ok);
        let error = response.error.unwrap();
        assert_eq!(error.kind, ErrorKind::MalformedInput);
        assert!(!error.retriable);
    }

    #[tokio::test]
    async fn register_and_request_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, board) = coordinator_with_board(dir.path()).await;
        board.inner().put_task(task_fixture("t1", TaskStatus::Todo));

        let response = dispatch(
            &coordinator,
            request(
                "register_agent",
                serde_json::json!({"name": "kai", "role": "backend", "skills": ["python"]}),
            ),
        )
        .await;
        assert!(response.ok);
        let agent_id = response.value.unwrap()["agent_id"]
            .as_str()
            .unwrap()
            .to_string();

        let response = dispatch(
            &coordinator,
            request("request_next_task", serde_json::json!({"agent_id": agent_id})),
        )
        .await;
        assert!(response.ok);
        let value = response.value.unwrap();
        assert_eq!(value["outcome"], "assigned");
        assert_eq!(value["task"]["id"], "t1");
        assert!(value["context"].is_object());
    }

    #[tokio::test]
    async fn missing_arguments_are_malformed_input() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, _board) = coordinator_with_board(dir.path()).await;

        let response = dispatch(
            &coordinator,
            request("request_next_task", serde_json::json!({})),
        )
        .await;
        assert!(!response.ok);
        assert_eq!(response.error.unwrap().kind, ErrorKind::MalformedInput);
    }

    #[tokio::test]
    async fn project_status_rejects_unknown_project() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, _board) = coordinator_with_board(dir.path()).await;

        let response = dispatch(
            &coordinator,
            request("get_project_status", serde_json::json!({"project_id": "other"})),
        )
        .await;
        assert!(!response.ok);
        assert_eq!(response.error.unwrap().kind, ErrorKind::NotFound);

        let response = dispatch(
            &coordinator,
            request("get_project_status", serde_json::Value::Null),
        )
        .await;
        assert!(response.ok);
    }
}
