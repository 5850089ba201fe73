//! Board adapter: the only component that performs network I/O.
//!
//! The coordinator sees `dyn BoardAdapter` and knows nothing about the
//! provider behind it. Transient provider failures are retried here with
//! capped, jittered exponential backoff; permanent failures surface to the
//! caller unchanged.

mod http;
mod local;

pub use http::RestBoard;
pub use local::LocalBoard;

use crate::{
    config::{BoardConfig, ProviderKind},
    constants::{
        PROVIDER_BACKOFF_BASE_MS, PROVIDER_BACKOFF_CAP_MS, PROVIDER_BACKOFF_JITTER_MS,
        PROVIDER_RETRY_ATTEMPTS,
    },
    models::{Task, TaskSpec, TaskStatus},
    MarcusError, Result,
};
use async_trait::async_trait;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use tracing::warn;

/// Uniform read/write surface over an external task board.
#[async_trait]
pub trait BoardAdapter: Send + Sync {
    /// Complete snapshot of every live task on the board.
    async fn list_tasks(&self) -> Result<Vec<Task>>;

    /// Idempotent in the target status.
    async fn update_task_status(&self, id: &str, status: TaskStatus) -> Result<()>;

    /// Sets the assignee; no-op if already equal. `None` clears it.
    async fn assign_task(&self, id: &str, agent_id: Option<&str>) -> Result<()>;

    /// Append-only comment stream.
    async fn add_comment(&self, id: &str, body: &str) -> Result<()>;

    /// Used by project-creation paths; shares the adapter surface.
    async fn create_task(&self, spec: &TaskSpec) -> Result<Task>;
}

/// Builds the configured provider wrapped in the retry layer. The local
/// provider keeps its board under the data directory so development state
/// survives restarts.
pub fn build_adapter(
    config: &BoardConfig,
    data_dir: &std::path::Path,
) -> Result<Arc<dyn BoardAdapter>> {
    let adapter: Arc<dyn BoardAdapter> = match config.provider {
        ProviderKind::Local => Arc::new(Retrying::new(LocalBoard::with_file(
            data_dir.join("board.json"),
        )?)),
        ProviderKind::BoardA | ProviderKind::BoardB => {
            let base_url = config.base_url.clone().ok_or_else(|| {
                MarcusError::Configuration("REST provider requires a base URL".to_string())
            })?;
            Arc::new(Retrying::new(RestBoard::new(
                config.provider,
                base_url,
                config.token.clone(),
            )?))
        }
    };
    Ok(adapter)
}

/// Retry layer applied over every provider. Only `TransientProvider` errors
/// are retried; everything else passes through on the first failure.
pub struct Retrying<A> {
    inner: A,
}

impl<A: BoardAdapter> Retrying<A> {
    pub fn new(inner: A) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }
}

async fn retry_transient<T, F, Fut>(op: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay_ms = PROVIDER_BACKOFF_BASE_MS;
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err @ MarcusError::TransientProvider { .. })
                if attempt < PROVIDER_RETRY_ATTEMPTS =>
            {
                let jitter = rand::thread_rng().gen_range(0..PROVIDER_BACKOFF_JITTER_MS);
                warn!(
                    "board op {op} failed (attempt {attempt}/{PROVIDER_RETRY_ATTEMPTS}), \
                     retrying in {}ms: {err}",
                    delay_ms + jitter
                );
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms + jitter)).await;
                delay_ms = (delay_ms * 2).min(PROVIDER_BACKOFF_CAP_MS);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[async_trait]
impl<A: BoardAdapter> BoardAdapter for Retrying<A> {
    async fn list_tasks(&self) -> Result<Vec<Task>> {
        retry_transient("list_tasks", || self.inner.list_tasks()).await
    }

    async fn update_task_status(&self, id: &str, status: TaskStatus) -> Result<()> {
        retry_transient("update_task_status", || {
            self.inner.update_task_status(id, status)
        })
        .await
    }

    async fn assign_task(&self, id: &str, agent_id: Option<&str>) -> Result<()> {
        retry_transient("assign_task", || self.inner.assign_task(id, agent_id)).await
    }

    async fn add_comment(&self, id: &str, body: &str) -> Result<()> {
        retry_transient("add_comment", || self.inner.add_comment(id, body)).await
    }

    async fn create_task(&self, spec: &TaskSpec) -> Result<Task> {
        retry_transient("create_task", || self.inner.create_task(spec)).await
    }
}
