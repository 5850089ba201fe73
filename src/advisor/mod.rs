//! AI advisor seam: dependency advice, integration hints, and blocker
//! suggestions.
//!
//! The advisor is strictly optional. A bounded in-flight counter admits
//! calls; when every slot is already occupied or the endpoint fails,
//! callers get an empty answer and proceed without advisor input rather
//! than blocking the coordinator behind a slow model.

use crate::{
    config::AdvisorConfig,
    constants::ADVISOR_MAX_IN_FLIGHT,
    inference::SuggestedEdge,
    models::Task,
    Result,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

#[async_trait]
pub trait Advisor: Send + Sync {
    /// Suggested edges for candidate pairs, each with a confidence the
    /// inference engine gates on.
    async fn suggest_edges(&self, pairs: &[PairQuery]) -> Result<Vec<SuggestedEdge>>;

    /// Free-text integration hints for a task about to be handed out.
    async fn integration_hints(&self, task: &Task, context_digest: &str)
        -> Result<Option<String>>;

    /// A suggestion to attach when an agent reports a blocker.
    async fn blocker_suggestion(&self, task: &Task, description: &str) -> Result<Option<String>>;
}

/// One candidate pair sent for dependency advice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairQuery {
    pub first_id: String,
    pub first_name: String,
    pub second_id: String,
    pub second_name: String,
}

/// Advisor used when none is configured: every answer is empty.
pub struct NoopAdvisor;

#[async_trait]
impl Advisor for NoopAdvisor {
    async fn suggest_edges(&self, _pairs: &[PairQuery]) -> Result<Vec<SuggestedEdge>> {
        Ok(Vec::new())
    }

    async fn integration_hints(&self, _task: &Task, _digest: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn blocker_suggestion(&self, _task: &Task, _description: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

/// HTTP advisor client.
pub struct HttpAdvisor {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    /// Counts calls currently outstanding against the endpoint.
    in_flight: Arc<Semaphore>,
}

#[derive(Debug, Serialize)]
struct EdgeAdviceRequest<'a> {
    pairs: &'a [PairQuery],
}

#[derive(Debug, Deserialize)]
struct EdgeAdviceResponse {
    #[serde(default)]
    edges: Vec<SuggestedEdge>,
}

#[derive(Debug, Serialize)]
struct HintRequest<'a> {
    task_id: &'a str,
    task_name: &'a str,
    description: &'a str,
    context_digest: &'a str,
}

#[derive(Debug, Deserialize)]
struct HintResponse {
    hint: Option<String>,
}

#[derive(Debug, Serialize)]
struct BlockerRequest<'a> {
    task_id: &'a str,
    task_name: &'a str,
    description: &'a str,
}

#[derive(Debug, Deserialize)]
struct BlockerResponse {
    suggestion: Option<String>,
}

impl HttpAdvisor {
    pub fn new(config: &AdvisorConfig) -> Result<Option<Self>> {
        let Some(base_url) = &config.base_url else {
            return Ok(None);
        };
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Some(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            in_flight: Arc::new(Semaphore::new(ADVISOR_MAX_IN_FLIGHT)),
        }))
    }

    /// Non-blocking admission: the returned permit holds an in-flight slot
    /// for the duration of the call. A denied call is skipped, not queued.
    fn admit(&self, what: &str) -> Option<OwnedSemaphorePermit> {
        match self.in_flight.clone().try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(_) => {
                debug!("advisor saturated, proceeding without {what}");
                None
            }
        }
    }

    async fn post<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Resp> {
        let mut builder = self
            .client
            .post(format!("{}{path}", self.base_url))
            .json(body);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        let response = builder.send().await?.error_for_status()?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl Advisor for HttpAdvisor {
    async fn suggest_edges(&self, pairs: &[PairQuery]) -> Result<Vec<SuggestedEdge>> {
        if pairs.is_empty() {
            return Ok(Vec::new());
        }
        let Some(_permit) = self.admit("dependency advice") else {
            return Ok(Vec::new());
        };
        match self
            .post::<_, EdgeAdviceResponse>("/v1/dependency-advice", &EdgeAdviceRequest { pairs })
            .await
        {
            Ok(response) => Ok(response.edges),
            Err(e) => {
                warn!("advisor dependency advice failed, continuing without it: {e}");
                Ok(Vec::new())
            }
        }
    }

    async fn integration_hints(
        &self,
        task: &Task,
        context_digest: &str,
    ) -> Result<Option<String>> {
        let Some(_permit) = self.admit("integration hints") else {
            return Ok(None);
        };
        let request = HintRequest {
            task_id: &task.id,
            task_name: &task.name,
            description: &task.description,
            context_digest,
        };
        match self
            .post::<_, HintResponse>("/v1/integration-hints", &request)
            .await
        {
            Ok(response) => Ok(response.hint),
            Err(e) => {
                warn!("advisor integration hints failed, continuing without them: {e}");
                Ok(None)
            }
        }
    }

    async fn blocker_suggestion(&self, task: &Task, description: &str) -> Result<Option<String>> {
        let Some(_permit) = self.admit("blocker suggestion") else {
            return Ok(None);
        };
        let request = BlockerRequest {
            task_id: &task.id,
            task_name: &task.name,
            description,
        };
        match self
            .post::<_, BlockerResponse>("/v1/blocker-advice", &request)
            .await
        {
            Ok(response) => Ok(response.suggestion),
            Err(e) => {
                warn!("advisor blocker suggestion failed, continuing without it: {e}");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{task_fixture, TaskStatus};

    fn advisor_for(url: String) -> HttpAdvisor {
        HttpAdvisor::new(&AdvisorConfig {
            base_url: Some(url),
            token: None,
        })
        .unwrap()
        .unwrap()
    }

    #[tokio::test]
    async fn suggest_edges_parses_response() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/dependency-advice")
            .with_status(200)
            .with_body(r#"{"edges": [{"from": "a", "to": "b", "confidence": 0.85}]}"#)
            .create_async()
            .await;

        let advisor = advisor_for(server.url());
        let pairs = vec![PairQuery {
            first_id: "a".into(),
            first_name: "A".into(),
            second_id: "b".into(),
            second_name: "B".into(),
        }];
        let edges = advisor.suggest_edges(&pairs).await.unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].from, "a");
    }

    #[tokio::test]
    async fn advisor_failure_degrades_to_empty_answer() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/blocker-advice")
            .with_status(500)
            .create_async()
            .await;

        let advisor = advisor_for(server.url());
        let task = task_fixture("t1", TaskStatus::InProgress);
        let suggestion = advisor
            .blocker_suggestion(&task, "stuck on credentials")
            .await
            .unwrap();
        assert!(suggestion.is_none());
    }

    #[tokio::test]
    async fn saturated_advisor_skips_instead_of_queueing() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/integration-hints")
            .expect(0)
            .create_async()
            .await;

        let advisor = advisor_for(server.url());
        // Occupy every in-flight slot; the next call must be skipped, not
        // queued behind them.
        let _slots = advisor
            .in_flight
            .clone()
            .try_acquire_many_owned(ADVISOR_MAX_IN_FLIGHT as u32)
            .unwrap();

        let task = task_fixture("t1", TaskStatus::Todo);
        let hint = advisor.integration_hints(&task, "digest").await.unwrap();
        assert!(hint.is_none());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn unconfigured_advisor_is_none() {
        let advisor = HttpAdvisor::new(&AdvisorConfig {
            base_url: None,
            token: None,
        })
        .unwrap();
        assert!(advisor.is_none());
    }

    #[tokio::test]
    async fn noop_advisor_answers_empty() {
        let task = task_fixture("t1", TaskStatus::Todo);
        assert!(NoopAdvisor
            .integration_hints(&task, "digest")
            .await
            .unwrap()
            .is_none());
        assert!(NoopAdvisor.suggest_edges(&[]).await.unwrap().is_empty());
    }
}
