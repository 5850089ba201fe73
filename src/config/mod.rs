use crate::{MarcusError, Result};
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;


#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub project_id: String,
    pub data_dir: PathBuf,
    pub board: BoardConfig,
    pub lease: LeaseConfig,
    pub ranker: RankerWeights,
    pub inference: InferenceConfig,
    pub advisor: AdvisorConfig,
    pub reconciler: ReconcilerConfig,
    pub context: ContextConfig,
    pub api: ApiConfig,
    /// Per-operation deadline covering adapter calls and ledger fsyncs.
    pub op_deadline_secs: u64,
}

/// Which board backend serves this project.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    BoardA,
    BoardB,
    Local,
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "boarda" => Ok(ProviderKind::BoardA),
            "boardb" => Ok(ProviderKind::BoardB),
            "local" => Ok(ProviderKind::Local),
            _ => Err(format!("unknown board provider: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardConfig {
    pub provider: ProviderKind,
    pub base_url: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseConfig {
    pub ttl_secs: u64,
    /// Lease-conflict retries during ranking before giving up with NoWork.
    pub retry_k: u32,
}

/// Score weights for the skill matcher/ranker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankerWeights {
    pub skill: f64,
    pub prio: f64,
    pub age: f64,
    pub unblk: f64,
    pub misf: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    pub pattern_confidence: f64,
    pub ai_confidence: f64,
    pub max_ai_pairs_per_batch: usize,
    /// How long a cached dependency graph may be reused before advisor
    /// input is refreshed.
    pub cache_ttl_secs: u64,
    pub enable_ai: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisorConfig {
    pub base_url: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    pub interval_secs: u64,
    pub revert_orphans: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    pub max_bytes: usize,
    pub include_pattern_hints: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

impl Config {
    pub fn load() -> Result<Self> {
        match dotenv() {
            Ok(path) => tracing::debug!("loaded .env file from {:?}", path),
            Err(_) => tracing::debug!("no .env file found"),
        }

        let provider: ProviderKind = env_or("MARCUS_PROVIDER", "local")
            .parse()
            .map_err(MarcusError::Configuration)?;

        let base_url = env::var("MARCUS_BOARD_URL").ok().filter(|s| !s.is_empty());
        if provider != ProviderKind::Local && base_url.is_none() {
            return Err(MarcusError::Configuration(format!(
                "MARCUS_BOARD_URL is required for provider {provider:?}"
            )));
        }

        let board = BoardConfig {
            provider,
            base_url,
            token: env::var("MARCUS_BOARD_TOKEN").ok().filter(|s| !s.is_empty()),
        };

        let lease = LeaseConfig {
            ttl_secs: parse_env("MARCUS_LEASE_TTL_SECS", 600)?,
            retry_k: parse_env("MARCUS_LEASE_RETRY_K", 3)?,
        };
        if lease.ttl_secs == 0 {
            return Err(MarcusError::Configuration(
                "MARCUS_LEASE_TTL_SECS must be greater than zero".to_string(),
            ));
        }

        let ranker = RankerWeights {
            skill: parse_env("MARCUS_WEIGHT_SKILL", 3.0)?,
            prio: parse_env("MARCUS_WEIGHT_PRIO", 2.0)?,
            age: parse_env("MARCUS_WEIGHT_AGE", 1.0)?,
            unblk: parse_env("MARCUS_WEIGHT_UNBLK", 1.5)?,
            misf: parse_env("MARCUS_WEIGHT_MISFIT", 2.0)?,
        };

        let inference = InferenceConfig {
            pattern_confidence: parse_env("MARCUS_DEP_PATTERN_CONFIDENCE", 0.8)?,
            ai_confidence: parse_env("MARCUS_DEP_AI_CONFIDENCE", 0.7)?,
            max_ai_pairs_per_batch: parse_env("MARCUS_DEP_MAX_AI_PAIRS", 20)?,
            cache_ttl_secs: parse_env("MARCUS_DEP_CACHE_TTL_SECS", 300)?,
            enable_ai: parse_env("MARCUS_DEP_ENABLE_AI", false)?,
        };

        let advisor = AdvisorConfig {
            base_url: env::var("MARCUS_ADVISOR_URL").ok().filter(|s| !s.is_empty()),
            token: env::var("MARCUS_ADVISOR_TOKEN").ok().filter(|s| !s.is_empty()),
        };
        if inference.enable_ai && advisor.base_url.is_none() {
            return Err(MarcusError::Configuration(
                "MARCUS_ADVISOR_URL is required when MARCUS_DEP_ENABLE_AI is set".to_string(),
            ));
        }

        let reconciler = ReconcilerConfig {
            interval_secs: parse_env("MARCUS_RECONCILE_INTERVAL_SECS", 30)?,
            revert_orphans: parse_env("MARCUS_REVERT_ORPHANS", true)?,
        };

        let context = ContextConfig {
            max_bytes: parse_env("MARCUS_CONTEXT_MAX_BYTES", 65_536)?,
            include_pattern_hints: parse_env("MARCUS_CONTEXT_PATTERN_HINTS", true)?,
        };

        let api = ApiConfig {
            host: env_or("MARCUS_API_HOST", "127.0.0.1"),
            port: parse_env("MARCUS_API_PORT", 8700)?,
        };

        Ok(Config {
            project_id: env_or("MARCUS_PROJECT_ID", "default"),
            data_dir: PathBuf::from(env_or("MARCUS_DATA_DIR", "./data")),
            board,
            lease,
            ranker,
            inference,
            advisor,
            reconciler,
            context,
            api,
            op_deadline_secs: parse_env("MARCUS_OP_DEADLINE_SECS", 30)?,
        })
    }

    pub fn lease_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lease.ttl_secs as i64)
    }

    pub fn op_deadline(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.op_deadline_secs)
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.is_empty() => raw.parse().map_err(|e| {
            MarcusError::Configuration(format!("invalid value for {key}: {e}"))
        }),
        _ => Ok(default),
    }
}
