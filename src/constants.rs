//! System-wide constants shared across components.

// Board adapter retry policy. Backoff doubles from the base up to the cap,
// with up to `PROVIDER_BACKOFF_JITTER_MS` of random jitter added per attempt.
pub const PROVIDER_RETRY_ATTEMPTS: u32 = 4;
pub const PROVIDER_BACKOFF_BASE_MS: u64 = 200;
pub const PROVIDER_BACKOFF_CAP_MS: u64 = 5_000;
pub const PROVIDER_BACKOFF_JITTER_MS: u64 = 100;

// On-disk layout under the data directory.
pub const LEDGER_FILE: &str = "ledger.log";
pub const DECISIONS_FILE: &str = "decisions.log";
pub const ARTIFACTS_FILE: &str = "artifacts.log";
pub const SNAPSHOTS_DIR: &str = "snapshots";

/// Truncation length for artifact/decision bodies when a context bundle is
/// summarized down to fit the configured byte ceiling.
pub const SUMMARY_PREVIEW_LENGTH: usize = 240;

/// Number of recent journal entries returned by project status queries.
pub const RECENT_JOURNAL_LIMIT: usize = 20;

/// Number of recent completions carried in an agent's context memory.
pub const AGENT_MEMORY_LIMIT: usize = 10;

/// Upper bound on advisor calls that may be in flight at once. When every
/// slot is occupied, inference and context assembly proceed without
/// advisor input instead of queueing behind it.
pub const ADVISOR_MAX_IN_FLIGHT: usize = 4;

pub const SERVICE_NAME: &str = "marcus";
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");
