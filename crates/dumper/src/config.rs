use std::time::Duration;

use chatdump_core::types::ChatId;
use chatdump_core::validation::parse_capacity;
use chatdump_core::CoreError;
use chatdump_icq::DEFAULT_API_URL;
use chatdump_queue::{DispatcherConfig, RetryPolicy};

/// Value of `ICQ_CHAT` that selects every chat in the buddy list.
pub const ALL_CHATS: &str = "all";

/// Upper bound on the delay between retries once backoff is enabled.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Which chats to dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatSelection {
    /// Every chat in the buddy list.
    All,
    /// A single chat by id.
    One(ChatId),
}

impl ChatSelection {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case(ALL_CHATS) {
            Self::All
        } else {
            Self::One(raw.to_string())
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Dumper configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct DumperConfig {
    /// ICQ session id.
    pub aimsid: String,
    /// Postgres URL. Without one, documents are kept in memory.
    pub database_url: Option<String>,
    pub chat: ChatSelection,
    pub api_url: String,
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub worker_capacity: usize,
    /// Messages requested per history page.
    pub page_size: u32,
    pub max_attempts: u32,
    /// Zero requeues failed jobs immediately.
    pub retry_base_delay: Duration,
}

impl DumperConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var               | Default                  |
    /// |-----------------------|--------------------------|
    /// | `ICQ_AIMSID`          | required                 |
    /// | `DATABASE_URL`        | unset (in-memory store)  |
    /// | `ICQ_CHAT`            | `all`                    |
    /// | `ICQ_API_URL`         | `https://botapi.icq.net` |
    /// | `WORKER_COUNT`        | `4`                      |
    /// | `QUEUE_CAPACITY`      | `64`                     |
    /// | `WORKER_CAPACITY`     | `4`                      |
    /// | `HISTORY_PAGE_SIZE`   | `100`                    |
    /// | `MAX_JOB_ATTEMPTS`    | `3`                      |
    /// | `RETRY_BASE_DELAY_MS` | `0`                      |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through `lookup` instead of the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let aimsid = var("ICQ_AIMSID").ok_or(ConfigError::Missing("ICQ_AIMSID"))?;
        let database_url = var("DATABASE_URL");
        let chat = var("ICQ_CHAT")
            .map(|raw| ChatSelection::parse(&raw))
            .unwrap_or(ChatSelection::All);
        let api_url = var("ICQ_API_URL").unwrap_or_else(|| DEFAULT_API_URL.into());

        let capacity = |name: &'static str, default: usize| -> Result<usize, ConfigError> {
            match var(name) {
                Some(raw) => Ok(parse_capacity(name, &raw)?),
                None => Ok(default),
            }
        };
        let worker_count = capacity("WORKER_COUNT", 4)?;
        let queue_capacity = capacity("QUEUE_CAPACITY", 64)?;
        let worker_capacity = capacity("WORKER_CAPACITY", 4)?;

        let page_size: u32 = parse_number(var("HISTORY_PAGE_SIZE"), "HISTORY_PAGE_SIZE", 100)?;
        if page_size == 0 {
            return Err(ConfigError::Invalid {
                var: "HISTORY_PAGE_SIZE",
                reason: "must be at least 1".into(),
            });
        }
        let max_attempts: u32 = parse_number(var("MAX_JOB_ATTEMPTS"), "MAX_JOB_ATTEMPTS", 3)?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                var: "MAX_JOB_ATTEMPTS",
                reason: "must be at least 1".into(),
            });
        }
        let retry_base_delay_ms: u64 =
            parse_number(var("RETRY_BASE_DELAY_MS"), "RETRY_BASE_DELAY_MS", 0)?;

        Ok(Self {
            aimsid,
            database_url,
            chat,
            api_url,
            worker_count,
            queue_capacity,
            worker_capacity,
            page_size,
            max_attempts,
            retry_base_delay: Duration::from_millis(retry_base_delay_ms),
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        if self.retry_base_delay.is_zero() {
            RetryPolicy::immediate(self.max_attempts)
        } else {
            RetryPolicy::exponential(self.max_attempts, self.retry_base_delay, MAX_RETRY_DELAY)
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig::new(self.queue_capacity, self.worker_capacity).with_retry(self.retry_policy())
    }
}

fn parse_number<T: std::str::FromStr>(
    raw: Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            var,
            reason: format!("expected a non-negative integer, got \"{raw}\""),
        }),
        None => Ok(default),
    }
}
