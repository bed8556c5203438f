//! Configuration types.
//!
//! Everything is environment-driven: Telegram credentials use the
//! conventional `TELEGRAM_*` names, agent-level knobs use `RELAYBOT_*`.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Environment variables that identify the parent's own worker session.
///
/// Their presence means this process is running *inside* a worker
/// invocation; they are stripped from spawned children so the child is
/// never mistaken for a nested call by its own guard.
pub const SESSION_MARKER_VARS: &[&str] =
    &["CODEX_THREAD_ID", "CODEX_SESSION_ID", "CODEX_RUN_ID"];

/// Which front door feeds the task queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Long-poll the Telegram Bot API for inbound messages.
    Telegram,
    /// No Telegram polling; the HTTP control surface is the only intake.
    WebMock,
}

/// Supervision knobs for the worker subprocess.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Directory holding the queue, busy-state, log, and lock files.
    pub state_dir: PathBuf,
    /// Worker CLI executable name for the direct-invocation fallback.
    pub cli: String,
    /// Model passed to the worker CLI in direct mode.
    pub model: String,
    /// When set, only the wrapper script route is allowed — no direct
    /// CLI fallback.
    pub strict_script_only: bool,
    /// Whether this process is itself running inside a worker invocation.
    /// Resolved once at startup and passed in explicitly; the supervisor
    /// never re-reads the environment.
    pub nested_session: bool,
    /// Full command-line override for the worker (testing and custom
    /// deployments); bypasses script/CLI resolution entirely.
    pub command_override: Option<Vec<String>>,
    /// Progress monitor poll interval.
    pub poll_interval: Duration,
    /// Silence threshold before a "still running" heartbeat.
    pub heartbeat_interval: Duration,
    /// Hard wall-clock budget for one worker run.
    pub task_timeout: Duration,
}

impl WorkerConfig {
    pub fn log_path(&self) -> PathBuf {
        self.state_dir.join("execution.log")
    }

    pub fn run_lock_path(&self) -> PathBuf {
        self.state_dir.join("worker.lock")
    }

    pub fn executor_script(&self) -> PathBuf {
        self.state_dir.join("executor.sh")
    }

    pub fn instructions_path(&self) -> PathBuf {
        self.state_dir.join("codex.md")
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("./data"),
            cli: "codex".to_string(),
            model: "gpt-5-codex".to_string(),
            strict_script_only: false,
            nested_session: false,
            command_override: None,
            poll_interval: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(45),
            task_timeout: Duration::from_secs(900),
        }
    }
}

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Telegram bot token (None disables the Telegram transport).
    pub bot_token: Option<String>,
    /// Telegram allowlist: usernames or numeric ids, `*` for everyone.
    pub allowed_users: Vec<String>,
    /// Directory for all persisted state.
    pub state_dir: PathBuf,
    pub run_mode: RunMode,
    /// Control surface port.
    pub http_port: u16,
    pub worker: WorkerConfig,
}

impl Config {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let state_dir = std::env::var("RELAYBOT_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));

        let run_mode = match std::env::var("RELAYBOT_RUN_MODE")
            .unwrap_or_else(|_| "telegram".to_string())
            .trim()
            .to_lowercase()
            .as_str()
        {
            "telegram" => RunMode::Telegram,
            "webmock" => RunMode::WebMock,
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "RELAYBOT_RUN_MODE".to_string(),
                    message: format!("expected 'telegram' or 'webmock', got '{other}'"),
                });
            }
        };

        let bot_token = std::env::var("TELEGRAM_BOT_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty());

        let allowed_users: Vec<String> = std::env::var("TELEGRAM_ALLOWED_USERS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let http_port = env_parse("RELAYBOT_HTTP_PORT", 8787u16)?;

        // A session marker inherited from the environment means this process
        // was launched from inside a worker run; spawning another worker
        // from here would corrupt the parent's execution context.
        let allow_nested = env_flag("RELAYBOT_ALLOW_NESTED");
        let nested_session = SESSION_MARKER_VARS
            .iter()
            .any(|var| std::env::var(var).is_ok_and(|v| !v.is_empty()))
            && !allow_nested;

        let worker = WorkerConfig {
            state_dir: state_dir.clone(),
            cli: std::env::var("RELAYBOT_WORKER_CLI").unwrap_or_else(|_| "codex".to_string()),
            model: std::env::var("RELAYBOT_WORKER_MODEL")
                .unwrap_or_else(|_| "gpt-5-codex".to_string()),
            strict_script_only: env_flag("RELAYBOT_STRICT_EXECUTOR"),
            nested_session,
            command_override: std::env::var("RELAYBOT_WORKER_CMD").ok().map(|raw| {
                raw.split_whitespace().map(str::to_string).collect()
            }),
            poll_interval: env_duration_secs("RELAYBOT_POLL_INTERVAL", 2)?,
            heartbeat_interval: env_duration_secs("TELEGRAM_PROGRESS_HEARTBEAT", 45)?,
            task_timeout: env_duration_secs("TELEGRAM_TASK_TIMEOUT", 900)?,
        };

        Ok(Self {
            bot_token,
            allowed_users,
            state_dir,
            run_mode,
            http_port,
            worker,
        })
    }

    pub fn queue_path(&self) -> PathBuf {
        self.state_dir.join("tasks.json")
    }

    pub fn busy_path(&self) -> PathBuf {
        self.state_dir.join("working.json")
    }

    pub fn history_path(&self) -> PathBuf {
        self.state_dir.join("history.json")
    }

    pub fn outbox_path(&self) -> PathBuf {
        self.state_dir.join("outbox.json")
    }

    pub fn log_path(&self) -> PathBuf {
        self.worker.log_path()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bot_token: None,
            allowed_users: Vec::new(),
            state_dir: PathBuf::from("./data"),
            run_mode: RunMode::WebMock,
            http_port: 8787,
            worker: WorkerConfig::default(),
        }
    }
}

/// Truthy check for flag-style environment variables.
fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{e}"),
        }),
        Err(_) => Ok(default),
    }
}

fn env_duration_secs(key: &str, default_secs: u64) -> Result<Duration, ConfigError> {
    Ok(Duration::from_secs(env_parse(key, default_secs)?))
}
