//! Worker command resolution.
//!
//! Preferred route: the wrapper script through `bash`. Fallback: invoke the
//! agent CLI directly, in which case the supervisor must redirect the
//! child's output into the shared log itself.

use crate::config::WorkerConfig;

/// How the resolved command was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Wrapper script via bash; the script writes the shared log itself.
    Script,
    /// Direct CLI invocation; stdout/stderr must be appended to the log.
    Direct,
    /// Explicit override from configuration; treated like a script.
    Override,
}

/// A fully resolved worker invocation.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: String,
    pub args: Vec<String>,
    pub mode: LaunchMode,
}

const DIRECT_PROMPT: &str = "Check the task queue and process the first unprocessed item \
using only the relaybot queue APIs, then mark it as done.";

/// Resolve the worker command, or a human-readable reason why none is
/// available. The reason is reported once and never retried automatically.
pub fn resolve(cfg: &WorkerConfig) -> Result<WorkerCommand, String> {
    if let Some(override_cmd) = &cfg.command_override {
        let mut parts = override_cmd.iter();
        let Some(program) = parts.next() else {
            return Err("worker command override is empty".to_string());
        };
        return Ok(WorkerCommand {
            program: program.clone(),
            args: parts.cloned().collect(),
            mode: LaunchMode::Override,
        });
    }

    let script = cfg.executor_script();
    if script.exists() && which::which("bash").is_ok() {
        return Ok(WorkerCommand {
            program: "bash".to_string(),
            args: vec![script.to_string_lossy().into_owned()],
            mode: LaunchMode::Script,
        });
    }

    if cfg.strict_script_only {
        return Err(
            "strict executor mode: bash plus the wrapper script is required, \
             direct CLI fallback is disabled"
                .to_string(),
        );
    }

    if which::which(&cfg.cli).is_ok() {
        return Ok(WorkerCommand {
            program: cfg.cli.clone(),
            args: vec![
                "exec".to_string(),
                "--full-auto".to_string(),
                "-m".to_string(),
                cfg.model.clone(),
                "--config".to_string(),
                format!(
                    "developer_instructions_file={}",
                    cfg.instructions_path().to_string_lossy()
                ),
                DIRECT_PROMPT.to_string(),
            ],
            mode: LaunchMode::Direct,
        });
    }

    Err(format!(
        "worker executable unavailable: neither bash with {} nor '{}' was found",
        script.display(),
        cfg.cli
    ))
}
