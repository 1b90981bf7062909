use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

use crate::accounts::Account;
use crate::config::DriverConfig;
use crate::scheduler::ActionKind;

/// Driver exit codes with a dedicated meaning
pub const EXIT_LOGIN_FAILURE: i32 = 2;
pub const EXIT_NOT_FOUND: i32 = 3;
pub const EXIT_TIMEOUT: i32 = 4;

/// Result of one action as reported by the executor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    pub success: bool,
    pub message: String,
}

impl ActionOutcome {
    pub fn succeeded(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("login rejected: {0}")]
    LoginFailure(String),

    #[error("expected element not found: {0}")]
    ActionNotFound(String),

    #[error("timed out: {0}")]
    ActionTimeout(String),

    #[error("transport failure: {0}")]
    Transport(String),
}

/// Performs one browser-level action for one account.
///
/// Calls may take arbitrarily long and may fail; the orchestrator assumes
/// nothing about retries or timeouts inside an implementation.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(
        &self,
        account: &Account,
        action: ActionKind,
        target: &str,
        payload: Option<&str>,
    ) -> Result<ActionOutcome, ExecutorError>;
}

/// Runs every action through an external driver program.
///
/// The driver is invoked as
/// `<program> [extra_args..] <action> <target> [--payload <text>] [--headless]`
/// with the credentials in `FLEET_USERNAME`, `FLEET_PASSWORD` and
/// `FLEET_PROXY`. Exit status decides the outcome:
/// - `0`: success, stdout is the message
/// - `2`: login rejected
/// - `3`: expected element not found
/// - `4`: driver-side timeout
/// - anything else: unsuccessful action, stderr is the message
///
/// The child is killed if the call is dropped (e.g. on cancellation).
#[derive(Debug, Clone)]
pub struct DriverExecutor {
    config: DriverConfig,
    headless: bool,
}

impl DriverExecutor {
    pub fn new(config: DriverConfig, headless: bool) -> Self {
        Self { config, headless }
    }

    fn command(
        &self,
        account: &Account,
        action: ActionKind,
        target: &str,
        payload: Option<&str>,
    ) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.extra_args)
            .arg(action.to_string())
            .arg(target);
        if let Some(text) = payload {
            cmd.arg("--payload").arg(text);
        }
        if self.headless {
            cmd.arg("--headless");
        }

        cmd.env("FLEET_USERNAME", &account.username)
            .env("FLEET_PASSWORD", &account.password);
        match &account.proxy {
            Some(proxy) => cmd.env("FLEET_PROXY", proxy),
            None => cmd.env_remove("FLEET_PROXY"),
        };

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn process_output(
        account: &str,
        action: ActionKind,
        result: std::io::Result<std::process::Output>,
    ) -> Result<ActionOutcome, ExecutorError> {
        let output = match result {
            Ok(output) => output,
            Err(e) => {
                tracing::error!(account, %action, error = %e, "Driver failed to start");
                return Err(ExecutorError::Transport(e.to_string()));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let exit_code = output.status.code();
        let detail = if stderr.is_empty() {
            format!("{} exited with {:?}", action, exit_code)
        } else {
            stderr
        };

        tracing::debug!(account, %action, exit_code = ?exit_code, "Driver finished");

        match exit_code {
            Some(0) => Ok(ActionOutcome::succeeded(if stdout.is_empty() {
                format!("{} done", action)
            } else {
                stdout
            })),
            Some(EXIT_LOGIN_FAILURE) => Err(ExecutorError::LoginFailure(detail)),
            Some(EXIT_NOT_FOUND) => Err(ExecutorError::ActionNotFound(detail)),
            Some(EXIT_TIMEOUT) => Err(ExecutorError::ActionTimeout(detail)),
            // Killed by a signal: the browser process went away underneath us.
            None => Err(ExecutorError::Transport(detail)),
            Some(_) => Ok(ActionOutcome::failed(detail)),
        }
    }
}

#[async_trait]
impl ActionExecutor for DriverExecutor {
    async fn execute(
        &self,
        account: &Account,
        action: ActionKind,
        target: &str,
        payload: Option<&str>,
    ) -> Result<ActionOutcome, ExecutorError> {
        tracing::info!(
            account = %account.username,
            %action,
            target,
            program = %self.config.program.display(),
            "Running driver"
        );
        let result = self
            .command(account, action, target, payload)
            .output()
            .await;
        Self::process_output(&account.username, action, result)
    }
}
