//! Door actuation after a positive recognition.

use std::future::Future;
use std::pin::Pin;
use std::process::ExitStatus;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

#[derive(Error, Debug)]
pub enum ActuatorError {
    #[error("failed to run unlock command: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("unlock command exited with {0}")]
    Failed(ExitStatus),
    #[error("unlock command timed out after {0:?}")]
    TimedOut(Duration),
}

pub type UnlockFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ActuatorError>> + Send + 'a>>;

/// Something that opens the door for a recognized member.
pub trait DoorActuator: Send + Sync {
    fn unlock<'a>(&'a self, member: &'a str) -> UnlockFuture<'a>;
}

/// Only logs; used when no unlock command is configured.
#[derive(Debug, Default)]
pub struct LogActuator;

impl DoorActuator for LogActuator {
    fn unlock<'a>(&'a self, member: &'a str) -> UnlockFuture<'a> {
        Box::pin(async move {
            tracing::info!(member, "door unlocked");
            Ok(())
        })
    }
}

/// Runs a shell command with the member name in `DOORWARD_MEMBER`.
#[derive(Debug, Clone)]
pub struct CommandActuator {
    command: String,
    timeout: Duration,
}

impl CommandActuator {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }
}

impl DoorActuator for CommandActuator {
    fn unlock<'a>(&'a self, member: &'a str) -> UnlockFuture<'a> {
        Box::pin(async move {
            let mut child = Command::new("sh")
                .arg("-c")
                .arg(&self.command)
                .env("DOORWARD_MEMBER", member)
                .kill_on_drop(true)
                .spawn()?;

            let status = match tokio::time::timeout(self.timeout, child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    let _ = child.kill().await;
                    return Err(ActuatorError::TimedOut(self.timeout));
                }
            };

            if !status.success() {
                return Err(ActuatorError::Failed(status));
            }
            tracing::info!(member, command = %self.command, "door unlocked");
            Ok(())
        })
    }
}
