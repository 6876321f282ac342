use log::{debug, info, warn};

use crate::{
    poller::RemotePoller,
    ports::HttpTransport,
    types::{ManualCommand, TriggerSource, DEFAULT_COMMAND_SOURCE},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedCommand {
    pub id: String,
    pub source: TriggerSource,
}

/// Polls for manual activation commands, acting on each command id once.
///
/// Only the most recently acted-on id is remembered, so a command is
/// repeated only if the service re-issues an id it already used before a
/// different one.
#[derive(Debug, Clone, Default)]
pub struct CommandChecker {
    last_command_id: Option<String>,
}

impl CommandChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_command_id(&self) -> Option<&str> {
        self.last_command_id.as_deref()
    }

    pub fn poll<T: HttpTransport>(
        &mut self,
        poller: &mut RemotePoller<T>,
        url: &str,
        timeout_ms: u64,
    ) -> Option<AcceptedCommand> {
        match poller.get::<ManualCommand>(url, timeout_ms) {
            Ok(command) => self.evaluate(command),
            Err(err) => {
                warn!("command poll failed: {err}; retrying next cycle");
                None
            }
        }
    }

    pub fn evaluate(&mut self, command: ManualCommand) -> Option<AcceptedCommand> {
        if !command.is_activate() {
            return None;
        }

        let Some(id) = command.id.filter(|id| !id.trim().is_empty()) else {
            debug!("activate command without id; not actionable");
            return None;
        };
        if self.last_command_id.as_deref() == Some(id.as_str()) {
            debug!("command {id} already handled");
            return None;
        }

        self.last_command_id = Some(id.clone());
        let source = command
            .source
            .filter(|source| !source.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_COMMAND_SOURCE.to_string());
        info!("manual command {id} accepted from {source}");

        Some(AcceptedCommand {
            id,
            source: TriggerSource::manual(source),
        })
    }

    /// Drops `id` as the last handled command so the next poll that sees it
    /// acts on it again. Used when the activation itself failed.
    pub fn forget(&mut self, id: &str) {
        if self.last_command_id.as_deref() == Some(id) {
            debug!("command {id} released for retry");
            self.last_command_id = None;
        }
    }

    /// Best-effort acknowledgement. Failures are logged and never retried.
    pub fn confirm<T: HttpTransport>(
        &self,
        poller: &mut RemotePoller<T>,
        url: &str,
        timeout_ms: u64,
        command: &AcceptedCommand,
    ) {
        match poller.post(url, timeout_ms) {
            Ok(()) => debug!("command {} confirmed", command.id),
            Err(err) => warn!("confirming command {} failed: {err}", command.id),
        }
    }
}
