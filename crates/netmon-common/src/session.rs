//! Device session adapter.
//!
//! A session is opened at the start of a poll cycle, used for the whole
//! command set of the device's platform, and closed on every exit path.
//! Sessions are never pooled across cycles and the adapter never retries;
//! retry policy belongs to the scheduler.
//!
//! # Example
//!
//! ```ignore
//! use netmon_common::session::SessionAdapter;
//!
//! let adapter = SessionAdapter::new(transport, CommandSetTable::default(), timeout);
//! for output in adapter.collect(&device, &credentials).await? {
//!     println!("{}: {} bytes", output.spec.command, output.raw.len());
//! }
//! ```

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::device::{Credentials, Device};
use crate::error::{MonitorError, MonitorResult};
use crate::platform::{CommandSet, CommandSetTable, CommandSpec};

/// Pseudo-command name used when the session itself cannot be opened in time.
pub const CONNECT_COMMAND: &str = "<connect>";

/// An open remote command-execution session.
#[async_trait]
pub trait DeviceSession: Send {
    /// Runs one command and returns its raw text output.
    async fn run(&mut self, command: &str) -> MonitorResult<String>;

    /// Closes the session. Must be safe to call after a failed `run`.
    async fn close(&mut self);
}

/// Opens sessions to devices. This is the opaque transport capability.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Opens a fresh session to `device`.
    async fn open(
        &self,
        device: &Device,
        credentials: &Credentials,
    ) -> MonitorResult<Box<dyn DeviceSession>>;
}

/// Raw output of one command of a command set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// The command that produced the output.
    pub spec: CommandSpec,
    /// Raw text as returned by the device.
    pub raw: String,
}

/// Runs vendor command sets over sessions opened by a [`SessionFactory`].
#[derive(Clone)]
pub struct SessionAdapter {
    factory: Arc<dyn SessionFactory>,
    commands: CommandSetTable,
    timeout: Duration,
}

impl SessionAdapter {
    /// Creates an adapter with a hard per-exchange `timeout`.
    pub fn new(factory: Arc<dyn SessionFactory>, commands: CommandSetTable, timeout: Duration) -> Self {
        Self {
            factory,
            commands,
            timeout,
        }
    }

    /// Returns the per-exchange timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the command set for a platform.
    ///
    /// An unknown platform is reported as a parse error: the device's output
    /// could never be interpreted, which is just as unsafe as bad output.
    pub fn command_set(&self, platform: &str) -> MonitorResult<&CommandSet> {
        self.commands
            .get(platform)
            .ok_or_else(|| MonitorError::parse(platform, "*", "no command set configured for platform"))
    }

    /// Opens a session, runs a single command and closes the session.
    #[instrument(skip(self, credentials), fields(device = %device.name, command = %spec.command))]
    pub async fn execute_command(
        &self,
        device: &Device,
        credentials: &Credentials,
        spec: &CommandSpec,
    ) -> MonitorResult<String> {
        let mut outputs = self
            .with_session(device, credentials, std::slice::from_ref(spec))
            .await?;
        Ok(outputs.pop().map(|o| o.raw).unwrap_or_default())
    }

    /// Opens a session and runs the full command set of the device's
    /// platform, in order.
    #[instrument(skip(self, credentials), fields(device = %device.name, platform = %device.platform))]
    pub async fn collect(
        &self,
        device: &Device,
        credentials: &Credentials,
    ) -> MonitorResult<Vec<CommandOutput>> {
        let commands = self.command_set(&device.platform)?.clone();
        self.with_session(device, credentials, &commands).await
    }

    async fn with_session(
        &self,
        device: &Device,
        credentials: &Credentials,
        commands: &[CommandSpec],
    ) -> MonitorResult<Vec<CommandOutput>> {
        let mut session = tokio::time::timeout(self.timeout, self.factory.open(device, credentials))
            .await
            .map_err(|_| MonitorError::timeout(&device.name, CONNECT_COMMAND, self.timeout))??;

        let result = self.run_all(session.as_mut(), device, commands).await;
        session.close().await;

        if let Err(e) = &result {
            warn!(device = %device.name, error = %e, "Session ended with error");
        }
        result
    }

    async fn run_all(
        &self,
        session: &mut dyn DeviceSession,
        device: &Device,
        commands: &[CommandSpec],
    ) -> MonitorResult<Vec<CommandOutput>> {
        let mut outputs = Vec::with_capacity(commands.len());
        for spec in commands {
            let raw = tokio::time::timeout(self.timeout, session.run(&spec.command))
                .await
                .map_err(|_| MonitorError::timeout(&device.name, &spec.command, self.timeout))??;
            debug!(command = %spec.command, bytes = raw.len(), "Command completed");
            outputs.push(CommandOutput {
                spec: spec.clone(),
                raw,
            });
        }
        Ok(outputs)
    }
}
