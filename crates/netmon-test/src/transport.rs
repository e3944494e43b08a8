//! Scripted transport: plays back per-device outputs and failures.

use async_trait::async_trait;
use netmon_common::{Credentials, Device, DeviceSession, MonitorError, MonitorResult, SessionFactory};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::fixtures::RouterOutputs;

/// What the next session opened to a device does.
#[derive(Debug, Clone)]
pub enum Step {
    /// Session opens; commands answer from the map (command → output).
    Respond(HashMap<String, String>),
    /// Connection refused.
    Refuse,
    /// Authentication rejected.
    RejectAuth,
    /// Session opens but never answers.
    Hang,
}

impl From<&RouterOutputs> for Step {
    fn from(outputs: &RouterOutputs) -> Self {
        Step::Respond(outputs.command_outputs())
    }
}

impl From<RouterOutputs> for Step {
    fn from(outputs: RouterOutputs) -> Self {
        Step::from(&outputs)
    }
}

#[derive(Debug, Default)]
struct Script {
    steps: VecDeque<Step>,
    last: Option<Step>,
}

#[derive(Debug, Default)]
struct Counters {
    opens: HashMap<String, usize>,
    closes: HashMap<String, usize>,
    commands: HashMap<String, usize>,
    active: HashMap<String, usize>,
    max_active_per_device: HashMap<String, usize>,
    active_total: usize,
    max_active_total: usize,
}

#[derive(Debug, Default)]
struct Shared {
    scripts: Mutex<HashMap<String, Script>>,
    counters: Mutex<Counters>,
    command_delay: Mutex<Duration>,
}

/// [`SessionFactory`] driven by per-device scripts keyed by device name.
///
/// Each opened session consumes the next step of the device's script; once
/// the script is exhausted the last step repeats.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    shared: Arc<Shared>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every command exchange take `delay`.
    pub fn set_command_delay(&self, delay: Duration) {
        *self.shared.command_delay.lock() = delay;
    }

    /// Appends a step to a device's script.
    pub fn push(&self, device: &str, step: impl Into<Step>) {
        self.shared
            .scripts
            .lock()
            .entry(device.to_string())
            .or_default()
            .steps
            .push_back(step.into());
    }

    /// Appends several steps.
    pub fn script<I, S>(&self, device: &str, steps: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<Step>,
    {
        for step in steps {
            self.push(device, step);
        }
    }

    pub fn opens(&self, device: &str) -> usize {
        self.shared.counters.lock().opens.get(device).copied().unwrap_or(0)
    }

    pub fn closes(&self, device: &str) -> usize {
        self.shared.counters.lock().closes.get(device).copied().unwrap_or(0)
    }

    pub fn commands_run(&self, device: &str) -> usize {
        self.shared.counters.lock().commands.get(device).copied().unwrap_or(0)
    }

    /// Most sessions ever open at once to one device.
    pub fn max_active_for(&self, device: &str) -> usize {
        self.shared
            .counters
            .lock()
            .max_active_per_device
            .get(device)
            .copied()
            .unwrap_or(0)
    }

    /// Most sessions ever open at once across all devices.
    pub fn max_active_total(&self) -> usize {
        self.shared.counters.lock().max_active_total
    }

    fn next_step(&self, device: &str) -> Option<Step> {
        let mut scripts = self.shared.scripts.lock();
        let script = scripts.get_mut(device)?;
        match script.steps.pop_front() {
            Some(step) => {
                script.last = Some(step.clone());
                Some(step)
            }
            None => script.last.clone(),
        }
    }
}

#[async_trait]
impl SessionFactory for ScriptedTransport {
    async fn open(&self, device: &Device, _: &Credentials) -> MonitorResult<Box<dyn DeviceSession>> {
        let name = device.name.clone();
        self.shared
            .counters
            .lock()
            .opens
            .entry(name.clone())
            .and_modify(|n| *n += 1)
            .or_insert(1);

        let step = self.next_step(&name);
        debug!(device = %name, ?step, "Scripted open");
        let outputs = match step {
            None => return Err(MonitorError::connection(&name, "no script for device")),
            Some(Step::Refuse) => return Err(MonitorError::connection(&name, "Connection refused")),
            Some(Step::RejectAuth) => {
                return Err(MonitorError::auth(&name, "Permission denied (password)"))
            }
            Some(Step::Hang) => None,
            Some(Step::Respond(outputs)) => Some(outputs),
        };

        {
            let mut c = self.shared.counters.lock();
            let active = c.active.entry(name.clone()).or_insert(0);
            *active += 1;
            let active = *active;
            let max = c.max_active_per_device.entry(name.clone()).or_insert(0);
            *max = (*max).max(active);
            c.active_total += 1;
            c.max_active_total = c.max_active_total.max(c.active_total);
        }

        Ok(Box::new(ScriptedSession {
            shared: self.shared.clone(),
            device: name,
            outputs,
            closed: false,
        }))
    }
}

struct ScriptedSession {
    shared: Arc<Shared>,
    device: String,
    outputs: Option<HashMap<String, String>>,
    closed: bool,
}

impl ScriptedSession {
    fn release(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut c = self.shared.counters.lock();
        if let Some(active) = c.active.get_mut(&self.device) {
            *active = active.saturating_sub(1);
        }
        c.active_total = c.active_total.saturating_sub(1);
        c.closes
            .entry(self.device.clone())
            .and_modify(|n| *n += 1)
            .or_insert(1);
    }
}

#[async_trait]
impl DeviceSession for ScriptedSession {
    async fn run(&mut self, command: &str) -> MonitorResult<String> {
        self.shared
            .counters
            .lock()
            .commands
            .entry(self.device.clone())
            .and_modify(|n| *n += 1)
            .or_insert(1);

        let delay = *self.shared.command_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match &self.outputs {
            None => std::future::pending::<MonitorResult<String>>().await,
            Some(outputs) => Ok(outputs.get(command).cloned().unwrap_or_else(|| {
                "% Invalid input detected at '^' marker.\n".to_string()
            })),
        }
    }

    async fn close(&mut self) {
        self.release();
    }
}

impl Drop for ScriptedSession {
    fn drop(&mut self) {
        self.release();
    }
}
