//! Remote-shell transport backed by the system `ssh` client.
//!
//! Every command runs as its own non-interactive `ssh` exchange, spawned
//! through `/bin/sh -c` with all device-controlled text passed through
//! [`shellquote`]. Password authentication goes through `sshpass -e` with the
//! secret handed over in the child's environment, never on the command line.
//!
//! # Example
//!
//! ```ignore
//! use netmon_common::ssh::{SshOptions, SshTransport};
//!
//! let transport = SshTransport::new(SshOptions::default());
//! let mut session = transport.open(&device, &credentials).await?;
//! let raw = session.run("show ip bgp summary").await?;
//! session.close().await;
//! ```

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::device::{Credentials, Device};
use crate::error::{MonitorError, MonitorResult};
use crate::session::{DeviceSession, SessionFactory};

/// Default `ssh` client binary.
pub const SSH_CMD: &str = "ssh";

/// Default `sshpass` binary.
pub const SSHPASS_CMD: &str = "sshpass";

/// Environment variable `sshpass -e` reads the password from.
pub const SSHPASS_ENV: &str = "SSHPASS";

/// Exit status the OpenSSH client uses for its own failures.
pub const SSH_CLIENT_ERROR: i32 = 255;

/// Regex for characters that need escaping in shell double-quotes.
/// Matches: $, `, ", \, and newline
static SHELL_ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([$`"\\\n])"#).expect("Invalid regex pattern"));

static AUTH_FAILURE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)permission denied|authentication failed|too many authentication failures")
        .expect("Invalid regex pattern")
});

/// Quotes a string for safe use in shell commands.
///
/// ```
/// use netmon_common::ssh::shellquote;
///
/// assert_eq!(shellquote("show ip bgp summary"), "\"show ip bgp summary\"");
/// assert_eq!(shellquote("with$var"), "\"with\\$var\"");
/// ```
pub fn shellquote(s: &str) -> String {
    let escaped = SHELL_ESCAPE_RE.replace_all(s, r"\$1");
    format!("\"{}\"", escaped)
}

/// Result of a local process execution.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// The exit code of the command (0 = success, -1 = killed by signal).
    pub exit_code: i32,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
}

impl ExecResult {
    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns the combined output (stdout + stderr) for error messages.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }

    /// Maps the outcome of one `ssh` exchange to the device output or a
    /// transport error.
    pub fn into_output(self, device: &str) -> MonitorResult<String> {
        if self.success() {
            return Ok(self.stdout);
        }
        if AUTH_FAILURE_RE.is_match(&self.stderr) {
            return Err(MonitorError::auth(device, self.stderr));
        }
        let message = match self.exit_code {
            SSH_CLIENT_ERROR => self.stderr.clone(),
            code => format!("remote exited with status {}: {}", code, self.combined_output()),
        };
        Err(MonitorError::connection(device, message))
    }
}

/// Executes a command line through `/bin/sh -c`.
///
/// `env` entries are added to the child's environment. The child is killed
/// if the returned future is dropped, so an enclosing timeout never leaves
/// an orphaned `ssh` behind.
pub async fn exec(cmd: &str, env: &[(&str, &str)]) -> MonitorResult<ExecResult> {
    tracing::trace!(command = %cmd, "Executing shell command");

    let mut command = Command::new("/bin/sh");
    command
        .arg("-c")
        .arg(cmd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in env {
        command.env(key, value);
    }

    let output = command.output().await?;

    let exit_code = output.status.code().unwrap_or(-1);
    let result = ExecResult {
        exit_code,
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    };

    if !result.success() {
        tracing::debug!(exit_code = exit_code, stderr = %result.stderr, "Command failed");
    }

    Ok(result)
}

/// Options for the `ssh` transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshOptions {
    /// `ssh` client binary.
    pub ssh_binary: String,
    /// `sshpass` binary used for password authentication.
    pub sshpass_binary: String,
    /// TCP connect timeout passed to the client.
    pub connect_timeout: Duration,
    /// Value for `StrictHostKeyChecking`.
    pub host_key_checking: String,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            ssh_binary: SSH_CMD.to_string(),
            sshpass_binary: SSHPASS_CMD.to_string(),
            connect_timeout: Duration::from_secs(30),
            host_key_checking: "accept-new".to_string(),
        }
    }
}

/// [`SessionFactory`] that talks to devices with the system `ssh` client.
#[derive(Debug, Clone, Default)]
pub struct SshTransport {
    options: SshOptions,
}

impl SshTransport {
    /// Creates a transport with the given options.
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }

    /// Returns the transport options.
    pub fn options(&self) -> &SshOptions {
        &self.options
    }
}

#[async_trait]
impl SessionFactory for SshTransport {
    async fn open(
        &self,
        device: &Device,
        credentials: &Credentials,
    ) -> MonitorResult<Box<dyn DeviceSession>> {
        device.validate()?;
        Ok(Box::new(SshSession {
            options: self.options.clone(),
            device_name: device.name.clone(),
            address: device.address.clone(),
            port: device.port,
            credentials: credentials.clone(),
            closed: false,
        }))
    }
}

/// One logical session to a device.
pub struct SshSession {
    options: SshOptions,
    device_name: String,
    address: String,
    port: u16,
    credentials: Credentials,
    closed: bool,
}

impl SshSession {
    /// Renders the local command line that runs `remote` on the device.
    pub fn command_line(&self, remote: &str) -> String {
        let mut parts = Vec::with_capacity(16);
        if self.credentials.password.is_some() {
            parts.push(shellquote(&self.options.sshpass_binary));
            parts.push("-e".to_string());
        }
        parts.push(shellquote(&self.options.ssh_binary));
        if self.credentials.password.is_none() {
            parts.push("-o BatchMode=yes".to_string());
        }
        parts.push(format!(
            "-o ConnectTimeout={}",
            self.options.connect_timeout.as_secs().max(1)
        ));
        parts.push(format!(
            "-o StrictHostKeyChecking={}",
            shellquote(&self.options.host_key_checking)
        ));
        parts.push(format!("-p {}", self.port));
        parts.push(format!("-l {}", shellquote(&self.credentials.username)));
        // Everything after this is the destination and remote command.
        parts.push("--".to_string());
        parts.push(shellquote(&self.address));
        parts.push(shellquote(remote));
        parts.join(" ")
    }
}

#[async_trait]
impl DeviceSession for SshSession {
    async fn run(&mut self, command: &str) -> MonitorResult<String> {
        if self.closed {
            return Err(MonitorError::connection(&self.device_name, "session already closed"));
        }
        let cmd = self.command_line(command);
        let result = match &self.credentials.password {
            Some(password) => exec(&cmd, &[(SSHPASS_ENV, password.as_str())]).await,
            None => exec(&cmd, &[]).await,
        }
        .map_err(|e| MonitorError::connection(&self.device_name, e.to_string()))?;
        result.into_output(&self.device_name)
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(options: SshOptions, credentials: Credentials) -> SshSession {
        SshSession {
            options,
            device_name: "edge-rtr-1".to_string(),
            address: "192.0.2.1".to_string(),
            port: 2222,
            credentials,
            closed: false,
        }
    }

    #[test]
    fn test_shellquote_special_chars() {
        assert_eq!(shellquote("$HOME"), "\"\\$HOME\"");
        assert_eq!(shellquote("`whoami`"), "\"\\`whoami\\`\"");
        assert_eq!(shellquote("say \"hello\""), "\"say \\\"hello\\\"\"");
        assert_eq!(shellquote(""), "\"\"");
    }

    #[test]
    fn test_command_line_key_based() {
        let s = session(SshOptions::default(), Credentials::key_based("netops"));
        assert_eq!(
            s.command_line("show interfaces"),
            "\"ssh\" -o BatchMode=yes -o ConnectTimeout=30 -o StrictHostKeyChecking=\"accept-new\" \
             -p 2222 -l \"netops\" -- \"192.0.2.1\" \"show interfaces\""
        );
    }

    #[test]
    fn test_command_line_password_never_contains_secret() {
        let s = session(
            SshOptions::default(),
            Credentials::with_password("netops", "s3cret"),
        );
        let line = s.command_line("show processes cpu | include CPU utilization");
        assert!(line.starts_with("\"sshpass\" -e \"ssh\""));
        assert!(!line.contains("BatchMode"));
        assert!(!line.contains("s3cret"));
        assert!(line.ends_with("\"show processes cpu | include CPU utilization\""));
    }

    #[test]
    fn test_option_like_address_stays_a_destination() {
        let mut s = session(SshOptions::default(), Credentials::key_based("netops"));
        s.address = "-oProxyCommand=touch /tmp/pwned".to_string();
        let line = s.command_line("uptime");
        assert!(line.contains(" -- \"-oProxyCommand=touch /tmp/pwned\" "));
    }

    #[tokio::test]
    async fn test_open_rejects_option_like_address() {
        let mut device = Device::new(1, 1, "edge-rtr-1", "-oProxyCommand=id", "lab");
        let transport = SshTransport::default();
        let err = transport
            .open(&device, &Credentials::key_based("netops"))
            .await
            .err();
        assert!(matches!(err, Some(MonitorError::Config { .. })));

        device.address = "192.0.2.1".to_string();
        assert!(transport
            .open(&device, &Credentials::key_based("netops"))
            .await
            .is_ok());
    }

    #[test]
    fn test_into_output_classification() {
        let ok = ExecResult {
            exit_code: 0,
            stdout: "Router#".to_string(),
            stderr: String::new(),
        };
        assert_eq!(ok.into_output("r1").unwrap(), "Router#");

        let denied = ExecResult {
            exit_code: 255,
            stdout: String::new(),
            stderr: "netops@192.0.2.1: Permission denied (publickey,password).".to_string(),
        };
        assert!(matches!(
            denied.into_output("r1"),
            Err(MonitorError::Auth { .. })
        ));

        let refused = ExecResult {
            exit_code: 255,
            stdout: String::new(),
            stderr: "ssh: connect to host 192.0.2.1 port 22: Connection refused".to_string(),
        };
        match refused.into_output("r1") {
            Err(MonitorError::Connection { message, .. }) => {
                assert!(message.contains("Connection refused"))
            }
            other => panic!("Expected Connection error, got {:?}", other),
        }
    }

    #[test]
    fn test_exec_result_combined() {
        let result = ExecResult {
            exit_code: 1,
            stdout: "stdout".to_string(),
            stderr: "stderr".to_string(),
        };
        assert_eq!(result.combined_output(), "stdout\nstderr");
    }

    #[tokio::test]
    async fn test_exec_passes_environment() {
        let result = exec("echo $SSHPASS", &[(SSHPASS_ENV, "from-env")])
            .await
            .unwrap();
        assert!(result.success());
        assert_eq!(result.stdout, "from-env");
    }

    #[tokio::test]
    async fn test_run_through_stand_in_client() {
        let options = SshOptions {
            ssh_binary: "echo".to_string(),
            ..SshOptions::default()
        };
        let mut s = session(options, Credentials::key_based("netops"));
        let out = s.run("show version").await.unwrap();
        assert!(out.ends_with("192.0.2.1 show version"));

        s.close().await;
        assert!(matches!(
            s.run("show version").await,
            Err(MonitorError::Connection { .. })
        ));
    }

    #[tokio::test]
    async fn test_run_failing_client_is_connection_error() {
        let options = SshOptions {
            ssh_binary: "false".to_string(),
            ..SshOptions::default()
        };
        let mut s = session(options, Credentials::key_based("netops"));
        assert!(matches!(
            s.run("show version").await,
            Err(MonitorError::Connection { .. })
        ));
    }
}
