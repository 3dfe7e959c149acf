//! Per-candidate measurement
//!
//! A prober turns one link into one `NodeRecord`. Protocol-level throughput
//! measurement lives outside this crate: `CommandProber` hands the link to an
//! external program, `DialProber` only measures TCP connect latency.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::debug;

use super::options::TestOptions;
use super::source::{LinkTarget, TargetError};
use crate::types::NodeRecord;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("unusable link: {0}")]
    Target(#[from] TargetError),

    #[error("connect failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("probe command failed: {0}")]
    Command(String),

    #[error("probe output is not a node record: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Measures a single candidate link
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, link: &str, options: &TestOptions) -> Result<NodeRecord, ProbeError>;
}

/// Latency-only prober: times a TCP connect to the link's host and port
///
/// Speeds are reported as zero, so a registry will refuse these records.
/// Configure a probe command to report throughput.
#[derive(Debug, Default)]
pub struct DialProber;

#[async_trait]
impl Prober for DialProber {
    async fn probe(&self, link: &str, _options: &TestOptions) -> Result<NodeRecord, ProbeError> {
        let target = LinkTarget::parse(link)?;

        let started = Instant::now();
        let stream = TcpStream::connect(target.address()).await?;
        let elapsed = started.elapsed();
        drop(stream);

        debug!("Dialed {} in {:?}", target.address(), elapsed);

        Ok(NodeRecord {
            name: target.name,
            link: link.to_string(),
            protocol: target.protocol,
            ping: elapsed.as_millis().min(u32::MAX as u128) as u32,
            avg_speed: 0,
            max_speed: 0,
        })
    }
}

/// Delegates measurement to an external program
///
/// The program is run as `program [args..] <link>` and must print one JSON
/// node record on stdout. It is killed if the probe is dropped, which is how
/// timeouts and cancellation reach it.
#[derive(Debug, Clone)]
pub struct CommandProber {
    program: String,
    args: Vec<String>,
}

impl CommandProber {
    /// Build from a `[program, args..]` list; `None` when the list is empty
    pub fn from_command(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

#[async_trait]
impl Prober for CommandProber {
    async fn probe(&self, link: &str, options: &TestOptions) -> Result<NodeRecord, ProbeError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(link)
            .env("NODEBOARD_TIMEOUT_SECS", options.timeout.to_string())
            .env("NODEBOARD_PING_METHOD", &options.ping_method)
            .env("NODEBOARD_SPEED_TEST_MODE", &options.speed_test_mode)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::Command(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let mut record: NodeRecord = serde_json::from_slice(&output.stdout)?;
        if record.link.is_empty() {
            record.link = link.to_string();
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_dial_prober_measures_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let link = format!("trojan://pw@127.0.0.1:{}#local", port);
        let record = DialProber.probe(&link, &TestOptions::default()).await.unwrap();

        assert_eq!(record.link, link);
        assert_eq!(record.name, "local");
        assert_eq!(record.protocol, "trojan");
        assert_eq!(record.avg_speed, 0);
    }

    #[tokio::test]
    async fn test_dial_prober_bad_link() {
        let result = DialProber.probe("not-a-link", &TestOptions::default()).await;
        assert!(matches!(result, Err(ProbeError::Target(TargetError::MissingScheme))));
    }

    #[test]
    fn test_command_prober_requires_program() {
        assert!(CommandProber::from_command(&[]).is_none());
        assert!(CommandProber::from_command(&["probe".to_string()]).is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_prober_reads_stdout() {
        let command = vec![
            "sh".to_string(),
            "-c".to_string(),
            r#"echo '{"name":"cmd","protocol":"ss","ping":42,"avgSpeed":1000,"maxSpeed":2000}'"#.to_string(),
            "probe".to_string(),
        ];
        let prober = CommandProber::from_command(&command).unwrap();

        let record = prober.probe("ss://x@h:1", &TestOptions::default()).await.unwrap();
        assert_eq!(record.name, "cmd");
        assert_eq!(record.link, "ss://x@h:1");
        assert_eq!(record.avg_speed, 1000);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_prober_failure() {
        let command = vec!["sh".to_string(), "-c".to_string(), "exit 3".to_string()];
        let prober = CommandProber::from_command(&command).unwrap();

        let result = prober.probe("ss://x@h:1", &TestOptions::default()).await;
        assert!(matches!(result, Err(ProbeError::Command(_))));
    }
}
