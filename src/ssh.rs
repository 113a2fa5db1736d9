//! Remote command execution on the host that owns the Bluetooth interfaces.
//!
//! `hcitool` and `hciconfig` run on a Linux box reachable over SSH. The bench only
//! needs "run this script and give me the output", so the seam is a small
//! [`CommandRunner`] trait with an `ssh2` implementation and a recording mock.

use crate::config::SshSettings;
use crate::error::{AppResult, BenchError};
use crate::hci::BdAddr;
use async_trait::async_trait;
use regex::Regex;
use ssh2::Session;
use std::io::Read;
use std::net::TcpStream;
use std::sync::{Arc, Mutex};

/// Output of one remote script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Lines written to stdout (stderr is merged in when a PTY is allocated).
    pub stdout: Vec<String>,
    /// Lines written to stderr.
    pub stderr: Vec<String>,
    /// Remote exit status of the last command in the script.
    pub exit_status: i32,
}

impl CommandOutput {
    fn from_text(stdout: &str, stderr: &str, exit_status: i32) -> Self {
        Self {
            stdout: stdout.lines().map(|l| l.trim_end().to_string()).collect(),
            stderr: stderr.lines().map(|l| l.trim_end().to_string()).collect(),
            exit_status,
        }
    }
}

/// Executes shell scripts on the Bluetooth host.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `script` as a single remote exec and wait for it to finish.
    async fn run(&self, script: &str) -> AppResult<CommandOutput>;
}

/// `ssh2`-backed runner holding one authenticated session for the whole run.
pub struct SshRunner {
    session: Arc<Mutex<Session>>,
    host: String,
}

impl SshRunner {
    /// Connect and authenticate with username/password.
    pub async fn connect(settings: &SshSettings) -> AppResult<Self> {
        let settings = settings.clone();
        let host = settings.host.clone();
        let session = tokio::task::spawn_blocking(move || -> AppResult<Session> {
            let tcp = TcpStream::connect((settings.host.as_str(), settings.port))?;
            let mut session = Session::new()?;
            session.set_tcp_stream(tcp);
            session.set_timeout(settings.timeout_ms);
            session.handshake()?;
            session.userauth_password(&settings.username, &settings.password)?;
            if !session.authenticated() {
                return Err(BenchError::Configuration(format!(
                    "SSH authentication failed for {}@{}",
                    settings.username, settings.host
                )));
            }
            Ok(session)
        })
        .await
        .map_err(|e| BenchError::Io(std::io::Error::other(e)))??;

        tracing::info!("Connected to SSH server {}", host);
        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            host,
        })
    }
}

#[async_trait]
impl CommandRunner for SshRunner {
    async fn run(&self, script: &str) -> AppResult<CommandOutput> {
        tracing::debug!(host = %self.host, "SSH exec:\n{}", script);
        let session = Arc::clone(&self.session);
        let script = script.to_string();

        let output = tokio::task::spawn_blocking(move || -> AppResult<CommandOutput> {
            let session = session
                .lock()
                .map_err(|_| BenchError::Io(std::io::Error::other("SSH session lock poisoned")))?;
            let mut channel = session.channel_session()?;
            channel.request_pty("xterm", None, None)?;
            channel.exec(&script)?;

            let mut stdout = String::new();
            channel.read_to_string(&mut stdout)?;
            let mut stderr = String::new();
            channel.stderr().read_to_string(&mut stderr)?;

            channel.wait_close()?;
            let status = channel.exit_status()?;
            Ok(CommandOutput::from_text(&stdout, &stderr, status))
        })
        .await
        .map_err(|e| BenchError::Io(std::io::Error::other(e)))??;

        for line in output.stdout.iter().chain(output.stderr.iter()) {
            tracing::debug!("  {}", line);
        }
        if output.exit_status != 0 {
            tracing::warn!(
                "Remote script exited with status {}: {}",
                output.exit_status,
                output.stdout.last().map(String::as_str).unwrap_or("")
            );
        }
        Ok(output)
    }
}

/// In-memory runner: records every script and answers `hciconfig` from canned text.
///
/// Clones share the script log.
#[derive(Debug, Clone, Default)]
pub struct MockRunner {
    hciconfig: String,
    scripts: Arc<Mutex<Vec<String>>>,
}

impl MockRunner {
    /// Runner whose `hciconfig` lists the given interfaces and addresses.
    pub fn with_interfaces(interfaces: &[(&str, &str)]) -> Self {
        let hciconfig = interfaces
            .iter()
            .map(|(iface, addr)| {
                format!(
                    "{}:\tType: Primary  Bus: USB\n\tBD Address: {}  ACL MTU: 1021:8  SCO MTU: 64:1\n\tUP RUNNING\n\tRX bytes:1072 acl:0 sco:0 events:52 errors:0\n",
                    iface, addr
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            hciconfig,
            scripts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Scripts executed so far, in order.
    pub fn scripts(&self) -> Vec<String> {
        self.scripts.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(&self, script: &str) -> AppResult<CommandOutput> {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.push(script.to_string());
        }
        tracing::debug!("Mock exec:\n{}", script);
        if script.trim() == "hciconfig" {
            return Ok(CommandOutput::from_text(&self.hciconfig, "", 0));
        }
        Ok(CommandOutput::default())
    }
}

/// Extract `(interface, address)` pairs from `hciconfig` output.
///
/// An interface header (`hci0:`) must be followed on the next line by its
/// `BD Address:` line; headers without one are skipped.
pub fn parse_hciconfig(lines: &[String]) -> AppResult<Vec<(String, BdAddr)>> {
    let hci_re = Regex::new(r"^\s?(hci\d+):")
        .map_err(|e| BenchError::Processing(e.to_string()))?;
    let addr_re = Regex::new(r"^\s*BD Address:\s*([0-9a-fA-F]{2}(?::[0-9a-fA-F]{2}){5})")
        .map_err(|e| BenchError::Processing(e.to_string()))?;

    let mut found = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let Some(iface) = hci_re.captures(line).map(|c| c[1].to_string()) else {
            continue;
        };
        if let Some(caps) = lines.get(i + 1).and_then(|next| addr_re.captures(next)) {
            found.push((iface, caps[1].parse()?));
        }
    }
    Ok(found)
}

/// Run `hciconfig` and return the DUT and REF addresses.
///
/// Any interface other than DUT and REF is a configuration error.
pub async fn resolve_bd_addresses(
    runner: &dyn CommandRunner,
    dut: &str,
    reference: &str,
) -> AppResult<(BdAddr, BdAddr)> {
    let output = runner.run("hciconfig").await?;
    let pairs = parse_hciconfig(&output.stdout)?;

    let mut dut_addr = None;
    let mut ref_addr = None;
    for (iface, addr) in pairs {
        if iface == dut {
            dut_addr = Some(addr);
        } else if iface == reference {
            ref_addr = Some(addr);
        } else {
            return Err(BenchError::Configuration(format!(
                "Unexpected interface {} ({}) reported by hciconfig",
                iface, addr
            )));
        }
    }

    match (dut_addr, ref_addr) {
        (Some(d), Some(r)) => {
            tracing::info!("DUT {} = {}, REF {} = {}", dut, d, reference, r);
            Ok((d, r))
        }
        (None, _) => Err(BenchError::Configuration(format!(
            "DUT interface {} not reported by hciconfig",
            dut
        ))),
        (_, None) => Err(BenchError::Configuration(format!(
            "REF interface {} not reported by hciconfig",
            reference
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(str::to_string).collect()
    }

    #[test]
    fn parses_two_interfaces() {
        let out = lines(
            "hci1:\tType: Primary  Bus: USB\n\
             \tBD Address: 00:50:43:9A:BC:DE  ACL MTU: 1021:8  SCO MTU: 64:1\n\
             \tUP RUNNING\n\
             \n\
             hci0:\tType: Primary  Bus: SDIO\n\
             \tBD Address: 00:50:43:21:0a:7c  ACL MTU: 1021:8  SCO MTU: 120:6\n\
             \tUP RUNNING PSCAN\n",
        );
        let pairs = parse_hciconfig(&out).unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].0, "hci1");
        assert_eq!(pairs[1].1.to_string(), "00:50:43:21:0A:7C");
    }

    #[test]
    fn header_without_address_is_skipped() {
        let out = lines("hci2:\tType: Primary  Bus: UART\n\tDOWN\n");
        assert!(parse_hciconfig(&out).unwrap().is_empty());
    }

    #[tokio::test]
    async fn resolves_dut_and_ref() {
        let runner = MockRunner::with_interfaces(&[
            ("hci0", "00:50:43:21:0A:7C"),
            ("hci1", "00:50:43:9A:BC:DE"),
        ]);
        let (dut, reference) = resolve_bd_addresses(&runner, "hci0", "hci1").await.unwrap();
        assert_eq!(dut.to_string(), "00:50:43:21:0A:7C");
        assert_eq!(reference.to_string(), "00:50:43:9A:BC:DE");
        assert_eq!(runner.scripts(), vec!["hciconfig".to_string()]);
    }

    #[tokio::test]
    async fn missing_ref_is_an_error() {
        let runner = MockRunner::with_interfaces(&[("hci0", "00:50:43:21:0A:7C")]);
        let err = resolve_bd_addresses(&runner, "hci0", "hci1").await.unwrap_err();
        assert!(err.to_string().contains("REF interface hci1"));
    }

    #[tokio::test]
    async fn extra_interface_is_an_error() {
        let runner = MockRunner::with_interfaces(&[
            ("hci0", "00:50:43:21:0A:7C"),
            ("hci1", "00:50:43:9A:BC:DE"),
            ("hci2", "11:22:33:44:55:66"),
        ]);
        let err = resolve_bd_addresses(&runner, "hci0", "hci1").await.unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("hci2"));
    }
}
