//! SCPI transport for the multimeters.
//!
//! Instruments are addressed with VISA resource strings in `config.ini`, but only
//! LAN resources are supported: both `::SOCKET` and `::INSTR` forms are mapped to a
//! raw SCPI socket. The [`ScpiTransport`] trait is the seam between the DMM driver
//! and the wire, with a TCP client and an in-memory mock DMM behind it.

use crate::error::{AppResult, BenchError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Raw SCPI socket port used by LAN instruments for `::INSTR` resources.
pub const DEFAULT_SCPI_PORT: u16 = 5025;

/// Connect timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A parsed LAN VISA resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisaResource {
    /// Resource string as configured.
    pub raw: String,
    /// Instrument host.
    pub host: String,
    /// SCPI socket port.
    pub port: u16,
}

impl VisaResource {
    /// Parse `TCPIP[n]::host::port::SOCKET` or `TCPIP[n]::host[::inst0]::INSTR`.
    pub fn parse(resource: &str) -> AppResult<Self> {
        let raw = resource.trim().to_string();
        let invalid = |why: &str| {
            BenchError::Configuration(format!("Unsupported VISA resource '{}': {}", raw, why))
        };

        let parts: Vec<&str> = raw.split("::").collect();
        let interface = parts.first().copied().unwrap_or_default().to_ascii_uppercase();
        let board = interface
            .strip_prefix("TCPIP")
            .ok_or_else(|| invalid("only TCPIP resources are supported"))?;
        if !board.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid("bad TCPIP board number"));
        }

        let class = parts.last().copied().unwrap_or_default().to_ascii_uppercase();
        match (class.as_str(), parts.len()) {
            ("SOCKET", 4) => {
                let port = parts[2]
                    .parse::<u16>()
                    .map_err(|_| invalid("bad socket port"))?;
                Self::build(&raw, parts[1], port, &invalid)
            }
            ("INSTR", 3) | ("INSTR", 4) => Self::build(&raw, parts[1], DEFAULT_SCPI_PORT, &invalid),
            _ => Err(invalid("expected ::SOCKET or ::INSTR")),
        }
    }

    fn build(
        raw: &str,
        host: &str,
        port: u16,
        invalid: &dyn Fn(&str) -> BenchError,
    ) -> AppResult<Self> {
        crate::validation::is_valid_host(host).map_err(invalid)?;
        Ok(Self {
            raw: raw.to_string(),
            host: host.to_string(),
            port,
        })
    }
}

impl FromStr for VisaResource {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VisaResource::parse(s)
    }
}

impl fmt::Display for VisaResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Line-oriented SCPI I/O.
#[async_trait]
pub trait ScpiTransport: Send + Sync {
    /// Send a command that produces no response.
    async fn write(&self, command: &str) -> AppResult<()>;

    /// Send a query and return its trimmed response line.
    async fn query(&self, query: &str) -> AppResult<String>;

    /// Human-readable name for log lines.
    fn resource(&self) -> &str;
}

/// SCPI over a raw TCP socket, LF terminated.
pub struct TcpScpi {
    stream: tokio::sync::Mutex<BufReader<TcpStream>>,
    resource: String,
    timeout: Duration,
}

impl TcpScpi {
    /// Open the socket for `resource`. `io_timeout` bounds every query.
    pub async fn connect(resource: &VisaResource, io_timeout: Duration) -> AppResult<Self> {
        let stream = timeout(
            CONNECT_TIMEOUT,
            TcpStream::connect((resource.host.as_str(), resource.port)),
        )
        .await
        .map_err(|_| {
            BenchError::Instrument(format!("Connection timeout to {}", resource))
        })??;
        stream.set_nodelay(true)?;

        tracing::info!("Connected to DMM at {}:{}", resource.host, resource.port);

        Ok(Self {
            stream: tokio::sync::Mutex::new(BufReader::new(stream)),
            resource: resource.raw.clone(),
            timeout: io_timeout,
        })
    }
}

#[async_trait]
impl ScpiTransport for TcpScpi {
    async fn write(&self, command: &str) -> AppResult<()> {
        let mut stream = self.stream.lock().await;
        tracing::debug!(resource = %self.resource, "SCPI write: {:?}", command);
        stream
            .get_mut()
            .write_all(format!("{}\n", command).as_bytes())
            .await?;
        stream.get_mut().flush().await?;
        Ok(())
    }

    async fn query(&self, query: &str) -> AppResult<String> {
        let mut stream = self.stream.lock().await;
        tracing::debug!(resource = %self.resource, "SCPI query: {:?}", query);
        stream
            .get_mut()
            .write_all(format!("{}\n", query).as_bytes())
            .await?;
        stream.get_mut().flush().await?;

        let mut response = String::new();
        match timeout(self.timeout, stream.read_line(&mut response)).await {
            Ok(Ok(0)) => Err(BenchError::Instrument(format!(
                "{} closed the connection",
                self.resource
            ))),
            Ok(Ok(_)) => {
                let trimmed = response.trim().to_string();
                tracing::debug!(resource = %self.resource, "SCPI response: {:?}", trimmed);
                Ok(trimmed)
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(BenchError::Instrument(format!(
                "Timeout waiting for {} to answer '{}'",
                self.resource, query
            ))),
        }
    }

    fn resource(&self) -> &str {
        &self.resource
    }
}

#[derive(Debug, Default)]
struct MockDmmState {
    commands: Vec<String>,
    settings: HashMap<String, String>,
    readings_amps: Vec<f64>,
    fail_on: Option<String>,
}

/// In-memory DMM answering the SCPI subset the bench uses.
///
/// Cloning shares the state, so a test can keep a handle after giving the
/// transport to a [`crate::dmm::Dmm`].
#[derive(Debug, Clone)]
pub struct MockDmmTransport {
    name: String,
    state: Arc<Mutex<MockDmmState>>,
}

impl MockDmmTransport {
    /// Mock whose `READ?` cycles through `readings_amps`.
    pub fn new(name: impl Into<String>, readings_amps: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(MockDmmState {
                readings_amps,
                ..MockDmmState::default()
            })),
        }
    }

    /// Make any command starting with `prefix` fail with an instrument error.
    pub fn fail_on(self, prefix: impl Into<String>) -> Self {
        self.with_state(|s| s.fail_on = Some(prefix.into()));
        self
    }

    /// Every command and query received, in order.
    pub fn commands(&self) -> Vec<String> {
        self.with_state(|s| s.commands.clone())
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MockDmmState) -> R) -> R {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    fn record(&self, line: &str) -> AppResult<()> {
        self.with_state(|s| {
            s.commands.push(line.to_string());
            match &s.fail_on {
                Some(prefix) if line.starts_with(prefix.as_str()) => Err(BenchError::Instrument(
                    format!("{} rejected '{}'", self.name, line),
                )),
                _ => Ok(()),
            }
        })
    }

    fn count(&self, key: &str) -> usize {
        self.with_state(|s| {
            s.settings
                .get(key)
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(1)
        })
    }
}

#[async_trait]
impl ScpiTransport for MockDmmTransport {
    async fn write(&self, command: &str) -> AppResult<()> {
        self.record(command)?;
        if let Some((key, value)) = command.split_once(' ') {
            self.with_state(|s| s.settings.insert(key.to_string(), value.to_string()));
        }
        Ok(())
    }

    async fn query(&self, query: &str) -> AppResult<String> {
        self.record(query)?;
        let response = match query {
            "*IDN?" => format!("Keysight Technologies,34465A,{},A.02.14-02.40", self.name),
            "*OPC?" => "1".to_string(),
            "SYST:ERR?" => "+0,\"No error\"".to_string(),
            "CONF?" => {
                let range = self.with_state(|s| {
                    s.settings
                        .get("CONF:CURR:DC")
                        .cloned()
                        .unwrap_or_else(|| "3".to_string())
                });
                format!("\"CURR {},+3.000000E-06\"", range)
            }
            "READ?" => {
                let n = self.count("TRIG:COUN") * self.count("SAMP:COUN");
                self.with_state(|s| {
                    if s.readings_amps.is_empty() {
                        return String::new();
                    }
                    s.readings_amps
                        .iter()
                        .cycle()
                        .take(n)
                        .map(|a| format!("{:E}", a))
                        .collect::<Vec<_>>()
                        .join(",")
                })
            }
            other => {
                let key = other.trim_end_matches('?');
                self.with_state(|s| s.settings.get(key).cloned().unwrap_or_else(|| "0".to_string()))
            }
        };
        Ok(response)
    }

    fn resource(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_socket_resource() {
        let r = VisaResource::parse("TCPIP0::192.168.1.50::5025::SOCKET").unwrap();
        assert_eq!(r.host, "192.168.1.50");
        assert_eq!(r.port, 5025);
    }

    #[test]
    fn parses_instr_resource_with_and_without_device() {
        let r = VisaResource::parse("TCPIP::10.0.0.7::INSTR").unwrap();
        assert_eq!((r.host.as_str(), r.port), ("10.0.0.7", DEFAULT_SCPI_PORT));
        let r = VisaResource::parse("tcpip1::dmm-a.lab::inst0::INSTR").unwrap();
        assert_eq!(r.host, "dmm-a.lab");
        assert_eq!(r.to_string(), "tcpip1::dmm-a.lab::inst0::INSTR");
    }

    #[test]
    fn rejects_non_lan_resources() {
        assert!(VisaResource::parse("GPIB0::22::INSTR").is_err());
        assert!(VisaResource::parse("USB0::0x2A8D::0x0101::MY57508160::0::INSTR").is_err());
        assert!(VisaResource::parse("TCPIP0::192.168.1.50::notaport::SOCKET").is_err());
        assert!(VisaResource::parse("TCPIP0::192.168.1.50").is_err());
    }

    #[tokio::test]
    async fn mock_echoes_settings_and_produces_readings() {
        let mock = MockDmmTransport::new("DMM_A", vec![0.001, 0.002]);
        mock.write("TRIG:SOUR IMM").await.unwrap();
        assert_eq!(mock.query("TRIG:SOUR?").await.unwrap(), "IMM");

        mock.write("TRIG:COUN 2").await.unwrap();
        mock.write("SAMP:COUN 3").await.unwrap();
        let read = mock.query("READ?").await.unwrap();
        assert_eq!(read.split(',').count(), 6);
        assert_eq!(mock.commands().len(), 5);
    }

    #[tokio::test]
    async fn mock_failure_injection() {
        let mock = MockDmmTransport::new("DMM_B", vec![0.001]).fail_on("READ?");
        assert!(mock.query("*IDN?").await.is_ok());
        assert!(mock.query("READ?").await.is_err());
    }
}
