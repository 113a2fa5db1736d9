//! Digital multimeter driver for DC current capture.
//!
//! Protocol Overview:
//! - SCPI over a LAN socket (see [`crate::scpi`])
//! - Readings are returned by `READ?` as comma-separated amperes in scientific
//!   notation (e.g. `+1.23456789E-03,+1.23400000E-03`)
//! - Number of readings = trigger count × sample count
//!
//! # Important Notes
//!
//! - `configure` reads back every setting and logs the instrument's view of it
//! - Statistics are computed on the host; `CALC:STAT ON` only keeps the front
//!   panel in step
//! - An overload reading (`9.9E+37`) fails the capture

use crate::error::{AppResult, BenchError};
use crate::scpi::ScpiTransport;
use crate::validation;
use serde::{Deserialize, Serialize};

/// Magnitude the meter reports on overload.
const OVERLOAD: f64 = 9.9e37;

/// Trigger and sampling setup applied to every meter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DmmSettings {
    /// I/O timeout for every query, in milliseconds. Long captures block in `READ?`.
    pub timeout_ms: u64,
    /// `CONF:CURR:DC` range argument (`3`, `1`, `100E-3`, `AUTO`, ...).
    pub current_range: String,
    /// `IMM`, `EXT` or `BUS`.
    pub trigger_source: String,
    /// Seconds or `MIN`/`MAX`.
    pub trigger_delay: String,
    /// `IMM` or `TIM`.
    pub sample_source: String,
    /// Seconds or `MIN`/`MAX`.
    pub sample_timer: String,
}

impl Default for DmmSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 600_000,
            current_range: "3".to_string(),
            trigger_source: "IMM".to_string(),
            trigger_delay: "MIN".to_string(),
            sample_source: "TIM".to_string(),
            sample_timer: "MIN".to_string(),
        }
    }
}

impl DmmSettings {
    /// Check enumerated values before anything is sent to a meter.
    pub fn validate(&self) -> AppResult<()> {
        let err = |field: &str, value: &str, why: &str| {
            BenchError::Configuration(format!("dmm.{} = '{}': {}", field, value, why))
        };
        validation::is_in_range(self.timeout_ms, 1_000..=3_600_000)
            .map_err(|e| err("timeout_ms", &self.timeout_ms.to_string(), e))?;
        validation::is_not_empty(&self.current_range)
            .map_err(|e| err("current_range", &self.current_range, e))?;
        if !matches!(self.trigger_source.to_ascii_uppercase().as_str(), "IMM" | "EXT" | "BUS") {
            return Err(err("trigger_source", &self.trigger_source, "must be IMM, EXT or BUS"));
        }
        if !matches!(self.sample_source.to_ascii_uppercase().as_str(), "IMM" | "TIM") {
            return Err(err("sample_source", &self.sample_source, "must be IMM or TIM"));
        }
        validation::is_not_empty(&self.trigger_delay)
            .map_err(|e| err("trigger_delay", &self.trigger_delay, e))?;
        validation::is_not_empty(&self.sample_timer)
            .map_err(|e| err("sample_timer", &self.sample_timer, e))?;
        Ok(())
    }
}

/// One meter on the bench.
pub struct Dmm {
    transport: Box<dyn ScpiTransport>,
    sheet: String,
}

impl Dmm {
    /// Wrap a transport. `sheet` names the report worksheet for this meter.
    pub fn new(transport: Box<dyn ScpiTransport>, sheet: impl Into<String>) -> Self {
        Self {
            transport,
            sheet: sheet.into(),
        }
    }

    /// Worksheet name.
    pub fn sheet(&self) -> &str {
        &self.sheet
    }

    /// VISA resource.
    pub fn resource(&self) -> &str {
        self.transport.resource()
    }

    /// `*CLS`
    pub async fn clear(&self) -> AppResult<()> {
        self.transport.write("*CLS").await
    }

    /// `*IDN?`
    pub async fn identify(&self) -> AppResult<String> {
        let idn = self.transport.query("*IDN?").await?;
        tracing::info!("Instrument ID: <{}> for instrument <{}>", idn, self.resource());
        Ok(idn)
    }

    /// `*OPC?`
    pub async fn opc(&self) -> AppResult<String> {
        let opc = self.transport.query("*OPC?").await?;
        tracing::info!("Check OPC: <{}> for instrument <{}>", opc, self.resource());
        Ok(opc)
    }

    /// `SYST:ERR?`
    pub async fn system_error(&self) -> AppResult<String> {
        let err = self.transport.query("SYST:ERR?").await?;
        if err.starts_with("+0") || err.starts_with('0') {
            tracing::info!("System Error: <{}> for instrument <{}>", err, self.resource());
        } else {
            tracing::warn!("System Error: <{}> for instrument <{}>", err, self.resource());
        }
        Ok(err)
    }

    /// Show `text` on the front panel.
    pub async fn display_text(&self, text: &str) -> AppResult<()> {
        self.transport.write(&format!("DISP:TEXT \"{}\"", text)).await
    }

    /// Clear status, then apply range, trigger and sample settings with read-back.
    pub async fn configure(&self, settings: &DmmSettings) -> AppResult<()> {
        self.clear().await?;
        let steps = [
            ("CONF:CURR:DC", "CONF?", settings.current_range.as_str(), "Set current range"),
            ("TRIG:SOUR", "TRIG:SOUR?", settings.trigger_source.as_str(), "Trigger source"),
            ("TRIG:DEL", "TRIG:DEL?", settings.trigger_delay.as_str(), "Trigger delay"),
            ("SAMP:SOUR", "SAMP:SOUR?", settings.sample_source.as_str(), "Sample source"),
            ("SAMP:TIM", "SAMP:TIM?", settings.sample_timer.as_str(), "Sample timer"),
        ];
        for (set, get, value, label) in steps {
            self.transport.write(&format!("{} {}", set, value)).await?;
            let readback = self.transport.query(get).await?;
            tracing::info!("{}: <{}> for instrument <{}>", label, readback, self.resource());
        }
        Ok(())
    }

    /// Take `trigger_count × sample_count` readings, in amperes.
    pub async fn capture(&self, trigger_count: u32, sample_count: u32) -> AppResult<Vec<f64>> {
        self.transport.write("CALC:AVER:CLE").await?;
        self.transport
            .write(&format!("TRIG:COUN {}", trigger_count))
            .await?;
        self.transport
            .write(&format!("SAMP:COUN {}", sample_count))
            .await?;
        self.transport.write("CALC:STAT ON").await?;

        let response = self.transport.query("READ?").await?;
        let readings = parse_readings(&response)
            .map_err(|e| BenchError::Instrument(format!("{}: {}", self.resource(), e)))?;

        let expected = trigger_count as usize * sample_count as usize;
        if readings.len() != expected {
            tracing::warn!(
                "{} returned {} readings, expected {}",
                self.resource(),
                readings.len(),
                expected
            );
        }
        Ok(readings)
    }
}

/// Parse a `READ?` response into amperes.
pub fn parse_readings(response: &str) -> Result<Vec<f64>, String> {
    let trimmed = response.trim();
    if trimmed.is_empty() {
        return Err("empty READ? response".to_string());
    }
    trimmed
        .split(',')
        .map(|token| {
            let token = token.trim();
            let value = token
                .parse::<f64>()
                .map_err(|_| format!("unparseable reading '{}'", token))?;
            if !value.is_finite() || value.abs() >= OVERLOAD {
                return Err(format!("overload or invalid reading '{}'", token));
            }
            Ok(value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scpi::MockDmmTransport;

    #[test]
    fn parses_scientific_readings() {
        let r = parse_readings("+1.23456789E-03,+1.23400000E-03, -2.5E-06\n").unwrap();
        assert_eq!(r, vec![1.23456789e-3, 1.234e-3, -2.5e-6]);
    }

    #[test]
    fn rejects_bad_readings() {
        assert!(parse_readings("").is_err());
        assert!(parse_readings("1E-3,abc").is_err());
        assert!(parse_readings("+9.90000000E+37").is_err());
    }

    #[test]
    fn settings_validation() {
        assert!(DmmSettings::default().validate().is_ok());
        let bad = DmmSettings {
            trigger_source: "SOFT".to_string(),
            ..DmmSettings::default()
        };
        assert!(bad.validate().is_err());
        let bad = DmmSettings {
            timeout_ms: 10,
            ..DmmSettings::default()
        };
        assert!(bad.validate().is_err());
    }

    #[tokio::test]
    async fn configure_sends_exact_sequence() {
        let mock = MockDmmTransport::new("DMM_A", vec![0.001]);
        let dmm = Dmm::new(Box::new(mock.clone()), "VBAT");
        dmm.configure(&DmmSettings::default()).await.unwrap();
        assert_eq!(
            mock.commands(),
            vec![
                "*CLS",
                "CONF:CURR:DC 3",
                "CONF?",
                "TRIG:SOUR IMM",
                "TRIG:SOUR?",
                "TRIG:DEL MIN",
                "TRIG:DEL?",
                "SAMP:SOUR TIM",
                "SAMP:SOUR?",
                "SAMP:TIM MIN",
                "SAMP:TIM?",
            ]
        );
    }

    #[tokio::test]
    async fn capture_sends_exact_sequence_and_parses() {
        let mock = MockDmmTransport::new("DMM_A", vec![0.0012, 0.0014]);
        let dmm = Dmm::new(Box::new(mock.clone()), "VBAT");
        let amps = dmm.capture(2, 2).await.unwrap();
        assert_eq!(amps, vec![0.0012, 0.0014, 0.0012, 0.0014]);
        assert_eq!(
            mock.commands(),
            vec!["CALC:AVER:CLE", "TRIG:COUN 2", "SAMP:COUN 2", "CALC:STAT ON", "READ?"]
        );
    }

    #[tokio::test]
    async fn display_and_status_queries() {
        let mock = MockDmmTransport::new("DMM_A", vec![0.001]);
        let dmm = Dmm::new(Box::new(mock.clone()), "VBAT");
        dmm.display_text("Running...").await.unwrap();
        assert_eq!(dmm.opc().await.unwrap(), "1");
        assert!(dmm.system_error().await.unwrap().starts_with("+0"));
        assert!(dmm.identify().await.unwrap().contains("DMM_A"));
        assert_eq!(mock.commands()[0], "DISP:TEXT \"Running...\"");
    }
}
