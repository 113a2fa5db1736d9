//! Run metadata written to the `Version` worksheet.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// What ran, against what, and when.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunMetadata {
    /// Version of the bench software.
    pub software_version: String,
    /// Chip part number (`8977`, `8997`, `8987`).
    pub chip_version: String,
    /// DUT interface name.
    pub dut_interface: String,
    /// REF interface name.
    pub ref_interface: String,
    /// DUT BD address, once resolved.
    pub dut_bd_address: String,
    /// REF BD address, once resolved.
    pub ref_bd_address: String,
    /// `(worksheet, *IDN? response)` per meter, in configuration order.
    pub instruments: Vec<(String, String)>,
    /// Cases that produced a column.
    pub executed_cases: Vec<String>,
    /// Cases disabled in the configuration.
    pub skipped_cases: Vec<String>,
    /// Run start.
    pub started_at: DateTime<Local>,
    /// Run end, set by [`RunMetadata::finish`].
    pub finished_at: Option<DateTime<Local>>,
}

impl Default for RunMetadata {
    fn default() -> Self {
        Self {
            software_version: env!("CARGO_PKG_VERSION").to_string(),
            chip_version: String::new(),
            dut_interface: String::new(),
            ref_interface: String::new(),
            dut_bd_address: String::new(),
            ref_bd_address: String::new(),
            instruments: Vec::new(),
            executed_cases: Vec::new(),
            skipped_cases: Vec::new(),
            started_at: Local::now(),
            finished_at: None,
        }
    }
}

impl RunMetadata {
    /// Stamp the end time.
    pub fn finish(&mut self) {
        self.finished_at = Some(Local::now());
    }

    /// Wall-clock run time, `HH:MM:SS`. Empty until the run has finished.
    pub fn duration_hms(&self) -> String {
        match self.finished_at {
            Some(end) => {
                let secs = (end - self.started_at).num_seconds().max(0);
                format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
            }
            None => String::new(),
        }
    }

    /// Key/value rows for the `Version` worksheet.
    pub fn rows(&self) -> Vec<(String, String)> {
        let mut rows = vec![
            ("Software Version".to_string(), self.software_version.clone()),
            ("Chip Version".to_string(), self.chip_version.clone()),
            ("DUT Interface".to_string(), self.dut_interface.clone()),
            ("DUT BD Address".to_string(), self.dut_bd_address.clone()),
            ("REF Interface".to_string(), self.ref_interface.clone()),
            ("REF BD Address".to_string(), self.ref_bd_address.clone()),
        ];
        for (sheet, idn) in &self.instruments {
            rows.push((format!("Instrument {}", sheet), idn.clone()));
        }
        rows.push(("Start Time".to_string(), self.started_at.format("%Y-%m-%d %H:%M:%S").to_string()));
        rows.push((
            "End Time".to_string(),
            self.finished_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default(),
        ));
        rows.push(("Total Running Time".to_string(), self.duration_hms()));
        rows.push(("Executed Cases".to_string(), self.executed_cases.len().to_string()));
        rows.push(("Skipped Cases".to_string(), self.skipped_cases.join(",")));
        rows
    }
}

/// Builder for the fields known before the run starts.
#[derive(Default)]
pub struct RunMetadataBuilder {
    inner: RunMetadata,
}

impl RunMetadataBuilder {
    /// Empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Chip version label as configured.
    pub fn chip_version(mut self, chip: &str) -> Self {
        self.inner.chip_version = chip.to_string();
        self
    }

    /// DUT and REF interface names.
    pub fn interfaces(mut self, dut: &str, reference: &str) -> Self {
        self.inner.dut_interface = dut.to_string();
        self.inner.ref_interface = reference.to_string();
        self
    }

    /// Finish; timestamps and results are filled in by the run.
    pub fn build(self) -> RunMetadata {
        self.inner
    }
}
