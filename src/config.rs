//! Bench configuration.
//!
//! Settings are loaded from an INI file (`config.ini` by default) and can be
//! overridden by environment variables prefixed with `BT_BENCH`, using `__` as the
//! section separator:
//!
//! ```text
//! BT_BENCH_SSH__PASSWORD=secret
//! BT_BENCH_TIMING__SETTLE_SCALE=0
//! ```
//!
//! Keys are lowercase. Boolean flags accept `1`/`0` as well as `true`/`false`.

use crate::cases::{self, CaseGroup, SampleProfile, TestCase};
use crate::dmm::DmmSettings;
use crate::error::{AppResult, BenchError};
use crate::power::{ChipVersion, PowerIndexMap, PowerIndexTable};
use crate::report::{self, VERSION_SHEET};
use crate::scpi::VisaResource;
use crate::validation;
use config::{Config, ConfigBuilder, Environment, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Most meters a run can drive.
pub const MAX_DMM_COUNT: usize = 4;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "BT_BENCH";

/// Fully loaded configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// `[basic]`
    pub basic: BasicSettings,
    /// `[ssh]`
    pub ssh: SshSettings,
    /// `[dmm]`
    pub dmm: DmmSection,
    /// `[samples]`
    #[serde(default)]
    pub samples: SampleSettings,
    /// `bt_enable`, `ble_enable` and one flag per case, keyed by lowercased case name.
    #[serde(default)]
    pub test_case: HashMap<String, bool>,
    /// Pin-power indexes for Robin3 (8977).
    pub robin3_8977_power_index: Option<PowerIndexTable>,
    /// Pin-power indexes for KF2 (8997).
    pub kf2_8997_power_index: Option<PowerIndexTable>,
    /// Pin-power indexes for CA2 (8987).
    pub ca2_8987_power_index: Option<PowerIndexTable>,
    /// `[output]`
    #[serde(default)]
    pub output: OutputSettings,
    /// `[logging]`
    #[serde(default)]
    pub logging: LoggingSettings,
    /// `[timing]`
    #[serde(default)]
    pub timing: TimingSettings,
}

/// `[basic]`: chip and interfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicSettings {
    /// `8977`, `8997` or `8987`.
    pub chip_version: String,
    /// DUT HCI interface.
    pub dut: String,
    /// REF HCI interface.
    #[serde(rename = "ref")]
    pub reference: String,
    /// Worksheet for the meter at `visa_address_a`; defaults to `DMM_A`.
    pub sheet_name_a: Option<String>,
    /// Worksheet for `visa_address_b`.
    pub sheet_name_b: Option<String>,
    /// Worksheet for `visa_address_c`.
    pub sheet_name_c: Option<String>,
    /// Worksheet for `visa_address_d`.
    pub sheet_name_d: Option<String>,
}

/// `[ssh]`: the host that owns both HCI interfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshSettings {
    /// Host name or address, `server` in the file.
    #[serde(rename = "server")]
    pub host: String,
    /// Defaults to 22.
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// Login user.
    pub username: String,
    /// Password authentication only.
    #[serde(default)]
    pub password: String,
    /// Blocking-call timeout for the session, in milliseconds.
    #[serde(default = "default_ssh_timeout")]
    pub timeout_ms: u32,
}

/// `[dmm]`: meter addresses plus the trigger/sample setup shared by all of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmmSection {
    /// How many of the `visa_address_*` entries are in use.
    pub count: usize,
    /// First meter, e.g. `TCPIP0::192.168.1.50::5025::SOCKET`.
    pub visa_address_a: Option<String>,
    /// Second meter.
    pub visa_address_b: Option<String>,
    /// Third meter.
    pub visa_address_c: Option<String>,
    /// Fourth meter.
    pub visa_address_d: Option<String>,
    /// See [`DmmSettings::timeout_ms`].
    #[serde(default = "default_dmm_timeout")]
    pub timeout_ms: u64,
    /// See [`DmmSettings::current_range`].
    #[serde(default = "default_current_range")]
    pub current_range: String,
    /// See [`DmmSettings::trigger_source`].
    #[serde(default = "default_trigger_source")]
    pub trigger_source: String,
    /// See [`DmmSettings::trigger_delay`].
    #[serde(default = "default_min")]
    pub trigger_delay: String,
    /// See [`DmmSettings::sample_source`].
    #[serde(default = "default_sample_source")]
    pub sample_source: String,
    /// See [`DmmSettings::sample_timer`].
    #[serde(default = "default_min")]
    pub sample_timer: String,
}

/// Capture length for one sample profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureSpec {
    /// `TRIG:COUN`
    pub trigger_count: u32,
    /// `SAMP:COUN`
    pub sample_count: u32,
    /// Captures concatenated into one column.
    pub repeat_count: u32,
}

/// `[samples]`: capture length per profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleSettings {
    /// Flat profile (deep sleep, idle).
    pub flat_trigger_count: u32,
    /// Samples per trigger.
    pub flat_sample_count: u32,
    /// Captures concatenated into one column.
    pub flat_repeat_count: u32,
    /// Pulse profile (scans, sniff, advertising, BLE connection).
    pub pulse_trigger_count: u32,
    /// Samples per trigger.
    pub pulse_sample_count: u32,
    /// Captures concatenated into one column.
    pub pulse_repeat_count: u32,
    /// Active profile (SCO, 10 ms BLE scan).
    pub active_trigger_count: u32,
    /// Samples per trigger.
    pub active_sample_count: u32,
    /// Captures concatenated into one column.
    pub active_repeat_count: u32,
}

impl Default for SampleSettings {
    fn default() -> Self {
        Self {
            flat_trigger_count: 1,
            flat_sample_count: 1_000,
            flat_repeat_count: 1,
            pulse_trigger_count: 1,
            pulse_sample_count: 10_000,
            pulse_repeat_count: 1,
            active_trigger_count: 1,
            active_sample_count: 5_000,
            active_repeat_count: 1,
        }
    }
}

impl SampleSettings {
    /// Capture length for `profile`.
    pub fn spec(&self, profile: SampleProfile) -> CaptureSpec {
        let (trigger_count, sample_count, repeat_count) = match profile {
            SampleProfile::Flat => (self.flat_trigger_count, self.flat_sample_count, self.flat_repeat_count),
            SampleProfile::Pulse => (self.pulse_trigger_count, self.pulse_sample_count, self.pulse_repeat_count),
            SampleProfile::Active => (self.active_trigger_count, self.active_sample_count, self.active_repeat_count),
        };
        CaptureSpec {
            trigger_count,
            sample_count,
            repeat_count,
        }
    }
}

/// `[output]`: where the workbook goes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Directory the workbook is written to.
    pub dir: PathBuf,
    /// Workbook name prefix; a timestamp is appended.
    pub name: String,
    /// Add the `6.Raw` row with every sample.
    pub include_raw: bool,
    /// Also write the tables as a directory of CSV files.
    pub csv_export: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("results"),
            name: "bt_current".to_string(),
            include_raw: false,
            csv_export: false,
        }
    }
}

/// `[logging]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// trace, debug, info, warn, error
    pub level: String,
    /// pretty, compact or json
    pub format: String,
    /// Append-mode log file, in addition to the console.
    pub file: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
            file: None,
        }
    }
}

/// `[timing]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    /// Multiplies every local settle time. `0` disables sleeping.
    pub settle_scale: f64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self { settle_scale: 1.0 }
    }
}

fn default_ssh_port() -> u16 {
    22
}

fn default_ssh_timeout() -> u32 {
    30_000
}

fn default_dmm_timeout() -> u64 {
    DmmSettings::default().timeout_ms
}

fn default_current_range() -> String {
    DmmSettings::default().current_range
}

fn default_trigger_source() -> String {
    DmmSettings::default().trigger_source
}

fn default_sample_source() -> String {
    DmmSettings::default().sample_source
}

fn default_min() -> String {
    "MIN".to_string()
}

impl Settings {
    /// Load `path` plus environment overrides, then validate.
    pub fn load(path: &Path) -> AppResult<Self> {
        let name = path.to_string_lossy();
        let builder = Config::builder().add_source(config::File::new(&name, FileFormat::Ini));
        Self::from_builder(builder)
    }

    /// Load from INI text plus environment overrides, then validate.
    pub fn from_ini_str(text: &str) -> AppResult<Self> {
        let builder = Config::builder().add_source(config::File::from_str(text, FileFormat::Ini));
        Self::from_builder(builder)
    }

    fn from_builder(builder: ConfigBuilder<config::builder::DefaultState>) -> AppResult<Self> {
        let settings: Settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Semantic checks that deserialization cannot express.
    pub fn validate(&self) -> AppResult<()> {
        let chip = self.chip()?;

        for (key, iface) in [("basic.dut", &self.basic.dut), ("basic.ref", &self.basic.reference)] {
            validation::is_hci_interface(iface.trim()).map_err(|e| invalid(key, iface, e))?;
        }
        if self.basic.dut.trim() == self.basic.reference.trim() {
            return Err(BenchError::Configuration(format!(
                "basic.dut and basic.ref are both '{}'",
                self.basic.dut
            )));
        }

        validation::is_valid_host(self.ssh.host.trim()).map_err(|e| invalid("ssh.server", &self.ssh.host, e))?;
        validation::is_not_empty(&self.ssh.username).map_err(|e| invalid("ssh.username", &self.ssh.username, e))?;

        validation::is_in_range(self.dmm.count, 1..=MAX_DMM_COUNT)
            .map_err(|e| invalid("dmm.count", &self.dmm.count.to_string(), e))?;
        let instruments = self.instruments()?;
        let mut sheets = HashSet::new();
        for (sheet, _) in &instruments {
            let worksheet = report::worksheet_name(sheet);
            if worksheet.eq_ignore_ascii_case(VERSION_SHEET) {
                return Err(invalid("basic.sheet_name", sheet, "reserved for run metadata"));
            }
            if !sheets.insert(worksheet.to_lowercase()) {
                return Err(invalid("basic.sheet_name", sheet, "duplicate worksheet name"));
            }
        }
        self.dmm_settings().validate()?;

        for profile in [SampleProfile::Flat, SampleProfile::Pulse, SampleProfile::Active] {
            let spec = self.samples.spec(profile);
            let key = format!("samples.{}", profile);
            validation::is_in_range(spec.trigger_count, 1..=1_000_000)
                .map_err(|e| invalid(&format!("{}_trigger_count", key), &spec.trigger_count.to_string(), e))?;
            validation::is_in_range(spec.sample_count, 1..=1_000_000)
                .map_err(|e| invalid(&format!("{}_sample_count", key), &spec.sample_count.to_string(), e))?;
            validation::is_in_range(spec.repeat_count, 1..=100)
                .map_err(|e| invalid(&format!("{}_repeat_count", key), &spec.repeat_count.to_string(), e))?;
        }

        let map = self.power_index_map()?;
        map.lookup(chip, crate::power::PowerLevel::Zero)?;

        validation::is_in_range(self.timing.settle_scale, 0.0..=10.0)
            .map_err(|e| invalid("timing.settle_scale", &self.timing.settle_scale.to_string(), e))?;
        validation::is_not_empty(&self.output.name).map_err(|e| invalid("output.name", &self.output.name, e))?;
        if !["trace", "debug", "info", "warn", "error"].contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(invalid("logging.level", &self.logging.level, "must be trace, debug, info, warn or error"));
        }
        if !["pretty", "compact", "json"].contains(&self.logging.format.to_ascii_lowercase().as_str()) {
            return Err(invalid("logging.format", &self.logging.format, "must be pretty, compact or json"));
        }
        Ok(())
    }

    /// Selected chip.
    pub fn chip(&self) -> AppResult<ChipVersion> {
        self.basic.chip_version.parse()
    }

    /// Pin-power tables for every chip that has one configured.
    pub fn power_index_map(&self) -> AppResult<PowerIndexMap> {
        let tables = [
            (ChipVersion::Robin3_8977, &self.robin3_8977_power_index),
            (ChipVersion::Kf2_8997, &self.kf2_8997_power_index),
            (ChipVersion::Ca2_8987, &self.ca2_8987_power_index),
        ]
        .into_iter()
        .filter_map(|(chip, table)| table.clone().map(|t| (chip, t)))
        .collect();
        PowerIndexMap::new(tables)
    }

    /// `(worksheet, resource)` for each meter in use, in configuration order.
    pub fn instruments(&self) -> AppResult<Vec<(String, VisaResource)>> {
        let addresses = [
            &self.dmm.visa_address_a,
            &self.dmm.visa_address_b,
            &self.dmm.visa_address_c,
            &self.dmm.visa_address_d,
        ];
        let sheets = [
            &self.basic.sheet_name_a,
            &self.basic.sheet_name_b,
            &self.basic.sheet_name_c,
            &self.basic.sheet_name_d,
        ];
        let letters = ['a', 'b', 'c', 'd'];

        (0..self.dmm.count.min(MAX_DMM_COUNT))
            .map(|i| {
                let address = addresses[i]
                    .as_deref()
                    .filter(|a| !a.trim().is_empty())
                    .ok_or_else(|| {
                        BenchError::Configuration(format!(
                            "dmm.count is {} but dmm.visa_address_{} is missing",
                            self.dmm.count, letters[i]
                        ))
                    })?;
                let sheet = sheets[i]
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("DMM_{}", letters[i].to_ascii_uppercase()));
                Ok((sheet, VisaResource::parse(address)?))
            })
            .collect()
    }

    /// Trigger and sampling setup for every meter.
    pub fn dmm_settings(&self) -> DmmSettings {
        DmmSettings {
            timeout_ms: self.dmm.timeout_ms,
            current_range: self.dmm.current_range.trim().to_string(),
            trigger_source: self.dmm.trigger_source.trim().to_string(),
            trigger_delay: self.dmm.trigger_delay.trim().to_string(),
            sample_source: self.dmm.sample_source.trim().to_string(),
            sample_timer: self.dmm.sample_timer.trim().to_string(),
        }
    }

    fn flag(&self, key: &str) -> bool {
        self.test_case.get(key).copied().unwrap_or(false)
    }

    /// Whether `case` runs: its group switch and its own flag must both be on.
    pub fn case_enabled(&self, case: &TestCase) -> bool {
        match case.group {
            CaseGroup::Baseline => true,
            CaseGroup::Bt => self.flag("bt_enable") && self.flag(&case.config_key()),
            CaseGroup::Ble => self.flag("ble_enable") && self.flag(&case.config_key()),
        }
    }

    /// Catalogue split into `(enabled, skipped)`, both in execution order.
    pub fn partition_cases(&self) -> (Vec<TestCase>, Vec<TestCase>) {
        cases::catalogue()
            .into_iter()
            .partition(|case| self.case_enabled(case))
    }

    /// `[test_case]` keys that match no case, usually typos.
    pub fn unknown_case_flags(&self) -> Vec<String> {
        let known: HashSet<String> = cases::catalogue()
            .iter()
            .map(TestCase::config_key)
            .chain(["bt_enable".to_string(), "ble_enable".to_string()])
            .collect();
        let mut unknown: Vec<String> = self
            .test_case
            .keys()
            .filter(|k| !known.contains(k.as_str()))
            .cloned()
            .collect();
        unknown.sort();
        unknown
    }
}

fn invalid(key: &str, value: &str, why: &str) -> BenchError {
    BenchError::Configuration(format!("{} = '{}': {}", key, value, why))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const MINIMAL: &str = r#"
[basic]
chip_version = 8987
dut = hci0
ref = hci1
sheet_name_a = VBAT

[ssh]
server = 192.168.1.20
username = pi
password = raspberry

[dmm]
count = 1
visa_address_a = TCPIP0::192.168.1.50::5025::SOCKET

[test_case]
bt_enable = 1
ble_enable = 0
bt_idle = 1
bt_pscan = 0
ble_scan_1s = 1

[ca2_8987_power_index]
0_dbm_pin = 08
4_dbm_pin = 0D
max_dbm_pin = 14
"#;

    #[test]
    fn minimal_file_loads_with_defaults() {
        let s = Settings::from_ini_str(MINIMAL).unwrap();
        assert_eq!(s.chip().unwrap(), ChipVersion::Ca2_8987);
        assert_eq!(s.ssh.port, 22);
        assert_eq!(s.dmm.timeout_ms, 600_000);
        assert_eq!(s.dmm_settings().sample_source, "TIM");
        assert_eq!(s.samples.spec(SampleProfile::Pulse).sample_count, 10_000);
        assert!((s.timing.settle_scale - 1.0).abs() < f64::EPSILON);
        assert_eq!(s.instruments().unwrap()[0].0, "VBAT");
    }

    #[test]
    fn group_switch_gates_cases() {
        let s = Settings::from_ini_str(MINIMAL).unwrap();
        let (enabled, skipped) = s.partition_cases();
        let names: Vec<&str> = enabled.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Deep_Sleep", "BT_Idle"]);
        assert!(skipped.iter().any(|c| c.name == "BLE_Scan_1s"));
    }

    #[test]
    fn unknown_chip_is_rejected() {
        let text = MINIMAL.replace("chip_version = 8987", "chip_version = 4359");
        assert!(Settings::from_ini_str(&text).unwrap_err().is_configuration());
    }

    #[test]
    fn missing_power_table_for_chip_is_rejected() {
        let text = MINIMAL.replace("chip_version = 8987", "chip_version = 8977");
        let err = Settings::from_ini_str(&text).unwrap_err();
        assert!(err.to_string().contains("8977"));
    }

    #[test]
    fn dmm_count_needs_addresses() {
        let text = MINIMAL.replace("count = 1", "count = 2");
        let err = Settings::from_ini_str(&text).unwrap_err();
        assert!(err.to_string().contains("visa_address_b"));
    }

    #[test]
    fn same_dut_and_ref_rejected() {
        let text = MINIMAL.replace("ref = hci1", "ref = hci0");
        assert!(Settings::from_ini_str(&text).is_err());
    }

    #[test]
    fn reserved_sheet_name_rejected() {
        let text = MINIMAL.replace("sheet_name_a = VBAT", "sheet_name_a = Version");
        assert!(Settings::from_ini_str(&text).is_err());
    }

    #[test]
    #[serial]
    fn environment_overrides_file_values() {
        std::env::set_var("BT_BENCH_SSH__PASSWORD", "from-env");
        std::env::set_var("BT_BENCH_OUTPUT__NAME", "env_run");
        let result = Settings::from_ini_str(MINIMAL);
        std::env::remove_var("BT_BENCH_SSH__PASSWORD");
        std::env::remove_var("BT_BENCH_OUTPUT__NAME");

        let s = result.unwrap();
        assert_eq!(s.ssh.password, "from-env");
        assert_eq!(s.output.name, "env_run");
    }

    #[test]
    fn sheet_names_colliding_in_the_workbook_rejected() {
        let text = MINIMAL
            .replace("count = 1", "count = 2")
            .replace("sheet_name_a = VBAT", "sheet_name_a = VDD/1V8\nsheet_name_b = VDD_1V8")
            .replace(
                "visa_address_a = TCPIP0::192.168.1.50::5025::SOCKET",
                "visa_address_a = TCPIP0::192.168.1.50::5025::SOCKET\nvisa_address_b = TCPIP0::192.168.1.51::5025::SOCKET",
            );
        let err = Settings::from_ini_str(&text).unwrap_err();
        assert!(err.to_string().contains("duplicate worksheet name"));
    }

    #[test]
    fn unknown_flags_are_reported() {
        let text = MINIMAL.replace("bt_pscan = 0", "bt_pscann = 1");
        let s = Settings::from_ini_str(&text).unwrap();
        assert_eq!(s.unknown_case_flags(), vec!["bt_pscann".to_string()]);
    }
}
