//! The measurement sequencer.
//!
//! For every enabled case: bring the DUT to init status at the case's power level,
//! apply the case's state scripts, wait for the radio to settle, then capture on
//! every meter at once. All captures are joined before the columns are appended,
//! and the next case starts only after that. Any SSH or instrument error ends the
//! run.

use crate::cases::TestCase;
use crate::config::{CaptureSpec, SampleSettings, Settings};
use crate::dmm::{Dmm, DmmSettings};
use crate::error::{AppResult, BenchError};
use crate::hci::{BdAddr, CommandScript, HciCommands};
use crate::metadata::{RunMetadata, RunMetadataBuilder};
use crate::power::{ChipVersion, PowerIndexMap, PowerLevel};
use crate::report::ResultTable;
use crate::ssh::{self, CommandRunner};
use crate::stats::CaptureStats;
use futures::future::try_join_all;
use serde::Serialize;
use std::time::Duration;
use tracing::Instrument;

/// Result tables plus metadata of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    /// One table per meter, in configuration order.
    pub tables: Vec<ResultTable>,
    /// Run metadata for the `Version` sheet.
    pub metadata: RunMetadata,
}

/// Drives the DUT over SSH and the meters over SCPI.
pub struct Bench {
    runner: Box<dyn CommandRunner>,
    dmms: Vec<Dmm>,
    hci: HciCommands,
    chip: ChipVersion,
    power: PowerIndexMap,
    samples: SampleSettings,
    dmm_settings: DmmSettings,
    settle_scale: f64,
    enabled: Vec<TestCase>,
    skipped: Vec<TestCase>,
    addresses: Option<(BdAddr, BdAddr)>,
    tables: Vec<ResultTable>,
    metadata: RunMetadata,
}

impl Bench {
    /// Assemble a bench from validated settings, a command runner and connected meters.
    pub fn new(settings: &Settings, runner: Box<dyn CommandRunner>, dmms: Vec<Dmm>) -> AppResult<Self> {
        if dmms.is_empty() {
            return Err(BenchError::Configuration("at least one DMM is required".to_string()));
        }
        let hci = HciCommands::new(&settings.basic.dut, &settings.basic.reference)?;
        let chip = settings.chip()?;
        let (enabled, skipped) = settings.partition_cases();
        let tables = dmms.iter().map(|d| ResultTable::new(d.sheet())).collect();
        let metadata = RunMetadataBuilder::new()
            .chip_version(chip.part_number())
            .interfaces(hci.dut(), hci.reference())
            .build();

        Ok(Self {
            runner,
            dmms,
            hci,
            chip,
            power: settings.power_index_map()?,
            samples: settings.samples.clone(),
            dmm_settings: settings.dmm_settings(),
            settle_scale: settings.timing.settle_scale,
            enabled,
            skipped,
            addresses: None,
            tables,
            metadata,
        })
    }

    /// Cases that will run, in order.
    pub fn enabled_cases(&self) -> &[TestCase] {
        &self.enabled
    }

    /// Tables collected so far.
    pub fn tables(&self) -> &[ResultTable] {
        &self.tables
    }

    async fn settle(&self, secs: u32) {
        let scaled = f64::from(secs) * self.settle_scale;
        if scaled > 0.0 {
            tokio::time::sleep(Duration::from_secs_f64(scaled)).await;
        }
    }

    async fn exec(&self, script: &CommandScript) -> AppResult<()> {
        self.runner.run(&script.render()).await.map(|_| ())
    }

    /// Clear, label and configure every meter, recording its identity.
    pub async fn prepare(&mut self) -> AppResult<()> {
        let mut instruments = Vec::with_capacity(self.dmms.len());
        for dmm in &self.dmms {
            dmm.system_error().await?;
            dmm.clear().await?;
            dmm.display_text("Running...").await?;
            dmm.configure(&self.dmm_settings).await?;
            let idn = dmm.identify().await?;
            instruments.push((dmm.sheet().to_string(), idn));
        }
        self.metadata.instruments = instruments;
        Ok(())
    }

    /// Look up both BD addresses over SSH.
    pub async fn resolve_addresses(&mut self) -> AppResult<(BdAddr, BdAddr)> {
        let (dut, reference) =
            ssh::resolve_bd_addresses(self.runner.as_ref(), self.hci.dut(), self.hci.reference()).await?;
        self.metadata.dut_bd_address = dut.to_string();
        self.metadata.ref_bd_address = reference.to_string();
        self.addresses = Some((dut, reference));
        Ok((dut, reference))
    }

    /// Reset both radios, park the DUT in deep sleep with scans off, and set its power.
    pub async fn init_status(&self, level: PowerLevel) -> AppResult<()> {
        let pin = self.power.lookup(self.chip, level)?;
        tracing::debug!("Init status at {} dBm (pin {})", level, pin);
        let steps = [
            self.hci.reset(self.hci.dut()),
            self.hci.reset(self.hci.reference()),
            self.hci.deep_sleep(),
            self.hci.noscan(),
            self.hci.set_power_level(pin),
        ];
        for script in &steps {
            self.exec(script).await?;
            self.settle(1).await;
        }
        Ok(())
    }

    /// Put the DUT into `case`'s state and wait for it to settle.
    pub async fn apply_case(&self, case: &TestCase) -> AppResult<()> {
        let (dut_addr, ref_addr) = self.addresses.ok_or_else(|| {
            BenchError::Configuration("BD addresses must be resolved before applying a case".to_string())
        })?;
        self.init_status(case.power).await?;
        self.settle(1).await;
        for step in case.plan(&self.hci, &dut_addr, &ref_addr) {
            tracing::debug!(
                "{}: {} s remote sleep, {} s settle",
                case.name,
                step.script.remote_sleep_secs(),
                step.settle_secs
            );
            self.exec(&step.script).await?;
            self.settle(step.settle_secs).await;
        }
        Ok(())
    }

    /// Capture on every meter concurrently and append one column per table.
    pub async fn capture_all(&mut self, case_name: &str, spec: CaptureSpec) -> AppResult<()> {
        if self.tables.iter().any(|t| t.get(case_name).is_some()) {
            return Err(BenchError::DuplicateCase(case_name.to_string()));
        }

        let captures = try_join_all(self.dmms.iter().map(|dmm| capture_repeated(dmm, spec))).await?;

        for ((table, dmm), amps) in self.tables.iter_mut().zip(&self.dmms).zip(captures) {
            let stats = CaptureStats::from_amps(&amps)?.rounded();
            tracing::info!(
                sheet = dmm.sheet(),
                "{}: Average/Mean {:.3} mA, Max {:.3} mA, Min {:.3} mA, Sdev {:.3} mA, Count {}",
                case_name,
                stats.mean,
                stats.max,
                stats.min,
                stats.stdev,
                stats.count
            );
            table.add_column(case_name, stats)?;
        }
        Ok(())
    }

    async fn run_case(&mut self, case: &TestCase) -> AppResult<()> {
        tracing::info!("Measuring {}...", case.name);
        self.apply_case(case).await?;
        let spec = self.samples.spec(case.profile);
        self.capture_all(&case.name, spec).await?;
        self.metadata.executed_cases.push(case.name.clone());
        Ok(())
    }

    /// Query completion and error status, show "Complete..." and stamp the end time.
    pub async fn finish(&mut self) -> AppResult<()> {
        for dmm in &self.dmms {
            dmm.opc().await?;
            dmm.system_error().await?;
            dmm.display_text("Complete...").await?;
        }
        self.metadata.finish();
        Ok(())
    }

    /// Run every enabled case and return the joined tables.
    pub async fn run(mut self) -> AppResult<RunOutcome> {
        tracing::info!(
            "Chip version {}: {} cases enabled, {} skipped",
            self.chip,
            self.enabled.len(),
            self.skipped.len()
        );
        self.metadata.skipped_cases = self.skipped.iter().map(|c| c.name.clone()).collect();

        self.prepare().await?;
        self.resolve_addresses().await?;

        let cases = std::mem::take(&mut self.enabled);
        for case in &cases {
            let span = tracing::info_span!("case", name = %case.name);
            self.run_case(case).instrument(span).await?;
        }
        self.enabled = cases;

        // Leave the radios quiet.
        self.init_status(PowerLevel::Zero).await?;
        self.finish().await?;

        Ok(RunOutcome {
            tables: self.tables,
            metadata: self.metadata,
        })
    }
}

async fn capture_repeated(dmm: &Dmm, spec: CaptureSpec) -> AppResult<Vec<f64>> {
    let mut amps = Vec::new();
    for _ in 0..spec.repeat_count {
        amps.extend(dmm.capture(spec.trigger_count, spec.sample_count).await?);
    }
    Ok(amps)
}
