//! CLI entry point for bt-bench
//!
//! # Usage
//!
//! Run every enabled case and write the workbook:
//! ```bash
//! bt-bench run --config config.ini
//! ```
//!
//! Exercise the sequence against simulated hardware:
//! ```bash
//! bt-bench run --dry-run --json
//! ```

use anyhow::{Context, Result};
use bt_current_bench::bench::Bench;
use bt_current_bench::cases;
use bt_current_bench::config::Settings;
use bt_current_bench::dmm::Dmm;
use bt_current_bench::logging;
use bt_current_bench::report::{self, CsvExport, WorkbookWriter};
use bt_current_bench::scpi::{MockDmmTransport, TcpScpi};
use bt_current_bench::ssh::{self, CommandRunner, MockRunner, SshRunner};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "bt-bench")]
#[command(about = "Bluetooth/BLE current-consumption characterization bench", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = "config.ini")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every enabled case and write the workbook
    Run {
        /// Use simulated SSH host and meters; no sleeping
        #[arg(long)]
        dry_run: bool,

        /// Also print the result tables as JSON on stdout
        #[arg(long)]
        json: bool,
    },

    /// Load and validate the configuration, then list the cases that would run
    Check,

    /// List the full test-case catalogue
    Cases,

    /// Resolve DUT and REF BD addresses over SSH
    BdAddr,

    /// Query *IDN? and SYST:ERR? on every configured meter
    Idn,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Commands::Cases = cli.command {
        list_catalogue();
        return;
    }

    let settings = match Settings::load(&cli.config) {
        Ok(settings) => settings,
        Err(e) => {
            // Logging is configured from the file, so fall back to defaults here.
            if let Err(log_err) = logging::init(logging::TracingConfig::default()) {
                eprintln!("{}", log_err);
                eprintln!("Failed to load '{}': {}", cli.config.display(), e);
                std::process::exit(1);
            }
            if e.is_configuration() {
                tracing::error!("Invalid configuration in '{}': {}", cli.config.display(), e);
            } else {
                tracing::error!("Failed to load '{}': {}", cli.config.display(), e);
            }
            std::process::exit(1);
        }
    };

    if let Err(e) = logging::init_from_settings(&settings.logging) {
        eprintln!("{}", e);
        std::process::exit(1);
    }
    for key in settings.unknown_case_flags() {
        tracing::warn!("Unknown [test_case] flag '{}' is ignored", key);
    }

    let result = match cli.command {
        Commands::Run { dry_run, json } => run(settings, dry_run, json).await,
        Commands::Check => check(&settings),
        Commands::BdAddr => bd_addr(&settings).await,
        Commands::Idn => idn(&settings).await,
        Commands::Cases => Ok(()),
    };

    if let Err(e) = result {
        tracing::error!("{:#}", e);
        std::process::exit(1);
    }
}

fn list_catalogue() {
    for case in cases::catalogue() {
        println!(
            "{:<36} {:<9} {:>4} dBm  {}",
            case.name,
            format!("{:?}", case.group),
            case.power.label(),
            case.profile
        );
    }
}

fn check(settings: &Settings) -> Result<()> {
    let (enabled, skipped) = settings.partition_cases();
    println!("Configuration OK: chip {}", settings.chip()?);
    for (sheet, resource) in settings.instruments()? {
        println!("  {:<12} {}", sheet, resource);
    }
    println!("{} cases enabled:", enabled.len());
    for case in &enabled {
        let spec = settings.samples.spec(case.profile);
        println!(
            "  {:<36} {} x {} x {}",
            case.name, spec.trigger_count, spec.sample_count, spec.repeat_count
        );
    }
    println!("{} cases skipped", skipped.len());
    Ok(())
}

async fn connect_runner(settings: &Settings) -> Result<SshRunner> {
    SshRunner::connect(&settings.ssh)
        .await
        .with_context(|| format!("Failed to connect to SSH server {}", settings.ssh.host))
}

async fn connect_dmms(settings: &Settings) -> Result<Vec<Dmm>> {
    let timeout = Duration::from_millis(settings.dmm.timeout_ms);
    let mut dmms = Vec::new();
    for (sheet, resource) in settings.instruments()? {
        let transport = TcpScpi::connect(&resource, timeout)
            .await
            .with_context(|| format!("Failed to open {}", resource))?;
        dmms.push(Dmm::new(Box::new(transport), sheet));
    }
    Ok(dmms)
}

fn simulated(settings: &Settings) -> Result<(MockRunner, Vec<Dmm>)> {
    let runner = MockRunner::with_interfaces(&[
        (settings.basic.dut.trim(), "00:50:43:21:0A:7C"),
        (settings.basic.reference.trim(), "00:50:43:9A:BC:DE"),
    ]);
    let dmms = settings
        .instruments()?
        .into_iter()
        .enumerate()
        .map(|(i, (sheet, _))| {
            let base = 0.0005 * (i as f64 + 1.0);
            let transport = MockDmmTransport::new(sheet.clone(), vec![base, base * 1.2, base * 0.9]);
            Dmm::new(Box::new(transport), sheet)
        })
        .collect();
    Ok((runner, dmms))
}

async fn run(mut settings: Settings, dry_run: bool, json: bool) -> Result<()> {
    let (runner, dmms): (Box<dyn CommandRunner>, Vec<Dmm>) = if dry_run {
        tracing::info!("Dry run: simulated SSH host and meters");
        settings.timing.settle_scale = 0.0;
        let (runner, dmms) = simulated(&settings)?;
        (Box::new(runner), dmms)
    } else {
        let runner = connect_runner(&settings).await?;
        (Box::new(runner), connect_dmms(&settings).await?)
    };

    let started = std::time::Instant::now();
    tracing::info!("Program starts @ {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));

    let bench = Bench::new(&settings, runner, dmms)?;
    let outcome = bench.run().await?;

    let base = Path::new(&settings.output.dir);
    let stem = report::run_stem(&settings.output.name);
    let include_raw = settings.output.include_raw;
    let path = WorkbookWriter::create(base, &stem, include_raw)?.write_all(&outcome.tables, &outcome.metadata)?;
    if settings.output.csv_export {
        CsvExport::create(base, &stem, include_raw)?.write_all(&outcome.tables, &outcome.metadata)?;
    }

    tracing::info!(
        "Program ends @ {}, total running time {:.1?}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        started.elapsed()
    );
    tracing::info!("Results written to '{}'", path.display());

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    }
    Ok(())
}

async fn bd_addr(settings: &Settings) -> Result<()> {
    let runner = connect_runner(settings).await?;
    let (dut, reference) =
        ssh::resolve_bd_addresses(&runner, settings.basic.dut.trim(), settings.basic.reference.trim()).await?;
    println!("DUT {} {}", settings.basic.dut.trim(), dut);
    println!("REF {} {}", settings.basic.reference.trim(), reference);
    Ok(())
}

async fn idn(settings: &Settings) -> Result<()> {
    for dmm in connect_dmms(settings).await? {
        let id = dmm.identify().await?;
        let err = dmm.system_error().await?;
        println!("{:<12} {:<40} {}  [{}]", dmm.sheet(), dmm.resource(), id, err);
    }
    Ok(())
}
