//! # Bluetooth Current Bench
//!
//! Automated RF current-consumption characterization of a Bluetooth/BLE chip. The
//! bench puts the device under test (DUT) and a reference radio (REF) into a series
//! of states with `hcitool`/`hciconfig` over SSH, captures supply current on up to
//! four LAN multimeters at the same time, and writes one worksheet of statistics
//! per meter.
//!
//! ## Crate Structure
//!
//! - **`config`**: INI configuration with environment overrides and validation.
//! - **`error`**: The `BenchError` enum and `AppResult` alias.
//! - **`logging`**: `tracing` subscriber setup (console plus optional log file).
//! - **`validation`**: Small reusable validators for configuration values.
//! - **`power`**: Chip versions, power levels and the pin-power index lookup.
//! - **`hci`**: BD addresses and the HCI command-script builders.
//! - **`ssh`**: Remote command execution and `hciconfig` parsing.
//! - **`scpi`**: VISA resource parsing and SCPI transports (TCP and mock).
//! - **`dmm`**: The multimeter driver.
//! - **`stats`**: Capture statistics.
//! - **`cases`**: The test-case catalogue.
//! - **`bench`**: The sequencer that ties everything together.
//! - **`report`**: Result tables and the CSV workbook writer.
//! - **`metadata`**: Run metadata for the `Version` sheet.

pub mod bench;
pub mod cases;
pub mod config;
pub mod dmm;
pub mod error;
pub mod hci;
pub mod logging;
pub mod metadata;
pub mod power;
pub mod report;
pub mod scpi;
pub mod ssh;
pub mod stats;
pub mod validation;
