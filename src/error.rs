//! Custom error types for the bench.
//!
//! This module defines the primary error type, `BenchError`, used across the crate.
//! Using the `thiserror` crate, it provides one consistent way to report the things
//! that can go wrong during a characterization run, from a bad `config.ini` to an
//! instrument that answers with garbage.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from the `config` crate (file missing, INI syntax,
//!   a value that cannot be deserialized into the expected type).
//! - **`Configuration`**: Semantic errors in the configuration, such as an unknown
//!   chip version or a DMM count larger than the number of VISA addresses.
//! - **`Io`**: Wraps `std::io::Error`, covering file and socket I/O.
//! - **`Ssh`**: Errors from the `ssh2` session (handshake, auth, channel exec).
//! - **`Instrument`**: DMM communication failures and unparseable readings.
//! - **`Processing`**: Statistics could not be computed (e.g. no samples).
//! - **`DuplicateCase`**: A test-case column was added twice to the same table.
//! - **`Workbook`** / **`Report`**: Writing the `.xlsx` workbook or the CSV export failed.
//! - **`FeatureNotEnabled`**: Functionality compiled out via feature flags.
//!
//! There is no retry or recovery layer: every variant aborts the run.

use thiserror::Error;

/// Convenience alias for results using the bench error type.
pub type AppResult<T> = std::result::Result<T, BenchError>;

/// Everything that can end a run.
#[derive(Error, Debug)]
pub enum BenchError {
    /// The configuration could not be read or deserialized.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// A configuration value is present but not acceptable.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// File or socket I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The SSH session failed.
    #[error("SSH error: {0}")]
    Ssh(#[from] ssh2::Error),

    /// A meter failed to answer or answered with something unusable.
    #[error("Instrument error: {0}")]
    Instrument(String),

    /// Statistics could not be computed.
    #[error("Data processing error: {0}")]
    Processing(String),

    /// A column with this case name already exists.
    #[error("Test case '{0}' already has a column in this table")]
    DuplicateCase(String),

    /// The workbook could not be built or saved.
    #[cfg(feature = "storage_xlsx")]
    #[error("Workbook error: {0}")]
    Workbook(#[from] rust_xlsxwriter::XlsxError),

    /// The CSV export failed.
    #[cfg(feature = "storage_csv")]
    #[error("Report error: {0}")]
    Report(#[from] csv::Error),

    /// The operation needs a cargo feature this build does not have.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl BenchError {
    /// True for errors caused by the configuration rather than by hardware.
    ///
    /// The binary uses this to pick the log message; both kinds exit nonzero.
    pub fn is_configuration(&self) -> bool {
        matches!(self, BenchError::Config(_) | BenchError::Configuration(_))
    }
}
