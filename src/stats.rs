//! Summary statistics for one capture.

use crate::error::{AppResult, BenchError};
use serde::{Deserialize, Serialize};

/// Decimal places kept in the report.
pub const PRECISION: i32 = 3;

/// Statistics of one capture, in milliamperes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureStats {
    /// Arithmetic mean.
    pub mean: f64,
    /// Largest sample.
    pub max: f64,
    /// Smallest sample.
    pub min: f64,
    /// Population standard deviation.
    pub stdev: f64,
    /// Number of samples.
    pub count: usize,
    /// Every sample, in capture order.
    pub raw: Vec<f64>,
}

impl CaptureStats {
    /// Convert ampere readings to mA and summarize them.
    pub fn from_amps(samples: &[f64]) -> AppResult<Self> {
        if samples.is_empty() {
            return Err(BenchError::Processing(
                "cannot compute statistics of an empty capture".to_string(),
            ));
        }
        let raw: Vec<f64> = samples.iter().map(|a| a * 1000.0).collect();
        let n = raw.len() as f64;
        let mean = raw.iter().sum::<f64>() / n;
        let variance = raw.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        let max = raw.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = raw.iter().copied().fold(f64::INFINITY, f64::min);

        Ok(Self {
            mean,
            max,
            min,
            stdev: variance.sqrt(),
            count: raw.len(),
            raw,
        })
    }

    /// Copy with mean/max/min/stdev rounded to [`PRECISION`] decimals.
    #[must_use]
    pub fn rounded(&self) -> Self {
        Self {
            mean: round_to(self.mean, PRECISION),
            max: round_to(self.max, PRECISION),
            min: round_to(self.min, PRECISION),
            stdev: round_to(self.stdev, PRECISION),
            count: self.count,
            raw: self.raw.clone(),
        }
    }

    /// Raw samples as a comma-separated cell.
    pub fn raw_cell(&self) -> String {
        self.raw
            .iter()
            .map(f64::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn converts_to_milliamps_and_summarizes() {
        let s = CaptureStats::from_amps(&[0.001, 0.002, 0.003]).unwrap().rounded();
        assert!(close(s.mean, 2.0));
        assert!(close(s.max, 3.0));
        assert!(close(s.min, 1.0));
        // population stdev of [1, 2, 3] = sqrt(2/3)
        assert!(close(s.stdev, 0.816));
        assert_eq!(s.count, 3);
    }

    #[test]
    fn rounds_to_three_places() {
        let s = CaptureStats::from_amps(&[0.0012341, 0.0012367]).unwrap().rounded();
        assert!(close(s.mean, 1.235));
        assert!(close(s.max, 1.237));
        assert!(close(s.min, 1.234));
        assert!(close(s.stdev, 0.001));
    }

    #[test]
    fn zero_samples_are_counted() {
        let s = CaptureStats::from_amps(&[0.0, 0.0, 0.004]).unwrap();
        assert_eq!(s.count, 3);
        assert_eq!(s.raw.len(), 3);
    }

    #[test]
    fn single_sample_has_zero_stdev() {
        let s = CaptureStats::from_amps(&[0.0425]).unwrap().rounded();
        assert!(close(s.mean, 42.5));
        assert!(close(s.stdev, 0.0));
    }

    #[test]
    fn empty_capture_is_a_processing_error() {
        match CaptureStats::from_amps(&[]) {
            Err(BenchError::Processing(_)) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn count_includes_zero_readings() {
        let s = CaptureStats::from_amps(&[0.0, 0.0, 0.004]).unwrap();
        assert_eq!(s.count, 3);
        assert!((s.min - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn raw_cell_joins_samples() {
        let s = CaptureStats::from_amps(&[0.001, 0.002]).unwrap();
        assert_eq!(s.raw_cell(), "1,2");
    }
}
