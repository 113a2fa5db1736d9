//! Chip versions, transmit power levels and the pin-power index lookup.
//!
//! Every supported chip exposes the same three power levels, but the vendor HCI
//! command that selects a level takes a chip-specific "pin" index byte. Those bytes
//! live in `config.ini`, one section per chip:
//!
//! ```ini
//! [robin3_8977_power_index]
//! 0_dbm_pin = 0C
//! 4_dbm_pin = 10
//! max_dbm_pin = 17
//! ```

use crate::error::{AppResult, BenchError};
use crate::validation;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Chip family under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChipVersion {
    /// Robin3 (88W8977)
    Robin3_8977,
    /// KF2 (88W8997)
    Kf2_8997,
    /// CA2 (88W8987)
    Ca2_8987,
}

impl ChipVersion {
    /// All supported chips, in configuration order.
    pub const ALL: [ChipVersion; 3] = [
        ChipVersion::Robin3_8977,
        ChipVersion::Kf2_8997,
        ChipVersion::Ca2_8987,
    ];

    /// Part number as written in `config.ini`.
    pub fn part_number(self) -> &'static str {
        match self {
            ChipVersion::Robin3_8977 => "8977",
            ChipVersion::Kf2_8997 => "8997",
            ChipVersion::Ca2_8987 => "8987",
        }
    }
}

impl fmt::Display for ChipVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.part_number())
    }
}

impl FromStr for ChipVersion {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChipVersion::ALL
            .into_iter()
            .find(|chip| chip.part_number() == s.trim())
            .ok_or_else(|| {
                BenchError::Configuration(format!(
                    "Invalid chip version '{}'. Must be one of: 8977, 8997, 8987",
                    s
                ))
            })
    }
}

/// Transmit power level a case runs at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PowerLevel {
    /// 0 dBm
    Zero,
    /// 4 dBm
    Four,
    /// Chip maximum (12.5 dBm on the first chips characterized)
    Max,
}

impl PowerLevel {
    /// Levels swept by the power-dependent cases.
    pub const SWEEP: [PowerLevel; 3] = [PowerLevel::Zero, PowerLevel::Four, PowerLevel::Max];

    /// Label used in configuration and on the command line.
    pub fn label(self) -> &'static str {
        match self {
            PowerLevel::Zero => "0",
            PowerLevel::Four => "4",
            PowerLevel::Max => "Max",
        }
    }

    /// Suffix used in test-case column names, e.g. `4dBm`.
    pub fn dbm_suffix(self) -> String {
        format!("{}dBm", self.label())
    }
}

impl fmt::Display for PowerLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for PowerLevel {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0" => Ok(PowerLevel::Zero),
            "4" => Ok(PowerLevel::Four),
            "max" | "12.5" => Ok(PowerLevel::Max),
            other => Err(BenchError::Configuration(format!(
                "Invalid power level '{}'. Must be one of: 0, 4, Max",
                other
            ))),
        }
    }
}

/// Pin-power index bytes for one chip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerIndexTable {
    /// Index byte for 0 dBm.
    #[serde(rename = "0_dbm_pin")]
    pub pin_0dbm: String,
    /// Index byte for 4 dBm.
    #[serde(rename = "4_dbm_pin")]
    pub pin_4dbm: String,
    /// Index byte for the chip's maximum level.
    #[serde(rename = "max_dbm_pin")]
    pub pin_max: String,
}

impl PowerIndexTable {
    /// Pin byte for `level`.
    pub fn pin(&self, level: PowerLevel) -> &str {
        match level {
            PowerLevel::Zero => &self.pin_0dbm,
            PowerLevel::Four => &self.pin_4dbm,
            PowerLevel::Max => &self.pin_max,
        }
    }

    fn validate(&self, chip: ChipVersion) -> AppResult<()> {
        for level in PowerLevel::SWEEP {
            validation::is_hex_byte(self.pin(level).trim()).map_err(|e| {
                BenchError::Configuration(format!(
                    "Power index for chip {} at {} dBm is '{}': {}",
                    chip,
                    level,
                    self.pin(level),
                    e
                ))
            })?;
        }
        Ok(())
    }
}

/// Static mapping from chip version and power level to a pin-power index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PowerIndexMap {
    tables: Vec<(ChipVersion, PowerIndexTable)>,
}

impl PowerIndexMap {
    /// Build the map, validating every pin byte.
    pub fn new(tables: Vec<(ChipVersion, PowerIndexTable)>) -> AppResult<Self> {
        for (chip, table) in &tables {
            table.validate(*chip)?;
        }
        Ok(Self { tables })
    }

    /// Pin-power index for `chip` at `level`.
    pub fn lookup(&self, chip: ChipVersion, level: PowerLevel) -> AppResult<&str> {
        self.tables
            .iter()
            .find(|(c, _)| *c == chip)
            .map(|(_, table)| table.pin(level).trim())
            .ok_or_else(|| {
                BenchError::Configuration(format!("No power index table for chip {}", chip))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(a: &str, b: &str, c: &str) -> PowerIndexTable {
        PowerIndexTable {
            pin_0dbm: a.to_string(),
            pin_4dbm: b.to_string(),
            pin_max: c.to_string(),
        }
    }

    fn sample_map() -> PowerIndexMap {
        PowerIndexMap::new(vec![
            (ChipVersion::Robin3_8977, table("0C", "10", "17")),
            (ChipVersion::Kf2_8997, table("0A", "0E", "15")),
            (ChipVersion::Ca2_8987, table("08", "0D", "14")),
        ])
        .unwrap()
    }

    #[test]
    fn lookup_returns_configured_pin() {
        let map = sample_map();
        assert_eq!(map.lookup(ChipVersion::Robin3_8977, PowerLevel::Zero).unwrap(), "0C");
        assert_eq!(map.lookup(ChipVersion::Kf2_8997, PowerLevel::Four).unwrap(), "0E");
        assert_eq!(map.lookup(ChipVersion::Ca2_8987, PowerLevel::Max).unwrap(), "14");
    }

    #[test]
    fn lookup_by_parsed_labels() {
        let map = sample_map();
        let chip: ChipVersion = "8997".parse().unwrap();
        assert_eq!(map.lookup(chip, "Max".parse().unwrap()).unwrap(), "15");
        let chip: ChipVersion = "8977".parse().unwrap();
        assert_eq!(map.lookup(chip, "12.5".parse().unwrap()).unwrap(), "17");
        assert!("8888".parse::<ChipVersion>().is_err());
        assert!("7".parse::<PowerLevel>().is_err());
    }

    #[test]
    fn missing_chip_table_is_an_error() {
        let map = PowerIndexMap::new(vec![(ChipVersion::Kf2_8997, table("0A", "0E", "15"))]).unwrap();
        assert!(map.lookup(ChipVersion::Robin3_8977, PowerLevel::Zero).is_err());
    }

    #[test]
    fn invalid_pin_bytes_rejected() {
        let err = PowerIndexMap::new(vec![(ChipVersion::Ca2_8987, table("08", "XYZ", "14"))])
            .unwrap_err();
        assert!(err.to_string().contains("8987"));
    }

    #[test]
    fn level_labels_and_suffixes() {
        assert_eq!(PowerLevel::Max.dbm_suffix(), "MaxdBm");
        assert_eq!("max".parse::<PowerLevel>().unwrap(), PowerLevel::Max);
        assert_eq!(ChipVersion::Ca2_8987.to_string(), "8987");
    }
}
