//! The test-case catalogue.
//!
//! Every case is one column in the report. A case names the radio state to
//! reach, the transmit power to reach it at, and the sampling profile used while
//! it is held. Case names double as configuration keys (lowercased) in the
//! `[test_case]` section.

use crate::hci::{BdAddr, CommandScript, HciCommands, LeScanInterval, ScoPacket, SniffInterval};
use crate::power::PowerLevel;
use serde::Serialize;
use std::fmt;

/// Which enable switch gates a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CaseGroup {
    /// Always measured.
    Baseline,
    /// Gated by `bt_enable`.
    Bt,
    /// Gated by `ble_enable`.
    Ble,
}

/// How the current waveform looks, which decides the capture length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SampleProfile {
    /// Steady current.
    Flat,
    /// Periodic bursts on a quiet floor.
    Pulse,
    /// Continuous radio activity.
    Active,
}

impl fmt::Display for SampleProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SampleProfile::Flat => "flat",
            SampleProfile::Pulse => "pulse",
            SampleProfile::Active => "active",
        })
    }
}

/// Radio state held during a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DutState {
    DeepSleep,
    Idle,
    Pscan,
    Iscan,
    PIscan,
    /// ACL link in sniff mode, DUT as master.
    AclSniff(SniffInterval),
    /// SCO/eSCO on top of a 1.28 s sniff link.
    Sco(ScoPacket),
    BleAdv,
    BleScan(LeScanInterval),
    BleConnection,
}

/// A script and the time to wait after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanStep {
    /// Script to run.
    pub script: CommandScript,
    /// Local settle time after the script returns, in seconds.
    pub settle_secs: u32,
}

/// One column of the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestCase {
    /// Column label, e.g. `BT_ACL_Sniff_1dot28s_Master_4dBm`.
    pub name: String,
    /// Enable group.
    pub group: CaseGroup,
    /// State to reach.
    pub state: DutState,
    /// Transmit power applied during init.
    pub power: PowerLevel,
    /// Sampling profile.
    pub profile: SampleProfile,
}

impl TestCase {
    fn new(name: impl Into<String>, group: CaseGroup, state: DutState, power: PowerLevel, profile: SampleProfile) -> Self {
        Self {
            name: name.into(),
            group,
            state,
            power,
            profile,
        }
    }

    /// Key of the per-case enable flag in `[test_case]`.
    pub fn config_key(&self) -> String {
        self.name.to_ascii_lowercase()
    }

    /// Scripts that take the DUT from init status to this case's state.
    pub fn plan(&self, hci: &HciCommands, dut_addr: &BdAddr, ref_addr: &BdAddr) -> Vec<PlanStep> {
        let step = |script: CommandScript, settle_secs: u32| PlanStep { script, settle_secs };
        match self.state {
            DutState::DeepSleep => Vec::new(),
            DutState::Idle => vec![step(hci.idle(), 2)],
            DutState::Pscan => vec![step(hci.pscan(), 2)],
            DutState::Iscan => vec![step(hci.iscan(), 2)],
            DutState::PIscan => vec![step(hci.piscan(), 2)],
            DutState::AclSniff(interval) => {
                vec![step(hci.acl_sniff_master(interval, dut_addr, ref_addr), 2)]
            }
            DutState::Sco(packet) => vec![
                step(hci.acl_sniff_master(SniffInterval::Ms1280, dut_addr, ref_addr), 2 + 1),
                step(hci.sco(packet, ref_addr), 5),
            ],
            DutState::BleAdv => vec![step(hci.ble_adv_1dot28s_3channel(true), 2)],
            DutState::BleScan(interval) => vec![step(hci.ble_scan(interval, true), 2)],
            DutState::BleConnection => vec![step(hci.ble_connection_1dot28s(ref_addr), 10)],
        }
    }
}

fn swept(
    cases: &mut Vec<TestCase>,
    stem: &str,
    group: CaseGroup,
    state: DutState,
    profile: SampleProfile,
) {
    for level in PowerLevel::SWEEP {
        cases.push(TestCase::new(
            format!("{}_{}", stem, level.dbm_suffix()),
            group,
            state,
            level,
            profile,
        ));
    }
}

/// All cases in execution order. `Deep_Sleep` is always first.
pub fn catalogue() -> Vec<TestCase> {
    use CaseGroup::*;
    use SampleProfile::*;
    let zero = PowerLevel::Zero;

    let mut cases = vec![
        TestCase::new("Deep_Sleep", Baseline, DutState::DeepSleep, zero, Flat),
        TestCase::new("BT_Idle", Bt, DutState::Idle, zero, Flat),
        TestCase::new("BT_Pscan", Bt, DutState::Pscan, zero, Pulse),
        TestCase::new("BT_Iscan", Bt, DutState::Iscan, zero, Pulse),
        TestCase::new("BT_PIscan", Bt, DutState::PIscan, zero, Pulse),
    ];
    swept(&mut cases, "BT_ACL_Sniff_1dot28s_Master", Bt, DutState::AclSniff(SniffInterval::Ms1280), Pulse);
    swept(&mut cases, "BT_ACL_Sniff_0dot5s_Master", Bt, DutState::AclSniff(SniffInterval::Ms500), Pulse);
    swept(&mut cases, "BT_SCO_HV3_Master", Bt, DutState::Sco(ScoPacket::Hv3), Active);
    swept(&mut cases, "BT_SCO_EV3_Master", Bt, DutState::Sco(ScoPacket::Ev3), Active);
    swept(&mut cases, "BLE_Adv_1dot28s_3Channel", Ble, DutState::BleAdv, Pulse);
    cases.push(TestCase::new("BLE_Scan_1dot28s", Ble, DutState::BleScan(LeScanInterval::Ms1280), zero, Pulse));
    cases.push(TestCase::new("BLE_Scan_1s", Ble, DutState::BleScan(LeScanInterval::Ms1000), zero, Pulse));
    cases.push(TestCase::new("BLE_Scan_10ms", Ble, DutState::BleScan(LeScanInterval::Ms10), zero, Active));
    swept(&mut cases, "BLE_Conn_1dot28s", Ble, DutState::BleConnection, Pulse);
    cases
}
