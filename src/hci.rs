//! `hcitool` / `hciconfig` command scripts that put the radios into a given state.
//!
//! Each builder returns a [`CommandScript`]: an ordered list of shell commands and
//! `sleep` lines. The script is rendered as newline-separated text and executed in a
//! single SSH exec on the host that owns both HCI interfaces, so the remote shell
//! does the inter-command pacing.
//!
//! The byte templates are vendor HCI commands (OGF `0x3F`) and standard LE
//! commands (OGF `0x08`). They are reproduced verbatim; the only substitutions are
//! interface names, BD addresses, the power pin byte and enable flags.

use crate::error::{AppResult, BenchError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// LE advertising / scan-response payload: 31 bytes of filler.
const LE_PAYLOAD: &str = "1F 00 99 88 77 66 55 44 33 22 11 00 99 88 77 66 55 44 33 22 11 00 99 88 77 66 55 44 33 22 11 00";

/// LE Set Advertising Parameters, 1.28 s interval, channel map 0x07.
fn le_adv_params(adv_type: u8) -> String {
    format!("08 06 00 08 00 08 {:02X} 00 00 BC 9A 78 56 34 12 07 00", adv_type)
}

/// Bluetooth device address, e.g. `00:50:43:21:0A:7C`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BdAddr([u8; 6]);

impl BdAddr {
    /// Space-separated bytes in HCI wire (little-endian) order: `7C 0A 21 43 50 00`.
    pub fn le_bytes(&self) -> String {
        self.0
            .iter()
            .rev()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}", a, b, c, d, e, g)
    }
}

impl FromStr for BdAddr {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BenchError::Configuration(format!("Invalid BD address '{}'", s));
        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() != 6 {
            return Err(invalid());
        }
        let mut bytes = [0u8; 6];
        for (slot, part) in bytes.iter_mut().zip(parts) {
            if part.len() != 2 {
                return Err(invalid());
            }
            *slot = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        Ok(BdAddr(bytes))
    }
}

/// One line of a command script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Shell command run on the remote host.
    Exec(String),
    /// Remote `sleep <secs>`.
    Sleep(u32),
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Exec(cmd) => f.write_str(cmd),
            Step::Sleep(secs) => write!(f, "sleep {}", secs),
        }
    }
}

/// Ordered commands sent as one SSH exec.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandScript {
    steps: Vec<Step>,
}

impl CommandScript {
    /// Empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a command.
    pub fn exec(mut self, cmd: impl Into<String>) -> Self {
        self.steps.push(Step::Exec(cmd.into()));
        self
    }

    /// Append a remote sleep.
    pub fn sleep(mut self, secs: u32) -> Self {
        self.steps.push(Step::Sleep(secs));
        self
    }

    /// Sum of the remote sleeps, in seconds.
    pub fn remote_sleep_secs(&self) -> u32 {
        self.steps
            .iter()
            .map(|step| match step {
                Step::Sleep(secs) => *secs,
                Step::Exec(_) => 0,
            })
            .sum()
    }

    /// Newline-joined text passed to the remote shell.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CommandScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{}", step)?;
        }
        Ok(())
    }
}

/// Sniff interval for an ACL link in master role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SniffInterval {
    /// 1.28 s (0x0800 slots)
    Ms1280,
    /// 0.5 s (0x0320 slots)
    Ms500,
}

impl SniffInterval {
    fn slots(self) -> &'static str {
        match self {
            SniffInterval::Ms1280 => "0x0800",
            SniffInterval::Ms500 => "0x0320",
        }
    }
}

/// Synchronous link packet type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScoPacket {
    /// SCO HV3
    Hv3,
    /// eSCO EV3
    Ev3,
}

impl ScoPacket {
    fn packet_type(self) -> &'static str {
        match self {
            ScoPacket::Hv3 => "03C4",
            ScoPacket::Ev3 => "03C8",
        }
    }
}

/// LE scan interval/window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LeScanInterval {
    /// 1.28 s interval
    Ms1280,
    /// 1 s interval
    Ms1000,
    /// 10 ms interval
    Ms10,
}

impl LeScanInterval {
    fn interval_bytes(self) -> &'static str {
        match self {
            LeScanInterval::Ms1280 => "00 08",
            LeScanInterval::Ms1000 => "40 06",
            LeScanInterval::Ms10 => "10 00",
        }
    }
}

/// Command builders bound to the DUT and reference interfaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HciCommands {
    dut: String,
    reference: String,
}

impl HciCommands {
    /// Bind to DUT and REF interface names (`hci0`, `hci1`, ...).
    pub fn new(dut: impl Into<String>, reference: impl Into<String>) -> AppResult<Self> {
        let dut = dut.into().trim().to_string();
        let reference = reference.into().trim().to_string();
        if dut == reference {
            return Err(BenchError::Configuration(format!(
                "DUT and REF must be different interfaces, both are '{}'",
                dut
            )));
        }
        Ok(Self { dut, reference })
    }

    /// DUT interface name.
    pub fn dut(&self) -> &str {
        &self.dut
    }

    /// Reference interface name.
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// `hciconfig <iface> reset`
    pub fn reset(&self, iface: &str) -> CommandScript {
        CommandScript::new().exec(format!("hciconfig {} reset", iface))
    }

    /// Vendor command: enter deep sleep.
    pub fn deep_sleep(&self) -> CommandScript {
        CommandScript::new().exec(format!("hcitool -i {} cmd 3F 23 02", self.dut))
    }

    /// Vendor command: leave deep sleep and idle.
    pub fn idle(&self) -> CommandScript {
        CommandScript::new().exec(format!("hcitool -i {} cmd 3F 23 01", self.dut))
    }

    /// Disable page and inquiry scan.
    pub fn noscan(&self) -> CommandScript {
        self.hciconfig_dut("noscan")
    }

    /// Page scan only.
    pub fn pscan(&self) -> CommandScript {
        self.hciconfig_dut("pscan")
    }

    /// Inquiry scan only.
    pub fn iscan(&self) -> CommandScript {
        self.hciconfig_dut("iscan")
    }

    /// Page and inquiry scan.
    pub fn piscan(&self) -> CommandScript {
        self.hciconfig_dut("piscan")
    }

    fn hciconfig_dut(&self, mode: &str) -> CommandScript {
        CommandScript::new().exec(format!("hciconfig {} {}", self.dut, mode))
    }

    /// Vendor power-table select followed by the pin-power index for the level.
    pub fn set_power_level(&self, pin: &str) -> CommandScript {
        CommandScript::new()
            .exec(format!(
                "hcitool -i {} cmd 3F 64 9F 01 01 04 00 00 00 00 00 00",
                self.dut
            ))
            .sleep(1)
            .exec(format!(
                "hcitool -i {} cmd 3F 64 B1 01 01 {} 00 00 00 00 00 00",
                self.dut, pin
            ))
    }

    /// ACL link with the DUT as master, then sniff mode at `interval`.
    pub fn acl_sniff_master(
        &self,
        interval: SniffInterval,
        dut_addr: &BdAddr,
        ref_addr: &BdAddr,
    ) -> CommandScript {
        CommandScript::new()
            .exec(format!("hcitool -i {} cc --role=m {}", self.dut, ref_addr))
            .sleep(1)
            .exec(format!("hcitool -i {} hcon -t acl {}", self.dut, ref_addr))
            .sleep(1)
            .exec(format!("hcitool -i {} hcon -t acl {}", self.reference, dut_addr))
            .sleep(2)
            .exec(format!(
                "hcitool -i {} sniff {} {} {} 0x01 0x00",
                self.dut,
                ref_addr,
                interval.slots(),
                interval.slots()
            ))
    }

    /// Synchronous connection on top of an existing ACL link.
    pub fn sco(&self, packet: ScoPacket, ref_addr: &BdAddr) -> CommandScript {
        CommandScript::new().exec(format!(
            "hcitool -i {} scc {} 1F40 1F40 0007 60 00 {}",
            self.dut,
            ref_addr,
            packet.packet_type()
        ))
    }

    /// Non-connectable advertising on all three channels, 1.28 s interval.
    pub fn ble_adv_1dot28s_3channel(&self, enable: bool) -> CommandScript {
        CommandScript::new()
            .exec(format!("hcitool -i {} cmd {}", self.dut, le_adv_params(0x03)))
            .sleep(1)
            .exec(format!("hcitool -i {} cmd 08 08 {}", self.dut, LE_PAYLOAD))
            .sleep(1)
            .exec(format!(
                "hcitool -i {} cmd 0x08 0x0A 0x0{}",
                self.dut,
                u8::from(enable)
            ))
    }

    /// Passive LE scan at `interval`.
    pub fn ble_scan(&self, interval: LeScanInterval, enable: bool) -> CommandScript {
        CommandScript::new()
            .exec(format!("hcitool -i {} cmd 08 09 {}", self.dut, LE_PAYLOAD))
            .sleep(1)
            .exec(format!(
                "hcitool -i {} cmd 08 0B 01 {} 10 00 00 00",
                self.dut,
                interval.interval_bytes()
            ))
            .sleep(1)
            .exec(format!(
                "hcitool -i {} cmd 08 0C 01 0{}",
                self.dut,
                u8::from(enable)
            ))
    }

    /// LE connection at 1.28 s interval: REF advertises, DUT initiates.
    pub fn ble_connection_1dot28s(&self, ref_addr: &BdAddr) -> CommandScript {
        CommandScript::new()
            .exec(format!(
                "hcitool -i {} cmd {}",
                self.reference,
                le_adv_params(0x00)
            ))
            .sleep(1)
            .exec(format!("hcitool -i {} cmd 08 08 {}", self.reference, LE_PAYLOAD))
            .sleep(1)
            .exec(format!("hcitool -i {} cmd 0x08 0x0A 0x01", self.reference))
            .sleep(1)
            .exec(format!("hcitool -i {} cmd 08 09 {}", self.dut, LE_PAYLOAD))
            .sleep(1)
            .exec(format!("hcitool -i {} cmd 08 0B 01 10 00 10 00 00 00", self.dut))
            .sleep(1)
            .exec(format!("hcitool -i {} cmd 08 0C 01 01", self.dut))
            .sleep(2)
            .exec(format!("hcitool -i {} cmd 08 0C 01 00", self.dut))
            .sleep(2)
            .exec(format!(
                "hcitool -i {} cmd 08 0D 10 00 10 00 00 00 {} 00 00 04 00 04 00 00 00 08 10 00 10 00",
                self.dut,
                ref_addr.le_bytes()
            ))
            .sleep(2)
            .exec(format!(
                "hcitool -i {} cmd 08 13 80 00 00 04 00 04 00 00 00 08 10 00 10 00",
                self.dut
            ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmds() -> HciCommands {
        HciCommands::new("hci0", "hci1").unwrap()
    }

    fn dut_addr() -> BdAddr {
        "00:50:43:21:0A:7C".parse().unwrap()
    }

    fn ref_addr() -> BdAddr {
        "00:50:43:9a:bc:de".parse().unwrap()
    }

    #[test]
    fn simple_state_commands() {
        let c = cmds();
        assert_eq!(c.reset("hci1").render(), "hciconfig hci1 reset");
        assert_eq!(c.deep_sleep().render(), "hcitool -i hci0 cmd 3F 23 02");
        assert_eq!(c.idle().render(), "hcitool -i hci0 cmd 3F 23 01");
        assert_eq!(c.noscan().render(), "hciconfig hci0 noscan");
        assert_eq!(c.pscan().render(), "hciconfig hci0 pscan");
        assert_eq!(c.iscan().render(), "hciconfig hci0 iscan");
        assert_eq!(c.piscan().render(), "hciconfig hci0 piscan");
    }

    #[test]
    fn set_power_level_script() {
        assert_eq!(
            cmds().set_power_level("0C").render(),
            "hcitool -i hci0 cmd 3F 64 9F 01 01 04 00 00 00 00 00 00\n\
             sleep 1\n\
             hcitool -i hci0 cmd 3F 64 B1 01 01 0C 00 00 00 00 00 00"
        );
    }

    #[test]
    fn acl_sniff_scripts() {
        let expected = "hcitool -i hci0 cc --role=m 00:50:43:9A:BC:DE\n\
                        sleep 1\n\
                        hcitool -i hci0 hcon -t acl 00:50:43:9A:BC:DE\n\
                        sleep 1\n\
                        hcitool -i hci1 hcon -t acl 00:50:43:21:0A:7C\n\
                        sleep 2\n\
                        hcitool -i hci0 sniff 00:50:43:9A:BC:DE 0x0800 0x0800 0x01 0x00";
        let script = cmds().acl_sniff_master(SniffInterval::Ms1280, &dut_addr(), &ref_addr());
        assert_eq!(script.render(), expected);
        assert_eq!(script.remote_sleep_secs(), 4);

        let half = cmds()
            .acl_sniff_master(SniffInterval::Ms500, &dut_addr(), &ref_addr())
            .render();
        assert!(half.ends_with("sniff 00:50:43:9A:BC:DE 0x0320 0x0320 0x01 0x00"));
    }

    #[test]
    fn sco_scripts() {
        assert_eq!(
            cmds().sco(ScoPacket::Hv3, &ref_addr()).render(),
            "hcitool -i hci0 scc 00:50:43:9A:BC:DE 1F40 1F40 0007 60 00 03C4"
        );
        assert_eq!(
            cmds().sco(ScoPacket::Ev3, &ref_addr()).render(),
            "hcitool -i hci0 scc 00:50:43:9A:BC:DE 1F40 1F40 0007 60 00 03C8"
        );
    }

    #[test]
    fn ble_adv_script() {
        let expected = format!(
            "hcitool -i hci0 cmd 08 06 00 08 00 08 03 00 00 BC 9A 78 56 34 12 07 00\n\
             sleep 1\n\
             hcitool -i hci0 cmd 08 08 {}\n\
             sleep 1\n\
             hcitool -i hci0 cmd 0x08 0x0A 0x01",
            LE_PAYLOAD
        );
        assert_eq!(cmds().ble_adv_1dot28s_3channel(true).render(), expected);
        assert!(cmds()
            .ble_adv_1dot28s_3channel(false)
            .render()
            .ends_with("cmd 0x08 0x0A 0x00"));
    }

    #[test]
    fn ble_scan_scripts() {
        let s = cmds().ble_scan(LeScanInterval::Ms1000, true).render();
        let lines: Vec<&str> = s.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], format!("hcitool -i hci0 cmd 08 09 {}", LE_PAYLOAD));
        assert_eq!(lines[2], "hcitool -i hci0 cmd 08 0B 01 40 06 10 00 00 00");
        assert_eq!(lines[4], "hcitool -i hci0 cmd 08 0C 01 01");

        let fast = cmds().ble_scan(LeScanInterval::Ms10, false).render();
        assert!(fast.contains("cmd 08 0B 01 10 00 10 00 00 00"));
        assert!(fast.ends_with("cmd 08 0C 01 00"));

        let slow = cmds().ble_scan(LeScanInterval::Ms1280, true).render();
        assert!(slow.contains("cmd 08 0B 01 00 08 10 00 00 00"));
    }

    #[test]
    fn ble_connection_uses_reversed_ref_address() {
        let s = cmds().ble_connection_1dot28s(&ref_addr()).render();
        let lines: Vec<&str> = s.lines().collect();
        assert_eq!(
            lines[0],
            "hcitool -i hci1 cmd 08 06 00 08 00 08 00 00 00 BC 9A 78 56 34 12 07 00"
        );
        assert_eq!(lines[4], "hcitool -i hci1 cmd 0x08 0x0A 0x01");
        assert_eq!(
            lines[14],
            "hcitool -i hci0 cmd 08 0D 10 00 10 00 00 00 DE BC 9A 43 50 00 00 00 04 00 04 00 00 00 08 10 00 10 00"
        );
        assert_eq!(
            lines[16],
            "hcitool -i hci0 cmd 08 13 80 00 00 04 00 04 00 00 00 08 10 00 10 00"
        );
    }

    #[test]
    fn bd_addr_parsing() {
        let addr: BdAddr = " 00:50:43:9a:bc:de ".parse().unwrap();
        assert_eq!(addr.to_string(), "00:50:43:9A:BC:DE");
        assert_eq!(addr.le_bytes(), "DE BC 9A 43 50 00");
        assert!("00:50:43:9a:bc".parse::<BdAddr>().is_err());
        assert!("00:50:43:9a:bc:zz".parse::<BdAddr>().is_err());
        assert!("0:50:43:9a:bc:de".parse::<BdAddr>().is_err());
    }

    #[test]
    fn same_interface_rejected() {
        assert!(HciCommands::new("hci0", "hci0").is_err());
    }
}
