//! Small validators shared by the configuration layer.

use std::net::IpAddr;
use std::ops::RangeInclusive;

/// Validates if a given string is a valid IP address.
///
/// # Arguments
///
/// * `ip` - The string to validate.
///
/// # Returns
///
/// * `Ok(())` if the IP address is valid.
/// * `Err(&'static str)` if the IP address is invalid.
pub fn is_valid_ip(ip: &str) -> Result<(), &'static str> {
    ip.parse::<IpAddr>().map(|_| ()).map_err(|_| "Invalid IP address")
}

/// Validates a host that is either an IP address or a plain DNS name.
pub fn is_valid_host(host: &str) -> Result<(), &'static str> {
    if is_valid_ip(host).is_ok() {
        return Ok(());
    }
    if host.is_empty() {
        return Err("Host cannot be empty");
    }
    let hostname_ok = host
        .split('.')
        .all(|label| !label.is_empty() && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
    if hostname_ok {
        Ok(())
    } else {
        Err("Invalid host name")
    }
}

/// Validates if a given value is within a specified numeric range.
///
/// # Arguments
///
/// * `value` - The value to validate.
/// * `range` - The inclusive range to validate against.
pub fn is_in_range<T: PartialOrd>(value: T, range: RangeInclusive<T>) -> Result<(), &'static str> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err("Value is outside the specified range")
    }
}

/// Validates if a given string is not empty (after trimming).
pub fn is_not_empty(value: &str) -> Result<(), &'static str> {
    if !value.trim().is_empty() {
        Ok(())
    } else {
        Err("Value cannot be empty")
    }
}

/// Validates an HCI interface name such as `hci0`.
pub fn is_hci_interface(name: &str) -> Result<(), &'static str> {
    match name.strip_prefix("hci") {
        Some(index) if !index.is_empty() && index.chars().all(|c| c.is_ascii_digit()) => Ok(()),
        _ => Err("HCI interface must look like 'hci<N>'"),
    }
}

/// Validates a single hex byte token as written into an HCI command (`0C`, `1f`).
pub fn is_hex_byte(token: &str) -> Result<(), &'static str> {
    if (1..=2).contains(&token.len()) && token.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err("Expected a one-byte hex token like '0C'")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ip_and_host() {
        assert!(is_valid_ip("192.168.1.10").is_ok());
        assert!(is_valid_ip("not-an-ip").is_err());
        assert!(is_valid_host("192.168.1.10").is_ok());
        assert!(is_valid_host("bench-pi.lab").is_ok());
        assert!(is_valid_host("").is_err());
        assert!(is_valid_host("bad host").is_err());
    }

    #[test]
    fn ranges_and_strings() {
        assert!(is_in_range(3, 1..=4).is_ok());
        assert!(is_in_range(5, 1..=4).is_err());
        assert!(is_not_empty("x").is_ok());
        assert!(is_not_empty("   ").is_err());
    }

    #[test]
    fn hci_names() {
        assert!(is_hci_interface("hci0").is_ok());
        assert!(is_hci_interface("hci12").is_ok());
        assert!(is_hci_interface("hci").is_err());
        assert!(is_hci_interface("eth0").is_err());
        assert!(is_hci_interface("hcix").is_err());
    }

    #[test]
    fn hex_bytes() {
        assert!(is_hex_byte("0C").is_ok());
        assert!(is_hex_byte("f").is_ok());
        assert!(is_hex_byte("100").is_err());
        assert!(is_hex_byte("").is_err());
        assert!(is_hex_byte("0x").is_err());
    }
}
