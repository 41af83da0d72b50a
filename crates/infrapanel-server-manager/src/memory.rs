use crate::error::{Result, ServerManagerError};

const MIB: u64 = 1024 * 1024;

/// Parses a JVM-style memory size ("2048M", "2G", "512m", "4GB") into megabytes.
///
/// A bare number is read as megabytes, matching what the panel forms submit.
pub fn parse_memory_mb(value: &str) -> Result<u64> {
    let trimmed = value.trim();
    let invalid = || ServerManagerError::InvalidMemory(value.to_string());

    let upper = trimmed.to_ascii_uppercase();
    let without_b = upper
        .strip_suffix('B')
        .filter(|rest| rest.ends_with(|c: char| c.is_ascii_alphabetic()))
        .unwrap_or(&upper);

    let (digits, factor_kb) = match without_b.chars().last() {
        Some('K') => (&without_b[..without_b.len() - 1], 1),
        Some('M') => (&without_b[..without_b.len() - 1], 1024),
        Some('G') => (&without_b[..without_b.len() - 1], 1024 * 1024),
        Some('T') => (&without_b[..without_b.len() - 1], 1024 * 1024 * 1024),
        Some(c) if c.is_ascii_digit() => (without_b, 1024),
        _ => return Err(invalid()),
    };

    let amount: u64 = digits.trim().parse().map_err(|_| invalid())?;
    if amount == 0 {
        return Err(invalid());
    }

    let kb = amount.checked_mul(factor_kb).ok_or_else(invalid)?;
    Ok(kb / 1024)
}

pub fn parse_memory_bytes(value: &str) -> Result<u64> {
    parse_memory_mb(value)?
        .checked_mul(MIB)
        .ok_or_else(|| ServerManagerError::InvalidMemory(value.to_string()))
}

pub fn bytes_to_mb(bytes: u64) -> u64 {
    (bytes + MIB / 2) / MIB
}
