//! Text helpers for the instrument log format
//!
//! Every helper works on borrowed slices of the current line and returns the
//! unread remainder alongside the value.

use chrono::NaiveDateTime;

/// Log timestamps look like `2022-301T14:31:18` (year, day-of-year, time)
const TIMESTAMP_FORMAT: &str = "%Y-%jT%H:%M:%S";

/// 2022-301T14:31:19 is SCLK 0x2AEDFBB8
const SCLK_AT_REFERENCE: i64 = 720_239_544;
const UNIX_AT_REFERENCE: i64 = 1_666_967_479;

/// Split off the first `sep`-delimited token.
///
/// Leading characters that appear in `sep` are skipped first. When `sep`
/// does not occur the whole (non-empty) remainder is the token.
pub fn take_token<'a>(line: &'a str, sep: &str) -> Option<(&'a str, &'a str)> {
    let line = line.trim_start_matches(|c: char| sep.contains(c));
    match line.find(sep) {
        Some(pos) if pos > 0 => Some((&line[..pos], line[pos + sep.len()..].trim_start_matches(' '))),
        _ if !line.is_empty() => Some((line, "")),
        _ => None,
    }
}

/// Token following `prefix`, up to `suffix` (or end of line)
pub fn value_after<'a>(line: &'a str, prefix: &str, suffix: &str) -> Option<(&'a str, &'a str)> {
    let pos = line.find(prefix)?;
    let rest = line[pos + prefix.len()..].trim_start_matches(' ');
    take_token(rest, suffix)
}

/// Token following `prefix`, up to the next `end` (or end of line)
pub fn find_token<'a>(line: &'a str, prefix: &str, end: &str) -> Option<&'a str> {
    let pos = line.find(prefix)?;
    let start = pos + prefix.len();
    match line[start..].find(end) {
        Some(len) => Some(&line[start..start + len]),
        None if start < line.len() => Some(&line[start..]),
        None => None,
    }
}

pub fn read_float(line: &str) -> Result<(f32, &str), String> {
    let (tok, rest) = take_token(line, " ").ok_or_else(|| "Failed to read token".to_string())?;
    let v = tok
        .parse::<f32>()
        .map_err(|e| format!("Failed to parse float: {}. Error: {}", tok, e))?;
    Ok((v, rest))
}

pub fn read_int(line: &str) -> Result<(i32, &str), String> {
    let (tok, rest) = take_token(line, " ").ok_or_else(|| "Failed to read token".to_string())?;
    let v = tok
        .parse::<i32>()
        .map_err(|e| format!("Failed to parse int: {}. Error: {}", tok, e))?;
    Ok((v, rest))
}

pub fn int_after<'a>(line: &'a str, prefix: &str, suffix: &str) -> Result<(i32, &'a str), String> {
    let (tok, rest) =
        value_after(line, prefix, suffix).ok_or_else(|| format!("failed to find value after {}", prefix))?;
    let v = tok
        .parse::<i32>()
        .map_err(|_| format!("failed to read int value after '{}'", prefix))?;
    Ok((v, rest))
}

/// Hex digits (without `0x`) following `prefix`; must fit 32 bits
pub fn hex_after<'a>(line: &'a str, prefix: &str, suffix: &str) -> Result<(u32, &'a str), String> {
    let (tok, rest) =
        value_after(line, prefix, suffix).ok_or_else(|| format!("failed to find value after {}", prefix))?;
    let v = u32::from_str_radix(tok, 16).map_err(|_| format!("failed to read int value after '{}'", prefix))?;
    Ok((v, rest))
}

pub fn float_after<'a>(line: &'a str, prefix: &str, suffix: &str) -> Result<(f32, &'a str), String> {
    let (tok, rest) =
        value_after(line, prefix, suffix).ok_or_else(|| format!("failed to find value after {}", prefix))?;
    let v = tok
        .parse::<f32>()
        .map_err(|_| format!("failed to read float value after '{}'", prefix))?;
    Ok((v, rest))
}

/// `0x`-prefixed 32-bit hex token
pub fn read_prefixed_hex(line: &str) -> Result<(u32, &str), String> {
    let (tok, rest) = take_token(line, " ").ok_or_else(|| "Failed to read token".to_string())?;
    let digits = tok
        .strip_prefix("0x")
        .ok_or_else(|| format!("Expected hex value, got: {}", tok))?;
    let v = u32::from_str_radix(digits, 16).map_err(|e| format!("Failed to parse hex: {}. Error: {}", tok, e))?;
    Ok((v, rest))
}

/// Seconds since the Unix epoch for a log timestamp
pub fn parse_timestamp(tok: &str) -> Result<i64, String> {
    NaiveDateTime::parse_from_str(tok, TIMESTAMP_FORMAT)
        .map(|t| t.and_utc().timestamp())
        .map_err(|e| format!("Failed to read timestamp: {}", e))
}

pub fn unix_to_sclk(unix_sec: i64) -> i64 {
    SCLK_AT_REFERENCE + (unix_sec - UNIX_AT_REFERENCE)
}

/// Read an RTT written as decimal, `0x` hex, bare hex, or `decimal/0xhex`
pub fn read_rtt(tok: &str) -> Result<i64, String> {
    let tok = tok.trim_matches(|c| c == '\t' || c == ' ');
    if tok.is_empty() {
        return Err("Failed to read RTT from empty string".to_string());
    }

    let parts: Vec<&str> = tok.split('/').collect();
    match parts.as_slice() {
        [_] => {
            if let Some(hex) = tok.strip_prefix("0x") {
                return i32::from_str_radix(hex, 16)
                    .map(i64::from)
                    .map_err(|e| format!("Failed to read hex RTT: \"{}\". Error: {}", tok, e));
            }
            match tok.parse::<i32>() {
                Ok(v) => Ok(i64::from(v)),
                // Some logs write hex without the 0x, e.g. 000001C5
                Err(e) => i32::from_str_radix(tok, 16)
                    .map(i64::from)
                    .map_err(|_| format!("Failed to read integer RTT: \"{}\". Error: {}", tok, e)),
            }
        }
        [dec, hex] => {
            let i = dec
                .parse::<i32>()
                .map_err(|e| format!("Failed to read integer part of RTT: \"{}\". Error: {}", tok, e))?;
            let digits = hex
                .strip_prefix("0x")
                .ok_or_else(|| format!("Expected hex rtt after / for RTT: \"{}\"", tok))?;
            let h = i32::from_str_radix(digits, 16)
                .map_err(|e| format!("Failed to read hex part of RTT: \"{}\". Error: {}", tok, e))?;
            if i != h {
                return Err(format!("Read RTT where int didn't match hex value: \"{}\".", tok));
            }
            Ok(i64::from(i))
        }
        _ => Err(format!("Invalid RTT read: \"{}\"", tok)),
    }
}
