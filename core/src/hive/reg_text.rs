//! `.reg` text codec
//!
//! `reged -x` exports a hive as REGEDIT4-style text:
//!
//! ```text
//! Windows Registry Editor Version 5.00
//!
//! [\Objects\{9dea862c-5cdd-4e70-acc1-f32b344d4795}\Elements\11000001]
//! "Element"=hex:00,00,00,00,00,00,00,00,00,00,00,00,00,00,00,00,06,00,00,00,00,\
//!   00,00,00,48,00,00,00,00,00,00,00,...
//! ```
//!
//! The parser builds a [`Hive`] from that text. The formatter produces the
//! small import files handed to `reged -I`, one value at a time.

use super::{normalize_path, Hive, HiveError, Result};
use crate::value::RegValue;

/// First line of every export and import file
pub const REG_HEADER: &str = "Windows Registry Editor Version 5.00";

const REG_QWORD: u32 = 0xb;
const FIRST_LINE_WIDTH: usize = 66;
const LINE_WIDTH: usize = 76;

/// A parsed export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegExport {
    pub header: Option<String>,
    pub hive: Hive,
}

/// Parse `reged -x` output.
pub fn parse_export(text: &str) -> Result<RegExport> {
    let mut header = None;
    let mut hive = Hive::new();
    let mut key: Option<String> = None;
    // (line of the value name, value name, data collected so far)
    let mut pending: Option<(usize, String, String)> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim_end_matches('\r');

        if let Some((start, name, mut data)) = pending.take() {
            let piece = line.trim();
            match piece.strip_suffix('\\') {
                Some(rest) => {
                    data.push_str(rest);
                    pending = Some((start, name, data));
                }
                None => {
                    data.push_str(piece);
                    let path = key.as_deref().unwrap_or_default();
                    hive.set_value(path, &name, parse_data(start, &data)?);
                }
            }
            continue;
        }

        if line.trim().is_empty() {
            key = None;
            continue;
        }

        if line.starts_with('[') {
            let inner = line
                .trim_end()
                .strip_prefix('[')
                .and_then(|l| l.strip_suffix(']'))
                .ok_or_else(|| parse_error(line_no, "unterminated key header"))?;
            let path = normalize_path(inner);
            hive.ensure_key(&path);
            key = Some(path);
            continue;
        }

        let Some(path) = key.as_deref() else {
            if header.is_none() {
                header = Some(line.to_string());
            }
            continue;
        };

        if line.starts_with(';') {
            continue;
        }

        let (name, data) = split_assignment(line_no, line)?;
        if !data.starts_with('"') {
            if let Some(rest) = data.strip_suffix('\\') {
                pending = Some((line_no, name, rest.to_string()));
                continue;
            }
        }
        hive.set_value(path, &name, parse_data(line_no, data)?);
    }

    if let Some((start, _, _)) = pending {
        return Err(parse_error(start, "value continues past end of file"));
    }

    Ok(RegExport { header, hive })
}

/// Import file that sets a single value of an existing key.
pub fn format_import(key_path: &str, value_name: &str, value: &RegValue) -> String {
    let mut out = String::new();
    out.push_str(REG_HEADER);
    out.push_str("\r\n\r\n[\\]\r\n\r\n");
    out.push_str("[\\\\");
    out.push_str(&normalize_path(key_path));
    out.push_str("]\r\n");

    if value_name.is_empty() {
        out.push('@');
    } else {
        out.push('"');
        out.push_str(&escape(value_name));
        out.push('"');
    }
    out.push('=');

    let data = format_data(value);
    if data.starts_with('"') {
        out.push_str(&data);
    } else {
        wrap_hex(&data, &mut out);
    }
    out.push_str("\r\n\r\n");
    out
}

/// Right-hand side of a value line, unwrapped.
pub fn format_data(value: &RegValue) -> String {
    match value {
        RegValue::Binary(bytes) => format!("hex:{}", hex_list(bytes)),
        RegValue::Text(text) => format!("\"{}\"", escape(text)),
        RegValue::Integer(n) => match u32::try_from(*n) {
            Ok(dword) => format!("dword:{dword:08x}"),
            Err(_) => format!("hex({REG_QWORD:x}):{}", hex_list(&n.to_le_bytes())),
        },
        RegValue::Other { kind, bytes } => format!("hex({kind:x}):{}", hex_list(bytes)),
    }
}

fn wrap_hex(mut data: &str, out: &mut String) {
    let mut width = FIRST_LINE_WIDTH;
    while data.len() > width {
        let Some(pos) = data[width - 2..].find(',') else {
            break;
        };
        let cut = width - 2 + pos + 1;
        if cut >= data.len() {
            break;
        }
        out.push_str(&data[..cut]);
        out.push_str("\\\r\n  ");
        data = &data[cut..];
        width = LINE_WIDTH;
    }
    out.push_str(data);
}

fn hex_list(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

fn parse_error(line: usize, reason: impl Into<String>) -> HiveError {
    HiveError::Parse {
        line,
        reason: reason.into(),
    }
}

/// Split `"name"=data` or `@=data`.
fn split_assignment(line_no: usize, line: &str) -> Result<(String, &str)> {
    if let Some(data) = line.strip_prefix("@=") {
        return Ok((String::new(), data));
    }

    let body = line
        .strip_prefix('"')
        .ok_or_else(|| parse_error(line_no, "expected a quoted value name"))?;

    let mut name = String::new();
    let mut chars = body.char_indices();
    while let Some((pos, c)) = chars.next() {
        match c {
            '\\' => {
                if let Some((_, escaped)) = chars.next() {
                    name.push(escaped);
                }
            }
            '"' => {
                let data = body[pos + 1..]
                    .strip_prefix('=')
                    .ok_or_else(|| parse_error(line_no, "expected '=' after value name"))?;
                return Ok((name, data));
            }
            other => name.push(other),
        }
    }

    Err(parse_error(line_no, "unterminated value name"))
}

fn parse_data(line_no: usize, data: &str) -> Result<RegValue> {
    let data = data.trim();

    if let Some(quoted) = data.strip_prefix('"') {
        let inner = quoted
            .strip_suffix('"')
            .ok_or_else(|| parse_error(line_no, "unterminated string value"))?;
        return Ok(RegValue::Text(unescape(inner)));
    }

    if let Some(digits) = data.strip_prefix("dword:") {
        let n = u32::from_str_radix(digits.trim(), 16)
            .map_err(|_| parse_error(line_no, format!("bad dword {digits:?}")))?;
        return Ok(RegValue::Integer(n.into()));
    }

    if let Some(list) = data.strip_prefix("hex:") {
        return Ok(RegValue::Binary(parse_hex_list(line_no, list)?));
    }

    if let Some(rest) = data.strip_prefix("hex(") {
        let (kind, list) = rest
            .split_once("):")
            .ok_or_else(|| parse_error(line_no, "malformed hex(N) value"))?;
        let kind = u32::from_str_radix(kind, 16)
            .map_err(|_| parse_error(line_no, format!("bad value kind {kind:?}")))?;
        let bytes = parse_hex_list(line_no, list)?;
        if kind == REG_QWORD {
            if let Ok(raw) = <[u8; 8]>::try_from(bytes.as_slice()) {
                return Ok(RegValue::Integer(u64::from_le_bytes(raw)));
            }
        }
        return Ok(RegValue::Other { kind, bytes });
    }

    Err(parse_error(line_no, format!("unrecognized value data {data:?}")))
}

fn parse_hex_list(line_no: usize, list: &str) -> Result<Vec<u8>> {
    list.split(',')
        .map(str::trim)
        .filter(|byte| !byte.is_empty())
        .map(|byte| {
            u8::from_str_radix(byte, 16)
                .map_err(|_| parse_error(line_no, format!("bad hex byte {byte:?}")))
        })
        .collect()
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}
