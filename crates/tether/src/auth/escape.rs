//! Distinguished-name escaping for human-readable endpoint names.
//!
//! Follows RFC 4514: the special characters `, + " \ < > ; =` are prefixed
//! with a backslash, as are a leading `#` or space and a trailing space.
//! Control characters and DEL are written as `\XX` hex pairs so the escaped
//! form is always printable.
//!
//! `unescape_name(escape_name(n)) == n` for every `n`, and escaping is
//! idempotent through a round trip.

use super::Error;
use super::Result;

const SPECIAL: &[char] = &[',', '+', '"', '\\', '<', '>', ';', '='];

pub fn escape_name(name: &str) -> String {
    let count = name.chars().count();
    let mut out = String::with_capacity(name.len() + 8);
    for (i, c) in name.chars().enumerate() {
        let edge_space = c == ' ' && (i == 0 || i + 1 == count);
        if SPECIAL.contains(&c) || edge_space || (c == '#' && i == 0) {
            out.push('\\');
            out.push(c);
        } else if c.is_ascii_control() {
            out.push_str(&format!("\\{:02X}", c as u32));
        } else {
            out.push(c);
        }
    }
    out
}

pub fn unescape_name(escaped: &str) -> Result<String> {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let next = chars
            .next()
            .ok_or_else(|| Error::BadName(format!("dangling escape in '{}'", escaped)))?;
        if SPECIAL.contains(&next) || next == ' ' || next == '#' {
            out.push(next);
            continue;
        }
        let low = chars
            .next()
            .ok_or_else(|| Error::BadName(format!("short hex escape in '{}'", escaped)))?;
        let hex: String = [next, low].iter().collect();
        let byte = u8::from_str_radix(&hex, 16)
            .map_err(|_| Error::BadName(format!("bad escape '\\{}' in '{}'", hex, escaped)))?;
        if !byte.is_ascii() {
            return Err(Error::BadName(format!("non-ascii hex escape '\\{}'", hex)));
        }
        out.push(char::from(byte));
    }
    Ok(out)
}
