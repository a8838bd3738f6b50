//! RFC 3501 message-set encoding
//!
//! Compact `1,3:5,8` syntax over sorted sequence numbers or UIDs.

use crate::error::{Error, Result};
use std::fmt::Write as _;

/// Marker for "the last UID in the mailbox"; encodes as `*` (UIDPLUS).
pub const LAST_UID: u32 = u32::MAX;

/// Encode a sorted list of message numbers as a compact message set.
///
/// Consecutive runs collapse into `start:end` ranges. Returns `None`
/// for an empty input so callers can short-circuit the command.
#[must_use]
pub fn encode_set(numbers: &[u32]) -> Option<String> {
    let mut iter = numbers.iter().copied();
    let first = iter.next()?;
    let mut out = String::new();
    let (mut start, mut end) = (first, first);

    let mut flush = |out: &mut String, start: u32, end: u32| {
        if !out.is_empty() {
            out.push(',');
        }
        if start == end {
            let _ = write!(out, "{start}");
        } else {
            let _ = write!(out, "{start}:{end}");
        }
    };

    for n in iter {
        if end.checked_add(1) == Some(n) {
            end = n;
        } else if n != end {
            flush(&mut out, start, end);
            start = n;
            end = n;
        }
    }
    flush(&mut out, start, end);
    Some(out)
}

/// Encode a UID range, mapping [`LAST_UID`] to `*`.
#[must_use]
pub fn encode_uid_range(start: u32, end: u32) -> String {
    if end == LAST_UID {
        format!("{start}:*")
    } else {
        format!("{start}:{end}")
    }
}

/// Parse a well-formed message set back into an expanded list.
pub fn parse_set(set: &str) -> Result<Vec<u32>> {
    let mut numbers = Vec::new();
    for part in set.split(',') {
        match part.split_once(':') {
            None => numbers.push(parse_number(part)?),
            Some((a, b)) => {
                let (a, b) = (parse_number(a)?, parse_number(b)?);
                let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
                numbers.extend(lo..=hi);
            }
        }
    }
    Ok(numbers)
}

fn parse_number(text: &str) -> Result<u32> {
    text.parse()
        .map_err(|_| Error::Protocol(format!("bad message set element {text:?}")))
}
