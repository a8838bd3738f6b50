//! Modified UTF-7 mailbox-name encoding (RFC 3501 section 5.1.3)
//!
//! `&` shifts into modified base64 (alphabet `A-Za-z0-9+,`, no padding)
//! over UTF-16BE code units, `-` shifts back, and `&-` stands for a
//! literal `&`.

use crate::error::{Error, Result};
use base64::Engine as _;

fn engine() -> base64::engine::GeneralPurpose {
    base64::engine::GeneralPurpose::new(
        &base64::alphabet::IMAP_MUTF7,
        base64::engine::general_purpose::NO_PAD,
    )
}

/// Decode a modified-UTF-7 mailbox name into Unicode.
pub fn decode(input: &[u8]) -> Result<String> {
    let engine = engine();
    let mut output = String::new();
    let mut i = 0;
    while i < input.len() {
        match input[i] {
            b'&' => {
                let start = i + 1;
                let end = loop {
                    i += 1;
                    if i == input.len() {
                        return Err(Error::Protocol(
                            "unterminated shift in modified UTF-7".into(),
                        ));
                    }
                    if input[i] == b'-' {
                        break i;
                    }
                };
                if start == end {
                    output.push('&');
                } else {
                    let bytes = engine.decode(&input[start..end]).map_err(|e| {
                        Error::Protocol(format!("bad base64 in modified UTF-7: {e}"))
                    })?;
                    if bytes.len() % 2 != 0 {
                        return Err(Error::Protocol(
                            "odd-length UTF-16 payload in modified UTF-7".into(),
                        ));
                    }
                    let mut decoder = encoding_rs::UTF_16BE.new_decoder_without_bom_handling();
                    let capacity = decoder
                        .max_utf8_buffer_length_without_replacement(bytes.len())
                        .unwrap_or(bytes.len() * 3);
                    output.reserve(capacity);
                    let (result, _) =
                        decoder.decode_to_string_without_replacement(&bytes, &mut output, true);
                    if !matches!(result, encoding_rs::DecoderResult::InputEmpty) {
                        return Err(Error::Protocol(
                            "invalid UTF-16 payload in modified UTF-7".into(),
                        ));
                    }
                }
            }
            c @ 0x20..=0x25 | c @ 0x27..=0x7e => output.push(char::from(c)),
            c => {
                return Err(Error::Protocol(format!(
                    "byte {c:#04x} not allowed in modified UTF-7"
                )));
            }
        }
        i += 1;
    }
    Ok(output)
}

/// Encode a Unicode mailbox name into modified UTF-7.
#[must_use]
pub fn encode(input: &str) -> Vec<u8> {
    let engine = engine();
    let mut output = Vec::new();
    let mut run = Vec::new();

    let flush = |run: &mut Vec<u16>, output: &mut Vec<u8>| {
        if run.is_empty() {
            return;
        }
        let mut bytes = Vec::with_capacity(run.len() * 2);
        for unit in run.iter() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        output.push(b'&');
        output.extend_from_slice(engine.encode(&bytes).as_bytes());
        output.push(b'-');
        run.clear();
    };

    for c in input.chars() {
        match c {
            '&' => {
                flush(&mut run, &mut output);
                output.extend_from_slice(b"&-");
            }
            '\x20'..='\x7e' => {
                flush(&mut run, &mut output);
                output.push(c as u8);
            }
            other => {
                let mut units = [0u16; 2];
                run.extend_from_slice(other.encode_utf16(&mut units));
            }
        }
    }
    flush(&mut run, &mut output);
    output
}
