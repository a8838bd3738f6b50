//! Command handlers for the fake IMAP server
//!
//! Each handler renders responses straight from the [`Mailbox`] test
//! model. Responses are deliberately minimal but wire-accurate:
//! literals carry exact byte counts, FETCH items mirror what was
//! asked for, and EXPUNGE renumbers the way a real server does.

use super::mailbox::Email;
use super::server::{ServerState, writeln_crlf};
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

fn unquote(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        trimmed[1..trimmed.len() - 1]
            .replace("\\\"", "\"")
            .replace("\\\\", "\\")
    } else {
        trimmed.to_string()
    }
}

/// Expand `1`, `1:3`, `2,4`, `1:*` against a mailbox of `len`
/// messages into 1-based sequence numbers.
fn parse_set(set: &str, len: usize) -> Vec<usize> {
    let mut seqs = Vec::new();
    for part in set.split(',') {
        match part.split_once(':') {
            None => {
                if let Ok(n) = part.parse::<usize>() {
                    seqs.push(n);
                }
            }
            Some((a, b)) => {
                let start: usize = a.parse().unwrap_or(1);
                let end = if b == "*" { len } else { b.parse().unwrap_or(len) };
                for n in start.min(end)..=start.max(end) {
                    seqs.push(n);
                }
            }
        }
    }
    seqs.retain(|&n| n >= 1 && n <= len);
    seqs
}

fn quoted(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}

fn address_list(address: &str) -> String {
    match address.split_once('@') {
        Some((mailbox, host)) => format!("((NIL NIL {} {}))", quoted(mailbox), quoted(host)),
        None => "NIL".to_string(),
    }
}

fn envelope(email: &Email) -> String {
    let from = address_list(&email.from);
    let to = address_list(&email.to);
    format!(
        "ENVELOPE ({date} {subject} {from} {from} {from} {to} NIL NIL NIL {mid})",
        date = quoted("Mon, 23 Oct 2023 10:00:00 +0000"),
        subject = quoted(&email.subject),
        mid = quoted(&format!("<{}@fake>", email.uid)),
    )
}

fn flag_list(email: &Email) -> String {
    let flags: Vec<&str> = email.flags.iter().map(String::as_str).collect();
    format!("({})", flags.join(" "))
}

fn literal(bytes: &[u8]) -> Vec<u8> {
    let mut out = format!("{{{}}}\r\n", bytes.len()).into_bytes();
    out.extend_from_slice(bytes);
    out
}

/// Render the FETCH data items requested by `items` for one email.
fn render_items(email: &Email, items: &str) -> Vec<u8> {
    let upper = items.to_uppercase();
    let mut parts: Vec<Vec<u8>> = Vec::new();

    if upper.contains("UID") {
        parts.push(format!("UID {}", email.uid).into_bytes());
    }
    if upper.contains("FLAGS") {
        parts.push(format!("FLAGS {}", flag_list(email)).into_bytes());
    }
    if upper.contains("ENVELOPE") {
        parts.push(envelope(email).into_bytes());
    }
    if upper.contains("INTERNALDATE") {
        parts.push(format!("INTERNALDATE {}", quoted(&email.internal_date)).into_bytes());
    }
    if upper.contains("RFC822.SIZE") {
        parts.push(format!("RFC822.SIZE {}", email.full_text().len()).into_bytes());
    }
    if upper.contains("BODYSTRUCTURE") {
        let lines = email.body.matches('\n').count() + 1;
        parts.push(
            format!(
                "BODYSTRUCTURE (\"TEXT\" \"PLAIN\" (\"CHARSET\" \"US-ASCII\") NIL NIL \"7BIT\" {} {})",
                email.body.len(),
                lines
            )
            .into_bytes(),
        );
    }
    if let Some(open) = upper.find("BODY.PEEK[").map(|i| i + 10).or_else(|| {
        upper
            .find("BODY[")
            .map(|i| i + 5)
    }) {
        let close = items[open..].find(']').map(|i| open + i).unwrap_or(open);
        let section = &items[open..close];
        let section_upper = section.to_uppercase();
        let (echo, payload): (String, Vec<u8>) = if section_upper.is_empty() {
            ("BODY[]".to_string(), email.full_text().into_bytes())
        } else if section_upper == "HEADER" {
            (
                "BODY[HEADER]".to_string(),
                format!("{}\r\n", email.header_block()).into_bytes(),
            )
        } else if section_upper.starts_with("HEADER.FIELDS") {
            let names: Vec<String> = section
                .find('(')
                .and_then(|s| section.find(')').map(|e| (s, e)))
                .map(|(s, e)| {
                    section[s + 1..e]
                        .split_whitespace()
                        .map(ToString::to_string)
                        .collect()
                })
                .unwrap_or_default();
            let mut block = String::new();
            let source = email.header_block();
            for (name, value) in source
                .trim_end()
                .split("\r\n")
                .filter_map(|line| line.split_once(": "))
            {
                if names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
                    block.push_str(&format!("{name}: {value}\r\n"));
                }
            }
            block.push_str("\r\n");
            (
                format!("BODY[HEADER.FIELDS ({})]", names.join(" ")),
                block.into_bytes(),
            )
        } else if section_upper == "TEXT" {
            ("BODY[TEXT]".to_string(), email.body.clone().into_bytes())
        } else {
            (format!("BODY[{section}]"), email.body.clone().into_bytes())
        };
        let mut item = echo.into_bytes();
        item.push(b' ');
        item.extend_from_slice(&literal(&payload));
        parts.push(item);
    }

    let mut rendered = Vec::new();
    for (index, part) in parts.iter().enumerate() {
        if index > 0 {
            rendered.push(b' ');
        }
        rendered.extend_from_slice(part);
    }
    rendered
}

fn write_fetch_response(
    stream: &mut impl Write,
    seq: usize,
    email: &Email,
    items: &str,
) -> std::io::Result<()> {
    let mut line = format!("* {seq} FETCH (").into_bytes();
    line.extend_from_slice(&render_items(email, items));
    line.extend_from_slice(b")\r\n");
    stream.write_all(&line)?;
    stream.flush()
}

fn flush_pushes(
    stream: &mut impl Write,
    state: &Arc<Mutex<ServerState>>,
) -> std::io::Result<()> {
    let pushes = std::mem::take(&mut state.lock().unwrap().pushes);
    for line in pushes {
        writeln_crlf(stream, &line)?;
    }
    Ok(())
}

// -- handlers --

pub fn capability<S: Read + Write>(
    stream: &mut S,
    tag: &str,
    state: &Arc<Mutex<ServerState>>,
    starttls: bool,
) -> std::io::Result<()> {
    let extra = state.lock().unwrap().mailbox.capabilities.join(" ");
    let mut line = "* CAPABILITY IMAP4rev1".to_string();
    if starttls {
        line.push_str(" STARTTLS");
    }
    if !extra.is_empty() {
        line.push(' ');
        line.push_str(&extra);
    }
    writeln_crlf(stream, &line)?;
    writeln_crlf(stream, &format!("{tag} OK CAPABILITY completed"))
}

pub fn login<S: Read + Write>(
    stream: &mut S,
    tag: &str,
    rest: &str,
    state: &Arc<Mutex<ServerState>>,
) -> std::io::Result<()> {
    let (user, password) = {
        let mut parts = rest.split(' ');
        (
            unquote(parts.next().unwrap_or("")),
            unquote(parts.next().unwrap_or("")),
        )
    };
    let ok = {
        let guard = state.lock().unwrap();
        guard.mailbox.accept_login
            && user == guard.mailbox.expected_user
            && password == guard.mailbox.expected_password
    };
    if ok {
        writeln_crlf(stream, &format!("{tag} OK LOGIN completed"))
    } else {
        writeln_crlf(stream, &format!("{tag} NO LOGIN failed"))
    }
}

pub fn authenticate<S: Read + Write>(
    stream: &mut S,
    tag: &str,
    rest: &str,
    state: &Arc<Mutex<ServerState>>,
) -> std::io::Result<()> {
    if !rest.trim().eq_ignore_ascii_case("PLAIN") {
        return writeln_crlf(stream, &format!("{tag} NO unsupported mechanism"));
    }
    writeln_crlf(stream, "+ ")?;

    // Read the client's base64 response line.
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        if stream.read(&mut byte)? == 0 {
            return Ok(());
        }
        if byte[0] == b'\n' {
            break;
        }
        if byte[0] != b'\r' {
            line.push(byte[0]);
        }
    }

    let expected = {
        let guard = state.lock().unwrap();
        base64_encode(
            format!(
                "{u}\0{u}\0{p}",
                u = guard.mailbox.expected_user,
                p = guard.mailbox.expected_password
            )
            .as_bytes(),
        )
    };
    if line == expected.as_bytes() {
        writeln_crlf(stream, &format!("{tag} OK AUTHENTICATE completed"))
    } else {
        writeln_crlf(stream, &format!("{tag} NO AUTHENTICATE failed"))
    }
}

/// Minimal standard base64 for the PLAIN check (no dependency in the
/// test harness beyond the crate under test).
fn base64_encode(input: &[u8]) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::new();
    for chunk in input.chunks(3) {
        let b = [
            chunk[0],
            chunk.get(1).copied().unwrap_or(0),
            chunk.get(2).copied().unwrap_or(0),
        ];
        let n = (u32::from(b[0]) << 16) | (u32::from(b[1]) << 8) | u32::from(b[2]);
        out.push(ALPHABET[(n >> 18) as usize & 63] as char);
        out.push(ALPHABET[(n >> 12) as usize & 63] as char);
        out.push(if chunk.len() > 1 {
            ALPHABET[(n >> 6) as usize & 63] as char
        } else {
            '='
        });
        out.push(if chunk.len() > 2 {
            ALPHABET[n as usize & 63] as char
        } else {
            '='
        });
    }
    out
}

pub fn noop<S: Read + Write>(
    stream: &mut S,
    tag: &str,
    state: &Arc<Mutex<ServerState>>,
) -> std::io::Result<()> {
    flush_pushes(stream, state)?;
    writeln_crlf(stream, &format!("{tag} OK NOOP completed"))
}

pub fn list<S: Read + Write>(
    stream: &mut S,
    tag: &str,
    rest: &str,
    state: &Arc<Mutex<ServerState>>,
    subscribed: bool,
) -> std::io::Result<()> {
    let pattern = rest
        .split_once(' ')
        .map(|(_, p)| unquote(p))
        .unwrap_or_default();
    let keyword = if subscribed { "LSUB" } else { "LIST" };
    let names: Vec<String> = {
        let guard = state.lock().unwrap();
        guard
            .mailbox
            .folders
            .iter()
            .filter(|folder| pattern_matches(&pattern, &folder.name))
            .map(|folder| folder.name.clone())
            .collect()
    };
    for name in names {
        writeln_crlf(
            stream,
            &format!("* {keyword} (\\HasNoChildren) \"/\" {name}"),
        )?;
    }
    writeln_crlf(stream, &format!("{tag} OK {keyword} completed"))
}

fn pattern_matches(pattern: &str, name: &str) -> bool {
    if pattern == "*" || pattern == "%" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return name.starts_with(prefix);
    }
    pattern == name || (pattern.eq_ignore_ascii_case("INBOX") && name == "INBOX")
}

pub fn status<S: Read + Write>(
    stream: &mut S,
    tag: &str,
    rest: &str,
    state: &Arc<Mutex<ServerState>>,
) -> std::io::Result<()> {
    flush_pushes(stream, state)?;
    let name = unquote(rest.split(" (").next().unwrap_or(rest));
    let response = {
        let guard = state.lock().unwrap();
        guard.mailbox.folder(&name).map(|folder| {
            let unseen = folder
                .emails
                .iter()
                .filter(|e| !e.flags.contains("\\Seen"))
                .count();
            let recent = folder
                .emails
                .iter()
                .filter(|e| e.flags.contains("\\Recent"))
                .count();
            format!(
                "* STATUS {} (MESSAGES {} RECENT {} UIDNEXT {} UIDVALIDITY {} UNSEEN {})",
                name,
                folder.emails.len(),
                recent,
                guard.mailbox.uid_next(&name),
                guard.mailbox.uid_validity,
                unseen
            )
        })
    };
    match response {
        Some(line) => {
            writeln_crlf(stream, &line)?;
            writeln_crlf(stream, &format!("{tag} OK STATUS completed"))
        }
        None => writeln_crlf(stream, &format!("{tag} NO STATUS no such mailbox")),
    }
}

pub fn select<S: Read + Write>(
    stream: &mut S,
    tag: &str,
    rest: &str,
    state: &Arc<Mutex<ServerState>>,
    examine: bool,
) -> std::io::Result<Option<String>> {
    let name = unquote(rest);
    let snapshot = {
        let guard = state.lock().unwrap();
        guard
            .mailbox
            .folder(&name)
            .map(|folder| (folder.name.clone(), folder.clone(), guard.mailbox.uid_validity, guard.mailbox.uid_next(&name)))
    };
    let Some((canonical, folder, uid_validity, uid_next)) = snapshot else {
        writeln_crlf(stream, &format!("{tag} NO no such mailbox"))?;
        return Ok(None);
    };
    let recent = folder
        .emails
        .iter()
        .filter(|e| e.flags.contains("\\Recent"))
        .count();
    writeln_crlf(
        stream,
        "* FLAGS (\\Answered \\Flagged \\Deleted \\Seen \\Draft)",
    )?;
    writeln_crlf(stream, &format!("* {} EXISTS", folder.emails.len()))?;
    writeln_crlf(stream, &format!("* {recent} RECENT"))?;
    writeln_crlf(
        stream,
        &format!("* OK [UIDVALIDITY {uid_validity}] UIDs valid"),
    )?;
    writeln_crlf(stream, &format!("* OK [UIDNEXT {uid_next}] Predicted next UID"))?;
    writeln_crlf(
        stream,
        "* OK [PERMANENTFLAGS (\\Answered \\Flagged \\Deleted \\Seen \\Draft \\*)] Limited",
    )?;
    let mode = if examine || folder.read_only {
        "READ-ONLY"
    } else {
        "READ-WRITE"
    };
    let verb = if examine { "EXAMINE" } else { "SELECT" };
    writeln_crlf(stream, &format!("{tag} OK [{mode}] {verb} completed"))?;
    Ok(Some(canonical))
}

pub fn fetch<S: Read + Write>(
    stream: &mut S,
    tag: &str,
    rest: &str,
    state: &Arc<Mutex<ServerState>>,
    selected: Option<&str>,
) -> std::io::Result<()> {
    let Some(folder_name) = selected else {
        return writeln_crlf(stream, &format!("{tag} NO no mailbox selected"));
    };
    let (set_part, items) = rest.split_once(' ').unwrap_or((rest, "()"));
    let snapshot: Vec<(usize, Email)> = {
        let guard = state.lock().unwrap();
        let Some(folder) = guard.mailbox.folder(folder_name) else {
            return writeln_crlf(stream, &format!("{tag} NO mailbox is gone"));
        };
        parse_set(set_part, folder.emails.len())
            .into_iter()
            .map(|seq| (seq, folder.emails[seq - 1].clone()))
            .collect()
    };
    for (seq, email) in snapshot {
        write_fetch_response(stream, seq, &email, items)?;
    }
    writeln_crlf(stream, &format!("{tag} OK FETCH completed"))
}

pub fn uid<S: Read + Write>(
    stream: &mut S,
    tag: &str,
    rest: &str,
    state: &Arc<Mutex<ServerState>>,
    selected: Option<&str>,
) -> std::io::Result<()> {
    let Some(folder_name) = selected else {
        return writeln_crlf(stream, &format!("{tag} NO no mailbox selected"));
    };
    let Some(rest) = rest.strip_prefix("FETCH ") else {
        return writeln_crlf(stream, &format!("{tag} BAD only UID FETCH is scripted"));
    };
    let (set_part, items) = rest.split_once(' ').unwrap_or((rest, "(UID)"));
    let snapshot: Vec<(usize, Email)> = {
        let guard = state.lock().unwrap();
        let Some(folder) = guard.mailbox.folder(folder_name) else {
            return writeln_crlf(stream, &format!("{tag} NO mailbox is gone"));
        };
        let (start, end) = match set_part.split_once(':') {
            None => {
                let uid = set_part.parse::<u32>().unwrap_or(0);
                (uid, uid)
            }
            Some((a, b)) => (
                a.parse().unwrap_or(0),
                if b == "*" {
                    u32::MAX
                } else {
                    b.parse().unwrap_or(0)
                },
            ),
        };
        folder
            .emails
            .iter()
            .enumerate()
            .filter(|(_, email)| email.uid >= start && email.uid <= end)
            .map(|(index, email)| (index + 1, email.clone()))
            .collect()
    };
    let items = if items.to_uppercase().contains("UID") {
        items.to_string()
    } else {
        format!("(UID {})", items.trim_matches(['(', ')']))
    };
    for (seq, email) in snapshot {
        write_fetch_response(stream, seq, &email, &items)?;
    }
    writeln_crlf(stream, &format!("{tag} OK UID FETCH completed"))
}

pub fn store<S: Read + Write>(
    stream: &mut S,
    tag: &str,
    rest: &str,
    state: &Arc<Mutex<ServerState>>,
    selected: Option<&str>,
) -> std::io::Result<()> {
    let Some(folder_name) = selected else {
        return writeln_crlf(stream, &format!("{tag} NO no mailbox selected"));
    };
    let mut parts = rest.splitn(3, ' ');
    let set_part = parts.next().unwrap_or("");
    let operation = parts.next().unwrap_or("");
    let flags: Vec<String> = parts
        .next()
        .unwrap_or("")
        .trim_matches(['(', ')'])
        .split_whitespace()
        .map(ToString::to_string)
        .collect();

    let updated: Vec<(usize, Email)> = {
        let mut guard = state.lock().unwrap();
        let Some(folder) = guard.mailbox.folder_mut(folder_name) else {
            return writeln_crlf(stream, &format!("{tag} NO mailbox is gone"));
        };
        let seqs = parse_set(set_part, folder.emails.len());
        let mut updated = Vec::new();
        for seq in seqs {
            let email = &mut folder.emails[seq - 1];
            for flag in &flags {
                if operation.starts_with("+FLAGS") {
                    email.flags.insert(flag.clone());
                } else {
                    email.flags.remove(flag);
                }
            }
            updated.push((seq, email.clone()));
        }
        updated
    };
    for (seq, email) in updated {
        write_fetch_response(stream, seq, &email, "FLAGS")?;
    }
    writeln_crlf(stream, &format!("{tag} OK STORE completed"))
}

pub fn search<S: Read + Write>(
    stream: &mut S,
    tag: &str,
    rest: &str,
    state: &Arc<Mutex<ServerState>>,
    selected: Option<&str>,
) -> std::io::Result<()> {
    let Some(folder_name) = selected else {
        return writeln_crlf(stream, &format!("{tag} NO no mailbox selected"));
    };
    let upper = rest.to_uppercase();
    let subject_needle = upper.find("SUBJECT ").map(|at| {
        let value = rest[at + 8..].trim_start();
        if let Some(stripped) = value.strip_prefix('"') {
            stripped
                .split('"')
                .next()
                .unwrap_or_default()
                .to_string()
        } else if let Some(close) = value.find("} ") {
            // Literal form: "{N} <bytes> ..." as flattened by the
            // command reader; take the bytes up to the trailing set.
            value[close + 2..]
                .rsplit_once(' ')
                .map(|(s, _)| s.to_string())
                .unwrap_or_else(|| value[close + 2..].to_string())
        } else {
            value
                .split(' ')
                .next()
                .unwrap_or_default()
                .to_string()
        }
    });

    let hits: Vec<usize> = {
        let guard = state.lock().unwrap();
        let Some(folder) = guard.mailbox.folder(folder_name) else {
            return writeln_crlf(stream, &format!("{tag} NO mailbox is gone"));
        };
        folder
            .emails
            .iter()
            .enumerate()
            .filter(|(_, email)| {
                if let Some(needle) = &subject_needle {
                    email.subject.contains(needle)
                } else if upper.contains("UNSEEN") {
                    !email.flags.contains("\\Seen")
                } else {
                    true
                }
            })
            .map(|(index, _)| index + 1)
            .collect()
    };
    let rendered: Vec<String> = hits.iter().map(ToString::to_string).collect();
    if rendered.is_empty() {
        writeln_crlf(stream, "* SEARCH")?;
    } else {
        writeln_crlf(stream, &format!("* SEARCH {}", rendered.join(" ")))?;
    }
    writeln_crlf(stream, &format!("{tag} OK SEARCH completed"))
}

pub fn expunge<S: Read + Write>(
    stream: &mut S,
    tag: &str,
    state: &Arc<Mutex<ServerState>>,
    selected: Option<&str>,
) -> std::io::Result<()> {
    let Some(folder_name) = selected else {
        return writeln_crlf(stream, &format!("{tag} NO no mailbox selected"));
    };
    let expunged: Vec<usize> = {
        let mut guard = state.lock().unwrap();
        let Some(folder) = guard.mailbox.folder_mut(folder_name) else {
            return writeln_crlf(stream, &format!("{tag} NO mailbox is gone"));
        };
        let mut removed = 0;
        let mut lines = Vec::new();
        let mut kept = Vec::new();
        for (index, email) in folder.emails.drain(..).enumerate() {
            if email.flags.contains("\\Deleted") {
                lines.push(index + 1 - removed);
                removed += 1;
            } else {
                kept.push(email);
            }
        }
        folder.emails = kept;
        lines
    };
    for seq in expunged {
        writeln_crlf(stream, &format!("* {seq} EXPUNGE"))?;
    }
    writeln_crlf(stream, &format!("{tag} OK EXPUNGE completed"))
}

pub fn copy<S: Read + Write>(
    stream: &mut S,
    tag: &str,
    rest: &str,
    state: &Arc<Mutex<ServerState>>,
    selected: Option<&str>,
) -> std::io::Result<()> {
    let Some(folder_name) = selected else {
        return writeln_crlf(stream, &format!("{tag} NO no mailbox selected"));
    };
    let (set_part, destination) = rest.split_once(' ').unwrap_or((rest, ""));
    let destination = unquote(destination);
    let ok = {
        let mut guard = state.lock().unwrap();
        let copied: Option<Vec<Email>> = guard.mailbox.folder(folder_name).map(|folder| {
            parse_set(set_part, folder.emails.len())
                .into_iter()
                .map(|seq| folder.emails[seq - 1].clone())
                .collect()
        });
        let next_uid = guard.mailbox.uid_next(&destination);
        match (copied, guard.mailbox.folder_mut(&destination)) {
            (Some(emails), Some(target)) => {
                for (offset, mut email) in emails.into_iter().enumerate() {
                    email.uid = next_uid + offset as u32;
                    target.emails.push(email);
                }
                true
            }
            _ => false,
        }
    };
    if ok {
        writeln_crlf(stream, &format!("{tag} OK COPY completed"))
    } else {
        writeln_crlf(stream, &format!("{tag} NO COPY failed"))
    }
}

pub fn append<S: Read + Write>(
    stream: &mut S,
    tag: &str,
    raw: &[u8],
    state: &Arc<Mutex<ServerState>>,
) -> std::io::Result<()> {
    let text = String::from_utf8_lossy(raw);
    let mailbox_name = text
        .split_whitespace()
        .nth(2)
        .map(unquote)
        .unwrap_or_default();
    let flags: Vec<String> = text
        .find('(')
        .and_then(|open| text[open..].find(')').map(|close| (open, open + close)))
        .map(|(open, close)| {
            text[open + 1..close]
                .split_whitespace()
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default();

    // The body is the literal payload: everything after `{N}\r\n`,
    // for N bytes.
    let Some(open) = raw.iter().position(|&b| b == b'{') else {
        return writeln_crlf(stream, &format!("{tag} BAD APPEND without a literal"));
    };
    let close = raw[open..]
        .iter()
        .position(|&b| b == b'}')
        .map(|i| open + i)
        .unwrap_or(open);
    let length: usize = String::from_utf8_lossy(&raw[open + 1..close])
        .parse()
        .unwrap_or(0);
    let payload_start = close + 3;
    let body = raw
        .get(payload_start..payload_start + length)
        .unwrap_or_default()
        .to_vec();

    let ok = {
        let mut guard = state.lock().unwrap();
        let uid = guard.mailbox.uid_next(&mailbox_name);
        match guard.mailbox.folder_mut(&mailbox_name) {
            Some(folder) => {
                let mut email = Email::new(uid, "appended");
                email.body = String::from_utf8_lossy(&body).into_owned();
                email.flags = flags.into_iter().collect();
                folder.emails.push(email);
                true
            }
            None => false,
        }
    };
    if ok {
        writeln_crlf(stream, &format!("{tag} OK APPEND completed"))
    } else {
        writeln_crlf(stream, &format!("{tag} NO no such mailbox"))
    }
}

pub fn create<S: Read + Write>(
    stream: &mut S,
    tag: &str,
    rest: &str,
    state: &Arc<Mutex<ServerState>>,
) -> std::io::Result<()> {
    let name = unquote(rest);
    let mut guard = state.lock().unwrap();
    if guard.mailbox.folder(&name).is_some() {
        drop(guard);
        return writeln_crlf(stream, &format!("{tag} NO mailbox already exists"));
    }
    guard.mailbox.folders.push(super::mailbox::TestFolder {
        name,
        emails: Vec::new(),
        read_only: false,
    });
    drop(guard);
    writeln_crlf(stream, &format!("{tag} OK CREATE completed"))
}

pub fn delete<S: Read + Write>(
    stream: &mut S,
    tag: &str,
    rest: &str,
    state: &Arc<Mutex<ServerState>>,
) -> std::io::Result<()> {
    let name = unquote(rest);
    let mut guard = state.lock().unwrap();
    let before = guard.mailbox.folders.len();
    guard.mailbox.folders.retain(|folder| folder.name != name);
    let removed = guard.mailbox.folders.len() < before;
    drop(guard);
    if removed {
        writeln_crlf(stream, &format!("{tag} OK DELETE completed"))
    } else {
        writeln_crlf(stream, &format!("{tag} NO no such mailbox"))
    }
}

pub fn rename<S: Read + Write>(
    stream: &mut S,
    tag: &str,
    rest: &str,
    state: &Arc<Mutex<ServerState>>,
) -> std::io::Result<()> {
    let mut parts = rest.split(' ');
    let from = unquote(parts.next().unwrap_or(""));
    let to = unquote(parts.next().unwrap_or(""));
    let mut guard = state.lock().unwrap();
    match guard.mailbox.folder_mut(&from) {
        Some(folder) => {
            folder.name = to;
            drop(guard);
            writeln_crlf(stream, &format!("{tag} OK RENAME completed"))
        }
        None => {
            drop(guard);
            writeln_crlf(stream, &format!("{tag} NO no such mailbox"))
        }
    }
}

pub fn namespace<S: Read + Write>(stream: &mut S, tag: &str) -> std::io::Result<()> {
    writeln_crlf(stream, "* NAMESPACE ((\"\" \"/\")) NIL NIL")?;
    writeln_crlf(stream, &format!("{tag} OK NAMESPACE completed"))
}

pub fn quota_root<S: Read + Write>(
    stream: &mut S,
    tag: &str,
    rest: &str,
) -> std::io::Result<()> {
    let mailbox = unquote(rest);
    writeln_crlf(stream, &format!("* QUOTAROOT {mailbox} \"\""))?;
    writeln_crlf(stream, "* QUOTA \"\" (STORAGE 10 512)")?;
    writeln_crlf(stream, &format!("{tag} OK GETQUOTAROOT completed"))
}

pub fn quota<S: Read + Write>(stream: &mut S, tag: &str) -> std::io::Result<()> {
    writeln_crlf(stream, "* QUOTA \"\" (STORAGE 10 512)")?;
    writeln_crlf(stream, &format!("{tag} OK GETQUOTA completed"))
}

pub fn set_quota<S: Read + Write>(stream: &mut S, tag: &str, rest: &str) -> std::io::Result<()> {
    let limit = rest
        .find('(')
        .and_then(|open| rest[open..].find(')').map(|close| (open, open + close)))
        .and_then(|(open, close)| {
            rest[open + 1..close]
                .split_whitespace()
                .nth(1)
                .map(ToString::to_string)
        })
        .unwrap_or_else(|| "512".to_string());
    writeln_crlf(stream, &format!("* QUOTA \"\" (STORAGE 10 {limit})"))?;
    writeln_crlf(stream, &format!("{tag} OK SETQUOTA completed"))
}

pub fn acl<S: Read + Write>(stream: &mut S, tag: &str, rest: &str) -> std::io::Result<()> {
    let mailbox = unquote(rest);
    writeln_crlf(stream, &format!("* ACL {mailbox} user lrswipkxte"))?;
    writeln_crlf(stream, &format!("{tag} OK GETACL completed"))
}
