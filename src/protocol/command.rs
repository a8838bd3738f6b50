//! Command assembly
//!
//! Builds the byte segments of one tagged command. Literals split the
//! command into multiple segments; the connection writes a segment,
//! waits for the server's `+` continuation, then writes the next.

use crate::fetch_profile::FetchProfile;
use crate::flag::{Flag, FlagSet};
use crate::protocol::utf7;
use crate::search::SearchTerm;
use chrono::{DateTime, FixedOffset, NaiveDate};

/// How a byte string must be encoded on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringEncoding {
    Atom,
    Quoted,
    Literal,
}

/// Pick the wire encoding for an arbitrary byte string.
///
/// LITERAL when any byte cannot appear inside a quoted string (NUL,
/// CR, LF, or non-ASCII); QUOTED when the bytes are not a valid atom
/// (empty, delimiter, or control character); ATOM otherwise.
#[must_use]
pub fn string_encoding(bytes: &[u8]) -> StringEncoding {
    if bytes
        .iter()
        .any(|&b| b == 0 || b == b'\r' || b == b'\n' || b > 0x7f)
    {
        return StringEncoding::Literal;
    }
    if bytes.is_empty()
        || bytes
            .iter()
            .any(|&b| b <= b' ' || b == 0x7f || b"(){}%*\"\\[]".contains(&b))
    {
        return StringEncoding::Quoted;
    }
    StringEncoding::Atom
}

/// Accumulates one command as tag-prefixed byte segments.
#[derive(Debug)]
pub struct CommandBuilder {
    tag: String,
    segments: Vec<Vec<u8>>,
    need_space: bool,
}

impl CommandBuilder {
    /// Start a command `a<sequence> <verb>`.
    #[must_use]
    pub fn new(sequence: u32, verb: &str) -> Self {
        let tag = format!("a{sequence}");
        let mut first = Vec::with_capacity(64);
        first.extend_from_slice(tag.as_bytes());
        first.push(b' ');
        first.extend_from_slice(verb.as_bytes());
        Self {
            tag,
            segments: vec![first],
            need_space: true,
        }
    }

    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    fn current(&mut self) -> &mut Vec<u8> {
        self.segments.last_mut().expect("at least one segment")
    }

    fn space(&mut self) {
        if self.need_space {
            self.current().push(b' ');
        }
        self.need_space = true;
    }

    /// Append raw bytes with no separator handling.
    pub fn append_raw(&mut self, bytes: &[u8]) {
        self.current().extend_from_slice(bytes);
    }

    pub fn append_atom(&mut self, atom: &str) {
        self.space();
        self.current().extend_from_slice(atom.as_bytes());
    }

    pub fn append_number(&mut self, n: u32) {
        self.append_atom(&n.to_string());
    }

    pub fn append_quoted(&mut self, bytes: &[u8]) {
        self.space();
        let buffer = self.current();
        buffer.push(b'"');
        for &b in bytes {
            if b == b'"' || b == b'\\' {
                buffer.push(b'\\');
            }
            buffer.push(b);
        }
        buffer.push(b'"');
    }

    /// Append a literal: `{N}` closes the current segment and the
    /// payload opens the next one.
    pub fn append_literal(&mut self, bytes: &[u8]) {
        self.space();
        let marker = format!("{{{}}}\r\n", bytes.len());
        self.current().extend_from_slice(marker.as_bytes());
        self.segments.push(bytes.to_vec());
        self.need_space = true;
    }

    /// Append a string in whatever encoding its bytes require.
    pub fn append_string(&mut self, bytes: &[u8]) {
        match string_encoding(bytes) {
            StringEncoding::Atom => {
                self.space();
                self.current().extend_from_slice(bytes);
            }
            StringEncoding::Quoted => self.append_quoted(bytes),
            StringEncoding::Literal => self.append_literal(bytes),
        }
    }

    /// Append a string as QUOTED or LITERAL, never as a bare atom.
    /// SEARCH string arguments use this form.
    pub fn append_quoted_or_literal(&mut self, bytes: &[u8]) {
        if string_encoding(bytes) == StringEncoding::Literal {
            self.append_literal(bytes);
        } else {
            self.append_quoted(bytes);
        }
    }

    /// Append a mailbox name, applying modified UTF-7.
    pub fn append_mailbox(&mut self, name: &str) {
        self.append_string(&utf7::encode(name));
    }

    pub fn begin_list(&mut self) {
        self.space();
        self.current().push(b'(');
        self.need_space = false;
    }

    pub fn end_list(&mut self) {
        self.current().push(b')');
        self.need_space = true;
    }

    /// Append a parenthesized flag list. `\Recent` never travels to
    /// the server and is skipped, as is the `\*` wildcard.
    pub fn append_flags(&mut self, flags: &FlagSet) {
        self.begin_list();
        for flag in flags.iter() {
            match flag {
                Flag::Recent | Flag::UserFlagsAllowed => {}
                other => self.append_atom(&other.as_imap_string()),
            }
        }
        self.end_list();
    }

    /// Append an RFC 3501 date-time as a quoted string
    /// (`d-MMM-yyyy HH:mm:ss +ZZZZ`, no leading zero in the day).
    pub fn append_date(&mut self, date: &DateTime<FixedOffset>) {
        let text = date.format("%-d-%b-%Y %H:%M:%S %z").to_string();
        self.append_quoted(text.as_bytes());
    }

    /// Append a SEARCH date (`d-MMM-yyyy`).
    pub fn append_search_date(&mut self, date: NaiveDate) {
        self.append_atom(&date.format("%-d-%b-%Y").to_string());
    }

    /// Append a `[part.section]` suffix directly after the preceding
    /// atom, with no separating whitespace.
    pub fn append_body_section(&mut self, part: Option<&str>, section: Option<&str>) {
        let buffer = self.current();
        buffer.push(b'[');
        if let Some(part) = part {
            buffer.extend_from_slice(part.as_bytes());
            if section.is_some() {
                buffer.push(b'.');
            }
        }
        if let Some(section) = section {
            buffer.extend_from_slice(section.as_bytes());
        }
        buffer.push(b']');
        self.need_space = true;
    }

    /// Append a search term, prefixed by `CHARSET UTF-8` when any of
    /// its strings need bytes above US-ASCII.
    pub fn append_search_term(&mut self, term: &SearchTerm) {
        if term.needs_utf8() {
            self.append_atom("CHARSET");
            self.append_atom("UTF-8");
        }
        term.emit(self);
    }

    /// Append the FETCH item list for a prefetch profile.
    pub fn append_fetch_profile(&mut self, profile: &FetchProfile) {
        self.begin_list();
        if profile.uid {
            self.append_atom("UID");
        }
        if profile.envelope {
            self.append_atom("ENVELOPE");
            self.append_atom("INTERNALDATE");
            self.append_atom("RFC822.SIZE");
        }
        if profile.flags {
            self.append_atom("FLAGS");
        }
        if profile.content_info {
            self.append_atom("BODYSTRUCTURE");
        }
        if profile.size && !profile.envelope {
            self.append_atom("RFC822.SIZE");
        }
        if profile.all_headers {
            self.append_atom("BODY.PEEK");
            self.append_body_section(None, Some("HEADER"));
        } else if !profile.headers.is_empty() {
            self.append_atom("BODY.PEEK");
            let mut section = String::from("HEADER.FIELDS (");
            section.push_str(&profile.headers.join(" "));
            section.push(')');
            self.append_body_section(None, Some(&section));
        }
        self.end_list();
    }

    /// The command's wire segments. The terminating CRLF of the final
    /// segment is the sender's job.
    #[must_use]
    pub fn into_segments(self) -> (String, Vec<Vec<u8>>) {
        (self.tag, self.segments)
    }
}
