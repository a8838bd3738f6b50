//! Response tokenizer
//!
//! Parses an assembled response line (with literal payloads embedded
//! at their wire positions) into a stream of typed tokens, with the
//! higher-level readers IMAP response grammar is built from: strings,
//! numbers, dates, flag lists, parenthesized parameter lists, and
//! envelope address lists.

use crate::address::Address;
use crate::error::{Error, Result};
use crate::flag::{Flag, FlagSet};
use crate::protocol::utf7;
use chrono::{DateTime, FixedOffset};
use std::borrow::Cow;

/// Delimiters that terminate an ATOM everywhere.
const ATOM_DELIMITERS: &[u8] = b"(){}%*\"\\";
/// Additional delimiters used when parsing structured atoms such as
/// `BODY[3.1.HEADER.FIELDS (X-Foo)]<0.1024>` section names.
const EXPANDED_DELIMITERS: &[u8] = b"<>[].";

/// One lexical element of a response line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'a> {
    Atom(&'a [u8]),
    /// An atom consisting solely of digits, pre-parsed.
    Numeric(u64, &'a [u8]),
    Quoted(Cow<'a, [u8]>),
    Literal(&'a [u8]),
    Nil,
    Delimiter(u8),
    Eof,
}

impl<'a> Token<'a> {
    /// The token's byte content, if it is a string-like token.
    #[must_use]
    pub fn into_bytes(self) -> Option<Cow<'a, [u8]>> {
        match self {
            Token::Atom(b) | Token::Numeric(_, b) | Token::Literal(b) => Some(Cow::Borrowed(b)),
            Token::Quoted(b) => Some(b),
            Token::Nil | Token::Eof | Token::Delimiter(_) => None,
        }
    }

    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Token::Atom(b) | Token::Numeric(_, b) | Token::Literal(b) => {
                String::from_utf8_lossy(b).into_owned()
            }
            Token::Quoted(b) => String::from_utf8_lossy(b).into_owned(),
            Token::Nil => "NIL".to_string(),
            Token::Eof => "<end of response>".to_string(),
            Token::Delimiter(b) => char::from(*b).to_string(),
        }
    }
}

fn is_delimiter(byte: u8, expanded: bool) -> bool {
    byte == b' '
        || byte < 0x20
        || byte == 0x7f
        || ATOM_DELIMITERS.contains(&byte)
        || (expanded && EXPANDED_DELIMITERS.contains(&byte))
}

/// Cursor over a single assembled response line.
#[derive(Debug)]
pub struct Tokenizer<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    #[must_use]
    pub const fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    /// Unconsumed remainder of the line.
    #[must_use]
    pub fn remainder(&self) -> &'a [u8] {
        &self.input[self.pos.min(self.input.len())..]
    }

    /// Consume the rest of the line as human-readable text.
    pub fn rest_as_text(&mut self) -> String {
        let text = String::from_utf8_lossy(self.remainder()).into_owned();
        self.pos = self.input.len();
        text
    }

    #[must_use]
    pub fn at_end(&self) -> bool {
        self.input[self.pos..].iter().all(|b| *b == b' ')
    }

    /// Next token without consuming it.
    pub fn peek(&mut self, nil_allowed: bool, expanded: bool) -> Result<Token<'a>> {
        let saved = self.pos;
        let token = self.next(nil_allowed, expanded);
        self.pos = saved;
        token
    }

    /// Consume and return the next token.
    pub fn next(&mut self, nil_allowed: bool, expanded: bool) -> Result<Token<'a>> {
        while self.pos < self.input.len() && self.input[self.pos] == b' ' {
            self.pos += 1;
        }
        let Some(&byte) = self.input.get(self.pos) else {
            return Ok(Token::Eof);
        };

        match byte {
            b'"' => self.quoted(),
            b'{' => self.literal(),
            _ if is_delimiter(byte, expanded) => {
                self.pos += 1;
                Ok(Token::Delimiter(byte))
            }
            _ => {
                let start = self.pos;
                while self.pos < self.input.len() && !is_delimiter(self.input[self.pos], expanded)
                {
                    self.pos += 1;
                }
                let atom = &self.input[start..self.pos];
                if nil_allowed && atom.eq_ignore_ascii_case(b"NIL") {
                    return Ok(Token::Nil);
                }
                if atom.iter().all(u8::is_ascii_digit)
                    && let Ok(value) = std::str::from_utf8(atom).unwrap_or("").parse::<u64>()
                {
                    return Ok(Token::Numeric(value, atom));
                }
                Ok(Token::Atom(atom))
            }
        }
    }

    fn quoted(&mut self) -> Result<Token<'a>> {
        let start = self.pos + 1;
        let mut i = start;
        let mut escaped = false;
        while i < self.input.len() {
            match self.input[i] {
                b'\\' if !escaped => escaped = true,
                b'"' if !escaped => {
                    let raw = &self.input[start..i];
                    self.pos = i + 1;
                    if memchr::memchr(b'\\', raw).is_none() {
                        return Ok(Token::Quoted(Cow::Borrowed(raw)));
                    }
                    let mut unescaped = Vec::with_capacity(raw.len());
                    let mut esc = false;
                    for &b in raw {
                        if esc || b != b'\\' {
                            unescaped.push(b);
                            esc = false;
                        } else {
                            esc = true;
                        }
                    }
                    return Ok(Token::Quoted(Cow::Owned(unescaped)));
                }
                _ => escaped = false,
            }
            i += 1;
        }
        Err(Error::Protocol("unterminated quoted string".into()))
    }

    fn literal(&mut self) -> Result<Token<'a>> {
        let close = memchr::memchr(b'}', &self.input[self.pos..])
            .map(|i| self.pos + i)
            .ok_or_else(|| Error::Protocol("unterminated literal length".into()))?;
        let digits = &self.input[self.pos + 1..close];
        let length: usize = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::Protocol("malformed literal length".into()))?;
        let payload_start = close + 3;
        if self.input.get(close + 1..payload_start) != Some(b"\r\n")
            || self.input.len() < payload_start + length
        {
            return Err(Error::Protocol("truncated literal payload".into()));
        }
        self.pos = payload_start + length;
        Ok(Token::Literal(&self.input[payload_start..payload_start + length]))
    }

    /// If the next non-space byte opens a `[…]` response code, consume
    /// it and return the bracketed interior.
    pub fn take_bracketed(&mut self) -> Option<&'a [u8]> {
        let mut i = self.pos;
        while self.input.get(i) == Some(&b' ') {
            i += 1;
        }
        if self.input.get(i) != Some(&b'[') {
            return None;
        }
        let close = memchr::memchr(b']', &self.input[i..]).map(|p| i + p)?;
        self.pos = close + 1;
        Some(&self.input[i + 1..close])
    }

    /// Consume the next token, requiring the single-byte delimiter `b`.
    pub fn expect_delimiter(&mut self, expected: u8) -> Result<()> {
        match self.next(false, false)? {
            Token::Delimiter(b) if b == expected => Ok(()),
            other => Err(Error::Protocol(format!(
                "expected {:?}, found {:?}",
                char::from(expected),
                other.describe()
            ))),
        }
    }

    // -- typed readers --

    /// Read a string-like token as raw bytes.
    pub fn read_byte_array(&mut self) -> Result<Cow<'a, [u8]>> {
        let token = self.next(false, false)?;
        let description = token.describe();
        token
            .into_bytes()
            .ok_or_else(|| Error::Protocol(format!("expected string, found {description:?}")))
    }

    /// Read a string-like token as text.
    pub fn read_string(&mut self) -> Result<String> {
        Ok(String::from_utf8_lossy(&self.read_byte_array()?).into_owned())
    }

    /// Read a string-like token or NIL.
    pub fn read_string_or_nil(&mut self) -> Result<Option<String>> {
        match self.next(true, false)? {
            Token::Nil => Ok(None),
            token => {
                let description = token.describe();
                token
                    .into_bytes()
                    .map(|b| Some(String::from_utf8_lossy(&b).into_owned()))
                    .ok_or_else(|| {
                        Error::Protocol(format!("expected nstring, found {description:?}"))
                    })
            }
        }
    }

    /// Read an atom.
    pub fn read_atom(&mut self) -> Result<String> {
        match self.next(false, false)? {
            Token::Atom(b) | Token::Numeric(_, b) => {
                Ok(String::from_utf8_lossy(b).into_owned())
            }
            other => Err(Error::Protocol(format!(
                "expected atom, found {:?}",
                other.describe()
            ))),
        }
    }

    /// Read an unsigned 32-bit number.
    pub fn read_number(&mut self) -> Result<u32> {
        let value = self.read_long()?;
        u32::try_from(value)
            .map_err(|_| Error::Protocol(format!("number {value} out of 32-bit range")))
    }

    /// Read an unsigned 64-bit number.
    pub fn read_long(&mut self) -> Result<u64> {
        match self.next(false, false)? {
            Token::Numeric(value, _) => Ok(value),
            other => Err(Error::Protocol(format!(
                "expected number, found {:?}",
                other.describe()
            ))),
        }
    }

    /// Read an RFC 3501 date-time (`d-MMM-yyyy HH:mm:ss +ZZZZ`), or
    /// `None` for NIL.
    pub fn read_date(&mut self) -> Result<Option<DateTime<FixedOffset>>> {
        let Some(text) = self.read_string_or_nil()? else {
            return Ok(None);
        };
        DateTime::parse_from_str(text.trim(), "%d-%b-%Y %H:%M:%S %z")
            .or_else(|_| DateTime::parse_from_str(text.trim(), "%e-%b-%Y %H:%M:%S %z"))
            .map(Some)
            .map_err(|e| Error::Protocol(format!("bad date {text:?}: {e}")))
    }

    /// Read a mailbox name, decoding modified UTF-7.
    pub fn read_mailbox(&mut self) -> Result<String> {
        let bytes = self.read_byte_array()?;
        utf7::decode(&bytes)
    }

    /// Read a parenthesized flag list.
    pub fn read_flag_list(&mut self) -> Result<FlagSet> {
        self.expect_delimiter(b'(')?;
        let mut flags = FlagSet::new();
        loop {
            match self.next(false, false)? {
                Token::Delimiter(b')') => return Ok(flags),
                Token::Delimiter(b'\\') => match self.next(false, false)? {
                    Token::Atom(name) | Token::Numeric(_, name) => {
                        flags.insert(Flag::from_system_name(&String::from_utf8_lossy(name)));
                    }
                    Token::Delimiter(b'*') => {
                        flags.insert(Flag::UserFlagsAllowed);
                    }
                    other => {
                        return Err(Error::Protocol(format!(
                            "bad system flag {:?}",
                            other.describe()
                        )));
                    }
                },
                Token::Atom(name) | Token::Numeric(_, name) => {
                    flags.insert(Flag::Keyword(String::from_utf8_lossy(name).into_owned()));
                }
                other => {
                    return Err(Error::Protocol(format!(
                        "bad flag list element {:?}",
                        other.describe()
                    )));
                }
            }
        }
    }

    /// Read a string list: NIL, a bare string, or `(s1 s2 …)`.
    pub fn read_string_list(&mut self) -> Result<Vec<String>> {
        match self.peek(true, false)? {
            Token::Nil => {
                self.next(true, false)?;
                Ok(Vec::new())
            }
            Token::Delimiter(b'(') => {
                self.next(false, false)?;
                let mut items = Vec::new();
                while !matches!(self.peek(false, false)?, Token::Delimiter(b')')) {
                    items.push(self.read_string()?);
                }
                self.next(false, false)?;
                Ok(items)
            }
            _ => Ok(vec![self.read_string()?]),
        }
    }

    /// Read a parameter list: NIL or `(key value key value …)`.
    pub fn read_parameter_list(&mut self) -> Result<Vec<(String, String)>> {
        match self.next(true, false)? {
            Token::Nil => Ok(Vec::new()),
            Token::Delimiter(b'(') => {
                let mut params = Vec::new();
                loop {
                    if matches!(self.peek(false, false)?, Token::Delimiter(b')')) {
                        self.next(false, false)?;
                        return Ok(params);
                    }
                    let key = self.read_string()?;
                    let value = self.read_string_or_nil()?.unwrap_or_default();
                    params.push((key, value));
                }
            }
            other => Err(Error::Protocol(format!(
                "expected parameter list, found {:?}",
                other.describe()
            ))),
        }
    }

    /// Read an address list: NIL or `((personal routing mailbox host) …)`,
    /// folding group constructs into [`Address::Group`] values.
    pub fn read_address_list(&mut self) -> Result<Vec<Address>> {
        match self.next(true, false)? {
            Token::Nil => Ok(Vec::new()),
            Token::Delimiter(b'(') => {
                let mut addresses = Vec::new();
                while !matches!(self.peek(false, false)?, Token::Delimiter(b')')) {
                    if let Some(address) = self.read_address()? {
                        addresses.push(address);
                    }
                }
                self.next(false, false)?;
                Ok(addresses)
            }
            other => Err(Error::Protocol(format!(
                "expected address list, found {:?}",
                other.describe()
            ))),
        }
    }

    /// Read one server address 4-tuple.
    ///
    /// A tuple with a nil host starts a group (when the mailbox is
    /// present) or terminates one (when it is nil); group members are
    /// accumulated here, so the return value is `None` only for a
    /// terminator seen without a matching group start.
    pub fn read_address(&mut self) -> Result<Option<Address>> {
        self.expect_delimiter(b'(')?;
        let personal = self.read_string_or_nil()?;
        let routing = self.read_string_or_nil()?;
        let mailbox = self.read_string_or_nil()?;
        let host = self.read_string_or_nil()?;
        self.expect_delimiter(b')')?;

        match (host, mailbox) {
            (Some(host), mailbox) => Ok(Some(Address::Mailbox {
                personal,
                routing,
                mailbox: mailbox.unwrap_or_default(),
                host,
            })),
            (None, Some(group_name)) => {
                let mut members = Vec::new();
                loop {
                    match self.peek(false, false)? {
                        // List closed without a group terminator.
                        Token::Delimiter(b')') | Token::Eof => break,
                        _ => match self.read_address()? {
                            Some(member) => members.push(member),
                            None => break,
                        },
                    }
                }
                Ok(Some(Address::group(group_name, members)))
            }
            (None, None) => Ok(None),
        }
    }
}
