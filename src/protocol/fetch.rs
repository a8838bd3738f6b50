//! FETCH response payloads
//!
//! Parses the data items of a `* n FETCH (…)` response: envelopes,
//! body structures, flag updates, UID pairs, and the `BODY[…]` family
//! of section payloads.

use crate::address::Address;
use crate::error::{Error, Result};
use crate::flag::FlagSet;
use crate::headers::Headers;
use crate::protocol::tokenizer::{Token, Tokenizer};
use chrono::{DateTime, FixedOffset};

/// A parsed ENVELOPE.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope {
    /// The raw RFC 2822 date string; interpreting it is the caller's
    /// business.
    pub date: Option<String>,
    pub subject: Option<String>,
    pub from: Vec<Address>,
    pub sender: Vec<Address>,
    pub reply_to: Vec<Address>,
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
    pub bcc: Vec<Address>,
    pub in_reply_to: Option<String>,
    pub message_id: Option<String>,
}

/// A Content-Disposition with its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disposition {
    pub kind: String,
    pub params: Vec<(String, String)>,
}

/// A parsed BODYSTRUCTURE tree.
#[derive(Debug, Clone, PartialEq)]
pub enum BodyStructure {
    Single {
        mime_type: String,
        subtype: String,
        params: Vec<(String, String)>,
        id: Option<String>,
        description: Option<String>,
        encoding: Option<String>,
        size: u32,
        /// Line count, TEXT/* and MESSAGE/RFC822 only.
        lines: Option<u32>,
        md5: Option<String>,
        disposition: Option<Disposition>,
        languages: Vec<String>,
        /// Envelope of a nested MESSAGE/RFC822 part.
        envelope: Option<Box<Envelope>>,
        /// Body of a nested MESSAGE/RFC822 part.
        body: Option<Box<BodyStructure>>,
    },
    Multipart {
        subtype: String,
        parts: Vec<BodyStructure>,
        params: Vec<(String, String)>,
        disposition: Option<Disposition>,
        languages: Vec<String>,
    },
}

impl BodyStructure {
    /// The part's transfer size in bytes, where it has one.
    #[must_use]
    pub const fn size(&self) -> Option<u32> {
        match self {
            Self::Single { size, .. } => Some(*size),
            Self::Multipart { .. } => None,
        }
    }

    /// A `type/subtype` rendering of the content type.
    #[must_use]
    pub fn content_type(&self) -> String {
        match self {
            Self::Single {
                mime_type, subtype, ..
            } => format!("{mime_type}/{subtype}"),
            Self::Multipart { subtype, .. } => format!("multipart/{subtype}"),
        }
    }
}

/// What part of the message a `BODY[…]` response names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    /// The entire (sub-)message.
    Whole,
    /// The complete header block.
    Headers,
    /// `HEADER.FIELDS` / `HEADER.FIELDS.NOT` — a subset of headers.
    HeaderSubset,
    /// The MIME headers of a nested part.
    Mime,
    /// The text body.
    Text,
}

/// A parsed `BODY[…]` section name, e.g.
/// `BODY[3.2.1.HEADER.FIELDS (X-Foo Y-Bar)]<0.1024>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodySection {
    pub kind: SectionKind,
    /// Dotted part path (`3.2.1`); `None` for the top-level message.
    pub part: Option<String>,
    /// Field names of a `HEADER.FIELDS` subset.
    pub header_names: Vec<String>,
    /// Substring origin from a trailing `<start.length>`.
    pub start: Option<u32>,
    pub length: Option<u32>,
}

/// One data item of a FETCH response.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchItem {
    Envelope(Envelope),
    InternalDate(DateTime<FixedOffset>),
    Rfc822Size(u32),
    BodyStructure(BodyStructure),
    Flags(FlagSet),
    /// The UID together with the fetch's own sequence number: the
    /// UID<->seqnum mapping.
    Uid { uid: u32, seq: u32 },
    Header {
        section: Option<BodySection>,
        complete: bool,
        headers: Headers,
    },
    Text {
        section: Option<BodySection>,
        bytes: Vec<u8>,
    },
    Body {
        section: BodySection,
        bytes: Vec<u8>,
    },
}

/// A complete `* n FETCH (…)` response.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchData {
    pub seq: u32,
    pub items: Vec<FetchItem>,
}

impl FetchData {
    #[must_use]
    pub fn uid(&self) -> Option<u32> {
        self.items.iter().find_map(|item| match item {
            FetchItem::Uid { uid, .. } => Some(*uid),
            _ => None,
        })
    }

    #[must_use]
    pub fn flags(&self) -> Option<&FlagSet> {
        self.items.iter().find_map(|item| match item {
            FetchItem::Flags(flags) => Some(flags),
            _ => None,
        })
    }
}

/// Parse the parenthesized item list of a FETCH response.
pub fn parse_fetch(seq: u32, t: &mut Tokenizer<'_>) -> Result<FetchData> {
    t.expect_delimiter(b'(')?;
    let mut items = Vec::new();
    loop {
        match t.peek(false, true)? {
            Token::Delimiter(b')') => {
                t.next(false, true)?;
                return Ok(FetchData { seq, items });
            }
            Token::Eof => return Err(Error::Protocol("unterminated FETCH response".into())),
            _ => items.push(parse_item(seq, t)?),
        }
    }
}

/// Read a FETCH item key: dotted atoms joined back together
/// (`RFC822.SIZE`, `BODY.PEEK`).
fn read_key(t: &mut Tokenizer<'_>) -> Result<String> {
    let mut key = match t.next(false, true)? {
        Token::Atom(b) | Token::Numeric(_, b) => String::from_utf8_lossy(b).into_owned(),
        other => {
            return Err(Error::Protocol(format!(
                "expected FETCH item key, found {:?}",
                other.describe()
            )));
        }
    };
    while matches!(t.peek(false, true)?, Token::Delimiter(b'.')) {
        t.next(false, true)?;
        key.push('.');
        match t.next(false, true)? {
            Token::Atom(b) | Token::Numeric(_, b) => {
                key.push_str(&String::from_utf8_lossy(b));
            }
            other => {
                return Err(Error::Protocol(format!(
                    "bad FETCH item key continuation {:?}",
                    other.describe()
                )));
            }
        }
    }
    Ok(key.to_ascii_uppercase())
}

fn parse_item(seq: u32, t: &mut Tokenizer<'_>) -> Result<FetchItem> {
    let key = read_key(t)?;
    match key.as_str() {
        "ENVELOPE" => Ok(FetchItem::Envelope(parse_envelope(t)?)),
        "INTERNALDATE" => {
            let date = t
                .read_date()?
                .ok_or_else(|| Error::Protocol("NIL internal date".into()))?;
            Ok(FetchItem::InternalDate(date))
        }
        "RFC822.SIZE" => Ok(FetchItem::Rfc822Size(t.read_number()?)),
        "FLAGS" => Ok(FetchItem::Flags(t.read_flag_list()?)),
        "UID" => Ok(FetchItem::Uid {
            uid: t.read_number()?,
            seq,
        }),
        "BODYSTRUCTURE" => Ok(FetchItem::BodyStructure(parse_body_structure(t)?)),
        "RFC822.HEADER" => Ok(FetchItem::Header {
            section: None,
            complete: true,
            headers: Headers::parse(&read_nstring_bytes(t)?),
        }),
        "RFC822.TEXT" => Ok(FetchItem::Text {
            section: None,
            bytes: read_nstring_bytes(t)?,
        }),
        "RFC822" => Ok(FetchItem::Body {
            section: BodySection {
                kind: SectionKind::Whole,
                part: None,
                header_names: Vec::new(),
                start: None,
                length: None,
            },
            bytes: read_nstring_bytes(t)?,
        }),
        "BODY" | "BODY.PEEK" => match t.peek(false, true)? {
            Token::Delimiter(b'(') => Ok(FetchItem::BodyStructure(parse_body_structure(t)?)),
            Token::Delimiter(b'[') => {
                t.next(false, true)?;
                let section = parse_section(t)?;
                let bytes = read_nstring_bytes(t)?;
                Ok(section_item(section, bytes))
            }
            other => Err(Error::Protocol(format!(
                "unexpected BODY item shape {:?}",
                other.describe()
            ))),
        },
        other => Err(Error::Protocol(format!("unknown FETCH item {other:?}"))),
    }
}

fn section_item(section: BodySection, bytes: Vec<u8>) -> FetchItem {
    match section.kind {
        SectionKind::Headers if section.part.is_none() => FetchItem::Header {
            section: Some(section),
            complete: true,
            headers: Headers::parse(&bytes),
        },
        SectionKind::Headers | SectionKind::HeaderSubset | SectionKind::Mime => {
            FetchItem::Header {
                section: Some(section),
                complete: false,
                headers: Headers::parse(&bytes),
            }
        }
        SectionKind::Text => FetchItem::Text {
            section: Some(section),
            bytes,
        },
        SectionKind::Whole => FetchItem::Body { section, bytes },
    }
}

fn read_nstring_bytes(t: &mut Tokenizer<'_>) -> Result<Vec<u8>> {
    match t.next(true, false)? {
        Token::Nil => Ok(Vec::new()),
        token => {
            let description = token.describe();
            token
                .into_bytes()
                .map(std::borrow::Cow::into_owned)
                .ok_or_else(|| Error::Protocol(format!("expected nstring, found {description:?}")))
        }
    }
}

/// Parse a section name after its opening `[`, through the closing `]`
/// and any trailing `<start.length>` substring marker.
pub fn parse_section(t: &mut Tokenizer<'_>) -> Result<BodySection> {
    let mut section = BodySection {
        kind: SectionKind::Whole,
        part: None,
        header_names: Vec::new(),
        start: None,
        length: None,
    };

    loop {
        match t.next(false, true)? {
            Token::Delimiter(b']') => break,
            Token::Delimiter(b'.') => {}
            Token::Numeric(_, digits) => {
                let digits = String::from_utf8_lossy(digits).into_owned();
                match &mut section.part {
                    None => section.part = Some(digits),
                    Some(part) => {
                        part.push('.');
                        part.push_str(&digits);
                    }
                }
            }
            Token::Atom(name) => match name.to_ascii_uppercase().as_slice() {
                b"HEADER" => {
                    section.kind = SectionKind::Headers;
                    if matches!(t.peek(false, true)?, Token::Delimiter(b'.')) {
                        t.next(false, true)?;
                        // HEADER.FIELDS or HEADER.FIELDS.NOT
                        let sub = t.read_atom()?;
                        if !sub.eq_ignore_ascii_case("FIELDS") {
                            return Err(Error::Protocol(format!(
                                "unknown HEADER subsection {sub:?}"
                            )));
                        }
                        if matches!(t.peek(false, true)?, Token::Delimiter(b'.')) {
                            t.next(false, true)?;
                            t.read_atom()?; // NOT
                        }
                        section.kind = SectionKind::HeaderSubset;
                        section.header_names = t.read_string_list()?;
                    }
                }
                b"MIME" => section.kind = SectionKind::Mime,
                b"TEXT" => section.kind = SectionKind::Text,
                other => {
                    return Err(Error::Protocol(format!(
                        "unknown section name {:?}",
                        String::from_utf8_lossy(other)
                    )));
                }
            },
            other => {
                return Err(Error::Protocol(format!(
                    "bad section token {:?}",
                    other.describe()
                )));
            }
        }
    }

    // Optional substring marker.
    if matches!(t.peek(false, true)?, Token::Delimiter(b'<')) {
        t.next(false, true)?;
        section.start = Some(t.read_number()?);
        if matches!(t.peek(false, true)?, Token::Delimiter(b'.')) {
            t.next(false, true)?;
            section.length = Some(t.read_number()?);
        }
        match t.next(false, true)? {
            Token::Delimiter(b'>') => {}
            other => {
                return Err(Error::Protocol(format!(
                    "unterminated substring marker at {:?}",
                    other.describe()
                )));
            }
        }
    }
    Ok(section)
}

/// Parse a parenthesized ENVELOPE.
pub fn parse_envelope(t: &mut Tokenizer<'_>) -> Result<Envelope> {
    t.expect_delimiter(b'(')?;
    let envelope = Envelope {
        date: t.read_string_or_nil()?,
        subject: t.read_string_or_nil()?,
        from: t.read_address_list()?,
        sender: t.read_address_list()?,
        reply_to: t.read_address_list()?,
        to: t.read_address_list()?,
        cc: t.read_address_list()?,
        bcc: t.read_address_list()?,
        in_reply_to: t.read_string_or_nil()?,
        message_id: t.read_string_or_nil()?,
    };
    t.expect_delimiter(b')')?;
    Ok(envelope)
}

fn parse_disposition(t: &mut Tokenizer<'_>) -> Result<Option<Disposition>> {
    match t.next(true, false)? {
        Token::Nil => Ok(None),
        Token::Delimiter(b'(') => {
            let kind = t.read_string()?;
            let params = t.read_parameter_list()?;
            t.expect_delimiter(b')')?;
            Ok(Some(Disposition { kind, params }))
        }
        other => Err(Error::Protocol(format!(
            "expected disposition, found {:?}",
            other.describe()
        ))),
    }
}

/// Consume tokens (including nested lists) up to and including the
/// closing parenthesis of the current list.
fn skip_to_close(t: &mut Tokenizer<'_>) -> Result<()> {
    let mut depth = 0u32;
    loop {
        match t.next(true, false)? {
            Token::Delimiter(b'(') => depth += 1,
            Token::Delimiter(b')') => {
                if depth == 0 {
                    return Ok(());
                }
                depth -= 1;
            }
            Token::Eof => return Err(Error::Protocol("unterminated body structure".into())),
            _ => {}
        }
    }
}

/// Parse a parenthesized BODYSTRUCTURE (or non-extensible BODY) tree.
pub fn parse_body_structure(t: &mut Tokenizer<'_>) -> Result<BodyStructure> {
    t.expect_delimiter(b'(')?;

    if matches!(t.peek(false, false)?, Token::Delimiter(b'(')) {
        // Multipart: parts up to the subtype string.
        let mut parts = Vec::new();
        while matches!(t.peek(false, false)?, Token::Delimiter(b'(')) {
            parts.push(parse_body_structure(t)?);
        }
        let subtype = t.read_string()?;
        let mut params = Vec::new();
        let mut disposition = None;
        let mut languages = Vec::new();
        if !matches!(t.peek(false, false)?, Token::Delimiter(b')')) {
            params = t.read_parameter_list()?;
            if !matches!(t.peek(false, false)?, Token::Delimiter(b')')) {
                disposition = parse_disposition(t)?;
                if !matches!(t.peek(false, false)?, Token::Delimiter(b')')) {
                    languages = t.read_string_list()?;
                }
            }
        }
        skip_to_close(t)?;
        return Ok(BodyStructure::Multipart {
            subtype,
            parts,
            params,
            disposition,
            languages,
        });
    }

    let mime_type = t.read_string_or_nil()?.unwrap_or_default();
    let subtype = t.read_string_or_nil()?.unwrap_or_default();
    let params = t.read_parameter_list()?;
    let id = t.read_string_or_nil()?;
    let description = t.read_string_or_nil()?;
    let encoding = t.read_string_or_nil()?;
    let size = t.read_number()?;

    let mut lines = None;
    let mut envelope = None;
    let mut body = None;
    if mime_type.eq_ignore_ascii_case("MESSAGE") && subtype.eq_ignore_ascii_case("RFC822") {
        if matches!(t.peek(false, false)?, Token::Delimiter(b'(')) {
            envelope = Some(Box::new(parse_envelope(t)?));
            body = Some(Box::new(parse_body_structure(t)?));
        }
        if matches!(t.peek(false, false)?, Token::Numeric(..)) {
            lines = Some(t.read_number()?);
        }
    } else if mime_type.eq_ignore_ascii_case("TEXT")
        && matches!(t.peek(false, false)?, Token::Numeric(..))
    {
        lines = Some(t.read_number()?);
    }

    let mut md5 = None;
    let mut disposition = None;
    let mut languages = Vec::new();
    if !matches!(t.peek(true, false)?, Token::Delimiter(b')')) {
        md5 = t.read_string_or_nil()?;
        if !matches!(t.peek(true, false)?, Token::Delimiter(b')')) {
            disposition = parse_disposition(t)?;
            if !matches!(t.peek(true, false)?, Token::Delimiter(b')')) {
                languages = t.read_string_list()?;
            }
        }
    }
    skip_to_close(t)?;

    Ok(BodyStructure::Single {
        mime_type,
        subtype,
        params,
        id,
        description,
        encoding,
        size,
        lines,
        md5,
        disposition,
        languages,
        envelope,
        body,
    })
}
