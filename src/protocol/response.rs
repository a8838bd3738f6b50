//! Response classification
//!
//! Turns an assembled response line into a typed record: a tagged
//! completion, a continuation request, or one of the untagged response
//! specializations.

use crate::error::{Error, Result};
use crate::flag::FlagSet;
use crate::protocol::fetch::{self, FetchData};
use crate::protocol::reader::ResponseLine;
use crate::protocol::tokenizer::{Token, Tokenizer};
use std::collections::HashSet;

/// Completion status of a tagged or condition response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Ok,
    No,
    Bad,
    Preauth,
    Bye,
}

/// A bracketed response code with its raw arguments, e.g.
/// `[UIDVALIDITY 1000]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseCode {
    pub keyword: String,
    pub args: Vec<String>,
}

impl ResponseCode {
    /// The first argument parsed as a number, if there is one.
    #[must_use]
    pub fn number(&self) -> Option<u32> {
        self.args.first().and_then(|a| a.parse().ok())
    }
}

/// A tagged command completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedResponse {
    pub tag: String,
    pub status: ResponseStatus,
    pub code: Option<ResponseCode>,
    pub message: String,
}

impl TaggedResponse {
    #[must_use]
    pub fn has_code(&self, keyword: &str) -> bool {
        self.code
            .as_ref()
            .is_some_and(|c| c.keyword.eq_ignore_ascii_case(keyword))
    }
}

/// An untagged `OK`/`NO`/`BAD`/`BYE`/`PREAUTH` condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionData {
    pub status: ResponseStatus,
    pub code: Option<ResponseCode>,
    pub message: String,
}

impl ConditionData {
    #[must_use]
    pub fn has_code(&self, keyword: &str) -> bool {
        self.code
            .as_ref()
            .is_some_and(|c| c.keyword.eq_ignore_ascii_case(keyword))
    }
}

/// Server capability set with the SASL mechanisms broken out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    names: HashSet<String>,
    auth: HashSet<String>,
}

impl Capabilities {
    pub fn insert(&mut self, capability: &str) {
        let upper = capability.to_ascii_uppercase();
        if let Some(mechanism) = upper.strip_prefix("AUTH=") {
            self.auth.insert(mechanism.to_string());
        }
        self.names.insert(upper);
    }

    #[must_use]
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut capabilities = Self::default();
        for name in names {
            capabilities.insert(name);
        }
        capabilities
    }

    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.names.contains(&name.to_ascii_uppercase())
    }

    #[must_use]
    pub fn supports_auth(&self, mechanism: &str) -> bool {
        self.auth.contains(&mechanism.to_ascii_uppercase())
    }

    #[must_use]
    pub fn auth_mechanisms(&self) -> impl Iterator<Item = &str> {
        self.auth.iter().map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Attributes of a LIST/LSUB entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListAttributes {
    pub noinferiors: bool,
    pub noselect: bool,
    pub marked: bool,
    pub unmarked: bool,
    pub has_children: bool,
    pub has_no_children: bool,
    /// Attributes outside the well-known set, backslash stripped.
    pub other: Vec<String>,
}

/// One LIST or LSUB entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListData {
    pub name: String,
    pub separator: Option<char>,
    pub attributes: ListAttributes,
}

/// A STATUS result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusData {
    pub mailbox: String,
    pub messages: Option<u32>,
    pub recent: Option<u32>,
    pub uid_next: Option<u32>,
    pub uid_validity: Option<u32>,
    pub unseen: Option<u32>,
}

/// One namespace prefix/separator pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    pub prefix: String,
    pub separator: Option<char>,
}

/// The three NAMESPACE lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceData {
    pub personal: Vec<Namespace>,
    pub other_users: Vec<Namespace>,
    pub shared: Vec<Namespace>,
}

/// An ACL response: identifier/rights pairs for a mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclData {
    pub mailbox: String,
    pub entries: Vec<AclEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclEntry {
    pub name: String,
    pub rights: String,
}

/// A LISTRIGHTS response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRightsData {
    pub mailbox: String,
    pub name: String,
    pub required: String,
    pub optional: Vec<String>,
}

/// A MYRIGHTS response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MyRightsData {
    pub mailbox: String,
    pub rights: String,
}

/// One QUOTA resource triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaResource {
    pub name: String,
    pub usage: u64,
    pub limit: u64,
}

/// A QUOTA response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaData {
    pub root: String,
    pub resources: Vec<QuotaResource>,
}

/// A QUOTAROOT response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaRootData {
    pub mailbox: String,
    pub roots: Vec<String>,
}

/// Access mode of a selected mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderMode {
    ReadOnly,
    ReadWrite,
}

/// Aggregated server state for a selected mailbox, merged from the
/// untagged responses of a SELECT or EXAMINE.
#[derive(Debug, Clone, PartialEq)]
pub struct MailboxStatus {
    pub mode: FolderMode,
    pub messages: u32,
    pub recent: u32,
    pub unseen: Option<u32>,
    pub uid_validity: Option<u32>,
    pub uid_next: Option<u32>,
    pub available_flags: FlagSet,
    pub permanent_flags: FlagSet,
}

impl Default for MailboxStatus {
    fn default() -> Self {
        Self {
            mode: FolderMode::ReadOnly,
            messages: 0,
            recent: 0,
            unseen: None,
            uid_validity: None,
            uid_next: None,
            available_flags: FlagSet::new(),
            permanent_flags: FlagSet::new(),
        }
    }
}

/// An untagged server response.
#[derive(Debug, Clone, PartialEq)]
pub enum UntaggedResponse {
    Capability(Capabilities),
    Exists(u32),
    Recent(u32),
    Expunge(u32),
    Flags(FlagSet),
    /// Carried inside `* OK [PERMANENTFLAGS (…)]`.
    PermanentFlags(FlagSet),
    Condition(ConditionData),
    Status(StatusData),
    List(ListData),
    Lsub(ListData),
    Search(Vec<u32>),
    Fetch(FetchData),
    Namespace(NamespaceData),
    Acl(AclData),
    ListRights(ListRightsData),
    MyRights(MyRightsData),
    Quota(QuotaData),
    QuotaRoot(QuotaRootData),
    /// Anything this client does not model; kept for logging.
    Unknown { keyword: String, line: Vec<u8> },
}

/// A classified server response.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Tagged(TaggedResponse),
    Continuation(Vec<u8>),
    Untagged(UntaggedResponse),
}

/// Classify one logical response line.
pub fn classify(line: &ResponseLine) -> Result<Response> {
    let bytes = line.bytes.as_slice();
    if bytes.first() == Some(&b'+') {
        let payload = bytes.get(2..).unwrap_or_default().to_vec();
        return Ok(Response::Continuation(payload));
    }
    if let Some(rest) = bytes.strip_prefix(b"* ") {
        return Ok(Response::Untagged(parse_untagged(rest)?));
    }
    parse_tagged(bytes)
}

fn parse_status_atom(atom: &str) -> Option<ResponseStatus> {
    match atom.to_ascii_uppercase().as_str() {
        "OK" => Some(ResponseStatus::Ok),
        "NO" => Some(ResponseStatus::No),
        "BAD" => Some(ResponseStatus::Bad),
        "PREAUTH" => Some(ResponseStatus::Preauth),
        "BYE" => Some(ResponseStatus::Bye),
        _ => None,
    }
}

fn parse_code(t: &mut Tokenizer<'_>) -> Result<Option<ResponseCode>> {
    let Some(inner) = t.take_bracketed() else {
        return Ok(None);
    };
    let mut inner_tokens = Tokenizer::new(inner);
    let keyword = inner_tokens.read_atom()?;
    let mut args = Vec::new();
    loop {
        match inner_tokens.next(true, false)? {
            Token::Eof => break,
            Token::Delimiter(_) => {}
            Token::Nil => args.push("NIL".to_string()),
            token => args.push(token.describe()),
        }
    }
    Ok(Some(ResponseCode { keyword, args }))
}

fn parse_tagged(bytes: &[u8]) -> Result<Response> {
    let mut t = Tokenizer::new(bytes);
    let tag = t.read_atom().map_err(|_| {
        Error::Protocol(format!(
            "unparseable response line {:?}",
            String::from_utf8_lossy(bytes)
        ))
    })?;
    let status_atom = t.read_atom()?;
    let status = parse_status_atom(&status_atom).ok_or_else(|| {
        Error::Protocol(format!("unknown completion status {status_atom:?}"))
    })?;
    let code = parse_code(&mut t)?;
    let message = t.rest_as_text().trim().to_string();
    Ok(Response::Tagged(TaggedResponse {
        tag,
        status,
        code,
        message,
    }))
}

fn parse_untagged(rest: &[u8]) -> Result<UntaggedResponse> {
    let mut t = Tokenizer::new(rest);
    match t.next(false, false)? {
        Token::Numeric(value, _) => {
            let size = u32::try_from(value)
                .map_err(|_| Error::Protocol(format!("count {value} out of range")))?;
            let keyword = t.read_atom()?;
            match keyword.to_ascii_uppercase().as_str() {
                "EXISTS" => Ok(UntaggedResponse::Exists(size)),
                "RECENT" => Ok(UntaggedResponse::Recent(size)),
                "EXPUNGE" => Ok(UntaggedResponse::Expunge(size)),
                "FETCH" => Ok(UntaggedResponse::Fetch(fetch::parse_fetch(size, &mut t)?)),
                other => Ok(UntaggedResponse::Unknown {
                    keyword: other.to_string(),
                    line: rest.to_vec(),
                }),
            }
        }
        Token::Atom(keyword) => {
            let keyword = String::from_utf8_lossy(keyword).to_ascii_uppercase();
            parse_keyword_response(&keyword, rest, &mut t)
        }
        other => Err(Error::Protocol(format!(
            "unclassifiable untagged response starting with {:?}",
            other.describe()
        ))),
    }
}

fn parse_keyword_response(
    keyword: &str,
    rest: &[u8],
    t: &mut Tokenizer<'_>,
) -> Result<UntaggedResponse> {
    match keyword {
        "OK" | "NO" | "BAD" | "BYE" | "PREAUTH" => {
            let status = parse_status_atom(keyword).expect("status keyword");
            let code = parse_code(t)?;
            // PERMANENTFLAGS only ever travels as a response code; lift
            // it out so the SELECT merge sees a first-class record.
            if let Some(code) = &code
                && code.keyword.eq_ignore_ascii_case("PERMANENTFLAGS")
            {
                let start = memchr::memmem::find(rest, b"(").unwrap_or(0);
                let mut flags_tokens = Tokenizer::new(&rest[start..]);
                return Ok(UntaggedResponse::PermanentFlags(
                    flags_tokens.read_flag_list()?,
                ));
            }
            let message = t.rest_as_text().trim().to_string();
            Ok(UntaggedResponse::Condition(ConditionData {
                status,
                code,
                message,
            }))
        }
        "CAPABILITY" => {
            let mut capabilities = Capabilities::default();
            loop {
                match t.next(false, false)? {
                    Token::Eof => break,
                    Token::Atom(name) | Token::Numeric(_, name) => {
                        capabilities.insert(&String::from_utf8_lossy(name));
                    }
                    Token::Delimiter(_) => {}
                    other => {
                        return Err(Error::Protocol(format!(
                            "bad capability token {:?}",
                            other.describe()
                        )));
                    }
                }
            }
            Ok(UntaggedResponse::Capability(capabilities))
        }
        "FLAGS" => Ok(UntaggedResponse::Flags(t.read_flag_list()?)),
        "LIST" => Ok(UntaggedResponse::List(parse_list(t)?)),
        "LSUB" => Ok(UntaggedResponse::Lsub(parse_list(t)?)),
        "STATUS" => parse_status(t),
        "SEARCH" => {
            let mut numbers = Vec::new();
            while let Token::Numeric(value, _) = t.next(false, false)? {
                numbers.push(
                    u32::try_from(value)
                        .map_err(|_| Error::Protocol("search result out of range".into()))?,
                );
            }
            Ok(UntaggedResponse::Search(numbers))
        }
        "NAMESPACE" => Ok(UntaggedResponse::Namespace(NamespaceData {
            personal: parse_namespace_list(t)?,
            other_users: parse_namespace_list(t)?,
            shared: parse_namespace_list(t)?,
        })),
        "ACL" => {
            let mailbox = t.read_mailbox()?;
            let mut entries = Vec::new();
            while !matches!(t.peek(false, false)?, Token::Eof) {
                entries.push(AclEntry {
                    name: t.read_string()?,
                    rights: t.read_string()?,
                });
            }
            Ok(UntaggedResponse::Acl(AclData { mailbox, entries }))
        }
        "LISTRIGHTS" => {
            let mailbox = t.read_mailbox()?;
            let name = t.read_string()?;
            let required = t.read_string()?;
            let mut optional = Vec::new();
            while !matches!(t.peek(false, false)?, Token::Eof) {
                optional.push(t.read_string()?);
            }
            Ok(UntaggedResponse::ListRights(ListRightsData {
                mailbox,
                name,
                required,
                optional,
            }))
        }
        "MYRIGHTS" => Ok(UntaggedResponse::MyRights(MyRightsData {
            mailbox: t.read_mailbox()?,
            rights: t.read_string()?,
        })),
        "QUOTA" => {
            let root = t.read_string()?;
            t.expect_delimiter(b'(')?;
            let mut resources = Vec::new();
            while !matches!(t.peek(false, false)?, Token::Delimiter(b')')) {
                resources.push(QuotaResource {
                    name: t.read_string()?,
                    usage: t.read_long()?,
                    limit: t.read_long()?,
                });
            }
            t.next(false, false)?;
            Ok(UntaggedResponse::Quota(QuotaData { root, resources }))
        }
        "QUOTAROOT" => {
            let mailbox = t.read_mailbox()?;
            let mut roots = Vec::new();
            while !matches!(t.peek(false, false)?, Token::Eof) {
                roots.push(t.read_string()?);
            }
            Ok(UntaggedResponse::QuotaRoot(QuotaRootData {
                mailbox,
                roots,
            }))
        }
        other => Ok(UntaggedResponse::Unknown {
            keyword: other.to_string(),
            line: rest.to_vec(),
        }),
    }
}

fn parse_list(t: &mut Tokenizer<'_>) -> Result<ListData> {
    t.expect_delimiter(b'(')?;
    let mut attributes = ListAttributes::default();
    loop {
        match t.next(false, false)? {
            Token::Delimiter(b')') => break,
            Token::Delimiter(b'\\') => {
                let name = t.read_atom()?;
                match name.to_ascii_lowercase().as_str() {
                    "noinferiors" => attributes.noinferiors = true,
                    "noselect" => attributes.noselect = true,
                    "marked" => attributes.marked = true,
                    "unmarked" => attributes.unmarked = true,
                    "haschildren" => attributes.has_children = true,
                    "hasnochildren" => attributes.has_no_children = true,
                    _ => attributes.other.push(name),
                }
            }
            other => {
                return Err(Error::Protocol(format!(
                    "bad LIST attribute {:?}",
                    other.describe()
                )));
            }
        }
    }
    let separator = match t.next(true, false)? {
        Token::Nil => None,
        Token::Quoted(s) => s.first().map(|&b| char::from(b)),
        other => {
            return Err(Error::Protocol(format!(
                "bad LIST separator {:?}",
                other.describe()
            )));
        }
    };
    let name = t.read_mailbox()?;
    Ok(ListData {
        name,
        separator,
        attributes,
    })
}

fn parse_status(t: &mut Tokenizer<'_>) -> Result<UntaggedResponse> {
    let mut status = StatusData {
        mailbox: t.read_mailbox()?,
        ..StatusData::default()
    };
    t.expect_delimiter(b'(')?;
    loop {
        match t.next(false, false)? {
            Token::Delimiter(b')') => break,
            Token::Atom(name) => {
                let value = t.read_number()?;
                match name.to_ascii_uppercase().as_slice() {
                    b"MESSAGES" => status.messages = Some(value),
                    b"RECENT" => status.recent = Some(value),
                    b"UIDNEXT" => status.uid_next = Some(value),
                    b"UIDVALIDITY" => status.uid_validity = Some(value),
                    b"UNSEEN" => status.unseen = Some(value),
                    _ => {}
                }
            }
            other => {
                return Err(Error::Protocol(format!(
                    "bad STATUS attribute {:?}",
                    other.describe()
                )));
            }
        }
    }
    Ok(UntaggedResponse::Status(status))
}

fn parse_namespace_list(t: &mut Tokenizer<'_>) -> Result<Vec<Namespace>> {
    match t.next(true, false)? {
        Token::Nil => Ok(Vec::new()),
        Token::Delimiter(b'(') => {
            let mut namespaces = Vec::new();
            loop {
                match t.next(false, false)? {
                    Token::Delimiter(b')') => return Ok(namespaces),
                    Token::Delimiter(b'(') => {
                        let prefix = t.read_string()?;
                        let separator = match t.next(true, false)? {
                            Token::Nil => None,
                            Token::Quoted(s) => s.first().map(|&b| char::from(b)),
                            other => {
                                return Err(Error::Protocol(format!(
                                    "bad namespace separator {:?}",
                                    other.describe()
                                )));
                            }
                        };
                        // Namespace extensions are permitted; skip them.
                        loop {
                            match t.next(true, false)? {
                                Token::Delimiter(b')') => break,
                                Token::Eof => {
                                    return Err(Error::Protocol(
                                        "unterminated namespace".into(),
                                    ));
                                }
                                _ => {}
                            }
                        }
                        namespaces.push(Namespace { prefix, separator });
                    }
                    other => {
                        return Err(Error::Protocol(format!(
                            "bad namespace element {:?}",
                            other.describe()
                        )));
                    }
                }
            }
        }
        other => Err(Error::Protocol(format!(
            "expected namespace list, found {:?}",
            other.describe()
        ))),
    }
}
