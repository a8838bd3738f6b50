//! Search terms
//!
//! A strongly-typed search tree translated into RFC 3501 SEARCH
//! syntax. Comparison operators the protocol has no single key for
//! (equality on sizes, `>=` on dates, …) expand into the standard
//! NOT/OR combinations.

use crate::flag::Flag;
use crate::protocol::command::CommandBuilder;
use chrono::NaiveDate;

/// Which recipient header a [`SearchTerm::Recipient`] matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientKind {
    To,
    Cc,
    Bcc,
}

impl RecipientKind {
    const fn key(self) -> &'static str {
        match self {
            Self::To => "TO",
            Self::Cc => "CC",
            Self::Bcc => "BCC",
        }
    }
}

/// Comparison operator for size and date terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Eq,
    Ne,
    Ge,
    Gt,
}

/// One node of a search tree.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchTerm {
    /// A flag that is set (`true`) or clear (`false`).
    Flag { flag: Flag, set: bool },
    And(Vec<SearchTerm>),
    Or(Vec<SearchTerm>),
    Not(Box<SearchTerm>),
    From(String),
    Recipient { kind: RecipientKind, pattern: String },
    Subject(String),
    Body(String),
    Header { name: String, pattern: String },
    MessageId(String),
    Size { op: Comparison, size: u32 },
    SentDate { op: Comparison, date: NaiveDate },
    ReceivedDate { op: Comparison, date: NaiveDate },
}

impl SearchTerm {
    /// Whether any string in the tree needs bytes above US-ASCII,
    /// forcing a `CHARSET UTF-8` prefix on the SEARCH command.
    #[must_use]
    pub fn needs_utf8(&self) -> bool {
        match self {
            Self::Flag { .. } | Self::Size { .. } | Self::SentDate { .. }
            | Self::ReceivedDate { .. } => false,
            Self::And(terms) | Self::Or(terms) => terms.iter().any(Self::needs_utf8),
            Self::Not(term) => term.needs_utf8(),
            Self::From(s) | Self::Subject(s) | Self::Body(s) | Self::MessageId(s)
            | Self::Recipient { pattern: s, .. } => !s.is_ascii(),
            Self::Header { name, pattern } => !name.is_ascii() || !pattern.is_ascii(),
        }
    }

    /// Emit this term into a command under construction.
    pub(crate) fn emit(&self, builder: &mut CommandBuilder) {
        match self {
            Self::Flag { flag, set: true } => match flag {
                Flag::Answered => builder.append_atom("ANSWERED"),
                Flag::Deleted => builder.append_atom("DELETED"),
                Flag::Draft => builder.append_atom("DRAFT"),
                Flag::Flagged => builder.append_atom("FLAGGED"),
                Flag::Recent => builder.append_atom("RECENT"),
                Flag::Seen => builder.append_atom("SEEN"),
                other => {
                    builder.append_atom("KEYWORD");
                    builder.append_atom(other.as_imap_str());
                }
            },
            Self::Flag { flag, set: false } => match flag {
                Flag::Answered => builder.append_atom("UNANSWERED"),
                Flag::Deleted => builder.append_atom("UNDELETED"),
                Flag::Draft => builder.append_atom("UNDRAFT"),
                Flag::Flagged => builder.append_atom("UNFLAGGED"),
                Flag::Recent => builder.append_atom("OLD"),
                Flag::Seen => builder.append_atom("UNSEEN"),
                other => {
                    builder.append_atom("UNKEYWORD");
                    builder.append_atom(other.as_imap_str());
                }
            },
            // IMAP's default combination is AND: plain concatenation.
            Self::And(terms) => {
                for term in terms {
                    term.emit(builder);
                }
            }
            Self::Or(terms) => emit_or(builder, terms),
            Self::Not(term) => {
                builder.append_atom("NOT");
                emit_parenthesized(builder, term);
            }
            Self::From(s) => emit_string_term(builder, "FROM", s),
            Self::Recipient { kind, pattern } => emit_string_term(builder, kind.key(), pattern),
            Self::Subject(s) => emit_string_term(builder, "SUBJECT", s),
            Self::Body(s) => emit_string_term(builder, "BODY", s),
            Self::Header { name, pattern } => {
                builder.append_atom("HEADER");
                builder.append_quoted_or_literal(name.as_bytes());
                builder.append_quoted_or_literal(pattern.as_bytes());
            }
            Self::MessageId(s) => {
                builder.append_atom("HEADER");
                builder.append_quoted_or_literal(b"Message-ID");
                builder.append_quoted_or_literal(s.as_bytes());
            }
            Self::Size { op, size } => emit_size(builder, *op, *size),
            Self::SentDate { op, date } => {
                emit_date(builder, *op, *date, "SENTON", "SENTBEFORE", "SENTSINCE");
            }
            Self::ReceivedDate { op, date } => {
                emit_date(builder, *op, *date, "ON", "BEFORE", "SINCE");
            }
        }
    }
}

fn emit_string_term(builder: &mut CommandBuilder, key: &str, value: &str) {
    builder.append_atom(key);
    builder.append_quoted_or_literal(value.as_bytes());
}

fn emit_parenthesized(builder: &mut CommandBuilder, term: &SearchTerm) {
    builder.begin_list();
    term.emit(builder);
    builder.end_list();
}

/// `OR (t1) (t2)`, collapsing longer lists into a right-associative
/// chain of binary ORs.
fn emit_or(builder: &mut CommandBuilder, terms: &[SearchTerm]) {
    match terms {
        [] => {}
        [only] => only.emit(builder),
        [first, rest @ ..] => {
            builder.append_atom("OR");
            emit_parenthesized(builder, first);
            if let [second] = rest {
                emit_parenthesized(builder, second);
            } else {
                builder.begin_list();
                emit_or(builder, rest);
                builder.end_list();
            }
        }
    }
}

fn emit_size(builder: &mut CommandBuilder, op: Comparison, size: u32) {
    match op {
        Comparison::Gt => {
            builder.append_atom("LARGER");
            builder.append_number(size);
        }
        Comparison::Lt => {
            builder.append_atom("SMALLER");
            builder.append_number(size);
        }
        Comparison::Le => {
            builder.append_atom("NOT");
            builder.append_atom("LARGER");
            builder.append_number(size);
        }
        Comparison::Ge => {
            builder.append_atom("NOT");
            builder.append_atom("SMALLER");
            builder.append_number(size);
        }
        Comparison::Eq => {
            builder.append_atom("NOT");
            builder.append_atom("LARGER");
            builder.append_number(size);
            builder.append_atom("NOT");
            builder.append_atom("SMALLER");
            builder.append_number(size);
        }
        Comparison::Ne => {
            builder.append_atom("OR");
            builder.append_atom("LARGER");
            builder.append_number(size);
            builder.append_atom("SMALLER");
            builder.append_number(size);
        }
    }
}

fn emit_date(
    builder: &mut CommandBuilder,
    op: Comparison,
    date: NaiveDate,
    on: &str,
    before: &str,
    since: &str,
) {
    match op {
        Comparison::Eq => {
            builder.append_atom(on);
            builder.append_search_date(date);
        }
        Comparison::Ne => {
            builder.append_atom("NOT");
            builder.append_atom(on);
            builder.append_search_date(date);
        }
        Comparison::Lt => {
            builder.append_atom(before);
            builder.append_search_date(date);
        }
        Comparison::Le => {
            builder.append_atom("OR");
            builder.append_atom(before);
            builder.append_search_date(date);
            builder.append_atom(on);
            builder.append_search_date(date);
        }
        Comparison::Ge => {
            builder.append_atom("OR");
            builder.append_atom(since);
            builder.append_search_date(date);
            builder.append_atom(on);
            builder.append_search_date(date);
        }
        // Strictly-after has no single key: negate "on or before".
        Comparison::Gt => {
            builder.append_atom("NOT");
            builder.append_atom("OR");
            builder.append_atom(before);
            builder.append_search_date(date);
            builder.append_atom(on);
            builder.append_search_date(date);
        }
    }
}
