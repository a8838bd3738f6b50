//! Email address values as they appear in IMAP envelopes
//!
//! The server transmits each address as a 4-tuple of
//! `(personal, routing, mailbox, host)`; group constructs arrive as
//! bracketing tuples with a nil host. This module is the assembled,
//! caller-facing form.

use std::fmt;

/// A single RFC 2822 address or a named group of addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Mailbox {
        /// Display name, if the server sent one.
        personal: Option<String>,
        /// Source-routing prefix (obsolete but still transmitted).
        routing: Option<String>,
        mailbox: String,
        host: String,
    },
    Group {
        name: String,
        members: Vec<Address>,
    },
}

impl Address {
    /// A plain `mailbox@host` address with an optional display name.
    #[must_use]
    pub fn mailbox(
        mailbox: impl Into<String>,
        host: impl Into<String>,
        personal: Option<String>,
    ) -> Self {
        Self::Mailbox {
            personal,
            routing: None,
            mailbox: mailbox.into(),
            host: host.into(),
        }
    }

    /// A named group of member addresses.
    #[must_use]
    pub fn group(name: impl Into<String>, members: Vec<Address>) -> Self {
        Self::Group {
            name: name.into(),
            members,
        }
    }

    /// The `mailbox@host` part, or `None` for groups.
    #[must_use]
    pub fn addr_spec(&self) -> Option<String> {
        match self {
            Self::Mailbox { mailbox, host, .. } => Some(format!("{mailbox}@{host}")),
            Self::Group { .. } => None,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mailbox {
                personal,
                routing,
                mailbox,
                host,
            } => {
                if let Some(name) = personal {
                    write!(f, "{name} <")?;
                }
                if let Some(route) = routing {
                    write!(f, "{route}:")?;
                }
                write!(f, "{mailbox}@{host}")?;
                if personal.is_some() {
                    f.write_str(">")?;
                }
                Ok(())
            }
            Self::Group { name, members } => {
                write!(f, "{name}: ")?;
                let mut first = true;
                for member in members {
                    if !first {
                        f.write_str(", ")?;
                    }
                    write!(f, "{member}")?;
                    first = false;
                }
                f.write_str(";")
            }
        }
    }
}

/// Render an address list the way it appears in a header value.
#[must_use]
pub fn format_address_list(addresses: &[Address]) -> String {
    let rendered: Vec<String> = addresses.iter().map(ToString::to_string).collect();
    rendered.join(", ")
}
