#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! IMAP4rev1 mail-store client library
//!
//! A blocking, thread-safe IMAP client exposing a high-level mail
//! store: open folders, list/search/fetch/copy/append/expunge
//! messages, read envelopes, body structures, and bodies on demand,
//! and manage per-folder flags, quotas, and ACLs.
//!
//! Connections are pooled and authenticated lazily; a folder borrows
//! one connection for as long as it is open, and unsolicited server
//! updates (EXISTS, EXPUNGE, flag changes) are folded into the
//! folder's message cache at well-defined points, so sequence numbers
//! never go stale mid-operation.
//!
//! ```no_run
//! use imap_store::{FetchProfile, ImapConfig, ImapStore};
//!
//! # fn main() -> imap_store::Result<()> {
//! let store = ImapStore::connect(ImapConfig::new("mail.example.org", "user", "pw"))?;
//! let inbox = store.folder("INBOX");
//! inbox.open(true)?;
//! let messages = inbox.all_messages()?;
//! inbox.fetch(&messages, &FetchProfile::new().with_envelope().with_flags())?;
//! for message in &messages {
//!     println!("{:?}", message.subject()?);
//! }
//! inbox.close(false)?;
//! store.close()?;
//! # Ok(())
//! # }
//! ```

mod address;
mod config;
mod connection;
mod error;
mod fetch_profile;
mod flag;
mod folder;
mod headers;
mod message;
mod pool;
pub mod protocol;
pub mod sasl;
mod search;
mod store;

pub use address::Address;
pub use config::ImapConfig;
pub use error::{Error, Result};
pub use fetch_profile::FetchProfile;
pub use flag::{Flag, FlagSet};
pub use folder::{Folder, FolderEvent};
pub use headers::{Header, Headers};
pub use message::Message;
pub use protocol::fetch::{BodySection, BodyStructure, Disposition, Envelope, SectionKind};
pub use protocol::response::{
    AclData, AclEntry, Capabilities, FolderMode, ListAttributes, ListData, ListRightsData,
    MyRightsData, Namespace, QuotaData, QuotaResource, QuotaRootData, StatusData,
};
pub use search::{Comparison, RecipientKind, SearchTerm};
pub use store::{ImapStore, StoreEvent};
