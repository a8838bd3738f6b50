//! Fake IMAP server for integration testing
//!
//! An in-process, thread-per-connection IMAP server that speaks
//! enough of the protocol to test the store end-to-end:
//!
//! TCP -> greeting -> CAPABILITY -> (STARTTLS) -> LOGIN -> commands
//! -> LOGOUT
//!
//! ## Module layout
//!
//! - `server` -- TCP listener, TLS setup, and the command loop
//! - `handlers` -- one function per IMAP command
//! - `mailbox` -- test data model (folders, emails, builder)

mod handlers;
pub mod mailbox;
mod server;

pub use mailbox::{Email, MailboxBuilder};
pub use server::FakeImapServer;
