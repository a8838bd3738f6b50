//! Lazy message handles
//!
//! A [`Message`] is a folder-scoped view of one mail message. Every
//! field is fetched on first use through the folder's borrowed
//! connection and cached; batch prefetching goes through
//! [`Folder::fetch`](crate::Folder::fetch). Messages reference their
//! folder weakly: a closed folder invalidates its handles instead of
//! keeping the machinery alive.

use crate::address::{Address, format_address_list};
use crate::error::{Error, Result};
use crate::fetch_profile::FetchProfile;
use crate::flag::{Flag, FlagSet};
use crate::folder::{Folder, FolderInner};
use crate::headers::Headers;
use crate::protocol::fetch::{BodyStructure, Envelope, FetchItem};
use crate::search::RecipientKind;
use chrono::{DateTime, FixedOffset};
use std::io::Write;
use std::sync::{Arc, Mutex, Weak};

/// Cached per-message state. All fields start unknown and fill in as
/// fetches happen.
#[derive(Debug, Default)]
pub(crate) struct MessageState {
    pub seq: u32,
    pub uid: Option<u32>,
    pub expunged: bool,
    pub envelope: Option<Envelope>,
    pub body_structure: Option<BodyStructure>,
    pub flags: Option<FlagSet>,
    pub internal_date: Option<DateTime<FixedOffset>>,
    pub size: Option<u32>,
    pub headers: Headers,
    pub all_headers_retrieved: bool,
    pub content: Option<Vec<u8>>,
    /// Dotted part path when this handle views a nested message.
    pub section: Option<String>,
}

impl MessageState {
    pub fn new(seq: u32) -> Self {
        Self {
            seq,
            ..Self::default()
        }
    }

    /// Whether the cached state already satisfies a prefetch profile.
    pub fn satisfies(&self, profile: &FetchProfile) -> bool {
        if profile.uid && self.uid.is_none() {
            return false;
        }
        if profile.envelope && self.envelope.is_none() {
            return false;
        }
        if profile.flags && self.flags.is_none() {
            return false;
        }
        if profile.content_info && self.body_structure.is_none() {
            return false;
        }
        if profile.size && self.size.is_none() {
            return false;
        }
        if profile.all_headers && !self.all_headers_retrieved {
            return false;
        }
        if !profile.all_headers
            && !profile
                .headers
                .iter()
                .all(|name| self.all_headers_retrieved || self.headers.contains(name))
        {
            return false;
        }
        true
    }

    /// Fold one FETCH data item into the cached state.
    pub fn merge(&mut self, item: &FetchItem) {
        match item {
            FetchItem::Envelope(envelope) => {
                self.envelope = Some(envelope.clone());
                self.sync_envelope_headers();
            }
            FetchItem::InternalDate(date) => self.internal_date = Some(*date),
            FetchItem::Rfc822Size(size) => self.size = Some(*size),
            FetchItem::Flags(flags) => self.flags = Some(flags.clone()),
            FetchItem::Uid { uid, .. } => self.uid = Some(*uid),
            FetchItem::BodyStructure(structure) => {
                self.body_structure = Some(structure.clone());
                self.sync_structure_headers();
            }
            FetchItem::Header {
                complete, headers, ..
            } => {
                if *complete {
                    self.headers = headers.clone();
                    self.all_headers_retrieved = true;
                } else {
                    self.headers.merge_partial(headers);
                }
            }
            FetchItem::Text { .. } => {}
            FetchItem::Body { section, bytes } => {
                if section.part.is_none() && section.start.is_none() {
                    self.content = Some(bytes.clone());
                }
            }
        }
    }

    /// Mirror envelope fields into the header store.
    fn sync_envelope_headers(&mut self) {
        let Some(envelope) = self.envelope.clone() else {
            return;
        };
        self.update_address_header("From", &envelope.from);
        self.update_address_header("Sender", &envelope.sender);
        self.update_address_header("Reply-To", &envelope.reply_to);
        self.update_address_header("To", &envelope.to);
        self.update_address_header("Cc", &envelope.cc);
        self.update_address_header("Bcc", &envelope.bcc);
        if let Some(subject) = &envelope.subject {
            self.headers.set("Subject", subject);
        }
        if let Some(message_id) = &envelope.message_id {
            self.headers.set("Message-ID", message_id);
        }
        if let Some(date) = &envelope.date {
            self.headers.set("Date", date);
        }
    }

    /// The header value comes from whichever list was passed in.
    fn update_address_header(&mut self, name: &str, addresses: &[Address]) {
        if !addresses.is_empty() {
            self.headers.set(name, format_address_list(addresses));
        }
    }

    /// Mirror content metadata from the body structure into headers.
    fn sync_structure_headers(&mut self) {
        let Some(structure) = &self.body_structure else {
            return;
        };
        self.headers.set("Content-Type", structure.content_type());
        if let BodyStructure::Single {
            encoding,
            id,
            description,
            languages,
            disposition,
            lines,
            ..
        } = structure
        {
            if let Some(encoding) = encoding {
                self.headers.set("Content-Transfer-Encoding", encoding);
            }
            if let Some(id) = id {
                self.headers.set("Content-ID", id);
            }
            if let Some(description) = description {
                self.headers.set("Content-Description", description);
            }
            if !languages.is_empty() {
                self.headers.set("Content-Language", languages.join(", "));
            }
            if let Some(disposition) = disposition {
                self.headers.set("Content-Disposition", &disposition.kind);
            }
            if let Some(lines) = lines {
                self.headers.set("Lines", lines.to_string());
            }
        }
    }
}

/// A lazily-populated message within an open folder.
#[derive(Clone)]
pub struct Message {
    folder: Weak<FolderInner>,
    state: Arc<Mutex<MessageState>>,
}

impl Message {
    pub(crate) fn new(folder: Weak<FolderInner>, state: Arc<Mutex<MessageState>>) -> Self {
        Self { folder, state }
    }

    pub(crate) fn state_cell(&self) -> &Arc<Mutex<MessageState>> {
        &self.state
    }

    fn folder(&self) -> Result<Folder> {
        self.folder
            .upgrade()
            .map(Folder::from_inner)
            .ok_or(Error::FolderClosed)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MessageState>> {
        self.state.lock().map_err(|_| Error::FolderClosed)
    }

    /// The message's current sequence number.
    pub fn seq(&self) -> Result<u32> {
        let state = self.lock()?;
        if state.expunged {
            return Err(Error::MessageRemoved);
        }
        Ok(state.seq)
    }

    /// Whether the server has expunged this message.
    #[must_use]
    pub fn is_expunged(&self) -> bool {
        self.lock().map(|state| state.expunged).unwrap_or(false)
    }

    /// Ensure the profile is satisfied, fetching what is missing.
    fn demand(&self, profile: FetchProfile) -> Result<()> {
        {
            let state = self.lock()?;
            if state.expunged {
                return Err(Error::MessageRemoved);
            }
            if state.satisfies(&profile) {
                return Ok(());
            }
        }
        self.folder()?.fetch(std::slice::from_ref(self), &profile)
    }

    /// Load the envelope triple on first use.
    fn ensure_envelope(&self) -> Result<()> {
        {
            let state = self.lock()?;
            if state.expunged {
                return Err(Error::MessageRemoved);
            }
            if state.envelope.is_some() {
                return Ok(());
            }
        }
        self.folder()?.load_envelope(self)
    }

    fn ensure_flags(&self) -> Result<()> {
        {
            let state = self.lock()?;
            if state.expunged {
                return Err(Error::MessageRemoved);
            }
            if state.flags.is_some() {
                return Ok(());
            }
        }
        self.folder()?.load_flags(self)
    }

    fn ensure_body_structure(&self) -> Result<()> {
        {
            let state = self.lock()?;
            if state.expunged {
                return Err(Error::MessageRemoved);
            }
            if state.body_structure.is_some() {
                return Ok(());
            }
        }
        self.folder()?.load_body_structure(self)
    }

    /// The message UID, resolving it if unknown.
    pub fn uid(&self) -> Result<u32> {
        self.demand(FetchProfile::new().with_uid())?;
        self.lock()?
            .uid
            .ok_or_else(|| Error::Protocol("server did not report a UID".into()))
    }

    pub fn from(&self) -> Result<Vec<Address>> {
        self.ensure_envelope()?;
        Ok(self.lock()?.envelope.as_ref().map(|e| e.from.clone()).unwrap_or_default())
    }

    pub fn sender(&self) -> Result<Vec<Address>> {
        self.ensure_envelope()?;
        Ok(self
            .lock()?
            .envelope
            .as_ref()
            .map(|e| e.sender.clone())
            .unwrap_or_default())
    }

    pub fn reply_to(&self) -> Result<Vec<Address>> {
        self.ensure_envelope()?;
        Ok(self
            .lock()?
            .envelope
            .as_ref()
            .map(|e| e.reply_to.clone())
            .unwrap_or_default())
    }

    /// Recipients of the given kind (To, Cc, or Bcc).
    pub fn recipients(&self, kind: RecipientKind) -> Result<Vec<Address>> {
        self.ensure_envelope()?;
        Ok(self
            .lock()?
            .envelope
            .as_ref()
            .map(|e| match kind {
                RecipientKind::To => e.to.clone(),
                RecipientKind::Cc => e.cc.clone(),
                RecipientKind::Bcc => e.bcc.clone(),
            })
            .unwrap_or_default())
    }

    pub fn subject(&self) -> Result<Option<String>> {
        self.ensure_envelope()?;
        Ok(self.lock()?.envelope.as_ref().and_then(|e| e.subject.clone()))
    }

    /// The raw RFC 2822 `Date:` string from the envelope.
    pub fn sent_date(&self) -> Result<Option<String>> {
        self.ensure_envelope()?;
        Ok(self.lock()?.envelope.as_ref().and_then(|e| e.date.clone()))
    }

    pub fn message_id(&self) -> Result<Option<String>> {
        self.ensure_envelope()?;
        Ok(self
            .lock()?
            .envelope
            .as_ref()
            .and_then(|e| e.message_id.clone()))
    }

    /// The server's INTERNALDATE.
    pub fn received_date(&self) -> Result<Option<DateTime<FixedOffset>>> {
        self.ensure_envelope()?;
        Ok(self.lock()?.internal_date)
    }

    /// RFC 2822 size of the message.
    pub fn size(&self) -> Result<Option<u32>> {
        self.ensure_envelope()?;
        Ok(self.lock()?.size)
    }

    pub fn body_structure(&self) -> Result<Option<BodyStructure>> {
        self.ensure_body_structure()?;
        Ok(self.lock()?.body_structure.clone())
    }

    pub fn content_type(&self) -> Result<Option<String>> {
        self.structure_header("Content-Type")
    }

    pub fn disposition(&self) -> Result<Option<String>> {
        self.structure_header("Content-Disposition")
    }

    pub fn encoding(&self) -> Result<Option<String>> {
        self.structure_header("Content-Transfer-Encoding")
    }

    pub fn content_id(&self) -> Result<Option<String>> {
        self.structure_header("Content-ID")
    }

    pub fn description(&self) -> Result<Option<String>> {
        self.structure_header("Content-Description")
    }

    pub fn content_language(&self) -> Result<Option<String>> {
        self.structure_header("Content-Language")
    }

    pub fn content_md5(&self) -> Result<Option<String>> {
        self.ensure_body_structure()?;
        Ok(self.lock()?.body_structure.as_ref().and_then(|s| match s {
            BodyStructure::Single { md5, .. } => md5.clone(),
            BodyStructure::Multipart { .. } => None,
        }))
    }

    fn structure_header(&self, name: &str) -> Result<Option<String>> {
        self.ensure_body_structure()?;
        Ok(self.lock()?.headers.get_first(name).map(ToString::to_string))
    }

    /// All values of one header, fetching it if necessary.
    pub fn header(&self, name: &str) -> Result<Vec<String>> {
        self.demand(FetchProfile::new().with_headers([name]))?;
        Ok(self
            .lock()?
            .headers
            .get_all(name)
            .into_iter()
            .map(ToString::to_string)
            .collect())
    }

    /// The complete header block.
    pub fn headers(&self) -> Result<Headers> {
        {
            let state = self.lock()?;
            if state.expunged {
                return Err(Error::MessageRemoved);
            }
            if state.all_headers_retrieved {
                return Ok(state.headers.clone());
            }
        }
        self.folder()?.load_headers(self)?;
        Ok(self.lock()?.headers.clone())
    }

    /// The text body (`BODY[TEXT]`). Not cached; callers wanting the
    /// whole raw message should use [`Message::content`].
    pub fn text(&self) -> Result<Vec<u8>> {
        self.folder()?.load_text(self)
    }

    /// The message's current flags.
    pub fn flags(&self) -> Result<FlagSet> {
        self.ensure_flags()?;
        Ok(self.lock()?.flags.clone().unwrap_or_default())
    }

    pub fn is_set(&self, flag: &Flag) -> Result<bool> {
        Ok(self.flags()?.contains(flag))
    }

    /// Add (or remove) flags on the server and merge the result.
    pub fn set_flags(&self, flags: &FlagSet, set: bool) -> Result<()> {
        self.folder()?
            .set_flags(std::slice::from_ref(self), flags, set)
    }

    /// The raw message content (`BODY[]`), fetched on first use.
    pub fn content(&self) -> Result<Vec<u8>> {
        {
            let state = self.lock()?;
            if state.expunged {
                return Err(Error::MessageRemoved);
            }
            if let Some(content) = &state.content {
                return Ok(content.clone());
            }
        }
        self.folder()?.fetch_content(self)?;
        self.lock()?
            .content
            .clone()
            .ok_or_else(|| Error::Protocol("server returned no message content".into()))
    }

    /// Stream the raw message to a writer.
    pub fn write_to(&self, out: &mut impl Write) -> Result<()> {
        let content = self.content()?;
        out.write_all(&content)?;
        Ok(())
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.state.lock() {
            Ok(state) => f
                .debug_struct("Message")
                .field("seq", &state.seq)
                .field("uid", &state.uid)
                .field("expunged", &state.expunged)
                .finish_non_exhaustive(),
            Err(_) => f.write_str("Message(poisoned)"),
        }
    }
}
