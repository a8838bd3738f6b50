//! Folder engine
//!
//! A [`Folder`] borrows one pooled connection for its whole open
//! period and keeps the client-side view of the selected mailbox: the
//! sequence-number cache, the UID cache, and the counters the server
//! updates through untagged responses. The folder mutex is held from
//! the start of any command on the borrowed connection until the
//! pending untagged queue has been drained, so EXPUNGE renumbering is
//! never observable half-done.

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::fetch_profile::FetchProfile;
use crate::flag::FlagSet;
use crate::message::{Message, MessageState};
use crate::protocol::response::{
    FolderMode, ListData, ResponseStatus, StatusData, UntaggedResponse,
};
use crate::protocol::sequence;
use crate::search::SearchTerm;
use crate::store::StoreInner;
use chrono::{DateTime, FixedOffset};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, warn};

/// Folder lifecycle and mailbox-change notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderEvent {
    Opened,
    Closed,
    /// The server reported new mail; the payload is how many messages
    /// appeared.
    MessagesAdded(u32),
    /// A message was expunged at this sequence number.
    MessageExpunged(u32),
    /// The flags of the message at this sequence number changed.
    FlagsChanged(u32),
}

type FolderListener = Box<dyn Fn(&FolderEvent) + Send + Sync>;

#[derive(Default)]
struct FolderState {
    open: bool,
    mode: Option<FolderMode>,
    connection: Option<Connection>,
    seq_cache: HashMap<u32, Arc<Mutex<MessageState>>>,
    uid_cache: HashMap<u32, Arc<Mutex<MessageState>>>,
    max_seq: u32,
    recent: u32,
    unseen: Option<u32>,
    uid_validity: Option<u32>,
    uid_next: Option<u32>,
    available_flags: FlagSet,
    permanent_flags: FlagSet,
    separator: Option<char>,
    list_info: Option<ListData>,
    status_cache: Option<(Instant, StatusData)>,
}

pub(crate) struct FolderInner {
    pub(crate) store: Arc<StoreInner>,
    pub(crate) full_name: String,
    state: Mutex<FolderState>,
    listeners: Mutex<Vec<FolderListener>>,
}

/// One IMAP mailbox, open or not.
#[derive(Clone)]
pub struct Folder {
    inner: Arc<FolderInner>,
}

impl Folder {
    pub(crate) fn new(store: Arc<StoreInner>, full_name: String) -> Self {
        Self {
            inner: Arc::new(FolderInner {
                store,
                full_name,
                state: Mutex::new(FolderState::default()),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<FolderInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Arc<FolderInner> {
        &self.inner
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, FolderState>> {
        self.inner.state.lock().map_err(|_| Error::FolderClosed)
    }

    fn ensure_open(state: &FolderState) -> Result<()> {
        if state.open { Ok(()) } else { Err(Error::FolderClosed) }
    }

    fn ensure_writable(state: &FolderState) -> Result<()> {
        Self::ensure_open(state)?;
        if state.mode == Some(FolderMode::ReadWrite) {
            Ok(())
        } else {
            Err(Error::ReadOnlyFolder)
        }
    }

    /// The full, separator-qualified mailbox name.
    #[must_use]
    pub fn full_name(&self) -> &str {
        &self.inner.full_name
    }

    /// The last path component of the mailbox name.
    #[must_use]
    pub fn name(&self) -> &str {
        let full = self.inner.full_name.as_str();
        let separator = self
            .lock_state()
            .ok()
            .and_then(|state| state.separator)
            .unwrap_or('/');
        full.rsplit(separator).next().unwrap_or(full)
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.lock_state().map(|state| state.open).unwrap_or(false)
    }

    /// The selection mode, once open.
    #[must_use]
    pub fn mode(&self) -> Option<FolderMode> {
        self.lock_state().ok().and_then(|state| state.mode)
    }

    pub fn add_listener(&self, listener: impl Fn(&FolderEvent) + Send + Sync + 'static) {
        if let Ok(mut listeners) = self.inner.listeners.lock() {
            listeners.push(Box::new(listener));
        }
    }

    /// Listener callbacks run outside every lock; a misbehaving
    /// listener can delay events but never corrupt protocol state.
    fn broadcast(&self, events: &[FolderEvent]) {
        if events.is_empty() {
            return;
        }
        let Ok(listeners) = self.inner.listeners.lock() else {
            return;
        };
        for event in events {
            for listener in listeners.iter() {
                listener(event);
            }
        }
    }

    // -- lifecycle --

    /// SELECT (or EXAMINE, for `read_only`) this mailbox on a freshly
    /// acquired pool connection.
    pub fn open(&self, read_only: bool) -> Result<()> {
        let mut events = Vec::new();
        {
            let mut state = self.lock_state()?;
            if state.open {
                return Err(Error::FolderOpen);
            }
            let mut connection = self.inner.store.acquire_folder_connection()?;
            let status = match connection.select(&self.inner.full_name, read_only) {
                Ok(status) => status,
                Err(error) => {
                    self.inner.store.release_connection(connection);
                    return Err(error);
                }
            };
            if !read_only && status.mode == FolderMode::ReadOnly {
                self.inner.store.release_connection(connection);
                return Err(Error::ReadOnlyFolder);
            }

            let previous_validity = state.uid_validity;
            state.mode = Some(status.mode);
            state.max_seq = status.messages;
            state.recent = status.recent;
            state.unseen = status.unseen;
            state.uid_validity = status.uid_validity;
            state.uid_next = status.uid_next;
            state.available_flags = status.available_flags;
            state.permanent_flags = status.permanent_flags;
            state.seq_cache = HashMap::new();
            state.uid_cache = HashMap::new();
            if previous_validity.is_some() && previous_validity != state.uid_validity {
                debug!(
                    "UIDVALIDITY changed on {}, cached UIDs dropped",
                    self.inner.full_name
                );
            }
            state.connection = Some(connection);
            state.open = true;
            events.push(FolderEvent::Opened);

            let pending = Self::drain_connection(&mut state);
            self.process_untagged(&mut state, pending, &mut events);
        }
        self.broadcast(&events);
        Ok(())
    }

    /// Close the mailbox. With `expunge` false on a read-write
    /// selection, the mailbox is re-EXAMINEd first so the CLOSE cannot
    /// silently expunge `\Deleted` mail.
    pub fn close(&self, expunge: bool) -> Result<()> {
        let mut events = Vec::new();
        {
            let mut state = self.lock_state()?;
            Self::ensure_open(&state)?;
            let mode = state.mode;
            if let Some(connection) = state.connection.as_mut()
                && !connection.is_closed()
            {
                let shutdown = (|| -> Result<()> {
                    if mode == Some(FolderMode::ReadWrite) && !expunge {
                        connection.select(&self.inner.full_name, true)?;
                    }
                    connection.close_mailbox()
                })();
                if let Err(error) = shutdown {
                    debug!("error closing {}: {error}", self.inner.full_name);
                }
            }
            Self::teardown(&mut state, &self.inner.store);
            events.push(FolderEvent::Closed);
        }
        self.broadcast(&events);
        Ok(())
    }

    fn teardown(state: &mut FolderState, store: &StoreInner) {
        if let Some(connection) = state.connection.take() {
            store.release_connection(connection);
        }
        state.seq_cache.clear();
        state.uid_cache.clear();
        state.open = false;
        state.mode = None;
        state.max_seq = 0;
        state.recent = 0;
        state.unseen = None;
    }

    // -- untagged dispatch --

    fn drain_connection(state: &mut FolderState) -> Vec<UntaggedResponse> {
        state
            .connection
            .as_mut()
            .map(Connection::take_pending)
            .unwrap_or_default()
    }

    fn ensure_message(state: &mut FolderState, seq: u32) -> Arc<Mutex<MessageState>> {
        Arc::clone(
            state
                .seq_cache
                .entry(seq)
                .or_insert_with(|| Arc::new(Mutex::new(MessageState::new(seq)))),
        )
    }

    fn register_uid(state: &mut FolderState, cell: &Arc<Mutex<MessageState>>) {
        if let Ok(message) = cell.lock()
            && let Some(uid) = message.uid
        {
            state.uid_cache.insert(uid, Arc::clone(cell));
        }
    }

    /// Shift the caches down across one EXPUNGE, exactly once per
    /// processed response.
    fn expunge_renumber(state: &mut FolderState, seq: u32) {
        let cell = state
            .seq_cache
            .remove(&seq)
            .unwrap_or_else(|| Arc::new(Mutex::new(MessageState::new(seq))));
        if let Ok(mut message) = cell.lock() {
            message.expunged = true;
            if let Some(uid) = message.uid {
                state.uid_cache.remove(&uid);
            }
        }
        let remaining: Vec<(u32, Arc<Mutex<MessageState>>)> = state.seq_cache.drain().collect();
        for (key, cell) in remaining {
            if key < seq {
                state.seq_cache.insert(key, cell);
            } else {
                if let Ok(mut message) = cell.lock() {
                    message.seq = key - 1;
                }
                state.seq_cache.insert(key - 1, cell);
            }
        }
        state.max_seq = state.max_seq.saturating_sub(1);
    }

    /// Run the folder's share of the handler chain over a drained
    /// pending queue; anything unclaimed goes to the store handler.
    fn process_untagged(
        &self,
        state: &mut FolderState,
        pending: Vec<UntaggedResponse>,
        events: &mut Vec<FolderEvent>,
    ) {
        for untagged in pending {
            match untagged {
                UntaggedResponse::Exists(count) => {
                    if count > state.max_seq {
                        let added = count - state.max_seq;
                        for seq in state.max_seq + 1..=count {
                            Self::ensure_message(state, seq);
                        }
                        state.max_seq = count;
                        events.push(FolderEvent::MessagesAdded(added));
                    }
                }
                UntaggedResponse::Recent(count) => state.recent = count,
                UntaggedResponse::Expunge(seq) => {
                    Self::expunge_renumber(state, seq);
                    events.push(FolderEvent::MessageExpunged(seq));
                }
                UntaggedResponse::Fetch(data) => {
                    let seq = data.seq;
                    let flagged = data.flags().is_some();
                    let cell = Self::ensure_message(state, seq);
                    if let Ok(mut message) = cell.lock() {
                        for item in &data.items {
                            message.merge(item);
                        }
                    }
                    Self::register_uid(state, &cell);
                    if flagged {
                        events.push(FolderEvent::FlagsChanged(seq));
                    }
                }
                UntaggedResponse::Condition(condition)
                    if condition.status == ResponseStatus::Bye =>
                {
                    warn!(
                        "server closed {} underneath us: {}",
                        self.inner.full_name, condition.message
                    );
                    Self::teardown(state, &self.inner.store);
                    events.push(FolderEvent::Closed);
                }
                other => self.inner.store.handle_unsolicited(&other),
            }
        }
    }

    // -- message access --

    fn handle_for(&self, cell: Arc<Mutex<MessageState>>) -> Message {
        Message::new(Arc::downgrade(&self.inner), cell)
    }

    /// The message at a current sequence number, refreshing once via
    /// NOOP when the number is beyond the known range.
    pub fn message(&self, seq: u32) -> Result<Message> {
        let mut events = Vec::new();
        let handle = {
            let mut state = self.lock_state()?;
            Self::ensure_open(&state)?;
            if seq == 0 {
                return Err(Error::OutOfRange(seq));
            }
            if seq > state.max_seq {
                let connection = state.connection.as_mut().ok_or(Error::FolderClosed)?;
                let result = connection.noop();
                let pending = connection.take_pending();
                self.process_untagged(&mut state, pending, &mut events);
                result?;
            }
            if seq > state.max_seq {
                return Err(Error::OutOfRange(seq));
            }
            let cell = Self::ensure_message(&mut state, seq);
            self.handle_for(cell)
        };
        self.broadcast(&events);
        Ok(handle)
    }

    /// Messages `start..=end`, in sequence order.
    pub fn messages(&self, start: u32, end: u32) -> Result<Vec<Message>> {
        (start..=end).map(|seq| self.message(seq)).collect()
    }

    /// All currently known messages.
    pub fn all_messages(&self) -> Result<Vec<Message>> {
        let max = {
            let state = self.lock_state()?;
            Self::ensure_open(&state)?;
            state.max_seq
        };
        if max == 0 {
            return Ok(Vec::new());
        }
        self.messages(1, max)
    }

    /// Resolve a message by UID, consulting the UID cache first.
    pub fn message_by_uid(&self, uid: u32) -> Result<Option<Message>> {
        let mut events = Vec::new();
        let handle = {
            let mut state = self.lock_state()?;
            Self::ensure_open(&state)?;
            if let Some(cell) = state.uid_cache.get(&uid) {
                let cell = Arc::clone(cell);
                Some(self.handle_for(cell))
            } else {
                let connection = state.connection.as_mut().ok_or(Error::FolderClosed)?;
                let result = connection.uid_fetch_seq(uid);
                let pending = connection.take_pending();
                let resolved = match result {
                    Ok(pair) => pair,
                    Err(error) => {
                        self.process_untagged(&mut state, pending, &mut events);
                        drop(state);
                        self.broadcast(&events);
                        return Err(error);
                    }
                };
                let handle = resolved.map(|(seq, uid)| {
                    let cell = Self::ensure_message(&mut state, seq);
                    if let Ok(mut message) = cell.lock() {
                        message.uid = Some(uid);
                    }
                    state.uid_cache.insert(uid, Arc::clone(&cell));
                    self.handle_for(cell)
                });
                self.process_untagged(&mut state, pending, &mut events);
                handle
            }
        };
        self.broadcast(&events);
        Ok(handle)
    }

    /// The number of messages the server reports, refreshed by a NOOP
    /// when the folder is open.
    pub fn message_count(&self) -> Result<u32> {
        let mut events = Vec::new();
        let count = {
            let mut state = self.lock_state()?;
            if state.open {
                let connection = state.connection.as_mut().ok_or(Error::FolderClosed)?;
                let result = connection.noop();
                let pending = connection.take_pending();
                self.process_untagged(&mut state, pending, &mut events);
                result?;
                Ok(state.max_seq)
            } else {
                Err(Error::FolderClosed)
            }
        };
        self.broadcast(&events);
        count
    }

    /// Recent-message count from the last server report.
    pub fn recent_count(&self) -> Result<u32> {
        let state = self.lock_state()?;
        Self::ensure_open(&state)?;
        Ok(state.recent)
    }

    pub fn unseen_count(&self) -> Result<Option<u32>> {
        let state = self.lock_state()?;
        Self::ensure_open(&state)?;
        Ok(state.unseen)
    }

    pub fn uid_validity(&self) -> Result<Option<u32>> {
        let state = self.lock_state()?;
        Self::ensure_open(&state)?;
        Ok(state.uid_validity)
    }

    pub fn uid_next(&self) -> Result<Option<u32>> {
        let state = self.lock_state()?;
        Self::ensure_open(&state)?;
        Ok(state.uid_next)
    }

    /// Flags the server accepts in this mailbox.
    pub fn available_flags(&self) -> Result<FlagSet> {
        let state = self.lock_state()?;
        Self::ensure_open(&state)?;
        Ok(state.available_flags.clone())
    }

    pub fn permanent_flags(&self) -> Result<FlagSet> {
        let state = self.lock_state()?;
        Self::ensure_open(&state)?;
        Ok(state.permanent_flags.clone())
    }

    // -- bulk operations --

    /// Prefetch the profile for a batch of messages in one round
    /// trip, skipping messages whose cache already satisfies it.
    pub fn fetch(&self, messages: &[Message], profile: &FetchProfile) -> Result<()> {
        if profile.is_empty() {
            return Ok(());
        }
        let mut events = Vec::new();
        let outcome = {
            let mut state = self.lock_state()?;
            Self::ensure_open(&state)?;

            let mut seqs = Vec::new();
            for message in messages {
                let Ok(message_state) = message.state_cell().lock() else {
                    continue;
                };
                if message_state.expunged {
                    continue;
                }
                if !message_state.satisfies(profile) {
                    seqs.push(message_state.seq);
                }
            }
            seqs.sort_unstable();
            let Some(set) = sequence::encode_set(&seqs) else {
                return Ok(());
            };

            let connection = state.connection.as_mut().ok_or(Error::FolderClosed)?;
            let result = connection.fetch(&set, profile);
            let pending = connection.take_pending();
            let outcome = result.map(|responses| {
                for data in responses {
                    let cell = Self::ensure_message(&mut state, data.seq);
                    if let Ok(mut message_state) = cell.lock() {
                        for item in &data.items {
                            message_state.merge(item);
                        }
                    }
                    Self::register_uid(&mut state, &cell);
                }
            });
            self.process_untagged(&mut state, pending, &mut events);
            outcome
        };
        self.broadcast(&events);
        outcome
    }

    /// Add or remove flags on a batch of messages (`STORE ±FLAGS`) and
    /// merge the server's resulting flag state into the cache.
    pub fn set_flags(&self, messages: &[Message], flags: &FlagSet, set: bool) -> Result<()> {
        let mut events = Vec::new();
        let outcome = {
            let mut state = self.lock_state()?;
            Self::ensure_writable(&state)?;

            let mut seqs = Vec::new();
            for message in messages {
                let Ok(message_state) = message.state_cell().lock() else {
                    continue;
                };
                if !message_state.expunged {
                    seqs.push(message_state.seq);
                }
            }
            seqs.sort_unstable();
            let Some(set_text) = sequence::encode_set(&seqs) else {
                return Ok(());
            };

            let connection = state.connection.as_mut().ok_or(Error::FolderClosed)?;
            let result = connection.store_flags(&set_text, flags, set);
            let pending = connection.take_pending();
            let outcome = result.map(|responses| {
                for data in responses {
                    let seq = data.seq;
                    let cell = Self::ensure_message(&mut state, seq);
                    if let Ok(mut message_state) = cell.lock() {
                        for item in &data.items {
                            message_state.merge(item);
                        }
                    }
                    events.push(FolderEvent::FlagsChanged(seq));
                }
            });
            self.process_untagged(&mut state, pending, &mut events);
            outcome
        };
        self.broadcast(&events);
        outcome
    }

    /// SEARCH within this folder; results come back as lazy handles.
    pub fn search(&self, term: &SearchTerm) -> Result<Vec<Message>> {
        let mut events = Vec::new();
        let outcome = {
            let mut state = self.lock_state()?;
            Self::ensure_open(&state)?;
            let connection = state.connection.as_mut().ok_or(Error::FolderClosed)?;
            let result = connection.search(term, None);
            let pending = connection.take_pending();
            let outcome = result.map(|seqs| {
                seqs.into_iter()
                    .map(|seq| {
                        let cell = Self::ensure_message(&mut state, seq);
                        self.handle_for(cell)
                    })
                    .collect::<Vec<Message>>()
            });
            self.process_untagged(&mut state, pending, &mut events);
            outcome
        };
        self.broadcast(&events);
        outcome
    }

    /// EXPUNGE and renumber; returns the expunged sequence numbers in
    /// server order.
    pub fn expunge(&self) -> Result<Vec<u32>> {
        let mut events = Vec::new();
        let outcome = {
            let mut state = self.lock_state()?;
            Self::ensure_writable(&state)?;
            let connection = state.connection.as_mut().ok_or(Error::FolderClosed)?;
            let result = connection.expunge();
            let pending = connection.take_pending();
            let outcome = result.map(|seqs| {
                for &seq in &seqs {
                    Self::expunge_renumber(&mut state, seq);
                    events.push(FolderEvent::MessageExpunged(seq));
                }
                seqs
            });
            self.process_untagged(&mut state, pending, &mut events);
            outcome
        };
        self.broadcast(&events);
        outcome
    }

    /// COPY a batch of messages to another mailbox.
    pub fn copy_messages(&self, messages: &[Message], destination: &Folder) -> Result<()> {
        let mut events = Vec::new();
        let outcome = {
            let mut state = self.lock_state()?;
            Self::ensure_open(&state)?;
            let mut seqs = Vec::new();
            for message in messages {
                let Ok(message_state) = message.state_cell().lock() else {
                    continue;
                };
                if message_state.expunged {
                    return Err(Error::MessageRemoved);
                }
                seqs.push(message_state.seq);
            }
            seqs.sort_unstable();
            let Some(set) = sequence::encode_set(&seqs) else {
                return Ok(());
            };
            let connection = state.connection.as_mut().ok_or(Error::FolderClosed)?;
            let result = connection.copy(&set, &destination.inner.full_name);
            let pending = connection.take_pending();
            self.process_untagged(&mut state, pending, &mut events);
            result
        };
        self.broadcast(&events);
        outcome
    }

    /// APPEND a message to this mailbox through a store connection;
    /// the folder need not be open.
    pub fn append_message(
        &self,
        body: &[u8],
        flags: Option<&FlagSet>,
        date: Option<&DateTime<FixedOffset>>,
    ) -> Result<()> {
        self.inner
            .store
            .with_store_connection(|connection| {
                connection.append(&self.inner.full_name, flags, date, body)
            })
    }

    /// The sequence number of a live message, under the folder lock.
    fn live_seq(message: &Message) -> Result<(u32, Option<String>)> {
        let message_state = message
            .state_cell()
            .lock()
            .map_err(|_| Error::FolderClosed)?;
        if message_state.expunged {
            return Err(Error::MessageRemoved);
        }
        Ok((message_state.seq, message_state.section.clone()))
    }

    /// Run one single-message fetch verb and merge the returned item.
    fn load_item(
        &self,
        message: &Message,
        loader: impl FnOnce(&mut Connection, u32) -> Result<Option<crate::protocol::fetch::FetchItem>>,
    ) -> Result<()> {
        let mut events = Vec::new();
        let outcome = {
            let mut state = self.lock_state()?;
            Self::ensure_open(&state)?;
            let (seq, _) = Self::live_seq(message)?;
            let connection = state.connection.as_mut().ok_or(Error::FolderClosed)?;
            let result = loader(connection, seq);
            let pending = connection.take_pending();
            let outcome = result.map(|item| {
                if let Some(item) = item
                    && let Ok(mut message_state) = message.state_cell().lock()
                {
                    message_state.merge(&item);
                }
            });
            self.process_untagged(&mut state, pending, &mut events);
            Self::register_uid(&mut state, message.state_cell());
            outcome
        };
        self.broadcast(&events);
        outcome
    }

    /// `FETCH n (ENVELOPE INTERNALDATE RFC822.SIZE)` for one message.
    pub(crate) fn load_envelope(&self, message: &Message) -> Result<()> {
        self.load_item(message, Connection::fetch_envelope)
    }

    pub(crate) fn load_flags(&self, message: &Message) -> Result<()> {
        self.load_item(message, Connection::fetch_flags)
    }

    pub(crate) fn load_body_structure(&self, message: &Message) -> Result<()> {
        self.load_item(message, Connection::fetch_body_structure)
    }

    /// The complete header block, via `BODY.PEEK[HEADER]` (or the
    /// nested part's header for part-scoped handles).
    pub(crate) fn load_headers(&self, message: &Message) -> Result<()> {
        let (_, section) = Self::live_seq(message)?;
        self.load_item(message, move |connection, seq| {
            connection.fetch_headers(seq, section.as_deref().unwrap_or(""))
        })
    }

    /// The text body, without caching: `BODY.PEEK[TEXT]`, or the
    /// part-scoped variant for nested handles.
    pub(crate) fn load_text(&self, message: &Message) -> Result<Vec<u8>> {
        let mut events = Vec::new();
        let outcome = {
            let mut state = self.lock_state()?;
            Self::ensure_open(&state)?;
            let (seq, section) = Self::live_seq(message)?;
            let connection = state.connection.as_mut().ok_or(Error::FolderClosed)?;
            let result = match section {
                Some(section) => connection.fetch_body_part_text(seq, &section),
                None => connection.fetch_text(seq),
            };
            let pending = connection.take_pending();
            let outcome = result.map(|item| match item {
                Some(crate::protocol::fetch::FetchItem::Text { bytes, .. }) => bytes,
                _ => Vec::new(),
            });
            self.process_untagged(&mut state, pending, &mut events);
            outcome
        };
        self.broadcast(&events);
        outcome
    }

    /// Fetch and cache the raw content of one message.
    pub(crate) fn fetch_content(&self, message: &Message) -> Result<()> {
        let mut events = Vec::new();
        let outcome = {
            let mut state = self.lock_state()?;
            Self::ensure_open(&state)?;
            let (seq, section) = {
                let message_state = message
                    .state_cell()
                    .lock()
                    .map_err(|_| Error::FolderClosed)?;
                if message_state.expunged {
                    return Err(Error::MessageRemoved);
                }
                (message_state.seq, message_state.section.clone())
            };
            let connection = state.connection.as_mut().ok_or(Error::FolderClosed)?;
            let result = connection.fetch_body(seq, section.as_deref().unwrap_or(""));
            let pending = connection.take_pending();
            let outcome = result.map(|item| {
                if let Some(item) = item
                    && let Ok(mut message_state) = message.state_cell().lock()
                {
                    message_state.merge(&item);
                }
            });
            self.process_untagged(&mut state, pending, &mut events);
            outcome
        };
        self.broadcast(&events);
        outcome
    }

    // -- mailbox management (store connection) --

    /// Whether the mailbox exists on the server; caches the LIST
    /// entry, including the hierarchy separator.
    pub fn exists(&self) -> Result<bool> {
        let entries = self
            .inner
            .store
            .with_store_connection(|connection| connection.list("", &self.inner.full_name))?;
        let mut state = self.lock_state()?;
        state.list_info = entries.into_iter().next();
        let separator = state.list_info.as_ref().and_then(|info| info.separator);
        if separator.is_some() {
            state.separator = separator;
        }
        Ok(state.list_info.is_some())
    }

    /// The hierarchy separator, fetched via LIST on first use.
    pub fn separator(&self) -> Result<char> {
        if let Some(separator) = self.lock_state()?.separator {
            return Ok(separator);
        }
        self.exists()?;
        Ok(self.lock_state()?.separator.unwrap_or('/'))
    }

    /// A child folder handle.
    pub fn folder(&self, name: &str) -> Result<Folder> {
        if self.inner.full_name.is_empty() {
            return Ok(self.inner.store.folder_handle(name));
        }
        let separator = self.separator()?;
        Ok(self
            .inner
            .store
            .folder_handle(&format!("{}{}{}", self.inner.full_name, separator, name)))
    }

    /// LIST the folders below this one matching `pattern` (`*`, `%`,
    /// or a literal name).
    pub fn list(&self, pattern: &str) -> Result<Vec<Folder>> {
        self.list_internal(pattern, false)
    }

    /// LSUB variant of [`Folder::list`].
    pub fn list_subscribed(&self, pattern: &str) -> Result<Vec<Folder>> {
        self.list_internal(pattern, true)
    }

    fn list_internal(&self, pattern: &str, subscribed: bool) -> Result<Vec<Folder>> {
        let qualified = if self.inner.full_name.is_empty() {
            pattern.to_string()
        } else {
            format!("{}{}{}", self.inner.full_name, self.separator()?, pattern)
        };
        let entries = self.inner.store.with_store_connection(|connection| {
            if subscribed {
                connection.lsub("", &qualified)
            } else {
                connection.list("", &qualified)
            }
        })?;
        Ok(entries
            .into_iter()
            .map(|entry| self.inner.store.folder_handle(&entry.name))
            .collect())
    }

    /// CREATE this mailbox.
    pub fn create(&self) -> Result<()> {
        self.inner
            .store
            .with_store_connection(|connection| connection.create_mailbox(&self.inner.full_name))
    }

    /// DELETE this mailbox. The folder must be closed.
    pub fn delete(&self) -> Result<()> {
        if self.is_open() {
            return Err(Error::FolderOpen);
        }
        self.inner
            .store
            .with_store_connection(|connection| connection.delete_mailbox(&self.inner.full_name))
    }

    /// RENAME this mailbox. The folder must be closed.
    pub fn rename(&self, to: &str) -> Result<()> {
        if self.is_open() {
            return Err(Error::FolderOpen);
        }
        self.inner.store.with_store_connection(|connection| {
            connection.rename_mailbox(&self.inner.full_name, to)
        })
    }

    pub fn subscribe(&self) -> Result<()> {
        self.inner
            .store
            .with_store_connection(|connection| connection.subscribe(&self.inner.full_name))
    }

    pub fn unsubscribe(&self) -> Result<()> {
        self.inner
            .store
            .with_store_connection(|connection| connection.unsubscribe(&self.inner.full_name))
    }

    // -- ACL (gated on the ACL capability) --

    /// GETACL: the access-control list of this mailbox.
    pub fn acl(&self) -> Result<Option<crate::protocol::response::AclData>> {
        self.inner
            .store
            .with_store_connection(|connection| connection.acl_get(&self.inner.full_name))
    }

    /// SETACL for one identifier.
    pub fn set_acl(&self, name: &str, rights: &str) -> Result<()> {
        self.inner.store.with_store_connection(|connection| {
            connection.acl_set(&self.inner.full_name, name, rights)
        })
    }

    /// DELETEACL for one identifier.
    pub fn remove_acl(&self, name: &str) -> Result<()> {
        self.inner
            .store
            .with_store_connection(|connection| connection.acl_delete(&self.inner.full_name, name))
    }

    /// LISTRIGHTS: rights that may be granted to an identifier.
    pub fn list_rights(
        &self,
        name: &str,
    ) -> Result<Option<crate::protocol::response::ListRightsData>> {
        self.inner
            .store
            .with_store_connection(|connection| connection.list_rights(&self.inner.full_name, name))
    }

    /// MYRIGHTS: the rights of the authenticated user.
    pub fn my_rights(&self) -> Result<Option<String>> {
        self.inner
            .store
            .with_store_connection(|connection| connection.my_rights(&self.inner.full_name))
    }

    /// STATUS, served from a short-lived cache to keep repeated polls
    /// off the wire.
    pub fn status(&self) -> Result<StatusData> {
        let timeout = self.inner.store.config().status_cache_timeout;
        {
            let state = self.lock_state()?;
            if let Some((at, cached)) = &state.status_cache
                && at.elapsed() < timeout
            {
                return Ok(cached.clone());
            }
        }
        let status = self
            .inner
            .store
            .with_store_connection(|connection| connection.status(&self.inner.full_name))?;
        let mut state = self.lock_state()?;
        state.status_cache = Some((Instant::now(), status.clone()));
        Ok(status)
    }
}

impl std::fmt::Debug for Folder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Folder")
            .field("full_name", &self.inner.full_name)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}
