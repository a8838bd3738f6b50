//! Per-socket protocol driver
//!
//! Owns one TCP (or TLS) connection through its whole life: greeting,
//! optional STARTTLS upgrade, authentication, and the one-command-at-
//! a-time request/response cycle. Untagged responses read while a
//! command is in flight are queued and dispatched by the holder at
//! release points.

use crate::config::ImapConfig;
use crate::error::{Error, Result};
use crate::fetch_profile::FetchProfile;
use crate::flag::FlagSet;
use crate::protocol::command::CommandBuilder;
use crate::protocol::fetch::{FetchData, FetchItem};
use crate::protocol::reader::LineReader;
use crate::protocol::response::{
    self, AclData, Capabilities, ConditionData, FolderMode, ListData, MailboxStatus,
    NamespaceData, QuotaData, QuotaRootData, Response, ResponseStatus, StatusData,
    TaggedResponse, UntaggedResponse,
};
use crate::sasl::{self, Login, Plain, SaslMechanism};
use crate::search::SearchTerm;
use chrono::{DateTime, FixedOffset};
use rustls::pki_types::ServerName;
use rustls::{ClientConnection, StreamOwned};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

const ALIVE_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// The underlying byte stream, plain or TLS-wrapped.
enum Socket {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
    Closed,
}

impl Socket {
    fn tcp(&self) -> Option<&TcpStream> {
        match self {
            Self::Plain(stream) => Some(stream),
            Self::Tls(tls) => Some(tls.get_ref()),
            Self::Closed => None,
        }
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.tcp()
            .map_or(Ok(()), |stream| stream.set_read_timeout(timeout))
    }

    fn shutdown(&self) {
        if let Some(stream) = self.tcp() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    /// Swap the plain TCP stream for a TLS stream over the same socket.
    fn upgrade_tls(&mut self, host: &str, tls_config: Arc<rustls::ClientConfig>) -> Result<()> {
        match std::mem::replace(self, Self::Closed) {
            Self::Plain(stream) => {
                let server_name = ServerName::try_from(host.to_string())
                    .map_err(|e| Error::Tls(format!("Invalid server name: {e}")))?;
                let tls = ClientConnection::new(tls_config, server_name)
                    .map_err(|e| Error::Tls(e.to_string()))?;
                *self = Self::Tls(Box::new(StreamOwned::new(tls, stream)));
                Ok(())
            }
            other => {
                *self = other;
                Err(Error::Tls("connection is not eligible for STARTTLS".into()))
            }
        }
    }
}

impl Read for Socket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(stream) => stream.read(buf),
            Self::Tls(tls) => tls.read(buf),
            Self::Closed => Ok(0),
        }
    }
}

impl Write for Socket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(stream) => stream.write(buf),
            Self::Tls(tls) => tls.write(buf),
            Self::Closed => Err(io::Error::new(io::ErrorKind::NotConnected, "closed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(stream) => stream.flush(),
            Self::Tls(tls) => tls.flush(),
            Self::Closed => Ok(()),
        }
    }
}

/// Build the TLS client configuration for this store.
fn tls_client_config(config: &ImapConfig) -> Result<Arc<rustls::ClientConfig>> {
    if config.danger_accept_invalid_certs {
        let tls = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(DangerousVerifier))
            .with_no_client_auth();
        return Ok(Arc::new(tls));
    }

    let mut roots = rustls::RootCertStore::empty();
    let certs = rustls_native_certs::load_native_certs()
        .map_err(|e| Error::Tls(format!("cannot load platform trust roots: {e}")))?;
    for cert in certs {
        // Individual unusable roots are not fatal.
        let _ = roots.add(cert);
    }
    let tls = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(tls))
}

fn preview(bytes: &[u8]) -> String {
    let stop = bytes.len().min(128);
    let mut text = String::from_utf8_lossy(&bytes[..stop]).into_owned();
    if stop < bytes.len() {
        text.push_str("...");
    }
    text
}

/// A single authenticated IMAP connection.
pub(crate) struct Connection {
    socket: Socket,
    reader: LineReader,
    config: Arc<ImapConfig>,
    tag_sequence: u32,
    pending: VecDeque<UntaggedResponse>,
    capabilities: Capabilities,
    last_access: Instant,
    closed: bool,
}

impl Connection {
    /// Connect, negotiate TLS if configured, and authenticate.
    pub fn open(config: Arc<ImapConfig>) -> Result<Self> {
        let address = (config.host.as_str(), config.port);
        debug!("connecting to {}:{}", config.host, config.port);
        let stream = TcpStream::connect(address)?;
        stream.set_nodelay(true).ok();
        stream.set_read_timeout(config.command_timeout)?;

        let mut connection = Self {
            socket: Socket::Plain(stream),
            reader: LineReader::new(None),
            config: Arc::clone(&config),
            tag_sequence: 0,
            pending: VecDeque::new(),
            capabilities: Capabilities::default(),
            last_access: Instant::now(),
            closed: false,
        };

        if config.implicit_tls {
            let tls = tls_client_config(&config)?;
            connection.socket.upgrade_tls(&config.host, tls)?;
        }

        let preauthenticated = connection.read_greeting()?;
        connection.capability()?;

        if !config.implicit_tls && config.starttls && connection.capabilities.has("STARTTLS") {
            let builder = connection.command("STARTTLS");
            connection.run_command(builder)?;
            let tls = tls_client_config(&config)?;
            connection.socket.upgrade_tls(&config.host, tls)?;
            debug!("STARTTLS upgrade complete");
            // Capabilities may legitimately change once under TLS.
            connection.capability()?;
        }

        if !preauthenticated {
            connection.authenticate_any()?;
            connection.capability()?;
        }
        info!("connected to {} as {}", config.host, config.username);
        Ok(connection)
    }

    /// Read and classify the greeting. Returns whether the server
    /// preauthenticated us.
    fn read_greeting(&mut self) -> Result<bool> {
        match self.read_response()? {
            Response::Untagged(UntaggedResponse::Condition(greeting)) => {
                self.absorb_capability_code(&greeting);
                match greeting.status {
                    ResponseStatus::Ok => Ok(false),
                    ResponseStatus::Preauth => Ok(true),
                    ResponseStatus::Bye => {
                        self.closed = true;
                        Err(Error::Protocol(format!(
                            "server refused connection: {}",
                            greeting.message
                        )))
                    }
                    _ => Err(Error::Protocol("unexpected greeting status".into())),
                }
            }
            other => Err(Error::Protocol(format!("unexpected greeting {other:?}"))),
        }
    }

    /// Greetings and AUTHENTICATE completions may carry a
    /// `[CAPABILITY …]` code; use it when present.
    fn absorb_capability_code(&mut self, condition: &ConditionData) {
        if let Some(code) = &condition.code
            && code.keyword.eq_ignore_ascii_case("CAPABILITY")
        {
            self.capabilities = Capabilities::from_names(code.args.iter().map(String::as_str));
        }
    }

    // -- authentication --

    fn authenticate_any(&mut self) -> Result<()> {
        let config = Arc::clone(&self.config);
        if config.sasl
            && let Some(result) = self.try_sasl_mechanisms(&config)
        {
            return result;
        }
        if !self.capabilities.has("LOGINDISABLED") {
            return self.login();
        }
        // LOGIN is off the table; AUTHENTICATE is the only path left
        // even without the SASL opt-in.
        if let Some(result) = self.try_sasl_mechanisms(&config) {
            return result;
        }
        Err(Error::Authentication(
            "no supported authentication mechanism".into(),
        ))
    }

    /// Run the first advertised, non-disabled built-in mechanism, if
    /// the server offers one.
    fn try_sasl_mechanisms(&mut self, config: &ImapConfig) -> Option<Result<()>> {
        if !config.auth_plain_disabled && self.capabilities.supports_auth("PLAIN") {
            let mut plain = Plain::new(
                config.authorization_id(),
                &config.username,
                &config.password,
            );
            return Some(self.authenticate(&mut plain));
        }
        if !config.auth_login_disabled && self.capabilities.supports_auth("LOGIN") {
            let mut login = Login::new(&config.username, &config.password);
            return Some(self.authenticate(&mut login));
        }
        None
    }

    /// Drive one AUTHENTICATE exchange to its tagged completion.
    pub fn authenticate(&mut self, mechanism: &mut dyn SaslMechanism) -> Result<()> {
        debug!("authenticating via {}", mechanism.mechanism_name());
        let mut builder = self.command("AUTHENTICATE");
        builder.append_atom(mechanism.mechanism_name());
        let tag = builder.tag().to_string();
        let (_, segments) = builder.into_segments();
        self.write_segment(&segments[0], true)?;

        loop {
            match self.read_response()? {
                Response::Continuation(payload) => {
                    let challenge = sasl::decode_challenge(&payload)?;
                    let answer = mechanism.evaluate_challenge(&challenge)?;
                    let mut wire = sasl::encode_response(&answer);
                    wire.extend_from_slice(b"\r\n");
                    self.write_all_fatal(&wire)?;
                }
                Response::Untagged(untagged) => self.queue_pending(untagged),
                Response::Tagged(tagged) if tagged.tag == tag => {
                    self.last_access = Instant::now();
                    return match tagged.status {
                        ResponseStatus::Ok => {
                            self.absorb_capability_code(&ConditionData {
                                status: ResponseStatus::Ok,
                                code: tagged.code,
                                message: tagged.message,
                            });
                            Ok(())
                        }
                        ResponseStatus::No => Err(Error::Authentication(tagged.message)),
                        _ => Err(Error::InvalidCommand(tagged.message)),
                    };
                }
                Response::Tagged(other) => {
                    self.closed = true;
                    return Err(Error::Protocol(format!("stray tag {:?}", other.tag)));
                }
            }
        }
    }

    /// Plain LOGIN with the configured credentials.
    fn login(&mut self) -> Result<()> {
        debug!("authenticating via LOGIN");
        let config = Arc::clone(&self.config);
        let mut builder = self.command("LOGIN");
        builder.append_string(config.username.as_bytes());
        builder.append_string(config.password.as_bytes());
        match self.run_command(builder) {
            Ok(_) => Ok(()),
            Err(Error::CommandFailed(message)) => Err(Error::Authentication(message)),
            Err(other) => Err(other),
        }
    }

    // -- command machinery --

    fn command(&mut self, verb: &str) -> CommandBuilder {
        let builder = CommandBuilder::new(self.tag_sequence, verb);
        self.tag_sequence += 1;
        builder
    }

    fn write_segment(&mut self, segment: &[u8], terminate: bool) -> Result<()> {
        trace!("C: {}", preview(segment));
        self.write_all_fatal(segment)?;
        if terminate {
            self.write_all_fatal(b"\r\n")?;
        }
        let flushed = self.socket.flush().map_err(Error::from);
        self.fatal_on_error(flushed)
    }

    fn write_all_fatal(&mut self, bytes: &[u8]) -> Result<()> {
        let written = self.socket.write_all(bytes).map_err(Error::from);
        self.fatal_on_error(written)
    }

    fn fatal_on_error<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(error) = &result
            && error.is_connection_fatal()
        {
            self.closed = true;
        }
        result
    }

    fn read_response(&mut self) -> Result<Response> {
        let line = {
            let read = self.reader.read_line(&mut self.socket);
            self.fatal_on_error(read)?
        };
        trace!("S: {}", preview(&line.bytes));
        let classified = response::classify(&line);
        self.fatal_on_error(classified)
    }

    fn queue_pending(&mut self, untagged: UntaggedResponse) {
        if let UntaggedResponse::Condition(condition) = &untagged
            && condition.status == ResponseStatus::Bye
        {
            debug!("server said BYE: {}", condition.message);
            self.closed = true;
        }
        self.pending.push_back(untagged);
    }

    /// Send a complete command and pump responses until its tagged
    /// completion, yielding at literal boundaries for the server's
    /// continuation.
    pub fn run_command(&mut self, builder: CommandBuilder) -> Result<TaggedResponse> {
        if self.closed {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection is closed",
            )));
        }
        let (tag, segments) = builder.into_segments();
        let last = segments.len() - 1;
        for (index, segment) in segments.iter().enumerate() {
            self.write_segment(segment, index == last)?;
            if index < last {
                self.await_continuation(&tag)?;
            }
        }
        self.await_completion(&tag)
    }

    /// Read until the server either requests the next literal segment
    /// or aborts the command.
    fn await_continuation(&mut self, tag: &str) -> Result<()> {
        loop {
            match self.read_response()? {
                Response::Continuation(_) => return Ok(()),
                Response::Untagged(untagged) => self.queue_pending(untagged),
                Response::Tagged(tagged) if tagged.tag == tag => {
                    return Err(match tagged.status {
                        ResponseStatus::No => Error::CommandFailed(tagged.message),
                        ResponseStatus::Bad => Error::InvalidCommand(tagged.message),
                        _ => Error::Protocol("command completed before its literals".into()),
                    });
                }
                Response::Tagged(other) => {
                    self.closed = true;
                    return Err(Error::Protocol(format!("stray tag {:?}", other.tag)));
                }
            }
        }
    }

    fn await_completion(&mut self, tag: &str) -> Result<TaggedResponse> {
        loop {
            match self.read_response()? {
                Response::Untagged(untagged) => self.queue_pending(untagged),
                Response::Continuation(_) => {
                    self.closed = true;
                    return Err(Error::Protocol("unexpected continuation request".into()));
                }
                Response::Tagged(tagged) if tagged.tag == tag => {
                    self.last_access = Instant::now();
                    return match tagged.status {
                        ResponseStatus::Ok => Ok(tagged),
                        ResponseStatus::No => Err(Error::CommandFailed(tagged.message)),
                        ResponseStatus::Bad => Err(Error::InvalidCommand(tagged.message)),
                        _ => {
                            self.closed = true;
                            Err(Error::Protocol("unexpected completion status".into()))
                        }
                    };
                }
                Response::Tagged(other) => {
                    self.closed = true;
                    return Err(Error::Protocol(format!("stray tag {:?}", other.tag)));
                }
            }
        }
    }

    // -- pending-queue access --

    /// Detach everything queued, in arrival order.
    pub fn take_pending(&mut self) -> Vec<UntaggedResponse> {
        self.pending.drain(..).collect()
    }

    /// Remove and return the queued responses `matches` selects,
    /// leaving the rest queued in order.
    fn extract_pending(
        &mut self,
        matches: impl Fn(&UntaggedResponse) -> bool,
    ) -> Vec<UntaggedResponse> {
        let mut taken = Vec::new();
        let mut kept = VecDeque::with_capacity(self.pending.len());
        for untagged in self.pending.drain(..) {
            if matches(&untagged) {
                taken.push(untagged);
            } else {
                kept.push_back(untagged);
            }
        }
        self.pending = kept;
        taken
    }

    /// Pull one FETCH data item for `seq` out of the queue. Other
    /// items of the same response stay queued for the handler chain.
    fn take_fetch_item(
        &mut self,
        seq: u32,
        pick: impl Fn(&FetchItem) -> bool,
    ) -> Option<FetchItem> {
        for index in 0..self.pending.len() {
            let Some(UntaggedResponse::Fetch(data)) = self.pending.get_mut(index) else {
                continue;
            };
            if data.seq != seq {
                continue;
            }
            if let Some(position) = data.items.iter().position(&pick) {
                let item = data.items.remove(position);
                if data.items.is_empty() {
                    self.pending.remove(index);
                }
                return Some(item);
            }
        }
        None
    }

    // -- protocol verbs --

    /// Refresh the capability and auth-mechanism maps.
    pub fn capability(&mut self) -> Result<()> {
        let builder = self.command("CAPABILITY");
        self.run_command(builder)?;
        let responses =
            self.extract_pending(|u| matches!(u, UntaggedResponse::Capability(_)));
        if let Some(UntaggedResponse::Capability(capabilities)) = responses.into_iter().next_back()
        {
            self.capabilities = capabilities;
        }
        Ok(())
    }

    #[must_use]
    pub const fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Time since the last completed command.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_access.elapsed()
    }

    pub fn noop(&mut self) -> Result<()> {
        let builder = self.command("NOOP");
        self.run_command(builder)?;
        Ok(())
    }

    /// Best-effort orderly LOGOUT; the socket is closed either way.
    pub fn logout(&mut self) {
        if !self.closed {
            let builder = self.command("LOGOUT");
            if let Err(error) = self.run_command(builder) {
                debug!("LOGOUT failed: {error}");
            }
        }
        self.closed = true;
        self.socket.shutdown();
    }

    /// True when the connection answered recently or still answers a
    /// NOOP probe under a short deadline.
    pub fn is_alive(&mut self, threshold: Duration) -> bool {
        if self.closed {
            return false;
        }
        if self.last_access.elapsed() < threshold {
            return true;
        }
        let _ = self.socket.set_read_timeout(Some(ALIVE_PROBE_TIMEOUT));
        let alive = self.noop().is_ok();
        let _ = self.socket.set_read_timeout(self.config.command_timeout);
        if !alive {
            self.closed = true;
        }
        alive
    }

    pub fn list(&mut self, reference: &str, pattern: &str) -> Result<Vec<ListData>> {
        self.list_internal("LIST", reference, pattern)
    }

    pub fn lsub(&mut self, reference: &str, pattern: &str) -> Result<Vec<ListData>> {
        self.list_internal("LSUB", reference, pattern)
    }

    fn list_internal(
        &mut self,
        verb: &'static str,
        reference: &str,
        pattern: &str,
    ) -> Result<Vec<ListData>> {
        let mut builder = self.command(verb);
        builder.append_mailbox(reference);
        builder.append_mailbox(pattern);
        self.run_command(builder)?;
        let wanted_lsub = verb == "LSUB";
        let responses = self.extract_pending(|u| match u {
            UntaggedResponse::List(_) => !wanted_lsub,
            UntaggedResponse::Lsub(_) => wanted_lsub,
            _ => false,
        });
        Ok(responses
            .into_iter()
            .filter_map(|u| match u {
                UntaggedResponse::List(data) | UntaggedResponse::Lsub(data) => Some(data),
                _ => None,
            })
            .collect())
    }

    pub fn status(&mut self, mailbox: &str) -> Result<StatusData> {
        let mut builder = self.command("STATUS");
        builder.append_mailbox(mailbox);
        builder.begin_list();
        for item in ["MESSAGES", "RECENT", "UIDNEXT", "UIDVALIDITY", "UNSEEN"] {
            builder.append_atom(item);
        }
        builder.end_list();
        self.run_command(builder)?;
        self.extract_pending(|u| matches!(u, UntaggedResponse::Status(_)))
            .into_iter()
            .find_map(|u| match u {
                UntaggedResponse::Status(status) => Some(status),
                _ => None,
            })
            .ok_or_else(|| Error::Protocol("STATUS completed without a STATUS response".into()))
    }

    /// SELECT (or EXAMINE) a mailbox and merge the resulting state.
    pub fn select(&mut self, mailbox: &str, read_only: bool) -> Result<MailboxStatus> {
        let verb = if read_only { "EXAMINE" } else { "SELECT" };
        let mut builder = self.command(verb);
        builder.append_mailbox(mailbox);
        let tagged = self.run_command(builder)?;

        let mut status = MailboxStatus {
            // The server has the last word: a SELECT may still come
            // back [READ-ONLY].
            mode: if read_only || tagged.has_code("READ-ONLY") {
                FolderMode::ReadOnly
            } else {
                FolderMode::ReadWrite
            },
            ..MailboxStatus::default()
        };

        let harvested = self.extract_pending(|u| {
            matches!(
                u,
                UntaggedResponse::Flags(_)
                    | UntaggedResponse::PermanentFlags(_)
                    | UntaggedResponse::Exists(_)
                    | UntaggedResponse::Recent(_)
            ) || matches!(u, UntaggedResponse::Condition(c)
                    if c.has_code("UIDVALIDITY") || c.has_code("UIDNEXT") || c.has_code("UNSEEN"))
        });
        for untagged in harvested {
            match untagged {
                UntaggedResponse::Flags(flags) => status.available_flags = flags,
                UntaggedResponse::PermanentFlags(flags) => status.permanent_flags = flags,
                UntaggedResponse::Exists(n) => status.messages = n,
                UntaggedResponse::Recent(n) => status.recent = n,
                UntaggedResponse::Condition(condition) => {
                    let Some(code) = &condition.code else { continue };
                    match code.keyword.to_ascii_uppercase().as_str() {
                        "UIDVALIDITY" => status.uid_validity = code.number(),
                        "UIDNEXT" => status.uid_next = code.number(),
                        "UNSEEN" => status.unseen = code.number(),
                        _ => {}
                    }
                }
                _ => {}
            }
        }
        Ok(status)
    }

    /// CLOSE the selected mailbox (expunging `\Deleted` mail when the
    /// selection is read-write).
    pub fn close_mailbox(&mut self) -> Result<()> {
        let builder = self.command("CLOSE");
        self.run_command(builder)?;
        Ok(())
    }

    /// EXPUNGE; returns the expunged sequence numbers in server order.
    pub fn expunge(&mut self) -> Result<Vec<u32>> {
        let builder = self.command("EXPUNGE");
        self.run_command(builder)?;
        Ok(self
            .extract_pending(|u| matches!(u, UntaggedResponse::Expunge(_)))
            .into_iter()
            .filter_map(|u| match u {
                UntaggedResponse::Expunge(seq) => Some(seq),
                _ => None,
            })
            .collect())
    }

    /// FETCH a message set with a prefetch profile.
    pub fn fetch(&mut self, set: &str, profile: &FetchProfile) -> Result<Vec<FetchData>> {
        let mut builder = self.command("FETCH");
        builder.append_atom(set);
        builder.append_fetch_profile(profile);
        self.run_command(builder)?;
        Ok(self.take_fetch_responses())
    }

    fn take_fetch_responses(&mut self) -> Vec<FetchData> {
        self.extract_pending(|u| matches!(u, UntaggedResponse::Fetch(_)))
            .into_iter()
            .filter_map(|u| match u {
                UntaggedResponse::Fetch(data) => Some(data),
                _ => None,
            })
            .collect()
    }

    fn fetch_single_item(
        &mut self,
        seq: u32,
        items: &[&str],
        section: Option<(&str, Option<&str>)>,
        pick: impl Fn(&FetchItem) -> bool,
    ) -> Result<Option<FetchItem>> {
        let mut builder = self.command("FETCH");
        builder.append_number(seq);
        builder.begin_list();
        for item in items {
            builder.append_atom(item);
        }
        if let Some((part, name)) = section {
            let part = (!part.is_empty()).then_some(part);
            builder.append_body_section(part, name);
        }
        builder.end_list();
        self.run_command(builder)?;
        Ok(self.take_fetch_item(seq, pick))
    }

    /// The envelope triple (`ENVELOPE INTERNALDATE RFC822.SIZE`); the
    /// date and size items stay queued and reach the message through
    /// the folder's handler.
    pub fn fetch_envelope(&mut self, seq: u32) -> Result<Option<FetchItem>> {
        self.fetch_single_item(
            seq,
            &["ENVELOPE", "INTERNALDATE", "RFC822.SIZE"],
            None,
            |item| matches!(item, FetchItem::Envelope(_)),
        )
    }

    pub fn fetch_body_structure(&mut self, seq: u32) -> Result<Option<FetchItem>> {
        self.fetch_single_item(seq, &["BODYSTRUCTURE"], None, |item| {
            matches!(item, FetchItem::BodyStructure(_))
        })
    }

    pub fn fetch_flags(&mut self, seq: u32) -> Result<Option<FetchItem>> {
        self.fetch_single_item(seq, &["FLAGS"], None, |item| {
            matches!(item, FetchItem::Flags(_))
        })
    }

    /// `BODY.PEEK[section.HEADER]` — full headers of the message or a
    /// nested part.
    pub fn fetch_headers(&mut self, seq: u32, section: &str) -> Result<Option<FetchItem>> {
        self.fetch_single_item(
            seq,
            &["BODY.PEEK"],
            Some((section, Some("HEADER"))),
            |item| matches!(item, FetchItem::Header { .. }),
        )
    }

    /// `BODY.PEEK[TEXT]` — the text body of the whole message.
    pub fn fetch_text(&mut self, seq: u32) -> Result<Option<FetchItem>> {
        self.fetch_single_item(seq, &["BODY.PEEK"], Some(("", Some("TEXT"))), |item| {
            matches!(item, FetchItem::Text { .. })
        })
    }

    /// `BODY.PEEK[section.TEXT]` — the text body of a nested part.
    pub fn fetch_body_part_text(&mut self, seq: u32, section: &str) -> Result<Option<FetchItem>> {
        self.fetch_single_item(seq, &["BODY.PEEK"], Some((section, Some("TEXT"))), |item| {
            matches!(item, FetchItem::Text { .. })
        })
    }

    /// `BODY.PEEK[section]` — raw content of a section (or the whole
    /// message for an empty section).
    pub fn fetch_body(&mut self, seq: u32, section: &str) -> Result<Option<FetchItem>> {
        self.fetch_single_item(seq, &["BODY.PEEK"], Some((section, None)), |item| {
            matches!(item, FetchItem::Body { .. } | FetchItem::Text { .. })
        })
    }

    /// STORE +FLAGS / -FLAGS over a message set; the merged state
    /// comes back as FETCH responses.
    pub fn store_flags(&mut self, set: &str, flags: &FlagSet, add: bool) -> Result<Vec<FetchData>> {
        let mut builder = self.command("STORE");
        builder.append_atom(set);
        builder.append_atom(if add { "+FLAGS" } else { "-FLAGS" });
        builder.append_flags(flags);
        self.run_command(builder)?;
        Ok(self.take_fetch_responses())
    }

    /// `UID FETCH uid (UID)` — resolve a UID to its sequence number.
    pub fn uid_fetch_seq(&mut self, uid: u32) -> Result<Option<(u32, u32)>> {
        Ok(self.uid_fetch_seq_range(uid, uid)?.into_iter().next())
    }

    /// `UID FETCH start:end (UID)` — resolve a UID range; `end` may be
    /// [`crate::protocol::sequence::LAST_UID`].
    pub fn uid_fetch_seq_range(&mut self, start: u32, end: u32) -> Result<Vec<(u32, u32)>> {
        let mut builder = self.command("UID");
        builder.append_atom("FETCH");
        builder.append_atom(&crate::protocol::sequence::encode_uid_range(start, end));
        builder.begin_list();
        builder.append_atom("UID");
        builder.end_list();
        self.run_command(builder)?;
        Ok(self
            .take_fetch_responses()
            .into_iter()
            .filter_map(|data| {
                data.items.iter().find_map(|item| match item {
                    FetchItem::Uid { uid, seq } => Some((*seq, *uid)),
                    _ => None,
                })
            })
            .collect())
    }

    /// SEARCH with an optional message set (defaults to ALL).
    pub fn search(&mut self, term: &SearchTerm, set: Option<&str>) -> Result<Vec<u32>> {
        let mut builder = self.command("SEARCH");
        builder.append_search_term(term);
        builder.append_atom(set.unwrap_or("ALL"));
        self.run_command(builder)?;
        let mut hits = Vec::new();
        for untagged in self.extract_pending(|u| matches!(u, UntaggedResponse::Search(_))) {
            if let UntaggedResponse::Search(numbers) = untagged {
                hits.extend(numbers);
            }
        }
        Ok(hits)
    }

    /// APPEND a message. `\Recent` is stripped from the flag set.
    pub fn append(
        &mut self,
        mailbox: &str,
        flags: Option<&FlagSet>,
        date: Option<&DateTime<FixedOffset>>,
        body: &[u8],
    ) -> Result<()> {
        let mut builder = self.command("APPEND");
        builder.append_mailbox(mailbox);
        if let Some(flags) = flags {
            builder.append_flags(flags);
        }
        if let Some(date) = date {
            builder.append_date(date);
        }
        builder.append_literal(body);
        self.run_command(builder)?;
        Ok(())
    }

    pub fn copy(&mut self, set: &str, mailbox: &str) -> Result<()> {
        let mut builder = self.command("COPY");
        builder.append_atom(set);
        builder.append_mailbox(mailbox);
        self.run_command(builder)?;
        Ok(())
    }

    pub fn create_mailbox(&mut self, mailbox: &str) -> Result<()> {
        self.simple_mailbox_command("CREATE", mailbox)
    }

    pub fn delete_mailbox(&mut self, mailbox: &str) -> Result<()> {
        self.simple_mailbox_command("DELETE", mailbox)
    }

    pub fn rename_mailbox(&mut self, from: &str, to: &str) -> Result<()> {
        let mut builder = self.command("RENAME");
        builder.append_mailbox(from);
        builder.append_mailbox(to);
        self.run_command(builder)?;
        Ok(())
    }

    pub fn subscribe(&mut self, mailbox: &str) -> Result<()> {
        self.simple_mailbox_command("SUBSCRIBE", mailbox)
    }

    pub fn unsubscribe(&mut self, mailbox: &str) -> Result<()> {
        self.simple_mailbox_command("UNSUBSCRIBE", mailbox)
    }

    fn simple_mailbox_command(&mut self, verb: &'static str, mailbox: &str) -> Result<()> {
        let mut builder = self.command(verb);
        builder.append_mailbox(mailbox);
        self.run_command(builder)?;
        Ok(())
    }

    /// NAMESPACE, or the empty record when the capability is missing
    /// (callers fall back to defaults).
    pub fn namespace(&mut self) -> Result<NamespaceData> {
        if !self.capabilities.has("NAMESPACE") {
            return Ok(NamespaceData::default());
        }
        let builder = self.command("NAMESPACE");
        self.run_command(builder)?;
        Ok(self
            .extract_pending(|u| matches!(u, UntaggedResponse::Namespace(_)))
            .into_iter()
            .find_map(|u| match u {
                UntaggedResponse::Namespace(data) => Some(data),
                _ => None,
            })
            .unwrap_or_default())
    }

    // -- ACL (gated on the ACL capability) --

    fn require_capability(&self, name: &'static str) -> Result<()> {
        if self.capabilities.has(name) {
            Ok(())
        } else {
            Err(Error::Unsupported(name))
        }
    }

    pub fn acl_get(&mut self, mailbox: &str) -> Result<Option<AclData>> {
        self.require_capability("ACL")?;
        let mut builder = self.command("GETACL");
        builder.append_mailbox(mailbox);
        self.run_command(builder)?;
        Ok(self
            .extract_pending(|u| matches!(u, UntaggedResponse::Acl(_)))
            .into_iter()
            .find_map(|u| match u {
                UntaggedResponse::Acl(data) => Some(data),
                _ => None,
            }))
    }

    pub fn acl_set(&mut self, mailbox: &str, name: &str, rights: &str) -> Result<()> {
        self.require_capability("ACL")?;
        let mut builder = self.command("SETACL");
        builder.append_mailbox(mailbox);
        builder.append_string(name.as_bytes());
        builder.append_string(rights.as_bytes());
        self.run_command(builder)?;
        Ok(())
    }

    pub fn acl_delete(&mut self, mailbox: &str, name: &str) -> Result<()> {
        self.require_capability("ACL")?;
        let mut builder = self.command("DELETEACL");
        builder.append_mailbox(mailbox);
        builder.append_string(name.as_bytes());
        self.run_command(builder)?;
        Ok(())
    }

    pub fn list_rights(
        &mut self,
        mailbox: &str,
        name: &str,
    ) -> Result<Option<response::ListRightsData>> {
        self.require_capability("ACL")?;
        let mut builder = self.command("LISTRIGHTS");
        builder.append_mailbox(mailbox);
        builder.append_string(name.as_bytes());
        self.run_command(builder)?;
        Ok(self
            .extract_pending(|u| matches!(u, UntaggedResponse::ListRights(_)))
            .into_iter()
            .find_map(|u| match u {
                UntaggedResponse::ListRights(data) => Some(data),
                _ => None,
            }))
    }

    pub fn my_rights(&mut self, mailbox: &str) -> Result<Option<String>> {
        self.require_capability("ACL")?;
        let mut builder = self.command("MYRIGHTS");
        builder.append_mailbox(mailbox);
        self.run_command(builder)?;
        Ok(self
            .extract_pending(|u| matches!(u, UntaggedResponse::MyRights(_)))
            .into_iter()
            .find_map(|u| match u {
                UntaggedResponse::MyRights(data) => Some(data.rights),
                _ => None,
            }))
    }

    // -- QUOTA (gated on the QUOTA capability) --

    pub fn quota(&mut self, root: &str) -> Result<Vec<QuotaData>> {
        self.require_capability("QUOTA")?;
        let mut builder = self.command("GETQUOTA");
        builder.append_string(root.as_bytes());
        self.run_command(builder)?;
        Ok(self.take_quota_responses())
    }

    pub fn quota_root(&mut self, mailbox: &str) -> Result<(Vec<QuotaRootData>, Vec<QuotaData>)> {
        self.require_capability("QUOTA")?;
        let mut builder = self.command("GETQUOTAROOT");
        builder.append_mailbox(mailbox);
        self.run_command(builder)?;
        let roots = self
            .extract_pending(|u| matches!(u, UntaggedResponse::QuotaRoot(_)))
            .into_iter()
            .filter_map(|u| match u {
                UntaggedResponse::QuotaRoot(data) => Some(data),
                _ => None,
            })
            .collect();
        Ok((roots, self.take_quota_responses()))
    }

    /// `SETQUOTA root (resource limit …)`.
    pub fn set_quota(&mut self, root: &str, limits: &[(String, u64)]) -> Result<Vec<QuotaData>> {
        self.require_capability("QUOTA")?;
        let mut builder = self.command("SETQUOTA");
        builder.append_string(root.as_bytes());
        builder.begin_list();
        for (resource, limit) in limits {
            builder.append_atom(resource);
            builder.append_atom(&limit.to_string());
        }
        builder.end_list();
        self.run_command(builder)?;
        Ok(self.take_quota_responses())
    }

    fn take_quota_responses(&mut self) -> Vec<QuotaData> {
        self.extract_pending(|u| matches!(u, UntaggedResponse::Quota(_)))
            .into_iter()
            .filter_map(|u| match u {
                UntaggedResponse::Quota(data) => Some(data),
                _ => None,
            })
            .collect()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if !self.closed {
            self.socket.shutdown();
        }
    }
}

/// Certificate verifier that accepts all certificates
/// (for bridges and test servers with self-signed certs).
#[derive(Debug)]
struct DangerousVerifier;

impl rustls::client::danger::ServerCertVerifier for DangerousVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
