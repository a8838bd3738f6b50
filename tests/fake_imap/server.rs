//! In-process fake IMAP server for integration testing
//!
//! Speaks enough blocking IMAP to exercise the full client stack:
//! greeting -> CAPABILITY -> (optional STARTTLS) -> LOGIN or
//! AUTHENTICATE -> mailbox commands -> LOGOUT. Commands are parsed
//! with plain string handling against the [`Mailbox`] test model;
//! every received command is recorded so tests can assert on the
//! exact wire traffic.
//!
//! Client literals are honoured: when a command line ends in `{N}`
//! the server sends a `+` continuation and splices the next N raw
//! bytes into the logical command before dispatching it.

use super::handlers;
use super::mailbox::Mailbox;
use rcgen::generate_simple_self_signed;
use rustls::pki_types::PrivatePkcs8KeyDer;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

/// Shared server-side state a test can poke at while the server runs.
pub struct ServerState {
    pub mailbox: Mailbox,
    /// Raw lines pushed to the client before the next NOOP/STATUS
    /// completion (unsolicited updates).
    pub pushes: Vec<String>,
    /// Every logical command received, literals spliced in.
    pub command_log: Vec<String>,
}

/// A fake IMAP server on an OS-assigned localhost port.
pub struct FakeImapServer {
    port: u16,
    state: Arc<Mutex<ServerState>>,
}

impl FakeImapServer {
    /// Start a plaintext server.
    pub fn start(mailbox: Mailbox) -> Self {
        Self::start_inner(mailbox, false)
    }

    /// Start a server that advertises and accepts STARTTLS, using a
    /// self-signed certificate generated on the fly.
    pub fn start_with_starttls(mailbox: Mailbox) -> Self {
        Self::start_inner(mailbox, true)
    }

    fn start_inner(mailbox: Mailbox, starttls: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind to ephemeral port");
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(Mutex::new(ServerState {
            mailbox,
            pushes: Vec::new(),
            command_log: Vec::new(),
        }));

        // Ensure the ring crypto provider is installed process-wide.
        // Multiple tests may race to install it, so the error is
        // ignored if it is already set.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let tls_config = starttls.then(|| {
            let cert = generate_simple_self_signed(vec!["127.0.0.1".to_string()])
                .expect("generate self-signed cert");
            let cert_der = cert.cert.der().clone();
            let key_der = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());
            Arc::new(
                rustls::ServerConfig::builder()
                    .with_no_client_auth()
                    .with_single_cert(vec![cert_der], key_der.into())
                    .expect("build server TLS config"),
            )
        });

        let accept_state = Arc::clone(&state);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let state = Arc::clone(&accept_state);
                let tls = tls_config.clone();
                thread::spawn(move || handle_connection(stream, &state, tls));
            }
        });

        Self { port, state }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Queue an unsolicited response line (without CRLF).
    pub fn push(&self, line: &str) {
        self.state.lock().unwrap().pushes.push(line.to_string());
    }

    /// Snapshot of every command received so far.
    pub fn command_log(&self) -> Vec<String> {
        self.state.lock().unwrap().command_log.clone()
    }

    /// Direct access to the server-side state.
    pub fn state(&self) -> &Arc<Mutex<ServerState>> {
        &self.state
    }
}

enum Flow {
    Done,
    StartTls,
}

fn handle_connection(
    stream: TcpStream,
    state: &Arc<Mutex<ServerState>>,
    tls: Option<Arc<rustls::ServerConfig>>,
) {
    let mut stream = stream;
    if stream
        .write_all(b"* OK IMAP4rev1 Fake server ready\r\n")
        .is_err()
    {
        return;
    }

    match run_session(&mut stream, state, tls.is_some()) {
        Ok(Flow::StartTls) => {
            let Some(config) = tls else { return };
            let Ok(connection) = rustls::ServerConnection::new(config) else {
                return;
            };
            let mut tls_stream = rustls::StreamOwned::new(connection, stream);
            let _ = run_session(&mut tls_stream, state, false);
        }
        Ok(Flow::Done) | Err(_) => {}
    }
}

/// Read one logical command: a CRLF line, plus continuation rounds
/// for every trailing `{N}` literal marker.
fn read_command(stream: &mut (impl Read + Write)) -> std::io::Result<Option<Vec<u8>>> {
    let mut command = Vec::new();
    loop {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            if stream.read(&mut byte)? == 0 {
                return Ok(None);
            }
            line.push(byte[0]);
            if byte[0] == b'\n' {
                break;
            }
        }
        let trimmed_len = line.len().saturating_sub(2);
        let literal = literal_length(&line[..trimmed_len]);
        command.extend_from_slice(&line);
        match literal {
            None => return Ok(Some(command)),
            Some(length) => {
                stream.write_all(b"+ Ready for literal\r\n")?;
                stream.flush()?;
                let mut payload = vec![0u8; length];
                stream.read_exact(&mut payload)?;
                command.extend_from_slice(&payload);
            }
        }
    }
}

fn literal_length(line: &[u8]) -> Option<usize> {
    if line.last() != Some(&b'}') {
        return None;
    }
    let open = line.iter().rposition(|&b| b == b'{')?;
    std::str::from_utf8(&line[open + 1..line.len() - 1])
        .ok()?
        .parse()
        .ok()
}

fn run_session(
    stream: &mut (impl Read + Write),
    state: &Arc<Mutex<ServerState>>,
    starttls_available: bool,
) -> std::io::Result<Flow> {
    let mut selected: Option<String> = None;

    loop {
        let Some(raw) = read_command(stream)? else {
            return Ok(Flow::Done);
        };
        let command = String::from_utf8_lossy(&raw).replace("\r\n", "\n");
        let command = command.trim_end_matches('\n').replace('\n', " ");
        state.lock().unwrap().command_log.push(command.clone());

        let mut parts = command.splitn(3, ' ');
        let tag = parts.next().unwrap_or("*").to_string();
        let verb = parts.next().unwrap_or("").to_uppercase();
        let rest = parts.next().unwrap_or("").to_string();

        match verb.as_str() {
            "CAPABILITY" => handlers::capability(stream, &tag, state, starttls_available)?,
            "STARTTLS" => {
                writeln_crlf(stream, &format!("{tag} OK Begin TLS negotiation now"))?;
                return Ok(Flow::StartTls);
            }
            "LOGIN" => handlers::login(stream, &tag, &rest, state)?,
            "AUTHENTICATE" => handlers::authenticate(stream, &tag, &rest, state)?,
            "NOOP" => handlers::noop(stream, &tag, state)?,
            "LIST" => handlers::list(stream, &tag, &rest, state, false)?,
            "LSUB" => handlers::list(stream, &tag, &rest, state, true)?,
            "STATUS" => handlers::status(stream, &tag, &rest, state)?,
            "SELECT" => {
                selected = handlers::select(stream, &tag, &rest, state, false)?;
            }
            "EXAMINE" => {
                selected = handlers::select(stream, &tag, &rest, state, true)?;
            }
            "CLOSE" => {
                selected = None;
                writeln_crlf(stream, &format!("{tag} OK CLOSE completed"))?;
            }
            "FETCH" => handlers::fetch(stream, &tag, &rest, state, selected.as_deref())?,
            "UID" => handlers::uid(stream, &tag, &rest, state, selected.as_deref())?,
            "STORE" => handlers::store(stream, &tag, &rest, state, selected.as_deref())?,
            "SEARCH" => handlers::search(stream, &tag, &rest, state, selected.as_deref())?,
            "EXPUNGE" => handlers::expunge(stream, &tag, state, selected.as_deref())?,
            "COPY" => handlers::copy(stream, &tag, &rest, state, selected.as_deref())?,
            "APPEND" => handlers::append(stream, &tag, &raw, state)?,
            "CREATE" => handlers::create(stream, &tag, &rest, state)?,
            "DELETE" => handlers::delete(stream, &tag, &rest, state)?,
            "RENAME" => handlers::rename(stream, &tag, &rest, state)?,
            "SUBSCRIBE" | "UNSUBSCRIBE" => {
                writeln_crlf(stream, &format!("{tag} OK {verb} completed"))?;
            }
            "NAMESPACE" => handlers::namespace(stream, &tag)?,
            "GETQUOTAROOT" => handlers::quota_root(stream, &tag, &rest)?,
            "GETQUOTA" => handlers::quota(stream, &tag)?,
            "SETQUOTA" => handlers::set_quota(stream, &tag, &rest)?,
            "GETACL" => handlers::acl(stream, &tag, &rest)?,
            "SETACL" | "DELETEACL" => {
                writeln_crlf(stream, &format!("{tag} OK {verb} completed"))?;
            }
            "LOGOUT" => {
                writeln_crlf(stream, "* BYE fake server signing off")?;
                writeln_crlf(stream, &format!("{tag} OK LOGOUT completed"))?;
                return Ok(Flow::Done);
            }
            _ => {
                writeln_crlf(stream, &format!("{tag} BAD Unknown command"))?;
            }
        }
    }
}

/// Write one response line with CRLF.
pub fn writeln_crlf(stream: &mut impl Write, line: &str) -> std::io::Result<()> {
    stream.write_all(line.as_bytes())?;
    stream.write_all(b"\r\n")?;
    stream.flush()
}
