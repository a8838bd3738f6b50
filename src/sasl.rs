//! SASL authentication mechanisms
//!
//! The AUTHENTICATE exchange is mechanism-agnostic: the connection
//! base64-decodes each server challenge, hands it to the mechanism,
//! and base64-encodes the reply. Anything beyond the PLAIN and LOGIN
//! built-ins (DIGEST-MD5, OAUTH, …) plugs in through the same trait.

use crate::error::{Error, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

/// A client-side SASL mechanism.
pub trait SaslMechanism: Send {
    /// The IMAP mechanism name, e.g. `PLAIN`.
    fn mechanism_name(&self) -> &'static str;

    /// Produce the response to one server challenge. The initial
    /// challenge is usually empty.
    fn evaluate_challenge(&mut self, challenge: &[u8]) -> Result<Vec<u8>>;
}

/// RFC 4616 PLAIN: `authzid NUL authcid NUL password` in one shot.
pub struct Plain {
    authorization_id: String,
    username: String,
    password: String,
}

impl Plain {
    #[must_use]
    pub fn new(
        authorization_id: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            authorization_id: authorization_id.into(),
            username: username.into(),
            password: password.into(),
        }
    }
}

impl SaslMechanism for Plain {
    fn mechanism_name(&self) -> &'static str {
        "PLAIN"
    }

    fn evaluate_challenge(&mut self, _challenge: &[u8]) -> Result<Vec<u8>> {
        Ok(format!(
            "{}\0{}\0{}",
            self.authorization_id, self.username, self.password
        )
        .into_bytes())
    }
}

/// The venerable LOGIN mechanism: username and password in response
/// to two successive prompts.
pub struct Login {
    username: String,
    password: String,
    prompts_answered: u8,
}

impl Login {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            prompts_answered: 0,
        }
    }
}

impl SaslMechanism for Login {
    fn mechanism_name(&self) -> &'static str {
        "LOGIN"
    }

    fn evaluate_challenge(&mut self, _challenge: &[u8]) -> Result<Vec<u8>> {
        self.prompts_answered += 1;
        match self.prompts_answered {
            1 => Ok(self.username.clone().into_bytes()),
            2 => Ok(self.password.clone().into_bytes()),
            _ => Err(Error::Authentication(
                "LOGIN mechanism received an unexpected third challenge".into(),
            )),
        }
    }
}

/// Decode a base64 server challenge.
pub fn decode_challenge(payload: &[u8]) -> Result<Vec<u8>> {
    let trimmed: Vec<u8> = payload
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    BASE64
        .decode(&trimmed)
        .map_err(|e| Error::Authentication(format!("undecodable challenge: {e}")))
}

/// Encode a mechanism response for the wire.
#[must_use]
pub fn encode_response(response: &[u8]) -> Vec<u8> {
    BASE64.encode(response).into_bytes()
}
