//! Session state: derived secrets, rotating tokens, request id, known devices.
//!
//! Key material is zeroized when the session is dropped or cleared.

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bincode::Options as _;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{self, CryptoError, Domain, Key};
use crate::protocol::DeviceDescriptor;

/// State of one authenticated login.
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Session {
    login_secret: Option<Key>,
    device_secret: Option<Key>,
    session_token: Option<String>,
    regain_token: Option<String>,
    server_encryption_token: Option<Key>,
    device_encryption_token: Option<Key>,
    request_id: u64,
    connected: bool,
    #[zeroize(skip)]
    devices: Vec<DeviceDescriptor>,
}

impl Session {
    /// Empty, disconnected session whose request id starts at `now_millis`.
    pub fn new(now_millis: u64) -> Self {
        Self {
            login_secret: None,
            device_secret: None,
            session_token: None,
            regain_token: None,
            server_encryption_token: None,
            device_encryption_token: None,
            request_id: now_millis,
            connected: false,
            devices: Vec::new(),
        }
    }

    /// Drop everything, keeping request ids monotonic.
    pub fn clear(&mut self) {
        let rid = self.request_id;
        *self = Session::new(rid);
    }

    /// Reset and derive both secrets for a fresh login.
    pub fn begin(&mut self, email: &str, password: &str) {
        self.clear();
        self.login_secret = Some(crypto::derive_secret(email, password, Domain::Server));
        self.device_secret = Some(crypto::derive_secret(email, password, Domain::Device));
    }

    /// Install a new session/regain token pair and rotate both encryption tokens from it.
    pub fn apply_tokens(&mut self, session_token: &str, regain_token: &str) -> Result<(), SessionError> {
        let previous = self
            .server_encryption_token
            .or(self.login_secret)
            .ok_or(SessionError::MissingKey("login secret"))?;
        let device_secret = self
            .device_secret
            .ok_or(SessionError::MissingKey("device secret"))?;
        let server = crypto::rotate_token(&previous, session_token)?;
        let device = crypto::rotate_token(&device_secret, session_token)?;
        self.server_encryption_token = Some(server);
        self.device_encryption_token = Some(device);
        self.session_token = Some(session_token.to_string());
        self.regain_token = Some(regain_token.to_string());
        Ok(())
    }

    /// Key for relay signatures and relay answers: the rotated server token once
    /// established, the raw login secret before that.
    pub fn server_key(&self) -> Result<Key, SessionError> {
        self.server_encryption_token
            .or(self.login_secret)
            .ok_or(SessionError::MissingKey("login secret"))
    }

    /// Key for device envelopes.
    pub fn device_key(&self) -> Result<Key, SessionError> {
        self.device_encryption_token
            .ok_or(SessionError::MissingKey("device encryption token"))
    }

    /// Move to the next request id: `now_millis`, or one past the current id if the clock lags.
    pub fn rotate_request_id(&mut self, now_millis: u64) -> u64 {
        self.request_id = now_millis.max(self.request_id.saturating_add(1));
        self.request_id
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    pub fn regain_token(&self) -> Option<&str> {
        self.regain_token.as_deref()
    }

    pub fn login_secret(&self) -> Option<&Key> {
        self.login_secret.as_ref()
    }

    pub fn device_secret(&self) -> Option<&Key> {
        self.device_secret.as_ref()
    }

    pub fn server_encryption_token(&self) -> Option<&Key> {
        self.server_encryption_token.as_ref()
    }

    pub fn device_encryption_token(&self) -> Option<&Key> {
        self.device_encryption_token.as_ref()
    }

    pub fn devices(&self) -> &[DeviceDescriptor] {
        &self.devices
    }

    pub fn set_devices(&mut self, devices: Vec<DeviceDescriptor>) {
        self.devices = devices;
    }

    /// Serializable copy of every field. Binary secrets are base64.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            login_secret: self.login_secret.as_ref().map(|k| BASE64.encode(k)),
            device_secret: self.device_secret.as_ref().map(|k| BASE64.encode(k)),
            session_token: self.session_token.clone(),
            regain_token: self.regain_token.clone(),
            server_encryption_token: self.server_encryption_token.as_ref().map(|k| BASE64.encode(k)),
            device_encryption_token: self.device_encryption_token.as_ref().map(|k| BASE64.encode(k)),
            request_id: self.request_id,
            connected: self.connected,
            devices: self.devices.clone(),
        }
    }

    /// Rebuild a session from [`Session::snapshot`] output.
    pub fn restore(snapshot: &SessionSnapshot) -> Result<Self, SessionError> {
        Ok(Self {
            login_secret: decode_key(snapshot.login_secret.as_deref())?,
            device_secret: decode_key(snapshot.device_secret.as_deref())?,
            session_token: snapshot.session_token.clone(),
            regain_token: snapshot.regain_token.clone(),
            server_encryption_token: decode_key(snapshot.server_encryption_token.as_deref())?,
            device_encryption_token: decode_key(snapshot.device_encryption_token.as_deref())?,
            request_id: snapshot.request_id,
            connected: snapshot.connected,
            devices: snapshot.devices.clone(),
        })
    }
}

fn decode_key(encoded: Option<&str>) -> Result<Option<Key>, SessionError> {
    let Some(encoded) = encoded else {
        return Ok(None);
    };
    let bytes = BASE64.decode(encoded).map_err(CryptoError::from)?;
    let key: Key = bytes
        .try_into()
        .map_err(|v: Vec<u8>| SessionError::KeyLength(v.len()))?;
    Ok(Some(key))
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("connected", &self.connected)
            .field("request_id", &self.request_id)
            .field("has_session_token", &self.session_token.is_some())
            .field("rotated", &self.server_encryption_token.is_some())
            .field("devices", &self.devices.len())
            .finish()
    }
}

/// Persistable form of a [`Session`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub login_secret: Option<String>,
    pub device_secret: Option<String>,
    pub session_token: Option<String>,
    pub regain_token: Option<String>,
    pub server_encryption_token: Option<String>,
    pub device_encryption_token: Option<String>,
    pub request_id: u64,
    pub connected: bool,
    pub devices: Vec<DeviceDescriptor>,
}

const FILE_MAGIC: &[u8; 4] = b"JDRS";
const FILE_VERSION: u8 = 1;
const FILE_HEADER_LEN: usize = FILE_MAGIC.len() + 1;
/// A snapshot with a few dozen devices is well under this.
const MAX_FILE_BODY: u64 = 256 * 1024;

fn file_codec() -> impl bincode::Options {
    bincode::DefaultOptions::new()
        .with_limit(MAX_FILE_BODY)
        .reject_trailing_bytes()
}

impl SessionSnapshot {
    /// Session file contents: `JDRS`, a format version byte, then the bincode body.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SnapshotFileError> {
        let body = file_codec().serialize(self)?;
        let mut out = Vec::with_capacity(FILE_HEADER_LEN + body.len());
        out.extend_from_slice(FILE_MAGIC);
        out.push(FILE_VERSION);
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Parse bytes written by [`to_bytes`](Self::to_bytes).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SnapshotFileError> {
        if bytes.len() < FILE_HEADER_LEN || &bytes[..FILE_MAGIC.len()] != FILE_MAGIC {
            return Err(SnapshotFileError::NotASessionFile);
        }
        match bytes[FILE_MAGIC.len()] {
            FILE_VERSION => Ok(file_codec().deserialize(&bytes[FILE_HEADER_LEN..])?),
            other => Err(SnapshotFileError::UnsupportedVersion(other)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotFileError {
    #[error("not a session file")]
    NotASessionFile,
    #[error("unsupported session file version {0}")]
    UnsupportedVersion(u8),
    #[error("corrupt session file: {0}")]
    Corrupt(#[from] bincode::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("missing {0}")]
    MissingKey(&'static str),
    #[error("stored key has {0} bytes, expected 32")]
    KeyLength(usize),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
