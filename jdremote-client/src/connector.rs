//! Cloud connector: owns the session and speaks the signed/encrypted relay protocol.
//!
//! Every call that touches the session holds its mutex for the whole exchange, so request
//! ids and token rotation stay consistent when several device handles share one connector.

use std::time::{SystemTime, UNIX_EPOCH};

use jdremote_core::protocol::{
    is_auth_kind, DeviceList, SessionTokens, AES_JSON_CONTENT_TYPE, CONNECT_PATH,
    DISCONNECT_PATH, LIST_DEVICES_PATH, RECONNECT_PATH,
};
use jdremote_core::{wire, DeviceDescriptor, Payload, Session, SessionSnapshot};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::device::DeviceHandle;
use crate::error::{Error, Result};
use crate::transport::{HttpResponse, HttpTransport, ReqwestTransport};

/// One relay request.
#[derive(Debug, Clone, Copy)]
pub enum Call<'a> {
    /// Signed query against the relay itself (`/my/...`).
    Get {
        path: &'a str,
        query: &'a [(&'a str, &'a str)],
    },
    /// Encrypted envelope for a device. `action` is the `/t_<token>_<device>` prefix,
    /// `api` replaces the relay base URL for direct connections.
    Post {
        path: &'a str,
        params: &'a [Value],
        action: Option<&'a str>,
        api: Option<&'a str>,
        binary: bool,
    },
}

impl Call<'_> {
    pub fn path(&self) -> &str {
        match self {
            Call::Get { path, .. } | Call::Post { path, .. } => path,
        }
    }
}

/// Outcome of one signed request.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Reply {
    Answer(Payload),
    /// The peer answered, but for another request id.
    Stale,
    /// A device POST got no HTTP answer at all.
    Unanswered,
}

impl Reply {
    pub(crate) fn into_payload(self) -> Option<Payload> {
        match self {
            Reply::Answer(payload) => Some(payload),
            Reply::Stale | Reply::Unanswered => None,
        }
    }
}

/// How to pick a device from the relay's list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSelector<'a> {
    Id(&'a str),
    Name(&'a str),
}

pub struct CloudConnector<T = ReqwestTransport> {
    config: Config,
    transport: T,
    session: Mutex<Session>,
}

impl CloudConnector<ReqwestTransport> {
    /// Connector over the blocking `reqwest` transport, with the configured timeout.
    pub fn new(config: Config) -> Result<Self> {
        let transport = ReqwestTransport::new(config.timeout())?;
        Ok(Self::with_transport(config, transport))
    }
}

impl<T: HttpTransport> CloudConnector<T> {
    pub fn with_transport(config: Config, transport: T) -> Self {
        Self {
            config,
            transport,
            session: Mutex::new(Session::new(now_millis())),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Use a custom application key for `/my/connect`.
    pub fn set_app_key(&mut self, app_key: impl Into<String>) {
        self.config.app_key = app_key.into();
    }

    pub fn is_connected(&self) -> bool {
        self.session.lock().is_connected()
    }

    pub fn session_token(&self) -> Option<String> {
        self.session.lock().session_token().map(str::to_string)
    }

    pub fn request_id(&self) -> u64 {
        self.session.lock().request_id()
    }

    /// Read access to the session, e.g. for inspecting rotated tokens.
    pub fn with_session<R>(&self, f: impl FnOnce(&Session) -> R) -> R {
        f(&self.session.lock())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.lock().snapshot()
    }

    /// Resume a persisted session without authenticating again.
    pub fn restore(&self, snapshot: &SessionSnapshot) -> Result<()> {
        let restored = Session::restore(snapshot)?;
        *self.session.lock() = restored;
        Ok(())
    }

    /// Log in: derive both secrets, run the handshake, rotate the encryption tokens and
    /// fetch the device list. Any failure leaves the session cleared.
    pub fn connect(&self, email: &str, password: &str) -> Result<()> {
        let mut session = self.session.lock();
        session.begin(email, password);
        session.rotate_request_id(now_millis());
        let result = self.handshake(&mut session, email);
        if result.is_err() {
            session.clear();
        }
        result
    }

    fn handshake(&self, session: &mut Session, email: &str) -> Result<()> {
        let query = [("email", email), ("appkey", self.config.app_key.as_str())];
        let response = self
            .dispatch(session, Call::Get { path: CONNECT_PATH, query: &query })
            .map_err(handshake_error)?;
        let tokens = session_tokens(response.into_payload())?;
        session
            .apply_tokens(&tokens.session_token, &tokens.regain_token)
            .map_err(|e| Error::Connection(e.to_string()))?;
        session.set_connected(true);
        info!("connected to relay");
        self.refresh_devices_locked(session)?;
        Ok(())
    }

    /// Trade the session and regain tokens for a fresh pair; secrets are kept.
    pub fn reconnect(&self) -> Result<()> {
        let mut session = self.session.lock();
        let (Some(session_token), Some(regain_token)) = (
            session.session_token().map(str::to_string),
            session.regain_token().map(str::to_string),
        ) else {
            return Err(Error::NotConnected);
        };
        let query = [
            ("sessiontoken", session_token.as_str()),
            ("regaintoken", regain_token.as_str()),
        ];
        let response = self
            .dispatch(&mut session, Call::Get { path: RECONNECT_PATH, query: &query })
            .map_err(handshake_error);
        let tokens = match response.and_then(|r| session_tokens(r.into_payload())) {
            Ok(tokens) => tokens,
            Err(e @ Error::Authentication { .. }) => {
                session.clear();
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        session
            .apply_tokens(&tokens.session_token, &tokens.regain_token)
            .map_err(|e| Error::Connection(e.to_string()))?;
        info!("session tokens renewed");
        Ok(())
    }

    /// Invalidate the session at the relay, then clear it locally whatever the outcome.
    pub fn disconnect(&self) -> Result<()> {
        let mut session = self.session.lock();
        let token = session.session_token().unwrap_or_default().to_string();
        let result = self.dispatch(
            &mut session,
            Call::Get {
                path: DISCONNECT_PATH,
                query: &[("sessiontoken", token.as_str())],
            },
        );
        session.clear();
        info!("disconnected");
        result.map(|_| ())
    }

    /// Query `/my/listdevices` and remember the answer.
    pub fn refresh_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        let mut session = self.session.lock();
        self.refresh_devices_locked(&mut session)
    }

    fn refresh_devices_locked(&self, session: &mut Session) -> Result<Vec<DeviceDescriptor>> {
        let token = session.session_token().unwrap_or_default().to_string();
        let response = self.dispatch(
            session,
            Call::Get {
                path: LIST_DEVICES_PATH,
                query: &[("sessiontoken", token.as_str())],
            },
        )?;
        let Reply::Answer(Payload::Json(response)) = response else {
            return Ok(session.devices().to_vec());
        };
        let list: DeviceList = serde_json::from_value(response)?;
        session.set_devices(list.list.clone());
        Ok(list.list)
    }

    /// Devices known from the last refresh.
    pub fn list_devices(&self) -> Vec<DeviceDescriptor> {
        self.session.lock().devices().to_vec()
    }

    /// Handle for one device. When direct connections are enabled, its endpoints are
    /// fetched right away; a failed fetch only leaves the registry empty.
    pub fn get_device(&self, selector: DeviceSelector<'_>) -> Result<DeviceHandle<'_, T>> {
        let descriptor = {
            let session = self.session.lock();
            if !session.is_connected() {
                return Err(Error::NotConnected);
            }
            session
                .devices()
                .iter()
                .find(|d| match selector {
                    DeviceSelector::Id(id) => d.id == id,
                    DeviceSelector::Name(name) => d.name == name,
                })
                .cloned()
                .ok_or_else(|| {
                    Error::NotFound(match selector {
                        DeviceSelector::Id(s) | DeviceSelector::Name(s) => s.to_string(),
                    })
                })?
        };
        let mut handle = DeviceHandle::new(self, descriptor, self.config.direct_connection);
        if handle.is_direct_enabled() {
            handle.refresh_quietly();
        }
        Ok(handle)
    }

    /// `/t_<session token>_<device id>`, the relay route to a device.
    pub fn action_prefix(&self, device_id: &str) -> Result<String> {
        let session = self.session.lock();
        let token = session.session_token().ok_or(Error::NotConnected)?;
        Ok(format!("/t_{token}_{device_id}"))
    }

    /// Send one signed request. `Ok(None)` means the answer was stale or, for POST,
    /// that nothing answered at all.
    pub fn request_signed(&self, call: Call<'_>) -> Result<Option<Payload>> {
        self.exchange(call).map(Reply::into_payload)
    }

    /// Like [`request_signed`](Self::request_signed), but keeps a stale answer apart from
    /// a missing one.
    pub(crate) fn exchange(&self, call: Call<'_>) -> Result<Reply> {
        let mut session = self.session.lock();
        self.dispatch(&mut session, call)
    }

    fn dispatch(&self, session: &mut Session, call: Call<'_>) -> Result<Reply> {
        if !session.is_connected() && call.path() != CONNECT_PATH {
            return Err(Error::NotConnected);
        }
        let rid = session.request_id();
        let sent = self.send(session, call, rid);
        session.rotate_request_id(now_millis());
        match sent? {
            Some((response, context)) => self.read_response(session, call, rid, response, context),
            None => Ok(Reply::Unanswered),
        }
    }

    fn send(
        &self,
        session: &Session,
        call: Call<'_>,
        rid: u64,
    ) -> Result<Option<(HttpResponse, String)>> {
        match call {
            Call::Get { path, query } => {
                let key = session.server_key()?;
                let query = wire::signed_query(path, query, rid, &key)?;
                let url = format!("{}{}", self.config.api_url, query);
                debug!(path, rid, "relay GET");
                let response = self.transport.get(&url)?;
                Ok(Some((response, format!("GET {}{path}", self.config.api_url))))
            }
            Call::Post {
                path,
                params,
                action,
                api,
                ..
            } => {
                let key = session.device_key()?;
                let body = wire::encrypt_envelope(&key, path, params, rid, self.config.api_version)?;
                let base = api.unwrap_or(&self.config.api_url);
                let url = format!("{base}{}{path}", action.unwrap_or_default());
                debug!(path, rid, via = base, "device POST");
                match self.transport.post(&url, AES_JSON_CONTENT_TYPE, body) {
                    Ok(response) => Ok(Some((response, format!("POST {base}{path}")))),
                    Err(e) => {
                        debug!(error = %e, "no answer");
                        Ok(None)
                    }
                }
            }
        }
    }

    fn read_response(
        &self,
        session: &Session,
        call: Call<'_>,
        rid: u64,
        response: HttpResponse,
        context: String,
    ) -> Result<Reply> {
        if !response.is_ok() {
            let key = session.device_key().ok();
            return Err(match wire::parse_error_body(&response.body, key.as_ref()) {
                Some(envelope) => Error::Protocol {
                    src: envelope.src.unwrap_or_else(|| "unknown".to_string()),
                    kind: envelope.kind.unwrap_or_else(|| "unknown".to_string()),
                    context,
                },
                None => Error::Protocol {
                    src: "unknown".to_string(),
                    kind: format!("undecodable HTTP {} answer", response.status),
                    context,
                },
            });
        }
        let device_call = match call {
            Call::Post { binary: true, .. } => {
                // binary payloads come back unencrypted
                return Ok(Reply::Answer(Payload::Binary(response.body)));
            }
            Call::Post { action, .. } => action.is_some(),
            Call::Get { .. } => false,
        };
        let key = if device_call {
            session.device_key()?
        } else {
            session.server_key()?
        };
        let text = std::str::from_utf8(&response.body)
            .map_err(|e| Error::InvalidResponse(e.to_string()))?;
        let json = wire::decrypt_response(&key, text)?;
        if wire::response_rid(&json) != Some(rid) {
            warn!(expected = rid, got = ?wire::response_rid(&json), "discarding stale response");
            return Ok(Reply::Stale);
        }
        Ok(Reply::Answer(Payload::Json(json)))
    }
}

/// Credential and token rejections become `Authentication`; other relay errors, such as
/// a gateway page during an outage, stay `Protocol`.
fn handshake_error(err: Error) -> Error {
    match err {
        Error::Protocol { src, kind, .. } if is_auth_kind(&kind) => {
            Error::Authentication { src, kind }
        }
        Error::Crypto(e) => Error::Connection(format!("undecryptable handshake answer: {e}")),
        Error::InvalidResponse(e) => Error::Connection(e),
        other => other,
    }
}

fn session_tokens(response: Option<Payload>) -> Result<SessionTokens> {
    let Some(Payload::Json(response)) = response else {
        return Err(Error::Connection("no handshake answer".to_string()));
    };
    serde_json::from_value(response)
        .map_err(|e| Error::Connection(format!("handshake answer: {e}")))
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
