//! In-process relay and device used by the integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use jdremote_client::{CloudConnector, Config, HttpResponse, HttpTransport, TransportError};
use jdremote_core::crypto::{self, Domain, Key};
use jdremote_core::{wire, DirectEndpoint};
use parking_lot::Mutex;
use serde_json::{json, Value};

pub const RELAY: &str = "http://relay.test";
pub const EMAIL: &str = "User@Example.com";
pub const PASSWORD: &str = "hunter2";
pub const DEVICE_ID: &str = "dev1";
pub const DEVICE_NAME: &str = "Living Room";
pub const BINARY_PATH: &str = "/contentV2/getFavIcon";
pub const BINARY_BODY: &[u8] = &[0x89, b'P', b'N', b'G', 0, 1, 2];

/// One request as the mock saw it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: &'static str,
    /// `RELAY` or `http://ip:port`.
    pub base: String,
    pub path: String,
    pub rid: u64,
    /// Raw query for GET, decrypted envelope for POST.
    pub query: String,
    pub envelope: Option<Value>,
}

#[derive(Default)]
struct State {
    session_token: Option<String>,
    server_token: Option<Key>,
    device_token: Option<Key>,
    requests: Vec<Recorded>,
    reported: Vec<DirectEndpoint>,
    info_calls: usize,
    unreachable: HashSet<String>,
    relay_down: bool,
    stale_next: bool,
    gateway_error: bool,
    refresh_error: bool,
    attempted: Vec<String>,
}

/// Relay plus device: verifies signatures, decrypts envelopes and answers like the real thing.
/// Clones share state, so a second connector can talk to the same relay.
#[derive(Clone)]
pub struct MockRelay {
    login_secret: Key,
    device_secret: Key,
    state: Arc<Mutex<State>>,
}

impl MockRelay {
    pub fn new() -> Self {
        Self {
            login_secret: crypto::derive_secret(EMAIL, PASSWORD, Domain::Server),
            device_secret: crypto::derive_secret(EMAIL, PASSWORD, Domain::Device),
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    pub fn login_secret(&self) -> Key {
        self.login_secret
    }

    pub fn device_secret(&self) -> Key {
        self.device_secret
    }

    /// Endpoints returned by `/device/getDirectConnectionInfos`.
    pub fn report_endpoints(&self, endpoints: Vec<DirectEndpoint>) {
        self.state.lock().reported = endpoints;
    }

    pub fn set_unreachable(&self, endpoint: &DirectEndpoint) {
        self.state.lock().unreachable.insert(endpoint.base_url());
    }

    pub fn set_reachable(&self, endpoint: &DirectEndpoint) {
        self.state.lock().unreachable.remove(&endpoint.base_url());
    }

    pub fn set_relay_down(&self, down: bool) {
        self.state.lock().relay_down = down;
    }

    /// Answer the next request with a wrong rid.
    pub fn stale_next(&self) {
        self.state.lock().stale_next = true;
    }

    /// Answer every relay GET with a proxy's HTML error page.
    pub fn set_gateway_error(&self, on: bool) {
        self.state.lock().gateway_error = on;
    }

    /// Fail `/device/getDirectConnectionInfos` with an error envelope.
    pub fn set_refresh_error(&self, on: bool) {
        self.state.lock().refresh_error = on;
    }

    pub fn info_calls(&self) -> usize {
        self.state.lock().info_calls
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.lock().requests.clone()
    }

    /// Device calls other than endpoint refreshes, as `(base, path)`.
    pub fn device_calls(&self) -> Vec<(String, String)> {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.method == "POST" && r.path != "/device/getDirectConnectionInfos")
            .map(|r| (r.base.clone(), r.path.clone()))
            .collect()
    }

    /// Base URL of every POST, including ones that never connected.
    pub fn attempted(&self) -> Vec<String> {
        self.state.lock().attempted.clone()
    }

    pub fn clear_requests(&self) {
        let mut state = self.state.lock();
        state.requests.clear();
        state.attempted.clear();
    }

    fn answer(key: &Key, mut body: Value, rid: u64, stale: bool) -> HttpResponse {
        body["rid"] = json!(if stale { rid.wrapping_sub(1) } else { rid });
        let text = crypto::encrypt_cbc(key, body.to_string().as_bytes()).expect("encrypt");
        HttpResponse::new(200, text)
    }

    fn error(status: u16, src: &str, kind: &str) -> HttpResponse {
        HttpResponse::new(status, json!({"src": src, "type": kind}).to_string())
    }

    fn relay_get(&self, url: &str) -> HttpResponse {
        let rest = url.strip_prefix(RELAY).expect("relay url");
        let (query, signature) = rest.rsplit_once("&signature=").expect("signed query");
        let (path, params) = query.split_once('?').expect("query string");
        let rid: u64 = params
            .split('&')
            .find_map(|kv| kv.strip_prefix("rid="))
            .and_then(|v| v.parse().ok())
            .expect("rid");

        let mut state = self.state.lock();
        let stale = std::mem::take(&mut state.stale_next);
        state.requests.push(Recorded {
            method: "GET",
            base: RELAY.to_string(),
            path: path.to_string(),
            rid,
            query: query.to_string(),
            envelope: None,
        });

        let key = match path {
            "/my/connect" => self.login_secret,
            _ => match state.server_token {
                Some(k) => k,
                None => return Self::error(403, "MYJD", "TOKEN_INVALID"),
            },
        };
        if crypto::sign(&key, query).expect("sign") != signature {
            let kind = if path == "/my/connect" { "AUTH_FAILED" } else { "BAD_SIGNATURE" };
            return Self::error(403, "MYJD", kind);
        }

        match path {
            "/my/connect" => {
                self.install_tokens(&mut state, self.login_secret, "ab12");
                Self::answer(
                    &self.login_secret,
                    json!({"sessiontoken": "ab12", "regaintoken": "cd34"}),
                    rid,
                    stale,
                )
            }
            "/my/reconnect" => {
                if !params.contains("regaintoken=cd34") {
                    return Self::error(403, "MYJD", "TOKEN_INVALID");
                }
                self.install_tokens(&mut state, key, "ef56");
                Self::answer(
                    &key,
                    json!({"sessiontoken": "ef56", "regaintoken": "0789"}),
                    rid,
                    stale,
                )
            }
            "/my/listdevices" => Self::answer(
                &key,
                json!({"list": [{"id": DEVICE_ID, "name": DEVICE_NAME, "type": "jd"}]}),
                rid,
                stale,
            ),
            "/my/disconnect" => {
                state.session_token = None;
                state.server_token = None;
                state.device_token = None;
                Self::answer(&key, json!({}), rid, stale)
            }
            _ => Self::error(404, "MYJD", "API_COMMAND_NOT_FOUND"),
        }
    }

    fn install_tokens(&self, state: &mut State, previous: Key, session_token: &str) {
        state.server_token = Some(crypto::rotate_token(&previous, session_token).expect("rotate"));
        state.device_token =
            Some(crypto::rotate_token(&self.device_secret, session_token).expect("rotate"));
        state.session_token = Some(session_token.to_string());
    }

    fn device_post(&self, url: &str, body: &str) -> Result<HttpResponse, TransportError> {
        let mut state = self.state.lock();
        let (base, rest) = match url.strip_prefix(RELAY) {
            Some(rest) => (RELAY.to_string(), rest),
            None => {
                let after_scheme = url.strip_prefix("http://").expect("direct url");
                let slash = after_scheme.find('/').expect("path");
                let base = format!("http://{}", &after_scheme[..slash]);
                state.attempted.push(base.clone());
                if state.unreachable.contains(&base) {
                    return Err(TransportError::new(url, "connection refused"));
                }
                (base, &after_scheme[slash..])
            }
        };
        if base == RELAY {
            state.attempted.push(RELAY.to_string());
        }
        if base == RELAY && state.relay_down {
            return Err(TransportError::new(url, "relay timeout"));
        }

        let (Some(token), Some(key)) = (state.session_token.clone(), state.device_token) else {
            return Ok(Self::error(403, "MYJD", "TOKEN_INVALID"));
        };
        let prefix = format!("/t_{token}_{DEVICE_ID}");
        let Some(path) = rest.strip_prefix(&prefix) else {
            return Ok(Self::error(403, "MYJD", "TOKEN_INVALID"));
        };
        let envelope: Value = match wire::decrypt_response(&key, body) {
            Ok(v) => v,
            Err(_) => return Ok(Self::error(403, "DEVICE", "BAD_PARAMETERS")),
        };
        let rid = envelope["rid"].as_u64().expect("envelope rid");
        assert_eq!(envelope["url"], json!(path), "envelope url matches request path");

        let stale = std::mem::take(&mut state.stale_next);
        state.requests.push(Recorded {
            method: "POST",
            base: base.clone(),
            path: path.to_string(),
            rid,
            query: String::new(),
            envelope: Some(envelope.clone()),
        });

        if path == "/device/getDirectConnectionInfos" {
            state.info_calls += 1;
            if state.refresh_error {
                return Ok(Self::error(500, "DEVICE", "INTERNAL_SERVER_ERROR"));
            }
            let infos: Vec<Value> = state
                .reported
                .iter()
                .map(|e| json!({"ip": e.ip, "port": e.port}))
                .collect();
            return Ok(Self::answer(
                &key,
                json!({"data": {"infos": infos, "rebindProtectionDetected": false, "mode": "LAN"}}),
                rid,
                stale,
            ));
        }
        if path == BINARY_PATH {
            return Ok(HttpResponse::new(200, BINARY_BODY.to_vec()));
        }
        if path == "/device/ping" {
            return Ok(Self::answer(&key, json!({"data": true}), rid, stale));
        }
        Ok(Self::answer(
            &key,
            json!({"data": {"path": path, "via": base, "params": envelope["params"]}}),
            rid,
            stale,
        ))
    }
}

impl HttpTransport for MockRelay {
    fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        let state = self.state.lock();
        if state.relay_down {
            return Err(TransportError::new(url, "relay timeout"));
        }
        if state.gateway_error {
            return Ok(HttpResponse::new(502, "<html>502 Bad Gateway</html>"));
        }
        drop(state);
        Ok(self.relay_get(url))
    }

    fn post(&self, url: &str, content_type: &str, body: String) -> Result<HttpResponse, TransportError> {
        assert_eq!(content_type, "application/aesjson-jd; charset=utf-8");
        self.device_post(url, &body)
    }
}

pub fn config(direct: bool) -> Config {
    Config {
        api_url: RELAY.to_string(),
        direct_connection: direct,
        ..Config::default()
    }
}

pub fn connector(direct: bool) -> CloudConnector<MockRelay> {
    CloudConnector::with_transport(config(direct), MockRelay::new())
}

pub fn connected(direct: bool) -> CloudConnector<MockRelay> {
    let c = connector(direct);
    c.connect(EMAIL, PASSWORD).expect("connect");
    c
}

/// Clock the test can move.
pub struct TestClock(Arc<AtomicU64>);

impl TestClock {
    pub fn at(secs: u64) -> Self {
        Self(Arc::new(AtomicU64::new(secs)))
    }

    pub fn set(&self, secs: u64) {
        self.0.store(secs, Ordering::SeqCst);
    }

    pub fn now(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn clock(&self) -> jdremote_client::Clock {
        let t = self.0.clone();
        Arc::new(move || t.load(Ordering::SeqCst))
    }
}

pub fn ep(ip: &str, port: u16) -> DirectEndpoint {
    DirectEndpoint::new(ip, port)
}
