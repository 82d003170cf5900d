//! Relay wire types: device descriptors, direct-connection infos, request/response/error envelopes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `apiVer` sent in every device envelope.
pub const API_VERSION: u32 = 1;

/// Content type of encrypted device calls.
pub const AES_JSON_CONTENT_TYPE: &str = "application/aesjson-jd; charset=utf-8";

pub const CONNECT_PATH: &str = "/my/connect";
pub const RECONNECT_PATH: &str = "/my/reconnect";
pub const DISCONNECT_PATH: &str = "/my/disconnect";
pub const LIST_DEVICES_PATH: &str = "/my/listdevices";
pub const DIRECT_CONNECTION_INFOS_PATH: &str = "/device/getDirectConnectionInfos";

/// Query parameter that is already encrypted and must not be percent-encoded again.
pub const UNESCAPED_PARAM: &str = "encryptedLoginSecret";

/// One device registered with the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// A direct `ip:port` endpoint a device listens on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DirectEndpoint {
    pub ip: String,
    pub port: u16,
}

impl DirectEndpoint {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self { ip: ip.into(), port }
    }

    /// Base URL used in place of the relay host.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.ip, self.port)
    }
}

/// Payload of `/device/getDirectConnectionInfos`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectConnectionInfos {
    #[serde(default)]
    pub infos: Option<Vec<DirectEndpoint>>,
    #[serde(default)]
    pub rebind_protection_detected: Option<bool>,
    #[serde(default)]
    pub mode: Option<String>,
}

/// `/my/connect` and `/my/reconnect` answer.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionTokens {
    #[serde(rename = "sessiontoken")]
    pub session_token: String,
    #[serde(rename = "regaintoken")]
    pub regain_token: String,
}

/// `/my/listdevices` answer.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceList {
    pub list: Vec<DeviceDescriptor>,
}

/// Plaintext of an encrypted device call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    #[serde(rename = "apiVer")]
    pub api_ver: u32,
    pub url: String,
    pub params: Vec<Value>,
    pub rid: u64,
}

/// Body of a non-200 relay answer.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorEnvelope {
    #[serde(default)]
    pub src: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Relay error types that reject the credentials or tokens themselves.
pub const AUTH_ERROR_KINDS: &[&str] = &[
    "AUTH_FAILED",
    "TOKEN_INVALID",
    "EMAIL_INVALID",
    "EMAIL_FORBIDDEN",
    "ERROR_EMAIL_NOT_CONFIRMED",
    "CHALLENGE_FAILED",
];

impl ErrorEnvelope {
    /// Whether the relay refused the login or the session tokens.
    pub fn is_auth_failure(&self) -> bool {
        is_auth_kind(self.kind.as_deref().unwrap_or_default())
    }
}

pub fn is_auth_kind(kind: &str) -> bool {
    AUTH_ERROR_KINDS.contains(&kind)
}

/// A decoded answer: JSON for ordinary calls, untouched bytes for binary ones.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Binary(Vec<u8>),
}

impl Payload {
    pub fn into_json(self) -> Option<Value> {
        match self {
            Payload::Json(v) => Some(v),
            Payload::Binary(_) => None,
        }
    }

    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            Payload::Binary(b) => Some(b),
            Payload::Json(_) => None,
        }
    }
}
