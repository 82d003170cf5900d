//! Wire encoding: signed relay query strings, encrypted device envelopes and response
//! decoding.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::Value;

use crate::crypto::{self, CryptoError, Key};
use crate::protocol::{ErrorEnvelope, RequestEnvelope, UNESCAPED_PARAM};

/// Everything except unreserved characters and `/` is escaped in query values.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'~')
    .remove(b'/');

/// `path?k1=v1&...&rid=<rid>`, the exact string the signature covers.
pub fn unsigned_query(path: &str, params: &[(&str, &str)], rid: u64) -> String {
    let mut parts: Vec<String> = params
        .iter()
        .map(|(name, value)| {
            if *name == UNESCAPED_PARAM {
                format!("{name}={value}")
            } else {
                format!("{name}={}", utf8_percent_encode(value, QUERY_VALUE))
            }
        })
        .collect();
    parts.push(format!("rid={rid}"));
    format!("{path}?{}", parts.join("&"))
}

/// Unsigned query with `&signature=<hmac>` appended.
pub fn signed_query(
    path: &str,
    params: &[(&str, &str)],
    rid: u64,
    key: &Key,
) -> Result<String, CryptoError> {
    let query = unsigned_query(path, params, rid);
    let signature = crypto::sign(key, &query)?;
    Ok(format!("{query}&signature={signature}"))
}

/// JSON document of a device call. Arrays go in as-is; every other param is
/// JSON-encoded into a string first, and quoted nulls are turned back into bare nulls.
pub fn encode_envelope(
    path: &str,
    params: &[Value],
    rid: u64,
    api_ver: u32,
) -> Result<String, serde_json::Error> {
    let params = params
        .iter()
        .map(|param| match param {
            Value::Array(_) => Ok(param.clone()),
            other => serde_json::to_string(other).map(Value::String),
        })
        .collect::<Result<Vec<_>, _>>()?;
    let envelope = RequestEnvelope {
        api_ver,
        url: path.to_string(),
        params,
        rid,
    };
    let body = serde_json::to_string(&envelope)?;
    Ok(body.replace("\"null\"", "null").replace("'null'", "null"))
}

/// Encrypted device envelope, ready to POST.
pub fn encrypt_envelope(
    key: &Key,
    path: &str,
    params: &[Value],
    rid: u64,
    api_ver: u32,
) -> Result<String, WireError> {
    let body = encode_envelope(path, params, rid, api_ver)?;
    Ok(crypto::encrypt_cbc(key, body.as_bytes())?)
}

/// Decrypt and JSON-decode a 200 answer.
pub fn decrypt_response(key: &Key, body: &str) -> Result<Value, WireError> {
    let plain = crypto::decrypt_cbc(key, body)?;
    Ok(serde_json::from_slice(&plain)?)
}

/// The `rid` echoed by the relay, if any.
pub fn response_rid(response: &Value) -> Option<u64> {
    response.get("rid").and_then(Value::as_u64)
}

/// The `data` member when present, else the whole answer.
pub fn unwrap_data(mut response: Value) -> Value {
    match response.get_mut("data") {
        Some(data) => data.take(),
        None => response,
    }
}

/// Parse a non-200 body: plain JSON first, then encrypted JSON.
pub fn parse_error_body(body: &[u8], key: Option<&Key>) -> Option<ErrorEnvelope> {
    if let Ok(envelope) = serde_json::from_slice(body) {
        return Some(envelope);
    }
    let key = key?;
    let text = std::str::from_utf8(body).ok()?;
    let plain = crypto::decrypt_cbc(key, text).ok()?;
    serde_json::from_slice(&plain).ok()
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
}
