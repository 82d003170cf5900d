//! Plain connection to a device on the local machine: no relay, no encryption.

use jdremote_core::{wire, DeviceDescriptor, Payload};
use serde_json::Value;
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::resources::ApiExecutor;
use crate::transport::{HttpTransport, ReqwestTransport};

pub struct LocalConnector<T = ReqwestTransport> {
    base_url: String,
    transport: T,
}

impl LocalConnector<ReqwestTransport> {
    pub fn new(config: &Config) -> Result<Self> {
        let transport = ReqwestTransport::new(config.timeout())?;
        Ok(Self::with_transport(&config.local_url, transport))
    }
}

impl<T: HttpTransport> LocalConnector<T> {
    pub fn with_transport(base_url: &str, transport: T) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            transport,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// True when `/jd/version` answers at all.
    pub fn is_reachable(&self) -> bool {
        self.transport
            .get(&format!("{}/jd/version", self.base_url))
            .is_ok()
    }

    pub fn device(&self) -> LocalDevice<'_, T> {
        LocalDevice {
            connector: self,
            descriptor: DeviceDescriptor {
                id: "local".to_string(),
                name: "Local JDownloader".to_string(),
                kind: "jd".to_string(),
            },
        }
    }
}

pub struct LocalDevice<'c, T = ReqwestTransport> {
    connector: &'c LocalConnector<T>,
    descriptor: DeviceDescriptor,
}

impl<T: HttpTransport> LocalDevice<'_, T> {
    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }
}

/// `path?p1&p2...` with every param JSON-encoded.
fn local_url(base: &str, path: &str, params: &[Value]) -> String {
    let query: Vec<String> = params.iter().map(Value::to_string).collect();
    format!("{base}{path}?{}", query.join("&"))
}

impl<T: HttpTransport> ApiExecutor for LocalDevice<'_, T> {
    fn execute(&mut self, path: &str, params: &[Value], binary: bool) -> Result<Option<Payload>> {
        let url = local_url(&self.connector.base_url, path, params);
        debug!(path, "local GET");
        let response = self.connector.transport.get(&url)?;
        if !response.is_ok() {
            let envelope = wire::parse_error_body(&response.body, None);
            return Err(Error::Protocol {
                src: envelope
                    .as_ref()
                    .and_then(|e| e.src.clone())
                    .unwrap_or_else(|| "local".to_string()),
                kind: envelope
                    .and_then(|e| e.kind)
                    .unwrap_or_else(|| format!("HTTP {}", response.status)),
                context: format!("GET {path}"),
            });
        }
        if binary {
            return Ok(Some(Payload::Binary(response.body)));
        }
        let json: Value = serde_json::from_slice(&response.body)?;
        Ok(Some(Payload::Json(wire::unwrap_data(json))))
    }
}
