//! Device handle: routes each call to a direct endpoint of the device when one answers,
//! otherwise through the relay.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use jdremote_core::protocol::DIRECT_CONNECTION_INFOS_PATH;
use jdremote_core::{
    wire, DeviceDescriptor, DirectConnectionInfos, DirectConnectionRegistry, DirectEndpoint,
    Payload,
};
use serde_json::Value;
use tracing::{debug, warn};

use crate::connector::{Call, CloudConnector, Reply};
use crate::error::Result;
use crate::resources::ApiExecutor;
use crate::transport::{HttpTransport, ReqwestTransport};

/// Source of unix seconds for cooldown bookkeeping.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

fn system_clock() -> Clock {
    Arc::new(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    })
}

/// One remote device. Borrows the connector for signing; owns its endpoint registry.
pub struct DeviceHandle<'c, T = ReqwestTransport> {
    connector: &'c CloudConnector<T>,
    descriptor: DeviceDescriptor,
    registry: DirectConnectionRegistry,
    direct_enabled: bool,
    clock: Clock,
}

impl<'c, T: HttpTransport> DeviceHandle<'c, T> {
    pub fn new(connector: &'c CloudConnector<T>, descriptor: DeviceDescriptor, direct: bool) -> Self {
        Self {
            connector,
            descriptor,
            registry: DirectConnectionRegistry::new(),
            direct_enabled: direct,
            clock: system_clock(),
        }
    }

    /// Replace the clock, e.g. with a fixed one in tests.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn kind(&self) -> &str {
        &self.descriptor.kind
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn registry(&self) -> &DirectConnectionRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut DirectConnectionRegistry {
        &mut self.registry
    }

    pub fn direct_endpoints(&self) -> Vec<DirectEndpoint> {
        self.registry.endpoints()
    }

    pub fn set_direct_endpoints(&mut self, endpoints: Vec<DirectEndpoint>) {
        self.registry.set_endpoints(endpoints);
    }

    pub fn is_direct_enabled(&self) -> bool {
        self.direct_enabled
    }

    /// Turn direct connections on and fetch the endpoints immediately.
    pub fn enable_direct_connection(&mut self) -> Result<bool> {
        self.direct_enabled = true;
        self.refresh_direct_endpoints()
    }

    /// Route everything through the relay and forget known endpoints.
    pub fn disable_direct_connection(&mut self) {
        self.direct_enabled = false;
        self.registry.clear();
    }

    /// Ask the device (through the relay) for its direct endpoints and merge them into
    /// the registry. Returns whether the registry was updated; an empty report changes nothing.
    pub fn refresh_direct_endpoints(&mut self) -> Result<bool> {
        let action = self.connector.action_prefix(&self.descriptor.id)?;
        let response = self.connector.request_signed(Call::Post {
            path: DIRECT_CONNECTION_INFOS_PATH,
            params: &[],
            action: Some(&action),
            api: None,
            binary: false,
        })?;
        let Some(Payload::Json(response)) = response else {
            return Ok(false);
        };
        let infos: DirectConnectionInfos = serde_json::from_value(wire::unwrap_data(response))?;
        match infos.infos {
            Some(endpoints) if !endpoints.is_empty() => {
                debug!(device = %self.descriptor.id, count = endpoints.len(), "direct endpoints");
                self.registry.merge(&endpoints);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Refresh after a call that already has its answer, or while building the handle.
    /// A failure here must not discard that answer, so it is logged and the registry is
    /// left as it was.
    pub(crate) fn refresh_quietly(&mut self) {
        if let Err(e) = self.refresh_direct_endpoints() {
            warn!(device = %self.descriptor.id, error = %e, "direct endpoint refresh failed");
        }
    }

    fn relay(&self, path: &str, params: &[Value], action: &str, binary: bool) -> Result<Option<Payload>> {
        self.connector.request_signed(Call::Post {
            path,
            params,
            action: Some(action),
            api: None,
            binary,
        })
    }

    /// Run one device call. Direct endpoints are tried in registry order unless direct
    /// mode is off, none are known, or the registry-wide back-off is running.
    pub fn execute(&mut self, path: &str, params: &[Value], binary: bool) -> Result<Option<Payload>> {
        let action = self.connector.action_prefix(&self.descriptor.id)?;
        let now = (self.clock)();

        if !self.direct_enabled || self.registry.is_empty() || self.registry.is_cooling_down(now) {
            let response = self.relay(path, params, &action, binary)?;
            if response.is_some()
                && self.direct_enabled
                && !self.registry.is_cooling_down((self.clock)())
            {
                self.refresh_quietly();
            }
            return Ok(response.map(unwrap_payload));
        }

        for endpoint in self.registry.eligible(now) {
            let api = endpoint.base_url();
            let reply = self.connector.exchange(Call::Post {
                path,
                params,
                action: Some(&action),
                api: Some(&api),
                binary,
            })?;
            match reply {
                Reply::Answer(payload) => {
                    self.registry.mark_succeeded(&endpoint);
                    return Ok(Some(unwrap_payload(payload)));
                }
                // the device received the call; sending it again would run it twice
                Reply::Stale => {
                    self.registry.mark_succeeded(&endpoint);
                    return Ok(None);
                }
                Reply::Unanswered => {
                    warn!(endpoint = %api, "direct endpoint did not answer");
                    self.registry.mark_failed(&endpoint, (self.clock)());
                }
            }
        }

        let until = self.registry.mark_exhausted((self.clock)());
        warn!(
            device = %self.descriptor.id,
            failures = self.registry.consecutive_failures(),
            until,
            "no direct endpoint answered, using relay"
        );
        let response = self.relay(path, params, &action, binary)?;
        if response.is_some() {
            self.refresh_quietly();
        }
        Ok(response.map(unwrap_payload))
    }
}

impl<T: HttpTransport> ApiExecutor for DeviceHandle<'_, T> {
    fn execute(&mut self, path: &str, params: &[Value], binary: bool) -> Result<Option<Payload>> {
        DeviceHandle::execute(self, path, params, binary)
    }
}

fn unwrap_payload(payload: Payload) -> Payload {
    match payload {
        Payload::Json(v) => Payload::Json(wire::unwrap_data(v)),
        binary => binary,
    }
}
