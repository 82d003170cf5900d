//! Resource-module boundary. Resource modules only see [`ApiExecutor::execute`] and get
//! back payloads that are already decrypted and unwrapped.

use jdremote_core::{DirectConnectionInfos, Payload};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::Result;

pub trait ApiExecutor {
    /// Call `path` on the device. `Ok(None)` means no usable answer arrived.
    fn execute(&mut self, path: &str, params: &[Value], binary: bool) -> Result<Option<Payload>>;

    /// JSON call decoded into `R`. `null` and missing answers both give `None`.
    fn call<R: DeserializeOwned>(&mut self, path: &str, params: &[Value]) -> Result<Option<R>>
    where
        Self: Sized,
    {
        match self.execute(path, params, false)?.and_then(Payload::into_json) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => Ok(Some(serde_json::from_value(v)?)),
        }
    }

    /// The `/device` resource module.
    fn device(&mut self) -> DeviceApi<'_, Self>
    where
        Self: Sized,
    {
        DeviceApi { executor: self }
    }
}

/// Calls under `/device`.
pub struct DeviceApi<'a, E> {
    executor: &'a mut E,
}

impl<E: ApiExecutor> DeviceApi<'_, E> {
    const ENDPOINT: &'static str = "/device";

    fn action<R: DeserializeOwned>(&mut self, route: &str) -> Result<Option<R>> {
        let path = format!("{}{route}", Self::ENDPOINT);
        self.executor.call(&path, &[])
    }

    pub fn ping(&mut self) -> Result<bool> {
        Ok(self.action::<bool>("/ping")?.unwrap_or(false))
    }

    pub fn direct_connection_infos(&mut self) -> Result<Option<DirectConnectionInfos>> {
        self.action("/getDirectConnectionInfos")
    }

    pub fn session_public_key(&mut self) -> Result<Option<String>> {
        self.action("/getSessionPublicKey")
    }
}
