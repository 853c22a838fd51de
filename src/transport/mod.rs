/*!
 # Transport boundary

 The controller only needs four capabilities from a BLE stack: open a
 connection with a disconnect notification, find one writable characteristic
 among a known set, write a buffer, and disconnect. [`btle`] provides them on
 top of btleplug; tests provide an in-memory fake.
*/

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::Result;

pub mod btle;

/// Invoked once when the peer drops the connection
pub type DisconnectCallback = Box<dyn Fn() + Send + Sync + 'static>;

/// A peripheral known to the host stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDevice {
    /// Address the peripheral was resolved from
    pub address: String,
    /// Advertised local name, if any
    pub name: Option<String>,
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Looks up a peripheral by address. Fails with
    /// [`Error::PeripheralNotFound`](crate::Error::PeripheralNotFound) when the
    /// stack does not know it.
    async fn resolve(&self, address: &str) -> Result<ResolvedDevice>;

    /// Opens a connection and discovers its services
    async fn connect(&self, address: &str, on_disconnect: DisconnectCallback)
        -> Result<Arc<dyn Link>>;
}

/// One open connection
#[async_trait]
pub trait Link: Send + Sync {
    async fn is_connected(&self) -> bool;

    /// First of `candidates` the peripheral exposes as writable
    async fn discover_write_characteristic(&self, candidates: &[Uuid]) -> Result<Uuid>;

    async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;
}
