//! [`Transport`] implementation on top of btleplug

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, instrument, trace};
use uuid::Uuid;

use super::{DisconnectCallback, Link, ResolvedDevice, Transport};
use crate::{Error, Result};

/// Default time spent scanning for a peripheral that is not cached yet
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);

/// Gets the default Bluetooth adapter
#[instrument(skip(manager))]
async fn get_central(manager: &Manager) -> Result<Adapter> {
    debug!("Getting default Bluetooth adapter");
    let adapter = manager.adapters().await?.into_iter().next().ok_or_else(|| {
        error!("No Bluetooth adapters found");
        Error::NoBluetoothAdapters
    })?;

    debug!("Using Bluetooth adapter");
    Ok(adapter)
}

/// Maps stack errors that mean "busy, try again later" to [`Error::Busy`]
fn map_btle_error(e: btleplug::Error) -> Error {
    let message = e.to_string().to_lowercase();
    if message.contains("in progress") || message.contains("already") {
        Error::Busy(e.to_string())
    } else {
        Error::BtlePlugError(e)
    }
}

fn matches_address(peripheral: &Peripheral, address: &str) -> bool {
    peripheral.address().to_string().eq_ignore_ascii_case(address)
        || peripheral.id().to_string().eq_ignore_ascii_case(address)
}

/// BLE transport bound to the first adapter of the host
#[derive(Clone)]
pub struct BtleTransport {
    adapter: Adapter,
    scan_timeout: Duration,
}

impl BtleTransport {
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = get_central(&manager).await?;
        Ok(Self {
            adapter,
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
        })
    }

    pub fn with_scan_timeout(mut self, scan_timeout: Duration) -> Self {
        self.scan_timeout = scan_timeout;
        self
    }

    async fn cached_peripheral(&self, address: &str) -> Result<Option<Peripheral>> {
        Ok(self
            .adapter
            .peripherals()
            .await?
            .into_iter()
            .find(|p| matches_address(p, address)))
    }

    /// Finds a peripheral by MAC address or platform id, scanning if the stack
    /// has not seen it yet
    #[instrument(skip(self))]
    async fn find_peripheral(&self, address: &str) -> Result<Peripheral> {
        if let Some(peripheral) = self.cached_peripheral(address).await? {
            trace!("Peripheral {} already known to the adapter", address);
            return Ok(peripheral);
        }

        info!("Scanning for {}...", address);
        self.adapter.start_scan(ScanFilter::default()).await?;

        let start_time = time::Instant::now();
        let mut found = None;
        while start_time.elapsed() < self.scan_timeout {
            if let Some(peripheral) = self.cached_peripheral(address).await? {
                found = Some(peripheral);
                break;
            }

            let remaining = self.scan_timeout.saturating_sub(start_time.elapsed());
            debug!(
                "Still scanning for {} ({} seconds remaining)",
                address,
                remaining.as_secs()
            );
            time::sleep(Duration::from_millis(500)).await;
        }

        self.adapter.stop_scan().await?;

        found.ok_or_else(|| {
            error!(
                "Device {} not found within {} seconds",
                address,
                self.scan_timeout.as_secs()
            );
            Error::PeripheralNotFound(address.to_string())
        })
    }
}

#[async_trait]
impl Transport for BtleTransport {
    async fn resolve(&self, address: &str) -> Result<ResolvedDevice> {
        let peripheral = self.find_peripheral(address).await?;
        let name = peripheral
            .properties()
            .await?
            .and_then(|props| props.local_name);

        debug!("Resolved {} as {:?}", address, name);
        Ok(ResolvedDevice {
            address: address.to_string(),
            name,
        })
    }

    async fn connect(
        &self,
        address: &str,
        on_disconnect: DisconnectCallback,
    ) -> Result<Arc<dyn Link>> {
        let peripheral = self.find_peripheral(address).await?;

        // subscribe before connecting so an early drop is not missed
        let mut events = self.adapter.events().await?;
        let id = peripheral.id();
        let watcher = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(dropped) = event {
                    if dropped == id {
                        on_disconnect();
                        break;
                    }
                }
            }
        });

        let link = BtleLink {
            peripheral,
            watcher,
        };

        if !link.peripheral.is_connected().await? {
            debug!("Connecting to {}", address);
            link.peripheral.connect().await.map_err(map_btle_error)?;
        }

        debug!("Discovering services...");
        if let Err(e) = link.peripheral.discover_services().await {
            // half-open links keep the peripheral from advertising
            let _ = link.peripheral.disconnect().await;
            return Err(map_btle_error(e));
        }

        Ok(Arc::new(link))
    }
}

/// Open btleplug connection. Dropping it stops the disconnect watcher.
pub struct BtleLink {
    peripheral: Peripheral,
    watcher: JoinHandle<()>,
}

impl BtleLink {
    fn characteristic(&self, uuid: Uuid) -> Option<Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
    }
}

impl Drop for BtleLink {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

#[async_trait]
impl Link for BtleLink {
    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn discover_write_characteristic(&self, candidates: &[Uuid]) -> Result<Uuid> {
        let available = self.peripheral.characteristics();
        candidates
            .iter()
            .copied()
            .find(|uuid| available.iter().any(|c| c.uuid == *uuid))
            .ok_or_else(|| {
                let tried = candidates
                    .iter()
                    .map(Uuid::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                Error::CharacteristicNotFound(tried)
            })
    }

    async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<()> {
        let characteristic = self
            .characteristic(characteristic)
            .ok_or_else(|| Error::CharacteristicNotFound(characteristic.to_string()))?;

        // Prefer WriteWithResponse when supported
        let write_type = if characteristic.properties.contains(CharPropFlags::WRITE) {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };

        self.peripheral
            .write(&characteristic, data, write_type)
            .await
            .map_err(map_btle_error)
    }

    async fn disconnect(&self) -> Result<()> {
        self.peripheral.disconnect().await.map_err(map_btle_error)
    }
}
