//! In-memory transport shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use elk_fastlink::{
    ControllerConfig, DisconnectCallback, Error, Link, ResolvedDevice, Result, Transport,
};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const ADDRESS: &str = "BE:16:FA:00:12:34";

/// Error kind a scripted failure produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Fatal, never retried
    NotFound,
    /// Retried with backoff
    Ble,
}

impl Failure {
    fn to_error(self) -> Error {
        match self {
            Failure::NotFound => Error::PeripheralNotFound(ADDRESS.to_string()),
            Failure::Ble => Error::BleError("scripted write failure".to_string()),
        }
    }
}

#[derive(Default)]
pub struct MockState {
    /// Frames the device accepted, in order
    pub frames: Vec<Vec<u8>>,
    pub write_attempts: u32,
    pub connects: u32,
    pub disconnects: u32,
    pub connected: bool,
    pub on_disconnect: Option<DisconnectCallback>,
    /// Every write fails with this kind
    pub fail_always: Option<Failure>,
    /// The next `n` writes fail with `fail_kind`
    pub fail_next: u32,
    pub fail_kind: Option<Failure>,
    /// Native brightness frames are refused
    pub reject_native: bool,
    /// The next `n` connects fail
    pub connect_failures: u32,
    /// Unknown devices fail to resolve
    pub unknown: bool,
    /// Time each connect takes
    pub connect_delay: Duration,
    /// The peripheral exposes none of the write characteristics
    pub missing_characteristic: bool,
}

#[derive(Clone)]
pub struct MockTransport {
    pub name: Option<String>,
    pub state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new(name: Option<&str>) -> Self {
        Self {
            name: name.map(str::to_string),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.state.lock().frames.clone()
    }

    pub fn clear_frames(&self) {
        self.state.lock().frames.clear();
    }

    pub fn connects(&self) -> u32 {
        self.state.lock().connects
    }

    pub fn disconnects(&self) -> u32 {
        self.state.lock().disconnects
    }

    pub fn write_attempts(&self) -> u32 {
        self.state.lock().write_attempts
    }

    /// Peer drops the link and the stack reports it
    pub fn drop_link(&self) {
        let callback = {
            let mut state = self.state.lock();
            state.connected = false;
            state.on_disconnect.take()
        };
        if let Some(callback) = callback {
            callback();
        }
    }

    /// Link goes away but the stack reports it later; the caller fires the
    /// returned callback when it wants the report delivered
    pub fn drop_link_deferred(&self) -> Option<DisconnectCallback> {
        let mut state = self.state.lock();
        state.connected = false;
        state.on_disconnect.take()
    }

    /// Link goes away without any notification
    pub fn drop_link_silently(&self) {
        let mut state = self.state.lock();
        state.connected = false;
        state.on_disconnect = None;
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn resolve(&self, address: &str) -> Result<ResolvedDevice> {
        if self.state.lock().unknown {
            return Err(Error::PeripheralNotFound(address.to_string()));
        }
        Ok(ResolvedDevice {
            address: address.to_string(),
            name: self.name.clone(),
        })
    }

    async fn connect(
        &self,
        _address: &str,
        on_disconnect: DisconnectCallback,
    ) -> Result<Arc<dyn Link>> {
        let delay = self.state.lock().connect_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        state.connects += 1;
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(Error::BleError("scripted connect failure".to_string()));
        }
        state.connected = true;
        state.on_disconnect = Some(on_disconnect);
        Ok(Arc::new(MockLink {
            state: self.state.clone(),
        }))
    }
}

pub struct MockLink {
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl Link for MockLink {
    async fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    async fn discover_write_characteristic(&self, candidates: &[Uuid]) -> Result<Uuid> {
        if self.state.lock().missing_characteristic {
            return Err(Error::CharacteristicNotFound("scripted".to_string()));
        }
        candidates
            .first()
            .copied()
            .ok_or_else(|| Error::CharacteristicNotFound(String::new()))
    }

    async fn write(&self, _characteristic: Uuid, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        state.write_attempts += 1;

        if let Some(kind) = state.fail_always {
            return Err(kind.to_error());
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(state.fail_kind.unwrap_or(Failure::Ble).to_error());
        }
        if state.reject_native && data.get(1) == Some(&0x04) && data.get(2) == Some(&0x01) {
            return Err(Error::BleError("native brightness unsupported".to_string()));
        }

        state.frames.push(data.to_vec());
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.disconnects += 1;
        state.connected = false;
        state.on_disconnect = None;
        Ok(())
    }
}

/// Unique state file for one test, removed up front
pub fn state_path(test: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "elk-fastlink-it-{}-{}.json",
        std::process::id(),
        test
    ));
    let _ = std::fs::remove_file(&path);
    path
}

/// Default config with short delays and a private state file
pub fn test_config(test: &str) -> ControllerConfig {
    ControllerConfig {
        reconnect_delay: Duration::from_millis(50),
        busy_reconnect_delay: Duration::from_millis(20),
        settle_delay: Duration::from_millis(10),
        native_settle_delay: Duration::from_millis(5),
        command_delay: Some(Duration::ZERO),
        ..ControllerConfig::default()
    }
    .with_state_path(state_path(test))
}
