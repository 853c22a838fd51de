/*!
 # Connection management

 Owns the single link to the peripheral. The link moves through
 `Disconnected -> Connecting -> Connected -> Disconnected`; only one connect
 attempt runs at a time and a failed attempt never fails the caller, it is
 handed to a background reconnect instead. A liveness task re-establishes
 links that dropped silently.
*/

use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::config::ControllerConfig;
use crate::profile::WRITE_CHARACTERISTIC_UUIDS;
use crate::protocol::Frame;
use crate::transport::{DisconnectCallback, Link, Transport};
use crate::{Error, Result};

/// Serializes writes on the link and keeps a minimum gap between them
struct CommandQueue {
    /// Minimum delay between commands
    min_delay: Duration,
    /// Last command timestamp
    last_command: tokio::sync::Mutex<Option<Instant>>,
}

impl CommandQueue {
    fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            last_command: tokio::sync::Mutex::new(None),
        }
    }

    async fn execute<T, F>(&self, future: F) -> T
    where
        F: Future<Output = T>,
    {
        // Holding the lock for the whole write keeps one command in flight
        let mut last_cmd = self.last_command.lock().await;
        if let Some(last) = *last_cmd {
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                let wait_time = self.min_delay - elapsed;
                trace!("Rate limiting: waiting {:?} before next command", wait_time);
                time::sleep(wait_time).await;
            }
        }

        let result = future.await;
        *last_cmd = Some(Instant::now());
        result
    }
}

#[derive(Clone)]
struct ActiveLink {
    link: Arc<dyn Link>,
    characteristic: Uuid,
    /// Connect attempt that produced this link
    generation: u64,
}

/// Delays used by the background tasks
#[derive(Debug, Clone, Copy)]
struct Timings {
    initial_connect: Duration,
    reconnect: Duration,
    busy_reconnect: Duration,
    heartbeat: Duration,
}

struct Inner {
    transport: Arc<dyn Transport>,
    address: String,
    name: String,
    timings: Timings,
    queue: CommandQueue,
    /// The one live handle, replaced on reconnect
    link: Mutex<Option<ActiveLink>>,
    /// Held for the duration of a connect attempt
    connect_lock: tokio::sync::Mutex<()>,
    cached_characteristic: Mutex<Option<Uuid>>,
    reconnect_pending: AtomicBool,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    liveness_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    /// Bumped on every connect attempt; tags links and their disconnect callbacks
    generation: AtomicU64,
}

/// Cheaply cloneable handle to the connection of one device
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        address: &str,
        name: &str,
        config: &ControllerConfig,
        command_delay: Duration,
    ) -> Self {
        let inner = Inner {
            transport,
            address: address.to_string(),
            name: name.to_string(),
            timings: Timings {
                initial_connect: config.initial_connect_delay,
                reconnect: config.reconnect_delay,
                busy_reconnect: config.busy_reconnect_delay,
                heartbeat: config.heartbeat_interval,
            },
            queue: CommandQueue::new(command_delay),
            link: Mutex::new(None),
            connect_lock: tokio::sync::Mutex::new(()),
            cached_characteristic: Mutex::new(None),
            reconnect_pending: AtomicBool::new(false),
            reconnect_task: Mutex::new(None),
            liveness_task: Mutex::new(None),
            closed: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    /// Spawns the liveness task: one deferred connect, then a periodic check
    /// that reconnects whenever no live link exists
    pub fn start(&self) {
        let weak = Arc::downgrade(&self.inner);
        let timings = self.inner.timings;

        let handle = tokio::spawn(async move {
            time::sleep(timings.initial_connect).await;
            if !Inner::liveness_check(&weak).await {
                return;
            }

            let period = timings.heartbeat.max(Duration::from_millis(1));
            let mut interval = time::interval_at(Instant::now() + period, period);
            loop {
                interval.tick().await;
                if !Inner::liveness_check(&weak).await {
                    break;
                }
            }
        });

        if let Some(previous) = self.inner.liveness_task.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Makes sure a link exists. Never fails: a failed attempt is retried in
    /// the background and the caller finds out through the next write.
    pub async fn ensure_connected(&self) {
        self.inner.ensure_connected().await;
    }

    /// Writes one frame through the rate limited queue
    pub async fn write(&self, frame: &Frame) -> Result<()> {
        let active = self.inner.link.lock().clone().ok_or(Error::NotConnected)?;

        let result = self
            .inner
            .queue
            .execute(active.link.write(active.characteristic, frame))
            .await;

        if let Err(e) = &result {
            if !active.link.is_connected().await {
                warn!("{}: write failed on a dropped link: {}", self.inner.name, e);
                self.inner.clear_link(&active.link);
            }
        }

        result
    }

    /// Gracefully closes the current link. Idempotent, never fails.
    pub async fn disconnect(&self) {
        let active = self.inner.link.lock().take();
        let Some(active) = active else {
            trace!("{}: nothing to disconnect", self.inner.name);
            return;
        };

        if active.link.is_connected().await {
            debug!("{}: disconnecting", self.inner.name);
            if let Err(e) = active.link.disconnect().await {
                warn!("{}: disconnect failed: {}", self.inner.name, e);
            }
        }
    }

    /// Drops the current link and connects again
    pub async fn reconnect(&self) {
        self.disconnect().await;
        self.ensure_connected().await;
    }

    /// Stops every background task and closes the link for good
    pub async fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        for slot in [&self.inner.liveness_task, &self.inner.reconnect_task] {
            if let Some(handle) = slot.lock().take() {
                handle.abort();
            }
        }
        self.disconnect().await;
        info!("{}: connection closed", self.inner.name);
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.live_link().await.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl Inner {
    async fn live_link(&self) -> Option<ActiveLink> {
        let active = self.link.lock().clone()?;
        if active.link.is_connected().await {
            Some(active)
        } else {
            None
        }
    }

    /// Removes `link` from the slot unless it has already been replaced
    fn clear_link(&self, link: &Arc<dyn Link>) {
        let mut slot = self.link.lock();
        if slot
            .as_ref()
            .is_some_and(|active| Arc::ptr_eq(&active.link, link))
        {
            *slot = None;
        }
    }

    async fn ensure_connected(self: &Arc<Self>) {
        if self.closed.load(Ordering::SeqCst) || self.live_link().await.is_some() {
            return;
        }

        let Ok(_guard) = self.connect_lock.try_lock() else {
            debug!("{}: connection already in progress", self.name);
            return;
        };

        // another caller may have finished connecting while we checked
        if self.live_link().await.is_some() {
            return;
        }
        self.link.lock().take();

        match self.connect().await {
            Ok(active) => {
                *self.link.lock() = Some(active);
                info!("{} connected successfully", self.name);
            }
            Err(e) => {
                let delay = if matches!(e, Error::Busy(_)) {
                    warn!(
                        "{}: BLE operation already in progress, retrying later",
                        self.name
                    );
                    self.timings.busy_reconnect
                } else {
                    error!("{}: connection failed: {}", self.name, e);
                    self.timings.reconnect
                };
                self.schedule_reconnect(delay);
            }
        }
    }

    async fn connect(self: &Arc<Self>) -> Result<ActiveLink> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("{}: connecting to {}", self.name, self.address);

        let weak = Arc::downgrade(self);
        let on_disconnect: DisconnectCallback = Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.handle_disconnect(generation);
            }
        });

        let link = self.transport.connect(&self.address, on_disconnect).await?;

        let characteristic = match link
            .discover_write_characteristic(&self.characteristic_candidates())
            .await
        {
            Ok(characteristic) => characteristic,
            Err(e) => {
                let _ = link.disconnect().await;
                return Err(e);
            }
        };

        debug!("{}: writing to characteristic {}", self.name, characteristic);
        *self.cached_characteristic.lock() = Some(characteristic);
        Ok(ActiveLink {
            link,
            characteristic,
            generation,
        })
    }

    /// Known write characteristics, the last discovered one first
    fn characteristic_candidates(&self) -> Vec<Uuid> {
        let cached = *self.cached_characteristic.lock();
        cached
            .into_iter()
            .chain(
                WRITE_CHARACTERISTIC_UUIDS
                    .into_iter()
                    .filter(|uuid| Some(*uuid) != cached),
            )
            .collect()
    }

    fn handle_disconnect(self: &Arc<Self>, generation: u64) {
        {
            let mut slot = self.link.lock();
            if slot
                .as_ref()
                .is_some_and(|active| active.generation != generation)
            {
                debug!("{}: ignoring disconnect of a replaced link", self.name);
                return;
            }
            *slot = None;
        }
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        warn!("{}: BLE disconnected, scheduling reconnect", self.name);
        self.schedule_reconnect(Duration::ZERO);
    }

    /// Starts the reconnect task unless one is already pending
    fn schedule_reconnect(self: &Arc<Self>, delay: Duration) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if self.reconnect_pending.swap(true, Ordering::SeqCst) {
            debug!("{}: reconnect already scheduled", self.name);
            return;
        }

        let Ok(runtime) = Handle::try_current() else {
            self.reconnect_pending.store(false, Ordering::SeqCst);
            error!("{}: no async runtime to reconnect on", self.name);
            return;
        };

        debug!("{}: reconnecting in {:?}", self.name, delay);
        let weak = Arc::downgrade(self);
        let handle = runtime.spawn(async move {
            time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.reconnect_pending.store(false, Ordering::SeqCst);
                inner.ensure_connected().await;
            }
        });

        *self.reconnect_task.lock() = Some(handle);
    }

    /// One liveness tick. Returns false once the manager is gone or closed.
    async fn liveness_check(weak: &Weak<Inner>) -> bool {
        let Some(inner) = weak.upgrade() else {
            return false;
        };
        if inner.closed.load(Ordering::SeqCst) {
            return false;
        }

        if inner.live_link().await.is_none() {
            debug!("{}: no live link, reconnecting", inner.name);
            inner.ensure_connected().await;
        }
        true
    }
}
