/*!
 # Bounded retry

 A policy object wrapped around any transport call. Errors are sorted into
 three classes: fatal errors propagate at once, driver-stack errors are retried
 after a short backoff, and anything else is treated as a transient glitch and
 retried immediately.
*/

use std::future::Future;
use std::time::Duration;
use tokio::time;
use tracing::{debug, error, trace, warn};

use crate::{Error, Result};

/// Attempts per operation
pub const DEFAULT_ATTEMPTS: u8 = 3;
/// Pause between attempts after a driver-stack error
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(250);

/// How the retry loop treats an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Propagate immediately, never retry
    Fatal,
    /// Retry after the backoff; propagate on the final attempt
    Backoff,
    /// Retry immediately; exhausting the budget reports `RetriesExhausted`
    Transient,
}

impl Error {
    /// Default classification used by [`RetryPolicy`]
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::PeripheralNotFound(_)
            | Error::Configuration(_)
            | Error::NoBluetoothAdapters
            | Error::BtlePlugError(btleplug::Error::DeviceNotFound) => ErrorClass::Fatal,
            Error::BtlePlugError(_) | Error::Busy(_) | Error::BleError(_) | Error::NotConnected => {
                ErrorClass::Backoff
            }
            _ => ErrorClass::Transient,
        }
    }
}

/// Retry budget and error classifier
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub attempts: u8,
    /// Sleep between attempts for [`ErrorClass::Backoff`] errors
    pub backoff: Duration,
    /// Error classifier
    pub classify: fn(&Error) -> ErrorClass,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
            classify: Error::class,
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u8, backoff: Duration) -> Self {
        Self {
            attempts,
            backoff,
            ..Default::default()
        }
    }

    /// Runs `op` until it succeeds, a fatal error occurs, or the budget is spent
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.attempts.max(1);

        for attempt in 1..=attempts {
            trace!("{} (attempt {}/{})", what, attempt, attempts);
            let last = attempt == attempts;

            let e = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            match (self.classify)(&e) {
                ErrorClass::Fatal => {
                    debug!("{}: not retrying: {}", what, e);
                    return Err(e);
                }
                ErrorClass::Backoff => {
                    if last {
                        error!("{}: BLE retry exhausted: {}", what, e);
                        return Err(e);
                    }
                    warn!(
                        "{} failed (attempt {}/{}): {}",
                        what, attempt, attempts, e
                    );
                    time::sleep(self.backoff).await;
                }
                ErrorClass::Transient => {
                    if last {
                        error!("{}: BLE exception: {}", what, e);
                    } else {
                        debug!(
                            "{} hit a transient error (attempt {}/{}): {}",
                            what, attempt, attempts, e
                        );
                    }
                }
            }
        }

        Err(Error::RetriesExhausted(attempts))
    }
}
