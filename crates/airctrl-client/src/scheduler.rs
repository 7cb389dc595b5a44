//! Poll scheduler
//!
//! One task per device polls at a fixed interval. After
//! `stale_after_failures` consecutive failed polls the device is marked
//! stale and the task switches to a reconnect loop: re-establish the session
//! and poll, with exponential backoff between attempts, until the device
//! answers or `max_reconnect_attempts` is reached.
//!
//! ```text
//! Connected ─► Polling ─► Stale ─► Reconnecting ─┬─► Polling
//!                                                └─► PermanentlyUnreachable
//! ```
//!
//! The task holds only a weak reference to the handle, so dropping every
//! handle clone stops it.

use std::sync::Weak;

use airctrl_core::{DeviceEvent, HandleState};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::handle::{DeviceHandle, HandleInner};

enum Recovery {
    Recovered,
    GaveUp,
    Cancelled,
}

pub(crate) fn spawn(handle: &DeviceHandle) -> JoinHandle<()> {
    let weak = handle.downgrade();
    let cancel = handle.cancel_token().child_token();
    tokio::spawn(run(weak, cancel))
}

async fn run(weak: Weak<HandleInner>, cancel: CancellationToken) {
    let Some(config) = DeviceHandle::upgrade(&weak).map(|h| h.config().clone()) else {
        return;
    };

    let mut ticker = tokio::time::interval(config.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; connect has just polled
    ticker.tick().await;

    let mut failures = 0u32;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(handle) = DeviceHandle::upgrade(&weak) else {
            break;
        };
        let host = handle.identity().host;

        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = handle.poll() => result,
        };

        match result {
            Ok(_) => {
                failures = 0;
                handle.set_state(HandleState::Polling);
            }
            Err(e) => {
                failures += 1;
                warn!(%host, error = %e, consecutive_failures = failures, "Poll failed");
                handle.emit(DeviceEvent::PollFailed {
                    message: e.to_string(),
                    consecutive_failures: failures,
                });

                if failures < config.stale_after_failures.max(1) {
                    continue;
                }

                handle.set_state(HandleState::Stale);
                handle.session().expire();
                drop(handle);

                match reconnect(&weak, &cancel).await {
                    Recovery::Recovered => {
                        failures = 0;
                        ticker.reset();
                    }
                    Recovery::GaveUp | Recovery::Cancelled => break,
                }
            }
        }
    }

    debug!("Poll scheduler stopped");
}

/// Re-establish and poll with backoff until the device answers
async fn reconnect(weak: &Weak<HandleInner>, cancel: &CancellationToken) -> Recovery {
    let Some(handle) = DeviceHandle::upgrade(weak) else {
        return Recovery::Cancelled;
    };
    let config = handle.config().clone();
    let host = handle.identity().host;
    handle.set_state(HandleState::Reconnecting);
    drop(handle);

    let mut backoff = Backoff::new(&config.backoff);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let Some(handle) = DeviceHandle::upgrade(weak) else {
            return Recovery::Cancelled;
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => return Recovery::Cancelled,
            result = handle.recover() => result,
        };

        match result {
            Ok(_) => {
                info!(%host, attempt, "Device reachable again");
                handle.set_state(HandleState::Polling);
                return Recovery::Recovered;
            }
            Err(e) => {
                if config
                    .max_reconnect_attempts
                    .is_some_and(|max| attempt >= max)
                {
                    error!(%host, attempts = attempt, error = %e, "Giving up on device");
                    handle.set_state(HandleState::PermanentlyUnreachable);
                    return Recovery::GaveUp;
                }

                let delay = backoff.next_delay();
                warn!(
                    %host,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Reconnect failed, retrying"
                );
                drop(handle);

                tokio::select! {
                    _ = cancel.cancelled() => return Recovery::Cancelled,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
