//! Connected device handle
//!
//! A [`DeviceHandle`] owns everything about one device: its session, the
//! resolved model profile, the latest raw status and snapshot, and the
//! notification channels. Handles are cheap to clone; all clones refer to
//! the same device.

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use airctrl_coap::StatusResponse;
use airctrl_conv::{decode, encode, step_target, CapabilityRegistry, MatchKind, ModelProfile};
use airctrl_core::{
    Capability, CapabilityValue, DeviceEvent, DeviceIdentity, FilterLife, HandleState, ModelError,
    NormalizedSnapshot, RawStatus,
};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::config::ClientConfig;
use crate::error::{HandshakeError, PollError, SetError};
use crate::scheduler;
use crate::session::SessionManager;

const EVENT_CAPACITY: usize = 256;
const SNAPSHOT_CAPACITY: usize = 64;

/// Lazy, restartable sequence of snapshots, one per successful poll
pub type SnapshotStream = Pin<Box<dyn Stream<Item = NormalizedSnapshot> + Send>>;

/// Acknowledgement of an applied command
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ack {
    pub capability: Capability,
    /// Value sent to the device (after target stepping)
    pub value: CapabilityValue,
    /// Attempts used, including the successful one
    pub attempts: u32,
}

/// Profile in use and how it was chosen
#[derive(Clone)]
struct ResolvedProfile {
    profile: Arc<ModelProfile>,
    matched: MatchKind,
    /// Model id the profile was resolved for; `None` before the first poll
    model_id: Option<String>,
    unknown_model: Option<ModelError>,
}

pub(crate) struct HandleInner {
    config: ClientConfig,
    registry: Arc<CapabilityRegistry>,
    session: SessionManager,
    identity: RwLock<DeviceIdentity>,
    resolved: RwLock<ResolvedProfile>,
    last_raw: RwLock<RawStatus>,
    last_snapshot: RwLock<Option<NormalizedSnapshot>>,
    /// Unmapped keys last reported, to emit the notice once per key set
    unmapped: Mutex<BTreeSet<String>>,
    max_age: AtomicU32,
    /// Serializes commands in submission order; held across retries
    command_lock: tokio::sync::Mutex<()>,
    state: watch::Sender<HandleState>,
    events: broadcast::Sender<DeviceEvent>,
    snapshots: broadcast::Sender<NormalizedSnapshot>,
    cancel: CancellationToken,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Handle to one connected device
#[derive(Clone)]
pub struct DeviceHandle {
    inner: Arc<HandleInner>,
}

impl DeviceHandle {
    pub(crate) fn new(
        identity: DeviceIdentity,
        session: SessionManager,
        registry: Arc<CapabilityRegistry>,
        config: ClientConfig,
    ) -> Self {
        let initial = registry.resolve(&identity.model_id);
        let (state, _) = watch::channel(HandleState::Connected);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (snapshots, _) = broadcast::channel(SNAPSHOT_CAPACITY);

        Self {
            inner: Arc::new(HandleInner {
                config,
                registry,
                session,
                identity: RwLock::new(identity),
                resolved: RwLock::new(ResolvedProfile {
                    profile: initial.profile,
                    matched: initial.matched,
                    model_id: None,
                    unknown_model: initial.unknown_model,
                }),
                last_raw: RwLock::new(RawStatus::new()),
                last_snapshot: RwLock::new(None),
                unmapped: Mutex::new(BTreeSet::new()),
                max_age: AtomicU32::new(0),
                command_lock: tokio::sync::Mutex::new(()),
                state,
                events,
                snapshots,
                cancel: CancellationToken::new(),
                poller: Mutex::new(None),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<HandleInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<HandleInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    // --- Accessors ---

    pub fn identity(&self) -> DeviceIdentity {
        self.inner.identity.read().clone()
    }

    /// Host used in log fields
    fn host(&self) -> String {
        self.inner.identity.read().host.clone()
    }

    pub fn profile(&self) -> Arc<ModelProfile> {
        Arc::clone(&self.inner.resolved.read().profile)
    }

    /// How the profile in use was matched to the device's model id
    pub fn match_kind(&self) -> MatchKind {
        self.inner.resolved.read().matched
    }

    /// Set when the device's model has no registered profile
    pub fn unknown_model(&self) -> Option<ModelError> {
        self.inner.resolved.read().unknown_model.clone()
    }

    /// Capabilities the device's profile supports
    pub fn capabilities(&self) -> Vec<Capability> {
        self.profile().capability_ids().collect()
    }

    pub fn state(&self) -> HandleState {
        *self.inner.state.borrow()
    }

    /// Watch handle state transitions
    pub fn state_changes(&self) -> watch::Receiver<HandleState> {
        self.inner.state.subscribe()
    }

    /// Latest snapshot without polling
    pub fn last_snapshot(&self) -> Option<NormalizedSnapshot> {
        self.inner.last_snapshot.read().clone()
    }

    /// Latest raw status without polling
    pub fn last_raw(&self) -> RawStatus {
        self.inner.last_raw.read().clone()
    }

    /// Device-advertised push interval from the last status (seconds)
    pub fn max_age(&self) -> u32 {
        self.inner.max_age.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub(crate) fn session(&self) -> &SessionManager {
        &self.inner.session
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    pub fn is_disconnected(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    // --- Notifications ---

    /// Receive device events (snapshots, state changes, failures, notices)
    pub fn events(&self) -> broadcast::Receiver<DeviceEvent> {
        self.inner.events.subscribe()
    }

    /// Stream of snapshots, starting with the latest known one
    ///
    /// Subscribing starts the poll scheduler if it is not running. Dropping
    /// the stream does not stop polling.
    pub fn subscribe(&self) -> SnapshotStream {
        let receiver = self.inner.snapshots.subscribe();
        let latest = self.last_snapshot();
        self.ensure_polling();

        let updates = BroadcastStream::new(receiver).filter_map(|item| item.ok());
        Box::pin(tokio_stream::iter(latest).chain(updates))
    }

    pub(crate) fn emit(&self, event: DeviceEvent) {
        let _ = self.inner.events.send(event);
    }

    pub(crate) fn set_state(&self, to: HandleState) {
        let from = self.state();
        // Disconnected is terminal
        if from == to || from == HandleState::Disconnected {
            return;
        }
        self.inner.state.send_replace(to);
        info!(host = %self.host(), %from, %to, "Device state changed");
        self.emit(DeviceEvent::StateChanged { from, to });
    }

    // --- Polling ---

    /// One-shot status poll
    ///
    /// Re-establishes the session once when it has expired, then retries the
    /// poll before reporting the device unreachable.
    pub async fn get_status(&self) -> Result<NormalizedSnapshot, PollError> {
        self.cancellable(self.poll())
            .await
            .unwrap_or(Err(PollError::Disconnected))
    }

    pub(crate) async fn poll(&self) -> Result<NormalizedSnapshot, PollError> {
        let session = self.session();
        let status = match session.status().await {
            Ok(status) => status,
            Err(e) if e.needs_new_session() => {
                debug!(
                    host = %self.host(),
                    error = %e,
                    "Re-establishing session before polling again"
                );
                self.reestablish().await.map_err(|e| {
                    PollError::Unreachable(format!("re-establishing session failed: {}", e))
                })?;
                session
                    .status()
                    .await
                    .map_err(|e| PollError::Unreachable(e.to_string()))?
            }
            Err(e) => return Err(PollError::Unreachable(e.to_string())),
        };
        Ok(self.process_status(status))
    }

    /// Fresh socket and key exchange
    pub(crate) async fn reestablish(&self) -> Result<(), HandshakeError> {
        let transport = self.session().transport();
        transport
            .reconnect()
            .await
            .map_err(|e| HandshakeError::Unreachable(e.to_string()))?;
        self.session().establish().await.map(|_| ())
    }

    /// Re-establish and poll; used by the reconnect loop
    pub(crate) async fn recover(&self) -> Result<NormalizedSnapshot, PollError> {
        self.reestablish().await?;
        self.poll().await
    }

    /// Fold a status response into the handle and publish the snapshot
    fn process_status(&self, status: StatusResponse) -> NormalizedSnapshot {
        let (stored_model, model_id) = {
            let mut identity = self.inner.identity.write();
            let stored = identity.merge_reported(&status.raw);
            (stored, identity.model_id.clone())
        };
        let resolved_for = self.inner.resolved.read().model_id.clone();
        if resolved_for.as_deref() != Some(model_id.as_str()) {
            // Before the first resolution, compare against the model the
            // caller supplied with the identity
            self.resolve_profile(resolved_for.or(stored_model), &model_id, &status.raw);
        }

        let snapshot = decode(&status.raw, &self.profile());
        self.report_unmapped(&snapshot);

        self.inner.max_age.store(status.max_age, Ordering::Relaxed);
        *self.inner.last_raw.write() = status.raw;
        self.publish(snapshot.clone());
        snapshot
    }

    fn resolve_profile(&self, previous: Option<String>, model_id: &str, raw: &RawStatus) {
        let resolution = self.inner.registry.resolve_for(model_id, raw);
        let host = self.host();

        if let Some(previous) = previous.filter(|p| !p.is_empty() && p != model_id) {
            info!(%host, %previous, current = %model_id, "Device reports a different model");
            self.emit(DeviceEvent::ModelChanged {
                previous,
                current: model_id.to_string(),
            });
        }
        if resolution.unknown_model.is_some() {
            warn!(
                %host,
                model = %model_id,
                profile = %resolution.profile.model_id,
                "Unknown model, using generic profile"
            );
            self.emit(DeviceEvent::UnknownModel {
                model_id: model_id.to_string(),
            });
        } else {
            debug!(
                %host,
                model = %model_id,
                profile = %resolution.profile.model_id,
                "Profile resolved"
            );
        }

        *self.inner.resolved.write() = ResolvedProfile {
            profile: resolution.profile,
            matched: resolution.matched,
            model_id: Some(model_id.to_string()),
            unknown_model: resolution.unknown_model,
        };
    }

    fn report_unmapped(&self, snapshot: &NormalizedSnapshot) {
        let keys: BTreeSet<String> = snapshot.unmapped.keys().cloned().collect();
        let mut reported = self.inner.unmapped.lock();
        if keys.is_empty() || *reported == keys {
            *reported = keys;
            return;
        }
        warn!(host = %self.host(), keys = ?keys, "Raw keys not described by the profile");
        *reported = keys.clone();
        drop(reported);
        self.emit(DeviceEvent::UnmappedKeys {
            keys: keys.into_iter().collect(),
        });
    }

    fn publish(&self, snapshot: NormalizedSnapshot) {
        *self.inner.last_snapshot.write() = Some(snapshot.clone());
        let _ = self.inner.snapshots.send(snapshot.clone());
        self.emit(DeviceEvent::Snapshot {
            snapshot,
            max_age_secs: self.max_age(),
            timestamp: Utc::now(),
        });
    }

    // --- Commands ---

    /// Apply a capability value
    ///
    /// Commands on one device are applied in submission order. Model errors
    /// are returned at once; transport and session failures are retried with
    /// backoff up to `set_retries` times.
    pub async fn set_status(
        &self,
        capability: Capability,
        value: CapabilityValue,
    ) -> Result<Ack, SetError> {
        if self.is_disconnected() {
            return Err(SetError::Disconnected);
        }
        self.cancellable(self.apply(capability, value))
            .await
            .unwrap_or(Err(SetError::Disconnected))
    }

    /// Reset a filter's remaining life to its full lifetime
    pub async fn reset_filter(&self, capability: Capability) -> Result<Ack, SetError> {
        let profile = self.profile();
        if !capability.is_filter() || !profile.supports(capability) {
            return Err(ModelError::UnsupportedCapability {
                capability,
                model: profile.model_id.clone(),
            }
            .into());
        }

        let total = self
            .last_snapshot()
            .and_then(|s| s.get(capability).and_then(|v| v.as_filter()).copied())
            .and_then(|life| life.total_hours)
            .ok_or_else(|| {
                ModelError::out_of_domain(
                    capability,
                    CapabilityValue::Unavailable,
                    "filter lifetime not reported",
                )
            })?;

        let life = FilterLife {
            remaining_hours: total,
            total_hours: Some(total),
        };
        self.set_status(capability, CapabilityValue::Filter(life)).await
    }

    async fn apply(&self, capability: Capability, value: CapabilityValue) -> Result<Ack, SetError> {
        let _order = self.inner.command_lock.lock().await;

        let profile = self.profile();
        let value = self.step_value(capability, value, &profile);
        let patch = encode(capability, &value, &profile)?;
        let host = self.host();
        debug!(%host, %capability, %value, patch = ?patch, "Sending command");

        let max_attempts = self.inner.config.set_retries.saturating_add(1);
        let mut backoff = Backoff::new(&self.inner.config.backoff);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.send_patch(&patch).await {
                Ok(()) => {
                    info!(%host, %capability, %value, attempt, "Command applied");
                    self.merge_patch(&patch);
                    return Ok(Ack {
                        capability,
                        value,
                        attempts: attempt,
                    });
                }
                Err(message) if attempt >= max_attempts => {
                    error!(
                        %host,
                        %capability,
                        %value,
                        attempts = attempt,
                        error = %message,
                        "Command failed"
                    );
                    self.emit(DeviceEvent::CommandFailed {
                        capability,
                        value: value.clone(),
                        message: message.clone(),
                    });
                    return Err(SetError::Unreachable {
                        capability,
                        value,
                        attempts: attempt,
                        message,
                    });
                }
                Err(message) => {
                    let delay = backoff.next_delay();
                    warn!(
                        %host,
                        %capability,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "Command failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// One command attempt; an expired session is re-established once
    async fn send_patch(&self, patch: &RawStatus) -> Result<(), String> {
        let session = self.session();
        match session.control(patch).await {
            Ok(()) => Ok(()),
            Err(e) if e.needs_new_session() => {
                debug!(
                    host = %self.host(),
                    error = %e,
                    "Re-establishing session before resending"
                );
                self.reestablish().await.map_err(|e| e.to_string())?;
                session.control(patch).await.map_err(|e| e.to_string())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    /// Snap target humidity to its step, treating current ± 1 as a nudge
    fn step_value(
        &self,
        capability: Capability,
        value: CapabilityValue,
        profile: &ModelProfile,
    ) -> CapabilityValue {
        if capability != Capability::TargetHumidity {
            return value;
        }
        let (Some(requested), Some(range)) = (
            value.as_f64(),
            profile.descriptor(capability).and_then(|d| d.range),
        ) else {
            return value;
        };

        let current = self
            .last_snapshot()
            .and_then(|s| s.get(capability).and_then(CapabilityValue::as_f64));
        let target = step_target(&range, requested, current);
        if target.fract() == 0.0 {
            CapabilityValue::Integer(target as i64)
        } else {
            CapabilityValue::Float(target)
        }
    }

    /// Optimistically fold an applied patch into the last status
    fn merge_patch(&self, patch: &RawStatus) {
        let raw = {
            let mut raw = self.inner.last_raw.write();
            for (key, value) in patch {
                raw.insert(key.clone(), value.clone());
            }
            raw.clone()
        };
        let snapshot = decode(&raw, &self.profile());
        self.publish(snapshot);
    }

    // --- Lifecycle ---

    /// Start the poll scheduler unless it is already running
    pub(crate) fn ensure_polling(&self) {
        if self.is_disconnected() {
            return;
        }
        let mut poller = self.inner.poller.lock();
        if poller.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        debug!(host = %self.host(), "Starting poll scheduler");
        *poller = Some(scheduler::spawn(self));
    }

    /// Manually reconnect, resuming a permanently unreachable device
    pub async fn reconnect(&self) -> Result<NormalizedSnapshot, PollError> {
        if self.is_disconnected() {
            return Err(PollError::Disconnected);
        }
        info!(host = %self.host(), "Manual reconnect");
        self.set_state(HandleState::Reconnecting);

        let result = self
            .cancellable(self.recover())
            .await
            .unwrap_or(Err(PollError::Disconnected));
        match &result {
            Ok(_) => {
                self.set_state(HandleState::Polling);
                if self.inner.config.auto_poll {
                    self.ensure_polling();
                }
            }
            Err(e) => {
                warn!(host = %self.host(), error = %e, "Manual reconnect failed");
                self.set_state(HandleState::PermanentlyUnreachable);
            }
        }
        result
    }

    /// Cancel in-flight work, stop polling and tear down the session
    ///
    /// Safe to call concurrently with other operations and more than once.
    pub async fn disconnect(&self) {
        if self.is_disconnected() {
            return;
        }
        self.set_state(HandleState::Disconnected);
        self.inner.cancel.cancel();

        let task = self.inner.poller.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.session().close().await;
        info!(host = %self.host(), "Disconnected");
    }

    /// Run an operation unless the handle is disconnected first
    async fn cancellable<T>(&self, operation: impl Future<Output = T>) -> Option<T> {
        tokio::select! {
            biased;
            _ = self.inner.cancel.cancelled() => None,
            output = operation => Some(output),
        }
    }
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("identity", &*self.inner.identity.read())
            .field("profile", &self.inner.resolved.read().profile.model_id)
            .field("state", &self.state())
            .finish()
    }
}
