/// Per-device GATT sessions for Flower care sensors
///
/// Each configured sensor gets one long-lived task that wakes up on a fixed
/// interval and walks connect → service discovery → mode write → battery
/// read → data read → disconnect. A failed run just waits for the next tick:
/// no backoff, and no retry limit unless `max_consecutive_failures` is set.
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicI16, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, MissedTickBehavior};

use crate::bluetooth::decoder::{decode_flora_battery, decode_flora_data};
use crate::bluetooth::uuids::{
    normalize_uuid, FLORA_BATTERY_CHARACTERISTIC, FLORA_DATA_CHARACTERISTIC, FLORA_DATA_SERVICE,
    FLORA_MODE_CHARACTERISTIC, FLORA_MODE_REALTIME,
};
use crate::bluetooth::{CharacteristicHandle, RadioAdapter};
use crate::error::{ConnectionError, ProtocolError, RadioError, SessionError};
use crate::metrics::MetricsEmitter;
use crate::models::{FloraReading, Reading, SensorIdentity};

/// Timing and retirement policy shared by all sessions
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub interval: Duration,
    pub connect_timeout: Duration,
    pub operation_timeout: Duration,
    /// Retire a session after this many failed runs in a row; `None` retries forever
    pub max_consecutive_failures: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    ServiceDiscovery,
    ModeConfigured,
    BatteryRead,
    DataRead,
}

/// How the last run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    Failed,
}

/// Reported by session tasks to whoever owns the [`SessionManager`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Completed(SensorIdentity),
    Retired(SensorIdentity),
}

/// Characteristics resolved during service discovery
struct FloraCharacteristics {
    mode: CharacteristicHandle,
    data: CharacteristicHandle,
    battery: CharacteristicHandle,
}

/// State machine for one Flower care sensor
pub struct DeviceSession {
    identity: SensorIdentity,
    adapter: Arc<dyn RadioAdapter>,
    emitter: Arc<dyn MetricsEmitter>,
    settings: SessionSettings,
    last_rssi: Arc<AtomicI16>,
    state: SessionState,
    last_outcome: Option<RunOutcome>,
}

impl DeviceSession {
    pub fn new(
        identity: SensorIdentity,
        adapter: Arc<dyn RadioAdapter>,
        emitter: Arc<dyn MetricsEmitter>,
        settings: SessionSettings,
        last_rssi: Arc<AtomicI16>,
    ) -> Self {
        Self {
            identity,
            adapter,
            emitter,
            settings,
            last_rssi,
            state: SessionState::Disconnected,
            last_outcome: None,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn last_outcome(&self) -> Option<RunOutcome> {
        self.last_outcome
    }

    /// Run every step once and emit the reading on success.
    ///
    /// Always leaves the session in `Disconnected`.
    pub async fn run(&mut self) -> Result<FloraReading, SessionError> {
        let result = self.execute().await;
        match &result {
            Ok(reading) => {
                self.last_outcome = Some(RunOutcome::Success);
                self.emitter
                    .emit(&self.identity.display_name, &Reading::Flora(reading.clone()));
            }
            Err(e) => {
                // A refused connect leaves nothing open. A timed-out one may
                // still complete inside BlueZ after the future is dropped.
                let refused = matches!(e, SessionError::Connection(ConnectionError::Failed { .. }));
                if self.state != SessionState::Disconnected && !refused {
                    if let Err(e) = self.adapter.disconnect(&self.identity.id).await {
                        debug!("Disconnect after failure of {} failed: {}", self.identity.id, e);
                    }
                }
                self.last_outcome = Some(RunOutcome::Failed);
            }
        }
        self.state = SessionState::Disconnected;
        result
    }

    async fn execute(&mut self) -> Result<FloraReading, SessionError> {
        let device = self.identity.id.clone();

        self.state = SessionState::Connecting;
        match timeout(self.settings.connect_timeout, self.adapter.connect(&device)).await {
            Ok(Ok(())) => {}
            Ok(Err(source)) => return Err(ConnectionError::Failed { device, source }.into()),
            Err(_) => {
                return Err(ConnectionError::Timeout {
                    device,
                    after: self.settings.connect_timeout,
                }
                .into())
            }
        }

        self.state = SessionState::ServiceDiscovery;
        let characteristics = self.discover(&device).await?;

        self.state = SessionState::ModeConfigured;
        self.step(
            "mode write",
            self.adapter
                .write_characteristic(&characteristics.mode, &FLORA_MODE_REALTIME),
        )
        .await?
        .map_err(|source| ProtocolError::WriteFailed {
            characteristic: "mode",
            source,
        })?;

        self.state = SessionState::BatteryRead;
        let battery_data = self
            .step(
                "battery read",
                self.adapter.read_characteristic(&characteristics.battery),
            )
            .await?
            .map_err(|source| ProtocolError::ReadFailed {
                characteristic: "battery",
                source,
            })?;
        let battery = decode_flora_battery(&battery_data)?;
        debug!("Battery level of {}: {}%", self.identity.display_name, battery);

        self.state = SessionState::DataRead;
        let data = self
            .step("data read", self.adapter.read_characteristic(&characteristics.data))
            .await?
            .map_err(|source| ProtocolError::ReadFailed {
                characteristic: "data",
                source,
            })?;
        let values = decode_flora_data(&data)?;

        if let Err(e) = self.adapter.disconnect(&device).await {
            warn!("Failed to disconnect from {}: {}", device, e);
        }

        Ok(FloraReading {
            temperature: values.temperature,
            lux: values.lux,
            moisture: values.moisture,
            fertility: values.fertility,
            battery,
            rssi: self.last_rssi.load(Ordering::Relaxed),
        })
    }

    async fn discover(&self, device: &str) -> Result<FloraCharacteristics, SessionError> {
        let wanted = [
            normalize_uuid(FLORA_MODE_CHARACTERISTIC),
            normalize_uuid(FLORA_DATA_CHARACTERISTIC),
            normalize_uuid(FLORA_BATTERY_CHARACTERISTIC),
        ];
        let wanted_refs: Vec<&str> = wanted.iter().map(String::as_str).collect();
        let service = normalize_uuid(FLORA_DATA_SERVICE);

        let found = self
            .step(
                "service discovery",
                self.adapter
                    .discover_characteristics(device, &service, &wanted_refs),
            )
            .await?
            .map_err(ProtocolError::ServiceDiscovery)?;

        let take = |uuid: &str, name: &'static str| {
            found
                .iter()
                .find(|handle| normalize_uuid(&handle.uuid) == uuid)
                .cloned()
                .ok_or(ProtocolError::CharacteristicNotFound(name))
        };

        Ok(FloraCharacteristics {
            mode: take(&wanted[0], "mode")?,
            data: take(&wanted[1], "data")?,
            battery: take(&wanted[2], "battery")?,
        })
    }

    /// Bound one GATT operation by the operation timeout
    async fn step<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, RadioError>>,
    ) -> Result<Result<T, RadioError>, ProtocolError> {
        timeout(self.settings.operation_timeout, fut)
            .await
            .map_err(|_| ProtocolError::Timeout {
                operation,
                after: self.settings.operation_timeout,
            })
    }
}

/// Periodic driver for one session
async fn run_periodically(
    mut session: DeviceSession,
    settings: SessionSettings,
    events: mpsc::Sender<SessionEvent>,
) {
    let mut ticker = tokio::time::interval(settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut consecutive_failures = 0u32;

    loop {
        ticker.tick().await;
        let identity = session.identity.clone();
        let previous = session.last_outcome();

        match session.run().await {
            Ok(reading) => {
                if previous == Some(RunOutcome::Failed) {
                    info!(
                        "{} reachable again after {} failed runs",
                        identity.display_name, consecutive_failures
                    );
                }
                consecutive_failures = 0;
                info!(
                    "Read {}: {}°C, {} lux, {}% moisture, {} µS/cm, {}% battery",
                    identity.display_name,
                    reading.temperature,
                    reading.lux,
                    reading.moisture,
                    reading.fertility,
                    reading.battery
                );
                let _ = events.send(SessionEvent::Completed(identity)).await;
            }
            Err(e) => {
                consecutive_failures += 1;
                warn!(
                    "Session for {} failed ({} in a row): {}",
                    identity.display_name, consecutive_failures, e
                );
                if settings
                    .max_consecutive_failures
                    .is_some_and(|max| consecutive_failures >= max)
                {
                    warn!(
                        "Giving up on {} after {} failures",
                        identity.display_name, consecutive_failures
                    );
                    let _ = events.send(SessionEvent::Retired(identity)).await;
                    return;
                }
            }
        }
    }
}

struct ActiveSession {
    last_rssi: Arc<AtomicI16>,
    task: JoinHandle<()>,
}

/// Owns every running session, at most one per device
pub struct SessionManager {
    adapter: Arc<dyn RadioAdapter>,
    emitter: Arc<dyn MetricsEmitter>,
    settings: SessionSettings,
    events: mpsc::Sender<SessionEvent>,
    active: HashMap<String, ActiveSession>,
    retired: HashSet<String>,
}

impl SessionManager {
    pub fn new(
        adapter: Arc<dyn RadioAdapter>,
        emitter: Arc<dyn MetricsEmitter>,
        settings: SessionSettings,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self {
        Self {
            adapter,
            emitter,
            settings,
            events,
            active: HashMap::new(),
            retired: HashSet::new(),
        }
    }

    /// Make sure a session is running for `identity`.
    ///
    /// Returns `true` if a new session was started. For an already running
    /// session this only refreshes the last-known RSSI.
    pub fn ensure(&mut self, identity: &SensorIdentity, rssi: Option<i16>) -> bool {
        if self.retired.contains(&identity.id) {
            return false;
        }

        if let Some(active) = self.active.get(&identity.id) {
            if !active.task.is_finished() {
                if let Some(rssi) = rssi {
                    active.last_rssi.store(rssi, Ordering::Relaxed);
                }
                return false;
            }
        }

        let last_rssi = Arc::new(AtomicI16::new(rssi.unwrap_or(0)));
        let session = DeviceSession::new(
            identity.clone(),
            self.adapter.clone(),
            self.emitter.clone(),
            self.settings.clone(),
            last_rssi.clone(),
        );
        let task = tokio::spawn(run_periodically(
            session,
            self.settings.clone(),
            self.events.clone(),
        ));

        info!("Started session for {} ({})", identity.display_name, identity.id);
        self.active
            .insert(identity.id.clone(), ActiveSession { last_rssi, task });
        true
    }

    /// Stop tracking a device for good and cancel its timer
    pub fn retire(&mut self, id: &str) {
        if let Some(active) = self.active.remove(id) {
            active.task.abort();
        }
        self.retired.insert(id.to_string());
    }

    #[cfg(test)]
    pub fn is_active(&self, id: &str) -> bool {
        self.active
            .get(id)
            .is_some_and(|active| !active.task.is_finished())
    }

    pub fn active_count(&self) -> usize {
        self.active
            .values()
            .filter(|active| !active.task.is_finished())
            .count()
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        for active in self.active.values() {
            active.task.abort();
        }
    }
}
