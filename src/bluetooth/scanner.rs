/// Duty-cycled BLE scanning and per-advertisement dispatch
///
/// The scheduler alternates between an idle period and a bounded scan
/// window. While scanning, ATC advertisements are decoded and emitted
/// directly, and sightings of registered Flower care sensors make sure a
/// session is running for them. Sessions live independently of the windows.
use log::{debug, error, info, warn};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant, MissedTickBehavior};

use crate::bluetooth::decoder::decode_atc_data;
use crate::bluetooth::session::{SessionEvent, SessionManager, SessionSettings};
use crate::bluetooth::{Discovery, PowerState, RadioAdapter};
use crate::error::{DecodeError, ScanError};
use crate::metrics::MetricsEmitter;
use crate::models::{Reading, SensorFamily};
use crate::registry::{classify, SensorRegistry};
use crate::utils::now_formatted;

/// Channel buffer size for session events.
const SESSION_EVENT_BUFFER_SIZE: usize = 64;

#[derive(Debug, Clone, Copy)]
pub struct ScanTiming {
    /// Time between the starts of two scan windows
    pub interval: Duration,
    /// How long each window stays open
    pub window: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning { deadline: Instant },
}

/// Display names seen since the current window opened. Diagnostics only.
#[derive(Debug, Default)]
pub struct ScanCycleRecord {
    seen: BTreeSet<String>,
}

impl ScanCycleRecord {
    pub fn reset(&mut self) {
        self.seen.clear();
    }

    pub fn record(&mut self, display_name: &str) {
        self.seen.insert(display_name.to_string());
    }

    #[cfg(test)]
    pub fn contains(&self, display_name: &str) -> bool {
        self.seen.contains(display_name)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.seen.iter().map(String::as_str).collect()
    }
}

/// What happened to a single discovery event
#[derive(Debug, Clone, PartialEq, Eq)]
enum Dispatch {
    Ignored,
    Unregistered,
    NoData,
    Emitted,
    SessionStarted,
    SessionRunning,
}

pub struct ScanScheduler {
    adapter: Arc<dyn RadioAdapter>,
    discoveries: mpsc::Receiver<Discovery>,
    registry: Arc<SensorRegistry>,
    emitter: Arc<dyn MetricsEmitter>,
    sessions: SessionManager,
    session_events: mpsc::Receiver<SessionEvent>,
    timing: ScanTiming,
    state: ScanState,
    cycle: ScanCycleRecord,
}

impl ScanScheduler {
    pub fn new(
        adapter: Arc<dyn RadioAdapter>,
        discoveries: mpsc::Receiver<Discovery>,
        registry: Arc<SensorRegistry>,
        emitter: Arc<dyn MetricsEmitter>,
        timing: ScanTiming,
        session_settings: SessionSettings,
    ) -> Self {
        let (events_tx, session_events) = mpsc::channel(SESSION_EVENT_BUFFER_SIZE);
        let sessions =
            SessionManager::new(adapter.clone(), emitter.clone(), session_settings, events_tx);

        Self {
            adapter,
            discoveries,
            registry,
            emitter,
            sessions,
            session_events,
            timing,
            state: ScanState::Idle,
            cycle: ScanCycleRecord::default(),
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> ScanState {
        self.state
    }

    #[cfg(test)]
    pub fn cycle(&self) -> &ScanCycleRecord {
        &self.cycle
    }

    #[cfg(test)]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Run the duty cycle until the discovery stream ends.
    ///
    /// The first window opens immediately, then one every `interval`.
    pub async fn run(&mut self) -> Result<(), ScanError> {
        let mut ticker = tokio::time::interval(self.timing.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.run_window().await,
                Some(event) = self.session_events.recv() => self.handle_session_event(event),
                discovery = self.discoveries.recv() => match discovery {
                    Some(discovery) => self.handle_discovery(discovery),
                    None => return Err(ScanError::DiscoveryClosed),
                },
            }
        }
    }

    /// Open one scan window and process discoveries until its deadline
    pub async fn run_window(&mut self) {
        match self.adapter.power_state().await {
            Ok(PowerState::On) => {}
            Ok(PowerState::Off) => {
                warn!("Bluetooth adapter is powered off, skipping scan window");
                return;
            }
            Err(e) => {
                error!("Failed to query adapter power state: {}", e);
                return;
            }
        }

        self.cycle.reset();
        if let Err(e) = self.adapter.start_scan().await {
            error!("Failed to start scanning: {}", e);
            return;
        }

        let deadline = Instant::now() + self.timing.window;
        self.state = ScanState::Scanning { deadline };
        info!("Started scanning at {}", now_formatted());

        let window = sleep(self.timing.window);
        tokio::pin!(window);

        loop {
            tokio::select! {
                _ = &mut window => break,
                Some(event) = self.session_events.recv() => self.handle_session_event(event),
                discovery = self.discoveries.recv() => match discovery {
                    Some(discovery) => self.handle_discovery(discovery),
                    None => {
                        warn!("Discovery stream closed while scanning");
                        break;
                    }
                },
            }
        }

        if let Err(e) = self.adapter.stop_scan().await {
            error!("Failed to stop scanning: {}", e);
        }
        self.state = ScanState::Idle;
        info!("Paused scanning at {}", now_formatted());
        if self.cycle.is_empty() {
            warn!("No sensors seen during this scan window");
        } else {
            info!(
                "{} sensors seen this cycle: {:?}",
                self.cycle.len(),
                self.cycle.names()
            );
        }
        debug!("{} Flower care sessions active", self.sessions.active_count());
    }

    /// Classify one advertisement. Errors never leave this function.
    ///
    /// Advertisements delivered outside an open window are dropped.
    pub fn handle_discovery(&mut self, discovery: Discovery) {
        let ScanState::Scanning { deadline } = self.state else {
            debug!("Ignoring {} outside a scan window", discovery.id);
            return;
        };
        if Instant::now() > deadline {
            debug!("Ignoring {} after the scan window closed", discovery.id);
            return;
        }

        match self.dispatch(&discovery) {
            Ok(Dispatch::Ignored) => {}
            Ok(outcome) => debug!("{} -> {:?}", discovery.id, outcome),
            Err(e) => warn!(
                "Dropping advertisement from {} ({:?}): {}",
                discovery.id, discovery.local_name, e
            ),
        }
    }

    fn dispatch(&mut self, discovery: &Discovery) -> Result<Dispatch, DecodeError> {
        let Some(local_name) = discovery.local_name.as_deref() else {
            return Ok(Dispatch::Ignored);
        };

        match classify(local_name) {
            Some(SensorFamily::Atc) => {
                if discovery.service_data.is_empty() {
                    debug!("{} ({}) found but no data", local_name, discovery.id);
                    return Ok(Dispatch::NoData);
                }
                let Some(sensor) = self.registry.atc(local_name) else {
                    warn!("Sensor not found: {} ({})", local_name, discovery.id);
                    return Ok(Dispatch::Unregistered);
                };

                let reading = decode_atc_data(&discovery.service_data, local_name)?;
                debug!(
                    "{} ({}): temperature={}°C humidity={}% battery={}% mac={:?}",
                    sensor.display_name,
                    reading.local_name,
                    reading.temperature,
                    reading.humidity,
                    reading.battery,
                    reading.mac
                );
                self.emitter
                    .emit(&sensor.display_name, &Reading::Atc(reading));
                self.cycle.record(&sensor.display_name);
                Ok(Dispatch::Emitted)
            }
            Some(SensorFamily::Flora) => {
                let Some(sensor) = self.registry.flora(&discovery.id) else {
                    debug!("Unconfigured Flower care sensor {}", discovery.id);
                    return Ok(Dispatch::Unregistered);
                };
                let sensor = sensor.clone();
                if self.sessions.ensure(&sensor, discovery.rssi) {
                    Ok(Dispatch::SessionStarted)
                } else {
                    Ok(Dispatch::SessionRunning)
                }
            }
            None => Ok(Dispatch::Ignored),
        }
    }

    fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Completed(sensor) => self.cycle.record(&sensor.display_name),
            SessionEvent::Retired(sensor) => {
                info!("Removing {} ({}) from tracking", sensor.display_name, sensor.id);
                self.sessions.retire(&sensor.id);
            }
        }
    }
}

/// Log every ATC and Flower care device once, until interrupted.
///
/// Used to find the local names and addresses that go into the sensor lists.
pub async fn list_devices(
    adapter: Arc<dyn RadioAdapter>,
    mut discoveries: mpsc::Receiver<Discovery>,
) -> Result<(), ScanError> {
    adapter.start_scan().await?;
    info!("Listing ATC and Flower care devices, press Ctrl+C to stop");

    let mut listed = HashSet::new();
    while let Some(discovery) = discoveries.recv().await {
        if let Some(line) = describe_device(&discovery) {
            if listed.insert(discovery.id.clone()) {
                info!("{}", line);
            }
        }
    }

    adapter.stop_scan().await?;
    Err(ScanError::DiscoveryClosed)
}

fn describe_device(discovery: &Discovery) -> Option<String> {
    let local_name = discovery.local_name.as_deref()?;
    let family = match classify(local_name)? {
        SensorFamily::Atc => "ATC sensor",
        SensorFamily::Flora => "Flower care sensor",
    };
    Some(format!(
        "{} found: name={} id={} rssi={:?}",
        family, local_name, discovery.id, discovery.rssi
    ))
}
