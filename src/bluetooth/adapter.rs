//! BlueZ D-Bus implementation of [`RadioAdapter`].
//!
//! Requires a running `bluetoothd`. Advertisements are turned into
//! [`Discovery`] events by a background task that lives between
//! `start_scan` and `stop_scan`; the BlueZ discovery session ends when that
//! task drops its stream.

use async_trait::async_trait;
use bluer::{Adapter, AdapterEvent, Address, Device, DiscoveryFilter, DiscoveryTransport, Session};
use futures_util::StreamExt;
use log::{debug, error, warn};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

use super::uuids::normalize_uuid;
use super::{
    CharacteristicHandle, Discovery, PowerState, RadioAdapter, DISCOVERY_CHANNEL_BUFFER_SIZE,
};
use crate::error::RadioError;

/// How often to check whether BlueZ has finished resolving services
const SERVICES_RESOLVED_POLL: Duration = Duration::from_millis(100);

pub struct BluerAdapter {
    _session: Session,
    adapter: Adapter,
    discoveries: mpsc::Sender<Discovery>,
    scan_task: Mutex<Option<JoinHandle<()>>>,
}

impl BluerAdapter {
    /// Open the default adapter and power it on.
    ///
    /// Returns the adapter together with the receiver every discovery event
    /// is delivered to.
    pub async fn new() -> Result<(Self, mpsc::Receiver<Discovery>), RadioError> {
        let session = Session::new().await?;
        let adapter = session.default_adapter().await?;
        adapter.set_powered(true).await?;
        debug!("Using Bluetooth adapter {}", adapter.name());

        let (tx, rx) = mpsc::channel(DISCOVERY_CHANNEL_BUFFER_SIZE);
        Ok((
            Self {
                _session: session,
                adapter,
                discoveries: tx,
                scan_task: Mutex::new(None),
            },
            rx,
        ))
    }

    fn device(&self, id: &str) -> Result<Device, RadioError> {
        let address: Address = id
            .parse()
            .map_err(|_| RadioError::InvalidAddress(id.to_string()))?;
        Ok(self.adapter.device(address)?)
    }

    async fn characteristic(
        &self,
        handle: &CharacteristicHandle,
    ) -> Result<bluer::gatt::remote::Characteristic, RadioError> {
        let device = self.device(&handle.device)?;
        let service = device.service(handle.service_id).await?;
        Ok(service.characteristic(handle.characteristic_id).await?)
    }
}

#[async_trait]
impl RadioAdapter for BluerAdapter {
    async fn power_state(&self) -> Result<PowerState, RadioError> {
        if self.adapter.is_powered().await? {
            Ok(PowerState::On)
        } else {
            Ok(PowerState::Off)
        }
    }

    async fn start_scan(&self) -> Result<(), RadioError> {
        let mut scan_task = self.scan_task.lock().await;
        if scan_task.as_ref().is_some_and(|task| !task.is_finished()) {
            return Ok(());
        }

        // Every advertisement is needed, not only the first one per device
        let filter = DiscoveryFilter {
            transport: DiscoveryTransport::Le,
            duplicate_data: true,
            ..Default::default()
        };
        if let Err(e) = self.adapter.set_discovery_filter(filter).await {
            warn!("Failed to set discovery filter: {}", e);
        }

        let events = self.adapter.discover_devices_with_changes().await?;
        let adapter = self.adapter.clone();
        let tx = self.discoveries.clone();

        *scan_task = Some(tokio::spawn(async move {
            let mut events = Box::pin(events);
            while let Some(event) = events.next().await {
                let AdapterEvent::DeviceAdded(address) = event else {
                    continue;
                };
                match read_discovery(&adapter, address).await {
                    Ok(discovery) => {
                        // Drop rather than stall BlueZ when nobody is reading
                        if tx.try_send(discovery).is_err() {
                            debug!("Discovery channel full, dropping event for {}", address);
                        }
                    }
                    Err(e) => debug!("Failed to read properties of {}: {}", address, e),
                }
            }
            warn!("Bluetooth discovery stream ended");
        }));

        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), RadioError> {
        if let Some(task) = self.scan_task.lock().await.take() {
            task.abort();
        }
        Ok(())
    }

    async fn connect(&self, device: &str) -> Result<(), RadioError> {
        let device = self.device(device)?;
        if !device.is_connected().await? {
            device.connect().await?;
        }
        Ok(())
    }

    async fn discover_characteristics(
        &self,
        device: &str,
        service: &str,
        characteristics: &[&str],
    ) -> Result<Vec<CharacteristicHandle>, RadioError> {
        let id = device;
        let device = self.device(id)?;
        while !device.is_services_resolved().await? {
            sleep(SERVICES_RESOLVED_POLL).await;
        }

        let mut handles = Vec::new();
        let mut service_found = false;
        for remote_service in device.services().await? {
            if normalize_uuid(&remote_service.uuid().await?.to_string()) != service {
                continue;
            }
            service_found = true;
            for characteristic in remote_service.characteristics().await? {
                let uuid = normalize_uuid(&characteristic.uuid().await?.to_string());
                if characteristics.contains(&uuid.as_str()) {
                    handles.push(CharacteristicHandle {
                        device: id.to_string(),
                        uuid,
                        service_id: remote_service.id(),
                        characteristic_id: characteristic.id(),
                    });
                }
            }
        }

        if !service_found {
            return Err(RadioError::NotFound(format!("service {} on {}", service, id)));
        }
        Ok(handles)
    }

    async fn write_characteristic(
        &self,
        handle: &CharacteristicHandle,
        value: &[u8],
    ) -> Result<(), RadioError> {
        let characteristic = self.characteristic(handle).await?;
        Ok(characteristic.write(value).await?)
    }

    async fn read_characteristic(
        &self,
        handle: &CharacteristicHandle,
    ) -> Result<Vec<u8>, RadioError> {
        let characteristic = self.characteristic(handle).await?;
        Ok(characteristic.read().await?)
    }

    async fn disconnect(&self, device: &str) -> Result<(), RadioError> {
        let device = self.device(device)?;
        if device.is_connected().await? {
            device.disconnect().await?;
        }
        Ok(())
    }
}

impl Drop for BluerAdapter {
    fn drop(&mut self) {
        if let Ok(mut scan_task) = self.scan_task.try_lock() {
            if let Some(task) = scan_task.take() {
                task.abort();
            }
        } else {
            error!("Scan task still locked while dropping the Bluetooth adapter");
        }
    }
}

/// Snapshot the advertisement properties of one device
async fn read_discovery(adapter: &Adapter, address: Address) -> Result<Discovery, bluer::Error> {
    let device = adapter.device(address)?;
    let local_name = device.name().await?;
    let service_data = device
        .service_data()
        .await?
        .and_then(|data| data.into_values().next())
        .unwrap_or_default();
    let rssi = device.rssi().await?;

    Ok(Discovery {
        id: address.to_string(),
        local_name,
        service_data,
        rssi,
    })
}
