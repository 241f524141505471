use crate::discovery::{select, DeviceHint, DiscoveredDevice, Discovery, Selection};
use crate::error::{Error, OtaError, Result, TransportError};
use crate::protocol::OtaStatus;
use crate::status::StatusLatch;
use crate::transport::ota_uuids::*;
use crate::transport::{uuid_matches, Endpoint, OtaTransport, WriteKind};

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Peripheral, PeripheralId};
use futures::stream::StreamExt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Find the characteristic whose UUID carries `fragment`.
fn find_characteristic_by_fragment(peripheral: &Peripheral, fragment: &str) -> std::result::Result<Characteristic, OtaError> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|chr| uuid_matches(&chr.uuid, fragment))
        .ok_or_else(|| OtaError::EndpointNotFound {
            fragment: fragment.to_string(),
        })
}

fn log_characteristics(peripheral: &Peripheral) {
    warn!("could not find OTA characteristics, available:");
    for chr in peripheral.characteristics() {
        warn!("  {}  props={:?}", chr.uuid, chr.properties);
    }
}

async fn describe(peripheral: Peripheral) -> Result<DiscoveredDevice<Peripheral>> {
    let properties = peripheral.properties().await?;
    let name = properties.and_then(|p| p.local_name);
    let address = peripheral.address().to_string();
    Ok(DiscoveredDevice {
        peripheral,
        name,
        address,
    })
}

/// Scans with the first Bluetooth adapter.
pub struct BtleplugDiscovery {
    adapter: Adapter,
    name_prefix: String,
    scan_timeout: Duration,
}

impl BtleplugDiscovery {
    pub async fn new(name_prefix: String, scan_timeout: Duration) -> Result<Self> {
        let manager = btleplug::platform::Manager::new().await?;
        let adapter = manager.adapters().await?.into_iter().next().ok_or(Error::NoAdapter)?;
        Ok(BtleplugDiscovery {
            adapter,
            name_prefix,
            scan_timeout,
        })
    }

    async fn peripheral(&self, id: &PeripheralId) -> Result<DiscoveredDevice<Peripheral>> {
        describe(self.adapter.peripheral(id).await?).await
    }
}

#[async_trait]
impl Discovery for BtleplugDiscovery {
    type Peripheral = Peripheral;

    async fn discover(&self, hint: &DeviceHint) -> Result<Selection<Peripheral>> {
        info!("Scanning for {} devices ({:?})...", self.name_prefix, self.scan_timeout);
        let mut events = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;

        let deadline = tokio::time::sleep(self.scan_timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                event = events.next() => match event {
                    Some(CentralEvent::DeviceDiscovered(id)) => {
                        let device = self.peripheral(&id).await?;
                        debug!("Found [{}]", device.label());
                        // An exact address cannot be improved on, stop early.
                        if hint.matches_address(&device.address) {
                            self.adapter.stop_scan().await?;
                            return Ok(Selection::Found(device));
                        }
                    }
                    Some(_) => {}
                    None => break,
                },
            }
        }
        self.adapter.stop_scan().await?;

        let mut devices = Vec::new();
        for peripheral in self.adapter.peripherals().await? {
            devices.push(describe(peripheral).await?);
        }
        debug!("{} devices seen", devices.len());
        Ok(select(devices, &self.name_prefix, hint))
    }
}

/// OTA session over a connected btleplug peripheral.
pub struct BtleplugTransport {
    peripheral: Peripheral,
    control: Characteristic,
    data: Characteristic,
}

impl BtleplugTransport {
    /// Connect and resolve the control and data characteristics.
    pub async fn connect(peripheral: Peripheral) -> Result<Self> {
        peripheral.connect().await?;
        info!("Connected. Discovering services...");
        peripheral.discover_services().await?;

        let resolved = find_characteristic_by_fragment(&peripheral, CTRL_FRAGMENT)
            .and_then(|control| Ok((control, find_characteristic_by_fragment(&peripheral, DATA_FRAGMENT)?)));
        let (control, data) = match resolved {
            Ok(pair) => pair,
            Err(err) => {
                log_characteristics(&peripheral);
                if let Err(e) = peripheral.disconnect().await {
                    debug!("disconnect failed: {}", e);
                }
                return Err(err.into());
            }
        };
        info!("OTA control: {}", control.uuid);
        info!("OTA data:    {}", data.uuid);

        Ok(BtleplugTransport {
            peripheral,
            control,
            data,
        })
    }

    /// Best-effort disconnect; the lamp may already be rebooting.
    pub async fn disconnect(&self) {
        if let Err(e) = self.peripheral.disconnect().await {
            debug!("disconnect failed: {}", e);
        }
    }

    fn characteristic(&self, endpoint: Endpoint) -> &Characteristic {
        match endpoint {
            Endpoint::Control => &self.control,
            Endpoint::Data => &self.data,
        }
    }
}

#[async_trait]
impl OtaTransport for BtleplugTransport {
    async fn subscribe(&self, latch: StatusLatch) -> std::result::Result<(), TransportError> {
        // Take the stream before subscribing so the first notification is kept.
        let mut notifications = self.peripheral.notifications().await?;
        self.peripheral.subscribe(&self.control).await?;

        let ctrl_uuid = self.control.uuid;
        tokio::spawn(async move {
            while let Some(ntf) = notifications.next().await {
                if ntf.uuid != ctrl_uuid {
                    continue;
                }
                let status = OtaStatus::from_notification(&ntf.value);
                info!("OTA status: {}", status);
                latch.deposit(status);
            }
            debug!("notification stream closed");
            latch.close();
        });
        Ok(())
    }

    async fn write(&self, endpoint: Endpoint, bytes: &[u8], kind: WriteKind) -> std::result::Result<(), TransportError> {
        let write_type = match kind {
            WriteKind::Confirmed => WriteType::WithResponse,
            WriteKind::Unconfirmed => WriteType::WithoutResponse,
        };
        self.peripheral
            .write(self.characteristic(endpoint), bytes, write_type)
            .await?;
        Ok(())
    }
}
