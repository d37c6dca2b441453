//! BLE transport: a background thread drives an async `btleplug` central
//! and feeds inbound GATT notifications into a mutex-guarded byte buffer,
//! exposing the same synchronous [Transport] facade as [super::serial].
//!
//! A dedicated thread owns its own async runtime, `write` calls are
//! dispatched onto it and awaited synchronously, and inbound notifications
//! accumulate into a locked buffer drained by the read path. Known BLE
//! UART GATT profile triples (service/rx/tx characteristic UUIDs) are
//! tried in priority order before falling back to "any write + notify
//! characteristic pair".

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use btleplug::api::{
    Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Manager, Peripheral};
use uuid::Uuid;

use super::{run_exchange, RawIo, Transport, TransportError};

/// Known BLE UART profiles `(service, rx_char, tx_char)` in priority order.
/// `rx` is the characteristic the host writes to; `tx` is the
/// characteristic the adapter notifies on.
const KNOWN_PROFILES: &[(&str, &str, &str)] = &[
    (
        "0000fff0-0000-1000-8000-00805f9b34fb",
        "0000fff2-0000-1000-8000-00805f9b34fb",
        "0000fff1-0000-1000-8000-00805f9b34fb",
    ),
    (
        "49535343-fe7d-4ae5-8fa9-9fafd205e455",
        "49535343-6daa-4d02-abf6-19569aca69fe",
        "49535343-aca3-481c-91ec-d85e28a60318",
    ),
    (
        "6e400001-b5a3-f393-e0a9-e50e24dcca9e",
        "6e400002-b5a3-f393-e0a9-e50e24dcca9e",
        "6e400003-b5a3-f393-e0a9-e50e24dcca9e",
    ),
    (
        "0000ffe0-0000-1000-8000-00805f9b34fb",
        "0000ffe1-0000-1000-8000-00805f9b34fb",
        "0000ffe1-0000-1000-8000-00805f9b34fb",
    ),
];

struct Shared {
    buffer: Mutex<VecDeque<u8>>,
}

/// A BLE-backed [Transport]. Connects to `address` on construction, scanning
/// for it first if it isn't already visible to the adapter.
pub struct BleTransport {
    runtime: tokio::runtime::Runtime,
    peripheral: Peripheral,
    rx_char: Characteristic,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for BleTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleTransport").finish()
    }
}

impl BleTransport {
    /// Scans for and connects to the BLE adapter at `address` (platform
    /// address string), selecting RX/TX characteristics from the known UART
    /// profile table or, failing that, any write+notify characteristic
    /// pair on the device.
    pub fn connect(address: &str, scan_timeout: Duration) -> Result<Self, TransportError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| TransportError::Io(format!("failed to start BLE runtime: {e}")))?;

        let (peripheral, rx_char, tx_char) = runtime.block_on(async {
            let manager = Manager::new()
                .await
                .map_err(|e| TransportError::Io(format!("BLE manager init failed: {e}")))?;
            let adapters = manager
                .adapters()
                .await
                .map_err(|e| TransportError::Io(format!("no BLE adapters: {e}")))?;
            let adapter = adapters
                .into_iter()
                .next()
                .ok_or_else(|| TransportError::Io("no BLE adapter present".to_string()))?;

            adapter
                .start_scan(ScanFilter::default())
                .await
                .map_err(|e| TransportError::Io(format!("BLE scan failed: {e}")))?;
            tokio::time::sleep(scan_timeout).await;

            let peripherals = adapter
                .peripherals()
                .await
                .map_err(|e| TransportError::Io(format!("BLE peripheral enumeration failed: {e}")))?;
            let mut found: Option<Peripheral> = None;
            for p in peripherals {
                if let Ok(Some(props)) = p.properties().await {
                    if props.address.to_string().eq_ignore_ascii_case(address) {
                        found = Some(p);
                        break;
                    }
                }
            }
            let peripheral = found.ok_or_else(|| {
                TransportError::Io(format!(
                    "BLE device {address} not found; if paired in the OS Bluetooth settings, unpair and retry"
                ))
            })?;

            peripheral
                .connect()
                .await
                .map_err(|e| TransportError::Io(format!("BLE connect failed: {e}")))?;
            peripheral
                .discover_services()
                .await
                .map_err(|e| TransportError::Io(format!("BLE service discovery failed: {e}")))?;

            let (rx, tx) = select_characteristics(&peripheral)?;
            peripheral
                .subscribe(&tx)
                .await
                .map_err(|e| TransportError::Io(format!("BLE subscribe failed: {e}")))?;

            Ok::<_, TransportError>((peripheral, rx, tx))
        })?;

        let shared = Arc::new(Shared {
            buffer: Mutex::new(VecDeque::new()),
        });

        spawn_notification_pump(&runtime, peripheral.clone(), tx_char, shared.clone());

        Ok(Self {
            runtime,
            peripheral,
            rx_char,
            shared,
        })
    }
}

fn select_characteristics(peripheral: &Peripheral) -> Result<(Characteristic, Characteristic), TransportError> {
    let chars = peripheral.characteristics();

    for (svc, rx_uuid, tx_uuid) in KNOWN_PROFILES {
        let rx_uuid: Uuid = rx_uuid.parse().expect("static UUID literal");
        let tx_uuid: Uuid = tx_uuid.parse().expect("static UUID literal");
        let _ = svc;
        let rx = chars.iter().find(|c| c.uuid == rx_uuid);
        let tx = chars.iter().find(|c| c.uuid == tx_uuid);
        if let (Some(rx), Some(tx)) = (rx, tx) {
            return Ok((rx.clone(), tx.clone()));
        }
    }

    let write_char = chars
        .iter()
        .find(|c| c.properties.contains(btleplug::api::CharPropFlags::WRITE)
            || c.properties.contains(btleplug::api::CharPropFlags::WRITE_WITHOUT_RESPONSE));
    let notify_char = chars
        .iter()
        .find(|c| c.properties.contains(btleplug::api::CharPropFlags::NOTIFY)
            || c.properties.contains(btleplug::api::CharPropFlags::INDICATE));

    match (write_char, notify_char) {
        (Some(w), Some(n)) => Ok((w.clone(), n.clone())),
        _ => Err(TransportError::Io(
            "no write+notify characteristic pair found on BLE device".to_string(),
        )),
    }
}

fn spawn_notification_pump(
    runtime: &tokio::runtime::Runtime,
    peripheral: Peripheral,
    tx_char: Characteristic,
    shared: Arc<Shared>,
) {
    use btleplug::api::Peripheral as _;
    use futures_util::StreamExt;

    runtime.spawn(async move {
        let Ok(mut stream) = peripheral.notifications().await else {
            return;
        };
        while let Some(event) = stream.next().await {
            if event.uuid != tx_char.uuid {
                continue;
            }
            let mut buf = shared.buffer.lock().unwrap();
            buf.extend(event.value);
        }
    });
}

impl RawIo for BleTransport {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let peripheral = self.peripheral.clone();
        let rx_char = self.rx_char.clone();
        let data = bytes.to_vec();
        self.runtime
            .block_on(async move { peripheral.write(&rx_char, &data, WriteType::WithoutResponse).await })
            .map_err(|e| TransportError::Io(format!("BLE write failed: {e}")))
    }

    fn bytes_available(&mut self) -> Result<usize, TransportError> {
        Ok(self.shared.buffer.lock().unwrap().len())
    }

    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut locked = self.shared.buffer.lock().unwrap();
        let n = buf.len().min(locked.len());
        for slot in buf.iter_mut().take(n) {
            *slot = locked.pop_front().unwrap();
        }
        Ok(n)
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        self.shared.buffer.lock().unwrap().clear();
        Ok(())
    }

    fn clear_output(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

impl Transport for BleTransport {
    fn exchange(
        &mut self,
        command: &str,
        timeout: Duration,
        silence_timeout: Duration,
        min_wait_before_silence: Duration,
    ) -> Result<Vec<String>, TransportError> {
        run_exchange(self, command, timeout, silence_timeout, min_wait_before_silence)
    }
}
