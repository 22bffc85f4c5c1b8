//! BlueZ GATT application and advertisement construction.
//!
//! This is the one module in the crate that touches `bluer` directly: it
//! wires the three characteristics in the service layout onto a D-Bus
//! `Application`, translating write/read/notify callbacks into
//! [`ProxyEvent`](crate::driver::ProxyEvent)s for the driver and queued
//! frames back onto the Response/Status notify paths. Everything it
//! depends on (`ProxyDriver`, `chunker`, `origin`) is itself bus-agnostic,
//! so none of that logic needs a live adapter to exercise.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use bluer::{
    Adapter, Session, Uuid,
    adv::Advertisement,
    gatt::local::{
        Application, Characteristic, CharacteristicNotifier, CharacteristicNotify,
        CharacteristicNotifyMethod, CharacteristicRead, CharacteristicReadRequest,
        CharacteristicWrite, CharacteristicWriteMethod, CharacteristicWriteRequest, Service,
    },
};
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tracing::{debug, warn};

use crate::{
    chunker::{EMIT_BUDGET, INITIAL_BACKOFF, INTER_CHUNK_PACE, MAX_BACKOFF},
    error::ProxyError,
};

/// Primary service UUID (`00001234-0000-1000-8000-00805f9b34fb`).
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_1234_0000_1000_8000_0080_5f9b_34fb);
/// Request characteristic UUID: write / write-without-response.
pub const REQUEST_CHAR_UUID: Uuid = Uuid::from_u128(0x0000_1235_0000_1000_8000_0080_5f9b_34fb);
/// Response characteristic UUID: read / notify.
pub const RESPONSE_CHAR_UUID: Uuid = Uuid::from_u128(0x0000_1236_0000_1000_8000_0080_5f9b_34fb);
/// Status characteristic UUID: read / notify.
pub const STATUS_CHAR_UUID: Uuid = Uuid::from_u128(0x0000_1237_0000_1000_8000_0080_5f9b_34fb);

/// Bluetooth SIG company identifier carried in the advertisement's
/// manufacturer-data blob, preserved from the original prototype for wire
/// compatibility with existing centrals.
const MANUFACTURER_ID: u16 = 0x0059;
/// Protocol version byte carried alongside [`MANUFACTURER_ID`].
const PROTOCOL_VERSION: u8 = 0x01;

/// Locate the first adapter exposed on the bus and ensure it is powered.
pub async fn open_adapter() -> Result<(Session, Adapter), ProxyError> {
    let session = Session::new().await?;
    let name = session
        .adapter_names()
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| ProxyError::Bus("no Bluetooth adapter present".to_string()))?;
    let adapter = session.adapter(&name)?;
    adapter.set_powered(true).await?;
    Ok((session, adapter))
}

/// Build the advertisement.
#[must_use]
pub fn build_advertisement(device_name: &str) -> Advertisement {
    let mut manufacturer_data = BTreeMap::new();
    manufacturer_data.insert(MANUFACTURER_ID, vec![PROTOCOL_VERSION]);

    Advertisement {
        service_uuids: [SERVICE_UUID].into_iter().collect(),
        manufacturer_data,
        discoverable: Some(true),
        local_name: Some(device_name.to_string()),
        tx_power: Some(true),
        ..Default::default()
    }
}

/// A slot holding the currently-subscribed notifier for one characteristic.
/// `None` when no central has active notifications enabled.
type NotifySlot = Arc<AsyncMutex<Option<CharacteristicNotifier>>>;

/// The channels and shared slots the executor in `lib.rs` uses to drive the
/// GATT application built by [`build_application`].
pub struct GattChannels {
    /// Raw bytes written to the Request characteristic, paired with the
    /// writing central's address (formatted as a string, since `bluer`'s
    /// local GATT API surfaces peer identity as a `Device1` address rather
    /// than the raw object path the original prototype keyed on) and the
    /// ATT MTU negotiated for that link, used to size the response's
    /// frames.
    pub request_rx: mpsc::UnboundedReceiver<(String, u16, Vec<u8>)>,
    /// The currently-subscribed Response characteristic notifier, if any.
    pub response_notifier: NotifySlot,
    /// The currently-subscribed Status characteristic notifier, if any.
    pub status_notifier: NotifySlot,
    /// Latest status snapshot bytes, served on a direct Status read and
    /// refreshed by the executor's periodic sampling tick.
    pub status_cell: Arc<AsyncMutex<Vec<u8>>>,
}

/// Build the three-characteristic GATT application described in the
/// service layout, returning it alongside the channels/slots the executor
/// drives it with.
#[must_use]
pub fn build_application() -> (Application, GattChannels) {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let response_notifier: NotifySlot = Arc::new(AsyncMutex::new(None));
    let status_notifier: NotifySlot = Arc::new(AsyncMutex::new(None));
    let status_cell = Arc::new(AsyncMutex::new(Vec::new()));

    let request_char = Characteristic {
        uuid: REQUEST_CHAR_UUID,
        write: Some(CharacteristicWrite {
            write: true,
            write_without_response: true,
            method: CharacteristicWriteMethod::Fun(Box::new(move |value, req: CharacteristicWriteRequest| {
                let request_tx = request_tx.clone();
                Box::pin(async move {
                    let device = req.device_address.to_string();
                    if request_tx.send((device, req.mtu, value)).is_err() {
                        warn!("request channel closed; dropping write");
                    }
                    Ok(())
                })
            })),
            ..Default::default()
        }),
        ..Default::default()
    };

    let response_char = {
        let slot = Arc::clone(&response_notifier);
        Characteristic {
            uuid: RESPONSE_CHAR_UUID,
            read: Some(CharacteristicRead {
                read: true,
                fun: Box::new(move |_req: CharacteristicReadRequest| {
                    Box::pin(async move { Ok(Vec::new()) })
                }),
                ..Default::default()
            }),
            notify: Some(CharacteristicNotify {
                notify: true,
                method: CharacteristicNotifyMethod::Fun(Box::new(move |notifier| {
                    Box::pin(hold_notifier(Arc::clone(&slot), notifier, "response"))
                })),
                ..Default::default()
            }),
            ..Default::default()
        }
    };

    let status_char = {
        let slot = Arc::clone(&status_notifier);
        let cell = Arc::clone(&status_cell);
        Characteristic {
            uuid: STATUS_CHAR_UUID,
            read: Some(CharacteristicRead {
                read: true,
                fun: Box::new(move |_req: CharacteristicReadRequest| {
                    let cell = Arc::clone(&cell);
                    Box::pin(async move { Ok(cell.lock().await.clone()) })
                }),
                ..Default::default()
            }),
            notify: Some(CharacteristicNotify {
                notify: true,
                method: CharacteristicNotifyMethod::Fun(Box::new(move |notifier| {
                    Box::pin(hold_notifier(Arc::clone(&slot), notifier, "status"))
                })),
                ..Default::default()
            }),
            ..Default::default()
        }
    };

    let app = Application {
        services: vec![Service {
            uuid: SERVICE_UUID,
            primary: true,
            characteristics: vec![request_char, response_char, status_char],
            ..Default::default()
        }],
        ..Default::default()
    };

    (app, GattChannels { request_rx, response_notifier, status_notifier, status_cell })
}

/// Parks a newly-subscribed notifier in `slot` until BlueZ reports the
/// central stopped notifications, then clears it. Frames are pushed
/// through the slot from worker tasks in `lib.rs`, not pulled here.
async fn hold_notifier(slot: NotifySlot, notifier: CharacteristicNotifier, label: &'static str) {
    debug!(characteristic = label, "central subscribed to notifications");
    *slot.lock().await = Some(notifier);

    loop {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let stopped = slot.lock().await.as_ref().is_none_or(CharacteristicNotifier::is_stopped);
        if stopped {
            break;
        }
    }

    *slot.lock().await = None;
    debug!(characteristic = label, "central unsubscribed");
}

/// Emit an already-chunked response through `slot`, retrying with
/// exponential backoff when no subscriber is present or a notification
/// fails, up to the shared [`EMIT_BUDGET`].
///
/// `sleep_fn` is injected so tests can collapse the backoff delay instead
/// of waiting on the wall clock.
pub async fn emit_frames<S, Fut>(
    slot: &NotifySlot,
    frames: &[nettool_proto::Frame],
    att_mtu: u16,
    mut sleep_fn: S,
) -> Result<usize, ProxyError>
where
    S: FnMut(Duration) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let mut elapsed = Duration::ZERO;
    let last = frames.len().saturating_sub(1);

    for (i, frame) in frames.iter().enumerate() {
        let wire = frame.encode(att_mtu)?;
        let mut backoff = INITIAL_BACKOFF;

        loop {
            let sent = {
                let mut guard = slot.lock().await;
                match guard.as_mut() {
                    Some(notifier) => notifier.notify(wire.to_vec()).await.is_ok(),
                    None => false,
                }
            };
            if sent {
                break;
            }
            if elapsed + backoff > EMIT_BUDGET {
                return Err(ProxyError::Lifecycle(format!(
                    "notification queue exhausted backoff budget after {i} of {} frames",
                    frames.len()
                )));
            }
            sleep_fn(backoff).await;
            elapsed += backoff;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }

        if i != last {
            sleep_fn(INTER_CHUNK_PACE).await;
        }
    }

    Ok(frames.len())
}
