//! NetTool: a BLE GATT peripheral that proxies framed HTTP/1.1 requests to
//! a local HTTP server.
//!
//! The crate is layered the way the admission logic in [`driver`] expects:
//! a pure, synchronous [`driver::ProxyDriver`] decides what should happen
//! in response to an event, and everything below this module line is the
//! async executor that gets those decisions onto the wire — `gatt` for the
//! BlueZ D-Bus binding, `origin` for the HTTP client, `chunker` for
//! response framing, `registry` for per-central worker cancellation, and
//! `lifecycle` for the status file and signal handling `main.rs` uses.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod chunker;
mod driver;
mod error;
mod gatt;
mod lifecycle;
pub mod origin;
pub mod registry;
mod system_env;

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use nettool_core::stats::SnapshotContext;
use sysinfo::System;
use tokio::sync::{Mutex as TokioMutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

pub use crate::{
    driver::{LogLevel, ProxyAction, ProxyDriver, ProxyEvent},
    error::{OriginError, ProxyError},
    lifecycle::write_status_file,
    system_env::SystemEnv,
};

/// Everything `main.rs`'s CLI parses before handing off to [`run`].
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// The BLE advertised/local name (default `"NetTool"`).
    pub device_name: String,
    /// Port of the local HTTP origin every request is forwarded to.
    pub http_port: u16,
    /// Path to the status file kept alongside the Status characteristic.
    pub status_file: PathBuf,
    /// Maximum number of concurrently in-flight origin requests.
    pub max_concurrent_requests: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            device_name: "NetTool".to_string(),
            http_port: 8080,
            status_file: PathBuf::from("/tmp/nettool_ble_proxy.status"),
            max_concurrent_requests: 16,
        }
    }
}

/// Interval between reassembly-table GC sweeps.
const GC_INTERVAL: Duration = Duration::from_secs(10);

/// Shared state threaded through every background task and the request
/// loop, grouped so spawned tasks only need to clone one handle each.
#[derive(Clone)]
struct Executor {
    driver: Arc<TokioMutex<ProxyDriver<SystemEnv>>>,
    mtu_by_device: Arc<TokioMutex<HashMap<String, u16>>>,
    response_notifier: Arc<TokioMutex<Option<bluer::gatt::local::CharacteristicNotifier>>>,
    semaphore: Arc<Semaphore>,
    http_port: u16,
    env: SystemEnv,
}

impl Executor {
    /// Interpret one batch of actions, spawning worker tasks as needed.
    async fn dispatch(&self, actions: Vec<ProxyAction>) {
        for action in actions {
            match action {
                ProxyAction::Log { level, message } => log_action(level, &message),
                ProxyAction::DispatchRequest { correlation_id, device_path, request } => {
                    self.spawn_request_worker(correlation_id, device_path, request);
                },
                ProxyAction::RespondSynthesized { correlation_id, device_path, response } => {
                    self.emit_response(correlation_id, &device_path, &response).await;
                },
            }
        }
    }

    fn spawn_request_worker(
        &self,
        correlation_id: nettool_proto::CorrelationId,
        device_path: String,
        request_bytes: Vec<u8>,
    ) {
        let executor = self.clone();
        let request_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("request", %request_id, %device_path);

        tokio::spawn(
            async move {
                let Ok(permit) = executor.semaphore.clone().acquire_owned().await else {
                    error!("worker semaphore closed; dropping request");
                    return;
                };

                let token = executor.driver.lock().await.spawn_worker_token(&device_path, correlation_id);

                let response = tokio::select! {
                    () = token.cancelled() => {
                        debug!("worker cancelled before origin call completed");
                        drop(permit);
                        executor.driver.lock().await.worker_finished(&device_path, &correlation_id);
                        return;
                    }
                    response = executor.handle_request(&request_bytes) => response,
                };

                executor.emit_response(correlation_id, &device_path, &response).await;
                executor.driver.lock().await.worker_finished(&device_path, &correlation_id);
                drop(permit);
            }
            .instrument(span),
        );
    }

    async fn handle_request(&self, request_bytes: &[u8]) -> nettool_proto::HttpResponse {
        let request = match nettool_proto::http::parse_request(request_bytes) {
            Ok(request) => request,
            Err(err) => return origin::bad_request_response(&err.to_string()),
        };

        match origin::forward(&request, self.http_port).await {
            Ok(response) => response,
            Err(OriginError::Timeout { .. }) => origin::gateway_timeout_response(),
            Err(OriginError::Unreachable { .. }) => origin::bad_gateway_response(),
            Err(OriginError::MalformedResponse(_) | OriginError::ResponseTooLarge { .. }) => {
                origin::internal_error_response()
            },
        }
    }

    async fn emit_response(
        &self,
        correlation_id: nettool_proto::CorrelationId,
        device_path: &str,
        response: &nettool_proto::HttpResponse,
    ) {
        let att_mtu = *self.mtu_by_device.lock().await.get(device_path).unwrap_or(&23);
        let frames = chunker::frames_for_response(response, correlation_id, att_mtu);

        match gatt::emit_frames(&self.response_notifier, &frames, att_mtu, |d| self.env_sleep(d)).await {
            Ok(count) => {
                let bytes: u64 = frames.iter().map(|f| f.payload.len() as u64).sum();
                self.driver.lock().await.record_bytes_sent(bytes);
                debug!(%device_path, frame_count = count, "emitted response");
            },
            Err(err) => warn!(%device_path, error = %err, "abandoned response emission"),
        }
    }

    fn env_sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        nettool_core::Environment::sleep(&self.env, duration)
    }
}

fn log_action(level: LogLevel, message: &str) {
    match level {
        LogLevel::Debug => debug!("{message}"),
        LogLevel::Info => info!("{message}"),
        LogLevel::Warn => warn!("{message}"),
        LogLevel::Error => error!("{message}"),
    }
}

/// Run the proxy until a termination signal arrives. Performs adapter
/// discovery, GATT application/advertisement registration, and the
/// request/GC/status sampling loops, then tears everything down cleanly
/// on shutdown.
pub async fn run(config: ProxyConfig) -> Result<(), ProxyError> {
    lifecycle::write_status_file(&config.status_file, "starting", config.http_port)?;

    let (_session, adapter) = gatt::open_adapter().await?;
    let (app, mut channels) = gatt::build_application();
    let app_handle = adapter.serve_gatt_application(app).await?;
    let advertisement = gatt::build_advertisement(&config.device_name);
    let adv_handle = adapter.advertise(advertisement).await?;

    info!(device_name = %config.device_name, http_port = config.http_port, "adapter ready, application registered");

    let executor = Executor {
        driver: Arc::new(TokioMutex::new(ProxyDriver::new(SystemEnv::new()))),
        mtu_by_device: Arc::new(TokioMutex::new(HashMap::new())),
        response_notifier: channels.response_notifier.clone(),
        semaphore: Arc::new(Semaphore::new(config.max_concurrent_requests)),
        http_port: config.http_port,
        env: SystemEnv::new(),
    };

    let root_cancel = CancellationToken::new();

    let gc_task = tokio::spawn(gc_loop(executor.clone(), root_cancel.clone()));
    let status_task = tokio::spawn(status_loop(
        executor.clone(),
        channels.status_notifier.clone(),
        channels.status_cell.clone(),
        config.http_port,
        root_cancel.clone(),
    ));
    let events_task = tokio::spawn(device_events_loop(adapter.clone(), executor.clone(), root_cancel.clone()));

    lifecycle::write_status_file(&config.status_file, "running", config.http_port)?;

    loop {
        tokio::select! {
            biased;
            () = root_cancel.cancelled() => break,
            shutdown = lifecycle::wait_for_shutdown_signal() => {
                shutdown?;
                break;
            }
            Some((device, mtu, bytes)) = channels.request_rx.recv() => {
                executor.mtu_by_device.lock().await.insert(device.clone(), mtu);
                let actions = executor.driver.lock().await.handle_event(ProxyEvent::RequestWrite {
                    device_path: device,
                    bytes,
                });
                executor.dispatch(actions).await;
            }
        }
    }

    info!("shutting down");
    root_cancel.cancel();
    executor.driver.lock().await.cancel_all_workers();
    gc_task.abort();
    status_task.abort();
    events_task.abort();

    drop(adv_handle);
    drop(app_handle);

    lifecycle::write_status_file(&config.status_file, "stopped", config.http_port)?;
    Ok(())
}

async fn gc_loop(executor: Executor, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(GC_INTERVAL);
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {
                let actions = executor.driver.lock().await.handle_event(ProxyEvent::GcTick);
                executor.dispatch(actions).await;
            }
        }
    }
}

async fn status_loop(
    executor: Executor,
    status_notifier: Arc<TokioMutex<Option<bluer::gatt::local::CharacteristicNotifier>>>,
    status_cell: Arc<TokioMutex<Vec<u8>>>,
    http_port: u16,
    cancel: CancellationToken,
) {
    let start = Instant::now();
    let mut system = System::new_all();
    let mut ticker = tokio::time::interval(nettool_core::stats::SNAPSHOT_NOTIFY_INTERVAL);

    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {
                system.refresh_cpu_usage();
                system.refresh_memory();

                let cpu_percent = system.cpus().first().map(sysinfo::Cpu::cpu_usage);
                let memory_percent = if system.total_memory() == 0 {
                    None
                } else {
                    Some((system.used_memory() as f32 / system.total_memory() as f32) * 100.0)
                };

                let context = SnapshotContext {
                    status: "running",
                    uptime_secs: start.elapsed().as_secs(),
                    http_port,
                    cpu_percent,
                    memory_percent,
                };

                let snapshot = executor.driver.lock().await.snapshot(context);
                let Ok(bytes) = snapshot.to_json_bytes() else {
                    warn!("failed to serialize status snapshot");
                    continue;
                };

                *status_cell.lock().await = bytes.clone();

                let mut guard = status_notifier.lock().await;
                if let Some(notifier) = guard.as_mut() {
                    if let Err(err) = notifier.notify(bytes).await {
                        warn!(error = %err, "status notify failed");
                    }
                }
            }
        }
    }
}

async fn device_events_loop(adapter: bluer::Adapter, executor: Executor, cancel: CancellationToken) {
    use futures::StreamExt;

    let events = match adapter.events().await {
        Ok(events) => events,
        Err(err) => {
            error!(error = %err, "failed to subscribe to adapter events; connection tracking disabled");
            return;
        },
    };
    tokio::pin!(events);

    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            event = events.next() => {
                let Some(event) = event else { return };
                let proxy_event = match event {
                    bluer::AdapterEvent::DeviceAdded(address) => {
                        Some(ProxyEvent::CentralConnected { device_path: address.to_string() })
                    },
                    bluer::AdapterEvent::DeviceRemoved(address) => {
                        Some(ProxyEvent::CentralDisconnected { device_path: address.to_string() })
                    },
                    bluer::AdapterEvent::PropertyChanged(_) => None,
                };
                if let Some(proxy_event) = proxy_event {
                    let actions = executor.driver.lock().await.handle_event(proxy_event);
                    executor.dispatch(actions).await;
                }
            }
        }
    }
}
