//! Unix Socket Server
//!
//! Serves the control socket: status queries, sensor reads and manual relay
//! commands for idle vessels.
//!
//! # Limits
//! - **Message size**: lines over 8 KiB are rejected before buffering
//! - **Timeouts**: 30 s per read, 10 s per write
//! - **Connections**: at most 32 concurrent clients
//!
//! Controller calls take blocking locks, so every dispatch runs on the
//! blocking pool rather than the async worker.

use std::future::Future;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use bb_core::constants::ipc;
use bb_core::{BatchControlStatus, ControllerStatus, Relay, TemperatureController};
use bb_protocol::{
    ActuatorInfo, BatchInfo, RelayKind, Request, RequestEnvelope, Response, ResponseData,
    ResponseEnvelope, SensorInfo, StatusInfo,
};

// ============================================================================
// Constants
// ============================================================================

const MAX_MESSAGE_SIZE: usize = bb_protocol::MAX_MESSAGE_SIZE;

const READ_TIMEOUT: Duration = Duration::from_secs(ipc::READ_TIMEOUT_SECS);

const WRITE_TIMEOUT: Duration = Duration::from_secs(ipc::WRITE_TIMEOUT_SECS);

/// Owner and group read/write
const SOCKET_MODE: u32 = 0o660;

// ============================================================================
// Server
// ============================================================================

/// Accept clients until `shutdown` resolves, then remove the socket
pub async fn run_server<F>(
    socket_path: &Path,
    controller: Arc<TemperatureController>,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()>,
{
    if let Ok(metadata) = socket_path.symlink_metadata() {
        if metadata.file_type().is_symlink() {
            bail!("Socket path {} is a symlink, refusing to replace it", socket_path.display());
        }
        std::fs::remove_file(socket_path)
            .with_context(|| format!("Failed to remove stale socket {}", socket_path.display()))?;
        debug!("Removed existing socket file");
    }

    let listener = UnixListener::bind(socket_path)
        .with_context(|| format!("Failed to bind {}", socket_path.display()))?;
    std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(SOCKET_MODE))
        .with_context(|| format!("Failed to set permissions on {}", socket_path.display()))?;

    info!(
        socket = %socket_path.display(),
        mode = format_args!("{:o}", SOCKET_MODE),
        max_conn = ipc::MAX_CONNECTIONS,
        max_msg = MAX_MESSAGE_SIZE,
        "Control socket listening"
    );

    let connections = Arc::new(Semaphore::new(ipc::MAX_CONNECTIONS));
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let permit = match Arc::clone(&connections).try_acquire_owned() {
                            Ok(permit) => permit,
                            Err(_) => {
                                warn!("Connection limit reached ({}), rejecting client", ipc::MAX_CONNECTIONS);
                                drop(stream);
                                continue;
                            }
                        };
                        let controller = Arc::clone(&controller);
                        tokio::spawn(async move {
                            handle_client(stream, controller).await;
                            drop(permit);
                        });
                    }
                    Err(e) => error!("Accept error: {}", e),
                }
            }
            _ = &mut shutdown => {
                info!("Control socket shutting down");
                break;
            }
        }
    }

    if let Err(e) = std::fs::remove_file(socket_path) {
        warn!("Failed to remove socket {}: {}", socket_path.display(), e);
    }
    Ok(())
}

/// Client credentials from the Unix socket peer
#[derive(Debug, Clone, Copy)]
struct PeerCredentials {
    uid: u32,
    pid: i32,
}

async fn handle_client(stream: UnixStream, controller: Arc<TemperatureController>) {
    let cred = peer_credentials(&stream);
    match cred {
        Some(c) => debug!(uid = c.uid, pid = c.pid, "Client connected"),
        None => debug!("Client connected (credentials unavailable)"),
    }

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line: Vec<u8> = Vec::with_capacity(MAX_MESSAGE_SIZE);
    let mut request_count: u64 = 0;
    let connection_start = Instant::now();

    loop {
        let read_result =
            timeout(READ_TIMEOUT, read_line_bounded(&mut reader, &mut line, MAX_MESSAGE_SIZE)).await;

        match read_result {
            Ok(Ok(0)) => {
                debug!(
                    requests = request_count,
                    duration = ?connection_start.elapsed(),
                    "Client disconnected"
                );
                break;
            }
            Ok(Ok(n)) => {
                request_count += 1;
                trace!("Request #{}: {} bytes", request_count, n);

                let response = match std::str::from_utf8(&line) {
                    Ok(text) => process_request(text, cred, &controller).await,
                    Err(_) => ResponseEnvelope::new(0, Response::error("Invalid request encoding")),
                };
                if send_response(&mut writer, &response).await.is_err() {
                    break;
                }
            }
            Ok(Err(e)) => {
                if e.kind() == std::io::ErrorKind::InvalidData {
                    warn!("Message too large (>{} bytes)", MAX_MESSAGE_SIZE);
                    let response = ResponseEnvelope::new(0, Response::error("Message too large"));
                    let _ = send_response(&mut writer, &response).await;
                } else {
                    error!("Read error: {}", e);
                }
                break;
            }
            Err(_) => {
                debug!("Read timeout");
                let response = ResponseEnvelope::new(0, Response::error("Read timeout"));
                let _ = send_response(&mut writer, &response).await;
                break;
            }
        }
    }
}

/// Read one newline-terminated line without buffering more than `max_len`
async fn read_line_bounded<R: tokio::io::AsyncBufRead + Unpin>(
    reader: &mut R,
    out: &mut Vec<u8>,
    max_len: usize,
) -> std::io::Result<usize> {
    out.clear();

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(out.len());
        }

        let (take_len, found_newline) = match available.iter().position(|b| *b == b'\n') {
            Some(pos) => (pos + 1, true),
            None => (available.len(), false),
        };

        let remaining = max_len.saturating_sub(out.len());
        if take_len > remaining {
            let consume_len = remaining.min(available.len());
            reader.consume(consume_len);
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "Message too large",
            ));
        }

        out.extend_from_slice(&available[..take_len]);
        reader.consume(take_len);

        if found_newline {
            return Ok(out.len());
        }
    }
}

async fn send_response(
    writer: &mut tokio::net::unix::OwnedWriteHalf,
    response: &ResponseEnvelope,
) -> Result<(), ()> {
    let json = serde_json::to_string(response).unwrap_or_else(|_| {
        r#"{"id":0,"status":"error","message":"Serialization error"}"#.to_string()
    });

    let write_result = timeout(WRITE_TIMEOUT, async {
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        Ok::<_, std::io::Error>(())
    })
    .await;

    match write_result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!("Write error: {}", e);
            Err(())
        }
        Err(_) => {
            error!("Write timeout");
            Err(())
        }
    }
}

#[cfg(target_os = "linux")]
fn peer_credentials(stream: &UnixStream) -> Option<PeerCredentials> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: ucred is a plain C struct; all-zero is a valid value.
    let mut cred: libc::ucred = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

    // SAFETY: the fd belongs to a live socket and cred/len describe a buffer of the right size.
    let result = unsafe {
        libc::getsockopt(
            stream.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_PEERCRED,
            &mut cred as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };

    (result == 0).then_some(PeerCredentials { uid: cred.uid, pid: cred.pid })
}

#[cfg(not(target_os = "linux"))]
fn peer_credentials(_stream: &UnixStream) -> Option<PeerCredentials> {
    None
}

// ============================================================================
// Dispatch
// ============================================================================

async fn process_request(
    line: &str,
    cred: Option<PeerCredentials>,
    controller: &Arc<TemperatureController>,
) -> ResponseEnvelope {
    let envelope: RequestEnvelope = match serde_json::from_str(line.trim()) {
        Ok(e) => e,
        Err(e) => {
            debug!("Invalid JSON request: {}", e);
            return ResponseEnvelope::new(0, Response::error("Invalid request format"));
        }
    };

    let request_id = envelope.id;
    let request = envelope.request;

    if let Err(e) = request.validate() {
        warn!(id = request_id, "Request validation failed: {}", e);
        return ResponseEnvelope::new(request_id, Response::error(e));
    }

    debug!(id = request_id, request = request.type_name(), "Processing request");

    if let Request::ManualControl { vessel_id, relay, on } = &request {
        info!(
            uid = cred.map(|c| c.uid),
            pid = cred.map(|c| c.pid),
            vessel_id,
            relay = ?relay,
            on,
            "AUDIT: manual relay command"
        );
    }

    let controller = Arc::clone(controller);
    let response = match tokio::task::spawn_blocking(move || dispatch(&controller, request)).await {
        Ok(response) => response,
        Err(e) => {
            error!(id = request_id, "Request handler failed: {}", e);
            Response::error("Internal error")
        }
    };

    ResponseEnvelope::new(request_id, response)
}

/// Run one validated request against the controller
fn dispatch(controller: &TemperatureController, request: Request) -> Response {
    match request {
        Request::Ping => Response::ok_string("pong"),

        Request::Version => Response::ok_string(env!("CARGO_PKG_VERSION")),

        Request::Status => Response::Ok(ResponseData::controller(status_info(&controller.status()))),

        Request::ListSensors => match controller.sensor_status() {
            Ok(readings) => Response::Ok(ResponseData::sensor_list(
                readings
                    .into_iter()
                    .map(|r| SensorInfo {
                        sensor_id: r.sensor_id,
                        connected: r.connected,
                        temperature: r.temperature,
                    })
                    .collect(),
            )),
            Err(e) => Response::error(e.to_string()),
        },

        Request::ReadSensor { sensor_id } => {
            match controller.hardware().read_temperature(&sensor_id) {
                Ok(celsius) => Response::ok_temp(celsius),
                Err(e) => Response::error(e.to_string()),
            }
        }

        Request::ManualControl { vessel_id, relay, on } => {
            match controller.manual_override(vessel_id, relay_of(relay), on) {
                Ok(()) => Response::ok(),
                Err(e) => Response::error(e.to_string()),
            }
        }
    }
}

fn relay_of(kind: RelayKind) -> Relay {
    match kind {
        RelayKind::Heater => Relay::Heater,
        RelayKind::Chiller => Relay::Chiller,
    }
}

fn status_info(status: &ControllerStatus) -> StatusInfo {
    StatusInfo {
        running: status.running,
        hardware_mode: status.hardware_mode.to_string(),
        tick_count: status.tick_count,
        last_tick: status.last_tick.map(|t| t.to_rfc3339()),
        last_error: status.last_error.clone(),
        batches: status.batches.iter().map(batch_info).collect(),
        actuators: status
            .actuators
            .iter()
            .map(|a| ActuatorInfo { pin: a.pin, on: a.on })
            .collect(),
    }
}

fn batch_info(batch: &BatchControlStatus) -> BatchInfo {
    BatchInfo {
        batch_id: batch.batch_id,
        batch_name: batch.batch_name.clone(),
        vessel_id: batch.vessel_id,
        vessel_name: batch.vessel_name.clone(),
        sensor_id: batch.sensor_id.clone(),
        heater_on: batch.heater_on,
        chiller_on: batch.chiller_on,
        actual_celsius: batch.actual_celsius,
        target_celsius: batch.target_celsius,
        control_state: batch.control_state.map(|s| s.as_str().to_string()),
        phase_index: batch.phase_index,
        phase_progress: batch.phase_progress,
        sensor_timed_out: batch.sensor_timed_out,
        last_error: batch.last_error.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bb_core::{ControlSettings, HardwareManager, MemoryStore, Vessel};

    fn controller_with_idle_vessel() -> Arc<TemperatureController> {
        let store = Arc::new(MemoryStore::new());
        store.insert_vessel(Vessel {
            id: 3,
            name: "FV3".into(),
            sensor_id: "28-00000001".into(),
            heater_pin: 5,
            chiller_pin: 6,
            relay_cycle_count: 0,
        });
        Arc::new(TemperatureController::new(
            Arc::new(HardwareManager::simulated()),
            store,
            ControlSettings::default(),
        ))
    }

    #[tokio::test]
    async fn test_read_line_bounded() {
        let mut input: &[u8] = b"{\"id\":1}\n{\"id\":2}\n";
        let mut line = Vec::new();

        assert_eq!(read_line_bounded(&mut input, &mut line, 64).await.unwrap(), 9);
        assert_eq!(line, b"{\"id\":1}\n");
        read_line_bounded(&mut input, &mut line, 64).await.unwrap();
        assert_eq!(line, b"{\"id\":2}\n");
        assert_eq!(read_line_bounded(&mut input, &mut line, 64).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_read_line_bounded_rejects_oversized() {
        let long = vec![b'x'; 100];
        let mut input: &[u8] = &long;
        let mut line = Vec::new();

        let err = read_line_bounded(&mut input, &mut line, 32).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_dispatch_sensors() {
        let controller = controller_with_idle_vessel();

        match dispatch(&controller, Request::ListSensors) {
            Response::Ok(data) => {
                let sensors = data.sensors.unwrap();
                assert_eq!(sensors.len(), 4);
                assert!(sensors.iter().all(|s| s.connected && s.temperature.is_some()));
            }
            other => panic!("unexpected response: {:?}", other),
        }

        assert!(matches!(
            dispatch(&controller, Request::ReadSensor { sensor_id: "28-00000003".into() }),
            Response::Ok(ResponseData { celsius: Some(_), .. })
        ));
        assert!(matches!(
            dispatch(&controller, Request::ReadSensor { sensor_id: "28-missing".into() }),
            Response::Error { .. }
        ));
    }

    #[test]
    fn test_dispatch_manual_control_and_status() {
        let controller = controller_with_idle_vessel();

        let response = dispatch(
            &controller,
            Request::ManualControl { vessel_id: 3, relay: RelayKind::Heater, on: true },
        );
        assert_eq!(response, Response::ok());

        match dispatch(&controller, Request::Status) {
            Response::Ok(data) => {
                let status = data.status.unwrap();
                assert!(!status.running);
                assert_eq!(status.hardware_mode, "simulated");
                assert!(status.batches.is_empty());
                assert_eq!(status.actuators, vec![ActuatorInfo { pin: 5, on: true }]);
            }
            other => panic!("unexpected response: {:?}", other),
        }

        assert!(matches!(
            dispatch(&controller, Request::ManualControl { vessel_id: 42, relay: RelayKind::Chiller, on: true }),
            Response::Error { .. }
        ));
        controller.stop();
    }

    #[tokio::test]
    async fn test_process_request_rejects_bad_input() {
        let controller = controller_with_idle_vessel();

        let response = process_request("not json", None, &controller).await;
        assert_eq!(response.id, 0);
        assert!(matches!(response.response, Response::Error { .. }));

        let response = process_request(
            r#"{"id":5,"cmd":"ReadSensor","data":{"sensor_id":"../../etc/passwd"}}"#,
            None,
            &controller,
        )
        .await;
        assert_eq!(response.id, 5);
        assert!(matches!(response.response, Response::Error { .. }));
    }

    #[tokio::test]
    async fn test_socket_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("brewbuddy.sock");
        let controller = controller_with_idle_vessel();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let server = {
            let socket_path = socket_path.clone();
            let controller = Arc::clone(&controller);
            tokio::spawn(async move {
                run_server(&socket_path, controller, async {
                    let _ = stop_rx.await;
                })
                .await
            })
        };

        let mut stream = None;
        for _ in 0..100 {
            if let Ok(s) = UnixStream::connect(&socket_path).await {
                stream = Some(s);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let mut stream = stream.expect("server never came up");

        let (read_half, mut write_half) = stream.split();
        let mut reader = BufReader::new(read_half);
        let mut reply = String::new();

        write_half.write_all(b"{\"id\":11,\"cmd\":\"Ping\"}\n").await.unwrap();
        reader.read_line(&mut reply).await.unwrap();
        let envelope: ResponseEnvelope = serde_json::from_str(&reply).unwrap();
        assert_eq!(envelope.id, 11);
        assert_eq!(envelope.response, Response::ok_string("pong"));

        reply.clear();
        write_half.write_all(b"{\"id\":12,\"cmd\":\"Status\"}\n").await.unwrap();
        reader.read_line(&mut reply).await.unwrap();
        let envelope: ResponseEnvelope = serde_json::from_str(&reply).unwrap();
        assert_eq!(envelope.id, 12);
        match envelope.response {
            Response::Ok(data) => assert_eq!(data.status.unwrap().hardware_mode, "simulated"),
            other => panic!("unexpected response: {:?}", other),
        }
        drop(reader);
        drop(stream);

        stop_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
        assert!(!socket_path.exists());
        controller.stop();
    }
}
