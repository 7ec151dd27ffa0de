//! Control socket protocol for BrewBuddy
//!
//! Line-delimited JSON over a Unix socket. Each line is one
//! [`RequestEnvelope`]; the daemon answers with one [`ResponseEnvelope`]
//! echoing the request id.
//!
//! ```text
//! {"id":7,"cmd":"ReadSensor","data":{"sensor_id":"28-00000001"}}
//! {"id":7,"status":"ok","celsius":18.06}
//! ```

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Global request ID counter for correlation
static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Maximum message size for IPC (8KB)
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024;

/// Longest sensor identifier accepted over the socket
const MAX_SENSOR_ID_LENGTH: usize = 64;

/// Generate a unique request ID for correlation
pub fn generate_request_id() -> u64 {
    REQUEST_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Unique request ID for correlation and debugging
    pub id: u64,
    /// The actual request
    #[serde(flatten)]
    pub request: Request,
}

impl RequestEnvelope {
    pub fn new(request: Request) -> Self {
        Self {
            id: generate_request_id(),
            request,
        }
    }

    pub fn with_id(request: Request, id: u64) -> Self {
        Self { id, request }
    }
}

/// Relay selector for manual control
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RelayKind {
    Heater,
    Chiller,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd", content = "data")]
pub enum Request {
    Ping,
    Version,
    /// Controller status: tracked batches, last samples, relay levels
    Status,
    /// Read every probe the hardware backend can see
    ListSensors,
    ReadSensor { sensor_id: String },
    /// Drive a relay of a vessel with no active batch
    ManualControl { vessel_id: i64, relay: RelayKind, on: bool },
}

impl Request {
    /// Validate request parameters before dispatch
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Request::Ping | Request::Version | Request::Status | Request::ListSensors => Ok(()),
            Request::ReadSensor { sensor_id } => validate_sensor_id(sensor_id),
            Request::ManualControl { vessel_id, .. } => {
                if *vessel_id <= 0 {
                    return Err(format!("Invalid vessel id: {}", vessel_id));
                }
                Ok(())
            }
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Request::Ping => "Ping",
            Request::Version => "Version",
            Request::Status => "Status",
            Request::ListSensors => "ListSensors",
            Request::ReadSensor { .. } => "ReadSensor",
            Request::ManualControl { .. } => "ManualControl",
        }
    }

    /// Requests that change relay state
    pub fn is_mutating(&self) -> bool {
        matches!(self, Request::ManualControl { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Request ID this response corresponds to
    pub id: u64,
    /// The actual response
    #[serde(flatten)]
    pub response: Response,
}

impl ResponseEnvelope {
    pub fn new(id: u64, response: Response) -> Self {
        Self { id, response }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status")]
pub enum Response {
    #[serde(rename = "ok")]
    Ok(ResponseData),
    #[serde(rename = "error")]
    Error { message: String },
}

/// Response payload; exactly one field is set per request type
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResponseData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub celsius: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensors: Option<Vec<SensorInfo>>,
}

impl ResponseData {
    pub fn none() -> Self { Self::default() }
    pub fn string(v: String) -> Self { Self { value: Some(v), ..Self::default() } }
    pub fn temperature(c: f64) -> Self { Self { celsius: Some(c), ..Self::default() } }
    pub fn controller(s: StatusInfo) -> Self { Self { status: Some(s), ..Self::default() } }
    pub fn sensor_list(s: Vec<SensorInfo>) -> Self { Self { sensors: Some(s), ..Self::default() } }
}

/// Controller status as reported over the socket
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusInfo {
    pub running: bool,
    pub hardware_mode: String,
    pub tick_count: u64,
    /// RFC 3339 timestamp of the last tick
    pub last_tick: Option<String>,
    pub last_error: Option<String>,
    pub batches: Vec<BatchInfo>,
    pub actuators: Vec<ActuatorInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchInfo {
    pub batch_id: i64,
    pub batch_name: String,
    pub vessel_id: i64,
    pub vessel_name: String,
    pub sensor_id: String,
    pub heater_on: bool,
    pub chiller_on: bool,
    pub actual_celsius: Option<f64>,
    pub target_celsius: Option<f64>,
    /// heating, cooling or idle
    pub control_state: Option<String>,
    pub phase_index: Option<usize>,
    pub phase_progress: Option<f64>,
    pub sensor_timed_out: bool,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensorInfo {
    pub sensor_id: String,
    pub connected: bool,
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActuatorInfo {
    pub pin: u32,
    pub on: bool,
}

impl Response {
    pub fn ok() -> Self {
        Response::Ok(ResponseData::none())
    }

    pub fn ok_string(s: impl Into<String>) -> Self {
        Response::Ok(ResponseData::string(s.into()))
    }

    pub fn ok_temp(t: f64) -> Self {
        Response::Ok(ResponseData::temperature(t))
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Response::Error { message: msg.into() }
    }
}

/// Sensor ids must be plain identifiers (they become sysfs path components)
pub fn validate_sensor_id(sensor_id: &str) -> Result<(), String> {
    if sensor_id.is_empty() {
        return Err("Sensor id cannot be empty".into());
    }
    if sensor_id.len() > MAX_SENSOR_ID_LENGTH {
        return Err(format!(
            "Sensor id too long: {} > {} chars",
            sensor_id.len(),
            MAX_SENSOR_ID_LENGTH
        ));
    }
    if sensor_id.starts_with('.') {
        return Err("Sensor id cannot start with '.'".into());
    }
    if let Some(c) = sensor_id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(format!("Sensor id contains forbidden character {:?}", c));
    }
    Ok(())
}
