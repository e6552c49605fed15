mod telemetry;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use clap::Parser;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use telemetry::Garden;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Local stand-in for the IoT platform, publishing a simulated garden.
#[derive(Parser, Debug)]
#[command(name = "simulator")]
struct Cli {
    #[arg(long, env = "SIM_ADDR", default_value = "127.0.0.1:9090")]
    addr: String,

    #[arg(long, env = "SIM_USERNAME", default_value = "tenant@thingsboard.org")]
    username: String,

    #[arg(long, env = "SIM_PASSWORD", default_value = "tenant")]
    password: String,

    /// Milliseconds between telemetry frames
    #[arg(long, env = "SIM_INTERVAL_MS", default_value_t = 2000)]
    interval_ms: u64,
}

struct Sim {
    username: String,
    password: String,
    interval: Duration,
    tokens: RwLock<HashSet<String>>,
    garden: RwLock<Garden>,
    attributes: RwLock<HashMap<String, Value>>,
}

type SharedSim = Arc<Sim>;

impl Sim {
    async fn authorized(&self, headers: &HeaderMap) -> bool {
        let token = headers
            .get("X-Authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        match token {
            Some(token) => self.tokens.read().await.contains(token),
            None => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: String,
}

#[derive(Debug, Deserialize)]
struct RpcRequest {
    method: String,
    params: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimeseriesQuery {
    keys: String,
    start_ts: i64,
    end_ts: i64,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    100
}

#[derive(Debug, Deserialize)]
struct KeysQuery {
    #[serde(default)]
    keys: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting garden platform simulator");
    info!("Login: {} / ****, frame interval: {}ms", cli.username, cli.interval_ms);

    let sim: SharedSim = Arc::new(Sim {
        username: cli.username,
        password: cli.password,
        interval: Duration::from_millis(cli.interval_ms),
        tokens: RwLock::new(HashSet::new()),
        garden: RwLock::new(Garden::default()),
        attributes: RwLock::new(HashMap::new()),
    });

    let app = Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/ws/plugins/telemetry", get(telemetry_socket))
        .route("/api/plugins/rpc/oneway/:device_id", post(one_way_rpc))
        .route(
            "/api/plugins/telemetry/DEVICE/:device_id/values/timeseries",
            get(timeseries),
        )
        .route(
            "/api/plugins/telemetry/DEVICE/:device_id/values/attributes/SHARED_SCOPE",
            get(shared_attributes),
        )
        .route(
            "/api/plugins/telemetry/DEVICE/:device_id/attributes/SHARED_SCOPE",
            post(save_shared_attributes),
        )
        .with_state(sim);

    let listener = match tokio::net::TcpListener::bind(&cli.addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", cli.addr, e);
            std::process::exit(1);
        }
    };
    info!("Simulator listening on {}", cli.addr);

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Simulator server error: {}", e);
    }
}

async fn login(State(sim): State<SharedSim>, Json(request): Json<LoginRequest>) -> Response {
    if request.username != sim.username || request.password != sim.password {
        warn!("Rejected login for {}", request.username);
        return (StatusCode::UNAUTHORIZED, "Invalid username or password").into_response();
    }

    let token = uuid::Uuid::new_v4().to_string();
    sim.tokens.write().await.insert(token.clone());
    info!("Issued token for {}", request.username);
    Json(json!({ "token": token })).into_response()
}

async fn telemetry_socket(
    State(sim): State<SharedSim>,
    Query(query): Query<TokenQuery>,
    upgrade: WebSocketUpgrade,
) -> Response {
    if !sim.tokens.read().await.contains(&query.token) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    upgrade.on_upgrade(move |socket| publish_telemetry(socket, sim))
}

/// Waits for the subscription command, then pushes a frame every interval.
async fn publish_telemetry(mut socket: WebSocket, sim: SharedSim) {
    let device_id = match socket.recv().await {
        Some(Ok(Message::Text(text))) => subscribed_device(&text),
        _ => None,
    };
    let Some(device_id) = device_id else {
        warn!("Socket closed without a telemetry subscription");
        return;
    };
    info!("Client subscribed to {}", device_id);

    let mut ticker = tokio::time::interval(sim.interval);
    let mut sent = 0u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let frame = {
                    let mut garden = sim.garden.write().await;
                    garden.step(&mut rand::thread_rng());
                    garden.frame(1, Utc::now().timestamp_millis(), &mut rand::thread_rng())
                };
                if socket.send(Message::Text(frame.to_string())).await.is_err() {
                    break;
                }
                sent += 1;
                if sent % 100 == 0 {
                    info!("Published {} frames", sent);
                }
            }
            message = socket.recv() => {
                match message {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    info!("Telemetry socket for {} closed after {} frames", device_id, sent);
}

fn subscribed_device(command: &str) -> Option<String> {
    let command: Value = serde_json::from_str(command).ok()?;
    command["tsSubCmds"][0]["entityId"]
        .as_str()
        .map(str::to_string)
}

async fn one_way_rpc(
    State(sim): State<SharedSim>,
    Path(device_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<RpcRequest>,
) -> StatusCode {
    if !sim.authorized(&headers).await {
        return StatusCode::UNAUTHORIZED;
    }

    match (request.method.as_str(), request.params.as_bool()) {
        ("setPump", Some(on)) => {
            info!("Device {}: pump {}", device_id, if on { "on" } else { "off" });
            sim.garden.write().await.pump_on = on;
            StatusCode::OK
        }
        _ => {
            warn!("Unsupported RPC {} {}", request.method, request.params);
            StatusCode::BAD_REQUEST
        }
    }
}

async fn timeseries(
    State(sim): State<SharedSim>,
    Path(device_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<TimeseriesQuery>,
) -> Response {
    if !sim.authorized(&headers).await {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    debug!("History for {}: {}", device_id, query.keys);

    let mut rng = rand::thread_rng();
    let mut response = Map::new();
    for key in query.keys.split(',') {
        let points = telemetry::history(key, query.start_ts, query.end_ts, query.limit, &mut rng);
        if !points.is_empty() {
            response.insert(key.to_string(), Value::Array(points));
        }
    }
    Json(Value::Object(response)).into_response()
}

async fn shared_attributes(
    State(sim): State<SharedSim>,
    headers: HeaderMap,
    Query(query): Query<KeysQuery>,
) -> Response {
    if !sim.authorized(&headers).await {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let attributes = sim.attributes.read().await;
    let entries: Vec<Value> = query
        .keys
        .split(',')
        .filter_map(|key| {
            attributes.get(key).map(|value| {
                json!({
                    "key": key,
                    "value": value,
                    "lastUpdateTs": Utc::now().timestamp_millis(),
                })
            })
        })
        .collect();
    Json(entries).into_response()
}

async fn save_shared_attributes(
    State(sim): State<SharedSim>,
    headers: HeaderMap,
    Json(body): Json<Map<String, Value>>,
) -> StatusCode {
    if !sim.authorized(&headers).await {
        return StatusCode::UNAUTHORIZED;
    }

    let mut attributes = sim.attributes.write().await;
    for (key, value) in body {
        debug!("Stored shared attribute {}", key);
        attributes.insert(key, value);
    }
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribed_device() {
        let command = r#"{"tsSubCmds":[{"entityType":"DEVICE","entityId":"dev-9","scope":"LATEST_TELEMETRY","cmdId":1}],"historyCmds":[],"attrSubCmds":[]}"#;
        assert_eq!(subscribed_device(command), Some("dev-9".to_string()));
        assert_eq!(subscribed_device("{}"), None);
        assert_eq!(subscribed_device("nope"), None);
    }

    #[test]
    fn test_frame_shape() {
        let garden = Garden::default();
        let frame = garden.frame(1, 1_000, &mut rand::thread_rng());
        let data = frame["data"].as_object().unwrap();
        assert_eq!(data.len(), 6);
        assert_eq!(frame["data"]["pumpState"][0][1], "0.0");
        assert_eq!(frame["data"]["soilMoisture"][0][0], 1_000);
    }

    #[test]
    fn test_pump_waters_soil_and_drains_tank() {
        let mut garden = Garden {
            pump_on: true,
            ..Garden::default()
        };
        let before = garden.clone();
        garden.step(&mut rand::thread_rng());
        assert!(garden.soil_moisture > before.soil_moisture);
        assert!(garden.tank_water_level < before.tank_water_level);
    }

    #[test]
    fn test_empty_tank_stops_pump() {
        let mut garden = Garden {
            pump_on: true,
            tank_water_level: 0.5,
            ..Garden::default()
        };
        garden.step(&mut rand::thread_rng());
        assert!(!garden.pump_on);
        assert_eq!(garden.tank_water_level, 0.0);
    }

    #[test]
    fn test_history_is_hourly_and_bounded() {
        let end = 1_700_000_000_000;
        let points = telemetry::history("temperature", end - 7 * 86_400_000, end, 100, &mut rand::thread_rng());
        assert_eq!(points.len(), 100);
        let first = points[0]["ts"].as_i64().unwrap();
        let second = points[1]["ts"].as_i64().unwrap();
        assert_eq!(first - second, 3_600_000);

        assert!(telemetry::history("rssi", 0, end, 100, &mut rand::thread_rng()).is_empty());
    }
}
