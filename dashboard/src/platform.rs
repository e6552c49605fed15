//! Client side of the IoT platform's REST and WebSocket contract.
//!
//! [`Platform`] is the seam the session is written against; [`PlatformClient`]
//! is the real implementation over HTTP.

use crate::config::SessionConfig;
use crate::errors::{Error, Result};
use crate::model::Credentials;
use futures_util::stream::BoxStream;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info};

/// Raw text frames pushed by the platform after subscribing.
pub type TelemetryStream = BoxStream<'static, Result<String>>;

/// `{key: [{ts, value}]}` as returned by the timeseries endpoint.
pub type TimeseriesResponse = HashMap<String, Vec<TimeseriesEntry>>;

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    pub method: String,
    pub params: Value,
}

impl RpcRequest {
    pub fn set_pump(on: bool) -> Self {
        Self {
            method: "setPump".to_string(),
            params: Value::Bool(on),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeseriesEntry {
    pub ts: i64,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeEntry {
    pub key: String,
    pub value: Value,
    #[serde(rename = "lastUpdateTs", default, skip_serializing_if = "Option::is_none")]
    pub last_update_ts: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct TimeseriesQuery {
    pub keys: Vec<String>,
    pub start_ts: i64,
    pub end_ts: i64,
    pub limit: usize,
}

/// First message sent on the telemetry socket.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionCommand {
    pub ts_sub_cmds: Vec<TimeseriesSubscription>,
    pub history_cmds: Vec<Value>,
    pub attr_sub_cmds: Vec<Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeseriesSubscription {
    pub entity_type: String,
    pub entity_id: String,
    pub scope: String,
    pub cmd_id: u32,
}

impl SubscriptionCommand {
    pub fn latest_telemetry(device_id: &str) -> Self {
        Self {
            ts_sub_cmds: vec![TimeseriesSubscription {
                entity_type: "DEVICE".to_string(),
                entity_id: device_id.to_string(),
                scope: "LATEST_TELEMETRY".to_string(),
                cmd_id: 1,
            }],
            history_cmds: Vec::new(),
            attr_sub_cmds: Vec::new(),
        }
    }
}

/// Operations the dashboard needs from the platform.
pub trait Platform: Send + Sync + 'static {
    /// Exchanges credentials for a session token.
    fn login(&self, credentials: &Credentials) -> impl Future<Output = Result<String>> + Send;

    /// Opens the telemetry socket and subscribes to the device's latest values.
    fn open_telemetry(
        &self,
        token: &str,
        device_id: &str,
    ) -> impl Future<Output = Result<TelemetryStream>> + Send;

    fn send_one_way_rpc(
        &self,
        token: &str,
        device_id: &str,
        request: &RpcRequest,
    ) -> impl Future<Output = Result<()>> + Send;

    fn timeseries(
        &self,
        token: &str,
        device_id: &str,
        query: &TimeseriesQuery,
    ) -> impl Future<Output = Result<TimeseriesResponse>> + Send;

    fn shared_attributes(
        &self,
        token: &str,
        device_id: &str,
        keys: &[&str],
    ) -> impl Future<Output = Result<Vec<AttributeEntry>>> + Send;

    fn save_shared_attributes(
        &self,
        token: &str,
        device_id: &str,
        attributes: &Value,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// [`Platform`] over HTTPS and a TLS WebSocket.
#[derive(Debug, Clone)]
pub struct PlatformClient {
    http: reqwest::Client,
    rest_base: String,
    ws_base: String,
}

impl PlatformClient {
    pub fn new(config: &SessionConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;

        Ok(Self {
            http,
            rest_base: config.rest_base().to_string(),
            ws_base: config.websocket_base(),
        })
    }

    fn device_url(&self, device_id: &str, path: &str) -> String {
        format!(
            "{}/api/plugins/telemetry/DEVICE/{}/{}",
            self.rest_base, device_id, path
        )
    }
}

fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

/// Maps non-2xx responses to [`Error::Status`].
async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::Status {
        status: status.as_u16(),
        body,
    })
}

impl Platform for PlatformClient {
    async fn login(&self, credentials: &Credentials) -> Result<String> {
        let url = format!("{}/api/auth/login", self.rest_base);
        debug!("Logging in as {}", credentials.username);

        let response = self.http.post(&url).json(credentials).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Auth(format!("platform answered {}", status)));
        }

        let body: LoginResponse = response
            .json()
            .await
            .map_err(|e| Error::Auth(format!("malformed login response: {}", e)))?;
        Ok(body.token)
    }

    async fn open_telemetry(&self, token: &str, device_id: &str) -> Result<TelemetryStream> {
        let url = format!("{}/api/ws/plugins/telemetry?token={}", self.ws_base, token);
        info!("Opening telemetry socket at {}", self.ws_base);

        let (mut socket, _) = connect_async(url.as_str()).await?;

        let command = serde_json::to_string(&SubscriptionCommand::latest_telemetry(device_id))?;
        socket.send(Message::Text(command.into())).await?;
        debug!("Subscribed to latest telemetry of {}", device_id);

        let frames = socket
            .filter_map(|message| async move {
                match message {
                    Ok(Message::Text(text)) => Some(Ok(text.to_string())),
                    Ok(_) => None,
                    Err(e) => Some(Err(Error::from(e))),
                }
            })
            .boxed();
        Ok(frames)
    }

    async fn send_one_way_rpc(
        &self,
        token: &str,
        device_id: &str,
        request: &RpcRequest,
    ) -> Result<()> {
        let url = format!("{}/api/plugins/rpc/oneway/{}", self.rest_base, device_id);
        let response = self
            .http
            .post(&url)
            .header("X-Authorization", bearer(token))
            .json(request)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn timeseries(
        &self,
        token: &str,
        device_id: &str,
        query: &TimeseriesQuery,
    ) -> Result<TimeseriesResponse> {
        let url = self.device_url(device_id, "values/timeseries");
        let response = self
            .http
            .get(&url)
            .header("X-Authorization", bearer(token))
            .query(&[
                ("keys", query.keys.join(",")),
                ("startTs", query.start_ts.to_string()),
                ("endTs", query.end_ts.to_string()),
                ("limit", query.limit.to_string()),
            ])
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    async fn shared_attributes(
        &self,
        token: &str,
        device_id: &str,
        keys: &[&str],
    ) -> Result<Vec<AttributeEntry>> {
        let url = self.device_url(device_id, "values/attributes/SHARED_SCOPE");
        let response = self
            .http
            .get(&url)
            .header("X-Authorization", bearer(token))
            .query(&[("keys", keys.join(","))])
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    async fn save_shared_attributes(
        &self,
        token: &str,
        device_id: &str,
        attributes: &Value,
    ) -> Result<()> {
        let url = self.device_url(device_id, "attributes/SHARED_SCOPE");
        let response = self
            .http
            .post(&url)
            .header("X-Authorization", bearer(token))
            .json(attributes)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}
