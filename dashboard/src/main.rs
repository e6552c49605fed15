use anyhow::Context;
use axum::{routing::get, Router};
use clap::Parser;
use garden_dashboard::alerts::{AlertThresholds, LogNotifier, TemperatureAlert, ThresholdAlert};
use garden_dashboard::config::{SessionConfig, DEFAULT_BASE_URL};
use garden_dashboard::model::{ConnectionStatus, Credentials};
use garden_dashboard::{metrics, rest, Session};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "garden-dashboard", about = "Live dashboard for a garden irrigation controller")]
struct Cli {
    /// REST root of the IoT platform
    #[arg(long, env = "GARDEN_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    #[arg(long, env = "GARDEN_DEVICE_ID")]
    device_id: String,

    #[arg(long, env = "GARDEN_USERNAME")]
    username: String,

    #[arg(long, env = "GARDEN_PASSWORD", hide_env_values = true)]
    password: String,

    /// File the session token is written to after login
    #[arg(long, env = "GARDEN_TOKEN_FILE")]
    token_file: Option<PathBuf>,

    /// Address of the local state/metrics HTTP surface
    #[arg(long, env = "HTTP_ADDR", default_value = "127.0.0.1:8081")]
    http_addr: String,

    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value_t = 10)]
    http_timeout_secs: u64,

    #[arg(long, env = "SOIL_MOISTURE_THRESHOLD", default_value_t = 30.0)]
    soil_moisture_threshold: f64,

    #[arg(long, env = "WATER_LEVEL_THRESHOLD", default_value_t = 20.0)]
    water_level_threshold: f64,

    #[arg(long, env = "TEMPERATURE_MIN", default_value_t = 15.0)]
    temperature_min: f64,

    #[arg(long, env = "TEMPERATURE_MAX", default_value_t = 40.0)]
    temperature_max: f64,

    #[arg(long, env = "BATTERY_THRESHOLD", default_value_t = 20.0)]
    battery_threshold: f64,
}

impl Cli {
    fn thresholds(&self) -> AlertThresholds {
        AlertThresholds {
            soil_moisture: ThresholdAlert {
                enabled: true,
                threshold: self.soil_moisture_threshold,
            },
            water_level: ThresholdAlert {
                enabled: true,
                threshold: self.water_level_threshold,
            },
            temperature: TemperatureAlert {
                enabled: true,
                min: self.temperature_min,
                max: self.temperature_max,
            },
            battery: ThresholdAlert {
                enabled: true,
                threshold: self.battery_threshold,
            },
        }
    }

    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            token_path: self.token_file.clone(),
            http_timeout: Duration::from_secs(self.http_timeout_secs),
            thresholds: self.thresholds(),
            ..SessionConfig::new(&self.base_url, &self.device_id)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting garden dashboard");
    info!("Platform: {}", cli.base_url);
    info!("Device: {}", cli.device_id);

    metrics::init_metrics().context("registering metrics")?;

    let session = Session::connect(cli.session_config(), Arc::new(LogNotifier))
        .context("building platform client")?;

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .merge(rest::create_router(session.clone()));

    let listener = tokio::net::TcpListener::bind(&cli.http_addr)
        .await
        .with_context(|| format!("binding {}", cli.http_addr))?;
    info!("HTTP server listening on {}", cli.http_addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    });

    let credentials = Credentials::new(&cli.username, &cli.password);
    if let Err(e) = session.login(&credentials).await {
        error!("Could not log in: {}", e);
        std::process::exit(1);
    }

    {
        let session = session.clone();
        tokio::spawn(async move {
            session.fetch_history().await;
            let schedules = session.fetch_schedules().await;
            info!("Loaded {} watering schedules", schedules.len());
        });
    }

    let watch_handle = tokio::spawn(log_state_changes(session.subscribe()));

    tokio::select! {
        _ = server_handle => {
            error!("HTTP server terminated");
        }
        _ = watch_handle => {
            error!("State watcher terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    session.close();
    info!("Shutting down");
    Ok(())
}

/// Logs connection changes at info and every new reading at debug.
async fn log_state_changes(
    mut rx: tokio::sync::watch::Receiver<Arc<garden_dashboard::model::AppState>>,
) {
    let mut last_connection = ConnectionStatus::Disconnected;
    while rx.changed().await.is_ok() {
        let state = rx.borrow_and_update().clone();
        if state.connection != last_connection {
            info!("Connection {:?} -> {:?}", last_connection, state.connection);
            last_connection = state.connection;
        }
        debug!(
            "temp={:.1} hum={:.0} soil={:.0} tank={:.0} battery={:.0} pump={} alerts={:?}",
            state.readings.temperature,
            state.readings.humidity,
            state.readings.soil_moisture,
            state.readings.tank_water_level,
            state.readings.battery_level,
            state.readings.pump.on,
            state.active_alerts
        );
    }
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}
