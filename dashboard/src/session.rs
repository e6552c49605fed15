use crate::alerts::{AlertEvaluator, AlertEvent, AlertThresholds, Notifier};
use crate::codec::decode_frame;
use crate::config::SessionConfig;
use crate::errors::{Error, Result};
use crate::history;
use crate::metrics::{CONNECTED, FRAMES_TOTAL, MALFORMED_FRAMES_TOTAL, RPC_FAILURES_TOTAL};
use crate::model::{AppState, ConnectionStatus, Credentials, PumpState};
use crate::platform::{Platform, PlatformClient, RpcRequest};
use crate::schedule::{ScheduleStore, WateringSchedule};
use crate::state::StateStore;
use futures_util::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Authenticated connection to the garden device and owner of the app state.
///
/// All state mutation goes through this type. Cloning is cheap and every clone
/// drives the same session.
pub struct Session<P: Platform> {
    inner: Arc<Inner<P>>,
}

struct Inner<P: Platform> {
    config: SessionConfig,
    platform: Arc<P>,
    state: StateStore,
    schedules: ScheduleStore<P>,
    evaluator: Mutex<AlertEvaluator>,
    notifier: Arc<dyn Notifier>,
    token: RwLock<Option<String>>,
    /// Bumped whenever a subscription is opened or the session is closed.
    /// A stream task of an older generation must not touch the state.
    generation: AtomicU64,
    /// Bumped only by `close`. Request results started in an older epoch
    /// are dropped; a re-login alone does not invalidate them.
    epoch: AtomicU64,
    stream_task: Mutex<Option<JoinHandle<()>>>,
}

impl<P: Platform> Clone for Session<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Session<PlatformClient> {
    /// Session talking to the real platform over HTTP.
    pub fn connect(config: SessionConfig, notifier: Arc<dyn Notifier>) -> Result<Self> {
        let client = PlatformClient::new(&config)?;
        Ok(Self::new(config, client, notifier))
    }
}

impl<P: Platform> Session<P> {
    pub fn new(config: SessionConfig, platform: P, notifier: Arc<dyn Notifier>) -> Self {
        let platform = Arc::new(platform);
        let state = StateStore::new(AppState {
            thresholds: config.thresholds,
            ..AppState::default()
        });
        let schedules = ScheduleStore::new(Arc::clone(&platform), config.device_id.clone());

        Self {
            inner: Arc::new(Inner {
                config,
                platform,
                state,
                schedules,
                evaluator: Mutex::new(AlertEvaluator::new()),
                notifier,
                token: RwLock::new(None),
                generation: AtomicU64::new(0),
                epoch: AtomicU64::new(0),
                stream_task: Mutex::new(None),
            }),
        }
    }

    pub fn snapshot(&self) -> Arc<AppState> {
        self.inner.state.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<AppState>> {
        self.inner.state.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }

    fn token(&self) -> Option<String> {
        self.inner
            .token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation() == generation
    }

    fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }

    fn is_open(&self, epoch: u64) -> bool {
        self.epoch() == epoch
    }

    /// Exchanges credentials for a token and opens the telemetry subscription.
    ///
    /// On failure the session stays disconnected; nothing is retried.
    pub async fn login(&self, credentials: &Credentials) -> Result<()> {
        let epoch = self.epoch();

        let token = match self.inner.platform.login(credentials).await {
            Ok(token) => token,
            Err(e) => {
                warn!("Login failed: {}", e);
                return Err(e);
            }
        };

        if !self.is_open(epoch) {
            debug!("Session closed during login, dropping token");
            return Err(Error::Auth("session closed during login".to_string()));
        }

        *self
            .inner
            .token
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(token.clone());
        info!("Logged in as {}", credentials.username);

        if let Some(path) = &self.inner.config.token_path {
            if let Err(e) = tokio::fs::write(path, &token).await {
                warn!("Failed to persist session token to {}: {}", path.display(), e);
            }
        }

        self.open_subscription(token);
        Ok(())
    }

    /// Runs [`login`](Self::login) in the background and reports success to
    /// `on_result`.
    pub fn login_with<F>(&self, credentials: Credentials, on_result: F) -> JoinHandle<()>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let session = self.clone();
        tokio::spawn(async move {
            let ok = session.login(&credentials).await.is_ok();
            on_result(ok);
        })
    }

    fn open_subscription(&self, token: String) {
        // Held until the new task is stored so `close` cannot slip in between
        let mut stream_task = lock(&self.inner.stream_task);

        let mut generation = 0;
        self.inner.state.update(|s| {
            generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
            s.connection = ConnectionStatus::Connecting;
        });

        let session = self.clone();
        let task = tokio::spawn(async move {
            session.run_stream(token, generation).await;
        });

        if let Some(previous) = stream_task.replace(task) {
            previous.abort();
        }
    }

    async fn run_stream(&self, token: String, generation: u64) {
        let mut frames = match self
            .inner
            .platform
            .open_telemetry(&token, &self.inner.config.device_id)
            .await
        {
            Ok(frames) => frames,
            Err(e) => {
                error!("Failed to open telemetry stream: {}", e);
                self.set_connection(generation, ConnectionStatus::Disconnected);
                return;
            }
        };

        if !self.set_connection(generation, ConnectionStatus::Connected) {
            return;
        }
        info!("Telemetry stream open");

        while let Some(frame) = frames.next().await {
            if !self.is_current(generation) {
                break;
            }
            match frame {
                Ok(text) => self.ingest(&text, now_ms(), || self.is_current(generation)),
                Err(e) => {
                    warn!("Telemetry stream error: {}", e);
                    break;
                }
            }
        }

        info!("Telemetry stream closed");
        self.set_connection(generation, ConnectionStatus::Disconnected);
    }

    fn set_connection(&self, generation: u64, status: ConnectionStatus) -> bool {
        self.inner.state.update_when(
            || self.is_current(generation),
            |s| {
                CONNECTED.set(i64::from(status == ConnectionStatus::Connected));
                s.connection = status;
            },
        )
    }

    pub fn ingest_frame(&self, text: &str) {
        self.ingest_frame_at(text, now_ms());
    }

    /// Decodes one frame, merges it and runs the alert pass, all in a single
    /// state update. Malformed frames are counted and otherwise ignored.
    pub fn ingest_frame_at(&self, text: &str, now_ms: i64) {
        self.ingest(text, now_ms, || true);
    }

    fn ingest<G>(&self, text: &str, now_ms: i64, current: G)
    where
        G: FnOnce() -> bool,
    {
        FRAMES_TOTAL.inc();

        let update = match decode_frame(text) {
            Ok(update) => update,
            Err(e) => {
                MALFORMED_FRAMES_TOTAL.inc();
                debug!("Ignoring telemetry frame: {}", e);
                return;
            }
        };

        let events = self.reevaluate(now_ms, current, |s| update.apply(&mut s.readings));
        self.deliver(&events);
    }

    /// Replaces the alert settings and re-runs the alert pass.
    pub fn set_thresholds(&self, thresholds: AlertThresholds) {
        info!("Alert thresholds updated");
        let events = self.reevaluate(now_ms(), || true, |s| s.thresholds = thresholds);
        self.deliver(&events);
    }

    fn reevaluate<G, F>(&self, now_ms: i64, current: G, change: F) -> Vec<AlertEvent>
    where
        G: FnOnce() -> bool,
        F: FnOnce(&mut AppState),
    {
        let mut events = Vec::new();
        self.inner.state.update_when(current, |s| {
            change(s);
            let evaluation = lock(&self.inner.evaluator).evaluate(&s.readings, &s.thresholds, now_ms);
            s.active_alerts = evaluation.active;
            events = evaluation.events;
        });
        events
    }

    fn deliver(&self, events: &[AlertEvent]) {
        for event in events {
            info!("Alert {:?} raised", event.kind);
            self.inner.notifier.notify(event);
        }
    }

    /// Asks the device to switch the pump and assumes it did until telemetry
    /// says otherwise. Does nothing when not logged in.
    ///
    /// Returns the handle of the background RPC call.
    pub fn toggle_pump(&self, on: bool) -> Option<JoinHandle<()>> {
        let Some(token) = self.token() else {
            debug!("Ignoring pump toggle, not logged in");
            return None;
        };

        self.inner
            .state
            .update(|s| s.readings.pump = PumpState::provisional(on));

        let inner = Arc::clone(&self.inner);
        Some(tokio::spawn(async move {
            let request = RpcRequest::set_pump(on);
            match inner
                .platform
                .send_one_way_rpc(&token, &inner.config.device_id, &request)
                .await
            {
                Ok(()) => debug!("Pump RPC sent (on={})", on),
                Err(e) => {
                    RPC_FAILURES_TOTAL.inc();
                    warn!("Pump RPC failed: {}", e);
                }
            }
        }))
    }

    /// Refreshes both history charts, with placeholder data where the
    /// platform has none.
    pub async fn fetch_history(&self) {
        let epoch = self.epoch();
        let token = self.token();

        let history = history::fetch_history(
            self.inner.platform.as_ref(),
            token.as_deref(),
            &self.inner.config.device_id,
            now_ms(),
        )
        .await;

        let published = self.inner.state.update_when(
            || self.is_open(epoch),
            |s| {
                s.temperature_history = history.temperature;
                s.humidity_history = history.humidity;
            },
        );
        if !published {
            debug!("Discarding history fetched before the session was closed");
        }
    }

    pub async fn fetch_schedules(&self) -> Vec<WateringSchedule> {
        let epoch = self.epoch();
        let schedules = match self.token() {
            Some(token) => self.inner.schedules.fetch(&token).await,
            None => {
                debug!("Not logged in, no schedules to fetch");
                Vec::new()
            }
        };
        self.publish_schedules(epoch, schedules.clone());
        schedules
    }

    pub async fn add_schedule(&self, schedule: WateringSchedule) -> Result<()> {
        let epoch = self.epoch();
        let token = self.token().ok_or(Error::NotAuthenticated)?;
        let list = self.inner.schedules.add(&token, schedule).await?;
        self.publish_schedules(epoch, list);
        Ok(())
    }

    pub async fn update_schedule(&self, schedule: WateringSchedule) -> Result<()> {
        let epoch = self.epoch();
        let token = self.token().ok_or(Error::NotAuthenticated)?;
        let list = self.inner.schedules.update(&token, schedule).await?;
        self.publish_schedules(epoch, list);
        Ok(())
    }

    pub async fn delete_schedule(&self, id: &str) -> Result<()> {
        let epoch = self.epoch();
        let token = self.token().ok_or(Error::NotAuthenticated)?;
        let list = self.inner.schedules.delete(&token, id).await?;
        self.publish_schedules(epoch, list);
        Ok(())
    }

    pub async fn toggle_schedule_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let epoch = self.epoch();
        let token = self.token().ok_or(Error::NotAuthenticated)?;
        let list = self.inner.schedules.toggle_enabled(&token, id, enabled).await?;
        self.publish_schedules(epoch, list);
        Ok(())
    }

    /// Mirrors the store's committed list into the state unless the session
    /// was closed in the meantime.
    fn publish_schedules(&self, epoch: u64, schedules: Vec<WateringSchedule>) {
        let published = self
            .inner
            .state
            .update_when(|| self.is_open(epoch), |s| s.schedules = schedules);
        if !published {
            debug!("Discarding schedules loaded before the session was closed");
        }
    }

    /// Ends the subscription. Requests still in flight finish but their
    /// results are dropped.
    pub fn close(&self) {
        let mut stream_task = lock(&self.inner.stream_task);

        self.inner.state.update(|s| {
            self.inner.generation.fetch_add(1, Ordering::SeqCst);
            self.inner.epoch.fetch_add(1, Ordering::SeqCst);
            s.connection = ConnectionStatus::Disconnected;
        });
        if let Some(task) = stream_task.take() {
            task.abort();
        }
        CONNECTED.set(0);
        info!("Session closed");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
