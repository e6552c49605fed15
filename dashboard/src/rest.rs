use crate::errors::Error;
use crate::model::AppState;
use crate::platform::Platform;
use crate::schedule::WateringSchedule;
use crate::session::Session;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use tracing::error;

#[derive(Debug, Deserialize)]
pub struct PumpCommand {
    on: bool,
}

/// Read/write surface for a UI sitting next to the dashboard.
pub fn create_router<P: Platform>(session: Session<P>) -> Router {
    Router::new()
        .route("/api/v1/state", get(get_state::<P>))
        .route("/api/v1/pump", post(set_pump::<P>))
        .route("/api/v1/history/refresh", post(refresh_history::<P>))
        .route(
            "/api/v1/schedules",
            get(list_schedules::<P>).post(add_schedule::<P>),
        )
        .route(
            "/api/v1/schedules/:id",
            put(update_schedule::<P>).delete(delete_schedule::<P>),
        )
        .with_state(session)
}

async fn get_state<P: Platform>(State(session): State<Session<P>>) -> Json<AppState> {
    Json(session.snapshot().as_ref().clone())
}

async fn set_pump<P: Platform>(
    State(session): State<Session<P>>,
    Json(command): Json<PumpCommand>,
) -> StatusCode {
    match session.toggle_pump(command.on) {
        Some(_) => StatusCode::ACCEPTED,
        None => StatusCode::UNAUTHORIZED,
    }
}

async fn refresh_history<P: Platform>(State(session): State<Session<P>>) -> StatusCode {
    session.fetch_history().await;
    StatusCode::NO_CONTENT
}

async fn list_schedules<P: Platform>(
    State(session): State<Session<P>>,
) -> Json<Vec<WateringSchedule>> {
    Json(session.fetch_schedules().await)
}

async fn add_schedule<P: Platform>(
    State(session): State<Session<P>>,
    Json(schedule): Json<WateringSchedule>,
) -> Result<StatusCode, AppError> {
    session.add_schedule(schedule).await?;
    Ok(StatusCode::CREATED)
}

async fn update_schedule<P: Platform>(
    State(session): State<Session<P>>,
    Path(id): Path<String>,
    Json(mut schedule): Json<WateringSchedule>,
) -> Result<StatusCode, AppError> {
    schedule.id = id;
    session.update_schedule(schedule).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_schedule<P: Platform>(
    State(session): State<Session<P>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    session.delete_schedule(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.0.downcast_ref::<Error>() {
            Some(Error::Validation(_)) => StatusCode::BAD_REQUEST,
            Some(Error::ScheduleNotFound(_)) => StatusCode::NOT_FOUND,
            Some(Error::NotAuthenticated) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::BAD_GATEWAY,
        };
        error!("API error: {}", self.0);
        (status, self.0.to_string()).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
