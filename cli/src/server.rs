use std::sync::Arc;

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use mealprep_core::command::{self, Command, CommandResult};
use mealprep_core::feedback::RecipeReviser;
use mealprep_core::macros::MacroReport;
use mealprep_core::rotation::WeekStatus;
use mealprep_core::schedule::CookingPlan;
use mealprep_core::shopping::ShoppingList;
use mealprep_core::{Error as CoreError, MealPlanService};

const BODY_LIMIT: usize = 1024 * 1024; // 1 MB

#[derive(Clone)]
struct AppState {
    svc: Arc<MealPlanService>,
    reviser: Option<Arc<dyn RecipeReviser>>,
}

// --- Request / Response types ---

#[derive(Deserialize)]
struct DateQuery {
    date: Option<String>,
}

#[derive(Deserialize)]
struct ScheduleQuery {
    date: Option<String>,
    template: Option<String>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Error handling ---

enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Unavailable(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg),
            Self::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            Self::Internal(err) => {
                tracing::error!("internal server error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound { .. } => Self::NotFound(err.to_string()),
            CoreError::StoreChanged(_) => Self::Conflict(err.to_string()),
            CoreError::InvalidWeek { .. }
            | CoreError::UnknownTemplate(_)
            | CoreError::ScheduleOverflow(_)
            | CoreError::InvalidRecipe { .. }
            | CoreError::InvalidFeedback(_)
            | CoreError::InvalidCommand(_)
            | CoreError::ProposalRejected { .. }
            | CoreError::FeedbackAlreadyResolved(_) => Self::BadRequest(err.to_string()),
            e if e.is_retryable() => Self::Unavailable(e.to_string()),
            e => Self::Internal(e.into()),
        }
    }
}

fn parse_date(date: Option<&str>) -> Result<NaiveDate, ApiError> {
    match date {
        None => Ok(Local::now().date_naive()),
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map_err(|_| ApiError::BadRequest(format!("Invalid date '{s}'. Use YYYY-MM-DD"))),
    }
}

// --- Handlers ---

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn get_week(
    State(state): State<AppState>,
    Query(q): Query<DateQuery>,
) -> Result<Json<WeekStatus>, ApiError> {
    let today = parse_date(q.date.as_deref())?;
    Ok(Json(state.svc.week_status(today)))
}

async fn get_macros(
    State(state): State<AppState>,
    Query(q): Query<DateQuery>,
) -> Result<Json<MacroReport>, ApiError> {
    let today = parse_date(q.date.as_deref())?;
    Ok(Json(state.svc.macro_report(today)?))
}

async fn get_shopping(
    State(state): State<AppState>,
    Query(q): Query<DateQuery>,
) -> Result<Json<ShoppingList>, ApiError> {
    let today = parse_date(q.date.as_deref())?;
    Ok(Json(state.svc.shopping_list(today)?))
}

async fn get_schedule(
    State(state): State<AppState>,
    Query(q): Query<ScheduleQuery>,
) -> Result<Json<CookingPlan>, ApiError> {
    let today = parse_date(q.date.as_deref())?;
    Ok(Json(state.svc.cooking_plan(today, q.template.as_deref())?))
}

/// Run a transport command. The feedback pipeline may wait on the language
/// model, so it runs on the blocking pool.
async fn post_command(
    State(state): State<AppState>,
    Json(cmd): Json<Command>,
) -> Result<(StatusCode, Json<CommandResult>), ApiError> {
    let result = tokio::task::spawn_blocking(move || {
        command::execute(
            &state.svc,
            state.reviser.as_deref(),
            &cmd,
            Local::now().date_naive(),
            Utc::now(),
        )
    })
    .await
    .context("command task failed")?;

    let status = if result.is_success() {
        StatusCode::OK
    } else if result.payload["retryable"] == true {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    Ok((status, Json(result)))
}

// --- Router builder ---

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/week", get(get_week))
        .route("/api/macros", get(get_macros))
        .route("/api/shopping", get(get_shopping))
        .route("/api/schedule", get(get_schedule))
        .route("/api/command", post(post_command))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// --- Server startup ---

pub async fn start_server(
    svc: MealPlanService,
    reviser: Option<Arc<dyn RecipeReviser>>,
    port: u16,
    bind: &str,
) -> anyhow::Result<()> {
    if reviser.is_none() {
        tracing::warn!("ANTHROPIC_API_KEY not set; low ratings will be recorded without revisions");
    }
    if bind != "127.0.0.1" && bind != "localhost" {
        tracing::warn!(
            bind,
            "listening beyond localhost with no authentication; any device on your network can change the plan"
        );
    }

    let state = AppState {
        svc: Arc::new(svc),
        reviser,
    };
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}"))
        .await
        .with_context(|| format!("failed to bind {bind}:{port}"))?;
    tracing::info!("listening on http://{bind}:{port}");
    axum::serve(listener, app).await?;

    Ok(())
}
