use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Duration;
use server_api::{
    apply_to_job, auth::AuthConfig, create_profile, get_profile, get_settings, list_applications,
    list_jobs, resend_code, sign_in, sign_up, update_profile, update_settings, verify_otp,
    ApiContext,
};
use shared::{
    domain::{ApplicationSummary, CompanyId, JobId, JobSummary, Profile},
    protocol::{
        ApplyRequest, AuthResponse, PendingVerificationResponse, ProfileRequest,
        ResendCodeRequest, SettingsPayload, SignInRequest, SignUpRequest, UpdateSettingsRequest,
        VerifyOtpRequest,
    },
};
use storage::Storage;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod app_state;
mod config;

use app_state::{ApiJson, AppState, AuthUser, HttpError};
use config::{load_settings, prepare_database_url, Settings};

type ApiResult<T> = Result<Json<T>, HttpError>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = load_settings();
    if settings.jwt_secret == Settings::default().jwt_secret {
        warn!("using the development JWT secret; set APP__JWT_SECRET in production");
    }

    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    let mut auth = AuthConfig::new(settings.jwt_secret.clone());
    auth.token_ttl = Duration::seconds(settings.jwt_ttl_seconds);
    auth.otp_ttl = Duration::seconds(settings.otp_ttl_seconds);

    let state = AppState {
        api: ApiContext::new(storage, auth),
    };
    let app = build_router(Arc::new(state), settings.max_body_bytes);

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/auth/sign-up", post(http_sign_up))
        .route("/auth/sign-in", post(http_sign_in))
        .route("/auth/verify", post(http_verify))
        .route("/auth/resend-code", post(http_resend_code))
        .route(
            "/profile",
            get(http_get_profile)
                .post(http_create_profile)
                .patch(http_update_profile),
        )
        .route(
            "/settings/:company_id",
            get(http_get_settings).put(http_update_settings),
        )
        .route("/companies/:company_id/jobs", get(http_list_jobs))
        .route(
            "/companies/:company_id/applications",
            get(http_list_applications),
        )
        .route("/jobs/:job_id/applications", post(http_apply))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz(State(state): State<Arc<AppState>>) -> Result<&'static str, StatusCode> {
    state.api.storage.health_check().await.map_err(|error| {
        error!(%error, "health check failed");
        StatusCode::SERVICE_UNAVAILABLE
    })?;
    Ok("ok")
}

async fn http_sign_up(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<SignUpRequest>,
) -> Result<(StatusCode, Json<PendingVerificationResponse>), HttpError> {
    let pending = sign_up(&state.api, &req).await?;
    Ok((StatusCode::CREATED, Json(pending)))
}

async fn http_sign_in(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<SignInRequest>,
) -> ApiResult<AuthResponse> {
    Ok(Json(sign_in(&state.api, &req).await?))
}

async fn http_verify(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<VerifyOtpRequest>,
) -> ApiResult<AuthResponse> {
    Ok(Json(verify_otp(&state.api, &req).await?))
}

async fn http_resend_code(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<ResendCodeRequest>,
) -> ApiResult<PendingVerificationResponse> {
    Ok(Json(resend_code(&state.api, &req).await?))
}

async fn http_get_profile(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> ApiResult<Profile> {
    Ok(Json(get_profile(&state.api, user_id).await?))
}

async fn http_create_profile(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    ApiJson(req): ApiJson<ProfileRequest>,
) -> Result<(StatusCode, Json<Profile>), HttpError> {
    let profile = create_profile(&state.api, user_id, &req).await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

async fn http_update_profile(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    ApiJson(req): ApiJson<ProfileRequest>,
) -> ApiResult<Profile> {
    Ok(Json(update_profile(&state.api, user_id, &req).await?))
}

async fn http_get_settings(
    State(state): State<Arc<AppState>>,
    Path(company_id): Path<i64>,
) -> ApiResult<SettingsPayload> {
    Ok(Json(get_settings(&state.api, CompanyId(company_id)).await?))
}

async fn http_update_settings(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(company_id): Path<i64>,
    ApiJson(req): ApiJson<UpdateSettingsRequest>,
) -> ApiResult<SettingsPayload> {
    Ok(Json(
        update_settings(&state.api, user_id, CompanyId(company_id), &req).await?,
    ))
}

async fn http_list_jobs(
    State(state): State<Arc<AppState>>,
    Path(company_id): Path<i64>,
) -> ApiResult<Vec<JobSummary>> {
    Ok(Json(list_jobs(&state.api, CompanyId(company_id)).await?))
}

async fn http_list_applications(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(company_id): Path<i64>,
) -> ApiResult<Vec<ApplicationSummary>> {
    Ok(Json(
        list_applications(&state.api, user_id, CompanyId(company_id)).await?,
    ))
}

async fn http_apply(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(job_id): Path<i64>,
    ApiJson(req): ApiJson<ApplyRequest>,
) -> Result<(StatusCode, Json<ApplicationSummary>), HttpError> {
    let application = apply_to_job(&state.api, user_id, JobId(job_id), &req).await?;
    Ok((StatusCode::CREATED, Json(application)))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
