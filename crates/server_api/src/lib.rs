use std::sync::Arc;

use chrono::Utc;
use shared::{
    domain::{ApplicationSummary, CompanyId, JobId, JobSummary, Profile, UserId},
    error::{ApiError, ErrorCode, FieldError},
    protocol::{
        ApplyRequest, AuthResponse, PendingVerificationResponse, ProfileRequest,
        ResendCodeRequest, SettingsPayload, SignInRequest, SignUpRequest, UpdateSettingsRequest,
        VerifyOtpRequest,
    },
    validation::Validate,
};
use storage::{NewUser, Storage, StoredUser};
use tracing::{debug, info};

pub mod auth;

use auth::{AuthConfig, OtpDelivery};

const MAX_CODE_ATTEMPTS: usize = 8;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub auth: AuthConfig,
    pub otp_delivery: Arc<dyn OtpDelivery>,
}

impl ApiContext {
    pub fn new(storage: Storage, auth: AuthConfig) -> Self {
        Self {
            storage,
            auth,
            otp_delivery: Arc::new(auth::LogOtpDelivery),
        }
    }

    pub fn with_otp_delivery(mut self, delivery: Arc<dyn OtpDelivery>) -> Self {
        self.otp_delivery = delivery;
        self
    }
}

pub async fn sign_up(
    ctx: &ApiContext,
    request: &SignUpRequest,
) -> Result<PendingVerificationResponse, ApiError> {
    let sign_up = request.validate()?;
    let salt = auth::new_salt();
    let digest = auth::password_digest(&salt, &sign_up.password);

    let user_id = ctx
        .storage
        .create_user(&NewUser {
            email: &sign_up.email,
            full_name: &sign_up.full_name,
            password_digest: &digest,
            password_salt: &salt,
        })
        .await
        .map_err(internal)?
        .ok_or_else(|| {
            ApiError::new(
                ErrorCode::Conflict,
                "an account with this email already exists",
            )
        })?;

    info!(user_id = %user_id, "account created, awaiting verification");
    issue_code(ctx, user_id, &sign_up.email).await
}

pub async fn sign_in(ctx: &ApiContext, request: &SignInRequest) -> Result<AuthResponse, ApiError> {
    let credentials = request.validate()?;
    let user = ctx
        .storage
        .find_user_by_email(&credentials.email)
        .await
        .map_err(internal)?
        .filter(|user| {
            auth::password_matches(
                &user.password_salt,
                &credentials.password,
                &user.password_digest,
            )
        })
        .ok_or_else(|| ApiError::new(ErrorCode::Unauthorized, "invalid email or password"))?;

    if !user.verified {
        return Err(ApiError::new(
            ErrorCode::Unverified,
            "account is not verified",
        ));
    }
    session_for(ctx, &user)
}

pub async fn verify_otp(
    ctx: &ApiContext,
    request: &VerifyOtpRequest,
) -> Result<AuthResponse, ApiError> {
    let submission = request.validate()?;
    let user = ctx
        .storage
        .find_user_by_pending_code(&submission.otp, submission.email.as_deref())
        .await
        .map_err(internal)?
        .filter(|user| {
            user.otp_expires_at
                .is_some_and(|expires_at| expires_at > Utc::now())
        })
        .ok_or_else(|| {
            ApiError::validation(vec![FieldError::new("otp", "OTP is invalid or has expired")])
        })?;

    ctx.storage
        .mark_verified(user.user_id)
        .await
        .map_err(internal)?;
    info!(user_id = %user.user_id, "account verified");

    let user = StoredUser {
        verified: true,
        otp_code: None,
        otp_expires_at: None,
        ..user
    };
    session_for(ctx, &user)
}

pub async fn resend_code(
    ctx: &ApiContext,
    request: &ResendCodeRequest,
) -> Result<PendingVerificationResponse, ApiError> {
    let email = request.validate()?;
    let user = ctx
        .storage
        .find_user_by_email(&email)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "no account for this email"))?;
    if user.verified {
        return Err(ApiError::new(
            ErrorCode::Conflict,
            "account is already verified",
        ));
    }
    issue_code(ctx, user.user_id, &user.email).await
}

/// Resolves a bearer token to a verified user.
pub async fn authenticate(ctx: &ApiContext, token: &str) -> Result<UserId, ApiError> {
    let user_id = auth::verify_token(&ctx.auth, token)?;
    let user = ctx
        .storage
        .find_user(user_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::Unauthorized, "unknown account"))?;
    if !user.verified {
        return Err(ApiError::new(
            ErrorCode::Unverified,
            "account is not verified",
        ));
    }
    Ok(user_id)
}

pub async fn get_profile(ctx: &ApiContext, user_id: UserId) -> Result<Profile, ApiError> {
    ctx.storage
        .load_profile(user_id)
        .await
        .map_err(internal)?
        .ok_or_else(profile_not_found)
}

pub async fn create_profile(
    ctx: &ApiContext,
    user_id: UserId,
    request: &ProfileRequest,
) -> Result<Profile, ApiError> {
    let profile = request.validate_create()?;
    ctx.storage
        .create_profile(user_id, &profile)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::Conflict, "profile already exists"))
}

pub async fn update_profile(
    ctx: &ApiContext,
    user_id: UserId,
    request: &ProfileRequest,
) -> Result<Profile, ApiError> {
    let patch = request.validate_update()?;
    if patch.is_empty() {
        return get_profile(ctx, user_id).await;
    }
    ctx.storage
        .update_profile(user_id, &patch)
        .await
        .map_err(internal)?
        .ok_or_else(profile_not_found)
}

pub async fn get_settings(
    ctx: &ApiContext,
    company_id: CompanyId,
) -> Result<SettingsPayload, ApiError> {
    ensure_company(ctx, company_id).await?;
    let stored = ctx
        .storage
        .load_settings(company_id)
        .await
        .map_err(internal)?;
    Ok(match stored {
        Some(stored) => SettingsPayload {
            company_id,
            color: stored.color,
            logo_url: stored.logo_url,
            company_name: stored.company_name,
        },
        None => SettingsPayload {
            company_id,
            color: None,
            logo_url: None,
            company_name: None,
        },
    })
}

pub async fn update_settings(
    ctx: &ApiContext,
    user_id: UserId,
    company_id: CompanyId,
    request: &UpdateSettingsRequest,
) -> Result<SettingsPayload, ApiError> {
    let patch = request.validate()?;
    ensure_company(ctx, company_id).await?;
    let stored = ctx
        .storage
        .upsert_settings(company_id, &patch)
        .await
        .map_err(internal)?;
    info!(user_id = %user_id, company_id = %company_id, "company settings updated");
    Ok(SettingsPayload {
        company_id,
        color: stored.color,
        logo_url: stored.logo_url,
        company_name: stored.company_name,
    })
}

pub async fn list_jobs(
    ctx: &ApiContext,
    company_id: CompanyId,
) -> Result<Vec<JobSummary>, ApiError> {
    ensure_company(ctx, company_id).await?;
    ctx.storage
        .list_open_jobs(company_id)
        .await
        .map_err(internal)
}

pub async fn list_applications(
    ctx: &ApiContext,
    user_id: UserId,
    company_id: CompanyId,
) -> Result<Vec<ApplicationSummary>, ApiError> {
    ensure_company(ctx, company_id).await?;
    let applications = ctx
        .storage
        .list_applications_for_company(company_id)
        .await
        .map_err(internal)?;
    debug!(
        user_id = %user_id,
        company_id = %company_id,
        count = applications.len(),
        "listed applications"
    );
    Ok(applications)
}

pub async fn apply_to_job(
    ctx: &ApiContext,
    user_id: UserId,
    job_id: JobId,
    request: &ApplyRequest,
) -> Result<ApplicationSummary, ApiError> {
    let cover_letter = request.validate()?;
    let job = ctx
        .storage
        .find_job(job_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "job not found"))?;
    if !job.open {
        return Err(ApiError::new(
            ErrorCode::Conflict,
            "job is no longer accepting applications",
        ));
    }

    let application = ctx
        .storage
        .create_application(&job, user_id, cover_letter.as_deref())
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::Conflict, "already applied to this job"))?;
    info!(
        user_id = %user_id,
        job_id = %job_id,
        application_id = %application.application_id,
        "application submitted"
    );
    Ok(application)
}

async fn issue_code(
    ctx: &ApiContext,
    user_id: UserId,
    email: &str,
) -> Result<PendingVerificationResponse, ApiError> {
    let mut code = auth::new_otp();
    let mut attempts = 1;
    while ctx
        .storage
        .pending_code_in_use(&code)
        .await
        .map_err(internal)?
    {
        if attempts >= MAX_CODE_ATTEMPTS {
            return Err(ApiError::new(
                ErrorCode::Internal,
                "could not allocate a one-time code",
            ));
        }
        code = auth::new_otp();
        attempts += 1;
    }

    let expires_at = Utc::now() + ctx.auth.otp_ttl;
    ctx.storage
        .set_pending_code(user_id, &code, expires_at)
        .await
        .map_err(internal)?;
    ctx.otp_delivery.deliver(email, &code, expires_at);

    Ok(PendingVerificationResponse {
        email: email.to_string(),
        code_expires_at: expires_at,
    })
}

fn session_for(ctx: &ApiContext, user: &StoredUser) -> Result<AuthResponse, ApiError> {
    let (token, expires_at) = auth::issue_token(&ctx.auth, user.user_id, &user.email)?;
    Ok(AuthResponse {
        token,
        expires_at,
        user: user.summary(),
    })
}

async fn ensure_company(ctx: &ApiContext, company_id: CompanyId) -> Result<(), ApiError> {
    if ctx
        .storage
        .company_exists(company_id)
        .await
        .map_err(internal)?
    {
        Ok(())
    } else {
        Err(ApiError::new(ErrorCode::NotFound, "company not found"))
    }
}

fn profile_not_found() -> ApiError {
    ApiError::new(ErrorCode::NotFound, "profile not found")
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
