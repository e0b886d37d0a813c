use super::*;
use crate::auth::RecordingOtpDelivery;

struct Harness {
    ctx: ApiContext,
    outbox: Arc<RecordingOtpDelivery>,
}

async fn setup() -> Harness {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let outbox = Arc::new(RecordingOtpDelivery::default());
    let ctx = ApiContext::new(storage, AuthConfig::new("test-secret"))
        .with_otp_delivery(outbox.clone());
    Harness { ctx, outbox }
}

fn sign_up_request(email: &str) -> SignUpRequest {
    SignUpRequest {
        email: Some(email.into()),
        full_name: Some("Ada Lovelace".into()),
        password: Some("analytical".into()),
    }
}

/// Signs up and verifies an account, returning its session.
async fn verified(h: &Harness, email: &str) -> AuthResponse {
    sign_up(&h.ctx, &sign_up_request(email))
        .await
        .expect("sign up");
    let otp = h.outbox.last_code_for(email).expect("code delivered");
    verify_otp(
        &h.ctx,
        &VerifyOtpRequest {
            email: Some(email.into()),
            otp: Some(otp),
        },
    )
    .await
    .expect("verify")
}

fn profile_request() -> ProfileRequest {
    ProfileRequest {
        first_name: Some("Ada".into()),
        middle_name: None,
        last_name: Some("Lovelace".into()),
        date_of_birth: Some("1990-12-10".into()),
        gender: Some("female".into()),
        phone: Some("555-0100".into()),
        nationality: Some("British".into()),
        address: Some("London".into()),
        passport_number: Some("X1234567".into()),
        relative_in_organisation: Some(false),
    }
}

#[tokio::test]
async fn sign_up_rejects_invalid_payload_with_every_field() {
    let h = setup().await;
    let err = sign_up(
        &h.ctx,
        &SignUpRequest {
            email: Some("bad".into()),
            full_name: Some("Al".into()),
            password: Some("123".into()),
        },
    )
    .await
    .expect_err("should fail");
    assert_eq!(err.code, ErrorCode::Validation);
    assert_eq!(err.fields.len(), 3);
    assert_eq!(h.outbox.sent_count(), 0);
}

#[tokio::test]
async fn sign_up_then_sign_in_requires_verification() {
    let h = setup().await;
    let pending = sign_up(&h.ctx, &sign_up_request("Ada@Example.com"))
        .await
        .expect("sign up");
    assert_eq!(pending.email, "ada@example.com");
    assert!(pending.code_expires_at > Utc::now());

    let err = sign_in(
        &h.ctx,
        &SignInRequest {
            email: Some("ada@example.com".into()),
            password: Some("analytical".into()),
        },
    )
    .await
    .expect_err("unverified");
    assert_eq!(err.code, ErrorCode::Unverified);
}

#[tokio::test]
async fn duplicate_sign_up_conflicts() {
    let h = setup().await;
    sign_up(&h.ctx, &sign_up_request("ada@example.com"))
        .await
        .expect("sign up");
    let err = sign_up(&h.ctx, &sign_up_request("ADA@example.com"))
        .await
        .expect_err("duplicate");
    assert_eq!(err.code, ErrorCode::Conflict);
}

#[tokio::test]
async fn verify_issues_session_and_sign_in_works() {
    let h = setup().await;
    let session = verified(&h, "ada@example.com").await;
    assert!(session.user.verified);
    assert_eq!(
        authenticate(&h.ctx, &session.token).await.expect("auth"),
        session.user.user_id
    );

    let again = sign_in(
        &h.ctx,
        &SignInRequest {
            email: Some("ada@example.com".into()),
            password: Some("analytical".into()),
        },
    )
    .await
    .expect("sign in");
    assert_eq!(again.user.user_id, session.user.user_id);

    let err = sign_in(
        &h.ctx,
        &SignInRequest {
            email: Some("ada@example.com".into()),
            password: Some("wrong-password".into()),
        },
    )
    .await
    .expect_err("wrong password");
    assert_eq!(err.code, ErrorCode::Unauthorized);
}

#[tokio::test]
async fn verify_rejects_short_code_before_lookup() {
    let h = setup().await;
    let err = verify_otp(
        &h.ctx,
        &VerifyOtpRequest {
            email: None,
            otp: Some("12345".into()),
        },
    )
    .await
    .expect_err("short code");
    assert_eq!(err.code, ErrorCode::Validation);
    assert_eq!(err.message, "OTP must be 6 characters long");
}

#[tokio::test]
async fn verify_rejects_expired_code() {
    let mut h = setup().await;
    h.ctx.auth.otp_ttl = chrono::Duration::zero();
    sign_up(&h.ctx, &sign_up_request("ada@example.com"))
        .await
        .expect("sign up");
    let otp = h.outbox.last_code_for("ada@example.com").expect("code");

    let err = verify_otp(
        &h.ctx,
        &VerifyOtpRequest {
            email: None,
            otp: Some(otp),
        },
    )
    .await
    .expect_err("expired");
    assert_eq!(err.code, ErrorCode::Validation);
    assert!(err.fields.iter().any(|f| f.field == "otp"));
}

#[tokio::test]
async fn resend_replaces_code() {
    let h = setup().await;
    sign_up(&h.ctx, &sign_up_request("ada@example.com"))
        .await
        .expect("sign up");
    resend_code(
        &h.ctx,
        &ResendCodeRequest {
            email: Some("ada@example.com".into()),
        },
    )
    .await
    .expect("resend");
    assert_eq!(h.outbox.sent_count(), 2);

    let latest = h.outbox.last_code_for("ada@example.com").expect("code");
    let stored = h
        .ctx
        .storage
        .find_user_by_email("ada@example.com")
        .await
        .expect("load")
        .expect("user");
    assert_eq!(stored.otp_code.as_deref(), Some(latest.as_str()));
}

#[tokio::test]
async fn resend_for_unknown_or_verified_accounts_fails() {
    let h = setup().await;
    let err = resend_code(
        &h.ctx,
        &ResendCodeRequest {
            email: Some("ghost@example.com".into()),
        },
    )
    .await
    .expect_err("unknown");
    assert_eq!(err.code, ErrorCode::NotFound);

    verified(&h, "ada@example.com").await;
    let err = resend_code(
        &h.ctx,
        &ResendCodeRequest {
            email: Some("ada@example.com".into()),
        },
    )
    .await
    .expect_err("already verified");
    assert_eq!(err.code, ErrorCode::Conflict);
}

#[tokio::test]
async fn profile_lifecycle() {
    let h = setup().await;
    let session = verified(&h, "ada@example.com").await;
    let user = session.user.user_id;

    let err = get_profile(&h.ctx, user).await.expect_err("missing");
    assert_eq!(err.code, ErrorCode::NotFound);

    let created = create_profile(&h.ctx, user, &profile_request())
        .await
        .expect("create");
    assert_eq!(created.passport_number.as_deref(), Some("X1234567"));

    let err = create_profile(&h.ctx, user, &profile_request())
        .await
        .expect_err("exists");
    assert_eq!(err.code, ErrorCode::Conflict);

    let updated = update_profile(
        &h.ctx,
        user,
        &ProfileRequest {
            passport_number: Some(String::new()),
            nationality: Some("Irish".into()),
            ..ProfileRequest::default()
        },
    )
    .await
    .expect("update");
    assert_eq!(updated.passport_number, None);
    assert_eq!(updated.nationality, "Irish");
    assert_eq!(updated.first_name, "Ada");

    let unchanged = update_profile(&h.ctx, user, &ProfileRequest::default())
        .await
        .expect("empty update");
    assert_eq!(unchanged, updated);
}

#[tokio::test]
async fn settings_default_to_nulls_and_merge_updates() {
    let h = setup().await;
    let session = verified(&h, "ada@example.com").await;
    let company = h.ctx.storage.create_company("Acme").await.expect("company");

    let empty = get_settings(&h.ctx, company).await.expect("settings");
    assert_eq!(empty.color, None);
    assert_eq!(empty.company_name, None);

    let updated = update_settings(
        &h.ctx,
        session.user.user_id,
        company,
        &UpdateSettingsRequest {
            color: Some("#123456".into()),
            logo_url: None,
            company_name: Some("Acme Careers".into()),
        },
    )
    .await
    .expect("update");
    assert_eq!(updated.color.as_deref(), Some("#123456"));
    assert_eq!(get_settings(&h.ctx, company).await.expect("settings"), updated);

    let err = get_settings(&h.ctx, CompanyId(company.0 + 100))
        .await
        .expect_err("unknown company");
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn applying_twice_conflicts_and_closed_jobs_refuse() {
    let h = setup().await;
    let session = verified(&h, "ada@example.com").await;
    let user = session.user.user_id;
    let company = h.ctx.storage.create_company("Acme").await.expect("company");
    let job = h
        .ctx
        .storage
        .create_job(company, "Engineer", "Build things")
        .await
        .expect("job");

    let application = apply_to_job(
        &h.ctx,
        user,
        job,
        &ApplyRequest {
            cover_letter: Some("Hire me".into()),
        },
    )
    .await
    .expect("apply");
    assert_eq!(application.company_id, company);

    let err = apply_to_job(&h.ctx, user, job, &ApplyRequest::default())
        .await
        .expect_err("duplicate");
    assert_eq!(err.code, ErrorCode::Conflict);

    let listed = list_applications(&h.ctx, user, company)
        .await
        .expect("list");
    assert_eq!(listed.len(), 1);

    h.ctx.storage.set_job_open(job, false).await.expect("close");
    assert!(list_jobs(&h.ctx, company).await.expect("jobs").is_empty());
    let other = verified(&h, "bob@example.com").await;
    let err = apply_to_job(&h.ctx, other.user.user_id, job, &ApplyRequest::default())
        .await
        .expect_err("closed");
    assert_eq!(err.code, ErrorCode::Conflict);
}

#[tokio::test]
async fn authenticate_rejects_garbage_tokens() {
    let h = setup().await;
    let err = authenticate(&h.ctx, "not-a-token")
        .await
        .expect_err("garbage");
    assert_eq!(err.code, ErrorCode::Unauthorized);
}
