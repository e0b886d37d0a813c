use std::sync::Mutex;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use shared::{
    domain::UserId,
    error::{ApiError, ErrorCode},
    validation::OTP_LENGTH,
};
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_ttl: Duration,
    pub otp_ttl: Duration,
}

impl AuthConfig {
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            token_ttl: Duration::hours(12),
            otp_ttl: Duration::minutes(10),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: i64,
    email: String,
    iat: i64,
    exp: i64,
}

pub fn new_salt() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn password_digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    STANDARD.encode(hasher.finalize())
}

pub fn password_matches(salt: &str, password: &str, digest: &str) -> bool {
    let computed = password_digest(salt, password);
    // Same length by construction; compare without early exit.
    computed.len() == digest.len()
        && computed
            .bytes()
            .zip(digest.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

/// A random numeric code of [`OTP_LENGTH`] digits.
pub fn new_otp() -> String {
    let modulus = 10u128.pow(OTP_LENGTH as u32);
    let value = Uuid::new_v4().as_u128() % modulus;
    format!("{value:0width$}", width = OTP_LENGTH)
}

pub fn issue_token(
    config: &AuthConfig,
    user_id: UserId,
    email: &str,
) -> Result<(String, DateTime<Utc>), ApiError> {
    let issued_at = Utc::now();
    let expires_at = issued_at + config.token_ttl;
    let claims = Claims {
        sub: user_id.0,
        email: email.to_string(),
        iat: issued_at.timestamp(),
        exp: expires_at.timestamp(),
    };
    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| ApiError::new(ErrorCode::Internal, format!("token signing failed: {e}")))?;
    Ok((token, expires_at))
}

pub fn verify_token(config: &AuthConfig, token: &str) -> Result<UserId, ApiError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &validation,
    )
    .map_err(|_| ApiError::new(ErrorCode::Unauthorized, "invalid or expired session token"))?;
    Ok(UserId(data.claims.sub))
}

/// Hands a freshly issued one-time code to the account holder.
pub trait OtpDelivery: Send + Sync {
    fn deliver(&self, email: &str, code: &str, expires_at: DateTime<Utc>);
}

/// Writes the code to the log; stands in for a mail transport.
pub struct LogOtpDelivery;

impl OtpDelivery for LogOtpDelivery {
    fn deliver(&self, email: &str, code: &str, expires_at: DateTime<Utc>) {
        info!(%email, %code, %expires_at, "one-time code issued");
    }
}

/// Keeps every delivered code; useful for tests and local tooling.
#[derive(Default)]
pub struct RecordingOtpDelivery {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingOtpDelivery {
    pub fn last_code_for(&self, email: &str) -> Option<String> {
        self.sent
            .lock()
            .ok()?
            .iter()
            .rev()
            .find(|(to, _)| to == email)
            .map(|(_, code)| code.clone())
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().map(|sent| sent.len()).unwrap_or_default()
    }
}

impl OtpDelivery for RecordingOtpDelivery {
    fn deliver(&self, email: &str, code: &str, _expires_at: DateTime<Utc>) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((email.to_string(), code.to_string()));
        }
    }
}
