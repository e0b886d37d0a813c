use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{ApplicationSummary, CompanyId, JobId, JobSummary, Profile},
    error::{ApiError, ErrorCode},
    protocol::{
        ApplyRequest, AuthResponse, PendingVerificationResponse, ProfileRequest,
        ResendCodeRequest, SettingsPayload, SignInRequest, SignUpRequest, UpdateSettingsRequest,
        VerifyOtpRequest,
    },
};
use tracing::debug;
use url::Url;

use crate::{error::ClientError, fetch::CollectionSource};

/// Bearer token shared between the session and the sources that need it.
#[derive(Debug, Clone, Default)]
pub struct BearerToken(Arc<RwLock<Option<String>>>);

impl BearerToken {
    pub fn get(&self) -> Option<String> {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set(&self, token: impl Into<String>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = Some(token.into());
    }

    pub fn clear(&self) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn require(&self) -> Result<String, ClientError> {
        self.get().ok_or(ClientError::SignedOut)
    }
}

#[derive(Clone)]
pub struct PortalClient {
    http: Client,
    base_url: Url,
}

impl PortalClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let mut base_url =
            Url::parse(base_url).map_err(|e| ClientError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(base_url.to_string()));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            http: Client::new(),
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn sign_up(
        &self,
        request: &SignUpRequest,
    ) -> Result<PendingVerificationResponse, ClientError> {
        let url = self.endpoint(&["auth", "sign-up"])?;
        read_json(self.http.post(url).json(request)).await
    }

    pub async fn sign_in(&self, request: &SignInRequest) -> Result<AuthResponse, ClientError> {
        let url = self.endpoint(&["auth", "sign-in"])?;
        read_json(self.http.post(url).json(request)).await
    }

    pub async fn verify(&self, request: &VerifyOtpRequest) -> Result<AuthResponse, ClientError> {
        let url = self.endpoint(&["auth", "verify"])?;
        read_json(self.http.post(url).json(request)).await
    }

    pub async fn resend_code(
        &self,
        request: &ResendCodeRequest,
    ) -> Result<PendingVerificationResponse, ClientError> {
        let url = self.endpoint(&["auth", "resend-code"])?;
        read_json(self.http.post(url).json(request)).await
    }

    pub async fn get_profile(&self, token: &str) -> Result<Profile, ClientError> {
        let url = self.endpoint(&["profile"])?;
        read_json(self.http.get(url).bearer_auth(token)).await
    }

    pub async fn create_profile(
        &self,
        token: &str,
        request: &ProfileRequest,
    ) -> Result<Profile, ClientError> {
        let url = self.endpoint(&["profile"])?;
        read_json(self.http.post(url).bearer_auth(token).json(request)).await
    }

    pub async fn update_profile(
        &self,
        token: &str,
        request: &ProfileRequest,
    ) -> Result<Profile, ClientError> {
        let url = self.endpoint(&["profile"])?;
        read_json(self.http.patch(url).bearer_auth(token).json(request)).await
    }

    pub async fn get_settings(
        &self,
        company_id: CompanyId,
    ) -> Result<SettingsPayload, ClientError> {
        let url = self.endpoint(&["settings", &company_id.to_string()])?;
        read_json(self.http.get(url)).await
    }

    pub async fn update_settings(
        &self,
        token: &str,
        company_id: CompanyId,
        request: &UpdateSettingsRequest,
    ) -> Result<SettingsPayload, ClientError> {
        let url = self.endpoint(&["settings", &company_id.to_string()])?;
        read_json(self.http.put(url).bearer_auth(token).json(request)).await
    }

    pub async fn list_jobs(&self, owner_key: &str) -> Result<Vec<JobSummary>, ClientError> {
        let url = self.endpoint(&["companies", owner_key, "jobs"])?;
        read_json(self.http.get(url)).await
    }

    pub async fn list_applications(
        &self,
        token: &str,
        owner_key: &str,
    ) -> Result<Vec<ApplicationSummary>, ClientError> {
        let url = self.endpoint(&["companies", owner_key, "applications"])?;
        read_json(self.http.get(url).bearer_auth(token)).await
    }

    pub async fn apply(
        &self,
        token: &str,
        job_id: JobId,
        request: &ApplyRequest,
    ) -> Result<ApplicationSummary, ClientError> {
        let url = self.endpoint(&["jobs", &job_id.to_string(), "applications"])?;
        read_json(self.http.post(url).bearer_auth(token).json(request)).await
    }

    /// Appends percent-encoded `segments` to the base url.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

async fn read_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ClientError> {
    let response = request.send().await?;
    let response = check_status(response).await?;
    Ok(response.json().await?)
}

/// Turns a non-success response into the server's `ApiError`, or a generic
/// one when the body is not an `ApiError`.
async fn check_status(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    debug!(%status, "request rejected");
    let error = serde_json::from_str::<ApiError>(&body).unwrap_or_else(|_| {
        let code = match status.as_u16() {
            400 | 413 | 415 | 422 => ErrorCode::Validation,
            401 => ErrorCode::Unauthorized,
            403 => ErrorCode::Forbidden,
            404 => ErrorCode::NotFound,
            409 => ErrorCode::Conflict,
            _ => ErrorCode::Internal,
        };
        let message = if body.trim().is_empty() {
            status.to_string()
        } else {
            body
        };
        ApiError::new(code, message)
    });
    Err(error.into())
}

/// Applications of one company, read with the current bearer token.
#[derive(Clone)]
pub struct ApplicationsSource {
    client: PortalClient,
    token: BearerToken,
}

impl ApplicationsSource {
    pub fn new(client: PortalClient, token: BearerToken) -> Self {
        Self { client, token }
    }
}

#[async_trait]
impl CollectionSource for ApplicationsSource {
    type Record = ApplicationSummary;

    async fn fetch_collection(
        &self,
        owner_key: &str,
    ) -> Result<Vec<ApplicationSummary>, ClientError> {
        let token = self.token.require()?;
        self.client.list_applications(&token, owner_key).await
    }
}

/// Open jobs of one company; public.
#[derive(Clone)]
pub struct JobsSource {
    client: PortalClient,
}

impl JobsSource {
    pub fn new(client: PortalClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CollectionSource for JobsSource {
    type Record = JobSummary;

    async fn fetch_collection(&self, owner_key: &str) -> Result<Vec<JobSummary>, ClientError> {
        self.client.list_jobs(owner_key).await
    }
}
