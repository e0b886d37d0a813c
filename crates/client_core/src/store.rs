use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use shared::{
    domain::{ApplicationSummary, CompanyId, JobId, JobSummary, Profile, UserSummary},
    error::ErrorCode,
    protocol::{
        ApplyRequest, AuthResponse, PendingVerificationResponse, ProfileRequest,
        ResendCodeRequest, SettingsPayload, SignInRequest, SignUpRequest, UpdateSettingsRequest,
        VerifyOtpRequest,
    },
};
use tracing::info;

use crate::{
    error::ClientError,
    fetch::FetchController,
    freshness::{Clock, FreshnessPolicy, SystemClock, APPLICATIONS_WINDOW, JOBS_WINDOW},
    remote::{ApplicationsSource, BearerToken, JobsSource, PortalClient},
    session::Session,
    theme::{load_branding, Branding},
};

pub struct StoreConfig {
    pub server_url: String,
    pub applications: FreshnessPolicy,
    pub jobs: FreshnessPolicy,
    pub clock: Arc<dyn Clock>,
}

impl StoreConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            applications: FreshnessPolicy::new(APPLICATIONS_WINDOW),
            jobs: FreshnessPolicy::new(JOBS_WINDOW),
            clock: Arc::new(SystemClock),
        }
    }
}

/// Client-side state of the portal: session, branding, and the
/// owner-scoped collections of the selected company.
///
/// Built in three steps: [`PortalStore::create`], [`PortalStore::hydrate`]
/// and [`PortalStore::mount`]. [`PortalStore::open`] runs all three.
pub struct PortalStore {
    client: PortalClient,
    token: BearerToken,
    session: Mutex<Session>,
    branding: RwLock<Branding>,
    company: RwLock<Option<CompanyId>>,
    applications: FetchController<ApplicationsSource>,
    jobs: FetchController<JobsSource>,
}

impl PortalStore {
    pub fn create(config: StoreConfig) -> Result<Self, ClientError> {
        let client = PortalClient::new(&config.server_url)?;
        let token = BearerToken::default();
        let applications = FetchController::new(
            "applications",
            Arc::new(ApplicationsSource::new(client.clone(), token.clone())),
            config.applications,
            Arc::clone(&config.clock),
        );
        let jobs = FetchController::new(
            "jobs",
            Arc::new(JobsSource::new(client.clone())),
            config.jobs,
            config.clock,
        );

        Ok(Self {
            client,
            token,
            session: Mutex::new(Session::default()),
            branding: RwLock::new(Branding::default()),
            company: RwLock::new(None),
            applications,
            jobs,
        })
    }

    /// Loads the company's branding; defaults are kept when that fails.
    pub async fn hydrate(&self, company_id: CompanyId) -> Branding {
        let branding = load_branding(&self.client, company_id).await;
        *self.branding.write().unwrap_or_else(PoisonError::into_inner) = branding.clone();
        branding
    }

    /// Selects the company whose collections the store tracks.
    pub fn mount(&self, company_id: CompanyId) {
        let owner_key = company_id.to_string();
        *self.company.write().unwrap_or_else(PoisonError::into_inner) = Some(company_id);
        self.applications.select_owner(&owner_key);
        self.jobs.select_owner(&owner_key);
        info!(%company_id, "company mounted");
    }

    pub async fn open(config: StoreConfig, company_id: CompanyId) -> Result<Self, ClientError> {
        let store = Self::create(config)?;
        store.hydrate(company_id).await;
        store.mount(company_id);
        Ok(store)
    }

    pub fn client(&self) -> &PortalClient {
        &self.client
    }

    pub fn branding(&self) -> Branding {
        self.branding
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn company(&self) -> Option<CompanyId> {
        *self.company.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn session(&self) -> Session {
        self.lock_session().clone()
    }

    pub fn applications(&self) -> &FetchController<ApplicationsSource> {
        &self.applications
    }

    pub fn jobs(&self) -> &FetchController<JobsSource> {
        &self.jobs
    }

    /// Applications of the mounted company. Without a mounted company this
    /// resolves to an empty list.
    pub async fn refresh_applications(
        &self,
        force: bool,
    ) -> Result<Vec<ApplicationSummary>, ClientError> {
        self.applications.fetch(&self.owner_key(), force).await
    }

    pub async fn refresh_jobs(&self, force: bool) -> Result<Vec<JobSummary>, ClientError> {
        self.jobs.fetch(&self.owner_key(), force).await
    }

    pub async fn sign_up(
        &self,
        request: &SignUpRequest,
    ) -> Result<PendingVerificationResponse, ClientError> {
        self.lock_session().ensure_signed_out("sign up")?;
        let pending = self.client.sign_up(request).await?;
        self.lock_session().await_verification(pending.email.clone())?;
        Ok(pending)
    }

    /// Signs in, or moves to awaiting verification when the server reports
    /// the account unverified. Returns the resulting session.
    pub async fn sign_in(&self, request: &SignInRequest) -> Result<Session, ClientError> {
        self.lock_session().ensure_signed_out("sign in")?;
        match self.client.sign_in(request).await {
            Ok(auth) => self.establish(auth)?,
            Err(error) if error.remote_code() == Some(ErrorCode::Unverified) => {
                let email = request
                    .email
                    .as_deref()
                    .map(|email| email.trim().to_ascii_lowercase())
                    .unwrap_or_default();
                self.lock_session().await_verification(email)?;
            }
            Err(error) => return Err(error),
        }
        Ok(self.session())
    }

    /// Picks up a verification started elsewhere, e.g. by an earlier run.
    pub fn resume_verification(&self, email: &str) -> Result<(), ClientError> {
        let email = email.trim().to_ascii_lowercase();
        self.lock_session().await_verification(email)?;
        Ok(())
    }

    /// Restores a session whose token was obtained earlier.
    pub fn resume_session(&self, token: String, user: UserSummary) -> Result<(), ClientError> {
        self.lock_session().sign_in(token.clone(), user)?;
        self.token.set(token);
        Ok(())
    }

    pub async fn verify(&self, otp: &str) -> Result<AuthResponse, ClientError> {
        let email = self
            .lock_session()
            .ensure_awaiting_verification("verify")?
            .to_string();
        let auth = self
            .client
            .verify(&VerifyOtpRequest {
                email: Some(email),
                otp: Some(otp.to_string()),
            })
            .await?;
        self.establish(auth.clone())?;
        Ok(auth)
    }

    pub async fn resend_code(&self) -> Result<PendingVerificationResponse, ClientError> {
        let email = self
            .lock_session()
            .ensure_awaiting_verification("resend code")?
            .to_string();
        self.client
            .resend_code(&ResendCodeRequest { email: Some(email) })
            .await
    }

    /// Drops the session and everything fetched under it.
    pub fn sign_out(&self) -> Result<(), ClientError> {
        self.lock_session().sign_out()?;
        self.token.clear();
        self.applications.reset();
        Ok(())
    }

    pub async fn profile(&self) -> Result<Profile, ClientError> {
        let token = self.require_token()?;
        self.client.get_profile(&token).await
    }

    pub async fn create_profile(&self, request: &ProfileRequest) -> Result<Profile, ClientError> {
        let token = self.require_token()?;
        self.client.create_profile(&token, request).await
    }

    pub async fn update_profile(&self, request: &ProfileRequest) -> Result<Profile, ClientError> {
        let token = self.require_token()?;
        self.client.update_profile(&token, request).await
    }

    /// Saves branding for the mounted company and re-resolves it locally.
    pub async fn update_settings(
        &self,
        request: &UpdateSettingsRequest,
    ) -> Result<SettingsPayload, ClientError> {
        let token = self.require_token()?;
        let company_id = self.company().ok_or(ClientError::NoCompany)?;
        let settings = self
            .client
            .update_settings(&token, company_id, request)
            .await?;
        *self.branding.write().unwrap_or_else(PoisonError::into_inner) =
            Branding::resolve(Some(&settings));
        Ok(settings)
    }

    /// Applies to a job; the applications collection is marked stale so the
    /// next refresh picks the new application up.
    pub async fn apply(
        &self,
        job_id: JobId,
        cover_letter: Option<String>,
    ) -> Result<ApplicationSummary, ClientError> {
        let token = self.require_token()?;
        let application = self
            .client
            .apply(&token, job_id, &ApplyRequest { cover_letter })
            .await?;
        if self.company() == Some(application.company_id) {
            self.applications.invalidate();
        }
        Ok(application)
    }

    fn establish(&self, auth: AuthResponse) -> Result<(), ClientError> {
        self.lock_session().sign_in(auth.token.clone(), auth.user)?;
        self.token.set(auth.token);
        Ok(())
    }

    fn require_token(&self) -> Result<String, ClientError> {
        self.token.get().ok_or(ClientError::SignedOut)
    }

    fn owner_key(&self) -> String {
        self.company()
            .map(|company_id| company_id.to_string())
            .unwrap_or_default()
    }

    fn lock_session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
