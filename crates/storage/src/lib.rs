use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::{
    domain::{
        ApplicationId, ApplicationStatus, ApplicationSummary, CompanyId, Gender, JobId, JobSummary,
        Profile, UserId, UserSummary,
    },
    validation::{NewProfile, ProfilePatch, SettingsPatch},
};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct StoredUser {
    pub user_id: UserId,
    pub email: String,
    pub full_name: String,
    pub password_digest: String,
    pub password_salt: String,
    pub verified: bool,
    pub otp_code: Option<String>,
    pub otp_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl StoredUser {
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            user_id: self.user_id,
            email: self.email.clone(),
            full_name: self.full_name.clone(),
            verified: self.verified,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewUser<'a> {
    pub email: &'a str,
    pub full_name: &'a str,
    pub password_digest: &'a str,
    pub password_salt: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSettings {
    pub company_id: CompanyId,
    pub color: Option<String>,
    pub logo_url: Option<String>,
    pub company_name: Option<String>,
    pub updated_at: DateTime<Utc>,
}

const USER_COLUMNS: &str = "id, email, full_name, password_digest, password_salt, verified, otp_code, otp_expires_at, created_at";

const PROFILE_COLUMNS: &str = "user_id, first_name, middle_name, last_name, date_of_birth, gender, phone, nationality, address, passport_number, relative_in_organisation, updated_at";

const APPLICATION_SELECT: &str = "SELECT a.id, a.job_id, a.company_id, a.applicant_user_id, j.title, a.status, a.cover_letter, a.created_at, a.updated_at
     FROM applications a
     INNER JOIN jobs j ON j.id = a.job_id";

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Inserts an unverified user. Returns `None` when the email is taken.
    pub async fn create_user(&self, user: &NewUser<'_>) -> Result<Option<UserId>> {
        let row = sqlx::query(
            "INSERT INTO users (email, full_name, password_digest, password_salt, verified, created_at)
             VALUES (?, ?, ?, ?, 0, ?)
             ON CONFLICT(email) DO NOTHING
             RETURNING id",
        )
        .bind(user.email)
        .bind(user.full_name)
        .bind(user.password_digest)
        .bind(user.password_salt)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .context("failed to insert user")?;
        Ok(row.map(|r| UserId(r.get::<i64, _>(0))))
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<StoredUser>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?"))
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(user_from_row))
    }

    pub async fn find_user(&self, user_id: UserId) -> Result<Option<StoredUser>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(user_from_row))
    }

    pub async fn set_pending_code(
        &self,
        user_id: UserId,
        code: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE users SET otp_code = ?, otp_expires_at = ? WHERE id = ?")
            .bind(code)
            .bind(expires_at)
            .bind(user_id.0)
            .execute(&self.pool)
            .await
            .context("failed to store one-time code")?;
        Ok(())
    }

    /// Whether an unverified account currently holds `code`.
    pub async fn pending_code_in_use(&self, code: &str) -> Result<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE otp_code = ? AND verified = 0")
                .bind(code)
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }

    /// Finds the unverified user holding `code`, optionally narrowed by email.
    /// Expiry is left to the caller.
    pub async fn find_user_by_pending_code(
        &self,
        code: &str,
        email: Option<&str>,
    ) -> Result<Option<StoredUser>> {
        let row = match email {
            Some(email) => {
                sqlx::query(&format!(
                    "SELECT {USER_COLUMNS} FROM users WHERE otp_code = ? AND email = ? AND verified = 0"
                ))
                .bind(code)
                .bind(email)
                .fetch_optional(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {USER_COLUMNS} FROM users WHERE otp_code = ? AND verified = 0"
                ))
                .bind(code)
                .fetch_optional(&self.pool)
                .await?
            }
        };
        Ok(row.as_ref().map(user_from_row))
    }

    pub async fn mark_verified(&self, user_id: UserId) -> Result<()> {
        sqlx::query(
            "UPDATE users SET verified = 1, otp_code = NULL, otp_expires_at = NULL WHERE id = ?",
        )
        .bind(user_id.0)
        .execute(&self.pool)
        .await
        .context("failed to mark user verified")?;
        Ok(())
    }

    pub async fn create_company(&self, name: &str) -> Result<CompanyId> {
        let rec = sqlx::query("INSERT INTO companies (name, created_at) VALUES (?, ?) RETURNING id")
            .bind(name)
            .bind(Utc::now())
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("failed to create company '{name}'"))?;
        Ok(CompanyId(rec.get::<i64, _>(0)))
    }

    pub async fn company_exists(&self, company_id: CompanyId) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM companies WHERE id = ?")
            .bind(company_id.0)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    pub async fn list_companies(&self) -> Result<Vec<(CompanyId, String)>> {
        let rows = sqlx::query("SELECT id, name FROM companies ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| (CompanyId(r.get::<i64, _>(0)), r.get::<String, _>(1)))
            .collect())
    }

    pub async fn load_settings(&self, company_id: CompanyId) -> Result<Option<StoredSettings>> {
        let row = sqlx::query(
            "SELECT company_id, color, logo_url, company_name, updated_at
             FROM company_settings WHERE company_id = ?",
        )
        .bind(company_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| StoredSettings {
            company_id: CompanyId(r.get::<i64, _>(0)),
            color: r.get::<Option<String>, _>(1),
            logo_url: r.get::<Option<String>, _>(2),
            company_name: r.get::<Option<String>, _>(3),
            updated_at: r.get::<DateTime<Utc>, _>(4),
        }))
    }

    /// Inserts or merges settings; absent patch fields keep the stored value.
    pub async fn upsert_settings(
        &self,
        company_id: CompanyId,
        patch: &SettingsPatch,
    ) -> Result<StoredSettings> {
        let row = sqlx::query(
            "INSERT INTO company_settings (company_id, color, logo_url, company_name, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(company_id) DO UPDATE SET
                color = COALESCE(excluded.color, color),
                logo_url = COALESCE(excluded.logo_url, logo_url),
                company_name = COALESCE(excluded.company_name, company_name),
                updated_at = excluded.updated_at
             RETURNING company_id, color, logo_url, company_name, updated_at",
        )
        .bind(company_id.0)
        .bind(patch.color.as_deref())
        .bind(patch.logo_url.as_deref())
        .bind(patch.company_name.as_deref())
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .context("failed to upsert company settings")?;
        Ok(StoredSettings {
            company_id: CompanyId(row.get::<i64, _>(0)),
            color: row.get::<Option<String>, _>(1),
            logo_url: row.get::<Option<String>, _>(2),
            company_name: row.get::<Option<String>, _>(3),
            updated_at: row.get::<DateTime<Utc>, _>(4),
        })
    }

    /// Returns `None` when the user already has a profile.
    pub async fn create_profile(
        &self,
        user_id: UserId,
        profile: &NewProfile,
    ) -> Result<Option<Profile>> {
        let row = sqlx::query(&format!(
            "INSERT INTO profiles ({PROFILE_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(user_id) DO NOTHING
             RETURNING {PROFILE_COLUMNS}"
        ))
        .bind(user_id.0)
        .bind(&profile.first_name)
        .bind(profile.middle_name.as_deref())
        .bind(&profile.last_name)
        .bind(profile.date_of_birth)
        .bind(profile.gender.as_str())
        .bind(&profile.phone)
        .bind(&profile.nationality)
        .bind(&profile.address)
        .bind(profile.passport_number.as_deref())
        .bind(profile.relative_in_organisation)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .context("failed to insert profile")?;
        row.as_ref().map(profile_from_row).transpose()
    }

    pub async fn load_profile(&self, user_id: UserId) -> Result<Option<Profile>> {
        let row = sqlx::query(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE user_id = ?"
        ))
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(profile_from_row).transpose()
    }

    /// Applies the present fields of `patch`. Returns `None` when no profile
    /// exists for the user.
    pub async fn update_profile(
        &self,
        user_id: UserId,
        patch: &ProfilePatch,
    ) -> Result<Option<Profile>> {
        let row = sqlx::query(&format!(
            "UPDATE profiles SET
                first_name = COALESCE(?, first_name),
                middle_name = CASE WHEN ? THEN ? ELSE middle_name END,
                last_name = COALESCE(?, last_name),
                date_of_birth = COALESCE(?, date_of_birth),
                gender = COALESCE(?, gender),
                phone = COALESCE(?, phone),
                nationality = COALESCE(?, nationality),
                address = COALESCE(?, address),
                passport_number = CASE WHEN ? THEN ? ELSE passport_number END,
                relative_in_organisation = COALESCE(?, relative_in_organisation),
                updated_at = ?
             WHERE user_id = ?
             RETURNING {PROFILE_COLUMNS}"
        ))
        .bind(patch.first_name.as_deref())
        .bind(patch.middle_name.is_some())
        .bind(patch.middle_name.clone().flatten())
        .bind(patch.last_name.as_deref())
        .bind(patch.date_of_birth)
        .bind(patch.gender.map(Gender::as_str))
        .bind(patch.phone.as_deref())
        .bind(patch.nationality.as_deref())
        .bind(patch.address.as_deref())
        .bind(patch.passport_number.is_some())
        .bind(patch.passport_number.clone().flatten())
        .bind(patch.relative_in_organisation)
        .bind(Utc::now())
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await
        .context("failed to update profile")?;
        row.as_ref().map(profile_from_row).transpose()
    }

    pub async fn create_job(
        &self,
        company_id: CompanyId,
        title: &str,
        description: &str,
    ) -> Result<JobId> {
        let rec = sqlx::query(
            "INSERT INTO jobs (company_id, title, description, open, created_at)
             VALUES (?, ?, ?, 1, ?) RETURNING id",
        )
        .bind(company_id.0)
        .bind(title)
        .bind(description)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .context("failed to create job")?;
        Ok(JobId(rec.get::<i64, _>(0)))
    }

    pub async fn set_job_open(&self, job_id: JobId, open: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE jobs SET open = ? WHERE id = ?")
            .bind(open)
            .bind(job_id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn find_job(&self, job_id: JobId) -> Result<Option<JobSummary>> {
        let row = sqlx::query(
            "SELECT id, company_id, title, description, open FROM jobs WHERE id = ?",
        )
        .bind(job_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(job_from_row))
    }

    pub async fn list_open_jobs(&self, company_id: CompanyId) -> Result<Vec<JobSummary>> {
        let rows = sqlx::query(
            "SELECT id, company_id, title, description, open
             FROM jobs
             WHERE company_id = ? AND open = 1
             ORDER BY id DESC",
        )
        .bind(company_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(job_from_row).collect())
    }

    /// Returns `None` when the applicant already applied to the job.
    pub async fn create_application(
        &self,
        job: &JobSummary,
        applicant_id: UserId,
        cover_letter: Option<&str>,
    ) -> Result<Option<ApplicationSummary>> {
        let now = Utc::now();
        let row = sqlx::query(
            "INSERT INTO applications (job_id, company_id, applicant_user_id, status, cover_letter, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(job_id, applicant_user_id) DO NOTHING
             RETURNING id",
        )
        .bind(job.job_id.0)
        .bind(job.company_id.0)
        .bind(applicant_id.0)
        .bind(ApplicationStatus::Submitted.as_str())
        .bind(cover_letter)
        .bind(now)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .context("failed to insert application")?;

        Ok(row.map(|r| ApplicationSummary {
            application_id: ApplicationId(r.get::<i64, _>(0)),
            job_id: job.job_id,
            company_id: job.company_id,
            applicant_id,
            job_title: job.title.clone(),
            status: ApplicationStatus::Submitted,
            cover_letter: cover_letter.map(str::to_string),
            created_at: now,
            updated_at: now,
        }))
    }

    pub async fn list_applications_for_company(
        &self,
        company_id: CompanyId,
    ) -> Result<Vec<ApplicationSummary>> {
        let rows = sqlx::query(&format!(
            "{APPLICATION_SELECT}
             WHERE a.company_id = ?
             ORDER BY a.created_at DESC, a.id DESC"
        ))
        .bind(company_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(application_from_row).collect()
    }

    pub async fn set_application_status(
        &self,
        application_id: ApplicationId,
        status: ApplicationStatus,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE applications SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now())
            .bind(application_id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn user_from_row(r: &SqliteRow) -> StoredUser {
    StoredUser {
        user_id: UserId(r.get::<i64, _>(0)),
        email: r.get::<String, _>(1),
        full_name: r.get::<String, _>(2),
        password_digest: r.get::<String, _>(3),
        password_salt: r.get::<String, _>(4),
        verified: r.get::<bool, _>(5),
        otp_code: r.get::<Option<String>, _>(6),
        otp_expires_at: r.get::<Option<DateTime<Utc>>, _>(7),
        created_at: r.get::<DateTime<Utc>, _>(8),
    }
}

fn profile_from_row(r: &SqliteRow) -> Result<Profile> {
    let user_id = UserId(r.get::<i64, _>(0));
    let gender = r.get::<String, _>(5);
    let gender = gender
        .parse::<Gender>()
        .with_context(|| format!("profile of user {user_id} has invalid gender '{gender}'"))?;
    Ok(Profile {
        user_id,
        first_name: r.get::<String, _>(1),
        middle_name: r.get::<Option<String>, _>(2),
        last_name: r.get::<String, _>(3),
        date_of_birth: r.get::<NaiveDate, _>(4),
        gender,
        phone: r.get::<String, _>(6),
        nationality: r.get::<String, _>(7),
        address: r.get::<String, _>(8),
        passport_number: r.get::<Option<String>, _>(9),
        relative_in_organisation: r.get::<bool, _>(10),
        updated_at: r.get::<DateTime<Utc>, _>(11),
    })
}

fn job_from_row(r: &SqliteRow) -> JobSummary {
    JobSummary {
        job_id: JobId(r.get::<i64, _>(0)),
        company_id: CompanyId(r.get::<i64, _>(1)),
        title: r.get::<String, _>(2),
        description: r.get::<String, _>(3),
        open: r.get::<bool, _>(4),
    }
}

fn application_from_row(r: &SqliteRow) -> Result<ApplicationSummary> {
    let application_id = ApplicationId(r.get::<i64, _>(0));
    let status = r.get::<String, _>(5);
    let status = status.parse::<ApplicationStatus>().with_context(|| {
        format!("application {application_id} has invalid status '{status}'")
    })?;
    Ok(ApplicationSummary {
        application_id,
        job_id: JobId(r.get::<i64, _>(1)),
        company_id: CompanyId(r.get::<i64, _>(2)),
        applicant_id: UserId(r.get::<i64, _>(3)),
        job_title: r.get::<String, _>(4),
        status,
        cover_letter: r.get::<Option<String>, _>(6),
        created_at: r.get::<DateTime<Utc>, _>(7),
        updated_at: r.get::<DateTime<Utc>, _>(8),
    })
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
