use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use client_core::{PortalStore, Session};
use serde::{Deserialize, Serialize};
use shared::domain::UserSummary;
use tracing::warn;

/// What survives between two CLI invocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SavedSession {
    AwaitingVerification { email: String },
    SignedIn { token: String, user: UserSummary },
}

impl SavedSession {
    pub fn capture(session: &Session) -> Option<Self> {
        match session {
            Session::SignedOut => None,
            Session::AwaitingVerification { email } => Some(Self::AwaitingVerification {
                email: email.clone(),
            }),
            Session::SignedIn { token, user } => Some(Self::SignedIn {
                token: token.clone(),
                user: user.clone(),
            }),
        }
    }

    pub fn restore(self, store: &PortalStore) -> Result<()> {
        match self {
            Self::AwaitingVerification { email } => store.resume_verification(&email)?,
            Self::SignedIn { token, user } => store.resume_session(token, user)?,
        }
        Ok(())
    }
}

pub struct SessionFile {
    path: PathBuf,
}

impl SessionFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file means signed out. An unreadable one is reported and
    /// treated the same way.
    pub fn load(&self) -> Option<SavedSession> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "failed to read session file");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(saved) => Some(saved),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "ignoring malformed session file");
                None
            }
        }
    }

    /// Writes the session, or removes the file once signed out.
    pub fn store(&self, session: &Session) -> Result<()> {
        let Some(saved) = SavedSession::capture(session) else {
            return self.clear();
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create session directory {}", parent.display())
                })?;
            }
        }
        let raw = serde_json::to_string_pretty(&saved)?;
        fs::write(&self.path, raw)
            .with_context(|| format!("failed to write session file {}", self.path.display()))
    }

    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| {
                format!("failed to remove session file {}", self.path.display())
            }),
        }
    }
}

#[cfg(test)]
#[path = "tests/session_file_tests.rs"]
mod tests;
