use shared::domain::UserSummary;

use crate::error::SessionError;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Session {
    #[default]
    SignedOut,
    AwaitingVerification {
        email: String,
    },
    SignedIn {
        token: String,
        user: UserSummary,
    },
}

impl Session {
    fn label(&self) -> &'static str {
        match self {
            Self::SignedOut => "signed out",
            Self::AwaitingVerification { .. } => "awaiting verification",
            Self::SignedIn { .. } => "signed in",
        }
    }

    fn refuse(&self, action: &'static str) -> SessionError {
        SessionError {
            action,
            state: self.label(),
        }
    }

    pub fn token(&self) -> Option<&str> {
        match self {
            Self::SignedIn { token, .. } => Some(token),
            _ => None,
        }
    }

    pub fn user(&self) -> Option<&UserSummary> {
        match self {
            Self::SignedIn { user, .. } => Some(user),
            _ => None,
        }
    }

    pub fn pending_email(&self) -> Option<&str> {
        match self {
            Self::AwaitingVerification { email } => Some(email),
            _ => None,
        }
    }

    /// Checks that a sign-up, sign-in or resend may start from here.
    pub fn ensure_signed_out(&self, action: &'static str) -> Result<(), SessionError> {
        match self {
            Self::SignedIn { .. } => Err(self.refuse(action)),
            _ => Ok(()),
        }
    }

    /// A code was issued for `email`; sign-up, resend, and an unverified
    /// sign-in all land here.
    pub fn await_verification(&mut self, email: impl Into<String>) -> Result<(), SessionError> {
        self.ensure_signed_out("await verification")?;
        *self = Self::AwaitingVerification {
            email: email.into(),
        };
        Ok(())
    }

    pub fn sign_in(&mut self, token: String, user: UserSummary) -> Result<(), SessionError> {
        self.ensure_signed_out("sign in")?;
        *self = Self::SignedIn { token, user };
        Ok(())
    }

    pub fn ensure_awaiting_verification(
        &self,
        action: &'static str,
    ) -> Result<&str, SessionError> {
        self.pending_email().ok_or_else(|| self.refuse(action))
    }

    pub fn sign_out(&mut self) -> Result<(), SessionError> {
        if matches!(self, Self::SignedOut) {
            return Err(self.refuse("sign out"));
        }
        *self = Self::SignedOut;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
