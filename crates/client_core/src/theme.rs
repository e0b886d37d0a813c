use async_trait::async_trait;
use shared::{domain::CompanyId, protocol::SettingsPayload, validation::is_hex_color};
use tracing::{debug, warn};

use crate::{error::ClientError, remote::PortalClient};

pub const DEFAULT_COLOR: &str = "#094BAC";
pub const DEFAULT_LOGO: &str = "/assets/logo.svg";
pub const DEFAULT_COMPANY_NAME: &str = "ROM";

/// Fully resolved branding; every field is always populated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branding {
    pub color: String,
    pub logo: String,
    pub company_name: String,
}

impl Default for Branding {
    fn default() -> Self {
        Self {
            color: DEFAULT_COLOR.to_string(),
            logo: DEFAULT_LOGO.to_string(),
            company_name: DEFAULT_COMPANY_NAME.to_string(),
        }
    }
}

impl Branding {
    /// Overlays whatever the settings payload provides on the defaults.
    /// Blank fields and colors that are not `#RGB`/`#RRGGBB` keep the default.
    pub fn resolve(settings: Option<&SettingsPayload>) -> Self {
        let mut branding = Self::default();
        let Some(settings) = settings else {
            return branding;
        };

        match present(&settings.color) {
            Some(color) if is_hex_color(color) => branding.color = color.to_string(),
            Some(color) => debug!(%color, "ignoring malformed brand color"),
            None => {}
        }
        if let Some(logo) = present(&settings.logo_url) {
            branding.logo = logo.to_string();
        }
        if let Some(name) = present(&settings.company_name) {
            branding.company_name = name.to_string();
        }
        branding
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[async_trait]
pub trait SettingsSource: Send + Sync {
    async fn load_settings(&self, company_id: CompanyId) -> Result<SettingsPayload, ClientError>;
}

#[async_trait]
impl SettingsSource for PortalClient {
    async fn load_settings(&self, company_id: CompanyId) -> Result<SettingsPayload, ClientError> {
        self.get_settings(company_id).await
    }
}

/// Never fails: a settings error is logged and the defaults are used.
pub async fn load_branding(source: &dyn SettingsSource, company_id: CompanyId) -> Branding {
    match source.load_settings(company_id).await {
        Ok(settings) => Branding::resolve(Some(&settings)),
        Err(error) => {
            warn!(
                company_id = %company_id,
                %error,
                "could not load company settings; using default branding"
            );
            Branding::default()
        }
    }
}

#[cfg(test)]
#[path = "tests/theme_tests.rs"]
mod tests;
