use super::*;
use shared::error::{ApiException, ErrorCode};

fn payload(color: Option<&str>, logo: Option<&str>, name: Option<&str>) -> SettingsPayload {
    SettingsPayload {
        company_id: CompanyId(1),
        color: color.map(str::to_string),
        logo_url: logo.map(str::to_string),
        company_name: name.map(str::to_string),
    }
}

struct FixedSettings(Result<SettingsPayload, ClientError>);

#[async_trait]
impl SettingsSource for FixedSettings {
    async fn load_settings(&self, _company_id: CompanyId) -> Result<SettingsPayload, ClientError> {
        self.0.clone()
    }
}

#[test]
fn missing_settings_resolve_to_defaults() {
    let branding = Branding::resolve(None);
    assert_eq!(branding.color, "#094BAC");
    assert_eq!(branding.logo, "/assets/logo.svg");
    assert_eq!(branding.company_name, "ROM");
}

#[test]
fn fields_fall_back_independently() {
    let branding = Branding::resolve(Some(&payload(
        Some("#112233"),
        None,
        Some("Acme Careers"),
    )));
    assert_eq!(branding.color, "#112233");
    assert_eq!(branding.logo, DEFAULT_LOGO);
    assert_eq!(branding.company_name, "Acme Careers");
}

#[test]
fn blank_and_malformed_values_keep_defaults() {
    let branding = Branding::resolve(Some(&payload(Some("blue"), Some("   "), Some(""))));
    assert_eq!(branding, Branding::default());
}

#[tokio::test]
async fn load_failure_yields_defaults() {
    let source = FixedSettings(Err(ClientError::Remote(ApiException::new(
        ErrorCode::NotFound,
        "company not found",
    ))));
    assert_eq!(load_branding(&source, CompanyId(1)).await, Branding::default());
}

#[tokio::test]
async fn loaded_settings_are_resolved() {
    let source = FixedSettings(Ok(payload(None, Some("https://cdn.example.com/a.png"), None)));
    let branding = load_branding(&source, CompanyId(1)).await;
    assert_eq!(branding.logo, "https://cdn.example.com/a.png");
    assert_eq!(branding.color, DEFAULT_COLOR);
}
