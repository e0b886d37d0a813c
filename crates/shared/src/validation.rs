//! Declarative request validation.
//!
//! Each request payload declares its rules as [`TextRule`] values and converts
//! itself into a typed, fully checked value through [`Validate`]. All failing
//! fields are collected, never just the first one.

use chrono::NaiveDate;
use thiserror::Error;

use crate::{
    domain::Gender,
    error::{ApiError, FieldError},
    protocol::{
        ApplyRequest, ProfileRequest, ResendCodeRequest, SignInRequest, SignUpRequest,
        UpdateSettingsRequest, VerifyOtpRequest,
    },
};

pub const OTP_LENGTH: usize = 6;
pub const MIN_FULL_NAME_CHARS: usize = 3;
pub const MIN_PASSWORD_CHARS: usize = 6;
pub const MAX_COMPANY_NAME_CHARS: usize = 100;
pub const MAX_COVER_LETTER_CHARS: usize = 5000;
pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", summarize(.0))]
pub struct ValidationErrors(pub Vec<FieldError>);

impl ValidationErrors {
    pub fn fields(&self) -> &[FieldError] {
        &self.0
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.0.iter().any(|error| error.field == field)
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(value: ValidationErrors) -> Self {
        ApiError::validation(value.0)
    }
}

fn summarize(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|error| error.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

pub trait Validate {
    type Output;

    fn validate(&self) -> Result<Self::Output, ValidationErrors>;
}

/// Constraint set for one string field.
#[derive(Debug, Clone, Copy)]
pub struct TextRule {
    label: &'static str,
    required: bool,
    trim: bool,
    email: bool,
    exact: Option<usize>,
    min: Option<usize>,
    max: Option<usize>,
}

impl TextRule {
    pub const fn new(label: &'static str) -> Self {
        Self {
            label,
            required: false,
            trim: true,
            email: false,
            exact: None,
            min: None,
            max: None,
        }
    }

    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Keep surrounding whitespace; used for secrets.
    pub const fn raw(mut self) -> Self {
        self.trim = false;
        self
    }

    pub const fn email(mut self) -> Self {
        self.email = true;
        self
    }

    pub const fn exact(mut self, chars: usize) -> Self {
        self.exact = Some(chars);
        self
    }

    pub const fn min(mut self, chars: usize) -> Self {
        self.min = Some(chars);
        self
    }

    pub const fn max(mut self, chars: usize) -> Self {
        self.max = Some(chars);
        self
    }

    /// Checks `value` and returns it (trimmed unless [`TextRule::raw`]) when it
    /// is present and passes every constraint.
    pub fn check<'v>(
        &self,
        field: &str,
        value: Option<&'v str>,
        errors: &mut Vec<FieldError>,
    ) -> Option<&'v str> {
        let value = value.map(|v| if self.trim { v.trim() } else { v });
        let Some(value) = value.filter(|v| !v.trim().is_empty()) else {
            if self.required {
                errors.push(FieldError::new(field, format!("{} is required", self.label)));
            }
            return None;
        };

        let chars = value.chars().count();
        let message = if self.email && !is_valid_email(value) {
            Some(format!("{} must be a valid email", self.label))
        } else if let Some(exact) = self.exact.filter(|&exact| chars != exact) {
            Some(format!("{} must be {exact} characters long", self.label))
        } else if let Some(min) = self.min.filter(|&min| chars < min) {
            Some(format!("{} must be at least {min} characters long", self.label))
        } else if let Some(max) = self.max.filter(|&max| chars > max) {
            Some(format!("{} must be at most {max} characters long", self.label))
        } else {
            None
        };

        match message {
            Some(message) => {
                errors.push(FieldError::new(field, message));
                None
            }
            None => Some(value),
        }
    }
}

pub fn is_valid_email(value: &str) -> bool {
    if value.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2
        && labels.iter().all(|label| {
            !label.is_empty()
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
        && labels.last().is_some_and(|tld| tld.len() >= 2)
}

/// `#RGB` or `#RRGGBB`.
pub fn is_hex_color(value: &str) -> bool {
    let Some(hex) = value.strip_prefix('#') else {
        return false;
    };
    matches!(hex.len(), 3 | 6) && hex.chars().all(|c| c.is_ascii_hexdigit())
}

fn finish<T>(
    errors: Vec<FieldError>,
    value: impl FnOnce() -> Option<T>,
) -> Result<T, ValidationErrors> {
    if !errors.is_empty() {
        return Err(ValidationErrors(errors));
    }
    value().ok_or_else(|| ValidationErrors(Vec::new()))
}

const EMAIL: TextRule = TextRule::new("Email").required().email();

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignUp {
    pub email: String,
    pub full_name: String,
    pub password: String,
}

impl Validate for SignUpRequest {
    type Output = SignUp;

    fn validate(&self) -> Result<SignUp, ValidationErrors> {
        const FULL_NAME: TextRule = TextRule::new("Full name")
            .required()
            .min(MIN_FULL_NAME_CHARS);
        const PASSWORD: TextRule = TextRule::new("Password")
            .required()
            .raw()
            .min(MIN_PASSWORD_CHARS);

        let mut errors = Vec::new();
        let email = EMAIL.check("email", self.email.as_deref(), &mut errors);
        let full_name = FULL_NAME.check("fullName", self.full_name.as_deref(), &mut errors);
        let password = PASSWORD.check("password", self.password.as_deref(), &mut errors);

        finish(errors, || {
            Some(SignUp {
                email: email?.to_ascii_lowercase(),
                full_name: full_name?.to_string(),
                password: password?.to_string(),
            })
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Validate for SignInRequest {
    type Output = Credentials;

    fn validate(&self) -> Result<Credentials, ValidationErrors> {
        const PASSWORD: TextRule = TextRule::new("Password").required().raw();

        let mut errors = Vec::new();
        let email = EMAIL.check("email", self.email.as_deref(), &mut errors);
        let password = PASSWORD.check("password", self.password.as_deref(), &mut errors);

        finish(errors, || {
            Some(Credentials {
                email: email?.to_ascii_lowercase(),
                password: password?.to_string(),
            })
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtpSubmission {
    pub email: Option<String>,
    pub otp: String,
}

impl Validate for VerifyOtpRequest {
    type Output = OtpSubmission;

    fn validate(&self) -> Result<OtpSubmission, ValidationErrors> {
        const OTP: TextRule = TextRule::new("OTP").required().exact(OTP_LENGTH);
        const OPTIONAL_EMAIL: TextRule = TextRule::new("Email").email();

        let mut errors = Vec::new();
        let otp = OTP.check("otp", self.otp.as_deref(), &mut errors);
        let email = OPTIONAL_EMAIL.check("email", self.email.as_deref(), &mut errors);

        finish(errors, || {
            Some(OtpSubmission {
                email: email.map(str::to_ascii_lowercase),
                otp: otp?.to_string(),
            })
        })
    }
}

impl Validate for ResendCodeRequest {
    type Output = String;

    fn validate(&self) -> Result<String, ValidationErrors> {
        let mut errors = Vec::new();
        let email = EMAIL.check("email", self.email.as_deref(), &mut errors);
        finish(errors, || email.map(str::to_ascii_lowercase))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProfile {
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub gender: Gender,
    pub phone: String,
    pub nationality: String,
    pub address: String,
    pub passport_number: Option<String>,
    pub relative_in_organisation: bool,
}

/// Partial profile update. For the nullable fields `Some(None)` clears the
/// stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfilePatch {
    pub first_name: Option<String>,
    pub middle_name: Option<Option<String>>,
    pub last_name: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<Gender>,
    pub phone: Option<String>,
    pub nationality: Option<String>,
    pub address: Option<String>,
    pub passport_number: Option<Option<String>>,
    pub relative_in_organisation: Option<bool>,
}

impl ProfilePatch {
    pub fn is_empty(&self) -> bool {
        *self == ProfilePatch::default()
    }
}

struct ProfileRules {
    first_name: TextRule,
    last_name: TextRule,
    date_of_birth: TextRule,
    gender: TextRule,
    phone: TextRule,
    nationality: TextRule,
    address: TextRule,
}

impl ProfileRules {
    const fn new(required: bool) -> Self {
        const fn rule(label: &'static str, required: bool) -> TextRule {
            let rule = TextRule::new(label);
            if required {
                rule.required()
            } else {
                rule
            }
        }
        Self {
            first_name: rule("First name", required),
            last_name: rule("Last name", required),
            date_of_birth: rule("Date of birth", required),
            gender: rule("Gender", required),
            phone: rule("Phone", required),
            nationality: rule("Nationality", required),
            address: rule("Address", required),
        }
    }
}

const MIDDLE_NAME: TextRule = TextRule::new("Middle name");
const PASSPORT_NUMBER: TextRule = TextRule::new("Passport number");

fn parse_date(value: Option<&str>, errors: &mut Vec<FieldError>) -> Option<NaiveDate> {
    let value = value?;
    match NaiveDate::parse_from_str(value, DATE_FORMAT) {
        Ok(date) => Some(date),
        Err(_) => {
            errors.push(FieldError::new(
                "dateOfBirth",
                "Date of birth must be a date in YYYY-MM-DD format",
            ));
            None
        }
    }
}

fn parse_gender(value: Option<&str>, errors: &mut Vec<FieldError>) -> Option<Gender> {
    let value = value?;
    match value.to_ascii_lowercase().parse::<Gender>() {
        Ok(gender) => Some(gender),
        Err(_) => {
            let allowed = Gender::ALL.map(Gender::as_str).join(", ");
            errors.push(FieldError::new(
                "gender",
                format!("Gender must be one of {allowed}"),
            ));
            None
        }
    }
}

impl ProfileRequest {
    pub fn validate_create(&self) -> Result<NewProfile, ValidationErrors> {
        const RULES: ProfileRules = ProfileRules::new(true);

        let mut errors = Vec::new();
        let first_name = RULES
            .first_name
            .check("firstName", self.first_name.as_deref(), &mut errors);
        let middle_name = MIDDLE_NAME.check("middleName", self.middle_name.as_deref(), &mut errors);
        let last_name = RULES
            .last_name
            .check("lastName", self.last_name.as_deref(), &mut errors);
        let date_of_birth = RULES
            .date_of_birth
            .check("dateOfBirth", self.date_of_birth.as_deref(), &mut errors);
        let date_of_birth = parse_date(date_of_birth, &mut errors);
        let gender = RULES
            .gender
            .check("gender", self.gender.as_deref(), &mut errors);
        let gender = parse_gender(gender, &mut errors);
        let phone = RULES.phone.check("phone", self.phone.as_deref(), &mut errors);
        let nationality = RULES
            .nationality
            .check("nationality", self.nationality.as_deref(), &mut errors);
        let address = RULES
            .address
            .check("address", self.address.as_deref(), &mut errors);
        let passport_number =
            PASSPORT_NUMBER.check("passportNumber", self.passport_number.as_deref(), &mut errors);
        if self.relative_in_organisation.is_none() {
            errors.push(FieldError::new(
                "relativeInOrganisation",
                "Relative in organisation is required",
            ));
        }

        finish(errors, || {
            Some(NewProfile {
                first_name: first_name?.to_string(),
                middle_name: middle_name.map(str::to_string),
                last_name: last_name?.to_string(),
                date_of_birth: date_of_birth?,
                gender: gender?,
                phone: phone?.to_string(),
                nationality: nationality?.to_string(),
                address: address?.to_string(),
                passport_number: passport_number.map(str::to_string),
                relative_in_organisation: self.relative_in_organisation?,
            })
        })
    }

    pub fn validate_update(&self) -> Result<ProfilePatch, ValidationErrors> {
        const RULES: ProfileRules = ProfileRules::new(false);

        let mut errors = Vec::new();
        let first_name = RULES
            .first_name
            .check("firstName", self.first_name.as_deref(), &mut errors);
        let last_name = RULES
            .last_name
            .check("lastName", self.last_name.as_deref(), &mut errors);
        let date_of_birth = RULES
            .date_of_birth
            .check("dateOfBirth", self.date_of_birth.as_deref(), &mut errors);
        let date_of_birth = parse_date(date_of_birth, &mut errors);
        let gender = RULES
            .gender
            .check("gender", self.gender.as_deref(), &mut errors);
        let gender = parse_gender(gender, &mut errors);
        let phone = RULES.phone.check("phone", self.phone.as_deref(), &mut errors);
        let nationality = RULES
            .nationality
            .check("nationality", self.nationality.as_deref(), &mut errors);
        let address = RULES
            .address
            .check("address", self.address.as_deref(), &mut errors);
        let middle_name = self.middle_name.as_deref().map(|raw| {
            MIDDLE_NAME
                .check("middleName", Some(raw), &mut errors)
                .map(str::to_string)
        });
        let passport_number = self.passport_number.as_deref().map(|raw| {
            PASSPORT_NUMBER
                .check("passportNumber", Some(raw), &mut errors)
                .map(str::to_string)
        });

        // Blank required-on-create fields were sent but are not usable values.
        for (field, label, raw) in [
            ("firstName", "First name", &self.first_name),
            ("lastName", "Last name", &self.last_name),
            ("dateOfBirth", "Date of birth", &self.date_of_birth),
            ("gender", "Gender", &self.gender),
            ("phone", "Phone", &self.phone),
            ("nationality", "Nationality", &self.nationality),
            ("address", "Address", &self.address),
        ] {
            if raw.as_deref().is_some_and(|v| v.trim().is_empty()) {
                errors.push(FieldError::new(field, format!("{label} must not be empty")));
            }
        }

        finish(errors, || {
            Some(ProfilePatch {
                first_name: first_name.map(str::to_string),
                middle_name,
                last_name: last_name.map(str::to_string),
                date_of_birth,
                gender,
                phone: phone.map(str::to_string),
                nationality: nationality.map(str::to_string),
                address: address.map(str::to_string),
                passport_number,
                relative_in_organisation: self.relative_in_organisation,
            })
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsPatch {
    pub color: Option<String>,
    pub logo_url: Option<String>,
    pub company_name: Option<String>,
}

impl Validate for UpdateSettingsRequest {
    type Output = SettingsPatch;

    fn validate(&self) -> Result<SettingsPatch, ValidationErrors> {
        const COLOR: TextRule = TextRule::new("Color");
        const LOGO_URL: TextRule = TextRule::new("Logo url");
        const COMPANY_NAME: TextRule = TextRule::new("Company name").max(MAX_COMPANY_NAME_CHARS);

        let mut errors = Vec::new();
        let color = COLOR.check("color", self.color.as_deref(), &mut errors);
        if color.is_some_and(|color| !is_hex_color(color)) {
            errors.push(FieldError::new(
                "color",
                "Color must be a hex color such as #094BAC",
            ));
        }
        let logo_url = LOGO_URL.check("logoUrl", self.logo_url.as_deref(), &mut errors);
        let company_name =
            COMPANY_NAME.check("companyName", self.company_name.as_deref(), &mut errors);

        finish(errors, || {
            Some(SettingsPatch {
                color: color.map(str::to_string),
                logo_url: logo_url.map(str::to_string),
                company_name: company_name.map(str::to_string),
            })
        })
    }
}

impl Validate for ApplyRequest {
    type Output = Option<String>;

    fn validate(&self) -> Result<Option<String>, ValidationErrors> {
        const COVER_LETTER: TextRule = TextRule::new("Cover letter").max(MAX_COVER_LETTER_CHARS);

        let mut errors = Vec::new();
        let cover_letter =
            COVER_LETTER.check("coverLetter", self.cover_letter.as_deref(), &mut errors);
        finish(errors, || Some(cover_letter.map(str::to_string)))
    }
}

#[cfg(test)]
#[path = "tests/validation_tests.rs"]
mod tests;
