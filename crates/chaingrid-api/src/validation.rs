//! Registration intake: normalizes the submitted form and checks every field
//! rule that does not need the database.

use std::collections::BTreeMap;

use chaingrid_types::api::SendOtpRequest;

pub const MAX_FIELD_CHARS: usize = 255;
pub const MIN_PASSWORD_CHARS: usize = 8;

/// Field name to messages, sorted by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(message.into());
    }

    pub fn has(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn into_map(self) -> BTreeMap<String, Vec<String>> {
        self.0
    }
}

/// Normalized registration fields. Holds the plaintext password until it is
/// hashed, so no `Debug`.
pub struct RegistrationInput {
    pub name: String,
    pub username: String,
    pub email: String,
    pub referral_code: Option<String>,
    pub password: String,
}

/// Trims every text field, lowercases the email and drops an empty referral
/// code, then applies the format rules. All failures are collected.
pub fn validate_registration(req: SendOtpRequest) -> (RegistrationInput, ValidationErrors) {
    let mut errors = ValidationErrors::new();

    let input = RegistrationInput {
        name: req.name.trim().to_string(),
        username: req.username.trim().to_string(),
        email: req.email.trim().to_lowercase(),
        referral_code: req
            .referral_code
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty()),
        password: req.password,
    };

    required_text(&mut errors, "name", &input.name);
    required_text(&mut errors, "username", &input.username);

    if required_text(&mut errors, "email", &input.email) && !is_valid_email(&input.email) {
        errors.add("email", "The email field must be a valid email address.");
    }

    if input.password.is_empty() {
        errors.add("password", "The password field is required.");
    } else {
        if input.password.chars().count() < MIN_PASSWORD_CHARS {
            errors.add(
                "password",
                format!("The password field must be at least {} characters.", MIN_PASSWORD_CHARS),
            );
        }
        if input.password != req.password_confirmation {
            errors.add("password", "The password field confirmation does not match.");
        }
    }

    if let Some(code) = &input.referral_code {
        if code.chars().count() > MAX_FIELD_CHARS {
            errors.add("referral_code", too_long("referral code"));
        }
    }

    (input, errors)
}

/// Returns true when the value is present and within the length limit.
fn required_text(errors: &mut ValidationErrors, field: &str, value: &str) -> bool {
    if value.is_empty() {
        errors.add(field, format!("The {} field is required.", field));
        return false;
    }
    if value.chars().count() > MAX_FIELD_CHARS {
        errors.add(field, too_long(field));
        return false;
    }
    true
}

fn too_long(label: &str) -> String {
    format!("The {} field must not be greater than {} characters.", label, MAX_FIELD_CHARS)
}

/// Deliberately shallow: one `@`, a non-empty local part and a dotted
/// domain with no empty labels. Ownership is proven by the OTP anyway.
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') || !domain.contains('.') {
        return false;
    }
    domain.split('.').all(|label| {
        !label.is_empty() && !label.starts_with('-') && !label.ends_with('-')
    })
}
