use std::fmt;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Identity reference embedded in auth responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: i64,
}

/// Login/refresh/register response in bearer-token deployments.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BearerAuthResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub user: Option<UserRef>,
}

impl BearerAuthResponse {
    /// User id from the response body, falling back to the token's claims.
    pub fn user_id(&self) -> Option<i64> {
        self.user
            .map(|u| u.id)
            .or_else(|| user_id_from_token(&self.access_token))
    }
}

/// Login/refresh/register response in session-cookie deployments. The
/// credentials themselves travel in `Set-Cookie` headers.
#[derive(Debug, Clone, Deserialize)]
pub struct CookieAuthResponse {
    pub user: UserRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogoutResponse {
    #[serde(default)]
    pub message: Option<String>,
}

/// Result of a successful login, refresh, or registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthGrant {
    /// Access token; `None` in session-cookie mode.
    pub token: Option<String>,
    pub user_id: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterProfile {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub graduation_year: i32,
    pub class_letter: String,
    pub message_to_graduates: String,
    pub message_to_students: String,
    pub occupation: String,
}

impl RegisterProfile {
    /// Required-field check done before anything is sent.
    pub fn missing_fields(&self) -> Vec<FieldError> {
        [
            ("email", &self.email),
            ("password", &self.password),
            ("fullName", &self.full_name),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| FieldError::new(field, format!("{field} is required")))
        .collect()
    }
}

/// A single rejected field from registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Field used when the server rejects a request without naming a field.
const UNNAMED_FIELD: &str = "request";

#[derive(Deserialize)]
struct ValidationBody {
    #[serde(default)]
    errors: Vec<FieldError>,
    #[serde(default)]
    message: Option<ValidationMessage>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ValidationMessage {
    One(String),
    Many(Vec<String>),
}

/// Parse a 400/422 registration body into per-field errors.
///
/// Accepts `{"errors": [{"field", "message"}]}` as well as the
/// `{"message": [...]}` shape produced by class-validator, whose messages
/// start with the property name ("email must be an email").
pub fn parse_field_errors(body: &str) -> Vec<FieldError> {
    let parsed: Option<ValidationBody> = serde_json::from_str(body).ok();
    let Some(parsed) = parsed else {
        return vec![FieldError::new(UNNAMED_FIELD, body.trim())];
    };

    if !parsed.errors.is_empty() {
        return parsed.errors;
    }

    let messages = match parsed.message {
        Some(ValidationMessage::One(m)) => vec![m],
        Some(ValidationMessage::Many(m)) => m,
        None => Vec::new(),
    };
    if messages.is_empty() {
        return vec![FieldError::new(UNNAMED_FIELD, "rejected by server")];
    }

    messages
        .into_iter()
        .map(|message| {
            let field = message
                .split_whitespace()
                .next()
                .unwrap_or(UNNAMED_FIELD)
                .to_string();
            FieldError { field, message }
        })
        .collect()
}

#[derive(Deserialize)]
struct TokenClaims {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    sub: Option<serde_json::Value>,
}

fn claim_as_id(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Read the user id from a JWT payload (`id`, then `sub`). The signature is
/// not checked; the value only labels the local session.
pub fn user_id_from_token(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: TokenClaims = serde_json::from_slice(&bytes).ok()?;
    claims
        .id
        .as_ref()
        .and_then(claim_as_id)
        .or_else(|| claims.sub.as_ref().and_then(claim_as_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt(claims: &str) -> String {
        format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256"}"#),
            URL_SAFE_NO_PAD.encode(claims)
        )
    }

    #[test]
    fn test_bearer_response_prefers_body_user() {
        let resp: BearerAuthResponse = serde_json::from_str(
            r#"{"accessToken": "T1", "refreshToken": "R1", "user": {"id": 7}}"#,
        )
        .unwrap();
        assert_eq!(resp.access_token, "T1");
        assert_eq!(resp.refresh_token.as_deref(), Some("R1"));
        assert_eq!(resp.user_id(), Some(7));
    }

    #[test]
    fn test_bearer_response_falls_back_to_claims() {
        let token = jwt(r#"{"sub": "42", "email": "alice@example.com"}"#);
        let body = format!(r#"{{"accessToken": "{token}"}}"#);
        let resp: BearerAuthResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(resp.user_id(), Some(42));
    }

    #[test]
    fn test_user_id_from_token() {
        assert_eq!(user_id_from_token(&jwt(r#"{"id": 3, "sub": "9"}"#)), Some(3));
        assert_eq!(user_id_from_token(&jwt(r#"{"sub": 11}"#)), Some(11));
        assert_eq!(user_id_from_token(&jwt(r#"{"sub": "alice"}"#)), None);
        assert_eq!(user_id_from_token("opaque-token"), None);
        assert_eq!(user_id_from_token("a.!!!.c"), None);
    }

    #[test]
    fn test_cookie_response_requires_user() {
        let resp: CookieAuthResponse = serde_json::from_str(r#"{"user": {"id": 5}}"#).unwrap();
        assert_eq!(resp.user.id, 5);
        assert!(serde_json::from_str::<CookieAuthResponse>(r#"{"accessToken": "x"}"#).is_err());
    }

    #[test]
    fn test_missing_fields() {
        let profile = RegisterProfile {
            email: "  ".to_string(),
            password: "secret123".to_string(),
            ..RegisterProfile::default()
        };
        let fields: Vec<_> = profile
            .missing_fields()
            .into_iter()
            .map(|e| e.field)
            .collect();
        assert_eq!(fields, vec!["email", "fullName"]);
    }

    #[test]
    fn test_register_profile_wire_names() {
        let profile = RegisterProfile {
            full_name: "Ivan Petrov".to_string(),
            graduation_year: 2010,
            ..RegisterProfile::default()
        };
        let value = serde_json::to_value(&profile).unwrap();
        assert_eq!(value["fullName"], "Ivan Petrov");
        assert_eq!(value["graduationYear"], 2010);
        assert!(value.get("messageToGraduates").is_some());
    }

    #[test]
    fn test_parse_field_errors_explicit() {
        let errors = parse_field_errors(
            r#"{"errors": [{"field": "email", "message": "already registered"}]}"#,
        );
        assert_eq!(errors, vec![FieldError::new("email", "already registered")]);
    }

    #[test]
    fn test_parse_field_errors_class_validator() {
        let errors = parse_field_errors(
            r#"{"statusCode": 400, "message": ["email must be an email", "password is too short"], "error": "Bad Request"}"#,
        );
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].field, "email");
        assert_eq!(errors[1].field, "password");
        assert_eq!(errors[1].message, "password is too short");
    }

    #[test]
    fn test_parse_field_errors_unstructured() {
        let errors = parse_field_errors("Bad Request");
        assert_eq!(errors, vec![FieldError::new("request", "Bad Request")]);

        let errors = parse_field_errors(r#"{"message": "graduationYear must be a number"}"#);
        assert_eq!(errors[0].field, "graduationYear");
    }
}
