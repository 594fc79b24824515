use serde::{Deserialize, Serialize};

use super::deserialize_id;

/// User record as returned by the backend auth endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(default)]
pub struct BackendUser {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub full_name: Option<String>,
    pub phone_number: Option<String>,
    pub user_type: Option<String>,
    pub is_verified: bool,
    pub profile_image_url: Option<String>,
}

impl BackendUser {
    /// Name for display, falling back to email and then username
    pub fn display_name(&self) -> String {
        if let Some(full) = self.full_name.as_deref().filter(|s| !s.trim().is_empty()) {
            return full.trim().to_string();
        }
        let joined = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if !joined.is_empty() {
            return joined;
        }
        self.email
            .clone()
            .or_else(|| self.username.clone())
            .unwrap_or_else(|| "Unknown user".to_string())
    }

    pub fn is_admin(&self) -> bool {
        matches!(self.user_type.as_deref(), Some("admin") | Some("staff"))
    }
}

/// Response of `POST /auth/users/login/` and `/auth/users/test-login/`
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub user: BackendUser,
    #[serde(alias = "access")]
    pub access_token: String,
    #[serde(default, alias = "refresh")]
    pub refresh_token: Option<String>,
    #[serde(default, deserialize_with = "deserialize_id")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub is_new_user: bool,
}

/// Editable profile fields for `PATCH /auth/users/me/`
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_response_parses() {
        let json = r#"{
            "user": {"id": 7, "email": "a@example.com", "first_name": "Ada", "last_name": "N"},
            "access_token": "acc",
            "refresh_token": "ref",
            "session_id": 991,
            "is_new_user": true
        }"#;
        let resp: LoginResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.user.id.as_deref(), Some("7"));
        assert_eq!(resp.user.display_name(), "Ada N");
        assert_eq!(resp.session_id.as_deref(), Some("991"));
        assert!(resp.is_new_user);
    }

    #[test]
    fn test_display_name_fallbacks() {
        let user = BackendUser {
            email: Some("x@example.com".into()),
            first_name: Some(" ".into()),
            ..Default::default()
        };
        assert_eq!(user.display_name(), "x@example.com");
        assert_eq!(BackendUser::default().display_name(), "Unknown user");
    }

    #[test]
    fn test_profile_update_skips_unset_fields() {
        let update = ProfileUpdate {
            bio: Some("Collector".into()),
            ..Default::default()
        };
        assert_eq!(serde_json::to_string(&update).unwrap(), r#"{"bio":"Collector"}"#);
    }
}
