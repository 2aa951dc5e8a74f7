//! Caller identity from reverse-proxy headers.
//!
//! The service sits behind an authenticating proxy that forwards the user id
//! and a comma-separated group list. Requests without those headers fall
//! back to the configured default user and groups.

use axum::http::HeaderMap;
use serde::Serialize;

use crate::config::AuthConfig;
use crate::error::{LabelError, Result};

pub const ADMIN_GROUP: &str = "admin";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub uid: String,
    pub groups: Vec<String>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.groups.iter().any(|g| g == ADMIN_GROUP)
    }

    pub fn require_admin(&self) -> Result<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(LabelError::Forbidden(format!(
                "user {} is not an admin",
                self.uid
            )))
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>> {
    match headers.get(name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(|v| Some(v.trim()))
            .map_err(|_| LabelError::Unauthorized(format!("header {} is not valid text", name))),
    }
}

/// Resolve the caller from request headers.
pub fn user_from_headers(headers: &HeaderMap, auth: &AuthConfig) -> Result<User> {
    let uid = match header_str(headers, &auth.user_header)? {
        Some("") => {
            return Err(LabelError::Unauthorized(format!(
                "header {} is empty",
                auth.user_header
            )))
        }
        Some(uid) => uid.to_string(),
        None => auth.default_user.clone(),
    };

    let groups = match header_str(headers, &auth.groups_header)? {
        Some(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .map(str::to_string)
            .collect(),
        None => auth.default_groups.clone(),
    };

    Ok(User { uid, groups })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn defaults_apply_without_headers() {
        let user = user_from_headers(&HeaderMap::new(), &AuthConfig::default()).unwrap();
        assert_eq!(user.uid, "default-user");
        assert!(user.is_admin());
    }

    #[test]
    fn headers_override_defaults() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-user", HeaderValue::from_static("alice"));
        headers.insert("x-forwarded-groups", HeaderValue::from_static("standard, reviewers"));
        let user = user_from_headers(&headers, &AuthConfig::default()).unwrap();
        assert_eq!(user.uid, "alice");
        assert_eq!(user.groups, vec!["standard", "reviewers"]);
        assert!(matches!(
            user.require_admin().unwrap_err(),
            LabelError::Forbidden(_)
        ));
    }

    #[test]
    fn empty_user_header_is_unauthorized() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-user", HeaderValue::from_static(""));
        assert!(matches!(
            user_from_headers(&headers, &AuthConfig::default()).unwrap_err(),
            LabelError::Unauthorized(_)
        ));
    }
}
