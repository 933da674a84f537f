//! Bearer credentials

use axum::http::{header, HeaderMap};

use crate::config::AuthConfig;
use crate::error::{Error, Result};

/// Privilege a route requires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Chat and read-only calls
    Standard,
    /// Model lifecycle, parameter writes and maintenance
    Elevated,
}

/// Token from an `Authorization: Bearer <token>` header
pub fn bearer(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Check `credential` against the configured secrets
///
/// The admin token satisfies both levels; the standard key only `Standard`.
pub fn authorize(auth: &AuthConfig, credential: Option<&str>, required: Access) -> Result<()> {
    let token = credential.ok_or_else(|| Error::Unauthorized("missing bearer token".to_string()))?;
    if token == auth.admin_token {
        return Ok(());
    }
    if token != auth.api_key {
        return Err(Error::Unauthorized("invalid token".to_string()));
    }
    match required {
        Access::Standard => Ok(()),
        Access::Elevated => Err(Error::Forbidden("admin token required".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_bearer_parsing() {
        assert_eq!(bearer(&headers("Bearer abc")), Some("abc"));
        assert_eq!(bearer(&headers("bearer  abc ")), Some("abc"));
        assert_eq!(bearer(&headers("Basic abc")), None);
        assert_eq!(bearer(&headers("Bearer ")), None);
        assert_eq!(bearer(&HeaderMap::new()), None);
    }

    #[test]
    fn test_access_levels() {
        let auth = AuthConfig::default();
        assert!(authorize(&auth, Some("changeme"), Access::Standard).is_ok());
        assert!(matches!(
            authorize(&auth, Some("changeme"), Access::Elevated),
            Err(Error::Forbidden(_))
        ));
        assert!(authorize(&auth, Some("adminchangeme"), Access::Elevated).is_ok());
        assert!(authorize(&auth, Some("adminchangeme"), Access::Standard).is_ok());
        assert!(matches!(
            authorize(&auth, Some("nope"), Access::Standard),
            Err(Error::Unauthorized(_))
        ));
        assert!(matches!(
            authorize(&auth, None, Access::Standard),
            Err(Error::Unauthorized(_))
        ));
    }
}
