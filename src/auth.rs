//! Admin bearer-token verification

use axum::http::{header, HeaderMap};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{CdnError, CdnResult};

/// Claims carried by admin tokens
#[derive(Debug, Serialize, Deserialize)]
pub struct AdminClaims {
    /// Subject (operator identifier)
    pub sub: String,
    /// Role claim; must be "admin" for privileged endpoints
    pub role: String,
    /// Expiration time (unix seconds)
    pub exp: i64,
}

/// Pull the bearer token out of the Authorization header.
pub fn extract_bearer_token(headers: &HeaderMap) -> CdnResult<&str> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(CdnError::AuthenticationRequired)?;

    auth_header
        .strip_prefix("Bearer ")
        .ok_or(CdnError::AuthenticationRequired)
}

/// Verify an admin token: valid signature, unexpired, `role == "admin"`.
pub fn verify_admin_token(token: &str, secret: &str) -> CdnResult<AdminClaims> {
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    let validation = Validation::new(Algorithm::HS256);

    let token_data = decode::<AdminClaims>(token, &decoding_key, &validation)?;

    if token_data.claims.role != "admin" {
        return Err(CdnError::InvalidToken {
            message: "missing admin role".to_string(),
        });
    }

    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret";

    fn make_token(role: &str, exp_offset: i64) -> String {
        let claims = AdminClaims {
            sub: "operator".to_string(),
            role: role.to_string(),
            exp: chrono::Utc::now().timestamp() + exp_offset,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_valid_admin_token() {
        let token = make_token("admin", 3600);
        let claims = verify_admin_token(&token, SECRET).unwrap();
        assert_eq!(claims.role, "admin");
        assert_eq!(claims.sub, "operator");
    }

    #[test]
    fn test_non_admin_role_rejected() {
        let token = make_token("viewer", 3600);
        let err = verify_admin_token(&token, SECRET).unwrap_err();
        assert!(matches!(err, CdnError::InvalidToken { .. }));
    }

    #[test]
    fn test_expired_token_rejected() {
        let token = make_token("admin", -3600);
        assert!(verify_admin_token(&token, SECRET).is_err());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = make_token("admin", 3600);
        assert!(verify_admin_token(&token, "other-secret").is_err());
    }

    #[test]
    fn test_extract_bearer_token() {
        let mut headers = HeaderMap::new();
        assert!(extract_bearer_token(&headers).is_err());

        headers.insert(header::AUTHORIZATION, "Bearer abc.def.ghi".parse().unwrap());
        assert_eq!(extract_bearer_token(&headers).unwrap(), "abc.def.ghi");

        headers.insert(header::AUTHORIZATION, "Basic xyz".parse().unwrap());
        assert!(extract_bearer_token(&headers).is_err());
    }
}
