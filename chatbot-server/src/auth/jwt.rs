use axum::http::HeaderMap;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Authenticated caller extracted from a session token.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing Authorization header")]
    MissingHeader,
    #[error("Invalid Authorization header format")]
    InvalidFormat,
    #[error("Invalid token: {0}")]
    InvalidToken(String),
    #[error("Unknown user: {0}")]
    UnknownUser(String),
    #[error("Token creation failed: {0}")]
    TokenCreation(String),
}

/// JWT claims.
#[derive(Debug, Deserialize, Serialize)]
struct Claims {
    sub: String,
    email: String,
    iat: u64,
    exp: u64,
}

/// Issues and validates HS256 session tokens.
pub struct JwtAuth {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    token_ttl_secs: u64,
}

impl JwtAuth {
    pub fn new(secret: &str, token_ttl_secs: u64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
            token_ttl_secs,
        }
    }

    /// Create a signed token for a user.
    pub fn issue_token(&self, user_id: &str, email: &str) -> Result<String, AuthError> {
        let now = Utc::now().timestamp().max(0) as u64;
        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            iat: now,
            exp: now + self.token_ttl_secs,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::TokenCreation(e.to_string()))
    }

    /// Authenticate a request from its `Authorization` header.
    ///
    /// Accepts `Bearer <token>` as well as a bare token.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<AuthUser, AuthError> {
        let token = token_from_headers(headers)?;
        self.verify(token)
    }

    pub fn verify(&self, token: &str) -> Result<AuthUser, AuthError> {
        let token_data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;

        Ok(AuthUser {
            id: token_data.claims.sub,
            email: token_data.claims.email,
        })
    }
}

fn token_from_headers(headers: &HeaderMap) -> Result<&str, AuthError> {
    let auth_header = headers
        .get("authorization")
        .ok_or(AuthError::MissingHeader)?
        .to_str()
        .map_err(|_| AuthError::InvalidFormat)?
        .trim();

    let token = match auth_header.split_once(' ') {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        Some(_) => return Err(AuthError::InvalidFormat),
        None => auth_header,
    };

    if token.is_empty() {
        return Err(AuthError::InvalidFormat);
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::AUTHORIZATION;

    fn headers_with_auth(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, value.parse().unwrap());
        headers
    }

    #[test]
    fn test_issue_and_authenticate_bearer() {
        let auth = JwtAuth::new("secret", 3600);
        let token = auth.issue_token("user123", "user@example.com").unwrap();
        let user = auth
            .authenticate(&headers_with_auth(&format!("Bearer {}", token)))
            .unwrap();
        assert_eq!(user.id, "user123");
        assert_eq!(user.email, "user@example.com");
    }

    #[test]
    fn test_bare_token_accepted() {
        let auth = JwtAuth::new("secret", 3600);
        let token = auth.issue_token("user123", "user@example.com").unwrap();
        let user = auth.authenticate(&headers_with_auth(&token)).unwrap();
        assert_eq!(user.id, "user123");
    }

    #[test]
    fn test_missing_header() {
        let auth = JwtAuth::new("secret", 3600);
        let err = auth.authenticate(&HeaderMap::new()).unwrap_err();
        assert_eq!(err.to_string(), "Missing Authorization header");
    }

    #[test]
    fn test_other_scheme_rejected() {
        let auth = JwtAuth::new("secret", 3600);
        let err = auth
            .authenticate(&headers_with_auth("Basic dXNlcjpwYXNz"))
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidFormat));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let issuer = JwtAuth::new("secret-a", 3600);
        let verifier = JwtAuth::new("secret-b", 3600);
        let token = issuer.issue_token("user123", "u@example.com").unwrap();
        let err = verifier.verify(&token).unwrap_err();
        assert!(err.to_string().contains("Invalid token"));
    }

    #[test]
    fn test_expired_token_rejected() {
        let auth = JwtAuth::new("secret", 3600);
        let past = Utc::now().timestamp() as u64 - 7200;
        let claims = Claims {
            sub: "user123".to_string(),
            email: "u@example.com".to_string(),
            iat: past,
            exp: past + 60,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &auth.encoding_key).unwrap();
        assert!(matches!(auth.verify(&token), Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn test_garbage_token_rejected() {
        let auth = JwtAuth::new("secret", 3600);
        assert!(auth.authenticate(&headers_with_auth("Bearer not.a.jwt")).is_err());
    }
}
