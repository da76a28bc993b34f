use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Tokens are valid for 7 days
pub const TOKEN_TTL_SECS: i64 = 7 * 24 * 60 * 60;

const HEADER_B64: &str = "eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9"; // {"alg":"HS256","typ":"JWT"}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("invalid signature")]
    BadSignature,
    #[error("token expired")]
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub email: String,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
}

fn sign_input(secret: &str, input: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(input.as_bytes());
    URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
}

/// Issue a signed HS256 token for a user
pub fn issue(secret: &str, user_id: &str, email: &str, role: &str) -> Result<String, serde_json::Error> {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        email: email.to_string(),
        role: role.to_string(),
        iat: now,
        exp: now + TOKEN_TTL_SECS,
    };
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?);
    let signing_input = format!("{}.{}", HEADER_B64, payload);
    let signature = sign_input(secret, &signing_input);
    Ok(format!("{}.{}", signing_input, signature))
}

/// Verify signature and expiry, returning the claims
pub fn verify(secret: &str, token: &str) -> Result<Claims, TokenError> {
    let mut parts = token.split('.');
    let (header, payload, signature) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(p), Some(s), None) => (h, p, s),
        _ => return Err(TokenError::Malformed),
    };

    let signing_input = format!("{}.{}", header, payload);
    let sig_bytes = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|_| TokenError::Malformed)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(signing_input.as_bytes());
    mac.verify_slice(&sig_bytes)
        .map_err(|_| TokenError::BadSignature)?;

    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| TokenError::Malformed)?;
    let claims: Claims =
        serde_json::from_slice(&payload_bytes).map_err(|_| TokenError::Malformed)?;

    if claims.exp < chrono::Utc::now().timestamp() {
        return Err(TokenError::Expired);
    }

    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "segredo-de-teste";

    #[test]
    fn issue_and_verify_roundtrip() {
        let token = issue(SECRET, "u-1", "ana@replanta.pt", "client").unwrap();
        let claims = verify(SECRET, &token).unwrap();
        assert_eq!(claims.sub, "u-1");
        assert_eq!(claims.role, "client");
        assert_eq!(claims.exp - claims.iat, TOKEN_TTL_SECS);
    }

    #[test]
    fn rejects_wrong_secret() {
        let token = issue(SECRET, "u-1", "ana@replanta.pt", "client").unwrap();
        assert_eq!(verify("outro-segredo", &token), Err(TokenError::BadSignature));
    }

    #[test]
    fn rejects_tampered_payload() {
        let token = issue(SECRET, "u-1", "ana@replanta.pt", "client").unwrap();
        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&Claims {
                sub: "u-1".to_string(),
                email: "ana@replanta.pt".to_string(),
                role: "admin".to_string(),
                iat: 0,
                exp: i64::MAX,
            })
            .unwrap(),
        );
        parts[1] = &forged;
        let tampered = parts.join(".");
        assert_eq!(verify(SECRET, &tampered), Err(TokenError::BadSignature));
    }

    #[test]
    fn rejects_expired_token() {
        // Build a token whose exp is already in the past
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: "u-1".to_string(),
            email: "ana@replanta.pt".to_string(),
            role: "client".to_string(),
            iat: now - TOKEN_TTL_SECS - 10,
            exp: now - 10,
        };
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());
        let signing_input = format!("{}.{}", HEADER_B64, payload);
        let signature = sign_input(SECRET, &signing_input);
        let token = format!("{}.{}", signing_input, signature);

        assert_eq!(verify(SECRET, &token), Err(TokenError::Expired));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(verify(SECRET, "abc"), Err(TokenError::Malformed));
        assert_eq!(verify(SECRET, "a.b.c.d"), Err(TokenError::Malformed));
    }
}
