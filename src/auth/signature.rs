//! HMAC-SHA256 request signing.
//!
//! The prehash string is the timestamp, the upper-case method, the request
//! path (including any query string) and the body, concatenated without
//! separators:
//!
//! ```text
//! base64(HMAC-SHA256(secret, timestamp + method + path + body))
//! ```

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;

use crate::auth::Credentials;
use crate::error::VenueError;

type HmacSha256 = Hmac<Sha256>;

/// Header names used on signed requests.
pub mod headers {
    pub const API_KEY: &str = "X-API-KEY";
    pub const API_SIGN: &str = "X-API-SIGN";
    pub const API_TIMESTAMP: &str = "X-API-TIMESTAMP";
}

/// Sign a request.
///
/// # Example
///
/// ```rust
/// use venue_api_client::auth::{Credentials, sign_request};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let credentials = Credentials::new("api_key", "api_secret");
/// let signature = sign_request(
///     &credentials,
///     1_700_000_000_000,
///     "POST",
///     "/api/v1/trade/order",
///     r#"{"symbol":"BTC-USDT","side":"buy"}"#,
/// )?;
/// assert_eq!(signature.len(), 44);
/// # Ok(())
/// # }
/// ```
pub fn sign_request(
    credentials: &Credentials,
    timestamp: u64,
    method: &str,
    path: &str,
    body: &str,
) -> Result<String, VenueError> {
    if credentials.expose_secret().is_empty() {
        return Err(VenueError::Auth("API secret is empty".to_string()));
    }

    let mut mac = HmacSha256::new_from_slice(credentials.expose_secret().as_bytes())
        .map_err(|e| VenueError::Auth(format!("Invalid HMAC key: {e}")))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(method.to_ascii_uppercase().as_bytes());
    mac.update(path.as_bytes());
    mac.update(body.as_bytes());

    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Authentication material attached to one signed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignedHeaders {
    /// Public key.
    pub key: String,
    /// Request timestamp in unix milliseconds.
    pub timestamp: u64,
    /// Base64 signature.
    pub sign: String,
}

impl SignedHeaders {
    /// As HTTP header pairs.
    pub fn into_pairs(self) -> Vec<(String, String)> {
        vec![
            (headers::API_KEY.to_string(), self.key),
            (headers::API_SIGN.to_string(), self.sign),
            (headers::API_TIMESTAMP.to_string(), self.timestamp.to_string()),
        ]
    }
}

/// Produces authentication material for a request.
///
/// The dispatch routine treats signing as opaque; swap in another signer to
/// support a different scheme.
pub trait RequestSigner: Send + Sync {
    /// Sign one request.
    fn sign(
        &self,
        credentials: &Credentials,
        timestamp: u64,
        method: &str,
        path: &str,
        body: &str,
    ) -> Result<SignedHeaders, VenueError>;
}

/// The venue's HMAC-SHA256 scheme.
#[derive(Debug, Clone, Copy, Default)]
pub struct HmacSigner;

impl RequestSigner for HmacSigner {
    fn sign(
        &self,
        credentials: &Credentials,
        timestamp: u64,
        method: &str,
        path: &str,
        body: &str,
    ) -> Result<SignedHeaders, VenueError> {
        Ok(SignedHeaders {
            key: credentials.api_key.clone(),
            timestamp,
            sign: sign_request(credentials, timestamp, method, path, body)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> Credentials {
        Credentials::new("key", "my_secret")
    }

    #[test]
    fn test_prehash_layout() {
        let credentials = Credentials::new("k", "key");
        let signature = sign_request(&credentials, 1000, "post", "/api/v1/orders", r#"{"a":1}"#).unwrap();

        let mut mac = HmacSha256::new_from_slice(b"key").unwrap();
        mac.update(br#"1000POST/api/v1/orders{"a":1}"#);
        assert_eq!(signature, BASE64.encode(mac.finalize().into_bytes()));
    }

    #[test]
    fn test_signature_is_deterministic() {
        let a = sign_request(&credentials(), 12345, "GET", "/api/v1/accounts?currency=USDT", "").unwrap();
        let b = sign_request(&credentials(), 12345, "get", "/api/v1/accounts?currency=USDT", "").unwrap();
        assert_eq!(a, b);
        assert_eq!(BASE64.decode(&a).unwrap().len(), 32);
    }

    #[test]
    fn test_signature_covers_every_part() {
        let base = sign_request(&credentials(), 1, "POST", "/a", "{}").unwrap();
        assert_ne!(base, sign_request(&credentials(), 2, "POST", "/a", "{}").unwrap());
        assert_ne!(base, sign_request(&credentials(), 1, "GET", "/a", "{}").unwrap());
        assert_ne!(base, sign_request(&credentials(), 1, "POST", "/b", "{}").unwrap());
        assert_ne!(base, sign_request(&credentials(), 1, "POST", "/a", "{ }").unwrap());
    }

    #[test]
    fn test_empty_secret_rejected() {
        let credentials = Credentials::new("key", "");
        assert!(matches!(
            sign_request(&credentials, 1, "GET", "/", ""),
            Err(VenueError::Auth(_))
        ));
    }

    #[test]
    fn test_hmac_signer_headers() {
        let signed = HmacSigner.sign(&credentials(), 42, "POST", "/a", "{}").unwrap();
        let pairs = signed.clone().into_pairs();
        assert_eq!(pairs[0], (headers::API_KEY.to_string(), "key".to_string()));
        assert_eq!(pairs[1].1, signed.sign);
        assert_eq!(pairs[2], (headers::API_TIMESTAMP.to_string(), "42".to_string()));
    }
}
