//! Request authentication.
//!
//! Signed venue calls carry three headers:
//!
//! - `X-API-KEY`: the public key
//! - `X-API-TIMESTAMP`: unix milliseconds, strictly increasing per client
//! - `X-API-SIGN`: base64 HMAC-SHA256 of `timestamp + method + path + body`
//!
//! Signing happens in the preflight stage of a call, before admission, so a
//! signing failure never consumes a permit.

mod credentials;
mod signature;
mod timestamp;

pub use credentials::{Credentials, CredentialsProvider, EnvCredentials, StaticCredentials};
pub use signature::{HmacSigner, RequestSigner, SignedHeaders, headers, sign_request};
pub use timestamp::{IncreasingTimestamp, TimestampProvider};
