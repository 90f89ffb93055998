//! Response envelope decoding.
//!
//! Every venue reply, REST or stream, is wrapped as
//!
//! ```json
//! {"code": "200000", "msg": "...", "data": ...}
//! ```
//!
//! where `code` may be a string or a number and a missing or `"0"` code
//! means success. Non-success codes become [`ApiError`]s, which is what the
//! retry policy inspects. Throttling and overload statuses are mapped onto the
//! venue's own codes when the body does not carry one.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{ApiError, VenueError, error_codes};
use crate::transport::TransportResponse;

/// Venue code for success on REST replies.
pub const REST_SUCCESS: &str = "200000";

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    code: Option<Value>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Value,
}

fn code_string(code: &Value) -> Option<String> {
    match code {
        Value::String(code) => Some(code.clone()),
        Value::Number(code) => Some(code.to_string()),
        _ => None,
    }
}

fn is_success(code: Option<&str>) -> bool {
    matches!(code, None | Some(error_codes::SUCCESS) | Some(REST_SUCCESS) | Some(""))
}

fn status_error(status: u16, message: Option<String>) -> Option<ApiError> {
    match status {
        429 => Some(ApiError::new(
            error_codes::RATE_LIMIT_EXCEEDED,
            message.unwrap_or_else(|| "Too Many Requests".to_string()),
        )),
        500..=599 => Some(ApiError::new(
            error_codes::SERVICE_UNAVAILABLE,
            message.unwrap_or_else(|| format!("HTTP {status}")),
        )),
        _ => None,
    }
}

/// Decode the `data` member of a reply.
pub fn decode<T>(response: &TransportResponse) -> Result<T, VenueError>
where
    T: DeserializeOwned,
{
    let data = decode_value(response)?;
    serde_json::from_value(data).map_err(|e| {
        VenueError::InvalidResponse(format!("Failed to decode response data: {e}. Body: {}", response.body))
    })
}

/// Decode the `data` member of a reply without typing it.
pub fn decode_value(response: &TransportResponse) -> Result<Value, VenueError> {
    let envelope = match serde_json::from_str::<Envelope>(&response.body) {
        Ok(envelope) => envelope,
        Err(e) => {
            return Err(match status_error(response.status, None) {
                Some(api_error) => VenueError::Api(api_error),
                None => VenueError::InvalidResponse(format!(
                    "Failed to parse response (HTTP {}): {e}. Body: {}",
                    response.status, response.body
                )),
            });
        }
    };

    let code = envelope.code.as_ref().and_then(code_string);
    if !is_success(code.as_deref()) {
        let code = code.unwrap_or_default();
        return Err(VenueError::Api(ApiError::new(
            code,
            envelope.msg.unwrap_or_default(),
        )));
    }

    if let Some(api_error) = status_error(response.status, envelope.msg.clone()) {
        return Err(VenueError::Api(api_error));
    }
    if !(200..300).contains(&response.status) {
        return Err(VenueError::InvalidResponse(format!(
            "HTTP {}: {}",
            response.status, response.body
        )));
    }

    Ok(envelope.data)
}

/// Decode a quota reply. `data` must be a string or a number; any other shape
/// yields an empty quota, which parses as zero.
pub fn decode_quota(response: &TransportResponse) -> Result<String, VenueError> {
    Ok(match decode_value(response)? {
        Value::String(raw) => raw,
        Value::Number(raw) => raw.to_string(),
        _ => String::new(),
    })
}
