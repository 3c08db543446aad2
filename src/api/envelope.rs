//! Response envelope decoding.
//!
//! The backend wraps every body in `{success: boolean, data?, error?}`.
//! A `success: false` on a 2xx transport is a logical rejection, not a
//! transport success, so decoding happens in one place and yields the
//! tagged [`ApiError`] taxonomy.

use serde_json::Value;

use super::error::ApiError;
use super::transport::HttpResponse;

/// Turn a transport-level response into the envelope's verdict.
///
/// On success the full envelope body is returned verbatim; the sync engine
/// stores it as the authoritative server response.
pub fn classify_response(resp: HttpResponse) -> Result<Value, ApiError> {
  let status = resp.status;

  if (200..300).contains(&status) {
    if resp.body.get("success").and_then(Value::as_bool) == Some(false) {
      return Err(ApiError::Logical(envelope_error(&resp.body)));
    }
    return Ok(resp.body);
  }

  let message = envelope_error(&resp.body);
  if (400..500).contains(&status) {
    Err(ApiError::Client { status, message })
  } else {
    Err(ApiError::Server { status, message })
  }
}

/// Best-effort error message from an envelope body.
fn envelope_error(body: &Value) -> String {
  body
    .get("error")
    .and_then(Value::as_str)
    .unwrap_or("request failed")
    .to_string()
}
