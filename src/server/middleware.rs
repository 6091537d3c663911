//! Request middleware: trusted subnet check and body decoding.

use super::http::HttpError;
use super::AppState;
use crate::core::{codec, REAL_IP_HEADER};
use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::IpAddr;
use tracing::{debug, warn};

/// Upper bound on a request body before decompression
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Reject requests whose `X-Real-IP` is missing or outside the trusted subnet.
///
/// Without a configured subnet every request passes.
pub async fn check_trusted_subnet(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(subnet) = state.trusted_subnet else {
        return next.run(request).await;
    };

    let claimed = request
        .headers()
        .get(REAL_IP_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<IpAddr>().ok());

    match claimed {
        Some(ip) if subnet.contains(ip) => next.run(request).await,
        Some(ip) => {
            warn!("Rejected request from {} outside {}", ip, subnet);
            HttpError::Forbidden(format!("{} is not in the trusted subnet", ip)).into_response()
        },
        None => {
            warn!("Rejected request without a valid {} header", REAL_IP_HEADER);
            HttpError::Forbidden(format!("missing or invalid {} header", REAL_IP_HEADER))
                .into_response()
        },
    }
}

/// Undo the agent's payload encoding before the handler sees the body.
///
/// Gzip bodies (`Content-Encoding: gzip`) are decompressed. When a private
/// key is configured the body is then decrypted; bodies that do not decrypt
/// are passed through unchanged since batches travel unencrypted.
pub async fn decode_body(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, HttpError> {
    let gzipped = request
        .headers()
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("gzip"));

    if !gzipped && state.decryptor.is_none() {
        return Ok(next.run(request).await);
    }

    let (mut parts, body) = request.into_parts();
    let raw = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| HttpError::BadRequest(format!("failed to read body: {}", e)))?;

    let mut payload = if gzipped {
        codec::decompress(&raw)
            .map_err(|e| HttpError::BadRequest(format!("failed to decompress body: {}", e)))?
    } else {
        raw.to_vec()
    };

    if let Some(decryptor) = &state.decryptor {
        match decryptor.decrypt(&payload) {
            Ok(plain) => payload = plain,
            Err(e) => debug!("Body passed through undecrypted: {}", e),
        }
    }

    parts.headers.remove(header::CONTENT_ENCODING);
    parts.headers.remove(header::CONTENT_LENGTH);
    let request = Request::from_parts(parts, Body::from(payload));
    Ok(next.run(request).await)
}
