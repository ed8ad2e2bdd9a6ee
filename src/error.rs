//! Error types for the PKCE bridge.
//!
//! Client mistakes (missing parameters, cookie conflicts, verifier
//! mismatches) render as `400` with the human-readable `title` the bridge
//! protocol promises. Store failures render as `500`, upstream transport
//! failures as `502`. Provider HTTP errors are *not* errors here — the
//! token handlers relay them verbatim.

use std::io;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Result type alias for the PKCE bridge
pub type Result<T> = std::result::Result<T, Error>;

/// PKCE bridge errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Required query parameter absent (or empty)
    #[error("Missing {0} query parameter")]
    MissingQueryParam(&'static str),

    /// Required form parameter absent (or empty)
    #[error("Missing {0} form parameter")]
    MissingFormParam(&'static str),

    /// Request body was not a non-empty urlencoded form
    #[error("No application/x-www-form-urlencoded body found")]
    MissingForm,

    /// Cookie absent, or present with conflicting values
    #[error("Missing or ambiguous {0} cookie")]
    AmbiguousCookie(&'static str),

    /// Value destined for a cookie would not survive the round trip
    #[error("The {0} cannot be stored in a cookie")]
    InvalidCookieValue(&'static str),

    /// A value that must be an absolute URL did not parse as one
    #[error("The {0} is not a valid URL")]
    InvalidUrl(&'static str),

    /// Neither forwarding headers nor `Host` identify this server
    #[error("Missing Host header")]
    MissingHost,

    /// No challenge binding stored for the presented code
    #[error("The code_challenge for this code was not found, please try again.")]
    UnknownCode,

    /// S256(verifier) does not equal the stored challenge
    #[error("The code_verifier does not match code_challenge for this code")]
    VerifierMismatch,

    /// Parameter value not representable in a response header
    #[error("Invalid characters in request parameter")]
    HeaderValue(#[from] axum::http::header::InvalidHeaderValue),

    /// Challenge store failure
    #[error("Challenge store error: {0}")]
    Store(String),

    /// Upstream token endpoint unreachable
    #[error("Upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// HTTP status this error renders as.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingQueryParam(_)
            | Self::MissingFormParam(_)
            | Self::MissingForm
            | Self::AmbiguousCookie(_)
            | Self::InvalidCookieValue(_)
            | Self::InvalidUrl(_)
            | Self::MissingHost
            | Self::UnknownCode
            | Self::VerifierMismatch
            | Self::HeaderValue(_) => StatusCode::BAD_REQUEST,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Config(_) | Self::Store(_) | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();

        let title = match status {
            // Internal detail stays in the logs, not on the wire
            StatusCode::INTERNAL_SERVER_ERROR => {
                error!(error = %self, "Internal server error");
                "Internal server error".to_string()
            }
            StatusCode::BAD_GATEWAY => {
                error!(error = %self, "Upstream request failed");
                self.to_string()
            }
            _ => self.to_string(),
        };

        (status, Json(json!({ "title": title }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_map_to_bad_request() {
        assert_eq!(
            Error::MissingQueryParam("code").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(Error::MissingForm.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            Error::AmbiguousCookie("code_challenge").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(Error::UnknownCode.status(), StatusCode::BAD_REQUEST);
        assert_eq!(Error::VerifierMismatch.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn infrastructure_errors_map_to_server_errors() {
        assert_eq!(
            Error::Store("connection reset".to_string()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            Error::Config("bad yaml".to_string()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn titles_match_the_protocol_wording() {
        assert_eq!(
            Error::MissingQueryParam("code_challenge").to_string(),
            "Missing code_challenge query parameter"
        );
        assert_eq!(
            Error::MissingFormParam("x_client_secret").to_string(),
            "Missing x_client_secret form parameter"
        );
        assert_eq!(
            Error::AmbiguousCookie("original_redirect_uri").to_string(),
            "Missing or ambiguous original_redirect_uri cookie"
        );
        assert_eq!(
            Error::InvalidCookieValue("redirect_uri query parameter").to_string(),
            "The redirect_uri query parameter cannot be stored in a cookie"
        );
        assert_eq!(
            Error::UnknownCode.to_string(),
            "The code_challenge for this code was not found, please try again."
        );
        assert_eq!(
            Error::VerifierMismatch.to_string(),
            "The code_verifier does not match code_challenge for this code"
        );
    }
}
