use std::fmt;

use axum::{http::StatusCode, response::IntoResponse, Json};

/// Stable error envelope returned by every endpoint: `{error, code}`.
///
/// The numeric codes are part of the public API contract and must never be
/// renumbered; clients switch on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiError {
    BadParams,
    InvalidInspect,
    MaxRequests,
    TtlExceeded,
    SteamOffline,
    GenericBad,
    BadBody,
    BadSecret,
    NoBotsAvailable,
    RateLimit,
    MaxQueueSize,
}

impl ApiError {
    pub const fn code(self) -> u16 {
        match self {
            Self::BadParams => 1,
            Self::InvalidInspect => 2,
            Self::MaxRequests => 3,
            Self::TtlExceeded => 4,
            Self::SteamOffline => 5,
            Self::GenericBad => 6,
            Self::BadBody => 7,
            Self::BadSecret => 8,
            Self::NoBotsAvailable => 9,
            Self::RateLimit => 10,
            Self::MaxQueueSize => 11,
        }
    }

    pub const fn message(self) -> &'static str {
        match self {
            Self::BadParams => "Improper parameter structure",
            Self::InvalidInspect => "Invalid inspect link structure",
            Self::MaxRequests => "You may only have a limited amount of pending requests at a time",
            Self::TtlExceeded => "Valve's servers didn't reply in time",
            Self::SteamOffline => "Valve's servers appear to be offline, please try again later",
            Self::GenericBad => "Something went wrong on our end, please try again",
            Self::BadBody => "Improper body format",
            Self::BadSecret => "Invalid API key",
            Self::NoBotsAvailable => "No bots available to fulfill this request",
            Self::RateLimit => "Rate limit exceeded, too many requests",
            Self::MaxQueueSize => "Queue size is full, please try again later",
        }
    }

    pub const fn status(self) -> StatusCode {
        match self {
            Self::BadParams | Self::InvalidInspect | Self::BadBody => StatusCode::BAD_REQUEST,
            Self::BadSecret => StatusCode::FORBIDDEN,
            Self::MaxRequests | Self::RateLimit | Self::MaxQueueSize => {
                StatusCode::TOO_MANY_REQUESTS
            }
            Self::SteamOffline | Self::NoBotsAvailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::TtlExceeded => StatusCode::GATEWAY_TIMEOUT,
            Self::GenericBad => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The envelope body on its own, for embedding into bulk response arrays.
    pub fn envelope(self) -> serde_json::Value {
        serde_json::json!({ "error": self.message(), "code": self.code() })
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message(), self.code())
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status(), Json(self.envelope())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ApiError::BadParams.code(), 1);
        assert_eq!(ApiError::InvalidInspect.code(), 2);
        assert_eq!(ApiError::MaxRequests.code(), 3);
        assert_eq!(ApiError::TtlExceeded.code(), 4);
        assert_eq!(ApiError::SteamOffline.code(), 5);
        assert_eq!(ApiError::GenericBad.code(), 6);
        assert_eq!(ApiError::BadBody.code(), 7);
        assert_eq!(ApiError::BadSecret.code(), 8);
        assert_eq!(ApiError::NoBotsAvailable.code(), 9);
        assert_eq!(ApiError::RateLimit.code(), 10);
        assert_eq!(ApiError::MaxQueueSize.code(), 11);
    }

    #[test]
    fn invalid_api_key_is_forbidden() {
        assert_eq!(ApiError::BadSecret.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn envelope_shape() {
        let body = ApiError::SteamOffline.envelope();
        assert_eq!(body["code"], 5);
        assert!(body["error"].as_str().unwrap().contains("offline"));
    }
}
