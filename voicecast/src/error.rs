//! Error kinds surfaced by the core and their HTTP representation.

use std::borrow::Cow;

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use derive_more::{Display, Error, From};
use smart_default::SmartDefault;

/// Errors produced by the voice session, queue and TTS pipeline.
///
/// Callers match on the kind rather than sniffing a message string.
#[derive(Clone, Debug, Display, Error, From)]
pub enum CoreError {
    /// Attachment attempt to a channel other than the one currently locked.
    #[display(fmt = "voice session is locked to channel {}", _0)]
    Locked(#[error(not(source))] u64),

    /// A reconnect was attempted too soon after the previous attempt.
    #[display(fmt = "reconnect attempted too soon, try again shortly")]
    Cooldown,

    /// The platform-side connect operation failed.
    #[display(fmt = "failed to connect to voice channel: {}", _0)]
    ConnectFailed(#[error(not(source))] String),

    /// The named provider's circuit breaker is open.
    #[display(fmt = "{} TTS provider is temporarily unavailable", _0)]
    BreakerOpen(#[error(not(source))] &'static str),

    /// A TTS provider responded with a non-success HTTP status.
    #[display(fmt = "TTS provider responded with status {}", _0)]
    ProviderStatus(#[error(not(source))] u16),

    /// The primary provider's response body could not be parsed.
    #[display(fmt = "failed to parse TTS provider response")]
    ParseError,

    /// The primary provider's response body could not be base64-decoded.
    #[display(fmt = "failed to decode TTS provider audio payload")]
    DecodeError,

    /// The primary provider reported a `null` audio payload.
    #[display(fmt = "TTS provider returned no audio for this request")]
    NullAudio,

    /// A settings patch referenced a key that does not exist.
    #[display(fmt = "unknown setting: {}", _0)]
    UnknownSetting(#[error(not(source))] String),

    /// A settings value failed validation.
    #[display(fmt = "invalid value for '{}': {}", field, reason)]
    ValidationError {
        /// Name of the offending field.
        field: String,
        /// Human-readable reason the value was rejected.
        reason: String,
    },

    /// The requested guild has no known session.
    #[display(fmt = "unknown guild")]
    UnknownGuild,

    /// The control plane request lacked a valid bearer token.
    #[display(fmt = "unauthorized")]
    Unauthorized,

    /// An unexpected, non-categorized failure.
    #[display(fmt = "{}", _0)]
    Other(#[error(not(source))] String),
}

impl CoreError {
    /// Maps this error to the HTTP status code it should be reported with.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Locked(_) => StatusCode::CONFLICT,
            Self::Cooldown => StatusCode::TOO_MANY_REQUESTS,
            Self::ConnectFailed(_) => StatusCode::BAD_GATEWAY,
            Self::BreakerOpen(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::ProviderStatus(_)
            | Self::ParseError
            | Self::DecodeError
            | Self::NullAudio => StatusCode::BAD_GATEWAY,
            Self::UnknownSetting(_) | Self::ValidationError { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::UnknownGuild => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable code identifying this error's kind.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Locked(_) => "LOCKED",
            Self::Cooldown => "COOLDOWN",
            Self::ConnectFailed(_) => "CONNECT_FAILED",
            Self::BreakerOpen(_) => "BREAKER_OPEN",
            Self::ProviderStatus(_) => "PROVIDER_STATUS",
            Self::ParseError => "PARSE_ERROR",
            Self::DecodeError => "DECODE_ERROR",
            Self::NullAudio => "NULL_AUDIO",
            Self::UnknownSetting(_) => "UNKNOWN_SETTING",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::UnknownGuild => "UNKNOWN_GUILD",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Other(_) => "UNKNOWN",
        }
    }
}

/// Actix-facing error wrapper, adapted from a GraphQL field error to a
/// plain JSON body (`{"error": {...}}`).
#[derive(Clone, Debug, Display, Error, SmartDefault)]
#[display(fmt = "{}", message)]
pub struct ApiError {
    /// Machine-readable error code.
    #[default = "UNKNOWN"]
    pub code: Cow<'static, str>,

    /// HTTP status this error is reported with.
    #[default(StatusCode::INTERNAL_SERVER_ERROR)]
    #[error(not(source))]
    pub status: StatusCode,

    /// Human-readable message.
    #[default = "Unknown error has happened."]
    pub message: Cow<'static, str>,
}

impl ApiError {
    /// Creates a new [`ApiError`] with the given machine-readable `code`.
    #[must_use]
    pub fn new<C: Into<Cow<'static, str>>>(code: C) -> Self {
        Self {
            code: code.into(),
            ..Self::default()
        }
    }

    /// Sets the HTTP status of this error.
    #[must_use]
    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Sets the human-readable message of this error.
    #[must_use]
    pub fn message<M: Into<Cow<'static, str>>>(mut self, msg: M) -> Self {
        self.message = msg.into();
        self
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self::new(err.code())
            .status(err.status_code())
            .message(err.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::new("INTERNAL").message(err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::new("BAD_JSON")
            .status(StatusCode::BAD_REQUEST)
            .message(err.to_string())
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        self.status
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "error": {
                "code": self.code,
                "message": self.message,
            },
        }))
    }
}
