use axum::{
    body::Body,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use std::fmt;
use thiserror::Error as ThisError;

/// Which of the two outbound requests an upstream error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamHop {
    /// `GET <main_server>/failas/<id>/downloadProxyInformation`
    Metadata,
    /// `GET <descriptor.fileUrl>`
    File,
}

impl fmt::Display for UpstreamHop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamHop::Metadata => write!(f, "metadata lookup"),
            UpstreamHop::File => write!(f, "file fetch"),
        }
    }
}

#[derive(ThisError, Debug)]
pub enum Error {
    /// Path segment is not a decimal integer
    #[error("Invalid file identifier: {value}")]
    InvalidIdentifier { value: String },

    /// Upstream answered with a non-success status; relayed to the client verbatim
    #[error("Upstream {hop} returned {status}")]
    UpstreamStatus {
        hop: UpstreamHop,
        status: StatusCode,
        content_type: Option<HeaderValue>,
        body: Bytes,
    },

    /// Connect, send or read failure before any response headers went out
    #[error("Upstream {hop} failed: {source}")]
    Transport {
        hop: UpstreamHop,
        #[source]
        source: reqwest::Error,
    },

    /// Metadata service answered 2xx with a body that is not a download descriptor
    #[error("Malformed download descriptor: {source}")]
    MalformedDescriptor {
        #[source]
        source: serde_json::Error,
    },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidIdentifier { .. } => StatusCode::BAD_REQUEST,
            Error::UpstreamStatus { status, .. } => *status,
            Error::Transport { .. } | Error::MalformedDescriptor { .. } | Error::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::InvalidIdentifier { .. } => self.to_string(),
            Error::UpstreamStatus { body, .. } => String::from_utf8_lossy(body).into_owned(),
            Error::Transport { .. } | Error::MalformedDescriptor { .. } | Error::Internal { .. } => {
                "Internal proxy error".to_string()
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::Transport { .. } | Error::MalformedDescriptor { .. } | Error::Internal { .. } => {
                tracing::error!("Proxy error: {}", self.to_string_chain());
            }
            Error::UpstreamStatus { .. } => {
                tracing::info!("Relaying upstream error: {}", self);
            }
            Error::InvalidIdentifier { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();

        match self {
            // Upstream bodies go back byte for byte, they need not be UTF-8
            Error::UpstreamStatus { content_type, body, .. } => {
                let mut response = Response::new(Body::from(body));
                *response.status_mut() = status;
                if let Some(content_type) = content_type {
                    response.headers_mut().insert(header::CONTENT_TYPE, content_type);
                }
                response
            }
            other => (status, other.user_message()).into_response(),
        }
    }
}

impl Error {
    /// Flatten the source chain into one line so the log carries the underlying cause.
    fn to_string_chain(&self) -> String {
        let mut message = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        message
    }
}
