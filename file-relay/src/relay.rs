//! Turning a successful upstream file response into the client response.
//!
//! Headers come from the [`DownloadDescriptor`], not from the storage response, and are all set
//! before the body starts. The body is the upstream byte stream handed straight to hyper, so memory
//! use is bounded by one chunk regardless of file size. If the client goes away, hyper drops the
//! body, which drops the upstream response and closes that connection too.

use axum::{
    body::Body,
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use futures::TryStreamExt;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use tracing::error;

use crate::errors::Error;
use crate::types::DownloadDescriptor;

/// Characters `encodeURIComponent` leaves alone, on top of ASCII alphanumerics.
const FILENAME: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// `inline; filename="<encoded>"`
pub fn content_disposition(file_name: &str) -> String {
    format!("inline; filename=\"{}\"", utf8_percent_encode(file_name, FILENAME))
}

/// Build the streaming `200 OK` for `upstream`, labelled according to `descriptor`.
///
/// A read error after this point can no longer become an error status, so the stream yields the
/// error and hyper aborts the connection rather than ending the body cleanly.
pub fn stream_response(descriptor: &DownloadDescriptor, upstream: reqwest::Response) -> Result<Response, Error> {
    let body = upstream.bytes_stream().inspect_err(|e| {
        error!("Stream error: {}", e);
    });

    let mut response = Response::new(Body::from_stream(body));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    if let Some(content_type) = &descriptor.content_type {
        let value = HeaderValue::from_str(content_type).map_err(|_| Error::Internal {
            operation: format!("set Content-Type from descriptor value {content_type:?}"),
        })?;
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Some(content_length) = descriptor.content_length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(content_length));
    }
    if let Some(file_name) = &descriptor.file_name {
        // Percent-encoding leaves only visible ASCII, which is always a valid header value
        let value = HeaderValue::from_str(&content_disposition(file_name)).map_err(|_| Error::Internal {
            operation: "build Content-Disposition".to_string(),
        })?;
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    Ok(response)
}
