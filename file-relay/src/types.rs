//! Request-scoped value types.
//!
//! - [`FileIdentifier`]: what the inbound path names, either a bare file id or a
//!   `container/file` pair
//! - [`DownloadDescriptor`]: what the metadata service says about where to fetch it from

use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;

use crate::errors::Error;

/// A file as addressed by the inbound path.
///
/// The [`Display`](fmt::Display) form is exactly the segment the metadata service expects after
/// `/failas/`: `42` for a single id, `7/42` for a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileIdentifier {
    Single(i64),
    Composite { container_id: i64, file_id: i64 },
}

impl FileIdentifier {
    /// Identifier for `/<id>`.
    pub fn single(id: &str) -> Result<Self, Error> {
        Ok(Self::Single(parse_segment(id)?))
    }

    /// Identifier for `/<containerId>/<fileId>`.
    pub fn composite(container_id: &str, file_id: &str) -> Result<Self, Error> {
        Ok(Self::Composite {
            container_id: parse_segment(container_id)?,
            file_id: parse_segment(file_id)?,
        })
    }
}

fn parse_segment(segment: &str) -> Result<i64, Error> {
    segment.parse().map_err(|_| Error::InvalidIdentifier {
        value: segment.to_string(),
    })
}

impl fmt::Display for FileIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileIdentifier::Single(id) => write!(f, "{id}"),
            FileIdentifier::Composite { container_id, file_id } => write!(f, "{container_id}/{file_id}"),
        }
    }
}

/// Download instructions returned by `downloadProxyInformation`.
///
/// Every field except `file_url` may be missing or `null`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadDescriptor {
    pub file_url: String,
    /// Extra request headers for the file fetch (typically a signed authorization)
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub content_length: Option<u64>,
    #[serde(default)]
    pub file_name: Option<String>,
}
