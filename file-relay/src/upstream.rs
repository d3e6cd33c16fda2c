//! Outbound HTTP to the metadata service and to file storage.
//!
//! Both hops share one [`reqwest::Client`] and follow the same failure policy: any non-2xx answer
//! becomes [`Error::UpstreamStatus`] carrying the status and body so the handler can hand them to
//! the client unchanged.

use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use reqwest::{Client, Response};
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

use crate::config::Config;
use crate::errors::{Error, UpstreamHop};
use crate::types::{DownloadDescriptor, FileIdentifier};

/// Install the process-wide rustls provider. Safe to call more than once.
pub fn install_crypto_provider() {
    // Err only means a provider is already installed
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

pub struct UpstreamClient {
    client: Client,
    main_server: Url,
    api_key: String,
    metadata_timeout: Duration,
}

impl UpstreamClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let main_server = config
            .main_server
            .clone()
            .ok_or_else(|| anyhow::anyhow!("main_server is not configured"))?;
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| anyhow::anyhow!("api_key is not configured"))?;

        install_crypto_provider();

        let mut builder = Client::builder().connect_timeout(config.upstream.connect_timeout);
        if let Some(read_timeout) = config.upstream.read_timeout {
            builder = builder.read_timeout(read_timeout);
        }

        Ok(Self {
            client: builder.build()?,
            main_server,
            api_key,
            metadata_timeout: config.upstream.metadata_timeout,
        })
    }

    /// `<main_server>/failas/<id>/downloadProxyInformation`, with exactly one slash at the join.
    pub fn descriptor_url(&self, id: &FileIdentifier) -> String {
        format!(
            "{}/failas/{}/downloadProxyInformation",
            self.main_server.as_str().trim_end_matches('/'),
            id
        )
    }

    /// Ask the metadata service where and how to fetch `id`.
    #[instrument(skip_all, fields(file_id = %id))]
    pub async fn resolve(&self, id: &FileIdentifier) -> Result<DownloadDescriptor, Error> {
        let url = self.descriptor_url(id);
        debug!("Requesting download descriptor from {}", url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .timeout(self.metadata_timeout)
            .send()
            .await
            .map_err(|source| Error::Transport {
                hop: UpstreamHop::Metadata,
                source,
            })?;

        let response = ensure_success(UpstreamHop::Metadata, response).await?;

        let body = response.bytes().await.map_err(|source| Error::Transport {
            hop: UpstreamHop::Metadata,
            source,
        })?;

        serde_json::from_slice(&body).map_err(|source| Error::MalformedDescriptor { source })
    }

    /// Start the file download described by `descriptor`. Only the headers are awaited; the body
    /// is left on the returned response for the caller to stream.
    #[instrument(skip_all)]
    pub async fn fetch_file(&self, descriptor: &DownloadDescriptor) -> Result<Response, Error> {
        let headers = forwarded_headers(descriptor)?;
        debug!("Fetching file from {}", descriptor.file_url);

        let response = self
            .client
            .get(&descriptor.file_url)
            .headers(headers)
            .send()
            .await
            .map_err(|source| Error::Transport {
                hop: UpstreamHop::File,
                source,
            })?;

        ensure_success(UpstreamHop::File, response).await
    }
}

/// Turn the descriptor's string map into request headers.
fn forwarded_headers(descriptor: &DownloadDescriptor) -> Result<HeaderMap, Error> {
    let mut headers = HeaderMap::new();
    for (name, value) in descriptor.headers.iter().flatten() {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| Error::Internal {
            operation: format!("forward descriptor header '{name}': invalid header name"),
        })?;
        let value = HeaderValue::from_str(value).map_err(|_| Error::Internal {
            operation: format!("forward descriptor header '{name}': invalid header value"),
        })?;
        headers.insert(name, value);
    }
    Ok(headers)
}

/// Pass 2xx responses through; turn anything else into a relayable [`Error::UpstreamStatus`].
async fn ensure_success(hop: UpstreamHop, response: Response) -> Result<Response, Error> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let content_type = response.headers().get(header::CONTENT_TYPE).cloned();
    let body = response
        .bytes()
        .await
        .map_err(|source| Error::Transport { hop, source })?;

    Err(Error::UpstreamStatus {
        hop,
        status,
        content_type,
        body,
    })
}
