//! Download handlers.
//!
//! Each request runs the same three steps in order: parse the path into a [`FileIdentifier`],
//! resolve it to a [`DownloadDescriptor`] through the metadata service, then stream the file from
//! the descriptor's URL. The file fetch never starts before the descriptor is known.

use axum::{
    extract::{Path, State},
    response::Response,
};
use tracing::{info, instrument};

use crate::{AppState, errors::Error, relay, types::FileIdentifier};

/// `GET /{id}`
#[instrument(skip(state))]
pub async fn download_file(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, Error> {
    let id = FileIdentifier::single(&id)?;
    relay_file(&state, id).await
}

/// `GET /{dok_id}/{file_id}`
#[instrument(skip(state))]
pub async fn download_container_file(
    State(state): State<AppState>,
    Path((dok_id, file_id)): Path<(String, String)>,
) -> Result<Response, Error> {
    let id = FileIdentifier::composite(&dok_id, &file_id)?;
    relay_file(&state, id).await
}

async fn relay_file(state: &AppState, id: FileIdentifier) -> Result<Response, Error> {
    let descriptor = state.upstream.resolve(&id).await?;
    let upstream = state.upstream.fetch_file(&descriptor).await?;

    info!(
        file_id = %id,
        content_length = ?descriptor.content_length,
        "Relaying file"
    );
    relay::stream_response(&descriptor, upstream)
}
