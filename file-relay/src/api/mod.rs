//! API layer for HTTP request handling.
//!
//! The relay exposes a single surface:
//!
//! - `GET /{id}`: file addressed by a bare id
//! - `GET /{dok_id}/{file_id}`: file addressed by a container/file pair
//!
//! See [`handlers::files`] for the request flow.

pub mod handlers;
