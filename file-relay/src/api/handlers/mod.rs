//! HTTP request handlers.
//!
//! - [`files`]: identifier parsing, metadata lookup and the streaming download
//!
//! # Error Handling
//!
//! Handlers return [`crate::errors::Error`], which converts to either a verbatim upstream
//! status/body or a short plain-text message.

pub mod files;
