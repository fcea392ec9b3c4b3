#![forbid(unsafe_code)]

//! Public entry point for the tube-endpoint crate.
//!
//! The library holds everything the `backend` binary wires together: settings,
//! the yt-dlp adapter, format normalization, the download orchestrator and the
//! axum router that exposes them.

pub mod api;
pub mod config;
pub mod error;
pub mod extractor;
pub mod files;
pub mod formats;
pub mod metadata;
pub mod reference;
pub mod service;
