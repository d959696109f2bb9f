// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Error types for Scriptorium

use thiserror::Error;

/// Result type alias for Scriptorium operations
pub type Result<T> = std::result::Result<T, ScriptoriumError>;

/// Scriptorium error types
#[derive(Error, Debug)]
pub enum ScriptoriumError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("No API key provided. Use --api-key or set GOOGLE_API_KEY")]
    MissingApiKey,

    #[error("Invalid API key format")]
    InvalidApiKey,

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("No usable input files")]
    NoInputs,

    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("File exceeds maximum size ({limit_mb} MB): {name}")]
    FileTooLarge { name: String, limit_mb: u64 },

    #[error("File is empty: {0}")]
    EmptyFile(String),

    #[error("Document error: {0}")]
    Document(String),

    #[error("PDF error: {0}")]
    Pdf(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("Model returned no text: {0}")]
    EmptyResponse(String),

    #[error("Error calling model after {attempts} attempt(s): {source}")]
    ModelCall {
        attempts: u32,
        #[source]
        source: Box<ScriptoriumError>,
    },

    #[error("Processing cancelled")]
    Cancelled,

    #[error("Worker failed: {0}")]
    Worker(String),

    #[error("{failed} of {total} input(s) failed")]
    RunIncomplete { failed: usize, total: usize },
}

impl ScriptoriumError {
    /// HTTP status carried by this error, looking through model-call wrappers
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            Self::ModelCall { source, .. } => source.status(),
            _ => None,
        }
    }
}
