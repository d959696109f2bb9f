// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Scriptorium: batch OCR and book-marketing reports
//!
//! Sends images, PDFs and manuscripts to the Gemini API one file at a time
//! and writes the answers as Markdown next to a JSONL run ledger.

pub mod config;
pub mod error;
pub mod gemini;
pub mod history;
pub mod inputs;
pub mod model;
pub mod progress;
pub mod report;
pub mod retry;
pub mod runner;
pub mod tasks;
pub mod validation;

pub use config::AppConfig;
pub use error::{Result, ScriptoriumError};
