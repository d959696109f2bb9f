// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Configuration management for Scriptorium

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::model::validate_model_name;
use crate::retry::RetryPolicy;
use crate::{Result, ScriptoriumError};

/// Smallest and largest accepted per-file size limit, in megabytes
pub const FILE_SIZE_LIMIT_RANGE: std::ops::RangeInclusive<u64> = 1..=500;

/// Main application configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    /// Remote API settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Default model per tool
    #[serde(default)]
    pub models: ModelConfig,

    /// Input limits
    #[serde(default)]
    pub limits: LimitConfig,

    /// Prompt texts
    #[serde(default)]
    pub prompts: PromptConfig,

    /// Output settings
    #[serde(default)]
    pub output: OutputConfig,

    /// Run ledger settings
    #[serde(default)]
    pub history: HistoryConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: u32,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_transcribe_model")]
    pub transcribe: String,
    #[serde(default = "default_marketing_model")]
    pub marketing: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LimitConfig {
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PromptConfig {
    #[serde(default = "default_transcribe_prompt")]
    pub transcribe: String,
    #[serde(default = "default_marketing_preamble")]
    pub marketing_preamble: String,
    #[serde(default = "default_marketing_tasks")]
    pub marketing_tasks: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub directory: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HistoryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_history_path")]
    pub path: PathBuf,
}

// Default value functions
fn default_base_url() -> String { "https://generativelanguage.googleapis.com/v1beta".to_string() }
fn default_timeout() -> u64 { 120 }
fn default_max_attempts() -> u32 { 3 }
fn default_initial_backoff_ms() -> u64 { 1000 }
fn default_backoff_factor() -> u32 { 2 }
fn default_max_backoff_ms() -> u64 { 60_000 }
fn default_transcribe_model() -> String { "gemini-2.5-flash".to_string() }
fn default_marketing_model() -> String { "gemini-2.5-pro".to_string() }
fn default_max_file_size_mb() -> u64 { 100 }
fn default_max_content_chars() -> usize { 100_000 }
fn default_output_dir() -> PathBuf { PathBuf::from("./files") }
fn default_true() -> bool { true }
fn default_history_path() -> PathBuf { PathBuf::from("scriptorium_history.jsonl") }

fn default_transcribe_prompt() -> String {
    "Transcribe this image to Markdown".to_string()
}

fn default_marketing_preamble() -> String {
    "You are a professional book marketing expert. Based on the following book content, \
     please complete this task:"
        .to_string()
}

fn default_marketing_tasks() -> Vec<String> {
    [
        "Based on the book's genre, subgenres and general content, define the primary genre and 3 subgenres, \
         plus a compelling core promise: a single-sentence emotional theme.",
        "Create a detailed target audience profile. Include demographics, reading preferences and \
         3-5 comparable authors or media they already enjoy.",
        "List 10-15 key tropes, story conventions and recognizable plot elements that define the book, \
         with a relevant emoji for each.",
        "Write a single high-concept sentence (under 30 words) capturing the central conflict, \
         primary stakes and genre of the story.",
        "Write a three-sentence synopsis: the inciting incident, the central conflict, \
         then the primary stakes or emotional core.",
        "Write five deep-POV marketing blurbs (200-250 words each), each focused on a different \
         marketing angle of the story.",
        "Analyze the five blurbs and pick the best choice, with a 1-2 sentence rationale \
         for its market positioning and appeal.",
        "Write 10 short, punchy taglines or story hooks (5-10 words each) for social media and advertising.",
        "Develop 10 long-tail backend keywords (search phrases) describing the book's genre, themes and tropes.",
        "Give the 3 best-fit Kindle categories for the book, using the full category path.",
        "Give the 5 most relevant BISAC/Thema codes.",
        "Explain in 1-2 sentences why the chosen categories and codes best reach the target reader.",
        "Suggest 5 subtitle/SEO metadata options and name the single best choice.",
        "Identify 3-5 unique selling points. For each give a short description, the matching reader profile, \
         how to reach that reader, 3-5 comparable titles and one concrete marketing idea.",
        "Outline a platform-specific social media strategy covering content format, tone and goals \
         for Instagram, TikTok and Facebook.",
        "List 3 key things to avoid when promoting the book.",
        "Give 5 post ideas for each format (static images, carousels, short videos), \
         naming the platform and the visual or on-screen text for each.",
        "Write five complete Facebook/Meta ads ready for A/B testing: focus, matching blurb number, \
         headline under 10 words, and 5-8 sentences of copy with a call to action.",
        "Curate an excerpt library: 3 short excerpts with use cases, 3 slideshow excerpt kits \
         with an aesthetic note, and 1 long excerpt with a use case.",
        "Give a brief final sensitivity review: name the book's sensitive themes and confirm the marketing \
         approach avoids exploitation or sensationalism.",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_factor: default_backoff_factor(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            transcribe: default_transcribe_model(),
            marketing: default_marketing_model(),
        }
    }
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: default_max_file_size_mb(),
            max_content_chars: default_max_content_chars(),
        }
    }
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            transcribe: default_transcribe_prompt(),
            marketing_preamble: default_marketing_preamble(),
            marketing_tasks: default_marketing_tasks(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_history_path(),
        }
    }
}

impl ApiConfig {
    /// Retry policy described by this configuration
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_backoff_ms),
            factor: self.backoff_factor,
            max_delay: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = serde_json::from_str(&content)
                .map_err(|e| ScriptoriumError::Config(format!("Failed to parse config: {}", e)))?;
            config.validate()?;
            Ok(config)
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check value ranges that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://") {
            return Err(ScriptoriumError::Config(format!(
                "api.base_url must be an http(s) URL: {}",
                self.api.base_url
            )));
        }
        if self.api.max_attempts == 0 {
            return Err(ScriptoriumError::Config("api.max_attempts must be at least 1".to_string()));
        }
        if self.api.max_backoff_ms < self.api.initial_backoff_ms {
            return Err(ScriptoriumError::Config(
                "api.max_backoff_ms must not be below api.initial_backoff_ms".to_string(),
            ));
        }
        if self.api.backoff_factor == 0 {
            return Err(ScriptoriumError::Config("api.backoff_factor must be at least 1".to_string()));
        }
        check_file_size_limit(self.limits.max_file_size_mb)?;
        if self.limits.max_content_chars == 0 {
            return Err(ScriptoriumError::Config(
                "limits.max_content_chars must be positive".to_string(),
            ));
        }
        validate_model_name(&self.models.transcribe)?;
        validate_model_name(&self.models.marketing)?;
        if self.prompts.transcribe.trim().is_empty() {
            return Err(ScriptoriumError::Config("prompts.transcribe is empty".to_string()));
        }
        if self.prompts.marketing_tasks.iter().all(|t| t.trim().is_empty()) {
            return Err(ScriptoriumError::Config(
                "prompts.marketing_tasks has no usable prompt".to_string(),
            ));
        }
        Ok(())
    }
}

/// Reject size limits outside [`FILE_SIZE_LIMIT_RANGE`]
pub fn check_file_size_limit(mb: u64) -> Result<()> {
    if FILE_SIZE_LIMIT_RANGE.contains(&mb) {
        Ok(())
    } else {
        Err(ScriptoriumError::Config(format!(
            "max file size must be between {} and {} MB, got {}",
            FILE_SIZE_LIMIT_RANGE.start(),
            FILE_SIZE_LIMIT_RANGE.end(),
            mb
        )))
    }
}
