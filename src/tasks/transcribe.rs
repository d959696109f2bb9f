// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Image/PDF transcription to Markdown

use async_trait::async_trait;
use image::ImageFormat;
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, info};

use super::{RunContext, Task, TaskOutput};
use crate::model::{Attachment, ModelRequest, TokenUsage};
use crate::validation::{check_file_size, display_name, mime_type_for, validate_file_path};
use crate::{Result, ScriptoriumError};

/// Sends each file with a transcription prompt and saves the reply
pub struct TranscribeTask {
    prompt: String,
    max_file_size_mb: u64,
}

impl TranscribeTask {
    pub fn new(prompt: &str, max_file_size_mb: u64) -> Self {
        Self {
            prompt: prompt.to_string(),
            max_file_size_mb,
        }
    }
}

fn image_mime(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Png => Some("image/png"),
        ImageFormat::Jpeg => Some("image/jpeg"),
        ImageFormat::WebP => Some("image/webp"),
        ImageFormat::Gif => Some("image/gif"),
        _ => None,
    }
}

/// Read a file as an attachment, trusting its content over its extension
pub fn load_attachment(path: &Path, max_file_size_mb: u64) -> Result<Attachment> {
    let declared = mime_type_for(path)?;
    check_file_size(path, max_file_size_mb)?;
    let data = std::fs::read(path)?;
    let name = display_name(path);

    if declared == "application/pdf" {
        if !data.starts_with(b"%PDF-") {
            return Err(ScriptoriumError::Pdf(format!("{} has no PDF header", name)));
        }
        return Ok(Attachment { mime_type: declared.to_string(), data });
    }

    let format = image::guess_format(&data)?;
    let mime_type = image_mime(format).ok_or_else(|| {
        ScriptoriumError::UnsupportedFileType(format!("{} contains {:?} data", name, format))
    })?;
    if mime_type != declared {
        debug!("{} is {} despite its extension", name, mime_type);
    }

    match image::ImageReader::new(Cursor::new(&data))
        .with_guessed_format()
        .map_err(ScriptoriumError::from)
        .and_then(|r| r.into_dimensions().map_err(ScriptoriumError::from))
    {
        Ok((w, h)) => debug!("{}: {}x{} {}", name, w, h, mime_type),
        Err(e) => debug!("{}: could not read dimensions: {}", name, e),
    }

    Ok(Attachment { mime_type: mime_type.to_string(), data })
}

#[async_trait]
impl Task for TranscribeTask {
    fn name(&self) -> &'static str {
        "transcribe"
    }

    fn supported_extensions(&self) -> &[&str] {
        &["png", "jpg", "jpeg", "pdf", "webp", "gif"]
    }

    fn output_file_name(&self, input: &Path) -> String {
        format!("{}.txt", display_name(input))
    }

    async fn run(&self, input: &Path, output: &Path, ctx: &RunContext) -> Result<TaskOutput> {
        validate_file_path(input, None)?;
        let name = display_name(input);

        let attachment = load_attachment(input, self.max_file_size_mb)?;
        let request = ModelRequest::text(ctx.model(), self.prompt.as_str()).with_attachment(attachment);

        let generation = ctx.call_model(&request, &name).await?;
        std::fs::write(output, &generation.response.text)?;
        info!("Saved transcription of {} after {} attempt(s)", name, generation.attempts);

        Ok(TaskOutput {
            output_path: output.to_path_buf(),
            calls: 1,
            failed_calls: 0,
            usage: generation.response.usage.unwrap_or(TokenUsage::default()),
        })
    }
}
