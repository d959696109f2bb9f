// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Marketing report generation from book manuscripts

use async_trait::async_trait;
use chrono::Local;
use std::path::Path;
use tracing::{info, warn};

use super::manuscript::{self, MANUSCRIPT_EXTENSIONS};
use super::{run_blocking, RunContext, Task, TaskOutput};
use crate::model::{ModelRequest, TokenUsage};
use crate::report::{MarketingReport, ReportSection};
use crate::validation::{display_name, redact, sanitize_prompt_text, validate_file_path};
use crate::{Result, ScriptoriumError};

/// Runs every marketing prompt against one manuscript
pub struct MarketingTask {
    preamble: String,
    prompts: Vec<String>,
    max_content_chars: usize,
}

impl MarketingTask {
    /// Blank prompts are dropped
    pub fn new(preamble: &str, prompts: &[String], max_content_chars: usize) -> Self {
        Self {
            preamble: preamble.trim().to_string(),
            prompts: prompts
                .iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
            max_content_chars,
        }
    }

    fn build_prompt(&self, task: &str, content: &str) -> String {
        format!("{}\n\n{}\n\nBOOK CONTENT:\n{}\n", self.preamble, task, content)
    }
}

fn book_name(input: &Path) -> String {
    input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| display_name(input))
}

#[async_trait]
impl Task for MarketingTask {
    fn name(&self) -> &'static str {
        "marketing"
    }

    fn supported_extensions(&self) -> &[&str] {
        MANUSCRIPT_EXTENSIONS
    }

    fn calls_per_input(&self) -> usize {
        self.prompts.len()
    }

    fn output_file_name(&self, input: &Path) -> String {
        format!("{}_Marketing_Report.md", book_name(input))
    }

    async fn run(&self, input: &Path, output: &Path, ctx: &RunContext) -> Result<TaskOutput> {
        validate_file_path(input, None)?;
        let name = display_name(input);

        let path = input.to_path_buf();
        let manuscript = run_blocking(move || manuscript::load(&path)).await?;

        let content = sanitize_prompt_text(&manuscript.text, self.max_content_chars);
        if content.trim().is_empty() {
            return Err(ScriptoriumError::EmptyFile(name));
        }
        let truncated = manuscript.text.chars().count() > self.max_content_chars;
        if truncated {
            warn!("{} is longer than {} characters, sending the beginning only", name, self.max_content_chars);
        }

        let total = self.prompts.len();
        let mut sections = Vec::with_capacity(total);
        let mut usage = TokenUsage::default();
        let mut failed = 0;

        for (idx, task) in self.prompts.iter().enumerate() {
            if ctx.is_cancelled() {
                return Err(ScriptoriumError::Cancelled);
            }

            let number = idx + 1;
            let request = ModelRequest::text(ctx.model(), self.build_prompt(task, &content));
            let detail = format!("{}: prompt {}/{}", name, number, total);

            let (response, call_failed) = match ctx.call_model(&request, &detail).await {
                Ok(generation) => {
                    if let Some(u) = generation.response.usage {
                        usage += u;
                    }
                    info!("  ✓ Completed prompt {}/{}", number, total);
                    (generation.response.text, false)
                }
                Err(e) => {
                    let message = redact(&e.to_string()).into_owned();
                    warn!("  ✗ Failed prompt {}/{}: {}", number, total, message);
                    failed += 1;
                    (message, true)
                }
            };

            sections.push(ReportSection {
                number,
                task: task.clone(),
                response,
                failed: call_failed,
            });
        }

        let report = MarketingReport {
            book: book_name(input),
            generated: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            model: ctx.model().to_string(),
            words: manuscript.word_count(),
            pages: manuscript.page_count,
            truncated,
            content_chars: self.max_content_chars,
            usage: (usage != TokenUsage::default()).then_some(usage),
            failed_prompts: failed,
            sections,
        };

        std::fs::write(output, report.render()?)?;
        info!("✓ Saved report: {}", display_name(output));

        Ok(TaskOutput {
            output_path: output.to_path_buf(),
            calls: total,
            failed_calls: failed,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::tests::ScriptedBackend;
    use crate::tasks::tests::context;
    use std::sync::Arc;

    fn prompts() -> Vec<String> {
        vec!["Define the genre.".to_string(), "  ".to_string(), "Write taglines.".to_string()]
    }

    #[test]
    fn test_blank_prompts_dropped() {
        let task = MarketingTask::new("You are an expert.", &prompts(), 100);
        assert_eq!(task.calls_per_input(), 2);
        assert_eq!(
            task.output_file_name(Path::new("drafts/The Long Night.docx")),
            "The Long Night_Marketing_Report.md"
        );
        assert!(task.can_handle(Path::new("book.PDF")));
        assert!(!task.can_handle(Path::new("cover.png")));
    }

    #[test]
    fn test_prompt_layout() {
        let task = MarketingTask::new("You are an expert.", &prompts(), 100);
        assert_eq!(
            task.build_prompt("Define the genre.", "It was dark."),
            "You are an expert.\n\nDefine the genre.\n\nBOOK CONTENT:\nIt was dark.\n"
        );
    }

    #[tokio::test]
    async fn test_failed_prompt_recorded_in_report() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("night.txt");
        std::fs::write(&input, "It was a dark and stormy night. ".repeat(10)).unwrap();
        let output = dir.path().join("night_Marketing_Report.md");

        let backend = Arc::new(ScriptedBackend::new(vec![
            Err(ScriptoriumError::Api { status: 400, message: "INVALID_ARGUMENT".to_string() }),
            Ok("1. Dark nights ahead".to_string()),
        ]));
        let (ctx, _events, _cancel) = context(backend.clone(), 2);
        let task = MarketingTask::new("You are an expert.", &prompts(), 50);

        let result = task.run(&input, &output, &ctx).await.unwrap();
        assert_eq!(result.calls, 2);
        assert_eq!(result.failed_calls, 1);
        assert_eq!(result.usage.total_tokens, 12);

        let md = std::fs::read_to_string(&output).unwrap();
        assert!(md.contains("**Book:** night"));
        assert!(md.contains("Error calling model after 1 attempt(s): API error (400): INVALID_ARGUMENT"));
        assert!(md.contains("1. Dark nights ahead"));
        assert!(md.contains("(first 50 characters used)"));

        let sent = backend.prompts.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(sent[1].starts_with("You are an expert.\n\nWrite taglines.\n\nBOOK CONTENT:\nIt was a dark"));
        assert!(sent[1].len() < 120);
    }

    #[tokio::test]
    async fn test_cancel_between_prompts_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("night.md");
        std::fs::write(&input, "Storm.").unwrap();
        let output = dir.path().join("night_Marketing_Report.md");

        let backend = Arc::new(ScriptedBackend::always("answer"));
        let (ctx, _events, cancel) = context(backend.clone(), 2);
        cancel.send(true).unwrap();

        let task = MarketingTask::new("You are an expert.", &prompts(), 100);
        let err = task.run(&input, &output, &ctx).await.unwrap_err();
        assert!(matches!(err, ScriptoriumError::Cancelled));
        assert!(!output.exists());
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_manuscript_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("blank.txt");
        std::fs::write(&input, "\u{0}\u{0}   \n").unwrap();

        let backend = Arc::new(ScriptedBackend::always("answer"));
        let (ctx, _events, _cancel) = context(backend, 2);
        let task = MarketingTask::new("You are an expert.", &prompts(), 100);

        let err = task.run(&input, &dir.path().join("out.md"), &ctx).await.unwrap_err();
        assert!(matches!(err, ScriptoriumError::EmptyFile(_)));
    }
}
