// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Background worker that walks the inputs of one run

use chrono::{DateTime, Local};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::history::{create_entry, EntryStatus, History};
use crate::model::{ModelBackend, TokenUsage};
use crate::progress::ProgressEvent;
use crate::retry::RetryPolicy;
use crate::tasks::{RunContext, Task};
use crate::validation::{display_name, redact, resolve_output_file};
use crate::{Result, ScriptoriumError};

/// Failures listed in the summary before the rest is collapsed
pub const SUMMARY_FAILURE_LIMIT: usize = 5;

/// Per-run settings
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub model: String,
    pub retry: RetryPolicy,
    /// Already validated output directory
    pub output_dir: PathBuf,
    pub skip_existing: bool,
    pub history: Option<History>,
}

/// Outcome of a run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub task: &'static str,
    pub total: usize,
    pub succeeded: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub failures: Vec<(String, String)>,
    pub warnings: Vec<(String, String)>,
    pub cancelled: bool,
    pub usage: TokenUsage,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
}

impl RunSummary {
    fn new(task: &'static str, total: usize) -> Self {
        let now = Local::now();
        Self {
            task,
            total,
            succeeded: Vec::new(),
            skipped: Vec::new(),
            failures: Vec::new(),
            warnings: Vec::new(),
            cancelled: false,
            usage: TokenUsage::default(),
            started_at: now,
            finished_at: now,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Human-readable summary shown at the end of a run
    pub fn render(&self, output_dir: &Path) -> String {
        let mut out = String::new();
        let done = self.succeeded.len();

        if self.cancelled {
            let _ = writeln!(out, "Processing cancelled by user after {}/{} files.", done, self.total);
        } else {
            let _ = writeln!(out, "Successfully processed {}/{} files.", done, self.total);
        }
        if !self.skipped.is_empty() {
            let _ = writeln!(out, "Skipped {} file(s) with existing output.", self.skipped.len());
        }

        let _ = writeln!(out, "\nOutput folder:\n{}", output_dir.display());

        if self.usage.total_tokens > 0 {
            let _ = writeln!(
                out,
                "\nTokens used: {} ({} prompt, {} output)",
                self.usage.total_tokens, self.usage.prompt_tokens, self.usage.output_tokens
            );
        }
        let elapsed = self.finished_at - self.started_at;
        let _ = writeln!(out, "Elapsed: {}s", elapsed.num_seconds());

        write_list(&mut out, "Failed", &self.failures);
        write_list(&mut out, "Completed with errors", &self.warnings);
        out
    }
}

fn write_list(out: &mut String, title: &str, items: &[(String, String)]) {
    if items.is_empty() {
        return;
    }
    let _ = writeln!(out, "\n{} ({}):", title, items.len());
    for (name, err) in items.iter().take(SUMMARY_FAILURE_LIMIT) {
        let _ = writeln!(out, "• {}: {}", name, err);
    }
    if items.len() > SUMMARY_FAILURE_LIMIT {
        let _ = writeln!(out, "...and {} more", items.len() - SUMMARY_FAILURE_LIMIT);
    }
}

/// A running worker and its event stream
pub struct RunHandle {
    events: mpsc::UnboundedReceiver<ProgressEvent>,
    join: JoinHandle<RunSummary>,
}

impl RunHandle {
    /// Forward events to `on_event` until the worker ends, then return its summary
    pub async fn wait<F>(mut self, mut on_event: F) -> Result<RunSummary>
    where
        F: FnMut(&ProgressEvent),
    {
        while let Some(event) = self.events.recv().await {
            on_event(&event);
        }
        self.join
            .await
            .map_err(|e| ScriptoriumError::Worker(e.to_string()))
    }
}

/// Spawn the worker for one run
pub fn start(
    task: Arc<dyn Task>,
    inputs: Vec<PathBuf>,
    backend: Arc<dyn ModelBackend>,
    settings: RunSettings,
    cancel: watch::Receiver<bool>,
) -> RunHandle {
    debug!("Starting worker on {} backend", backend.name());
    let (tx, rx) = mpsc::unbounded_channel();
    let total_calls = inputs.len() * task.calls_per_input();

    let join = tokio::spawn(async move {
        let ctx = RunContext::new(
            backend,
            settings.model.clone(),
            settings.retry.clone(),
            cancel,
            tx,
            total_calls,
        );
        process_inputs(task.as_ref(), &inputs, &ctx, &settings).await
    });

    RunHandle { events: rx, join }
}

/// Insert `_n` before the first extension: `page1.png.txt` -> `page1_2.png.txt`
fn numbered_name(file_name: &str, n: usize) -> String {
    match file_name.char_indices().skip(1).find(|&(_, c)| c == '.') {
        Some((pos, _)) => format!("{}_{}{}", &file_name[..pos], n, &file_name[pos..]),
        None => format!("{}_{}", file_name, n),
    }
}

/// Output path for `file_name` not yet claimed by an earlier input of this run
fn claim_output(claimed: &mut HashSet<PathBuf>, dir: &Path, file_name: &str) -> Result<PathBuf> {
    let mut n = 1;
    loop {
        let candidate = if n == 1 {
            file_name.to_string()
        } else {
            numbered_name(file_name, n)
        };
        let path = resolve_output_file(dir, &candidate)?;
        if claimed.insert(path.clone()) {
            if n > 1 {
                warn!("Output name {} already used in this run, writing {}", file_name, display_name(&path));
            }
            return Ok(path);
        }
        n += 1;
    }
}

fn record(settings: &RunSettings, entry: crate::history::HistoryEntry) {
    if let Some(history) = &settings.history {
        if let Err(e) = history.append(&entry) {
            warn!("Failed to write run ledger {:?}: {}", history.path(), e);
        }
    }
}

async fn process_inputs(
    task: &dyn Task,
    inputs: &[PathBuf],
    ctx: &RunContext,
    settings: &RunSettings,
) -> RunSummary {
    let total = inputs.len();
    let per_input = task.calls_per_input();
    let mut summary = RunSummary::new(task.name(), total);
    let mut claimed = HashSet::new();

    ctx.emit(ProgressEvent::RunStarted {
        inputs: total,
        calls: total * per_input,
    });
    info!("Starting {} of {} file(s) with model: {}", task.name(), total, settings.model);

    for (idx, input) in inputs.iter().enumerate() {
        if ctx.is_cancelled() {
            summary.cancelled = true;
            break;
        }

        let name = display_name(input);
        ctx.emit(ProgressEvent::InputStarted {
            index: idx + 1,
            total,
            name: name.clone(),
        });
        info!("Processing ({}/{}): {}", idx + 1, total, name);

        let output = match claim_output(&mut claimed, &settings.output_dir, &task.output_file_name(input)) {
            Ok(p) => p,
            Err(e) => {
                fail(&mut summary, ctx, settings, task, input, &name, &e, per_input);
                continue;
            }
        };

        if settings.skip_existing && output.exists() {
            info!("Output exists, skipping: {}", name);
            ctx.skip_calls(per_input);
            ctx.emit(ProgressEvent::InputSkipped {
                name,
                output: output.clone(),
            });
            record(
                settings,
                create_entry(task.name(), &settings.model, input, Some(output.clone()), EntryStatus::Skipped),
            );
            summary.skipped.push(output);
            continue;
        }

        match task.run(input, &output, ctx).await {
            Ok(result) => {
                summary.usage += result.usage;
                let status = if result.failed_calls > 0 {
                    summary.warnings.push((
                        name.clone(),
                        format!("{} of {} model call(s) failed", result.failed_calls, result.calls),
                    ));
                    EntryStatus::CompletedWithErrors
                } else {
                    EntryStatus::Completed
                };

                let mut entry =
                    create_entry(task.name(), &settings.model, input, Some(result.output_path.clone()), status);
                entry.usage = Some(result.usage);
                record(settings, entry);

                ctx.emit(ProgressEvent::InputFinished {
                    name,
                    output: result.output_path.clone(),
                });
                summary.succeeded.push(result.output_path);
            }
            Err(ScriptoriumError::Cancelled) => {
                summary.cancelled = true;
                break;
            }
            Err(e) => fail(&mut summary, ctx, settings, task, input, &name, &e, per_input),
        }
    }

    if summary.cancelled {
        info!("Processing cancelled by user.");
        ctx.emit(ProgressEvent::Cancelled);
    } else {
        info!(
            "Processing complete: {}/{} files processed",
            summary.succeeded.len(),
            total
        );
        if !summary.failures.is_empty() {
            warn!("Failed: {} file(s)", summary.failures.len());
        }
    }

    summary.finished_at = Local::now();
    summary
}

#[allow(clippy::too_many_arguments)]
fn fail(
    summary: &mut RunSummary,
    ctx: &RunContext,
    settings: &RunSettings,
    task: &dyn Task,
    input: &Path,
    name: &str,
    err: &ScriptoriumError,
    per_input: usize,
) {
    let message = redact(&err.to_string()).into_owned();
    warn!("  ✗ Error: {} - {}", name, message);

    // Calls this input never made still count towards the bar
    let made = match err {
        ScriptoriumError::ModelCall { .. } => 1,
        _ => 0,
    };
    ctx.skip_calls(per_input.saturating_sub(made));

    let mut entry = create_entry(task.name(), &settings.model, input, None, EntryStatus::Failed);
    entry.error = Some(message.clone());
    record(settings, entry);

    ctx.emit(ProgressEvent::InputFailed {
        name: name.to_string(),
        error: message.clone(),
    });
    summary.failures.push((name.to_string(), message));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::tests::{fast_policy, ScriptedBackend};
    use crate::tasks::marketing::MarketingTask;
    use crate::tasks::transcribe::tests::png_bytes;
    use crate::tasks::transcribe::TranscribeTask;
    use crate::validation::validate_output_directory;

    struct Fixture {
        _dir: tempfile::TempDir,
        inputs: Vec<PathBuf>,
        settings: RunSettings,
    }

    fn fixture(files: &[(&str, Vec<u8>)], skip_existing: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let inputs = files
            .iter()
            .map(|(name, bytes)| {
                let p = dir.path().join(name);
                std::fs::create_dir_all(p.parent().unwrap()).unwrap();
                std::fs::write(&p, bytes).unwrap();
                p
            })
            .collect();
        let output_dir = validate_output_directory(&dir.path().join("files")).unwrap();
        let settings = RunSettings {
            model: "gemini-2.5-flash".to_string(),
            retry: fast_policy(),
            output_dir,
            skip_existing,
            history: Some(History::new(dir.path().join("history.jsonl"))),
        };
        Fixture { _dir: dir, inputs, settings }
    }

    /// Backend that asks for cancellation while answering its first call
    struct CancellingBackend {
        inner: ScriptedBackend,
        cancel: watch::Sender<bool>,
    }

    #[async_trait::async_trait]
    impl ModelBackend for CancellingBackend {
        fn name(&self) -> &'static str {
            "cancelling"
        }

        async fn generate(&self, request: &crate::model::ModelRequest) -> Result<crate::model::ModelResponse> {
            let _ = self.cancel.send(true);
            self.inner.generate(request).await
        }
    }

    async fn run_with(
        fx: &Fixture,
        task: Arc<dyn Task>,
        backend: Arc<dyn ModelBackend>,
        cancel: watch::Receiver<bool>,
    ) -> (RunSummary, Vec<ProgressEvent>) {
        let handle = start(task, fx.inputs.clone(), backend, fx.settings.clone(), cancel);
        let mut events = Vec::new();
        let summary = tokio_test::assert_ok!(handle.wait(|e| events.push(e.clone())).await);
        (summary, events)
    }

    async fn run(
        fx: &Fixture,
        task: Arc<dyn Task>,
        backend: Arc<dyn ModelBackend>,
    ) -> (RunSummary, Vec<ProgressEvent>) {
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        run_with(fx, task, backend, cancel_rx).await
    }

    #[tokio::test]
    async fn test_transcribe_run_with_one_failure() {
        let fx = fixture(
            &[("a.png", png_bytes()), ("b.png", b"garbage".to_vec()), ("c.png", png_bytes())],
            false,
        );
        let backend = Arc::new(ScriptedBackend::always("text"));
        let task = Arc::new(TranscribeTask::new("Transcribe", 1));

        let (summary, events) = run(&fx, task, backend.clone()).await;

        assert_eq!(summary.succeeded.len(), 2);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].0, "b.png");
        assert!(!summary.cancelled);
        assert_eq!(backend.call_count(), 2);
        assert_eq!(summary.usage.total_tokens, 24);
        assert!(fx.settings.output_dir.join("a.png.txt").exists());
        assert!(!fx.settings.output_dir.join("b.png.txt").exists());
        assert!(matches!(events[0], ProgressEvent::RunStarted { inputs: 3, calls: 3 }));

        let ledger = fx.settings.history.as_ref().unwrap().read_all().unwrap();
        assert_eq!(ledger.len(), 3);
        assert_eq!(ledger[1].status, EntryStatus::Failed);

        let text = summary.render(&fx.settings.output_dir);
        assert!(text.starts_with("Successfully processed 2/3 files."));
        assert!(text.contains("Failed (1):\n• b.png: "));
    }

    #[tokio::test]
    async fn test_cancel_between_inputs() {
        let fx = fixture(&[("a.png", png_bytes()), ("b.png", png_bytes())], false);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let backend = Arc::new(CancellingBackend {
            inner: ScriptedBackend::always("text"),
            cancel: cancel_tx,
        });
        let task = Arc::new(TranscribeTask::new("Transcribe", 1));

        let (summary, events) = run_with(&fx, task, backend.clone(), cancel_rx).await;

        assert!(summary.cancelled);
        assert_eq!(summary.succeeded.len(), 1);
        assert_eq!(backend.inner.call_count(), 1);
        assert!(matches!(events.last(), Some(ProgressEvent::Cancelled)));
        assert!(summary
            .render(&fx.settings.output_dir)
            .starts_with("Processing cancelled by user after 1/2 files."));
    }

    #[tokio::test]
    async fn test_skip_existing_outputs() {
        let fx = fixture(&[("a.png", png_bytes()), ("b.png", png_bytes())], true);
        std::fs::write(fx.settings.output_dir.join("a.png.txt"), "old").unwrap();
        let backend = Arc::new(ScriptedBackend::always("new"));
        let task = Arc::new(TranscribeTask::new("Transcribe", 1));

        let (summary, _) = run(&fx, task, backend.clone()).await;

        assert_eq!(summary.skipped.len(), 1);
        assert_eq!(summary.succeeded.len(), 1);
        assert_eq!(backend.call_count(), 1);
        assert_eq!(std::fs::read_to_string(fx.settings.output_dir.join("a.png.txt")).unwrap(), "old");
    }

    #[tokio::test]
    async fn test_marketing_partial_failure_is_a_warning() {
        let fx = fixture(&[("book.txt", b"Once upon a time.".to_vec())], false);
        let backend = Arc::new(ScriptedBackend::new(vec![
            Ok("Fantasy".to_string()),
            Err(ScriptoriumError::Api { status: 403, message: "PERMISSION_DENIED".to_string() }),
        ]));
        let prompts = vec!["Genre?".to_string(), "Taglines?".to_string()];
        let task = Arc::new(MarketingTask::new("You are an expert.", &prompts, 1000));

        let (summary, events) = run(&fx, task, backend).await;

        assert!(summary.is_success());
        assert_eq!(summary.warnings, vec![("book.txt".to_string(), "1 of 2 model call(s) failed".to_string())]);
        assert!(fx.settings.output_dir.join("book_Marketing_Report.md").exists());
        let calls: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::CallStarted { current, .. } => Some(*current),
                _ => None,
            })
            .collect();
        assert_eq!(calls, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_clashing_output_names_get_numbered() {
        let fx = fixture(
            &[
                ("ch1/page1.png", png_bytes()),
                ("ch2/page1.png", png_bytes()),
                ("a b.png", png_bytes()),
                ("a_b.png", png_bytes()),
            ],
            false,
        );
        let backend = Arc::new(ScriptedBackend::new(vec![
            Ok("CH1 TEXT".to_string()),
            Ok("CH2 TEXT".to_string()),
            Ok("SPACED".to_string()),
            Ok("UNDERSCORED".to_string()),
        ]));
        let task = Arc::new(TranscribeTask::new("Transcribe", 1));

        let (summary, _) = run(&fx, task, backend).await;

        assert_eq!(summary.succeeded.len(), 4);
        let out = &fx.settings.output_dir;
        let read = |name: &str| std::fs::read_to_string(out.join(name)).unwrap();
        assert_eq!(read("page1.png.txt"), "CH1 TEXT");
        assert_eq!(read("page1_2.png.txt"), "CH2 TEXT");
        assert_eq!(read("a_b.png.txt"), "SPACED");
        assert_eq!(read("a_b_2.png.txt"), "UNDERSCORED");
    }

    #[test]
    fn test_numbered_name() {
        assert_eq!(numbered_name("page1.png.txt", 2), "page1_2.png.txt");
        assert_eq!(numbered_name("book_Marketing_Report.md", 3), "book_Marketing_Report_3.md");
        assert_eq!(numbered_name(".hidden", 2), ".hidden_2");
        assert_eq!(numbered_name("README", 2), "README_2");
    }

    #[test]
    fn test_summary_truncates_failure_list() {
        let mut summary = RunSummary::new("transcribe", 8);
        summary.failures = (1..=7).map(|i| (format!("f{}.png", i), "boom".to_string())).collect();
        let text = summary.render(Path::new("/out"));
        assert!(text.contains("Failed (7):"));
        assert!(text.contains("• f5.png: boom"));
        assert!(!text.contains("f6.png"));
        assert!(text.contains("...and 2 more"));
    }
}
