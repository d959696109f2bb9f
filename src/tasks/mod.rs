// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Per-input jobs: transcription and marketing reports

pub mod manuscript;
pub mod marketing;
pub mod transcribe;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::model::{ModelBackend, ModelRequest, TokenUsage};
use crate::progress::ProgressEvent;
use crate::retry::{generate_with_retry, Generation, RetryPolicy};
use crate::{Result, ScriptoriumError};

/// What a task produced for one input
#[derive(Debug, Clone)]
pub struct TaskOutput {
    /// File written
    pub output_path: PathBuf,
    /// Model calls made
    pub calls: usize,
    /// Calls that failed but did not abort the input
    pub failed_calls: usize,
    /// Tokens consumed
    pub usage: TokenUsage,
}

/// A tool that turns one input file into one output file
#[async_trait]
pub trait Task: Send + Sync {
    /// Name of this task
    fn name(&self) -> &'static str;

    /// File extensions this task accepts
    fn supported_extensions(&self) -> &[&str];

    /// Check if this task can handle a file
    fn can_handle(&self, path: &Path) -> bool {
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            self.supported_extensions().iter().any(|e| e.eq_ignore_ascii_case(ext))
        } else {
            false
        }
    }

    /// Model calls made per input
    fn calls_per_input(&self) -> usize {
        1
    }

    /// Output file name for an input (sanitized later)
    fn output_file_name(&self, input: &Path) -> String;

    /// Process one input and write `output`
    async fn run(&self, input: &Path, output: &Path, ctx: &RunContext) -> Result<TaskOutput>;
}

/// Run blocking document work off the runtime; a panic in `f` becomes a
/// `Worker` error for that input.
pub async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ScriptoriumError::Worker(e.to_string()))?
}

/// Everything a task needs from the run it belongs to
pub struct RunContext {
    backend: Arc<dyn ModelBackend>,
    model: String,
    retry: RetryPolicy,
    cancel: watch::Receiver<bool>,
    events: mpsc::UnboundedSender<ProgressEvent>,
    calls_done: AtomicUsize,
    total_calls: usize,
}

impl RunContext {
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        model: String,
        retry: RetryPolicy,
        cancel: watch::Receiver<bool>,
        events: mpsc::UnboundedSender<ProgressEvent>,
        total_calls: usize,
    ) -> Self {
        Self {
            backend,
            model,
            retry,
            cancel,
            events,
            calls_done: AtomicUsize::new(0),
            total_calls,
        }
    }

    /// Model every call in this run goes to
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Send a progress event; a closed receiver is not an error
    pub fn emit(&self, event: ProgressEvent) {
        let _ = self.events.send(event);
    }

    /// Count calls that will not be made (skipped or failed inputs)
    pub fn skip_calls(&self, count: usize) {
        let done = self.calls_done.fetch_add(count, Ordering::SeqCst) + count;
        self.emit(ProgressEvent::CallsAdvanced {
            current: done.min(self.total_calls),
            total: self.total_calls,
        });
    }

    /// One model call with retries, reported as progress
    pub async fn call_model(&self, request: &ModelRequest, detail: &str) -> Result<Generation> {
        let current = self.calls_done.fetch_add(1, Ordering::SeqCst) + 1;
        self.emit(ProgressEvent::CallStarted {
            current,
            total: self.total_calls,
            detail: detail.to_string(),
        });

        let events = self.events.clone();
        generate_with_retry(self.backend.as_ref(), request, &self.retry, move |notice| {
            let _ = events.send(ProgressEvent::CallRetrying(notice.clone()));
        })
        .await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::retry::tests::fast_policy;

    /// Context over `backend` whose events are collected by the caller
    pub(crate) fn context(
        backend: Arc<dyn ModelBackend>,
        total_calls: usize,
    ) -> (RunContext, mpsc::UnboundedReceiver<ProgressEvent>, watch::Sender<bool>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let ctx = RunContext::new(
            backend,
            "gemini-2.5-flash".to_string(),
            fast_policy(),
            cancel_rx,
            tx,
            total_calls,
        );
        (ctx, rx, cancel_tx)
    }

    #[tokio::test]
    async fn test_blocking_panic_becomes_worker_error() {
        let err = run_blocking(|| -> Result<()> { panic!("malformed xref table") })
            .await
            .unwrap_err();
        assert!(matches!(err, ScriptoriumError::Worker(_)));

        assert_eq!(run_blocking(|| Ok(7)).await.unwrap(), 7);
    }
}
