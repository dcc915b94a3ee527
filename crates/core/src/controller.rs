//! User-facing conversion controller.
//!
//! The controller is what a GUI binds to. It exposes one action,
//! [`Controller::start`], and four observable fields: `in_progress`,
//! `dialog_visible`, `dialog_title` and `dialog_text`. Each field is its own
//! `tokio::sync::watch` channel, so a view bound to one field is woken only
//! when that field changes.
//!
//! State machine:
//!
//! ```text
//! Idle --start--> Busy --outcome--> Idle
//! ```
//!
//! A `start` while Busy is rejected with [`ConversionError::Busy`]. The
//! conversion runs on tokio's blocking pool; the worker publishes the
//! outcome through the watch channels directly, which are safe to read
//! from any thread.

use crate::config::{ConversionOutcome, ConversionRequest, OutputMode};
use crate::error::{ConversionError, Result};
use crate::pdf_renderer::panic_message;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Dialog title after a successful conversion.
pub const SUCCESS_TITLE: &str = "Conversion complete!";

/// Dialog text after a successful conversion.
pub const SUCCESS_TEXT: &str = "The conversion completed successfully.\nThe output file(s) are in the same folder as the original PDF.";

/// Dialog title after a failed conversion.
pub const FAILURE_TITLE: &str = "Failed to convert PDF!";

/// Something that can run one conversion to completion.
///
/// Implemented by [`crate::Converter`]; tests substitute scripted backends.
pub trait ConversionBackend: Send + Sync + 'static {
    fn convert(&self, request: &ConversionRequest) -> ConversionOutcome;
}

/// Title and text shown for an outcome.
pub fn dialog_content(outcome: &ConversionOutcome) -> (&'static str, String) {
    match outcome {
        ConversionOutcome::Success { .. } => (SUCCESS_TITLE, SUCCESS_TEXT.to_string()),
        ConversionOutcome::Failure { reason, .. } => (
            FAILURE_TITLE,
            format!("The conversion failed: {}", reason.message()),
        ),
    }
}

/// Point-in-time copy of the four observable fields.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ControllerSnapshot {
    pub in_progress: bool,
    pub dialog_visible: bool,
    pub dialog_title: String,
    pub dialog_text: String,
}

/// Observable controller fields, one watch channel each.
#[derive(Debug)]
struct ControllerState {
    in_progress: watch::Sender<bool>,
    dialog_visible: watch::Sender<bool>,
    dialog_title: watch::Sender<String>,
    dialog_text: watch::Sender<String>,
}

impl ControllerState {
    fn new() -> Self {
        Self {
            in_progress: watch::channel(false).0,
            dialog_visible: watch::channel(false).0,
            dialog_title: watch::channel(String::new()).0,
            dialog_text: watch::channel(String::new()).0,
        }
    }

    /// Idle -> Busy. Returns false, changing nothing, when already Busy.
    fn try_begin(&self) -> bool {
        self.in_progress.send_if_modified(|busy| {
            if *busy {
                false
            } else {
                *busy = true;
                true
            }
        })
    }

    /// Busy -> Idle. The dialog is visible before `in_progress` clears.
    fn complete(&self, outcome: &ConversionOutcome) {
        let (title, text) = dialog_content(outcome);
        publish(&self.dialog_title, title.to_string());
        publish(&self.dialog_text, text);
        publish(&self.dialog_visible, true);
        publish(&self.in_progress, false);
    }

    fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            in_progress: *self.in_progress.borrow(),
            dialog_visible: *self.dialog_visible.borrow(),
            dialog_title: self.dialog_title.borrow().clone(),
            dialog_text: self.dialog_text.borrow().clone(),
        }
    }
}

/// Completes the run it was created for exactly once.
///
/// Moved into the worker closure. If the runtime drops the closure without
/// running it (for instance after shutdown), the drop reports a cancelled
/// conversion so the controller does not stay Busy.
struct Completion {
    state: Option<Arc<ControllerState>>,
}

impl Completion {
    fn new(state: Arc<ControllerState>) -> Self {
        Self { state: Some(state) }
    }

    fn finish(mut self, outcome: &ConversionOutcome) {
        if let Some(state) = self.state.take() {
            state.complete(outcome);
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            warn!("Conversion dropped before it ran");
            state.complete(&ConversionError::Cancelled.into());
        }
    }
}

/// Store `value`, waking receivers only if it differs from the current one.
fn publish<T: PartialEq>(sender: &watch::Sender<T>, value: T) {
    sender.send_if_modified(|current| {
        if *current == value {
            false
        } else {
            *current = value;
            true
        }
    });
}

/// Drives conversions on behalf of a GUI and exposes their progress.
pub struct Controller {
    backend: Arc<dyn ConversionBackend>,
    state: Arc<ControllerState>,
    runtime: Handle,
}

impl Controller {
    /// Create a controller dispatching work onto `runtime`'s blocking pool.
    pub fn new(backend: impl ConversionBackend, runtime: Handle) -> Self {
        Self::from_shared(Arc::new(backend), runtime)
    }

    /// Create a controller around an already shared backend.
    pub fn from_shared(backend: Arc<dyn ConversionBackend>, runtime: Handle) -> Self {
        Self {
            backend,
            state: Arc::new(ControllerState::new()),
            runtime,
        }
    }

    /// Start converting `input` (a path or `file://` URI) in the background.
    ///
    /// Returns as soon as `in_progress` is set. The handle resolves to the
    /// outcome after the dialog fields have been published. If `runtime` is
    /// shutting down the work never runs: the controller reports a failed
    /// conversion right away and the handle resolves to a cancelled error.
    pub fn start(
        &self,
        input: impl AsRef<str>,
        mode: OutputMode,
    ) -> Result<JoinHandle<ConversionOutcome>> {
        self.start_request(ConversionRequest::new(input, mode))
    }

    /// Start a prepared request in the background.
    pub fn start_request(&self, request: ConversionRequest) -> Result<JoinHandle<ConversionOutcome>> {
        if !self.state.try_begin() {
            warn!(
                "Rejected conversion of {:?}: another conversion is in progress",
                request.input_path
            );
            return Err(ConversionError::Busy);
        }
        publish(&self.state.dialog_visible, false);

        info!("Starting conversion of {:?}", request.input_path);

        let backend = Arc::clone(&self.backend);
        let completion = Completion::new(Arc::clone(&self.state));

        Ok(self.runtime.spawn_blocking(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| backend.convert(&request)))
                .unwrap_or_else(|payload| {
                    ConversionError::WorkerPanicked(panic_message(payload.as_ref())).into()
                });

            completion.finish(&outcome);
            outcome
        }))
    }

    /// Hide the completion dialog.
    pub fn dismiss_dialog(&self) {
        publish(&self.state.dialog_visible, false);
    }

    pub fn in_progress(&self) -> bool {
        *self.state.in_progress.borrow()
    }

    pub fn dialog_visible(&self) -> bool {
        *self.state.dialog_visible.borrow()
    }

    pub fn dialog_title(&self) -> String {
        self.state.dialog_title.borrow().clone()
    }

    pub fn dialog_text(&self) -> String {
        self.state.dialog_text.borrow().clone()
    }

    /// All four fields at once.
    pub fn snapshot(&self) -> ControllerSnapshot {
        self.state.snapshot()
    }

    pub fn subscribe_in_progress(&self) -> watch::Receiver<bool> {
        self.state.in_progress.subscribe()
    }

    pub fn subscribe_dialog_visible(&self) -> watch::Receiver<bool> {
        self.state.dialog_visible.subscribe()
    }

    pub fn subscribe_dialog_title(&self) -> watch::Receiver<String> {
        self.state.dialog_title.subscribe()
    }

    pub fn subscribe_dialog_text(&self) -> watch::Receiver<String> {
        self.state.dialog_text.subscribe()
    }
}
