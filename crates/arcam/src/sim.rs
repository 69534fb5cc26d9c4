//! In-process stand-ins for the SDK, GPU, OS permission dialog and view layer
//!
//! Used by the `arcam simulate` command and by tests. Every native call is
//! counted so callers can assert on exactly what reached the "SDK".

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use arcamconf::{CameraConfig, Credentials, InferenceFeature, SessionConfig};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::capability::{Capability, CapabilityOutcome, PermissionPrompter, PermissionResponder};
use crate::error::{BackendError, GpuError};
use crate::lifecycle::ViewHost;
use crate::render::{AspectRatio, GpuContext};
use crate::session::{Frame, SessionBackend, SessionFactory};
use crate::surface::Dimensions;

/// A complete config with placeholder credentials.
pub fn demo_session_config() -> SessionConfig {
    SessionConfig {
        credentials: Credentials {
            api_url: "sim://sdk".to_string(),
            api_key: "sim-api-key".to_string(),
            secret_key: "sim-secret".to_string(),
            auth_key: "sim-auth".to_string(),
        },
        ..Default::default()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-call counters shared by every session a `SimulatedSdk` creates.
#[derive(Debug, Default)]
pub struct NativeCalls {
    pub created: AtomicUsize,
    pub camera_configured: AtomicUsize,
    pub resumed: AtomicUsize,
    pub paused: AtomicUsize,
    pub destroyed: AtomicUsize,
    pub frames_pulled: AtomicUsize,
    /// Frames pulled from a handle that was already destroyed. Must stay 0.
    pub pulls_after_destroy: AtomicUsize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeCallsSnapshot {
    pub created: usize,
    pub camera_configured: usize,
    pub resumed: usize,
    pub paused: usize,
    pub destroyed: usize,
    pub frames_pulled: usize,
    pub pulls_after_destroy: usize,
}

impl NativeCalls {
    pub fn snapshot(&self) -> NativeCallsSnapshot {
        NativeCallsSnapshot {
            created: self.created.load(Ordering::SeqCst),
            camera_configured: self.camera_configured.load(Ordering::SeqCst),
            resumed: self.resumed.load(Ordering::SeqCst),
            paused: self.paused.load(Ordering::SeqCst),
            destroyed: self.destroyed.load(Ordering::SeqCst),
            frames_pulled: self.frames_pulled.load(Ordering::SeqCst),
            pulls_after_destroy: self.pulls_after_destroy.load(Ordering::SeqCst),
        }
    }
}

/// Fake inference SDK.
#[derive(Debug, Default)]
pub struct SimulatedSdk {
    calls: Arc<NativeCalls>,
    reject_with: Option<String>,
    features: Mutex<Vec<InferenceFeature>>,
}

impl SimulatedSdk {
    pub fn new() -> Self {
        Self::default()
    }

    /// An SDK that refuses to create sessions.
    pub fn rejecting(reason: impl Into<String>) -> Self {
        Self {
            reject_with: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Arc<NativeCalls> {
        Arc::clone(&self.calls)
    }

    /// Inference features of the most recent successful create.
    pub fn created_with(&self) -> Vec<InferenceFeature> {
        lock(&self.features).clone()
    }
}

impl SessionFactory for SimulatedSdk {
    fn create(&self, config: &SessionConfig) -> Result<Box<dyn SessionBackend>, BackendError> {
        if let Some(reason) = &self.reject_with {
            return Err(BackendError::new(reason.clone()));
        }
        self.calls.created.fetch_add(1, Ordering::SeqCst);
        *lock(&self.features) = config.inference.features.clone();
        Ok(Box::new(SimulatedSession {
            calls: Arc::clone(&self.calls),
            camera: None,
            next_frame: AtomicU64::new(0),
            running: false,
            destroyed: AtomicBool::new(false),
        }))
    }
}

struct SimulatedSession {
    calls: Arc<NativeCalls>,
    camera: Option<CameraConfig>,
    next_frame: AtomicU64,
    running: bool,
    destroyed: AtomicBool,
}

impl SessionBackend for SimulatedSession {
    fn apply_camera_config(&mut self, camera: &CameraConfig) -> Result<(), BackendError> {
        self.calls.camera_configured.fetch_add(1, Ordering::SeqCst);
        self.camera = Some(camera.clone());
        Ok(())
    }

    fn resume(&mut self) -> Result<(), BackendError> {
        self.calls.resumed.fetch_add(1, Ordering::SeqCst);
        self.running = true;
        Ok(())
    }

    fn pause(&mut self) -> Result<(), BackendError> {
        self.calls.paused.fetch_add(1, Ordering::SeqCst);
        self.running = false;
        Ok(())
    }

    fn destroy(&mut self) {
        self.calls.destroyed.fetch_add(1, Ordering::SeqCst);
        self.running = false;
        self.destroyed.store(true, Ordering::SeqCst);
    }

    fn pull_frame(&self) -> Option<Frame> {
        if self.destroyed.load(Ordering::SeqCst) {
            self.calls.pulls_after_destroy.fetch_add(1, Ordering::SeqCst);
            return None;
        }
        if !self.running {
            return None;
        }
        let camera = self.camera.as_ref()?;
        self.calls.frames_pulled.fetch_add(1, Ordering::SeqCst);
        Some(Frame {
            sequence: self.next_frame.fetch_add(1, Ordering::SeqCst),
            width: camera.width,
            height: camera.height,
        })
    }
}

/// One recorded draw call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawCall {
    pub frame: u64,
    pub ratio: AspectRatio,
    pub dimensions: Dimensions,
}

/// Fake GPU context that records draws.
#[derive(Debug, Default)]
pub struct SimulatedGpu {
    draws: Vec<DrawCall>,
    fail_next: Option<String>,
    pending_error: Option<u32>,
    error_queries: usize,
}

impl SimulatedGpu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next draw return an error.
    pub fn fail_next_draw(&mut self, message: impl Into<String>) {
        self.fail_next = Some(message.into());
    }

    /// Queue an error code for the next `take_error`.
    pub fn inject_error(&mut self, code: u32) {
        self.pending_error = Some(code);
    }

    pub fn draws(&self) -> &[DrawCall] {
        &self.draws
    }

    pub fn draw_count(&self) -> usize {
        self.draws.len()
    }

    /// How many times `take_error` was called.
    pub fn error_queries(&self) -> usize {
        self.error_queries
    }
}

impl GpuContext for SimulatedGpu {
    fn draw(
        &mut self,
        frame: &Frame,
        ratio: AspectRatio,
        dimensions: Dimensions,
    ) -> Result<(), GpuError> {
        if let Some(message) = self.fail_next.take() {
            return Err(GpuError::new(message));
        }
        self.draws.push(DrawCall {
            frame: frame.sequence,
            ratio,
            dimensions,
        });
        Ok(())
    }

    fn take_error(&mut self) -> Option<u32> {
        self.error_queries += 1;
        self.pending_error.take()
    }
}

/// How `ScriptedPrompter` delivers answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerMode {
    /// Answer from inside `prompt`.
    Immediate,
    /// Answer from a separate thread after a delay, like an OS callback.
    Threaded(Duration),
    /// Hold responders until `answer` is called.
    Manual,
    /// The dialog goes away without an answer.
    Dismissed,
}

/// Fake OS permission dialog.
pub struct ScriptedPrompter {
    outcomes: HashMap<Capability, CapabilityOutcome>,
    already_granted: HashSet<Capability>,
    denied_before: HashSet<Capability>,
    mode: AnswerMode,
    prompts: Mutex<Vec<Capability>>,
    held: Mutex<Vec<PermissionResponder>>,
    rationales: AtomicUsize,
}

impl ScriptedPrompter {
    /// Grants everything.
    pub fn granting() -> Self {
        Self {
            outcomes: HashMap::new(),
            already_granted: HashSet::new(),
            denied_before: HashSet::new(),
            mode: AnswerMode::Immediate,
            prompts: Mutex::new(Vec::new()),
            held: Mutex::new(Vec::new()),
            rationales: AtomicUsize::new(0),
        }
    }

    /// Denies `capability`, grants the rest.
    pub fn denying(capability: Capability) -> Self {
        Self::granting().with_outcome(capability, CapabilityOutcome::Denied)
    }

    /// Holds every prompt until `answer` is called.
    pub fn manual() -> Self {
        Self::granting().with_mode(AnswerMode::Manual)
    }

    pub fn with_outcome(mut self, capability: Capability, outcome: CapabilityOutcome) -> Self {
        self.outcomes.insert(capability, outcome);
        self
    }

    pub fn with_mode(mut self, mode: AnswerMode) -> Self {
        self.mode = mode;
        self
    }

    /// The OS already holds a grant; `check` short-circuits the prompt.
    pub fn with_existing_grant(mut self, capability: Capability) -> Self {
        self.already_granted.insert(capability);
        self
    }

    /// The OS recorded an earlier denial; a rationale is shown before prompting.
    pub fn with_previous_denial(mut self, capability: Capability) -> Self {
        self.denied_before.insert(capability);
        self
    }

    /// Answer all held prompts for `capability`. Returns how many were answered.
    pub fn answer(&self, capability: Capability, outcome: CapabilityOutcome) -> usize {
        let mut held = lock(&self.held);
        let (matching, rest): (Vec<_>, Vec<_>) = held
            .drain(..)
            .partition(|responder| responder.capability() == capability);
        *held = rest;
        drop(held);

        let count = matching.len();
        for responder in matching {
            responder.respond(outcome);
        }
        count
    }

    /// OS prompts shown so far.
    pub fn prompt_count(&self) -> usize {
        lock(&self.prompts).len()
    }

    pub fn prompts(&self) -> Vec<Capability> {
        lock(&self.prompts).clone()
    }

    pub fn rationale_count(&self) -> usize {
        self.rationales.load(Ordering::SeqCst)
    }

    fn outcome_for(&self, capability: Capability) -> CapabilityOutcome {
        self.outcomes
            .get(&capability)
            .copied()
            .unwrap_or(CapabilityOutcome::Granted)
    }
}

impl PermissionPrompter for ScriptedPrompter {
    fn check(&self, capability: Capability) -> Option<CapabilityOutcome> {
        self.already_granted
            .contains(&capability)
            .then_some(CapabilityOutcome::Granted)
    }

    fn should_show_rationale(&self, capability: Capability) -> bool {
        self.denied_before.contains(&capability)
    }

    fn show_rationale(&self, capability: Capability) -> Result<(), String> {
        self.rationales.fetch_add(1, Ordering::SeqCst);
        debug!(%capability, "showing permission rationale");
        Ok(())
    }

    fn prompt(&self, capability: Capability, responder: PermissionResponder) {
        lock(&self.prompts).push(capability);
        let outcome = self.outcome_for(capability);

        match self.mode {
            AnswerMode::Immediate => responder.respond(outcome),
            AnswerMode::Threaded(delay) => {
                let spawned = thread::Builder::new()
                    .name("os-permission".to_string())
                    .spawn(move || {
                        thread::sleep(delay);
                        responder.respond(outcome);
                    });
                if let Err(e) = spawned {
                    // The responder went down with the closure and reports a denial.
                    warn!(error = %e, "could not spawn permission thread");
                }
            }
            AnswerMode::Manual => lock(&self.held).push(responder),
            AnswerMode::Dismissed => drop(responder),
        }
    }
}

/// View layer that records what the controller asked of it.
#[derive(Debug, Default)]
pub struct RecordingView {
    surface_requests: AtomicUsize,
    render_requests: AtomicUsize,
    rendering: AtomicBool,
    finished: AtomicBool,
    messages: Mutex<Vec<String>>,
}

impl RecordingView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn surface_requests(&self) -> usize {
        self.surface_requests.load(Ordering::SeqCst)
    }

    pub fn render_requests(&self) -> usize {
        self.render_requests.load(Ordering::SeqCst)
    }

    /// Whether redraw signals are currently being delivered.
    pub fn is_rendering(&self) -> bool {
        self.rendering.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn messages(&self) -> Vec<String> {
        lock(&self.messages).clone()
    }
}

impl ViewHost for RecordingView {
    fn request_surface(&self) {
        self.surface_requests.fetch_add(1, Ordering::SeqCst);
    }

    fn set_rendering(&self, enabled: bool) {
        self.rendering.store(enabled, Ordering::SeqCst);
    }

    fn request_render(&self) {
        self.render_requests.fetch_add(1, Ordering::SeqCst);
    }

    fn notify_user(&self, message: &str) {
        lock(&self.messages).push(message.to_string());
    }

    fn finish(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }
}
