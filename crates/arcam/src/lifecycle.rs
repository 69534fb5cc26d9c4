//! Session lifecycle state machine
//!
//! Sequences the capability gate, the session resource and the surface
//! binding in response to host lifecycle events. Runs only on the control
//! context: every method here takes `&mut self` and is called by the
//! [`ControlLoop`](crate::control::ControlLoop) one event at a time.
//!
//! ```text
//! Uninitialized ─start─► AwaitingCapability ─granted─► Initializing ─surface─► Resumed
//!                               │                          │                   ▲   │
//!                            denied                  create error       resumed│   │paused
//!                               ▼                          ▼                   │   ▼
//!                             Failed ◄──────────────────────────────────────── Paused
//!                                                                     destroyed │
//!                                                                               ▼
//!                                                                           Destroyed
//! ```
//!
//! `Failed` and `Destroyed` are terminal. Starting over means building a new
//! controller, which can only get a session once this one's is destroyed.

use std::collections::BTreeSet;
use std::sync::Arc;

use arcamconf::SessionConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::binding::{Binding, SharedSlot};
use crate::capability::{Capability, CapabilityGate, CapabilityOutcome};
use crate::control::ControlEvent;
use crate::error::ControllerError;
use crate::render::{RenderLoop, RenderStats};
use crate::session::{SessionProvider, SessionResource};
use crate::surface::{Dimensions, SurfaceBinding};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    #[default]
    Uninitialized,
    AwaitingCapability,
    Initializing,
    Resumed,
    Paused,
    Destroyed,
    Failed,
}

impl LifecycleState {
    pub fn is_terminal(self) -> bool {
        matches!(self, LifecycleState::Destroyed | LifecycleState::Failed)
    }

    /// States in which a session exists.
    pub fn has_session(self) -> bool {
        matches!(
            self,
            LifecycleState::Initializing | LifecycleState::Resumed | LifecycleState::Paused
        )
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::AwaitingCapability => "awaiting_capability",
            LifecycleState::Initializing => "initializing",
            LifecycleState::Resumed => "resumed",
            LifecycleState::Paused => "paused",
            LifecycleState::Destroyed => "destroyed",
            LifecycleState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outbound calls to the platform view layer.
pub trait ViewHost: Send + Sync {
    /// Create (or re-create) the drawing surface.
    fn request_surface(&self);

    /// Start or stop delivering redraw signals to the render loop.
    fn set_rendering(&self, enabled: bool);

    /// Schedule one redraw.
    fn request_render(&self);

    /// Show a short user-facing message.
    fn notify_user(&self, message: &str);

    /// Close the camera screen after a terminal failure.
    fn finish(&self);
}

/// What the UI layer observes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerStatus {
    pub state: LifecycleState,
    pub ready_to_render: bool,
    pub failure: Option<ControllerError>,
    pub session_id: Option<Uuid>,
    pub surface_generation: u64,
    pub updated_at: DateTime<Utc>,
}

impl ControllerStatus {
    pub fn initial() -> Self {
        Self {
            state: LifecycleState::Uninitialized,
            ready_to_render: false,
            failure: None,
            session_id: None,
            surface_generation: 0,
            updated_at: Utc::now(),
        }
    }

    fn same_as(&self, other: &Self) -> bool {
        self.state == other.state
            && self.ready_to_render == other.ready_to_render
            && self.failure == other.failure
            && self.session_id == other.session_id
            && self.surface_generation == other.surface_generation
    }
}

/// The lifecycle state machine. Owned by the control loop.
pub struct SessionController {
    config: Arc<SessionConfig>,
    provider: SessionProvider,
    gate: CapabilityGate,
    view: Arc<dyn ViewHost>,
    slot: SharedSlot,
    stats: Arc<RenderStats>,
    events: mpsc::UnboundedSender<ControlEvent>,
    status: watch::Sender<ControllerStatus>,

    state: LifecycleState,
    failure: Option<ControllerError>,
    session_id: Option<Uuid>,
    /// Capabilities from the current `start` that have not answered yet.
    awaiting: BTreeSet<Capability>,
    /// Last host signal was resume (true) or pause (false).
    host_foreground: bool,
    /// Surface that showed up before the session existed.
    early_surface: Option<Dimensions>,
    surface_generation: u64,
    surface_requested: bool,
}

impl SessionController {
    pub(crate) fn new(
        config: SessionConfig,
        provider: SessionProvider,
        gate: CapabilityGate,
        view: Arc<dyn ViewHost>,
        events: mpsc::UnboundedSender<ControlEvent>,
        status: watch::Sender<ControllerStatus>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            provider,
            gate,
            view,
            slot: SharedSlot::new(),
            stats: Arc::new(RenderStats::default()),
            events,
            status,
            state: LifecycleState::Uninitialized,
            failure: None,
            session_id: None,
            awaiting: BTreeSet::new(),
            host_foreground: true,
            early_surface: None,
            surface_generation: 0,
            surface_requested: false,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn failure(&self) -> Option<&ControllerError> {
        self.failure.as_ref()
    }

    pub fn gate(&self) -> &CapabilityGate {
        &self.gate
    }

    pub fn render_loop(&self) -> RenderLoop {
        RenderLoop::new(self.slot.clone(), Arc::clone(&self.stats))
    }

    /// Draws are possible right now.
    pub fn ready_to_render(&self) -> bool {
        self.state == LifecycleState::Resumed && self.slot.read().binding.has_attached_surface()
    }

    /// Process one event to completion.
    pub fn handle(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::PermissionResponse {
                capability,
                outcome,
            } => {
                self.gate.resolve(capability, outcome);
            }
            ControlEvent::RequestCapability { capability, reply } => {
                self.gate.request(
                    capability,
                    Box::new(move |outcome| {
                        let _ = reply.send(outcome);
                    }),
                );
            }
            event if self.state.is_terminal() => {
                debug!(state = %self.state, ?event, "ignoring event in terminal state");
            }
            ControlEvent::Start => self.on_start(),
            ControlEvent::CapabilityResolved {
                capability,
                outcome,
            } => self.on_capability(capability, outcome),
            ControlEvent::HostPaused => self.on_host_paused(),
            ControlEvent::HostResumed => self.on_host_resumed(),
            ControlEvent::HostDestroyed => self.on_host_destroyed(),
            ControlEvent::SurfaceCreated(dimensions) => self.on_surface_created(dimensions),
            ControlEvent::SurfaceChanged(dimensions) => self.on_surface_changed(dimensions),
            ControlEvent::SurfaceDestroyed => self.on_surface_destroyed(),
            ControlEvent::SurfaceFailed(reason) => self.on_surface_failed(reason),
            ControlEvent::WindowFocusChanged(focused) => {
                if focused && self.state == LifecycleState::Resumed {
                    self.view.request_render();
                }
            }
            ControlEvent::Shutdown => {}
        }
        self.publish_status();
    }

    fn on_start(&mut self) {
        if self.state != LifecycleState::Uninitialized {
            debug!(state = %self.state, "start ignored, already started");
            return;
        }

        let mut needed = vec![Capability::Camera];
        if self.config.capabilities.require_microphone {
            needed.push(Capability::Microphone);
        }

        self.set_state(LifecycleState::AwaitingCapability);
        for capability in needed {
            self.awaiting.insert(capability);
            let events = self.events.clone();
            self.gate.request(
                capability,
                Box::new(move |outcome| {
                    let _ = events.send(ControlEvent::CapabilityResolved {
                        capability,
                        outcome,
                    });
                }),
            );
        }
    }

    fn on_capability(&mut self, capability: Capability, outcome: CapabilityOutcome) {
        if self.state != LifecycleState::AwaitingCapability || !self.awaiting.remove(&capability) {
            debug!(%capability, ?outcome, state = %self.state, "late capability result ignored");
            return;
        }

        match outcome {
            CapabilityOutcome::Denied => {
                self.awaiting.clear();
                self.fail(ControllerError::CapabilityDenied { capability });
            }
            CapabilityOutcome::Granted if self.awaiting.is_empty() => self.initialize(),
            CapabilityOutcome::Granted => {
                debug!(%capability, remaining = self.awaiting.len(), "capability granted, waiting for the rest");
            }
        }
    }

    fn initialize(&mut self) {
        self.set_state(LifecycleState::Initializing);

        let session = match self.provider.create(Arc::clone(&self.config)) {
            Ok(session) => session,
            Err(e) => {
                self.fail(e.into());
                return;
            }
        };

        self.session_id = Some(session.id());
        self.slot.write().binding = Binding::Initializing(session);

        match self.early_surface.take() {
            Some(dimensions) => self.on_surface_created(dimensions),
            None => self.request_surface(),
        }
    }

    fn on_host_paused(&mut self) {
        self.host_foreground = false;

        if self.state != LifecycleState::Resumed {
            debug!(state = %self.state, "host paused, nothing running");
            return;
        }

        self.view.set_rendering(false);
        let slot = self.slot.clone();
        let mut guard = slot.write();
        if let Some(session) = guard.binding.session_mut() {
            log_native("pause", session.id(), session.pause());
        }
        guard.state = LifecycleState::Paused;
        drop(guard);
        self.set_state(LifecycleState::Paused);
    }

    fn on_host_resumed(&mut self) {
        self.host_foreground = true;

        if self.state != LifecycleState::Paused {
            debug!(state = %self.state, "host resumed, nothing to resume");
            return;
        }

        if self.slot.read().binding.has_attached_surface() {
            self.resume_with_surface(None);
        } else {
            info!("surface lost while paused, waiting for a new one before resuming");
            self.request_surface();
        }
    }

    fn on_host_destroyed(&mut self) {
        self.awaiting.clear();
        self.early_surface = None;
        self.view.set_rendering(false);
        self.release_session(LifecycleState::Destroyed);
    }

    fn on_surface_created(&mut self, dimensions: Dimensions) {
        if !self.state.has_session() {
            debug!(%dimensions, state = %self.state, "surface arrived before session, holding");
            self.early_surface = Some(dimensions);
            return;
        }

        self.surface_generation += 1;
        self.surface_requested = false;
        let surface = SurfaceBinding::attach(self.surface_generation, dimensions);
        info!(%dimensions, generation = self.surface_generation, "surface attached");

        if self.host_foreground {
            self.resume_with_surface(Some(surface));
        } else {
            let slot = self.slot.clone();
            let mut guard = slot.write();
            guard.binding.attach_surface(surface);
            guard.state = LifecycleState::Paused;
            drop(guard);
            self.set_state(LifecycleState::Paused);
        }
    }

    fn on_surface_changed(&mut self, dimensions: Dimensions) {
        if !self.state.has_session() {
            if self.early_surface.is_some() {
                self.early_surface = Some(dimensions);
            }
            return;
        }

        if let Some(surface) = self.slot.write().binding.surface_mut() {
            surface.resize(dimensions);
            debug!(%dimensions, "surface resized");
        }
    }

    fn on_surface_destroyed(&mut self) {
        if !self.state.has_session() {
            self.early_surface = None;
            return;
        }

        if let Some(surface) = self.slot.write().binding.surface_mut() {
            surface.detach();
            info!(
                generation = surface.generation(),
                "{}, will reattach on next surface",
                ControllerError::SurfaceLost
            );
        }
    }

    fn on_surface_failed(&mut self, reason: String) {
        self.fail(ControllerError::Initialization(format!(
            "GPU context creation failed: {reason}"
        )));
    }

    /// Attach `surface` (if given), resume the session and start drawing.
    fn resume_with_surface(&mut self, surface: Option<SurfaceBinding>) {
        let slot = self.slot.clone();
        let mut guard = slot.write();
        if let Some(surface) = surface {
            guard.binding.attach_surface(surface);
        }
        if let Some(session) = guard.binding.session_mut() {
            log_native("resume", session.id(), session.resume());
        }
        guard.state = LifecycleState::Resumed;
        drop(guard);

        self.set_state(LifecycleState::Resumed);
        self.view.set_rendering(true);
        self.view.request_render();
    }

    fn request_surface(&mut self) {
        if !self.surface_requested {
            self.surface_requested = true;
            self.view.request_surface();
        }
    }

    /// Enter `Failed`, tear down any session and tell the user once.
    fn fail(&mut self, err: ControllerError) {
        error!(error = %err, state = %self.state, "session controller failed");
        self.awaiting.clear();
        self.view.set_rendering(false);
        self.release_session(LifecycleState::Failed);

        if let Some(message) = err.user_message() {
            self.view.notify_user(message);
        }
        self.failure = Some(err);
        self.view.finish();
    }

    /// Move to a terminal state and destroy the session exactly once.
    ///
    /// The write guard waits for any tick in flight; after it is released the
    /// session is unreachable from the render context.
    fn release_session(&mut self, terminal: LifecycleState) {
        let slot = self.slot.clone();
        let session: Option<SessionResource> = {
            let mut guard = slot.write();
            guard.state = terminal;
            guard.binding.take_session()
        };
        self.set_state(terminal);

        if let Some(mut session) = session {
            session.destroy();
        }
    }

    fn set_state(&mut self, to: LifecycleState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        self.slot.write().state = to;
        info!(%from, %to, "lifecycle transition");
    }

    fn publish_status(&self) {
        let next = ControllerStatus {
            state: self.state,
            ready_to_render: self.ready_to_render(),
            failure: self.failure.clone(),
            session_id: self.session_id,
            surface_generation: self.surface_generation,
            updated_at: Utc::now(),
        };
        self.status.send_if_modified(|current| {
            if current.same_as(&next) {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

fn log_native(op: &str, session_id: Uuid, result: Result<bool, crate::error::SessionError>) {
    match result {
        Ok(true) => debug!(%session_id, op, "native call issued"),
        Ok(false) => debug!(%session_id, op, "already in requested state"),
        Err(e) => warn!(%session_id, op, error = %e, "native call failed"),
    }
}
