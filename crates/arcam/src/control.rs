//! Control context - a single-threaded event loop in front of the state machine
//!
//! Host lifecycle callbacks, surface notifications and OS permission answers
//! can arrive on any thread. They all become `ControlEvent`s on one queue,
//! and the loop applies them to the [`SessionController`] strictly one at a
//! time, so the state machine itself needs no locking.

use std::sync::Arc;

use arcamconf::SessionConfig;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

use crate::capability::{Capability, CapabilityGate, CapabilityOutcome, PermissionPrompter};
use crate::lifecycle::{ControllerStatus, LifecycleState, SessionController, ViewHost};
use crate::render::RenderLoop;
use crate::session::{SessionFactory, SessionProvider};
use crate::surface::Dimensions;

/// Everything the control context reacts to.
#[derive(Debug)]
pub enum ControlEvent {
    // Host lifecycle
    Start,
    HostPaused,
    HostResumed,
    HostDestroyed,

    // View layer
    SurfaceCreated(Dimensions),
    SurfaceChanged(Dimensions),
    SurfaceDestroyed,
    SurfaceFailed(String),
    WindowFocusChanged(bool),

    // Capability gate
    /// Raw OS answer, posted by a `PermissionResponder`.
    PermissionResponse {
        capability: Capability,
        outcome: CapabilityOutcome,
    },
    /// Gate continuation for the state machine's own request.
    CapabilityResolved {
        capability: Capability,
        outcome: CapabilityOutcome,
    },
    /// External caller wants a capability; the reply carries the shared outcome.
    RequestCapability {
        capability: Capability,
        reply: oneshot::Sender<CapabilityOutcome>,
    },

    Shutdown,
}

#[derive(Debug, Error)]
pub enum HandleError {
    #[error("control loop has shut down")]
    Closed,
}

/// Cloneable, `Send` entry point for hosts, view layers and UI.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    events: mpsc::UnboundedSender<ControlEvent>,
    status: watch::Receiver<ControllerStatus>,
}

impl ControllerHandle {
    fn send(&self, event: ControlEvent) -> Result<(), HandleError> {
        self.events.send(event).map_err(|_| HandleError::Closed)
    }

    pub fn start(&self) -> Result<(), HandleError> {
        self.send(ControlEvent::Start)
    }

    pub fn host_paused(&self) -> Result<(), HandleError> {
        self.send(ControlEvent::HostPaused)
    }

    pub fn host_resumed(&self) -> Result<(), HandleError> {
        self.send(ControlEvent::HostResumed)
    }

    pub fn host_destroyed(&self) -> Result<(), HandleError> {
        self.send(ControlEvent::HostDestroyed)
    }

    pub fn surface_created(&self, dimensions: Dimensions) -> Result<(), HandleError> {
        self.send(ControlEvent::SurfaceCreated(dimensions))
    }

    pub fn surface_changed(&self, dimensions: Dimensions) -> Result<(), HandleError> {
        self.send(ControlEvent::SurfaceChanged(dimensions))
    }

    pub fn surface_destroyed(&self) -> Result<(), HandleError> {
        self.send(ControlEvent::SurfaceDestroyed)
    }

    pub fn surface_failed(&self, reason: impl Into<String>) -> Result<(), HandleError> {
        self.send(ControlEvent::SurfaceFailed(reason.into()))
    }

    pub fn window_focus_changed(&self, focused: bool) -> Result<(), HandleError> {
        self.send(ControlEvent::WindowFocusChanged(focused))
    }

    /// Ask for a capability through the shared gate.
    pub fn request_capability(
        &self,
        capability: Capability,
    ) -> Result<oneshot::Receiver<CapabilityOutcome>, HandleError> {
        let (reply, rx) = oneshot::channel();
        self.send(ControlEvent::RequestCapability { capability, reply })?;
        Ok(rx)
    }

    /// Ask for a capability and wait for the answer.
    pub async fn capability(&self, capability: Capability) -> Result<CapabilityOutcome, HandleError> {
        let rx = self.request_capability(capability)?;
        rx.await.map_err(|_| HandleError::Closed)
    }

    /// Observable lifecycle status.
    pub fn status(&self) -> watch::Receiver<ControllerStatus> {
        self.status.clone()
    }

    pub fn shutdown(&self) -> Result<(), HandleError> {
        self.send(ControlEvent::Shutdown)
    }
}

/// Owns the state machine and drains its event queue.
pub struct ControlLoop {
    controller: SessionController,
    events: mpsc::UnboundedReceiver<ControlEvent>,
    handle: ControllerHandle,
    shut_down: bool,
}

impl ControlLoop {
    pub fn new(
        config: SessionConfig,
        factory: Arc<dyn SessionFactory>,
        prompter: Arc<dyn PermissionPrompter>,
        view: Arc<dyn ViewHost>,
    ) -> Self {
        Self::with_provider(config, SessionProvider::new(factory), prompter, view)
    }

    /// Build on an existing provider, so a replacement controller shares the
    /// one-live-session rule with the instance it replaces.
    pub fn with_provider(
        config: SessionConfig,
        provider: SessionProvider,
        prompter: Arc<dyn PermissionPrompter>,
        view: Arc<dyn ViewHost>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ControllerStatus::initial());

        let gate = CapabilityGate::new(prompter, tx.clone());
        let controller =
            SessionController::new(config, provider, gate, view, tx.clone(), status_tx);

        Self {
            controller,
            events: rx,
            handle: ControllerHandle {
                events: tx,
                status: status_rx,
            },
            shut_down: false,
        }
    }

    pub fn handle(&self) -> ControllerHandle {
        self.handle.clone()
    }

    pub fn render_loop(&self) -> RenderLoop {
        self.controller.render_loop()
    }

    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    pub fn state(&self) -> LifecycleState {
        self.controller.state()
    }

    /// Apply one event immediately.
    pub fn dispatch(&mut self, event: ControlEvent) {
        if matches!(event, ControlEvent::Shutdown) {
            self.shut_down = true;
            return;
        }
        self.controller.handle(event);
    }

    /// Process everything queued, including events queued while processing.
    /// Returns the number of events handled.
    pub fn drain(&mut self) -> usize {
        let mut handled = 0;
        while !self.shut_down {
            let Ok(event) = self.events.try_recv() else {
                break;
            };
            self.dispatch(event);
            handled += 1;
        }
        handled
    }

    /// Run until `shutdown()` is called. Returns the final state.
    ///
    /// Teardown and surface swaps take the render slot's blocking write lock,
    /// which waits for an in-flight tick to finish its draw. That parks the
    /// worker thread for up to one draw, so spawn this on the multi-thread
    /// runtime (or inside `spawn_blocking` on a current-thread one).
    pub async fn run(mut self) -> LifecycleState {
        info!("control loop started");
        while !self.shut_down {
            // The loop holds a sender itself, so recv only ends on shutdown.
            let Some(event) = self.events.recv().await else {
                break;
            };
            self.dispatch(event);
        }
        let state = self.controller.state();
        debug!(%state, "control loop stopped");
        state
    }
}
