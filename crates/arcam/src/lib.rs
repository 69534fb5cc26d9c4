//! arcam - AR camera session controller
//!
//! Drives a camera session backed by an opaque inference SDK through the
//! host application's lifecycle:
//!
//! - **capability**: deduplicated OS permission requests
//! - **session**: owns the native SDK handle, one live at a time
//! - **lifecycle**: the state machine sequencing capability, session and surface
//! - **control**: event queue and loop that feed the state machine
//! - **render**: per-redraw tick on the render thread
//! - **sim**: simulated SDK, GPU, permission dialog and view for tests and the CLI
//!
//! Two execution contexts exist. The control context (one [`ControlLoop`])
//! owns all lifecycle decisions; the render context calls
//! [`RenderLoop::tick`] and only reads shared state.

pub mod binding;
pub mod capability;
pub mod control;
pub mod error;
pub mod lifecycle;
pub mod render;
pub mod session;
pub mod sim;
pub mod surface;

pub use capability::{
    Capability, CapabilityGate, CapabilityOutcome, PermissionPrompter, PermissionResponder,
};
pub use control::{ControlEvent, ControlLoop, ControllerHandle, HandleError};
pub use error::{BackendError, ControllerError, GpuError, SessionError};
pub use lifecycle::{ControllerStatus, LifecycleState, SessionController, ViewHost};
pub use render::{
    AspectRatio, GpuContext, RenderLoop, RenderStats, RenderStatsSnapshot, TickOutcome,
};
pub use session::{Frame, SessionBackend, SessionFactory, SessionProvider, SessionResource};
pub use surface::Dimensions;

pub use arcamconf::SessionConfig;
