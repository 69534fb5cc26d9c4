//! Error types for the controller and its platform seams.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capability::Capability;

/// Controller-level failures, as surfaced to the host.
///
/// Only `CapabilityDenied` and `Initialization` are terminal. The other two
/// are absorbed where they happen and only show up in logs and stats.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ControllerError {
    #[error("{capability} permission denied")]
    CapabilityDenied { capability: Capability },

    #[error("session initialization failed: {0}")]
    Initialization(String),

    #[error("render tick failed: {0}")]
    RenderTick(String),

    #[error("drawing surface lost")]
    SurfaceLost,
}

impl ControllerError {
    /// Whether this error moves the controller to `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ControllerError::CapabilityDenied { .. } | ControllerError::Initialization(_)
        )
    }

    /// Message shown to the user, if this error is user-facing at all.
    pub fn user_message(&self) -> Option<&'static str> {
        match self {
            ControllerError::CapabilityDenied {
                capability: Capability::Camera,
            } => Some("Camera permission is required"),
            ControllerError::CapabilityDenied {
                capability: Capability::Microphone,
            } => Some("Camera and microphone permissions are needed"),
            ControllerError::Initialization(_) => Some("Camera initialization failed"),
            ControllerError::RenderTick(_) | ControllerError::SurfaceLost => None,
        }
    }
}

/// Failures from the session resource.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session config is missing: {}", .0.join(", "))]
    MissingConfig(Vec<&'static str>),

    #[error("SDK rejected session: {0}")]
    Rejected(#[source] BackendError),

    #[error("a session is already active; destroy it before creating another")]
    AlreadyActive,

    #[error("native call failed: {0}")]
    Native(#[source] BackendError),

    #[error("session already destroyed")]
    Destroyed,
}

impl From<SessionError> for ControllerError {
    fn from(err: SessionError) -> Self {
        ControllerError::Initialization(err.to_string())
    }
}

/// Opaque error reported by the inference SDK.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct BackendError(pub String);

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Opaque error reported by the GPU context while drawing.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct GpuError(pub String);

impl GpuError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
