//! Session resource - owns the opaque inference SDK handle
//!
//! `resume`, `pause` and `destroy` are idempotent: a call that would not
//! change state never reaches the SDK. Ordering against the render path is
//! not enforced here; the lifecycle state machine guarantees `destroy` never
//! runs while a render tick can still see the session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arcamconf::{CameraConfig, SessionConfig};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{BackendError, SessionError};

/// One camera frame with its inference result attached. Opaque beyond
/// sequencing and size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
}

/// Native session handle supplied by the SDK.
pub trait SessionBackend: Send + Sync {
    fn apply_camera_config(&mut self, camera: &CameraConfig) -> Result<(), BackendError>;
    fn resume(&mut self) -> Result<(), BackendError>;
    fn pause(&mut self) -> Result<(), BackendError>;
    fn destroy(&mut self);
    /// Non-blocking. `None` when no frame is ready.
    fn pull_frame(&self) -> Option<Frame>;
}

/// Creates native handles.
pub trait SessionFactory: Send + Sync {
    fn create(&self, config: &SessionConfig) -> Result<Box<dyn SessionBackend>, BackendError>;
}

/// Session lifecycle as the native handle sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Resumed,
    Paused,
    Destroyed,
}

/// Admits one live session at a time.
///
/// Clones share the same admission slot, so a controller created after an
/// earlier one cannot get a session until the earlier one is destroyed.
#[derive(Clone)]
pub struct SessionProvider {
    factory: Arc<dyn SessionFactory>,
    live: Arc<AtomicBool>,
}

impl SessionProvider {
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            factory,
            live: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Allocate a handle and apply the camera configuration.
    pub fn create(&self, config: Arc<SessionConfig>) -> Result<SessionResource, SessionError> {
        let missing = config.missing_fields();
        if !missing.is_empty() {
            return Err(SessionError::MissingConfig(missing));
        }

        if self
            .live
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SessionError::AlreadyActive);
        }

        let mut backend = match self.factory.create(&config) {
            Ok(backend) => backend,
            Err(e) => {
                self.live.store(false, Ordering::Release);
                return Err(SessionError::Rejected(e));
            }
        };

        if let Err(e) = backend.apply_camera_config(&config.camera) {
            backend.destroy();
            self.live.store(false, Ordering::Release);
            return Err(SessionError::Rejected(e));
        }

        let id = Uuid::new_v4();
        info!(
            session_id = %id,
            width = config.camera.width,
            height = config.camera.height,
            facing = %config.camera.facing,
            features = ?config.inference.features,
            "session created"
        );

        Ok(SessionResource {
            id,
            backend,
            config,
            state: SessionState::Created,
            live: Arc::clone(&self.live),
        })
    }

    /// True while a created session has not been destroyed.
    pub fn has_live_session(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }
}

/// An active inference + camera pipeline.
pub struct SessionResource {
    id: Uuid,
    backend: Box<dyn SessionBackend>,
    config: Arc<SessionConfig>,
    state: SessionState,
    live: Arc<AtomicBool>,
}

impl SessionResource {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Start the camera. Returns whether a native call was made.
    pub fn resume(&mut self) -> Result<bool, SessionError> {
        match self.state {
            SessionState::Destroyed => Err(SessionError::Destroyed),
            SessionState::Resumed => Ok(false),
            SessionState::Created | SessionState::Paused => {
                self.backend.resume().map_err(SessionError::Native)?;
                self.state = SessionState::Resumed;
                debug!(session_id = %self.id, "session resumed");
                Ok(true)
            }
        }
    }

    /// Stop the camera. Returns whether a native call was made.
    ///
    /// A session that was never resumed is not running, so pausing it is a
    /// no-op.
    pub fn pause(&mut self) -> Result<bool, SessionError> {
        match self.state {
            SessionState::Destroyed => Err(SessionError::Destroyed),
            SessionState::Created | SessionState::Paused => Ok(false),
            SessionState::Resumed => {
                self.backend.pause().map_err(SessionError::Native)?;
                self.state = SessionState::Paused;
                debug!(session_id = %self.id, "session paused");
                Ok(true)
            }
        }
    }

    /// Release native resources. Returns whether this call did the release.
    pub fn destroy(&mut self) -> bool {
        if self.state == SessionState::Destroyed {
            return false;
        }
        self.backend.destroy();
        self.state = SessionState::Destroyed;
        self.live.store(false, Ordering::Release);
        info!(session_id = %self.id, "session destroyed");
        true
    }

    /// Next frame, if the camera is running and one is ready.
    pub fn pull_frame(&self) -> Option<Frame> {
        if self.state != SessionState::Resumed {
            return None;
        }
        self.backend.pull_frame()
    }
}

impl Drop for SessionResource {
    fn drop(&mut self) {
        if self.state != SessionState::Destroyed {
            warn!(session_id = %self.id, "session dropped without destroy, releasing");
            self.destroy();
        }
    }
}

impl std::fmt::Debug for SessionResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionResource")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{demo_session_config, SimulatedSdk};
    use arcamconf::InferenceFeature;

    fn provider(sdk: &Arc<SimulatedSdk>) -> SessionProvider {
        SessionProvider::new(Arc::clone(sdk) as Arc<dyn SessionFactory>)
    }

    fn config() -> Arc<SessionConfig> {
        Arc::new(demo_session_config())
    }

    #[test]
    fn test_create_applies_camera_config() {
        let sdk = Arc::new(SimulatedSdk::new());
        let session = provider(&sdk).create(config()).unwrap();

        assert_eq!(session.state(), SessionState::Created);
        let calls = sdk.calls().snapshot();
        assert_eq!(calls.created, 1);
        assert_eq!(calls.camera_configured, 1);
    }

    #[test]
    fn test_create_passes_inference_features() {
        let sdk = Arc::new(SimulatedSdk::new());
        let mut config = demo_session_config();
        config.inference.features = vec![
            InferenceFeature::FaceHighTracking,
            InferenceFeature::BackgroundSegmentation,
        ];

        let _session = provider(&sdk).create(Arc::new(config)).unwrap();
        assert_eq!(
            sdk.created_with(),
            vec![
                InferenceFeature::FaceHighTracking,
                InferenceFeature::BackgroundSegmentation
            ]
        );
    }

    #[test]
    fn test_missing_credentials_rejected_before_sdk() {
        let sdk = Arc::new(SimulatedSdk::new());
        let err = provider(&sdk)
            .create(Arc::new(SessionConfig::default()))
            .unwrap_err();

        assert!(matches!(err, SessionError::MissingConfig(_)));
        assert_eq!(sdk.calls().snapshot().created, 0);
    }

    #[test]
    fn test_sdk_rejection_frees_slot() {
        let sdk = Arc::new(SimulatedSdk::rejecting("license expired"));
        let provider = provider(&sdk);

        let err = provider.create(config()).unwrap_err();
        assert!(matches!(err, SessionError::Rejected(_)));
        assert!(!provider.has_live_session());
    }

    #[test]
    fn test_resume_pause_idempotent() {
        let sdk = Arc::new(SimulatedSdk::new());
        let mut session = provider(&sdk).create(config()).unwrap();

        assert!(!session.pause().unwrap());
        assert!(session.resume().unwrap());
        assert!(!session.resume().unwrap());
        assert!(session.pause().unwrap());
        assert!(!session.pause().unwrap());

        let calls = sdk.calls().snapshot();
        assert_eq!(calls.resumed, 1);
        assert_eq!(calls.paused, 1);
    }

    #[test]
    fn test_destroy_idempotent() {
        let sdk = Arc::new(SimulatedSdk::new());
        let mut session = provider(&sdk).create(config()).unwrap();

        assert!(session.destroy());
        assert!(!session.destroy());
        drop(session);

        assert_eq!(sdk.calls().snapshot().destroyed, 1);
    }

    #[test]
    fn test_lifecycle_calls_after_destroy_fail() {
        let sdk = Arc::new(SimulatedSdk::new());
        let mut session = provider(&sdk).create(config()).unwrap();
        session.destroy();

        assert!(matches!(session.resume(), Err(SessionError::Destroyed)));
        assert!(matches!(session.pause(), Err(SessionError::Destroyed)));
        assert!(session.pull_frame().is_none());
    }

    #[test]
    fn test_one_live_session_at_a_time() {
        let sdk = Arc::new(SimulatedSdk::new());
        let provider = provider(&sdk);

        let mut first = provider.create(config()).unwrap();
        assert!(matches!(
            provider.create(config()),
            Err(SessionError::AlreadyActive)
        ));

        first.destroy();
        assert!(provider.create(config()).is_ok());
    }

    #[test]
    fn test_drop_without_destroy_releases() {
        let sdk = Arc::new(SimulatedSdk::new());
        let provider = provider(&sdk);

        let session = provider.create(config()).unwrap();
        drop(session);

        assert_eq!(sdk.calls().snapshot().destroyed, 1);
        assert!(!provider.has_live_session());
    }

    #[test]
    fn test_frames_only_while_resumed() {
        let sdk = Arc::new(SimulatedSdk::new());
        let mut session = provider(&sdk).create(config()).unwrap();

        assert!(session.pull_frame().is_none());
        session.resume().unwrap();
        let frame = session.pull_frame().unwrap();
        assert_eq!((frame.width, frame.height), (720, 1280));
        session.pause().unwrap();
        assert!(session.pull_frame().is_none());
    }
}
