//! State shared between the control context and the render context
//!
//! The control context is the only writer. Render ticks hold a read guard for
//! their whole duration, so taking the write guard is also the barrier that
//! waits out any tick in flight. Teardown moves the session out under the
//! write guard and destroys it after releasing the guard; once moved out, no
//! tick can reach it.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::lifecycle::LifecycleState;
use crate::session::SessionResource;
use crate::surface::SurfaceBinding;

/// Session/surface pairing. Illegal combinations (a surface without a
/// session) cannot be expressed.
#[derive(Debug, Default)]
pub enum Binding {
    #[default]
    NoSession,
    /// Session exists, no surface has been attached yet.
    Initializing(SessionResource),
    /// Session paired with a surface, which may since have been detached.
    Bound {
        session: SessionResource,
        surface: SurfaceBinding,
    },
}

impl Binding {
    pub fn session(&self) -> Option<&SessionResource> {
        match self {
            Binding::NoSession => None,
            Binding::Initializing(session) | Binding::Bound { session, .. } => Some(session),
        }
    }

    pub fn session_mut(&mut self) -> Option<&mut SessionResource> {
        match self {
            Binding::NoSession => None,
            Binding::Initializing(session) | Binding::Bound { session, .. } => Some(session),
        }
    }

    pub fn surface(&self) -> Option<&SurfaceBinding> {
        match self {
            Binding::Bound { surface, .. } => Some(surface),
            _ => None,
        }
    }

    pub fn surface_mut(&mut self) -> Option<&mut SurfaceBinding> {
        match self {
            Binding::Bound { surface, .. } => Some(surface),
            _ => None,
        }
    }

    /// True when there is a surface that can be drawn on right now.
    pub fn has_attached_surface(&self) -> bool {
        self.surface().is_some_and(SurfaceBinding::is_attached)
    }

    /// Pair the current session with a new surface, replacing any old one.
    /// Returns false (and drops `surface`) if there is no session.
    pub fn attach_surface(&mut self, surface: SurfaceBinding) -> bool {
        match std::mem::take(self) {
            Binding::NoSession => false,
            Binding::Initializing(session) | Binding::Bound { session, .. } => {
                *self = Binding::Bound { session, surface };
                true
            }
        }
    }

    /// Move the session out, leaving `NoSession`. The surface reference is
    /// released with it.
    pub fn take_session(&mut self) -> Option<SessionResource> {
        match std::mem::take(self) {
            Binding::NoSession => None,
            Binding::Initializing(session) | Binding::Bound { session, .. } => Some(session),
        }
    }
}

/// Everything a render tick may look at.
#[derive(Debug, Default)]
pub struct RenderSlot {
    pub state: LifecycleState,
    pub binding: Binding,
}

/// Single-writer/many-reader handle on the render slot.
#[derive(Debug, Clone, Default)]
pub struct SharedSlot {
    inner: Arc<RwLock<RenderSlot>>,
}

impl SharedSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read guard for a render tick. A panic on another thread while holding
    /// the lock does not stop rendering.
    pub fn read(&self) -> RwLockReadGuard<'_, RenderSlot> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write guard for the control context. Blocks until in-flight ticks finish.
    pub fn write(&self) -> RwLockWriteGuard<'_, RenderSlot> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionFactory, SessionProvider};
    use crate::sim::{demo_session_config, SimulatedSdk};
    use crate::surface::Dimensions;

    fn session(sdk: &Arc<SimulatedSdk>) -> SessionResource {
        SessionProvider::new(Arc::clone(sdk) as Arc<dyn SessionFactory>)
            .create(Arc::new(demo_session_config()))
            .unwrap()
    }

    #[test]
    fn test_attach_requires_session() {
        let mut binding = Binding::NoSession;
        let attached = binding.attach_surface(SurfaceBinding::attach(1, Dimensions::new(1, 1)));
        assert!(!attached);
        assert!(matches!(binding, Binding::NoSession));
    }

    #[test]
    fn test_reattach_keeps_session() {
        let sdk = Arc::new(SimulatedSdk::new());
        let mut binding = Binding::Initializing(session(&sdk));
        let id = binding.session().unwrap().id();

        binding.attach_surface(SurfaceBinding::attach(1, Dimensions::new(720, 1280)));
        binding.surface_mut().unwrap().detach();
        assert!(!binding.has_attached_surface());

        binding.attach_surface(SurfaceBinding::attach(2, Dimensions::new(720, 1280)));
        assert!(binding.has_attached_surface());
        assert_eq!(binding.surface().unwrap().generation(), 2);
        assert_eq!(binding.session().unwrap().id(), id);
        assert_eq!(sdk.calls().snapshot().created, 1);
    }

    #[test]
    fn test_take_session_clears_binding() {
        let sdk = Arc::new(SimulatedSdk::new());
        let mut binding = Binding::Initializing(session(&sdk));
        binding.attach_surface(SurfaceBinding::attach(1, Dimensions::new(720, 1280)));

        let mut taken = binding.take_session().unwrap();
        assert!(matches!(binding, Binding::NoSession));
        assert!(binding.surface().is_none());
        assert!(taken.destroy());
    }
}
