//! Surface binding - the GPU-backed drawable the session renders into
//!
//! The view layer creates and destroys surfaces far more often than sessions
//! come and go (every background/foreground cycle). A binding is replaced on
//! each re-creation; the session it is paired with survives.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pixel size of a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// The controller's view of one platform surface.
#[derive(Debug, Clone)]
pub struct SurfaceBinding {
    generation: u64,
    dimensions: Dimensions,
    attached: bool,
    attached_at: DateTime<Utc>,
}

impl SurfaceBinding {
    /// Bind a freshly created surface. `generation` increases with every
    /// re-creation so logs can tell surfaces apart.
    pub fn attach(generation: u64, dimensions: Dimensions) -> Self {
        Self {
            generation,
            dimensions,
            attached: true,
            attached_at: Utc::now(),
        }
    }

    /// Mark the surface gone. Dimensions are kept as last known.
    pub fn detach(&mut self) {
        self.attached = false;
    }

    pub fn resize(&mut self, dimensions: Dimensions) {
        self.dimensions = dimensions;
    }

    pub fn current_dimensions(&self) -> Dimensions {
        self.dimensions
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn attached_at(&self) -> DateTime<Utc> {
        self.attached_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_then_detach_keeps_dimensions() {
        let mut surface = SurfaceBinding::attach(1, Dimensions::new(720, 1280));
        assert!(surface.is_attached());

        surface.detach();
        assert!(!surface.is_attached());
        assert_eq!(surface.current_dimensions(), Dimensions::new(720, 1280));
    }

    #[test]
    fn test_resize() {
        let mut surface = SurfaceBinding::attach(3, Dimensions::new(720, 1280));
        surface.resize(Dimensions::new(1280, 720));
        assert_eq!(surface.current_dimensions(), Dimensions::new(1280, 720));
        assert_eq!(surface.generation(), 3);
    }

    #[test]
    fn test_display() {
        assert_eq!(Dimensions::new(1080, 1920).to_string(), "1080x1920");
    }
}
