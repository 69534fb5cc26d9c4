//! Render loop coordinator
//!
//! Invoked by the platform once per redraw opportunity (draw-on-demand, not a
//! fixed clock), on the platform's render thread:
//!
//! ```text
//!   control context                    render context
//!        │                                   │
//!        │ write guard (swap/teardown)       │ read guard (whole tick)
//!        └──────────► SharedSlot ◄───────────┘
//!                 {state, session, surface}
//!                                            │
//!                                            ▼
//!                  (new surface: take_error) → pull_frame → draw → take_error
//! ```
//!
//! Nothing that happens inside a tick is returned as an error. Failures are
//! logged and counted, and the next tick runs normally.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::binding::{RenderSlot, SharedSlot};
use crate::error::{ControllerError, GpuError};
use crate::lifecycle::LifecycleState;
use crate::session::{Frame, SessionResource};
use crate::surface::Dimensions;

/// How the SDK fits the camera image to the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AspectRatio {
    /// 1:1 crop.
    Square,
    /// Fill the whole surface.
    Full,
}

impl AspectRatio {
    /// Exactly 9:16 gets a square crop, anything else fills. Exact integer
    /// comparison, no tolerance.
    pub fn for_dimensions(dimensions: Dimensions) -> Self {
        let width = u64::from(dimensions.width);
        let height = u64::from(dimensions.height);
        if width * 16 == height * 9 {
            AspectRatio::Square
        } else {
            AspectRatio::Full
        }
    }
}

/// The GPU context owned by the render thread.
pub trait GpuContext {
    fn draw(
        &mut self,
        frame: &Frame,
        ratio: AspectRatio,
        dimensions: Dimensions,
    ) -> Result<(), GpuError>;

    /// Pending GPU error code, cleared by reading (glGetError semantics).
    fn take_error(&mut self) -> Option<u32>;
}

/// Snapshot taken at the start of a tick.
#[derive(Debug, Clone, Copy)]
pub struct RenderTick {
    pub sequence: u64,
    pub dimensions: Dimensions,
    pub surface_generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoSession,
    NotResumed(LifecycleState),
    NoSurface,
    FrameUnavailable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Drawn {
        ratio: AspectRatio,
        dimensions: Dimensions,
    },
    Skipped(SkipReason),
    Failed(ControllerError),
}

impl TickOutcome {
    pub fn is_drawn(&self) -> bool {
        matches!(self, TickOutcome::Drawn { .. })
    }
}

/// Counters updated by the render thread.
#[derive(Debug, Default)]
pub struct RenderStats {
    pub ticks: AtomicU64,
    pub frames_drawn: AtomicU64,
    pub skipped: AtomicU64,
    pub tick_errors: AtomicU64,
    pub gpu_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderStatsSnapshot {
    pub ticks: u64,
    pub frames_drawn: u64,
    pub skipped: u64,
    pub tick_errors: u64,
    pub gpu_errors: u64,
}

impl RenderStats {
    pub fn snapshot(&self) -> RenderStatsSnapshot {
        RenderStatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            frames_drawn: self.frames_drawn.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            tick_errors: self.tick_errors.load(Ordering::Relaxed),
            gpu_errors: self.gpu_errors.load(Ordering::Relaxed),
        }
    }
}

/// Render-side handle. Cheap to clone; hand one to the render thread.
#[derive(Debug, Clone)]
pub struct RenderLoop {
    slot: SharedSlot,
    stats: Arc<RenderStats>,
    /// Last surface generation the render thread has checked.
    seen_surface: Arc<AtomicU64>,
}

impl RenderLoop {
    pub(crate) fn new(slot: SharedSlot, stats: Arc<RenderStats>) -> Self {
        Self {
            slot,
            stats,
            seen_surface: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn stats(&self) -> &RenderStats {
        &self.stats
    }

    /// Run one tick. Never fails; the outcome is informational.
    pub fn tick(&self, gpu: &mut dyn GpuContext) -> TickOutcome {
        let sequence = self.stats.ticks.fetch_add(1, Ordering::Relaxed) + 1;

        // Held until the end of the tick. Teardown waits on this.
        let slot = self.slot.read();

        let (session, tick) = match snapshot(&slot, sequence) {
            Ok(pair) => pair,
            Err(reason) => return self.skip(sequence, reason),
        };

        if self.seen_surface.swap(tick.surface_generation, Ordering::Relaxed)
            != tick.surface_generation
        {
            self.check_new_surface(gpu, &tick);
        }

        let ratio = AspectRatio::for_dimensions(tick.dimensions);
        let Some(frame) = session.pull_frame() else {
            return self.skip(sequence, SkipReason::FrameUnavailable);
        };

        let drawn = gpu.draw(&frame, ratio, tick.dimensions);

        if let Some(code) = gpu.take_error() {
            self.stats.gpu_errors.fetch_add(1, Ordering::Relaxed);
            error!(
                sequence,
                code = %format!("0x{code:04x}"),
                surface = tick.surface_generation,
                "GPU error after draw"
            );
        }

        match drawn {
            Ok(()) => {
                self.stats.frames_drawn.fetch_add(1, Ordering::Relaxed);
                debug!(
                    sequence,
                    frame = frame.sequence,
                    ?ratio,
                    dimensions = %tick.dimensions,
                    "frame drawn"
                );
                TickOutcome::Drawn {
                    ratio,
                    dimensions: tick.dimensions,
                }
            }
            Err(e) => {
                self.stats.tick_errors.fetch_add(1, Ordering::Relaxed);
                warn!(sequence, error = %e, "error drawing frame, continuing");
                TickOutcome::Failed(ControllerError::RenderTick(e.to_string()))
            }
        }
    }

    /// First tick on a new surface: report anything left over from context
    /// and surface setup. Never fatal.
    fn check_new_surface(&self, gpu: &mut dyn GpuContext, tick: &RenderTick) {
        match gpu.take_error() {
            Some(code) => {
                self.stats.gpu_errors.fetch_add(1, Ordering::Relaxed);
                error!(
                    code = %format!("0x{code:04x}"),
                    surface = tick.surface_generation,
                    "GPU error after surface creation"
                );
            }
            None => debug!(surface = tick.surface_generation, "surface created, no GPU error"),
        }
    }

    fn skip(&self, sequence: u64, reason: SkipReason) -> TickOutcome {
        self.stats.skipped.fetch_add(1, Ordering::Relaxed);
        debug!(sequence, ?reason, "render tick skipped");
        TickOutcome::Skipped(reason)
    }
}

/// Session reference plus the tick-start view of the surface.
fn snapshot(slot: &RenderSlot, sequence: u64) -> Result<(&SessionResource, RenderTick), SkipReason> {
    let session = slot.binding.session().ok_or(SkipReason::NoSession)?;
    if slot.state != LifecycleState::Resumed {
        return Err(SkipReason::NotResumed(slot.state));
    }
    let surface = slot
        .binding
        .surface()
        .filter(|surface| surface.is_attached())
        .ok_or(SkipReason::NoSurface)?;

    Ok((
        session,
        RenderTick {
            sequence,
            dimensions: surface.current_dimensions(),
            surface_generation: surface.generation(),
        },
    ))
}
