//! # Presentation Binder
//!
//! Keeps an engine's output surface attached to a display region:
//! - attach once, on the first frame-ready event
//! - rescale on every frame-ready event so the picture fills the region
//!   (aspect ratio NOT preserved)
//! - detach on stream end, tolerating a surface that was never attached

use crate::engine::{FrameReady, Size, SurfaceHandle};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

// ============================================================================
// Geometry
// ============================================================================

/// Non-uniform scale applied to a surface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Scale {
    pub x: f64,
    pub y: f64,
}

impl Scale {
    /// Scale that stretches `frame` over `region`.
    pub fn fit(region: Size, frame_width: u32, frame_height: u32) -> Option<Self> {
        if frame_width == 0 || frame_height == 0 {
            return None;
        }
        Some(Self {
            x: region.width as f64 / frame_width as f64,
            y: region.height as f64 / frame_height as f64,
        })
    }
}

/// Where a surface sits inside its region.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Placement {
    pub left: i32,
    pub top: i32,
    /// Transform origin, relative to the surface.
    pub origin: (f64, f64),
}

impl Placement {
    /// Top-left corner, transforms anchored at 0,0.
    pub const TOP_LEFT: Placement = Placement {
        left: 0,
        top: 0,
        origin: (0.0, 0.0),
    };
}

/// Somewhere decoded output can be shown.
pub trait DisplayRegion {
    /// Current size. May change between frames.
    fn size(&self) -> Size;

    fn attach(&mut self, surface: SurfaceHandle, placement: Placement);

    fn detach(&mut self, surface: SurfaceHandle);

    fn set_scale(&mut self, surface: SurfaceHandle, scale: Scale);
}

// ============================================================================
// Binder
// ============================================================================

#[derive(Debug)]
pub struct PresentationBinder {
    surface: SurfaceHandle,
    attached: bool,
    scale: Option<Scale>,
    frames: u64,
}

impl PresentationBinder {
    pub fn new(surface: SurfaceHandle) -> Self {
        Self {
            surface,
            attached: false,
            scale: None,
            frames: 0,
        }
    }

    /// Handles one frame-ready event. Returns the scale that was applied.
    pub fn on_frame_ready<R: DisplayRegion + ?Sized>(
        &mut self,
        region: &mut R,
        frame: &FrameReady,
    ) -> Option<Scale> {
        if frame.surface != self.surface {
            tracing::warn!(
                "Ignoring frame for surface {} (bound to {})",
                frame.surface.id(),
                self.surface.id()
            );
            return None;
        }

        let Some(scale) = Scale::fit(region.size(), frame.width, frame.height) else {
            tracing::warn!(
                "Ignoring frame {} with empty size {}x{}",
                frame.frame_number,
                frame.width,
                frame.height
            );
            return None;
        };

        if !self.attached {
            tracing::debug!(
                "Attaching surface {} on first frame ({}x{})",
                self.surface.id(),
                frame.width,
                frame.height
            );
            region.attach(self.surface, Placement::TOP_LEFT);
            self.attached = true;
        }

        region.set_scale(self.surface, scale);
        self.scale = Some(scale);
        self.frames += 1;

        Some(scale)
    }

    /// Removes the surface from the region. Returns false if it was not attached.
    pub fn detach<R: DisplayRegion + ?Sized>(&mut self, region: &mut R) -> bool {
        if !self.attached {
            tracing::debug!("Surface {} never attached, nothing to detach", self.surface.id());
            return false;
        }

        region.detach(self.surface);
        self.attached = false;
        true
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn surface(&self) -> SurfaceHandle {
        self.surface
    }

    pub fn scale(&self) -> Option<Scale> {
        self.scale
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames
    }
}

// ============================================================================
// Headless Region
// ============================================================================

/// What a [`HeadlessRegion`] has been asked to do.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegionSnapshot {
    pub size: Size,
    pub attached: Option<SurfaceHandle>,
    pub placement: Option<Placement>,
    pub scale: Option<Scale>,
    pub attach_calls: u32,
    pub detach_calls: u32,
    pub scale_updates: u64,
}

/// In-memory display region. Clones share state, so a caller can keep a
/// handle while a session owns another.
#[derive(Debug, Clone)]
pub struct HeadlessRegion {
    state: Arc<Mutex<RegionSnapshot>>,
}

impl HeadlessRegion {
    pub fn new(size: Size) -> Self {
        Self {
            state: Arc::new(Mutex::new(RegionSnapshot {
                size,
                ..Default::default()
            })),
        }
    }

    pub fn resize(&self, size: Size) {
        self.state.lock().size = size;
    }

    pub fn snapshot(&self) -> RegionSnapshot {
        self.state.lock().clone()
    }
}

impl DisplayRegion for HeadlessRegion {
    fn size(&self) -> Size {
        self.state.lock().size
    }

    fn attach(&mut self, surface: SurfaceHandle, placement: Placement) {
        let mut state = self.state.lock();
        state.attached = Some(surface);
        state.placement = Some(placement);
        state.attach_calls += 1;
    }

    fn detach(&mut self, surface: SurfaceHandle) {
        let mut state = self.state.lock();
        state.detach_calls += 1;
        if state.attached == Some(surface) {
            state.attached = None;
        } else {
            tracing::warn!("Detach of surface {} which is not attached", surface.id());
        }
    }

    fn set_scale(&mut self, _surface: SurfaceHandle, scale: Scale) {
        let mut state = self.state.lock();
        state.scale = Some(scale);
        state.scale_updates += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(surface: SurfaceHandle, width: u32, height: u32, frame_number: u64) -> FrameReady {
        FrameReady {
            surface,
            width,
            height,
            frame_number,
        }
    }

    #[test]
    fn test_attach_once() {
        let surface = SurfaceHandle::next();
        let mut region = HeadlessRegion::new(Size::new(1280, 720));
        let mut binder = PresentationBinder::new(surface);

        for n in 0..5 {
            binder.on_frame_ready(&mut region, &frame(surface, 640, 360, n));
        }

        let snapshot = region.snapshot();
        assert_eq!(snapshot.attach_calls, 1);
        assert_eq!(snapshot.attached, Some(surface));
        assert_eq!(snapshot.placement, Some(Placement::TOP_LEFT));
        assert_eq!(snapshot.scale_updates, 5);
        assert_eq!(binder.frames_presented(), 5);
    }

    #[test]
    fn test_scale_is_non_uniform() {
        let surface = SurfaceHandle::next();
        let mut region = HeadlessRegion::new(Size::new(1024, 768));
        let mut binder = PresentationBinder::new(surface);

        let scale = binder
            .on_frame_ready(&mut region, &frame(surface, 1920, 1080, 0))
            .unwrap();

        assert_eq!(scale.x, 1024.0 / 1920.0);
        assert_eq!(scale.y, 768.0 / 1080.0);
        assert_eq!(region.snapshot().scale, Some(scale));
    }

    #[test]
    fn test_scale_follows_region_and_frame_size() {
        let surface = SurfaceHandle::next();
        let mut region = HeadlessRegion::new(Size::new(800, 600));
        let mut binder = PresentationBinder::new(surface);

        binder.on_frame_ready(&mut region, &frame(surface, 400, 300, 0));
        assert_eq!(binder.scale(), Some(Scale { x: 2.0, y: 2.0 }));

        region.resize(Size::new(400, 600));
        binder.on_frame_ready(&mut region, &frame(surface, 400, 300, 1));
        assert_eq!(binder.scale(), Some(Scale { x: 1.0, y: 2.0 }));

        binder.on_frame_ready(&mut region, &frame(surface, 800, 200, 2));
        assert_eq!(binder.scale(), Some(Scale { x: 0.5, y: 3.0 }));
    }

    #[test]
    fn test_detach_without_attach_is_noop() {
        let surface = SurfaceHandle::next();
        let mut region = HeadlessRegion::new(Size::new(640, 480));
        let mut binder = PresentationBinder::new(surface);

        assert!(!binder.detach(&mut region));
        assert_eq!(region.snapshot().detach_calls, 0);
    }

    #[test]
    fn test_detach_once() {
        let surface = SurfaceHandle::next();
        let mut region = HeadlessRegion::new(Size::new(640, 480));
        let mut binder = PresentationBinder::new(surface);

        binder.on_frame_ready(&mut region, &frame(surface, 320, 240, 0));
        assert!(binder.detach(&mut region));
        assert!(!binder.detach(&mut region));

        let snapshot = region.snapshot();
        assert_eq!(snapshot.detach_calls, 1);
        assert_eq!(snapshot.attached, None);
    }

    #[test]
    fn test_empty_frame_ignored() {
        let surface = SurfaceHandle::next();
        let mut region = HeadlessRegion::new(Size::new(640, 480));
        let mut binder = PresentationBinder::new(surface);

        assert!(binder.on_frame_ready(&mut region, &frame(surface, 0, 240, 0)).is_none());
        assert!(!binder.is_attached());
        assert_eq!(region.snapshot().attach_calls, 0);
    }

    #[test]
    fn test_foreign_surface_ignored() {
        let surface = SurfaceHandle::next();
        let other = SurfaceHandle::next();
        let mut region = HeadlessRegion::new(Size::new(640, 480));
        let mut binder = PresentationBinder::new(surface);

        assert!(binder.on_frame_ready(&mut region, &frame(other, 320, 240, 0)).is_none());
        assert!(!binder.is_attached());
    }
}
