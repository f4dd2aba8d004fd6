//! Zoom and pan state for the render surface.

pub const MIN_ZOOM: f32 = 0.2;
pub const MAX_ZOOM: f32 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewTransform {
    pub zoom: f32,
    pub translate_x: f32,
    pub translate_y: f32,
}

impl Default for ViewTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl ViewTransform {
    pub const fn identity() -> Self {
        Self {
            zoom: 1.0,
            translate_x: 0.0,
            translate_y: 0.0,
        }
    }

    /// Adds `delta` to the zoom factor, clamped to `[MIN_ZOOM, MAX_ZOOM]`.
    pub fn zoom_by(&mut self, delta: f32) -> f32 {
        if delta.is_finite() {
            self.zoom = (self.zoom + delta).clamp(MIN_ZOOM, MAX_ZOOM);
        }
        self.zoom
    }

    /// Multiplies the zoom factor, as a two-finger pinch does.
    pub fn pinch(&mut self, ratio: f32) -> f32 {
        if ratio.is_finite() && ratio > 0.0 {
            self.zoom = (self.zoom * ratio).clamp(MIN_ZOOM, MAX_ZOOM);
        }
        self.zoom
    }

    pub fn reset(&mut self) {
        *self = Self::identity();
    }

    /// CSS `transform` value for the diagram viewport.
    pub fn css(&self) -> String {
        format!(
            "translate({:.1}px, {:.1}px) scale({:.2})",
            self.translate_x, self.translate_y, self.zoom
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Drag {
    pointer_x: f32,
    pointer_y: f32,
    origin_x: f32,
    origin_y: f32,
}

/// Pointer-drag panning behind an on/off gate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PanState {
    enabled: bool,
    drag: Option<Drag>,
}

impl PanState {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn toggle(&mut self) -> bool {
        self.enabled = !self.enabled;
        self.drag = None;
        self.enabled
    }

    pub fn begin_drag(&mut self, transform: &ViewTransform, x: f32, y: f32) {
        if !self.enabled {
            return;
        }
        self.drag = Some(Drag {
            pointer_x: x,
            pointer_y: y,
            origin_x: transform.translate_x,
            origin_y: transform.translate_y,
        });
    }

    /// Offsets from the drag start, so repeated moves never accumulate error.
    pub fn drag_to(&self, transform: &mut ViewTransform, x: f32, y: f32) {
        let Some(drag) = self.drag else {
            return;
        };
        transform.translate_x = drag.origin_x + (x - drag.pointer_x);
        transform.translate_y = drag.origin_y + (y - drag.pointer_y);
    }

    pub fn end_drag(&mut self) {
        self.drag = None;
    }
}
