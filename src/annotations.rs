use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// Default stroke color: pure red in BGRA byte order
pub const DEFAULT_STROKE_COLOR: [u8; 4] = [0, 0, 255, 255];

/// Default stroke half-width in pixels
pub const DEFAULT_STROKE_RADIUS: i32 = 2;

/// Default mosaic cell size in pixels
pub const DEFAULT_MOSAIC_BLOCK: u32 = 15;

/// Active annotation tool. Pen and Mosaic are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolMode {
    #[default]
    None,
    Pen,
    Mosaic,
}

/// A single pen point with color and half-width
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stroke {
    pub x: i32,
    pub y: i32,
    pub color: [u8; 4],
    pub radius: i32,
}

impl Stroke {
    pub fn new(x: i32, y: i32) -> Self {
        Self {
            x,
            y,
            color: DEFAULT_STROKE_COLOR,
            radius: DEFAULT_STROKE_RADIUS,
        }
    }

    pub fn with_color(mut self, color: [u8; 4]) -> Self {
        self.color = color;
        self
    }

    pub fn with_radius(mut self, radius: i32) -> Self {
        self.radius = radius;
        self
    }
}

/// Rendering style of a privacy mask zone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskStyle {
    /// Block averaging: every cell is flattened to its top-left pixel
    Mosaic { block: u32 },
    /// Box blur over the zone with the given radius
    Blur { radius: u32 },
}

impl Default for MaskStyle {
    fn default() -> Self {
        MaskStyle::Mosaic {
            block: DEFAULT_MOSAIC_BLOCK,
        }
    }
}

/// An axis-aligned privacy mask zone in screen coordinates.
///
/// `retroactive` controls whether the zone participates in a
/// retroactive pass over the ring buffer; forward composition applies
/// every zone regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskZone {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
    pub style: MaskStyle,
    pub retroactive: bool,
}

impl MaskZone {
    pub fn mosaic(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self {
            x,
            y,
            w,
            h,
            style: MaskStyle::default(),
            retroactive: true,
        }
    }

    pub fn blur(x: i32, y: i32, w: i32, h: i32, radius: u32) -> Self {
        Self {
            x,
            y,
            w,
            h,
            style: MaskStyle::Blur { radius },
            retroactive: true,
        }
    }

    pub fn with_block(mut self, block: u32) -> Self {
        self.style = MaskStyle::Mosaic { block };
        self
    }
}

/// Value copy of the annotation state, safe to iterate without a lock
#[derive(Debug, Clone, Default)]
pub struct AnnotationSnapshot {
    pub strokes: Vec<Stroke>,
    pub zones: Vec<MaskZone>,
}

impl AnnotationSnapshot {
    pub fn is_empty(&self) -> bool {
        self.strokes.is_empty() && self.zones.is_empty()
    }

    /// Restrict the snapshot to retroactive mask zones; strokes stay
    /// forward-only and never participate in a retroactive pass.
    pub fn retroactive_masks(&self) -> AnnotationSnapshot {
        AnnotationSnapshot {
            strokes: Vec::new(),
            zones: self
                .zones
                .iter()
                .copied()
                .filter(|z| z.retroactive)
                .collect(),
        }
    }
}

#[derive(Debug, Default)]
struct AnnotationState {
    strokes: Vec<Stroke>,
    zones: Vec<MaskZone>,
    mode: ToolMode,
}

/// Thread-safe store of the current annotation set and tool mode.
///
/// All operations serialize on an internal mutex; readers take value
/// snapshots so composition never holds the lock.
#[derive(Debug, Default)]
pub struct AnnotationStore {
    state: Mutex<AnnotationState>,
}

impl AnnotationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AnnotationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Switch the active tool. Selecting Pen deactivates Mosaic and
    /// vice versa; the accumulated annotation lists are untouched.
    pub fn set_mode(&self, mode: ToolMode) {
        let mut state = self.lock();
        if state.mode != mode {
            debug!("Tool mode {:?} -> {:?}", state.mode, mode);
            state.mode = mode;
        }
    }

    pub fn mode(&self) -> ToolMode {
        self.lock().mode
    }

    pub fn add_stroke(&self, stroke: Stroke) {
        self.lock().strokes.push(stroke);
    }

    pub fn add_zone(&self, zone: MaskZone) {
        self.lock().zones.push(zone);
    }

    /// Toggle the retroactive flag of the zone at `index`.
    /// Returns the new flag value, or None for an out-of-range index.
    pub fn toggle_zone_retroactive(&self, index: usize) -> Option<bool> {
        let mut state = self.lock();
        let zone = state.zones.get_mut(index)?;
        zone.retroactive = !zone.retroactive;
        Some(zone.retroactive)
    }

    /// Remove all strokes and zones; the tool mode is unchanged
    pub fn clear(&self) {
        let mut state = self.lock();
        let (strokes, zones) = (state.strokes.len(), state.zones.len());
        state.strokes.clear();
        state.zones.clear();
        debug!("Cleared {} strokes and {} zones", strokes, zones);
    }

    pub fn snapshot(&self) -> AnnotationSnapshot {
        let state = self.lock();
        AnnotationSnapshot {
            strokes: state.strokes.clone(),
            zones: state.zones.clone(),
        }
    }

    pub fn stroke_count(&self) -> usize {
        self.lock().strokes.len()
    }

    pub fn zone_count(&self) -> usize {
        self.lock().zones.len()
    }
}
