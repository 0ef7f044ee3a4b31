//! Per-level origin tracking and toroidal update planning.
//!
//! A level texture is addressed toroidally: texel `(tx, ty)` holds the
//! sample at window position `((tx - offset.x) mod N, (ty - offset.y) mod N)`,
//! which is world sample `origin + window * spacing`. Moving the origin by a
//! whole number of texels only rewrites the texels that scrolled in.

use geoclip_core::math::{div_floor, mod_floor, wrap_coord_for_tile, wrapped_spans};
use geoclip_core::{SampleCoord, TexelRect};
use glam::Vec2;

/// Toroidal write offset of a level texture, in texels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TexelOffset {
    pub x: u32,
    pub y: u32,
}

impl TexelOffset {
    pub const ZERO: Self = Self { x: 0, y: 0 };

    #[inline]
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// Why a level is rewritten in full.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FullRefreshReason {
    /// Level has never been populated.
    FirstUpdate,
    /// Origin delta is not a multiple of the level spacing.
    Misaligned,
    /// Shift covers the whole texture on at least one axis.
    ShiftTooLarge,
}

/// How a level moves from its resident origin to the desired one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateKind {
    /// Desired origin equals the resident origin.
    Unchanged,
    /// Scroll by whole texels; only the exposed strips are rewritten.
    Incremental { shift_x: i64, shift_y: i64 },
    /// Rewrite every texel and reset the offset.
    Full(FullRefreshReason),
}

/// Decision for one level update, computed without mutating the tracker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LevelUpdatePlan {
    pub level: usize,
    pub kind: UpdateKind,
    pub origin: SampleCoord,
    pub previous_origin: Option<SampleCoord>,
    /// Offset after the update.
    pub offset: TexelOffset,
    /// Non-overlapping texel rectangles to rewrite.
    pub regions: Vec<TexelRect>,
    /// The level texture holds no valid data yet.
    pub first_upload: bool,
}

impl LevelUpdatePlan {
    /// True when no texel needs rewriting.
    pub fn is_noop(&self) -> bool {
        self.regions.is_empty()
    }

    pub const fn is_full_refresh(&self) -> bool {
        matches!(self.kind, UpdateKind::Full(_))
    }

    /// Total texels covered by the dirty regions.
    pub fn dirty_texels(&self) -> u64 {
        self.regions.iter().map(TexelRect::area).sum()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TrackerState {
    Uninitialized,
    Tracking {
        origin: SampleCoord,
        offset: TexelOffset,
    },
}

/// Resident origin and toroidal offset of one clipmap level.
#[derive(Clone, Debug)]
pub struct LevelOriginTracker {
    level: usize,
    spacing: i64,
    texture_size: u32,
    state: TrackerState,
}

impl LevelOriginTracker {
    pub fn new(level: usize, texture_size: u32) -> Self {
        Self {
            level,
            spacing: 1 << level,
            texture_size,
            state: TrackerState::Uninitialized,
        }
    }

    #[inline]
    pub const fn level(&self) -> usize {
        self.level
    }

    #[inline]
    pub const fn spacing(&self) -> i64 {
        self.spacing
    }

    #[inline]
    pub const fn texture_size(&self) -> u32 {
        self.texture_size
    }

    #[inline]
    pub const fn is_initialized(&self) -> bool {
        matches!(self.state, TrackerState::Tracking { .. })
    }

    /// Resident origin in level-0 samples.
    pub const fn origin(&self) -> Option<SampleCoord> {
        match self.state {
            TrackerState::Uninitialized => None,
            TrackerState::Tracking { origin, .. } => Some(origin),
        }
    }

    pub const fn offset(&self) -> TexelOffset {
        match self.state {
            TrackerState::Uninitialized => TexelOffset::ZERO,
            TrackerState::Tracking { offset, .. } => offset,
        }
    }

    /// World-space position of the resident origin.
    pub fn world_origin(&self, sample_world_size: f32) -> Option<Vec2> {
        self.origin().map(|origin| origin.to_world(sample_world_size))
    }

    /// Plan the move to `desired` without changing any state.
    pub fn plan(&self, desired: SampleCoord) -> LevelUpdatePlan {
        let size = self.texture_size;
        let (previous_origin, old_offset) = match self.state {
            TrackerState::Uninitialized => {
                return self.full_plan(desired, None, FullRefreshReason::FirstUpdate, true);
            }
            TrackerState::Tracking { origin, offset } => (origin, offset),
        };

        if desired == previous_origin {
            return LevelUpdatePlan {
                level: self.level,
                kind: UpdateKind::Unchanged,
                origin: desired,
                previous_origin: Some(previous_origin),
                offset: old_offset,
                regions: Vec::new(),
                first_upload: false,
            };
        }

        let delta = desired - previous_origin;
        if delta.x % self.spacing != 0 || delta.y % self.spacing != 0 {
            return self.full_plan(desired, Some(previous_origin), FullRefreshReason::Misaligned, false);
        }
        let shift_x = delta.x / self.spacing;
        let shift_y = delta.y / self.spacing;
        if shift_x.unsigned_abs() >= u64::from(size) || shift_y.unsigned_abs() >= u64::from(size) {
            return self.full_plan(desired, Some(previous_origin), FullRefreshReason::ShiftTooLarge, false);
        }

        let columns: Vec<(u32, u32)> = exposed_spans(old_offset.x, shift_x, size).collect();
        let rows: Vec<(u32, u32)> = exposed_spans(old_offset.y, shift_y, size).collect();

        let mut regions = Vec::with_capacity(columns.len() + rows.len() * 2);
        for &(x, width) in &columns {
            regions.push(TexelRect::new(x, 0, width, size));
        }
        if !rows.is_empty() {
            // Rows skip the columns already rewritten above.
            let kept_start = exposed_start(old_offset.x, shift_x, size) + shift_x.unsigned_abs() as i64;
            let kept_len = size - shift_x.unsigned_abs() as u32;
            for (x, width) in wrapped_spans(kept_start, kept_len, size) {
                for &(y, height) in &rows {
                    regions.push(TexelRect::new(x, y, width, height));
                }
            }
        }

        LevelUpdatePlan {
            level: self.level,
            kind: UpdateKind::Incremental { shift_x, shift_y },
            origin: desired,
            previous_origin: Some(previous_origin),
            offset: TexelOffset::new(
                wrap_coord_for_tile(i64::from(old_offset.x) + shift_x, size),
                wrap_coord_for_tile(i64::from(old_offset.y) + shift_y, size),
            ),
            regions,
            first_upload: false,
        }
    }

    /// Adopt the origin and offset of an executed plan.
    pub fn commit(&mut self, plan: &LevelUpdatePlan) {
        debug_assert_eq!(plan.level, self.level);
        self.state = TrackerState::Tracking {
            origin: plan.origin,
            offset: plan.offset,
        };
    }

    /// Forget the resident data; the next plan is a first update.
    pub fn reset(&mut self) {
        self.state = TrackerState::Uninitialized;
    }

    /// Texel holding window position `(wx, wy)`.
    pub fn texel_for_window(&self, wx: u32, wy: u32) -> (u32, u32) {
        let offset = self.offset();
        let size = self.texture_size;
        ((wx + offset.x) % size, (wy + offset.y) % size)
    }

    /// World sample stored in texel `(tx, ty)`, if the level is populated.
    pub fn sample_at_texel(&self, tx: u32, ty: u32) -> Option<SampleCoord> {
        let origin = self.origin()?;
        let (wx, wy) = window_of_texel(tx, ty, self.offset(), self.texture_size);
        Some(origin + SampleCoord::new(i64::from(wx), i64::from(wy)).scaled(self.spacing))
    }

    fn full_plan(
        &self,
        desired: SampleCoord,
        previous_origin: Option<SampleCoord>,
        reason: FullRefreshReason,
        first_upload: bool,
    ) -> LevelUpdatePlan {
        LevelUpdatePlan {
            level: self.level,
            kind: UpdateKind::Full(reason),
            origin: desired,
            previous_origin,
            offset: TexelOffset::ZERO,
            regions: vec![TexelRect::full(self.texture_size)],
            first_upload,
        }
    }
}

/// Window position held by texel `(tx, ty)` under `offset`.
pub fn window_of_texel(tx: u32, ty: u32, offset: TexelOffset, size: u32) -> (u32, u32) {
    (
        wrap_coord_for_tile(i64::from(tx) - i64::from(offset.x), size),
        wrap_coord_for_tile(i64::from(ty) - i64::from(offset.y), size),
    )
}

/// Origin a level should have for a camera at level-0 sample `camera`.
///
/// The origin snaps to twice the level spacing so each level nests on the
/// grid of the next coarser one, and the camera sits near the window centre.
pub fn desired_origin(camera: SampleCoord, level: usize, texture_size: u32) -> SampleCoord {
    let spacing = 1i64 << level;
    let snap = spacing * 2;
    let half = i64::from(texture_size / 2) * spacing;
    SampleCoord::new(
        div_floor(camera.x, snap) * snap - half,
        div_floor(camera.y, snap) * snap - half,
    )
}

fn exposed_start(old_offset: u32, shift: i64, size: u32) -> i64 {
    let start = if shift > 0 {
        i64::from(old_offset)
    } else {
        i64::from(old_offset) + shift
    };
    mod_floor(start, i64::from(size))
}

fn exposed_spans(old_offset: u32, shift: i64, size: u32) -> impl Iterator<Item = (u32, u32)> {
    wrapped_spans(
        exposed_start(old_offset, shift, size),
        shift.unsigned_abs() as u32,
        size,
    )
}
