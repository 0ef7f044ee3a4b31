//! Coordinate systems for the streamed terrain.
//!
//! World samples are integer positions on the finest (level 0) sample grid.
//! Texels address a level's toroidal texture.

use std::ops::{Add, Sub};

use glam::Vec2;
use serde::{Deserialize, Serialize};

/// Position on the level-0 sample grid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SampleCoord {
    pub x: i64,
    pub y: i64,
}

impl SampleCoord {
    /// The grid origin.
    pub const ZERO: Self = Self { x: 0, y: 0 };

    /// Create a new sample coordinate
    #[inline]
    pub const fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    /// Sample containing a world-space XZ position.
    #[inline]
    pub fn from_world(position: Vec2, sample_world_size: f32) -> Self {
        Self::new(
            (position.x / sample_world_size).floor() as i64,
            (position.y / sample_world_size).floor() as i64,
        )
    }

    /// World-space position of this sample's corner.
    #[inline]
    pub fn to_world(self, sample_world_size: f32) -> Vec2 {
        Vec2::new(
            self.x as f32 * sample_world_size,
            self.y as f32 * sample_world_size,
        )
    }

    /// Multiply both components by a scalar.
    #[inline]
    pub const fn scaled(self, factor: i64) -> Self {
        Self::new(self.x * factor, self.y * factor)
    }
}

impl Add for SampleCoord {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for SampleCoord {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

/// Axis-aligned texel rectangle inside a level texture.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TexelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl TexelRect {
    #[inline]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle covering a whole `size x size` texture.
    #[inline]
    pub const fn full(size: u32) -> Self {
        Self::new(0, 0, size, size)
    }

    #[inline]
    pub const fn right(&self) -> u32 {
        self.x + self.width
    }

    #[inline]
    pub const fn bottom(&self) -> u32 {
        self.y + self.height
    }

    /// Number of texels covered.
    #[inline]
    pub const fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    #[inline]
    pub const fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    /// True when the two rectangles share at least one texel.
    pub const fn intersects(&self, other: &Self) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    /// Smallest rectangle containing both.
    pub fn union(&self, other: &Self) -> Self {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        Self::new(
            x,
            y,
            self.right().max(other.right()) - x,
            self.bottom().max(other.bottom()) - y,
        )
    }

    /// Bounding box of a set of rectangles (empty when the set is empty).
    pub fn bounding<'a>(rects: impl IntoIterator<Item = &'a Self>) -> Self {
        rects
            .into_iter()
            .fold(Self::default(), |bounds, rect| bounds.union(rect))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn world_roundtrip_for_negative_positions() {
        let sample = SampleCoord::from_world(Vec2::new(-0.5, 3.99), 1.0);
        assert_eq!(sample, SampleCoord::new(-1, 3));

        let world = SampleCoord::new(-4, 6).to_world(0.5);
        assert_relative_eq!(world.x, -2.0);
        assert_relative_eq!(world.y, 3.0);
    }

    #[test]
    fn rect_union_and_bounds() {
        let a = TexelRect::new(0, 0, 2, 256);
        let b = TexelRect::new(254, 0, 2, 256);
        assert_eq!(a.union(&b), TexelRect::new(0, 0, 256, 256));
        assert_eq!(TexelRect::bounding([&a]), a);
        assert!(TexelRect::bounding([]).is_empty());
    }

    #[test]
    fn rect_intersection() {
        let a = TexelRect::new(0, 0, 4, 4);
        assert!(a.intersects(&TexelRect::new(3, 3, 4, 4)));
        assert!(!a.intersects(&TexelRect::new(4, 0, 4, 4)));
        assert!(!a.intersects(&TexelRect::new(1, 1, 0, 4)));
        assert!(a.contains(3, 3));
        assert!(!a.contains(4, 3));
    }
}
