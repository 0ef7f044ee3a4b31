//! Shared clipmap ring geometry.
//!
//! Every level draws the same vertex and index buffers; the vertex stage
//! scales and offsets them with the level's spacing and origin. The mesh is a
//! `(G+1)²` point grid over window samples `0..=G` of a level whose texture
//! holds `G + 2` texels per side, split into square blocks around a centred
//! hole. `G` is even, so the next finer level spans exactly `G / 2` cells of
//! this one. The hole is one cell wider than that on each axis; the leftover
//! L-shaped strip is the interior trim, and which two sides of the hole it
//! lies on depends on how the two levels snapped to the camera
//! ([`TrimOrientation`]).
//!
//! Each contiguous index range is a [`MeshSection`], so a level is drawn by
//! issuing one indexed draw per section with [`DrawPushConstants`]
//! identifying the patch.
//!
//! Positions are in grid cells: `x` and `z` span `0..=G`, `y` is `0` on the
//! surface and `-skirt_depth` at the bottom of a skirt.

use bytemuck::{Pod, Zeroable};
use geoclip_core::constants::DEFAULT_GRID_SIZE;
use geoclip_core::math::div_ceil_u32;
use geoclip_core::{ClipmapConfig, Error, Result, SampleCoord};
use geoclip_world::desired_origin;

/// Default block edge in cells.
pub const DEFAULT_BLOCK_SIZE: u32 = 16;

/// Default skirt depth in grid cells.
pub const DEFAULT_SKIRT_DEPTH: f32 = 1.0;

/// Smallest grid that leaves ring cells on both sides of the hole.
const MIN_GRID_SIZE: u32 = 10;

/// Vertex of the ring mesh.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct RingVertex {
    pub position: [f32; 3],
    /// Direction a skirt vertex is pushed away from its ring. Zero elsewhere.
    pub edge_dir: [f32; 2],
}

impl RingVertex {
    const fn surface(x: f32, z: f32) -> Self {
        Self {
            position: [x, 0.0, z],
            edge_dir: [0.0, 0.0],
        }
    }
}

/// Kind of geometry in a section.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PatchType {
    /// Block entirely outside the hole.
    Ring = 0,
    /// Outside cells of a block that straddles the hole boundary, or the
    /// L-shaped strip between the hole and the finer level.
    Trim = 1,
    /// The hole itself; only the finest level draws it.
    Filler = 2,
    /// Zero-area triangles closing T-junctions against the finer level.
    Fixup = 3,
    /// Skirt hanging from the outer boundary.
    OuterSkirt = 4,
    /// Skirt hanging from the boundary shared with the finer level.
    InnerSkirt = 5,
}

impl PatchType {
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Ring, trim and filler tile the grid; the rest only hide seams.
    pub const fn is_surface(self) -> bool {
        matches!(self, Self::Ring | Self::Trim | Self::Filler)
    }
}

/// Side of a square boundary.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EdgeSide {
    NegX = 0,
    PosX = 1,
    NegZ = 2,
    PosZ = 3,
}

impl EdgeSide {
    pub const ALL: [Self; 4] = [Self::NegX, Self::PosX, Self::NegZ, Self::PosZ];

    /// Unit vector pointing out of a square across this side.
    pub const fn outward(self) -> [f32; 2] {
        match self {
            Self::NegX => [-1.0, 0.0],
            Self::PosX => [1.0, 0.0],
            Self::NegZ => [0.0, -1.0],
            Self::PosZ => [0.0, 1.0],
        }
    }

    const fn inward(self) -> [f32; 2] {
        let [x, z] = self.outward();
        [-x, -z]
    }
}

/// Where the finer level sits inside the hole.
///
/// With `shift_x` set the finer level touches the +X side of the hole and the
/// interior trim fills the -X column; otherwise the trim fills the +X column.
/// Likewise for Z.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TrimOrientation {
    pub shift_x: bool,
    pub shift_z: bool,
}

impl TrimOrientation {
    pub const ALL: [Self; 4] = [
        Self::new(false, false),
        Self::new(true, false),
        Self::new(false, true),
        Self::new(true, true),
    ];

    pub const fn new(shift_x: bool, shift_z: bool) -> Self {
        Self { shift_x, shift_z }
    }

    pub fn index(self) -> u32 {
        u32::from(self.shift_x) | (u32::from(self.shift_z) << 1)
    }

    /// Placement of a finer level with origin `fine` inside a coarser level
    /// with origin `coarse` and sample spacing `coarse_spacing`, whose hole
    /// starts at cell `hole_start`. `None` if the finer level is not at one of
    /// the four nested placements.
    pub fn between(fine: SampleCoord, coarse: SampleCoord, coarse_spacing: i64, hole_start: u32) -> Option<Self> {
        let shift = |fine: i64, coarse: i64| -> Option<bool> {
            let delta = fine - coarse;
            if delta % coarse_spacing != 0 {
                return None;
            }
            match delta / coarse_spacing - i64::from(hole_start) {
                0 => Some(false),
                1 => Some(true),
                _ => None,
            }
        };
        Some(Self::new(shift(fine.x, coarse.x)?, shift(fine.y, coarse.y)?))
    }
}

/// A contiguous index range of one patch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MeshSection {
    pub patch_type: PatchType,
    /// Block index (`bz * blocks_per_axis + bx`) for ring and straddling trim
    /// sections, the orientation index for interior trims, the side for
    /// fixups and skirts, zero for the filler.
    pub block: u32,
    pub side: Option<EdgeSide>,
    /// Set on geometry that only applies to one placement of the finer level.
    pub orientation: Option<TrimOrientation>,
    pub first_index: u32,
    pub index_count: u32,
}

impl MeshSection {
    pub const fn triangle_count(&self) -> u32 {
        self.index_count / 3
    }
}

/// Per-draw push constants for the terrain pipeline.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawPushConstants {
    pub level: u32,
    pub patch_type: u32,
    pub block: u32,
    pub _pad: u32,
}

/// One indexed draw.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawCommand {
    pub first_index: u32,
    pub index_count: u32,
    pub push_constants: DrawPushConstants,
}

/// Built ring geometry.
#[derive(Clone, Debug)]
pub struct RingMesh {
    pub vertices: Vec<RingVertex>,
    pub indices: Vec<u32>,
    pub sections: Vec<MeshSection>,
    grid_size: u32,
    block_size: u32,
    hole: (u32, u32),
}

impl RingMesh {
    /// Cells per axis.
    pub const fn grid_size(&self) -> u32 {
        self.grid_size
    }

    pub const fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Edge of the level texture this mesh samples.
    pub const fn texture_size(&self) -> u32 {
        self.grid_size + 2
    }

    /// Hole span `[start, end)` in cells on both axes.
    pub const fn hole(&self) -> (u32, u32) {
        self.hole
    }

    /// Cells of this mesh covered by the finer level, as `(x0, z0, size)`.
    pub fn nested_rect(&self, orientation: TrimOrientation) -> (u32, u32, u32) {
        nested_rect(self.hole.0, self.grid_size, orientation)
    }

    /// Placement of level `level - 1` inside level `level` for a camera at
    /// level-0 sample `camera`. `None` for level 0, which has no finer level.
    pub fn nesting(&self, camera: SampleCoord, level: usize) -> Option<TrimOrientation> {
        let finer = level.checked_sub(1)?;
        let size = self.texture_size();
        TrimOrientation::between(
            desired_origin(camera, finer, size),
            desired_origin(camera, level, size),
            1 << level,
            self.hole.0,
        )
    }

    pub fn sections_of(&self, patch_type: PatchType) -> impl Iterator<Item = &MeshSection> {
        self.sections
            .iter()
            .filter(move |section| section.patch_type == patch_type)
    }

    /// Indices of one section.
    pub fn section_indices(&self, section: &MeshSection) -> &[u32] {
        let start = section.first_index as usize;
        &self.indices[start..start + section.index_count as usize]
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    /// Draws for one level.
    ///
    /// `nesting` is `None` for the finest level, which fills its hole.
    /// Coarser levels pass the finer level's placement and draw the matching
    /// interior trim, fixups and inner skirts instead.
    pub fn draw_list(&self, level: u32, nesting: Option<TrimOrientation>) -> Vec<DrawCommand> {
        let wanted: &[PatchType] = if nesting.is_none() {
            &[PatchType::Ring, PatchType::Trim, PatchType::Filler, PatchType::OuterSkirt]
        } else {
            &[
                PatchType::Ring,
                PatchType::Trim,
                PatchType::Fixup,
                PatchType::OuterSkirt,
                PatchType::InnerSkirt,
            ]
        };

        self.sections
            .iter()
            .filter(|section| {
                wanted.contains(&section.patch_type)
                    && section.index_count > 0
                    && (section.orientation.is_none() || section.orientation == nesting)
            })
            .map(|section| DrawCommand {
                first_index: section.first_index,
                index_count: section.index_count,
                push_constants: DrawPushConstants {
                    level,
                    patch_type: section.patch_type.as_u32(),
                    block: section.block,
                    _pad: 0,
                },
            })
            .collect()
    }
}

fn nested_rect(hole_start: u32, grid_size: u32, orientation: TrimOrientation) -> (u32, u32, u32) {
    (
        hole_start + u32::from(orientation.shift_x),
        hole_start + u32::from(orientation.shift_z),
        grid_size / 2,
    )
}

/// Builder for [`RingMesh`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RingMeshBuilder {
    grid_size: u32,
    block_size: u32,
    skirt_depth: f32,
}

impl Default for RingMeshBuilder {
    fn default() -> Self {
        Self {
            grid_size: DEFAULT_GRID_SIZE - 1,
            block_size: DEFAULT_BLOCK_SIZE,
            skirt_depth: DEFAULT_SKIRT_DEPTH,
        }
    }
}

impl RingMeshBuilder {
    /// Mesh of `grid_size` cells per axis; `grid_size + 2` must be a
    /// multiple of four.
    pub fn new(grid_size: u32) -> Self {
        Self {
            grid_size,
            ..Self::default()
        }
    }

    /// Mesh for the levels of `config`: one cell short of the level grid.
    pub fn for_clipmap(config: &ClipmapConfig) -> Self {
        Self::new(config.grid_size.saturating_sub(1))
    }

    pub const fn with_block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }

    pub const fn with_skirt_depth(mut self, depth: f32) -> Self {
        self.skirt_depth = depth;
        self
    }

    /// Hole span `[start, end)` in cells: a quarter of the texture in from
    /// the low edge, and one cell wider than the finer level.
    pub const fn hole(&self) -> (u32, u32) {
        let start = (self.grid_size + 2) / 4;
        (start, start + self.grid_size / 2 + 1)
    }

    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn build(&self) -> Result<RingMesh> {
        if self.grid_size < MIN_GRID_SIZE || (self.grid_size + 2) % 4 != 0 {
            return Err(Error::InvalidConfig(format!(
                "ring mesh grid size {} must be at least {MIN_GRID_SIZE} with grid size + 2 a multiple of 4",
                self.grid_size
            )));
        }
        if self.block_size == 0 {
            return Err(Error::InvalidConfig("ring mesh block size is zero".to_string()));
        }
        if !(self.skirt_depth.is_finite() && self.skirt_depth > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "skirt depth {} must be positive",
                self.skirt_depth
            )));
        }

        let mut mesh = MeshWriter::new(self.grid_size, self.hole(), self.skirt_depth);
        mesh.write_blocks(self.block_size);
        mesh.write_filler();
        for orientation in TrimOrientation::ALL {
            mesh.write_interior_trim(orientation);
            for side in EdgeSide::ALL {
                mesh.write_fixup(side, orientation);
            }
            for side in EdgeSide::ALL {
                mesh.write_inner_skirt(side, orientation);
            }
        }
        for side in EdgeSide::ALL {
            mesh.write_outer_skirt(side);
        }

        tracing::debug!(
            grid_size = self.grid_size,
            vertices = mesh.vertices.len(),
            triangles = mesh.indices.len() / 3,
            sections = mesh.sections.len(),
            "Built ring mesh"
        );

        Ok(RingMesh {
            vertices: mesh.vertices,
            indices: mesh.indices,
            sections: mesh.sections,
            grid_size: self.grid_size,
            block_size: self.block_size,
            hole: self.hole(),
        })
    }
}

struct MeshWriter {
    grid_size: u32,
    hole: (u32, u32),
    skirt_depth: f32,
    vertices: Vec<RingVertex>,
    indices: Vec<u32>,
    sections: Vec<MeshSection>,
}

impl MeshWriter {
    fn new(grid_size: u32, hole: (u32, u32), skirt_depth: f32) -> Self {
        let points = grid_size + 1;
        let vertices = (0..points)
            .flat_map(|z| (0..points).map(move |x| RingVertex::surface(x as f32, z as f32)))
            .collect();
        Self {
            grid_size,
            hole,
            skirt_depth,
            vertices,
            indices: Vec::new(),
            sections: Vec::new(),
        }
    }

    fn grid_index(&self, x: u32, z: u32) -> u32 {
        z * (self.grid_size + 1) + x
    }

    fn in_hole(&self, x: u32, z: u32) -> bool {
        let (start, end) = self.hole;
        (start..end).contains(&x) && (start..end).contains(&z)
    }

    fn push_vertex(&mut self, vertex: RingVertex) -> u32 {
        self.vertices.push(vertex);
        (self.vertices.len() - 1) as u32
    }

    fn push_quad(&mut self, a: u32, b: u32, c: u32, d: u32) {
        // a-b along the first edge, d-c along the opposite one
        self.indices.extend_from_slice(&[a, d, c, a, c, b]);
    }

    fn push_cell(&mut self, x: u32, z: u32) {
        let a = self.grid_index(x, z);
        let b = self.grid_index(x + 1, z);
        let c = self.grid_index(x + 1, z + 1);
        let d = self.grid_index(x, z + 1);
        self.push_quad(a, b, c, d);
    }

    fn finish_section(
        &mut self,
        patch_type: PatchType,
        block: u32,
        side: Option<EdgeSide>,
        orientation: Option<TrimOrientation>,
        first_index: usize,
    ) {
        self.sections.push(MeshSection {
            patch_type,
            block,
            side,
            orientation,
            first_index: first_index as u32,
            index_count: (self.indices.len() - first_index) as u32,
        });
    }

    fn write_blocks(&mut self, block_size: u32) {
        let per_axis = div_ceil_u32(self.grid_size, block_size);
        for bz in 0..per_axis {
            for bx in 0..per_axis {
                let xs = bx * block_size..((bx + 1) * block_size).min(self.grid_size);
                let zs = bz * block_size..((bz + 1) * block_size).min(self.grid_size);

                let cells = xs.len() * zs.len();
                let hidden = zs
                    .clone()
                    .flat_map(|z| xs.clone().map(move |x| (x, z)))
                    .filter(|&(x, z)| self.in_hole(x, z))
                    .count();
                if hidden == cells {
                    continue;
                }
                let patch_type = if hidden == 0 {
                    PatchType::Ring
                } else {
                    PatchType::Trim
                };

                let first = self.indices.len();
                for z in zs {
                    for x in xs.clone() {
                        if !self.in_hole(x, z) {
                            self.push_cell(x, z);
                        }
                    }
                }
                self.finish_section(patch_type, bz * per_axis + bx, None, None, first);
            }
        }
    }

    fn write_filler(&mut self) {
        let (start, end) = self.hole;
        let first = self.indices.len();
        for z in start..end {
            for x in start..end {
                self.push_cell(x, z);
            }
        }
        self.finish_section(PatchType::Filler, 0, None, None, first);
    }

    /// Hole cells left uncovered by the finer level.
    fn write_interior_trim(&mut self, orientation: TrimOrientation) {
        let (start, end) = self.hole;
        let (x0, z0, size) = nested_rect(start, self.grid_size, orientation);
        let nested = |x: u32, z: u32| (x0..x0 + size).contains(&x) && (z0..z0 + size).contains(&z);
        let first = self.indices.len();
        for z in start..end {
            for x in start..end {
                if !nested(x, z) {
                    self.push_cell(x, z);
                }
            }
        }
        self.finish_section(PatchType::Trim, orientation.index(), None, Some(orientation), first);
    }

    /// Grid points along one side of the square at `(x0, z0)` with edge `size`.
    fn side_points(side: EdgeSide, (x0, z0): (u32, u32), size: u32) -> Vec<(u32, u32)> {
        match side {
            EdgeSide::NegX => (0..=size).map(|k| (x0, z0 + k)).collect(),
            EdgeSide::PosX => (0..=size).map(|k| (x0 + size, z0 + k)).collect(),
            EdgeSide::NegZ => (0..=size).map(|k| (x0 + k, z0)).collect(),
            EdgeSide::PosZ => (0..=size).map(|k| (x0 + k, z0 + size)).collect(),
        }
    }

    fn nested_side_points(&self, side: EdgeSide, orientation: TrimOrientation) -> Vec<(u32, u32)> {
        let (x0, z0, size) = nested_rect(self.hole.0, self.grid_size, orientation);
        Self::side_points(side, (x0, z0), size)
    }

    /// Each coarse edge on the boundary shared with the finer level gets its
    /// midpoint, where the finer level has a vertex of its own.
    fn write_fixup(&mut self, side: EdgeSide, orientation: TrimOrientation) {
        let points = self.nested_side_points(side, orientation);
        let first = self.indices.len();
        for pair in points.windows(2) {
            let (ax, az) = pair[0];
            let (bx, bz) = pair[1];
            let a = self.grid_index(ax, az);
            let b = self.grid_index(bx, bz);
            let mid = self.push_vertex(RingVertex::surface(
                (ax + bx) as f32 * 0.5,
                (az + bz) as f32 * 0.5,
            ));
            self.indices.extend_from_slice(&[a, mid, b]);
        }
        self.finish_section(PatchType::Fixup, side as u32, Some(side), Some(orientation), first);
    }

    fn write_wall(&mut self, points: &[(u32, u32)], edge_dir: [f32; 2]) {
        let depth = self.skirt_depth;
        let mut previous: Option<(u32, u32)> = None;
        for &(x, z) in points {
            let top = self.push_vertex(RingVertex {
                position: [x as f32, 0.0, z as f32],
                edge_dir,
            });
            let bottom = self.push_vertex(RingVertex {
                position: [x as f32, -depth, z as f32],
                edge_dir,
            });
            if let Some((prev_top, prev_bottom)) = previous {
                self.push_quad(prev_top, top, bottom, prev_bottom);
            }
            previous = Some((top, bottom));
        }
    }

    fn write_outer_skirt(&mut self, side: EdgeSide) {
        let points = Self::side_points(side, (0, 0), self.grid_size);
        let first = self.indices.len();
        self.write_wall(&points, side.outward());
        self.finish_section(PatchType::OuterSkirt, side as u32, Some(side), None, first);
    }

    /// The wall on the finer level's boundary faces into it, away from this ring.
    fn write_inner_skirt(&mut self, side: EdgeSide, orientation: TrimOrientation) {
        let points = self.nested_side_points(side, orientation);
        let first = self.indices.len();
        self.write_wall(&points, side.inward());
        self.finish_section(PatchType::InnerSkirt, side as u32, Some(side), Some(orientation), first);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hashbrown::{HashMap, HashSet};

    /// Cell covered by a surface triangle.
    fn cell_of(mesh: &RingMesh, triangle: &[u32]) -> (u32, u32) {
        let x = triangle
            .iter()
            .map(|&i| mesh.vertices[i as usize].position[0])
            .fold(f32::INFINITY, f32::min);
        let z = triangle
            .iter()
            .map(|&i| mesh.vertices[i as usize].position[2])
            .fold(f32::INFINITY, f32::min);
        (x as u32, z as u32)
    }

    fn draw_indices<'a>(mesh: &'a RingMesh, draw: &DrawCommand) -> &'a [u32] {
        let start = draw.first_index as usize;
        &mesh.indices[start..start + draw.index_count as usize]
    }

    fn is_surface_draw(draw: &DrawCommand) -> bool {
        [PatchType::Ring, PatchType::Trim, PatchType::Filler]
            .iter()
            .any(|patch| patch.as_u32() == draw.push_constants.patch_type)
    }

    /// Every cell is drawn exactly once by this level's surface sections or,
    /// when nested, by the finer level.
    fn assert_covers_grid_once(mesh: &RingMesh, nesting: Option<TrimOrientation>) {
        let mut cells: HashMap<(u32, u32), usize> = HashMap::new();
        let mut triangles = HashSet::new();
        for draw in mesh.draw_list(0, nesting).iter().filter(|d| is_surface_draw(d)) {
            for triangle in draw_indices(mesh, draw).chunks_exact(3) {
                let mut key = [triangle[0], triangle[1], triangle[2]];
                key.sort_unstable();
                assert!(triangles.insert(key), "duplicate triangle {key:?}");
                *cells.entry(cell_of(mesh, triangle)).or_default() += 1;
            }
        }
        if let Some(orientation) = nesting {
            let (x0, z0, size) = mesh.nested_rect(orientation);
            for z in z0..z0 + size {
                for x in x0..x0 + size {
                    *cells.entry((x, z)).or_default() += 2;
                }
            }
        }

        let g = mesh.grid_size();
        assert_eq!(cells.len(), (g * g) as usize);
        for z in 0..g {
            for x in 0..g {
                assert_eq!(cells.get(&(x, z)), Some(&2), "cell ({x}, {z}) with {nesting:?}");
            }
        }
    }

    #[test]
    fn default_mesh_layout() {
        let mesh = RingMeshBuilder::default().build().unwrap();
        assert_eq!(mesh.grid_size(), 254);
        assert_eq!(mesh.texture_size(), 256);
        assert_eq!(mesh.hole(), (64, 192));
        // 16x16 blocks minus the 8x8 hidden by the hole, all aligned.
        assert_eq!(mesh.sections_of(PatchType::Ring).count(), 192);
        let trims: Vec<_> = mesh.sections_of(PatchType::Trim).collect();
        assert_eq!(trims.len(), 4);
        assert!(trims.iter().all(|trim| trim.orientation.is_some()));
        assert_eq!(mesh.sections_of(PatchType::Filler).count(), 1);
        assert_eq!(mesh.sections_of(PatchType::Fixup).count(), 16);
        assert_eq!(mesh.sections_of(PatchType::OuterSkirt).count(), 4);
        assert_eq!(mesh.sections_of(PatchType::InnerSkirt).count(), 16);

        assert_covers_grid_once(&mesh, None);
        for orientation in TrimOrientation::ALL {
            assert_covers_grid_once(&mesh, Some(orientation));
        }
    }

    #[test]
    fn interior_trim_is_one_cell_wide() {
        let mesh = RingMeshBuilder::new(30).build().unwrap();
        let (start, end) = mesh.hole();
        for orientation in TrimOrientation::ALL {
            let trim = mesh
                .sections_of(PatchType::Trim)
                .find(|s| s.orientation == Some(orientation))
                .unwrap();
            // Two full edges of the hole share one corner cell.
            let width = end - start;
            assert_eq!(trim.triangle_count(), 2 * (2 * width - 1));

            let trim_x = if orientation.shift_x { start } else { end - 1 };
            for triangle in mesh.section_indices(trim).chunks_exact(3) {
                let (x, z) = cell_of(&mesh, triangle);
                let trim_z = if orientation.shift_z { start } else { end - 1 };
                assert!(x == trim_x || z == trim_z, "cell ({x}, {z}) with {orientation:?}");
            }
        }
    }

    #[test]
    fn unaligned_hole_produces_trim() {
        let mesh = RingMeshBuilder::new(30).with_block_size(6).build().unwrap();
        assert_eq!(mesh.hole(), (8, 24));
        let straddling: Vec<_> = mesh
            .sections_of(PatchType::Trim)
            .filter(|s| s.orientation.is_none())
            .collect();
        assert!(!straddling.is_empty());
        assert!(straddling.iter().all(|s| s.index_count > 0));
        assert_covers_grid_once(&mesh, None);
        assert_covers_grid_once(&mesh, Some(TrimOrientation::new(true, false)));
    }

    #[test]
    fn sections_are_contiguous() {
        let mesh = RingMeshBuilder::new(62).build().unwrap();
        let mut next = 0;
        for section in &mesh.sections {
            assert_eq!(section.first_index, next);
            next += section.index_count;
        }
        assert_eq!(next as usize, mesh.indices.len());
        assert!(mesh.indices.iter().all(|&i| (i as usize) < mesh.vertices.len()));
    }

    #[test]
    fn fixups_are_zero_area_and_halve_edges() {
        let mesh = RingMeshBuilder::new(14).build().unwrap();
        for section in mesh.sections_of(PatchType::Fixup) {
            let (x0, z0, size) = mesh.nested_rect(section.orientation.unwrap());
            assert_eq!(section.triangle_count(), size);
            for triangle in mesh.section_indices(section).chunks_exact(3) {
                let [a, m, b] = [0, 1, 2].map(|k| mesh.vertices[triangle[k] as usize].position);
                for axis in [0, 2] {
                    assert!((m[axis] - (a[axis] + b[axis]) * 0.5).abs() < f32::EPSILON);
                }
                // Both ends lie on the finer level's boundary.
                for p in [a, b] {
                    let on_x = p[0] == x0 as f32 || p[0] == (x0 + size) as f32;
                    let on_z = p[2] == z0 as f32 || p[2] == (z0 + size) as f32;
                    assert!(on_x || on_z);
                }
            }
        }
    }

    #[test]
    fn skirts_hang_with_edge_direction() {
        let mesh = RingMeshBuilder::new(14).with_skirt_depth(2.5).build().unwrap();
        for section in mesh.sections_of(PatchType::OuterSkirt) {
            let side = section.side.unwrap();
            let indices = mesh.section_indices(section);
            assert_eq!(section.triangle_count(), 2 * 14);
            for &i in indices {
                let vertex = mesh.vertices[i as usize];
                assert_eq!(vertex.edge_dir, side.outward());
                assert!(vertex.position[1] == 0.0 || vertex.position[1] == -2.5);
            }
        }
        for section in mesh.sections_of(PatchType::InnerSkirt) {
            let side = section.side.unwrap();
            assert_eq!(section.triangle_count(), 2 * 7);
            let vertex = mesh.vertices[mesh.section_indices(section)[0] as usize];
            assert_eq!(vertex.edge_dir, side.inward());
        }
    }

    #[test]
    fn draw_lists_by_level() {
        let mesh = RingMeshBuilder::new(30).with_block_size(8).build().unwrap();
        let orientation = TrimOrientation::new(false, true);
        let finest = mesh.draw_list(0, None);
        let coarse = mesh.draw_list(3, Some(orientation));

        let types = |draws: &[DrawCommand]| -> HashSet<u32> {
            draws.iter().map(|d| d.push_constants.patch_type).collect()
        };
        assert!(types(&finest).contains(&PatchType::Filler.as_u32()));
        assert!(!types(&finest).contains(&PatchType::Fixup.as_u32()));
        assert!(!types(&finest).contains(&PatchType::InnerSkirt.as_u32()));
        assert!(types(&coarse).contains(&PatchType::Fixup.as_u32()));
        assert!(types(&coarse).contains(&PatchType::InnerSkirt.as_u32()));
        assert!(!types(&coarse).contains(&PatchType::Filler.as_u32()));
        assert!(coarse.iter().all(|d| d.push_constants.level == 3));

        let count = |draws: &[DrawCommand], patch: PatchType| {
            draws.iter().filter(|d| d.push_constants.patch_type == patch.as_u32()).count()
        };
        assert_eq!(count(&coarse, PatchType::Fixup), 4);
        assert_eq!(count(&coarse, PatchType::InnerSkirt), 4);
        // Only the matching interior trim is drawn.
        assert_eq!(
            coarse
                .iter()
                .filter(|d| d.push_constants.patch_type == PatchType::Trim.as_u32())
                .map(|d| d.push_constants.block)
                .collect::<Vec<_>>(),
            vec![orientation.index()]
        );
    }

    #[test]
    fn orientation_requires_nested_origins() {
        let coarse = SampleCoord::new(-64, -64);
        let placed = TrimOrientation::between(SampleCoord::new(-32, -30), coarse, 2, 16);
        assert_eq!(placed, Some(TrimOrientation::new(false, true)));
        assert_eq!(TrimOrientation::between(SampleCoord::new(-31, -32), coarse, 2, 16), None);
        assert_eq!(TrimOrientation::between(SampleCoord::new(-28, -32), coarse, 2, 16), None);
    }

    /// Finer and coarser levels placed for the same camera: the finer
    /// footprint plus the interior trim tile the hole exactly, and every
    /// fixup midpoint lands on a vertex of the finer level's boundary.
    #[test]
    fn adjacent_levels_nest_for_any_camera() {
        let mesh = RingMeshBuilder::new(30).build().unwrap();
        let g = i64::from(mesh.grid_size());
        let size = mesh.texture_size();
        let (hole_start, hole_end) = mesh.hole();
        let hole_cells: HashSet<(i64, i64)> = (hole_start..hole_end)
            .flat_map(|z| (hole_start..hole_end).map(move |x| (i64::from(x), i64::from(z))))
            .collect();

        let mut cameras: Vec<SampleCoord> = (-9..=9)
            .flat_map(|z| (-9..=9).map(move |x| SampleCoord::new(x, z)))
            .collect();
        cameras.extend([SampleCoord::new(1_000_003, -77_777), SampleCoord::new(-4_097, 8_191)]);

        for camera in cameras {
            for level in 1..=4 {
                let coarse_spacing = 1i64 << level;
                let fine_spacing = coarse_spacing / 2;
                let fine = desired_origin(camera, level - 1, size);
                let coarse = desired_origin(camera, level, size);
                let orientation = mesh
                    .nesting(camera, level)
                    .unwrap_or_else(|| panic!("level {level} not nested for {camera:?}"));

                // Finer footprint in coarse cells.
                assert_eq!((fine.x - coarse.x) % coarse_spacing, 0);
                assert_eq!((fine.y - coarse.y) % coarse_spacing, 0);
                let fx = (fine.x - coarse.x) / coarse_spacing;
                let fz = (fine.y - coarse.y) / coarse_spacing;
                let fine_cells = g * fine_spacing / coarse_spacing;

                let mut covered: HashMap<(i64, i64), usize> = HashMap::new();
                for z in fz..fz + fine_cells {
                    for x in fx..fx + fine_cells {
                        *covered.entry((x, z)).or_default() += 1;
                    }
                }
                let trim = mesh
                    .sections_of(PatchType::Trim)
                    .find(|s| s.orientation == Some(orientation))
                    .unwrap();
                let trim_cells: HashSet<(u32, u32)> =
                    mesh.section_indices(trim).chunks_exact(3).map(|t| cell_of(&mesh, t)).collect();
                for (x, z) in trim_cells {
                    *covered.entry((i64::from(x), i64::from(z))).or_default() += 1;
                }
                assert_eq!(
                    covered.keys().copied().collect::<HashSet<_>>(),
                    hole_cells,
                    "level {level} camera {camera:?}"
                );
                assert!(covered.values().all(|&n| n == 1), "overlap at level {level} camera {camera:?}");

                for draw in mesh.draw_list(level as u32, Some(orientation)) {
                    if draw.push_constants.patch_type != PatchType::Fixup.as_u32() {
                        continue;
                    }
                    for triangle in draw_indices(&mesh, &draw).chunks_exact(3) {
                        let mid = mesh.vertices[triangle[1] as usize].position;
                        // World samples of the midpoint, then finer-level vertex indices.
                        let wx = coarse.x * 2 + (mid[0] * 2.0) as i64 * coarse_spacing;
                        let wz = coarse.y * 2 + (mid[2] * 2.0) as i64 * coarse_spacing;
                        let kx = (wx - fine.x * 2) / (fine_spacing * 2);
                        let kz = (wz - fine.y * 2) / (fine_spacing * 2);
                        assert_eq!((wx - fine.x * 2) % (fine_spacing * 2), 0);
                        assert_eq!((wz - fine.y * 2) % (fine_spacing * 2), 0);
                        assert!((0..=g).contains(&kx) && (0..=g).contains(&kz));
                        assert!(kx == 0 || kx == g || kz == 0 || kz == g, "midpoint ({kx}, {kz}) off boundary");
                    }
                }
            }
        }
    }

    #[test]
    fn rejects_bad_parameters() {
        assert!(RingMeshBuilder::new(2).build().is_err());
        assert!(RingMeshBuilder::new(15).build().is_err());
        assert!(RingMeshBuilder::new(6).build().is_err());
        assert!(RingMeshBuilder::new(14).with_block_size(0).build().is_err());
        assert!(RingMeshBuilder::new(14).with_skirt_depth(0.0).build().is_err());
    }

    #[test]
    fn clipmap_mesh_matches_level_texture() {
        let config = ClipmapConfig::default();
        let mesh = RingMeshBuilder::for_clipmap(&config).build().unwrap();
        assert_eq!(mesh.texture_size(), config.texture_size());
    }
}
