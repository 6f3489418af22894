//! Rebuilds a surface from a uniform grid of distances to the input.
//!
//! The grid stores the unsigned distance to the input triangles in a narrow band. Everything
//! that can be reached from the padded border without getting closer than half a cell to the
//! input is outside, the rest is inside. The boundary is extracted with surface nets which
//! places one vertex per cell and one quad per grid edge that crosses the boundary. The result
//! has no boundary edges, but where two inside cells only touch along an edge or a corner the
//! shared vertex or edge is non-manifold. The quad remesher cancels on such meshes.

use std::collections::VecDeque;

use polyfold_shared::{
    aabb::AABB,
    ahash::{HashMap, HashMapExt},
    detail,
    log::warn,
    nalgebra::Vector3,
    Verbosity,
};

use super::{Error, Result};
use crate::{bvh::closest_point_on_triangle, config::RemeshSettings, mesh::Mesh};

/// Number of cells that are added around the bounds of the input on every side.
const PADDING: usize = 2;

/// Distances are only computed within this many cells around a triangle.
const BAND_CELLS: f32 = 2.0;

/// Uniform grid of sample points.
#[derive(Debug, Clone, PartialEq)]
pub struct VoxelGrid {
    pub origin: Vector3<f32>,
    pub cell_size: f32,
    /// Number of sample points along every axis
    pub dimensions: [usize; 3],
}

impl VoxelGrid {
    /// Creates a grid that covers `bounds` with the given cell size. When more than
    /// `max_resolution` cells would be needed along an axis, the cell size is enlarged and the
    /// second return value is `true`.
    pub fn fit(bounds: &AABB, cell_size: f32, max_resolution: usize) -> (Self, bool) {
        let max_resolution = max_resolution.max(2 * PADDING + 4);
        let size = bounds.size();
        let longest = size.max();
        let mut cell_size = cell_size.max(f32::EPSILON);
        let mut enlarged = false;
        if (longest / cell_size).ceil() as usize + 2 * PADDING > max_resolution {
            cell_size = longest / (max_resolution - 2 * PADDING) as f32;
            enlarged = true;
        }
        let cells = size.map(|extent| (extent / cell_size).ceil().max(1.0) as usize + 2 * PADDING);
        let grid = Self {
            origin: bounds.min - Vector3::repeat(PADDING as f32 * cell_size),
            cell_size,
            dimensions: [cells.x + 1, cells.y + 1, cells.z + 1],
        };
        (grid, enlarged)
    }

    pub fn point_count(&self) -> usize {
        self.dimensions.iter().product()
    }

    pub fn index(&self, [i, j, k]: [usize; 3]) -> usize {
        i + self.dimensions[0] * (j + self.dimensions[1] * k)
    }

    pub fn coordinates(&self, index: usize) -> [usize; 3] {
        let [nx, ny, _] = self.dimensions;
        [index % nx, (index / nx) % ny, index / (nx * ny)]
    }

    pub fn point(&self, [i, j, k]: [usize; 3]) -> Vector3<f32> {
        self.origin + Vector3::new(i as f32, j as f32, k as f32) * self.cell_size
    }

    fn is_border(&self, [i, j, k]: [usize; 3]) -> bool {
        let [nx, ny, nz] = self.dimensions;
        i == 0 || j == 0 || k == 0 || i == nx - 1 || j == ny - 1 || k == nz - 1
    }

    /// Index range of the sample points whose distance to the box is at most `margin`.
    fn point_range(&self, bounds: &AABB, margin: f32, axis: usize) -> std::ops::RangeInclusive<usize> {
        let to_grid = |value: f32| (value - self.origin[axis]) / self.cell_size;
        let low = to_grid(bounds.min[axis] - margin).floor().max(0.0) as usize;
        let high = (to_grid(bounds.max[axis] + margin).ceil().max(0.0) as usize).min(self.dimensions[axis] - 1);
        low..=high
    }

    /// Samples the input and returns a field that is positive outside and non-positive inside.
    pub fn sample(&self, mesh: &Mesh) -> Vec<f32> {
        let mut distances = vec![f32::INFINITY; self.point_count()];
        let band = BAND_CELLS * self.cell_size;
        for triangle in mesh.triangles() {
            let positions = mesh.triangle_positions(&triangle);
            let bounds = AABB::from_slice(&positions);
            let (xs, ys, zs) = (
                self.point_range(&bounds, band, 0),
                self.point_range(&bounds, band, 1),
                self.point_range(&bounds, band, 2),
            );
            for k in zs {
                for j in ys.clone() {
                    for i in xs.clone() {
                        let point = self.point([i, j, k]);
                        let (closest, _) = closest_point_on_triangle(&point, &positions);
                        let distance = (closest - point).norm();
                        let index = self.index([i, j, k]);
                        if distance < distances[index] {
                            distances[index] = distance;
                        }
                    }
                }
            }
        }

        let iso = self.cell_size * 0.5;
        let outside = self.flood_outside(&distances, iso);
        distances
            .iter()
            .zip(outside)
            .map(|(distance, outside)| match (outside, *distance > iso) {
                (true, _) => distance - iso,
                (false, false) => distance - iso,
                (false, true) => -iso,
            })
            .collect()
    }

    /// Marks all points that are reachable from the border through points farther than `iso` from the input.
    fn flood_outside(&self, distances: &[f32], iso: f32) -> Vec<bool> {
        let mut outside = vec![false; distances.len()];
        let mut queue = VecDeque::new();
        for (index, distance) in distances.iter().enumerate() {
            if *distance > iso && self.is_border(self.coordinates(index)) {
                outside[index] = true;
                queue.push_back(index);
            }
        }
        while let Some(index) = queue.pop_front() {
            let [i, j, k] = self.coordinates(index);
            for axis in 0..3 {
                let coordinate = [i, j, k][axis];
                for neighbour_coordinate in [coordinate.wrapping_sub(1), coordinate + 1] {
                    if neighbour_coordinate >= self.dimensions[axis] {
                        continue;
                    }
                    let mut neighbour = [i, j, k];
                    neighbour[axis] = neighbour_coordinate;
                    let neighbour = self.index(neighbour);
                    if !outside[neighbour] && distances[neighbour] > iso {
                        outside[neighbour] = true;
                        queue.push_back(neighbour);
                    }
                }
            }
        }
        outside
    }

    /// Extracts the boundary between positive and non-positive samples. All quads face the positive side.
    pub fn surface_nets(&self, field: &[f32]) -> Mesh {
        let mut mesh = Mesh::new();
        let mut cell_vertices: HashMap<usize, u32> = HashMap::new();
        let [nx, ny, nz] = self.dimensions;

        for index in 0..field.len() {
            let start = self.coordinates(index);
            for axis in 0..3 {
                if start[axis] + 1 >= self.dimensions[axis] {
                    continue;
                }
                let mut end = start;
                end[axis] += 1;
                let (inside_start, inside_end) = (field[index] <= 0.0, field[self.index(end)] <= 0.0);
                if inside_start == inside_end {
                    continue;
                }

                // The four cells around the edge, counter-clockwise around the axis
                let (u, v) = ((axis + 1) % 3, (axis + 2) % 3);
                if start[u] == 0 || start[v] == 0 || start[u] >= [nx, ny, nz][u] - 1 || start[v] >= [nx, ny, nz][v] - 1 {
                    continue;
                }
                let cells = [(1, 1), (0, 1), (0, 0), (1, 0)].map(|(du, dv)| {
                    let mut cell = start;
                    cell[u] -= du;
                    cell[v] -= dv;
                    cell
                });
                let mut quad = cells.map(|cell| {
                    *cell_vertices.entry(self.index(cell)).or_insert_with(|| {
                        mesh.positions.push(self.cell_vertex(field, cell));
                        mesh.positions.len() as u32 - 1
                    })
                });
                if !inside_start {
                    quad.reverse();
                }
                mesh.push_polygon(&quad);
            }
        }
        mesh
    }

    /// Average of the points where the boundary crosses the edges of the cell.
    fn cell_vertex(&self, field: &[f32], cell: [usize; 3]) -> Vector3<f32> {
        let corner = |offset: usize| {
            let coordinates = [
                cell[0] + (offset & 1),
                cell[1] + ((offset >> 1) & 1),
                cell[2] + ((offset >> 2) & 1),
            ];
            (self.point(coordinates), field[self.index(coordinates)])
        };
        let mut sum = Vector3::zeros();
        let mut count = 0;
        for a in 0..8 {
            for bit in 0..3 {
                if a & (1 << bit) != 0 {
                    continue;
                }
                let (point_a, value_a) = corner(a);
                let (point_b, value_b) = corner(a | (1 << bit));
                if (value_a <= 0.0) == (value_b <= 0.0) {
                    continue;
                }
                let t = value_a / (value_a - value_b);
                sum += point_a + (point_b - point_a) * t.clamp(0.0, 1.0);
                count += 1;
            }
        }
        if count == 0 {
            self.point(cell) + Vector3::repeat(self.cell_size * 0.5)
        } else {
            sum / count as f32
        }
    }
}

/// Result of [`voxel_remesh`].
#[derive(Debug, Clone)]
pub struct VoxelRemesh {
    pub mesh: Mesh,
    /// Cell size that was actually used
    pub cell_size: f32,
    pub warnings: Vec<String>,
}

/// Rebuilds the surface of the mesh on a grid with the configured voxel size.
pub fn voxel_remesh(mesh: &Mesh, settings: &RemeshSettings, verbosity: Verbosity) -> Result<VoxelRemesh> {
    if mesh.is_empty() {
        return Err(Error::EmptyGeometry);
    }
    let mut warnings = Vec::new();
    let (grid, enlarged) = VoxelGrid::fit(&mesh.bounding_box(), settings.voxel_size, settings.max_resolution);
    if enlarged {
        let message = format!(
            "Voxel size {} needs more than {} voxels per axis, using {} instead",
            settings.voxel_size, settings.max_resolution, grid.cell_size
        );
        warn!("{message}");
        warnings.push(message);
    }
    detail!(verbosity, "Voxel grid {:?} with cell size {}", grid.dimensions, grid.cell_size);

    let field = grid.sample(mesh);
    let remeshed = grid.surface_nets(&field);
    if remeshed.is_empty() {
        return Err(Error::VoxelRemeshEmpty);
    }
    detail!(
        verbosity,
        "Voxel remesh: {} polygons -> {} quads",
        mesh.polygon_count(),
        remeshed.polygon_count()
    );
    Ok(VoxelRemesh {
        mesh: remeshed,
        cell_size: grid.cell_size,
        warnings,
    })
}
