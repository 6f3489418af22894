use polyfold_shared::{
    detail,
    log::{info, trace},
    Verbosity,
};

use super::voxel::VoxelGrid;
use crate::{bvh::Bvh, mesh::Mesh};

/// Result of a [`QuadRemesher`] call. A remesher never hands out a partial result.
#[derive(Debug, Clone)]
pub enum RemeshOutcome {
    Success(Mesh),
    Cancelled(String),
    Failed(String),
}

impl RemeshOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RemeshOutcome::Success(_))
    }
}

/// Rebuilds a closed surface as a quad-dominant mesh with roughly `target_faces` faces.
///
/// The call blocks until the remesher is done.
pub trait QuadRemesher: Send + Sync {
    fn name(&self) -> &str;

    fn remesh(&self, mesh: &Mesh, target_faces: usize, verbosity: Verbosity) -> RemeshOutcome;
}

/// Quad remesher that resamples the surface on a grid whose cell size is chosen from the face
/// budget and projects the vertices of the extracted surface back onto the input.
#[derive(Debug, Clone)]
pub struct VoxelQuadRemesher {
    /// Relative deviation from the face budget that is still accepted
    pub tolerance: f32,
    pub max_iterations: usize,
    pub max_resolution: usize,
}

impl Default for VoxelQuadRemesher {
    fn default() -> Self {
        Self {
            tolerance: 0.5,
            max_iterations: 3,
            max_resolution: 256,
        }
    }
}

/// Quads per squared cell size on a curved surface. Surface nets produce more quads than a
/// surface aligned with the grid would need.
const QUAD_DENSITY: f32 = 1.5;

impl VoxelQuadRemesher {
    fn extract(&self, mesh: &Mesh, bvh: &Bvh, cell_size: f32) -> Mesh {
        let (grid, _) = VoxelGrid::fit(&mesh.bounding_box(), cell_size, self.max_resolution);
        let field = grid.sample(mesh);
        let mut quads = grid.surface_nets(&field);
        for position in &mut quads.positions {
            if let Some(hit) = bvh.closest_point(position) {
                *position = hit.point;
            }
        }
        quads
    }
}

impl QuadRemesher for VoxelQuadRemesher {
    fn name(&self) -> &str {
        "voxel quad remesher"
    }

    fn remesh(&self, mesh: &Mesh, target_faces: usize, verbosity: Verbosity) -> RemeshOutcome {
        if mesh.is_empty() || target_faces == 0 {
            return RemeshOutcome::Cancelled("nothing to remesh".to_owned());
        }
        if !mesh.is_closed_manifold() {
            return RemeshOutcome::Cancelled("input is not a closed manifold".to_owned());
        }

        let target = target_faces as f32;
        let bvh = Bvh::new(mesh);
        let mut cell_size = (QUAD_DENSITY * mesh.surface_area() / target).sqrt();
        let mut best: Option<Mesh> = None;
        for iteration in 0..self.max_iterations.max(1) {
            let quads = self.extract(mesh, &bvh, cell_size);
            let count = quads.polygon_count();
            trace!("Iteration {iteration}: cell size {cell_size} produced {count} quads");
            if count == 0 {
                break;
            }
            let deviation = |mesh: &Mesh| (mesh.polygon_count() as f32 / target - 1.0).abs();
            if best.as_ref().map_or(true, |best| deviation(&quads) < deviation(best)) {
                best = Some(quads);
            }
            if (count as f32 / target - 1.0).abs() <= self.tolerance * 0.25 {
                break;
            }
            cell_size *= (count as f32 / target).sqrt();
        }

        let Some(quads) = best else {
            return RemeshOutcome::Failed("remeshing produced no faces".to_owned());
        };
        let count = quads.polygon_count();
        if !quads.is_closed_manifold() {
            return RemeshOutcome::Failed("remeshed surface is not closed".to_owned());
        }
        if (count as f32 / target - 1.0).abs() > self.tolerance {
            return RemeshOutcome::Failed(format!(
                "{count} faces miss the budget of {target_faces} by more than {}%",
                self.tolerance * 100.0
            ));
        }
        detail!(verbosity, "{} produced {count} faces for a budget of {target_faces}", self.name());
        info!("Quad remesh produced {count} faces");
        RemeshOutcome::Success(quads)
    }
}

#[cfg(test)]
mod tests {
    use polyfold_shared::nalgebra::Vector3;

    use super::*;
    use crate::{primitives, simplify::cleanup};

    #[test]
    fn sphere_meets_budget() {
        let sphere = primitives::uv_sphere(1.0, 32, 16);
        let remesher = VoxelQuadRemesher::default();
        let RemeshOutcome::Success(quads) = remesher.remesh(&sphere, 600, Verbosity::Verbose) else {
            panic!("expected the remesh to succeed");
        };
        assert!(quads.is_closed_manifold());
        assert!(quads.polygons.iter().all(|polygon| polygon.corner_count == 4));
        assert!(quads.polygon_count() >= 300 && quads.polygon_count() <= 900);
        for position in &quads.positions {
            assert!((position.norm() - 1.0).abs() < 0.05);
        }
    }

    #[test]
    fn open_input_is_cancelled() {
        let grid = primitives::grid(1.0, 4);
        let outcome = VoxelQuadRemesher::default().remesh(&grid, 100, Verbosity::Quiet);
        assert!(matches!(outcome, RemeshOutcome::Cancelled(_)));
    }

    #[test]
    fn cubes_touching_along_an_edge_are_cancelled() {
        // Same shape as two voxels that only touch diagonally
        let mut cubes = primitives::cube(1.0);
        let offset = cubes.vertex_count() as u32;
        let second = primitives::cube(1.0);
        cubes
            .positions
            .extend(second.positions.iter().map(|position| position + Vector3::new(1.0, 1.0, 0.0)));
        for polygon_index in 0..second.polygon_count() {
            let vertices = second
                .polygon_vertices(polygon_index)
                .iter()
                .map(|vertex| vertex + offset)
                .collect::<Vec<_>>();
            cubes.push_polygon(&vertices);
        }
        cleanup::weld(&mut cubes, 0.001);
        assert_eq!(cubes.vertex_count(), 14);

        let outcome = VoxelQuadRemesher::default().remesh(&cubes, 100, Verbosity::Quiet);
        assert!(matches!(outcome, RemeshOutcome::Cancelled(_)));
    }

    #[test]
    fn unreachable_budget_fails() {
        let cube = primitives::cube(1.0);
        let outcome = VoxelQuadRemesher::default().remesh(&cube, 1, Verbosity::Quiet);
        assert!(matches!(outcome, RemeshOutcome::Failed(_)));
        assert!(!outcome.is_success());
    }
}
