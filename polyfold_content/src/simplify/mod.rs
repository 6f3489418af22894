//! Reduces the dense generated mesh to a budget that a real-time engine can handle.
//!
//! There are two strategies:
//!
//! * [`decimate_strategy`] collapses edges until a fraction of the faces remains. Used for
//!   static props because it keeps the silhouette and doesn't move the surface.
//! * [`remesh_strategy`] rebuilds the surface on a voxel grid and tries to turn it into a
//!   quad-dominant mesh with a [`QuadRemesher`]. When the remesher doesn't succeed, the voxel
//!   surface is decimated instead.
//!
//! ```text
//! voxel remesh ──► quad remesh ──Success──► done
//!                      │
//!                      └─Cancelled/Failed──► decimate ──► done
//! ```

pub mod cleanup;
pub mod decimate;
pub mod quad;
pub mod remesh;
pub mod voxel;

use polyfold_shared::{log::info, thiserror, Verbosity};
use serde::Serialize;

pub use decimate::{decimate, DecimateSummary};
pub use quad::{QuadRemesher, RemeshOutcome, VoxelQuadRemesher};

use crate::{
    config::{DecimateSettings, RemeshSettings},
    mesh::Mesh,
};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("The mesh has no polygons")]
    EmptyGeometry,
    #[error("No polygons are left after the cleanup")]
    NothingLeft,
    #[error("Decimation failed: {0}")]
    Decimation(String),
    #[error("The voxel remesh produced an empty surface")]
    VoxelRemeshEmpty,
}

/// Which state terminated the remesh strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemeshPath {
    QuadRemesh,
    DecimateFallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimplifyReport {
    pub polygons_before: usize,
    pub polygons_after: usize,
    /// `None` for the decimate strategy
    pub remesh_path: Option<RemeshPath>,
    pub warnings: Vec<String>,
}

/// Decimates the mesh to `settings.ratio` of its polygons.
pub fn decimate_strategy(mesh: &mut Mesh, settings: &DecimateSettings, verbosity: Verbosity) -> Result<SimplifyReport> {
    info!("Decimating to ratio {}", settings.ratio);
    let summary = decimate::decimate(mesh, settings, settings.ratio, verbosity)?;
    Ok(SimplifyReport {
        polygons_before: summary.polygons_before,
        polygons_after: summary.triangles_after,
        remesh_path: None,
        warnings: summary.warnings,
    })
}

/// Voxel remesh followed by a quad remesh attempt with decimation as fallback.
pub fn remesh_strategy(
    mesh: &mut Mesh,
    settings: &RemeshSettings,
    decimate_settings: &DecimateSettings,
    remesher: &dyn QuadRemesher,
    verbosity: Verbosity,
) -> Result<SimplifyReport> {
    remesh::remesh(mesh, settings, decimate_settings, remesher, verbosity)
}
