use polyfold_shared::{
    detail,
    log::{info, warn},
    Verbosity,
};

use super::{
    cleanup, decimate,
    quad::{QuadRemesher, RemeshOutcome},
    voxel, Error, RemeshPath, Result, SimplifyReport,
};
use crate::{
    config::{DecimateSettings, RemeshSettings},
    mesh::Mesh,
};

/// States of the remesh strategy. Every run starts in `Voxel` and ends in `Done`.
#[derive(Debug)]
enum RemeshState {
    /// Rebuild the surface on a voxel grid
    Voxel,
    /// Try to turn the voxel surface into a quad-dominant mesh
    Quad(Mesh),
    /// Decimate the voxel surface because the quad remesh didn't succeed
    Fallback { voxel_mesh: Mesh, reason: String },
    Done(RemeshPath),
}

/// Runs the remesh state machine on `mesh` and marks the result for smooth shading.
pub fn remesh(
    mesh: &mut Mesh,
    settings: &RemeshSettings,
    decimate_settings: &DecimateSettings,
    remesher: &dyn QuadRemesher,
    verbosity: Verbosity,
) -> Result<SimplifyReport> {
    if mesh.is_empty() {
        return Err(Error::EmptyGeometry);
    }
    let polygons_before = mesh.polygon_count();
    let material = mesh.material.clone();
    let mut warnings = Vec::new();

    let mut state = RemeshState::Voxel;
    let path = loop {
        state = match state {
            RemeshState::Voxel => {
                info!("Voxel remesh with voxel size {}", settings.voxel_size);
                let result = voxel::voxel_remesh(mesh, settings, verbosity)?;
                warnings.extend(result.warnings);
                RemeshState::Quad(result.mesh)
            }
            RemeshState::Quad(mut voxel_mesh) => {
                let welded = cleanup::weld(&mut voxel_mesh, decimate_settings.weld_distance);
                let filled = cleanup::fill_holes(&mut voxel_mesh);
                let loose = cleanup::delete_loose(&mut voxel_mesh);
                let flipped = cleanup::make_normals_consistent(&mut voxel_mesh);
                detail!(
                    verbosity,
                    "Voxel mesh cleanup: {welded} welded, {filled} holes filled, {loose} loose vertices, {flipped} flipped"
                );

                info!("Quad remesh with {} targeting {} faces", remesher.name(), settings.target_faces);
                match remesher.remesh(&voxel_mesh, settings.target_faces, verbosity) {
                    RemeshOutcome::Success(mut remeshed) => {
                        // Projected vertices can collapse onto each other on thin features
                        let tidied = cleanup::tidy(
                            &mut remeshed,
                            decimate_settings.weld_distance,
                            decimate_settings.degenerate_threshold,
                        );
                        detail!(verbosity, "Cleanup after quad remesh: {tidied:?}");
                        if remeshed.is_empty() {
                            RemeshState::Fallback {
                                voxel_mesh,
                                reason: "produced only degenerate faces".to_owned(),
                            }
                        } else {
                            *mesh = remeshed;
                            RemeshState::Done(RemeshPath::QuadRemesh)
                        }
                    }
                    RemeshOutcome::Cancelled(reason) => RemeshState::Fallback {
                        voxel_mesh,
                        reason: format!("cancelled: {reason}"),
                    },
                    RemeshOutcome::Failed(reason) => RemeshState::Fallback {
                        voxel_mesh,
                        reason: format!("failed: {reason}"),
                    },
                }
            }
            RemeshState::Fallback { voxel_mesh, reason } => {
                let message = format!(
                    "Quad remesh {reason}. Falling back to decimation with ratio {}",
                    settings.fallback_ratio
                );
                warn!("{message}");
                warnings.push(message);

                *mesh = voxel_mesh;
                let summary = decimate::decimate(mesh, decimate_settings, settings.fallback_ratio, verbosity)?;
                warnings.extend(summary.warnings);
                RemeshState::Done(RemeshPath::DecimateFallback)
            }
            RemeshState::Done(path) => break path,
        };
    };

    mesh.material = material;
    mesh.smooth_shading = true;
    Ok(SimplifyReport {
        polygons_before,
        polygons_after: mesh.polygon_count(),
        remesh_path: Some(path),
        warnings,
    })
}
