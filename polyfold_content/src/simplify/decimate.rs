use polyfold_shared::{
    detail,
    log::{trace, warn},
    Verbosity,
};

use super::{cleanup, Error, Result};
use crate::{
    config::DecimateSettings,
    mesh::{AttributeDomain, Mesh, Polygon},
};

/// Allowed relative error for the error-bounded collapse. Large because the face budget is what counts.
const TARGET_ERROR: f32 = 0.5;

/// Outcome of [`decimate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecimateSummary {
    pub polygons_before: usize,
    pub triangles_after: usize,
    /// `true` if the topology-changing collapse was needed to reach the budget
    pub used_sloppy: bool,
    pub warnings: Vec<String>,
}

/// Number of triangles that remain after decimating `polygon_count` polygons with `ratio`.
pub fn target_triangle_count(polygon_count: usize, ratio: f32) -> usize {
    ((polygon_count as f32 * ratio.clamp(0.0, 1.0)).floor() as usize).max(1)
}

/// Triangulates, welds, reduces the face count to `ratio` of the input polygons and cleans up
/// the result. Corner attributes don't survive the collapse and are removed, point colors are kept.
pub fn decimate(mesh: &mut Mesh, settings: &DecimateSettings, ratio: f32, verbosity: Verbosity) -> Result<DecimateSummary> {
    if mesh.is_empty() {
        return Err(Error::EmptyGeometry);
    }
    let polygons_before = mesh.polygon_count();
    let mut warnings = Vec::new();

    let triangle_count = cleanup::triangulate(mesh);
    let welded = cleanup::weld(mesh, settings.weld_distance);
    detail!(
        verbosity,
        "Triangulated {polygons_before} polygons into {triangle_count} triangles and welded {welded} vertices"
    );

    let target = target_triangle_count(polygons_before, ratio);
    let (indices, used_sloppy) = collapse(mesh, target)?;
    if indices.is_empty() {
        let message = format!("Decimation to {target} triangles produced nothing, keeping the undecimated mesh");
        warn!("{message}");
        warnings.push(message);
    } else {
        let mut decimated = Mesh {
            positions: std::mem::take(&mut mesh.positions),
            color_attribute: mesh
                .color_attribute
                .take()
                .filter(|attribute| attribute.domain == AttributeDomain::Point),
            smooth_shading: mesh.smooth_shading,
            material: mesh.material.take(),
            ..Default::default()
        };
        decimated.polygons = (0..indices.len() as u32 / 3)
            .map(|triangle| Polygon {
                first_corner: triangle * 3,
                corner_count: 3,
            })
            .collect();
        decimated.corner_vertices = indices;
        *mesh = decimated;
        trace!("Collapsed {triangle_count} triangles into {}", mesh.polygon_count());
    }

    let tidied = cleanup::tidy(mesh, settings.weld_distance, settings.degenerate_threshold);
    detail!(verbosity, "Cleanup after decimation: {tidied:?}");

    if mesh.is_empty() {
        return Err(Error::NothingLeft);
    }
    Ok(DecimateSummary {
        polygons_before,
        triangles_after: mesh.polygon_count(),
        used_sloppy,
        warnings,
    })
}

/// Reduces the triangle list to `target` triangles. Tries the error-bounded collapse first and
/// falls back to the sloppy variant when it gets stuck above the budget.
fn collapse(mesh: &Mesh, target: usize) -> Result<(Vec<u32>, bool)> {
    if mesh.polygon_count() <= target {
        return Ok((mesh.corner_vertices.clone(), false));
    }
    let positions = mesh
        .positions
        .iter()
        .flat_map(|position| [position.x, position.y, position.z])
        .collect::<Vec<f32>>();
    let adapter = meshopt::VertexDataAdapter::new(bytemuck::cast_slice(&positions), 12, 0)
        .map_err(|err| Error::Decimation(err.to_string()))?;

    let target_index_count = target * 3;
    let indices = meshopt::simplify(&mesh.corner_vertices, &adapter, target_index_count, TARGET_ERROR);
    // Allow some slack because the collapse stops at the first edge that would exceed the budget
    if indices.len() <= target_index_count + target_index_count / 10 && !indices.is_empty() {
        return Ok((indices, false));
    }
    let sloppy = meshopt::simplify_sloppy(&mesh.corner_vertices, &adapter, target_index_count);
    if sloppy.is_empty() {
        Ok((indices, false))
    } else {
        Ok((sloppy, true))
    }
}

#[cfg(test)]
mod tests {
    use polyfold_shared::{ahash::HashSet, ByteColor4};

    use super::*;
    use crate::{mesh::ColorAttribute, primitives, simplify::cleanup::assert_clean};

    #[test]
    fn target_count() {
        assert_eq!(target_triangle_count(1000, 0.1), 100);
        assert_eq!(target_triangle_count(5, 0.1), 1);
        assert_eq!(target_triangle_count(1000, 2.0), 1000);
    }

    #[test]
    fn decimate_sphere() {
        let mut sphere = primitives::uv_sphere(1.0, 64, 32);
        let polygons_before = sphere.polygon_count();
        let summary = decimate(&mut sphere, &DecimateSettings::default(), 0.1, Verbosity::Verbose).unwrap();
        assert_eq!(summary.polygons_before, polygons_before);
        assert!(summary.triangles_after <= polygons_before / 10 + 1);
        assert!(summary.triangles_after > 0);
        assert!(summary.warnings.is_empty());
        assert!(sphere.polygons.iter().all(|polygon| polygon.corner_count == 3));
        assert_clean(&sphere, &DecimateSettings::default());
    }

    #[test]
    fn point_colors_survive_and_corner_attributes_are_dropped() {
        let mut sphere = primitives::uv_sphere(1.0, 32, 16);
        let colors = (0..sphere.vertex_count())
            .map(|index| ByteColor4::new(index as u8, 0, 0, 255))
            .collect::<Vec<_>>();
        sphere.color_attribute = Some(ColorAttribute {
            name: "Col".to_owned(),
            domain: AttributeDomain::Point,
            values: colors.clone(),
        });
        sphere.corner_uvs = Some(vec![Default::default(); sphere.corner_count()]);

        decimate(&mut sphere, &DecimateSettings::default(), 0.2, Verbosity::Quiet).unwrap();
        assert!(sphere.corner_uvs.is_none());
        let attribute = sphere.color_attribute.as_ref().unwrap();
        assert_eq!(attribute.values.len(), sphere.vertex_count());
        let original = colors.into_iter().collect::<HashSet<_>>();
        assert!(attribute.values.iter().all(|color| original.contains(color)));
    }

    #[test]
    fn small_mesh_is_kept() {
        let mut cube = primitives::cube(1.0);
        cleanup::triangulate(&mut cube);
        let summary = decimate(&mut cube, &DecimateSettings::default(), 1.0, Verbosity::Quiet).unwrap();
        assert_eq!(summary.triangles_after, 12);
        assert!(!summary.used_sloppy);
        assert!(cube.is_closed_manifold());
    }

    #[test]
    fn empty_mesh_fails() {
        let mut mesh = Mesh::new();
        assert!(matches!(
            decimate(&mut mesh, &DecimateSettings::default(), 0.1, Verbosity::Quiet),
            Err(Error::EmptyGeometry)
        ));
    }
}
