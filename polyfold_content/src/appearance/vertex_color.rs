use polyfold_shared::{
    detail,
    log::warn,
    nalgebra::{Vector3, Vector4},
    ByteColor4, Verbosity,
};

use super::{Error, Result};
use crate::{
    bvh::{Bvh, Hit},
    io::obj::COLOR_ATTRIBUTE_NAME,
    material::Material,
    mesh::{AttributeDomain, ColorAttribute, Mesh},
};

pub const MATERIAL_NAME: &str = "Vertex_Color_Mat";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferSummary {
    pub ray_hits: usize,
    /// Corners for which no ray hit the source and the closest point was used
    pub closest_point_fallbacks: usize,
    pub warnings: Vec<String>,
}

/// Samples the colors of `source` for every corner of `target` and stores them in a corner
/// color attribute. The material of `target` is replaced by one that reads the attribute.
pub fn transfer_vertex_colors(source: &Mesh, target: &mut Mesh, verbosity: Verbosity) -> Result<TransferSummary> {
    if source.is_empty() {
        return Err(Error::MissingSource);
    }
    if target.is_empty() {
        return Err(Error::MissingTarget);
    }

    let attribute_name = target
        .color_attribute
        .as_ref()
        .map(|attribute| attribute.name.clone())
        .unwrap_or_else(|| COLOR_ATTRIBUTE_NAME.to_owned());
    let mut colors = vec![ByteColor4::WHITE; target.corner_count()];
    let mut summary = TransferSummary::default();

    if source.color_attribute.is_none() {
        let message = "The source has no color data, the target will be white".to_owned();
        warn!("{message}");
        summary.warnings.push(message);
    } else {
        let bvh = Bvh::new(source);
        let max_distance = source.bounding_box().size().norm() + target.bounding_box().size().norm();
        for polygon_index in 0..target.polygon_count() {
            let normal = target.polygon_normal(polygon_index);
            for corner in target.polygon_corners(polygon_index) {
                let position = target.corner_position(corner);
                let Some((hit, by_ray)) = nearest_along_normal(&bvh, &position, &normal, max_distance) else {
                    continue;
                };
                if by_ray {
                    summary.ray_hits += 1;
                } else {
                    summary.closest_point_fallbacks += 1;
                }
                let color = hit.interpolate(|source_corner| {
                    source
                        .corner_color(source_corner)
                        .map_or(Vector4::repeat(1.0), ByteColor4::to_linear)
                });
                colors[corner] = ByteColor4::from_linear(&color);
            }
        }
        detail!(
            verbosity,
            "Color transfer: {} ray hits, {} closest point fallbacks",
            summary.ray_hits,
            summary.closest_point_fallbacks
        );
    }

    target.color_attribute = Some(ColorAttribute {
        name: attribute_name.clone(),
        domain: AttributeDomain::Corner,
        values: colors,
    });
    target.material = Some(Material::from_color_attribute(MATERIAL_NAME, attribute_name));
    Ok(summary)
}

/// Casts along the normal in both directions and returns the nearer hit. Falls back to the
/// closest point of the surface. The flag is `true` when a ray hit.
fn nearest_along_normal(
    bvh: &Bvh,
    position: &Vector3<f32>,
    normal: &Vector3<f32>,
    max_distance: f32,
) -> Option<(Hit, bool)> {
    if *normal != Vector3::zeros() {
        let forward = bvh.cast_ray(position, normal, max_distance);
        let backward = bvh.cast_ray(position, &-normal, max_distance);
        let nearest = match (forward, backward) {
            (Some(a), Some(b)) => Some(if a.distance <= b.distance { a } else { b }),
            (a, b) => a.or(b),
        };
        if let Some(hit) = nearest {
            return Some((hit, true));
        }
    }
    bvh.closest_point(position).map(|hit| (hit, false))
}

#[cfg(test)]
mod tests {
    use polyfold_shared::nalgebra::Vector3;

    use super::*;
    use crate::{material::BaseColor, primitives};

    /// Sphere that is red on the upper and blue on the lower half.
    fn two_colored_sphere(radius: f32) -> Mesh {
        let mut sphere = primitives::uv_sphere(radius, 32, 16);
        let values = sphere
            .positions
            .iter()
            .map(|position| {
                if position.z >= 0.0 {
                    ByteColor4::new(255, 0, 0, 255)
                } else {
                    ByteColor4::new(0, 0, 255, 255)
                }
            })
            .collect();
        sphere.color_attribute = Some(ColorAttribute {
            name: "Col".to_owned(),
            domain: AttributeDomain::Point,
            values,
        });
        sphere
    }

    #[test]
    fn colors_follow_the_source() {
        let source = two_colored_sphere(1.0);
        let mut target = primitives::uv_sphere(0.95, 12, 6);
        let summary = transfer_vertex_colors(&source, &mut target, Verbosity::Verbose).unwrap();
        assert!(summary.warnings.is_empty());
        assert_eq!(summary.ray_hits + summary.closest_point_fallbacks, target.corner_count());

        let attribute = target.color_attribute.as_ref().unwrap();
        assert_eq!(attribute.domain, AttributeDomain::Corner);
        assert_eq!(attribute.name, "Col");
        assert_eq!(attribute.values.len(), target.corner_count());
        for corner in 0..target.corner_count() {
            let position = target.corner_position(corner);
            let color = attribute.values[corner];
            if position.z > 0.3 {
                assert_eq!(color, ByteColor4::new(255, 0, 0, 255));
            } else if position.z < -0.3 {
                assert_eq!(color, ByteColor4::new(0, 0, 255, 255));
            }
        }
        let material = target.material.as_ref().unwrap();
        assert_eq!(material.base_color, BaseColor::Attribute("Col".to_owned()));
    }

    #[test]
    fn missing_source_colors_make_the_target_white() {
        let source = primitives::uv_sphere(1.0, 16, 8);
        let mut target = primitives::cube(1.0);
        let summary = transfer_vertex_colors(&source, &mut target, Verbosity::Quiet).unwrap();
        assert_eq!(summary.warnings.len(), 1);
        let attribute = target.color_attribute.as_ref().unwrap();
        assert!(attribute.values.iter().all(|color| *color == ByteColor4::WHITE));
    }

    #[test]
    fn existing_attribute_name_is_kept() {
        let source = two_colored_sphere(1.0);
        let mut target = primitives::cube(1.0);
        target.color_attribute = Some(ColorAttribute {
            name: "Paint".to_owned(),
            domain: AttributeDomain::Point,
            values: vec![ByteColor4::BLACK; target.vertex_count()],
        });
        transfer_vertex_colors(&source, &mut target, Verbosity::Quiet).unwrap();
        let attribute = target.color_attribute.as_ref().unwrap();
        assert_eq!(attribute.name, "Paint");
        assert_eq!(attribute.domain, AttributeDomain::Corner);
    }

    #[test]
    fn closest_point_when_rays_miss() {
        let source = two_colored_sphere(1.0);
        // A triangle far above the sphere whose normal points away from it
        let mut target = Mesh::from_polygons(
            vec![
                Vector3::new(5.0, 0.0, 5.0),
                Vector3::new(6.0, 0.0, 5.0),
                Vector3::new(5.0, 0.0, 6.0),
            ],
            [[0, 1, 2]],
        );
        let summary = transfer_vertex_colors(&source, &mut target, Verbosity::Quiet).unwrap();
        assert_eq!(summary.closest_point_fallbacks, 3);
        let attribute = target.color_attribute.as_ref().unwrap();
        assert!(attribute.values.iter().all(|color| *color == ByteColor4::new(255, 0, 0, 255)));
    }

    #[test]
    fn empty_meshes() {
        let mut target = primitives::cube(1.0);
        assert!(matches!(
            transfer_vertex_colors(&Mesh::new(), &mut target, Verbosity::Quiet),
            Err(Error::MissingSource)
        ));
        assert!(matches!(
            transfer_vertex_colors(&primitives::cube(1.0), &mut Mesh::new(), Verbosity::Quiet),
            Err(Error::MissingTarget)
        ));
    }
}
