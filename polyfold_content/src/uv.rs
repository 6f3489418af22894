//! Angle-based UV projection.
//!
//! Faces are grouped by the direction they face. Every group is split into edge-connected
//! islands which are projected onto the plane perpendicular to their direction and packed into
//! the unit square. Islands never overlap, so the layout can be baked into.

use polyfold_shared::{
    detail,
    log::info,
    nalgebra::{Vector2, Vector3},
    thiserror, Verbosity,
};

use crate::{config::UvSettings, mesh::Mesh};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("The mesh has no polygons to unwrap")]
    EmptyGeometry,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UvReport {
    pub directions: usize,
    pub islands: usize,
    /// Factor from object space to UV space
    pub scale: f32,
}

/// Replaces the UV layout of the mesh with an angle-based projection.
pub fn smart_project(mesh: &mut Mesh, settings: &UvSettings, verbosity: Verbosity) -> Result<UvReport> {
    if mesh.polygon_count() == 0 {
        return Err(Error::EmptyGeometry);
    }
    let normals = mesh.face_normals();
    let directions = projection_directions(mesh, &normals, settings.angle_limit);
    let assignment = normals
        .iter()
        .map(|normal| {
            directions
                .iter()
                .enumerate()
                .map(|(index, direction)| (index, normal.dot(direction)))
                .fold((0, f32::MIN), |best, current| if current.1 > best.1 { current } else { best })
                .0
        })
        .collect::<Vec<_>>();
    let islands = islands(mesh, &assignment);
    detail!(
        verbosity,
        "{} projection directions, {} islands",
        directions.len(),
        islands.len()
    );

    let mut projected = islands
        .iter()
        .map(|polygons| Island::project(mesh, polygons, &directions[assignment[polygons[0] as usize]]))
        .collect::<Vec<_>>();
    let scale = pack(&mut projected, settings.island_margin);

    let mut uvs = vec![Vector2::zeros(); mesh.corner_count()];
    for island in &projected {
        for (corner, uv) in &island.corners {
            uvs[*corner as usize] = island.offset + (uv - island.min) * scale;
        }
    }
    mesh.corner_uvs = Some(uvs);

    info!("Unwrapped {} polygons into {} islands", mesh.polygon_count(), projected.len());
    Ok(UvReport {
        directions: directions.len(),
        islands: projected.len(),
        scale,
    })
}

/// Merges the face normals, largest faces first, into directions that are at least
/// `angle_limit` degrees apart.
fn projection_directions(mesh: &Mesh, normals: &[Vector3<f32>], angle_limit: f32) -> Vec<Vector3<f32>> {
    let cos_limit = angle_limit.to_radians().cos();
    let mut order = (0..mesh.polygon_count()).collect::<Vec<_>>();
    let areas = (0..mesh.polygon_count())
        .map(|index| mesh.polygon_area(index))
        .collect::<Vec<_>>();
    order.sort_by(|a, b| areas[*b].total_cmp(&areas[*a]));

    let mut sums: Vec<Vector3<f32>> = Vec::new();
    let mut directions: Vec<Vector3<f32>> = Vec::new();
    for index in order {
        let normal = normals[index];
        if normal == Vector3::zeros() {
            continue;
        }
        let matching = directions
            .iter()
            .position(|direction| direction.dot(&normal) >= cos_limit);
        match matching {
            Some(direction_index) => {
                sums[direction_index] += normal * areas[index];
                if let Some(direction) = sums[direction_index].try_normalize(f32::EPSILON) {
                    directions[direction_index] = direction;
                }
            }
            None => {
                sums.push(normal * areas[index]);
                directions.push(normal);
            }
        }
    }
    if directions.is_empty() {
        directions.push(Vector3::z());
    }
    directions
}

/// Splits the polygons into groups that share an edge and a projection direction.
fn islands(mesh: &Mesh, assignment: &[usize]) -> Vec<Vec<u32>> {
    let mut parents = (0..mesh.polygon_count() as u32).collect::<Vec<_>>();
    fn find(parents: &mut [u32], mut index: u32) -> u32 {
        while parents[index as usize] != index {
            parents[index as usize] = parents[parents[index as usize] as usize];
            index = parents[index as usize];
        }
        index
    }

    for polygons in mesh.edge_polygons().values() {
        let &[a, b] = polygons.as_slice() else {
            continue;
        };
        if assignment[a as usize] != assignment[b as usize] {
            continue;
        }
        let (root_a, root_b) = (find(&mut parents, a), find(&mut parents, b));
        if root_a != root_b {
            parents[root_a.max(root_b) as usize] = root_a.min(root_b);
        }
    }

    let mut island_of_root = vec![u32::MAX; parents.len()];
    let mut islands: Vec<Vec<u32>> = Vec::new();
    for polygon in 0..parents.len() as u32 {
        let root = find(&mut parents, polygon) as usize;
        if island_of_root[root] == u32::MAX {
            island_of_root[root] = islands.len() as u32;
            islands.push(Vec::new());
        }
        islands[island_of_root[root] as usize].push(polygon);
    }
    islands
}

/// Island projected onto its plane, before and after packing.
#[derive(Debug)]
struct Island {
    corners: Vec<(u32, Vector2<f32>)>,
    min: Vector2<f32>,
    size: Vector2<f32>,
    offset: Vector2<f32>,
}

impl Island {
    fn project(mesh: &Mesh, polygons: &[u32], direction: &Vector3<f32>) -> Self {
        // Right-handed frame so that faces pointing along the direction keep their winding
        let helper = if direction.x.abs() < 0.9 { Vector3::x() } else { Vector3::y() };
        let u = helper.cross(direction).normalize();
        let v = direction.cross(&u);

        let corners = polygons
            .iter()
            .flat_map(|polygon| mesh.polygon_corners(*polygon as usize))
            .map(|corner| {
                let position = mesh.corner_position(corner);
                (corner as u32, Vector2::new(position.dot(&u), position.dot(&v)))
            })
            .collect::<Vec<_>>();
        let (min, max) = corners.iter().fold(
            (Vector2::repeat(f32::MAX), Vector2::repeat(f32::MIN)),
            |(min, max), (_, uv)| (min.inf(uv), max.sup(uv)),
        );
        Self {
            corners,
            min,
            size: max - min,
            offset: Vector2::zeros(),
        }
    }
}

/// Places the islands on shelves in the unit square and returns the common scale.
fn pack(islands: &mut [Island], margin: f32) -> f32 {
    let margin = margin.clamp(0.0, 0.2);
    let area = islands
        .iter()
        .map(|island| (island.size.x + margin) * (island.size.y + margin))
        .sum::<f32>();
    let largest = islands
        .iter()
        .map(|island| island.size.max())
        .fold(f32::EPSILON, f32::max);
    let mut scale = (1.0 / area.max(f32::EPSILON).sqrt()).min((1.0 - 2.0 * margin) / largest);

    let mut order = (0..islands.len()).collect::<Vec<_>>();
    order.sort_by(|a, b| islands[*b].size.y.total_cmp(&islands[*a].size.y));

    for _ in 0..64 {
        let height = place(islands, &order, scale, margin);
        if height <= 1.0 {
            return scale;
        }
        scale *= (1.0 / height).sqrt().min(0.98);
    }

    // Shrink the whole layout, margins included, so that it fits
    let height = place(islands, &order, scale, margin);
    for island in islands.iter_mut() {
        island.offset /= height;
    }
    scale / height
}

/// Assigns offsets row by row and returns the used height.
fn place(islands: &mut [Island], order: &[usize], scale: f32, margin: f32) -> f32 {
    let mut cursor = Vector2::new(margin, margin);
    let mut shelf_height = 0.0f32;
    for index in order {
        let size = islands[*index].size * scale;
        if cursor.x + size.x + margin > 1.0 && cursor.x > margin {
            cursor = Vector2::new(margin, cursor.y + shelf_height + margin);
            shelf_height = 0.0;
        }
        islands[*index].offset = cursor;
        cursor.x += size.x + margin;
        shelf_height = shelf_height.max(size.y);
    }
    cursor.y + shelf_height + margin
}

#[cfg(test)]
mod tests {
    use polyfold_shared::aabb::AABB;

    use super::*;
    use crate::primitives;

    fn uv_bounds(mesh: &Mesh, polygon: usize) -> (Vector2<f32>, Vector2<f32>) {
        let uvs = mesh.corner_uvs.as_ref().unwrap();
        mesh.polygon_corners(polygon).fold(
            (Vector2::repeat(f32::MAX), Vector2::repeat(f32::MIN)),
            |(min, max), corner| (min.inf(&uvs[corner]), max.sup(&uvs[corner])),
        )
    }

    fn signed_uv_area(mesh: &Mesh, polygon: usize) -> f32 {
        let uvs = mesh.corner_uvs.as_ref().unwrap();
        let corners = mesh.polygon_corners(polygon).collect::<Vec<_>>();
        (0..corners.len())
            .map(|i| {
                let (a, b) = (uvs[corners[i]], uvs[corners[(i + 1) % corners.len()]]);
                a.x * b.y - b.x * a.y
            })
            .sum::<f32>()
            * 0.5
    }

    #[test]
    fn cube_gets_one_island_per_side() {
        let mut cube = primitives::cube(1.0);
        let report = smart_project(&mut cube, &UvSettings::default(), Verbosity::Verbose).unwrap();
        assert_eq!(report.directions, 6);
        assert_eq!(report.islands, 6);

        let bounds = (0..6).map(|polygon| uv_bounds(&cube, polygon)).collect::<Vec<_>>();
        for (i, (min_a, max_a)) in bounds.iter().enumerate() {
            assert!(min_a.x >= 0.0 && min_a.y >= 0.0 && max_a.x <= 1.0 && max_a.y <= 1.0);
            for (min_b, max_b) in &bounds[i + 1..] {
                let separated = max_a.x <= min_b.x || max_b.x <= min_a.x || max_a.y <= min_b.y || max_b.y <= min_a.y;
                assert!(separated);
            }
        }
    }

    #[test]
    fn sphere_layout_keeps_winding() {
        let mut sphere = primitives::uv_sphere(1.0, 24, 12);
        let report = smart_project(&mut sphere, &UvSettings::default(), Verbosity::Quiet).unwrap();
        assert!(report.directions >= 4);
        let uvs = sphere.corner_uvs.as_ref().unwrap();
        let bounds = AABB::from_slice(&uvs.iter().map(|uv| Vector3::new(uv.x, uv.y, 0.0)).collect::<Vec<_>>());
        assert!(bounds.min.x >= 0.0 && bounds.min.y >= 0.0);
        assert!(bounds.max.x <= 1.0 && bounds.max.y <= 1.0);
        for polygon in 0..sphere.polygon_count() {
            assert!(signed_uv_area(&sphere, polygon) >= 0.0);
        }
    }

    #[test]
    fn flat_grid_is_a_single_island() {
        let mut grid = primitives::grid(2.0, 4);
        let report = smart_project(&mut grid, &UvSettings::default(), Verbosity::Quiet).unwrap();
        assert_eq!(report.islands, 1);
        assert_eq!(report.directions, 1);
    }

    #[test]
    fn empty_mesh() {
        let result = smart_project(&mut Mesh::new(), &UvSettings::default(), Verbosity::Quiet);
        assert!(matches!(result, Err(Error::EmptyGeometry)));
    }
}
