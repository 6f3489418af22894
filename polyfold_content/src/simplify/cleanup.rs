//! Topology cleanup operations that the simplification strategies are built from.

use std::collections::VecDeque;

use polyfold_shared::{
    ahash::{HashMap, HashMapExt, HashSet, HashSetExt},
    nalgebra::Vector3,
};

use crate::mesh::{polygon_edges, undirected, Mesh, REMOVED};

/// Merges vertices that are closer than `distance`. The first vertex of a cluster keeps its
/// position. Polygons that lose corners are shrunk and removed when fewer than 3 corners remain.
/// Returns the number of removed vertices.
pub fn weld(mesh: &mut Mesh, distance: f32) -> usize {
    if mesh.vertex_count() == 0 {
        return 0;
    }
    let distance = distance.max(f32::EPSILON);
    let distance_squared = distance * distance;
    let cell_of = |position: &Vector3<f32>| (position / distance).map(|c| c.floor() as i64);

    let mut cells: HashMap<Vector3<i64>, Vec<u32>> = HashMap::with_capacity(mesh.vertex_count());
    let mut remap = vec![REMOVED; mesh.vertex_count()];
    let mut representatives = 0u32;
    for (index, position) in mesh.positions.iter().enumerate() {
        let cell = cell_of(position);
        let mut found = None;
        'search: for dz in -1..=1 {
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let Some(candidates) = cells.get(&(cell + Vector3::new(dx, dy, dz))) else {
                        continue;
                    };
                    for candidate in candidates {
                        if (mesh.positions[*candidate as usize] - position).norm_squared() <= distance_squared {
                            found = Some(remap[*candidate as usize]);
                            break 'search;
                        }
                    }
                }
            }
        }
        remap[index] = match found {
            Some(representative) => representative,
            None => {
                cells.entry(cell).or_insert_with(Vec::new).push(index as u32);
                representatives += 1;
                representatives - 1
            }
        };
    }

    let removed = mesh.vertex_count() - representatives as usize;
    if removed > 0 {
        mesh.remap_vertices(&remap, representatives as usize);
        collapse_repeated_corners(mesh);
    }
    removed
}

/// Removes corners that reference the same vertex as the previous corner of the polygon and
/// removes polygons with fewer than 3 corners. Returns the number of removed polygons.
pub fn collapse_repeated_corners(mesh: &mut Mesh) -> usize {
    let mut changed = false;
    let mut polygons = Vec::with_capacity(mesh.polygon_count());
    for polygon_index in 0..mesh.polygon_count() {
        let corners = mesh.polygon_corners(polygon_index);
        let count = corners.len();
        let kept = corners
            .clone()
            .filter(|corner| {
                let previous = corners.start + (corner - corners.start + count - 1) % count;
                mesh.corner_vertices[*corner] != mesh.corner_vertices[previous]
            })
            .map(|corner| corner as u32)
            .collect::<Vec<_>>();
        changed |= kept.len() != count;
        if kept.len() >= 3 {
            polygons.push(kept);
        }
    }
    let removed = mesh.polygon_count() - polygons.len();
    if changed {
        mesh.rebuild_from_corners(&polygons);
    }
    removed
}

/// Splits every polygon into triangles. Returns the number of triangles.
pub fn triangulate(mesh: &mut Mesh) -> usize {
    let triangles = (0..mesh.polygon_count())
        .flat_map(|polygon_index| mesh.triangulate_polygon(polygon_index))
        .collect::<Vec<_>>();
    mesh.rebuild_from_corners(&triangles);
    triangles.len()
}

/// Removes polygons whose area is at most `threshold`². Returns the number of removed polygons.
pub fn delete_degenerate(mesh: &mut Mesh, threshold: f32) -> usize {
    let minimum_area = threshold * threshold;
    mesh.retain_polygons(|mesh, index| mesh.polygon_area(index) > minimum_area)
}

/// Removes vertices that no polygon uses. Returns the number of removed vertices.
pub fn delete_loose(mesh: &mut Mesh) -> usize {
    mesh.remove_unreferenced_vertices()
}

/// Closes every boundary loop with a single polygon, regardless of its number of sides.
/// Returns the number of added polygons.
pub fn fill_holes(mesh: &mut Mesh) -> usize {
    let edges = mesh.edge_polygons();
    // A boundary edge a->b of a polygon becomes b->a in the polygon that fills the hole
    let mut next: HashMap<u32, Vec<u32>> = HashMap::new();
    for polygon_index in 0..mesh.polygon_count() {
        for (a, b) in polygon_edges(mesh.polygon_vertices(polygon_index)) {
            if edges.get(&undirected(a, b)).map_or(false, |polygons| polygons.len() == 1) {
                next.entry(b).or_insert_with(Vec::new).push(a);
            }
        }
    }

    let mut starts = next.keys().copied().collect::<Vec<_>>();
    starts.sort_unstable();
    let mut holes = Vec::new();
    for start in starts {
        while let Some(mut current) = next.get_mut(&start).and_then(Vec::pop) {
            let mut hole = vec![start];
            let mut closed = false;
            for _ in 0..=mesh.vertex_count() {
                if current == start {
                    closed = true;
                    break;
                }
                hole.push(current);
                match next.get_mut(&current).and_then(Vec::pop) {
                    Some(following) => current = following,
                    None => break,
                }
            }
            if closed && hole.len() >= 3 {
                holes.push(hole);
            }
        }
    }

    for hole in &holes {
        mesh.push_polygon(hole);
    }
    holes.len()
}

/// Orients all polygons of an edge-connected component consistently and then flips components
/// whose enclosed volume is negative so that normals point outwards. Returns the number of
/// flipped polygons.
pub fn make_normals_consistent(mesh: &mut Mesh) -> usize {
    let polygon_count = mesh.polygon_count();
    let edges = mesh.edge_polygons();
    let mut flip = vec![false; polygon_count];
    let mut visited = vec![false; polygon_count];

    for seed in 0..polygon_count {
        if visited[seed] {
            continue;
        }
        visited[seed] = true;
        let mut component = vec![seed];
        let mut queue = VecDeque::from([seed]);
        while let Some(polygon_index) = queue.pop_front() {
            let vertices = mesh.polygon_vertices(polygon_index);
            for (a, b) in polygon_edges(vertices) {
                let Some(neighbours) = edges.get(&undirected(a, b)) else {
                    continue;
                };
                for neighbour in neighbours.iter().map(|n| *n as usize) {
                    if visited[neighbour] {
                        continue;
                    }
                    visited[neighbour] = true;
                    // Consistent neighbours traverse the shared edge in the opposite direction
                    let same_direction = has_directed_edge(mesh.polygon_vertices(neighbour), a, b);
                    flip[neighbour] = flip[polygon_index] ^ same_direction;
                    component.push(neighbour);
                    queue.push_back(neighbour);
                }
            }
        }

        let volume = component
            .iter()
            .map(|polygon_index| {
                let volume = signed_volume(mesh, *polygon_index);
                if flip[*polygon_index] {
                    -volume
                } else {
                    volume
                }
            })
            .sum::<f32>();
        if volume < 0.0 {
            for polygon_index in component {
                flip[polygon_index] = !flip[polygon_index];
            }
        }
    }

    let flipped = flip.iter().filter(|flip| **flip).count();
    if flipped > 0 {
        mesh.flip_polygons(&flip);
    }
    flipped
}

fn has_directed_edge(vertices: &[u32], a: u32, b: u32) -> bool {
    polygon_edges(vertices).any(|edge| edge == (a, b))
}

/// Contribution of the polygon to the volume enclosed by the mesh.
fn signed_volume(mesh: &Mesh, polygon_index: usize) -> f32 {
    mesh.triangulate_polygon(polygon_index)
        .iter()
        .map(|corners| {
            let [a, b, c] = corners.map(|corner| mesh.corner_position(corner as usize));
            a.dot(&b.cross(&c)) / 6.0
        })
        .sum()
}

/// What [`tidy`] removed or changed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TidySummary {
    pub welded: usize,
    pub degenerate: usize,
    pub loose: usize,
    pub flipped: usize,
    pub validation: ValidationReport,
}

/// Last step of every simplification. Afterwards no two vertices are closer than
/// `weld_distance`, no polygon has an area of at most `degenerate_threshold`² and every vertex
/// is used.
pub fn tidy(mesh: &mut Mesh, weld_distance: f32, degenerate_threshold: f32) -> TidySummary {
    let welded = weld(mesh, weld_distance);
    let degenerate = delete_degenerate(mesh, degenerate_threshold);
    let mut loose = delete_loose(mesh);
    let flipped = make_normals_consistent(mesh);
    let validation = validate(mesh);
    // Validation can leave vertices behind that only the removed polygons used
    loose += delete_loose(mesh);
    TidySummary {
        welded,
        degenerate,
        loose,
        flipped,
        validation,
    }
}

/// Problems found and repaired by [`validate`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ValidationReport {
    pub out_of_range: usize,
    pub repeated_corners: usize,
    pub duplicate_polygons: usize,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }
}

/// Removes polygons that reference missing vertices, that use a vertex more than once or that
/// duplicate an earlier polygon.
pub fn validate(mesh: &mut Mesh) -> ValidationReport {
    let mut report = ValidationReport::default();
    let vertex_count = mesh.vertex_count() as u32;
    report.out_of_range = mesh.retain_polygons(|mesh, index| {
        mesh.polygon_vertices(index)
            .iter()
            .all(|vertex| *vertex < vertex_count)
    });

    report.repeated_corners = collapse_repeated_corners(mesh);
    report.repeated_corners += mesh.retain_polygons(|mesh, index| {
        let vertices = mesh.polygon_vertices(index);
        let unique = vertices.iter().collect::<HashSet<_>>();
        unique.len() == vertices.len()
    });

    let mut seen = HashSet::with_capacity(mesh.polygon_count());
    report.duplicate_polygons = mesh.retain_polygons(|mesh, index| {
        let mut key = mesh.polygon_vertices(index).to_vec();
        key.sort_unstable();
        seen.insert(key)
    });
    report
}

/// Asserts what [`tidy`] guarantees for the given settings.
#[cfg(test)]
pub(crate) fn assert_clean(mesh: &Mesh, settings: &crate::config::DecimateSettings) {
    assert_eq!(mesh.unreferenced_vertex_count(), 0, "unreferenced vertices");
    let minimum_area = settings.degenerate_threshold * settings.degenerate_threshold;
    for index in 0..mesh.polygon_count() {
        assert!(
            mesh.polygon_area(index) > minimum_area,
            "polygon {index} has an area of {}",
            mesh.polygon_area(index)
        );
    }
    for (i, a) in mesh.positions.iter().enumerate() {
        for (j, b) in mesh.positions.iter().enumerate().skip(i + 1) {
            assert!(
                (a - b).norm() > settings.weld_distance,
                "vertices {i} and {j} are closer than {}",
                settings.weld_distance
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use polyfold_shared::float_cmp::assert_approx_eq;

    use super::*;
    use crate::primitives;

    /// Cube whose faces don't share vertices, like a mesh exported with split normals.
    fn split_cube() -> Mesh {
        let cube = primitives::cube(1.0);
        let mut split = Mesh::new();
        for polygon_index in 0..cube.polygon_count() {
            let first = split.vertex_count() as u32;
            for vertex in cube.polygon_vertices(polygon_index) {
                split.positions.push(cube.positions[*vertex as usize] + Vector3::new(1e-5, 0.0, 0.0));
            }
            split.push_polygon(&[first, first + 1, first + 2, first + 3]);
        }
        split
    }

    #[test]
    fn weld_merges_coincident_vertices() {
        let mut mesh = split_cube();
        assert_eq!(mesh.vertex_count(), 24);
        assert_eq!(weld(&mut mesh, 0.001), 16);
        assert_eq!(mesh.vertex_count(), 8);
        assert_eq!(mesh.polygon_count(), 6);
        assert!(mesh.is_closed_manifold());
    }

    #[test]
    fn weld_collapses_small_polygons() {
        let mut mesh = Mesh::from_polygons(
            vec![
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(1.0, 0.0, 0.0),
                Vector3::new(1.0, 1.0, 0.0),
                Vector3::new(1.0, 1.0005, 0.0),
                Vector3::new(5.0, 5.0, 5.0),
                Vector3::new(5.0, 5.0005, 5.0),
                Vector3::new(5.0005, 5.0, 5.0),
            ],
            [vec![0, 1, 2, 3], vec![4, 5, 6]],
        );
        weld(&mut mesh, 0.001);
        assert_eq!(mesh.polygon_count(), 1);
        assert_eq!(mesh.polygon_vertices(0).len(), 3);
    }

    #[test]
    fn triangulate_cube() {
        let mut cube = primitives::cube(1.0);
        assert_eq!(triangulate(&mut cube), 12);
        assert!(cube.polygons.iter().all(|polygon| polygon.corner_count == 3));
        assert_approx_eq!(f32, cube.surface_area(), 6.0, epsilon = 1e-5);
        assert!(cube.is_closed_manifold());
    }

    #[test]
    fn degenerate_and_loose() {
        let mut mesh = Mesh::from_polygons(
            vec![
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(1.0, 0.0, 0.0),
                Vector3::new(0.0, 1.0, 0.0),
                Vector3::new(2.0, 0.0, 0.0),
                Vector3::new(9.0, 9.0, 9.0),
            ],
            [[0, 1, 2], [0, 1, 3]],
        );
        assert_eq!(delete_degenerate(&mut mesh, 0.0001), 1);
        assert_eq!(delete_loose(&mut mesh), 2);
        assert_eq!(mesh.vertex_count(), 3);
        assert_eq!(mesh.unreferenced_vertex_count(), 0);
    }

    #[test]
    fn fill_holes_closes_open_cube() {
        let mut cube = primitives::cube(1.0);
        cube.retain_polygons(|_, index| index != 1);
        assert!(!cube.is_closed_manifold());
        assert_eq!(fill_holes(&mut cube), 1);
        assert!(cube.is_closed_manifold());
        let filled = cube.polygon_count() - 1;
        assert_eq!(cube.polygon_normal(filled), Vector3::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn fill_holes_with_many_sides() {
        let mut sphere = primitives::uv_sphere(1.0, 12, 6);
        // Remove the top cap which leaves a 12-sided hole
        sphere.retain_polygons(|mesh, index| mesh.polygon_vertices(index)[0] != 0);
        sphere.remove_unreferenced_vertices();
        assert_eq!(fill_holes(&mut sphere), 1);
        assert_eq!(sphere.polygon_vertices(sphere.polygon_count() - 1).len(), 12);
        assert!(sphere.is_closed_manifold());
    }

    #[test]
    fn normals_point_outwards() {
        let mut cube = primitives::cube(1.0);
        cube.flip_polygons(&[true, false, true, true, false, false]);
        assert_eq!(make_normals_consistent(&mut cube), 3);
        assert!(cube.is_closed_manifold());
        for index in 0..cube.polygon_count() {
            assert!(cube.polygon_normal(index).dot(&cube.polygon_center(index)) > 0.0);
        }

        let mut inverted = primitives::uv_sphere(1.0, 8, 4);
        let all = vec![true; inverted.polygon_count()];
        inverted.flip_polygons(&all);
        assert_eq!(make_normals_consistent(&mut inverted), inverted.polygon_count());
        assert!(inverted.polygon_normal(0).dot(&inverted.polygon_center(0)) > 0.0);
    }

    #[test]
    fn validate_repairs_topology() {
        let mut mesh = Mesh::from_polygons(
            vec![
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(1.0, 0.0, 0.0),
                Vector3::new(0.0, 1.0, 0.0),
                Vector3::new(1.0, 1.0, 0.0),
            ],
            [vec![0, 1, 2], vec![1, 2, 0], vec![0, 1, 7], vec![1, 3, 1, 2], vec![1, 3, 2]],
        );
        let report = validate(&mut mesh);
        assert_eq!(report.out_of_range, 1);
        assert_eq!(report.repeated_corners, 1);
        assert_eq!(report.duplicate_polygons, 1);
        assert!(!report.is_clean());
        assert_eq!(mesh.polygon_count(), 2);
        assert!(validate(&mut mesh).is_clean());
    }

    #[test]
    fn tidy_collapsed_quads() {
        // Strip of quads whose middle row collapsed onto the bottom row
        let mut mesh = Mesh::from_polygons(
            vec![
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(1.0, 0.0, 0.0),
                Vector3::new(2.0, 0.0, 0.0),
                Vector3::new(0.0, 0.0002, 0.0),
                Vector3::new(1.0, 0.0002, 0.0),
                Vector3::new(2.0, 0.0002, 0.0),
                Vector3::new(0.0, 1.0, 0.0),
                Vector3::new(1.0, 1.0, 0.0),
                Vector3::new(2.0, 1.0, 0.0),
                Vector3::new(9.0, 9.0, 9.0),
            ],
            [[0, 1, 4, 3], [1, 2, 5, 4], [3, 4, 7, 6], [4, 5, 8, 7]],
        );
        let settings = crate::config::DecimateSettings::default();
        let summary = tidy(&mut mesh, settings.weld_distance, settings.degenerate_threshold);
        assert_eq!(summary.welded, 3);
        assert_eq!(mesh.polygon_count(), 2);
        assert_eq!(mesh.vertex_count(), 6);
        assert_clean(&mesh, &settings);
    }
}
