use std::ops::Range;

use polyfold_shared::{
    aabb::AABB,
    ahash::{HashMap, HashMapExt},
    nalgebra::{Vector2, Vector3},
    ByteColor4,
};
use serde::{Deserialize, Serialize};

use crate::material::Material;

/// Marks a vertex that is removed in a remap table.
pub const REMOVED: u32 = u32::MAX;

/// Range of corners that form a polygon. The corners are stored in [`Mesh::corner_vertices`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Polygon {
    pub first_corner: u32,
    pub corner_count: u32,
}

impl Polygon {
    pub fn corners(&self) -> Range<usize> {
        self.first_corner as usize..(self.first_corner + self.corner_count) as usize
    }
}

/// Triangle of a polygon. It references three corners of the polygon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Triangle {
    pub polygon: u32,
    pub corners: [u32; 3],
}

/// Element type a color attribute stores values for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeDomain {
    /// One value per vertex.
    Point,
    /// One value per polygon corner. Allows hard color seams across an edge.
    Corner,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorAttribute {
    pub name: String,
    pub domain: AttributeDomain,
    pub values: Vec<ByteColor4>,
}

/// Polygon mesh with optional per-corner UV coordinates and a color attribute.
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub positions: Vec<Vector3<f32>>,
    pub polygons: Vec<Polygon>,
    /// Vertex index for every corner
    pub corner_vertices: Vec<u32>,
    /// UV coordinate for every corner. The origin is the bottom-left of the texture.
    pub corner_uvs: Option<Vec<Vector2<f32>>>,
    pub color_attribute: Option<ColorAttribute>,
    pub smooth_shading: bool,
    pub material: Option<Material>,
}

impl Mesh {
    /// Creates an empty `Mesh`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mesh from the given positions and polygons that index into them.
    ///
    /// # Example
    ///
    /// ```rust
    /// use polyfold_content::mesh::Mesh;
    /// use polyfold_shared::nalgebra::Vector3;
    /// let mesh = Mesh::from_polygons(
    ///     vec![Vector3::new(0.0, 0.0, 0.0), Vector3::new(1.0, 0.0, 0.0), Vector3::new(0.0, 1.0, 0.0)],
    ///     [[0, 1, 2]],
    /// );
    /// assert_eq!(mesh.polygon_count(), 1);
    /// assert_eq!(mesh.corner_count(), 3);
    /// ```
    pub fn from_polygons<P: AsRef<[u32]>>(positions: Vec<Vector3<f32>>, polygons: impl IntoIterator<Item = P>) -> Self {
        let mut mesh = Self {
            positions,
            ..Default::default()
        };
        for polygon in polygons {
            mesh.push_polygon(polygon.as_ref());
        }
        mesh
    }

    /// Appends a polygon. Existing corner attributes are extended with default values.
    pub fn push_polygon(&mut self, vertices: &[u32]) -> usize {
        let first_corner = self.corner_vertices.len() as u32;
        self.corner_vertices.extend_from_slice(vertices);
        if let Some(uvs) = &mut self.corner_uvs {
            uvs.extend(vertices.iter().map(|_| Vector2::zeros()));
        }
        if let Some(attribute) = &mut self.color_attribute {
            if attribute.domain == AttributeDomain::Corner {
                attribute.values.extend(vertices.iter().map(|_| ByteColor4::WHITE));
            }
        }
        self.polygons.push(Polygon {
            first_corner,
            corner_count: vertices.len() as u32,
        });
        self.polygons.len() - 1
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn polygon_count(&self) -> usize {
        self.polygons.len()
    }

    pub fn corner_count(&self) -> usize {
        self.corner_vertices.len()
    }

    /// Returns `true` if the mesh has no polygons.
    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    pub fn has_uvs(&self) -> bool {
        self.corner_uvs.as_ref().map_or(false, |uvs| !uvs.is_empty())
    }

    pub fn polygon_corners(&self, polygon_index: usize) -> Range<usize> {
        self.polygons[polygon_index].corners()
    }

    pub fn polygon_vertices(&self, polygon_index: usize) -> &[u32] {
        &self.corner_vertices[self.polygon_corners(polygon_index)]
    }

    /// Returns the position of the vertex that the given corner references.
    pub fn corner_position(&self, corner: usize) -> Vector3<f32> {
        self.positions[self.corner_vertices[corner] as usize]
    }

    /// Vector area of the polygon. Its length is the area and its direction is the normal.
    pub fn polygon_vector_area(&self, polygon_index: usize) -> Vector3<f32> {
        let vertices = self.polygon_vertices(polygon_index);
        let Some(&first) = vertices.first() else {
            return Vector3::zeros();
        };
        let origin = self.positions[first as usize];
        let mut sum = Vector3::zeros();
        for window in 1..vertices.len().saturating_sub(1) {
            let a = self.positions[vertices[window] as usize] - origin;
            let b = self.positions[vertices[window + 1] as usize] - origin;
            sum += a.cross(&b);
        }
        sum * 0.5
    }

    pub fn polygon_area(&self, polygon_index: usize) -> f32 {
        self.polygon_vector_area(polygon_index).norm()
    }

    /// Unit normal of the polygon following its winding. Degenerate polygons return zero.
    pub fn polygon_normal(&self, polygon_index: usize) -> Vector3<f32> {
        self.polygon_vector_area(polygon_index)
            .try_normalize(f32::EPSILON)
            .unwrap_or_else(Vector3::zeros)
    }

    pub fn polygon_center(&self, polygon_index: usize) -> Vector3<f32> {
        let vertices = self.polygon_vertices(polygon_index);
        let sum = vertices
            .iter()
            .fold(Vector3::zeros(), |sum, vertex| sum + self.positions[*vertex as usize]);
        sum / vertices.len().max(1) as f32
    }

    pub fn face_normals(&self) -> Vec<Vector3<f32>> {
        (0..self.polygon_count()).map(|index| self.polygon_normal(index)).collect()
    }

    /// Area-weighted vertex normals.
    pub fn vertex_normals(&self) -> Vec<Vector3<f32>> {
        let mut normals = vec![Vector3::zeros(); self.vertex_count()];
        for polygon_index in 0..self.polygon_count() {
            let vector_area = self.polygon_vector_area(polygon_index);
            for vertex in self.polygon_vertices(polygon_index) {
                normals[*vertex as usize] += vector_area;
            }
        }
        normals
            .into_iter()
            .map(|normal| normal.try_normalize(f32::EPSILON).unwrap_or_else(Vector3::z))
            .collect()
    }

    pub fn surface_area(&self) -> f32 {
        (0..self.polygon_count()).map(|index| self.polygon_area(index)).sum()
    }

    pub fn bounding_box(&self) -> AABB {
        AABB::from_slice(&self.positions)
    }

    /// Splits the polygon into triangles. Quads are split along the shorter diagonal and
    /// larger polygons are ear-clipped. The returned values are corner indices.
    pub fn triangulate_polygon(&self, polygon_index: usize) -> Vec<[u32; 3]> {
        let corners = self.polygon_corners(polygon_index);
        let c = corners.start as u32;
        match corners.len() {
            0..=2 => Vec::new(),
            3 => vec![[c, c + 1, c + 2]],
            4 => {
                let p = |offset: u32| self.corner_position((c + offset) as usize);
                if (p(0) - p(2)).norm_squared() <= (p(1) - p(3)).norm_squared() {
                    vec![[c, c + 1, c + 2], [c, c + 2, c + 3]]
                } else {
                    vec![[c, c + 1, c + 3], [c + 1, c + 2, c + 3]]
                }
            }
            _ => {
                let normal = self.polygon_vector_area(polygon_index);
                let points = corners
                    .clone()
                    .map(|corner| project_to_plane(&self.corner_position(corner), &normal))
                    .collect::<Vec<_>>();
                ear_clip(&points)
                    .into_iter()
                    .map(|[a, b, d]| [c + a as u32, c + b as u32, c + d as u32])
                    .collect()
            }
        }
    }

    /// Triangles of all polygons.
    pub fn triangles(&self) -> Vec<Triangle> {
        (0..self.polygon_count())
            .flat_map(|polygon_index| {
                self.triangulate_polygon(polygon_index)
                    .into_iter()
                    .map(move |corners| Triangle {
                        polygon: polygon_index as u32,
                        corners,
                    })
            })
            .collect()
    }

    pub fn triangle_positions(&self, triangle: &Triangle) -> [Vector3<f32>; 3] {
        triangle.corners.map(|corner| self.corner_position(corner as usize))
    }

    /// Returns the color of the given corner if the mesh has a color attribute.
    pub fn corner_color(&self, corner: usize) -> Option<ByteColor4> {
        let attribute = self.color_attribute.as_ref()?;
        let index = match attribute.domain {
            AttributeDomain::Point => self.corner_vertices[corner] as usize,
            AttributeDomain::Corner => corner,
        };
        attribute.values.get(index).copied()
    }

    /// Replaces the polygons with new ones that are built from the given corners of the
    /// current mesh. Corner attributes travel with their corners.
    pub fn rebuild_from_corners<P: AsRef<[u32]>>(&mut self, polygons: &[P]) {
        let corner_total = polygons.iter().map(|polygon| polygon.as_ref().len()).sum::<usize>();
        let mut corner_vertices = Vec::with_capacity(corner_total);
        let mut new_polygons = Vec::with_capacity(polygons.len());
        let mut uvs = self.corner_uvs.as_ref().map(|_| Vec::with_capacity(corner_total));
        let mut corner_colors = self
            .color_attribute
            .as_ref()
            .filter(|attribute| attribute.domain == AttributeDomain::Corner)
            .map(|_| Vec::with_capacity(corner_total));

        for polygon in polygons {
            let polygon = polygon.as_ref();
            new_polygons.push(Polygon {
                first_corner: corner_vertices.len() as u32,
                corner_count: polygon.len() as u32,
            });
            for &corner in polygon {
                let corner = corner as usize;
                corner_vertices.push(self.corner_vertices[corner]);
                if let (Some(uvs), Some(old_uvs)) = (&mut uvs, &self.corner_uvs) {
                    uvs.push(old_uvs.get(corner).copied().unwrap_or_else(Vector2::zeros));
                }
                if let (Some(colors), Some(attribute)) = (&mut corner_colors, &self.color_attribute) {
                    colors.push(attribute.values.get(corner).copied().unwrap_or(ByteColor4::WHITE));
                }
            }
        }

        self.corner_vertices = corner_vertices;
        self.polygons = new_polygons;
        self.corner_uvs = uvs;
        if let (Some(colors), Some(attribute)) = (corner_colors, &mut self.color_attribute) {
            attribute.values = colors;
        }
    }

    /// Keeps the polygons for which `keep` returns `true`.
    pub fn retain_polygons(&mut self, mut keep: impl FnMut(&Mesh, usize) -> bool) -> usize {
        let kept = (0..self.polygon_count())
            .filter(|&index| keep(self, index))
            .map(|index| self.polygon_corners(index).map(|corner| corner as u32).collect::<Vec<_>>())
            .collect::<Vec<_>>();
        let removed = self.polygon_count() - kept.len();
        if removed > 0 {
            self.rebuild_from_corners(&kept);
        }
        removed
    }

    /// Moves the vertices according to `remap` (old index to new index or [`REMOVED`]).
    /// When several vertices map to the same new index, the first one keeps its position.
    pub fn remap_vertices(&mut self, remap: &[u32], new_vertex_count: usize) {
        debug_assert_eq!(remap.len(), self.positions.len());
        let mut positions = vec![Vector3::zeros(); new_vertex_count];
        let mut written = vec![false; new_vertex_count];
        let mut point_colors = self
            .color_attribute
            .as_ref()
            .filter(|attribute| attribute.domain == AttributeDomain::Point)
            .map(|_| vec![ByteColor4::WHITE; new_vertex_count]);

        for (old_index, &new_index) in remap.iter().enumerate() {
            if new_index == REMOVED || written[new_index as usize] {
                continue;
            }
            written[new_index as usize] = true;
            positions[new_index as usize] = self.positions[old_index];
            if let (Some(colors), Some(attribute)) = (&mut point_colors, &self.color_attribute) {
                if let Some(color) = attribute.values.get(old_index) {
                    colors[new_index as usize] = *color;
                }
            }
        }

        for vertex in &mut self.corner_vertices {
            debug_assert_ne!(remap[*vertex as usize], REMOVED, "a referenced vertex was removed");
            *vertex = remap[*vertex as usize];
        }
        self.positions = positions;
        if let (Some(colors), Some(attribute)) = (point_colors, &mut self.color_attribute) {
            attribute.values = colors;
        }
    }

    /// Removes the vertices that are not referenced by any polygon and returns how many were removed.
    pub fn remove_unreferenced_vertices(&mut self) -> usize {
        let mut referenced = vec![false; self.vertex_count()];
        for vertex in &self.corner_vertices {
            referenced[*vertex as usize] = true;
        }
        let mut remap = vec![REMOVED; self.vertex_count()];
        let mut next = 0u32;
        for (index, is_referenced) in referenced.iter().enumerate() {
            if *is_referenced {
                remap[index] = next;
                next += 1;
            }
        }
        let removed = self.vertex_count() - next as usize;
        if removed > 0 {
            self.remap_vertices(&remap, next as usize);
        }
        removed
    }

    pub fn unreferenced_vertex_count(&self) -> usize {
        let mut referenced = vec![false; self.vertex_count()];
        for vertex in &self.corner_vertices {
            referenced[*vertex as usize] = true;
        }
        referenced.iter().filter(|referenced| !**referenced).count()
    }

    /// Maps every undirected edge to the polygons that use it.
    pub fn edge_polygons(&self) -> HashMap<(u32, u32), Vec<u32>> {
        let mut edges = HashMap::with_capacity(self.corner_count());
        for polygon_index in 0..self.polygon_count() {
            for (a, b) in polygon_edges(self.polygon_vertices(polygon_index)) {
                edges
                    .entry(undirected(a, b))
                    .or_insert_with(Vec::new)
                    .push(polygon_index as u32);
            }
        }
        edges
    }

    /// Returns `true` if every edge is shared by exactly two polygons that traverse it in
    /// opposite directions.
    pub fn is_closed_manifold(&self) -> bool {
        let mut directed = HashMap::with_capacity(self.corner_count());
        for polygon_index in 0..self.polygon_count() {
            for edge in polygon_edges(self.polygon_vertices(polygon_index)) {
                *directed.entry(edge).or_insert(0u32) += 1;
            }
        }
        !directed.is_empty()
            && directed
                .iter()
                .all(|(&(a, b), &count)| count == 1 && directed.get(&(b, a)) == Some(&1))
    }

    /// Reverses the winding of the polygon. Corner attributes stay with their corners.
    pub fn flip_polygons(&mut self, flip: &[bool]) {
        let polygons = (0..self.polygon_count())
            .map(|index| {
                let corners = self.polygon_corners(index).map(|corner| corner as u32);
                if flip[index] {
                    corners.rev().collect::<Vec<_>>()
                } else {
                    corners.collect::<Vec<_>>()
                }
            })
            .collect::<Vec<_>>();
        self.rebuild_from_corners(&polygons);
    }
}

/// Directed edges of a polygon given by its vertices.
pub fn polygon_edges(vertices: &[u32]) -> impl Iterator<Item = (u32, u32)> + '_ {
    (0..vertices.len()).map(move |index| (vertices[index], vertices[(index + 1) % vertices.len()]))
}

pub fn undirected(a: u32, b: u32) -> (u32, u32) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Projects the point onto the coordinate plane that is most perpendicular to `normal` in a
/// way that keeps counter-clockwise polygons counter-clockwise.
fn project_to_plane(point: &Vector3<f32>, normal: &Vector3<f32>) -> Vector2<f32> {
    let axis = normal.iamax();
    let sign = if normal[axis] < 0.0 { -1.0 } else { 1.0 };
    match axis {
        0 => Vector2::new(point.y, point.z).component_mul(&Vector2::new(sign, 1.0)),
        1 => Vector2::new(point.z, point.x).component_mul(&Vector2::new(sign, 1.0)),
        _ => Vector2::new(point.x, point.y).component_mul(&Vector2::new(sign, 1.0)),
    }
}

fn cross_2d(a: &Vector2<f32>, b: &Vector2<f32>, c: &Vector2<f32>) -> f32 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

/// Triangulates a simple polygon by clipping ears. Falls back to a fan when no ear can be found.
pub fn ear_clip(points: &[Vector2<f32>]) -> Vec<[usize; 3]> {
    let mut remaining = (0..points.len()).collect::<Vec<_>>();
    let signed_area = (0..points.len())
        .map(|i| {
            let j = (i + 1) % points.len();
            points[i].x * points[j].y - points[j].x * points[i].y
        })
        .sum::<f32>();
    if signed_area < 0.0 {
        remaining.reverse();
    }

    let mut triangles = Vec::with_capacity(points.len().saturating_sub(2));
    while remaining.len() > 3 {
        let count = remaining.len();
        let ear = (0..count).find(|&i| {
            let prev = remaining[(i + count - 1) % count];
            let current = remaining[i];
            let next = remaining[(i + 1) % count];
            let (a, b, c) = (&points[prev], &points[current], &points[next]);
            if cross_2d(a, b, c) <= 0.0 {
                return false;
            }
            !remaining.iter().any(|&other| {
                if other == prev || other == current || other == next {
                    return false;
                }
                let p = &points[other];
                cross_2d(a, b, p) >= 0.0 && cross_2d(b, c, p) >= 0.0 && cross_2d(c, a, p) >= 0.0
            })
        });
        match ear {
            Some(i) => {
                let prev = remaining[(i + count - 1) % count];
                let next = remaining[(i + 1) % count];
                triangles.push(order(signed_area, [prev, remaining[i], next]));
                remaining.remove(i);
            }
            None => break,
        }
    }

    // Whatever is left (a triangle or a polygon without ears) becomes a fan
    for i in 1..remaining.len().saturating_sub(1) {
        triangles.push(order(signed_area, [remaining[0], remaining[i], remaining[i + 1]]));
    }
    triangles
}

/// Restores the original winding for polygons that were processed in reverse.
fn order(signed_area: f32, [a, b, c]: [usize; 3]) -> [usize; 3] {
    if signed_area < 0.0 {
        [c, b, a]
    } else {
        [a, b, c]
    }
}
