use polyfold_shared::{aabb::AABB, nalgebra::Vector3};

use crate::mesh::{Mesh, Triangle};

const MAX_LEAF_SIZE: usize = 4;

#[derive(Debug, Clone, Copy)]
enum NodeKind {
    Leaf { first: u32, count: u32 },
    Interior { left: u32, right: u32 },
}

#[derive(Debug, Clone, Copy)]
struct Node {
    bounds: AABB,
    kind: NodeKind,
}

/// Result of a ray or closest point query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    /// Distance along the ray or to the query point
    pub distance: f32,
    pub point: Vector3<f32>,
    /// Weights of the three triangle corners
    pub barycentric: Vector3<f32>,
    pub triangle: Triangle,
}

impl Hit {
    /// Interpolates a value that is stored per corner of the hit triangle.
    pub fn interpolate<T>(&self, value: impl Fn(usize) -> T) -> T
    where
        T: std::ops::Mul<f32, Output = T> + std::ops::Add<Output = T>,
    {
        let [a, b, c] = self.triangle.corners.map(|corner| value(corner as usize));
        a * self.barycentric.x + b * self.barycentric.y + c * self.barycentric.z
    }
}

/// Bounding volume hierarchy over the triangles of a [`Mesh`]. Built with median splits along
/// the longest axis of the triangle centroids.
pub struct Bvh {
    nodes: Vec<Node>,
    triangles: Vec<Triangle>,
    positions: Vec<[Vector3<f32>; 3]>,
}

impl Bvh {
    pub fn new(mesh: &Mesh) -> Self {
        let triangles = mesh.triangles();
        let positions = triangles
            .iter()
            .map(|triangle| mesh.triangle_positions(triangle))
            .collect::<Vec<_>>();
        let mut bvh = Self {
            nodes: Vec::with_capacity(triangles.len() / MAX_LEAF_SIZE * 2 + 1),
            triangles,
            positions,
        };
        if !bvh.triangles.is_empty() {
            let mut order = (0..bvh.triangles.len() as u32).collect::<Vec<_>>();
            let centroids = bvh
                .positions
                .iter()
                .map(|[a, b, c]| (a + b + c) / 3.0)
                .collect::<Vec<_>>();
            bvh.build(&mut order, 0, &centroids);
            bvh.triangles = order.iter().map(|index| bvh.triangles[*index as usize]).collect();
            bvh.positions = order.iter().map(|index| bvh.positions[*index as usize]).collect();
        }
        bvh
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Returns the bounds of all triangles.
    pub fn bounds(&self) -> AABB {
        self.nodes.first().map(|node| node.bounds).unwrap_or_default()
    }

    fn build(&mut self, order: &mut [u32], offset: u32, centroids: &[Vector3<f32>]) -> u32 {
        let mut bounds = AABB::empty();
        let mut centroid_bounds = AABB::empty();
        for index in order.iter() {
            for position in &self.positions[*index as usize] {
                bounds.include(position);
            }
            centroid_bounds.include(&centroids[*index as usize]);
        }

        let node_index = self.nodes.len() as u32;
        self.nodes.push(Node {
            bounds,
            kind: NodeKind::Leaf {
                first: offset,
                count: order.len() as u32,
            },
        });
        if order.len() <= MAX_LEAF_SIZE {
            return node_index;
        }

        let axis = centroid_bounds.longest_axis();
        let middle = order.len() / 2;
        order.select_nth_unstable_by(middle, |a, b| {
            centroids[*a as usize][axis].total_cmp(&centroids[*b as usize][axis])
        });
        let (left_order, right_order) = order.split_at_mut(middle);
        let left = self.build(left_order, offset, centroids);
        let right = self.build(right_order, offset + middle as u32, centroids);
        self.nodes[node_index as usize].kind = NodeKind::Interior { left, right };
        node_index
    }

    /// Returns the closest intersection of the ray within `max_distance`. Triangles are hit from both sides.
    pub fn cast_ray(&self, origin: &Vector3<f32>, direction: &Vector3<f32>, max_distance: f32) -> Option<Hit> {
        if self.is_empty() {
            return None;
        }
        let inverse_direction = direction.map(|component| 1.0 / component);
        let mut closest: Option<Hit> = None;
        let mut max_distance = max_distance;
        let mut stack = vec![0u32];
        while let Some(node_index) = stack.pop() {
            let node = &self.nodes[node_index as usize];
            if node.bounds.intersect_ray(origin, &inverse_direction, max_distance).is_none() {
                continue;
            }
            match node.kind {
                NodeKind::Leaf { first, count } => {
                    for index in first as usize..(first + count) as usize {
                        if let Some((distance, barycentric)) =
                            intersect_triangle(origin, direction, &self.positions[index], max_distance)
                        {
                            max_distance = distance;
                            closest = Some(Hit {
                                distance,
                                point: origin + direction * distance,
                                barycentric,
                                triangle: self.triangles[index],
                            });
                        }
                    }
                }
                NodeKind::Interior { left, right } => {
                    stack.push(left);
                    stack.push(right);
                }
            }
        }
        closest
    }

    /// Returns the point on the surface that is closest to `point`.
    pub fn closest_point(&self, point: &Vector3<f32>) -> Option<Hit> {
        if self.is_empty() {
            return None;
        }
        let mut best_distance_squared = f32::INFINITY;
        let mut closest = None;
        let mut stack = vec![0u32];
        while let Some(node_index) = stack.pop() {
            let node = &self.nodes[node_index as usize];
            if node.bounds.distance_squared(point) > best_distance_squared {
                continue;
            }
            match node.kind {
                NodeKind::Leaf { first, count } => {
                    for index in first as usize..(first + count) as usize {
                        let (candidate, barycentric) = closest_point_on_triangle(point, &self.positions[index]);
                        let distance_squared = (candidate - point).norm_squared();
                        if distance_squared < best_distance_squared {
                            best_distance_squared = distance_squared;
                            closest = Some(Hit {
                                distance: distance_squared.sqrt(),
                                point: candidate,
                                barycentric,
                                triangle: self.triangles[index],
                            });
                        }
                    }
                }
                NodeKind::Interior { left, right } => {
                    // Visit the nearer child first so that the other one is more likely to be pruned
                    let left_distance = self.nodes[left as usize].bounds.distance_squared(point);
                    let right_distance = self.nodes[right as usize].bounds.distance_squared(point);
                    if left_distance < right_distance {
                        stack.push(right);
                        stack.push(left);
                    } else {
                        stack.push(left);
                        stack.push(right);
                    }
                }
            }
        }
        closest
    }
}

/// Slack on the barycentric coordinates so that rays through shared edges and vertices hit at
/// least one of the adjacent triangles.
const BARYCENTRIC_TOLERANCE: f32 = 1e-5;

/// Möller–Trumbore intersection. Returns the distance and the barycentric coordinates.
fn intersect_triangle(
    origin: &Vector3<f32>,
    direction: &Vector3<f32>,
    [a, b, c]: &[Vector3<f32>; 3],
    max_distance: f32,
) -> Option<(f32, Vector3<f32>)> {
    let edge1 = b - a;
    let edge2 = c - a;
    let p = direction.cross(&edge2);
    let determinant = edge1.dot(&p);
    if determinant.abs() < 1e-12 {
        return None;
    }
    let inverse_determinant = 1.0 / determinant;
    let t = origin - a;
    let u = t.dot(&p) * inverse_determinant;
    if !(-BARYCENTRIC_TOLERANCE..=1.0 + BARYCENTRIC_TOLERANCE).contains(&u) {
        return None;
    }
    let q = t.cross(&edge1);
    let v = direction.dot(&q) * inverse_determinant;
    if v < -BARYCENTRIC_TOLERANCE || u + v > 1.0 + BARYCENTRIC_TOLERANCE {
        return None;
    }
    let distance = edge2.dot(&q) * inverse_determinant;
    if distance < 0.0 || distance > max_distance {
        return None;
    }
    // Hits within the tolerance are moved onto the triangle
    let (u, v) = (u.max(0.0), v.max(0.0));
    let sum = u + v;
    let (u, v) = if sum > 1.0 { (u / sum, v / sum) } else { (u, v) };
    Some((distance, Vector3::new(1.0 - u - v, u, v)))
}

/// Closest point on a triangle by region classification. Returns the point and its barycentric coordinates.
pub(crate) fn closest_point_on_triangle(point: &Vector3<f32>, [a, b, c]: &[Vector3<f32>; 3]) -> (Vector3<f32>, Vector3<f32>) {
    let ab = b - a;
    let ac = c - a;
    let ap = point - a;
    let d1 = ab.dot(&ap);
    let d2 = ac.dot(&ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return (*a, Vector3::new(1.0, 0.0, 0.0));
    }

    let bp = point - b;
    let d3 = ab.dot(&bp);
    let d4 = ac.dot(&bp);
    if d3 >= 0.0 && d4 <= d3 {
        return (*b, Vector3::new(0.0, 1.0, 0.0));
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return (a + ab * v, Vector3::new(1.0 - v, v, 0.0));
    }

    let cp = point - c;
    let d5 = ab.dot(&cp);
    let d6 = ac.dot(&cp);
    if d6 >= 0.0 && d5 <= d6 {
        return (*c, Vector3::new(0.0, 0.0, 1.0));
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return (a + ac * w, Vector3::new(1.0 - w, 0.0, w));
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return (b + (c - b) * w, Vector3::new(0.0, 1.0 - w, w));
    }

    let denominator = va + vb + vc;
    if denominator.abs() < f32::EPSILON {
        // Degenerate triangle
        return (*a, Vector3::new(1.0, 0.0, 0.0));
    }
    let v = vb / denominator;
    let w = vc / denominator;
    (a + ab * v + ac * w, Vector3::new(1.0 - v - w, v, w))
}
