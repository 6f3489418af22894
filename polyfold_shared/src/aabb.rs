use nalgebra::Vector3;

use serde::{Deserialize, Serialize};

/// Trait that allows a type to expand an [`AABB`].
pub trait Include {
    fn expand_aabb(&self, aabb: &mut AABB);
}

impl Include for Vector3<f32> {
    fn expand_aabb(&self, aabb: &mut AABB) {
        aabb.min = aabb.min.inf(self);
        aabb.max = aabb.max.sup(self);
    }
}

impl Include for AABB {
    fn expand_aabb(&self, aabb: &mut AABB) {
        if self.is_empty() {
            return;
        }
        aabb.min = aabb.min.inf(&self.min);
        aabb.max = aabb.max.sup(&self.max);
    }
}

/// Slack on the exit distance of the slab test, see "Robust BVH Ray Traversal" (Ize).
const ROBUST_FACTOR: f32 = 1.0 + 2.0 * 4.0 * f32::EPSILON;

/// Axis-aligned bounding box defined by its minimum and maximum extent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AABB {
    pub min: Vector3<f32>,
    pub max: Vector3<f32>,
}

impl AABB {
    /// Creates a new [`AABB`] that contains nothing (min: `f32::MAX`, max: `f32::MIN`).
    ///
    /// # Examples
    ///
    /// ```
    /// # use polyfold_shared::aabb::AABB;
    /// let bounding_box = AABB::empty();
    /// assert!(bounding_box.is_empty());
    /// ```
    pub fn empty() -> Self {
        Self {
            min: Vector3::new(f32::MAX, f32::MAX, f32::MAX),
            max: Vector3::new(f32::MIN, f32::MIN, f32::MIN),
        }
    }

    /// Creates a new [`AABB`] with the given `min` and `max` extent.
    pub fn new(min: Vector3<f32>, max: Vector3<f32>) -> Self {
        Self { min, max }
    }

    /// Creates a new [`AABB`] that contains the given `points`.
    ///
    /// # Examples
    ///
    /// ```
    /// # use polyfold_shared::nalgebra::Vector3;
    /// # use polyfold_shared::aabb::AABB;
    /// # use polyfold_shared::float_cmp::assert_approx_eq;
    /// let bounding_box = AABB::from_slice(&[
    ///     Vector3::new(0.0, 0.0, 0.0),
    ///     Vector3::new(1.0, 2.0, 3.0),
    ///     Vector3::new(-4.0, -5.0, -6.0),
    /// ]);
    /// assert_approx_eq!(f32, bounding_box.min.x, -4.0, ulps = 1);
    /// assert_approx_eq!(f32, bounding_box.min.z, -6.0, ulps = 1);
    /// assert_approx_eq!(f32, bounding_box.max.y, 2.0, ulps = 1);
    /// ```
    pub fn from_slice(points: &[Vector3<f32>]) -> Self {
        let mut bounding_box = Self::empty();
        bounding_box.extend(points.iter());
        bounding_box
    }

    /// Inserts the given point or [`AABB`] into the [`AABB`] expanding it if necessary.
    pub fn include(&mut self, other: &impl Include) {
        other.expand_aabb(self);
    }

    /// Checks whether the given point in contained in the `AABB`
    pub fn contains(&self, point: Vector3<f32>) -> bool {
        (0..3).all(|axis| point[axis] >= self.min[axis] && point[axis] <= self.max[axis])
    }

    /// Returns the center of the `AABB`
    pub fn center(&self) -> Vector3<f32> {
        (self.min + self.max) / 2.0
    }

    /// Returns the size of the `AABB`
    pub fn size(&self) -> Vector3<f32> {
        self.max - self.min
    }

    /// Returns the index of the axis along which the `AABB` is the largest.
    pub fn longest_axis(&self) -> usize {
        self.size().imax()
    }

    /// Returns a copy that is enlarged by `margin` in every direction.
    ///
    /// # Examples
    ///
    /// ```
    /// # use polyfold_shared::nalgebra::Vector3;
    /// # use polyfold_shared::aabb::AABB;
    /// let bounding_box = AABB::new(Vector3::zeros(), Vector3::new(1.0, 1.0, 1.0)).grown(0.5);
    /// assert_eq!(bounding_box.min, Vector3::new(-0.5, -0.5, -0.5));
    /// assert_eq!(bounding_box.max, Vector3::new(1.5, 1.5, 1.5));
    /// ```
    pub fn grown(&self, margin: f32) -> Self {
        let margin = Vector3::new(margin, margin, margin);
        Self {
            min: self.min - margin,
            max: self.max + margin,
        }
    }

    /// Half of the surface area. Used as the cost metric when splitting hierarchies.
    pub fn half_area(&self) -> f32 {
        if self.is_empty() {
            return 0.0;
        }
        let size = self.size();
        size.x * size.y + size.y * size.z + size.z * size.x
    }

    /// Squared distance between the `point` and the closest point of the `AABB`. Zero for points inside.
    pub fn distance_squared(&self, point: &Vector3<f32>) -> f32 {
        let clamped = point.sup(&self.min).inf(&self.max);
        (point - clamped).norm_squared()
    }

    /// Intersects the ray given by `origin` and the component-wise inverse of its direction with
    /// the `AABB` and returns the entry distance when the box is hit in `[0, max_distance]`.
    pub fn intersect_ray(&self, origin: &Vector3<f32>, inverse_direction: &Vector3<f32>, max_distance: f32) -> Option<f32> {
        let mut t_min = 0.0f32;
        let mut t_max = max_distance;
        for axis in 0..3 {
            if inverse_direction[axis].is_infinite() {
                // Parallel to the slab: either always inside it or never
                if origin[axis] < self.min[axis] || origin[axis] > self.max[axis] {
                    return None;
                }
                continue;
            }
            let t0 = (self.min[axis] - origin[axis]) * inverse_direction[axis];
            let t1 = (self.max[axis] - origin[axis]) * inverse_direction[axis];
            let (near, far) = if t0 <= t1 { (t0, t1) } else { (t1, t0) };
            t_min = t_min.max(near);
            // Rounding must not reject rays that touch the box in a single point
            t_max = t_max.min(far * ROBUST_FACTOR);
            if t_min > t_max {
                return None;
            }
        }
        Some(t_min)
    }

    /// Returns `true` if the `AABB` is empty.
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }
}

impl Default for AABB {
    fn default() -> Self {
        Self::empty()
    }
}

impl Extend<Vector3<f32>> for AABB {
    fn extend<T: IntoIterator<Item = Vector3<f32>>>(&mut self, iter: T) {
        for point in iter {
            self.include(&point);
        }
    }
}

impl<'s> Extend<&'s Vector3<f32>> for AABB {
    fn extend<T: IntoIterator<Item = &'s Vector3<f32>>>(&mut self, iter: T) {
        for point in iter {
            self.include(point);
        }
    }
}

#[cfg(test)]
mod tests {
    use float_cmp::assert_approx_eq;

    use super::*;

    #[test]
    fn smoke() {
        let mut bounding_box = AABB::empty();
        assert!(bounding_box.is_empty());
        bounding_box.include(&Vector3::new(0.0, 0.0, 0.0));
        assert!(!bounding_box.is_empty());
        assert_approx_eq!(f32, bounding_box.min.x, 0.0, ulps = 1);
        assert_approx_eq!(f32, bounding_box.max.z, 0.0, ulps = 1);
    }

    #[test]
    fn include_empty_aabb_is_noop() {
        let mut bounding_box = AABB::from_slice(&[Vector3::new(1.0, 1.0, 1.0)]);
        bounding_box.include(&AABB::empty());
        assert_eq!(bounding_box.min, Vector3::new(1.0, 1.0, 1.0));
        assert_eq!(bounding_box.max, Vector3::new(1.0, 1.0, 1.0));
    }

    #[test]
    fn longest_axis() {
        let bounding_box = AABB::new(Vector3::zeros(), Vector3::new(1.0, 5.0, 2.0));
        assert_eq!(bounding_box.longest_axis(), 1);
    }

    #[test]
    fn distance_squared() {
        let bounding_box = AABB::new(Vector3::zeros(), Vector3::new(1.0, 1.0, 1.0));
        assert_approx_eq!(f32, bounding_box.distance_squared(&Vector3::new(0.5, 0.5, 0.5)), 0.0, ulps = 1);
        assert_approx_eq!(f32, bounding_box.distance_squared(&Vector3::new(3.0, 0.5, 0.5)), 4.0, ulps = 1);
    }

    #[test]
    fn intersect_ray_hit_and_miss() {
        let bounding_box = AABB::new(Vector3::zeros(), Vector3::new(1.0, 1.0, 1.0));
        let origin = Vector3::new(0.5, 0.5, -2.0);
        let direction = Vector3::new(0.0, 0.0, 1.0);
        let inverse = direction.map(|d| 1.0 / d);
        let t = bounding_box.intersect_ray(&origin, &inverse, f32::MAX).unwrap();
        assert_approx_eq!(f32, t, 2.0, ulps = 2);
        assert!(bounding_box.intersect_ray(&origin, &inverse, 1.0).is_none());

        let origin = Vector3::new(5.0, 0.5, -2.0);
        assert!(bounding_box.intersect_ray(&origin, &inverse, f32::MAX).is_none());
    }

    #[test]
    fn intersect_ray_along_the_faces() {
        let bounding_box = AABB::new(Vector3::zeros(), Vector3::new(1.0, 1.0, 1.0));
        let direction = Vector3::new(0.0, 0.0, -1.0);
        let inverse = direction.map(|d| 1.0 / d);
        // Origins on the boundary planes of the two slabs the ray runs parallel to
        for origin in [
            Vector3::new(0.0, 0.5, 5.0),
            Vector3::new(1.0, 0.5, 5.0),
            Vector3::new(0.5, 0.0, 5.0),
            Vector3::new(1.0, 1.0, 5.0),
        ] {
            let t = bounding_box.intersect_ray(&origin, &inverse, f32::MAX).unwrap();
            assert_approx_eq!(f32, t, 4.0, ulps = 2);
        }
        let outside = Vector3::new(1.0 + 1e-3, 0.5, 5.0);
        assert!(bounding_box.intersect_ray(&outside, &inverse, f32::MAX).is_none());

        // Ray that touches the box only at its corner
        let flat = AABB::new(Vector3::zeros(), Vector3::new(1.0, 1.0, 0.0));
        let diagonal = Vector3::new(-1.0, 1.0, 0.0);
        let inverse = diagonal.map(|d| 1.0 / d);
        let t = flat
            .intersect_ray(&Vector3::new(2.0, 0.0, 0.0), &inverse, f32::MAX)
            .unwrap();
        assert_approx_eq!(f32, t, 1.0, ulps = 2);
    }

    #[test]
    fn extend_ref() {
        let mut bounding_box = AABB::empty();
        let points = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 2.0, 3.0),
            Vector3::new(-4.0, -5.0, -6.0),
        ];
        bounding_box.extend(points.iter());
        assert_approx_eq!(f32, bounding_box.min.x, -4.0, ulps = 1);
        assert_approx_eq!(f32, bounding_box.min.y, -5.0, ulps = 1);
        assert_approx_eq!(f32, bounding_box.max.z, 3.0, ulps = 1);
    }
}
