//! Axis-aligned bounding volume used to frame the camera on an imported scene.

use cgmath::{InnerSpace, Point3, Vector3};

/// Min/max corner pair. Starts undefined and grows with every point added.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Range3 {
    bounds: Option<(Point3<f32>, Point3<f32>)>,
}

impl Range3 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_corners(min: Point3<f32>, max: Point3<f32>) -> Self {
        Self {
            bounds: Some((min, max)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_none()
    }

    pub fn min(&self) -> Option<Point3<f32>> {
        self.bounds.map(|(min, _)| min)
    }

    pub fn max(&self) -> Option<Point3<f32>> {
        self.bounds.map(|(_, max)| max)
    }

    pub fn extend(&mut self, p: Point3<f32>) {
        self.bounds = Some(match self.bounds {
            None => (p, p),
            Some((min, max)) => (
                Point3::new(min.x.min(p.x), min.y.min(p.y), min.z.min(p.z)),
                Point3::new(max.x.max(p.x), max.y.max(p.y), max.z.max(p.z)),
            ),
        });
    }

    /// Grows `self` to enclose `other`. Merging an empty range is a no-op.
    pub fn merge(&mut self, other: &Range3) {
        if let Some((min, max)) = other.bounds {
            self.extend(min);
            self.extend(max);
        }
    }

    pub fn center(&self) -> Option<Point3<f32>> {
        self.bounds
            .map(|(min, max)| Point3::new((min.x + max.x) * 0.5, (min.y + max.y) * 0.5, (min.z + max.z) * 0.5))
    }

    pub fn size(&self) -> Option<Vector3<f32>> {
        self.bounds.map(|(min, max)| max - min)
    }

    /// Length of the diagonal, zero for an empty range.
    pub fn diagonal(&self) -> f32 {
        self.size().map_or(0.0, |s| s.magnitude())
    }
}

impl FromIterator<Point3<f32>> for Range3 {
    fn from_iter<I: IntoIterator<Item = Point3<f32>>>(iter: I) -> Self {
        let mut range = Range3::new();
        iter.into_iter().for_each(|p| range.extend(p));
        range
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extends_componentwise() {
        let range: Range3 = [
            Point3::new(1.0, -2.0, 3.0),
            Point3::new(-1.0, 5.0, 0.0),
        ]
        .into_iter()
        .collect();
        assert_eq!(range.min(), Some(Point3::new(-1.0, -2.0, 0.0)));
        assert_eq!(range.max(), Some(Point3::new(1.0, 5.0, 3.0)));
        assert_eq!(range.center(), Some(Point3::new(0.0, 1.5, 1.5)));
    }

    #[test]
    fn merging_empty_keeps_bounds() {
        let mut a = Range3::from_corners(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0));
        a.merge(&Range3::new());
        assert_eq!(a.max(), Some(Point3::new(1.0, 1.0, 1.0)));

        let mut empty = Range3::new();
        empty.merge(&a);
        assert_eq!(empty, a);
    }
}
