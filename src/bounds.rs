use na::{Point3, Vector3};

/// Axis-aligned bounding box.
///
/// A box with both corners at the origin doubles as the "unset" sentinel and
/// is absorbed by [`Aabb::merge`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Point3<f32>,
    pub max: Point3<f32>,
}

impl Aabb {
    /// Box spanned by two opposite corners, in any order.
    pub fn new(a: Point3<f32>, b: Point3<f32>) -> Self {
        Self {
            min: a.inf(&b),
            max: a.sup(&b),
        }
    }

    pub fn empty() -> Self {
        Self {
            min: Point3::origin(),
            max: Point3::origin(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min == Point3::origin() && self.max == Point3::origin()
    }

    pub fn from_sphere(center: Point3<f32>, radius: f32) -> Self {
        let r = Vector3::repeat(radius);
        Self {
            min: center - r,
            max: center + r,
        }
    }

    /// Min/max reduction over a point set. No points gives the sentinel.
    pub fn from_points<'a, I>(points: I) -> Self
    where
        I: IntoIterator<Item = &'a Point3<f32>>,
    {
        let mut points = points.into_iter();
        let first = match points.next() {
            Some(p) => *p,
            None => return Self::empty(),
        };

        points.fold(Self { min: first, max: first }, |acc, p| Self {
            min: acc.min.inf(p),
            max: acc.max.sup(p),
        })
    }

    pub fn merge(&self, other: &Self) -> Self {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }

        Self {
            min: self.min.inf(&other.min),
            max: self.max.sup(&other.max),
        }
    }

    pub fn extent(&self) -> Vector3<f32> {
        self.max - self.min
    }

    pub fn centroid(&self) -> Point3<f32> {
        na::center(&self.min, &self.max)
    }

    /// Longest axis (0=x, 1=y, 2=z). Ties resolve towards x, then y.
    pub fn longest_axis(&self) -> usize {
        let d = self.extent();
        if d.x >= d.y && d.x >= d.z {
            0
        } else if d.y >= d.z {
            1
        } else {
            2
        }
    }

    pub fn contains(&self, other: &Self) -> bool {
        (0..3).all(|axis| self.min[axis] <= other.min[axis] && other.max[axis] <= self.max[axis])
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}
