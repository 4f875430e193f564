use serde::de::{Error, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Add, AddAssign, Div, Index, IndexMut, Mul, Neg, Sub, SubAssign};

/// A point (or displacement) in D-dimensional space.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Point<const D: usize> {
    pub coords: [f64; D],
}

/// Convenience alias for the planar meshes (vertex, Potts, CA lattice).
pub type Vec2 = Point<2>;

impl<const D: usize> Point<D> {
    /// Creates a new point from its coordinates.
    #[inline(always)]
    pub const fn new(coords: [f64; D]) -> Self {
        Self { coords }
    }

    /// Creates the origin / zero vector.
    #[inline(always)]
    pub const fn zero() -> Self {
        Self { coords: [0.0; D] }
    }

    /// Unit vector along `axis`.
    pub fn unit(axis: usize) -> Self {
        let mut coords = [0.0; D];
        if axis < D {
            coords[axis] = 1.0;
        }
        Self { coords }
    }

    #[inline(always)]
    pub fn dot(&self, other: &Self) -> f64 {
        self.coords.iter().zip(other.coords.iter()).map(|(a, b)| a * b).sum()
    }

    #[inline(always)]
    pub fn length_squared(&self) -> f64 {
        self.dot(self)
    }

    #[inline(always)]
    pub fn length(&self) -> f64 {
        self.length_squared().sqrt()
    }

    #[inline(always)]
    pub fn distance_squared(&self, other: &Self) -> f64 {
        (*self - *other).length_squared()
    }

    #[inline(always)]
    pub fn distance(&self, other: &Self) -> f64 {
        self.distance_squared(other).sqrt()
    }

    /// Scales the vector by a scalar value.
    #[inline(always)]
    pub fn scale(&self, scalar: f64) -> Self {
        let mut coords = self.coords;
        coords.iter_mut().for_each(|c| *c *= scalar);
        Self { coords }
    }

    /// Returns a normalized version of the vector (unit vector).
    /// Returns a zero vector if the original vector's length is zero or very small.
    pub fn normalize_or_zero(&self) -> Self {
        let len_sq = self.length_squared();
        if len_sq > 1e-24 {
            self.scale(1.0 / len_sq.sqrt())
        } else {
            Self::zero()
        }
    }

    /// True when every coordinate is finite.
    pub fn is_finite(&self) -> bool {
        self.coords.iter().all(|c| c.is_finite())
    }

    /// Component-wise mean of a non-empty set of points.
    pub fn mean<'a, I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Self>,
    {
        let mut sum = Self::zero();
        let mut count = 0usize;
        for p in points {
            sum += *p;
            count += 1;
        }
        (count > 0).then(|| sum / count as f64)
    }
}

impl Point<2> {
    #[inline(always)]
    pub fn x(&self) -> f64 {
        self.coords[0]
    }

    #[inline(always)]
    pub fn y(&self) -> f64 {
        self.coords[1]
    }

    /// z-component of the 3D cross product of two planar vectors.
    #[inline(always)]
    pub fn cross(&self, other: &Self) -> f64 {
        self.coords[0] * other.coords[1] - self.coords[1] * other.coords[0]
    }

    /// The vector rotated a quarter turn counter-clockwise.
    #[inline(always)]
    pub fn perpendicular(&self) -> Self {
        Self::new([-self.coords[1], self.coords[0]])
    }
}

impl<const D: usize> Default for Point<D> {
    fn default() -> Self {
        Self::zero()
    }
}

impl<const D: usize> Index<usize> for Point<D> {
    type Output = f64;
    fn index(&self, axis: usize) -> &f64 {
        &self.coords[axis]
    }
}

impl<const D: usize> IndexMut<usize> for Point<D> {
    fn index_mut(&mut self, axis: usize) -> &mut f64 {
        &mut self.coords[axis]
    }
}

// Implement standard operators for convenience
impl<const D: usize> Add for Point<D> {
    type Output = Self;
    fn add(mut self, other: Self) -> Self {
        self += other;
        self
    }
}

impl<const D: usize> AddAssign for Point<D> {
    fn add_assign(&mut self, other: Self) {
        for (a, b) in self.coords.iter_mut().zip(other.coords.iter()) {
            *a += b;
        }
    }
}

impl<const D: usize> Sub for Point<D> {
    type Output = Self;
    fn sub(mut self, other: Self) -> Self {
        self -= other;
        self
    }
}

impl<const D: usize> SubAssign for Point<D> {
    fn sub_assign(&mut self, other: Self) {
        for (a, b) in self.coords.iter_mut().zip(other.coords.iter()) {
            *a -= b;
        }
    }
}

impl<const D: usize> Neg for Point<D> {
    type Output = Self;
    fn neg(self) -> Self {
        self.scale(-1.0)
    }
}

impl<const D: usize> Mul<f64> for Point<D> {
    type Output = Self;
    fn mul(self, scalar: f64) -> Self {
        self.scale(scalar)
    }
}

impl<const D: usize> Div<f64> for Point<D> {
    type Output = Self;
    fn div(self, scalar: f64) -> Self {
        self.scale(1.0 / scalar)
    }
}

impl<const D: usize> From<[f64; D]> for Point<D> {
    fn from(coords: [f64; D]) -> Self {
        Self::new(coords)
    }
}

// Serialized as a fixed-length tuple so that JSON, bincode and MessagePack all agree.
impl<const D: usize> Serialize for Point<D> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeTuple;
        let mut tuple = serializer.serialize_tuple(D)?;
        for coord in &self.coords {
            tuple.serialize_element(coord)?;
        }
        tuple.end()
    }
}

impl<'de, const D: usize> Deserialize<'de> for Point<D> {
    fn deserialize<DE>(deserializer: DE) -> Result<Self, DE::Error>
    where
        DE: Deserializer<'de>,
    {
        struct CoordsVisitor<const D: usize>(PhantomData<[f64; D]>);

        impl<'de, const D: usize> Visitor<'de> for CoordsVisitor<D> {
            type Value = Point<D>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_fmt(format_args!("an array of {D} coordinates"))
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut coords = [0.0; D];
                for (i, coord) in coords.iter_mut().enumerate() {
                    *coord = seq
                        .next_element()?
                        .ok_or_else(|| Error::invalid_length(i, &self))?;
                }
                Ok(Point::new(coords))
            }
        }

        deserializer.deserialize_tuple(D, CoordsVisitor::<D>(PhantomData))
    }
}

/// Clamps a value between a minimum and maximum.
pub fn clamp(value: f64, min: f64, max: f64) -> f64 {
    value.max(min).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_is_component_wise() {
        let a = Point::new([1.0, 2.0, 3.0]);
        let b = Point::new([0.5, -2.0, 1.0]);
        assert_eq!(a + b, Point::new([1.5, 0.0, 4.0]));
        assert_eq!(a - b, Point::new([0.5, 4.0, 2.0]));
        assert_eq!(a * 2.0, Point::new([2.0, 4.0, 6.0]));
        assert_eq!(-b, Point::new([-0.5, 2.0, -1.0]));
    }

    #[test]
    fn mean_of_square_corners() {
        let corners = [
            Vec2::new([0.0, 0.0]),
            Vec2::new([2.0, 0.0]),
            Vec2::new([0.0, 2.0]),
            Vec2::new([2.0, 2.0]),
        ];
        assert_eq!(Point::mean(corners.iter()), Some(Vec2::new([1.0, 1.0])));
        assert_eq!(Point::<2>::mean(std::iter::empty()), None);
    }

    #[test]
    fn json_is_a_plain_array() {
        let p = Vec2::new([1.5, -3.0]);
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, "[1.5,-3.0]");
        let back: Vec2 = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
        assert!(serde_json::from_str::<Vec2>("[1.0]").is_err());
    }

    #[test]
    fn cross_and_perpendicular() {
        let x = Vec2::unit(0);
        let y = Vec2::unit(1);
        assert_eq!(x.cross(&y), 1.0);
        assert_eq!(x.perpendicular(), y);
    }
}
