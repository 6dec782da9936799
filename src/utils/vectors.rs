use std::fmt::Display;

use approx::{AbsDiffEq, RelativeEq};
use auto_ops::impl_op_ex;
use nalgebra::{Vector3, Vector4};
use serde::{Deserialize, Serialize};

/// A vector with three components.
///
/// Within this crate a [`Vec3`] is almost always a velocity
/// ($`\vec{\beta}`$) or a 3-momentum in MeV.
#[derive(Copy, Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    /// The x-component of the vector
    pub x: f64,
    /// The y-component of the vector
    pub y: f64,
    /// The z-component of the vector
    pub z: f64,
}

impl Vec3 {
    /// Create a new 3-vector from its components
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Vec3 { x, y, z }
    }

    /// Create a zero vector
    pub const fn zero() -> Self {
        Vec3::new(0.0, 0.0, 0.0)
    }

    /// Compute the dot product of this [`Vec3`] and another
    pub fn dot(&self, other: &Vec3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// The squared magnitude of the vector
    pub fn mag2(&self) -> f64 {
        self.dot(self)
    }

    /// The magnitude of the vector
    pub fn mag(&self) -> f64 {
        f64::sqrt(self.mag2())
    }
}

impl Display for Vec3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:6.3}, {:6.3}, {:6.3}]", self.x, self.y, self.z)
    }
}

impl From<Vec3> for Vector3<f64> {
    fn from(value: Vec3) -> Self {
        Vector3::new(value.x, value.y, value.z)
    }
}

impl From<Vector3<f64>> for Vec3 {
    fn from(value: Vector3<f64>) -> Self {
        Vec3::new(value.x, value.y, value.z)
    }
}

impl_op_ex!(+ |a: &Vec3, b: &Vec3| -> Vec3 { Vec3::new(a.x + b.x, a.y + b.y, a.z + b.z) });
impl_op_ex!(-|a: &Vec3, b: &Vec3| -> Vec3 { Vec3::new(a.x - b.x, a.y - b.y, a.z - b.z) });
impl_op_ex!(-|a: &Vec3| -> Vec3 { Vec3::new(-a.x, -a.y, -a.z) });
impl_op_ex!(*|a: &Vec3, b: &f64| -> Vec3 { Vec3::new(a.x * b, a.y * b, a.z * b) });
impl_op_ex!(/ |a: &Vec3, b: &f64| -> Vec3 { Vec3::new(a.x / b, a.y / b, a.z / b) });

impl AbsDiffEq for Vec3 {
    type Epsilon = <f64 as AbsDiffEq>::Epsilon;

    fn default_epsilon() -> Self::Epsilon {
        f64::default_epsilon()
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: Self::Epsilon) -> bool {
        f64::abs_diff_eq(&self.x, &other.x, epsilon)
            && f64::abs_diff_eq(&self.y, &other.y, epsilon)
            && f64::abs_diff_eq(&self.z, &other.z, epsilon)
    }
}

impl RelativeEq for Vec3 {
    fn default_max_relative() -> Self::Epsilon {
        f64::default_max_relative()
    }

    fn relative_eq(
        &self,
        other: &Self,
        epsilon: Self::Epsilon,
        max_relative: Self::Epsilon,
    ) -> bool {
        f64::relative_eq(&self.x, &other.x, epsilon, max_relative)
            && f64::relative_eq(&self.y, &other.y, epsilon, max_relative)
            && f64::relative_eq(&self.z, &other.z, epsilon, max_relative)
    }
}

/// A four-momentum whose last component stores the energy.
///
/// Components are stored in the units of the originating table (MeV for
/// event records); invariant quantities use the $`+---`$ signature.
#[derive(Copy, Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec4 {
    /// Momentum in the x-direction
    pub px: f64,
    /// Momentum in the y-direction
    pub py: f64,
    /// Momentum in the z-direction
    pub pz: f64,
    /// The energy
    pub e: f64,
}

impl Vec4 {
    /// Create a new 4-momentum from its components
    pub const fn new(px: f64, py: f64, pz: f64, e: f64) -> Self {
        Vec4 { px, py, pz, e }
    }

    /// The energy of the 4-momentum
    pub fn e(&self) -> f64 {
        self.e
    }

    /// The 3-momentum contained in this 4-momentum
    pub fn p3(&self) -> Vec3 {
        Vec3::new(self.px, self.py, self.pz)
    }

    /// The $`\vec{\beta}`$ vector $`\frac{\vec{p}}{E}`$
    ///
    /// Undefined for zero energy; callers reject degenerate
    /// four-momenta before computing velocities.
    pub fn beta(&self) -> Vec3 {
        self.p3() / self.e
    }

    /// The squared invariant mass corresponding to this 4-momentum
    pub fn m2(&self) -> f64 {
        self.e * self.e - self.p3().mag2()
    }

    /// The invariant mass corresponding to this 4-momentum
    pub fn m(&self) -> f64 {
        f64::sqrt(self.m2())
    }

    /// Gives the vector boosted along a $`\vec{\beta}`$ vector.
    ///
    /// The receiver is not modified; a boosted copy is returned.
    pub fn boost(&self, beta: &Vec3) -> Self {
        let b2 = beta.dot(beta);
        if b2 == 0.0 {
            return *self;
        }
        let gamma = 1.0 / f64::sqrt(1.0 - b2);
        let p3 = self.p3() + *beta * ((gamma - 1.0) * self.p3().dot(beta) / b2 + gamma * self.e);
        Vec4::new(p3.x, p3.y, p3.z, gamma * (self.e + beta.dot(&self.p3())))
    }
}

impl Display for Vec4 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{:6.3}, {:6.3}, {:6.3}; {:6.3}]",
            self.px, self.py, self.pz, self.e
        )
    }
}

impl From<Vec4> for Vector4<f64> {
    fn from(value: Vec4) -> Self {
        Vector4::new(value.px, value.py, value.pz, value.e)
    }
}

impl From<Vector4<f64>> for Vec4 {
    fn from(value: Vector4<f64>) -> Self {
        Vec4::new(value.x, value.y, value.z, value.w)
    }
}

impl_op_ex!(+ |a: &Vec4, b: &Vec4| -> Vec4 {
    Vec4::new(a.px + b.px, a.py + b.py, a.pz + b.pz, a.e + b.e)
});
impl_op_ex!(-|a: &Vec4, b: &Vec4| -> Vec4 {
    Vec4::new(a.px - b.px, a.py - b.py, a.pz - b.pz, a.e - b.e)
});

impl<'a> std::iter::Sum<&'a Vec4> for Vec4 {
    fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |a, b| a + b)
    }
}

impl std::iter::Sum<Vec4> for Vec4 {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |a, b| a + b)
    }
}

impl AbsDiffEq for Vec4 {
    type Epsilon = <f64 as AbsDiffEq>::Epsilon;

    fn default_epsilon() -> Self::Epsilon {
        f64::default_epsilon()
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: Self::Epsilon) -> bool {
        f64::abs_diff_eq(&self.px, &other.px, epsilon)
            && f64::abs_diff_eq(&self.py, &other.py, epsilon)
            && f64::abs_diff_eq(&self.pz, &other.pz, epsilon)
            && f64::abs_diff_eq(&self.e, &other.e, epsilon)
    }
}

impl RelativeEq for Vec4 {
    fn default_max_relative() -> Self::Epsilon {
        f64::default_max_relative()
    }

    fn relative_eq(
        &self,
        other: &Self,
        epsilon: Self::Epsilon,
        max_relative: Self::Epsilon,
    ) -> bool {
        f64::relative_eq(&self.px, &other.px, epsilon, max_relative)
            && f64::relative_eq(&self.py, &other.py, epsilon, max_relative)
            && f64::relative_eq(&self.pz, &other.pz, epsilon, max_relative)
            && f64::relative_eq(&self.e, &other.e, epsilon, max_relative)
    }
}
