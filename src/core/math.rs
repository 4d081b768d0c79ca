//! Game-space math types.
//!
//! Plain `f32` vectors and rotators as reported by the game process.
//! Nothing here simulates physics; these are carriers for state that
//! the game already computed.

use serde::{Deserialize, Serialize};

/// 3D vector in game units (uu).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    /// X component
    pub x: f32,
    /// Y component
    pub y: f32,
    /// Z component
    pub z: f32,
}

impl Vector3 {
    /// Zero vector.
    pub const ZERO: Vector3 = Vector3 { x: 0.0, y: 0.0, z: 0.0 };

    /// Create a new vector.
    #[inline]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Squared length.
    #[inline]
    pub fn length_squared(self) -> f32 {
        self.x * self.x + self.y * self.y + self.z * self.z
    }

    /// Euclidean length.
    #[inline]
    pub fn length(self) -> f32 {
        self.length_squared().sqrt()
    }

    /// True when every component is finite.
    #[inline]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Component-wise add.
    #[inline]
    pub fn add(self, other: Vector3) -> Vector3 {
        Vector3::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    /// Scale by a scalar.
    #[inline]
    pub fn scale(self, factor: f32) -> Vector3 {
        Vector3::new(self.x * factor, self.y * factor, self.z * factor)
    }
}

/// Orientation in radians.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rotator {
    /// Pitch
    pub pitch: f32,
    /// Yaw
    pub yaw: f32,
    /// Roll
    pub roll: f32,
}

impl Rotator {
    /// Create a new rotator.
    pub const fn new(pitch: f32, yaw: f32, roll: f32) -> Self {
        Self { pitch, yaw, roll }
    }

    /// True when every component is finite.
    pub fn is_finite(self) -> bool {
        self.pitch.is_finite() && self.yaw.is_finite() && self.roll.is_finite()
    }
}

/// Rigid body snapshot of an actor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Physics {
    /// World location
    pub location: Vector3,
    /// Orientation
    pub rotation: Rotator,
    /// Linear velocity (uu/s)
    pub velocity: Vector3,
    /// Angular velocity (rad/s)
    pub angular_velocity: Vector3,
}

impl Physics {
    /// Rejects NaN/inf anywhere in the snapshot.
    pub fn is_finite(&self) -> bool {
        self.location.is_finite()
            && self.rotation.is_finite()
            && self.velocity.is_finite()
            && self.angular_velocity.is_finite()
    }
}

/// Car collision box.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BoxShape {
    /// Length
    pub length: f32,
    /// Width
    pub width: f32,
    /// Height
    pub height: f32,
}

/// Ball collision shape.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum CollisionShape {
    /// Standard ball
    Sphere {
        /// Sphere diameter
        diameter: f32,
    },
    /// Hockey puck
    Cylinder {
        /// Cylinder diameter
        diameter: f32,
        /// Cylinder height
        height: f32,
    },
    /// Box (cube ball mutator)
    Box(BoxShape),
}

impl Default for CollisionShape {
    fn default() -> Self {
        CollisionShape::Sphere { diameter: 182.5 }
    }
}
