use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Head rotation in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Facing {
    pub yaw: f32,
    pub pitch: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub world: String,
    #[serde(flatten)]
    pub coordinate: Coordinate,
    #[serde(default)]
    pub facing: Facing,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateDelta {
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
}

impl Coordinate {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    pub fn delta_to(self, other: Coordinate) -> CoordinateDelta {
        CoordinateDelta {
            dx: other.x - self.x,
            dy: other.y - self.y,
            dz: other.z - self.z,
        }
    }

    pub fn block_x(self) -> i32 {
        self.x.floor() as i32
    }

    pub fn block_y(self) -> i32 {
        self.y.floor() as i32
    }

    pub fn block_z(self) -> i32 {
        self.z.floor() as i32
    }
}

impl CoordinateDelta {
    pub fn length_squared(self) -> f64 {
        self.dx * self.dx + self.dy * self.dy + self.dz * self.dz
    }
}

impl Location {
    pub fn new(world: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self {
            world: world.into(),
            coordinate: Coordinate::new(x, y, z),
            facing: Facing::default(),
        }
    }

    pub fn with_facing(mut self, facing: Facing) -> Self {
        self.facing = facing;
        self
    }

    pub fn is_valid(&self) -> bool {
        !self.world.is_empty() && self.coordinate.is_finite()
    }

    /// Squared straight-line distance, or `None` across worlds.
    pub fn distance_squared(&self, other: &Location) -> Option<f64> {
        if self.world != other.world {
            return None;
        }
        Some(self.coordinate.delta_to(other.coordinate).length_squared())
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:.1}, {:.1}, {:.1})",
            self.world, self.coordinate.x, self.coordinate.y, self.coordinate.z
        )
    }
}
