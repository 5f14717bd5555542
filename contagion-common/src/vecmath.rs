use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul};

/// Position or heading in world units.
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    #[inline(always)]
    pub fn new(x: f32, y: f32) -> Self {
        Vec2 { x, y }
    }

    #[inline(always)]
    pub fn zero() -> Self {
        Vec2::default()
    }

    #[inline(always)]
    pub fn length_squared(&self) -> f32 {
        self.x * self.x + self.y * self.y
    }

    pub fn length(&self) -> f32 {
        self.length_squared().sqrt()
    }

    /// Unit heading, or zero for a degenerate vector.
    pub fn normalize_or_zero(&self) -> Self {
        let len = self.length();
        if len > 1e-6 {
            *self * (1.0 / len)
        } else {
            Vec2::zero()
        }
    }

    /// Squared Euclidean distance, compared against the squared transmission radius.
    #[inline(always)]
    pub fn distance_squared(&self, other: Vec2) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }
}

impl Add for Vec2 {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Vec2::new(self.x + other.x, self.y + other.y)
    }
}

impl Mul<f32> for Vec2 {
    type Output = Self;
    fn mul(self, factor: f32) -> Self {
        Vec2::new(self.x * factor, self.y * factor)
    }
}

#[inline(always)]
pub fn clamp(value: f32, min: f32, max: f32) -> f32 {
    value.max(min).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_handles_degenerate_vectors() {
        assert_eq!(Vec2::zero().normalize_or_zero(), Vec2::zero());
        let unit = Vec2::new(3.0, 4.0).normalize_or_zero();
        assert!((unit.length() - 1.0).abs() < 1e-6);
        assert_eq!(Vec2::new(1.0, 1.0).distance_squared(Vec2::new(4.0, 5.0)), 25.0);
    }
}
