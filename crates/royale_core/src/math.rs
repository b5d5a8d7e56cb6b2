//! Fixed-point math utilities for the battle simulation.
//!
//! Every position, range and speed on the arena is fixed-point so two
//! peers stepping the same deployments reach bit-identical states.
//! Floating-point operations can produce different results on different CPUs.

use fixed::types::I32F32;
use serde::{Deserialize, Serialize};

/// Fixed-point number type for all simulation math.
///
/// Uses 32 bits for integer part and 32 bits for fractional part.
/// Arena coordinates stay well below a thousand pixels, so squared
/// distances never approach the integer limit.
pub type Fixed = I32F32;

/// Fixed-point 2D vector in arena pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Vec2Fixed {
    /// X coordinate.
    #[serde(with = "fixed_serde")]
    pub x: Fixed,
    /// Y coordinate.
    #[serde(with = "fixed_serde")]
    pub y: Fixed,
}

/// Serde support for fixed-point numbers.
///
/// Serializes fixed-point numbers as their raw bit representation (i64)
/// to preserve exact precision across serialization boundaries.
pub mod fixed_serde {
    use super::Fixed;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a fixed-point number as its raw bit representation.
    pub fn serialize<S>(value: &Fixed, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        value.to_bits().serialize(serializer)
    }

    /// Deserialize a fixed-point number from its raw bit representation.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Fixed, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bits = i64::deserialize(deserializer)?;
        Ok(Fixed::from_bits(bits))
    }
}

/// Serde support for `Option<Fixed>`.
///
/// Serializes optional fixed-point numbers via their raw bit representation,
/// preserving `None` as a serialized `None` value.
pub mod option_fixed_serde {
    use super::Fixed;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize an optional fixed-point number.
    #[allow(clippy::ref_option)]
    pub fn serialize<S>(value: &Option<Fixed>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        value.map(Fixed::to_bits).serialize(serializer)
    }

    /// Deserialize an optional fixed-point number.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Fixed>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt = Option::<i64>::deserialize(deserializer)?;
        Ok(opt.map(Fixed::from_bits))
    }
}

impl Vec2Fixed {
    /// Create a new fixed-point vector.
    #[must_use]
    pub const fn new(x: Fixed, y: Fixed) -> Self {
        Self { x, y }
    }

    /// Create a vector from whole pixel coordinates.
    #[must_use]
    pub fn from_px(x: i32, y: i32) -> Self {
        Self::new(Fixed::from_num(x), Fixed::from_num(y))
    }

    /// Zero vector.
    pub const ZERO: Self = Self {
        x: Fixed::ZERO,
        y: Fixed::ZERO,
    };

    /// Calculate squared distance (avoids sqrt for comparisons).
    #[must_use]
    pub fn distance_squared(self, other: Self) -> Fixed {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    /// Euclidean distance to `other`.
    #[must_use]
    pub fn distance(self, other: Self) -> Fixed {
        fixed_sqrt(self.distance_squared(other))
    }

    /// Normalize vector using fixed-point math.
    #[must_use]
    pub fn normalize(self) -> Self {
        let len_sq = self.x * self.x + self.y * self.y;

        if len_sq == Fixed::ZERO {
            return Self::ZERO;
        }

        let len = fixed_sqrt(len_sq);
        if len == Fixed::ZERO {
            return Self::ZERO;
        }

        Self::new(self.x / len, self.y / len)
    }

    /// Move from `self` toward `goal` by at most `max_step`.
    ///
    /// Lands exactly on `goal` when it is closer than `max_step`.
    #[must_use]
    pub fn step_towards(self, goal: Self, max_step: Fixed) -> Self {
        if max_step <= Fixed::ZERO {
            return self;
        }
        let remaining = self.distance(goal);
        if remaining <= max_step {
            return goal;
        }
        let dir = (goal - self).normalize();
        Self::new(self.x + dir.x * max_step, self.y + dir.y * max_step)
    }

    /// Integer pixel coordinates, truncated toward zero.
    #[must_use]
    pub fn to_px(self) -> (i32, i32) {
        (self.x.to_num::<i32>(), self.y.to_num::<i32>())
    }
}

/// Computes the square root of a fixed-point number using binary search.
#[must_use]
pub fn fixed_sqrt(value: Fixed) -> Fixed {
    if value <= Fixed::ZERO {
        return Fixed::ZERO;
    }

    let mut low = Fixed::ZERO;
    let mut high = if value > Fixed::from_num(1) {
        value
    } else {
        Fixed::from_num(1)
    };

    for _ in 0..48 {
        let mid = (low + high) / Fixed::from_num(2);
        let mid_sq = mid.saturating_mul(mid);

        if mid_sq <= value {
            low = mid;
        } else {
            high = mid;
        }
    }

    low
}

impl std::ops::Add for Vec2Fixed {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
        }
    }
}

impl std::ops::Sub for Vec2Fixed {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn epsilon() -> Fixed {
        Fixed::from_num(1) / Fixed::from_num(1000)
    }

    #[test]
    fn test_vec2_distance_squared() {
        let a = Vec2Fixed::from_px(3, 0);
        let b = Vec2Fixed::from_px(0, 4);
        // 3² + 4² = 25
        assert_eq!(a.distance_squared(b), Fixed::from_num(25));
    }

    #[test]
    fn test_distance_on_arena_scale() {
        let a = Vec2Fixed::from_px(264, 913);
        let b = Vec2Fixed::from_px(264, 813);
        let d = a.distance(b);
        assert!((d - Fixed::from_num(100)).abs() < epsilon(), "got {d:?}");
    }

    #[test]
    fn test_fixed_determinism() {
        let a = Fixed::from_num(1) / Fixed::from_num(3);
        let b = Fixed::from_num(1) / Fixed::from_num(3);
        assert_eq!(a, b);

        let result1 = a * Fixed::from_num(7);
        let result2 = b * Fixed::from_num(7);
        assert_eq!(result1, result2);
    }

    #[test]
    fn test_vec2_normalize() {
        let v = Vec2Fixed::from_px(3, 4);
        let norm = v.normalize();

        let len_sq = norm.distance_squared(Vec2Fixed::ZERO);
        let one = Fixed::from_num(1);
        assert!(
            (len_sq - one).abs() < epsilon(),
            "normalized vector length² should be ~1, got {len_sq:?}"
        );

        // norm.x * 4 should equal norm.y * 3
        let ratio_diff = (norm.x * Fixed::from_num(4)) - (norm.y * Fixed::from_num(3));
        assert!(ratio_diff.abs() < epsilon(), "direction not preserved: {ratio_diff:?}");
    }

    #[test]
    fn test_step_towards_does_not_overshoot() {
        let start = Vec2Fixed::from_px(0, 0);
        let goal = Vec2Fixed::from_px(0, 10);

        assert_eq!(start.step_towards(goal, Fixed::from_num(25)), goal);

        let partial = start.step_towards(goal, Fixed::from_num(4));
        assert!((partial.y - Fixed::from_num(4)).abs() < epsilon());
        assert_eq!(partial.x, Fixed::ZERO);
    }

    #[test]
    fn test_step_towards_zero_step_is_noop() {
        let start = Vec2Fixed::from_px(5, 5);
        let goal = Vec2Fixed::from_px(50, 50);
        assert_eq!(start.step_towards(goal, Fixed::ZERO), start);
    }
}
