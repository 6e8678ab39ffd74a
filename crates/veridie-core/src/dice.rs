//! Dice types and the roll engine
//!
//! A [`Cast`] is a sequence of die-roll slots of a single kind. Slots hold
//! values in `[1, max]` for their kind; zero encodes "not yet rolled".
//! Requests travel over the wire zeroed, the elected generator fills them
//! and ships the result back as a response.

use std::fmt;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::errors::ParseError;

// ----------------------------------------------------------------------------
// Die Kind
// ----------------------------------------------------------------------------

/// One of the supported die kinds; bounds the value of each slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Die {
    D4,
    D6,
    D8,
    D10,
    D12,
    D16,
    D20,
    D100,
}

impl Die {
    /// Every supported kind, in protocol order
    pub const ALL: [Die; 8] = [
        Die::D4,
        Die::D6,
        Die::D8,
        Die::D10,
        Die::D12,
        Die::D16,
        Die::D20,
        Die::D100,
    ];

    /// Largest value a slot of this kind may hold
    pub fn max(self) -> u32 {
        match self {
            Die::D4 => 4,
            Die::D6 => 6,
            Die::D8 => 8,
            Die::D10 => 10,
            Die::D12 => 12,
            Die::D16 => 16,
            Die::D20 => 20,
            Die::D100 => 100,
        }
    }
}

impl fmt::Display for Die {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "D{}", self.max())
    }
}

impl FromStr for Die {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "D4" => Ok(Die::D4),
            "D6" => Ok(Die::D6),
            "D8" => Ok(Die::D8),
            "D10" => Ok(Die::D10),
            "D12" => Ok(Die::D12),
            "D16" => Ok(Die::D16),
            "D20" => Ok(Die::D20),
            "D100" => Ok(Die::D100),
            other => Err(ParseError::UnknownDieKind(other.to_string())),
        }
    }
}

// ----------------------------------------------------------------------------
// Cast
// ----------------------------------------------------------------------------

/// A sequence of die-roll slots of a single kind
///
/// The kind is part of the protocol and is preserved round-trip through the
/// wire codec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cast {
    die: Die,
    values: Vec<u32>,
}

impl Cast {
    /// Create an unrolled cast: `size` slots, all zero
    pub fn zeroed(die: Die, size: usize) -> Self {
        Self {
            die,
            values: vec![0; size],
        }
    }

    /// Create a cast from already-rolled values
    pub fn with_values(die: Die, values: Vec<u32>) -> Self {
        Self { die, values }
    }

    pub fn die(&self) -> Die {
        self.die
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[u32] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [u32] {
        &mut self.values
    }
}

/// Render a cast's values as text: `"v1;v2;…;vN;"`
///
/// This is the form shown to the user in a response display.
pub fn write_values(cast: &Cast) -> String {
    let mut out = String::with_capacity(cast.len() * 4);
    for value in cast.values() {
        out.push_str(&value.to_string());
        out.push(';');
    }
    out
}

/// Count the slots whose value reaches the threshold
pub fn success_count(cast: &Cast, threshold: u32) -> u32 {
    cast.values().iter().filter(|&&v| v >= threshold).count() as u32
}

// ----------------------------------------------------------------------------
// Roll Engine
// ----------------------------------------------------------------------------

/// Source of roll results; fills every slot of a cast
pub trait Engine {
    fn fill(&mut self, cast: &mut Cast);
}

/// Default engine: uniformly distributed values, sorted ascending
pub struct UniformEngine {
    rng: StdRng,
}

impl UniformEngine {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic engine for reproducible runs
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for UniformEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for UniformEngine {
    fn fill(&mut self, cast: &mut Cast) {
        let max = cast.die().max();
        for value in cast.values_mut() {
            *value = self.rng.gen_range(1..=max);
        }
        cast.values_mut().sort_unstable();
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_die_round_trips_through_text() {
        for die in Die::ALL {
            assert_eq!(die.to_string().parse::<Die>().unwrap(), die);
        }
        assert!("D7".parse::<Die>().is_err());
        assert!("".parse::<Die>().is_err());
    }

    #[test]
    fn test_zeroed_cast() {
        let cast = Cast::zeroed(Die::D20, 5);
        assert_eq!(cast.die(), Die::D20);
        assert_eq!(cast.len(), 5);
        assert!(cast.values().iter().all(|&v| v == 0));
    }

    #[test]
    fn test_write_values_trailing_separator() {
        let cast = Cast::with_values(Die::D6, vec![3, 3, 3, 3]);
        assert_eq!(write_values(&cast), "3;3;3;3;");

        let empty = Cast::zeroed(Die::D6, 0);
        assert_eq!(write_values(&empty), "");
    }

    #[test]
    fn test_success_count_at_threshold() {
        let cast = Cast::with_values(Die::D10, vec![1, 5, 5, 9]);
        assert_eq!(success_count(&cast, 5), 3);
        assert_eq!(success_count(&cast, 10), 0);
        assert_eq!(success_count(&cast, 1), 4);
    }

    #[test]
    fn test_uniform_engine_respects_bounds_and_sorts() {
        let mut engine = UniformEngine::seeded(7);
        for die in Die::ALL {
            let mut cast = Cast::zeroed(die, 32);
            engine.fill(&mut cast);
            assert!(cast.values().iter().all(|&v| (1..=die.max()).contains(&v)));
            assert!(cast.values().windows(2).all(|w| w[0] <= w[1]));
        }
    }
}
