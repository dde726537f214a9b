//! Deflation-based extraction of singular triplets.
//!
//! The three presets share one algorithm and differ only in their iteration
//! budget and convergence tolerance. Extracted vectors are never
//! re-orthogonalized against earlier ones, so singular values come out in
//! deflation order, which is usually but not always non-increasing.

mod power;

use std::fmt;
use std::str::FromStr;

use ndarray::Array1;
use serde::{Deserialize, Serialize};

pub use power::{PowerIterationDecomposer, NORM_EPSILON};

/// Iteration budget and convergence tolerance for one decomposition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecomposeOptions {
    pub max_iterations: usize,
    /// Stop once successive σ estimates differ by less than this
    pub tolerance: f64,
}

impl Default for DecomposeOptions {
    fn default() -> Self {
        Preset::Balanced.options()
    }
}

/// Named iteration/tolerance pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Fast,
    Balanced,
    Precise,
}

impl Preset {
    pub fn options(self) -> DecomposeOptions {
        match self {
            Preset::Fast => DecomposeOptions {
                max_iterations: 20,
                tolerance: 1e-5,
            },
            Preset::Balanced => DecomposeOptions {
                max_iterations: 50,
                tolerance: 1e-6,
            },
            Preset::Precise => DecomposeOptions {
                max_iterations: 100,
                tolerance: 1e-8,
            },
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Preset::Fast => "fast",
            Preset::Balanced => "balanced",
            Preset::Precise => "precise",
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPreset(pub String);

impl fmt::Display for UnknownPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown preset '{}' (expected fast, balanced or precise)",
            self.0
        )
    }
}

impl std::error::Error for UnknownPreset {}

impl FromStr for Preset {
    type Err = UnknownPreset;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(Preset::Fast),
            "balanced" => Ok(Preset::Balanced),
            "precise" => Ok(Preset::Precise),
            _ => Err(UnknownPreset(s.to_string())),
        }
    }
}

/// One extracted component `(u, σ, v)` plus how it converged.
#[derive(Debug, Clone, PartialEq)]
pub struct Triplet {
    pub u: Array1<f64>,
    pub sigma: f64,
    pub v: Array1<f64>,
    pub iterations: usize,
    pub converged: bool,
}

/// Components in extraction order for an `rows × cols` matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct SingularTriplets {
    rows: usize,
    cols: usize,
    components: Vec<Triplet>,
}

impl SingularTriplets {
    pub fn new(rows: usize, cols: usize, components: Vec<Triplet>) -> Self {
        Self {
            rows,
            cols,
            components,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn components(&self) -> &[Triplet] {
        &self.components
    }

    pub fn singular_values(&self) -> Vec<f64> {
        self.components.iter().map(|t| t.sigma).collect()
    }

    /// Sum of iterations spent across all components.
    pub fn total_iterations(&self) -> usize {
        self.components.iter().map(|t| t.iterations).sum()
    }

    pub fn converged_count(&self) -> usize {
        self.components.iter().filter(|t| t.converged).count()
    }

    /// Whether every σ exceeds its predecessor by at most `slack`.
    ///
    /// Strict ordering is not guaranteed by power iteration with deflation,
    /// so callers check ordering only up to a tolerance.
    pub fn is_ordered_within(&self, slack: f64) -> bool {
        self.components
            .windows(2)
            .all(|pair| pair[1].sigma <= pair[0].sigma + slack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_vary_only_budget() {
        assert_eq!(Preset::Fast.options().max_iterations, 20);
        assert_eq!(Preset::Balanced.options().max_iterations, 50);
        assert_eq!(Preset::Precise.options().max_iterations, 100);
        assert!(Preset::Precise.options().tolerance < Preset::Fast.options().tolerance);
        assert_eq!(DecomposeOptions::default(), Preset::Balanced.options());
    }

    #[test]
    fn preset_parsing() {
        assert_eq!("Fast".parse::<Preset>().unwrap(), Preset::Fast);
        assert_eq!(" precise ".parse::<Preset>().unwrap(), Preset::Precise);
        let err = "lanczos".parse::<Preset>().unwrap_err();
        assert!(err.to_string().contains("lanczos"));
    }

    #[test]
    fn ordering_slack() {
        let comp = |sigma| Triplet {
            u: Array1::zeros(1),
            sigma,
            v: Array1::zeros(1),
            iterations: 1,
            converged: true,
        };
        let triplets = SingularTriplets::new(1, 1, vec![comp(3.0), comp(3.05), comp(1.0)]);
        assert!(!triplets.is_ordered_within(0.0));
        assert!(triplets.is_ordered_within(0.1));
        assert_eq!(triplets.total_iterations(), 3);
    }
}
