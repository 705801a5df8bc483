//! Heuristic weights for the A* priority.

use std::str::FromStr;

use anyhow::{Result, anyhow, bail};

/// Multiplier applied to the remaining-score bound.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WeightPolicy {
    /// Fixed weight; `Static(1.0)` is plain A*.
    Static(f64),
    /// Weight falls linearly from `max_weight` at the first column to `base`
    /// at the last, so the search is greediest while most of the model is
    /// still ahead.
    Decaying { base: f64, max_weight: f64 },
}

impl Default for WeightPolicy {
    fn default() -> Self {
        WeightPolicy::Static(1.0)
    }
}

impl WeightPolicy {
    /// Weight at `column` of a model with `num_columns` columns.
    pub fn weight(&self, column: usize, num_columns: usize) -> f64 {
        match *self {
            WeightPolicy::Static(w) => w,
            WeightPolicy::Decaying { base, max_weight } => {
                if num_columns == 0 {
                    return base;
                }
                let remaining = num_columns.saturating_sub(column) as f64 / num_columns as f64;
                base + (max_weight - base) * remaining
            }
        }
    }
}

/// Parses `1.0`, `static:1.5` or `decay:3.0` / `decay:1.0:3.0`.
impl FromStr for WeightPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let parse = |v: &str| -> Result<f64> {
            let w: f64 = v.parse().map_err(|_| anyhow!("invalid weight '{}'", v))?;
            if !w.is_finite() || w < 1.0 {
                bail!("heuristic weight must be a finite value >= 1.0 (got {})", v);
            }
            Ok(w)
        };
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [w] => Ok(WeightPolicy::Static(parse(w)?)),
            ["static", w] => Ok(WeightPolicy::Static(parse(w)?)),
            ["decay", max] => Ok(WeightPolicy::Decaying {
                base: 1.0,
                max_weight: parse(max)?,
            }),
            ["decay", base, max] => {
                let (base, max_weight) = (parse(base)?, parse(max)?);
                if max_weight < base {
                    bail!("decaying weight needs max >= base ({} < {})", max_weight, base);
                }
                Ok(WeightPolicy::Decaying { base, max_weight })
            }
            _ => bail!("unrecognized weight policy '{}'", s),
        }
    }
}

impl std::fmt::Display for WeightPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WeightPolicy::Static(w) => write!(f, "static:{}", w),
            WeightPolicy::Decaying { base, max_weight } => write!(f, "decay:{}:{}", base, max_weight),
        }
    }
}
