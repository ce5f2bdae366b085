//! Parameter-space descriptors and samplers: grid, random, Latin hypercube.
//!
//! Latin Hypercube Sampling divides each dimension into `n` equal strata
//! and draws exactly one point per stratum per dimension, with strata
//! assignments shuffled independently across dimensions. Projections onto
//! any single dimension then cover every stratum, which beats pure random
//! sampling for space-filling.
//!
//! Every sampler that draws takes a caller-seeded RNG; the orchestrator
//! records the seed next to each sample so results are reproducible.

use crate::error::{QuantLabError, Result};
use crate::strategy::{ParamValue, Params};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// One dimension of a parameter space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "range", rename_all = "snake_case")]
pub enum ParamRange {
    /// A single fixed value.
    Fixed { value: ParamValue },
    /// A discrete set of values.
    Set { values: Vec<ParamValue> },
    /// Integers `min, min+step, ..., <= max`.
    IntRange { min: i64, max: i64, step: i64 },
    /// Floats `min, min+step, ..., <= max`.
    FloatRange { min: f64, max: f64, step: f64 },
    /// Continuous uniform draw; random samplers only.
    Uniform { min: f64, max: f64 },
}

impl ParamRange {
    fn is_stratifiable(&self) -> bool {
        !matches!(self, ParamRange::Fixed { .. })
    }

    /// Map a unit-interval position to a concrete value.
    fn value_at(&self, u: f64) -> ParamValue {
        match self {
            ParamRange::Fixed { value } => value.clone(),
            ParamRange::Set { values } => {
                let idx = ((u * values.len() as f64) as usize).min(values.len() - 1);
                values[idx].clone()
            }
            ParamRange::IntRange { min, max, step } => {
                let steps = (max - min) / step;
                let k = ((u * (steps + 1) as f64) as i64).min(steps);
                ParamValue::Int(min + k * step)
            }
            ParamRange::FloatRange { min, max, step } => {
                let raw = min + u * (max - min);
                let quantized = if *step > 0.0 {
                    ((raw - min) / step).round() * step + min
                } else {
                    raw
                };
                ParamValue::Float(quantized.clamp(*min, *max))
            }
            ParamRange::Uniform { min, max } => ParamValue::Float(min + u * (max - min)),
        }
    }

    /// All values, for grid expansion. `Uniform` has no finite enumeration.
    fn enumerate(&self) -> Result<Vec<ParamValue>> {
        match self {
            ParamRange::Fixed { value } => Ok(vec![value.clone()]),
            ParamRange::Set { values } => Ok(values.clone()),
            ParamRange::IntRange { min, max, step } => {
                if *step <= 0 {
                    return Err(QuantLabError::Config("int range step must be > 0".into()));
                }
                let mut out = Vec::new();
                let mut v = *min;
                while v <= *max {
                    out.push(ParamValue::Int(v));
                    v += step;
                }
                Ok(out)
            }
            ParamRange::FloatRange { min, max, step } => {
                if *step <= 0.0 {
                    return Err(QuantLabError::Config(
                        "float range step must be > 0".into(),
                    ));
                }
                let mut out = Vec::new();
                let mut k = 0u32;
                loop {
                    let v = min + k as f64 * step;
                    if v > max + step * 1e-9 {
                        break;
                    }
                    out.push(ParamValue::Float(v.min(*max)));
                    k += 1;
                }
                Ok(out)
            }
            ParamRange::Uniform { .. } => Err(QuantLabError::Config(
                "uniform dimensions cannot be grid-expanded; use a random sampler".into(),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDim {
    pub name: String,
    pub range: ParamRange,
}

/// A parameter space: an ordered list of named dimensions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamSpace {
    pub dims: Vec<ParamDim>,
}

impl ParamSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fixed(mut self, name: &str, value: ParamValue) -> Self {
        self.dims.push(ParamDim {
            name: name.to_string(),
            range: ParamRange::Fixed { value },
        });
        self
    }

    pub fn set(mut self, name: &str, values: Vec<ParamValue>) -> Self {
        self.dims.push(ParamDim {
            name: name.to_string(),
            range: ParamRange::Set { values },
        });
        self
    }

    pub fn int_range(mut self, name: &str, min: i64, max: i64, step: i64) -> Self {
        self.dims.push(ParamDim {
            name: name.to_string(),
            range: ParamRange::IntRange { min, max, step },
        });
        self
    }

    pub fn float_range(mut self, name: &str, min: f64, max: f64, step: f64) -> Self {
        self.dims.push(ParamDim {
            name: name.to_string(),
            range: ParamRange::FloatRange { min, max, step },
        });
        self
    }

    pub fn uniform(mut self, name: &str, min: f64, max: f64) -> Self {
        self.dims.push(ParamDim {
            name: name.to_string(),
            range: ParamRange::Uniform { min, max },
        });
        self
    }

    /// Cartesian product of every dimension's values.
    pub fn grid(&self) -> Result<Vec<Params>> {
        let mut combos: Vec<Params> = vec![Params::new()];
        for dim in &self.dims {
            let values = dim.range.enumerate()?;
            let mut next = Vec::with_capacity(combos.len() * values.len());
            for combo in &combos {
                for value in &values {
                    next.push(combo.clone().with(&dim.name, value.clone()));
                }
            }
            combos = next;
        }
        Ok(combos)
    }

    /// `n` independent uniform draws across all dimensions.
    pub fn random<R: Rng>(&self, n: usize, rng: &mut R) -> Vec<Params> {
        (0..n)
            .map(|_| {
                let mut params = Params::new();
                for dim in &self.dims {
                    let u: f64 = rng.gen();
                    params.set(&dim.name, dim.range.value_at(u));
                }
                params
            })
            .collect()
    }

    /// `n` stratified draws: one sample per stratum per dimension.
    pub fn latin_hypercube<R: Rng>(&self, n: usize, rng: &mut R) -> Vec<Params> {
        if n == 0 || self.dims.is_empty() {
            return Vec::new();
        }

        // shuffled stratum assignment per stratifiable dimension
        let strata: Vec<Option<Vec<usize>>> = self
            .dims
            .iter()
            .map(|dim| {
                dim.range.is_stratifiable().then(|| {
                    let mut indices: Vec<usize> = (0..n).collect();
                    indices.shuffle(rng);
                    indices
                })
            })
            .collect();

        let mut samples = Vec::with_capacity(n);
        for sample_idx in 0..n {
            let mut params = Params::new();
            for (dim, stratum) in self.dims.iter().zip(strata.iter()) {
                let u = match stratum {
                    Some(indices) => {
                        let offset: f64 = rng.gen();
                        (indices[sample_idx] as f64 + offset) / n as f64
                    }
                    None => 0.0,
                };
                params.set(&dim.name, dim.range.value_at(u));
            }
            samples.push(params);
        }
        samples
    }
}
