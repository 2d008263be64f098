//! Monte Carlo exceedance probabilities under a Dirichlet posterior.
//!
//! `xp_k` is the probability that model `k` has the largest frequency when
//! `r ~ Dirichlet(α)`. For more than two models there is no closed form, so we
//! draw:
//!
//! - `y_k ~ Gamma(α_k, 1)` independently
//! - `r = y / Σ y`
//!
//! and count which coordinate is largest. Normalizing never moves the winner,
//! so only `ln y_k` is drawn. For `α_k < 1` it comes from
//! `ln Gamma(α_k + 1, 1) + ln(U) / α_k` with `U ~ Uniform(0, 1)`, which stays
//! finite where a direct `Gamma(α_k, 1)` draw underflows to zero. Exact ties
//! go to a uniformly chosen tied model. Counts partition the draw budget, so
//! `Σ xp = 1` exactly.
//!
//! The budget is split into blocks whose nominal footprint
//! (`draws × Nk × 8` bytes) stays under a cap. Blocks are independent: each has
//! its own RNG stream seeded from `(seed, block index)` through SplitMix64, they
//! run in parallel, and their counts are summed. The output depends only on the
//! seed and the block cap.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Gamma, Open01};
use rayon::prelude::*;

use crate::error::BmsError;

/// Bytes per sampled frequency (`f64`).
const BYTES_PER_VALUE: usize = std::mem::size_of::<f64>();

/// Sampler settings.
#[derive(Debug, Clone, Copy)]
pub struct SamplerOptions {
    pub draws: usize,
    pub seed: u64,
    pub block_bytes: usize,
}

/// How the draw budget is split into blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockPlan {
    pub sizes: Vec<usize>,
}

impl BlockPlan {
    /// Split `draws` for `n_models` models so each block's nominal footprint
    /// stays under `block_bytes`.
    ///
    /// Block count is `ceil(draws × n_models × 8 / block_bytes)`; all blocks
    /// share the same size except the last, which absorbs the remainder.
    pub fn new(draws: usize, n_models: usize, block_bytes: usize) -> Result<Self, BmsError> {
        if draws == 0 {
            return Err(BmsError::invalid_config("draws must be >= 1"));
        }
        if block_bytes == 0 {
            return Err(BmsError::invalid_config("block_bytes must be >= 1"));
        }
        let total_bytes = draws
            .checked_mul(n_models.max(1))
            .and_then(|v| v.checked_mul(BYTES_PER_VALUE))
            .ok_or_else(|| BmsError::invalid_config("draw budget footprint overflows"))?;

        let n_blocks = total_bytes.div_ceil(block_bytes).clamp(1, draws);
        let base = draws / n_blocks;
        let mut sizes = vec![base; n_blocks];
        sizes[n_blocks - 1] = draws - base * (n_blocks - 1);

        Ok(Self { sizes })
    }

    pub fn n_blocks(&self) -> usize {
        self.sizes.len()
    }

    pub fn total(&self) -> usize {
        self.sizes.iter().sum()
    }
}

/// Estimate exceedance probabilities for Dirichlet(`alpha`).
pub fn sample_exceedance(alpha: &[f64], opts: &SamplerOptions) -> Result<Vec<f64>, BmsError> {
    if alpha.is_empty() {
        return Err(BmsError::invalid_input("at least one model is required"));
    }
    if alpha.len() == 1 {
        return Ok(vec![1.0]);
    }

    let gammas = alpha
        .iter()
        .map(|&a| LogGamma::new(a))
        .collect::<Result<Vec<_>, _>>()?;

    let plan = BlockPlan::new(opts.draws, alpha.len(), opts.block_bytes)?;
    tracing::debug!(
        draws = opts.draws,
        blocks = plan.n_blocks(),
        models = alpha.len(),
        "sampling exceedance probabilities"
    );

    let per_block: Vec<Vec<u64>> = plan
        .sizes
        .par_iter()
        .enumerate()
        .map(|(idx, &size)| {
            let mut rng = StdRng::seed_from_u64(block_seed(opts.seed, idx));
            count_winners(&gammas, size, &mut rng)
        })
        .collect();

    let mut counts = vec![0u64; alpha.len()];
    for block in &per_block {
        for (c, b) in counts.iter_mut().zip(block) {
            *c += b;
        }
    }

    let total = plan.total() as f64;
    Ok(counts.into_iter().map(|c| c as f64 / total).collect())
}

/// Draws `ln y` for `y ~ Gamma(shape, 1)`.
#[derive(Debug, Clone)]
struct LogGamma {
    gamma: Gamma<f64>,
    /// `1 / shape` when the draw is boosted from `Gamma(shape + 1, 1)`.
    boost: Option<f64>,
}

impl LogGamma {
    fn new(shape: f64) -> Result<Self, BmsError> {
        if !(shape > 0.0 && shape.is_finite()) {
            return Err(BmsError::Sampler(format!(
                "Gamma shape must be positive and finite, got {shape}"
            )));
        }
        let (inner, boost) = if shape < 1.0 {
            (shape + 1.0, Some(1.0 / shape))
        } else {
            (shape, None)
        };
        let gamma = Gamma::new(inner, 1.0)
            .map_err(|e| BmsError::Sampler(format!("Gamma({shape}, 1): {e}")))?;
        Ok(Self { gamma, boost })
    }
}

impl Distribution<f64> for LogGamma {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let ln_y = self.gamma.sample(rng).ln();
        match self.boost {
            Some(inv_shape) => {
                let u: f64 = Open01.sample(rng);
                ln_y + u.ln() * inv_shape
            }
            None => ln_y,
        }
    }
}

/// Count, for `draws` Dirichlet samples, how often each model is largest.
fn count_winners(gammas: &[LogGamma], draws: usize, rng: &mut StdRng) -> Vec<u64> {
    let mut counts = vec![0u64; gammas.len()];
    let mut ln_y = vec![0.0; gammas.len()];
    for _ in 0..draws {
        for (slot, gamma) in ln_y.iter_mut().zip(gammas) {
            *slot = gamma.sample(rng);
        }
        counts[argmax(&ln_y, rng)] += 1;
    }
    counts
}

/// Index of the maximum, picking uniformly among exact ties.
fn argmax<R: Rng + ?Sized>(values: &[f64], rng: &mut R) -> usize {
    let mut best = 0;
    let mut ties = 1u32;
    for (k, &v) in values.iter().enumerate().skip(1) {
        if v > values[best] {
            best = k;
            ties = 1;
        } else if v == values[best] {
            ties += 1;
            if rng.gen_range(0..ties) == 0 {
                best = k;
            }
        }
    }
    best
}

/// SplitMix64 finalizer.
fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn block_seed(seed: u64, block: usize) -> u64 {
    seed ^ splitmix64(block as u64)
}
