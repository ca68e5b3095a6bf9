use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};
use storyboard_core::model::{Candidate, ShotId};

/// Picks which candidates of a batch go to Vision QA.
#[derive(Debug, Clone)]
pub struct VisionSampler {
    rate: f64,
    seed: Option<u64>,
}

impl VisionSampler {
    pub fn new(rate: f64, seed: Option<u64>) -> Self {
        Self {
            rate: if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) },
            seed,
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.rate <= 0.0
    }

    /// RNG for one attempt of one shot. Seeded runs draw the same samples
    /// for the same shot regardless of scheduling order.
    pub fn rng_for(&self, shot_id: ShotId, attempt: u32) -> StdRng {
        match self.seed {
            Some(seed) => {
                let digest = Sha256::digest(format!("{seed}:{shot_id}:{attempt}").as_bytes());
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&digest[..8]);
                StdRng::seed_from_u64(u64::from_le_bytes(bytes))
            }
            None => StdRng::from_entropy(),
        }
    }

    /// Indices into `candidates` to critique, at most `quota` of them.
    ///
    /// Only candidates that passed Fast QA are eligible. The top Fast-QA
    /// scorer is always chosen; every other eligible candidate is chosen
    /// with probability `rate`.
    pub fn select(&self, candidates: &[Candidate], quota: usize, rng: &mut StdRng) -> Vec<usize> {
        if self.is_disabled() || quota == 0 {
            return Vec::new();
        }
        let mut eligible: Vec<usize> = candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| c.has_image() && c.passed_fast_qa())
            .map(|(i, _)| i)
            .collect();
        eligible.sort_by(|&a, &b| {
            let (ca, cb) = (&candidates[a], &candidates[b]);
            cb.fast_score()
                .unwrap_or(0.0)
                .total_cmp(&ca.fast_score().unwrap_or(0.0))
                .then_with(|| ca.variation_index.cmp(&cb.variation_index))
        });

        let mut chosen = Vec::new();
        for (rank, index) in eligible.into_iter().enumerate() {
            if chosen.len() >= quota {
                break;
            }
            if rank == 0 || rng.gen_bool(self.rate) {
                chosen.push(index);
            }
        }
        tracing::debug!(sampled = chosen.len(), quota, rate = self.rate, "Vision QA sample");
        chosen
    }
}
