//! Deterministic random sub-streams.
//!
//! Every stochastic decision draws from a generator seeded by
//! (run seed, agent id, coarse step, purpose), so results never depend on
//! which thread happened to process an agent.

use log::warn;
use msabm_common::SeedSource;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// What a random stream is used for. Separate purposes never share draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Transition = 1,
    Division = 2,
    Motility = 3,
    Placement = 4,
}

/// SplitMix64 finalizer.
#[inline]
pub fn mix64(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

pub fn stream_seed(run_seed: u64, agent_id: u64, coarse_step: u64, stream: Stream) -> u64 {
    let mut h = mix64(run_seed.wrapping_add(0x9E37_79B9_7F4A_7C15));
    h = mix64(h ^ agent_id.wrapping_mul(0x1F3A_5D1B_C3E7_0A27));
    h = mix64(h ^ coarse_step.wrapping_mul(0x58C7_2B6E_8F91_D403));
    mix64(h ^ stream as u64)
}

#[inline]
pub fn agent_rng(run_seed: u64, agent_id: u64, coarse_step: u64, stream: Stream) -> StdRng {
    StdRng::seed_from_u64(stream_seed(run_seed, agent_id, coarse_step, stream))
}

/// Uses the configured seed, or draws one from entropy when none was given.
pub fn resolve_seed(seed: Option<u64>) -> (u64, SeedSource) {
    match seed {
        Some(seed) => (seed, SeedSource::Configured),
        None => {
            let seed = rand::random::<u64>();
            warn!("No seed configured; using entropy seed {seed}. This run is not reproducible.");
            (seed, SeedSource::Entropy)
        }
    }
}

/// A uniform value in [0, 1) that depends only on the inputs.
pub fn hash_unit(a: u64, b: u64) -> f64 {
    let h = mix64(mix64(a) ^ b.wrapping_mul(0xD6E8_FEB8_6659_FD93));
    (h >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
}
