//! Response fault injection
//!
//! Each response draws independently: first whether to damage its
//! checksum, then whether to deliver it in two writes.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use ttp20_types::ServerConfig;

/// Faults to apply to one response
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultPlan {
    /// Flip a bit in the checksum field
    pub corrupt_checksum: bool,

    /// Deliver `[..at]` and `[at..]` as separate writes
    pub split_at: Option<usize>,
}

/// Per-connection fault source
pub struct FaultInjector {
    bad_checksum_probability: f64,
    fragment_probability: f64,
    rng: StdRng,
}

impl FaultInjector {
    /// `seed` makes the sequence of draws reproducible
    pub fn new(
        bad_checksum_probability: f64,
        fragment_probability: f64,
        seed: Option<u64>,
    ) -> Self {
        Self {
            bad_checksum_probability,
            fragment_probability,
            rng: seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64),
        }
    }

    /// Injector for the `conn_id`-th accepted connection
    ///
    /// With a configured seed every connection gets its own derived seed,
    /// so runs are reproducible without all connections sharing one stream.
    pub fn for_connection(config: &ServerConfig, conn_id: u64) -> Self {
        Self::new(
            config.bad_checksum_probability,
            config.fragment_probability,
            config.fault_seed.map(|seed| seed.wrapping_add(conn_id)),
        )
    }

    /// Decide the faults for a frame of `frame_len` bytes
    pub fn plan(&mut self, frame_len: usize) -> FaultPlan {
        let corrupt_checksum = self.roll(self.bad_checksum_probability);
        let fragment = self.roll(self.fragment_probability);

        FaultPlan {
            corrupt_checksum,
            split_at: (fragment && frame_len > 1).then(|| split_point(frame_len)),
        }
    }

    fn roll(&mut self, probability: f64) -> bool {
        // NaN and non-positive never fire
        probability > 0.0 && self.rng.gen_bool(probability.min(1.0))
    }
}

/// Midpoint split, never leaving the first piece empty
pub fn split_point(len: usize) -> usize {
    (len / 2).max(1)
}
