//! Fault injection for the in-memory transport.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Probabilistic faults applied to every send.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaultConfig {
    /// Probability that a message is lost in transit (0.0 - 1.0).
    pub drop_rate: f64,
    /// Probability that the receiver's disposition never reaches the sender.
    pub lose_disposition_rate: f64,
    /// RNG seed; equal seeds replay equal fault sequences.
    pub seed: u64,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            drop_rate: 0.0,
            lose_disposition_rate: 0.0,
            seed: 0,
        }
    }
}

impl FaultConfig {
    /// No faults.
    pub fn none() -> Self {
        Self::default()
    }

    /// Lossy link with the given rates.
    pub fn lossy(drop_rate: f64, lose_disposition_rate: f64, seed: u64) -> Self {
        Self {
            drop_rate,
            lose_disposition_rate,
            seed,
        }
    }
}

/// Fault decision for one send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Verdict {
    pub drop: bool,
    pub lose_disposition: bool,
}

/// Scripted and seeded fault state, owned by the network.
#[derive(Debug)]
pub(crate) struct FaultPlan {
    config: FaultConfig,
    rng: StdRng,
    drops: HashMap<String, u32>,
    lost_dispositions: HashMap<String, u32>,
}

impl FaultPlan {
    pub fn new(config: FaultConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            drops: HashMap::new(),
            lost_dispositions: HashMap::new(),
        }
    }

    pub fn drop_next(&mut self, address: &str, count: u32) {
        *self.drops.entry(address.to_owned()).or_default() += count;
    }

    pub fn lose_next_dispositions(&mut self, address: &str, count: u32) {
        *self.lost_dispositions.entry(address.to_owned()).or_default() += count;
    }

    /// Decide the fate of one message sent to `address`.
    ///
    /// Scripted faults are consumed before the seeded ones are rolled.
    pub fn judge(&mut self, address: &str) -> Verdict {
        let drop = take_one(&mut self.drops, address) || self.roll(self.config.drop_rate);
        if drop {
            return Verdict {
                drop,
                lose_disposition: false,
            };
        }
        let lose_disposition = take_one(&mut self.lost_dispositions, address)
            || self.roll(self.config.lose_disposition_rate);
        Verdict {
            drop,
            lose_disposition,
        }
    }

    fn roll(&mut self, rate: f64) -> bool {
        rate > 0.0 && self.rng.gen_bool(rate.min(1.0))
    }
}

fn take_one(counters: &mut HashMap<String, u32>, address: &str) -> bool {
    match counters.get_mut(address) {
        Some(remaining) if *remaining > 0 => {
            *remaining -= 1;
            true
        }
        _ => false,
    }
}
