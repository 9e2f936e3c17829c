//! Loss models for the unreliable send path.
//!
//! Real networks drop packets unpredictably.  To exercise the retransmission
//! machinery without depending on actual network conditions, every
//! [`crate::socket::Socket`] carries a [`LossModel`] that decides, datagram by
//! datagram, whether the write happens at all:
//!
//! | Model         | Behaviour                                          |
//! |---------------|----------------------------------------------------|
//! | [`NoLoss`]    | Every datagram is written.                         |
//! | [`Bernoulli`] | Each datagram is dropped with probability `p`.     |
//! | [`EveryNth`]  | Exactly every `n`-th datagram is dropped.          |
//!
//! A dropped datagram is never corrupted, duplicated or delayed: it simply
//! does not reach the wire.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Decides whether the next outbound datagram is dropped.
pub trait LossModel: Send {
    fn drop_next(&mut self) -> bool;
}

/// Transparent pass-through.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLoss;

impl LossModel for NoLoss {
    fn drop_next(&mut self) -> bool {
        false
    }
}

/// Independent random loss with a fixed probability.
#[derive(Debug)]
pub struct Bernoulli {
    probability: f64,
    rng: StdRng,
}

impl Bernoulli {
    /// Seed from OS entropy.
    pub fn new(probability: f64) -> Self {
        Self {
            probability: probability.clamp(0.0, 1.0),
            rng: StdRng::from_entropy(),
        }
    }

    /// Reproducible loss pattern for tests.
    pub fn seeded(probability: f64, seed: u64) -> Self {
        Self {
            probability: probability.clamp(0.0, 1.0),
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl LossModel for Bernoulli {
    fn drop_next(&mut self) -> bool {
        self.probability > 0.0 && self.rng.gen::<f64>() < self.probability
    }
}

/// Drops datagram `n`, `2n`, `3n`, …  `n == 0` never drops.
#[derive(Debug, Clone, Copy)]
pub struct EveryNth {
    n: u64,
    count: u64,
}

impl EveryNth {
    pub fn new(n: u64) -> Self {
        Self { n, count: 0 }
    }
}

impl LossModel for EveryNth {
    fn drop_next(&mut self) -> bool {
        if self.n == 0 {
            return false;
        }
        self.count += 1;
        self.count % self.n == 0
    }
}

/// Build the model for a loss percentage: [`NoLoss`] at 0, [`Bernoulli`]
/// otherwise.
pub fn from_percent(loss_percent: u8) -> Box<dyn LossModel> {
    if loss_percent == 0 {
        Box::new(NoLoss)
    } else {
        Box::new(Bernoulli::new(f64::from(loss_percent.min(100)) / 100.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_loss_never_drops() {
        let mut m = NoLoss;
        assert!((0..1000).all(|_| !m.drop_next()));
    }

    #[test]
    fn every_nth_is_exact() {
        let mut m = EveryNth::new(5);
        let drops: Vec<usize> = (1..=20).filter(|_| m.drop_next()).collect();
        assert_eq!(drops, vec![5, 10, 15, 20]);
    }

    #[test]
    fn every_zeroth_is_disabled() {
        let mut m = EveryNth::new(0);
        assert!((0..100).all(|_| !m.drop_next()));
    }

    #[test]
    fn bernoulli_extremes() {
        let mut never = Bernoulli::seeded(0.0, 1);
        assert!((0..1000).all(|_| !never.drop_next()));
        let mut always = Bernoulli::seeded(1.0, 1);
        assert!((0..1000).all(|_| always.drop_next()));
    }

    #[test]
    fn bernoulli_rate_is_roughly_p() {
        let mut m = Bernoulli::seeded(0.2, 42);
        let dropped = (0..10_000).filter(|_| m.drop_next()).count();
        assert!((1_500..2_500).contains(&dropped), "dropped {dropped}");
    }

    #[test]
    fn seeded_models_repeat() {
        let mut a = Bernoulli::seeded(0.5, 7);
        let mut b = Bernoulli::seeded(0.5, 7);
        for _ in 0..256 {
            assert_eq!(a.drop_next(), b.drop_next());
        }
    }
}
