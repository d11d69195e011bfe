//! Wait policies: how long to delay a retry for a given attempt number.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

/// Caller-supplied delay function, given the 1-indexed attempt number.
pub type WaitFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// Jitter applied on top of exponential backoff, as a fraction of the
/// polynomial term (`attempt^4` seconds).
///
/// The jitter is drawn uniformly from `[0, attempt^4 * fraction]` with
/// millisecond resolution, so it is never negative and never exceeds the base.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Jitter(f64);

impl Jitter {
    pub const NONE: Jitter = Jitter(0.0);
    pub const FULL: Jitter = Jitter(1.0);

    /// Clamp `fraction` to `0.0..=1.0` (NaN becomes no jitter).
    pub fn fraction(fraction: f64) -> Self {
        if fraction.is_nan() {
            return Self::NONE;
        }
        Self(fraction.clamp(0.0, 1.0))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl Default for Jitter {
    fn default() -> Self {
        Self::FULL
    }
}

/// Delay computation strategy for a retry declaration.
#[derive(Clone)]
pub enum WaitPolicy {
    /// Same delay for every attempt.
    Fixed(Duration),
    /// `base * attempt`.
    Linear { base: Duration },
    /// `attempt^4 + 2` seconds plus jitter.
    Exponential { jitter: Jitter },
    /// Caller-supplied function of the attempt number.
    Custom(WaitFn),
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self::Exponential {
            jitter: Jitter::default(),
        }
    }
}

impl core::fmt::Debug for WaitPolicy {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            WaitPolicy::Fixed(d) => f.debug_tuple("Fixed").field(d).finish(),
            WaitPolicy::Linear { base } => f.debug_struct("Linear").field("base", base).finish(),
            WaitPolicy::Exponential { jitter } => f
                .debug_struct("Exponential")
                .field("jitter", jitter)
                .finish(),
            WaitPolicy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl WaitPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self::Fixed(delay)
    }

    pub fn linear(base: Duration) -> Self {
        Self::Linear { base }
    }

    /// Exponential backoff with full jitter.
    pub fn exponential() -> Self {
        Self::default()
    }

    pub fn exponential_with(jitter: Jitter) -> Self {
        Self::Exponential { jitter }
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Delay before jitter for a given attempt number (1-indexed).
    pub fn base_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        match self {
            WaitPolicy::Fixed(delay) => *delay,
            WaitPolicy::Linear { base } => base.saturating_mul(attempt),
            WaitPolicy::Exponential { .. } => {
                Duration::from_secs(polynomial_secs(attempt).saturating_add(2))
            }
            WaitPolicy::Custom(f) => f(attempt),
        }
    }

    /// Upper bound of the jitter added on top of [`base_delay`](Self::base_delay).
    pub fn jitter_bound(&self, attempt: u32) -> Duration {
        match self {
            WaitPolicy::Exponential { jitter } if attempt > 0 => {
                let poly_ms = polynomial_secs(attempt).saturating_mul(1000);
                Duration::from_millis((poly_ms as f64 * jitter.value()) as u64)
            }
            _ => Duration::ZERO,
        }
    }

    /// Delay for `attempt`, drawing jitter from the thread-local RNG.
    pub fn compute(&self, attempt: u32) -> Duration {
        self.compute_with(attempt, &mut rand::thread_rng())
    }

    /// Delay for `attempt`, drawing jitter from `rng`.
    pub fn compute_with<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.base_delay(attempt);
        let bound_ms = self.jitter_bound(attempt).as_millis() as u64;
        if bound_ms == 0 {
            return base;
        }
        base.saturating_add(Duration::from_millis(rng.gen_range(0..=bound_ms)))
    }
}

fn polynomial_secs(attempt: u32) -> u64 {
    u64::from(attempt).saturating_pow(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn exponential_base_delays_match_polynomial_formula() {
        let policy = WaitPolicy::exponential();

        assert_eq!(policy.base_delay(1), Duration::from_secs(3));
        assert_eq!(policy.base_delay(2), Duration::from_secs(18));
        assert_eq!(policy.base_delay(3), Duration::from_secs(83));
        assert_eq!(policy.base_delay(4), Duration::from_secs(258));
    }

    #[test]
    fn exponential_without_jitter_is_deterministic() {
        let policy = WaitPolicy::exponential_with(Jitter::NONE);

        assert_eq!(policy.compute(1), Duration::from_secs(3));
        assert_eq!(policy.compute(4), Duration::from_secs(258));
        assert_eq!(policy.jitter_bound(4), Duration::ZERO);
    }

    #[test]
    fn partial_jitter_scales_the_bound() {
        let policy = WaitPolicy::exponential_with(Jitter::fraction(0.15));
        assert_eq!(policy.jitter_bound(2), Duration::from_millis(2400));
    }

    #[test]
    fn jitter_fraction_is_clamped() {
        assert_eq!(Jitter::fraction(3.0), Jitter::FULL);
        assert_eq!(Jitter::fraction(-1.0), Jitter::NONE);
        assert_eq!(Jitter::fraction(f64::NAN), Jitter::NONE);
    }

    #[test]
    fn seeded_rng_gives_reproducible_delays() {
        let policy = WaitPolicy::exponential();
        let a = policy.compute_with(3, &mut StdRng::seed_from_u64(7));
        let b = policy.compute_with(3, &mut StdRng::seed_from_u64(7));
        assert_eq!(a, b);
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let policy = WaitPolicy::fixed(Duration::from_millis(500));

        assert_eq!(policy.compute(1), Duration::from_millis(500));
        assert_eq!(policy.compute(2), Duration::from_millis(500));
        assert_eq!(policy.compute(9), Duration::from_millis(500));
    }

    #[test]
    fn linear_backoff_increases_linearly() {
        let policy = WaitPolicy::linear(Duration::from_millis(100));

        assert_eq!(policy.compute(1), Duration::from_millis(100));
        assert_eq!(policy.compute(2), Duration::from_millis(200));
        assert_eq!(policy.compute(3), Duration::from_millis(300));
    }

    #[test]
    fn custom_policy_receives_attempt_number() {
        let policy = WaitPolicy::custom(|attempt| Duration::from_secs(u64::from(attempt) * 10));

        assert_eq!(policy.compute(1), Duration::from_secs(10));
        assert_eq!(policy.compute(5), Duration::from_secs(50));
    }

    #[test]
    fn attempt_zero_has_no_delay() {
        assert_eq!(WaitPolicy::exponential().compute(0), Duration::ZERO);
        assert_eq!(WaitPolicy::fixed(Duration::from_secs(1)).compute(0), Duration::ZERO);
    }

    #[test]
    fn huge_attempt_numbers_saturate() {
        let policy = WaitPolicy::exponential();
        assert!(policy.compute(u32::MAX) >= policy.base_delay(u32::MAX));
    }

    proptest! {
        /// Jitter is non-negative and bounded by the polynomial term.
        #[test]
        fn exponential_jitter_stays_within_bounds(attempt in 1u32..40, seed in any::<u64>()) {
            let policy = WaitPolicy::exponential();
            let mut rng = StdRng::seed_from_u64(seed);

            let delay = policy.compute_with(attempt, &mut rng);
            let base = policy.base_delay(attempt);
            let poly = Duration::from_secs(u64::from(attempt).pow(4));

            prop_assert!(delay >= base);
            prop_assert!(delay - base <= poly);
        }

        #[test]
        fn exponential_base_is_monotonic(attempt in 1u32..1000) {
            let policy = WaitPolicy::exponential();
            prop_assert!(policy.base_delay(attempt + 1) > policy.base_delay(attempt));
        }
    }
}
