use rand::Rng as _;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Mutex;

/// Capability interface over randomness (spec.md §9 "ambient singletons →
/// constructed collaborators"). Used for confirmation-code generation,
/// which spec.md §4.5/§8 requires to come from a cryptographic source.
pub trait Rng: Send + Sync {
    /// A 6-digit decimal string, zero-padded.
    fn confirmation_code(&self) -> String;
}

#[derive(Default)]
pub struct OsRng;

impl Rng for OsRng {
    fn confirmation_code(&self) -> String {
        let n: u32 = rand::rngs::OsRng.gen_range(0..1_000_000);
        format!("{n:06}")
    }
}

/// Deterministic RNG for tests: seeded, reproducible, still draws from a
/// real PRNG rather than returning a constant.
pub struct SeededRng(Mutex<StdRng>);

impl SeededRng {
    pub fn new(seed: u64) -> Self {
        Self(Mutex::new(StdRng::seed_from_u64(seed)))
    }
}

impl Rng for SeededRng {
    fn confirmation_code(&self) -> String {
        let mut guard = self.0.lock().expect("rng mutex poisoned");
        let n: u32 = guard.gen_range(0..1_000_000);
        format!("{n:06}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmation_code_is_six_digits() {
        let rng = SeededRng::new(42);
        for _ in 0..50 {
            let code = rng.confirmation_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn same_seed_is_reproducible() {
        let a = SeededRng::new(7).confirmation_code();
        let b = SeededRng::new(7).confirmation_code();
        assert_eq!(a, b);
    }
}
