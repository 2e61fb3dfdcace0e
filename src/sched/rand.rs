// Pseudo-random source for the lottery draw
use rand_core::{impls, Error, RngCore, SeedableRng};

/// Replacement for an all-zero seed, which would lock xorshift at zero forever.
const ZERO_SEED_FALLBACK: u64 = 0x9E37_79B9_7F4A_7C15;

/// xorshift64* generator.
///
/// One word of state, no allocation, a handful of shifts per draw. Seeded
/// once at boot and advanced under the process table lock.
#[derive(Debug, Clone)]
pub struct Xorshift64Star {
    state: u64,
}

impl Xorshift64Star {
    pub const fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { ZERO_SEED_FALLBACK } else { seed },
        }
    }
}

impl RngCore for Xorshift64Star {
    fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        impls::fill_bytes_via_next(self, dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

impl SeedableRng for Xorshift64Star {
    type Seed = [u8; 8];

    fn from_seed(seed: Self::Seed) -> Self {
        Self::new(u64::from_le_bytes(seed))
    }

    fn seed_from_u64(state: u64) -> Self {
        Self::new(state)
    }
}

/// Uniform value in `[0, bound)`.
///
/// Multiply-shift instead of `%`: maps the 64-bit output onto the range
/// without a division. The bias is below `bound / 2^64`, far under anything
/// a ticket pool of 64 slots can observe. `bound` must be non-zero.
pub fn below<R: RngCore>(rng: &mut R, bound: u64) -> u64 {
    debug_assert!(bound > 0);
    ((u128::from(rng.next_u64()) * u128::from(bound)) >> 64) as u64
}
