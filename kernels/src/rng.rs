use glam::{Vec2, Vec3};

pub fn pcg_hash(input: u32) -> u32 {
    let state = input.wrapping_mul(747796405u32).wrapping_add(2891336453u32);
    let word = ((state >> ((state >> 28u32) + 4u32)) ^ state).wrapping_mul(277803737u32);
    (word >> 22u32) ^ word
}

/// Per-work-item xorshift generator. Seeded from (global_id, pass_index) so
/// a pixel's sample sequence is reproducible independent of scheduling.
pub struct RngState {
    state: u64,
}

impl RngState {
    pub fn new(global_id: u32, pass_index: u32) -> Self {
        let hi = pcg_hash(global_id) as u64;
        let lo = pcg_hash(pass_index ^ 0x9e3779b9) as u64;
        let state = (hi << 32) | lo;
        Self {
            // xorshift has a single absorbing state at zero
            state: if state == 0 { 0x853c49e6748fea9b } else { state },
        }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545f4914f6cdd1d)
    }

    /// Uniform f32 in [0, 1), from the top 24 bits.
    pub fn gen_r1(&mut self) -> f32 {
        const INV_24BIT: f32 = 1.0 / 16777216.0;
        ((self.next_u64() >> 40) as u32) as f32 * INV_24BIT
    }

    pub fn gen_r2(&mut self) -> Vec2 {
        Vec2::new(self.gen_r1(), self.gen_r1())
    }

    pub fn gen_r3(&mut self) -> Vec3 {
        Vec3::new(self.gen_r1(), self.gen_r1(), self.gen_r1())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequences_are_deterministic() {
        let mut a = RngState::new(42, 7);
        let mut b = RngState::new(42, 7);
        for _ in 0..64 {
            assert_eq!(a.gen_r1().to_bits(), b.gen_r1().to_bits());
        }
    }

    #[test]
    fn values_stay_in_unit_interval() {
        let mut rng = RngState::new(0, 0);
        for _ in 0..4096 {
            let r = rng.gen_r1();
            assert!((0.0..1.0).contains(&r));
        }
    }

    #[test]
    fn neighboring_pixels_decorrelate() {
        let mut a = RngState::new(100, 0);
        let mut b = RngState::new(101, 0);
        let mut same = 0;
        for _ in 0..64 {
            if a.gen_r1() == b.gen_r1() {
                same += 1;
            }
        }
        assert!(same < 4);
    }
}
