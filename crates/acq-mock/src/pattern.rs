//! Synthetic frames for the mock microscope.
//!
//! Each frame is a diagonal gradient with a bright spot that sharpens as z
//! approaches the focal plane and shifts with the channel, plus seeded shot
//! noise. Identical keys and seeds give identical frames.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// What distinguishes one simulated frame from another.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameKey {
    /// Running frame counter of the microscope
    pub frame: u64,
    /// Intended z position; `None` means in focus
    pub z_um: Option<f64>,
    /// Index of the channel among the ones the microscope has seen
    pub channel: usize,
}

/// Depth of field of the simulated objective.
const FOCAL_DEPTH_UM: f64 = 5.0;
const NOISE_AMPLITUDE: u16 = 256;

/// Generate a `width` x `height` frame clipped to `bit_depth` bits.
pub fn synthetic_frame(width: u32, height: u32, bit_depth: u8, key: FrameKey, seed: u64) -> Vec<u16> {
    let w = width as usize;
    let h = height as usize;
    let max = if bit_depth >= 16 {
        u16::MAX as f64
    } else {
        ((1u32 << bit_depth) - 1) as f64
    };
    let mut rng = ChaCha8Rng::seed_from_u64(seed ^ key.frame.wrapping_mul(2654435761));

    // Defocus widens and dims the spot
    let defocus = key.z_um.unwrap_or(0.0) / FOCAL_DEPTH_UM;
    let sigma = (w.min(h) as f64 / 16.0).max(1.0) * (1.0 + defocus * defocus).sqrt();
    let peak = max * 0.8 / (1.0 + defocus * defocus);

    let shift = (key.channel % 4) as f64 * w as f64 / 8.0;
    let cx = w as f64 / 4.0 + shift;
    let cy = h as f64 / 2.0;

    let mut buffer = Vec::with_capacity(w * h);
    for y in 0..h {
        for x in 0..w {
            let background = ((x + y) as f64 / (w + h).max(1) as f64) * max * 0.1;
            let dx = x as f64 - cx;
            let dy = y as f64 - cy;
            let spot = peak * (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp();
            let noise = rng.gen_range(0..NOISE_AMPLITUDE) as f64;
            buffer.push((background + spot + noise).min(max) as u16);
        }
    }
    buffer
}
