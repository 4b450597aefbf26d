#![allow(dead_code)]

use std::f32::consts::PI;

use audiocollage::AudioBuffer;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const SR: u32 = 16_000;

pub fn gen_sine(freq_hz: f32, sr: u32, n: usize, amp: f32) -> Vec<f32> {
    (0..n)
        .map(|i| amp * (2.0 * PI * freq_hz * i as f32 / sr as f32).sin())
        .collect()
}

pub fn gen_noise(n: usize, amp: f32, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| rng.gen_range(-amp..amp)).collect()
}

pub fn concat(parts: &[Vec<f32>]) -> Vec<f32> {
    parts.iter().flatten().copied().collect()
}

pub fn mono(data: Vec<f32>, sr: u32) -> AudioBuffer {
    AudioBuffer::from_mono(data, sr).unwrap()
}

pub fn rms(signal: &[f32]) -> f64 {
    if signal.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = signal.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_sq / signal.len() as f64).sqrt()
}

pub fn estimate_freq_zero_crossings(signal: &[f32], sr: u32) -> f64 {
    if signal.len() < 2 {
        return 0.0;
    }
    let crossings = signal
        .windows(2)
        .filter(|w| w[0] <= 0.0 && w[1] > 0.0)
        .count();
    crossings as f64 * sr as f64 / signal.len() as f64
}
