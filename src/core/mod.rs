//! Core types, window functions, FFT helpers, and resampling utilities.

pub mod fft;
pub mod resample;
pub mod types;
pub mod window;

pub use types::*;
pub use window::hann_window;
