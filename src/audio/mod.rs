//! Audio loading, filtering, and keystroke detection

pub mod filter;
pub mod segment;
pub mod wave;

pub use filter::PreFilter;
pub use segment::{find_key_presses, KeyPress};
pub use wave::{load_recording, quantize, SAMPLE_RATE};
