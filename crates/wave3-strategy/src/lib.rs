pub mod engine;
pub mod signal;

pub use engine::*;
pub use signal::*;
