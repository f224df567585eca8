//! Request handlers.

pub mod detection;
pub mod health;
pub mod settings;

pub use detection::*;
pub use health::*;
pub use settings::*;
