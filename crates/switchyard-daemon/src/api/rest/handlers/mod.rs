//! API request handlers

mod artifacts;
mod events;
mod health;
mod samples;
mod services;

pub use artifacts::*;
pub use events::*;
pub use health::*;
pub use samples::*;
pub use services::*;
