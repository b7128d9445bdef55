//! API request handlers

mod diagnostics;
mod health;
mod workers;

pub use diagnostics::*;
pub use health::*;
pub use workers::*;
