pub mod client;
pub mod prompts;
pub mod repair;
pub mod validation;

pub use client::*;
pub use prompts::*;
pub use repair::*;
pub use validation::*;
