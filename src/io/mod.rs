pub mod input;
pub mod output;
pub mod product;
pub mod store;

pub use input::*;
pub use output::*;
pub use product::*;
pub use store::*;
