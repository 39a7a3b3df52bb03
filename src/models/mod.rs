pub mod audit;
pub mod compliance;
pub mod rerun;
pub mod result;
pub mod step;
pub mod timeline;
pub mod transcript;

pub use audit::*;
pub use compliance::*;
pub use rerun::*;
pub use result::*;
pub use step::*;
pub use timeline::*;
pub use transcript::*;
