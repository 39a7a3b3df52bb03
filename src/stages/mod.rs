pub mod pipeline;
pub mod progress;
pub mod stage0_assemble;
pub mod stage1_timeline;
pub mod stage2_analysis;
pub mod stage3_scoring;
pub mod stage_rerun;

pub use pipeline::*;
pub use progress::*;
pub use stage0_assemble::*;
pub use stage1_timeline::*;
pub use stage2_analysis::*;
pub use stage3_scoring::*;
pub use stage_rerun::*;
