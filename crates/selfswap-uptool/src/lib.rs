mod clock;
mod service;
mod tool;

pub use clock::{Clock, SystemClock};
pub use service::{ServiceControl, SystemServiceControl};
pub use tool::{
    Finalized, ReplaceSource, ReplaceTool, EXIT_FATAL, EXIT_ROLLED_BACK, EXIT_SUCCESS,
};
