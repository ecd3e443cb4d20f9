//! Report module - terminal summaries and the evaluation export

pub mod evaluation_export;
pub mod summary;

pub use evaluation_export::*;
pub use summary::*;
