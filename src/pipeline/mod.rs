//! Pipeline module - loading, reconciliation, feature reduction, aggregation,
//! encoding and resampling stages

pub mod aggregate;
pub mod consolidate;
pub mod encode;
pub mod explore;
pub mod fill;
pub mod loader;
pub mod prepare;
pub mod recode;
pub mod sampling;
pub mod scale;
pub mod schema;
pub mod split;

pub use aggregate::*;
pub use consolidate::*;
pub use encode::*;
pub use explore::*;
pub use fill::*;
pub use loader::*;
pub use prepare::*;
pub use recode::*;
pub use sampling::*;
pub use scale::*;
pub use schema::*;
pub use split::*;
