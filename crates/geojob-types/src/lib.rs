//! Core types and traits for the GeoJob job-processing subsystem.
//!
//! One generic [`Job`] record, parameterised by [`JobKind`], replaces the per-feature job,
//! workflow and session tables. Stores, runners, publishers and views all share these types.

mod error;
mod event;
mod job;
mod lifecycle;
mod principal;
mod traits;

pub use error::*;
pub use event::*;
pub use job::*;
pub use lifecycle::*;
pub use principal::*;
pub use traits::*;
