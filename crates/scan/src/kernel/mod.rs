//! Delta Kernel module
//!
//! The kernel module contains all the logic for reading and processing the Delta Lake transaction log.

pub mod arrow;
pub mod deletion_vector;
pub mod engine;
pub mod handle;
pub mod models;
pub mod predicate;
pub mod scalars;
pub mod schema;

pub use deletion_vector::SelectionVector;
pub use engine::*;
pub use handle::{KernelHandle, KernelResource};
pub use models::*;
pub use predicate::{ColumnView, CompareOp, FileSkippingView, ScanPredicate};
pub use scalars::Scalar;
pub use schema::*;
