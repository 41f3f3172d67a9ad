//! Core types shared by every stage of a build.
//!
//! - [`schema`]: table, column and key constraint metadata
//! - [`value`]: owned cell values and their join-key projection
//! - [`frame`]: columnar, order-preserving row sets
//! - [`diagnostic`]: recoverable conditions collected during a build
//! - [`traits`]: the [`SchemaSource`] abstraction implemented by drivers

pub mod diagnostic;
pub mod frame;
pub mod schema;
pub mod traits;
pub mod value;

pub use diagnostic::{Diagnostic, DiagnosticKind};
pub use frame::{Frame, FrameColumn};
pub use schema::{ColumnDef, ForeignKeyDef, PrimaryKeyDef, TableSchema};
pub use traits::{SchemaSource, TableRows};
pub use value::{JoinKey, Value};
