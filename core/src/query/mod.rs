//! Query translation: filter descriptors in, executable queries out.
//!
//! Nothing in this module performs I/O. Errors raised here surface before a
//! pooled connection is acquired.

pub mod builder;
pub mod compiler;
pub mod filter;
pub mod predicate;

pub use builder::{Access, Direction, ExecutableQuery, OrderBy, QueryDescriptor, build};
pub use compiler::{CompiledPredicate, compile};
pub use filter::{Filter, FilterClause, Operand, Operator};
pub use predicate::{Comparison, IndexedAccess, Predicate};
