//! Element-tree representation and XML-syntax parsing for RELAX NG schemas.
//!
//! The tree is the working representation of the schema simplifier: parsing
//! produces it, the simplification passes mutate it, and the compiled
//! pattern model is emitted from it.

pub mod tree;
pub mod xml;

pub use tree::{Attribute, NodeId, NodeKind, Tree, TreeError};
