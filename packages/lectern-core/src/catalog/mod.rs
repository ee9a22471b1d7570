//! Browse-tree catalog: node ids, node shapes and the builder that projects
//! library records into them.

mod builder;
mod node;

pub use builder::{ContentTreeBuilder, Page, PlayableTarget};
pub use node::{CatalogNode, NodeId, NodeKind};

pub(crate) use builder::chapter_span;
