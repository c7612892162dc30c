//! Call graph generation in Graphviz DOT.
//!
//! Nodes are functions, edges are caller -> callee pairs labelled with
//! the calls and time of that edge. The graph can be restricted to the
//! functions reachable from a named root, limited in depth and fan-out,
//! and decorated with the commands each function executed. The call tree
//! writer instead draws every single call and statement of a run.

pub mod generator;
pub mod tree;

// Re-export main types
pub use generator::{escape_dot, generate_callgraph, GraphConfig};
pub use tree::TreeGraphWriter;
