//! Control-flow analysis for spvkit.
//!
//! Builds per-function control-flow graphs, computes dominators and the
//! spanning-DFS edge classification, and reduces CFGs to control trees by
//! iterated region-pattern matching.

pub mod cfg;
pub mod dfs;
pub mod dom;
pub mod structure;

pub use cfg::Cfg;
pub use dfs::{
    back_edges, classify_edges, depth_first_search, is_reducible, retreating_edges,
    reverse_postorder, strongly_connected_components, DfsTree, EdgeKind,
};
pub use dom::{dominators, post_dominators, Dominators};
pub use structure::{is_structured, structurize, ControlTree, RegionKind};

/// Errors from the control-flow analyses.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// The graph has no vertex without predecessors.
    #[error("graph has no entry vertex")]
    NoEntry,

    /// More than one vertex has no predecessors.
    #[error("graph has multiple entry vertices: {0:?}")]
    MultipleEntries(Vec<usize>),

    /// A malformed function body (missing terminator, unknown label, ...).
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// The structural analyzer could not reduce the graph further.
    #[error("unreducible region; residual graph:\n{0}")]
    UnreducibleRegion(String),
}
