//! Control-flow graph construction from function bodies.

use spvkit_ir::grammar::Opcode;
use spvkit_ir::{FunctionDef, Id, IdMap, Operand};

use crate::AnalysisError;

/// A directed graph over a function's basic blocks.
///
/// Vertex `i` corresponds to the function's `i`-th block in body order, so
/// vertex 0 is the entry block. Adjacency is deduplicated and kept in
/// target-declaration order.
#[derive(Clone, Debug)]
pub struct Cfg {
    /// Block label per vertex.
    pub labels: Vec<Id>,
    /// Successor lists per vertex.
    pub succs: Vec<Vec<usize>>,
    /// Predecessor lists per vertex.
    pub preds: Vec<Vec<usize>>,
}

impl Cfg {
    /// Builds the CFG of a function from its block terminators.
    pub fn from_function(def: &FunctionDef) -> Result<Self, AnalysisError> {
        let mut index_of: IdMap<usize> = IdMap::new();
        for (i, block) in def.blocks.iter().enumerate() {
            index_of.insert(block.label, i);
        }

        let mut cfg = Cfg {
            labels: def.blocks.iter().map(|b| b.label).collect(),
            succs: vec![Vec::new(); def.blocks.len()],
            preds: vec![Vec::new(); def.blocks.len()],
        };

        for (i, block) in def.blocks.iter().enumerate() {
            let terminator = block.terminator().ok_or_else(|| {
                AnalysisError::InvariantViolation(format!(
                    "block {} does not end with a terminator",
                    block.label
                ))
            })?;
            let targets: Vec<Id> = match terminator.opcode {
                Opcode::Branch => terminator.operand_ids().collect(),
                Opcode::BranchConditional => {
                    // condition, then-target, else-target
                    terminator.operand_ids().skip(1).take(2).collect()
                }
                Opcode::Switch => {
                    // selector, default, then the case (literal, target) pairs
                    terminator.operands[1..]
                        .iter()
                        .filter_map(Operand::id)
                        .collect()
                }
                Opcode::Return | Opcode::ReturnValue | Opcode::Unreachable | Opcode::Kill => {
                    Vec::new()
                }
                other => {
                    return Err(AnalysisError::InvariantViolation(format!(
                        "block {} ends with non-terminator {}",
                        block.label,
                        other.name()
                    )))
                }
            };
            for target in targets {
                let j = *index_of.get(&target).ok_or_else(|| {
                    AnalysisError::InvariantViolation(format!(
                        "branch target {target} is not a block of this function"
                    ))
                })?;
                cfg.add_edge(i, j);
            }
        }

        Ok(cfg)
    }

    /// Builds a CFG directly from an edge list (analysis tests and dumps).
    pub fn from_edges(vertex_count: usize, edges: &[(usize, usize)]) -> Self {
        let mut cfg = Cfg {
            labels: (0..vertex_count)
                .map(|i| Id::new(i as u32 + 1).expect("non-zero"))
                .collect(),
            succs: vec![Vec::new(); vertex_count],
            preds: vec![Vec::new(); vertex_count],
        };
        for &(from, to) in edges {
            cfg.add_edge(from, to);
        }
        cfg
    }

    fn add_edge(&mut self, from: usize, to: usize) {
        if !self.succs[from].contains(&to) {
            self.succs[from].push(to);
            self.preds[to].push(from);
        }
    }

    /// Number of vertices.
    pub fn vertex_count(&self) -> usize {
        self.succs.len()
    }

    /// All edges in vertex order.
    pub fn edges(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.succs
            .iter()
            .enumerate()
            .flat_map(|(u, vs)| vs.iter().map(move |&v| (u, v)))
    }
}
