//! Dominator analysis by the classical iterative fixed point.

use std::collections::BTreeSet;

use crate::cfg::Cfg;
use crate::AnalysisError;

/// Dominator sets and the derived dominator tree.
#[derive(Clone, Debug)]
pub struct Dominators {
    pub entry: usize,
    /// `sets[v]` is the set of vertices dominating `v` (including `v`).
    pub sets: Vec<BTreeSet<usize>>,
    /// Immediate dominator per vertex; `None` for the entry and for
    /// vertices unreachable from it.
    pub idom: Vec<Option<usize>>,
}

impl Dominators {
    /// `true` iff `a` dominates `b`.
    pub fn dominates(&self, a: usize, b: usize) -> bool {
        self.sets[b].contains(&a)
    }

    /// The nearest common dominator of a non-empty vertex set.
    pub fn common_dominator(&self, vertices: &[usize]) -> Option<usize> {
        let mut common: Option<BTreeSet<usize>> = None;
        for &v in vertices {
            common = Some(match common {
                None => self.sets[v].clone(),
                Some(acc) => acc.intersection(&self.sets[v]).copied().collect(),
            });
        }
        // The deepest member of the intersection is the one dominated by
        // every other member.
        let common = common?;
        common
            .iter()
            .copied()
            .find(|&d| common.iter().all(|&c| self.sets[d].contains(&c)))
    }
}

/// Computes dominator sets and the dominator tree of a single-entry graph.
///
/// The entry is the unique vertex without predecessors; zero such vertices
/// fail with [`AnalysisError::NoEntry`], more than one with
/// [`AnalysisError::MultipleEntries`].
pub fn dominators(cfg: &Cfg) -> Result<Dominators, AnalysisError> {
    let n = cfg.vertex_count();
    let entries: Vec<usize> = (0..n).filter(|&v| cfg.preds[v].is_empty()).collect();
    let entry = match entries.as_slice() {
        [] => return Err(AnalysisError::NoEntry),
        [single] => *single,
        _ => return Err(AnalysisError::MultipleEntries(entries)),
    };
    Ok(dominators_from(&cfg.succs, &cfg.preds, entry))
}

/// The iterative fixed point over explicit adjacency, from a known entry.
pub(crate) fn dominators_from(
    succs: &[Vec<usize>],
    preds: &[Vec<usize>],
    entry: usize,
) -> Dominators {
    let n = succs.len();
    let everything: BTreeSet<usize> = (0..n).collect();
    let mut sets = vec![everything; n];
    sets[entry] = BTreeSet::from([entry]);

    let mut changed = true;
    let mut rounds = 0usize;
    while changed {
        changed = false;
        rounds += 1;
        for v in 0..n {
            if v == entry {
                continue;
            }
            let mut new: Option<BTreeSet<usize>> = None;
            for &p in &preds[v] {
                new = Some(match new {
                    None => sets[p].clone(),
                    Some(acc) => acc.intersection(&sets[p]).copied().collect(),
                });
            }
            let mut new = new.unwrap_or_default();
            new.insert(v);
            if new != sets[v] {
                sets[v] = new;
                changed = true;
            }
        }
    }
    log::debug!("dominator fixed point converged after {rounds} rounds");

    // Vertices the entry actually reaches; the fixed point leaves the
    // rest at the full set, which must not produce an idom.
    let mut reachable = vec![false; n];
    let mut stack = vec![entry];
    reachable[entry] = true;
    while let Some(v) = stack.pop() {
        for &w in &succs[v] {
            if !reachable[w] {
                reachable[w] = true;
                stack.push(w);
            }
        }
    }

    // Immediate dominators: the member of dom(v) \ {v} dominated by every
    // other member.
    let mut idom = vec![None; n];
    for v in 0..n {
        if v == entry || !reachable[v] {
            continue;
        }
        let strict: Vec<usize> = sets[v].iter().copied().filter(|&d| d != v).collect();
        idom[v] = strict
            .iter()
            .copied()
            .find(|&d| strict.iter().all(|&other| sets[d].contains(&other)));
    }

    Dominators { entry, sets, idom }
}

/// Immediate post-dominators, computed on the reversed graph through a
/// virtual sink that every exit vertex reaches.
///
/// `None` means the vertex is post-dominated only by the virtual sink
/// (it branches to independent exits), or is unreachable.
pub fn post_dominators(cfg: &Cfg) -> Vec<Option<usize>> {
    let n = cfg.vertex_count();
    let sink = n;
    let mut succs: Vec<Vec<usize>> = vec![Vec::new(); n + 1];
    let mut preds: Vec<Vec<usize>> = vec![Vec::new(); n + 1];
    for (u, v) in cfg.edges() {
        // reversed
        succs[v].push(u);
        preds[u].push(v);
    }
    for v in 0..n {
        if cfg.succs[v].is_empty() {
            succs[sink].push(v);
            preds[v].push(sink);
        }
    }
    if succs[sink].is_empty() {
        // No exits at all (every vertex loops); nothing is post-dominated.
        return vec![None; n];
    }

    let dom = dominators_from(&succs, &preds, sink);
    (0..n)
        .map(|v| dom.idom[v].filter(|&d| d != sink))
        .collect()
}
