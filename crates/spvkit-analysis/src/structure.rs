//! Structural analysis: reduction of a CFG to a control tree.
//!
//! The reducer keeps a mutable copy of the CFG and a worklist seeded with
//! its reverse post-order. At each visit it tries the region patterns in
//! priority order against the current graph; a match contracts the matched
//! vertex set into its head, nests the members' subtrees under a new
//! region node, and re-queues the head. The cyclic and residual patterns
//! (`NaturalLoop`, `Improper`, `Proper`) only apply once a full sweep of
//! the simpler patterns makes no progress, so inner regions collapse
//! before an enclosing cycle is taken whole. The loop ends when one vertex
//! remains; a sweep with no match at all fails with
//! [`AnalysisError::UnreducibleRegion`].

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;

use spvkit_ir::Id;

use crate::cfg::Cfg;
use crate::dfs::{reverse_postorder, strongly_connected_components};
use crate::dom::{dominators_from, Dominators};
use crate::AnalysisError;

/// The kind of a matched region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegionKind {
    /// A maximal straight-line chain.
    Block,
    /// Condition with a single conditional arm rejoining at the merge.
    IfThen,
    /// Condition with two arms and a common merge.
    IfThenElse,
    /// Multi-way branch whose arms share a common merge.
    Case,
    /// Branch where some arms are single-predecessor sinks.
    Termination,
    /// A vertex with an edge to itself.
    SelfLoop,
    /// Two-vertex loop: condition and body.
    WhileLoop,
    /// Single-entry cycle contracted through its header.
    NaturalLoop,
    /// Multi-entry cycle with a synthetic entry at the common dominator.
    Improper,
    /// Acyclic region between a vertex and its immediate post-dominator.
    Proper,
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Block => "Block",
            Self::IfThen => "IfThen",
            Self::IfThenElse => "IfThenElse",
            Self::Case => "Case",
            Self::Termination => "Termination",
            Self::SelfLoop => "SelfLoop",
            Self::WhileLoop => "WhileLoop",
            Self::NaturalLoop => "NaturalLoop",
            Self::Improper => "Improper",
            Self::Proper => "Proper",
        })
    }
}

/// A control tree: leaves are the original CFG vertices, interior nodes
/// are matched regions with children in reverse post-order of the
/// original CFG.
#[derive(Clone, Debug)]
pub enum ControlTree {
    /// A leaf for one original CFG vertex.
    Block(usize),
    /// A contracted region headed by `head`.
    Region {
        kind: RegionKind,
        head: usize,
        children: Vec<ControlTree>,
    },
}

impl ControlTree {
    /// The number of leaves, which equals the vertex count of the CFG.
    pub fn leaf_count(&self) -> usize {
        match self {
            Self::Block(_) => 1,
            Self::Region { children, .. } => children.iter().map(ControlTree::leaf_count).sum(),
        }
    }

    /// The kinds of all interior regions, preorder.
    pub fn region_kinds(&self) -> Vec<RegionKind> {
        let mut kinds = Vec::new();
        self.collect_kinds(&mut kinds);
        kinds
    }

    fn collect_kinds(&self, kinds: &mut Vec<RegionKind>) {
        if let Self::Region { kind, children, .. } = self {
            kinds.push(*kind);
            for child in children {
                child.collect_kinds(kinds);
            }
        }
    }

    /// The leaf vertices in tree order.
    pub fn leaves(&self) -> Vec<usize> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves(&self, out: &mut Vec<usize>) {
        match self {
            Self::Block(v) => out.push(*v),
            Self::Region { children, .. } => {
                for child in children {
                    child.collect_leaves(out);
                }
            }
        }
    }

    /// Indented rendering with block labels.
    pub fn pretty(&self, labels: &[Id]) -> String {
        let mut out = String::new();
        self.pretty_into(labels, 0, &mut out);
        out
    }

    fn pretty_into(&self, labels: &[Id], depth: usize, out: &mut String) {
        for _ in 0..depth {
            out.push_str("  ");
        }
        match self {
            Self::Block(v) => {
                out.push_str(&format!("Block {}\n", labels[*v]));
            }
            Self::Region { kind, head, children } => {
                out.push_str(&format!("{kind} (head {})\n", labels[*head]));
                for child in children {
                    child.pretty_into(labels, depth + 1, out);
                }
            }
        }
    }
}

/// A control tree is structured iff it contains no `Proper`, `Improper`,
/// or `SelfLoop` region.
pub fn is_structured(tree: &ControlTree) -> bool {
    !tree.region_kinds().iter().any(|kind| {
        matches!(
            kind,
            RegionKind::Proper | RegionKind::Improper | RegionKind::SelfLoop
        )
    })
}

/// Reduces a CFG to a single control tree.
pub fn structurize(cfg: &Cfg) -> Result<ControlTree, AnalysisError> {
    Reducer::new(cfg)?.run()
}

// ---------------------------------------------------------------------------
// The reducer
// ---------------------------------------------------------------------------

struct Reducer<'a> {
    cfg: &'a Cfg,
    alive: Vec<bool>,
    succs: Vec<BTreeSet<usize>>,
    preds: Vec<BTreeSet<usize>>,
    /// Original reverse-post-order position per vertex; unreachable
    /// vertices sort last and are never candidates.
    rpo_index: Vec<usize>,
    trees: HashMap<usize, ControlTree>,
}

/// Dominators and components of the current contracted graph, in compact
/// indexing.
struct Snapshot {
    dense: Vec<usize>,
    pos: HashMap<usize, usize>,
    succs: Vec<Vec<usize>>,
    dom: Dominators,
    sccs: Vec<Vec<usize>>,
}

impl<'a> Reducer<'a> {
    fn new(cfg: &'a Cfg) -> Result<Self, AnalysisError> {
        let n = cfg.vertex_count();
        if n == 0 {
            return Err(AnalysisError::NoEntry);
        }
        let entries: Vec<usize> = (0..n).filter(|&v| cfg.preds[v].is_empty()).collect();
        let entry = match entries.as_slice() {
            [] => return Err(AnalysisError::NoEntry),
            [single] => *single,
            _ => return Err(AnalysisError::MultipleEntries(entries)),
        };

        let rpo = reverse_postorder(cfg, entry);
        let mut rpo_index = vec![usize::MAX; n];
        for (i, &v) in rpo.iter().enumerate() {
            rpo_index[v] = i;
        }

        Ok(Self {
            cfg,
            alive: vec![true; n],
            succs: cfg.succs.iter().map(|s| s.iter().copied().collect()).collect(),
            preds: cfg.preds.iter().map(|p| p.iter().copied().collect()).collect(),
            rpo_index,
            trees: (0..n).map(|v| (v, ControlTree::Block(v))).collect(),
        })
    }

    fn run(mut self) -> Result<ControlTree, AnalysisError> {
        while self.alive_count() > 1 {
            // A sweep of the simple patterns over the worklist.
            let mut progress = false;
            let mut worklist: VecDeque<usize> = self.order().into();
            while let Some(v) = worklist.pop_front() {
                if !self.alive[v] {
                    continue;
                }
                if let Some((kind, members)) = self.match_simple(v) {
                    log::debug!("contracting {kind} region at vertex {v}: {members:?}");
                    self.contract(kind, v, &members);
                    worklist.push_front(v);
                    progress = true;
                }
            }
            if progress || self.alive_count() == 1 {
                continue;
            }

            // No simple pattern applies anywhere: fall back to the cyclic
            // and residual patterns, innermost structure already reduced.
            match self.match_residual() {
                Some((kind, v, members)) => {
                    log::debug!("contracting residual {kind} region at vertex {v}: {members:?}");
                    self.contract(kind, v, &members);
                }
                None => {
                    return Err(AnalysisError::UnreducibleRegion(self.dump_residual()));
                }
            }
        }

        let root = self
            .trees
            .into_values()
            .next()
            .expect("one vertex survives");
        Ok(root)
    }

    /// Alive candidate vertices in original reverse post-order.
    fn order(&self) -> Vec<usize> {
        let mut vs: Vec<usize> = (0..self.alive.len())
            .filter(|&v| self.alive[v] && self.rpo_index[v] != usize::MAX)
            .collect();
        vs.sort_by_key(|&v| self.rpo_index[v]);
        vs
    }

    fn alive_count(&self) -> usize {
        self.alive.iter().filter(|&&a| a).count()
    }

    fn dump_residual(&self) -> String {
        let mut out = String::new();
        for v in 0..self.alive.len() {
            if !self.alive[v] {
                continue;
            }
            let succs: Vec<String> = self.succs[v]
                .iter()
                .map(|&s| self.cfg.labels[s].to_string())
                .collect();
            out.push_str(&format!(
                "{} -> {}\n",
                self.cfg.labels[v],
                if succs.is_empty() {
                    "<exit>".to_owned()
                } else {
                    succs.join(", ")
                }
            ));
        }
        out
    }

    // -- pattern matching --------------------------------------------------

    fn sorted(&self, mut members: Vec<usize>) -> Vec<usize> {
        members.sort_by_key(|&w| self.rpo_index[w]);
        members
    }

    fn match_simple(&self, v: usize) -> Option<(RegionKind, Vec<usize>)> {
        if let Some(chain) = self.match_block(v) {
            return Some((RegionKind::Block, self.sorted(chain)));
        }
        if let Some(members) = self.match_if_then(v) {
            return Some((RegionKind::IfThen, self.sorted(members)));
        }
        if let Some(members) = self.match_if_then_else(v) {
            return Some((RegionKind::IfThenElse, self.sorted(members)));
        }
        if let Some(members) = self.match_case(v) {
            return Some((RegionKind::Case, self.sorted(members)));
        }
        #[cfg(feature = "termination-regions")]
        if let Some(members) = self.match_termination(v) {
            return Some((RegionKind::Termination, self.sorted(members)));
        }
        if self.succs[v].contains(&v) {
            return Some((RegionKind::SelfLoop, vec![v]));
        }
        if let Some(members) = self.match_while_loop(v) {
            return Some((RegionKind::WhileLoop, self.sorted(members)));
        }
        None
    }

    fn match_residual(&self) -> Option<(RegionKind, usize, Vec<usize>)> {
        let order = self.order();
        let snapshot = self.snapshot();
        for &v in &order {
            if let Some(members) = self.match_natural_loop(v, &snapshot) {
                return Some((RegionKind::NaturalLoop, v, self.sorted(members)));
            }
        }
        for &v in &order {
            if let Some(members) = self.match_improper(v, &snapshot) {
                return Some((RegionKind::Improper, v, self.sorted(members)));
            }
        }
        for &v in &order {
            if let Some(members) = self.match_proper(v, &snapshot) {
                return Some((RegionKind::Proper, v, self.sorted(members)));
            }
        }
        None
    }

    /// Longest chain through `v` whose interior vertices have exactly one
    /// predecessor and one successor, with no internal cycle.
    fn match_block(&self, v: usize) -> Option<Vec<usize>> {
        let mut chain = VecDeque::from([v]);
        let mut seen = BTreeSet::from([v]);

        let mut tail = v;
        while self.succs[tail].len() == 1 {
            let next = *self.succs[tail].first().expect("len checked");
            if seen.contains(&next) || self.preds[next].len() != 1 {
                break;
            }
            chain.push_back(next);
            seen.insert(next);
            tail = next;
        }

        let mut head = v;
        while self.preds[head].len() == 1 {
            let prev = *self.preds[head].first().expect("len checked");
            if seen.contains(&prev) || self.succs[prev].len() != 1 {
                break;
            }
            chain.push_front(prev);
            seen.insert(prev);
            head = prev;
        }

        if chain.len() < 2 {
            return None;
        }
        // The endpoints have unconstrained external degree; reject a tail
        // that feeds back into the chain (the region would swallow a cycle).
        if self.succs[tail].iter().any(|s| seen.contains(s)) {
            return None;
        }
        Some(chain.into_iter().collect())
    }

    /// `out(v) = {t, m}` where the arm `t` is single-entry single-exit
    /// with `m` as its unique successor.
    fn match_if_then(&self, v: usize) -> Option<Vec<usize>> {
        let (a, b) = self.two_successors(v)?;
        for (t, m) in [(a, b), (b, a)] {
            if t != v
                && m != v
                && self.is_sese(t)
                && self.only_pred(t) == Some(v)
                && self.only_succ(t) == Some(m)
            {
                return Some(vec![v, t, m]);
            }
        }
        None
    }

    /// `out(v) = {t, e}`, both arms single-entry single-exit with a common
    /// unique successor `m != v`.
    fn match_if_then_else(&self, v: usize) -> Option<Vec<usize>> {
        let (t, e) = self.two_successors(v)?;
        if t == v || e == v {
            return None;
        }
        if !(self.is_sese(t) && self.is_sese(e)) {
            return None;
        }
        if self.only_pred(t) != Some(v) || self.only_pred(e) != Some(v) {
            return None;
        }
        let m = self.only_succ(t)?;
        if self.only_succ(e) != Some(m) || m == v {
            return None;
        }
        Some(vec![v, t, e, m])
    }

    /// `|out(v)| > 1` with every successor single-entry single-exit and a
    /// common unique successor `m != v`.
    fn match_case(&self, v: usize) -> Option<Vec<usize>> {
        if self.succs[v].len() < 2 || self.succs[v].contains(&v) {
            return None;
        }
        let mut merge = None;
        for &arm in &self.succs[v] {
            if !self.is_sese(arm) || self.only_pred(arm) != Some(v) {
                return None;
            }
            let m = self.only_succ(arm)?;
            if merge.replace(m).is_some_and(|prev| prev != m) {
                return None;
            }
        }
        let m = merge?;
        if m == v {
            return None;
        }
        let mut members = vec![v];
        members.extend(self.succs[v].iter().copied());
        members.push(m);
        Some(members)
    }

    /// `|out(v)| >= 2` where some successors are single-predecessor sinks.
    #[cfg(feature = "termination-regions")]
    fn match_termination(&self, v: usize) -> Option<Vec<usize>> {
        if self.succs[v].len() < 2 {
            return None;
        }
        let sinks: Vec<usize> = self.succs[v]
            .iter()
            .copied()
            .filter(|&s| s != v && self.succs[s].is_empty() && self.only_pred(s) == Some(v))
            .collect();
        if sinks.is_empty() {
            return None;
        }
        let mut members = vec![v];
        members.extend(sinks);
        Some(members)
    }

    /// `in(v) = {outside, body}`, `out(v) = {body, exit}` with a
    /// single-entry single-exit body looping back to `v`.
    fn match_while_loop(&self, v: usize) -> Option<Vec<usize>> {
        if self.preds[v].len() != 2 || self.succs[v].len() != 2 {
            return None;
        }
        let body = *self.succs[v].iter().find(|&&s| self.preds[v].contains(&s))?;
        if body == v || !self.is_sese(body) {
            return None;
        }
        if self.only_pred(body) != Some(v) || self.only_succ(body) != Some(v) {
            return None;
        }
        Some(vec![v, body])
    }

    /// A back edge targets `v` and every entry into `v`'s component is
    /// through `v`.
    fn match_natural_loop(&self, v: usize, snap: &Snapshot) -> Option<Vec<usize>> {
        let dv = *snap.pos.get(&v)?;
        let has_back_edge = self.preds[v].iter().any(|&u| {
            snap.pos
                .get(&u)
                .is_some_and(|&du| snap.dom.dominates(dv, du))
        });
        if !has_back_edge {
            return None;
        }
        let scc = snap
            .sccs
            .iter()
            .find(|scc| scc.contains(&dv))
            .expect("every vertex is in a component");
        if scc.len() < 2 {
            return None;
        }
        // Single-entry check: only v may have predecessors outside the
        // component.
        for &dw in scc {
            if dw == dv {
                continue;
            }
            let w = snap.dense[dw];
            for &p in &self.preds[w] {
                let dp = snap.pos[&p];
                if !scc.contains(&dp) {
                    return None;
                }
            }
        }
        Some(scc.iter().map(|&dw| snap.dense[dw]).collect())
    }

    /// A multi-entry cycle whose entries' least common dominator is `v`;
    /// `v` becomes the synthetic entry of the region.
    fn match_improper(&self, v: usize, snap: &Snapshot) -> Option<Vec<usize>> {
        let dv = *snap.pos.get(&v)?;
        for scc in &snap.sccs {
            if scc.len() < 2 {
                continue;
            }
            let entries: Vec<usize> = scc
                .iter()
                .copied()
                .filter(|&dw| {
                    let w = snap.dense[dw];
                    self.preds[w]
                        .iter()
                        .any(|&p| !scc.contains(&snap.pos[&p]))
                })
                .collect();
            if entries.len() < 2 {
                continue;
            }
            if snap.dom.common_dominator(&entries) != Some(dv) {
                continue;
            }
            let mut members: BTreeSet<usize> = scc.iter().map(|&dw| snap.dense[dw]).collect();
            members.insert(v);
            return Some(members.into_iter().collect());
        }
        None
    }

    /// The residual acyclic pattern: the vertices between `v` and its
    /// immediate post-dominator (or everything `v` reaches, when the
    /// post-dominator is the virtual exit).
    fn match_proper(&self, v: usize, snap: &Snapshot) -> Option<Vec<usize>> {
        let dv = *snap.pos.get(&v)?;
        let ipdom = snap.post_dominator(dv).map(|dm| snap.dense[dm]);

        let mut members: BTreeSet<usize> = BTreeSet::from([v]);
        let mut stack = vec![v];
        while let Some(u) = stack.pop() {
            for &w in &self.succs[u] {
                if Some(w) == ipdom || members.contains(&w) {
                    continue;
                }
                members.insert(w);
                stack.push(w);
            }
        }
        if let Some(m) = ipdom {
            members.insert(m);
        }
        if members.len() < 2 {
            return None;
        }
        // The pattern only applies to acyclic residue.
        if self.region_has_cycle(&members) {
            return None;
        }
        Some(members.into_iter().collect())
    }

    fn region_has_cycle(&self, members: &BTreeSet<usize>) -> bool {
        let dense: Vec<usize> = members.iter().copied().collect();
        let pos: HashMap<usize, usize> = dense.iter().enumerate().map(|(i, &v)| (v, i)).collect();
        let succs: Vec<Vec<usize>> = dense
            .iter()
            .map(|&v| {
                self.succs[v]
                    .iter()
                    .filter_map(|s| pos.get(s).copied())
                    .collect()
            })
            .collect();
        strongly_connected_components(&succs)
            .iter()
            .any(|scc| scc.len() > 1)
            || dense.iter().any(|&v| self.succs[v].contains(&v))
    }

    // -- graph bookkeeping -------------------------------------------------

    fn two_successors(&self, v: usize) -> Option<(usize, usize)> {
        if self.succs[v].len() != 2 {
            return None;
        }
        let mut it = self.succs[v].iter();
        Some((*it.next()?, *it.next()?))
    }

    fn only_pred(&self, v: usize) -> Option<usize> {
        (self.preds[v].len() == 1).then(|| *self.preds[v].first().expect("len checked"))
    }

    fn only_succ(&self, v: usize) -> Option<usize> {
        (self.succs[v].len() == 1).then(|| *self.succs[v].first().expect("len checked"))
    }

    fn is_sese(&self, v: usize) -> bool {
        self.preds[v].len() == 1 && self.succs[v].len() == 1
    }

    /// Compact view of the alive subgraph with dominators and components.
    fn snapshot(&self) -> Snapshot {
        let dense: Vec<usize> = (0..self.alive.len()).filter(|&v| self.alive[v]).collect();
        let pos: HashMap<usize, usize> = dense.iter().enumerate().map(|(i, &v)| (v, i)).collect();
        let succs: Vec<Vec<usize>> = dense
            .iter()
            .map(|&v| self.succs[v].iter().map(|&s| pos[&s]).collect())
            .collect();
        let preds: Vec<Vec<usize>> = dense
            .iter()
            .map(|&v| self.preds[v].iter().map(|&p| pos[&p]).collect())
            .collect();
        let entry = (0..dense.len()).find(|&i| preds[i].is_empty()).unwrap_or(0);
        let dom = dominators_from(&succs, &preds, entry);
        let sccs = strongly_connected_components(&succs);
        Snapshot {
            dense,
            pos,
            succs,
            dom,
            sccs,
        }
    }

    /// Contracts `members` into `v`: external adjacency is re-homed onto
    /// `v`, internal edges (including any self-loop being consumed)
    /// disappear, and the members' subtrees become children of a new
    /// region node in original reverse post-order.
    fn contract(&mut self, kind: RegionKind, v: usize, members: &[usize]) {
        let member_set: BTreeSet<usize> = members.iter().copied().collect();

        let children: Vec<ControlTree> = members
            .iter()
            .map(|&w| self.trees.remove(&w).expect("member has a tree"))
            .collect();
        self.trees.insert(
            v,
            ControlTree::Region {
                kind,
                head: v,
                children,
            },
        );

        let mut new_succs = BTreeSet::new();
        let mut new_preds = BTreeSet::new();
        for &w in &member_set {
            for &s in &self.succs[w] {
                if !member_set.contains(&s) {
                    new_succs.insert(s);
                }
            }
            for &p in &self.preds[w] {
                if !member_set.contains(&p) {
                    new_preds.insert(p);
                }
            }
        }

        // Detach every member, then re-attach the representative.
        for &w in &member_set {
            for s in std::mem::take(&mut self.succs[w]) {
                self.preds[s].remove(&w);
            }
            for p in std::mem::take(&mut self.preds[w]) {
                self.succs[p].remove(&w);
            }
        }
        for &s in &new_succs {
            self.preds[s].insert(v);
        }
        for &p in &new_preds {
            self.succs[p].insert(v);
        }
        self.succs[v] = new_succs;
        self.preds[v] = new_preds;

        for &w in &member_set {
            if w != v {
                self.alive[w] = false;
            }
        }
    }
}

impl Snapshot {
    /// Immediate post-dominator in compact indexing; `None` when only the
    /// virtual exit post-dominates.
    fn post_dominator(&self, dv: usize) -> Option<usize> {
        let n = self.succs.len();
        let sink = n;
        let mut succs: Vec<Vec<usize>> = vec![Vec::new(); n + 1];
        let mut preds: Vec<Vec<usize>> = vec![Vec::new(); n + 1];
        for (u, vs) in self.succs.iter().enumerate() {
            for &w in vs {
                succs[w].push(u);
                preds[u].push(w);
            }
        }
        for u in 0..n {
            if self.succs[u].is_empty() {
                succs[sink].push(u);
                preds[u].push(sink);
            }
        }
        if succs[sink].is_empty() {
            return None;
        }
        let dom = dominators_from(&succs, &preds, sink);
        dom.idom[dv].filter(|&d| d != sink)
    }
}
