mod common;

use std::collections::BTreeSet;

use common::{cfg, id};
use spvkit_analysis::{
    back_edges, depth_first_search, dominators, is_reducible, is_structured, retreating_edges,
    structurize, Cfg, ControlTree, RegionKind,
};
use spvkit_ir::grammar::Opcode;
use spvkit_ir::{
    Block, FunctionControl, FunctionDef, Instruction, MergeDecl, Operand, SelectionControl,
};

fn set(vs: &[usize]) -> BTreeSet<usize> {
    vs.iter().copied().collect()
}

#[test]
fn if_then_else_control_tree() {
    // Vertices {1,2,3,4}, edges {1→2, 1→3, 2→4, 3→4}: the root is an
    // IfThenElse with children blocks 1,2,3,4 in that order.
    let g = cfg(4, &[(1, 2), (1, 3), (2, 4), (3, 4)]);
    let tree = structurize(&g).unwrap();
    let ControlTree::Region { kind, children, .. } = &tree else {
        panic!("expected a region root");
    };
    assert_eq!(*kind, RegionKind::IfThenElse);
    let order: Vec<usize> = children
        .iter()
        .map(|c| match c {
            ControlTree::Block(v) => *v,
            other => panic!("expected leaf, got {other:?}"),
        })
        .collect();
    assert_eq!(order, vec![0, 1, 2, 3]);
    assert!(is_structured(&tree));
}

#[test]
fn while_loop_control_tree() {
    // {1→2, 2→3, 3→2, 2→4}: Block[1, WhileLoop(cond=2, body=3), 4].
    let g = cfg(4, &[(1, 2), (2, 3), (3, 2), (2, 4)]);
    let tree = structurize(&g).unwrap();
    let ControlTree::Region { kind, children, .. } = &tree else {
        panic!("expected a region root");
    };
    assert_eq!(*kind, RegionKind::Block);
    assert!(matches!(children[0], ControlTree::Block(0)));
    match &children[1] {
        ControlTree::Region { kind, head, children } => {
            assert_eq!(*kind, RegionKind::WhileLoop);
            assert_eq!(*head, 1);
            assert!(matches!(children[0], ControlTree::Block(1)));
            assert!(matches!(children[1], ControlTree::Block(2)));
        }
        other => panic!("expected while loop, got {other:?}"),
    }
    assert!(matches!(children[2], ControlTree::Block(3)));
}

#[test]
fn irreducible_cfg_yields_improper_region() {
    // {1→2, 1→3, 2→3, 3→2}
    let g = cfg(3, &[(1, 2), (1, 3), (2, 3), (3, 2)]);

    let dfs = depth_first_search(&g, 0);
    let dom = dominators(&g).unwrap();
    let back = back_edges(&g, &dfs, &dom);
    assert!(!is_reducible(&g, &back));

    let tree = structurize(&g).unwrap();
    let kinds = tree.region_kinds();
    assert_eq!(kinds, vec![RegionKind::Improper]);
    // The improper region contains the cycle {2,3}.
    let leaves: BTreeSet<usize> = tree.leaves().into_iter().collect();
    assert!(leaves.contains(&1));
    assert!(leaves.contains(&2));
    assert!(!is_structured(&tree));
}

#[test]
fn dominator_sets_of_the_diamond_with_tail() {
    // {1→2, 1→3, 2→4, 3→4, 4→5}
    let g = cfg(5, &[(1, 2), (1, 3), (2, 4), (3, 4), (4, 5)]);
    let dom = dominators(&g).unwrap();
    assert_eq!(dom.sets[0], set(&[0]));
    assert_eq!(dom.sets[1], set(&[0, 1]));
    assert_eq!(dom.sets[2], set(&[0, 2]));
    assert_eq!(dom.sets[3], set(&[0, 3]));
    assert_eq!(dom.sets[4], set(&[0, 3, 4]));
}

#[test]
fn dominator_properties_hold_on_assorted_graphs() {
    let graphs = [
        cfg(4, &[(1, 2), (1, 3), (2, 4), (3, 4)]),
        cfg(4, &[(1, 2), (2, 3), (3, 2), (2, 4)]),
        cfg(3, &[(1, 2), (1, 3), (2, 3), (3, 2)]),
        cfg(6, &[(1, 2), (2, 3), (3, 4), (4, 3), (3, 5), (5, 2), (2, 6)]),
    ];
    for g in &graphs {
        let dom = dominators(g).unwrap();
        for v in 0..g.vertex_count() {
            // v ∈ dom(v)
            assert!(dom.sets[v].contains(&v));
            // dom(v) ⊆ dom(u) ∪ {v} for any predecessor u
            for &u in &g.preds[v] {
                for &d in &dom.sets[v] {
                    assert!(d == v || dom.sets[u].contains(&d));
                }
            }
        }
    }
}

#[test]
fn back_edges_equal_retreating_edges_on_reducible_graphs() {
    let graphs = [
        cfg(4, &[(1, 2), (2, 3), (3, 2), (2, 4)]),
        cfg(5, &[(1, 2), (2, 3), (3, 4), (4, 2), (2, 5)]),
        cfg(4, &[(1, 2), (1, 3), (2, 4), (3, 4)]),
    ];
    for g in &graphs {
        let dfs = depth_first_search(g, 0);
        let dom = dominators(g).unwrap();
        let back = back_edges(g, &dfs, &dom);
        let retreating = retreating_edges(g, &dfs);
        assert!(is_reducible(g, &back));
        assert_eq!(back, retreating);
    }
}

#[test]
fn control_tree_has_one_leaf_per_vertex() {
    let graphs = [
        cfg(1, &[]),
        cfg(4, &[(1, 2), (1, 3), (2, 4), (3, 4)]),
        cfg(4, &[(1, 2), (2, 3), (3, 2), (2, 4)]),
        cfg(3, &[(1, 2), (1, 3), (2, 3), (3, 2)]),
        cfg(3, &[(1, 2), (2, 2), (2, 3)]),
        cfg(7, &[(1, 2), (2, 3), (3, 4), (3, 5), (4, 6), (5, 6), (6, 2), (2, 7)]),
    ];
    for g in &graphs {
        let tree = structurize(g).unwrap();
        assert_eq!(tree.leaf_count(), g.vertex_count());
        let mut leaves = tree.leaves();
        leaves.sort_unstable();
        let expected: Vec<usize> = (0..g.vertex_count()).collect();
        assert_eq!(leaves, expected);
    }
}

#[test]
fn structured_iff_no_residual_regions() {
    let structured = cfg(4, &[(1, 2), (1, 3), (2, 4), (3, 4)]);
    let tree = structurize(&structured).unwrap();
    assert!(is_structured(&tree));

    let with_self_loop = cfg(3, &[(1, 2), (2, 2), (2, 3)]);
    let tree = structurize(&with_self_loop).unwrap();
    assert!(tree.region_kinds().contains(&RegionKind::SelfLoop));
    assert!(!is_structured(&tree));
}

#[test]
fn cfg_from_a_real_function_body() {
    // if/else over a parameter, built the way the front end lowers it.
    let blocks = vec![
        Block {
            label: id(10),
            merge: Some(MergeDecl::Selection {
                merge_block: id(13),
                control: SelectionControl::NONE,
            }),
            instructions: vec![Instruction::new(
                Opcode::BranchConditional,
                vec![
                    Operand::IdRef(id(5)),
                    Operand::IdRef(id(11)),
                    Operand::IdRef(id(12)),
                ],
            )],
        },
        Block {
            label: id(11),
            merge: None,
            instructions: vec![Instruction::new(
                Opcode::Branch,
                vec![Operand::IdRef(id(13))],
            )],
        },
        Block {
            label: id(12),
            merge: None,
            instructions: vec![Instruction::new(
                Opcode::Branch,
                vec![Operand::IdRef(id(13))],
            )],
        },
        Block {
            label: id(13),
            merge: None,
            instructions: vec![Instruction::new(Opcode::Return, vec![])],
        },
    ];
    let def = FunctionDef {
        id: id(4),
        type_id: id(3),
        return_type: id(2),
        control: FunctionControl::NONE,
        parameters: vec![],
        blocks,
    };

    let g = Cfg::from_function(&def).unwrap();
    assert_eq!(g.vertex_count(), 4);
    assert_eq!(g.labels, vec![id(10), id(11), id(12), id(13)]);

    let tree = structurize(&g).unwrap();
    assert_eq!(tree.region_kinds(), vec![RegionKind::IfThenElse]);
    assert!(is_structured(&tree));
}

#[test]
fn multiple_entries_are_rejected() {
    let g = cfg(3, &[(1, 3), (2, 3)]);
    assert!(dominators(&g).is_err());
    assert!(structurize(&g).is_err());
}
