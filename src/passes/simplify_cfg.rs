//! Control-flow simplification.
//!
//! Folds conditional branches whose outcome is known, drops blocks unreachable from the
//! entry block, and merges a block into its predecessor when that predecessor jumps
//! only to it and it has no other predecessor.

use crate::ir::{Function, Op, Terminator};
use std::collections::{HashMap, HashSet};

pub fn run(function: &mut Function) -> bool {
    if function.is_declaration() {
        return false;
    }
    let mut changed = fold_branches(function);
    changed |= remove_unreachable(function);
    while merge_one(function) {
        changed = true;
    }
    changed
}

fn fold_branches(function: &mut Function) -> bool {
    let constants: HashMap<String, i64> = function
        .blocks
        .iter()
        .flat_map(|b| &b.insts)
        .filter_map(|inst| match (&inst.result, &inst.op) {
            (Some(result), Op::Const(value)) => Some((result.name().to_string(), *value)),
            _ => None,
        })
        .collect();

    let mut changed = false;
    for block in &mut function.blocks {
        let folded = match &block.term {
            Terminator::CondBr {
                then_dest,
                else_dest,
                ..
            } if then_dest == else_dest => Some(then_dest.clone()),
            Terminator::CondBr {
                cond,
                then_dest,
                else_dest,
            } => constants.get(cond.name()).map(|&value| {
                if value != 0 {
                    then_dest.clone()
                } else {
                    else_dest.clone()
                }
            }),
            _ => None,
        };
        if let Some(dest) = folded {
            block.term = Terminator::Br(dest);
            changed = true;
        }
    }
    changed
}

fn remove_unreachable(function: &mut Function) -> bool {
    let mut reachable = HashSet::new();
    let mut stack = vec![function.blocks[0].label.clone()];
    while let Some(label) = stack.pop() {
        if !reachable.insert(label.clone()) {
            continue;
        }
        if let Some(block) = function.block(&label) {
            stack.extend(block.term.successors().into_iter().map(str::to_string));
        }
    }

    let before = function.blocks.len();
    function.blocks.retain(|b| reachable.contains(&b.label));
    function.blocks.len() != before
}

fn merge_one(function: &mut Function) -> bool {
    let preds = function.predecessor_counts();
    let candidate = function.blocks.iter().enumerate().find_map(|(idx, block)| {
        let Terminator::Br(dest) = &block.term else {
            return None;
        };
        let succ = function.block_index(dest)?;
        (succ != 0 && succ != idx && preds[succ] == 1).then_some((idx, succ))
    });

    let Some((pred, succ)) = candidate else {
        return false;
    };
    let absorbed = function.blocks.remove(succ);
    let pred = if succ < pred { pred - 1 } else { pred };
    let block = &mut function.blocks[pred];
    block.insts.extend(absorbed.insts);
    block.term = absorbed.term;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parse_module;

    fn simplify(text: &str) -> Function {
        let mut module = parse_module(text).unwrap();
        let mut function = module.functions.remove(0);
        run(&mut function);
        function
    }

    #[test]
    fn test_constant_branch_folds_and_merges() {
        let f = simplify(
            "define @f() {\nentry:\n  %c = const 1\n  condbr %c, yes, no\n\
             yes:\n  %a = const 7\n  ret %a\nno:\n  %b = const 9\n  ret %b\n}\n",
        );
        assert_eq!(f.blocks.len(), 1);
        assert_eq!(f.blocks[0].label, "entry");
        assert_eq!(f.blocks[0].insts.len(), 2);
        assert_eq!(f.blocks[0].term.to_string(), "ret %a");
    }

    #[test]
    fn test_identical_targets() {
        let f = simplify(
            "define @f(%x) {\nentry:\n  condbr %x, next, next\nnext:\n  ret %x\n}\n",
        );
        assert_eq!(f.blocks.len(), 1);
    }

    #[test]
    fn test_unknown_condition_is_kept() {
        let f = simplify(
            "define @f(%x) {\nentry:\n  condbr %x, a, b\na:\n  ret %x\nb:\n  ret\n}\n",
        );
        assert_eq!(f.blocks.len(), 3);
    }

    #[test]
    fn test_block_with_two_predecessors_is_not_merged() {
        let f = simplify(
            "define @f(%x) {\nentry:\n  condbr %x, a, b\na:\n  br join\nb:\n  br join\n\
             join:\n  ret %x\n}\n",
        );
        assert_eq!(f.blocks.len(), 4);
    }
}
