//! Redundant retain/release elimination.
//!
//! Inside one block, `rc.retain %v` followed by `rc.release %v` cancels out when nothing
//! between them can observe the reference count: no call, no store and no other release.

use crate::ir::{Block, Module, Op};
use log::trace;

pub fn run(module: &mut Module) -> bool {
    let mut changed = false;
    for function in module.functions.iter_mut() {
        for block in &mut function.blocks {
            while let Some((retain, release)) = find_pair(block) {
                trace!(
                    "rc-opt: removing retain/release pair in @{}:{}",
                    function.name,
                    block.label
                );
                block.insts.remove(release);
                block.insts.remove(retain);
                changed = true;
            }
        }
    }
    changed
}

fn find_pair(block: &Block) -> Option<(usize, usize)> {
    block.insts.iter().enumerate().find_map(|(i, inst)| {
        let Op::Retain(value) = &inst.op else {
            return None;
        };
        block.insts[i + 1..]
            .iter()
            .enumerate()
            .find_map(|(offset, later)| match &later.op {
                Op::Release(v) if v == value => Some(Some(i + 1 + offset)),
                op if is_barrier(op) => Some(None),
                _ => None,
            })
            .flatten()
            .map(|j| (i, j))
    })
}

fn is_barrier(op: &Op) -> bool {
    matches!(op, Op::Call { .. } | Op::Store { .. } | Op::Release(_))
}
