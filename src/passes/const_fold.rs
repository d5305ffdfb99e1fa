//! Folding of binary operations on constant operands.

use crate::ir::{Function, Op};
use std::collections::HashMap;

pub fn run(function: &mut Function) -> bool {
    let mut constants: HashMap<String, i64> = HashMap::new();
    for inst in function.blocks.iter().flat_map(|b| &b.insts) {
        if let (Some(result), Op::Const(value)) = (&inst.result, &inst.op) {
            constants.insert(result.name().to_string(), *value);
        }
    }

    let mut changed = false;
    loop {
        let mut folded_any = false;
        for inst in function.blocks.iter_mut().flat_map(|b| b.insts.iter_mut()) {
            let Op::Binary(op, lhs, rhs) = &inst.op else {
                continue;
            };
            let (Some(&l), Some(&r)) = (constants.get(lhs.name()), constants.get(rhs.name())) else {
                continue;
            };
            let value = op.evaluate(l, r);
            inst.op = Op::Const(value);
            if let Some(result) = &inst.result {
                constants.insert(result.name().to_string(), value);
            }
            folded_any = true;
        }
        if !folded_any {
            break;
        }
        changed = true;
    }
    changed
}
