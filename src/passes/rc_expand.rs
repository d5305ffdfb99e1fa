//! Lowering of abstract reference-counting operations into runtime calls.

use crate::ir::{Inst, Module, Op};
use log::debug;

/// Runtime entry point implementing `rc.retain`.
pub const RC_RETAIN_ENTRY: &str = "__rc_retain";

/// Runtime entry point implementing `rc.release`.
pub const RC_RELEASE_ENTRY: &str = "__rc_release";

/// The runtime call an abstract operation lowers to, if `op` is one.
pub fn runtime_call(op: &Op) -> Option<Op> {
    let (callee, value) = match op {
        Op::Retain(value) => (RC_RETAIN_ENTRY, value),
        Op::Release(value) => (RC_RELEASE_ENTRY, value),
        _ => return None,
    };
    Some(Op::Call {
        callee: callee.to_string(),
        args: vec![value.clone()],
    })
}

pub fn run(module: &mut Module) -> bool {
    let mut retains = 0;
    let mut releases = 0;
    for inst in module
        .functions
        .iter_mut()
        .flat_map(|f| f.blocks.iter_mut())
        .flat_map(|b| b.insts.iter_mut())
    {
        match inst.op {
            Op::Retain(_) => retains += 1,
            Op::Release(_) => releases += 1,
            _ => continue,
        }
        if let Some(call) = runtime_call(&inst.op) {
            *inst = Inst::effect(call);
        }
    }

    if retains > 0 {
        module.ensure_declared(RC_RETAIN_ENTRY, 1);
    }
    if releases > 0 {
        module.ensure_declared(RC_RELEASE_ENTRY, 1);
    }
    debug!("rc-expand: lowered {retains} retains and {releases} releases");
    retains + releases > 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{parse_module, verify_module};

    #[test]
    fn test_expands_and_declares() {
        let mut module = parse_module(
            "define @f(%o) {\nentry:\n  rc.retain %o\n  rc.release %o\n  rc.release %o\n  ret\n}\n",
        )
        .unwrap();
        assert!(run(&mut module));
        let printed: Vec<String> = module.functions[0].blocks[0]
            .insts
            .iter()
            .map(|i| i.to_string())
            .collect();
        assert_eq!(
            printed,
            vec![
                "call @__rc_retain(%o)",
                "call @__rc_release(%o)",
                "call @__rc_release(%o)"
            ]
        );
        assert!(module.function(RC_RETAIN_ENTRY).unwrap().is_declaration());
        assert!(module.function(RC_RELEASE_ENTRY).unwrap().is_declaration());
        verify_module(&module).unwrap();
    }

    #[test]
    fn test_nothing_to_expand() {
        let mut module = parse_module("define @f() {\nentry:\n  ret\n}\n").unwrap();
        assert!(!run(&mut module));
        assert_eq!(module.functions.len(), 1);
    }
}
