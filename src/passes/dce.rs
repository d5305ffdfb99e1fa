//! Dead code elimination: removes side-effect-free instructions whose results are unused.

use crate::ir::Function;
use std::collections::HashSet;

pub fn run(function: &mut Function) -> bool {
    let mut changed = false;
    loop {
        let used: HashSet<String> = function
            .used_values()
            .into_iter()
            .map(str::to_string)
            .collect();
        let mut removed = 0;
        for block in &mut function.blocks {
            let before = block.insts.len();
            block.insts.retain(|inst| {
                !inst.op.is_pure()
                    || inst
                        .result
                        .as_ref()
                        .is_some_and(|r| used.contains(r.name()))
            });
            removed += before - block.insts.len();
        }
        if removed == 0 {
            return changed;
        }
        changed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parse_module;

    #[test]
    fn test_removes_transitively_dead_values() {
        let mut module = parse_module(
            "declare @g(%a)\n\
             define @f(%p) {\nentry:\n  %a = const 1\n  %b = add %a, %a\n  %l = load %p\n\
             %k = const 5\n  store %k, %p\n  %r = call @g(%k)\n  ret\n}\n",
        )
        .unwrap();
        let f = module.function_mut("f").unwrap();
        assert!(run(f));
        let printed: Vec<String> = f.blocks[0].insts.iter().map(|i| i.to_string()).collect();
        assert_eq!(
            printed,
            vec!["%k = const 5", "store %k, %p", "%r = call @g(%k)"]
        );
    }
}
