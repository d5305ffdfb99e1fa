//! Inlining of small single-block functions.
//!
//! A callee qualifies when it has a body of exactly one block ending in `ret`, does not
//! call itself, and its instruction count (terminator included) is within the
//! threshold. Candidates are snapshotted before any call site changes, so one run
//! inlines a single level. Inlined values are renamed with a `.i<N>` suffix.

use crate::ir::{Function, Inst, Module, Op, Terminator, Value};
use log::trace;
use std::collections::HashMap;

struct Callee {
    params: Vec<Value>,
    insts: Vec<Inst>,
    ret: Option<Value>,
}

impl Callee {
    fn from_function(function: &Function, threshold: usize) -> Option<Callee> {
        let [block] = function.blocks.as_slice() else {
            return None;
        };
        let Terminator::Ret(ret) = &block.term else {
            return None;
        };
        if function.inst_count() > threshold
            || function.referenced_symbols().contains(&function.name.as_str())
        {
            return None;
        }
        Some(Callee {
            params: function.params.clone(),
            insts: block.insts.clone(),
            ret: ret.clone(),
        })
    }

    /// The callee body with parameters bound to `args` and locals renamed.
    fn instantiate(&self, args: &[Value], suffix: &str) -> (Vec<Inst>, Option<Value>) {
        let mut renames: HashMap<&str, Value> = self
            .params
            .iter()
            .map(|p| p.name())
            .zip(args.iter().cloned())
            .collect();
        for inst in &self.insts {
            if let Some(result) = &inst.result {
                renames.insert(result.name(), Value::new(format!("{}{suffix}", result.name())));
            }
        }
        let rename = |value: &mut Value| {
            if let Some(new) = renames.get(value.name()) {
                *value = new.clone();
            }
        };

        let body = self
            .insts
            .iter()
            .map(|inst| {
                let mut inst = inst.clone();
                if let Some(result) = inst.result.as_mut() {
                    rename(result);
                }
                for operand in inst.op.operands_mut() {
                    rename(operand);
                }
                inst
            })
            .collect();
        let ret = self.ret.clone().map(|mut v| {
            rename(&mut v);
            v
        });
        (body, ret)
    }
}

pub fn run(module: &mut Module, threshold: usize) -> bool {
    let candidates: HashMap<String, Callee> = module
        .defined_functions()
        .filter_map(|f| Callee::from_function(f, threshold).map(|c| (f.name.clone(), c)))
        .collect();
    if candidates.is_empty() {
        return false;
    }

    let mut counter = 0;
    let mut changed = false;
    for function in module.functions.iter_mut().filter(|f| !f.is_declaration()) {
        changed |= inline_into(function, &candidates, &mut counter);
    }
    changed
}

fn inline_into(
    function: &mut Function,
    candidates: &HashMap<String, Callee>,
    counter: &mut usize,
) -> bool {
    let mut changed = false;
    for bi in 0..function.blocks.len() {
        let mut ii = 0;
        while ii < function.blocks[bi].insts.len() {
            let site = match &function.blocks[bi].insts[ii] {
                Inst {
                    result,
                    op: Op::Call { callee, args },
                } if *callee != function.name => candidates
                    .get(callee)
                    .filter(|c| result.is_none() || c.ret.is_some())
                    .map(|c| (callee.clone(), result.clone(), args.clone(), c)),
                _ => None,
            };
            let Some((callee_name, result, args, callee)) = site else {
                ii += 1;
                continue;
            };

            *counter += 1;
            let (body, ret) = callee.instantiate(&args, &format!(".i{counter}"));
            trace!(
                "inlining @{callee_name} into @{} ({} instructions)",
                function.name,
                body.len()
            );
            let len = body.len();
            function.blocks[bi].insts.splice(ii..=ii, body);
            if let (Some(result), Some(ret)) = (result, ret) {
                function.replace_all_uses(&result, &ret);
            }
            ii += len;
            changed = true;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{parse_module, verify_module};

    #[test]
    fn test_inlines_and_renames() {
        let mut module = parse_module(
            "define @sq(%x) {\nentry:\n  %y = mul %x, %x\n  ret %y\n}\n\
             define @main(%a) {\nentry:\n  %r = call @sq(%a)\n  %s = call @sq(%r)\n  ret %s\n}\n",
        )
        .unwrap();
        assert!(run(&mut module, 200));
        let main = module.function("main").unwrap();
        let printed: Vec<String> = main.blocks[0].insts.iter().map(|i| i.to_string()).collect();
        assert_eq!(printed, vec!["%y.i1 = mul %a, %a", "%y.i2 = mul %y.i1, %y.i1"]);
        assert_eq!(main.blocks[0].term.to_string(), "ret %y.i2");
        verify_module(&module).unwrap();
    }

    #[test]
    fn test_callee_returning_parameter() {
        let mut module = parse_module(
            "define @id(%x) {\nentry:\n  ret %x\n}\n\
             define @main(%a) {\nentry:\n  %r = call @id(%a)\n  ret %r\n}\n",
        )
        .unwrap();
        assert!(run(&mut module, 200));
        let main = module.function("main").unwrap();
        assert!(main.blocks[0].insts.is_empty());
        assert_eq!(main.blocks[0].term.to_string(), "ret %a");
    }

    #[test]
    fn test_skips_recursive_and_multi_block_and_large() {
        let mut module = parse_module(
            "define @rec(%x) {\nentry:\n  %y = call @rec(%x)\n  ret %y\n}\n\
             define @branchy(%x) {\nentry:\n  condbr %x, a, b\na:\n  ret %x\nb:\n  ret %x\n}\n\
             define @big(%x) {\nentry:\n  %a = add %x, %x\n  %b = add %a, %a\n  ret %b\n}\n\
             define @main(%a) {\nentry:\n  %r = call @rec(%a)\n  %s = call @branchy(%r)\n\
             %t = call @big(%s)\n  ret %t\n}\n",
        )
        .unwrap();
        assert!(!run(&mut module, 2));
        assert_eq!(module.function("main").unwrap().blocks[0].insts.len(), 3);
    }
}
