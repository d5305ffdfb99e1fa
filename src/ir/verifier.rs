//! Structural verification of modules.
//!
//! Checks symbol uniqueness, branch targets, value definitions, callee existence and
//! arity, and result presence. Dominance is not checked; a use only has to name a value
//! defined somewhere in the same function.

use super::{Function, Module, Op};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyIssue {
    pub function: Option<String>,
    pub message: String,
}

impl std::fmt::Display for VerifyIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.function {
            Some(name) => write!(f, "in @{name}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

fn join_issues(issues: &[VerifyIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", join_issues(.issues))]
pub struct VerifyError {
    pub issues: Vec<VerifyIssue>,
}

impl VerifyError {
    fn from_issues(issues: Vec<VerifyIssue>) -> Result<(), VerifyError> {
        if issues.is_empty() {
            Ok(())
        } else {
            Err(VerifyError { issues })
        }
    }
}

pub fn verify_module(module: &Module) -> Result<(), VerifyError> {
    let mut issues = Vec::new();
    let mut symbols = HashSet::new();

    for name in module.function_names().into_iter().chain(module.global_names()) {
        if !symbols.insert(name) {
            issues.push(VerifyIssue {
                function: None,
                message: format!("symbol '@{name}' is defined more than once"),
            });
        }
    }

    for function in module.defined_functions() {
        check_function(module, function, &mut issues);
    }
    VerifyError::from_issues(issues)
}

fn check_function(module: &Module, function: &Function, issues: &mut Vec<VerifyIssue>) {
    let mut report = |message: String| {
        issues.push(VerifyIssue {
            function: Some(function.name.clone()),
            message,
        })
    };

    let mut labels = HashSet::new();
    for block in &function.blocks {
        if !labels.insert(block.label.as_str()) {
            report(format!("block '{}' is defined more than once", block.label));
        }
    }

    let mut defined = HashSet::new();
    for param in &function.params {
        if !defined.insert(param.name()) {
            report(format!("value {param} is defined more than once"));
        }
    }
    for block in &function.blocks {
        for inst in &block.insts {
            if let Some(result) = &inst.result {
                if !defined.insert(result.name()) {
                    report(format!("value {result} is defined more than once"));
                }
            }
        }
    }

    let entry = function.blocks.first().map(|b| b.label.as_str());
    for block in &function.blocks {
        for inst in &block.insts {
            if inst.op.requires_result() && inst.result.is_none() {
                report(format!("'{}' in block '{}' must define a value", inst.op, block.label));
            }
            if inst.op.forbids_result() && inst.result.is_some() {
                report(format!("'{}' in block '{}' cannot define a value", inst.op, block.label));
            }
            for operand in inst.op.operands() {
                if !defined.contains(operand.name()) {
                    report(format!("use of undefined value {operand} in block '{}'", block.label));
                }
            }
            match &inst.op {
                Op::Call { callee, args } => match module.function(callee) {
                    None => report(format!("call to undefined function @{callee}")),
                    Some(target) if target.params.len() != args.len() => report(format!(
                        "call to @{callee} passes {} arguments, expected {}",
                        args.len(),
                        target.params.len()
                    )),
                    Some(_) => {}
                },
                Op::Addr(symbol) => {
                    if module.function(symbol).is_none() && module.global(symbol).is_none() {
                        report(format!("address of undefined symbol @{symbol}"));
                    }
                }
                _ => {}
            }
        }

        for operand in block.term.operands() {
            if !defined.contains(operand.name()) {
                report(format!("use of undefined value {operand} in block '{}'", block.label));
            }
        }
        for succ in block.term.successors() {
            if !labels.contains(succ) {
                report(format!(
                    "block '{}' branches to undefined block '{succ}'",
                    block.label
                ));
            } else if Some(succ) == entry {
                report(format!("block '{}' branches to the entry block", block.label));
            }
        }
    }
}
