// This module defines the in-memory intermediate representation the driver optimizes and
// emits. A Module owns globals, functions and module flags together with the target triple
// and the data-layout string copied from the resolved target machine. Functions hold basic
// blocks of straight-line instructions closed by a single terminator; a function without
// blocks is a declaration. All values are 64-bit words named by SSA value names. The two
// abstract reference-counting operations (rc.retain / rc.release) stay opaque until the
// expand pass lowers them to runtime calls. Submodules provide the textual printer and
// parser, the bitcode codec and the structural verifier.

//! Intermediate representation for one translation unit.
//!
//! ```text
//! target triple = "x86_64-unknown-linux-gnu"
//! target datalayout = "e-m:e-i64:64-n8:16:32:64-S128"
//!
//! global @counter = [0]
//! declare @puts(%s)
//!
//! define @main() {
//! entry:
//!   %a = const 40
//!   %b = const 2
//!   %c = add %a, %b
//!   ret %c
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

pub mod bitcode;
pub mod parser;
pub mod printer;
pub mod verifier;

pub use bitcode::{read_bitcode, write_bitcode, BitcodeError};
pub use parser::{parse_module, ParseError};
pub use verifier::{verify_module, VerifyError};

/// An SSA value name (printed as `%name`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Value(pub String);

impl Value {
    pub fn new(name: impl Into<String>) -> Self {
        Value(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Symbol visibility outside the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Linkage {
    #[default]
    External,
    Internal,
}

/// How conflicting module flags are merged when modules are linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlagBehavior {
    Error,
    Warning,
    Override,
}

impl FlagBehavior {
    pub fn keyword(self) -> &'static str {
        match self {
            FlagBehavior::Error => "error",
            FlagBehavior::Warning => "warning",
            FlagBehavior::Override => "override",
        }
    }

    pub fn from_keyword(s: &str) -> Option<Self> {
        match s {
            "error" => Some(FlagBehavior::Error),
            "warning" => Some(FlagBehavior::Warning),
            "override" => Some(FlagBehavior::Override),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleFlag {
    pub behavior: FlagBehavior,
    pub key: String,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Global {
    pub name: String,
    pub linkage: Linkage,
    pub constant: bool,
    /// Initializer, one 64-bit word per element.
    pub init: Vec<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    /// Produces 1 when equal, 0 otherwise.
    Eq,
    /// Signed less-than, producing 1 or 0.
    Lt,
}

impl BinaryOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Eq => "eq",
            BinaryOp::Lt => "lt",
        }
    }

    pub fn from_mnemonic(s: &str) -> Option<Self> {
        match s {
            "add" => Some(BinaryOp::Add),
            "sub" => Some(BinaryOp::Sub),
            "mul" => Some(BinaryOp::Mul),
            "eq" => Some(BinaryOp::Eq),
            "lt" => Some(BinaryOp::Lt),
            _ => None,
        }
    }

    /// Evaluate with wrapping 64-bit semantics.
    pub fn evaluate(self, lhs: i64, rhs: i64) -> i64 {
        match self {
            BinaryOp::Add => lhs.wrapping_add(rhs),
            BinaryOp::Sub => lhs.wrapping_sub(rhs),
            BinaryOp::Mul => lhs.wrapping_mul(rhs),
            BinaryOp::Eq => (lhs == rhs) as i64,
            BinaryOp::Lt => (lhs < rhs) as i64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    Const(i64),
    Binary(BinaryOp, Value, Value),
    Load(Value),
    Store { value: Value, ptr: Value },
    Call { callee: String, args: Vec<Value> },
    /// Address of a global or function symbol.
    Addr(String),
    /// Abstract strong retain of a reference-counted object.
    Retain(Value),
    /// Abstract strong release of a reference-counted object.
    Release(Value),
}

impl Op {
    /// Values read by this operation, in operand order.
    pub fn operands(&self) -> Vec<&Value> {
        match self {
            Op::Const(_) | Op::Addr(_) => Vec::new(),
            Op::Binary(_, a, b) => vec![a, b],
            Op::Load(p) | Op::Retain(p) | Op::Release(p) => vec![p],
            Op::Store { value, ptr } => vec![value, ptr],
            Op::Call { args, .. } => args.iter().collect(),
        }
    }

    pub fn operands_mut(&mut self) -> Vec<&mut Value> {
        match self {
            Op::Const(_) | Op::Addr(_) => Vec::new(),
            Op::Binary(_, a, b) => vec![a, b],
            Op::Load(p) | Op::Retain(p) | Op::Release(p) => vec![p],
            Op::Store { value, ptr } => vec![value, ptr],
            Op::Call { args, .. } => args.iter_mut().collect(),
        }
    }

    /// Whether deleting this operation (when its result is unused) is unobservable.
    pub fn is_pure(&self) -> bool {
        matches!(self, Op::Const(_) | Op::Binary(..) | Op::Load(_) | Op::Addr(_))
    }

    /// Whether this operation must define a result value.
    pub fn requires_result(&self) -> bool {
        matches!(self, Op::Const(_) | Op::Binary(..) | Op::Load(_) | Op::Addr(_))
    }

    /// Whether this operation may not carry a result value.
    pub fn forbids_result(&self) -> bool {
        matches!(self, Op::Store { .. } | Op::Retain(_) | Op::Release(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inst {
    pub result: Option<Value>,
    pub op: Op,
}

impl Inst {
    pub fn new(result: Option<Value>, op: Op) -> Self {
        Self { result, op }
    }

    /// An instruction producing `name`.
    pub fn def(name: impl Into<String>, op: Op) -> Self {
        Self {
            result: Some(Value::new(name)),
            op,
        }
    }

    /// An instruction with no result.
    pub fn effect(op: Op) -> Self {
        Self { result: None, op }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Terminator {
    Ret(Option<Value>),
    Br(String),
    CondBr {
        cond: Value,
        then_dest: String,
        else_dest: String,
    },
    Unreachable,
}

impl Terminator {
    pub fn successors(&self) -> Vec<&str> {
        match self {
            Terminator::Ret(_) | Terminator::Unreachable => Vec::new(),
            Terminator::Br(dest) => vec![dest.as_str()],
            Terminator::CondBr {
                then_dest,
                else_dest,
                ..
            } => vec![then_dest.as_str(), else_dest.as_str()],
        }
    }

    pub fn operands(&self) -> Vec<&Value> {
        match self {
            Terminator::Ret(Some(v)) => vec![v],
            Terminator::CondBr { cond, .. } => vec![cond],
            _ => Vec::new(),
        }
    }

    pub fn operands_mut(&mut self) -> Vec<&mut Value> {
        match self {
            Terminator::Ret(Some(v)) => vec![v],
            Terminator::CondBr { cond, .. } => vec![cond],
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub label: String,
    pub insts: Vec<Inst>,
    pub term: Terminator,
}

impl Block {
    pub fn new(label: impl Into<String>, insts: Vec<Inst>, term: Terminator) -> Self {
        Self {
            label: label.into(),
            insts,
            term,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub linkage: Linkage,
    pub params: Vec<Value>,
    pub blocks: Vec<Block>,
}

impl Function {
    /// A function definition.
    pub fn new(name: impl Into<String>, params: Vec<Value>, blocks: Vec<Block>) -> Self {
        Self {
            name: name.into(),
            linkage: Linkage::External,
            params,
            blocks,
        }
    }

    /// A function declaration (no body).
    pub fn declare(name: impl Into<String>, params: Vec<Value>) -> Self {
        Self::new(name, params, Vec::new())
    }

    pub fn with_linkage(mut self, linkage: Linkage) -> Self {
        self.linkage = linkage;
        self
    }

    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn block(&self, label: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.label == label)
    }

    pub fn block_index(&self, label: &str) -> Option<usize> {
        self.blocks.iter().position(|b| b.label == label)
    }

    pub fn inst_count(&self) -> usize {
        self.blocks.iter().map(|b| b.insts.len() + 1).sum()
    }

    /// Every value name used as an operand anywhere in the body.
    pub fn used_values(&self) -> HashSet<&str> {
        let mut used = HashSet::new();
        for block in &self.blocks {
            for inst in &block.insts {
                used.extend(inst.op.operands().into_iter().map(|v| v.name()));
            }
            used.extend(block.term.operands().into_iter().map(|v| v.name()));
        }
        used
    }

    /// Rewrite every use of `from` into a use of `to`.
    pub fn replace_all_uses(&mut self, from: &Value, to: &Value) {
        for block in &mut self.blocks {
            for inst in &mut block.insts {
                for operand in inst.op.operands_mut() {
                    if operand == from {
                        *operand = to.clone();
                    }
                }
            }
            for operand in block.term.operands_mut() {
                if operand == from {
                    *operand = to.clone();
                }
            }
        }
    }

    /// Names of the symbols (functions or globals) this body refers to.
    pub fn referenced_symbols(&self) -> Vec<&str> {
        let mut symbols = Vec::new();
        for block in &self.blocks {
            for inst in &block.insts {
                match &inst.op {
                    Op::Call { callee, .. } => symbols.push(callee.as_str()),
                    Op::Addr(sym) => symbols.push(sym.as_str()),
                    _ => {}
                }
            }
        }
        symbols
    }

    /// Number of predecessors of each block, indexed like `blocks`.
    pub fn predecessor_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.blocks.len()];
        for block in &self.blocks {
            for succ in block.term.successors() {
                if let Some(idx) = self.block_index(succ) {
                    counts[idx] += 1;
                }
            }
        }
        counts
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub target_triple: String,
    pub data_layout: String,
    pub flags: Vec<ModuleFlag>,
    pub globals: Vec<Global>,
    pub functions: Vec<Function>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.name == name)
    }

    pub fn global(&self, name: &str) -> Option<&Global> {
        self.globals.iter().find(|g| g.name == name)
    }

    pub fn defined_functions(&self) -> impl Iterator<Item = &Function> {
        self.functions.iter().filter(|f| !f.is_declaration())
    }

    pub fn add_flag(&mut self, behavior: FlagBehavior, key: impl Into<String>, value: i64) {
        let key = key.into();
        self.flags.retain(|flag| flag.key != key);
        self.flags.push(ModuleFlag {
            behavior,
            key,
            value,
        });
    }

    pub fn flag(&self, key: &str) -> Option<&ModuleFlag> {
        self.flags.iter().find(|flag| flag.key == key)
    }

    /// Add a declaration for `name` unless a function by that name exists.
    pub fn ensure_declared(&mut self, name: &str, arity: usize) {
        if self.function(name).is_none() {
            let params = (0..arity).map(|i| Value::new(format!("arg{i}"))).collect();
            self.functions.push(Function::declare(name, params));
        }
    }

    pub fn function_names(&self) -> Vec<&str> {
        self.functions.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn global_names(&self) -> Vec<&str> {
        self.globals.iter().map(|g| g.name.as_str()).collect()
    }
}
