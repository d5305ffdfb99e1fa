//! Human-readable textual form of the IR.
//!
//! The output is accepted by [`parse_module`](super::parse_module); printing a parsed
//! module reproduces the same text.

use super::{Block, Function, Global, Inst, Linkage, Module, Op, Terminator};
use std::fmt::{self, Display, Formatter, Write};

fn write_quoted(f: &mut Formatter<'_>, s: &str) -> fmt::Result {
    f.write_char('"')?;
    for ch in s.chars() {
        match ch {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            _ => f.write_char(ch)?,
        }
    }
    f.write_char('"')
}

fn write_list<T: Display>(f: &mut Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl Display for Module {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if !self.name.is_empty() {
            f.write_str("source_filename = ")?;
            write_quoted(f, &self.name)?;
            f.write_char('\n')?;
        }
        if !self.target_triple.is_empty() {
            f.write_str("target triple = ")?;
            write_quoted(f, &self.target_triple)?;
            f.write_char('\n')?;
        }
        if !self.data_layout.is_empty() {
            f.write_str("target datalayout = ")?;
            write_quoted(f, &self.data_layout)?;
            f.write_char('\n')?;
        }
        for flag in &self.flags {
            write!(f, "!flag {} ", flag.behavior.keyword())?;
            write_quoted(f, &flag.key)?;
            writeln!(f, " = {}", flag.value)?;
        }

        if !self.globals.is_empty() {
            f.write_char('\n')?;
            for global in &self.globals {
                writeln!(f, "{global}")?;
            }
        }

        for function in &self.functions {
            f.write_char('\n')?;
            write!(f, "{function}")?;
        }
        Ok(())
    }
}

impl Display for Global {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("global ")?;
        if self.linkage == Linkage::Internal {
            f.write_str("internal ")?;
        }
        if self.constant {
            f.write_str("constant ")?;
        }
        write!(f, "@{} = [", self.name)?;
        write_list(f, &self.init)?;
        f.write_char(']')
    }
}

impl Display for Function {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(if self.is_declaration() { "declare " } else { "define " })?;
        if self.linkage == Linkage::Internal {
            f.write_str("internal ")?;
        }
        write!(f, "@{}(", self.name)?;
        write_list(f, &self.params)?;
        f.write_char(')')?;

        if self.is_declaration() {
            return f.write_char('\n');
        }

        f.write_str(" {\n")?;
        for block in &self.blocks {
            write!(f, "{block}")?;
        }
        f.write_str("}\n")
    }
}

impl Display for Block {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.label)?;
        for inst in &self.insts {
            writeln!(f, "  {inst}")?;
        }
        writeln!(f, "  {}", self.term)
    }
}

impl Display for Inst {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(result) = &self.result {
            write!(f, "{result} = ")?;
        }
        write!(f, "{}", self.op)
    }
}

impl Display for Op {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Op::Const(value) => write!(f, "const {value}"),
            Op::Binary(op, lhs, rhs) => write!(f, "{} {lhs}, {rhs}", op.mnemonic()),
            Op::Load(ptr) => write!(f, "load {ptr}"),
            Op::Store { value, ptr } => write!(f, "store {value}, {ptr}"),
            Op::Call { callee, args } => {
                write!(f, "call @{callee}(")?;
                write_list(f, args)?;
                f.write_char(')')
            }
            Op::Addr(symbol) => write!(f, "addr @{symbol}"),
            Op::Retain(obj) => write!(f, "rc.retain {obj}"),
            Op::Release(obj) => write!(f, "rc.release {obj}"),
        }
    }
}

impl Display for Terminator {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Terminator::Ret(None) => f.write_str("ret"),
            Terminator::Ret(Some(value)) => write!(f, "ret {value}"),
            Terminator::Br(dest) => write!(f, "br {dest}"),
            Terminator::CondBr {
                cond,
                then_dest,
                else_dest,
            } => write!(f, "condbr {cond}, {then_dest}, {else_dest}"),
            Terminator::Unreachable => f.write_str("unreachable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::{BinaryOp, FlagBehavior, Value};
    use super::*;

    #[test]
    fn test_print_function() {
        let f = Function::new(
            "inc",
            vec![Value::new("x")],
            vec![Block::new(
                "entry",
                vec![
                    Inst::def("one", Op::Const(1)),
                    Inst::def("y", Op::Binary(BinaryOp::Add, Value::new("x"), Value::new("one"))),
                    Inst::effect(Op::Retain(Value::new("x"))),
                ],
                Terminator::Ret(Some(Value::new("y"))),
            )],
        )
        .with_linkage(Linkage::Internal);

        let expected = "define internal @inc(%x) {\n\
                        entry:\n  %one = const 1\n  %y = add %x, %one\n  rc.retain %x\n  ret %y\n}\n";
        assert_eq!(f.to_string(), expected);
    }

    #[test]
    fn test_print_module_header() {
        let mut m = Module::new("unit");
        m.target_triple = "x86_64-unknown-linux-gnu".into();
        m.data_layout = "e-m:e".into();
        m.add_flag(FlagBehavior::Warning, "Dwarf Version", 3);
        m.functions.push(Function::declare("ext", vec![Value::new("a")]));

        let text = m.to_string();
        assert!(text.starts_with("source_filename = \"unit\"\n"));
        assert!(text.contains("target triple = \"x86_64-unknown-linux-gnu\"\n"));
        assert!(text.contains("target datalayout = \"e-m:e\"\n"));
        assert!(text.contains("!flag warning \"Dwarf Version\" = 3\n"));
        assert!(text.contains("declare @ext(%a)\n"));
    }
}
