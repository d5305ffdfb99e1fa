// Instruction selection for the x86-64 code generator. Every parameter and every
// instruction result gets its own 8-byte stack slot below RBP; the prologue spills the
// incoming argument registers into the parameter slots and each instruction loads its
// operands from slots into RAX/RCX (or the argument registers for calls), computes, and
// stores the result back. Blocks are emitted in module order, each starting with its
// label, and every branch is explicit. Abstract retain/release operations that were not
// expanded by the optimizer are lowered here to calls into the reference-counting runtime.

//! Stack-slot instruction selection.

use super::encoder::{EncodingError, X64Encoder};
use super::CallingConvention;
use crate::emit::{EmitContext, EmitPass, MachineFunction};
use crate::error::{EmitError, EmitResult};
use crate::ir::{Function, Op, Terminator, Value};
use crate::passes::rc_expand::runtime_call;
use iced_x86::code_asm::*;
use log::trace;
use std::collections::HashMap;

/// Emission pass producing a [`MachineFunction`] for every defined function.
#[derive(Debug, Clone, Copy)]
pub struct InstructionSelectionPass {
    conv: CallingConvention,
}

impl InstructionSelectionPass {
    pub fn new(conv: CallingConvention) -> Self {
        Self { conv }
    }
}

impl EmitPass for InstructionSelectionPass {
    fn name(&self) -> &'static str {
        "x86-64-isel"
    }

    fn run(&mut self, ctx: &mut EmitContext<'_>) -> EmitResult<()> {
        for function in ctx.module.defined_functions() {
            let mf = select_function(function, self.conv)?;
            trace!(
                "selected @{}: {} bytes, {} relocations",
                mf.name,
                mf.code.len(),
                mf.relocations.len()
            );
            ctx.functions.push(mf);
        }
        Ok(())
    }
}

struct FrameLayout<'f> {
    slots: HashMap<&'f str, i32>,
    size: i32,
}

impl<'f> FrameLayout<'f> {
    fn new(function: &'f Function, conv: CallingConvention) -> Self {
        let names = function.params.iter().map(Value::name).chain(
            function
                .blocks
                .iter()
                .flat_map(|b| &b.insts)
                .filter_map(|i| i.result.as_ref().map(Value::name)),
        );
        let mut slots = HashMap::new();
        for name in names {
            let next = -8 * (slots.len() as i32 + 1);
            slots.entry(name).or_insert(next);
        }
        let locals = 8 * slots.len() as i32;
        let size = (locals + 15) / 16 * 16 + conv.shadow_space;
        Self { slots, size }
    }
}

struct Selector<'f> {
    function: &'f Function,
    conv: CallingConvention,
    frame: FrameLayout<'f>,
    enc: X64Encoder,
}

impl<'f> Selector<'f> {
    fn error(&self, reason: impl Into<String>) -> EmitError {
        EmitError::Codegen {
            function: self.function.name.clone(),
            reason: reason.into(),
        }
    }

    fn encoding(&self, err: EncodingError) -> EmitError {
        self.error(err.to_string())
    }

    fn slot(&self, value: &Value) -> EmitResult<i32> {
        self.frame
            .slots
            .get(value.name())
            .copied()
            .ok_or_else(|| self.error(format!("use of undefined value {value}")))
    }

    fn load(&mut self, reg: AsmRegister64, value: &Value) -> EmitResult<()> {
        let slot = self.slot(value)?;
        self.enc.load_slot(reg, slot).map_err(|e| self.encoding(e))
    }

    fn store_rax(&mut self, result: Option<&Value>) -> EmitResult<()> {
        if let Some(result) = result {
            let slot = self.slot(result)?;
            self.enc.store_slot(slot, rax).map_err(|e| self.encoding(e))?;
        }
        Ok(())
    }

    fn prologue(&mut self) -> EmitResult<()> {
        if self.function.params.len() > self.conv.arg_regs.len() {
            return Err(self.error(format!(
                "{} parameters; at most {} are supported",
                self.function.params.len(),
                self.conv.arg_regs.len()
            )));
        }
        self.enc
            .emit_prologue(self.frame.size)
            .map_err(|e| self.encoding(e))?;
        for (param, &reg) in self.function.params.iter().zip(self.conv.arg_regs) {
            let slot = self.slot(param)?;
            self.enc.store_slot(slot, reg).map_err(|e| self.encoding(e))?;
        }
        Ok(())
    }

    fn call(&mut self, callee: &str, args: &[Value], result: Option<&Value>) -> EmitResult<()> {
        if args.len() > self.conv.arg_regs.len() {
            return Err(self.error(format!(
                "call to @{callee} passes {} arguments; at most {} are supported",
                args.len(),
                self.conv.arg_regs.len()
            )));
        }
        for (arg, &reg) in args.iter().zip(self.conv.arg_regs) {
            self.load(reg, arg)?;
        }
        self.enc.call_symbol(callee).map_err(|e| self.encoding(e))?;
        self.store_rax(result)
    }

    fn select_op(&mut self, op: &Op, result: Option<&Value>) -> EmitResult<()> {
        match op {
            Op::Const(value) => {
                self.enc.mov_imm(rax, *value).map_err(|e| self.encoding(e))?;
                self.store_rax(result)
            }
            Op::Binary(bin, lhs, rhs) => {
                self.load(rax, lhs)?;
                let rhs = self.slot(rhs)?;
                self.enc.binary_rax(*bin, rhs).map_err(|e| self.encoding(e))?;
                self.store_rax(result)
            }
            Op::Load(ptr) => {
                self.load(rax, ptr)?;
                self.enc.load_through_rax().map_err(|e| self.encoding(e))?;
                self.store_rax(result)
            }
            Op::Store { value, ptr } => {
                self.load(rax, ptr)?;
                self.load(rcx, value)?;
                self.enc
                    .store_rcx_through_rax()
                    .map_err(|e| self.encoding(e))
            }
            Op::Call { callee, args } => self.call(callee, args, result),
            Op::Addr(symbol) => {
                self.enc.lea_symbol(symbol).map_err(|e| self.encoding(e))?;
                self.store_rax(result)
            }
            Op::Retain(_) | Op::Release(_) => match runtime_call(op) {
                Some(Op::Call { callee, args }) => self.call(&callee, &args, None),
                _ => Err(self.error("cannot lower reference-counting operation")),
            },
        }
    }

    fn select_terminator(&mut self, term: &Terminator) -> EmitResult<()> {
        match term {
            Terminator::Ret(value) => {
                if let Some(value) = value {
                    self.load(rax, value)?;
                }
                self.enc.emit_epilogue().map_err(|e| self.encoding(e))
            }
            Terminator::Br(dest) => self.enc.jmp_to_block(dest).map_err(|e| self.encoding(e)),
            Terminator::CondBr {
                cond,
                then_dest,
                else_dest,
            } => {
                self.load(rax, cond)?;
                self.enc
                    .jnz_rax_to_block(then_dest)
                    .map_err(|e| self.encoding(e))?;
                self.enc
                    .jmp_to_block(else_dest)
                    .map_err(|e| self.encoding(e))
            }
            Terminator::Unreachable => self.enc.trap().map_err(|e| self.encoding(e)),
        }
    }
}

/// Generate machine code for one defined function.
pub fn select_function(function: &Function, conv: CallingConvention) -> EmitResult<MachineFunction> {
    let enc = X64Encoder::new().map_err(|e| EmitError::Codegen {
        function: function.name.clone(),
        reason: e.to_string(),
    })?;
    let mut sel = Selector {
        function,
        conv,
        frame: FrameLayout::new(function, conv),
        enc,
    };

    sel.prologue()?;
    for block in &function.blocks {
        sel.enc
            .place_block(&block.label)
            .map_err(|e| sel.encoding(e))?;
        for inst in &block.insts {
            sel.select_op(&inst.op, inst.result.as_ref())?;
        }
        sel.select_terminator(&block.term)?;
    }

    let (code, relocations) = sel.enc.finalize().map_err(|e| EmitError::Codegen {
        function: function.name.clone(),
        reason: e.to_string(),
    })?;
    Ok(MachineFunction {
        name: function.name.clone(),
        linkage: function.linkage,
        code,
        relocations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::{OutputSink, RelocKind};
    use crate::ir::parse_module;

    fn select(text: &str, name: &str) -> EmitResult<MachineFunction> {
        let module = parse_module(text).unwrap();
        select_function(module.function(name).unwrap(), CallingConvention::SYSV)
    }

    #[test]
    fn test_leaf_function() {
        let mf = select(
            "define @answer() {\nentry:\n  %a = const 40\n  %b = const 2\n  %c = add %a, %b\n  ret %c\n}\n",
            "answer",
        )
        .unwrap();
        assert_eq!(mf.code[0], 0x55);
        assert_eq!(*mf.code.last().unwrap(), 0xC3);
        assert!(mf.relocations.is_empty());
    }

    #[test]
    fn test_calls_and_rc_ops_relocate() {
        let mf = select(
            "declare @puts(%s)\nglobal @msg = [0]\n\
             define @main(%o) {\nentry:\n  %p = addr @msg\n  call @puts(%p)\n  rc.retain %o\n  ret\n}\n",
            "main",
        )
        .unwrap();
        let targets: Vec<(&str, RelocKind)> = mf
            .relocations
            .iter()
            .map(|r| (r.symbol.as_str(), r.kind))
            .collect();
        assert_eq!(
            targets,
            vec![
                ("msg", RelocKind::PcRel32),
                ("puts", RelocKind::Call),
                ("__rc_retain", RelocKind::Call)
            ]
        );
        for reloc in &mf.relocations {
            let opcode_at = reloc.offset as usize - if reloc.kind == RelocKind::Call { 1 } else { 3 };
            let expected = if reloc.kind == RelocKind::Call { 0xE8 } else { 0x48 };
            assert_eq!(mf.code[opcode_at], expected);
        }
    }

    #[test]
    fn test_too_many_arguments() {
        let err = select(
            "declare @many(%a, %b, %c, %d, %e, %f, %g)\n\
             define @main(%x) {\nentry:\n  call @many(%x, %x, %x, %x, %x, %x, %x)\n  ret\n}\n",
            "main",
        )
        .unwrap_err();
        assert!(err.to_string().contains("7 arguments"), "{err}");
    }

    #[test]
    fn test_branches() {
        let mf = select(
            "define @pick(%c, %x) {\nentry:\n  condbr %c, yes, no\nyes:\n  ret %x\nno:\n  unreachable\n}\n",
            "pick",
        )
        .unwrap();
        // ud2 closes the last block
        assert_eq!(&mf.code[mf.code.len() - 2..], &[0x0F, 0x0B]);
    }

    #[test]
    fn test_frame_alignment() {
        let module = parse_module("define @f(%a, %b, %c) {\nentry:\n  ret %a\n}\n").unwrap();
        let frame = FrameLayout::new(&module.functions[0], CallingConvention::SYSV);
        assert_eq!(frame.size, 32);
        assert_eq!(frame.slots["c"], -24);
        let frame = FrameLayout::new(&module.functions[0], CallingConvention::WIN64);
        assert_eq!(frame.size, 64);
    }

    #[test]
    fn test_pass_selects_defined_functions_in_order() {
        let module = parse_module(
            "declare @ext(%v)\n\
             define @first() {\nentry:\n  ret\n}\n\
             define @second(%x) {\nentry:\n  call @ext(%x)\n  ret %x\n}\n",
        )
        .unwrap();
        let mut sink = OutputSink::Null;
        let mut ctx = EmitContext::new(&module, &mut sink);
        let mut pass = InstructionSelectionPass::new(CallingConvention::SYSV);
        pass.run(&mut ctx).unwrap();

        let names: Vec<&str> = ctx.functions.iter().map(|mf| mf.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert_eq!(ctx.functions[1].relocations.len(), 1);
    }
}
