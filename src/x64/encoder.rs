// This module wraps the iced-x86 CodeAssembler for the stack-slot code generator. Every IR
// value lives in an 8-byte slot addressed relative to RBP, so the encoder only needs a
// handful of shapes: load a slot into a register, store a register into a slot, apply a
// binary operation with a slot operand, and move through a pointer held in RAX. Block
// labels are created lazily by name so forward branches work. Direct calls and RIP-relative
// symbol addresses are emitted as raw bytes with a zero 32-bit field; the encoder tracks
// them by instruction index and, once the block encoder has laid out the final code,
// turns them into relocations at the exact byte offset of that field.

//! x86-64 instruction encoding using iced-x86.

use crate::emit::{RelocKind, Relocation};
use crate::ir::BinaryOp;
use iced_x86::code_asm::*;
use iced_x86::{BlockEncoderOptions, IcedError};
use std::collections::HashMap;

/// Error types for instruction encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    /// Assembly error from iced-x86.
    AssemblyError(String),
    /// An instruction index the block encoder did not report an offset for.
    MissingOffset(usize),
}

impl std::fmt::Display for EncodingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncodingError::AssemblyError(msg) => write!(f, "Assembly error: {msg}"),
            EncodingError::MissingOffset(idx) => {
                write!(f, "No encoded offset for instruction {idx}")
            }
        }
    }
}

impl std::error::Error for EncodingError {}

impl From<IcedError> for EncodingError {
    fn from(err: IcedError) -> Self {
        EncodingError::AssemblyError(err.to_string())
    }
}

/// `call rel32` with a zero displacement.
const CALL_REL32: [u8; 5] = [0xE8, 0, 0, 0, 0];
/// `lea rax, [rip + disp32]` with a zero displacement.
const LEA_RAX_RIP: [u8; 7] = [0x48, 0x8D, 0x05, 0, 0, 0, 0];

struct PendingRelocation {
    instruction: usize,
    field: u64,
    symbol: String,
    kind: RelocKind,
}

/// x86-64 instruction encoder for one function.
pub struct X64Encoder {
    assembler: CodeAssembler,
    block_labels: HashMap<String, CodeLabel>,
    relocations: Vec<PendingRelocation>,
}

impl X64Encoder {
    pub fn new() -> Result<Self, EncodingError> {
        Ok(Self {
            assembler: CodeAssembler::new(64)?,
            block_labels: HashMap::new(),
            relocations: Vec::new(),
        })
    }

    fn slot(offset: i32) -> AsmMemoryOperand {
        qword_ptr(rbp + offset)
    }

    /// push rbp; mov rbp, rsp; sub rsp, frame_size
    pub fn emit_prologue(&mut self, frame_size: i32) -> Result<(), EncodingError> {
        self.assembler.push(rbp)?;
        self.assembler.mov(rbp, rsp)?;
        if frame_size > 0 {
            self.assembler.sub(rsp, frame_size)?;
        }
        Ok(())
    }

    /// mov rsp, rbp; pop rbp; ret
    pub fn emit_epilogue(&mut self) -> Result<(), EncodingError> {
        self.assembler.mov(rsp, rbp)?;
        self.assembler.pop(rbp)?;
        self.assembler.ret()?;
        Ok(())
    }

    pub fn load_slot(&mut self, dst: AsmRegister64, offset: i32) -> Result<(), EncodingError> {
        self.assembler.mov(dst, Self::slot(offset))?;
        Ok(())
    }

    pub fn store_slot(&mut self, offset: i32, src: AsmRegister64) -> Result<(), EncodingError> {
        self.assembler.mov(Self::slot(offset), src)?;
        Ok(())
    }

    pub fn mov_imm(&mut self, dst: AsmRegister64, imm: i64) -> Result<(), EncodingError> {
        self.assembler.mov(dst, imm)?;
        Ok(())
    }

    /// rax = rax <op> [slot]
    pub fn binary_rax(&mut self, op: BinaryOp, rhs: i32) -> Result<(), EncodingError> {
        let mem = Self::slot(rhs);
        match op {
            BinaryOp::Add => self.assembler.add(rax, mem)?,
            BinaryOp::Sub => self.assembler.sub(rax, mem)?,
            BinaryOp::Mul => self.assembler.imul_2(rax, mem)?,
            BinaryOp::Eq | BinaryOp::Lt => {
                self.assembler.cmp(rax, mem)?;
                if op == BinaryOp::Eq {
                    self.assembler.sete(al)?;
                } else {
                    self.assembler.setl(al)?;
                }
                self.assembler.movzx(rax, al)?;
            }
        }
        Ok(())
    }

    /// rax = [rax]
    pub fn load_through_rax(&mut self) -> Result<(), EncodingError> {
        self.assembler.mov(rax, qword_ptr(rax + 0))?;
        Ok(())
    }

    /// [rax] = rcx
    pub fn store_rcx_through_rax(&mut self) -> Result<(), EncodingError> {
        self.assembler.mov(qword_ptr(rax + 0), rcx)?;
        Ok(())
    }

    fn emit_with_relocation(
        &mut self,
        bytes: &[u8],
        field: u64,
        symbol: &str,
        kind: RelocKind,
    ) -> Result<(), EncodingError> {
        let instruction = self.assembler.instructions().len();
        self.assembler.db(bytes)?;
        self.relocations.push(PendingRelocation {
            instruction,
            field,
            symbol: symbol.to_string(),
            kind,
        });
        Ok(())
    }

    /// Direct call to a symbol resolved at link time.
    pub fn call_symbol(&mut self, symbol: &str) -> Result<(), EncodingError> {
        self.emit_with_relocation(&CALL_REL32, 1, symbol, RelocKind::Call)
    }

    /// rax = address of `symbol`
    pub fn lea_symbol(&mut self, symbol: &str) -> Result<(), EncodingError> {
        self.emit_with_relocation(&LEA_RAX_RIP, 3, symbol, RelocKind::PcRel32)
    }

    fn label_for_block(&mut self, block: &str) -> CodeLabel {
        if let Some(&label) = self.block_labels.get(block) {
            label
        } else {
            let label = self.assembler.create_label();
            self.block_labels.insert(block.to_string(), label);
            label
        }
    }

    /// Place the label of `block` at the current position.
    pub fn place_block(&mut self, block: &str) -> Result<(), EncodingError> {
        let mut label = self.label_for_block(block);
        self.assembler.set_label(&mut label)?;
        Ok(())
    }

    pub fn jmp_to_block(&mut self, block: &str) -> Result<(), EncodingError> {
        let label = self.label_for_block(block);
        self.assembler.jmp(label)?;
        Ok(())
    }

    /// Jump to `block` when RAX is non-zero.
    pub fn jnz_rax_to_block(&mut self, block: &str) -> Result<(), EncodingError> {
        let label = self.label_for_block(block);
        self.assembler.test(rax, rax)?;
        self.assembler.jne(label)?;
        Ok(())
    }

    pub fn trap(&mut self) -> Result<(), EncodingError> {
        self.assembler.ud2()?;
        Ok(())
    }

    /// Assemble at address 0 and resolve relocation offsets.
    pub fn finalize(mut self) -> Result<(Vec<u8>, Vec<Relocation>), EncodingError> {
        let result = self
            .assembler
            .assemble_options(0, BlockEncoderOptions::RETURN_NEW_INSTRUCTION_OFFSETS)?;
        let offsets = &result.inner.new_instruction_offsets;

        let relocations = self
            .relocations
            .into_iter()
            .map(|pending| {
                let start = offsets
                    .get(pending.instruction)
                    .copied()
                    .filter(|&o| o != u32::MAX)
                    .ok_or(EncodingError::MissingOffset(pending.instruction))?;
                Ok(Relocation {
                    offset: u64::from(start) + pending.field,
                    symbol: pending.symbol,
                    kind: pending.kind,
                    addend: -4,
                })
            })
            .collect::<Result<Vec<_>, EncodingError>>()?;

        Ok((result.inner.code_buffer, relocations))
    }
}
