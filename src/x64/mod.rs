//! x86-64 code generation.
//!
//! [`X64TargetMachine`] schedules three emission passes: an optional structural
//! verifier, instruction selection ([`isel`]) and the final printer ([`printer`]), which
//! writes GAS assembly or a relocatable object in the triple's object format.

pub mod encoder;
pub mod isel;
pub mod printer;

pub use encoder::{EncodingError, X64Encoder};
pub use isel::{select_function, InstructionSelectionPass};
pub use printer::AsmPrinterPass;

use crate::emit::{EmitPasses, VerifyModulePass};
use crate::error::CodegenInitError;
use crate::target::{CodeGenFileType, CodeGenOptLevel, TargetMachine};
use iced_x86::code_asm::*;
use target_lexicon::{BinaryFormat, Triple};

/// Object file format of an x86-64 triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectFormat {
    Elf,
    MachO,
    Coff,
}

impl ObjectFormat {
    pub fn from_triple(triple: &Triple) -> Option<Self> {
        match triple.binary_format {
            BinaryFormat::Elf => Some(ObjectFormat::Elf),
            BinaryFormat::Macho => Some(ObjectFormat::MachO),
            BinaryFormat::Coff => Some(ObjectFormat::Coff),
            _ => None,
        }
    }

    pub fn data_layout(self) -> &'static str {
        match self {
            ObjectFormat::Elf => {
                "e-m:e-p270:32:32-p271:32:32-p272:64:64-i64:64-i128:128-f80:128-n8:16:32:64-S128"
            }
            ObjectFormat::MachO => {
                "e-m:o-p270:32:32-p271:32:32-p272:64:64-i64:64-i128:128-f80:128-n8:16:32:64-S128"
            }
            ObjectFormat::Coff => {
                "e-m:w-p270:32:32-p271:32:32-p272:64:64-i64:64-i128:128-f80:128-n8:16:32:64-S128"
            }
        }
    }

    /// Prefix the assembler expects on C-level symbol names.
    pub fn symbol_prefix(self) -> &'static str {
        match self {
            ObjectFormat::MachO => "_",
            ObjectFormat::Elf | ObjectFormat::Coff => "",
        }
    }

    pub fn calling_convention(self) -> CallingConvention {
        match self {
            ObjectFormat::Coff => CallingConvention::WIN64,
            ObjectFormat::Elf | ObjectFormat::MachO => CallingConvention::SYSV,
        }
    }
}

/// Integer argument registers and the caller-reserved stack area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallingConvention {
    pub arg_regs: &'static [AsmRegister64],
    /// Bytes the caller reserves below the return address for the callee.
    pub shadow_space: i32,
}

impl CallingConvention {
    pub const SYSV: CallingConvention = CallingConvention {
        arg_regs: &[rdi, rsi, rdx, rcx, r8, r9],
        shadow_space: 0,
    };

    pub const WIN64: CallingConvention = CallingConvention {
        arg_regs: &[rcx, rdx, r8, r9],
        shadow_space: 32,
    };
}

/// Target machine of the x86-64 code generator.
#[derive(Debug, Clone)]
pub struct X64TargetMachine {
    triple: Triple,
    cpu: String,
    features: String,
    opt_level: CodeGenOptLevel,
    format: ObjectFormat,
}

impl X64TargetMachine {
    /// Fails when the triple's object format is not ELF, Mach-O or COFF.
    pub fn new(
        triple: Triple,
        cpu: &str,
        features: &str,
        opt_level: CodeGenOptLevel,
    ) -> Result<Self, String> {
        let format = ObjectFormat::from_triple(&triple)
            .ok_or_else(|| format!("object format '{}' is not supported", triple.binary_format))?;
        Ok(Self {
            triple,
            cpu: cpu.to_string(),
            features: features.to_string(),
            opt_level,
            format,
        })
    }

    pub fn object_format(&self) -> ObjectFormat {
        self.format
    }
}

impl TargetMachine for X64TargetMachine {
    fn triple(&self) -> &Triple {
        &self.triple
    }

    fn cpu(&self) -> &str {
        &self.cpu
    }

    fn features(&self) -> &str {
        &self.features
    }

    fn opt_level(&self) -> CodeGenOptLevel {
        self.opt_level
    }

    fn data_layout(&self) -> &str {
        self.format.data_layout()
    }

    fn add_passes_to_emit_file(
        &self,
        passes: &mut EmitPasses,
        file_type: CodeGenFileType,
        disable_verify: bool,
    ) -> Result<(), CodegenInitError> {
        if !disable_verify {
            passes.add(Box::new(VerifyModulePass));
        }
        passes.add(Box::new(InstructionSelectionPass::new(
            self.format.calling_convention(),
        )));
        passes.add(Box::new(AsmPrinterPass::new(file_type, self.format)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn machine(triple: &str) -> X64TargetMachine {
        X64TargetMachine::new(
            Triple::from_str(triple).unwrap(),
            "generic",
            "",
            CodeGenOptLevel::Default,
        )
        .unwrap()
    }

    #[test]
    fn test_pass_schedule() {
        let m = machine("x86_64-unknown-linux-gnu");
        let mut passes = EmitPasses::new();
        m.add_passes_to_emit_file(&mut passes, CodeGenFileType::ObjectFile, false)
            .unwrap();
        assert_eq!(
            passes.names(),
            vec!["verify", "x86-64-isel", "x86-64-asm-printer"]
        );

        let mut passes = EmitPasses::new();
        m.add_passes_to_emit_file(&mut passes, CodeGenFileType::AssemblyFile, true)
            .unwrap();
        assert_eq!(passes.names(), vec!["x86-64-isel", "x86-64-asm-printer"]);
    }

    #[test]
    fn test_format_from_triple() {
        assert_eq!(machine("x86_64-apple-darwin").object_format(), ObjectFormat::MachO);
        assert_eq!(
            machine("x86_64-pc-windows-msvc").object_format(),
            ObjectFormat::Coff
        );
        assert_eq!(
            ObjectFormat::Coff.calling_convention().arg_regs.len(),
            4
        );
    }
}
