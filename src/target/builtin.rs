//! Targets registered by [`TargetRegistry::builtin`](super::TargetRegistry::builtin).
//!
//! x86-64 has a real code generator in [`crate::x64`]. The other targets only describe
//! their data layout; asking them for assembly or an object file fails.

use super::{CodeGenFileType, CodeGenOptLevel, Target, TargetMachine};
use crate::emit::EmitPasses;
use crate::error::CodegenInitError;
use crate::x64::X64TargetMachine;
use target_lexicon::{Architecture, BinaryFormat, Environment, Triple};

/// The x86-64 target.
#[derive(Debug, Clone, Copy, Default)]
pub struct X86_64Target;

impl Target for X86_64Target {
    fn name(&self) -> &'static str {
        "x86-64"
    }

    fn description(&self) -> &'static str {
        "64-bit x86 (ELF, Mach-O, COFF)"
    }

    fn supports(&self, arch: Architecture) -> bool {
        matches!(arch, Architecture::X86_64)
    }

    fn create_machine(
        &self,
        triple: &Triple,
        cpu: &str,
        features: &str,
        opt_level: CodeGenOptLevel,
    ) -> Result<Box<dyn TargetMachine>, String> {
        if triple.environment == Environment::Gnux32 {
            return Err("the ILP32 ABI (gnux32) is not supported".to_string());
        }
        let machine = X64TargetMachine::new(triple.clone(), cpu, features, opt_level)?;
        Ok(Box::new(machine))
    }
}

/// A target that knows its data layout but has no code generator.
#[derive(Debug, Clone, Copy)]
pub struct LayoutOnlyTarget {
    name: &'static str,
    description: &'static str,
    supports: fn(Architecture) -> bool,
    layout: fn(&Triple) -> &'static str,
}

impl LayoutOnlyTarget {
    pub fn aarch64() -> Self {
        Self {
            name: "aarch64",
            description: "64-bit ARM (layout only)",
            supports: |arch| matches!(arch, Architecture::Aarch64(_)),
            layout: |triple| match triple.binary_format {
                BinaryFormat::Macho => "e-m:o-i64:64-i128:128-n32:64-S128",
                BinaryFormat::Coff => {
                    "e-m:w-p270:32:32-p271:32:32-p272:64:64-i64:64-i128:128-n32:64-S128"
                }
                _ => "e-m:e-i8:8:32-i16:16:32-i64:64-i128:128-n32:64-S128",
            },
        }
    }

    pub fn riscv64() -> Self {
        Self {
            name: "riscv64",
            description: "64-bit RISC-V (layout only)",
            supports: |arch| matches!(arch, Architecture::Riscv64(_)),
            layout: |_| "e-m:e-p:64:64-i64:64-i128:128-n32:64-S128",
        }
    }

    pub fn wasm32() -> Self {
        Self {
            name: "wasm32",
            description: "32-bit WebAssembly (layout only)",
            supports: |arch| matches!(arch, Architecture::Wasm32),
            layout: |_| "e-m:e-p:32:32-p10:8:8-p20:8:8-i64:64-n32:64-S128-ni:1:10:20",
        }
    }
}

impl Target for LayoutOnlyTarget {
    fn name(&self) -> &'static str {
        self.name
    }

    fn description(&self) -> &'static str {
        self.description
    }

    fn supports(&self, arch: Architecture) -> bool {
        (self.supports)(arch)
    }

    fn create_machine(
        &self,
        triple: &Triple,
        cpu: &str,
        features: &str,
        opt_level: CodeGenOptLevel,
    ) -> Result<Box<dyn TargetMachine>, String> {
        Ok(Box::new(LayoutOnlyMachine {
            target: self.name,
            triple: triple.clone(),
            cpu: cpu.to_string(),
            features: features.to_string(),
            opt_level,
            layout: (self.layout)(triple),
        }))
    }
}

/// Machine for a [`LayoutOnlyTarget`]; every file emission request fails.
#[derive(Debug, Clone)]
pub struct LayoutOnlyMachine {
    target: &'static str,
    triple: Triple,
    cpu: String,
    features: String,
    opt_level: CodeGenOptLevel,
    layout: &'static str,
}

impl TargetMachine for LayoutOnlyMachine {
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
        self.layout
    }

    fn add_passes_to_emit_file(
        &self,
        _passes: &mut EmitPasses,
        file_type: CodeGenFileType,
        _disable_verify: bool,
    ) -> Result<(), CodegenInitError> {
        Err(CodegenInitError {
            target: self.target.to_string(),
            file_type: file_type.to_string(),
        })
    }
}
