// This module resolves target-triple strings into target machines. A TargetRegistry holds
// the known Target implementations; lookup parses the triple with target-lexicon and picks
// the first target that claims its architecture, yielding a TargetDescriptor. The
// descriptor creates a boxed TargetMachine for a CPU name, feature string and code
// generation level. A TargetMachine owns the data-layout string copied onto modules and
// schedules the passes that turn an optimized module into an assembly or object file. The
// built-in registry carries the x86-64 code generator plus layout-only targets that can
// describe a module but cannot emit files for it.

//! Target resolution and the target machine abstraction.

use crate::emit::EmitPasses;
use crate::error::{CodegenInitError, TargetError};
use crate::options::OptLevel;
use log::debug;
use std::fmt;
use std::str::FromStr;
use target_lexicon::{Architecture, Triple};

pub mod builtin;

pub use builtin::{LayoutOnlyTarget, X86_64Target};

/// CPU name passed to machine creation.
pub const DEFAULT_CPU: &str = "generic";

/// Feature string passed to machine creation.
pub const DEFAULT_FEATURES: &str = "";

/// Backend code generation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CodeGenOptLevel {
    None,
    Less,
    Default,
    Aggressive,
}

impl From<OptLevel> for CodeGenOptLevel {
    fn from(level: OptLevel) -> Self {
        match level.as_u8() {
            0 => CodeGenOptLevel::None,
            1 => CodeGenOptLevel::Less,
            2 => CodeGenOptLevel::Default,
            _ => CodeGenOptLevel::Aggressive,
        }
    }
}

/// Kind of file a target machine is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodeGenFileType {
    AssemblyFile,
    ObjectFile,
}

impl fmt::Display for CodeGenFileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CodeGenFileType::AssemblyFile => "assembly",
            CodeGenFileType::ObjectFile => "object",
        })
    }
}

/// A backend handle for one triple, CPU, feature set and code generation level.
pub trait TargetMachine {
    fn triple(&self) -> &Triple;

    fn cpu(&self) -> &str;

    fn features(&self) -> &str;

    fn opt_level(&self) -> CodeGenOptLevel;

    /// Data-layout descriptor copied verbatim onto modules compiled for this machine.
    fn data_layout(&self) -> &str;

    /// Append the passes that emit `file_type` for a module.
    ///
    /// Scheduled passes are not run here. With `disable_verify` unset the machine
    /// verifies the module before selecting instructions.
    fn add_passes_to_emit_file(
        &self,
        passes: &mut EmitPasses,
        file_type: CodeGenFileType,
        disable_verify: bool,
    ) -> Result<(), CodegenInitError>;
}

/// A backend that can build machines for some architectures.
pub trait Target: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn supports(&self, arch: Architecture) -> bool;

    /// Build a machine, or explain why this triple cannot be lowered.
    fn create_machine(
        &self,
        triple: &Triple,
        cpu: &str,
        features: &str,
        opt_level: CodeGenOptLevel,
    ) -> Result<Box<dyn TargetMachine>, String>;
}

/// Result of a successful lookup: a target plus the parsed triple it was picked for.
pub struct TargetDescriptor<'r> {
    target: &'r dyn Target,
    triple: Triple,
}

impl<'r> TargetDescriptor<'r> {
    pub fn target(&self) -> &'r dyn Target {
        self.target
    }

    pub fn triple(&self) -> &Triple {
        &self.triple
    }

    pub fn create_machine(
        &self,
        cpu: &str,
        features: &str,
        opt_level: CodeGenOptLevel,
    ) -> Result<Box<dyn TargetMachine>, TargetError> {
        debug!(
            "creating {} machine for {} (cpu={cpu}, level={opt_level:?})",
            self.target.name(),
            self.triple
        );
        self.target
            .create_machine(&self.triple, cpu, features, opt_level)
            .map_err(|reason| TargetError::MachineCreation {
                target: self.target.name().to_string(),
                triple: self.triple.to_string(),
                reason,
            })
    }
}

impl fmt::Debug for TargetDescriptor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetDescriptor")
            .field("target", &self.target.name())
            .field("triple", &self.triple.to_string())
            .finish()
    }
}

/// The set of targets a driver can resolve triples against.
#[derive(Default)]
pub struct TargetRegistry {
    targets: Vec<Box<dyn Target>>,
}

impl TargetRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every target this crate ships.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(X86_64Target));
        registry.register(Box::new(LayoutOnlyTarget::aarch64()));
        registry.register(Box::new(LayoutOnlyTarget::riscv64()));
        registry.register(Box::new(LayoutOnlyTarget::wasm32()));
        registry
    }

    pub fn register(&mut self, target: Box<dyn Target>) {
        self.targets.push(target);
    }

    pub fn targets(&self) -> impl Iterator<Item = &dyn Target> {
        self.targets.iter().map(|t| t.as_ref())
    }

    pub fn lookup(&self, triple: &str) -> Result<TargetDescriptor<'_>, TargetError> {
        let parsed = Triple::from_str(triple).map_err(|e| TargetError::UnknownTarget {
            triple: triple.to_string(),
            reason: e.to_string(),
        })?;

        let target = self
            .targets
            .iter()
            .find(|t| t.supports(parsed.architecture))
            .ok_or_else(|| TargetError::UnknownTarget {
                triple: triple.to_string(),
                reason: format!(
                    "no registered target supports architecture '{}'",
                    parsed.architecture
                ),
            })?;

        Ok(TargetDescriptor {
            target: target.as_ref(),
            triple: parsed,
        })
    }

    /// Look up `triple` and create a machine with the default CPU and features.
    pub fn create_machine(
        &self,
        triple: &str,
        opt_level: OptLevel,
    ) -> Result<Box<dyn TargetMachine>, TargetError> {
        self.lookup(triple)?
            .create_machine(DEFAULT_CPU, DEFAULT_FEATURES, opt_level.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opt_level_mapping() {
        assert_eq!(CodeGenOptLevel::from(OptLevel::O0), CodeGenOptLevel::None);
        assert_eq!(CodeGenOptLevel::from(OptLevel::O1), CodeGenOptLevel::Less);
        assert_eq!(CodeGenOptLevel::from(OptLevel::O2), CodeGenOptLevel::Default);
        assert_eq!(CodeGenOptLevel::from(OptLevel::O3), CodeGenOptLevel::Aggressive);
    }

    #[test]
    fn test_lookup_x86_64() {
        let registry = TargetRegistry::builtin();
        let desc = registry.lookup("x86_64-unknown-linux-gnu").unwrap();
        assert_eq!(desc.target().name(), "x86-64");
        let machine = desc
            .create_machine(DEFAULT_CPU, DEFAULT_FEATURES, CodeGenOptLevel::Default)
            .unwrap();
        assert_eq!(machine.cpu(), "generic");
        assert_eq!(machine.features(), "");
        assert!(machine.data_layout().starts_with("e-m:e-"));
    }

    #[test]
    fn test_unparseable_triple() {
        let registry = TargetRegistry::builtin();
        let err = registry.lookup("not-a-real-triple-at-all").unwrap_err();
        assert!(matches!(err, TargetError::UnknownTarget { .. }));
    }

    #[test]
    fn test_unregistered_architecture() {
        let registry = TargetRegistry::builtin();
        let err = registry.lookup("powerpc64le-unknown-linux-gnu").unwrap_err();
        match err {
            TargetError::UnknownTarget { reason, .. } => assert!(reason.contains("powerpc64le")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_registry_knows_nothing() {
        let registry = TargetRegistry::new();
        assert!(registry.lookup("x86_64-unknown-linux-gnu").is_err());
    }

    #[test]
    fn test_machine_creation_declined() {
        let registry = TargetRegistry::builtin();
        let err = registry
            .create_machine("x86_64-unknown-linux-gnux32", OptLevel::O0)
            .err()
            .unwrap();
        assert!(matches!(err, TargetError::MachineCreation { .. }));
    }
}
