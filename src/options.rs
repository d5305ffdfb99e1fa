//! Per-invocation compilation options.
//!
//! Parsing these from a command line belongs to the caller; the `irgen` binary maps its
//! arguments onto [`IrGenOptions`] and nothing else in the crate reads the environment.

use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Triple used when the caller does not pick one.
pub const DEFAULT_TRIPLE: &str = "x86_64-unknown-linux-gnu";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptionsError {
    #[error("invalid optimization level {0} (expected 0-3)")]
    InvalidOptLevel(u8),
}

/// Optimization level 0-3.
///
/// The ordinal maps one-to-one onto the backend's code generation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct OptLevel(u8);

impl OptLevel {
    pub const O0: OptLevel = OptLevel(0);
    pub const O1: OptLevel = OptLevel(1);
    pub const O2: OptLevel = OptLevel(2);
    pub const O3: OptLevel = OptLevel(3);

    pub fn new(level: u8) -> Result<Self, OptionsError> {
        if level <= 3 {
            Ok(OptLevel(level))
        } else {
            Err(OptionsError::InvalidOptLevel(level))
        }
    }

    pub fn as_u8(self) -> u8 {
        self.0
    }

    pub fn is_optimizing(self) -> bool {
        self.0 > 0
    }
}

impl TryFrom<u8> for OptLevel {
    type Error = OptionsError;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        OptLevel::new(level)
    }
}

impl fmt::Display for OptLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "-O{}", self.0)
    }
}

/// Requested final artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputKind {
    /// Run the pipeline and keep the module in memory.
    InMemoryModule,
    /// Human-readable textual IR.
    TextualIr,
    /// Portable binary module encoding.
    Bitcode,
    /// Target assembly.
    NativeAssembly,
    /// Relocatable object file.
    ObjectFile,
}

impl OutputKind {
    pub fn is_binary(self) -> bool {
        match self {
            OutputKind::InMemoryModule | OutputKind::TextualIr | OutputKind::NativeAssembly => false,
            OutputKind::Bitcode | OutputKind::ObjectFile => true,
        }
    }

    pub fn default_extension(self) -> Option<&'static str> {
        match self {
            OutputKind::InMemoryModule => None,
            OutputKind::TextualIr => Some("ir"),
            OutputKind::Bitcode => Some("bc"),
            OutputKind::NativeAssembly => Some("s"),
            OutputKind::ObjectFile => Some("o"),
        }
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputKind::InMemoryModule => "module",
            OutputKind::TextualIr => "textual IR",
            OutputKind::Bitcode => "bitcode",
            OutputKind::NativeAssembly => "assembly",
            OutputKind::ObjectFile => "object file",
        })
    }
}

/// Options for one code generation invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrGenOptions {
    pub triple: String,
    pub opt_level: OptLevel,
    pub output_kind: OutputKind,
    /// Destination; `None` keeps the result in memory only.
    pub output_path: Option<PathBuf>,
    /// Verify the module after the function and module pass stages.
    pub verify: bool,
    /// Stream debug metadata alongside native code generation.
    pub debug_info: bool,
}

impl Default for IrGenOptions {
    fn default() -> Self {
        Self {
            triple: DEFAULT_TRIPLE.to_string(),
            opt_level: OptLevel::O0,
            output_kind: OutputKind::TextualIr,
            output_path: None,
            verify: false,
            debug_info: false,
        }
    }
}

impl IrGenOptions {
    pub fn new(triple: impl Into<String>, output_kind: OutputKind) -> Self {
        Self {
            triple: triple.into(),
            output_kind,
            ..Self::default()
        }
    }

    pub fn with_opt_level(mut self, level: OptLevel) -> Self {
        self.opt_level = level;
        self
    }

    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn with_debug_info(mut self, debug_info: bool) -> Self {
        self.debug_info = debug_info;
        self
    }

    /// The file to write, if this invocation writes one at all.
    pub fn destination(&self) -> Option<&Path> {
        match self.output_kind {
            OutputKind::InMemoryModule => None,
            _ => self
                .output_path
                .as_deref()
                .filter(|p| !p.as_os_str().is_empty()),
        }
    }
}
