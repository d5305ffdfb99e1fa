//! The boundary between the front end and the code generation driver.
//!
//! Producing a module from a typed program is not this crate's job. The driver only needs
//! something implementing [`ModuleLowering`] that fills a module it has already stamped
//! with the target triple and data layout, reports problems through the diagnostics sink
//! and hands back the debug metadata it gathered. [`TextualLowering`] is the adapter used
//! by the `irgen` binary and the tests: the translation unit already holds textual IR.

use crate::debug_info::{DebugInfoContext, SourceLocation};
use crate::diagnostics::{DiagId, Diagnostic, DiagnosticSink};
use crate::ir::{parse_module, Module};
use log::{debug, warn};
use std::io;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};

/// One translation unit as the front end hands it over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationUnit {
    pub name: String,
    pub source_path: PathBuf,
    pub source: String,
    /// Set when the front end already reported errors for this unit.
    pub has_errors: bool,
}

impl TranslationUnit {
    pub fn new(
        name: impl Into<String>,
        source_path: impl Into<PathBuf>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            source_path: source_path.into(),
            source: source.into(),
            has_errors: false,
        }
    }

    /// Read a unit from disk; the name is the file stem.
    pub fn from_file(path: &Path) -> io::Result<Self> {
        let source = std::fs::read_to_string(path)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unit".to_string());
        Ok(Self::new(name, path, source))
    }
}

/// Produces the contents of a module for one translation unit.
pub trait ModuleLowering {
    /// Lower `unit` into `module`, starting at top-level element `start_element`.
    ///
    /// Elements before `start_element` were emitted by an earlier invocation and are
    /// only declared. Failures are reported through `diags`; any error reported there
    /// aborts the invocation.
    fn lower(
        &mut self,
        unit: &TranslationUnit,
        start_element: usize,
        module: &mut Module,
        diags: &dyn DiagnosticSink,
    ) -> DebugInfoContext;
}

/// Lowering for units whose source is already textual IR.
#[derive(Debug, Default)]
pub struct TextualLowering;

impl TextualLowering {
    pub fn producer() -> String {
        format!("irgen {}", env!("CARGO_PKG_VERSION"))
    }
}

impl ModuleLowering for TextualLowering {
    fn lower(
        &mut self,
        unit: &TranslationUnit,
        start_element: usize,
        module: &mut Module,
        diags: &dyn DiagnosticSink,
    ) -> DebugInfoContext {
        let mut context = DebugInfoContext::new(Self::producer());
        let parsed = match parse_module(&unit.source) {
            Ok(parsed) => parsed,
            Err(err) => {
                diags.diagnose(Diagnostic::error(
                    DiagId::Frontend,
                    format!("{}:{err}", unit.source_path.display()),
                ));
                return context;
            }
        };

        if !parsed.target_triple.is_empty() && parsed.target_triple != module.target_triple {
            warn!(
                "{}: ignoring target triple '{}', compiling for '{}'",
                unit.name, parsed.target_triple, module.target_triple
            );
        }

        for flag in parsed.flags {
            module.add_flag(flag.behavior, flag.key, flag.value);
        }
        module.globals.extend(parsed.globals);
        for (index, mut function) in parsed.functions.into_iter().enumerate() {
            if index < start_element && !function.is_declaration() {
                function.blocks.clear();
            }
            module.functions.push(function);
        }

        let file = unit.source_path.display().to_string();
        for (name, line) in definition_lines(&unit.source) {
            if module.function(&name).is_some_and(|f| !f.is_declaration()) {
                context.record(
                    name,
                    SourceLocation {
                        file: file.clone(),
                        line,
                    },
                );
            }
        }
        debug!(
            "lowered {}: {} functions, {} globals",
            unit.name,
            module.functions.len(),
            module.globals.len()
        );
        context
    }
}

/// `(function, line)` for every `define` in `source`, lines counted from 1.
fn definition_lines(source: &str) -> Vec<(String, u32)> {
    source
        .lines()
        .enumerate()
        .filter_map(|(idx, line)| {
            let rest = line.trim_start().strip_prefix("define")?;
            let at = rest.find('@')?;
            let name: String = rest[at + 1..]
                .chars()
                .take_while(|&c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$' | '-'))
                .collect();
            (!name.is_empty()).then(|| (name, idx as u32 + 1))
        })
        .collect()
}

/// The module of one invocation: created by the driver or supplied by the caller.
#[derive(Debug)]
pub enum ModuleHandle<'m> {
    Owned(Box<Module>),
    Borrowed(&'m mut Module),
}

impl ModuleHandle<'_> {
    pub fn is_owned(&self) -> bool {
        matches!(self, ModuleHandle::Owned(_))
    }

    /// The module itself, cloned when borrowed.
    pub fn into_owned(self) -> Module {
        match self {
            ModuleHandle::Owned(module) => *module,
            ModuleHandle::Borrowed(module) => module.clone(),
        }
    }
}

impl Deref for ModuleHandle<'_> {
    type Target = Module;

    fn deref(&self) -> &Module {
        match self {
            ModuleHandle::Owned(module) => &**module,
            ModuleHandle::Borrowed(module) => &**module,
        }
    }
}

impl DerefMut for ModuleHandle<'_> {
    fn deref_mut(&mut self) -> &mut Module {
        match self {
            ModuleHandle::Owned(module) => &mut **module,
            ModuleHandle::Borrowed(module) => &mut **module,
        }
    }
}
