// This module performs the final step of an invocation: it opens the output destination,
// runs the optimization pipeline over the module and then runs a sequence of emission
// passes that produce the requested artifact. Textual IR and bitcode are written by a
// single pass each. Assembly and object files are produced by passes the target machine
// schedules into an EmitPasses sequence, optionally through the DebugInfoPatch decorator
// which appends the debug-info streamer. Emission passes share an EmitContext holding the
// module, the output sink and whatever the passes hand to each other (machine code from
// instruction selection, debug records from the streamer). Each pass runs, then each pass
// is finalized, so a printer can finish its output after every other pass contributed.

//! Output-kind dispatch and the emission pass sequence.

pub mod sink;

pub use sink::OutputSink;

use crate::debug_info::{DebugInfoContext, DebugInfoPatch, DebugStream};
use crate::error::{EmitError, EmitResult};
use crate::ir::{verify_module, write_bitcode, Linkage, Module};
use crate::lowering::TranslationUnit;
use crate::options::{IrGenOptions, OutputKind};
use crate::passes::{PassEvent, PassManager, PassObserver, PassPhase};
use crate::pipeline::PassSchedule;
use crate::target::{CodeGenFileType, TargetMachine};
use log::{debug, info};
use std::io::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelocKind {
    /// `call rel32`.
    Call,
    /// RIP-relative 32-bit displacement.
    PcRel32,
}

/// A symbol reference inside machine code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    /// Offset of the 4-byte field from the start of the function.
    pub offset: u64,
    pub symbol: String,
    pub kind: RelocKind,
    pub addend: i64,
}

/// Machine code for one function, produced by instruction selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineFunction {
    pub name: String,
    pub linkage: Linkage,
    pub code: Vec<u8>,
    pub relocations: Vec<Relocation>,
}

/// State shared by the passes of one emission sequence.
pub struct EmitContext<'a> {
    pub module: &'a Module,
    pub sink: &'a mut OutputSink,
    /// Filled by instruction selection, in module order.
    pub functions: Vec<MachineFunction>,
    /// Filled by the debug-info streamer.
    pub debug: Option<DebugStream>,
}

impl<'a> EmitContext<'a> {
    pub fn new(module: &'a Module, sink: &'a mut OutputSink) -> Self {
        Self {
            module,
            sink,
            functions: Vec::new(),
            debug: None,
        }
    }
}

pub trait EmitPass {
    fn name(&self) -> &'static str;

    fn run(&mut self, ctx: &mut EmitContext<'_>) -> EmitResult<()>;

    /// Called after every pass in the sequence has run.
    fn finalize(&mut self, _cx: &mut EmitContext<'_>) -> EmitResult<()> {
        Ok(())
    }
}

/// An ordered sequence of emission passes.
#[derive(Default)]
pub struct EmitPasses {
    passes: Vec<Box<dyn EmitPass>>,
}

impl EmitPasses {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, pass: Box<dyn EmitPass>) {
        self.passes.push(pass);
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    pub fn run(
        &mut self,
        ctx: &mut EmitContext<'_>,
        observer: &mut dyn PassObserver,
    ) -> EmitResult<()> {
        for pass in &mut self.passes {
            debug!("running emission pass {}", pass.name());
            observer.on_pass(&PassEvent {
                phase: PassPhase::Emit,
                pass: pass.name(),
                function: None,
            });
            pass.run(ctx)?;
        }
        for pass in &mut self.passes {
            pass.finalize(ctx)?;
        }
        Ok(())
    }
}

/// Writes the module as textual IR.
#[derive(Debug, Default)]
pub struct PrintModulePass;

impl EmitPass for PrintModulePass {
    fn name(&self) -> &'static str {
        "print-module"
    }

    fn run(&mut self, ctx: &mut EmitContext<'_>) -> EmitResult<()> {
        write!(ctx.sink, "{}", ctx.module)?;
        Ok(())
    }
}

/// Writes the module as bitcode.
#[derive(Debug, Default)]
pub struct BitcodeWriterPass;

impl EmitPass for BitcodeWriterPass {
    fn name(&self) -> &'static str {
        "write-bitcode"
    }

    fn run(&mut self, ctx: &mut EmitContext<'_>) -> EmitResult<()> {
        let bytes = write_bitcode(ctx.module)?;
        ctx.sink.write_all(&bytes)?;
        Ok(())
    }
}

/// Structural verification ahead of code generation.
#[derive(Debug, Default)]
pub struct VerifyModulePass;

impl EmitPass for VerifyModulePass {
    fn name(&self) -> &'static str {
        "verify"
    }

    fn run(&mut self, ctx: &mut EmitContext<'_>) -> EmitResult<()> {
        verify_module(ctx.module)?;
        Ok(())
    }
}

/// Runs the pipeline and writes the artifact for one module.
pub struct Emitter<'a> {
    options: &'a IrGenOptions,
    machine: &'a dyn TargetMachine,
    debug_info: Option<(&'a TranslationUnit, &'a DebugInfoContext)>,
}

impl<'a> Emitter<'a> {
    pub fn new(options: &'a IrGenOptions, machine: &'a dyn TargetMachine) -> Self {
        Self {
            options,
            machine,
            debug_info: None,
        }
    }

    /// Stream debug metadata for `unit` during native code generation.
    pub fn with_debug_info(mut self, unit: &'a TranslationUnit, context: &'a DebugInfoContext) -> Self {
        self.debug_info = Some((unit, context));
        self
    }

    pub fn emit(
        &self,
        module: &mut Module,
        schedule: &PassSchedule,
        observer: &mut dyn PassObserver,
    ) -> EmitResult<()> {
        let kind = self.options.output_kind;
        let mut sink = match self.options.destination() {
            Some(path) => OutputSink::open(path, kind.is_binary()).map_err(|source| {
                EmitError::OutputOpen {
                    path: path.to_path_buf(),
                    source,
                }
            })?,
            None => OutputSink::Null,
        };

        PassManager::new(observer).run(module, schedule)?;

        if sink.is_null() {
            debug!("no output destination for {kind}; module stays in memory");
            return Ok(());
        }

        let mut passes = EmitPasses::new();
        match kind {
            OutputKind::InMemoryModule => return Ok(()),
            OutputKind::TextualIr => passes.add(Box::new(PrintModulePass)),
            OutputKind::Bitcode => passes.add(Box::new(BitcodeWriterPass)),
            OutputKind::NativeAssembly | OutputKind::ObjectFile => {
                let file_type = if kind == OutputKind::ObjectFile {
                    CodeGenFileType::ObjectFile
                } else {
                    CodeGenFileType::AssemblyFile
                };
                let disable_verify = !self.options.verify;
                match self.debug_info {
                    Some((unit, context)) => DebugInfoPatch::new(self.machine, unit, context)
                        .add_passes_to_emit_file(&mut passes, file_type, disable_verify)?,
                    None => self
                        .machine
                        .add_passes_to_emit_file(&mut passes, file_type, disable_verify)?,
                }
            }
        }
        debug!("emission passes: {:?}", passes.names());

        let mut ctx = EmitContext::new(module, &mut sink);
        passes.run(&mut ctx, observer)?;
        drop(ctx);

        let path = sink.path().map(|p| p.display().to_string()).unwrap_or_default();
        let written = sink.commit()?;
        info!("wrote {kind} ({written} bytes) to {path}");
        Ok(())
    }
}
