// This module carries debug metadata from the front end into native code generation.
// DebugInfoContext maps function names to their source lines for one translation unit.
// DebugInfoPatch wraps a TargetMachine: it schedules the machine's own emission passes
// and then appends exactly one debug-info-streamer pass bound to the unit and the
// context. The streamer runs after instruction selection and records each machine
// function's symbol, code size and source line into a DebugStream on the emission
// context; the final printer writes that stream as the .debug_ast section of an object
// file, or as a block of data directives at the end of an assembly file.

//! Debug metadata streaming for native code generation.

use crate::emit::{EmitContext, EmitPass, EmitPasses};
use crate::error::{CodegenInitError, EmitResult};
use crate::lowering::TranslationUnit;
use crate::target::{CodeGenFileType, CodeGenOptLevel, TargetMachine};
use log::trace;
use std::collections::BTreeMap;
use target_lexicon::Triple;

/// Section written by the streamer.
pub const DEBUG_SECTION: &str = ".debug_ast";

/// Version of the `.debug_ast` encoding.
pub const DEBUG_FORMAT_VERSION: u16 = 1;

/// Where a function was defined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
}

/// Debug metadata gathered while lowering one translation unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugInfoContext {
    pub producer: String,
    locations: BTreeMap<String, SourceLocation>,
}

impl DebugInfoContext {
    pub fn new(producer: impl Into<String>) -> Self {
        Self {
            producer: producer.into(),
            locations: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, function: impl Into<String>, location: SourceLocation) {
        self.locations.insert(function.into(), location);
    }

    pub fn location(&self, function: &str) -> Option<&SourceLocation> {
        self.locations.get(function)
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}

/// One machine function as seen by the debugger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugRecord {
    pub symbol: String,
    pub file: String,
    pub line: u32,
    pub code_size: u64,
}

/// Everything the streamer hands to the final printer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugStream {
    pub unit: String,
    pub producer: String,
    pub records: Vec<DebugRecord>,
}

impl DebugStream {
    /// Binary section contents; `offset_of` gives each symbol's offset in the text section.
    ///
    /// Little-endian: u16 version, unit and producer as NUL-terminated strings, u32 record
    /// count, then per record the symbol and file strings, u32 line, u64 offset, u64 size.
    pub fn encode(&self, offset_of: impl Fn(&str) -> Option<u64>) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&DEBUG_FORMAT_VERSION.to_le_bytes());
        push_cstr(&mut out, &self.unit);
        push_cstr(&mut out, &self.producer);
        out.extend_from_slice(&(self.records.len() as u32).to_le_bytes());
        for record in &self.records {
            push_cstr(&mut out, &record.symbol);
            push_cstr(&mut out, &record.file);
            out.extend_from_slice(&record.line.to_le_bytes());
            out.extend_from_slice(&offset_of(&record.symbol).unwrap_or(0).to_le_bytes());
            out.extend_from_slice(&record.code_size.to_le_bytes());
        }
        out
    }

    /// The same layout as [`encode`](Self::encode) written as assembler directives.
    /// Offsets become symbol references resolved by the assembler.
    pub fn directives(&self, symbol_name: impl Fn(&str) -> String) -> String {
        let mut out = String::new();
        out.push_str(&format!("\t.short\t{DEBUG_FORMAT_VERSION}\n"));
        out.push_str(&format!("\t.asciz\t{}\n", quoted(&self.unit)));
        out.push_str(&format!("\t.asciz\t{}\n", quoted(&self.producer)));
        out.push_str(&format!("\t.long\t{}\n", self.records.len()));
        for record in &self.records {
            out.push_str(&format!("\t.asciz\t{}\n", quoted(&record.symbol)));
            out.push_str(&format!("\t.asciz\t{}\n", quoted(&record.file)));
            out.push_str(&format!("\t.long\t{}\n", record.line));
            out.push_str(&format!("\t.quad\t{}\n", symbol_name(&record.symbol)));
            out.push_str(&format!("\t.quad\t{}\n", record.code_size));
        }
        out
    }
}

fn push_cstr(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

pub(crate) fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Emission pass recording debug metadata for every selected machine function.
#[derive(Debug, Clone)]
pub struct DebugInfoStreamerPass {
    unit: String,
    source_file: String,
    context: DebugInfoContext,
}

impl DebugInfoStreamerPass {
    pub fn new(unit: &TranslationUnit, context: &DebugInfoContext) -> Self {
        Self {
            unit: unit.name.clone(),
            source_file: unit.source_path.display().to_string(),
            context: context.clone(),
        }
    }
}

impl EmitPass for DebugInfoStreamerPass {
    fn name(&self) -> &'static str {
        "debug-info-streamer"
    }

    fn run(&mut self, ctx: &mut EmitContext<'_>) -> EmitResult<()> {
        let records = ctx
            .functions
            .iter()
            .map(|mf| {
                let (file, line) = match self.context.location(&mf.name) {
                    Some(loc) => (loc.file.clone(), loc.line),
                    None => (self.source_file.clone(), 0),
                };
                DebugRecord {
                    symbol: mf.name.clone(),
                    file,
                    line,
                    code_size: mf.code.len() as u64,
                }
            })
            .collect::<Vec<_>>();
        trace!("streaming debug info for {} functions", records.len());
        ctx.debug = Some(DebugStream {
            unit: self.unit.clone(),
            producer: self.context.producer.clone(),
            records,
        });
        Ok(())
    }
}

/// A target machine whose file emission also streams debug metadata.
pub struct DebugInfoPatch<'a> {
    machine: &'a dyn TargetMachine,
    unit: &'a TranslationUnit,
    debug_info: &'a DebugInfoContext,
}

impl<'a> DebugInfoPatch<'a> {
    pub fn new(
        machine: &'a dyn TargetMachine,
        unit: &'a TranslationUnit,
        debug_info: &'a DebugInfoContext,
    ) -> Self {
        Self {
            machine,
            unit,
            debug_info,
        }
    }
}

impl TargetMachine for DebugInfoPatch<'_> {
    fn triple(&self) -> &Triple {
        self.machine.triple()
    }

    fn cpu(&self) -> &str {
        self.machine.cpu()
    }

    fn features(&self) -> &str {
        self.machine.features()
    }

    fn opt_level(&self) -> CodeGenOptLevel {
        self.machine.opt_level()
    }

    fn data_layout(&self) -> &str {
        self.machine.data_layout()
    }

    fn add_passes_to_emit_file(
        &self,
        passes: &mut EmitPasses,
        file_type: CodeGenFileType,
        disable_verify: bool,
    ) -> Result<(), CodegenInitError> {
        self.machine
            .add_passes_to_emit_file(passes, file_type, disable_verify)?;
        passes.add(Box::new(DebugInfoStreamerPass::new(self.unit, self.debug_info)));
        Ok(())
    }
}
