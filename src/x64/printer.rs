// The last x86-64 emission pass. Instruction selection hands over finished machine code
// with symbolic relocations; this pass turns it into the requested artifact. For object
// files it lays every function out in the text section, writes globals into the data or
// read-only data section, creates undefined symbols for anything referenced but not
// defined, and records one relocation per symbol reference. For assembly it decodes the
// machine code again with iced-x86 and prints it in GAS syntax, replacing relocated
// instructions with symbolic operands and branch targets with local labels. Layout happens
// in run(); the debug-info streamer runs after this pass, so the debug section is attached
// and the output written in finalize().

//! Assembly and object file printing.

use super::ObjectFormat;
use crate::debug_info::{quoted, DebugStream, DEBUG_SECTION};
use crate::emit::{EmitContext, EmitPass, MachineFunction, RelocKind};
use crate::error::{EmitError, EmitResult};
use crate::ir::{Global, Linkage, Module};
use crate::target::CodeGenFileType;
use iced_x86::{
    Decoder, DecoderOptions, FlowControl, Formatter, GasFormatter, Instruction, OpKind,
};
use log::debug;
use object::write::{
    Object, Relocation as ObjectRelocation, SectionId, StandardSection, StandardSegment, Symbol,
    SymbolId, SymbolSection,
};
use object::{
    Architecture, BinaryFormat, Endianness, RelocationEncoding, RelocationFlags, RelocationKind,
    SectionKind, SymbolFlags, SymbolKind, SymbolScope,
};
use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;
use std::io::Write as _;

enum Rendered {
    Assembly(String),
    Object {
        object: Object<'static>,
        /// Offset of each function in the text section.
        offsets: HashMap<String, u64>,
    },
}

/// Emission pass writing assembly or an object file.
pub struct AsmPrinterPass {
    file_type: CodeGenFileType,
    format: ObjectFormat,
    rendered: Option<Rendered>,
}

impl AsmPrinterPass {
    pub fn new(file_type: CodeGenFileType, format: ObjectFormat) -> Self {
        Self {
            file_type,
            format,
            rendered: None,
        }
    }
}

impl EmitPass for AsmPrinterPass {
    fn name(&self) -> &'static str {
        "x86-64-asm-printer"
    }

    fn run(&mut self, ctx: &mut EmitContext<'_>) -> EmitResult<()> {
        let rendered = match self.file_type {
            CodeGenFileType::AssemblyFile => {
                Rendered::Assembly(AsmWriter::new(self.format).module(ctx.module, &ctx.functions)?)
            }
            CodeGenFileType::ObjectFile => {
                let (object, offsets) = build_object(self.format, ctx.module, &ctx.functions)?;
                Rendered::Object { object, offsets }
            }
        };
        self.rendered = Some(rendered);
        Ok(())
    }

    fn finalize(&mut self, ctx: &mut EmitContext<'_>) -> EmitResult<()> {
        let Some(rendered) = self.rendered.take() else {
            return Ok(());
        };
        match rendered {
            Rendered::Assembly(mut text) => {
                if let Some(stream) = &ctx.debug {
                    AsmWriter::new(self.format).debug_section(&mut text, stream);
                }
                ctx.sink.write_all(text.as_bytes())?;
            }
            Rendered::Object {
                mut object,
                offsets,
            } => {
                if let Some(stream) = &ctx.debug {
                    add_debug_section(&mut object, self.format, stream, &offsets);
                }
                let bytes = object.write()?;
                debug!("object file is {} bytes", bytes.len());
                ctx.sink.write_all(&bytes)?;
            }
        }
        Ok(())
    }
}

fn global_bytes(global: &Global) -> Vec<u8> {
    if global.init.is_empty() {
        return vec![0; 8];
    }
    global.init.iter().flat_map(|w| w.to_le_bytes()).collect()
}

fn symbol_scope(linkage: Linkage) -> SymbolScope {
    match linkage {
        Linkage::External => SymbolScope::Dynamic,
        Linkage::Internal => SymbolScope::Compilation,
    }
}

fn build_object(
    format: ObjectFormat,
    module: &Module,
    functions: &[MachineFunction],
) -> EmitResult<(Object<'static>, HashMap<String, u64>)> {
    let binary_format = match format {
        ObjectFormat::Elf => BinaryFormat::Elf,
        ObjectFormat::MachO => BinaryFormat::MachO,
        ObjectFormat::Coff => BinaryFormat::Coff,
    };
    let mut object = Object::new(binary_format, Architecture::X86_64, Endianness::Little);
    if format == ObjectFormat::Elf {
        object.add_file_symbol(module.name.as_bytes().to_vec());
    }

    let mut symbols: HashMap<String, SymbolId> = HashMap::new();
    let mut offsets = HashMap::new();
    let text = object.section_id(StandardSection::Text);

    for mf in functions {
        let id = object.add_symbol(Symbol {
            name: mf.name.as_bytes().to_vec(),
            value: 0,
            size: 0,
            kind: SymbolKind::Text,
            scope: symbol_scope(mf.linkage),
            weak: false,
            section: SymbolSection::Undefined,
            flags: SymbolFlags::None,
        });
        let offset = object.add_symbol_data(id, text, &mf.code, 16);
        symbols.insert(mf.name.clone(), id);
        offsets.insert(mf.name.clone(), offset);
    }

    for global in &module.globals {
        let section = if global.constant {
            object.section_id(StandardSection::ReadOnlyData)
        } else {
            object.section_id(StandardSection::Data)
        };
        let id = object.add_symbol(Symbol {
            name: global.name.as_bytes().to_vec(),
            value: 0,
            size: 0,
            kind: SymbolKind::Data,
            scope: symbol_scope(global.linkage),
            weak: false,
            section: SymbolSection::Undefined,
            flags: SymbolFlags::None,
        });
        object.add_symbol_data(id, section, &global_bytes(global), 8);
        symbols.insert(global.name.clone(), id);
    }

    for mf in functions {
        let base = offsets.get(&mf.name).copied().unwrap_or(0);
        for reloc in &mf.relocations {
            let symbol = match symbols.get(&reloc.symbol) {
                Some(&id) => id,
                None => {
                    let id = object.add_symbol(Symbol {
                        name: reloc.symbol.as_bytes().to_vec(),
                        value: 0,
                        size: 0,
                        kind: SymbolKind::Text,
                        scope: SymbolScope::Unknown,
                        weak: false,
                        section: SymbolSection::Undefined,
                        flags: SymbolFlags::None,
                    });
                    symbols.insert(reloc.symbol.clone(), id);
                    id
                }
            };
            let encoding = match reloc.kind {
                RelocKind::Call => RelocationEncoding::X86Branch,
                RelocKind::PcRel32 => RelocationEncoding::Generic,
            };
            object.add_relocation(
                text,
                ObjectRelocation {
                    offset: base + reloc.offset,
                    symbol,
                    addend: reloc.addend,
                    flags: RelocationFlags::Generic {
                        kind: RelocationKind::Relative,
                        encoding,
                        size: 32,
                    },
                },
            )?;
        }
    }

    Ok((object, offsets))
}

fn add_debug_section(
    object: &mut Object<'static>,
    format: ObjectFormat,
    stream: &DebugStream,
    offsets: &HashMap<String, u64>,
) -> SectionId {
    let name = match format {
        ObjectFormat::MachO => b"__debug_ast".to_vec(),
        ObjectFormat::Elf | ObjectFormat::Coff => DEBUG_SECTION.as_bytes().to_vec(),
    };
    let segment = object.segment_name(StandardSegment::Debug).to_vec();
    let section = object.add_section(segment, name, SectionKind::Debug);
    let data = stream.encode(|symbol| offsets.get(symbol).copied());
    object.append_section_data(section, &data, 1);
    section
}

/// GAS-syntax assembly writer.
struct AsmWriter {
    format: ObjectFormat,
    formatter: GasFormatter,
}

impl AsmWriter {
    fn new(format: ObjectFormat) -> Self {
        let mut formatter = GasFormatter::new();
        formatter.options_mut().set_gas_show_mnemonic_size_suffix(true);
        formatter.options_mut().set_space_after_operand_separator(true);
        Self { format, formatter }
    }

    fn symbol(&self, name: &str) -> String {
        format!("{}{name}", self.format.symbol_prefix())
    }

    fn local_label(&self, function: &str, offset: u64) -> String {
        let prefix = match self.format {
            ObjectFormat::MachO => "L",
            ObjectFormat::Elf | ObjectFormat::Coff => ".L",
        };
        format!("{prefix}{function}_{offset:x}")
    }

    fn module(&mut self, module: &Module, functions: &[MachineFunction]) -> EmitResult<String> {
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = writeln!(out, "\t.text");
        if self.format == ObjectFormat::Elf {
            let _ = writeln!(out, "\t.file\t{}", quoted(&module.name));
        }
        for mf in functions {
            self.function(&mut out, mf)?;
        }
        for global in &module.globals {
            self.global(&mut out, global);
        }
        Ok(out)
    }

    fn function(&mut self, out: &mut String, mf: &MachineFunction) -> EmitResult<()> {
        let name = self.symbol(&mf.name);
        let _ = writeln!(out);
        if mf.linkage == Linkage::External {
            let _ = writeln!(out, "\t.globl\t{name}");
        }
        let _ = writeln!(out, "\t.p2align\t4, 0x90");
        if self.format == ObjectFormat::Elf {
            let _ = writeln!(out, "\t.type\t{name},@function");
        }
        let _ = writeln!(out, "{name}:");

        let mut decoder = Decoder::with_ip(64, &mf.code, 0, DecoderOptions::NONE);
        let instructions: Vec<Instruction> = decoder.iter().collect();
        if let Some(bad) = instructions.iter().find(|i| i.is_invalid()) {
            return Err(EmitError::Codegen {
                function: mf.name.clone(),
                reason: format!("undecodable machine code at offset {:#x}", bad.ip()),
            });
        }

        let targets: BTreeSet<u64> = instructions
            .iter()
            .filter(|i| is_local_branch(i))
            .map(|i| i.near_branch_target())
            .collect();

        for instr in &instructions {
            if targets.contains(&instr.ip()) {
                let _ = writeln!(out, "{}:", self.local_label(&mf.name, instr.ip()));
            }
            let reloc = mf
                .relocations
                .iter()
                .find(|r| instr.ip() < r.offset && r.offset < instr.next_ip());
            if let Some(reloc) = reloc {
                let symbol = self.symbol(&reloc.symbol);
                match reloc.kind {
                    RelocKind::Call => {
                        let _ = writeln!(out, "\tcallq\t{symbol}");
                    }
                    RelocKind::PcRel32 => {
                        let _ = writeln!(out, "\tleaq\t{symbol}(%rip), %rax");
                    }
                }
                continue;
            }

            let mut mnemonic = String::new();
            self.formatter.format_mnemonic(instr, &mut mnemonic);
            if is_local_branch(instr) {
                let label = self.local_label(&mf.name, instr.near_branch_target());
                let _ = writeln!(out, "\t{mnemonic}\t{label}");
                continue;
            }
            let mut operands = String::new();
            self.formatter.format_all_operands(instr, &mut operands);
            if operands.is_empty() {
                let _ = writeln!(out, "\t{mnemonic}");
            } else {
                let _ = writeln!(out, "\t{mnemonic}\t{operands}");
            }
        }

        if self.format == ObjectFormat::Elf {
            let _ = writeln!(out, "\t.size\t{name}, .-{name}");
        }
        Ok(())
    }

    fn global(&self, out: &mut String, global: &Global) {
        let name = self.symbol(&global.name);
        let section = match (global.constant, self.format) {
            (false, _) => "\t.data",
            (true, ObjectFormat::Elf) => "\t.section\t.rodata",
            (true, ObjectFormat::MachO) => "\t.section\t__TEXT,__const",
            (true, ObjectFormat::Coff) => "\t.section\t.rdata,\"dr\"",
        };
        let _ = writeln!(out);
        let _ = writeln!(out, "{section}");
        if global.linkage == Linkage::External {
            let _ = writeln!(out, "\t.globl\t{name}");
        }
        let _ = writeln!(out, "\t.p2align\t3");
        let _ = writeln!(out, "{name}:");
        if global.init.is_empty() {
            let _ = writeln!(out, "\t.quad\t0");
        }
        for word in &global.init {
            let _ = writeln!(out, "\t.quad\t{word}");
        }
    }

    fn debug_section(&self, out: &mut String, stream: &DebugStream) {
        let header = match self.format {
            ObjectFormat::Elf => format!("\t.section\t{DEBUG_SECTION},\"\",@progbits"),
            ObjectFormat::MachO => "\t.section\t__DWARF,__debug_ast,regular,debug".to_string(),
            ObjectFormat::Coff => format!("\t.section\t{DEBUG_SECTION},\"dr\""),
        };
        let _ = writeln!(out);
        let _ = writeln!(out, "{header}");
        out.push_str(&stream.directives(|symbol| self.symbol(symbol)));
    }
}

fn is_local_branch(instr: &Instruction) -> bool {
    matches!(
        instr.flow_control(),
        FlowControl::UnconditionalBranch | FlowControl::ConditionalBranch
    ) && matches!(
        instr.op0_kind(),
        OpKind::NearBranch16 | OpKind::NearBranch32 | OpKind::NearBranch64
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug_info::DebugRecord;
    use crate::emit::OutputSink;
    use crate::ir::parse_module;
    use crate::x64::select_function;
    use object::{Object as _, ObjectSection, ObjectSymbol};

    const SOURCE: &str = "\
global @counter = [0]
declare @puts(%s)

define @main() {
entry:
  %p = addr @counter
  %one = const 1
  %c = eq %one, %one
  condbr %c, done, trap
trap:
  unreachable
done:
  call @puts(%p)
  ret %one
}
";

    fn print(format: ObjectFormat, file_type: CodeGenFileType, debug: bool) -> Vec<u8> {
        let module = parse_module(SOURCE).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out");
        let mut sink = OutputSink::open(&path, true).unwrap();
        {
            let mut ctx = EmitContext::new(&module, &mut sink);
            for f in module.defined_functions() {
                ctx.functions
                    .push(select_function(f, format.calling_convention()).unwrap());
            }
            let mut pass = AsmPrinterPass::new(file_type, format);
            pass.run(&mut ctx).unwrap();
            if debug {
                ctx.debug = Some(DebugStream {
                    unit: "demo".into(),
                    producer: "test".into(),
                    records: vec![DebugRecord {
                        symbol: "main".into(),
                        file: "demo.ir".into(),
                        line: 4,
                        code_size: ctx.functions[0].code.len() as u64,
                    }],
                });
            }
            pass.finalize(&mut ctx).unwrap();
        }
        sink.commit().unwrap();
        std::fs::read(&path).unwrap()
    }

    #[test]
    fn test_assembly_elf() {
        let text =
            String::from_utf8(print(ObjectFormat::Elf, CodeGenFileType::AssemblyFile, false))
                .unwrap();
        assert!(text.contains("\t.globl\tmain\n"), "{text}");
        assert!(text.contains("\t.type\tmain,@function\n"));
        assert!(text.contains("\tcallq\tputs\n"));
        assert!(text.contains("\tleaq\tcounter(%rip), %rax\n"));
        assert!(text.contains("\tpushq\t%rbp\n"), "{text}");
        assert!(text.contains("\t.size\tmain, .-main\n"));
        assert!(text.contains("counter:\n\t.quad\t0\n"));
        assert!(text.contains(".Lmain_"));
        assert!(!text.contains(".debug_ast"));
    }

    #[test]
    fn test_file_directive_escapes_module_name() {
        let mut module = parse_module(SOURCE).unwrap();
        module.name = r#"build\"odd"\out.s"#.to_string();
        let text = AsmWriter::new(ObjectFormat::Elf)
            .module(&module, &[])
            .unwrap();
        let expected = format!("\t.file\t{}\n", r#""build\\\"odd\"\\out.s""#);
        assert!(text.contains(&expected), "{text}");
    }

    #[test]
    fn test_assembly_macho_prefix_and_debug() {
        let text =
            String::from_utf8(print(ObjectFormat::MachO, CodeGenFileType::AssemblyFile, true))
                .unwrap();
        assert!(text.contains("\t.globl\t_main\n"), "{text}");
        assert!(text.contains("\tcallq\t_puts\n"));
        assert!(!text.contains(".type"));
        assert!(text.contains("__DWARF,__debug_ast"));
        assert!(text.contains("\t.quad\t_main\n"));
    }

    #[test]
    fn test_elf_object() {
        let bytes = print(ObjectFormat::Elf, CodeGenFileType::ObjectFile, true);
        let file = object::File::parse(&*bytes).unwrap();
        assert_eq!(file.format(), BinaryFormat::Elf);
        let main = file.symbol_by_name("main").unwrap();
        assert!(main.is_definition());
        assert!(main.is_global());
        let puts = file.symbol_by_name("puts").unwrap();
        assert!(puts.is_undefined());
        assert!(file.symbol_by_name("counter").unwrap().is_definition());

        let text = file.section_by_name(".text").unwrap();
        assert_eq!(text.relocations().count(), 2);
        let debug = file.section_by_name(".debug_ast").unwrap();
        let data = debug.data().unwrap();
        assert_eq!(&data[..2], &1u16.to_le_bytes());
    }

    #[test]
    fn test_coff_object() {
        let bytes = print(ObjectFormat::Coff, CodeGenFileType::ObjectFile, false);
        let file = object::File::parse(&*bytes).unwrap();
        assert_eq!(file.format(), BinaryFormat::Coff);
        assert!(file.symbol_by_name("main").is_some());
        assert!(file.section_by_name(".debug_ast").is_none());
    }
}
