//! irgen command-line driver.
//!
//! Reads a textual IR file and writes it back as optimized IR, bitcode, assembly or an
//! object file.
//!
//! ```bash
//! irgen input.ir --emit obj -O2 -o input.o
//! irgen input.ir --emit asm --target x86_64-apple-darwin -g
//! ```

use clap::{Parser, ValueEnum};
use irgen::{
    perform_ir_generation, DiagnosticEngine, IrGenOptions, OptLevel, OutputKind,
    TextualLowering, TranslationUnit, DEFAULT_TRIPLE,
};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Emit {
    /// Textual IR
    Ir,
    /// Bitcode
    Bc,
    /// Native assembly
    Asm,
    /// Relocatable object file
    Obj,
    /// Run the pipeline without writing anything
    None,
}

impl From<Emit> for OutputKind {
    fn from(emit: Emit) -> Self {
        match emit {
            Emit::Ir => OutputKind::TextualIr,
            Emit::Bc => OutputKind::Bitcode,
            Emit::Asm => OutputKind::NativeAssembly,
            Emit::Obj => OutputKind::ObjectFile,
            Emit::None => OutputKind::InMemoryModule,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "irgen", version, about = "Optimize and emit a textual IR module")]
struct Cli {
    /// Input file containing textual IR
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Target triple
    #[arg(long, default_value = DEFAULT_TRIPLE)]
    target: String,

    /// Optimization level (0-3)
    #[arg(short = 'O', default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=3))]
    opt_level: u8,

    /// Output kind
    #[arg(long, value_enum, default_value_t = Emit::Obj)]
    emit: Emit,

    /// Output path; defaults to the input with the kind's extension
    #[arg(short = 'o', value_name = "OUTPUT")]
    output: Option<PathBuf>,

    /// Verify the module after the pass stages and before emission
    #[arg(long)]
    verify: bool,

    /// Stream debug metadata into native output
    #[arg(short = 'g')]
    debug_info: bool,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let unit = match TranslationUnit::from_file(&cli.input) {
        Ok(unit) => unit,
        Err(err) => {
            eprintln!("error: cannot read '{}': {err}", cli.input.display());
            return ExitCode::FAILURE;
        }
    };

    let kind = OutputKind::from(cli.emit);
    let output = cli.output.clone().or_else(|| {
        kind.default_extension()
            .map(|ext| cli.input.with_extension(ext))
    });
    let opt_level = match OptLevel::new(cli.opt_level) {
        Ok(level) => level,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };
    let mut options = IrGenOptions::new(cli.target, kind)
        .with_opt_level(opt_level)
        .with_verify(cli.verify)
        .with_debug_info(cli.debug_info);
    if let Some(path) = output {
        options = options.with_output(path);
    }

    let diagnostics = DiagnosticEngine::new();
    let result = perform_ir_generation(&options, &unit, &mut TextualLowering, &diagnostics);
    for diagnostic in diagnostics.diagnostics() {
        eprintln!("{diagnostic}");
    }
    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}
