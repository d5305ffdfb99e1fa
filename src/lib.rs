//! irgen - backend code generation driver.
//!
//! irgen takes the in-memory module of one translation unit, resolves a target machine for
//! a triple, runs an optimization pipeline over the module and writes the requested
//! artifact: textual IR, bitcode, native assembly or a relocatable object file. The
//! pipeline is generic apart from two reference-counting transforms spliced in at fixed
//! extension points; native emission can stream debug metadata right after code
//! generation.
//!
//! # Primary Usage
//!
//! ```no_run
//! use irgen::{perform_ir_generation, DiagnosticEngine, IrGenOptions, OptLevel, OutputKind};
//! use irgen::{TextualLowering, TranslationUnit};
//!
//! let unit = TranslationUnit::from_file(std::path::Path::new("main.ir"))?;
//! let options = IrGenOptions::new("x86_64-unknown-linux-gnu", OutputKind::ObjectFile)
//!     .with_opt_level(OptLevel::O2)
//!     .with_output("main.o");
//! let diagnostics = DiagnosticEngine::new();
//! let module = perform_ir_generation(&options, &unit, &mut TextualLowering, &diagnostics);
//! # Ok::<(), std::io::Error>(())
//! ```
//!
//! # Architecture
//!
//! - [`driver`] - One invocation from triple to output, single diagnostic discipline
//! - [`target`] - Triple resolution and the target machine abstraction
//! - [`pipeline`] - Optimization schedule with the two extension slots
//! - [`passes`] - Optimization stages and the pass manager
//! - [`emit`] - Output sinks and the final emission passes
//! - [`debug_info`] - Debug metadata streaming around native emission
//! - [`x64`] - The x86-64 code generator (iced-x86, object)
//! - [`ir`] - The module representation, its textual and binary forms, the verifier

pub mod debug_info;
pub mod diagnostics;
pub mod driver;
pub mod emit;
pub mod error;
pub mod ir;
pub mod lowering;
pub mod options;
pub mod passes;
pub mod pipeline;
pub mod target;
pub mod x64;

pub use debug_info::{DebugInfoContext, DebugInfoPatch};
pub use diagnostics::{
    DiagId, Diagnostic, DiagnosticEngine, DiagnosticSink, ScopedDiagnostics, Severity,
};
pub use driver::{perform_ir_generation, IrGen};
pub use emit::{EmitPass, EmitPasses, Emitter, OutputSink};
pub use error::{CodegenInitError, EmitError, IrGenError, IrGenResult, TargetError};
pub use ir::Module;
pub use lowering::{ModuleHandle, ModuleLowering, TextualLowering, TranslationUnit};
pub use options::{IrGenOptions, OptLevel, OutputKind, DEFAULT_TRIPLE};
pub use passes::{PassEvent, PassObserver, PassPhase, PassTrace, Stage};
pub use pipeline::{ExtensionPoint, PassSchedule, PipelineBuilder};
pub use target::{CodeGenFileType, CodeGenOptLevel, Target, TargetMachine, TargetRegistry};
