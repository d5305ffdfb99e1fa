// The driver ties one invocation together. It creates (or adopts) the module, stamps the
// target triple and the DWARF version flag onto it, resolves a target machine from the
// triple, copies the machine's data layout onto the module, asks the lowering delegate to
// fill the module and then hands everything to the emitter, which runs the optimization
// pipeline and writes the requested artifact. Every stage can fail. Failures are turned
// into an IrGenError and reported through the diagnostics sink exactly once, here and
// nowhere else; errors the front end already reported abort the invocation silently.

//! Code generation driver for one translation unit.

use crate::debug_info::DebugInfoContext;
use crate::diagnostics::{DiagnosticSink, ScopedDiagnostics};
use crate::emit::Emitter;
use crate::error::{IrGenError, IrGenResult};
use crate::ir::{FlagBehavior, Module};
use crate::lowering::{ModuleHandle, ModuleLowering, TranslationUnit};
use crate::options::IrGenOptions;
use crate::passes::{NullObserver, PassObserver};
use crate::pipeline::PipelineBuilder;
use crate::target::{TargetMachine, TargetRegistry, DEFAULT_CPU, DEFAULT_FEATURES};
use log::{debug, info};

/// Module flag recording the DWARF version consumers should expect.
pub const DWARF_VERSION_FLAG: &str = "Dwarf Version";
pub const DWARF_VERSION: i64 = 3;

pub struct IrGen<'a> {
    options: &'a IrGenOptions,
    diagnostics: &'a dyn DiagnosticSink,
    registry: &'a TargetRegistry,
}

impl<'a> IrGen<'a> {
    pub fn new(
        options: &'a IrGenOptions,
        diagnostics: &'a dyn DiagnosticSink,
        registry: &'a TargetRegistry,
    ) -> Self {
        Self {
            options,
            diagnostics,
            registry,
        }
    }

    /// Generate code for `unit`.
    ///
    /// With `module` set, the unit is lowered into the caller's module instead of a fresh
    /// one. Any error has already been reported when this returns.
    pub fn run<'m>(
        &self,
        unit: &TranslationUnit,
        lowering: &mut dyn ModuleLowering,
        module: Option<&'m mut Module>,
        start_element: usize,
    ) -> IrGenResult<ModuleHandle<'m>> {
        self.run_observed(unit, lowering, module, start_element, &mut NullObserver)
    }

    /// [`run`](Self::run), reporting every pass execution to `observer`.
    pub fn run_observed<'m>(
        &self,
        unit: &TranslationUnit,
        lowering: &mut dyn ModuleLowering,
        module: Option<&'m mut Module>,
        start_element: usize,
        observer: &mut dyn PassObserver,
    ) -> IrGenResult<ModuleHandle<'m>> {
        let result = self.generate(unit, lowering, module, start_element, observer);
        self.report(result)
    }

    /// Optimize and emit a module with a machine the caller already created.
    ///
    /// The module is stamped with the machine's triple and data layout first.
    pub fn emit_with_machine(
        &self,
        module: &mut Module,
        machine: &dyn TargetMachine,
        debug_info: Option<(&TranslationUnit, &DebugInfoContext)>,
        observer: &mut dyn PassObserver,
    ) -> IrGenResult<()> {
        module.target_triple = machine.triple().to_string();
        module.data_layout = machine.data_layout().to_string();
        let result = self.emit(module, machine, debug_info, observer);
        self.report(result)
    }

    fn report<T>(&self, result: IrGenResult<T>) -> IrGenResult<T> {
        if let Err(err) = &result {
            match err.to_diagnostic() {
                Some(diagnostic) => self.diagnostics.diagnose(diagnostic),
                None => debug!("aborting after upstream errors"),
            }
        }
        result
    }

    fn module_name(&self, unit: &TranslationUnit) -> String {
        match &self.options.output_path {
            Some(path) if !path.as_os_str().is_empty() => path.display().to_string(),
            _ => unit.name.clone(),
        }
    }

    fn generate<'m>(
        &self,
        unit: &TranslationUnit,
        lowering: &mut dyn ModuleLowering,
        module: Option<&'m mut Module>,
        start_element: usize,
        observer: &mut dyn PassObserver,
    ) -> IrGenResult<ModuleHandle<'m>> {
        debug_assert!(
            !unit.has_errors,
            "translation unit with front-end errors reached code generation"
        );
        if unit.has_errors {
            return Err(IrGenError::Upstream);
        }

        let mut module = match module {
            Some(module) => ModuleHandle::Borrowed(module),
            None => ModuleHandle::Owned(Box::new(Module::new(self.module_name(unit)))),
        };
        module.target_triple = self.options.triple.clone();
        module.add_flag(FlagBehavior::Warning, DWARF_VERSION_FLAG, DWARF_VERSION);

        let machine = self.registry.lookup(&self.options.triple)?.create_machine(
            DEFAULT_CPU,
            DEFAULT_FEATURES,
            self.options.opt_level.into(),
        )?;
        module.data_layout = machine.data_layout().to_string();
        info!(
            "generating code for {} ({}, {})",
            unit.name, self.options.triple, self.options.opt_level
        );

        let scoped = ScopedDiagnostics::new(self.diagnostics);
        let debug_info = lowering.lower(unit, start_element, &mut module, &scoped);
        if scoped.had_error() {
            return Err(IrGenError::Upstream);
        }

        self.emit(&mut module, machine.as_ref(), Some((unit, &debug_info)), observer)?;
        Ok(module)
    }

    fn emit(
        &self,
        module: &mut Module,
        machine: &dyn TargetMachine,
        debug_info: Option<(&TranslationUnit, &DebugInfoContext)>,
        observer: &mut dyn PassObserver,
    ) -> IrGenResult<()> {
        let schedule = PipelineBuilder::new(self.options.opt_level)
            .verify(self.options.verify)
            .build();
        let mut emitter = Emitter::new(self.options, machine);
        if self.options.debug_info {
            if let Some((unit, context)) = debug_info {
                emitter = emitter.with_debug_info(unit, context);
            }
        }
        emitter.emit(module, &schedule, observer)?;
        Ok(())
    }
}

/// Generate code for `unit` against the built-in targets.
pub fn perform_ir_generation(
    options: &IrGenOptions,
    unit: &TranslationUnit,
    lowering: &mut dyn ModuleLowering,
    diagnostics: &dyn DiagnosticSink,
) -> IrGenResult<Module> {
    let registry = TargetRegistry::builtin();
    IrGen::new(options, diagnostics, &registry)
        .run(unit, lowering, None, 0)
        .map(ModuleHandle::into_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug_info::SourceLocation;
    use crate::diagnostics::{DiagId, DiagnosticEngine};
    use crate::ir::parse_module;
    use crate::lowering::TextualLowering;
    use crate::options::{OptLevel, OutputKind};
    use crate::passes::{PassPhase, PassTrace};
    use std::sync::Barrier;

    const SOURCE: &str = "define @main() {\nentry:\n  %a = const 2\n  ret %a\n}\n";

    #[test]
    fn test_module_is_stamped() {
        let _ = env_logger::builder().is_test(true).try_init();
        let options = IrGenOptions::new("x86_64-unknown-linux-gnu", OutputKind::InMemoryModule);
        let diags = DiagnosticEngine::new();
        let unit = TranslationUnit::new("demo", "demo.ir", SOURCE);
        let module = perform_ir_generation(&options, &unit, &mut TextualLowering, &diags).unwrap();

        assert_eq!(module.name, "demo");
        assert_eq!(module.target_triple, "x86_64-unknown-linux-gnu");
        assert!(module.data_layout.starts_with("e-m:e-"));
        let flag = module.flag(DWARF_VERSION_FLAG).unwrap();
        assert_eq!((flag.behavior, flag.value), (FlagBehavior::Warning, 3));
        assert!(diags.diagnostics().is_empty());
    }

    #[test]
    fn test_unknown_target_reported_once() {
        let options = IrGenOptions::new("bogus-triple-xyz", OutputKind::InMemoryModule);
        let diags = DiagnosticEngine::new();
        let unit = TranslationUnit::new("demo", "demo.ir", SOURCE);
        let err = perform_ir_generation(&options, &unit, &mut TextualLowering, &diags).unwrap_err();

        assert!(matches!(err, IrGenError::UnknownTarget { .. }));
        let reported = diags.diagnostics();
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].id, DiagId::NoTarget);
        assert!(reported[0].message.contains("bogus-triple-xyz"));
    }

    #[test]
    fn test_machine_creation_declined() {
        let options = IrGenOptions::new("x86_64-unknown-linux-gnux32", OutputKind::InMemoryModule);
        let diags = DiagnosticEngine::new();
        let unit = TranslationUnit::new("demo", "demo.ir", SOURCE);
        let err = perform_ir_generation(&options, &unit, &mut TextualLowering, &diags).unwrap_err();

        assert!(matches!(err, IrGenError::MachineCreation { .. }));
        assert_eq!(diags.diagnostics()[0].id, DiagId::NoTargetMachine);
    }

    #[test]
    fn test_lowering_errors_abort_silently() {
        let options = IrGenOptions::new("x86_64-unknown-linux-gnu", OutputKind::InMemoryModule);
        let diags = DiagnosticEngine::new();
        let unit = TranslationUnit::new("bad", "bad.ir", "define @f() {\n");
        let err = perform_ir_generation(&options, &unit, &mut TextualLowering, &diags).unwrap_err();

        assert!(matches!(err, IrGenError::Upstream));
        // Only the front end's own report.
        let reported = diags.diagnostics();
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].id, DiagId::Frontend);
    }

    #[test]
    fn test_borrowed_module_receives_output() {
        let options = IrGenOptions::new("x86_64-apple-darwin", OutputKind::InMemoryModule)
            .with_opt_level(OptLevel::O2);
        let diags = DiagnosticEngine::new();
        let registry = TargetRegistry::builtin();
        let unit = TranslationUnit::new("demo", "demo.ir", SOURCE);
        let mut module = Module::new("caller");
        {
            let handle = IrGen::new(&options, &diags, &registry)
                .run(&unit, &mut TextualLowering, Some(&mut module), 0)
                .unwrap();
            assert!(!handle.is_owned());
        }
        assert_eq!(module.name, "caller");
        assert!(module.data_layout.starts_with("e-m:o-"));
        assert_eq!(module.function_names(), vec!["main"]);
    }

    /// Parks inside lowering until the test lets it continue.
    struct Gated<'b> {
        reached: &'b Barrier,
        resume: &'b Barrier,
    }

    impl ModuleLowering for Gated<'_> {
        fn lower(
            &mut self,
            unit: &TranslationUnit,
            start_element: usize,
            module: &mut Module,
            diags: &dyn DiagnosticSink,
        ) -> DebugInfoContext {
            self.reached.wait();
            self.resume.wait();
            TextualLowering.lower(unit, start_element, module, diags)
        }
    }

    #[test]
    fn test_shared_sink_errors_do_not_abort_other_units() {
        let diags = DiagnosticEngine::new();
        let reached = Barrier::new(2);
        let resume = Barrier::new(2);
        let valid = IrGenOptions::new("x86_64-unknown-linux-gnu", OutputKind::InMemoryModule);
        let bogus = IrGenOptions::new("bogus-triple-xyz", OutputKind::InMemoryModule);
        let unit = TranslationUnit::new("demo", "demo.ir", SOURCE);

        let lowered = std::thread::scope(|scope| {
            let worker = scope.spawn(|| {
                let mut lowering = Gated {
                    reached: &reached,
                    resume: &resume,
                };
                perform_ir_generation(&valid, &unit, &mut lowering, &diags)
                    .map(|module| module.functions.len())
                    .map_err(|err| err.to_string())
            });
            // The worker is now inside lowering.
            reached.wait();
            let failed = perform_ir_generation(&bogus, &unit, &mut TextualLowering, &diags);
            resume.wait();
            assert!(matches!(failed, Err(IrGenError::UnknownTarget { .. })));
            worker.join().unwrap()
        });

        assert_eq!(lowered, Ok(1));
        let reported = diags.diagnostics();
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].id, DiagId::NoTarget);
    }

    #[test]
    fn test_emit_with_caller_machine() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempfile::tempdir().unwrap();
        let registry = TargetRegistry::builtin();
        let machine = registry
            .create_machine("x86_64-unknown-linux-gnu", OptLevel::O1)
            .unwrap();
        let unit = TranslationUnit::new("demo", "demo.ir", SOURCE);
        let mut context = DebugInfoContext::new("test");
        context.record(
            "main",
            SourceLocation {
                file: "demo.ir".into(),
                line: 1,
            },
        );

        for with_debug in [false, true] {
            let path = dir.path().join(format!("demo-{with_debug}.o"));
            let options = IrGenOptions::new("x86_64-unknown-linux-gnu", OutputKind::ObjectFile)
                .with_opt_level(OptLevel::O1)
                .with_output(&path)
                .with_debug_info(true);
            let diags = DiagnosticEngine::new();
            let mut module = parse_module(SOURCE).unwrap();
            let mut trace = PassTrace::new();
            IrGen::new(&options, &diags, &registry)
                .emit_with_machine(
                    &mut module,
                    machine.as_ref(),
                    with_debug.then_some((&unit, &context)),
                    &mut trace,
                )
                .unwrap();

            assert_eq!(module.target_triple, "x86_64-unknown-linux-gnu");
            assert_eq!(module.data_layout, machine.data_layout());
            let mut expected = vec!["x86-64-isel", "x86-64-asm-printer"];
            if with_debug {
                expected.push("debug-info-streamer");
            }
            assert_eq!(trace.names(PassPhase::Emit), expected);
            assert!(trace.position("rc-expand").is_some());
            assert!(diags.diagnostics().is_empty());
            assert!(std::fs::metadata(&path).unwrap().len() > 0);
        }
    }

    #[test]
    fn test_emit_with_caller_machine_reports_once() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TargetRegistry::builtin();

        let unopenable = dir.path().join("missing").join("out.o");
        let options = IrGenOptions::new("x86_64-unknown-linux-gnu", OutputKind::ObjectFile)
            .with_output(&unopenable);
        let machine = registry
            .create_machine("x86_64-unknown-linux-gnu", OptLevel::O0)
            .unwrap();
        let diags = DiagnosticEngine::new();
        let mut module = parse_module(SOURCE).unwrap();
        let err = IrGen::new(&options, &diags, &registry)
            .emit_with_machine(&mut module, machine.as_ref(), None, &mut NullObserver)
            .unwrap_err();
        assert!(matches!(err, IrGenError::OutputOpen { .. }));
        assert_eq!(diags.diagnostics().len(), 1);
        assert_eq!(diags.diagnostics()[0].id, DiagId::ErrorOpeningOutput);

        let arm = dir.path().join("arm.o");
        let options = IrGenOptions::new("aarch64-unknown-linux-gnu", OutputKind::ObjectFile)
            .with_output(&arm);
        let machine = registry
            .create_machine("aarch64-unknown-linux-gnu", OptLevel::O0)
            .unwrap();
        let diags = DiagnosticEngine::new();
        let mut module = parse_module(SOURCE).unwrap();
        let err = IrGen::new(&options, &diags, &registry)
            .emit_with_machine(&mut module, machine.as_ref(), None, &mut NullObserver)
            .unwrap_err();
        assert!(matches!(err, IrGenError::CodegenInit(_)));
        assert_eq!(module.data_layout, machine.data_layout());
        assert_eq!(diags.diagnostics().len(), 1);
        assert_eq!(diags.diagnostics()[0].id, DiagId::CodegenInitFailed);
        assert_eq!(std::fs::read(&arm).unwrap().len(), 0);
    }
}
