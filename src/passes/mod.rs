// This module holds the optimization stages the pipeline schedules and the PassManager
// that runs them. A Stage is a plain identifier; the manager maps each one onto a
// transform over a single function (simplify-cfg, const-fold, dce) or over the whole
// module (inline, scalar-opt, global-dce and the two reference-counting transforms).
// Function stages run over every function with a body, all stages for one function before
// the next function; module stages then run once each, in order. Verification is a stage
// too, executed by the manager itself so that it sees the whole module. Every executed
// stage is reported to a PassObserver, which is how callers (and the tests) check which
// passes ran and in what order.

//! Optimization stages and the pass manager.

use crate::ir::{verify_module, Function, Module, VerifyError};
use crate::pipeline::PassSchedule;
use log::{debug, trace, warn};
use std::fmt;

pub mod const_fold;
pub mod dce;
pub mod global_dce;
pub mod inline;
pub mod rc_expand;
pub mod rc_opt;
pub mod simplify_cfg;

/// Cost threshold of the inliner, in instructions.
pub const INLINE_THRESHOLD: usize = 200;

/// A transform the pipeline can schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    SimplifyCfg,
    ConstFold,
    DeadCodeElim,
    Inline { threshold: usize },
    /// const-fold, simplify-cfg and dce over every defined function.
    ScalarOpt,
    GlobalDce,
    /// Redundant retain/release pair elimination.
    RcOptimize,
    /// Lowering of abstract retain/release into runtime calls.
    RcExpand,
    Verify,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::SimplifyCfg => "simplify-cfg",
            Stage::ConstFold => "const-fold",
            Stage::DeadCodeElim => "dce",
            Stage::Inline { .. } => "inline",
            Stage::ScalarOpt => "scalar-opt",
            Stage::GlobalDce => "global-dce",
            Stage::RcOptimize => "rc-opt",
            Stage::RcExpand => "rc-expand",
            Stage::Verify => "verify",
        }
    }

    /// Whether the stage transforms one function at a time.
    pub fn is_function_local(self) -> bool {
        matches!(
            self,
            Stage::SimplifyCfg | Stage::ConstFold | Stage::DeadCodeElim
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Inline { threshold } => write!(f, "inline({threshold})"),
            other => f.write_str(other.name()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassPhase {
    Function,
    Module,
    Emit,
}

/// One executed pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassEvent<'a> {
    pub phase: PassPhase,
    pub pass: &'a str,
    /// Set for function stages.
    pub function: Option<&'a str>,
}

/// Receives an event for every pass the pipeline or the emitter executes.
pub trait PassObserver {
    fn on_pass(&mut self, event: &PassEvent<'_>);
}

/// Observer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl PassObserver for NullObserver {
    fn on_pass(&mut self, _event: &PassEvent<'_>) {}
}

impl<F> PassObserver for F
where
    F: FnMut(&PassEvent<'_>),
{
    fn on_pass(&mut self, event: &PassEvent<'_>) {
        self(event)
    }
}

/// Observer that records every event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassTrace {
    pub events: Vec<(PassPhase, String, Option<String>)>,
}

impl PassTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pass names of one phase, in execution order.
    pub fn names(&self, phase: PassPhase) -> Vec<&str> {
        self.events
            .iter()
            .filter(|(p, _, _)| *p == phase)
            .map(|(_, name, _)| name.as_str())
            .collect()
    }

    /// Position of the first execution of `pass` in the whole trace.
    pub fn position(&self, pass: &str) -> Option<usize> {
        self.events.iter().position(|(_, name, _)| name == pass)
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl PassObserver for PassTrace {
    fn on_pass(&mut self, event: &PassEvent<'_>) {
        self.events.push((
            event.phase,
            event.pass.to_string(),
            event.function.map(str::to_string),
        ));
    }
}

/// Runs the function and module stages of a [`PassSchedule`].
pub struct PassManager<'o> {
    observer: &'o mut dyn PassObserver,
}

impl<'o> PassManager<'o> {
    pub fn new(observer: &'o mut dyn PassObserver) -> Self {
        Self { observer }
    }

    pub fn run(&mut self, module: &mut Module, schedule: &PassSchedule) -> Result<(), VerifyError> {
        self.run_function_stages(module, &schedule.realized_function_order())?;
        self.run_module_stages(module, &schedule.realized_module_order())
    }

    /// Run function-local stages over every defined function, then any verify stage.
    pub fn run_function_stages(
        &mut self,
        module: &mut Module,
        stages: &[Stage],
    ) -> Result<(), VerifyError> {
        let (verify, transforms): (Vec<Stage>, Vec<Stage>) =
            stages.iter().partition(|s| **s == Stage::Verify);

        for function in module.functions.iter_mut().filter(|f| !f.is_declaration()) {
            for &stage in &transforms {
                self.observer.on_pass(&PassEvent {
                    phase: PassPhase::Function,
                    pass: stage.name(),
                    function: Some(&function.name),
                });
                let changed = run_function_stage(stage, function);
                trace!("{stage} on @{}: changed={changed}", function.name);
            }
        }

        for _ in verify {
            self.observer.on_pass(&PassEvent {
                phase: PassPhase::Function,
                pass: Stage::Verify.name(),
                function: None,
            });
            verify_module(module)?;
        }
        Ok(())
    }

    pub fn run_module_stages(
        &mut self,
        module: &mut Module,
        stages: &[Stage],
    ) -> Result<(), VerifyError> {
        for &stage in stages {
            self.observer.on_pass(&PassEvent {
                phase: PassPhase::Module,
                pass: stage.name(),
                function: None,
            });
            if stage == Stage::Verify {
                verify_module(module)?;
                continue;
            }
            let changed = run_module_stage(stage, module);
            debug!("module stage {stage}: changed={changed}");
        }
        Ok(())
    }
}

fn run_function_stage(stage: Stage, function: &mut Function) -> bool {
    match stage {
        Stage::SimplifyCfg => simplify_cfg::run(function),
        Stage::ConstFold => const_fold::run(function),
        Stage::DeadCodeElim => dce::run(function),
        other => {
            warn!("{other} is not a function-local stage; skipped");
            false
        }
    }
}

fn run_module_stage(stage: Stage, module: &mut Module) -> bool {
    match stage {
        Stage::Inline { threshold } => inline::run(module, threshold),
        Stage::ScalarOpt => scalar_opt(module),
        Stage::GlobalDce => global_dce::run(module),
        Stage::RcOptimize => rc_opt::run(module),
        Stage::RcExpand => rc_expand::run(module),
        Stage::Verify => false,
        local => {
            let mut changed = false;
            for function in module.functions.iter_mut().filter(|f| !f.is_declaration()) {
                changed |= run_function_stage(local, function);
            }
            changed
        }
    }
}

fn scalar_opt(module: &mut Module) -> bool {
    let mut changed = false;
    for function in module.functions.iter_mut().filter(|f| !f.is_declaration()) {
        changed |= const_fold::run(function);
        changed |= simplify_cfg::run(function);
        changed |= dce::run(function);
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parse_module;
    use crate::options::OptLevel;
    use crate::pipeline::PipelineBuilder;

    const SAMPLE: &str = "declare @ext(%a)\n\
        define @f(%x) {\nentry:\n  %a = const 2\n  %b = const 3\n  %c = mul %a, %b\n  ret %c\n}\n\
        define @main() {\nentry:\n  %v = call @f(%v0)\n  call @ext(%v)\n  ret\n}\n";

    #[test]
    fn test_function_stages_skip_declarations() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut module = parse_module(
            "declare @ext(%a)\ndefine @f() {\nentry:\n  %a = const 1\n  ret %a\n}\n",
        )
        .unwrap();
        let schedule = PipelineBuilder::new(OptLevel::O1).build();
        let mut trace = PassTrace::new();
        PassManager::new(&mut trace).run(&mut module, &schedule).unwrap();

        let functions: Vec<_> = trace
            .events
            .iter()
            .filter(|(p, _, _)| *p == PassPhase::Function)
            .map(|(_, _, f)| f.clone())
            .collect();
        assert_eq!(functions.len(), 3);
        assert!(functions.iter().all(|f| f.as_deref() == Some("f")));
    }

    #[test]
    fn test_verify_stage_reports_failure() {
        let mut module = parse_module(SAMPLE).unwrap();
        let schedule = PipelineBuilder::new(OptLevel::O0).verify(true).build();
        let err = PassManager::new(&mut NullObserver).run(&mut module, &schedule).unwrap_err();
        assert!(err.to_string().contains("undefined value %v0"), "{err}");
    }

    #[test]
    fn test_closure_observer() {
        let mut module = parse_module("define @f() {\nentry:\n  ret\n}\n").unwrap();
        let schedule = PipelineBuilder::new(OptLevel::O2).build();
        let mut count = 0;
        let mut observer = |_: &PassEvent<'_>| count += 1;
        PassManager::new(&mut observer).run(&mut module, &schedule).unwrap();
        // three function stages plus five module stages
        assert_eq!(count, 8);
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(
            Stage::Inline { threshold: INLINE_THRESHOLD }.to_string(),
            "inline(200)"
        );
        assert_eq!(Stage::RcExpand.to_string(), "rc-expand");
        assert!(Stage::DeadCodeElim.is_function_local());
        assert!(!Stage::GlobalDce.is_function_local());
    }
}
