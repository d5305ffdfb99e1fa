//! Pass ordering as observed through a full driver invocation.

use irgen::ir::Op;
use irgen::passes::rc_expand::{RC_RELEASE_ENTRY, RC_RETAIN_ENTRY};
use irgen::{
    DiagnosticEngine, IrGen, IrGenOptions, OptLevel, OutputKind, PassPhase, PassTrace,
    TargetRegistry, TextualLowering, TranslationUnit,
};

const SOURCE: &str = "\
global @counter = [0]
declare @sink(%v)

define internal @square(%x) {
entry:
  %y = mul %x, %x
  ret %y
}

define @main(%obj) {
entry:
  rc.retain %obj
  rc.release %obj
  rc.retain %obj
  %p = addr @counter
  %three = const 3
  %n = call @square(%three)
  store %n, %p
  call @sink(%obj)
  rc.release %obj
  ret %n
}
";

fn run(level: OptLevel, verify: bool) -> (irgen::Module, PassTrace) {
    let _ = env_logger::builder().is_test(true).try_init();
    let options = IrGenOptions::new("x86_64-unknown-linux-gnu", OutputKind::InMemoryModule)
        .with_opt_level(level)
        .with_verify(verify);
    let diags = DiagnosticEngine::new();
    let registry = TargetRegistry::builtin();
    let unit = TranslationUnit::new("rc", "rc.ir", SOURCE);
    let mut trace = PassTrace::new();
    let module = IrGen::new(&options, &diags, &registry)
        .run_observed(&unit, &mut TextualLowering, None, 0, &mut trace)
        .unwrap()
        .into_owned();
    assert!(diags.diagnostics().is_empty());
    (module, trace)
}

#[test]
fn test_rc_passes_ordered_at_every_optimizing_level() {
    for level in [OptLevel::O1, OptLevel::O2, OptLevel::O3] {
        let (_, trace) = run(level, false);
        let modules = trace.names(PassPhase::Module);
        assert_eq!(
            modules,
            vec!["inline", "scalar-opt", "rc-opt", "global-dce", "rc-expand"],
            "{level}"
        );

        let rc_opt = trace.position("rc-opt").unwrap();
        assert!(trace.position("scalar-opt").unwrap() < rc_opt);
        let rc_expand = trace.position("rc-expand").unwrap();
        assert_eq!(rc_expand, trace.events.len() - 1);
    }
}

#[test]
fn test_function_stages_skip_declarations() {
    let (_, trace) = run(OptLevel::O1, false);
    let functions: Vec<Option<&str>> = trace
        .events
        .iter()
        .filter(|(phase, _, _)| *phase == PassPhase::Function)
        .map(|(_, _, function)| function.as_deref())
        .collect();
    assert_eq!(functions.len(), 6);
    assert!(functions.iter().all(|f| matches!(f, Some("square") | Some("main"))));
}

#[test]
fn test_no_rc_stage_or_inliner_at_o0() {
    let (module, trace) = run(OptLevel::O0, false);
    assert!(trace.is_empty());
    assert!(trace.position("inline").is_none());
    assert!(trace.position("rc-opt").is_none());
    assert!(trace.position("rc-expand").is_none());

    // Abstract operations survive untouched.
    let main = module.function("main").unwrap();
    let retains = main.blocks[0]
        .insts
        .iter()
        .filter(|i| matches!(i.op, Op::Retain(_)))
        .count();
    assert_eq!(retains, 2);
    assert!(module.function("square").is_some());
}

#[test]
fn test_optimized_module_contents() {
    let (module, _) = run(OptLevel::O2, false);

    // Inlined and then unreachable.
    assert!(module.function("square").is_none());
    let main = module.function("main").unwrap();
    assert!(main
        .blocks
        .iter()
        .flat_map(|b| &b.insts)
        .all(|i| !matches!(i.op, Op::Retain(_) | Op::Release(_))));

    let callees: Vec<&str> = main
        .blocks
        .iter()
        .flat_map(|b| &b.insts)
        .filter_map(|i| match &i.op {
            Op::Call { callee, .. } => Some(callee.as_str()),
            _ => None,
        })
        .collect();
    // The adjacent retain/release pair is gone; the pair around the call is expanded.
    assert_eq!(callees, vec![RC_RETAIN_ENTRY, "sink", RC_RELEASE_ENTRY]);
    assert!(module.function(RC_RETAIN_ENTRY).unwrap().is_declaration());
    assert!(module.function(RC_RELEASE_ENTRY).unwrap().is_declaration());
}

#[test]
fn test_verify_follows_both_stage_lists() {
    let (_, trace) = run(OptLevel::O1, true);
    let functions = trace.names(PassPhase::Function);
    assert_eq!(functions.last(), Some(&"verify"));
    let modules = trace.names(PassPhase::Module);
    assert_eq!(modules.last(), Some(&"verify"));
    assert_eq!(modules[modules.len() - 2], "rc-expand");

    let (_, trace) = run(OptLevel::O0, true);
    assert_eq!(trace.names(PassPhase::Function), vec!["verify"]);
    assert_eq!(trace.names(PassPhase::Module), vec!["verify"]);
}
