// This module builds the optimization schedule for one invocation. A PassSchedule lists
// function-level stages and module-level entries; two of the module entries are slot
// markers (late-scalar and optimizer-last) where the reference-counting transforms are
// spliced in. Below -O1 the schedule is empty apart from the markers and both slots stay
// empty, so no inliner and no reference-counting transform ever runs at -O0. A
// PassSchedule is immutable once built; the realized_* accessors return the flattened
// stage order the PassManager executes, including the trailing verify stages when
// verification is on.

//! Optimization pipeline construction.

use crate::options::OptLevel;
use crate::passes::{Stage, INLINE_THRESHOLD};
use log::debug;

/// Named insertion points inside the module-level schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtensionPoint {
    /// After the scalar optimizer.
    ScalarOptimizerLate,
    /// After every other optimization.
    OptimizerLast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineEntry {
    Stage(Stage),
    Slot(ExtensionPoint),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassSchedule {
    pub opt_level: OptLevel,
    pub function_stages: Vec<Stage>,
    pub module_entries: Vec<PipelineEntry>,
    pub late_scalar: Vec<Stage>,
    pub optimizer_last: Vec<Stage>,
    pub verify: bool,
}

impl PassSchedule {
    pub fn extension(&self, point: ExtensionPoint) -> &[Stage] {
        match point {
            ExtensionPoint::ScalarOptimizerLate => &self.late_scalar,
            ExtensionPoint::OptimizerLast => &self.optimizer_last,
        }
    }

    pub fn realized_function_order(&self) -> Vec<Stage> {
        let mut order = self.function_stages.clone();
        if self.verify {
            order.push(Stage::Verify);
        }
        order
    }

    pub fn realized_module_order(&self) -> Vec<Stage> {
        let mut order = Vec::new();
        for entry in &self.module_entries {
            match *entry {
                PipelineEntry::Stage(stage) => order.push(stage),
                PipelineEntry::Slot(point) => order.extend_from_slice(self.extension(point)),
            }
        }
        if self.verify {
            order.push(Stage::Verify);
        }
        order
    }

    pub fn has_inliner(&self) -> bool {
        self.realized_module_order()
            .iter()
            .any(|s| matches!(s, Stage::Inline { .. }))
    }
}

pub struct PipelineBuilder {
    opt_level: OptLevel,
    verify: bool,
}

impl PipelineBuilder {
    pub fn new(opt_level: OptLevel) -> Self {
        Self {
            opt_level,
            verify: false,
        }
    }

    pub fn verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn build(&self) -> PassSchedule {
        let optimizing = self.opt_level.is_optimizing();
        let mut module_entries = Vec::new();
        if optimizing {
            module_entries.push(PipelineEntry::Stage(Stage::Inline {
                threshold: INLINE_THRESHOLD,
            }));
            module_entries.push(PipelineEntry::Stage(Stage::ScalarOpt));
        }
        module_entries.push(PipelineEntry::Slot(ExtensionPoint::ScalarOptimizerLate));
        if optimizing {
            module_entries.push(PipelineEntry::Stage(Stage::GlobalDce));
        }
        module_entries.push(PipelineEntry::Slot(ExtensionPoint::OptimizerLast));

        let schedule = PassSchedule {
            opt_level: self.opt_level,
            function_stages: if optimizing {
                vec![Stage::SimplifyCfg, Stage::ConstFold, Stage::DeadCodeElim]
            } else {
                Vec::new()
            },
            module_entries,
            late_scalar: if optimizing {
                vec![Stage::RcOptimize]
            } else {
                Vec::new()
            },
            optimizer_last: if optimizing {
                vec![Stage::RcExpand]
            } else {
                Vec::new()
            },
            verify: self.verify,
        };
        debug!(
            "pipeline {}: function={:?} module={:?}",
            self.opt_level,
            schedule.realized_function_order(),
            schedule.realized_module_order()
        );
        schedule
    }
}
