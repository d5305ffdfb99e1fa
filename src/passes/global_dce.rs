//! Removal of internal functions and globals that no external symbol can reach.

use crate::ir::{Linkage, Module};
use log::debug;
use std::collections::HashSet;

pub fn run(module: &mut Module) -> bool {
    let mut live: HashSet<String> = HashSet::new();
    let mut worklist: Vec<String> = module
        .functions
        .iter()
        .map(|f| (&f.name, f.linkage))
        .chain(module.globals.iter().map(|g| (&g.name, g.linkage)))
        .filter(|(_, linkage)| *linkage == Linkage::External)
        .map(|(name, _)| name.clone())
        .collect();

    while let Some(name) = worklist.pop() {
        if !live.insert(name.clone()) {
            continue;
        }
        if let Some(function) = module.function(&name) {
            worklist.extend(
                function
                    .referenced_symbols()
                    .into_iter()
                    .filter(|s| !live.contains(*s))
                    .map(str::to_string),
            );
        }
    }

    let before = module.functions.len() + module.globals.len();
    module.functions.retain(|f| {
        let keep = live.contains(&f.name);
        if !keep {
            debug!("global-dce: removing function @{}", f.name);
        }
        keep
    });
    module.globals.retain(|g| {
        let keep = live.contains(&g.name);
        if !keep {
            debug!("global-dce: removing global @{}", g.name);
        }
        keep
    });
    module.functions.len() + module.globals.len() != before
}
