#![no_main]
use gradsym_exec::{ExecConfig, SExecutor, SymState};
use gradsym_solver::GdOptimizer;
use libfuzzer_sys::fuzz_target;
use std::collections::HashSet;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok((_, prog)) = gradsym_ir::compile(s) {
            let optimizer = GdOptimizer {
                num_epochs: 20,
                ..GdOptimizer::default()
            };
            let config = ExecConfig {
                max_sat: 64,
                max_unsat: 64,
                max_num_trials: 2,
                ..ExecConfig::default()
            };
            let mut executor = SExecutor::new(optimizer, config);
            executor.run(&prog, &HashSet::new(), SymState::new(), 256);
        }
    }
});
