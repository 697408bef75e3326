#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok((_, program)) = gradsym_syntax::parse(s) {
            let _ = gradsym_ir::compile_ast(&program);
        }
    }
});
