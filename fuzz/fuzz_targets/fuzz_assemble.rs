#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        // The assembler should never panic, and whatever it accepts must
        // survive a disassemble/assemble round trip.
        if let Ok(module) = spvkit_codec::assemble(text) {
            let rendered = spvkit_codec::disassemble(&module);
            let again = spvkit_codec::assemble(&rendered).expect("re-assemble of rendered text");
            assert_eq!(again.instructions, module.instructions);
        }
    }
});
