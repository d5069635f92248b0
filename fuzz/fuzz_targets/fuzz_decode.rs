#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // The binary decoder should never panic on any byte stream, and a
    // successful decode must re-encode without loss.
    if let Ok(module) = spvkit_codec::decode_module(data) {
        let bytes = spvkit_codec::encode_module(&module);
        let again = spvkit_codec::decode_module(&bytes).expect("re-decode of encoded module");
        assert_eq!(again, module);
    }
});
