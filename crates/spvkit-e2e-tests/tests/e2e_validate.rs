mod common;

use common::minimal_shader;
use spvkit_codec::encode_module;
use spvkit_val::{Validator, ValidatorError};

#[test]
fn accepting_validator_passes_the_assembled_binary() {
    // `cat` consumes the piped module and exits 0, standing in for a
    // reference validator that accepts the module.
    let bytes = encode_module(&minimal_shader());
    let validator = Validator::new("sh").arg("-c").arg("cat >/dev/null");
    validator.validate(&bytes).unwrap();
}

#[test]
fn rejecting_validator_surfaces_its_stderr() {
    let bytes = encode_module(&minimal_shader());
    let validator = Validator::new("sh")
        .arg("-c")
        .arg("cat >/dev/null; echo 'error: line 1: bad module' >&2; exit 1");
    match validator.validate(&bytes) {
        Err(ValidatorError::ValidationFailed { message }) => {
            assert!(message.contains("bad module"));
        }
        other => panic!("expected validation failure, got {other:?}"),
    }
}

#[test]
fn missing_validator_program_is_a_launch_error() {
    let bytes = encode_module(&minimal_shader());
    let validator = Validator::new("spvkit-validator-that-does-not-exist");
    assert!(matches!(
        validator.validate(&bytes),
        Err(ValidatorError::Launch { .. })
    ));
}
