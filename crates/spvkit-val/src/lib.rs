//! Bridge to the external reference validator.
//!
//! Runs the validator as a sub-process with the assembled binary piped to
//! its standard input. Exit code zero means the module validates; any
//! other exit code surfaces the validator's standard error verbatim as
//! [`ValidatorError::ValidationFailed`]. The message is never interpreted.

use std::io::Write;
use std::process::{Command, Stdio};

/// The validator program used when none is configured.
pub const DEFAULT_PROGRAM: &str = "spirv-val";

/// Errors from invoking the external validator.
#[derive(Debug, thiserror::Error)]
pub enum ValidatorError {
    /// The validator program could not be launched or piped to.
    #[error("failed to run validator '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The validator rejected the module; `message` is its stderr.
    #[error("validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Configuration for the external validator invocation.
#[derive(Clone, Debug)]
pub struct Validator {
    program: String,
    extra_args: Vec<String>,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM)
    }
}

impl Validator {
    /// A validator invoking the given program.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            extra_args: Vec::new(),
        }
    }

    /// Appends an extra command-line argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    /// The configured program name.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Validates an encoded module, piping it to the validator's stdin.
    pub fn validate(&self, binary: &[u8]) -> Result<(), ValidatorError> {
        let launch = |source| ValidatorError::Launch {
            program: self.program.clone(),
            source,
        };

        let mut child = Command::new(&self.program)
            .args(&self.extra_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(launch)?;

        child
            .stdin
            .take()
            .expect("stdin was piped")
            .write_all(binary)
            .map_err(launch)?;

        let output = child.wait_with_output().map_err(launch)?;
        if output.status.success() {
            log::debug!("validator accepted {} bytes", binary.len());
            Ok(())
        } else {
            Err(ValidatorError::ValidationFailed {
                message: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_program_is_a_launch_error() {
        let validator = Validator::new("spvkit-no-such-validator");
        match validator.validate(&[0, 1, 2, 3]) {
            Err(ValidatorError::Launch { program, .. }) => {
                assert_eq!(program, "spvkit-no-such-validator");
            }
            other => panic!("expected launch error, got {other:?}"),
        }
    }

    #[test]
    fn exit_zero_is_success() {
        // `true` ignores stdin and exits 0.
        let validator = Validator::new("true");
        assert!(validator.validate(&[]).is_ok());
    }

    #[test]
    fn nonzero_exit_carries_stderr() {
        // A shell that writes to stderr and fails stands in for the
        // reference validator rejecting a module.
        let validator = Validator::new("sh")
            .arg("-c")
            .arg("cat >/dev/null; echo 'error: bad module' >&2; exit 1");
        match validator.validate(&[0x03, 0x02, 0x23, 0x07]) {
            Err(ValidatorError::ValidationFailed { message }) => {
                assert!(message.contains("bad module"));
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn default_program() {
        assert_eq!(Validator::default().program(), DEFAULT_PROGRAM);
    }
}
