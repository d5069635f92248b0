//! Binary and textual codecs for SPIR-V modules.
//!
//! The binary side reads and writes the word-stream format (5-word header,
//! instructions prefixed with `(word_count << 16) | opcode`), detecting
//! byte order from the magic word. The textual side is a line-oriented
//! disassembly that round-trips through [`assemble`].

mod binary;
mod text;
mod words;

pub use binary::{decode_module, encode_module, instruction_word_count};
pub use text::{assemble, disassemble, semantically_equal};

/// Errors from the binary or textual codec.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The stream does not start with a recognizable header.
    #[error("malformed module header")]
    MalformedHeader,

    /// An instruction's word count runs past the end of the stream.
    #[error("truncated stream: instruction at word {position} wants {wanted} words, {available} remain")]
    TruncatedStream {
        position: usize,
        wanted: usize,
        available: usize,
    },

    /// An opcode value outside the modeled instruction set.
    #[error("unknown opcode {0}")]
    UnknownOpcode(u16),

    /// Operand words that do not fit the opcode's grammar layout.
    #[error("operand {index} of {opcode} does not match its grammar kind")]
    UnknownOperandKind { opcode: &'static str, index: usize },

    /// A zero word count in an instruction prefix.
    #[error("zero word count at word {position}")]
    InvalidWordCount { position: usize },

    /// A zero word in an id slot.
    #[error("zero id operand in {opcode}")]
    InvalidId { opcode: &'static str },

    /// A literal string that is unterminated or not UTF-8.
    #[error("invalid literal string")]
    InvalidString,

    /// A textual assembly parse error.
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },
}
