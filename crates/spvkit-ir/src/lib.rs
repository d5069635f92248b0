//! spvkit intermediate representation.
//!
//! An id-addressed, deduplicated module model for SPIR-V: instructions,
//! grammar tables, the algebraic type system, and the structured module
//! with its lowering passes to and from the flat instruction stream.

mod emit;
mod error;
pub mod grammar;
mod id;
mod instruction;
mod lower;
mod module;
mod raw;
mod types;

pub use error::ModuleError;
pub use id::{Id, IdMap, IdSet};
pub use instruction::{Instruction, Operand};
pub use module::{
    Block, DebugInfo, DecorationMap, EntryPoint, ExecutionModeDecl, FunctionBuilder, FunctionDef,
    GlobalVariable, MemoryModelDecl, MergeDecl, Module, ModuleMeta, SourceInfo,
};
pub use raw::{RawModule, DEFAULT_VERSION, GENERATOR, HEADER_WORDS, MAGIC, MAGIC_SWAPPED};
pub use types::{FunctionControl, LoopControl, MemoryAccess, SelectionControl, Type};
