//! The instruction record: the atomic unit of the binary encoding.

use crate::grammar::{EnumKind, Opcode};
use crate::id::Id;
use crate::types::MemoryAccess;

/// A single instruction operand.
///
/// The shape of an instruction's operand list is defined by the grammar
/// table for its opcode; the codec materializes operands eagerly as this
/// tagged variant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operand {
    /// A reference to a result id.
    IdRef(Id),
    /// One literal word.
    Literal(u32),
    /// A NUL-terminated UTF-8 string.
    LiteralString(String),
    /// A value (or combined bit mask) of a known enumeration.
    Enum(EnumKind, u32),
}

impl Operand {
    /// The referenced id, if this operand is an id reference.
    pub fn id(&self) -> Option<Id> {
        match *self {
            Self::IdRef(id) => Some(id),
            _ => None,
        }
    }

    /// The literal word, if this operand is a plain literal.
    pub fn literal(&self) -> Option<u32> {
        match *self {
            Self::Literal(value) => Some(value),
            _ => None,
        }
    }

    /// The enum value, if this operand is an enum of the given kind.
    pub fn enum_value(&self, kind: EnumKind) -> Option<u32> {
        match *self {
            Self::Enum(k, value) if k == kind => Some(value),
            _ => None,
        }
    }

    /// The string, if this operand is a literal string.
    pub fn string(&self) -> Option<&str> {
        match self {
            Self::LiteralString(s) => Some(s),
            _ => None,
        }
    }
}

/// An instruction: opcode, optional result slots, and operands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    /// The result-type id, when the grammar gives the opcode one.
    pub result_type: Option<Id>,
    /// The result id, when the grammar gives the opcode one.
    pub result: Option<Id>,
    pub operands: Vec<Operand>,
}

impl Instruction {
    /// A resultless instruction with the given operands.
    pub fn new(opcode: Opcode, operands: Vec<Operand>) -> Self {
        Self {
            opcode,
            result_type: None,
            result: None,
            operands,
        }
    }

    /// An instruction defining `result` (no result type).
    pub fn with_result(opcode: Opcode, result: Id, operands: Vec<Operand>) -> Self {
        Self {
            opcode,
            result_type: None,
            result: Some(result),
            operands,
        }
    }

    /// An instruction defining `result` of type `result_type`.
    pub fn with_result_type(
        opcode: Opcode,
        result_type: Id,
        result: Id,
        operands: Vec<Operand>,
    ) -> Self {
        Self {
            opcode,
            result_type: Some(result_type),
            result: Some(result),
            operands,
        }
    }

    /// The id operand at `index`, if present and an id.
    pub fn id_at(&self, index: usize) -> Option<Id> {
        self.operands.get(index).and_then(Operand::id)
    }

    /// The literal operand at `index`, if present and a literal.
    pub fn literal_at(&self, index: usize) -> Option<u32> {
        self.operands.get(index).and_then(Operand::literal)
    }

    /// The string operand at `index`, if present and a string.
    pub fn string_at(&self, index: usize) -> Option<&str> {
        self.operands.get(index).and_then(Operand::string)
    }

    /// All ids this instruction references as operands (not its results).
    pub fn operand_ids(&self) -> impl Iterator<Item = Id> + '_ {
        self.operands.iter().filter_map(Operand::id)
    }

    /// The memory-access mask of a load, store, or memory copy, when the
    /// optional operand is present.
    pub fn memory_access(&self) -> Option<MemoryAccess> {
        if !matches!(
            self.opcode,
            Opcode::Load | Opcode::Store | Opcode::CopyMemory
        ) {
            return None;
        }
        self.operands
            .iter()
            .find_map(|op| op.enum_value(EnumKind::MemoryAccess))
            .map(MemoryAccess::from_bits)
    }
}
