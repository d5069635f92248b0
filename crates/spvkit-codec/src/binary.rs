//! Grammar-driven binary decode and encode of the instruction stream.

use spvkit_ir::grammar::{Opcode, OperandKind, Quantifier};
use spvkit_ir::{Id, Instruction, Operand, RawModule, HEADER_WORDS, MAGIC};

use crate::words::{decode_words, encode_words, pack_string, string_word_count, WordCursor};
use crate::CodecError;

/// Decodes a byte stream into a flat module.
pub fn decode_module(bytes: &[u8]) -> Result<RawModule, CodecError> {
    let words = decode_words(bytes)?;
    let mut module = RawModule {
        magic: MAGIC,
        version: words[1],
        generator: words[2],
        bound: words[3],
        schema: words[4],
        instructions: Vec::new(),
    };

    let mut pos = HEADER_WORDS;
    while pos < words.len() {
        let packed = words[pos];
        let word_count = (packed >> 16) as usize;
        let opcode_value = (packed & 0xffff) as u16;
        if word_count == 0 {
            return Err(CodecError::InvalidWordCount { position: pos });
        }
        if pos + word_count > words.len() {
            return Err(CodecError::TruncatedStream {
                position: pos,
                wanted: word_count,
                available: words.len() - pos,
            });
        }
        let opcode =
            Opcode::from_u16(opcode_value).ok_or(CodecError::UnknownOpcode(opcode_value))?;
        let inst = decode_instruction(opcode, &words[pos + 1..pos + word_count])?;
        module.instructions.push(inst);
        pos += word_count;
    }

    log::debug!(
        "decoded {} instructions (bound {})",
        module.instructions.len(),
        module.bound
    );
    Ok(module)
}

/// Decodes one instruction's operand words according to its grammar layout.
fn decode_instruction(opcode: Opcode, operand_words: &[u32]) -> Result<Instruction, CodecError> {
    let layout = opcode.layout();
    let name = opcode.name();
    let mut cursor = WordCursor::new(name, operand_words);

    let result_type = if layout.has_result_type {
        Some(read_id(&mut cursor, name)?)
    } else {
        None
    };
    let result = if layout.has_result {
        Some(read_id(&mut cursor, name)?)
    } else {
        None
    };

    let mut operands = Vec::new();
    for (index, spec) in layout.operands.iter().enumerate() {
        match spec.quantifier {
            Quantifier::Required => {
                if cursor.is_empty() {
                    return Err(CodecError::UnknownOperandKind {
                        opcode: name,
                        index,
                    });
                }
                read_operand(&mut cursor, name, spec.kind, &mut operands)?;
            }
            Quantifier::Optional => {
                if !cursor.is_empty() {
                    read_operand(&mut cursor, name, spec.kind, &mut operands)?;
                }
            }
            Quantifier::Variadic => {
                while !cursor.is_empty() {
                    read_operand(&mut cursor, name, spec.kind, &mut operands)?;
                }
            }
        }
    }

    if !cursor.is_empty() {
        return Err(CodecError::UnknownOperandKind {
            opcode: name,
            index: layout.operands.len(),
        });
    }

    Ok(Instruction {
        opcode,
        result_type,
        result,
        operands,
    })
}

fn read_id(cursor: &mut WordCursor<'_>, opcode: &'static str) -> Result<Id, CodecError> {
    let word = cursor.read()?;
    Id::new(word).ok_or(CodecError::InvalidId { opcode })
}

fn read_operand(
    cursor: &mut WordCursor<'_>,
    opcode: &'static str,
    kind: OperandKind,
    out: &mut Vec<Operand>,
) -> Result<(), CodecError> {
    match kind {
        OperandKind::IdRef => out.push(Operand::IdRef(read_id(cursor, opcode)?)),
        OperandKind::LiteralInteger | OperandKind::LiteralContextDependent => {
            out.push(Operand::Literal(cursor.read()?));
        }
        OperandKind::LiteralString => {
            out.push(Operand::LiteralString(cursor.read_string()?));
        }
        OperandKind::PairLiteralIdRef => {
            out.push(Operand::Literal(cursor.read()?));
            out.push(Operand::IdRef(read_id(cursor, opcode)?));
        }
        OperandKind::Enum(enum_kind) => {
            out.push(Operand::Enum(enum_kind, cursor.read()?));
        }
    }
    Ok(())
}

/// Encodes a flat module to bytes, in host order with the canonical magic.
pub fn encode_module(module: &RawModule) -> Vec<u8> {
    let mut words = vec![
        MAGIC,
        module.version,
        module.generator,
        module.bound,
        module.schema,
    ];

    for inst in &module.instructions {
        let start = words.len();
        words.push(0); // patched below
        if let Some(id) = inst.result_type {
            words.push(id.get());
        }
        if let Some(id) = inst.result {
            words.push(id.get());
        }
        for operand in &inst.operands {
            match operand {
                Operand::IdRef(id) => words.push(id.get()),
                Operand::Literal(value) => words.push(*value),
                Operand::Enum(_, value) => words.push(*value),
                Operand::LiteralString(s) => words.extend(pack_string(s)),
            }
        }
        let word_count = (words.len() - start) as u32;
        words[start] = (word_count << 16) | u32::from(inst.opcode as u16);
    }

    encode_words(&words)
}

/// The encoded word count of an instruction, including its prefix word.
pub fn instruction_word_count(inst: &Instruction) -> usize {
    let mut count = 1;
    count += usize::from(inst.result_type.is_some());
    count += usize::from(inst.result.is_some());
    for operand in &inst.operands {
        count += match operand {
            Operand::LiteralString(s) => string_word_count(s),
            _ => 1,
        };
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use spvkit_ir::grammar::EnumKind;

    fn id(raw: u32) -> Id {
        Id::new(raw).unwrap()
    }

    fn sample_module() -> RawModule {
        let mut raw = RawModule::new();
        raw.instructions = vec![
            Instruction::new(
                Opcode::Capability,
                vec![Operand::Enum(EnumKind::Capability, 1)],
            ),
            Instruction::new(
                Opcode::MemoryModel,
                vec![
                    Operand::Enum(EnumKind::AddressingModel, 0),
                    Operand::Enum(EnumKind::MemoryModel, 1),
                ],
            ),
            Instruction::with_result(Opcode::TypeFloat, id(2), vec![Operand::Literal(32)]),
            Instruction::new(
                Opcode::Name,
                vec![Operand::IdRef(id(2)), Operand::LiteralString("float".into())],
            ),
        ];
        raw.bound = 3;
        raw
    }

    #[test]
    fn encode_decode_round_trip() {
        let module = sample_module();
        let bytes = encode_module(&module);
        let decoded = decode_module(&bytes).unwrap();
        assert_eq!(decoded, module);
        // And re-encoding is byte-identical.
        assert_eq!(encode_module(&decoded), bytes);
    }

    #[test]
    fn decode_handles_swapped_stream() {
        let module = sample_module();
        let bytes = encode_module(&module);
        let swapped: Vec<u8> = bytes
            .chunks_exact(4)
            .flat_map(|chunk| {
                let mut c: [u8; 4] = chunk.try_into().unwrap();
                c.reverse();
                c
            })
            .collect();
        let decoded = decode_module(&swapped).unwrap();
        assert_eq!(decoded, module);
        // Emitting the decoded module matches the host-order original.
        assert_eq!(encode_module(&decoded), bytes);
    }

    #[test]
    fn truncated_instruction_is_reported() {
        let module = sample_module();
        let mut bytes = encode_module(&module);
        bytes.truncate(bytes.len() - 4);
        assert!(matches!(
            decode_module(&bytes),
            Err(CodecError::TruncatedStream { .. })
        ));
    }

    #[test]
    fn zero_word_count_is_reported() {
        let mut words = vec![MAGIC, 0x0001_0600, 0, 2, 0];
        words.push(u32::from(Opcode::Nop as u16)); // word count 0
        let bytes = encode_words(&words);
        assert!(matches!(
            decode_module(&bytes),
            Err(CodecError::InvalidWordCount { .. })
        ));
    }

    #[test]
    fn unknown_opcode_is_reported() {
        let mut words = vec![MAGIC, 0x0001_0600, 0, 2, 0];
        words.push((1 << 16) | 9999);
        let bytes = encode_words(&words);
        assert!(matches!(
            decode_module(&bytes),
            Err(CodecError::UnknownOpcode(9999))
        ));
    }

    #[test]
    fn zero_id_is_reported() {
        // OpTypeFloat with result id 0.
        let mut words = vec![MAGIC, 0x0001_0600, 0, 2, 0];
        words.push((3 << 16) | u32::from(Opcode::TypeFloat as u16));
        words.push(0);
        words.push(32);
        let bytes = encode_words(&words);
        assert!(matches!(
            decode_module(&bytes),
            Err(CodecError::InvalidId { .. })
        ));
    }

    #[test]
    fn switch_pairs_decode() {
        let mut raw = RawModule::new();
        raw.instructions = vec![Instruction::new(
            Opcode::Switch,
            vec![
                Operand::IdRef(id(4)),
                Operand::IdRef(id(5)),
                Operand::Literal(0),
                Operand::IdRef(id(6)),
                Operand::Literal(1),
                Operand::IdRef(id(7)),
            ],
        )];
        raw.bound = 8;
        let bytes = encode_module(&raw);
        let decoded = decode_module(&bytes).unwrap();
        assert_eq!(decoded, raw);
    }

    #[test]
    fn optional_operand_present_and_absent() {
        let mut raw = RawModule::new();
        raw.instructions = vec![
            Instruction::with_result_type(
                Opcode::Variable,
                id(3),
                id(4),
                vec![Operand::Enum(EnumKind::StorageClass, 6)],
            ),
            Instruction::with_result_type(
                Opcode::Variable,
                id(3),
                id(5),
                vec![
                    Operand::Enum(EnumKind::StorageClass, 6),
                    Operand::IdRef(id(6)),
                ],
            ),
        ];
        raw.bound = 7;
        let bytes = encode_module(&raw);
        assert_eq!(decode_module(&bytes).unwrap(), raw);
    }

    #[test]
    fn word_counts_include_strings() {
        let name = Instruction::new(
            Opcode::Name,
            vec![Operand::IdRef(id(2)), Operand::LiteralString("main".into())],
        );
        // prefix + id + two string words
        assert_eq!(instruction_word_count(&name), 4);
    }
}
