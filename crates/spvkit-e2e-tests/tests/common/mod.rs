use spvkit_analysis::Cfg;
use spvkit_ir::grammar::{EnumKind, Opcode};
use spvkit_ir::{Id, Instruction, Operand, RawModule};

/// Shorthand for a non-zero id.
#[allow(dead_code)]
pub fn id(raw: u32) -> Id {
    Id::new(raw).unwrap()
}

/// The minimal float-identity shader of the round-trip scenarios:
/// `Capability(VulkanMemoryModel)`, `MemoryModel(Logical, Vulkan)`,
/// a float type, a function type, and a one-block identity function.
#[allow(dead_code)]
pub fn minimal_shader() -> RawModule {
    let mut raw = RawModule::new();
    raw.instructions = vec![
        Instruction::new(
            Opcode::Capability,
            vec![Operand::Enum(EnumKind::Capability, 5345)],
        ),
        Instruction::new(
            Opcode::MemoryModel,
            vec![
                Operand::Enum(EnumKind::AddressingModel, 0),
                Operand::Enum(EnumKind::MemoryModel, 3),
            ],
        ),
        Instruction::with_result(Opcode::TypeFloat, id(2), vec![Operand::Literal(32)]),
        Instruction::with_result(
            Opcode::TypeFunction,
            id(3),
            vec![Operand::IdRef(id(2)), Operand::IdRef(id(2))],
        ),
        Instruction::with_result_type(
            Opcode::Function,
            id(2),
            id(4),
            vec![
                Operand::Enum(EnumKind::FunctionControl, 0),
                Operand::IdRef(id(3)),
            ],
        ),
        Instruction::with_result_type(Opcode::FunctionParameter, id(2), id(5), vec![]),
        Instruction::with_result(Opcode::Label, id(6), vec![]),
        Instruction::new(Opcode::ReturnValue, vec![Operand::IdRef(id(5))]),
        Instruction::new(Opcode::FunctionEnd, vec![]),
    ];
    raw.bound = 7;
    raw
}

/// Builds a CFG from 1-based vertex names, matching the scenario tables.
#[allow(dead_code)]
pub fn cfg(vertex_count: usize, edges: &[(usize, usize)]) -> Cfg {
    let shifted: Vec<(usize, usize)> = edges.iter().map(|&(u, v)| (u - 1, v - 1)).collect();
    Cfg::from_edges(vertex_count, &shifted)
}

/// Byte-swaps every 32-bit word of an encoded module.
#[allow(dead_code)]
pub fn swap_words(bytes: &[u8]) -> Vec<u8> {
    bytes
        .chunks_exact(4)
        .flat_map(|chunk| {
            let mut word: [u8; 4] = chunk.try_into().unwrap();
            word.reverse();
            word
        })
        .collect()
}
