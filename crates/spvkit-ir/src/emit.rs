//! Emission pass: structured [`Module`] → flat [`RawModule`].
//!
//! Sections are emitted in the canonical order required by the format:
//! capabilities, extensions, extended-instruction imports, memory model,
//! entry points, execution modes, debug source, debug strings, debug names,
//! decorations, globals in ascending id order, then functions.

use crate::grammar::{EnumKind, Opcode};
use crate::instruction::{Instruction, Operand};
use crate::module::Module;
use crate::raw::{RawModule, MAGIC};

impl Module {
    /// Lowers the structured module back to a flat instruction stream.
    ///
    /// The header's `bound` is written as `max_id + 1`; the remaining
    /// header fields come from [`meta`](Module::meta).
    pub fn to_raw(&self) -> RawModule {
        let mut out = Vec::new();

        for &capability in &self.capabilities {
            out.push(Instruction::new(
                Opcode::Capability,
                vec![Operand::Enum(EnumKind::Capability, capability)],
            ));
        }

        for extension in &self.extensions {
            out.push(Instruction::new(
                Opcode::Extension,
                vec![Operand::LiteralString(extension.clone())],
            ));
        }

        for (&id, set) in &self.ext_inst_imports {
            out.push(Instruction::with_result(
                Opcode::ExtInstImport,
                id,
                vec![Operand::LiteralString(set.clone())],
            ));
        }

        if let Some(mm) = self.memory_model {
            out.push(Instruction::new(
                Opcode::MemoryModel,
                vec![
                    Operand::Enum(EnumKind::AddressingModel, mm.addressing_model),
                    Operand::Enum(EnumKind::MemoryModel, mm.memory_model),
                ],
            ));
        }

        for ep in self.entry_points.values() {
            let mut operands = vec![
                Operand::Enum(EnumKind::ExecutionModel, ep.execution_model),
                Operand::IdRef(ep.function),
                Operand::LiteralString(ep.name.clone()),
            ];
            operands.extend(ep.interface.iter().map(|&id| Operand::IdRef(id)));
            out.push(Instruction::new(Opcode::EntryPoint, operands));
        }

        for ep in self.entry_points.values() {
            for mode in &ep.modes {
                let mut operands = vec![
                    Operand::IdRef(ep.function),
                    Operand::Enum(EnumKind::ExecutionMode, mode.mode),
                ];
                operands.extend(mode.operands.iter().cloned());
                let opcode = if mode.operands.iter().any(|op| op.id().is_some()) {
                    Opcode::ExecutionModeId
                } else {
                    Opcode::ExecutionMode
                };
                out.push(Instruction::new(opcode, operands));
            }
        }

        if let Some(debug) = &self.debug {
            if let Some(source) = &debug.source {
                let mut operands = vec![
                    Operand::Enum(EnumKind::SourceLanguage, source.language),
                    Operand::Literal(source.version),
                ];
                if let Some(file) = source.file {
                    operands.push(Operand::IdRef(file));
                }
                if let Some(text) = &source.text {
                    operands.push(Operand::LiteralString(text.clone()));
                }
                out.push(Instruction::new(Opcode::Source, operands));
            }
            for ext in &debug.source_extensions {
                out.push(Instruction::new(
                    Opcode::SourceExtension,
                    vec![Operand::LiteralString(ext.clone())],
                ));
            }
            for (&id, text) in &debug.strings {
                out.push(Instruction::with_result(
                    Opcode::String,
                    id,
                    vec![Operand::LiteralString(text.clone())],
                ));
            }
            for (&target, name) in &debug.names {
                out.push(Instruction::new(
                    Opcode::Name,
                    vec![
                        Operand::IdRef(target),
                        Operand::LiteralString(name.clone()),
                    ],
                ));
            }
            for (&target, members) in &debug.member_names {
                for (&member, name) in members {
                    out.push(Instruction::new(
                        Opcode::MemberName,
                        vec![
                            Operand::IdRef(target),
                            Operand::Literal(member),
                            Operand::LiteralString(name.clone()),
                        ],
                    ));
                }
            }
            for text in &debug.module_processed {
                out.push(Instruction::new(
                    Opcode::ModuleProcessed,
                    vec![Operand::LiteralString(text.clone())],
                ));
            }
        }

        for (&target, decorations) in &self.decorations {
            for (&decoration, args) in decorations {
                let mut operands = vec![
                    Operand::IdRef(target),
                    Operand::Enum(EnumKind::Decoration, decoration),
                ];
                operands.extend(args.iter().cloned());
                let opcode = if args.iter().any(|op| op.id().is_some()) {
                    Opcode::DecorateId
                } else {
                    Opcode::Decorate
                };
                out.push(Instruction::new(opcode, operands));
            }
        }

        for (&target, members) in &self.member_decorations {
            for (&member, decorations) in members {
                for (&decoration, args) in decorations {
                    let mut operands = vec![
                        Operand::IdRef(target),
                        Operand::Literal(member),
                        Operand::Enum(EnumKind::Decoration, decoration),
                    ];
                    operands.extend(args.iter().cloned());
                    out.push(Instruction::new(Opcode::MemberDecorate, operands));
                }
            }
        }

        // Forward pointer declarations precede the type section so struct
        // members may reference the pointer id before its real declaration.
        for (&pointer, &storage_class) in &self.forward_pointers {
            out.push(Instruction::new(
                Opcode::TypeForwardPointer,
                vec![
                    Operand::IdRef(pointer),
                    Operand::Enum(EnumKind::StorageClass, storage_class),
                ],
            ));
        }

        for inst in self.globals.values() {
            out.push(inst.clone());
        }

        for def in self.functions.values() {
            out.push(Instruction::with_result_type(
                Opcode::Function,
                def.return_type,
                def.id,
                vec![
                    Operand::Enum(EnumKind::FunctionControl, def.control.bits()),
                    Operand::IdRef(def.type_id),
                ],
            ));
            for param in &def.parameters {
                out.push(param.clone());
            }
            for block in &def.blocks {
                out.push(Instruction::with_result(Opcode::Label, block.label, vec![]));
                // The merge instruction goes immediately before the
                // terminator.
                let body_len = block.instructions.len().saturating_sub(1);
                let (body, terminator) = block.instructions.split_at(body_len);
                out.extend(body.iter().cloned());
                if let Some(merge) = &block.merge {
                    out.push(merge.to_instruction());
                }
                out.extend(terminator.iter().cloned());
            }
            out.push(Instruction::new(Opcode::FunctionEnd, vec![]));
        }

        RawModule {
            magic: MAGIC,
            version: self.meta.version,
            generator: self.meta.generator,
            bound: self.bound(),
            schema: self.meta.schema,
            instructions: out,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::Id;
    use crate::module::FunctionBuilder;
    use crate::types::{FunctionControl, Type};

    fn id(raw: u32) -> Id {
        Id::new(raw).unwrap()
    }

    fn identity_shader() -> RawModule {
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

    #[test]
    fn lower_emit_round_trip_is_exact() {
        let raw = identity_shader();
        let module = Module::from_raw(&raw).unwrap();
        let emitted = module.to_raw();
        assert_eq!(emitted.instructions, raw.instructions);
        assert_eq!(emitted.bound, raw.bound);
    }

    #[test]
    fn bound_is_max_id_plus_one() {
        let mut m = Module::new();
        let f32_ty = m.intern_type(Type::Float { width: 32 });
        let _ = f32_ty;
        let raw = m.to_raw();
        assert_eq!(raw.bound, m.max_id + 1);
    }

    #[test]
    fn builder_module_emits_in_canonical_order() {
        let mut m = Module::new();
        m.add_capability(1);
        m.set_memory_model(0, 1);
        let void = m.intern_type(Type::Void);
        let fn_ty = m.intern_type(Type::Function {
            return_type: void,
            params: vec![],
        });
        let f = m.fresh_id();
        let entry = m.fresh_id();
        let mut b = FunctionBuilder::new(f, fn_ty, void, FunctionControl::NONE);
        b.begin_block(entry);
        b.append(Instruction::new(Opcode::Return, vec![])).unwrap();
        m.add_function(b.build().unwrap()).unwrap();
        m.add_entry_point(5, f, "main", vec![]);
        m.add_execution_mode(
            f,
            17,
            vec![
                Operand::Literal(1),
                Operand::Literal(1),
                Operand::Literal(1),
            ],
        )
        .unwrap();

        let raw = m.to_raw();
        let opcodes: Vec<_> = raw.instructions.iter().map(|i| i.opcode).collect();
        assert_eq!(
            opcodes,
            vec![
                Opcode::Capability,
                Opcode::MemoryModel,
                Opcode::EntryPoint,
                Opcode::ExecutionMode,
                Opcode::TypeVoid,
                Opcode::TypeFunction,
                Opcode::Function,
                Opcode::Label,
                Opcode::Return,
                Opcode::FunctionEnd,
            ]
        );
    }

    #[test]
    fn id_decorations_use_decorate_id() {
        let mut m = Module::new();
        let f32_ty = m.intern_type(Type::Float { width: 32 });
        m.add_decoration(f32_ty, 6, vec![Operand::Literal(4)]);
        let other = m.fresh_id();
        // A decoration whose argument is an id must round-trip as
        // OpDecorateId.
        m.add_decoration(f32_ty, 44, vec![Operand::IdRef(other)]);

        let raw = m.to_raw();
        let kinds: Vec<_> = raw
            .instructions
            .iter()
            .filter(|i| matches!(i.opcode, Opcode::Decorate | Opcode::DecorateId))
            .map(|i| i.opcode)
            .collect();
        assert_eq!(kinds, vec![Opcode::Decorate, Opcode::DecorateId]);
    }

    #[test]
    fn merge_declarations_round_trip() {
        // Selection header: merge goes back immediately before the
        // terminator, with its control mask intact.
        let mut raw = RawModule::new();
        raw.instructions = vec![
            Instruction::with_result(Opcode::TypeVoid, id(2), vec![]),
            Instruction::with_result(Opcode::TypeFunction, id(3), vec![Operand::IdRef(id(2))]),
            Instruction::with_result(Opcode::TypeBool, id(4), vec![]),
            Instruction::with_result_type(Opcode::ConstantTrue, id(4), id(5), vec![]),
            Instruction::with_result_type(
                Opcode::Function,
                id(2),
                id(6),
                vec![
                    Operand::Enum(EnumKind::FunctionControl, 0),
                    Operand::IdRef(id(3)),
                ],
            ),
            Instruction::with_result(Opcode::Label, id(7), vec![]),
            Instruction::new(
                Opcode::SelectionMerge,
                vec![
                    Operand::IdRef(id(8)),
                    Operand::Enum(EnumKind::SelectionControl, 2),
                ],
            ),
            Instruction::new(
                Opcode::BranchConditional,
                vec![
                    Operand::IdRef(id(5)),
                    Operand::IdRef(id(8)),
                    Operand::IdRef(id(8)),
                ],
            ),
            Instruction::with_result(Opcode::Label, id(8), vec![]),
            Instruction::new(Opcode::Return, vec![]),
            Instruction::new(Opcode::FunctionEnd, vec![]),
        ];
        raw.bound = 9;

        let module = Module::from_raw(&raw).unwrap();
        let header = &module.functions[&id(6)].blocks[0];
        assert_eq!(
            header.merge,
            Some(crate::module::MergeDecl::Selection {
                merge_block: id(8),
                control: crate::types::SelectionControl::DONT_FLATTEN,
            })
        );

        let emitted = module.to_raw();
        assert_eq!(emitted.instructions, raw.instructions);
    }

    #[test]
    fn forward_pointers_precede_globals() {
        let mut raw = RawModule::new();
        raw.instructions = vec![
            Instruction::new(
                Opcode::TypeForwardPointer,
                vec![
                    Operand::IdRef(id(3)),
                    Operand::Enum(EnumKind::StorageClass, 12),
                ],
            ),
            Instruction::with_result(
                Opcode::TypeInt,
                id(2),
                vec![Operand::Literal(32), Operand::Literal(0)],
            ),
            Instruction::with_result(
                Opcode::TypeStruct,
                id(4),
                vec![Operand::IdRef(id(2)), Operand::IdRef(id(3))],
            ),
            Instruction::with_result(
                Opcode::TypePointer,
                id(3),
                vec![
                    Operand::Enum(EnumKind::StorageClass, 12),
                    Operand::IdRef(id(4)),
                ],
            ),
        ];
        let module = Module::from_raw(&raw).unwrap();
        let emitted = module.to_raw();
        assert_eq!(emitted.instructions[0].opcode, Opcode::TypeForwardPointer);
        // And the pointer's real declaration is still present afterwards.
        assert!(emitted
            .instructions
            .iter()
            .any(|i| i.opcode == Opcode::TypePointer && i.result == Some(id(3))));
    }
}
