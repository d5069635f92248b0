//! Lowering pass: flat [`RawModule`] → structured [`Module`].
//!
//! A single pass over the instruction stream, dispatching on the grammar
//! class of each opcode. Function bodies are collected through a cursor
//! (`OpFunction` opens, `OpLabel` opens a block, `OpFunctionEnd` closes).

use crate::error::ModuleError;
use crate::grammar::{EnumKind, InstructionClass, Opcode};
use crate::id::Id;
use crate::instruction::{Instruction, Operand};
use crate::module::{
    Block, EntryPoint, ExecutionModeDecl, FunctionDef, GlobalVariable, MergeDecl, Module,
    ModuleMeta, SourceInfo,
};
use crate::raw::RawModule;
use crate::types::{FunctionControl, Type};

/// Storage class value for function-local variables.
const STORAGE_CLASS_FUNCTION: u32 = 7;

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

struct LowerCtx {
    module: Module,
    current: Option<FunctionCursor>,
}

struct FunctionCursor {
    def: FunctionDef,
    open_block: Option<Block>,
}

impl Module {
    /// Builds a structured module from a flat instruction stream.
    pub fn from_raw(raw: &RawModule) -> Result<Self, ModuleError> {
        let mut ctx = LowerCtx {
            module: Module::new(),
            current: None,
        };
        ctx.module.meta = ModuleMeta {
            version: raw.version,
            generator: raw.generator,
            schema: raw.schema,
        };

        for inst in &raw.instructions {
            ctx.lower_instruction(inst)?;
        }

        if let Some(cursor) = ctx.current {
            return Err(ModuleError::InvariantViolation(format!(
                "function {} is missing OpFunctionEnd",
                cursor.def.id
            )));
        }

        ctx.module.normalize_debug();
        Ok(ctx.module)
    }
}

// ---------------------------------------------------------------------------
// Per-instruction dispatch
// ---------------------------------------------------------------------------

impl LowerCtx {
    fn lower_instruction(&mut self, inst: &Instruction) -> Result<(), ModuleError> {
        // The function protocol first: it decides whether everything else
        // is a body instruction or a module-level one.
        match inst.opcode {
            Opcode::Function => return self.begin_function(inst),
            Opcode::FunctionParameter => return self.add_parameter(inst),
            Opcode::FunctionEnd => return self.end_function(),
            Opcode::Label => {
                if self.current.is_some() {
                    return self.open_block(inst);
                }
                return Err(ModuleError::UnexpectedInstruction {
                    opcode: "OpLabel",
                    context: "outside a function",
                });
            }
            _ => {}
        }

        if self.current.is_some() {
            return self.append_to_block(inst);
        }

        match inst.opcode.class() {
            InstructionClass::ModeSetting => self.lower_mode_setting(inst),
            InstructionClass::Extension => self.lower_extension(inst),
            InstructionClass::Debug => self.lower_debug(inst),
            InstructionClass::Annotation => self.lower_annotation(inst),
            InstructionClass::Type => self.lower_type(inst),
            InstructionClass::Constant => self.lower_constant(inst),
            InstructionClass::Memory => self.lower_memory(inst),
            InstructionClass::ExtInst => {
                // Module-scope extended instructions are recorded but not
                // modeled further (non-fatal).
                log::warn!("unmodeled module-scope OpExtInst");
                self.module.note_result(inst);
                if let Some(id) = inst.result {
                    self.module.globals.insert(id, inst.clone());
                }
                Ok(())
            }
            InstructionClass::Function
            | InstructionClass::ControlFlow
            | InstructionClass::Other => Err(ModuleError::UnexpectedInstruction {
                opcode: inst.opcode.name(),
                context: "at module scope",
            }),
        }
    }

    // -- module sections ---------------------------------------------------

    fn lower_mode_setting(&mut self, inst: &Instruction) -> Result<(), ModuleError> {
        match inst.opcode {
            Opcode::Capability => {
                let cap = expect_enum(inst, 0, EnumKind::Capability)?;
                self.module.add_capability(cap);
            }
            Opcode::MemoryModel => {
                let addressing = expect_enum(inst, 0, EnumKind::AddressingModel)?;
                let memory = expect_enum(inst, 1, EnumKind::MemoryModel)?;
                self.module.set_memory_model(addressing, memory);
            }
            Opcode::EntryPoint => {
                let execution_model = expect_enum(inst, 0, EnumKind::ExecutionModel)?;
                let function = expect_id(inst, 1)?;
                let name = expect_string(inst, 2)?.to_owned();
                let interface = inst.operands[3..]
                    .iter()
                    .filter_map(Operand::id)
                    .collect();
                self.module.entry_points.insert(
                    function,
                    EntryPoint {
                        name,
                        function,
                        execution_model,
                        modes: Vec::new(),
                        interface,
                    },
                );
            }
            Opcode::ExecutionMode | Opcode::ExecutionModeId => {
                let function = expect_id(inst, 0)?;
                let mode = expect_enum(inst, 1, EnumKind::ExecutionMode)?;
                let operands = inst.operands[2..].to_vec();
                let ep = self.module.entry_points.get_mut(&function).ok_or_else(|| {
                    ModuleError::InvariantViolation(format!(
                        "execution mode targets {function}, which is not an entry point"
                    ))
                })?;
                ep.modes.push(ExecutionModeDecl { mode, operands });
            }
            _ => unreachable!(),
        }
        Ok(())
    }

    fn lower_extension(&mut self, inst: &Instruction) -> Result<(), ModuleError> {
        match inst.opcode {
            Opcode::Extension => {
                self.module.add_extension(expect_string(inst, 0)?);
            }
            Opcode::ExtInstImport => {
                let id = expect_result(inst)?;
                let name = expect_string(inst, 0)?.to_owned();
                self.module.note_result(inst);
                self.module.ext_inst_imports.insert(id, name);
            }
            _ => unreachable!(),
        }
        Ok(())
    }

    fn lower_debug(&mut self, inst: &Instruction) -> Result<(), ModuleError> {
        match inst.opcode {
            Opcode::Source => {
                let language = expect_enum(inst, 0, EnumKind::SourceLanguage)?;
                let version = expect_literal(inst, 1)?;
                let file = inst.id_at(2);
                let text = inst.string_at(3).map(str::to_owned);
                self.module.debug_mut().source = Some(SourceInfo {
                    language,
                    version,
                    file,
                    text,
                });
            }
            Opcode::SourceContinued => {
                let chunk = expect_string(inst, 0)?;
                match self.module.debug_mut().source.as_mut() {
                    Some(source) => {
                        source.text.get_or_insert_with(String::new).push_str(chunk);
                    }
                    None => log::warn!("OpSourceContinued without a preceding OpSource"),
                }
            }
            Opcode::SourceExtension => {
                let ext = expect_string(inst, 0)?.to_owned();
                let debug = self.module.debug_mut();
                if debug.source.is_none() {
                    log::warn!("OpSourceExtension without a preceding OpSource");
                }
                debug.source_extensions.push(ext);
            }
            Opcode::String => {
                let id = expect_result(inst)?;
                let text = expect_string(inst, 0)?.to_owned();
                self.module.note_result(inst);
                self.module.debug_mut().strings.insert(id, text);
            }
            Opcode::Name => {
                let target = expect_id(inst, 0)?;
                let name = expect_string(inst, 1)?.to_owned();
                self.module.debug_mut().names.insert(target, name);
            }
            Opcode::MemberName => {
                // Recorded even when the target is not (yet) known to be a
                // struct; the invariant check runs on the finished module.
                let target = expect_id(inst, 0)?;
                let member = expect_literal(inst, 1)?;
                let name = expect_string(inst, 2)?.to_owned();
                self.module
                    .debug_mut()
                    .member_names
                    .entry(target)
                    .or_default()
                    .insert(member, name);
            }
            Opcode::ModuleProcessed => {
                let text = expect_string(inst, 0)?.to_owned();
                self.module.debug_mut().module_processed.push(text);
            }
            Opcode::Line | Opcode::NoLine => {
                log::warn!("{} outside a function body is dropped", inst.opcode.name());
            }
            _ => unreachable!(),
        }
        Ok(())
    }

    fn lower_annotation(&mut self, inst: &Instruction) -> Result<(), ModuleError> {
        match inst.opcode {
            Opcode::Decorate | Opcode::DecorateId => {
                let target = expect_id(inst, 0)?;
                let decoration = expect_enum(inst, 1, EnumKind::Decoration)?;
                self.module
                    .decorations
                    .entry(target)
                    .or_default()
                    .insert(decoration, inst.operands[2..].to_vec());
            }
            Opcode::MemberDecorate => {
                let target = expect_id(inst, 0)?;
                let member = expect_literal(inst, 1)?;
                let decoration = expect_enum(inst, 2, EnumKind::Decoration)?;
                self.module
                    .member_decorations
                    .entry(target)
                    .or_default()
                    .entry(member)
                    .or_default()
                    .insert(decoration, inst.operands[3..].to_vec());
            }
            _ => unreachable!(),
        }
        Ok(())
    }

    fn lower_type(&mut self, inst: &Instruction) -> Result<(), ModuleError> {
        if inst.opcode == Opcode::TypeForwardPointer {
            let pointer = expect_id(inst, 0)?;
            let storage_class = expect_enum(inst, 1, EnumKind::StorageClass)?;
            self.module.forward_pointers.insert(pointer, storage_class);
            return Ok(());
        }

        let id = expect_result(inst)?;
        let ty = match inst.opcode {
            Opcode::TypeVoid => Type::Void,
            Opcode::TypeBool => Type::Bool,
            Opcode::TypeInt => Type::Int {
                width: expect_literal(inst, 0)?,
                signed: expect_literal(inst, 1)? != 0,
            },
            Opcode::TypeFloat => Type::Float {
                width: expect_literal(inst, 0)?,
            },
            Opcode::TypeVector => Type::Vector {
                element: expect_id(inst, 0)?,
                count: expect_literal(inst, 1)?,
            },
            Opcode::TypeMatrix => Type::Matrix {
                column: expect_id(inst, 0)?,
                columns: expect_literal(inst, 1)?,
            },
            Opcode::TypeArray => Type::Array {
                element: expect_id(inst, 0)?,
                length: Some(expect_id(inst, 1)?),
            },
            Opcode::TypeRuntimeArray => Type::Array {
                element: expect_id(inst, 0)?,
                length: None,
            },
            Opcode::TypeStruct => Type::Struct {
                members: inst.operands.iter().filter_map(Operand::id).collect(),
            },
            Opcode::TypePointer => Type::Pointer {
                storage_class: expect_enum(inst, 0, EnumKind::StorageClass)?,
                pointee: expect_id(inst, 1)?,
            },
            Opcode::TypeImage => Type::Image {
                sampled_type: expect_id(inst, 0)?,
                dim: expect_enum(inst, 1, EnumKind::Dim)?,
                depth: expect_literal(inst, 2)?,
                arrayed: expect_literal(inst, 3)?,
                multisampled: expect_literal(inst, 4)?,
                sampled: expect_literal(inst, 5)?,
                format: expect_enum(inst, 6, EnumKind::ImageFormat)?,
                access: inst
                    .operands
                    .get(7)
                    .and_then(|op| op.enum_value(EnumKind::AccessQualifier)),
            },
            Opcode::TypeSampler => Type::Sampler,
            Opcode::TypeSampledImage => Type::SampledImage {
                image: expect_id(inst, 0)?,
            },
            Opcode::TypeOpaque => Type::Opaque {
                name: expect_string(inst, 0)?.to_owned(),
            },
            Opcode::TypeFunction => Type::Function {
                return_type: expect_id(inst, 0)?,
                params: inst.operands[1..].iter().filter_map(Operand::id).collect(),
            },
            _ => unreachable!(),
        };
        self.module.register_type(id, ty);
        Ok(())
    }

    fn lower_constant(&mut self, inst: &Instruction) -> Result<(), ModuleError> {
        let id = expect_result(inst)?;
        self.module.note_result(inst);
        self.module.constants.insert(id, inst.clone());
        self.module.globals.insert(id, inst.clone());
        Ok(())
    }

    fn lower_memory(&mut self, inst: &Instruction) -> Result<(), ModuleError> {
        if inst.opcode != Opcode::Variable {
            return Err(ModuleError::UnexpectedInstruction {
                opcode: inst.opcode.name(),
                context: "at module scope",
            });
        }
        let id = expect_result(inst)?;
        let type_id = inst.result_type.ok_or_else(|| {
            ModuleError::InvariantViolation(format!("variable {id} has no result type"))
        })?;
        let storage_class = expect_enum(inst, 0, EnumKind::StorageClass)?;
        if storage_class == STORAGE_CLASS_FUNCTION {
            return Err(ModuleError::UnexpectedInstruction {
                opcode: "OpVariable",
                context: "with Function storage at module scope",
            });
        }
        let pointee = match self.module.types.get(&type_id) {
            Some(&Type::Pointer { pointee, .. }) => pointee,
            _ => {
                return Err(ModuleError::InvariantViolation(format!(
                    "variable {id} type {type_id} is not a declared pointer type"
                )))
            }
        };
        self.module.note_result(inst);
        self.module.globals.insert(id, inst.clone());
        self.module.global_vars.insert(
            id,
            GlobalVariable {
                id,
                pointee_type: pointee,
                storage_class,
                initializer: inst.id_at(1),
                decorations: self.module.decorations.get(&id).cloned().unwrap_or_default(),
            },
        );
        Ok(())
    }

    // -- function protocol -------------------------------------------------

    fn begin_function(&mut self, inst: &Instruction) -> Result<(), ModuleError> {
        if self.current.is_some() {
            return Err(ModuleError::UnexpectedInstruction {
                opcode: "OpFunction",
                context: "inside another function",
            });
        }
        let id = expect_result(inst)?;
        let return_type = inst.result_type.ok_or_else(|| {
            ModuleError::InvariantViolation(format!("function {id} has no return type"))
        })?;
        let control = FunctionControl::from_bits(expect_enum(inst, 0, EnumKind::FunctionControl)?);
        let type_id = expect_id(inst, 1)?;
        self.module.note_result(inst);
        self.current = Some(FunctionCursor {
            def: FunctionDef {
                id,
                type_id,
                return_type,
                control,
                parameters: Vec::new(),
                blocks: Vec::new(),
            },
            open_block: None,
        });
        Ok(())
    }

    fn add_parameter(&mut self, inst: &Instruction) -> Result<(), ModuleError> {
        let cursor = self.current.as_mut().ok_or(ModuleError::UnexpectedInstruction {
            opcode: "OpFunctionParameter",
            context: "outside a function",
        })?;
        if !cursor.def.blocks.is_empty() || cursor.open_block.is_some() {
            return Err(ModuleError::UnexpectedInstruction {
                opcode: "OpFunctionParameter",
                context: "after the first block",
            });
        }
        self.module.note_result(inst);
        cursor.def.parameters.push(inst.clone());
        Ok(())
    }

    fn open_block(&mut self, inst: &Instruction) -> Result<(), ModuleError> {
        let label = expect_result(inst)?;
        self.module.note_result(inst);
        let cursor = self.current.as_mut().expect("checked by caller");
        if let Some(done) = cursor.open_block.take() {
            cursor.def.blocks.push(done);
        }
        cursor.open_block = Some(Block {
            label,
            merge: None,
            instructions: Vec::new(),
        });
        Ok(())
    }

    fn append_to_block(&mut self, inst: &Instruction) -> Result<(), ModuleError> {
        self.module.note_result(inst);
        let cursor = self.current.as_mut().expect("checked by caller");
        let block = cursor.open_block.as_mut().ok_or(ModuleError::UnexpectedInstruction {
            opcode: "instruction",
            context: "in a function before the first OpLabel",
        })?;
        // Merge instructions are hoisted onto the block header, the way
        // the function header carries its control mask.
        if matches!(inst.opcode, Opcode::SelectionMerge | Opcode::LoopMerge) {
            if block.merge.is_some() {
                return Err(ModuleError::InvariantViolation(format!(
                    "block {} has more than one merge declaration",
                    block.label
                )));
            }
            block.merge = Some(MergeDecl::from_instruction(inst)?);
            return Ok(());
        }
        block.instructions.push(inst.clone());
        Ok(())
    }

    fn end_function(&mut self) -> Result<(), ModuleError> {
        let mut cursor = self.current.take().ok_or(ModuleError::UnexpectedInstruction {
            opcode: "OpFunctionEnd",
            context: "outside a function",
        })?;
        if let Some(done) = cursor.open_block.take() {
            cursor.def.blocks.push(done);
        }
        self.module.functions.insert(cursor.def.id, cursor.def);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Operand extraction helpers
// ---------------------------------------------------------------------------

fn expect_result(inst: &Instruction) -> Result<Id, ModuleError> {
    inst.result.ok_or_else(|| {
        ModuleError::InvariantViolation(format!("{} is missing its result id", inst.opcode.name()))
    })
}

fn expect_id(inst: &Instruction, index: usize) -> Result<Id, ModuleError> {
    inst.id_at(index).ok_or_else(|| {
        ModuleError::InvariantViolation(format!(
            "{} operand {index} is not an id",
            inst.opcode.name()
        ))
    })
}

fn expect_literal(inst: &Instruction, index: usize) -> Result<u32, ModuleError> {
    inst.literal_at(index).ok_or_else(|| {
        ModuleError::InvariantViolation(format!(
            "{} operand {index} is not a literal",
            inst.opcode.name()
        ))
    })
}

fn expect_string<'a>(inst: &'a Instruction, index: usize) -> Result<&'a str, ModuleError> {
    inst.string_at(index).ok_or_else(|| {
        ModuleError::InvariantViolation(format!(
            "{} operand {index} is not a string",
            inst.opcode.name()
        ))
    })
}

fn expect_enum(inst: &Instruction, index: usize, kind: EnumKind) -> Result<u32, ModuleError> {
    inst.operands
        .get(index)
        .and_then(|op| op.enum_value(kind))
        .ok_or_else(|| {
            ModuleError::InvariantViolation(format!(
                "{} operand {index} is not a {kind:?} value",
                inst.opcode.name()
            ))
        })
}
