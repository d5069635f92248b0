//! The structured module: deduplicated projections of the instruction stream.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::ModuleError;
use crate::grammar::{EnumKind, Opcode};
use crate::id::{Id, IdMap};
use crate::instruction::{Instruction, Operand};
use crate::raw::{DEFAULT_VERSION, GENERATOR};
use crate::types::{FunctionControl, LoopControl, SelectionControl, Type};

/// Decoration arguments keyed by decoration kind value.
pub type DecorationMap = BTreeMap<u32, Vec<Operand>>;

/// The `OpMemoryModel` declaration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryModelDecl {
    pub addressing_model: u32,
    pub memory_model: u32,
}

/// One `OpExecutionMode` attached to an entry point.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionModeDecl {
    pub mode: u32,
    pub operands: Vec<Operand>,
}

/// A pipeline-stage entry point.
#[derive(Clone, Debug)]
pub struct EntryPoint {
    pub name: String,
    pub function: Id,
    pub execution_model: u32,
    /// Execution modes, in declaration order.
    pub modes: Vec<ExecutionModeDecl>,
    /// Interface variable ids.
    pub interface: Vec<Id>,
}

/// A module-scope variable (storage class other than `Function`).
#[derive(Clone, Debug)]
pub struct GlobalVariable {
    pub id: Id,
    /// The variable's pointer type points at this type.
    pub pointee_type: Id,
    pub storage_class: u32,
    pub initializer: Option<Id>,
    /// Decorations attached to the variable id.
    pub decorations: DecorationMap,
}

/// Structured form of a merge instruction attached to a block header.
///
/// Carried the way a function header carries its control mask; the
/// emitter re-inserts the instruction immediately before the block's
/// terminator, where the format requires it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MergeDecl {
    /// `OpSelectionMerge`.
    Selection {
        merge_block: Id,
        control: SelectionControl,
    },
    /// `OpLoopMerge`.
    Loop {
        merge_block: Id,
        continue_target: Id,
        control: LoopControl,
        /// Literal parameters for flags like `DependencyLength`.
        params: Vec<Operand>,
    },
}

impl MergeDecl {
    /// Parses an `OpSelectionMerge` or `OpLoopMerge` instruction.
    pub fn from_instruction(inst: &Instruction) -> Result<Self, ModuleError> {
        let target = |index: usize| {
            inst.id_at(index).ok_or_else(|| {
                ModuleError::InvariantViolation(format!(
                    "{} operand {index} is not an id",
                    inst.opcode.name()
                ))
            })
        };
        match inst.opcode {
            Opcode::SelectionMerge => {
                let control = inst
                    .operands
                    .get(1)
                    .and_then(|op| op.enum_value(EnumKind::SelectionControl))
                    .ok_or_else(|| {
                        ModuleError::InvariantViolation(
                            "OpSelectionMerge is missing its control mask".into(),
                        )
                    })?;
                Ok(Self::Selection {
                    merge_block: target(0)?,
                    control: SelectionControl::from_bits(control),
                })
            }
            Opcode::LoopMerge => {
                let control = inst
                    .operands
                    .get(2)
                    .and_then(|op| op.enum_value(EnumKind::LoopControl))
                    .ok_or_else(|| {
                        ModuleError::InvariantViolation(
                            "OpLoopMerge is missing its control mask".into(),
                        )
                    })?;
                Ok(Self::Loop {
                    merge_block: target(0)?,
                    continue_target: target(1)?,
                    control: LoopControl::from_bits(control),
                    params: inst.operands[3..].to_vec(),
                })
            }
            other => Err(ModuleError::UnexpectedInstruction {
                opcode: other.name(),
                context: "where a merge instruction was expected",
            }),
        }
    }

    /// Lowers the declaration back to its instruction form.
    pub(crate) fn to_instruction(&self) -> Instruction {
        match self {
            Self::Selection {
                merge_block,
                control,
            } => Instruction::new(
                Opcode::SelectionMerge,
                vec![
                    Operand::IdRef(*merge_block),
                    Operand::Enum(EnumKind::SelectionControl, control.bits()),
                ],
            ),
            Self::Loop {
                merge_block,
                continue_target,
                control,
                params,
            } => {
                let mut operands = vec![
                    Operand::IdRef(*merge_block),
                    Operand::IdRef(*continue_target),
                    Operand::Enum(EnumKind::LoopControl, control.bits()),
                ];
                operands.extend(params.iter().cloned());
                Instruction::new(Opcode::LoopMerge, operands)
            }
        }
    }

    /// The ids this declaration references.
    pub fn referenced_ids(&self) -> Vec<Id> {
        match self {
            Self::Selection { merge_block, .. } => vec![*merge_block],
            Self::Loop {
                merge_block,
                continue_target,
                params,
                ..
            } => {
                let mut ids = vec![*merge_block, *continue_target];
                ids.extend(params.iter().filter_map(Operand::id));
                ids
            }
        }
    }
}

/// A basic block: its label id, optional merge declaration, and body
/// instructions.
///
/// The label and merge instructions are implicit; `instructions` holds the
/// body, whose last element must be a terminator.
#[derive(Clone, Debug)]
pub struct Block {
    pub label: Id,
    /// The block's selection or loop merge, when it is a header.
    pub merge: Option<MergeDecl>,
    pub instructions: Vec<Instruction>,
}

impl Block {
    /// The block's terminator, if the block is non-empty and well formed.
    pub fn terminator(&self) -> Option<&Instruction> {
        self.instructions
            .last()
            .filter(|inst| inst.opcode.is_block_terminator())
    }
}

/// A function definition.
#[derive(Clone, Debug)]
pub struct FunctionDef {
    pub id: Id,
    /// The `OpTypeFunction` id.
    pub type_id: Id,
    pub return_type: Id,
    pub control: FunctionControl,
    /// `OpFunctionParameter` instructions, in declaration order.
    pub parameters: Vec<Instruction>,
    /// Blocks in insertion order; the first block is the entry.
    pub blocks: Vec<Block>,
}

impl FunctionDef {
    /// The block with the given label.
    pub fn block(&self, label: Id) -> Option<&Block> {
        self.blocks.iter().find(|b| b.label == label)
    }

    /// The index of the block with the given label.
    pub fn block_index(&self, label: Id) -> Option<usize> {
        self.blocks.iter().position(|b| b.label == label)
    }

    /// Parameter result ids, in order.
    pub fn parameter_ids(&self) -> impl Iterator<Item = Id> + '_ {
        self.parameters.iter().filter_map(|inst| inst.result)
    }
}

/// `OpSource` and its continuations.
#[derive(Clone, Debug, Default)]
pub struct SourceInfo {
    pub language: u32,
    pub version: u32,
    /// The `OpString` id of the file name, if present.
    pub file: Option<Id>,
    pub text: Option<String>,
}

/// Optional debug information collected from the debug sections.
#[derive(Clone, Debug, Default)]
pub struct DebugInfo {
    pub source: Option<SourceInfo>,
    pub source_extensions: Vec<String>,
    /// `OpString` contents by id.
    pub strings: IdMap<String>,
    /// `OpName` symbols by target id.
    pub names: IdMap<String>,
    /// `OpMemberName` symbols by struct id and member index.
    pub member_names: IdMap<BTreeMap<u32, String>>,
    pub module_processed: Vec<String>,
}

impl DebugInfo {
    fn is_empty(&self) -> bool {
        self.source.is_none()
            && self.source_extensions.is_empty()
            && self.strings.is_empty()
            && self.names.is_empty()
            && self.member_names.is_empty()
            && self.module_processed.is_empty()
    }
}

/// Codec header fields carried through the structured form.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModuleMeta {
    pub version: u32,
    pub generator: u32,
    pub schema: u32,
}

impl Default for ModuleMeta {
    fn default() -> Self {
        Self {
            version: DEFAULT_VERSION,
            generator: GENERATOR,
            schema: 0,
        }
    }
}

/// A structured SPIR-V module.
///
/// Built either from a flat [`RawModule`](crate::RawModule) in a single pass
/// or incrementally through the builder APIs; lowered back to a flat module
/// by [`to_raw`](Module::to_raw).
#[derive(Clone, Debug, Default)]
pub struct Module {
    /// Declared capabilities (grammar enum values).
    pub capabilities: BTreeSet<u32>,
    /// Declared extension names.
    pub extensions: BTreeSet<String>,
    /// Imported extended-instruction sets by result id.
    pub ext_inst_imports: IdMap<String>,
    /// The memory model declaration, once seen.
    pub memory_model: Option<MemoryModelDecl>,
    /// Entry points keyed by function id.
    pub entry_points: IdMap<EntryPoint>,
    /// Decorations by target id.
    pub decorations: IdMap<DecorationMap>,
    /// Member decorations by struct id and member index.
    pub member_decorations: IdMap<BTreeMap<u32, DecorationMap>>,
    /// The type table.
    pub types: IdMap<Type>,
    /// Forward-declared pointer types (`OpTypeForwardPointer`) by pointer id.
    pub forward_pointers: IdMap<u32>,
    /// Constant-creation instructions by result id.
    pub constants: IdMap<Instruction>,
    /// All global-section instructions (types, constants, global variables)
    /// in the ascending id order required for emission.
    pub globals: IdMap<Instruction>,
    /// Module-scope variables by id.
    pub global_vars: IdMap<GlobalVariable>,
    /// Function definitions by function id.
    pub functions: IdMap<FunctionDef>,
    /// The defining instruction of every result id.
    pub results: IdMap<Instruction>,
    /// Debug information, if any debug instructions were present.
    pub debug: Option<DebugInfo>,
    /// Header fields from (or for) the codec.
    pub meta: ModuleMeta,
    /// High-water mark of allocated ids.
    pub max_id: u32,

    /// Reverse map for structural type deduplication.
    type_dedup: HashMap<Type, Id>,
}

impl Module {
    /// An empty module.
    pub fn new() -> Self {
        Self::default()
    }

    /// The id bound the emitter writes: `max_id + 1`.
    pub fn bound(&self) -> u32 {
        self.max_id + 1
    }

    /// Allocates a fresh id above every id seen so far.
    pub fn fresh_id(&mut self) -> Id {
        self.max_id += 1;
        Id::new(self.max_id).expect("max_id overflow")
    }

    pub(crate) fn note_id(&mut self, id: Id) {
        self.max_id = self.max_id.max(id.get());
    }

    /// Records `inst` as the definition of its result id, first sight wins.
    pub(crate) fn note_result(&mut self, inst: &Instruction) {
        if let Some(id) = inst.result {
            self.note_id(id);
            self.results.entry(id).or_insert_with(|| inst.clone());
        }
    }

    /// The lazily created debug record.
    pub fn debug_mut(&mut self) -> &mut DebugInfo {
        self.debug.get_or_insert_with(DebugInfo::default)
    }

    // ------------------------------------------------------------------
    // Builder APIs for the front end
    // ------------------------------------------------------------------

    /// Declares a capability.
    pub fn add_capability(&mut self, capability: u32) {
        self.capabilities.insert(capability);
    }

    /// Declares an extension by name.
    pub fn add_extension(&mut self, name: impl Into<String>) {
        self.extensions.insert(name.into());
    }

    /// Imports an extended-instruction set, reusing an existing import.
    pub fn import_ext_inst_set(&mut self, name: &str) -> Id {
        if let Some((&id, _)) = self
            .ext_inst_imports
            .iter()
            .find(|(_, set)| set.as_str() == name)
        {
            return id;
        }
        let id = self.fresh_id();
        self.ext_inst_imports.insert(id, name.to_owned());
        let inst = Instruction::with_result(
            Opcode::ExtInstImport,
            id,
            vec![Operand::LiteralString(name.to_owned())],
        );
        self.note_result(&inst);
        id
    }

    /// Sets the addressing and memory model.
    pub fn set_memory_model(&mut self, addressing_model: u32, memory_model: u32) {
        self.memory_model = Some(MemoryModelDecl {
            addressing_model,
            memory_model,
        });
    }

    /// Registers an entry point for `function`.
    pub fn add_entry_point(
        &mut self,
        execution_model: u32,
        function: Id,
        name: impl Into<String>,
        interface: Vec<Id>,
    ) {
        self.entry_points.insert(
            function,
            EntryPoint {
                name: name.into(),
                function,
                execution_model,
                modes: Vec::new(),
                interface,
            },
        );
    }

    /// Appends an execution mode to the entry point of `function`.
    pub fn add_execution_mode(
        &mut self,
        function: Id,
        mode: u32,
        operands: Vec<Operand>,
    ) -> Result<(), ModuleError> {
        let ep = self.entry_points.get_mut(&function).ok_or_else(|| {
            ModuleError::InvariantViolation(format!(
                "execution mode targets {function}, which is not an entry point"
            ))
        })?;
        ep.modes.push(ExecutionModeDecl { mode, operands });
        Ok(())
    }

    /// Attaches a decoration to `target`.
    pub fn add_decoration(&mut self, target: Id, decoration: u32, operands: Vec<Operand>) {
        self.decorations
            .entry(target)
            .or_default()
            .insert(decoration, operands.clone());
        if let Some(var) = self.global_vars.get_mut(&target) {
            var.decorations.insert(decoration, operands);
        }
    }

    /// Attaches a decoration to member `member` of struct `target`.
    pub fn add_member_decoration(
        &mut self,
        target: Id,
        member: u32,
        decoration: u32,
        operands: Vec<Operand>,
    ) {
        self.member_decorations
            .entry(target)
            .or_default()
            .entry(member)
            .or_default()
            .insert(decoration, operands);
    }

    /// Records a debug name for `target`.
    pub fn add_name(&mut self, target: Id, name: impl Into<String>) {
        self.debug_mut().names.insert(target, name.into());
    }

    /// Records a debug name for member `member` of struct `target`.
    pub fn add_member_name(&mut self, target: Id, member: u32, name: impl Into<String>) {
        self.debug_mut()
            .member_names
            .entry(target)
            .or_default()
            .insert(member, name.into());
    }

    /// Materializes a type, deduplicating by structural identity.
    pub fn intern_type(&mut self, ty: Type) -> Id {
        if let Some(&id) = self.type_dedup.get(&ty) {
            return id;
        }
        let id = self.fresh_id();
        self.register_type(id, ty);
        id
    }

    /// Registers `ty` under an already-assigned id (module loading path).
    ///
    /// The first id registered for a structure wins the dedup slot, so
    /// loading preserves the existing assignment.
    pub(crate) fn register_type(&mut self, id: Id, ty: Type) {
        let inst = type_instruction(id, &ty);
        self.note_id(id);
        self.note_result(&inst);
        self.globals.insert(id, inst);
        self.type_dedup.entry(ty.clone()).or_insert(id);
        self.types.insert(id, ty);
    }

    /// Looks up a structurally equal type, if one is materialized.
    pub fn find_type(&self, ty: &Type) -> Option<Id> {
        self.type_dedup.get(ty).copied()
    }

    /// Adds a constant-creation instruction; its result id must be set.
    pub fn add_constant(&mut self, inst: Instruction) -> Result<Id, ModuleError> {
        let id = inst.result.ok_or_else(|| {
            ModuleError::InvariantViolation("constant instruction without result id".into())
        })?;
        self.note_result(&inst);
        self.constants.insert(id, inst.clone());
        self.globals.insert(id, inst);
        Ok(id)
    }

    /// Adds a module-scope variable of the given pointer type.
    pub fn add_global_variable(
        &mut self,
        pointer_type: Id,
        storage_class: u32,
        initializer: Option<Id>,
    ) -> Result<Id, ModuleError> {
        let pointee = match self.types.get(&pointer_type) {
            Some(&Type::Pointer { pointee, .. }) => pointee,
            Some(_) => {
                return Err(ModuleError::InvariantViolation(format!(
                    "variable type {pointer_type} is not a pointer type"
                )))
            }
            None => {
                return Err(ModuleError::InvariantViolation(format!(
                    "variable type {pointer_type} is not declared"
                )))
            }
        };
        let id = self.fresh_id();
        let mut operands = vec![Operand::Enum(EnumKind::StorageClass, storage_class)];
        if let Some(init) = initializer {
            operands.push(Operand::IdRef(init));
        }
        let inst = Instruction::with_result_type(Opcode::Variable, pointer_type, id, operands);
        self.note_result(&inst);
        self.globals.insert(id, inst);
        self.global_vars.insert(
            id,
            GlobalVariable {
                id,
                pointee_type: pointee,
                storage_class,
                initializer,
                decorations: self.decorations.get(&id).cloned().unwrap_or_default(),
            },
        );
        Ok(id)
    }

    /// Adds a finished function definition.
    pub fn add_function(&mut self, def: FunctionDef) -> Result<(), ModuleError> {
        match self.types.get(&def.type_id) {
            Some(Type::Function { .. }) => {}
            _ => {
                return Err(ModuleError::InvariantViolation(format!(
                    "function {} has non-function type {}",
                    def.id, def.type_id
                )))
            }
        }
        let header = Instruction::with_result_type(
            Opcode::Function,
            def.return_type,
            def.id,
            vec![
                Operand::Enum(EnumKind::FunctionControl, def.control.bits()),
                Operand::IdRef(def.type_id),
            ],
        );
        self.note_result(&header);
        for param in &def.parameters {
            self.note_result(param);
        }
        for block in &def.blocks {
            let label = Instruction::with_result(Opcode::Label, block.label, vec![]);
            self.note_result(&label);
            for inst in &block.instructions {
                self.note_result(inst);
            }
        }
        self.functions.insert(def.id, def);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Invariant checks
    // ------------------------------------------------------------------

    /// Checks the module-level invariants, returning the first violation.
    pub fn check_invariants(&self) -> Result<(), ModuleError> {
        // max_id is the high-water mark of result ids.
        if let Some((&last, _)) = self.results.iter().next_back() {
            if last.get() != self.max_id {
                return Err(ModuleError::InvariantViolation(format!(
                    "max_id {} does not match highest result id {last}",
                    self.max_id
                )));
            }
        }

        // Variable types are pointers whose pointee matches.
        for var in self.global_vars.values() {
            let type_id = self
                .results
                .get(&var.id)
                .and_then(|inst| inst.result_type)
                .ok_or_else(|| {
                    ModuleError::InvariantViolation(format!("variable {} has no type", var.id))
                })?;
            match self.types.get(&type_id) {
                Some(&Type::Pointer { pointee, .. }) if pointee == var.pointee_type => {}
                Some(&Type::Pointer { pointee, .. }) => {
                    return Err(ModuleError::InvariantViolation(format!(
                        "variable {} pointee mismatch: {pointee} vs {}",
                        var.id, var.pointee_type
                    )))
                }
                _ => {
                    return Err(ModuleError::InvariantViolation(format!(
                        "variable {} type {type_id} is not a pointer",
                        var.id
                    )))
                }
            }
        }

        // Member decorations attach only to struct-typed ids.
        for (&target, _) in &self.member_decorations {
            match self.types.get(&target) {
                Some(Type::Struct { .. }) => {}
                _ => {
                    return Err(ModuleError::InvariantViolation(format!(
                        "member decoration on non-struct {target}"
                    )))
                }
            }
        }

        // Blocks are labeled and terminated.
        for def in self.functions.values() {
            if def.blocks.is_empty() {
                continue; // declaration without body
            }
            for block in &def.blocks {
                if block.terminator().is_none() {
                    return Err(ModuleError::InvariantViolation(format!(
                        "block {} of function {} does not end with a terminator",
                        block.label, def.id
                    )));
                }
                for inst in &block.instructions[..block.instructions.len() - 1] {
                    if inst.opcode.is_block_terminator() {
                        return Err(ModuleError::InvariantViolation(format!(
                            "terminator {} in the middle of block {}",
                            inst.opcode.name(),
                            block.label
                        )));
                    }
                }
            }
        }

        // Every operand id is defined somewhere in the module.
        let defined = |id: Id| self.results.contains_key(&id);
        for inst in self.globals.values() {
            for id in inst.operand_ids() {
                if !defined(id) {
                    return Err(ModuleError::InvariantViolation(format!(
                        "operand {id} of {} is undefined",
                        inst.opcode.name()
                    )));
                }
            }
        }
        for (&target, decorations) in &self.decorations {
            for args in decorations.values() {
                for id in args.iter().filter_map(Operand::id) {
                    if !defined(id) {
                        return Err(ModuleError::InvariantViolation(format!(
                            "decoration argument {id} on {target} is undefined"
                        )));
                    }
                }
            }
        }
        for (&target, members) in &self.member_decorations {
            for decorations in members.values() {
                for args in decorations.values() {
                    for id in args.iter().filter_map(Operand::id) {
                        if !defined(id) {
                            return Err(ModuleError::InvariantViolation(format!(
                                "member decoration argument {id} on {target} is undefined"
                            )));
                        }
                    }
                }
            }
        }
        for ep in self.entry_points.values() {
            for &id in &ep.interface {
                if !defined(id) {
                    return Err(ModuleError::InvariantViolation(format!(
                        "interface id {id} of entry point \"{}\" is undefined",
                        ep.name
                    )));
                }
            }
            for mode in &ep.modes {
                for id in mode.operands.iter().filter_map(Operand::id) {
                    if !defined(id) {
                        return Err(ModuleError::InvariantViolation(format!(
                            "execution mode operand {id} of entry point \"{}\" is undefined",
                            ep.name
                        )));
                    }
                }
            }
        }
        for def in self.functions.values() {
            for block in &def.blocks {
                if let Some(merge) = &block.merge {
                    for id in merge.referenced_ids() {
                        if !defined(id) {
                            return Err(ModuleError::InvariantViolation(format!(
                                "merge target {id} in block {} is undefined",
                                block.label
                            )));
                        }
                    }
                }
                for inst in &block.instructions {
                    for id in inst.operand_ids() {
                        if !defined(id) {
                            return Err(ModuleError::InvariantViolation(format!(
                                "operand {id} of {} in block {} is undefined",
                                inst.opcode.name(),
                                block.label
                            )));
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Drops an empty debug record so round trips stay clean.
    pub(crate) fn normalize_debug(&mut self) {
        if self.debug.as_ref().is_some_and(DebugInfo::is_empty) {
            self.debug = None;
        }
    }
}

/// Synthesizes the declaring instruction for a type.
pub(crate) fn type_instruction(id: Id, ty: &Type) -> Instruction {
    let (opcode, operands) = match ty {
        Type::Void => (Opcode::TypeVoid, vec![]),
        Type::Bool => (Opcode::TypeBool, vec![]),
        Type::Int { width, signed } => (
            Opcode::TypeInt,
            vec![Operand::Literal(*width), Operand::Literal(u32::from(*signed))],
        ),
        Type::Float { width } => (Opcode::TypeFloat, vec![Operand::Literal(*width)]),
        Type::Vector { element, count } => (
            Opcode::TypeVector,
            vec![Operand::IdRef(*element), Operand::Literal(*count)],
        ),
        Type::Matrix { column, columns } => (
            Opcode::TypeMatrix,
            vec![Operand::IdRef(*column), Operand::Literal(*columns)],
        ),
        Type::Array {
            element,
            length: Some(length),
        } => (
            Opcode::TypeArray,
            vec![Operand::IdRef(*element), Operand::IdRef(*length)],
        ),
        Type::Array {
            element,
            length: None,
        } => (Opcode::TypeRuntimeArray, vec![Operand::IdRef(*element)]),
        Type::Struct { members } => (
            Opcode::TypeStruct,
            members.iter().map(|&m| Operand::IdRef(m)).collect(),
        ),
        Type::Pointer {
            storage_class,
            pointee,
        } => (
            Opcode::TypePointer,
            vec![
                Operand::Enum(EnumKind::StorageClass, *storage_class),
                Operand::IdRef(*pointee),
            ],
        ),
        Type::Image {
            sampled_type,
            dim,
            depth,
            arrayed,
            multisampled,
            sampled,
            format,
            access,
        } => {
            let mut operands = vec![
                Operand::IdRef(*sampled_type),
                Operand::Enum(EnumKind::Dim, *dim),
                Operand::Literal(*depth),
                Operand::Literal(*arrayed),
                Operand::Literal(*multisampled),
                Operand::Literal(*sampled),
                Operand::Enum(EnumKind::ImageFormat, *format),
            ];
            if let Some(access) = access {
                operands.push(Operand::Enum(EnumKind::AccessQualifier, *access));
            }
            (Opcode::TypeImage, operands)
        }
        Type::Sampler => (Opcode::TypeSampler, vec![]),
        Type::SampledImage { image } => {
            (Opcode::TypeSampledImage, vec![Operand::IdRef(*image)])
        }
        Type::Opaque { name } => (
            Opcode::TypeOpaque,
            vec![Operand::LiteralString(name.clone())],
        ),
        Type::Function {
            return_type,
            params,
        } => {
            let mut operands = vec![Operand::IdRef(*return_type)];
            operands.extend(params.iter().map(|&p| Operand::IdRef(p)));
            (Opcode::TypeFunction, operands)
        }
    };
    Instruction::with_result(opcode, id, operands)
}

/// Incremental builder for a [`FunctionDef`].
///
/// Blocks are opened explicitly; `build` checks that every block ends with
/// a terminator.
pub struct FunctionBuilder {
    def: FunctionDef,
}

impl FunctionBuilder {
    /// Starts a function with the given ids and control mask.
    pub fn new(id: Id, type_id: Id, return_type: Id, control: FunctionControl) -> Self {
        Self {
            def: FunctionDef {
                id,
                type_id,
                return_type,
                control,
                parameters: Vec::new(),
                blocks: Vec::new(),
            },
        }
    }

    /// Declares the next parameter.
    pub fn add_parameter(&mut self, id: Id, type_id: Id) -> &mut Self {
        self.def
            .parameters
            .push(Instruction::with_result_type(
                Opcode::FunctionParameter,
                type_id,
                id,
                vec![],
            ));
        self
    }

    /// Opens a new block with the given label.
    pub fn begin_block(&mut self, label: Id) -> &mut Self {
        self.def.blocks.push(Block {
            label,
            merge: None,
            instructions: Vec::new(),
        });
        self
    }

    /// Attaches a merge declaration to the current block.
    pub fn set_merge(&mut self, merge: MergeDecl) -> Result<&mut Self, ModuleError> {
        let block = self.current_block("merge declaration")?;
        if block.merge.is_some() {
            return Err(ModuleError::InvariantViolation(format!(
                "block {} already has a merge declaration",
                block.label
            )));
        }
        block.merge = Some(merge);
        Ok(self)
    }

    /// Appends an instruction to the current block.
    ///
    /// Merge instructions are hoisted into the block's [`MergeDecl`] so
    /// the structured form stays the single representation.
    pub fn append(&mut self, inst: Instruction) -> Result<&mut Self, ModuleError> {
        if matches!(inst.opcode, Opcode::SelectionMerge | Opcode::LoopMerge) {
            let merge = MergeDecl::from_instruction(&inst)?;
            return self.set_merge(merge);
        }
        let block = self.current_block("instruction")?;
        block.instructions.push(inst);
        Ok(self)
    }

    fn current_block(&mut self, what: &'static str) -> Result<&mut Block, ModuleError> {
        self.def
            .blocks
            .last_mut()
            .ok_or(ModuleError::UnexpectedInstruction {
                opcode: what,
                context: "before the first block",
            })
    }

    /// Finishes the function, validating block termination.
    pub fn build(self) -> Result<FunctionDef, ModuleError> {
        for block in &self.def.blocks {
            if block.terminator().is_none() {
                return Err(ModuleError::InvariantViolation(format!(
                    "block {} does not end with a terminator",
                    block.label
                )));
            }
        }
        Ok(self.def)
    }
}
