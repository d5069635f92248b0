//! The line-oriented textual form.
//!
//! One instruction per line: `%<id> = OpName(operands...)::%<type_id>` when
//! the instruction has a result, `OpName(operands...)` when it does not.
//! Enum operands render by symbolic name, integer literals as fixed-width
//! hexadecimal, strings quoted. `;` starts a comment; the disassembler
//! records the header fields in leading comments that [`assemble`] reads
//! back.

use std::collections::HashMap;
use std::fmt::Write as _;

use spvkit_ir::grammar::{ext_inst_name, enum_symbol, enum_value, Opcode, OperandKind, Quantifier};
use spvkit_ir::{Id, Instruction, Operand, RawModule};

use crate::CodecError;

// ---------------------------------------------------------------------------
// Disassembly
// ---------------------------------------------------------------------------

/// Renders a flat module as text.
pub fn disassemble(module: &RawModule) -> String {
    let imports = collect_imports(module);
    let mut out = String::new();
    let _ = writeln!(out, "; version 0x{:08x}", module.version);
    let _ = writeln!(out, "; generator 0x{:08x}", module.generator);
    let _ = writeln!(out, "; schema 0x{:08x}", module.schema);
    for inst in &module.instructions {
        out.push_str(&render_instruction(inst, &imports));
        out.push('\n');
    }
    out
}

/// Maps extended-instruction-set import ids to their set names.
fn collect_imports(module: &RawModule) -> HashMap<Id, String> {
    module
        .instructions
        .iter()
        .filter(|inst| inst.opcode == Opcode::ExtInstImport)
        .filter_map(|inst| {
            Some((inst.result?, inst.string_at(0)?.to_owned()))
        })
        .collect()
}

fn render_instruction(inst: &Instruction, imports: &HashMap<Id, String>) -> String {
    let mut line = String::new();
    if let Some(result) = inst.result {
        let _ = write!(line, "{result} = ");
    }
    line.push_str(inst.opcode.name());
    line.push('(');
    for (index, operand) in inst.operands.iter().enumerate() {
        if index > 0 {
            line.push_str(", ");
        }
        line.push_str(&render_operand(inst, index, operand, imports));
    }
    line.push(')');
    if let Some(result_type) = inst.result_type {
        let _ = write!(line, "::{result_type}");
    }
    line
}

fn render_operand(
    inst: &Instruction,
    index: usize,
    operand: &Operand,
    imports: &HashMap<Id, String>,
) -> String {
    match operand {
        Operand::IdRef(id) => id.to_string(),
        Operand::Literal(value) => {
            // The extended opcode of OpExtInst renders symbolically when
            // the imported set is known.
            if inst.opcode == Opcode::ExtInst && index == 1 {
                if let Some(name) = inst
                    .id_at(0)
                    .and_then(|set| imports.get(&set))
                    .and_then(|set| ext_inst_name(set, *value))
                {
                    return name.to_owned();
                }
            }
            format!("0x{value:08x}")
        }
        Operand::LiteralString(s) => quote(s),
        Operand::Enum(kind, value) => {
            if kind.is_mask() {
                render_mask(*kind, *value)
            } else {
                enum_symbol(*kind, *value)
                    .map(str::to_owned)
                    .unwrap_or_else(|| format!("0x{value:08x}"))
            }
        }
    }
}

fn render_mask(kind: spvkit_ir::grammar::EnumKind, value: u32) -> String {
    if value == 0 {
        return enum_symbol(kind, 0).unwrap_or("None").to_owned();
    }
    let mut parts = Vec::new();
    for bit in 0..32 {
        let flag = 1u32 << bit;
        if value & flag != 0 {
            match enum_symbol(kind, flag) {
                Some(name) => parts.push(name.to_owned()),
                None => parts.push(format!("0x{flag:08x}")),
            }
        }
    }
    parts.join("|")
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

/// Parses the textual form back into a flat module.
///
/// The header comments emitted by [`disassemble`] are honored when present;
/// `bound` is recomputed from the highest id in the stream.
pub fn assemble(text: &str) -> Result<RawModule, CodecError> {
    let mut module = RawModule::new();
    let mut imports: HashMap<Id, String> = HashMap::new();
    let mut max_id = 0u32;

    for (line_index, raw_line) in text.lines().enumerate() {
        let line_no = line_index + 1;
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(comment) = line.strip_prefix(';') {
            parse_header_comment(comment, &mut module);
            continue;
        }

        let inst = parse_instruction(line, line_no, &imports)?;
        if inst.opcode == Opcode::ExtInstImport {
            if let (Some(id), Some(set)) = (inst.result, inst.string_at(0)) {
                imports.insert(id, set.to_owned());
            }
        }
        for id in inst
            .result
            .into_iter()
            .chain(inst.result_type)
            .chain(inst.operand_ids())
        {
            max_id = max_id.max(id.get());
        }
        module.instructions.push(inst);
    }

    module.bound = max_id + 1;
    Ok(module)
}

fn parse_header_comment(comment: &str, module: &mut RawModule) {
    let mut parts = comment.split_whitespace();
    let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
        return;
    };
    let Ok(value) = parse_number_str(value) else {
        return;
    };
    match key {
        "version" => module.version = value,
        "generator" => module.generator = value,
        "schema" => module.schema = value,
        _ => {}
    }
}

fn parse_number_str(s: &str) -> Result<u32, ()> {
    if let Some(hex) = s.strip_prefix("0x") {
        u32::from_str_radix(hex, 16).map_err(|_| ())
    } else {
        s.parse().map_err(|_| ())
    }
}

struct LineParser<'a> {
    line: &'a str,
    pos: usize,
    line_no: usize,
}

impl<'a> LineParser<'a> {
    fn new(line: &'a str, line_no: usize) -> Self {
        Self { line, pos: 0, line_no }
    }

    fn error(&self, message: impl Into<String>) -> CodecError {
        CodecError::Parse {
            line: self.line_no,
            message: message.into(),
        }
    }

    fn rest(&self) -> &'a str {
        &self.line[self.pos..]
    }

    fn skip_ws(&mut self) {
        while self.rest().starts_with(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_ws();
        self.rest().chars().next()
    }

    fn eat(&mut self, expected: char) -> Result<(), CodecError> {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            Ok(())
        } else {
            Err(self.error(format!("expected '{expected}'")))
        }
    }

    fn eat_str(&mut self, expected: &str) -> bool {
        self.skip_ws();
        if self.rest().starts_with(expected) {
            self.pos += expected.len();
            true
        } else {
            false
        }
    }

    fn parse_id(&mut self) -> Result<Id, CodecError> {
        self.eat('%')?;
        let digits = self.take_while(|c| c.is_ascii_digit());
        let value: u32 = digits
            .parse()
            .map_err(|_| self.error("expected an id number after '%'"))?;
        Id::new(value).ok_or_else(|| self.error("id 0 is reserved"))
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        for c in self.rest().chars() {
            if pred(c) {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        &self.line[start..self.pos]
    }

    fn parse_ident(&mut self) -> Result<&'a str, CodecError> {
        self.skip_ws();
        let ident = self.take_while(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
        if ident.is_empty() {
            Err(self.error("expected an identifier"))
        } else {
            Ok(ident)
        }
    }

    fn parse_number(&mut self) -> Result<u32, CodecError> {
        self.skip_ws();
        let token = self.take_while(|c| c.is_ascii_alphanumeric());
        parse_number_str(token).map_err(|_| self.error(format!("invalid number '{token}'")))
    }

    fn parse_string(&mut self) -> Result<String, CodecError> {
        self.eat('"')?;
        let mut out = String::new();
        let mut chars = self.rest().char_indices();
        while let Some((offset, c)) = chars.next() {
            match c {
                '"' => {
                    self.pos += offset + 1;
                    return Ok(out);
                }
                '\\' => match chars.next() {
                    Some((_, 'n')) => out.push('\n'),
                    Some((_, 't')) => out.push('\t'),
                    Some((_, escaped)) => out.push(escaped),
                    None => break,
                },
                other => out.push(other),
            }
        }
        Err(self.error("unterminated string literal"))
    }
}

fn parse_instruction(
    line: &str,
    line_no: usize,
    imports: &HashMap<Id, String>,
) -> Result<Instruction, CodecError> {
    let mut p = LineParser::new(line, line_no);

    let result = if p.peek() == Some('%') {
        let id = p.parse_id()?;
        p.eat('=')?;
        Some(id)
    } else {
        None
    };

    let name = p.parse_ident()?;
    let opcode = Opcode::from_name(name)
        .ok_or_else(|| p.error(format!("unknown instruction '{name}'")))?;
    let layout = opcode.layout();

    if layout.has_result != result.is_some() {
        return Err(p.error(if layout.has_result {
            format!("{name} requires a '%id =' result")
        } else {
            format!("{name} does not produce a result")
        }));
    }

    p.eat('(')?;
    let mut operands = Vec::new();
    let mut first = true;
    for spec in layout.operands {
        match spec.quantifier {
            Quantifier::Required => {
                eat_separator(&mut p, &mut first)?;
                parse_operand(&mut p, opcode, spec.kind, imports, &mut operands)?;
            }
            Quantifier::Optional => {
                if p.peek() != Some(')') {
                    eat_separator(&mut p, &mut first)?;
                    parse_operand(&mut p, opcode, spec.kind, imports, &mut operands)?;
                }
            }
            Quantifier::Variadic => {
                while p.peek() != Some(')') {
                    eat_separator(&mut p, &mut first)?;
                    parse_operand(&mut p, opcode, spec.kind, imports, &mut operands)?;
                }
            }
        }
    }
    p.eat(')')?;

    let result_type = if p.eat_str("::") {
        Some(p.parse_id()?)
    } else {
        None
    };
    if layout.has_result_type != result_type.is_some() {
        return Err(p.error(if layout.has_result_type {
            format!("{name} requires a '::%type' suffix")
        } else {
            format!("{name} does not take a result type")
        }));
    }
    if p.peek().is_some() {
        return Err(p.error("trailing input after instruction"));
    }

    Ok(Instruction {
        opcode,
        result_type,
        result,
        operands,
    })
}

fn eat_separator(p: &mut LineParser<'_>, first: &mut bool) -> Result<(), CodecError> {
    if *first {
        *first = false;
        Ok(())
    } else {
        p.eat(',')
    }
}

fn parse_operand(
    p: &mut LineParser<'_>,
    opcode: Opcode,
    kind: OperandKind,
    imports: &HashMap<Id, String>,
    out: &mut Vec<Operand>,
) -> Result<(), CodecError> {
    match kind {
        OperandKind::IdRef => out.push(Operand::IdRef(p.parse_id()?)),
        OperandKind::LiteralInteger | OperandKind::LiteralContextDependent => {
            // The extended opcode of OpExtInst may be written by name.
            if opcode == Opcode::ExtInst
                && out.len() == 1
                && p.peek().is_some_and(|c| c.is_ascii_alphabetic())
            {
                let name = p.parse_ident()?;
                let set = out
                    .first()
                    .and_then(Operand::id)
                    .and_then(|id| imports.get(&id))
                    .ok_or_else(|| p.error("OpExtInst set id is not an import"))?;
                let value = spvkit_ir::grammar::glsl_std_450::opcode(name)
                    .filter(|_| set == spvkit_ir::grammar::glsl_std_450::SET_NAME)
                    .ok_or_else(|| {
                        p.error(format!("unknown extended instruction '{name}' in {set}"))
                    })?;
                out.push(Operand::Literal(value));
            } else {
                out.push(Operand::Literal(p.parse_number()?));
            }
        }
        OperandKind::LiteralString => out.push(Operand::LiteralString(p.parse_string()?)),
        OperandKind::PairLiteralIdRef => {
            out.push(Operand::Literal(p.parse_number()?));
            p.eat(',')?;
            out.push(Operand::IdRef(p.parse_id()?));
        }
        OperandKind::Enum(enum_kind) => {
            let mut value = 0u32;
            loop {
                if p.peek().is_some_and(|c| c.is_ascii_digit()) {
                    value |= p.parse_number()?;
                } else {
                    let name = p.parse_ident()?;
                    value |= enum_value(enum_kind, name).ok_or_else(|| {
                        p.error(format!("unknown {enum_kind:?} value '{name}'"))
                    })?;
                }
                if !p.eat_str("|") {
                    break;
                }
            }
            out.push(Operand::Enum(enum_kind, value));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Semantic equality
// ---------------------------------------------------------------------------

/// Id-renumbering-tolerant equivalence of two flat modules.
///
/// True iff a bijection on ids makes the instruction sequences equal; the
/// bijection is built greedily while walking the streams in lockstep.
pub fn semantically_equal(a: &RawModule, b: &RawModule) -> bool {
    if a.instructions.len() != b.instructions.len() {
        return false;
    }
    let mut forward: HashMap<Id, Id> = HashMap::new();
    let mut backward: HashMap<Id, Id> = HashMap::new();
    let mut bind = move |x: Id, y: Id| -> bool {
        let f = *forward.entry(x).or_insert(y);
        let g = *backward.entry(y).or_insert(x);
        f == y && g == x
    };

    for (ia, ib) in a.instructions.iter().zip(&b.instructions) {
        if ia.opcode != ib.opcode || ia.operands.len() != ib.operands.len() {
            return false;
        }
        match (ia.result_type, ib.result_type) {
            (None, None) => {}
            (Some(x), Some(y)) if bind(x, y) => {}
            _ => return false,
        }
        match (ia.result, ib.result) {
            (None, None) => {}
            (Some(x), Some(y)) if bind(x, y) => {}
            _ => return false,
        }
        for (oa, ob) in ia.operands.iter().zip(&ib.operands) {
            let ok = match (oa, ob) {
                (Operand::IdRef(x), Operand::IdRef(y)) => bind(*x, *y),
                (Operand::Literal(x), Operand::Literal(y)) => x == y,
                (Operand::LiteralString(x), Operand::LiteralString(y)) => x == y,
                (Operand::Enum(kx, x), Operand::Enum(ky, y)) => kx == ky && x == y,
                _ => false,
            };
            if !ok {
                return false;
            }
        }
    }
    true
}
