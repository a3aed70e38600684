use std::fmt::Write;

use crate::heap::Heap;
use crate::value::Value;

// ── Opcodes ─────────────────────────────────────────────────────────
//
// Every instruction is one 32-bit word:  [OP:8 | A:8 | Bx:16]
//
// Bx carries the constant index, slot, or jump distance. A is only used
// for argument counts (CALL, INVOKE, SUPER_INVOKE). CLOSURE is followed by
// one word per captured variable: (is_local << 8) | index.

pub(crate) const OP_CONSTANT: u8 = 0;
pub(crate) const OP_NULL: u8 = 1;
pub(crate) const OP_TRUE: u8 = 2;
pub(crate) const OP_FALSE: u8 = 3;
pub(crate) const OP_POP: u8 = 4;
pub(crate) const OP_GET_LOCAL: u8 = 5;
pub(crate) const OP_SET_LOCAL: u8 = 6;
pub(crate) const OP_GET_GLOBAL: u8 = 7;
pub(crate) const OP_DEFINE_GLOBAL: u8 = 8;
pub(crate) const OP_SET_GLOBAL: u8 = 9;
pub(crate) const OP_GET_UPVALUE: u8 = 10;
pub(crate) const OP_SET_UPVALUE: u8 = 11;
pub(crate) const OP_GET_PROPERTY: u8 = 12;
pub(crate) const OP_SET_PROPERTY: u8 = 13;
pub(crate) const OP_GET_SUPER: u8 = 14;
pub(crate) const OP_EQUAL: u8 = 15;
pub(crate) const OP_GREATER: u8 = 16;
pub(crate) const OP_LESS: u8 = 17;
pub(crate) const OP_ADD: u8 = 18;
pub(crate) const OP_SUB: u8 = 19;
pub(crate) const OP_MUL: u8 = 20;
pub(crate) const OP_DIV: u8 = 21;
pub(crate) const OP_NOT: u8 = 22;
pub(crate) const OP_NEGATE: u8 = 23;
pub(crate) const OP_PRINT: u8 = 24;
pub(crate) const OP_JUMP: u8 = 25;
pub(crate) const OP_JUMP_IF_FALSE: u8 = 26;
pub(crate) const OP_LOOP: u8 = 27;
pub(crate) const OP_CALL: u8 = 28;
pub(crate) const OP_INVOKE: u8 = 29;
pub(crate) const OP_SUPER_INVOKE: u8 = 30;
pub(crate) const OP_CLOSURE: u8 = 31;
pub(crate) const OP_CLOSE_UPVALUE: u8 = 32;
pub(crate) const OP_RETURN: u8 = 33;
pub(crate) const OP_CLASS: u8 = 34;
pub(crate) const OP_INHERIT: u8 = 35;
pub(crate) const OP_METHOD: u8 = 36;
pub(crate) const OP_DUP: u8 = 37;

/// Constant pool and jump distances are both addressed by Bx.
pub(crate) const MAX_CONSTANTS: usize = u16::MAX as usize + 1;
pub(crate) const MAX_JUMP: usize = u16::MAX as usize;

// ── Instruction encoding ────────────────────────────────────────────

#[inline(always)]
pub(crate) fn encode_abx(op: u8, a: u8, bx: u16) -> u32 {
    (op as u32) << 24 | (a as u32) << 16 | bx as u32
}

#[inline(always)]
pub(crate) fn encode_upvalue(is_local: bool, index: u8) -> u32 {
    (is_local as u32) << 8 | index as u32
}

#[inline(always)]
pub(crate) fn decode_op(inst: u32) -> u8 {
    (inst >> 24) as u8
}

#[inline(always)]
pub(crate) fn decode_a(inst: u32) -> u8 {
    (inst >> 16) as u8
}

#[inline(always)]
pub(crate) fn decode_bx(inst: u32) -> u16 {
    inst as u16
}

/// `(is_local, index)` of a capture word following CLOSURE.
#[inline(always)]
pub(crate) fn decode_upvalue(word: u32) -> (bool, u8) {
    (word & 0x100 != 0, word as u8)
}

// ── Chunk ────────────────────────────────────────────────────────────

/// Bytecode of one function with its constant pool and a source line per
/// instruction word.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    pub code: Vec<u32>,
    pub lines: Vec<u32>,
    pub constants: Vec<Value>,
}

impl Chunk {
    pub fn new() -> Self {
        Chunk::default()
    }

    pub(crate) fn emit(&mut self, inst: u32, line: u32) -> usize {
        let idx = self.code.len();
        self.code.push(inst);
        self.lines.push(line);
        idx
    }

    /// Appends `value` to the pool. Callers check the index against
    /// `MAX_CONSTANTS`.
    pub(crate) fn add_constant(&mut self, value: Value) -> usize {
        self.constants.push(value);
        self.constants.len() - 1
    }

    pub(crate) fn patch_bx(&mut self, at: usize, bx: u16) {
        let inst = self.code[at];
        self.code[at] = (inst & 0xFFFF_0000) | bx as u32;
    }

    pub fn line(&self, offset: usize) -> u32 {
        self.lines.get(offset).copied().unwrap_or(0)
    }

    pub fn disassemble(&self, name: &str, heap: &Heap) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "== {name} ==");
        let mut offset = 0;
        while offset < self.code.len() {
            offset = self.disassemble_instruction(offset, heap, &mut out);
        }
        out
    }

    /// Appends one instruction to `out` and returns the offset of the next.
    pub fn disassemble_instruction(&self, offset: usize, heap: &Heap, out: &mut String) -> usize {
        let inst = self.code[offset];
        let op = decode_op(inst);
        let a = decode_a(inst);
        let bx = decode_bx(inst);

        let _ = write!(out, "{offset:04} ");
        if offset > 0 && self.lines[offset] == self.lines[offset - 1] {
            let _ = write!(out, "   | ");
        } else {
            let _ = write!(out, "{:4} ", self.lines[offset]);
        }

        let name = op_name(op);
        let constant = |idx: u16| {
            self.constants
                .get(idx as usize)
                .map_or_else(|| "?".to_string(), |v| heap.display(*v))
        };

        match op {
            OP_CONSTANT | OP_GET_GLOBAL | OP_DEFINE_GLOBAL | OP_SET_GLOBAL | OP_GET_PROPERTY
            | OP_SET_PROPERTY | OP_GET_SUPER | OP_CLASS | OP_METHOD => {
                let _ = writeln!(out, "{name:<16} {bx:4} '{}'", constant(bx));
            }
            OP_GET_LOCAL | OP_SET_LOCAL | OP_GET_UPVALUE | OP_SET_UPVALUE => {
                let _ = writeln!(out, "{name:<16} {bx:4}");
            }
            OP_CALL => {
                let _ = writeln!(out, "{name:<16} {a:4}");
            }
            OP_INVOKE | OP_SUPER_INVOKE => {
                let _ = writeln!(out, "{name:<16} ({a} args) {bx:4} '{}'", constant(bx));
            }
            OP_JUMP | OP_JUMP_IF_FALSE => {
                let target = offset + 1 + bx as usize;
                let _ = writeln!(out, "{name:<16} {offset:4} -> {target}");
            }
            OP_LOOP => {
                let target = (offset + 1).saturating_sub(bx as usize);
                let _ = writeln!(out, "{name:<16} {offset:4} -> {target}");
            }
            OP_CLOSURE => {
                let _ = writeln!(out, "{name:<16} {bx:4} {}", constant(bx));
                let count = self
                    .constants
                    .get(bx as usize)
                    .and_then(|v| v.as_object())
                    .map_or(0, |r| heap.function(r).upvalue_count);
                for i in 0..count {
                    let at = offset + 1 + i;
                    let Some(&word) = self.code.get(at) else { break };
                    let (is_local, index) = decode_upvalue(word);
                    let kind = if is_local { "local" } else { "upvalue" };
                    let _ = writeln!(out, "{at:04}    |                     {kind} {index}");
                }
                return offset + 1 + count;
            }
            _ => {
                let _ = writeln!(out, "{name}");
            }
        }
        offset + 1
    }
}

pub(crate) fn op_name(op: u8) -> &'static str {
    match op {
        OP_CONSTANT => "OP_CONSTANT",
        OP_NULL => "OP_NULL",
        OP_TRUE => "OP_TRUE",
        OP_FALSE => "OP_FALSE",
        OP_POP => "OP_POP",
        OP_GET_LOCAL => "OP_GET_LOCAL",
        OP_SET_LOCAL => "OP_SET_LOCAL",
        OP_GET_GLOBAL => "OP_GET_GLOBAL",
        OP_DEFINE_GLOBAL => "OP_DEFINE_GLOBAL",
        OP_SET_GLOBAL => "OP_SET_GLOBAL",
        OP_GET_UPVALUE => "OP_GET_UPVALUE",
        OP_SET_UPVALUE => "OP_SET_UPVALUE",
        OP_GET_PROPERTY => "OP_GET_PROPERTY",
        OP_SET_PROPERTY => "OP_SET_PROPERTY",
        OP_GET_SUPER => "OP_GET_SUPER",
        OP_EQUAL => "OP_EQUAL",
        OP_GREATER => "OP_GREATER",
        OP_LESS => "OP_LESS",
        OP_ADD => "OP_ADD",
        OP_SUB => "OP_SUB",
        OP_MUL => "OP_MUL",
        OP_DIV => "OP_DIV",
        OP_NOT => "OP_NOT",
        OP_NEGATE => "OP_NEGATE",
        OP_PRINT => "OP_PRINT",
        OP_JUMP => "OP_JUMP",
        OP_JUMP_IF_FALSE => "OP_JUMP_IF_FALSE",
        OP_LOOP => "OP_LOOP",
        OP_CALL => "OP_CALL",
        OP_INVOKE => "OP_INVOKE",
        OP_SUPER_INVOKE => "OP_SUPER_INVOKE",
        OP_CLOSURE => "OP_CLOSURE",
        OP_CLOSE_UPVALUE => "OP_CLOSE_UPVALUE",
        OP_RETURN => "OP_RETURN",
        OP_CLASS => "OP_CLASS",
        OP_INHERIT => "OP_INHERIT",
        OP_METHOD => "OP_METHOD",
        OP_DUP => "OP_DUP",
        _ => "OP_UNKNOWN",
    }
}
