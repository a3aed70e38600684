use std::rc::Rc;

use crate::chunk::Chunk;
use crate::table::Table;
use crate::value::Value;
use crate::vm::Vm;

/// Stable handle to an object in the heap arena.
///
/// Handles stay valid until the object is swept; the slot may then be reused
/// by a later allocation, so a handle must never outlive its object's
/// reachability.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjRef(u32);

impl ObjRef {
    #[inline]
    pub(crate) fn from_index(index: u32) -> Self {
        ObjRef(index)
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Host function exposed to scripts. Receives the argument window; an `Err`
/// is raised as a runtime error at the call site.
pub type NativeFn = fn(&mut Vm, &[Value]) -> Result<Value, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjKind {
    String,
    Function,
    Native,
    Closure,
    Upvalue,
    Class,
    Instance,
    BoundMethod,
}

impl ObjKind {
    pub fn name(self) -> &'static str {
        match self {
            ObjKind::String => "string",
            ObjKind::Function => "function",
            ObjKind::Native => "native function",
            ObjKind::Closure => "function",
            ObjKind::Upvalue => "upvalue",
            ObjKind::Class => "class",
            ObjKind::Instance => "instance",
            ObjKind::BoundMethod => "method",
        }
    }
}

pub enum Obj {
    String(ObjString),
    Function(ObjFunction),
    Native(ObjNative),
    Closure(ObjClosure),
    Upvalue(ObjUpvalue),
    Class(ObjClass),
    Instance(ObjInstance),
    BoundMethod(ObjBoundMethod),
}

impl Obj {
    pub fn kind(&self) -> ObjKind {
        match self {
            Obj::String(_) => ObjKind::String,
            Obj::Function(_) => ObjKind::Function,
            Obj::Native(_) => ObjKind::Native,
            Obj::Closure(_) => ObjKind::Closure,
            Obj::Upvalue(_) => ObjKind::Upvalue,
            Obj::Class(_) => ObjKind::Class,
            Obj::Instance(_) => ObjKind::Instance,
            Obj::BoundMethod(_) => ObjKind::BoundMethod,
        }
    }

    /// Approximate footprint used for collection pacing.
    pub(crate) fn size_hint(&self) -> usize {
        let payload = match self {
            Obj::String(s) => s.chars.len(),
            Obj::Function(f) => {
                f.chunk.code.len() * std::mem::size_of::<u32>()
                    + f.chunk.constants.len() * std::mem::size_of::<Value>()
                    + f.chunk.lines.len() * std::mem::size_of::<u32>()
            }
            Obj::Native(_) => 0,
            Obj::Closure(c) => c.upvalues.capacity() * std::mem::size_of::<ObjRef>(),
            Obj::Upvalue(_) => 0,
            Obj::Class(c) => c.methods.capacity() * Table::ENTRY_SIZE,
            Obj::Instance(i) => i.fields.capacity() * Table::ENTRY_SIZE,
            Obj::BoundMethod(_) => 0,
        };
        std::mem::size_of::<Obj>() + payload
    }
}

pub struct ObjString {
    pub chars: Box<str>,
    pub hash: u32,
}

impl ObjString {
    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }
}

/// FNV-1a, 32-bit.
pub fn hash_string(chars: &str) -> u32 {
    let mut hash: u32 = 2_166_136_261;
    for b in chars.bytes() {
        hash ^= b as u32;
        hash = hash.wrapping_mul(16_777_619);
    }
    hash
}

pub struct ObjFunction {
    pub arity: u8,
    pub upvalue_count: usize,
    pub name: Option<ObjRef>,
    pub chunk: Rc<Chunk>,
}

pub struct ObjNative {
    pub name: &'static str,
    /// `None` accepts any argument count.
    pub arity: Option<u8>,
    pub function: NativeFn,
}

pub struct ObjClosure {
    pub function: ObjRef,
    pub upvalues: Vec<ObjRef>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ObjUpvalue {
    /// Still aliases a live slot of the VM stack.
    Open(usize),
    /// Owns the value since the defining frame returned.
    Closed(Value),
}

pub struct ObjClass {
    pub name: ObjRef,
    pub methods: Table,
}

pub struct ObjInstance {
    pub class: ObjRef,
    pub fields: Table,
}

pub struct ObjBoundMethod {
    pub receiver: Value,
    pub method: ObjRef,
}
