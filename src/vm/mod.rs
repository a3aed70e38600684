mod natives;

use std::io::Write;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::chunk::*;
use crate::compiler::{compile, CompileError};
use crate::heap::{GcConfig, GcStats, Heap, Marker, NoRoots, Trace};
use crate::object::{
    NativeFn, Obj, ObjBoundMethod, ObjClass, ObjClosure, ObjInstance, ObjKind, ObjNative, ObjRef,
    ObjUpvalue,
};
use crate::table::Table;
use crate::value::Value;

/// Stack slots budgeted per frame; the operand stack may hold
/// `frames_max * STACK_PER_FRAME` values.
const STACK_PER_FRAME: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VmConfig {
    pub frames_max: usize,
    pub gc: GcConfig,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig { frames_max: 64, gc: GcConfig::default() }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeError {
    #[error("operand of '{op}' must be {expected}, found {found}")]
    TypeMismatch { op: &'static str, expected: &'static str, found: String },
    #[error("undefined variable '{0}'")]
    UndefinedVariable(String),
    #[error("undefined property '{0}'")]
    UndefinedProperty(String),
    #[error("can only call functions and classes, found {0}")]
    NotCallable(&'static str),
    #[error("expected {expected} arguments but got {got}")]
    ArityMismatch { expected: u8, got: u8 },
    #[error("stack overflow")]
    StackOverflow,
    #[error("only instances have properties, found {found}")]
    NotAnInstance { found: &'static str },
    #[error("superclass must be a class, found {0}")]
    InvalidSuperclass(&'static str),
    #[error("{name}(): {message}")]
    Native { name: &'static str, message: String },
    #[error("failed to write output: {0}")]
    Output(String),
}

impl RuntimeError {
    pub fn code(&self) -> &'static str {
        match self {
            RuntimeError::TypeMismatch { .. } => "NYR-R001",
            RuntimeError::UndefinedVariable(_) => "NYR-R002",
            RuntimeError::UndefinedProperty(_) => "NYR-R003",
            RuntimeError::NotCallable(_) => "NYR-R004",
            RuntimeError::ArityMismatch { .. } => "NYR-R005",
            RuntimeError::StackOverflow => "NYR-R006",
            RuntimeError::NotAnInstance { .. } => "NYR-R007",
            RuntimeError::InvalidSuperclass(_) => "NYR-R008",
            RuntimeError::Native { .. } => "NYR-R009",
            RuntimeError::Output(_) => "NYR-R010",
        }
    }

    pub fn suggestion(&self) -> Option<String> {
        match self {
            RuntimeError::UndefinedVariable(name) => {
                Some(format!("declare it first with 'let {name} = ...;'"))
            }
            RuntimeError::StackOverflow => {
                Some("check for unbounded recursion, or raise --max-frames".to_string())
            }
            _ => None,
        }
    }
}

/// One entry of a runtime stack trace, innermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    pub function: String,
    pub line: u32,
}

/// A runtime error together with where it happened.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("[line {line}] {error}")]
pub struct RuntimeFailure {
    pub error: RuntimeError,
    pub line: u32,
    pub trace: Vec<TraceFrame>,
}

#[derive(Debug, thiserror::Error)]
pub enum InterpretError {
    #[error("{} compile error(s)", .0.len())]
    Compile(Vec<CompileError>),
    #[error(transparent)]
    Runtime(#[from] RuntimeFailure),
}

type VmResult<T> = Result<T, RuntimeError>;

struct CallFrame {
    closure: ObjRef,
    /// Shared with the closure's function so the loop can read code without
    /// going through the heap.
    chunk: Rc<Chunk>,
    ip: usize,
    /// Stack slot of the callee; locals start here.
    base: usize,
}

/// The VM's root set, borrowed field by field so the heap can be borrowed
/// mutably at the same time.
struct VmRoots<'a> {
    stack: &'a [Value],
    frames: &'a [CallFrame],
    open_upvalues: &'a [ObjRef],
    globals: &'a Table,
    init_string: ObjRef,
}

impl Trace for VmRoots<'_> {
    fn trace(&self, marker: &mut Marker<'_>) {
        self.stack.trace(marker);
        for frame in self.frames {
            marker.mark_object(frame.closure);
        }
        self.open_upvalues.trace(marker);
        self.globals.trace(marker);
        marker.mark_object(self.init_string);
    }
}

pub struct Vm {
    heap: Heap,
    globals: Table,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    /// Open upvalues, sorted by the stack slot they alias.
    open_upvalues: Vec<ObjRef>,
    init_string: ObjRef,
    config: VmConfig,
    output: Box<dyn Write>,
    started: Instant,
}

impl Vm {
    pub fn new(config: VmConfig) -> Self {
        Vm::with_output(config, std::io::stdout())
    }

    /// A VM whose `print` statements write to `output`.
    pub fn with_output(config: VmConfig, output: impl Write + 'static) -> Self {
        let mut heap = Heap::new(config.gc);
        let init_string = heap.copy_string("init", &NoRoots);
        let mut vm = Vm {
            heap,
            globals: Table::new(),
            stack: Vec::with_capacity(STACK_PER_FRAME),
            frames: Vec::with_capacity(config.frames_max),
            open_upvalues: Vec::new(),
            init_string,
            config,
            output: Box::new(output),
            started: Instant::now(),
        };
        natives::define_all(&mut vm);
        vm
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn gc_stats(&self) -> GcStats {
        self.heap.stats()
    }

    /// Time since the VM was created.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Pins a value as a root until the matching `pop`.
    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    /// Panics if the stack is empty.
    pub fn pop(&mut self) -> Value {
        match self.stack.pop() {
            Some(value) => value,
            None => unreachable!("pop from empty VM stack"),
        }
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    fn split(&mut self) -> (&mut Heap, VmRoots<'_>) {
        let Vm { heap, stack, frames, open_upvalues, globals, init_string, .. } = self;
        let roots = VmRoots { stack, frames, open_upvalues, globals, init_string: *init_string };
        (heap, roots)
    }

    fn alloc(&mut self, obj: Obj) -> ObjRef {
        let (heap, roots) = self.split();
        heap.alloc(obj, &roots)
    }

    pub fn copy_string(&mut self, chars: &str) -> ObjRef {
        let (heap, roots) = self.split();
        heap.copy_string(chars, &roots)
    }

    pub fn take_string(&mut self, chars: String) -> ObjRef {
        let (heap, roots) = self.split();
        heap.take_string(chars, &roots)
    }

    /// Runs a full collection now, whatever the allocation budget says.
    pub fn collect_garbage(&mut self) {
        let (heap, roots) = self.split();
        heap.collect(&[&roots]);
    }

    pub(crate) fn define_native(&mut self, name: &'static str, arity: Option<u8>, function: NativeFn) {
        let name_ref = self.copy_string(name);
        self.push(Value::object(name_ref));
        let native = self.alloc(Obj::Native(ObjNative { name, arity, function }));
        self.push(Value::object(native));
        let key = self.heap.key(name_ref);
        self.heap.table_set(&mut self.globals, key, Value::object(native));
        self.pop();
        self.pop();
    }

    /// Compiles and runs `source`. Globals survive between calls, so a REPL
    /// can feed one line at a time.
    pub fn interpret(&mut self, source: &str) -> Result<(), InterpretError> {
        let function = {
            let (heap, roots) = self.split();
            compile(source, heap, &roots).map_err(InterpretError::Compile)?
        };
        self.push(Value::object(function));
        let closure = self.alloc(Obj::Closure(ObjClosure { function, upvalues: Vec::new() }));
        self.pop();
        self.push(Value::object(closure));

        let result = match self.call(closure, 0) {
            Ok(()) => self.run(),
            Err(error) => Err(error),
        };
        match result {
            Ok(()) => Ok(()),
            Err(error) => Err(InterpretError::Runtime(self.fail(error))),
        }
    }

    /// Compiles `source` and lists the bytecode of the script and every
    /// function nested in it.
    pub fn disassemble(&mut self, source: &str) -> Result<String, Vec<CompileError>> {
        let script = {
            let (heap, roots) = self.split();
            compile(source, heap, &roots)?
        };
        let mut functions = vec![script];
        let mut out = String::new();
        let mut i = 0;
        while i < functions.len() {
            let function = self.heap.function(functions[i]);
            let name = match function.name {
                Some(name) => self.heap.string(name).chars.to_string(),
                None => "<script>".to_string(),
            };
            out.push_str(&function.chunk.disassemble(&name, &self.heap));
            for &constant in &function.chunk.constants {
                if self.heap.kind(constant) == Some(ObjKind::Function) {
                    functions.extend(constant.as_object());
                }
            }
            i += 1;
        }
        Ok(out)
    }

    /// Builds the report for `error` and resets the VM so the next
    /// `interpret` starts clean.
    fn fail(&mut self, error: RuntimeError) -> RuntimeFailure {
        let trace: Vec<TraceFrame> = self
            .frames
            .iter()
            .rev()
            .map(|frame| {
                let function = self.heap.function(self.heap.closure(frame.closure).function);
                let name = match function.name {
                    Some(name) => format!("{}()", self.heap.string(name).chars),
                    None => "script".to_string(),
                };
                TraceFrame { function: name, line: frame.chunk.line(frame.ip.saturating_sub(1)) }
            })
            .collect();
        let line = trace.first().map_or(0, |frame| frame.line);
        log::debug!("runtime error at line {line}: {error}");

        // Globals may still hold closures over these slots.
        self.close_upvalues(0);
        self.stack.clear();
        self.frames.clear();
        RuntimeFailure { error, line, trace }
    }

    // ---- Frames and operands ----

    fn frame(&self) -> &CallFrame {
        match self.frames.last() {
            Some(frame) => frame,
            None => unreachable!("no active call frame"),
        }
    }

    fn frame_mut(&mut self) -> &mut CallFrame {
        match self.frames.last_mut() {
            Some(frame) => frame,
            None => unreachable!("no active call frame"),
        }
    }

    fn read(&mut self) -> u32 {
        let frame = self.frame_mut();
        let inst = frame.chunk.code[frame.ip];
        frame.ip += 1;
        inst
    }

    fn constant(&self, index: u16) -> Value {
        self.frame().chunk.constants[index as usize]
    }

    fn type_mismatch(&self, op: &'static str, expected: &'static str, found: &[Value]) -> RuntimeError {
        let found = found.iter().map(|&v| self.heap.type_name(v)).collect::<Vec<_>>().join(" and ");
        RuntimeError::TypeMismatch { op, expected, found }
    }

    fn numbers(&mut self, op: &'static str) -> VmResult<(f64, f64)> {
        let (a, b) = (self.peek(1), self.peek(0));
        match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => {
                self.pop();
                self.pop();
                Ok((x, y))
            }
            _ => Err(self.type_mismatch(op, "numbers", &[a, b])),
        }
    }

    fn instance_of(&self, value: Value) -> Option<ObjRef> {
        value.as_object().filter(|&r| matches!(self.heap.get(r), Obj::Instance(_)))
    }

    fn not_an_instance(&self, value: Value) -> RuntimeError {
        RuntimeError::NotAnInstance { found: self.heap.type_name(value) }
    }

    fn undefined_property(&self, name: ObjRef) -> RuntimeError {
        RuntimeError::UndefinedProperty(self.heap.string(name).chars.to_string())
    }

    // ---- Calls ----

    fn call_value(&mut self, callee: Value, argc: u8) -> VmResult<()> {
        let Some(r) = callee.as_object() else {
            return Err(RuntimeError::NotCallable(self.heap.type_name(callee)));
        };
        match self.heap.get(r).kind() {
            ObjKind::Closure => self.call(r, argc),
            ObjKind::Native => self.call_native(r, argc),
            ObjKind::Class => self.call_class(r, argc),
            ObjKind::BoundMethod => {
                let bound = self.heap.bound_method(r);
                let (receiver, method) = (bound.receiver, bound.method);
                let slot = self.stack.len() - argc as usize - 1;
                self.stack[slot] = receiver;
                self.call(method, argc)
            }
            _ => Err(RuntimeError::NotCallable(self.heap.type_name(callee))),
        }
    }

    fn call(&mut self, closure: ObjRef, argc: u8) -> VmResult<()> {
        let function = self.heap.function(self.heap.closure(closure).function);
        if argc != function.arity {
            return Err(RuntimeError::ArityMismatch { expected: function.arity, got: argc });
        }
        let chunk = Rc::clone(&function.chunk);
        if self.frames.len() >= self.config.frames_max
            || self.stack.len() >= self.config.frames_max * STACK_PER_FRAME
        {
            return Err(RuntimeError::StackOverflow);
        }
        let base = self.stack.len() - argc as usize - 1;
        self.frames.push(CallFrame { closure, chunk, ip: 0, base });
        Ok(())
    }

    /// Natives see the argument window while it is still on the stack, so
    /// anything they allocate cannot collect their arguments.
    fn call_native(&mut self, native: ObjRef, argc: u8) -> VmResult<()> {
        let ObjNative { name, arity, function } = *self.heap.native(native);
        match arity {
            Some(expected) if expected != argc => {
                return Err(RuntimeError::ArityMismatch { expected, got: argc });
            }
            _ => {}
        }
        let start = self.stack.len() - argc as usize;
        let args = self.stack[start..].to_vec();
        let result =
            function(self, &args).map_err(|message| RuntimeError::Native { name, message })?;
        self.stack.truncate(start - 1);
        self.push(result);
        Ok(())
    }

    fn call_class(&mut self, class: ObjRef, argc: u8) -> VmResult<()> {
        let instance = self.alloc(Obj::Instance(ObjInstance { class, fields: Table::new() }));
        let slot = self.stack.len() - argc as usize - 1;
        self.stack[slot] = Value::object(instance);

        let key = self.heap.key(self.init_string);
        match self.heap.class(class).methods.get(key) {
            Some(init) => self.call(object(init), argc),
            None if argc != 0 => Err(RuntimeError::ArityMismatch { expected: 0, got: argc }),
            None => Ok(()),
        }
    }

    /// `receiver.name(args)` without materializing a bound method. A field
    /// holding a callable shadows a method of the same name.
    fn invoke(&mut self, name: ObjRef, argc: u8) -> VmResult<()> {
        let receiver = self.peek(argc as usize);
        let Some(instance) = self.instance_of(receiver) else {
            return Err(self.not_an_instance(receiver));
        };
        let key = self.heap.key(name);
        let instance = self.heap.instance(instance);
        if let Some(field) = instance.fields.get(key) {
            let slot = self.stack.len() - argc as usize - 1;
            self.stack[slot] = field;
            return self.call_value(field, argc);
        }
        let class = instance.class;
        self.invoke_from_class(class, name, argc)
    }

    fn invoke_from_class(&mut self, class: ObjRef, name: ObjRef, argc: u8) -> VmResult<()> {
        let key = self.heap.key(name);
        match self.heap.class(class).methods.get(key) {
            Some(method) => self.call(object(method), argc),
            None => Err(self.undefined_property(name)),
        }
    }

    /// Replaces the receiver on top of the stack with `class.name` bound to it.
    fn bind_method(&mut self, class: ObjRef, name: ObjRef) -> VmResult<()> {
        let key = self.heap.key(name);
        let Some(method) = self.heap.class(class).methods.get(key) else {
            return Err(self.undefined_property(name));
        };
        let receiver = self.peek(0);
        let bound =
            self.alloc(Obj::BoundMethod(ObjBoundMethod { receiver, method: object(method) }));
        self.pop();
        self.push(Value::object(bound));
        Ok(())
    }

    // ---- Upvalues ----

    fn capture_upvalue(&mut self, slot: usize) -> ObjRef {
        let heap = &self.heap;
        match self.open_upvalues.binary_search_by_key(&slot, |&u| open_slot(heap, u)) {
            Ok(i) => self.open_upvalues[i],
            Err(i) => {
                let upvalue = self.alloc(Obj::Upvalue(ObjUpvalue::Open(slot)));
                self.open_upvalues.insert(i, upvalue);
                upvalue
            }
        }
    }

    /// Closes every open upvalue aliasing `boundary` or a slot above it.
    fn close_upvalues(&mut self, boundary: usize) {
        let heap = &self.heap;
        let first = self.open_upvalues.partition_point(|&u| open_slot(heap, u) < boundary);
        for upvalue in self.open_upvalues.drain(first..) {
            let slot = open_slot(&self.heap, upvalue);
            *self.heap.upvalue_mut(upvalue) = ObjUpvalue::Closed(self.stack[slot]);
        }
    }

    fn frame_upvalue(&self, index: u16) -> ObjRef {
        self.heap.closure(self.frame().closure).upvalues[index as usize]
    }

    // ---- Execution ----

    fn run(&mut self) -> VmResult<()> {
        loop {
            if log::log_enabled!(log::Level::Trace) {
                self.trace_instruction();
            }

            let inst = self.read();
            let a = decode_a(inst);
            let bx = decode_bx(inst);

            match decode_op(inst) {
                OP_CONSTANT => {
                    let value = self.constant(bx);
                    self.push(value);
                }
                OP_NULL => self.push(Value::NULL),
                OP_TRUE => self.push(Value::boolean(true)),
                OP_FALSE => self.push(Value::boolean(false)),
                OP_POP => {
                    self.pop();
                }
                OP_DUP => {
                    let value = self.peek(0);
                    self.push(value);
                }
                OP_GET_LOCAL => {
                    let value = self.stack[self.frame().base + bx as usize];
                    self.push(value);
                }
                OP_SET_LOCAL => {
                    let slot = self.frame().base + bx as usize;
                    self.stack[slot] = self.peek(0);
                }
                OP_GET_GLOBAL => {
                    let name = object(self.constant(bx));
                    let key = self.heap.key(name);
                    match self.globals.get(key) {
                        Some(value) => self.push(value),
                        None => {
                            let name = self.heap.string(name).chars.to_string();
                            return Err(RuntimeError::UndefinedVariable(name));
                        }
                    }
                }
                OP_DEFINE_GLOBAL => {
                    let key = self.heap.key(object(self.constant(bx)));
                    let value = self.peek(0);
                    self.heap.table_set(&mut self.globals, key, value);
                    self.pop();
                }
                OP_SET_GLOBAL => {
                    let name = object(self.constant(bx));
                    let key = self.heap.key(name);
                    let value = self.peek(0);
                    if self.heap.table_set(&mut self.globals, key, value) {
                        self.globals.delete(key);
                        let name = self.heap.string(name).chars.to_string();
                        return Err(RuntimeError::UndefinedVariable(name));
                    }
                }
                OP_GET_UPVALUE => {
                    let value = match self.heap.upvalue(self.frame_upvalue(bx)) {
                        ObjUpvalue::Open(slot) => self.stack[slot],
                        ObjUpvalue::Closed(value) => value,
                    };
                    self.push(value);
                }
                OP_SET_UPVALUE => {
                    let upvalue = self.frame_upvalue(bx);
                    let value = self.peek(0);
                    match self.heap.upvalue(upvalue) {
                        ObjUpvalue::Open(slot) => self.stack[slot] = value,
                        ObjUpvalue::Closed(_) => {
                            *self.heap.upvalue_mut(upvalue) = ObjUpvalue::Closed(value);
                        }
                    }
                }
                OP_GET_PROPERTY => {
                    let receiver = self.peek(0);
                    let Some(instance) = self.instance_of(receiver) else {
                        return Err(self.not_an_instance(receiver));
                    };
                    let name = object(self.constant(bx));
                    let key = self.heap.key(name);
                    let instance = self.heap.instance(instance);
                    match instance.fields.get(key) {
                        Some(value) => {
                            self.pop();
                            self.push(value);
                        }
                        None => {
                            let class = instance.class;
                            self.bind_method(class, name)?;
                        }
                    }
                }
                OP_SET_PROPERTY => {
                    let target = self.peek(1);
                    let Some(instance) = self.instance_of(target) else {
                        return Err(self.not_an_instance(target));
                    };
                    let key = self.heap.key(object(self.constant(bx)));
                    let value = self.peek(0);
                    self.heap.set_field(instance, key, value);
                    self.pop();
                    self.pop();
                    self.push(value);
                }
                OP_GET_SUPER => {
                    let name = object(self.constant(bx));
                    let superclass = object(self.pop());
                    self.bind_method(superclass, name)?;
                }
                OP_EQUAL => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::boolean(a == b));
                }
                OP_GREATER => {
                    let (a, b) = self.numbers(">")?;
                    self.push(Value::boolean(a > b));
                }
                OP_LESS => {
                    let (a, b) = self.numbers("<")?;
                    self.push(Value::boolean(a < b));
                }
                OP_ADD => self.add()?,
                OP_SUB => {
                    let (a, b) = self.numbers("-")?;
                    self.push(Value::number(a - b));
                }
                OP_MUL => {
                    let (a, b) = self.numbers("*")?;
                    self.push(Value::number(a * b));
                }
                OP_DIV => {
                    let (a, b) = self.numbers("/")?;
                    self.push(Value::number(a / b));
                }
                OP_NOT => {
                    let value = self.pop();
                    self.push(Value::boolean(value.is_falsey()));
                }
                OP_NEGATE => {
                    let value = self.peek(0);
                    let Some(n) = value.as_number() else {
                        return Err(self.type_mismatch("-", "a number", &[value]));
                    };
                    self.pop();
                    self.push(Value::number(-n));
                }
                OP_PRINT => {
                    let value = self.pop();
                    let text = self.heap.display(value);
                    writeln!(self.output, "{text}")
                        .map_err(|e| RuntimeError::Output(e.to_string()))?;
                }
                OP_JUMP => self.frame_mut().ip += bx as usize,
                OP_JUMP_IF_FALSE => {
                    if self.peek(0).is_falsey() {
                        self.frame_mut().ip += bx as usize;
                    }
                }
                OP_LOOP => self.frame_mut().ip -= bx as usize,
                OP_CALL => {
                    let callee = self.peek(a as usize);
                    self.call_value(callee, a)?;
                }
                OP_INVOKE => {
                    let name = object(self.constant(bx));
                    self.invoke(name, a)?;
                }
                OP_SUPER_INVOKE => {
                    let name = object(self.constant(bx));
                    let superclass = object(self.pop());
                    self.invoke_from_class(superclass, name, a)?;
                }
                OP_CLOSURE => self.make_closure(bx),
                OP_CLOSE_UPVALUE => {
                    self.close_upvalues(self.stack.len() - 1);
                    self.pop();
                }
                OP_RETURN => {
                    let result = self.pop();
                    let Some(frame) = self.frames.pop() else {
                        unreachable!("return without a call frame");
                    };
                    self.close_upvalues(frame.base);
                    self.stack.truncate(frame.base);
                    if self.frames.is_empty() {
                        return Ok(());
                    }
                    self.push(result);
                }
                OP_CLASS => {
                    let name = object(self.constant(bx));
                    let class = self.alloc(Obj::Class(ObjClass { name, methods: Table::new() }));
                    self.push(Value::object(class));
                }
                OP_INHERIT => {
                    let superclass = self.peek(1);
                    if self.heap.kind(superclass) != Some(ObjKind::Class) {
                        return Err(RuntimeError::InvalidSuperclass(self.heap.type_name(superclass)));
                    }
                    let subclass = object(self.peek(0));
                    self.heap.inherit(subclass, object(superclass));
                    self.pop();
                }
                OP_METHOD => {
                    let key = self.heap.key(object(self.constant(bx)));
                    let method = self.peek(0);
                    let class = object(self.peek(1));
                    self.heap.set_method(class, key, method);
                    self.pop();
                }
                op => unreachable!("unknown opcode {op}"),
            }
        }
    }

    /// `+` on two numbers adds; on two strings concatenates. The operands
    /// stay on the stack until the result exists.
    fn add(&mut self) -> VmResult<()> {
        let (a, b) = (self.peek(1), self.peek(0));
        if let (Some(x), Some(y)) = (a.as_number(), b.as_number()) {
            self.pop();
            self.pop();
            self.push(Value::number(x + y));
            return Ok(());
        }
        let joined = match (self.heap.as_string(a), self.heap.as_string(b)) {
            (Some(x), Some(y)) => {
                let mut joined = String::with_capacity(x.len() + y.len());
                joined.push_str(&x.chars);
                joined.push_str(&y.chars);
                joined
            }
            _ => return Err(self.type_mismatch("+", "two numbers or two strings", &[a, b])),
        };
        let result = self.take_string(joined);
        self.pop();
        self.pop();
        self.push(Value::object(result));
        Ok(())
    }

    /// Captures come first so the closure is allocated with every upvalue
    /// already rooted.
    fn make_closure(&mut self, bx: u16) {
        let function = object(self.constant(bx));
        let count = self.heap.function(function).upvalue_count;
        let mut upvalues = Vec::with_capacity(count);
        for _ in 0..count {
            let (is_local, index) = decode_upvalue(self.read());
            let upvalue = if is_local {
                let slot = self.frame().base + index as usize;
                self.capture_upvalue(slot)
            } else {
                self.frame_upvalue(index as u16)
            };
            upvalues.push(upvalue);
        }
        let closure = self.alloc(Obj::Closure(ObjClosure { function, upvalues }));
        self.push(Value::object(closure));
    }

    fn trace_instruction(&self) {
        let stack: Vec<String> = self.stack.iter().map(|&v| self.heap.display(v)).collect();
        let frame = self.frame();
        let mut line = String::new();
        frame.chunk.disassemble_instruction(frame.ip, &self.heap, &mut line);
        log::trace!("[{}] {}", stack.join(", "), line.trim_end());
    }
}

fn object(value: Value) -> ObjRef {
    match value.as_object() {
        Some(r) => r,
        None => unreachable!("expected an object operand, found {value:?}"),
    }
}

fn open_slot(heap: &Heap, upvalue: ObjRef) -> usize {
    match heap.upvalue(upvalue) {
        ObjUpvalue::Open(slot) => slot,
        ObjUpvalue::Closed(_) => unreachable!("closed upvalue in the open list"),
    }
}
