//! nyr: a small class-based scripting language compiled to bytecode and run
//! on a stack VM with a tracing garbage collector.

pub mod chunk;
pub mod compiler;
pub mod diagnostic;
pub mod heap;
pub mod lexer;
pub mod object;
pub mod table;
pub mod value;
pub mod vm;

pub use vm::{InterpretError, RuntimeError, RuntimeFailure, Vm, VmConfig};
