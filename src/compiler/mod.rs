use std::collections::HashMap;
use std::ops::Range;
use std::rc::Rc;

use crate::chunk::*;
use crate::heap::{Heap, Marker, Trace};
use crate::lexer::{self, LexErrorKind, Lexeme, Token};
use crate::object::{Obj, ObjFunction, ObjRef};
use crate::value::Value;

const MAX_ERRORS: usize = 20;
const MAX_LOCALS: usize = 256;
const MAX_UPVALUES: usize = 256;
const MAX_ARGS: usize = 255;
/// Bound on nested expressions, statements and declarations, which the
/// compiler handles by recursion.
const MAX_NESTING: usize = 128;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileErrorKind {
    #[error(transparent)]
    Lex(#[from] LexErrorKind),
    #[error("expected {expected}, found {found}")]
    Expected { expected: &'static str, found: String },
    #[error("expected expression, found {found}")]
    ExpectedExpression { found: String },
    #[error("invalid assignment target")]
    InvalidAssignmentTarget,
    #[error("can't read local variable '{0}' in its own initializer")]
    OwnInitializer(String),
    #[error("already a variable named '{name}' in this scope")]
    DuplicateLocal { name: String, previous: Range<usize> },
    #[error("too many local variables in function")]
    TooManyLocals,
    #[error("too many closure variables in function")]
    TooManyUpvalues,
    #[error("can't have more than 255 parameters")]
    TooManyParameters,
    #[error("can't have more than 255 arguments")]
    TooManyArguments,
    #[error("too many constants in one chunk")]
    TooManyConstants,
    #[error("too much code to jump over")]
    JumpTooLarge,
    #[error("loop body too large")]
    LoopTooLarge,
    #[error("can't return from top-level code")]
    ReturnAtTopLevel,
    #[error("can't use 'this' outside of a class")]
    ThisOutsideClass,
    #[error("can't use 'super' outside of a class")]
    SuperOutsideClass,
    #[error("can't use 'super' in a class with no superclass")]
    SuperWithoutSuperclass,
    #[error("a class can't inherit from itself")]
    InheritFromSelf,
    #[error("code nested more than {MAX_NESTING} levels deep")]
    TooDeeplyNested,
}

impl CompileErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            CompileErrorKind::Lex(LexErrorKind::UnterminatedString) => "NYR-L001",
            CompileErrorKind::Lex(LexErrorKind::UnterminatedComment) => "NYR-L002",
            CompileErrorKind::Lex(LexErrorKind::UnexpectedChar(_)) => "NYR-L003",
            CompileErrorKind::Expected { .. } => "NYR-C001",
            CompileErrorKind::ExpectedExpression { .. } => "NYR-C002",
            CompileErrorKind::InvalidAssignmentTarget => "NYR-C003",
            CompileErrorKind::OwnInitializer(_) => "NYR-C004",
            CompileErrorKind::DuplicateLocal { .. } => "NYR-C005",
            CompileErrorKind::TooManyLocals => "NYR-C006",
            CompileErrorKind::TooManyUpvalues => "NYR-C007",
            CompileErrorKind::TooManyParameters => "NYR-C008",
            CompileErrorKind::TooManyArguments => "NYR-C009",
            CompileErrorKind::TooManyConstants => "NYR-C010",
            CompileErrorKind::JumpTooLarge => "NYR-C011",
            CompileErrorKind::LoopTooLarge => "NYR-C012",
            CompileErrorKind::ReturnAtTopLevel => "NYR-C013",
            CompileErrorKind::ThisOutsideClass => "NYR-C014",
            CompileErrorKind::SuperOutsideClass => "NYR-C015",
            CompileErrorKind::SuperWithoutSuperclass => "NYR-C016",
            CompileErrorKind::InheritFromSelf => "NYR-C017",
            CompileErrorKind::TooDeeplyNested => "NYR-C018",
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("[line {line}] {kind}")]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub span: Range<usize>,
    pub line: u32,
}

impl CompileError {
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn suggestion(&self) -> Option<String> {
        match &self.kind {
            CompileErrorKind::Lex(kind) => lexer::LexError {
                kind: *kind,
                span: self.span.clone(),
                line: self.line,
            }
            .suggestion(),
            CompileErrorKind::Expected { expected: "';' after expression", .. }
            | CompileErrorKind::Expected { expected: "';' after value", .. } => {
                Some("statements end with ';'".to_string())
            }
            CompileErrorKind::OwnInitializer(name) => {
                Some(format!("give the new variable a name other than '{name}'"))
            }
            CompileErrorKind::InheritFromSelf => Some("name a different class after ':'".into()),
            CompileErrorKind::TooDeeplyNested => {
                Some("move part of the nested code into a function or a variable".into())
            }
            _ => None,
        }
    }
}

impl From<lexer::LexError> for CompileError {
    fn from(e: lexer::LexError) -> Self {
        CompileError { kind: e.kind.into(), span: e.span, line: e.line }
    }
}

type Result<T> = std::result::Result<T, CompileError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
    Unary,
    Call,
    Primary,
}

impl Precedence {
    fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

fn infix_precedence(token: &Token) -> Precedence {
    match token {
        Token::LParen | Token::Dot => Precedence::Call,
        Token::Star | Token::Slash => Precedence::Factor,
        Token::Plus | Token::Minus => Precedence::Term,
        Token::Greater | Token::GreaterEq | Token::Less | Token::LessEq => Precedence::Comparison,
        Token::EqEq | Token::BangEq => Precedence::Equality,
        Token::AndAnd => Precedence::And,
        Token::OrOr => Precedence::Or,
        _ => Precedence::None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    Script,
    Function,
    Method,
    Initializer,
}

struct Local {
    name: String,
    /// Where it was declared. Empty for the implicit slot-0 and `super` locals.
    span: Range<usize>,
    /// `None` between declaration and the end of the initializer.
    depth: Option<usize>,
    is_captured: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
struct Capture {
    index: u8,
    is_local: bool,
}

/// Everything the compiler tracks for one function body in progress.
struct FunctionState {
    kind: FunctionKind,
    name: Option<ObjRef>,
    arity: u8,
    chunk: Chunk,
    /// Pool index of each constant, keyed by its bits.
    constant_index: HashMap<u64, u16>,
    locals: Vec<Local>,
    captures: Vec<Capture>,
    scope_depth: usize,
}

impl FunctionState {
    fn new(kind: FunctionKind, name: Option<ObjRef>) -> Self {
        // Slot 0 holds the callee, or the receiver inside methods.
        let receiver = match kind {
            FunctionKind::Method | FunctionKind::Initializer => "this",
            FunctionKind::Script | FunctionKind::Function => "",
        };
        FunctionState {
            kind,
            name,
            arity: 0,
            chunk: Chunk::new(),
            constant_index: HashMap::new(),
            locals: vec![Local {
                name: receiver.to_string(),
                span: 0..0,
                depth: Some(0),
                is_captured: false,
            }],
            captures: Vec::new(),
            scope_depth: 0,
        }
    }
}

struct ClassState {
    has_superclass: bool,
}

/// Roots while compiling: constants and names of every unfinished function,
/// plus whatever the caller keeps alive.
struct CompilerRoots<'a> {
    states: &'a [FunctionState],
    outer: &'a dyn Trace,
}

impl Trace for CompilerRoots<'_> {
    fn trace(&self, marker: &mut Marker<'_>) {
        for state in self.states {
            state.name.trace(marker);
            state.chunk.constants.trace(marker);
        }
        self.outer.trace(marker);
    }
}

/// Where to rewind compiler state after a failed declaration.
struct Checkpoint {
    pos: usize,
    states: usize,
    classes: usize,
    scope_depth: usize,
    locals: usize,
}

struct Compiler<'a> {
    tokens: Vec<Lexeme>,
    pos: usize,
    eof: Range<usize>,
    heap: &'a mut Heap,
    roots: &'a dyn Trace,
    states: Vec<FunctionState>,
    classes: Vec<ClassState>,
    errors: Vec<CompileError>,
    /// Current recursion depth.
    nesting: usize,
}

/// Compiles a whole script into a function of arity 0 with no name.
///
/// Allocations made while compiling may trigger a collection; `roots` is
/// everything else the caller needs kept alive across it.
pub fn compile(
    source: &str,
    heap: &mut Heap,
    roots: &dyn Trace,
) -> std::result::Result<ObjRef, Vec<CompileError>> {
    let (tokens, lex_errors) = lexer::lex(source);
    let mut compiler = Compiler {
        tokens,
        pos: 0,
        eof: source.len()..source.len(),
        heap,
        roots,
        states: vec![FunctionState::new(FunctionKind::Script, None)],
        classes: Vec::new(),
        errors: lex_errors.into_iter().map(CompileError::from).collect(),
        nesting: 0,
    };

    while !compiler.at_end() && compiler.errors.len() < MAX_ERRORS {
        compiler.declaration();
    }
    compiler.emit_return();

    if !compiler.errors.is_empty() {
        let mut errors = compiler.errors;
        errors.sort_by_key(|e| e.span.start);
        errors.truncate(MAX_ERRORS);
        return Err(errors);
    }
    match compiler.finish_function() {
        Ok((function, _)) => Ok(function),
        Err(e) => Err(vec![e]),
    }
}

impl Compiler<'_> {
    // ---- Token access ----

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|l| &l.token)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == Some(token)
    }

    fn advance_if(&mut self, token: &Token) -> bool {
        let hit = self.check(token);
        if hit {
            self.pos += 1;
        }
        hit
    }

    /// Next token, consumed. `None` at end of input.
    fn next_token(&mut self) -> Option<Token> {
        let token = self.peek().cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn found(&self) -> String {
        self.peek().map_or_else(|| "end of input".to_string(), Token::describe)
    }

    fn expect(&mut self, token: &Token, expected: &'static str) -> Result<()> {
        if self.advance_if(token) {
            Ok(())
        } else {
            Err(self.error_at_current(CompileErrorKind::Expected { expected, found: self.found() }))
        }
    }

    fn expect_ident(&mut self, expected: &'static str) -> Result<String> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error_at_current(CompileErrorKind::Expected {
                expected,
                found: self.found(),
            })),
        }
    }

    fn line(&self) -> u32 {
        match self.pos.checked_sub(1).and_then(|i| self.tokens.get(i)) {
            Some(lexeme) => lexeme.line,
            None => self.tokens.first().map_or(1, |l| l.line),
        }
    }

    fn error_at_current(&self, kind: CompileErrorKind) -> CompileError {
        match self.tokens.get(self.pos) {
            Some(lexeme) => CompileError { kind, span: lexeme.span.clone(), line: lexeme.line },
            None => CompileError { kind, span: self.eof.clone(), line: self.line() },
        }
    }

    fn previous_span(&self) -> Range<usize> {
        match self.pos.checked_sub(1).and_then(|i| self.tokens.get(i)) {
            Some(lexeme) => lexeme.span.clone(),
            None => self.eof.clone(),
        }
    }

    fn error_at_previous(&self, kind: CompileErrorKind) -> CompileError {
        match self.pos.checked_sub(1).and_then(|i| self.tokens.get(i)) {
            Some(lexeme) => CompileError { kind, span: lexeme.span.clone(), line: lexeme.line },
            None => self.error_at_current(kind),
        }
    }

    // ---- Error recovery ----

    fn checkpoint(&self) -> Checkpoint {
        let state = self.state();
        Checkpoint {
            pos: self.pos,
            states: self.states.len(),
            classes: self.classes.len(),
            scope_depth: state.scope_depth,
            locals: state.locals.len(),
        }
    }

    fn recover(&mut self, error: CompileError, checkpoint: Checkpoint) {
        log::debug!("compile error: {error}");
        if self.errors.len() < MAX_ERRORS {
            self.errors.push(error);
        }
        self.states.truncate(checkpoint.states);
        self.classes.truncate(checkpoint.classes);
        let state = self.state_mut();
        state.scope_depth = checkpoint.scope_depth;
        state.locals.truncate(checkpoint.locals);
        if self.pos == checkpoint.pos && !self.at_end() {
            self.pos += 1;
        }
        self.synchronize();
    }

    /// Skips to the next statement boundary.
    fn synchronize(&mut self) {
        while !self.at_end() {
            if self.pos > 0 && self.tokens[self.pos - 1].token == Token::Semicolon {
                return;
            }
            if matches!(
                self.peek(),
                Some(
                    Token::Class
                        | Token::Def
                        | Token::Let
                        | Token::For
                        | Token::If
                        | Token::While
                        | Token::Do
                        | Token::Print
                        | Token::Return
                )
            ) {
                return;
            }
            self.pos += 1;
        }
    }

    /// Runs `f` one level deeper, failing instead past `MAX_NESTING`.
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.nesting >= MAX_NESTING {
            return Err(self.error_at_current(CompileErrorKind::TooDeeplyNested));
        }
        self.nesting += 1;
        let result = f(self);
        self.nesting -= 1;
        result
    }

    // ---- Function state ----

    fn state(&self) -> &FunctionState {
        &self.states[self.states.len() - 1]
    }

    fn state_mut(&mut self) -> &mut FunctionState {
        let top = self.states.len() - 1;
        &mut self.states[top]
    }

    fn copy_string(&mut self, chars: &str) -> ObjRef {
        let roots = CompilerRoots { states: &self.states, outer: self.roots };
        self.heap.copy_string(chars, &roots)
    }

    /// Pops the innermost function and allocates its object.
    fn finish_function(&mut self) -> Result<(ObjRef, Vec<Capture>)> {
        let Some(state) = self.states.pop() else {
            unreachable!("function state stack is empty");
        };
        let name = state
            .name
            .map_or_else(|| "<script>".to_string(), |n| self.heap.string(n).chars.to_string());
        log::debug!(
            "compiled {} ({} instructions, {} constants)",
            name,
            state.chunk.code.len(),
            state.chunk.constants.len()
        );
        let function = Obj::Function(ObjFunction {
            arity: state.arity,
            upvalue_count: state.captures.len(),
            name: state.name,
            chunk: Rc::new(state.chunk),
        });
        let roots = CompilerRoots { states: &self.states, outer: self.roots };
        let function = self.heap.alloc(function, &roots);
        Ok((function, state.captures))
    }

    // ---- Emission ----

    fn emit(&mut self, op: u8, a: u8, bx: u16) -> usize {
        let line = self.line();
        self.state_mut().chunk.emit(encode_abx(op, a, bx), line)
    }

    fn emit_op(&mut self, op: u8) -> usize {
        self.emit(op, 0, 0)
    }

    fn emit_return(&mut self) {
        if self.state().kind == FunctionKind::Initializer {
            self.emit(OP_GET_LOCAL, 0, 0);
        } else {
            self.emit_op(OP_NULL);
        }
        self.emit_op(OP_RETURN);
    }

    fn make_constant(&mut self, value: Value) -> Result<u16> {
        if let Some(&idx) = self.state().constant_index.get(&value.to_bits()) {
            return Ok(idx);
        }
        if self.state().chunk.constants.len() >= MAX_CONSTANTS {
            return Err(self.error_at_previous(CompileErrorKind::TooManyConstants));
        }
        let state = self.state_mut();
        let idx = state.chunk.add_constant(value) as u16;
        state.constant_index.insert(value.to_bits(), idx);
        Ok(idx)
    }

    fn emit_constant(&mut self, value: Value) -> Result<()> {
        let idx = self.make_constant(value)?;
        self.emit(OP_CONSTANT, 0, idx);
        Ok(())
    }

    fn identifier_constant(&mut self, name: &str) -> Result<u16> {
        let string = self.copy_string(name);
        self.make_constant(Value::object(string))
    }

    fn emit_jump(&mut self, op: u8) -> usize {
        self.emit(op, 0, u16::MAX)
    }

    fn patch_jump(&mut self, at: usize) -> Result<()> {
        let distance = self.state().chunk.code.len() - at - 1;
        if distance > MAX_JUMP {
            return Err(self.error_at_previous(CompileErrorKind::JumpTooLarge));
        }
        self.state_mut().chunk.patch_bx(at, distance as u16);
        Ok(())
    }

    fn emit_loop(&mut self, loop_start: usize) -> Result<()> {
        let distance = self.state().chunk.code.len() + 1 - loop_start;
        if distance > MAX_JUMP {
            return Err(self.error_at_previous(CompileErrorKind::LoopTooLarge));
        }
        self.emit(OP_LOOP, 0, distance as u16);
        Ok(())
    }

    // ---- Scopes and variables ----

    fn begin_scope(&mut self) {
        self.state_mut().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.state_mut().scope_depth -= 1;
        loop {
            let state = self.state();
            let Some(local) = state.locals.last() else { break };
            if local.depth.is_none_or(|d| d <= state.scope_depth) {
                break;
            }
            let op = if local.is_captured { OP_CLOSE_UPVALUE } else { OP_POP };
            self.emit_op(op);
            self.state_mut().locals.pop();
        }
    }

    fn add_local(&mut self, name: String, span: Range<usize>) -> Result<()> {
        if self.state().locals.len() >= MAX_LOCALS {
            return Err(self.error_at_previous(CompileErrorKind::TooManyLocals));
        }
        self.state_mut().locals.push(Local { name, span, depth: None, is_captured: false });
        Ok(())
    }

    fn declare_variable(&mut self, name: &str) -> Result<()> {
        let state = self.state();
        if state.scope_depth == 0 {
            return Ok(());
        }
        let duplicate = state
            .locals
            .iter()
            .rev()
            .take_while(|l| l.depth.is_none_or(|d| d >= state.scope_depth))
            .find(|l| l.name == name);
        if let Some(first) = duplicate {
            let previous = first.span.clone();
            let name = name.to_string();
            return Err(self.error_at_previous(CompileErrorKind::DuplicateLocal { name, previous }));
        }
        let span = self.previous_span();
        self.add_local(name.to_string(), span)
    }

    /// Declares the variable named by the next identifier. Returns its name
    /// constant for globals, 0 for locals.
    fn parse_variable(&mut self, expected: &'static str) -> Result<(String, u16)> {
        let name = self.expect_ident(expected)?;
        self.declare_variable(&name)?;
        if self.state().scope_depth > 0 {
            return Ok((name, 0));
        }
        let constant = self.identifier_constant(&name)?;
        Ok((name, constant))
    }

    fn mark_initialized(&mut self) {
        let state = self.state_mut();
        if state.scope_depth == 0 {
            return;
        }
        let depth = state.scope_depth;
        if let Some(local) = state.locals.last_mut() {
            local.depth = Some(depth);
        }
    }

    fn define_variable(&mut self, global: u16) {
        if self.state().scope_depth > 0 {
            self.mark_initialized();
        } else {
            self.emit(OP_DEFINE_GLOBAL, 0, global);
        }
    }

    fn resolve_local(&self, depth: usize, name: &str) -> Result<Option<u8>> {
        for (slot, local) in self.states[depth].locals.iter().enumerate().rev() {
            if local.name == name {
                if local.depth.is_none() {
                    return Err(
                        self.error_at_previous(CompileErrorKind::OwnInitializer(name.to_string()))
                    );
                }
                return Ok(Some(slot as u8));
            }
        }
        Ok(None)
    }

    fn resolve_upvalue(&mut self, depth: usize, name: &str) -> Result<Option<u8>> {
        if depth == 0 {
            return Ok(None);
        }
        if let Some(slot) = self.resolve_local(depth - 1, name)? {
            self.states[depth - 1].locals[slot as usize].is_captured = true;
            return self.add_capture(depth, Capture { index: slot, is_local: true }).map(Some);
        }
        if let Some(index) = self.resolve_upvalue(depth - 1, name)? {
            return self.add_capture(depth, Capture { index, is_local: false }).map(Some);
        }
        Ok(None)
    }

    fn add_capture(&mut self, depth: usize, capture: Capture) -> Result<u8> {
        let captures = &self.states[depth].captures;
        if let Some(existing) = captures.iter().position(|c| *c == capture) {
            return Ok(existing as u8);
        }
        if captures.len() >= MAX_UPVALUES {
            return Err(self.error_at_previous(CompileErrorKind::TooManyUpvalues));
        }
        self.states[depth].captures.push(capture);
        Ok((self.states[depth].captures.len() - 1) as u8)
    }

    fn named_variable(&mut self, name: &str, can_assign: bool) -> Result<()> {
        let top = self.states.len() - 1;
        let (get, set, arg) = if let Some(slot) = self.resolve_local(top, name)? {
            (OP_GET_LOCAL, OP_SET_LOCAL, slot as u16)
        } else if let Some(index) = self.resolve_upvalue(top, name)? {
            (OP_GET_UPVALUE, OP_SET_UPVALUE, index as u16)
        } else {
            (OP_GET_GLOBAL, OP_SET_GLOBAL, self.identifier_constant(name)?)
        };

        if can_assign && self.advance_if(&Token::Eq) {
            self.expression()?;
            self.emit(set, 0, arg);
        } else if let Some(op) = self.compound_assignment(can_assign) {
            self.emit(get, 0, arg);
            self.expression()?;
            self.emit_op(op);
            self.emit(set, 0, arg);
        } else {
            self.emit(get, 0, arg);
        }
        Ok(())
    }

    /// Consumes `+=` and friends, returning the arithmetic opcode.
    fn compound_assignment(&mut self, can_assign: bool) -> Option<u8> {
        if !can_assign {
            return None;
        }
        let op = match self.peek()? {
            Token::PlusEq => OP_ADD,
            Token::MinusEq => OP_SUB,
            Token::StarEq => OP_MUL,
            Token::SlashEq => OP_DIV,
            _ => return None,
        };
        self.pos += 1;
        Some(op)
    }

    // ---- Declarations ----

    fn declaration(&mut self) {
        let checkpoint = self.checkpoint();
        let result = self.nested(|c| {
            if c.advance_if(&Token::Class) {
                c.class_declaration()
            } else if c.advance_if(&Token::Def) {
                c.fun_declaration()
            } else if c.advance_if(&Token::Let) {
                c.let_declaration()
            } else {
                c.statement()
            }
        });
        if let Err(error) = result {
            self.recover(error, checkpoint);
        }
    }

    fn class_declaration(&mut self) -> Result<()> {
        let class_name = self.expect_ident("class name")?;
        let name_constant = self.identifier_constant(&class_name)?;
        self.declare_variable(&class_name)?;

        self.emit(OP_CLASS, 0, name_constant);
        self.define_variable(name_constant);
        self.classes.push(ClassState { has_superclass: false });

        if self.advance_if(&Token::Colon) {
            let superclass = self.expect_ident("superclass name")?;
            self.named_variable(&superclass, false)?;
            if superclass == class_name {
                return Err(self.error_at_previous(CompileErrorKind::InheritFromSelf));
            }
            self.begin_scope();
            self.add_local("super".to_string(), 0..0)?;
            self.define_variable(0);

            self.named_variable(&class_name, false)?;
            self.emit_op(OP_INHERIT);
            if let Some(class) = self.classes.last_mut() {
                class.has_superclass = true;
            }
        }

        self.named_variable(&class_name, false)?;
        self.expect(&Token::LBrace, "'{' before class body")?;
        while !self.check(&Token::RBrace) && !self.at_end() {
            self.method()?;
        }
        self.expect(&Token::RBrace, "'}' after class body")?;
        self.emit_op(OP_POP);

        if self.classes.pop().is_some_and(|c| c.has_superclass) {
            self.end_scope();
        }
        Ok(())
    }

    fn method(&mut self) -> Result<()> {
        self.expect(&Token::Def, "'def' before method")?;
        let name = self.expect_ident("method name")?;
        let constant = self.identifier_constant(&name)?;
        let kind = if name == "init" { FunctionKind::Initializer } else { FunctionKind::Method };
        self.function(kind, &name)?;
        self.emit(OP_METHOD, 0, constant);
        Ok(())
    }

    fn fun_declaration(&mut self) -> Result<()> {
        let (name, global) = self.parse_variable("function name")?;
        self.mark_initialized();
        self.function(FunctionKind::Function, &name)?;
        self.define_variable(global);
        Ok(())
    }

    fn function(&mut self, kind: FunctionKind, name: &str) -> Result<()> {
        let name = self.copy_string(name);
        self.states.push(FunctionState::new(kind, Some(name)));
        self.begin_scope();

        self.expect(&Token::LParen, "'(' after function name")?;
        if !self.check(&Token::RParen) {
            let mut arity = 0usize;
            loop {
                arity += 1;
                if arity > MAX_ARGS {
                    return Err(self.error_at_current(CompileErrorKind::TooManyParameters));
                }
                let (_, constant) = self.parse_variable("parameter name")?;
                self.define_variable(constant);
                if !self.advance_if(&Token::Comma) {
                    break;
                }
            }
            self.state_mut().arity = arity as u8;
        }
        self.expect(&Token::RParen, "')' after parameters")?;
        self.expect(&Token::LBrace, "'{' before function body")?;
        self.block()?;
        self.emit_return();

        let (function, captures) = self.finish_function()?;
        let constant = self.make_constant(Value::object(function))?;
        self.emit(OP_CLOSURE, 0, constant);
        let line = self.line();
        for capture in captures {
            self.state_mut().chunk.emit(encode_upvalue(capture.is_local, capture.index), line);
        }
        Ok(())
    }

    fn let_declaration(&mut self) -> Result<()> {
        let (_, global) = self.parse_variable("variable name")?;
        if self.advance_if(&Token::Eq) {
            self.expression()?;
        } else {
            self.emit_op(OP_NULL);
        }
        self.expect(&Token::Semicolon, "';' after variable declaration")?;
        self.define_variable(global);
        Ok(())
    }

    // ---- Statements ----

    fn statement(&mut self) -> Result<()> {
        self.nested(Self::statement_kind)
    }

    fn statement_kind(&mut self) -> Result<()> {
        match self.peek() {
            Some(Token::Print) => {
                self.pos += 1;
                self.expression()?;
                self.expect(&Token::Semicolon, "';' after value")?;
                self.emit_op(OP_PRINT);
                Ok(())
            }
            Some(Token::If) => {
                self.pos += 1;
                self.if_statement()
            }
            Some(Token::While) => {
                self.pos += 1;
                self.while_statement()
            }
            Some(Token::Do) => {
                self.pos += 1;
                self.do_while_statement()
            }
            Some(Token::For) => {
                self.pos += 1;
                self.for_statement()
            }
            Some(Token::Return) => {
                self.pos += 1;
                self.return_statement()
            }
            Some(Token::LBrace) => {
                self.pos += 1;
                self.begin_scope();
                self.block()?;
                self.end_scope();
                Ok(())
            }
            _ => {
                self.expression()?;
                self.expect(&Token::Semicolon, "';' after expression")?;
                self.emit_op(OP_POP);
                Ok(())
            }
        }
    }

    fn block(&mut self) -> Result<()> {
        while !self.check(&Token::RBrace) && !self.at_end() && self.errors.len() < MAX_ERRORS {
            self.declaration();
        }
        self.expect(&Token::RBrace, "'}' after block")
    }

    fn if_statement(&mut self) -> Result<()> {
        self.expect(&Token::LParen, "'(' after 'if'")?;
        self.expression()?;
        self.expect(&Token::RParen, "')' after condition")?;

        let then_jump = self.emit_jump(OP_JUMP_IF_FALSE);
        self.emit_op(OP_POP);
        self.statement()?;
        let else_jump = self.emit_jump(OP_JUMP);
        self.patch_jump(then_jump)?;
        self.emit_op(OP_POP);

        if self.advance_if(&Token::Else) {
            self.statement()?;
        }
        self.patch_jump(else_jump)
    }

    fn while_statement(&mut self) -> Result<()> {
        let loop_start = self.state().chunk.code.len();
        self.expect(&Token::LParen, "'(' after 'while'")?;
        self.expression()?;
        self.expect(&Token::RParen, "')' after condition")?;

        let exit_jump = self.emit_jump(OP_JUMP_IF_FALSE);
        self.emit_op(OP_POP);
        self.statement()?;
        self.emit_loop(loop_start)?;
        self.patch_jump(exit_jump)?;
        self.emit_op(OP_POP);
        Ok(())
    }

    fn do_while_statement(&mut self) -> Result<()> {
        let loop_start = self.state().chunk.code.len();
        self.statement()?;
        self.expect(&Token::While, "'while' after do body")?;
        self.expect(&Token::LParen, "'(' after 'while'")?;
        self.expression()?;
        self.expect(&Token::RParen, "')' after condition")?;
        self.expect(&Token::Semicolon, "';' after do-while condition")?;

        let exit_jump = self.emit_jump(OP_JUMP_IF_FALSE);
        self.emit_op(OP_POP);
        self.emit_loop(loop_start)?;
        self.patch_jump(exit_jump)?;
        self.emit_op(OP_POP);
        Ok(())
    }

    fn for_statement(&mut self) -> Result<()> {
        self.begin_scope();
        self.expect(&Token::LParen, "'(' after 'for'")?;
        if self.advance_if(&Token::Semicolon) {
            // no initializer
        } else if self.advance_if(&Token::Let) {
            self.let_declaration()?;
        } else {
            self.expression()?;
            self.expect(&Token::Semicolon, "';' after expression")?;
            self.emit_op(OP_POP);
        }

        let mut loop_start = self.state().chunk.code.len();
        let mut exit_jump = None;
        if !self.advance_if(&Token::Semicolon) {
            self.expression()?;
            self.expect(&Token::Semicolon, "';' after loop condition")?;
            exit_jump = Some(self.emit_jump(OP_JUMP_IF_FALSE));
            self.emit_op(OP_POP);
        }

        if !self.advance_if(&Token::RParen) {
            let body_jump = self.emit_jump(OP_JUMP);
            let increment_start = self.state().chunk.code.len();
            self.expression()?;
            self.emit_op(OP_POP);
            self.expect(&Token::RParen, "')' after for clauses")?;
            self.emit_loop(loop_start)?;
            loop_start = increment_start;
            self.patch_jump(body_jump)?;
        }

        self.statement()?;
        self.emit_loop(loop_start)?;
        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump)?;
            self.emit_op(OP_POP);
        }
        self.end_scope();
        Ok(())
    }

    fn return_statement(&mut self) -> Result<()> {
        let kind = self.state().kind;
        if kind == FunctionKind::Script {
            return Err(self.error_at_previous(CompileErrorKind::ReturnAtTopLevel));
        }
        if self.advance_if(&Token::Semicolon) {
            self.emit_return();
            return Ok(());
        }
        self.expression()?;
        self.expect(&Token::Semicolon, "';' after return value")?;
        if kind == FunctionKind::Initializer {
            // The value is evaluated for its effects; `init` always yields `this`.
            self.emit_op(OP_POP);
            self.emit_return();
        } else {
            self.emit_op(OP_RETURN);
        }
        Ok(())
    }

    // ---- Expressions ----

    fn expression(&mut self) -> Result<()> {
        self.parse_precedence(Precedence::Assignment)
    }

    fn parse_precedence(&mut self, precedence: Precedence) -> Result<()> {
        self.nested(|c| c.parse_at(precedence))
    }

    fn parse_at(&mut self, precedence: Precedence) -> Result<()> {
        let can_assign = precedence <= Precedence::Assignment;
        let Some(token) = self.next_token() else {
            return Err(self.error_at_current(CompileErrorKind::ExpectedExpression {
                found: "end of input".to_string(),
            }));
        };
        self.prefix(token, can_assign)?;

        while let Some(token) = self.peek() {
            if precedence > infix_precedence(token) {
                break;
            }
            let token = token.clone();
            self.pos += 1;
            self.infix(token, can_assign)?;
        }

        if can_assign
            && matches!(
                self.peek(),
                Some(Token::Eq | Token::PlusEq | Token::MinusEq | Token::StarEq | Token::SlashEq)
            )
        {
            return Err(self.error_at_current(CompileErrorKind::InvalidAssignmentTarget));
        }
        Ok(())
    }

    fn prefix(&mut self, token: Token, can_assign: bool) -> Result<()> {
        match token {
            Token::Number(n) => self.emit_constant(Value::number(n)),
            Token::Str(s) => {
                let string = self.copy_string(&s);
                self.emit_constant(Value::object(string))
            }
            Token::True => {
                self.emit_op(OP_TRUE);
                Ok(())
            }
            Token::False => {
                self.emit_op(OP_FALSE);
                Ok(())
            }
            Token::Null => {
                self.emit_op(OP_NULL);
                Ok(())
            }
            Token::LParen => {
                self.expression()?;
                self.expect(&Token::RParen, "')' after expression")
            }
            Token::Minus | Token::Bang => {
                self.parse_precedence(Precedence::Unary)?;
                self.emit_op(if token == Token::Minus { OP_NEGATE } else { OP_NOT });
                Ok(())
            }
            Token::Ident(name) => self.named_variable(&name, can_assign),
            Token::This => {
                if self.classes.is_empty() {
                    return Err(self.error_at_previous(CompileErrorKind::ThisOutsideClass));
                }
                self.named_variable("this", false)
            }
            Token::Super => self.super_(),
            other => {
                let found = other.describe();
                Err(self.error_at_previous(CompileErrorKind::ExpectedExpression { found }))
            }
        }
    }

    fn infix(&mut self, token: Token, can_assign: bool) -> Result<()> {
        match token {
            Token::LParen => {
                let argc = self.argument_list()?;
                self.emit(OP_CALL, argc, 0);
                Ok(())
            }
            Token::Dot => self.dot(can_assign),
            Token::AndAnd => {
                let end_jump = self.emit_jump(OP_JUMP_IF_FALSE);
                self.emit_op(OP_POP);
                self.parse_precedence(Precedence::And)?;
                self.patch_jump(end_jump)
            }
            Token::OrOr => {
                let else_jump = self.emit_jump(OP_JUMP_IF_FALSE);
                let end_jump = self.emit_jump(OP_JUMP);
                self.patch_jump(else_jump)?;
                self.emit_op(OP_POP);
                self.parse_precedence(Precedence::Or)?;
                self.patch_jump(end_jump)
            }
            op => {
                self.parse_precedence(infix_precedence(&op).next())?;
                match op {
                    Token::Plus => self.emit_op(OP_ADD),
                    Token::Minus => self.emit_op(OP_SUB),
                    Token::Star => self.emit_op(OP_MUL),
                    Token::Slash => self.emit_op(OP_DIV),
                    Token::EqEq => self.emit_op(OP_EQUAL),
                    Token::BangEq => {
                        self.emit_op(OP_EQUAL);
                        self.emit_op(OP_NOT)
                    }
                    Token::Greater => self.emit_op(OP_GREATER),
                    Token::GreaterEq => {
                        self.emit_op(OP_LESS);
                        self.emit_op(OP_NOT)
                    }
                    Token::Less => self.emit_op(OP_LESS),
                    Token::LessEq => {
                        self.emit_op(OP_GREATER);
                        self.emit_op(OP_NOT)
                    }
                    _ => unreachable!("no infix rule for {op:?}"),
                };
                Ok(())
            }
        }
    }

    fn argument_list(&mut self) -> Result<u8> {
        let mut argc = 0usize;
        if !self.check(&Token::RParen) {
            loop {
                self.expression()?;
                if argc == MAX_ARGS {
                    return Err(self.error_at_previous(CompileErrorKind::TooManyArguments));
                }
                argc += 1;
                if !self.advance_if(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(&Token::RParen, "')' after arguments")?;
        Ok(argc as u8)
    }

    fn dot(&mut self, can_assign: bool) -> Result<()> {
        let name = self.expect_ident("property name after '.'")?;
        let constant = self.identifier_constant(&name)?;

        if can_assign && self.advance_if(&Token::Eq) {
            self.expression()?;
            self.emit(OP_SET_PROPERTY, 0, constant);
        } else if let Some(op) = self.compound_assignment(can_assign) {
            self.emit_op(OP_DUP);
            self.emit(OP_GET_PROPERTY, 0, constant);
            self.expression()?;
            self.emit_op(op);
            self.emit(OP_SET_PROPERTY, 0, constant);
        } else if self.advance_if(&Token::LParen) {
            let argc = self.argument_list()?;
            self.emit(OP_INVOKE, argc, constant);
        } else {
            self.emit(OP_GET_PROPERTY, 0, constant);
        }
        Ok(())
    }

    fn super_(&mut self) -> Result<()> {
        match self.classes.last() {
            None => return Err(self.error_at_previous(CompileErrorKind::SuperOutsideClass)),
            Some(class) if !class.has_superclass => {
                return Err(self.error_at_previous(CompileErrorKind::SuperWithoutSuperclass));
            }
            Some(_) => {}
        }
        self.expect(&Token::Dot, "'.' after 'super'")?;
        let name = self.expect_ident("superclass method name")?;
        let constant = self.identifier_constant(&name)?;

        self.named_variable("this", false)?;
        if self.advance_if(&Token::LParen) {
            let argc = self.argument_list()?;
            self.named_variable("super", false)?;
            self.emit(OP_SUPER_INVOKE, argc, constant);
        } else {
            self.named_variable("super", false)?;
            self.emit(OP_GET_SUPER, 0, constant);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::{GcConfig, NoRoots};

    fn compile_ok(source: &str) -> (Heap, ObjRef) {
        let mut heap = Heap::new(GcConfig::default());
        let function = compile(source, &mut heap, &NoRoots)
            .unwrap_or_else(|errors| panic!("compile errors: {errors:?}"));
        (heap, function)
    }

    fn compile_errors(source: &str) -> Vec<CompileError> {
        let mut heap = Heap::new(GcConfig::default());
        match compile(source, &mut heap, &NoRoots) {
            Ok(_) => panic!("expected compile errors for {source:?}"),
            Err(errors) => errors,
        }
    }

    fn opcodes(heap: &Heap, function: ObjRef) -> Vec<u8> {
        heap.function(function).chunk.code.iter().map(|&i| decode_op(i)).collect()
    }

    #[test]
    fn script_function_shape() {
        let (heap, f) = compile_ok("print 1 + 2;");
        let function = heap.function(f);
        assert_eq!(function.arity, 0);
        assert!(function.name.is_none());
        assert_eq!(
            opcodes(&heap, f),
            vec![OP_CONSTANT, OP_CONSTANT, OP_ADD, OP_PRINT, OP_NULL, OP_RETURN]
        );
    }

    #[test]
    fn comparison_desugaring() {
        let (heap, f) = compile_ok("1 <= 2;");
        assert_eq!(
            opcodes(&heap, f),
            vec![OP_CONSTANT, OP_CONSTANT, OP_GREATER, OP_NOT, OP_POP, OP_NULL, OP_RETURN]
        );
    }

    #[test]
    fn globals_use_name_constants() {
        let (heap, f) = compile_ok("let x = 1; x = 2; print x;");
        let chunk = &heap.function(f).chunk;
        let define = chunk.code[1];
        assert_eq!(decode_op(define), OP_DEFINE_GLOBAL);
        let name = chunk.constants[decode_bx(define) as usize];
        assert_eq!(heap.display(name), "x");
        assert!(opcodes(&heap, f).contains(&OP_SET_GLOBAL));
    }

    #[test]
    fn locals_resolve_to_slots() {
        let (heap, f) = compile_ok("{ let a = 1; let b = a; print b; }");
        let code = &heap.function(f).chunk.code;
        let gets: Vec<u16> = code
            .iter()
            .filter(|&&i| decode_op(i) == OP_GET_LOCAL)
            .map(|&i| decode_bx(i))
            .collect();
        assert_eq!(gets, vec![1, 2]);
        // Both locals popped at scope end.
        let ops = opcodes(&heap, f);
        assert_eq!(&ops[ops.len() - 4..], &[OP_POP, OP_POP, OP_NULL, OP_RETURN]);
    }

    #[test]
    fn closure_capture_words() {
        let (heap, f) = compile_ok(
            "def outer() { let x = 1; def inner() { return x; } return inner; }",
        );
        let script = &heap.function(f).chunk;
        let outer = script.constants.iter().find_map(|v| {
            v.as_object().filter(|&r| heap.get(r).kind() == crate::object::ObjKind::Function)
        });
        let outer = heap.function(outer.expect("outer function constant"));
        let code = &outer.chunk.code;
        let at = code
            .iter()
            .position(|&i| decode_op(i) == OP_CLOSURE)
            .expect("closure instruction");
        let inner = outer.chunk.constants[decode_bx(code[at]) as usize];
        let inner = heap.function(inner.as_object().expect("function"));
        assert_eq!(inner.upvalue_count, 1);
        assert_eq!(decode_upvalue(code[at + 1]), (true, 1));
        assert_eq!(heap.display(Value::object(inner.name.expect("named"))), "inner");
    }

    #[test]
    fn captured_locals_close_at_scope_end() {
        let (heap, f) = compile_ok("{ let x = 1; def g() { return x; } }");
        let ops = opcodes(&heap, f);
        assert!(ops.contains(&OP_CLOSE_UPVALUE));
    }

    #[test]
    fn initializer_returns_this() {
        let (heap, f) = compile_ok("class A { def init() { return 1; } }");
        let script = &heap.function(f).chunk;
        let init = script
            .constants
            .iter()
            .filter_map(|v| v.as_object())
            .find(|&r| matches!(heap.get(r), Obj::Function(_)))
            .expect("init function");
        let ops = opcodes(&heap, init);
        assert_eq!(ops, vec![OP_CONSTANT, OP_POP, OP_GET_LOCAL, OP_RETURN, OP_GET_LOCAL, OP_RETURN]);
    }

    #[test]
    fn compound_assignment_on_property() {
        let (heap, f) = compile_ok("let p = null; p.x += 1;");
        let ops = opcodes(&heap, f);
        let at = ops.iter().position(|&op| op == OP_DUP).expect("dup");
        assert_eq!(
            &ops[at..at + 5],
            &[OP_DUP, OP_GET_PROPERTY, OP_CONSTANT, OP_ADD, OP_SET_PROPERTY]
        );
    }

    #[test]
    fn return_at_top_level() {
        let errors = compile_errors("return 1;");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, CompileErrorKind::ReturnAtTopLevel);
        assert_eq!(errors[0].code(), "NYR-C013");
    }

    #[test]
    fn class_context_errors() {
        let errors = compile_errors("print this;");
        assert_eq!(errors[0].kind, CompileErrorKind::ThisOutsideClass);

        let errors = compile_errors("class A { def f() { return super.f(); } }");
        assert_eq!(errors[0].kind, CompileErrorKind::SuperWithoutSuperclass);

        let errors = compile_errors("def f() { super.g(); }");
        assert_eq!(errors[0].kind, CompileErrorKind::SuperOutsideClass);

        let errors = compile_errors("class A : A {}");
        assert_eq!(errors[0].kind, CompileErrorKind::InheritFromSelf);
    }

    #[test]
    fn local_errors() {
        let errors = compile_errors("{ let a = a; }");
        assert_eq!(errors[0].kind, CompileErrorKind::OwnInitializer("a".into()));

        let errors = compile_errors("{ let a = 1; let a = 2; }");
        assert_eq!(
            errors[0].kind,
            CompileErrorKind::DuplicateLocal { name: "a".into(), previous: 6..7 }
        );
        assert_eq!(errors[0].span, 17..18);

        let errors = compile_errors("def f(x, x) {}");
        assert_eq!(
            errors[0].kind,
            CompileErrorKind::DuplicateLocal { name: "x".into(), previous: 6..7 }
        );

        // Shadowing in an inner scope is fine.
        compile_ok("{ let a = 1; { let a = 2; print a; } }");
    }

    #[test]
    fn invalid_assignment_target() {
        let errors = compile_errors("let a = 1; let b = 2; a + b = 3;");
        assert_eq!(errors[0].kind, CompileErrorKind::InvalidAssignmentTarget);
        assert_eq!(errors[0].line, 1);
    }

    #[test]
    fn recovery_collects_several_errors() {
        let errors = compile_errors("let = 1;\nprint 2;\nlet b = ;\nprint (3;");
        assert_eq!(errors.len(), 3);
        assert_eq!(errors[0].line, 1);
        assert_eq!(errors[1].line, 3);
        assert_eq!(errors[2].line, 4);
        assert!(matches!(errors[0].kind, CompileErrorKind::Expected { expected: "variable name", .. }));
        assert!(matches!(errors[1].kind, CompileErrorKind::ExpectedExpression { .. }));
    }

    #[test]
    fn recovery_inside_function_body() {
        let errors = compile_errors("def f() {\n  let x = ;\n  print x;\n}\nprint f(;");
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].line, 2);
        assert_eq!(errors[1].line, 5);
    }

    #[test]
    fn errors_are_capped() {
        let source = "print ;\n".repeat(50);
        let errors = compile_errors(&source);
        assert_eq!(errors.len(), MAX_ERRORS);
    }

    #[test]
    fn lex_errors_are_reported_with_parse_errors() {
        let errors = compile_errors("let a = 1 @ 2;\nprint \"open");
        assert!(errors.iter().any(|e| e.kind == CompileErrorKind::Lex(LexErrorKind::UnexpectedChar('@'))));
        assert!(errors.iter().any(|e| e.kind == CompileErrorKind::Lex(LexErrorKind::UnterminatedString)));
        assert!(errors.windows(2).all(|w| w[0].span.start <= w[1].span.start));
    }

    #[test]
    fn too_many_parameters() {
        let params: Vec<String> = (0..256).map(|i| format!("p{i}")).collect();
        let source = format!("def f({}) {{}}", params.join(", "));
        let errors = compile_errors(&source);
        assert_eq!(errors[0].kind, CompileErrorKind::TooManyParameters);
    }

    #[test]
    fn too_many_arguments() {
        let args = vec!["1"; 256].join(", ");
        let errors = compile_errors(&format!("f({args});"));
        assert_eq!(errors[0].kind, CompileErrorKind::TooManyArguments);
    }

    #[test]
    fn missing_semicolon_suggestion() {
        let errors = compile_errors("print 1");
        assert_eq!(errors[0].to_string(), "[line 1] expected ';' after value, found end of input");
        assert!(errors[0].suggestion().is_some());
    }

    #[test]
    fn compiles_under_gc_stress() {
        let mut heap = Heap::new(GcConfig { stress: true, ..GcConfig::default() });
        let source = "class A : B { def init(x) { this.x = x; } def m() { return \"a\" + \"b\"; } }
                      def f(a, b) { def g() { return a + b; } return g; }
                      for (let i = 0; i < 3; i += 1) { print \"loop\"; }";
        let f = compile(source, &mut heap, &NoRoots).expect("compiles");
        assert!(heap.stats().collections > 0);
        // Every constant reachable from the script survived.
        let mut stack = vec![f];
        while let Some(r) = stack.pop() {
            for value in &heap.function(r).chunk.constants {
                if let Some(obj) = value.as_object() {
                    assert!(heap.is_live(obj));
                    if let Obj::Function(_) = heap.get(obj) {
                        stack.push(obj);
                    }
                }
            }
        }
    }

    #[test]
    fn deeply_nested_parens_are_an_error() {
        let n = 10_000;
        let source = format!("print {}1{};", "(".repeat(n), ")".repeat(n));
        let errors = compile_errors(&source);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, CompileErrorKind::TooDeeplyNested);
        assert_eq!(errors[0].code(), "NYR-C018");
    }

    #[test]
    fn deeply_nested_blocks_are_an_error() {
        let n = 10_000;
        let source = format!("{}{}", "{".repeat(n), "}".repeat(n));
        let errors = compile_errors(&source);
        assert!(errors.len() <= MAX_ERRORS);
        assert_eq!(errors[0].kind, CompileErrorKind::TooDeeplyNested);
    }

    #[test]
    fn deeply_nested_unary_is_an_error() {
        let errors = compile_errors(&format!("print {}1;", "-".repeat(5_000)));
        assert_eq!(errors[0].kind, CompileErrorKind::TooDeeplyNested);
    }

    #[test]
    fn ordinary_nesting_compiles() {
        compile_ok(&format!("print {}1{};", "(".repeat(50), ")".repeat(50)));
        compile_ok(&format!("{}print 1;{}", "{".repeat(30), "}".repeat(30)));
        compile_ok("def a() { def b() { def c() { if (true) { while (false) { print ((1)); } } } } }");
    }

    #[test]
    fn constants_are_deduplicated_by_bits() {
        let (heap, f) = compile_ok("print 1; print 1.0; print 2; print \"a\"; print \"a\";");
        assert_eq!(heap.function(f).chunk.constants.len(), 3);
    }

    #[test]
    fn constant_pool_limit() {
        let source: String = (0..MAX_CONSTANTS + 1).map(|i| format!("{i};")).collect();
        let errors = compile_errors(&source);
        assert_eq!(errors[0].kind, CompileErrorKind::TooManyConstants);
        assert_eq!(errors[0].code(), "NYR-C010");
    }
}
