// Single-pass bytecode compiler.
//
// Pratt parsing for expressions, recursive descent for statements, emitting
// straight into the active function's chunk. One FuncState per function being
// compiled, stacked for nesting; a parallel stack of class contexts backs
// self/super checks. Every constant created during compilation is pinned in
// the VM's compiler-root list so a collection mid-compile cannot reclaim it.

mod expr;
mod lexer;
mod stmt;
mod token;

pub use lexer::Lexer;
pub use token::{Token, TokenKind};

use std::rc::Rc;

use smol_str::SmolStr;

use crate::diagnostic::{
    DiagContext, DiagLevel, E_EXPECT_TOKEN, E_JUMP_TOO_FAR, E_REDECLARED_VAR, E_TOO_MANY_CONSTANTS,
    E_TOO_MANY_LOCALS, E_UNEXPECTED_CHAR, E_UNTERMINATED_STR, SourceLoc, W_UNUSED_VARIABLE,
};
use crate::gc::FunctionId;
use crate::lua_vm::{LuaError, LuaResult, LuaVM, OpCode};
use crate::value::{Chunk, Value};

pub(crate) const MAX_LOCALS: usize = 256;
pub(crate) const MAX_UPVALUES: usize = 256;
pub(crate) const MAX_CONSTANTS: usize = 256;

/// Compile `source` into a top-level function. Diagnostics are rendered as
/// they occur; the returned error carries only a summary.
pub fn compile(vm: &mut LuaVM, source: &str, filename: Option<&str>) -> LuaResult<FunctionId> {
    let mut compiler = Compiler::new(vm, source, filename);
    compiler.advance();
    while !compiler.match_token(TokenKind::Eof) {
        if compiler.diag.should_stop() {
            break;
        }
        compiler.declaration();
    }
    let (function, _) = compiler.end_compiler();
    compiler.diag.print_summary();
    let had_error = compiler.had_error;
    let error_count = compiler.diag.error_count;
    compiler.vm.compiler_roots.clear();
    if had_error {
        Err(LuaError::Compile(format!("{error_count} error(s)")))
    } else {
        Ok(function)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FunctionType {
    Function,
    Method,
    Initializer,
    Script,
}

/// A local variable slot in the function being compiled. `depth` stays -1
/// until the initializer has run, which is what rejects `local x = x`.
struct Local<'src> {
    name: Token<'src>,
    depth: i32,
    is_captured: bool,
    is_used: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct UpvalueDesc {
    pub index: u8,
    pub is_local: bool,
}

/// Per-loop bookkeeping. `continue_target` is known up front for `while`
/// (the condition); `for` and `repeat` learn theirs only after the body, so
/// their continues emit forward jumps patched later.
struct LoopState {
    scope_depth: i32,
    continue_target: Option<usize>,
    continue_jumps: Vec<usize>,
    break_jumps: Vec<usize>,
}

// The folder peeks the bytecode tail through `recent`: pool indices of the
// OP_CONSTANT instructions sitting contiguously at the end of the chunk.
// Any other emission clears it, so the last 2*recent.len() bytes are exactly
// those instructions and undoing them is a plain truncate.

/// Compilation state for one function.
struct FuncState<'src> {
    func_type: FunctionType,
    name: Option<SmolStr>,
    arity: u8,
    chunk: Chunk,
    locals: Vec<Local<'src>>,
    upvalues: Vec<UpvalueDesc>,
    scope_depth: i32,
    loops: Vec<LoopState>,
    recent: Vec<u8>,
}

impl<'src> FuncState<'src> {
    fn new(func_type: FunctionType, name: Option<SmolStr>) -> Self {
        // Slot 0 is reserved: the receiver in methods and initializers,
        // nameless otherwise.
        let slot_zero = if matches!(func_type, FunctionType::Method | FunctionType::Initializer) {
            Token::synthetic(TokenKind::Identifier, "self")
        } else {
            Token::synthetic(TokenKind::Identifier, "")
        };
        FuncState {
            func_type,
            name,
            arity: 0,
            chunk: Chunk::new(),
            locals: vec![Local {
                name: slot_zero,
                depth: 0,
                is_captured: false,
                is_used: true,
            }],
            upvalues: Vec::new(),
            scope_depth: 0,
            loops: Vec::new(),
            recent: Vec::new(),
        }
    }
}

/// Class context, stacked for nested class declarations.
struct ClassState {
    has_superclass: bool,
}

pub struct Compiler<'src, 'vm> {
    pub(crate) vm: &'vm mut LuaVM,
    lexer: Lexer<'src>,
    current: Token<'src>,
    previous: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    diag: DiagContext<'src>,
    funcs: Vec<FuncState<'src>>,
    classes: Vec<ClassState>,
}

impl<'src, 'vm> Compiler<'src, 'vm> {
    fn new(vm: &'vm mut LuaVM, source: &'src str, filename: Option<&str>) -> Self {
        Compiler {
            vm,
            lexer: Lexer::new(source),
            current: Token::default(),
            previous: Token::default(),
            had_error: false,
            panic_mode: false,
            diag: DiagContext::new(source, filename),
            funcs: vec![FuncState::new(FunctionType::Script, None)],
            classes: Vec::new(),
        }
    }

    // ============ Token plumbing ============

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.lexer.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let message = self.current.lexeme;
            let (code, help) = match message {
                "Unterminated string." => (
                    E_UNTERMINATED_STR,
                    "add a closing quote to terminate the string",
                ),
                "Unterminated long string." => {
                    (E_UNTERMINATED_STR, "add ']]' to close the long string")
                }
                _ => (E_UNEXPECTED_CHAR, "remove this character or check for typos"),
            };
            self.error_at_current_with(code, message, Some(help));
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
            return;
        }
        self.error_at_current(message);
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    // ============ Error reporting ============

    fn error_at(&mut self, token: Token<'src>, code: u16, message: &str, help: Option<&str>) {
        if self.panic_mode || self.diag.should_stop() {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        let length = if token.kind == TokenKind::Error {
            1
        } else {
            token.lexeme.len().max(1) as u32
        };
        self.diag.report(
            DiagLevel::Error,
            code,
            SourceLoc {
                line: token.line,
                column: token.column,
                length,
            },
            message,
            help,
        );
    }

    fn error(&mut self, message: &str) {
        self.error_at(self.previous, E_EXPECT_TOKEN, message, None);
    }

    fn error_with(&mut self, code: u16, message: &str, help: Option<&str>) {
        self.error_at(self.previous, code, message, help);
    }

    fn error_at_current(&mut self, message: &str) {
        self.error_at(self.current, E_EXPECT_TOKEN, message, None);
    }

    fn error_at_current_with(&mut self, code: u16, message: &str, help: Option<&str>) {
        self.error_at(self.current, code, message, help);
    }

    fn warning(&mut self, token: &Token<'src>, code: u16, message: &str) {
        if self.panic_mode {
            return;
        }
        self.diag.report(
            DiagLevel::Warning,
            code,
            SourceLoc {
                line: token.line,
                column: token.column,
                length: token.lexeme.len().max(1) as u32,
            },
            message,
            None,
        );
    }

    // ============ Emission ============

    fn func(&mut self) -> &mut FuncState<'src> {
        self.funcs.last_mut().expect("at least one function state")
    }

    fn func_ref(&self) -> &FuncState<'src> {
        self.funcs.last().expect("at least one function state")
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        let f = self.func();
        f.chunk.write(byte, line);
        f.recent.clear();
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op as u8);
    }

    fn emit_bytes(&mut self, byte1: u8, byte2: u8) {
        self.emit_byte(byte1);
        self.emit_byte(byte2);
    }

    fn emit_loop_jump(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);
        let offset = self.func_ref().chunk.len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error_with(E_JUMP_TOO_FAR, "Loop body too large.", None);
        }
        self.emit_byte(((offset >> 8) & 0xff) as u8);
        self.emit_byte((offset & 0xff) as u8);
    }

    /// Emit a forward jump with a placeholder offset; returns the offset
    /// position for patch_jump.
    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.func_ref().chunk.len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        let jump = self.func_ref().chunk.len() - offset - 2;
        if jump > u16::MAX as usize {
            self.error_with(E_JUMP_TOO_FAR, "Too much code to jump over.", None);
        }
        let f = self.func();
        f.chunk.code[offset] = ((jump >> 8) & 0xff) as u8;
        f.chunk.code[offset + 1] = (jump & 0xff) as u8;
    }

    fn emit_return(&mut self) {
        if self.func_ref().func_type == FunctionType::Initializer {
            self.emit_bytes(OpCode::GetLocal as u8, 0); // return self
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.emit_op(OpCode::Return);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        let index = self.func().chunk.add_constant(value);
        if index >= MAX_CONSTANTS {
            self.error_with(
                E_TOO_MANY_CONSTANTS,
                "Too many constants in one chunk.",
                None,
            );
            return 0;
        }
        index as u8
    }

    /// Emit OP_CONSTANT, bypassing the recent-clear so the folder keeps the
    /// whole trailing run of constants in view.
    fn emit_constant(&mut self, value: Value) {
        let index = self.make_constant(value);
        let line = self.previous.line;
        let f = self.func();
        f.chunk.write(OpCode::Constant as u8, line);
        f.chunk.write(index, line);
        f.recent.push(index);
    }

    // ============ Constant-fold peephole ============

    fn constant_at(&self, index: u8) -> Value {
        self.func_ref()
            .chunk
            .constants
            .get(index as usize)
            .unwrap_or(Value::Nil)
    }

    /// The value of the last emitted instruction, if it was OP_CONSTANT.
    fn last_constant(&self) -> Option<Value> {
        self.func_ref()
            .recent
            .last()
            .map(|&index| self.constant_at(index))
    }

    /// The values of the last two instructions, if both were OP_CONSTANT.
    /// Returned in emission order (a below b on the stack).
    fn last_two_constants(&self) -> Option<(Value, Value)> {
        let recent = &self.func_ref().recent;
        if recent.len() < 2 {
            return None;
        }
        let a = recent[recent.len() - 2];
        let b = recent[recent.len() - 1];
        Some((self.constant_at(a), self.constant_at(b)))
    }

    fn remove_last_constant(&mut self) {
        let f = self.func();
        let len = f.chunk.len();
        f.chunk.truncate(len - 2);
        f.recent.pop();
    }

    fn remove_last_two_constants(&mut self) {
        let f = self.func();
        let len = f.chunk.len();
        f.chunk.truncate(len - 4);
        f.recent.pop();
        f.recent.pop();
    }

    // ============ Scope management ============

    fn begin_scope(&mut self) {
        self.func().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.func().scope_depth -= 1;
        loop {
            let leaving = {
                let f = self.func_ref();
                match f.locals.last() {
                    Some(local) if local.depth > f.scope_depth => {
                        Some((local.is_captured, local.is_used, local.name))
                    }
                    _ => None,
                }
            };
            let Some((is_captured, is_used, name)) = leaving else {
                break;
            };
            self.maybe_warn_unused(is_used, &name);
            if is_captured {
                self.emit_op(OpCode::CloseUpvalue);
            } else {
                self.emit_op(OpCode::Pop);
            }
            self.func().locals.pop();
        }
    }

    /// Unused-variable warning on scope or function exit. Underscore-prefixed
    /// and synthetic (empty-named) locals are exempt; assignment alone does
    /// not count as a use.
    fn maybe_warn_unused(&mut self, is_used: bool, name: &Token<'src>) {
        if !is_used && !name.lexeme.is_empty() && !name.lexeme.starts_with('_') {
            let message = format!("unused variable '{}'", name.lexeme);
            self.warning(name, W_UNUSED_VARIABLE, &message);
        }
    }

    /// Finish the innermost function: emit the implicit return, report unused
    /// locals, install the function object in the pool (pinned against
    /// collection) and hand back its upvalue descriptors for OP_CLOSURE.
    fn end_compiler(&mut self) -> (FunctionId, Vec<UpvalueDesc>) {
        self.emit_return();

        let pending: Vec<(bool, Token<'src>)> = self
            .func_ref()
            .locals
            .iter()
            .skip(1) // slot 0 is the receiver or a placeholder
            .map(|l| (l.is_used, l.name))
            .collect();
        for (is_used, name) in pending {
            self.maybe_warn_unused(is_used, &name);
        }

        let state = self.funcs.pop().expect("function state");
        if self.vm.options.debug.print_code && !self.had_error {
            let name = state.name.as_deref().unwrap_or("<script>");
            crate::lua_vm::debug::disassemble_chunk(&self.vm.pool, &state.chunk, name);
        }

        let name_id = state.name.as_ref().map(|n| {
            let value = self.vm.copy_string_value(n);
            self.vm.compiler_roots.push(value);
            value.as_string_id().expect("interned name")
        });
        let function = self.vm.new_function(
            state.arity,
            state.upvalues.len() as u8,
            Rc::new(state.chunk),
            name_id,
        );
        self.vm.compiler_roots.push(Value::function(function));
        (function, state.upvalues)
    }

    // ============ Variable resolution ============

    /// Intern an identifier and add it to the constant pool.
    fn identifier_constant(&mut self, name: &Token<'src>) -> u8 {
        let value = self.vm.copy_string_value(name.lexeme);
        self.vm.compiler_roots.push(value);
        self.make_constant(value)
    }

    /// Walk a function's locals top-down for `name`. Does not mark usage;
    /// read sites do that themselves so plain assignment is not a "use".
    fn resolve_local(&mut self, func_idx: usize, name: &Token<'src>) -> Option<u8> {
        let mut uninitialized = false;
        let mut found = None;
        {
            let f = &self.funcs[func_idx];
            for (i, local) in f.locals.iter().enumerate().rev() {
                if local.name.lexeme == name.lexeme && !local.name.lexeme.is_empty() {
                    if local.depth == -1 {
                        uninitialized = true;
                    }
                    found = Some(i as u8);
                    break;
                }
            }
        }
        if uninitialized {
            self.error("Can't read local variable in its own initializer.");
        }
        found
    }

    fn mark_local_used(&mut self, func_idx: usize, slot: u8) {
        self.funcs[func_idx].locals[slot as usize].is_used = true;
    }

    fn add_upvalue(&mut self, func_idx: usize, index: u8, is_local: bool) -> u8 {
        let desc = UpvalueDesc { index, is_local };
        if let Some(existing) = self.funcs[func_idx]
            .upvalues
            .iter()
            .position(|u| *u == desc)
        {
            return existing as u8;
        }
        if self.funcs[func_idx].upvalues.len() >= MAX_UPVALUES {
            self.error("Too many closure variables in function.");
            return 0;
        }
        self.funcs[func_idx].upvalues.push(desc);
        (self.funcs[func_idx].upvalues.len() - 1) as u8
    }

    /// Resolve `name` in an enclosing function, threading upvalue entries
    /// through every function in between. Marks the source local as captured
    /// and used.
    fn resolve_upvalue(&mut self, func_idx: usize, name: &Token<'src>) -> Option<u8> {
        if func_idx == 0 {
            return None;
        }
        let enclosing = func_idx - 1;
        if let Some(local) = self.resolve_local(enclosing, name) {
            let source = &mut self.funcs[enclosing].locals[local as usize];
            source.is_captured = true;
            source.is_used = true;
            return Some(self.add_upvalue(func_idx, local, true));
        }
        if let Some(upvalue) = self.resolve_upvalue(enclosing, name) {
            return Some(self.add_upvalue(func_idx, upvalue, false));
        }
        None
    }

    fn add_local(&mut self, name: Token<'src>) {
        if self.func_ref().locals.len() >= MAX_LOCALS {
            self.error_with(
                E_TOO_MANY_LOCALS,
                "Too many local variables in function.",
                Some("split this function into smaller functions"),
            );
            return;
        }
        self.func().locals.push(Local {
            name,
            depth: -1,
            is_captured: false,
            is_used: false,
        });
    }

    /// Reject a second declaration of the same name in the same scope, then
    /// add the local.
    fn declare_local(&mut self, name: Token<'src>) {
        let mut redeclared = false;
        {
            let f = self.func_ref();
            for local in f.locals.iter().rev() {
                if local.depth != -1 && local.depth < f.scope_depth {
                    break;
                }
                if local.name.lexeme == name.lexeme && !name.lexeme.is_empty() {
                    redeclared = true;
                    break;
                }
            }
        }
        if redeclared {
            self.error_with(
                E_REDECLARED_VAR,
                "Already a variable with this name in this scope.",
                None,
            );
        }
        self.add_local(name);
    }

    fn declare_variable(&mut self) {
        if self.func_ref().scope_depth == 0 {
            return; // global
        }
        self.declare_local(self.previous);
    }

    /// Consume an identifier and declare it. Returns the name-constant index
    /// for globals, 0 for locals.
    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable();
        if self.func_ref().scope_depth > 0 {
            return 0;
        }
        self.identifier_constant(&self.previous.clone())
    }

    fn mark_initialized(&mut self) {
        let f = self.func();
        if f.scope_depth == 0 {
            return;
        }
        let depth = f.scope_depth;
        if let Some(local) = f.locals.last_mut() {
            local.depth = depth;
        }
    }

    fn define_variable(&mut self, global: u8) {
        if self.func_ref().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_bytes(OpCode::DefineGlobal as u8, global);
    }
}
