// Statement and declaration parsing.
//
// Recursive descent over the statement grammar. Loop bodies and if branches
// run inside their own lexical scope, so per-iteration locals are popped
// before the back-edge. `break` and `continue` first discard every local
// above the loop's entry depth, then jump; `continue` targets the condition
// for while/repeat and the increment step for numeric `for`, via a forward
// jump patched once the target is known.

use smol_str::SmolStr;

use crate::compiler::token::{Token, TokenKind};
use crate::compiler::{ClassState, Compiler, FuncState, FunctionType, LoopState};
use crate::diagnostic::{
    E_BREAK_OUTSIDE_LOOP, E_INHERIT_SELF, E_RETURN_TOP_LEVEL, E_TOO_MANY_PARAMS,
};
use crate::lua_vm::OpCode;
use crate::value::Value;

impl<'src, 'vm> Compiler<'src, 'vm> {
    pub(crate) fn declaration(&mut self) {
        if self.match_token(TokenKind::Class) {
            self.class_declaration();
        } else if self.match_token(TokenKind::Trait) {
            self.trait_declaration();
        } else if self.match_token(TokenKind::Function) {
            self.fun_declaration();
        } else if self.match_token(TokenKind::Local) {
            self.local_statement();
        } else {
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn statement(&mut self) {
        if self.match_token(TokenKind::If) {
            self.if_statement();
        } else if self.match_token(TokenKind::While) {
            self.while_statement();
        } else if self.match_token(TokenKind::For) {
            self.for_statement();
        } else if self.match_token(TokenKind::Repeat) {
            self.repeat_statement();
        } else if self.match_token(TokenKind::Return) {
            self.return_statement();
        } else if self.match_token(TokenKind::Break) {
            self.break_statement();
        } else if self.match_token(TokenKind::Continue) {
            self.continue_statement();
        } else if self.match_token(TokenKind::Do) {
            self.begin_scope();
            self.block();
            self.consume(TokenKind::End, "Expect 'end' after block.");
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    /// Statement list up to a block terminator (not consumed).
    fn block(&mut self) {
        while !self.check(TokenKind::End)
            && !self.check(TokenKind::Else)
            && !self.check(TokenKind::ElseIf)
            && !self.check(TokenKind::Until)
            && !self.check(TokenKind::Eof)
        {
            self.declaration();
        }
    }

    fn scoped_block(&mut self) {
        self.begin_scope();
        self.block();
        self.end_scope();
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.emit_op(OpCode::Pop);
    }

    // ============ Functions & methods ============

    /// Parameter list, body and OP_CLOSURE emission for a function whose
    /// name token was just consumed.
    pub(crate) fn function(&mut self, func_type: FunctionType) {
        let name = SmolStr::new(self.previous.lexeme);
        self.funcs.push(FuncState::new(func_type, Some(name)));
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                if self.func_ref().arity == 255 {
                    self.error_at_current_with(
                        E_TOO_MANY_PARAMS,
                        "Can't have more than 255 parameters.",
                        None,
                    );
                } else {
                    self.func().arity += 1;
                }
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");

        self.block();
        self.consume(TokenKind::End, "Expect 'end' after function body.");

        let (function, upvalues) = self.end_compiler();
        let constant = self.make_constant(Value::function(function));
        self.emit_bytes(OpCode::Closure as u8, constant);
        for upvalue in &upvalues {
            self.emit_byte(upvalue.is_local as u8);
            self.emit_byte(upvalue.index);
        }
    }

    fn method(&mut self) {
        let is_private = self.match_token(TokenKind::Private);

        self.consume(TokenKind::Function, "Expect 'function' in method declaration.");
        self.consume(TokenKind::Identifier, "Expect method name.");
        let constant = self.identifier_constant(&self.previous.clone());

        let func_type = if self.previous.lexeme == "init" {
            FunctionType::Initializer
        } else {
            FunctionType::Method
        };

        self.function(func_type);
        self.emit_bytes(OpCode::Method as u8, constant);
        self.emit_byte(is_private as u8);
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        // Initialized before the body compiles, so it can recurse.
        self.mark_initialized();
        self.function(FunctionType::Function);
        self.define_variable(global);
    }

    // ============ Classes & traits ============

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let class_name = self.previous;
        let name_constant = self.identifier_constant(&class_name);
        self.declare_variable();

        self.emit_bytes(OpCode::Class as u8, name_constant);
        self.define_variable(name_constant);

        self.classes.push(ClassState {
            has_superclass: false,
        });

        let mut has_superclass = false;
        if self.match_token(TokenKind::Extends) {
            self.consume(TokenKind::Identifier, "Expect superclass name.");
            self.variable(false); // push superclass

            if class_name.lexeme == self.previous.lexeme {
                self.error_with(
                    E_INHERIT_SELF,
                    "a class cannot inherit from itself",
                    Some("use a different class as the superclass"),
                );
            }

            // A fresh scope whose sole local `super` holds the superclass;
            // methods capture it as an upvalue.
            self.begin_scope();
            self.add_local(Token::synthetic(TokenKind::Identifier, "super"));
            self.define_variable(0);

            self.named_variable(class_name, false);
            self.emit_op(OpCode::Inherit);
            has_superclass = true;
            if let Some(class) = self.classes.last_mut() {
                class.has_superclass = true;
            }
        }

        if self.match_token(TokenKind::Implements) {
            loop {
                self.consume(TokenKind::Identifier, "Expect trait name.");
                self.variable(false); // push trait
                self.named_variable(class_name, false); // push class
                self.emit_op(OpCode::Implement);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }

        self.named_variable(class_name, false); // class for method binding

        while !self.check(TokenKind::End) && !self.check(TokenKind::Eof) {
            self.method();
        }

        self.consume(TokenKind::End, "Expect 'end' after class body.");
        self.emit_op(OpCode::Pop); // the class pushed for binding

        if has_superclass {
            self.end_scope();
        }

        self.classes.pop();
    }

    fn trait_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect trait name.");
        let trait_name = self.previous;
        let name_constant = self.identifier_constant(&trait_name);
        self.declare_variable();

        self.emit_bytes(OpCode::Trait as u8, name_constant);
        self.define_variable(name_constant);

        // Trait methods may refer to self; they get a class context with no
        // superclass.
        self.classes.push(ClassState {
            has_superclass: false,
        });

        self.named_variable(trait_name, false); // trait for method binding

        while !self.check(TokenKind::End) && !self.check(TokenKind::Eof) {
            self.method();
        }

        self.consume(TokenKind::End, "Expect 'end' after trait body.");
        self.emit_op(OpCode::Pop);

        self.classes.pop();
    }

    // ============ Locals ============

    fn local_statement(&mut self) {
        if self.match_token(TokenKind::Function) {
            // local function name() ... end
            self.consume(TokenKind::Identifier, "Expect function name.");
            self.declare_local(self.previous);
            self.mark_local_initialized_here();
            self.function(FunctionType::Function);
        } else {
            // local name [= expr]
            self.consume(TokenKind::Identifier, "Expect variable name.");
            self.declare_local(self.previous);

            if self.match_token(TokenKind::Equal) {
                self.expression();
            } else {
                self.emit_op(OpCode::Nil);
            }

            self.mark_local_initialized_here();
        }
    }

    /// Mark the newest local initialized at the current depth. Unlike
    /// mark_initialized this also applies at script top level, where `local`
    /// still creates a stack slot.
    fn mark_local_initialized_here(&mut self) {
        let depth = self.func_ref().scope_depth;
        if let Some(local) = self.func().locals.last_mut() {
            local.depth = depth;
        }
    }

    // ============ Control flow ============

    fn if_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Then, "Expect 'then' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);

        self.scoped_block();

        let mut else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);

        while self.match_token(TokenKind::ElseIf) {
            self.expression();
            self.consume(TokenKind::Then, "Expect 'then' after elseif condition.");

            let next_jump = self.emit_jump(OpCode::JumpIfFalse);
            self.emit_op(OpCode::Pop);

            self.scoped_block();

            let skip_jump = self.emit_jump(OpCode::Jump);
            self.patch_jump(else_jump);
            else_jump = skip_jump;

            self.patch_jump(next_jump);
            self.emit_op(OpCode::Pop);
        }

        if self.match_token(TokenKind::Else) {
            self.scoped_block();
        }

        self.patch_jump(else_jump);
        self.consume(TokenKind::End, "Expect 'end' after if statement.");
    }

    fn while_statement(&mut self) {
        let loop_start = self.func_ref().chunk.len();
        let scope_depth = self.func_ref().scope_depth;
        self.func().loops.push(LoopState {
            scope_depth,
            continue_target: Some(loop_start),
            continue_jumps: Vec::new(),
            break_jumps: Vec::new(),
        });

        self.expression();
        self.consume(TokenKind::Do, "Expect 'do' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);

        self.scoped_block();

        self.emit_loop_jump(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);

        self.finish_loop();
        self.consume(TokenKind::End, "Expect 'end' after while body.");
    }

    fn repeat_statement(&mut self) {
        let loop_start = self.func_ref().chunk.len();
        let scope_depth = self.func_ref().scope_depth;
        self.func().loops.push(LoopState {
            scope_depth,
            continue_target: None, // the condition; patched below
            continue_jumps: Vec::new(),
            break_jumps: Vec::new(),
        });

        self.scoped_block();

        // Continue lands on the condition test.
        self.patch_continue_jumps();

        self.consume(TokenKind::Until, "Expect 'until' after repeat body.");
        self.expression();

        // Exit when the condition turns truthy.
        self.emit_op(OpCode::Not);
        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.emit_loop_jump(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);

        self.finish_loop();
    }

    fn for_statement(&mut self) {
        self.begin_scope();

        let var = self.parse_variable("Expect variable name.");
        self.consume(TokenKind::Equal, "Expect '=' after for variable.");
        self.expression(); // start value
        self.define_variable(var);

        // Hidden locals for the limit and step.
        self.add_local(Token::synthetic(TokenKind::Identifier, ""));
        self.mark_initialized();
        self.consume(TokenKind::Comma, "Expect ',' after start value.");
        self.expression(); // limit

        self.add_local(Token::synthetic(TokenKind::Identifier, ""));
        self.mark_initialized();
        if self.match_token(TokenKind::Comma) {
            self.expression(); // step
        } else {
            self.emit_constant(Value::Number(1.0));
        }

        self.consume(TokenKind::Do, "Expect 'do' after for clause.");

        let scope_depth = self.func_ref().scope_depth;
        self.func().loops.push(LoopState {
            scope_depth,
            continue_target: None, // the increment; patched below
            continue_jumps: Vec::new(),
            break_jumps: Vec::new(),
        });

        let loop_start = self.func_ref().chunk.len();
        let base = self.func_ref().locals.len();
        let var_slot = (base - 3) as u8;
        let limit_slot = (base - 2) as u8;
        let step_slot = (base - 1) as u8;

        // Test: var <= limit. Positive-step semantics only.
        self.emit_bytes(OpCode::GetLocal as u8, var_slot);
        self.emit_bytes(OpCode::GetLocal as u8, limit_slot);
        self.emit_op(OpCode::Greater);
        self.emit_op(OpCode::Not);

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);

        self.scoped_block();

        // Continue lands on the increment.
        self.patch_continue_jumps();

        self.emit_bytes(OpCode::GetLocal as u8, var_slot);
        self.emit_bytes(OpCode::GetLocal as u8, step_slot);
        self.emit_op(OpCode::Add);
        self.emit_bytes(OpCode::SetLocal as u8, var_slot);
        self.emit_op(OpCode::Pop);

        self.emit_loop_jump(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);

        self.finish_loop();
        self.consume(TokenKind::End, "Expect 'end' after for body.");
        self.end_scope();
    }

    /// Patch break jumps to the current position and pop the loop state.
    fn finish_loop(&mut self) {
        let breaks = std::mem::take(
            &mut self
                .func()
                .loops
                .last_mut()
                .expect("active loop")
                .break_jumps,
        );
        for jump in breaks {
            self.patch_jump(jump);
        }
        self.func().loops.pop();
    }

    /// Patch pending forward continues to land here.
    fn patch_continue_jumps(&mut self) {
        let jumps = std::mem::take(
            &mut self
                .func()
                .loops
                .last_mut()
                .expect("active loop")
                .continue_jumps,
        );
        for jump in jumps {
            self.patch_jump(jump);
        }
    }

    fn return_statement(&mut self) {
        if self.func_ref().func_type == FunctionType::Script {
            self.error_with(
                E_RETURN_TOP_LEVEL,
                "cannot return from top-level code",
                Some("return statements must be inside a function"),
            );
        }

        if self.check(TokenKind::End)
            || self.check(TokenKind::Else)
            || self.check(TokenKind::ElseIf)
            || self.check(TokenKind::Until)
            || self.check(TokenKind::Eof)
        {
            self.emit_return();
        } else {
            if self.in_initializer() {
                self.error("Can't return a value from an initializer.");
            }
            self.expression();
            self.emit_op(OpCode::Return);
        }
    }

    /// Discard the runtime slots of every local declared inside the
    /// innermost loop. Compile-time state is untouched; the jump leaves the
    /// scopes behind.
    fn pop_loop_locals(&mut self) {
        let f = self.func_ref();
        let Some(active) = f.loops.last() else { return };
        let count = f
            .locals
            .iter()
            .rev()
            .take_while(|l| l.depth > active.scope_depth)
            .count();
        match count {
            0 => {}
            1 => self.emit_op(OpCode::Pop),
            n => self.emit_bytes(OpCode::PopN as u8, n as u8),
        }
    }

    fn break_statement(&mut self) {
        if self.func_ref().loops.is_empty() {
            self.error_with(
                E_BREAK_OUTSIDE_LOOP,
                "cannot use 'break' outside of a loop",
                Some("'break' can only be used inside while, for, or repeat loops"),
            );
            return;
        }

        self.pop_loop_locals();
        let jump = self.emit_jump(OpCode::Jump);
        self.func()
            .loops
            .last_mut()
            .expect("active loop")
            .break_jumps
            .push(jump);
    }

    fn continue_statement(&mut self) {
        if self.func_ref().loops.is_empty() {
            self.error_with(
                E_BREAK_OUTSIDE_LOOP,
                "cannot use 'continue' outside of a loop",
                Some("'continue' can only be used inside while, for, or repeat loops"),
            );
            return;
        }

        self.pop_loop_locals();
        let target = self
            .func_ref()
            .loops
            .last()
            .expect("active loop")
            .continue_target;
        match target {
            Some(target) => self.emit_loop_jump(target),
            None => {
                let jump = self.emit_jump(OpCode::Jump);
                self.func()
                    .loops
                    .last_mut()
                    .expect("active loop")
                    .continue_jumps
                    .push(jump);
            }
        }
    }

    /// Panic-mode recovery: skip tokens until a likely statement start.
    fn synchronize(&mut self) {
        self.panic_mode = false;

        while self.current.kind != TokenKind::Eof {
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Trait
                | TokenKind::Function
                | TokenKind::Local
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Return => return,
                _ => {}
            }
            self.advance();
        }
    }
}
