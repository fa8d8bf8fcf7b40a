// Expression parsing: Pratt rules, operator emission and constant folding.
//
// Every token kind maps to an optional prefix handler, an optional infix
// handler and a precedence. After emitting an operator the compiler peeks the
// tracked tail of the chunk; when the operands were constants the operation
// folds at compile time. Division and modulo by zero are never folded - they
// stay in the bytecode and fail (or produce IEEE infinities) at runtime.

use crate::compiler::token::{Token, TokenKind};
use crate::compiler::{Compiler, FunctionType};
use crate::diagnostic::{
    E_EXPECT_EXPRESSION, E_INVALID_ASSIGN, E_SELF_OUTSIDE_CLASS, E_SUPER_NO_SUPERCLASS,
    E_TOO_MANY_ARGS,
};
use crate::lua_vm::OpCode;
use crate::value::Value;

/// Binding strength, low to high. `next()` gives the level used for the
/// right operand of a left-associative operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == ~=
    Comparison, // < > <= >=
    Concat,     // ..
    Term,       // + -
    Factor,     // * / %
    Unary,      // not - #
    Call,       // . () : []
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
            Precedence::Comparison => Precedence::Concat,
            Precedence::Concat => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

type ParseFn<'src, 'vm> = fn(&mut Compiler<'src, 'vm>, bool);

pub(crate) struct ParseRule<'src, 'vm> {
    prefix: Option<ParseFn<'src, 'vm>>,
    infix: Option<ParseFn<'src, 'vm>>,
    precedence: Precedence,
}

fn rule<'src, 'vm>(
    prefix: Option<ParseFn<'src, 'vm>>,
    infix: Option<ParseFn<'src, 'vm>>,
    precedence: Precedence,
) -> ParseRule<'src, 'vm> {
    ParseRule {
        prefix,
        infix,
        precedence,
    }
}

fn precedence_of(kind: TokenKind) -> Precedence {
    get_rule(kind).precedence
}

fn get_rule<'src, 'vm>(kind: TokenKind) -> ParseRule<'src, 'vm> {
    use TokenKind::*;
    match kind {
        LeftParen => rule(Some(Compiler::grouping), Some(Compiler::call), Precedence::Call),
        LeftBrace => rule(Some(Compiler::table_literal), None, Precedence::None),
        LeftBracket => rule(None, Some(Compiler::subscript), Precedence::Call),
        Dot => rule(None, Some(Compiler::dot), Precedence::Call),
        Colon => rule(None, Some(Compiler::colon), Precedence::Call),
        Plus => rule(None, Some(Compiler::binary), Precedence::Term),
        Minus => rule(Some(Compiler::unary), Some(Compiler::binary), Precedence::Term),
        Star => rule(None, Some(Compiler::binary), Precedence::Factor),
        Slash => rule(None, Some(Compiler::binary), Precedence::Factor),
        Percent => rule(None, Some(Compiler::binary), Precedence::Factor),
        Hash => rule(Some(Compiler::length), None, Precedence::Unary),
        EqualEqual => rule(None, Some(Compiler::binary), Precedence::Equality),
        TildeEqual => rule(None, Some(Compiler::binary), Precedence::Equality),
        Less => rule(None, Some(Compiler::binary), Precedence::Comparison),
        LessEqual => rule(None, Some(Compiler::binary), Precedence::Comparison),
        Greater => rule(None, Some(Compiler::binary), Precedence::Comparison),
        GreaterEqual => rule(None, Some(Compiler::binary), Precedence::Comparison),
        DotDot => rule(None, Some(Compiler::binary), Precedence::Concat),
        Identifier => rule(Some(Compiler::variable), None, Precedence::None),
        String => rule(Some(Compiler::string), None, Precedence::None),
        Number => rule(Some(Compiler::number), None, Precedence::None),
        And => rule(None, Some(Compiler::and_op), Precedence::And),
        Or => rule(None, Some(Compiler::or_op), Precedence::Or),
        False => rule(Some(Compiler::literal), None, Precedence::None),
        True => rule(Some(Compiler::literal), None, Precedence::None),
        Nil => rule(Some(Compiler::literal), None, Precedence::None),
        Not => rule(Some(Compiler::unary), None, Precedence::None),
        New => rule(Some(Compiler::new_instance), None, Precedence::None),
        Super => rule(Some(Compiler::super_expr), None, Precedence::None),
        SelfKw => rule(Some(Compiler::self_expr), None, Precedence::None),
        _ => rule(None, None, Precedence::None),
    }
}

impl<'src, 'vm> Compiler<'src, 'vm> {
    pub(crate) fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let Some(prefix) = get_rule(self.previous.kind).prefix else {
            self.error_with(E_EXPECT_EXPRESSION, "Expect expression.", None);
            return;
        };

        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);
        self.infix_loop(precedence, can_assign);

        if can_assign && self.match_token(TokenKind::Equal) {
            self.error_with(E_INVALID_ASSIGN, "Invalid assignment target.", None);
        }
    }

    /// Continue applying infix rules while the next operator binds at least
    /// as tightly as `precedence`. Also used by table literals to finish an
    /// expression whose leading identifier was already consumed.
    pub(crate) fn infix_loop(&mut self, precedence: Precedence, can_assign: bool) {
        while precedence <= get_rule(self.current.kind).precedence {
            self.advance();
            if let Some(infix) = get_rule(self.previous.kind).infix {
                infix(self, can_assign);
            }
        }
    }

    // ============ Prefix handlers ============

    fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn number(&mut self, _can_assign: bool) {
        let value: f64 = self.previous.lexeme.parse().unwrap_or(0.0);
        self.emit_constant(Value::Number(value));
    }

    fn string(&mut self, _can_assign: bool) {
        // Strip the delimiters: one quote either side, or the long brackets.
        let lexeme = self.previous.lexeme;
        let inner = if lexeme.starts_with("[[") {
            &lexeme[2..lexeme.len() - 2]
        } else {
            &lexeme[1..lexeme.len() - 1]
        };
        let value = self.vm.copy_string_value(inner);
        self.vm.compiler_roots.push(value);
        self.emit_constant(value);
    }

    fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::False => self.emit_op(OpCode::False),
            TokenKind::Nil => self.emit_op(OpCode::Nil),
            TokenKind::True => self.emit_op(OpCode::True),
            _ => {}
        }
    }

    pub(crate) fn variable(&mut self, can_assign: bool) {
        self.named_variable(self.previous, can_assign);
    }

    pub(crate) fn named_variable(&mut self, name: Token<'src>, can_assign: bool) {
        let func_idx = self.funcs.len() - 1;
        let (get_op, set_op, arg, local_slot) =
            if let Some(slot) = self.resolve_local(func_idx, &name) {
                (OpCode::GetLocal, OpCode::SetLocal, slot, Some(slot))
            } else if let Some(index) = self.resolve_upvalue(func_idx, &name) {
                (OpCode::GetUpvalue, OpCode::SetUpvalue, index, None)
            } else {
                let constant = self.identifier_constant(&name);
                (OpCode::GetGlobal, OpCode::SetGlobal, constant, None)
            };

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_bytes(set_op as u8, arg);
        } else {
            if let Some(slot) = local_slot {
                self.mark_local_used(func_idx, slot);
            }
            self.emit_bytes(get_op as u8, arg);
        }
    }

    fn unary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        self.parse_precedence(Precedence::Unary);

        // Fold a constant operand.
        if let Some(value) = self.last_constant() {
            match operator {
                TokenKind::Minus => {
                    if let Value::Number(n) = value {
                        self.remove_last_constant();
                        self.emit_constant(Value::Number(-n));
                        return;
                    }
                }
                TokenKind::Not => {
                    self.remove_last_constant();
                    self.emit_constant(Value::Bool(value.is_falsey()));
                    return;
                }
                _ => {}
            }
        }

        match operator {
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            TokenKind::Not => self.emit_op(OpCode::Not),
            _ => {}
        }
    }

    fn length(&mut self, _can_assign: bool) {
        self.parse_precedence(Precedence::Unary);
        self.emit_op(OpCode::Length);
    }

    fn self_expr(&mut self, _can_assign: bool) {
        if self.classes.is_empty() {
            self.error_with(
                E_SELF_OUTSIDE_CLASS,
                "cannot use 'self' outside of a class",
                Some("'self' refers to the current instance and is only valid inside class methods"),
            );
            return;
        }
        self.variable(false);
    }

    fn super_expr(&mut self, _can_assign: bool) {
        let in_class = !self.classes.is_empty();
        let has_superclass = self.classes.last().map(|c| c.has_superclass).unwrap_or(false);
        if !in_class {
            self.error_with(
                E_SELF_OUTSIDE_CLASS,
                "cannot use 'super' outside of a class",
                Some("'super' is only valid inside class methods"),
            );
        } else if !has_superclass {
            self.error_with(
                E_SUPER_NO_SUPERCLASS,
                "cannot use 'super' in a class with no superclass",
                Some("add 'extends ParentClass' to use super"),
            );
        }

        self.consume(TokenKind::Dot, "Expect '.' after 'super'.");
        self.consume(TokenKind::Identifier, "Expect superclass method name.");
        let name = self.identifier_constant(&self.previous.clone());

        // Receiver first, then the superclass value from its synthetic local.
        self.named_variable(Token::synthetic(TokenKind::Identifier, "self"), false);

        if self.match_token(TokenKind::LeftParen) {
            let arg_count = self.argument_list();
            self.named_variable(Token::synthetic(TokenKind::Identifier, "super"), false);
            self.emit_bytes(OpCode::SuperInvoke as u8, name);
            self.emit_byte(arg_count);
        } else {
            self.named_variable(Token::synthetic(TokenKind::Identifier, "super"), false);
            self.emit_bytes(OpCode::GetSuper as u8, name);
        }
    }

    fn new_instance(&mut self, _can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect class name after 'new'.");
        let name = self.identifier_constant(&self.previous.clone());
        self.emit_bytes(OpCode::GetGlobal as u8, name);

        self.consume(TokenKind::LeftParen, "Expect '(' after class name.");
        let arg_count = self.argument_list();
        self.emit_bytes(OpCode::New as u8, arg_count);
    }

    /// Table literal: `{expr, name = expr, [expr] = expr, ...}`.
    fn table_literal(&mut self, _can_assign: bool) {
        self.emit_op(OpCode::Table);

        if !self.check(TokenKind::RightBrace) {
            loop {
                if self.check(TokenKind::RightBrace) {
                    break; // trailing comma
                }

                if self.check(TokenKind::Identifier) {
                    let name = self.current;
                    self.advance();
                    if self.match_token(TokenKind::Equal) {
                        // name = value
                        let constant = self.identifier_constant(&name);
                        self.expression();
                        self.emit_bytes(OpCode::TableSetField as u8, constant);
                    } else {
                        // An array item whose expression starts with an
                        // identifier we already consumed; finish it.
                        self.named_variable(name, false);
                        self.infix_loop(Precedence::Or, false);
                        self.emit_op(OpCode::TableAdd);
                    }
                } else if self.match_token(TokenKind::LeftBracket) {
                    // [key] = value; the table stays on the stack underneath.
                    self.expression();
                    self.consume(TokenKind::RightBracket, "Expect ']' after table key.");
                    self.consume(TokenKind::Equal, "Expect '=' after table key.");
                    self.expression();
                    self.emit_op(OpCode::TableSetEntry);
                } else {
                    self.expression();
                    self.emit_op(OpCode::TableAdd);
                }

                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }

        self.consume(TokenKind::RightBrace, "Expect '}' after table elements.");
    }

    // ============ Infix handlers ============

    fn call(&mut self, _can_assign: bool) {
        let arg_count = self.argument_list();
        self.emit_bytes(OpCode::Call as u8, arg_count);
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect property name after '.'.");
        let name = self.identifier_constant(&self.previous.clone());

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_bytes(OpCode::SetProperty as u8, name);
        } else if self.match_token(TokenKind::LeftParen) {
            // obj.method(args) goes through the invoke fast path.
            let arg_count = self.argument_list();
            self.emit_bytes(OpCode::Invoke as u8, name);
            self.emit_byte(arg_count);
        } else {
            self.emit_bytes(OpCode::GetProperty as u8, name);
        }
    }

    fn colon(&mut self, _can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect method name after ':'.");
        let name = self.identifier_constant(&self.previous.clone());

        self.consume(TokenKind::LeftParen, "Expect '(' after method name.");
        let arg_count = self.argument_list();
        self.emit_bytes(OpCode::Invoke as u8, name);
        self.emit_byte(arg_count);
    }

    fn subscript(&mut self, can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightBracket, "Expect ']' after index.");

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_op(OpCode::TableSet);
        } else {
            self.emit_op(OpCode::TableGet);
        }
    }

    fn and_op(&mut self, _can_assign: bool) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or_op(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn binary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        let precedence = precedence_of(operator);
        // `..` leans right; everything else is left-associative.
        let right = if operator == TokenKind::DotDot {
            precedence
        } else {
            precedence.next()
        };
        self.parse_precedence(right);

        if self.try_fold_binary(operator) {
            return;
        }

        match operator {
            TokenKind::Plus => self.emit_op(OpCode::Add),
            TokenKind::Minus => self.emit_op(OpCode::Subtract),
            TokenKind::Star => self.emit_op(OpCode::Multiply),
            TokenKind::Slash => self.emit_op(OpCode::Divide),
            TokenKind::Percent => self.emit_op(OpCode::Modulo),
            TokenKind::DotDot => self.emit_op(OpCode::Concat),
            TokenKind::EqualEqual => self.emit_op(OpCode::Equal),
            TokenKind::TildeEqual => {
                self.emit_op(OpCode::Equal);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Greater => self.emit_op(OpCode::Greater),
            TokenKind::GreaterEqual => {
                self.emit_op(OpCode::Less);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Less => self.emit_op(OpCode::Less),
            TokenKind::LessEqual => {
                self.emit_op(OpCode::Greater);
                self.emit_op(OpCode::Not);
            }
            _ => {}
        }
    }

    /// Fold a binary operation whose two operands were just emitted as
    /// constants. Returns true if the bytecode was rewritten.
    fn try_fold_binary(&mut self, operator: TokenKind) -> bool {
        let Some((a, b)) = self.last_two_constants() else {
            return false;
        };

        // Numeric arithmetic and comparison.
        if let (Value::Number(x), Value::Number(y)) = (a, b) {
            let folded = match operator {
                TokenKind::Plus => Some(Value::Number(x + y)),
                TokenKind::Minus => Some(Value::Number(x - y)),
                TokenKind::Star => Some(Value::Number(x * y)),
                // Division by zero is left for the runtime to decide.
                TokenKind::Slash if y != 0.0 => Some(Value::Number(x / y)),
                // Modulo truncates both operands; zero divisor stays runtime.
                TokenKind::Percent if y as i64 != 0 => {
                    Some(Value::Number((x as i64 % y as i64) as f64))
                }
                TokenKind::Greater => Some(Value::Bool(x > y)),
                TokenKind::GreaterEqual => Some(Value::Bool(x >= y)),
                TokenKind::Less => Some(Value::Bool(x < y)),
                TokenKind::LessEqual => Some(Value::Bool(x <= y)),
                TokenKind::EqualEqual => Some(Value::Bool(x == y)),
                TokenKind::TildeEqual => Some(Value::Bool(x != y)),
                _ => None,
            };
            if let Some(result) = folded {
                self.remove_last_two_constants();
                self.emit_constant(result);
                return true;
            }
        }

        // String concatenation.
        if operator == TokenKind::DotDot {
            if let (Some(ia), Some(ib)) = (a.as_string_id(), b.as_string_id()) {
                let mut joined = self.vm.pool.string(ia).to_string();
                joined.push_str(self.vm.pool.string(ib));
                let value = self.vm.take_string_value(joined);
                self.vm.compiler_roots.push(value);
                self.remove_last_two_constants();
                self.emit_constant(value);
                return true;
            }
        }

        // Equality over any constant pair (booleans, nil, interned strings).
        if matches!(operator, TokenKind::EqualEqual | TokenKind::TildeEqual) {
            let equal = a == b;
            self.remove_last_two_constants();
            self.emit_constant(Value::Bool(if operator == TokenKind::EqualEqual {
                equal
            } else {
                !equal
            }));
            return true;
        }

        false
    }

    // ============ Shared helpers ============

    pub(crate) fn argument_list(&mut self) -> u8 {
        let mut arg_count: u32 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if arg_count == 255 {
                    self.error_with(
                        E_TOO_MANY_ARGS,
                        "Can't have more than 255 arguments.",
                        None,
                    );
                }
                arg_count += 1;
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        arg_count.min(255) as u8
    }

    pub(crate) fn in_initializer(&self) -> bool {
        self.func_ref().func_type == FunctionType::Initializer
    }
}
