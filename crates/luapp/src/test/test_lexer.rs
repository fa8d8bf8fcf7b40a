// Lexer tests: token kinds, keywords, comments, strings, positions.

use crate::compiler::{Lexer, TokenKind};

fn kinds(source: &str) -> Vec<TokenKind> {
    let mut lexer = Lexer::new(source);
    let mut out = Vec::new();
    loop {
        let token = lexer.scan_token();
        let kind = token.kind;
        out.push(kind);
        if kind == TokenKind::Eof || kind == TokenKind::Error {
            return out;
        }
    }
}

#[test]
fn punctuation_and_operators() {
    assert_eq!(
        kinds("( ) { } [ ] , . : ; + - * / % #"),
        vec![
            TokenKind::LeftParen,
            TokenKind::RightParen,
            TokenKind::LeftBrace,
            TokenKind::RightBrace,
            TokenKind::LeftBracket,
            TokenKind::RightBracket,
            TokenKind::Comma,
            TokenKind::Dot,
            TokenKind::Colon,
            TokenKind::Semicolon,
            TokenKind::Plus,
            TokenKind::Minus,
            TokenKind::Star,
            TokenKind::Slash,
            TokenKind::Percent,
            TokenKind::Hash,
            TokenKind::Eof,
        ]
    );
}

#[test]
fn double_character_operators() {
    assert_eq!(
        kinds("== ~= <= >= .. ... < > = ~"),
        vec![
            TokenKind::EqualEqual,
            TokenKind::TildeEqual,
            TokenKind::LessEqual,
            TokenKind::GreaterEqual,
            TokenKind::DotDot,
            TokenKind::DotDotDot,
            TokenKind::Less,
            TokenKind::Greater,
            TokenKind::Equal,
            TokenKind::Tilde,
            TokenKind::Eof,
        ]
    );
}

#[test]
fn keywords_recognized() {
    assert_eq!(
        kinds("and break continue class do else elseif end extends"),
        vec![
            TokenKind::And,
            TokenKind::Break,
            TokenKind::Continue,
            TokenKind::Class,
            TokenKind::Do,
            TokenKind::Else,
            TokenKind::ElseIf,
            TokenKind::End,
            TokenKind::Extends,
            TokenKind::Eof,
        ]
    );
    assert_eq!(
        kinds("false for function if implements in local new nil not"),
        vec![
            TokenKind::False,
            TokenKind::For,
            TokenKind::Function,
            TokenKind::If,
            TokenKind::Implements,
            TokenKind::In,
            TokenKind::Local,
            TokenKind::New,
            TokenKind::Nil,
            TokenKind::Not,
            TokenKind::Eof,
        ]
    );
    assert_eq!(
        kinds("or private repeat return self super then trait true until while"),
        vec![
            TokenKind::Or,
            TokenKind::Private,
            TokenKind::Repeat,
            TokenKind::Return,
            TokenKind::SelfKw,
            TokenKind::Super,
            TokenKind::Then,
            TokenKind::Trait,
            TokenKind::True,
            TokenKind::Until,
            TokenKind::While,
            TokenKind::Eof,
        ]
    );
}

#[test]
fn keyword_prefix_is_identifier() {
    assert_eq!(
        kinds("ander forx classes nilable selfish"),
        vec![
            TokenKind::Identifier,
            TokenKind::Identifier,
            TokenKind::Identifier,
            TokenKind::Identifier,
            TokenKind::Identifier,
            TokenKind::Eof,
        ]
    );
}

#[test]
fn numbers() {
    assert_eq!(
        kinds("1 42.5 0.125 1e3 2.5e-2"),
        vec![
            TokenKind::Number,
            TokenKind::Number,
            TokenKind::Number,
            TokenKind::Number,
            TokenKind::Number,
            TokenKind::Eof,
        ]
    );
}

#[test]
fn strings_and_long_strings() {
    assert_eq!(
        kinds(r#""hi" 'there' [[long
string]]"#),
        vec![
            TokenKind::String,
            TokenKind::String,
            TokenKind::String,
            TokenKind::Eof,
        ]
    );
}

#[test]
fn escaped_quote_does_not_terminate() {
    let mut lexer = Lexer::new(r#""a\"b""#);
    let token = lexer.scan_token();
    assert_eq!(token.kind, TokenKind::String);
    assert_eq!(token.lexeme, r#""a\"b""#);
}

#[test]
fn comments_are_skipped() {
    assert_eq!(
        kinds("1 -- a line comment\n2 --[[ a block\ncomment ]] 3"),
        vec![
            TokenKind::Number,
            TokenKind::Number,
            TokenKind::Number,
            TokenKind::Eof,
        ]
    );
}

#[test]
fn block_comment_is_not_nesting() {
    // The first ]] closes the comment; the rest is real tokens.
    assert_eq!(
        kinds("--[[ x ]] y"),
        vec![TokenKind::Identifier, TokenKind::Eof]
    );
}

#[test]
fn unterminated_string_is_an_error() {
    let last = *kinds("\"oops").last().unwrap();
    assert_eq!(last, TokenKind::Error);

    let mut lexer = Lexer::new("\"oops");
    let token = lexer.scan_token();
    assert_eq!(token.lexeme, "Unterminated string.");
}

#[test]
fn unterminated_long_string_is_an_error() {
    let mut lexer = Lexer::new("[[oops");
    let token = lexer.scan_token();
    assert_eq!(token.kind, TokenKind::Error);
    assert_eq!(token.lexeme, "Unterminated long string.");
}

#[test]
fn unexpected_character_is_an_error() {
    let mut lexer = Lexer::new("@");
    let token = lexer.scan_token();
    assert_eq!(token.kind, TokenKind::Error);
    assert_eq!(token.lexeme, "Unexpected character.");
}

#[test]
fn line_and_column_tracking() {
    let mut lexer = Lexer::new("a\n  b");
    let a = lexer.scan_token();
    assert_eq!((a.line, a.column), (1, 1));
    let b = lexer.scan_token();
    assert_eq!((b.line, b.column), (2, 3));
}
