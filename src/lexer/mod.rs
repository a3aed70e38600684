pub mod source_map;

use std::ops::Range;

use logos::Logos;

pub use source_map::SourceMap;

#[derive(Logos, Debug, PartialEq, Clone)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip(r"//[^\n]*", allow_greedy = true))]
pub enum Token {
    // Keywords
    #[token("let")]
    Let,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("null")]
    Null,
    #[token("while")]
    While,
    #[token("do")]
    Do,
    #[token("for")]
    For,
    #[token("def")]
    Def,
    #[token("return")]
    Return,
    #[token("class")]
    Class,
    #[token("this")]
    This,
    #[token("super")]
    Super,
    #[token("print")]
    Print,

    // Punctuation
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(".")]
    Dot,
    #[token(":")]
    Colon,
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,

    // Operators
    #[token("+")]
    Plus,
    #[token("+=")]
    PlusEq,
    #[token("-")]
    Minus,
    #[token("-=")]
    MinusEq,
    #[token("*")]
    Star,
    #[token("*=")]
    StarEq,
    #[token("/")]
    Slash,
    #[token("/=")]
    SlashEq,
    #[token("!")]
    Bang,
    #[token("!=")]
    BangEq,
    #[token("=")]
    Eq,
    #[token("==")]
    EqEq,
    #[token(">")]
    Greater,
    #[token(">=")]
    GreaterEq,
    #[token("<")]
    Less,
    #[token("<=")]
    LessEq,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,

    // Literals
    #[regex(r"[0-9]+(\.[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Number(f64),

    #[token("\"", string_literal)]
    Str(String),

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    /// Dropped by `lex`; only a token so the callback can report an
    /// unterminated comment.
    #[token("/*", block_comment)]
    BlockComment,
}

/// Body of a string literal: everything up to the next `"`, newlines
/// included. No escapes.
fn string_literal(lex: &mut logos::Lexer<Token>) -> Option<String> {
    let rest = lex.remainder();
    match rest.find('"') {
        Some(end) => {
            let body = rest[..end].to_string();
            lex.bump(end + 1);
            Some(body)
        }
        None => {
            lex.bump(rest.len());
            None
        }
    }
}

/// Block comments end at the first `*/`.
fn block_comment(lex: &mut logos::Lexer<Token>) -> bool {
    let rest = lex.remainder();
    match rest.find("*/") {
        Some(end) => {
            lex.bump(end + 2);
            true
        }
        None => {
            lex.bump(rest.len());
            false
        }
    }
}

impl Token {
    /// Short human name used in "expected X" messages.
    pub fn describe(&self) -> String {
        match self {
            Token::Number(n) => format!("number {n}"),
            Token::Str(_) => "string".to_string(),
            Token::Ident(name) => format!("identifier '{name}'"),
            other => format!("'{}'", other.lexeme()),
        }
    }

    fn lexeme(&self) -> &'static str {
        match self {
            Token::Let => "let",
            Token::If => "if",
            Token::Else => "else",
            Token::True => "true",
            Token::False => "false",
            Token::Null => "null",
            Token::While => "while",
            Token::Do => "do",
            Token::For => "for",
            Token::Def => "def",
            Token::Return => "return",
            Token::Class => "class",
            Token::This => "this",
            Token::Super => "super",
            Token::Print => "print",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::Dot => ".",
            Token::Colon => ":",
            Token::Comma => ",",
            Token::Semicolon => ";",
            Token::Plus => "+",
            Token::PlusEq => "+=",
            Token::Minus => "-",
            Token::MinusEq => "-=",
            Token::Star => "*",
            Token::StarEq => "*=",
            Token::Slash => "/",
            Token::SlashEq => "/=",
            Token::Bang => "!",
            Token::BangEq => "!=",
            Token::Eq => "=",
            Token::EqEq => "==",
            Token::Greater => ">",
            Token::GreaterEq => ">=",
            Token::Less => "<",
            Token::LessEq => "<=",
            Token::AndAnd => "&&",
            Token::OrOr => "||",
            Token::BlockComment => "/*",
            Token::Number(_) | Token::Str(_) | Token::Ident(_) => "literal",
        }
    }
}

/// A token with its byte span and 1-based line.
#[derive(Debug, Clone, PartialEq)]
pub struct Lexeme {
    pub token: Token,
    pub span: Range<usize>,
    pub line: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LexErrorKind {
    #[error("unterminated string")]
    UnterminatedString,
    #[error("unterminated block comment")]
    UnterminatedComment,
    #[error("unexpected character '{0}'")]
    UnexpectedChar(char),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("[line {line}] {kind}")]
pub struct LexError {
    pub kind: LexErrorKind,
    pub span: Range<usize>,
    pub line: u32,
}

impl LexError {
    pub fn code(&self) -> &'static str {
        match self.kind {
            LexErrorKind::UnterminatedString => "NYR-L001",
            LexErrorKind::UnterminatedComment => "NYR-L002",
            LexErrorKind::UnexpectedChar(_) => "NYR-L003",
        }
    }

    /// Every lex error comes with a suggested fix where one is obvious.
    pub fn suggestion(&self) -> Option<String> {
        match self.kind {
            LexErrorKind::UnterminatedString => Some("close the string with '\"'".to_string()),
            LexErrorKind::UnterminatedComment => Some("close the comment with '*/'".to_string()),
            LexErrorKind::UnexpectedChar('&') => Some("logical and is written '&&'".to_string()),
            LexErrorKind::UnexpectedChar('|') => Some("logical or is written '||'".to_string()),
            LexErrorKind::UnexpectedChar('\'') => {
                Some("strings use double quotes: \"...\"".to_string())
            }
            LexErrorKind::UnexpectedChar(_) => None,
        }
    }
}

/// Scans the whole source. Errors do not stop scanning: the bad input is
/// skipped and collected.
pub fn lex(source: &str) -> (Vec<Lexeme>, Vec<LexError>) {
    let map = SourceMap::new(source);
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    while let Some(result) = lexer.next() {
        let span = lexer.span();
        let line = map.line_of(span.start);
        match result {
            Ok(Token::BlockComment) => {}
            Ok(token) => tokens.push(Lexeme { token, span, line }),
            Err(()) => {
                let slice = lexer.slice();
                let kind = if slice.starts_with('"') {
                    LexErrorKind::UnterminatedString
                } else if slice.starts_with("/*") {
                    LexErrorKind::UnterminatedComment
                } else {
                    LexErrorKind::UnexpectedChar(slice.chars().next().unwrap_or('\0'))
                };
                errors.push(LexError { kind, span, line });
            }
        }
    }

    (tokens, errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(source: &str) -> Vec<Token> {
        let (lexemes, errors) = lex(source);
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        lexemes.into_iter().map(|l| l.token).collect()
    }

    #[test]
    fn lex_function_declaration() {
        let toks = tokens("def add(a, b) { return a + b; }");
        assert_eq!(toks[0], Token::Def);
        assert_eq!(toks[1], Token::Ident("add".to_string()));
        assert_eq!(toks[2], Token::LParen);
        assert_eq!(toks[8], Token::Return);
        assert_eq!(toks.last(), Some(&Token::RBrace));
    }

    #[test]
    fn keywords_win_over_identifiers() {
        let toks = tokens("class classy this thistle");
        assert_eq!(
            toks,
            vec![
                Token::Class,
                Token::Ident("classy".to_string()),
                Token::This,
                Token::Ident("thistle".to_string()),
            ]
        );
    }

    #[test]
    fn compound_operators() {
        let toks = tokens("a += 1; b -= 2; c *= 3; d /= 4; e == f != g <= h >= i && j || k");
        assert!(toks.contains(&Token::PlusEq));
        assert!(toks.contains(&Token::MinusEq));
        assert!(toks.contains(&Token::StarEq));
        assert!(toks.contains(&Token::SlashEq));
        assert!(toks.contains(&Token::EqEq));
        assert!(toks.contains(&Token::BangEq));
        assert!(toks.contains(&Token::LessEq));
        assert!(toks.contains(&Token::GreaterEq));
        assert!(toks.contains(&Token::AndAnd));
        assert!(toks.contains(&Token::OrOr));
    }

    #[test]
    fn numbers() {
        assert_eq!(tokens("12"), vec![Token::Number(12.0)]);
        assert_eq!(tokens("3.25"), vec![Token::Number(3.25)]);
        assert_eq!(tokens("1 .5"), vec![Token::Number(1.0), Token::Dot, Token::Number(5.0)]);
    }

    #[test]
    fn multi_line_string_tracks_lines() {
        let (lexemes, errors) = lex("print \"a\nb\";\nx");
        assert!(errors.is_empty());
        assert_eq!(lexemes[1].token, Token::Str("a\nb".to_string()));
        assert_eq!(lexemes[1].line, 1);
        assert_eq!(lexemes[2].token, Token::Semicolon);
        assert_eq!(lexemes[2].line, 2);
        assert_eq!(lexemes[3].line, 3);
    }

    #[test]
    fn comments_are_skipped() {
        let toks = tokens("a // line\n/* block * with / stars\n */ b /**/ c");
        assert_eq!(
            toks,
            vec![
                Token::Ident("a".to_string()),
                Token::Ident("b".to_string()),
                Token::Ident("c".to_string()),
            ]
        );
    }

    #[test]
    fn block_comment_needs_full_terminator() {
        let (lexemes, errors) = lex("a /* only a star * here");
        assert_eq!(lexemes.len(), 1);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, LexErrorKind::UnterminatedComment);
        assert_eq!(errors[0].code(), "NYR-L002");
    }

    #[test]
    fn unterminated_string() {
        let (_, errors) = lex("let s = \"open;\nmore");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, LexErrorKind::UnterminatedString);
        assert_eq!(errors[0].line, 1);
        assert_eq!(errors[0].span.start, 8);
    }

    #[test]
    fn unexpected_characters_are_collected() {
        let (lexemes, errors) = lex("a & b\n@");
        assert_eq!(lexemes.len(), 2);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].kind, LexErrorKind::UnexpectedChar('&'));
        assert!(errors[0].suggestion().is_some_and(|s| s.contains("&&")));
        assert_eq!(errors[1].kind, LexErrorKind::UnexpectedChar('@'));
        assert_eq!(errors[1].line, 2);
        assert_eq!(errors[1].to_string(), "[line 2] unexpected character '@'");
    }

    #[test]
    fn spans_cover_lexemes() {
        let src = "let value = 10;";
        let (lexemes, _) = lex(src);
        assert_eq!(&src[lexemes[1].span.clone()], "value");
        assert_eq!(&src[lexemes[3].span.clone()], "10");
    }
}
