//! Tokenizer for policy text.

use std::fmt::{Display, Formatter, Result as FmtResult};

use crate::ast::{Pattern, PatternElem};
use crate::error::ParseError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TokenKind {
    Ident(String),
    /// Integer literal digits, unsigned; negation is folded by the parser.
    Int(String),
    /// String literal body with escapes still in place. `like` patterns
    /// and plain strings unescape it differently.
    Str(String),
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semi,
    Colon,
    PathSep,
    Dot,
    At,
    Question,
    EqEq,
    NotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    AndAnd,
    OrOr,
    Bang,
    Minus,
    Plus,
    Star,
    Eof,
}

impl Display for TokenKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let symbol = match self {
            TokenKind::Ident(name) => return write!(f, "`{name}`"),
            TokenKind::Int(digits) => return write!(f, "`{digits}`"),
            TokenKind::Str(raw) => return write!(f, "\"{raw}\""),
            TokenKind::Eof => return f.write_str("end of input"),
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::Comma => ",",
            TokenKind::Semi => ";",
            TokenKind::Colon => ":",
            TokenKind::PathSep => "::",
            TokenKind::Dot => ".",
            TokenKind::At => "@",
            TokenKind::Question => "?",
            TokenKind::EqEq => "==",
            TokenKind::NotEq => "!=",
            TokenKind::Less => "<",
            TokenKind::LessEq => "<=",
            TokenKind::Greater => ">",
            TokenKind::GreaterEq => ">=",
            TokenKind::AndAnd => "&&",
            TokenKind::OrOr => "||",
            TokenKind::Bang => "!",
            TokenKind::Minus => "-",
            TokenKind::Plus => "+",
            TokenKind::Star => "*",
        };
        write!(f, "`{symbol}`")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    column: usize,
}

impl Lexer<'_> {
    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.chars.peek() == Some(&expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.chars.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') => {
                    let mut ahead = self.chars.clone();
                    ahead.next();
                    if ahead.peek() != Some(&'/') {
                        return;
                    }
                    while let Some(c) = self.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                _ => return,
            }
        }
    }

    fn string_body(&mut self, line: usize, column: usize) -> Result<String, ParseError> {
        let unterminated = || ParseError::new(line, column, "unterminated string literal");
        let mut raw = String::new();
        loop {
            match self.bump().ok_or_else(unterminated)? {
                '"' => return Ok(raw),
                '\\' => {
                    raw.push('\\');
                    raw.push(self.bump().ok_or_else(unterminated)?);
                }
                c => raw.push(c),
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, ParseError> {
        self.skip_trivia();
        let (line, column) = (self.line, self.column);
        let token = |kind| Ok(Token { kind, line, column });

        let Some(c) = self.bump() else {
            return token(TokenKind::Eof);
        };
        let kind = match c {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semi,
            '.' => TokenKind::Dot,
            '@' => TokenKind::At,
            '?' => TokenKind::Question,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            ':' if self.eat(':') => TokenKind::PathSep,
            ':' => TokenKind::Colon,
            '=' if self.eat('=') => TokenKind::EqEq,
            '!' if self.eat('=') => TokenKind::NotEq,
            '!' => TokenKind::Bang,
            '<' if self.eat('=') => TokenKind::LessEq,
            '<' => TokenKind::Less,
            '>' if self.eat('=') => TokenKind::GreaterEq,
            '>' => TokenKind::Greater,
            '&' if self.eat('&') => TokenKind::AndAnd,
            '|' if self.eat('|') => TokenKind::OrOr,
            '"' => TokenKind::Str(self.string_body(line, column)?),
            c if c.is_ascii_digit() => {
                let mut digits = c.to_string();
                while let Some(d) = self.chars.peek().copied().filter(char::is_ascii_digit) {
                    digits.push(d);
                    self.bump();
                }
                TokenKind::Int(digits)
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = c.to_string();
                while let Some(d) = self
                    .chars
                    .peek()
                    .copied()
                    .filter(|d| d.is_ascii_alphanumeric() || *d == '_')
                {
                    ident.push(d);
                    self.bump();
                }
                TokenKind::Ident(ident)
            }
            other => {
                return Err(ParseError::new(
                    line,
                    column,
                    format!("unexpected character `{other}`"),
                ));
            }
        };
        token(kind)
    }
}

/// Split `src` into tokens, always ending with `Eof`.
pub(crate) fn tokenize(src: &str) -> Result<Vec<Token>, ParseError> {
    let mut lexer = Lexer {
        chars: src.chars().peekable(),
        line: 1,
        column: 1,
    };
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            return Ok(tokens);
        }
    }
}

enum Piece {
    Char(char),
    Wildcard,
}

fn unescape_pieces(raw: &str, in_pattern: bool) -> Result<Vec<Piece>, String> {
    let mut pieces = Vec::new();
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '*' && in_pattern {
            pieces.push(Piece::Wildcard);
            continue;
        }
        if c != '\\' {
            pieces.push(Piece::Char(c));
            continue;
        }
        let escaped = match chars.next() {
            Some('n') => '\n',
            Some('t') => '\t',
            Some('r') => '\r',
            Some('0') => '\0',
            Some('\\') => '\\',
            Some('"') => '"',
            Some('\'') => '\'',
            Some('*') if in_pattern => '*',
            Some('u') => unicode_escape(&mut chars)?,
            Some(other) => return Err(format!("invalid escape `\\{other}`")),
            None => return Err("dangling `\\` in string literal".to_string()),
        };
        pieces.push(Piece::Char(escaped));
    }
    Ok(pieces)
}

fn unicode_escape(chars: &mut std::str::Chars<'_>) -> Result<char, String> {
    if chars.next() != Some('{') {
        return Err("expected `{` after `\\u`".to_string());
    }
    let mut hex = String::new();
    for c in chars.by_ref() {
        if c == '}' {
            let code = u32::from_str_radix(&hex, 16)
                .map_err(|_| format!("invalid unicode escape `\\u{{{hex}}}`"))?;
            return char::from_u32(code)
                .ok_or_else(|| format!("invalid unicode scalar `\\u{{{hex}}}`"));
        }
        if hex.len() == 6 {
            break;
        }
        hex.push(c);
    }
    Err("unterminated unicode escape".to_string())
}

/// Interpret the escapes of a string literal body.
pub(crate) fn unescape(raw: &str) -> Result<String, String> {
    unescape_pieces(raw, false)?
        .into_iter()
        .map(|piece| match piece {
            Piece::Char(c) => Ok(c),
            Piece::Wildcard => Err("unexpected wildcard".to_string()),
        })
        .collect()
}

/// Interpret a `like` pattern body: `*` is a wildcard, `\*` a literal star.
pub(crate) fn unescape_pattern(raw: &str) -> Result<Pattern, String> {
    let elems = unescape_pieces(raw, true)?
        .into_iter()
        .map(|piece| match piece {
            Piece::Char(c) => PatternElem::Char(c),
            Piece::Wildcard => PatternElem::Wildcard,
        })
        .collect();
    Ok(Pattern::new(elems))
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_tokenize_policy_head() {
        use TokenKind::*;
        assert_eq!(
            kinds(r#"permit(principal == User::"alice", action, resource);"#),
            vec![
                Ident("permit".into()),
                LParen,
                Ident("principal".into()),
                EqEq,
                Ident("User".into()),
                PathSep,
                Str("alice".into()),
                Comma,
                Ident("action".into()),
                Comma,
                Ident("resource".into()),
                RParen,
                Semi,
                Eof,
            ]
        );
    }

    #[test]
    fn test_comments_and_positions() {
        let tokens = tokenize("// header\n  permit // trailing\n;").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Ident("permit".into()));
        assert_eq!((tokens[0].line, tokens[0].column), (2, 3));
        assert_eq!(tokens[1].kind, TokenKind::Semi);
        assert_eq!((tokens[1].line, tokens[1].column), (3, 1));
    }

    #[test]
    fn test_two_char_operators() {
        use TokenKind::*;
        assert_eq!(
            kinds("<= >= != && || :: < > ! :"),
            vec![LessEq, GreaterEq, NotEq, AndAnd, OrOr, PathSep, Less, Greater, Bang, Colon, Eof]
        );
    }

    #[parameterized(
        lone_ampersand = { "a & b" },
        lone_equals = { "a = b" },
        unterminated = { r#""abc"# },
        unknown_char = { "#" },
    )]
    fn test_tokenize_errors(src: &str) {
        assert!(tokenize(src).is_err());
    }

    #[parameterized(
        plain = { "abc", "abc" },
        quote = { r#"a\"b"#, "a\"b" },
        single_quote = { r"b\'ob", "b'ob" },
        newline = { r"a\nb", "a\nb" },
        backslash = { r"a\\b", "a\\b" },
        unicode = { r"\u{1F600}", "\u{1F600}" },
        nul = { r"\0", "\0" },
    )]
    fn test_unescape(raw: &str, expected: &str) {
        assert_eq!(unescape(raw).unwrap(), expected);
    }

    #[parameterized(
        unknown = { r"\q" },
        star_outside_pattern = { r"\*" },
        bad_unicode = { r"\u{zz}" },
        surrogate = { r"\u{D800}" },
        unterminated_unicode = { r"\u{41" },
    )]
    fn test_unescape_errors(raw: &str) {
        assert!(unescape(raw).is_err());
    }

    #[test]
    fn test_unescape_pattern() {
        let pattern = unescape_pattern(r"a*\*").unwrap();
        assert_eq!(
            pattern.elems(),
            &[
                PatternElem::Char('a'),
                PatternElem::Wildcard,
                PatternElem::Char('*')
            ]
        );
    }
}
