//! Lexer for the condition DSL.
//!
//! Tokenization also enforces the parse-time prohibitions: bitwise
//! operators, the power operator, attribute access, and assignment are
//! rejected here with pointed messages rather than falling through to a
//! generic parse error.

use super::ExprError;

#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    True,
    False,
    And,
    Or,
    Not,
    In,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
}

/// A token plus its byte offset in the source, for error messages.
#[derive(Clone, Debug, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
}

pub fn lex(input: &str) -> Result<Vec<Spanned>, ExprError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '(' => push_simple(&mut tokens, Token::LParen, &mut i),
            ')' => push_simple(&mut tokens, Token::RParen, &mut i),
            '[' => push_simple(&mut tokens, Token::LBracket, &mut i),
            ']' => push_simple(&mut tokens, Token::RBracket, &mut i),
            ',' => push_simple(&mut tokens, Token::Comma, &mut i),
            '+' => push_simple(&mut tokens, Token::Plus, &mut i),
            '-' => push_simple(&mut tokens, Token::Minus, &mut i),
            '*' => {
                if bytes.get(i + 1) == Some(&b'*') {
                    return Err(syntax(i, "the power operator is not permitted"));
                }
                push_simple(&mut tokens, Token::Star, &mut i);
            }
            '/' => push_simple(&mut tokens, Token::Slash, &mut i),
            '%' => push_simple(&mut tokens, Token::Percent, &mut i),
            '<' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Spanned {
                        token: Token::Le,
                        offset: i,
                    });
                    i += 2;
                } else {
                    push_simple(&mut tokens, Token::Lt, &mut i);
                }
            }
            '>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Spanned {
                        token: Token::Ge,
                        offset: i,
                    });
                    i += 2;
                } else {
                    push_simple(&mut tokens, Token::Gt, &mut i);
                }
            }
            '=' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Spanned {
                        token: Token::Eq,
                        offset: i,
                    });
                    i += 2;
                } else {
                    return Err(syntax(i, "assignment is not permitted; use `==`"));
                }
            }
            '!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Spanned {
                        token: Token::Ne,
                        offset: i,
                    });
                    i += 2;
                } else {
                    return Err(syntax(i, "unexpected `!`; use `not`"));
                }
            }
            '&' | '|' | '^' | '~' => {
                return Err(syntax(i, "bitwise operators are not permitted"));
            }
            '.' => {
                return Err(syntax(i, "attribute access is not permitted"));
            }
            '"' | '\'' => {
                let (string, next) = lex_string(input, i, c)?;
                tokens.push(Spanned {
                    token: Token::Str(string),
                    offset: i,
                });
                i = next;
            }
            _ if c.is_ascii_digit() => {
                let (token, next) = lex_number(input, i)?;
                tokens.push(Spanned { token, offset: i });
                i = next;
            }
            _ if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < bytes.len()
                    && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] == b'_')
                {
                    i += 1;
                }
                let word = &input[start..i];
                let token = match word {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "in" => Token::In,
                    "true" | "True" => Token::True,
                    "false" | "False" => Token::False,
                    _ => Token::Ident(word.to_string()),
                };
                tokens.push(Spanned {
                    token,
                    offset: start,
                });
            }
            other => {
                return Err(syntax(i, format!("unexpected character `{other}`")));
            }
        }
    }

    Ok(tokens)
}

fn push_simple(tokens: &mut Vec<Spanned>, token: Token, i: &mut usize) {
    tokens.push(Spanned { token, offset: *i });
    *i += 1;
}

fn lex_string(input: &str, start: usize, quote: char) -> Result<(String, usize), ExprError> {
    let bytes = input.as_bytes();
    let mut out = String::new();
    let mut i = start + 1;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c == quote {
            return Ok((out, i + 1));
        }
        if c == '\\' {
            match bytes.get(i + 1).map(|b| *b as char) {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('\\') => out.push('\\'),
                Some(q) if q == quote => out.push(q),
                _ => return Err(syntax(i, "unsupported escape sequence")),
            }
            i += 2;
        } else {
            // Strings are UTF-8; step over the full codepoint.
            let ch = input[i..].chars().next().unwrap_or('\u{fffd}');
            out.push(ch);
            i += ch.len_utf8();
        }
    }
    Err(syntax(start, "unterminated string literal"))
}

fn lex_number(input: &str, start: usize) -> Result<(Token, usize), ExprError> {
    let bytes = input.as_bytes();
    let mut i = start;
    let mut is_float = false;
    while i < bytes.len() && (bytes[i] as char).is_ascii_digit() {
        i += 1;
    }
    if i < bytes.len()
        && bytes[i] == b'.'
        && bytes.get(i + 1).is_some_and(|b| (*b as char).is_ascii_digit())
    {
        is_float = true;
        i += 1;
        while i < bytes.len() && (bytes[i] as char).is_ascii_digit() {
            i += 1;
        }
    }
    let text = &input[start..i];
    let token = if is_float {
        Token::Float(
            text.parse()
                .map_err(|_| syntax(start, "malformed number"))?,
        )
    } else {
        Token::Int(
            text.parse()
                .map_err(|_| syntax(start, "integer out of range"))?,
        )
    };
    Ok((token, i))
}

fn syntax(position: usize, message: impl Into<String>) -> ExprError {
    ExprError::Syntax {
        position,
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<Token> {
        lex(input).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn lexes_comparison() {
        assert_eq!(
            kinds("risk >= 0.8"),
            vec![Token::Ident("risk".into()), Token::Ge, Token::Float(0.8)]
        );
    }

    #[test]
    fn lexes_keywords_and_literals() {
        assert_eq!(
            kinds("not true and x in [1, 2]"),
            vec![
                Token::Not,
                Token::True,
                Token::And,
                Token::Ident("x".into()),
                Token::In,
                Token::LBracket,
                Token::Int(1),
                Token::Comma,
                Token::Int(2),
                Token::RBracket,
            ]
        );
    }

    #[test]
    fn rejects_power_operator() {
        let err = lex("2 ** 8").unwrap_err();
        assert!(matches!(err, ExprError::Syntax { .. }));
    }

    #[test]
    fn rejects_bitwise_and_dot() {
        assert!(lex("a & b").is_err());
        assert!(lex("a.b").is_err());
        assert!(lex("a = 1").is_err());
    }

    #[test]
    fn string_escapes() {
        assert_eq!(
            kinds(r#""a\nb""#),
            vec![Token::Str("a\nb".into())]
        );
    }
}
