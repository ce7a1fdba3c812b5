use super::ConditionError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Hash,
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Op(&'static str),
}

/// Token with its byte offset in the source.
pub(crate) type Spanned = (usize, Token);

const OPERATORS: &[&str] = &["==", "!=", "<=", ">=", "&&", "||", "<", ">", "!", "+", "-", "*", "/", "%"];

pub(crate) fn tokenize(src: &str) -> Result<Vec<Spanned>, ConditionError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        let start = i;
        let token = match c {
            b'#' => {
                i += 1;
                Token::Hash
            }
            b'.' if !bytes.get(i + 1).is_some_and(u8::is_ascii_digit) => {
                i += 1;
                Token::Dot
            }
            b',' => {
                i += 1;
                Token::Comma
            }
            b'(' => {
                i += 1;
                Token::LParen
            }
            b')' => {
                i += 1;
                Token::RParen
            }
            b'[' => {
                i += 1;
                Token::LBracket
            }
            b']' => {
                i += 1;
                Token::RBracket
            }
            b'\'' | b'"' => {
                let (text, next) = string_literal(src, i)?;
                i = next;
                Token::Str(text)
            }
            b'0'..=b'9' | b'.' => {
                let (token, next) = number(src, i)?;
                i = next;
                token
            }
            c if c.is_ascii_alphabetic() || c == b'_' || c == b'$' => {
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'$') {
                    i += 1;
                }
                Token::Ident(src[start..i].to_string())
            }
            _ => {
                let op = OPERATORS
                    .iter()
                    .find(|op| src[i..].starts_with(**op))
                    .ok_or_else(|| ConditionError::parse(i, format!("unexpected character {:?}", c as char)))?;
                i += op.len();
                Token::Op(op)
            }
        };
        tokens.push((start, token));
    }
    Ok(tokens)
}

/// Quoted literal; the quote character is escaped by doubling it.
fn string_literal(src: &str, start: usize) -> Result<(String, usize), ConditionError> {
    let bytes = src.as_bytes();
    let quote = bytes[start];
    let mut out = String::new();
    let mut i = start + 1;
    loop {
        let Some(rel) = src[i..].find(quote as char) else {
            return Err(ConditionError::parse(start, "unterminated string literal"));
        };
        out.push_str(&src[i..i + rel]);
        i += rel + 1;
        if bytes.get(i) == Some(&quote) {
            out.push(quote as char);
            i += 1;
        } else {
            return Ok((out, i));
        }
    }
}

fn number(src: &str, start: usize) -> Result<(Token, usize), ConditionError> {
    let bytes = src.as_bytes();
    let mut i = start;
    let mut is_float = false;
    while i < bytes.len() {
        match bytes[i] {
            b'0'..=b'9' => i += 1,
            b'.' if !is_float && bytes.get(i + 1).is_some_and(u8::is_ascii_digit) => {
                is_float = true;
                i += 1;
            }
            b'e' | b'E' if bytes.get(i + 1).is_some_and(|b| b.is_ascii_digit() || *b == b'-' || *b == b'+') => {
                is_float = true;
                i += 2;
            }
            _ => break,
        }
    }
    let text = &src[start..i];
    let bad = || ConditionError::parse(start, format!("invalid number {text:?}"));
    match bytes.get(i) {
        Some(b'L' | b'l') if !is_float => Ok((Token::Int(text.parse().map_err(|_| bad())?), i + 1)),
        Some(b'f' | b'F' | b'd' | b'D') => Ok((Token::Float(text.parse().map_err(|_| bad())?), i + 1)),
        _ if is_float => Ok((Token::Float(text.parse().map_err(|_| bad())?), i)),
        _ => Ok((Token::Int(text.parse().map_err(|_| bad())?), i)),
    }
}
