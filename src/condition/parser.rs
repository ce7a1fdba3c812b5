use super::lexer::{Spanned, Token};
use super::ConditionError;
use crate::context::Scope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Bare name: local, then instance field, then static field.
    Ident(String),
    /// `#name`
    Variable(String),
    /// `localVariables[name]` and friends.
    Scoped(Scope, String),
    Index(Box<Expr>, Box<Expr>),
    Property(Box<Expr>, String),
    Call(Box<Expr>, String, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

pub(crate) struct Parser<'t> {
    tokens: &'t [Spanned],
    pos: usize,
    end: usize,
}

impl<'t> Parser<'t> {
    pub(crate) fn new(tokens: &'t [Spanned], end: usize) -> Self {
        Parser { tokens, pos: 0, end }
    }

    pub(crate) fn parse(mut self) -> Result<Expr, ConditionError> {
        if self.tokens.is_empty() {
            return Err(ConditionError::parse(0, "empty expression"));
        }
        let expr = self.or()?;
        match self.tokens.get(self.pos) {
            None => Ok(expr),
            Some((at, token)) => Err(ConditionError::parse(*at, format!("unexpected {token:?}"))),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|(at, _)| *at).unwrap_or(self.end)
    }

    fn advance(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t);
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), ConditionError> {
        let at = self.offset();
        match self.advance() {
            Some(t) if *t == expected => Ok(()),
            Some(t) => Err(ConditionError::parse(at, format!("expected {expected:?}, found {t:?}"))),
            None => Err(ConditionError::parse(at, format!("expected {expected:?}"))),
        }
    }

    /// Matches a symbolic operator or its word form, e.g. `&&` / `and`.
    fn eat_op(&mut self, symbol: &str, word: &str) -> bool {
        let hit = match self.peek() {
            Some(Token::Op(op)) => *op == symbol,
            Some(Token::Ident(id)) => !word.is_empty() && id.eq_ignore_ascii_case(word),
            _ => false,
        };
        if hit {
            self.pos += 1;
        }
        hit
    }

    fn or(&mut self) -> Result<Expr, ConditionError> {
        let mut lhs = self.and()?;
        while self.eat_op("||", "or") {
            let rhs = self.and()?;
            lhs = Expr::Binary(BinaryOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, ConditionError> {
        let mut lhs = self.relational()?;
        while self.eat_op("&&", "and") {
            let rhs = self.relational()?;
            lhs = Expr::Binary(BinaryOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn relational(&mut self) -> Result<Expr, ConditionError> {
        let lhs = self.additive()?;
        const RELATIONAL: [(&str, &str, BinaryOp); 6] = [
            ("==", "eq", BinaryOp::Eq),
            ("!=", "ne", BinaryOp::Ne),
            ("<=", "le", BinaryOp::Le),
            (">=", "ge", BinaryOp::Ge),
            ("<", "lt", BinaryOp::Lt),
            (">", "gt", BinaryOp::Gt),
        ];
        for (symbol, word, op) in RELATIONAL {
            if self.eat_op(symbol, word) {
                let rhs = self.additive()?;
                return Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)));
            }
        }
        Ok(lhs)
    }

    fn additive(&mut self) -> Result<Expr, ConditionError> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = if self.eat_op("+", "") {
                BinaryOp::Add
            } else if self.eat_op("-", "") {
                BinaryOp::Sub
            } else {
                return Ok(lhs);
            };
            let rhs = self.multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, ConditionError> {
        let mut lhs = self.unary()?;
        loop {
            let op = if self.eat_op("*", "") {
                BinaryOp::Mul
            } else if self.eat_op("/", "div") {
                BinaryOp::Div
            } else if self.eat_op("%", "mod") {
                BinaryOp::Rem
            } else {
                return Ok(lhs);
            };
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn unary(&mut self) -> Result<Expr, ConditionError> {
        if self.eat_op("!", "not") {
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(self.unary()?)));
        }
        if self.eat_op("-", "") {
            return Ok(match self.unary()? {
                Expr::Int(v) => Expr::Int(-v),
                Expr::Float(v) => Expr::Float(-v),
                other => Expr::Unary(UnaryOp::Neg, Box::new(other)),
            });
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, ConditionError> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    let name = self.ident()?;
                    if self.peek() == Some(&Token::LParen) {
                        let args = self.arguments()?;
                        expr = Expr::Call(Box::new(expr), name, args);
                    } else {
                        expr = Expr::Property(Box::new(expr), name);
                    }
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let key = self.or()?;
                    self.expect(Token::RBracket)?;
                    expr = Expr::Index(Box::new(expr), Box::new(key));
                }
                _ => return Ok(expr),
            }
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, ConditionError> {
        self.expect(Token::LParen)?;
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.or()?);
            let at = self.offset();
            match self.advance() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(args),
                _ => return Err(ConditionError::parse(at, "expected ',' or ')'")),
            }
        }
    }

    fn ident(&mut self) -> Result<String, ConditionError> {
        let at = self.offset();
        match self.advance() {
            Some(Token::Ident(name)) => Ok(name.clone()),
            _ => Err(ConditionError::parse(at, "expected identifier")),
        }
    }

    fn primary(&mut self) -> Result<Expr, ConditionError> {
        let at = self.offset();
        let Some(token) = self.advance().cloned() else {
            return Err(ConditionError::parse(at, "unexpected end of expression"));
        };
        match token {
            Token::Int(v) => Ok(Expr::Int(v)),
            Token::Float(v) => Ok(Expr::Float(v)),
            Token::Str(s) => Ok(Expr::Str(s)),
            Token::Hash => Ok(Expr::Variable(self.ident()?)),
            Token::LParen => {
                let inner = self.or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::Ident(name) => {
                if let Some(scope) = scope_named(&name) {
                    if self.peek() == Some(&Token::LBracket) {
                        return self.scoped(scope);
                    }
                }
                Ok(match name.as_str() {
                    "true" | "TRUE" => Expr::Bool(true),
                    "false" | "FALSE" => Expr::Bool(false),
                    "null" | "NULL" => Expr::Null,
                    _ => Expr::Ident(name),
                })
            }
            other => Err(ConditionError::parse(at, format!("unexpected {other:?}"))),
        }
    }

    /// `scope[name]` or `scope['name']`.
    fn scoped(&mut self, scope: Scope) -> Result<Expr, ConditionError> {
        self.expect(Token::LBracket)?;
        let at = self.offset();
        let name = match self.advance() {
            Some(Token::Ident(name)) | Some(Token::Str(name)) => name.clone(),
            _ => return Err(ConditionError::parse(at, "expected variable name")),
        };
        self.expect(Token::RBracket)?;
        Ok(Expr::Scoped(scope, name))
    }
}

fn scope_named(name: &str) -> Option<Scope> {
    match name {
        "localVariables" => Some(Scope::LocalVariable),
        "fields" => Some(Scope::InstanceField),
        "staticFields" => Some(Scope::StaticField),
        _ => None,
    }
}
