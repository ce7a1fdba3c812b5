use super::parser::{BinaryOp, Expr, UnaryOp};
use super::{ConditionError, ExprValue};
use crate::context::{Captured, ContextMap};
use crate::heap::{display_value, Heap, HeapError, Shape, Value};
use std::cmp::Ordering;

pub(crate) struct Evaluator<'a, H: Heap> {
    pub(crate) context: &'a ContextMap<H::Ref>,
    pub(crate) heap: &'a H,
}

impl<H: Heap> Evaluator<'_, H> {
    pub(crate) fn eval(&self, expr: &Expr) -> Result<ExprValue<H::Ref>, ConditionError> {
        match expr {
            Expr::Null => Ok(ExprValue::Null),
            Expr::Bool(v) => Ok(ExprValue::Bool(*v)),
            Expr::Int(v) => Ok(ExprValue::Int(*v)),
            Expr::Float(v) => Ok(ExprValue::Float(*v)),
            Expr::Str(v) => Ok(ExprValue::Str(v.clone())),
            Expr::Ident(name) => match self.context.lookup(name) {
                Some(captured) => self.captured(captured),
                None => Err(ConditionError::UnknownVariable(name.clone())),
            },
            Expr::Variable(name) => match self.context.lookup(name) {
                Some(captured) => self.captured(captured),
                None => Ok(ExprValue::Null),
            },
            Expr::Scoped(scope, name) => match self.context.get(*scope, name) {
                Some(captured) => self.captured(captured),
                None => Ok(ExprValue::Null),
            },
            Expr::Property(target, name) => match self.eval(target)? {
                ExprValue::Object(obj) => self.value(self.heap.field(&obj, name)?),
                other => Err(ConditionError::type_error(format!(
                    "cannot read property {name:?} of {}",
                    other.type_name()
                ))),
            },
            Expr::Index(target, key) => {
                let target = self.eval(target)?;
                let key = self.eval(key)?;
                self.index(target, key)
            }
            Expr::Call(target, method, args) => {
                let target = self.eval(target)?;
                let args = args.iter().map(|a| self.eval(a)).collect::<Result<Vec<_>, _>>()?;
                self.call(target, method, args)
            }
            Expr::Unary(op, operand) => match (op, self.eval(operand)?) {
                (UnaryOp::Not, ExprValue::Bool(b)) => Ok(ExprValue::Bool(!b)),
                (UnaryOp::Neg, ExprValue::Int(v)) => Ok(ExprValue::Int(v.wrapping_neg())),
                (UnaryOp::Neg, ExprValue::Float(v)) => Ok(ExprValue::Float(-v)),
                (op, other) => Err(ConditionError::type_error(format!("cannot apply {op:?} to {}", other.type_name()))),
            },
            Expr::Binary(BinaryOp::And, lhs, rhs) => {
                if !self.boolean(lhs)? {
                    return Ok(ExprValue::Bool(false));
                }
                Ok(ExprValue::Bool(self.boolean(rhs)?))
            }
            Expr::Binary(BinaryOp::Or, lhs, rhs) => {
                if self.boolean(lhs)? {
                    return Ok(ExprValue::Bool(true));
                }
                Ok(ExprValue::Bool(self.boolean(rhs)?))
            }
            Expr::Binary(op, lhs, rhs) => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                self.binary(*op, lhs, rhs)
            }
        }
    }

    fn boolean(&self, expr: &Expr) -> Result<bool, ConditionError> {
        match self.eval(expr)? {
            ExprValue::Bool(b) => Ok(b),
            other => Err(ConditionError::type_error(format!("expected boolean, got {}", other.type_name()))),
        }
    }

    fn captured(&self, captured: &Captured<H::Ref>) -> Result<ExprValue<H::Ref>, ConditionError> {
        match &captured.value {
            None => Ok(ExprValue::Null),
            Some(obj) => self.value(self.heap.resolve(obj)?),
        }
    }

    fn value(&self, value: Value<H::Ref>) -> Result<ExprValue<H::Ref>, ConditionError> {
        Ok(match value {
            Value::Null => ExprValue::Null,
            Value::Boolean(v) => ExprValue::Bool(v),
            Value::Byte(v) => ExprValue::Int(v.into()),
            Value::Short(v) => ExprValue::Int(v.into()),
            Value::Int(v) => ExprValue::Int(v.into()),
            Value::Long(v) => ExprValue::Int(v),
            Value::Char(v) => ExprValue::Str(v.to_string()),
            Value::Float(v) => ExprValue::Float(v.into()),
            Value::Double(v) => ExprValue::Float(v),
            Value::String(v) => ExprValue::Str(v),
            Value::Object(obj) => match self.heap.resolve(&obj)? {
                Value::Object(obj) => ExprValue::Object(obj),
                scalar => return self.value(scalar),
            },
        })
    }

    fn index(&self, target: ExprValue<H::Ref>, key: ExprValue<H::Ref>) -> Result<ExprValue<H::Ref>, ConditionError> {
        match (target, key) {
            (ExprValue::Str(s), ExprValue::Int(i)) => usize::try_from(i)
                .ok()
                .and_then(|i| s.chars().nth(i))
                .map(|c| ExprValue::Str(c.to_string()))
                .ok_or_else(|| ConditionError::type_error(format!("index {i} out of bounds"))),
            (ExprValue::Object(obj), key) => match self.heap.shape(&obj)? {
                Shape::Array { length: len } | Shape::Collection { size: len } => {
                    let ExprValue::Int(i) = key else {
                        return Err(ConditionError::type_error("index must be an integer"));
                    };
                    let i = usize::try_from(i)
                        .ok()
                        .filter(|i| *i < len)
                        .ok_or_else(|| ConditionError::type_error(format!("index {i} out of bounds")))?;
                    match self.heap.elements(&obj, i + 1)?.into_iter().nth(i) {
                        Some(element) => self.value(element),
                        None => Ok(ExprValue::Null),
                    }
                }
                Shape::Map { size } => {
                    let key = display(self.heap, &key)?;
                    match self.heap.entries(&obj, size)?.into_iter().find(|(k, _)| *k == key) {
                        Some((_, value)) => self.value(value),
                        None => Ok(ExprValue::Null),
                    }
                }
                Shape::Plain => match key {
                    ExprValue::Str(name) => self.value(self.heap.field(&obj, &name)?),
                    _ => Err(ConditionError::Heap(HeapError::NotIndexable(self.heap.class_name(&obj)?))),
                },
            },
            (target, _) => Err(ConditionError::type_error(format!("cannot index {}", target.type_name()))),
        }
    }

    fn call(
        &self,
        target: ExprValue<H::Ref>,
        method: &str,
        args: Vec<ExprValue<H::Ref>>,
    ) -> Result<ExprValue<H::Ref>, ConditionError> {
        match (method, args.as_slice()) {
            ("toString", []) => return Ok(ExprValue::Str(display(self.heap, &target)?)),
            ("equals", [other]) => return Ok(ExprValue::Bool(self.equals(&target, other))),
            _ => {}
        }
        match (target, method, args.as_slice()) {
            (ExprValue::Str(s), "length" | "size", []) => Ok(ExprValue::Int(s.chars().count() as i64)),
            (ExprValue::Str(s), "isEmpty", []) => Ok(ExprValue::Bool(s.is_empty())),
            (ExprValue::Str(s), "contains", [ExprValue::Str(p)]) => Ok(ExprValue::Bool(s.contains(p.as_str()))),
            (ExprValue::Str(s), "startsWith", [ExprValue::Str(p)]) => Ok(ExprValue::Bool(s.starts_with(p.as_str()))),
            (ExprValue::Str(s), "endsWith", [ExprValue::Str(p)]) => Ok(ExprValue::Bool(s.ends_with(p.as_str()))),
            (ExprValue::Str(s), "toUpperCase", []) => Ok(ExprValue::Str(s.to_uppercase())),
            (ExprValue::Str(s), "toLowerCase", []) => Ok(ExprValue::Str(s.to_lowercase())),
            (ExprValue::Object(obj), "size" | "length" | "isEmpty", []) => {
                let len = match self.heap.shape(&obj)? {
                    Shape::Array { length } => length,
                    Shape::Collection { size } | Shape::Map { size } => size,
                    Shape::Plain => {
                        return Err(ConditionError::type_error(format!(
                            "{}.{method}() is not supported",
                            self.heap.class_name(&obj)?
                        )))
                    }
                };
                if method == "isEmpty" {
                    Ok(ExprValue::Bool(len == 0))
                } else {
                    Ok(ExprValue::Int(len as i64))
                }
            }
            (target, method, args) => Err(ConditionError::type_error(format!(
                "no method {method}/{} on {}",
                args.len(),
                target.type_name()
            ))),
        }
    }

    fn binary(
        &self,
        op: BinaryOp,
        lhs: ExprValue<H::Ref>,
        rhs: ExprValue<H::Ref>,
    ) -> Result<ExprValue<H::Ref>, ConditionError> {
        use ExprValue::{Float, Int, Str};
        match op {
            BinaryOp::Eq => return Ok(ExprValue::Bool(self.equals(&lhs, &rhs))),
            BinaryOp::Ne => return Ok(ExprValue::Bool(!self.equals(&lhs, &rhs))),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let ordering = compare(&lhs, &rhs).ok_or_else(|| {
                    ConditionError::type_error(format!("cannot compare {} with {}", lhs.type_name(), rhs.type_name()))
                })?;
                return Ok(ExprValue::Bool(match op {
                    BinaryOp::Lt => ordering == Ordering::Less,
                    BinaryOp::Le => ordering != Ordering::Greater,
                    BinaryOp::Gt => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                }));
            }
            _ => {}
        }

        if op == BinaryOp::Add && (matches!(lhs, Str(_)) || matches!(rhs, Str(_))) {
            return Ok(Str(display(self.heap, &lhs)? + &display(self.heap, &rhs)?));
        }

        match (lhs, rhs) {
            (Int(a), Int(b)) => match op {
                BinaryOp::Add => Ok(Int(a.wrapping_add(b))),
                BinaryOp::Sub => Ok(Int(a.wrapping_sub(b))),
                BinaryOp::Mul => Ok(Int(a.wrapping_mul(b))),
                BinaryOp::Div if b == 0 => Err(ConditionError::DivideByZero),
                BinaryOp::Div => Ok(Int(a.wrapping_div(b))),
                BinaryOp::Rem if b == 0 => Err(ConditionError::DivideByZero),
                _ => Ok(Int(a.wrapping_rem(b))),
            },
            (lhs, rhs) => {
                let (Some(a), Some(b)) = (lhs.as_f64(), rhs.as_f64()) else {
                    return Err(ConditionError::type_error(format!(
                        "cannot apply {op:?} to {} and {}",
                        lhs.type_name(),
                        rhs.type_name()
                    )));
                };
                Ok(Float(match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div => a / b,
                    _ => a % b,
                }))
            }
        }
    }

    fn equals(&self, lhs: &ExprValue<H::Ref>, rhs: &ExprValue<H::Ref>) -> bool {
        match (lhs, rhs) {
            (ExprValue::Object(a), ExprValue::Object(b)) => self.heap.same_object(a, b),
            (ExprValue::Null, ExprValue::Null) => true,
            (ExprValue::Bool(a), ExprValue::Bool(b)) => a == b,
            (ExprValue::Str(a), ExprValue::Str(b)) => a == b,
            _ => compare(lhs, rhs) == Some(Ordering::Equal),
        }
    }
}

fn compare<R>(lhs: &ExprValue<R>, rhs: &ExprValue<R>) -> Option<Ordering> {
    match (lhs, rhs) {
        (ExprValue::Int(a), ExprValue::Int(b)) => Some(a.cmp(b)),
        (ExprValue::Str(a), ExprValue::Str(b)) => Some(a.cmp(b)),
        _ => lhs.as_f64()?.partial_cmp(&rhs.as_f64()?),
    }
}

pub(crate) fn display<H: Heap>(heap: &H, value: &ExprValue<H::Ref>) -> Result<String, ConditionError> {
    let value = match value {
        ExprValue::Null => Value::Null,
        ExprValue::Bool(v) => Value::Boolean(*v),
        ExprValue::Int(v) => Value::Long(*v),
        ExprValue::Float(v) => Value::Double(*v),
        ExprValue::Str(v) => Value::String(v.clone()),
        ExprValue::Object(obj) => Value::Object(obj.clone()),
    };
    Ok(display_value(heap, &value)?)
}
