//! Tree-walking interpreter for parsed contract expressions

use super::ast::{BinaryOp, Expr, UnaryOp};
use crate::bindings::BindingContext;
use crate::value::Value;
use crate::{Error, Result};

/// Evaluates one expression tree against one binding context
pub(crate) struct Interpreter<'a> {
    source: &'a str,
    bindings: &'a BindingContext,
    /// Only booleans are accepted where a condition is expected
    strict: bool,
}

impl<'a> Interpreter<'a> {
    pub(crate) fn new(source: &'a str, bindings: &'a BindingContext, strict: bool) -> Self {
        Interpreter {
            source,
            bindings,
            strict,
        }
    }

    fn fail(&self, reason: impl Into<String>) -> Error {
        Error::malformed(self.source, reason)
    }

    /// Convert a value to a verdict
    pub(crate) fn truth(&self, value: &Value) -> Result<bool> {
        match value {
            Value::Boolean(b) => Ok(*b),
            other if !self.strict => Ok(other.is_truthy()),
            other => Err(self.fail(format!(
                "expected Boolean condition, found {}",
                other.type_name()
            ))),
        }
    }

    pub(crate) fn eval(&self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Null => Ok(Value::Null),
            Expr::Boolean(b) => Ok(Value::Boolean(*b)),
            Expr::Integer(i) => Ok(Value::Integer(*i)),
            Expr::Float(f) => Ok(Value::Float(*f)),
            Expr::String(s) => Ok(Value::String(s.clone())),
            Expr::Array(items) => Ok(Value::Array(
                items
                    .iter()
                    .map(|e| self.eval(e))
                    .collect::<Result<Vec<_>>>()?,
            )),
            Expr::Variable(name) => self
                .bindings
                .get(name)
                .cloned()
                .ok_or_else(|| self.fail(format!("unbound variable '{}'", name))),
            Expr::Member(target, field) => {
                let target = self.eval(target)?;
                match &target {
                    Value::Object(map) => map.get(field).cloned().ok_or_else(|| {
                        self.fail(format!("object has no field '{}'", field))
                    }),
                    other => Err(self.fail(format!(
                        "cannot read field '{}' of {}",
                        field,
                        other.type_name()
                    ))),
                }
            }
            Expr::Index(target, index) => {
                let target = self.eval(target)?;
                let index = self.eval(index)?;
                self.index(&target, &index)
            }
            Expr::Call(name, args) => {
                let args = args
                    .iter()
                    .map(|e| self.eval(e))
                    .collect::<Result<Vec<_>>>()?;
                self.call(name, &args)
            }
            Expr::MethodCall(target, name, args) => {
                let target = self.eval(target)?;
                let args = args
                    .iter()
                    .map(|e| self.eval(e))
                    .collect::<Result<Vec<_>>>()?;
                self.method(&target, name, &args)
            }
            Expr::Unary(UnaryOp::Not, operand) => {
                let value = self.eval(operand)?;
                Ok(Value::Boolean(!self.truth(&value)?))
            }
            Expr::Unary(UnaryOp::Negate, operand) => match self.eval(operand)? {
                Value::Integer(i) => i
                    .checked_neg()
                    .map(Value::Integer)
                    .ok_or_else(|| self.fail("integer overflow")),
                Value::Float(f) => Ok(Value::Float(-f)),
                other => Err(self.fail(format!("cannot negate {}", other.type_name()))),
            },
            Expr::Binary(BinaryOp::And, left, right) => {
                let left = self.eval(left)?;
                if !self.truth(&left)? {
                    return Ok(Value::Boolean(false));
                }
                let right = self.eval(right)?;
                Ok(Value::Boolean(self.truth(&right)?))
            }
            Expr::Binary(BinaryOp::Or, left, right) => {
                let left = self.eval(left)?;
                if self.truth(&left)? {
                    return Ok(Value::Boolean(true));
                }
                let right = self.eval(right)?;
                Ok(Value::Boolean(self.truth(&right)?))
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                self.binary(*op, &left, &right)
            }
            Expr::Conditional(condition, then, otherwise) => {
                let condition = self.eval(condition)?;
                if self.truth(&condition)? {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
        }
    }

    fn binary(&self, op: BinaryOp, left: &Value, right: &Value) -> Result<Value> {
        match op {
            BinaryOp::Eq => Ok(Value::Boolean(left.loosely_equals(right))),
            BinaryOp::NotEq => Ok(Value::Boolean(!left.loosely_equals(right))),
            BinaryOp::Less | BinaryOp::LessEq | BinaryOp::Greater | BinaryOp::GreaterEq => {
                let ordering = self.compare(op, left, right)?;
                Ok(Value::Boolean(match op {
                    BinaryOp::Less => ordering.is_lt(),
                    BinaryOp::LessEq => ordering.is_le(),
                    BinaryOp::Greater => ordering.is_gt(),
                    _ => ordering.is_ge(),
                }))
            }
            BinaryOp::Add => match (left, right) {
                (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{}{}", a, b))),
                _ => self.arithmetic(op, left, right),
            },
            _ => self.arithmetic(op, left, right),
        }
    }

    fn compare(
        &self,
        op: BinaryOp,
        left: &Value,
        right: &Value,
    ) -> Result<std::cmp::Ordering> {
        match (left, right) {
            (Value::Integer(a), Value::Integer(b)) => Ok(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x
                    .partial_cmp(&y)
                    .ok_or_else(|| self.fail("comparison with NaN")),
                _ => Err(self.fail(format!(
                    "cannot compare {} {} {}",
                    a.type_name(),
                    op,
                    b.type_name()
                ))),
            },
        }
    }

    fn arithmetic(&self, op: BinaryOp, left: &Value, right: &Value) -> Result<Value> {
        if let (Value::Integer(a), Value::Integer(b)) = (left, right) {
            let (a, b) = (*a, *b);
            if matches!(op, BinaryOp::Div | BinaryOp::Rem) && b == 0 {
                return Err(self.fail("division by zero"));
            }
            let result = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div => a.checked_div(b),
                _ => a.checked_rem(b),
            };
            return result
                .map(Value::Integer)
                .ok_or_else(|| self.fail("integer overflow"));
        }
        match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => Ok(Value::Float(match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                _ => a % b,
            })),
            _ => Err(self.fail(format!(
                "cannot apply '{}' to {} and {}",
                op,
                left.type_name(),
                right.type_name()
            ))),
        }
    }

    fn index(&self, target: &Value, index: &Value) -> Result<Value> {
        match (target, index) {
            (Value::Array(items), Value::Integer(i)) => usize::try_from(*i)
                .ok()
                .and_then(|i| items.get(i))
                .cloned()
                .ok_or_else(|| self.fail(format!("index {} out of bounds", i))),
            (Value::Object(map), Value::String(key)) => map
                .get(key)
                .cloned()
                .ok_or_else(|| self.fail(format!("object has no field '{}'", key))),
            (t, i) => Err(self.fail(format!(
                "cannot index {} with {}",
                t.type_name(),
                i.type_name()
            ))),
        }
    }

    fn arity(&self, name: &str, args: &[Value], expected: usize) -> Result<()> {
        if args.len() == expected {
            Ok(())
        } else {
            Err(self.fail(format!(
                "'{}' takes {} argument(s), got {}",
                name,
                expected,
                args.len()
            )))
        }
    }

    fn length(&self, value: &Value) -> Result<Value> {
        let n = match value {
            Value::String(s) => s.chars().count(),
            Value::Array(a) => a.len(),
            Value::Object(m) => m.len(),
            other => {
                return Err(self.fail(format!("{} has no length", other.type_name())));
            }
        };
        Ok(Value::Integer(n as i64))
    }

    fn absolute(&self, value: &Value) -> Result<Value> {
        match value {
            Value::Integer(i) => i
                .checked_abs()
                .map(Value::Integer)
                .ok_or_else(|| self.fail("integer overflow")),
            Value::Float(f) => Ok(Value::Float(f.abs())),
            other => Err(self.fail(format!("abs of {}", other.type_name()))),
        }
    }

    fn call(&self, name: &str, args: &[Value]) -> Result<Value> {
        match name {
            "len" => {
                self.arity(name, args, 1)?;
                self.length(&args[0])
            }
            "abs" => {
                self.arity(name, args, 1)?;
                self.absolute(&args[0])
            }
            "min" | "max" => {
                let (first, rest) = args
                    .split_first()
                    .ok_or_else(|| self.fail(format!("'{}' needs at least one argument", name)))?;
                let mut best = first.clone();
                for candidate in rest {
                    let ordering = self.compare(BinaryOp::Less, candidate, &best)?;
                    let better = if name == "min" {
                        ordering.is_lt()
                    } else {
                        ordering.is_gt()
                    };
                    if better {
                        best = candidate.clone();
                    }
                }
                Ok(best)
            }
            other => Err(self.fail(format!("unknown function '{}'", other))),
        }
    }

    fn method(&self, target: &Value, name: &str, args: &[Value]) -> Result<Value> {
        match name {
            "len" => {
                self.arity(name, args, 0)?;
                self.length(target)
            }
            "is_empty" => {
                self.arity(name, args, 0)?;
                let n = self.length(target)?;
                Ok(Value::Boolean(n == Value::Integer(0)))
            }
            "abs" => {
                self.arity(name, args, 0)?;
                self.absolute(target)
            }
            "equals" => {
                self.arity(name, args, 1)?;
                Ok(Value::Boolean(target.loosely_equals(&args[0])))
            }
            "contains" => {
                self.arity(name, args, 1)?;
                match (target, &args[0]) {
                    (Value::String(s), Value::String(needle)) => {
                        Ok(Value::Boolean(s.contains(needle.as_str())))
                    }
                    (Value::Array(items), needle) => {
                        Ok(Value::Boolean(items.iter().any(|v| v.loosely_equals(needle))))
                    }
                    (Value::Object(map), Value::String(key)) => {
                        Ok(Value::Boolean(map.contains_key(key)))
                    }
                    (t, n) => Err(self.fail(format!(
                        "{} cannot contain {}",
                        t.type_name(),
                        n.type_name()
                    ))),
                }
            }
            other => Err(self.fail(format!(
                "unknown method '{}' on {}",
                other,
                target.type_name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::parser::parse;
    use crate::keywords::Keywords;

    fn ctx() -> BindingContext {
        let mut ctx = BindingContext::new(&Keywords::default());
        ctx.bind("amount", Value::Float(25.0));
        ctx.bind("count", Value::Integer(3));
        ctx.bind("name", Value::from("Finn"));
        ctx.bind(
            "$this",
            Value::from_json(&serde_json::json!({"balance": 100.0, "owner": "Finn", "tags": ["a", "b"]})),
        );
        ctx
    }

    fn run(text: &str) -> Result<Value> {
        let ctx = ctx();
        let expr = parse(text)?;
        Interpreter::new(text, &ctx, false).eval(&expr)
    }

    fn run_strict(text: &str) -> Result<Value> {
        let ctx = ctx();
        let expr = parse(text)?;
        Interpreter::new(text, &ctx, true).eval(&expr)
    }

    #[test]
    fn test_numeric_comparison_mixes_int_and_float() {
        assert_eq!(run("amount > 0").unwrap(), Value::Boolean(true));
        assert_eq!(run("count <= 2.5").unwrap(), Value::Boolean(false));
        assert_eq!(run("amount == 25").unwrap(), Value::Boolean(true));
    }

    #[test]
    fn test_member_access_and_arithmetic() {
        assert_eq!(
            run("$this.balance - amount").unwrap(),
            Value::Float(75.0)
        );
        assert_eq!(run("count * 2 + 1").unwrap(), Value::Integer(7));
        assert_eq!(run("7 % 4").unwrap(), Value::Integer(3));
    }

    #[test]
    fn test_methods_and_builtins() {
        assert_eq!(run("$this.owner.equals(name)").unwrap(), Value::Boolean(true));
        assert_eq!(run("$this.tags.contains('b')").unwrap(), Value::Boolean(true));
        assert_eq!(run("len($this.tags)").unwrap(), Value::Integer(2));
        assert_eq!(run("name.len()").unwrap(), Value::Integer(4));
        assert_eq!(run("max(1, count, 2)").unwrap(), Value::Integer(3));
        assert_eq!(run("min(amount, 3)").unwrap(), Value::Integer(3));
        assert_eq!(run("abs(-4)").unwrap(), Value::Integer(4));
        assert_eq!(run("''.is_empty()").unwrap(), Value::Boolean(true));
    }

    #[test]
    fn test_short_circuit_skips_unbound_right_side() {
        assert_eq!(run("false && missing").unwrap(), Value::Boolean(false));
        assert_eq!(run("true || missing").unwrap(), Value::Boolean(true));
    }

    #[test]
    fn test_unbound_variable_is_malformed() {
        let err = run("missing > 0").unwrap_err();
        assert!(matches!(err, Error::MalformedExpression { .. }));
        assert!(err.to_string().contains("unbound variable 'missing'"));
    }

    #[test]
    fn test_if_expression_picks_branch() {
        assert_eq!(
            run("if (count > 5) { 1 } else if (count > 2) { 2 } else { 3 }").unwrap(),
            Value::Integer(2)
        );
    }

    #[test]
    fn test_division_by_zero() {
        assert!(run("count / 0").is_err());
        assert_eq!(run("amount / 0 > 0").unwrap(), Value::Boolean(true));
    }

    #[test]
    fn test_strict_rejects_non_boolean_conditions() {
        assert_eq!(run("count && true").unwrap(), Value::Boolean(true));
        assert!(run_strict("count && true").is_err());
        assert!(run_strict("!name").is_err());
        assert_eq!(run_strict("count > 1 && true").unwrap(), Value::Boolean(true));
    }

    #[test]
    fn test_type_errors() {
        assert!(run("name < 3").is_err());
        assert!(run("count.balance").is_err());
        assert!(run("$this.tags[5]").is_err());
        assert_eq!(run("$this.tags[1]").unwrap(), Value::from("b"));
    }
}
