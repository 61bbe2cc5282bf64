use crate::ast::{BinOp, Expr, Var};
use crate::parser::parse_expr_text;

// ---------------------------------------------------------------------------
// Bindings
// ---------------------------------------------------------------------------

/// Per-point variable bindings. Unset variables are *missing*, not zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bindings {
    values: [Option<f64>; 5],
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, var: Var, value: f64) -> &mut Self {
        self.values[var.index()] = Some(value);
        self
    }

    pub fn get(&self, var: Var) -> Option<f64> {
        self.values[var.index()]
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    /// The expression references a variable with no bound value.
    #[error("unbound variable {0}")]
    UnboundVar(Var),
    /// Anything producing a non-finite result: division by zero, negative
    /// base to a fractional power, log of a non-positive number.
    #[error("domain error in {context}")]
    Domain { context: &'static str },
}

// ---------------------------------------------------------------------------
// Program
// ---------------------------------------------------------------------------

/// A compiled expression: parsed once, evaluated per point.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    root: Expr,
}

impl Program {
    pub fn compile(source: &str) -> anyhow::Result<Program> {
        Ok(Program {
            root: parse_expr_text(source)?,
        })
    }

    pub fn from_expr(root: Expr) -> Program {
        Program { root }
    }

    /// Variables the program references, in first-use order.
    pub fn vars(&self) -> Vec<Var> {
        self.root.vars()
    }

    pub fn eval(&self, bindings: &Bindings) -> Result<f64, EvalError> {
        eval_node(&self.root, bindings)
    }
}

fn eval_node(expr: &Expr, bindings: &Bindings) -> Result<f64, EvalError> {
    match expr {
        Expr::Number(n) => Ok(*n),
        Expr::Var(v) => bindings.get(*v).ok_or(EvalError::UnboundVar(*v)),
        Expr::Neg(inner) => Ok(-eval_node(inner, bindings)?),
        Expr::BinOp { op, left, right } => {
            let l = eval_node(left, bindings)?;
            let r = eval_node(right, bindings)?;
            let out = match op {
                BinOp::Add => l + r,
                BinOp::Sub => l - r,
                BinOp::Mul => l * r,
                BinOp::Div => {
                    if r == 0.0 {
                        return Err(EvalError::Domain {
                            context: "division by zero",
                        });
                    }
                    l / r
                }
                BinOp::Rem => {
                    if r == 0.0 {
                        return Err(EvalError::Domain {
                            context: "remainder by zero",
                        });
                    }
                    l % r
                }
                BinOp::Pow => l.powf(r),
            };
            finite(out, "arithmetic")
        }
        Expr::Call { func, args } => {
            let vals = args
                .iter()
                .map(|a| eval_node(a, bindings))
                .collect::<Result<Vec<_>, _>>()?;
            finite(func.apply(&vals), func.name())
        }
    }
}

fn finite(value: f64, context: &'static str) -> Result<f64, EvalError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(EvalError::Domain { context })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn bind(pairs: &[(Var, f64)]) -> Bindings {
        let mut b = Bindings::new();
        for (v, x) in pairs {
            b.set(*v, *x);
        }
        b
    }

    #[test]
    fn eval_sum_times_multiplier_shape() {
        let p = Program::compile("c1 + c2").unwrap();
        let b = bind(&[(Var::C1, 3.0), (Var::C2, 4.0)]);
        assert_eq!(p.eval(&b).unwrap(), 7.0);
    }

    #[test]
    fn eval_unbound_variable() {
        let p = Program::compile("c1 + c3").unwrap();
        let b = bind(&[(Var::C1, 3.0)]);
        assert_eq!(p.eval(&b), Err(EvalError::UnboundVar(Var::C3)));
    }

    #[test]
    fn eval_division_by_zero_is_domain_error() {
        let p = Program::compile("c1 / c2").unwrap();
        let b = bind(&[(Var::C1, 1.0), (Var::C2, 0.0)]);
        assert!(matches!(p.eval(&b), Err(EvalError::Domain { .. })));
    }

    #[test]
    fn eval_negative_fractional_power_is_domain_error() {
        // (-2) ** 2.5 is NaN in IEEE powf and must surface as a domain error
        let p = Program::compile("c1 ** 2.5").unwrap();
        let b = bind(&[(Var::C1, -2.0)]);
        assert!(matches!(p.eval(&b), Err(EvalError::Domain { .. })));
    }

    #[test]
    fn eval_sqrt_of_negative_is_domain_error() {
        let p = Program::compile("math.sqrt(c1)").unwrap();
        let b = bind(&[(Var::C1, -1.0)]);
        assert!(matches!(p.eval(&b), Err(EvalError::Domain { .. })));
    }

    #[test]
    fn eval_functions_and_constants() {
        let p = Program::compile("math.cos(2 * math.pi)").unwrap();
        let v = p.eval(&Bindings::new()).unwrap();
        assert!((v - 1.0).abs() < 1e-12);

        let p = Program::compile("degrees(radians(90))").unwrap();
        let v = p.eval(&Bindings::new()).unwrap();
        assert!((v - 90.0).abs() < 1e-9);
    }

    #[test]
    fn eval_vweir_shape() {
        // flow = 1381 * (h/1000)^2.5 * tan(radians(angle)/2)
        let p = Program::compile("1381 * (c1 / 1000) ** 2.5 * tan(radians(90) / 2)").unwrap();
        let b = bind(&[(Var::C1, 250.0)]);
        let expected = 1381.0 * 0.25f64.powf(2.5) * (90f64.to_radians() / 2.0).tan();
        assert!((p.eval(&b).unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn eval_negation_and_remainder() {
        let p = Program::compile("-c1 % 3").unwrap();
        let b = bind(&[(Var::C1, 7.0)]);
        // unary minus binds tighter than %: (-7) % 3 = -1 (Rust semantics)
        assert_eq!(p.eval(&b).unwrap(), -1.0);
    }
}
