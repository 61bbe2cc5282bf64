use winnow::combinator::{alt, cut_err, opt, separated};
use winnow::error::{ContextError, ErrMode, StrContext, StrContextValue};
use winnow::prelude::*;
use winnow::token::{literal, take_while};

use crate::ast::{BinOp, Expr, Var};
use crate::funcs::{Func, const_value};

/// Parse one complete expression; trailing garbage is an error.
pub fn parse_expr_text(input: &str) -> anyhow::Result<Expr> {
    full_expr
        .parse(input)
        .map_err(|e| anyhow::anyhow!("invalid expression: {e}"))
}

fn full_expr(input: &mut &str) -> ModalResult<Expr> {
    ws_skip.parse_next(input)?;
    let expr = add_expr.parse_next(input)?;
    ws_skip.parse_next(input)?;
    Ok(expr)
}

// ---------------------------------------------------------------------------
// Precedence levels (lowest to highest)
// ---------------------------------------------------------------------------

/// `add_expr = mul_expr { ("+" | "-") mul_expr }`
fn add_expr(input: &mut &str) -> ModalResult<Expr> {
    let mut left = mul_expr.parse_next(input)?;
    loop {
        ws_skip.parse_next(input)?;
        let op = opt(alt((
            literal("+").value(BinOp::Add),
            literal("-").value(BinOp::Sub),
        )))
        .parse_next(input)?;
        if let Some(op) = op {
            ws_skip.parse_next(input)?;
            let right = cut_err(mul_expr).parse_next(input)?;
            left = Expr::BinOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        } else {
            break;
        }
    }
    Ok(left)
}

/// `mul_expr = pow_expr { ("*" | "/" | "%") pow_expr }`
///
/// `**` never reaches this level; `pow_expr` consumes it first.
fn mul_expr(input: &mut &str) -> ModalResult<Expr> {
    let mut left = pow_expr.parse_next(input)?;
    loop {
        ws_skip.parse_next(input)?;
        let op = opt(alt((
            literal("*").value(BinOp::Mul),
            literal("/").value(BinOp::Div),
            literal("%").value(BinOp::Rem),
        )))
        .parse_next(input)?;
        if let Some(op) = op {
            ws_skip.parse_next(input)?;
            let right = cut_err(pow_expr).parse_next(input)?;
            left = Expr::BinOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        } else {
            break;
        }
    }
    Ok(left)
}

/// `pow_expr = unary_expr [("**" | "^") pow_expr]`, right-associative.
fn pow_expr(input: &mut &str) -> ModalResult<Expr> {
    let base = unary_expr.parse_next(input)?;
    ws_skip.parse_next(input)?;
    if opt(alt((literal("**"), literal("^"))))
        .parse_next(input)?
        .is_some()
    {
        ws_skip.parse_next(input)?;
        let exp = cut_err(pow_expr).parse_next(input)?;
        return Ok(Expr::BinOp {
            op: BinOp::Pow,
            left: Box::new(base),
            right: Box::new(exp),
        });
    }
    Ok(base)
}

/// `unary_expr = ["-" | "+"] unary_expr | primary`
fn unary_expr(input: &mut &str) -> ModalResult<Expr> {
    if opt(literal("-")).parse_next(input)?.is_some() {
        ws_skip.parse_next(input)?;
        let inner = cut_err(unary_expr).parse_next(input)?;
        return Ok(Expr::Neg(Box::new(inner)));
    }
    if opt(literal("+")).parse_next(input)?.is_some() {
        ws_skip.parse_next(input)?;
        return cut_err(unary_expr).parse_next(input);
    }
    primary.parse_next(input)
}

// ---------------------------------------------------------------------------
// Primary
// ---------------------------------------------------------------------------

fn primary(input: &mut &str) -> ModalResult<Expr> {
    alt((number_literal.map(Expr::Number), paren_expr, ident_primary))
        .context(StrContext::Expected(StrContextValue::Description(
            "expression",
        )))
        .parse_next(input)
}

fn paren_expr(input: &mut &str) -> ModalResult<Expr> {
    literal("(").parse_next(input)?;
    ws_skip.parse_next(input)?;
    let inner = cut_err(add_expr).parse_next(input)?;
    ws_skip.parse_next(input)?;
    cut_err(literal(")"))
        .context(StrContext::Expected(StrContextValue::Description(
            "closing parenthesis",
        )))
        .parse_next(input)?;
    Ok(inner)
}

/// Ident-based primary: variable, named constant, or allow-listed call.
///
/// A `math.` qualifier is accepted in front of function and constant names.
/// Anything outside the allow-list is a hard error; names never fall
/// through to ambient resolution.
fn ident_primary(input: &mut &str) -> ModalResult<Expr> {
    let first = ident.parse_next(input)?;

    // math.name → strip the qualifier
    let name = if first == "math" && opt(literal(".")).parse_next(input)?.is_some() {
        cut_err(ident).parse_next(input)?
    } else {
        first
    };

    ws_skip.parse_next(input)?;
    if opt(literal("(")).parse_next(input)?.is_some() {
        let Some(func) = Func::from_name(name) else {
            return Err(ErrMode::Cut(ContextError::new()));
        };
        return call_args(func, input);
    }

    if let Some(var) = Var::from_name(name) {
        return Ok(Expr::Var(var));
    }
    if let Some(value) = const_value(name) {
        return Ok(Expr::Number(value));
    }
    Err(ErrMode::Cut(ContextError::new()))
}

fn call_args(func: Func, input: &mut &str) -> ModalResult<Expr> {
    ws_skip.parse_next(input)?;
    let args: Vec<Expr> = separated(
        1..,
        (ws_skip, add_expr, ws_skip).map(|(_, e, _)| e),
        literal(","),
    )
    .parse_next(input)?;
    cut_err(literal(")"))
        .context(StrContext::Expected(StrContextValue::Description(
            "closing parenthesis",
        )))
        .parse_next(input)?;
    if args.len() != func.arity() {
        return Err(ErrMode::Cut(ContextError::new()));
    }
    Ok(Expr::Call { func, args })
}

// ---------------------------------------------------------------------------
// Lexical primitives
// ---------------------------------------------------------------------------

fn ident<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    // First character must be alphabetic or underscore (not digit).
    if !input.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        return Err(ErrMode::Backtrack(ContextError::new()));
    }
    take_while(1.., |c: char| c.is_ascii_alphanumeric() || c == '_').parse_next(input)
}

/// `digits ["." digits] [("e"|"E") ["+"|"-"] digits]`
fn number_literal(input: &mut &str) -> ModalResult<f64> {
    let start = *input;
    let _ = take_while(1.., |c: char| c.is_ascii_digit()).parse_next(input)?;
    if opt(literal(".")).parse_next(input)?.is_some() {
        let _ = take_while(1.., |c: char| c.is_ascii_digit())
            .context(StrContext::Expected(StrContextValue::Description(
                "digits after decimal point",
            )))
            .parse_next(input)?;
    }
    if opt(alt((literal("e"), literal("E"))))
        .parse_next(input)?
        .is_some()
    {
        let _ = opt(alt((literal("+"), literal("-")))).parse_next(input)?;
        let _ = take_while(1.., |c: char| c.is_ascii_digit())
            .context(StrContext::Expected(StrContextValue::Description(
                "exponent digits",
            )))
            .parse_next(input)?;
    }
    let consumed = start.len() - input.len();
    start[..consumed]
        .parse()
        .map_err(|_| ErrMode::Cut(ContextError::new()))
}

fn ws_skip(input: &mut &str) -> ModalResult<()> {
    let _ = take_while(0.., |c: char| c == ' ' || c == '\t').parse_next(input)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_variable_product() {
        let e = parse_expr_text("c1 * 2").unwrap();
        assert!(matches!(e, Expr::BinOp { op: BinOp::Mul, .. }));
        assert_eq!(e.vars(), vec![Var::C1]);
    }

    #[test]
    fn parse_precedence_add_mul() {
        // 1 + 2 * 3 must group as 1 + (2 * 3)
        let e = parse_expr_text("1 + 2 * 3").unwrap();
        let Expr::BinOp { op, right, .. } = e else {
            panic!("expected binop");
        };
        assert_eq!(op, BinOp::Add);
        assert!(matches!(*right, Expr::BinOp { op: BinOp::Mul, .. }));
    }

    #[test]
    fn parse_pow_right_assoc() {
        // 2 ** 3 ** 2 = 2 ** (3 ** 2)
        let e = parse_expr_text("2 ** 3 ** 2").unwrap();
        let Expr::BinOp { op, right, .. } = e else {
            panic!("expected binop");
        };
        assert_eq!(op, BinOp::Pow);
        assert!(matches!(*right, Expr::BinOp { op: BinOp::Pow, .. }));
    }

    #[test]
    fn parse_caret_pow() {
        let e = parse_expr_text("c1 ^ 2.5").unwrap();
        assert!(matches!(e, Expr::BinOp { op: BinOp::Pow, .. }));
    }

    #[test]
    fn parse_qualified_call_and_const() {
        let e = parse_expr_text("math.sin(math.pi / 2)").unwrap();
        assert!(matches!(e, Expr::Call { func: Func::Sin, .. }));
    }

    #[test]
    fn parse_bare_call() {
        let e = parse_expr_text("sqrt(c2)").unwrap();
        assert!(matches!(e, Expr::Call { func: Func::Sqrt, .. }));
    }

    #[test]
    fn parse_exponent_literal() {
        let e = parse_expr_text("1.5e3").unwrap();
        assert_eq!(e, Expr::Number(1500.0));
    }

    #[test]
    fn reject_unknown_name() {
        assert!(parse_expr_text("c5 + 1").is_err());
        assert!(parse_expr_text("__import__(1)").is_err());
        assert!(parse_expr_text("os").is_err());
    }

    #[test]
    fn reject_wrong_arity() {
        assert!(parse_expr_text("pow(c1)").is_err());
        assert!(parse_expr_text("sqrt(c1, c2)").is_err());
    }

    #[test]
    fn reject_trailing_garbage() {
        assert!(parse_expr_text("c1 + 1 ;").is_err());
        assert!(parse_expr_text("c1 @ 2").is_err());
    }

    #[test]
    fn collect_vars_in_declaration_order() {
        let e = parse_expr_text("f1 + c2 * c1").unwrap();
        assert_eq!(e.vars(), vec![Var::F1, Var::C2, Var::C1]);
    }
}
