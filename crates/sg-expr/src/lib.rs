//! Restricted arithmetic expression engine for derived sensor channels.
//!
//! Expressions are parsed once into a closed AST over the fixed variable set
//! `{c1, c2, c3, c4, f1}` and an allow-listed math-function namespace, then
//! evaluated per data point. There is no ambient name resolution and no way
//! to call outside the allow-list, so user-authored expression text cannot
//! execute arbitrary code. Pure computation; no I/O anywhere in this crate.

pub mod ast;
mod eval;
mod funcs;
mod parser;

pub use ast::{BinOp, Expr, Var};
pub use eval::{Bindings, EvalError, Program};
pub use funcs::Func;
pub use parser::parse_expr_text;
