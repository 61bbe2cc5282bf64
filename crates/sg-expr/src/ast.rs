use crate::funcs::Func;

// ---------------------------------------------------------------------------
// Variables
// ---------------------------------------------------------------------------

/// The fixed variable set an expression may reference.
///
/// `C1`..`C4` are channel inputs, `F1` is the nested-formula input. The set
/// is deliberately closed: an expression naming anything else fails to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Var {
    C1,
    C2,
    C3,
    C4,
    F1,
}

impl Var {
    /// All variables in declaration order (`c1`..`c4` before `f1`).
    pub const ALL: [Var; 5] = [Var::C1, Var::C2, Var::C3, Var::C4, Var::F1];

    pub fn from_name(name: &str) -> Option<Var> {
        match name {
            "c1" => Some(Var::C1),
            "c2" => Some(Var::C2),
            "c3" => Some(Var::C3),
            "c4" => Some(Var::C4),
            "f1" => Some(Var::F1),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Var::C1 => "c1",
            Var::C2 => "c2",
            Var::C3 => "c3",
            Var::C4 => "c4",
            Var::F1 => "f1",
        }
    }

    /// Index into a dense binding table.
    pub(crate) fn index(self) -> usize {
        match self {
            Var::C1 => 0,
            Var::C2 => 1,
            Var::C3 => 2,
            Var::C4 => 3,
            Var::F1 => 4,
        }
    }
}

impl std::fmt::Display for Var {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Number literal. Named constants (`pi`, `math.e`, ...) are folded to
    /// this variant at parse time.
    Number(f64),
    /// Variable reference.
    Var(Var),
    /// Unary negation.
    Neg(Box<Expr>),
    /// Binary operation.
    BinOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Allow-listed function call; arity is checked at parse time.
    Call { func: Func, args: Vec<Expr> },
}

impl Expr {
    /// Collect every variable the expression references.
    pub fn vars(&self) -> Vec<Var> {
        let mut out = Vec::new();
        self.collect_vars(&mut out);
        out
    }

    fn collect_vars(&self, out: &mut Vec<Var>) {
        match self {
            Expr::Number(_) => {}
            Expr::Var(v) => {
                if !out.contains(v) {
                    out.push(*v);
                }
            }
            Expr::Neg(inner) => inner.collect_vars(out),
            Expr::BinOp { left, right, .. } => {
                left.collect_vars(out);
                right.collect_vars(out);
            }
            Expr::Call { args, .. } => {
                for a in args {
                    a.collect_vars(out);
                }
            }
        }
    }
}
