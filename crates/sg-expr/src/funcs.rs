// ---------------------------------------------------------------------------
// Allow-listed math functions
// ---------------------------------------------------------------------------

/// The closed set of callable functions.
///
/// Names follow Python's `math` module so stored expressions written in
/// that style keep parsing. Every name may also be `math.`-qualified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Abs,
    Sqrt,
    Pow,
    Exp,
    Log,
    Log10,
    Log2,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Atan2,
    Sinh,
    Cosh,
    Tanh,
    Floor,
    Ceil,
    Round,
    Radians,
    Degrees,
    Fmin,
    Fmax,
}

impl Func {
    pub fn from_name(name: &str) -> Option<Func> {
        let f = match name {
            "abs" | "fabs" => Func::Abs,
            "sqrt" => Func::Sqrt,
            "pow" => Func::Pow,
            "exp" => Func::Exp,
            "log" => Func::Log,
            "log10" => Func::Log10,
            "log2" => Func::Log2,
            "sin" => Func::Sin,
            "cos" => Func::Cos,
            "tan" => Func::Tan,
            "asin" => Func::Asin,
            "acos" => Func::Acos,
            "atan" => Func::Atan,
            "atan2" => Func::Atan2,
            "sinh" => Func::Sinh,
            "cosh" => Func::Cosh,
            "tanh" => Func::Tanh,
            "floor" => Func::Floor,
            "ceil" => Func::Ceil,
            "round" => Func::Round,
            "radians" => Func::Radians,
            "degrees" => Func::Degrees,
            "fmin" | "min" => Func::Fmin,
            "fmax" | "max" => Func::Fmax,
            _ => return None,
        };
        Some(f)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Func::Abs => "abs",
            Func::Sqrt => "sqrt",
            Func::Pow => "pow",
            Func::Exp => "exp",
            Func::Log => "log",
            Func::Log10 => "log10",
            Func::Log2 => "log2",
            Func::Sin => "sin",
            Func::Cos => "cos",
            Func::Tan => "tan",
            Func::Asin => "asin",
            Func::Acos => "acos",
            Func::Atan => "atan",
            Func::Atan2 => "atan2",
            Func::Sinh => "sinh",
            Func::Cosh => "cosh",
            Func::Tanh => "tanh",
            Func::Floor => "floor",
            Func::Ceil => "ceil",
            Func::Round => "round",
            Func::Radians => "radians",
            Func::Degrees => "degrees",
            Func::Fmin => "fmin",
            Func::Fmax => "fmax",
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            Func::Pow | Func::Atan2 | Func::Fmin | Func::Fmax => 2,
            _ => 1,
        }
    }

    /// Apply to already-evaluated arguments. `args.len()` must equal
    /// [`Func::arity`]; the parser guarantees this. The result may be
    /// non-finite; the evaluator turns that into a domain error.
    pub(crate) fn apply(&self, args: &[f64]) -> f64 {
        match self {
            Func::Abs => args[0].abs(),
            Func::Sqrt => args[0].sqrt(),
            Func::Pow => args[0].powf(args[1]),
            Func::Exp => args[0].exp(),
            Func::Log => args[0].ln(),
            Func::Log10 => args[0].log10(),
            Func::Log2 => args[0].log2(),
            Func::Sin => args[0].sin(),
            Func::Cos => args[0].cos(),
            Func::Tan => args[0].tan(),
            Func::Asin => args[0].asin(),
            Func::Acos => args[0].acos(),
            Func::Atan => args[0].atan(),
            Func::Atan2 => args[0].atan2(args[1]),
            Func::Sinh => args[0].sinh(),
            Func::Cosh => args[0].cosh(),
            Func::Tanh => args[0].tanh(),
            Func::Floor => args[0].floor(),
            Func::Ceil => args[0].ceil(),
            Func::Round => args[0].round(),
            Func::Radians => args[0].to_radians(),
            Func::Degrees => args[0].to_degrees(),
            Func::Fmin => args[0].min(args[1]),
            Func::Fmax => args[0].max(args[1]),
        }
    }
}

/// Allow-listed named constants (bare or `math.`-qualified).
pub(crate) fn const_value(name: &str) -> Option<f64> {
    match name {
        "pi" => Some(std::f64::consts::PI),
        "e" => Some(std::f64::consts::E),
        "tau" => Some(std::f64::consts::TAU),
        _ => None,
    }
}
