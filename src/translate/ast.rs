// Syntax tree of user routines, before and after name resolution

use crate::descriptor::Ndim;

/// Value types known to the translator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    Bool,
    Int,
    Usize,
    Real,
    Text,
    /// An integer literal, adopting whatever numeric type its context needs
    IntLiteral,
    /// Result of a call without return value
    Unit,
}

impl Type {
    /// Common type of two operands
    pub fn join(self, other: Type) -> Type {
        use Type::*;
        match (self, other) {
            (a, b) if a == b => a,
            (IntLiteral, x) | (x, IntLiteral) => match x {
                Bool => Int,
                x => x,
            },
            (Real, _) | (_, Real) => Real,
            (Int, _) | (_, Int) => Int,
            (Usize, _) | (_, Usize) => Usize,
            (a, _) => a,
        }
    }

    /// Rust spelling, if the type has one
    pub fn rust(self) -> &'static str {
        match self {
            Type::Bool => "bool",
            Type::Int | Type::IntLiteral => "i64",
            Type::Usize => "usize",
            Type::Real => "f64",
            Type::Text => "String",
            Type::Unit => "()",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CmpOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Exp,
    Log,
    Sqrt,
    Fabs,
    Abs,
    Max,
    Min,
    IsNan,
    IsInf,
    Pow,
    Int,
    Float,
}

impl Builtin {
    pub fn lookup(name: &str) -> Option<Builtin> {
        Some(match name {
            "exp" => Builtin::Exp,
            "log" => Builtin::Log,
            "sqrt" => Builtin::Sqrt,
            "fabs" => Builtin::Fabs,
            "abs" => Builtin::Abs,
            "max" => Builtin::Max,
            "min" => Builtin::Min,
            "isnan" => Builtin::IsNan,
            "isinf" => Builtin::IsInf,
            "pow" => Builtin::Pow,
            "int" => Builtin::Int,
            "float" => Builtin::Float,
            _ => return None,
        })
    }

    /// Accepted argument counts as (min, max)
    pub fn arity(self) -> (usize, usize) {
        match self {
            Builtin::Max | Builtin::Min => (2, usize::MAX),
            Builtin::Pow => (2, 2),
            _ => (1, 1),
        }
    }
}

/// What a resolved field reference points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// Plain storage of `rank` axes
    Value { ty: Type, rank: usize },
    /// Non-owning handle(s) into another model
    Link(Ndim),
    /// Dimension or length metadata
    Meta,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    /// Model attribute owning the field, e.g. `fluxes` or `old_states`
    pub owner: String,
    pub name: String,
    pub ty: FieldType,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Real(f64),
    Bool(bool),
    Name(String),
    Attr(Box<Expr>, String),
    Index(Box<Expr>, Vec<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Compare {
        first: Box<Expr>,
        rest: Vec<(CmpOp, Expr)>,
    },
    Ternary {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Paren(Box<Expr>),

    // Produced by name resolution only
    Const(String, Type),
    Field(FieldRef),
    Link {
        field: FieldRef,
        idx: Option<Box<Expr>>,
    },
    ModelVar {
        path: String,
        ty: Type,
    },
    MethodCall {
        name: String,
        args: Vec<Expr>,
    },
    Builtin(Builtin, Vec<Expr>),
}

impl Expr {
    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// Visit this expression and all of its subexpressions
    pub fn walk(&self, visit: &mut dyn FnMut(&Expr)) {
        visit(self);
        match self {
            Expr::Attr(base, _) => base.walk(visit),
            Expr::Index(base, idx) => {
                base.walk(visit);
                idx.iter().for_each(|e| e.walk(visit));
            }
            Expr::Call(func, args) => {
                func.walk(visit);
                args.iter().for_each(|e| e.walk(visit));
            }
            Expr::Unary { operand, .. } => operand.walk(visit),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.walk(visit);
                rhs.walk(visit);
            }
            Expr::Compare { first, rest } => {
                first.walk(visit);
                rest.iter().for_each(|(_, e)| e.walk(visit));
            }
            Expr::Ternary {
                cond,
                then,
                otherwise,
            } => {
                cond.walk(visit);
                then.walk(visit);
                otherwise.walk(visit);
            }
            Expr::Paren(inner) => inner.walk(visit),
            Expr::Link { idx: Some(idx), .. } => idx.walk(visit),
            Expr::MethodCall { args, .. } | Expr::Builtin(_, args) => {
                args.iter().for_each(|e| e.walk(visit))
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Assign {
        target: Expr,
        value: Expr,
    },
    AugAssign {
        target: Expr,
        op: BinOp,
        value: Expr,
    },
    If {
        branches: Vec<(Expr, Vec<Stmt>)>,
        otherwise: Vec<Stmt>,
    },
    For {
        var: String,
        start: Option<Expr>,
        stop: Expr,
        step: Option<Expr>,
        body: Vec<Stmt>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    Expr(Expr),
    Return(Option<Expr>),
    Pass,
    Break,
    Continue,
}

impl Stmt {
    /// Visit this statement and all nested statements
    pub fn walk(&self, visit: &mut dyn FnMut(&Stmt)) {
        visit(self);
        match self {
            Stmt::If {
                branches,
                otherwise,
            } => {
                for (_, body) in branches {
                    body.iter().for_each(|s| s.walk(visit));
                }
                otherwise.iter().for_each(|s| s.walk(visit));
            }
            Stmt::For { body, .. } | Stmt::While { body, .. } => {
                body.iter().for_each(|s| s.walk(visit))
            }
            _ => {}
        }
    }

    /// Expressions held directly by this statement
    pub fn exprs(&self) -> Vec<&Expr> {
        match self {
            Stmt::Assign { target, value } | Stmt::AugAssign { target, value, .. } => {
                vec![target, value]
            }
            Stmt::If { branches, .. } => branches.iter().map(|(cond, _)| cond).collect(),
            Stmt::For {
                start, stop, step, ..
            } => start.iter().chain(Some(stop)).chain(step.iter()).collect(),
            Stmt::While { cond, .. } => vec![cond],
            Stmt::Expr(e) | Stmt::Return(Some(e)) => vec![e],
            _ => Vec::new(),
        }
    }
}

/// A parsed `def`
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    /// Receiver first, as written
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
}

impl FunctionDef {
    pub fn receiver(&self) -> Option<&str> {
        self.params.first().map(|p| p.as_str())
    }

    /// Whether any `return` carries a value
    pub fn returns_value(&self) -> bool {
        let mut found = false;
        for stmt in &self.body {
            stmt.walk(&mut |s| {
                if matches!(s, Stmt::Return(Some(_))) {
                    found = true;
                }
            });
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_join() {
        assert_eq!(Type::IntLiteral.join(Type::Usize), Type::Usize);
        assert_eq!(Type::Usize.join(Type::Real), Type::Real);
        assert_eq!(Type::Int.join(Type::Usize), Type::Int);
        assert_eq!(Type::Bool.join(Type::IntLiteral), Type::Int);
        assert_eq!(Type::IntLiteral.join(Type::IntLiteral), Type::IntLiteral);
    }

    #[test]
    fn test_walk_visits_nested_names() {
        let expr = Expr::binary(
            BinOp::Add,
            Expr::Name("a".into()),
            Expr::Index(Box::new(Expr::Name("b".into())), vec![Expr::Name("k".into())]),
        );
        let mut names = Vec::new();
        expr.walk(&mut |e| {
            if let Expr::Name(n) = e {
                names.push(n.clone());
            }
        });
        assert_eq!(names, vec!["a", "b", "k"]);
    }
}
