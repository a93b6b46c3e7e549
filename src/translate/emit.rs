use std::collections::HashMap;

use crate::codegen::{real_literal, Lines};
use crate::error::TranslateError;
use crate::translate::ast::{BinOp, Builtin, CmpOp, Expr, FieldRef, FunctionDef, Stmt, Type, UnaryOp};
use crate::translate::passes::{Env, Types};

// Binding strength of emitted Rust expressions
const ATOM: u8 = 100;
const UNARY: u8 = 90;
const MUL: u8 = 70;
const ADD: u8 = 60;
const CMP: u8 = 40;
const AND: u8 = 30;
const OR: u8 = 20;

/// Parameter types and return kind of a callable routine
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub params: Vec<Type>,
    pub returns: bool,
}

/// An emitted expression together with its binding strength
struct Code {
    text: String,
    prec: u8,
}

impl Code {
    fn new(text: impl Into<String>, prec: u8) -> Self {
        Self {
            text: text.into(),
            prec,
        }
    }

    fn atom(text: impl Into<String>) -> Self {
        Self::new(text, ATOM)
    }

    /// Text safe to place where binding strength `min` is required
    fn at(&self, min: u8) -> String {
        if self.prec < min {
            format!("({})", self.text)
        } else {
            self.text.clone()
        }
    }
}

/// Resolve a literal-only type against what the context asks for
fn settle(ty: Type, want: Option<Type>) -> Type {
    match (ty, want) {
        (Type::IntLiteral, Some(w)) if matches!(w, Type::Int | Type::Usize | Type::Real) => w,
        (Type::IntLiteral, _) => Type::Int,
        (Type::Bool, _) => Type::Int,
        (ty, _) => ty,
    }
}

/// Renders one resolved and typed routine as a `&mut self` method
pub struct Emitter<'a> {
    routine: &'a str,
    env: Env<'a>,
    types: &'a Types,
    signatures: &'a HashMap<String, Signature>,
}

impl<'a> Emitter<'a> {
    pub fn new(
        routine: &'a str,
        types: &'a Types,
        returns: &'a HashMap<String, bool>,
        signatures: &'a HashMap<String, Signature>,
    ) -> Self {
        Self {
            routine,
            env: Env::new(types, returns),
            types,
            signatures,
        }
    }

    fn error(&self, message: impl Into<String>) -> TranslateError {
        TranslateError::syntax(self.routine, 1, message)
    }

    pub fn function(&self, def: &FunctionDef) -> Result<String, TranslateError> {
        let params: Vec<String> = self
            .types
            .params
            .iter()
            .map(|(name, ty)| {
                let binding = if self.types.assigned_params.contains(name) {
                    "mut "
                } else {
                    ""
                };
                format!(", {}{}: {}", binding, name, ty.rust())
            })
            .collect();
        let ret = if self.types.returns { " -> f64" } else { "" };

        let mut lines = Lines::new();
        lines.add(0, format!("pub fn {}(&mut self{}){} {{", def.name, params.concat(), ret));
        for (name, ty) in &self.types.locals {
            let decl = match ty {
                Type::Usize => format!("let mut {}: usize = 0;", name),
                Type::Int => format!("let mut {} = 0;", name),
                Type::Bool => format!("let mut {} = false;", name),
                Type::Text => format!("let mut {} = String::new();", name),
                _ => format!("let mut {} = 0.0;", name),
            };
            lines.add(1, decl);
        }
        lines.extend(1, self.block(&def.body)?);
        if self.types.returns && !matches!(def.body.last(), Some(Stmt::Return(_))) {
            lines.add(1, "f64::NAN");
        }
        lines.add(0, "}");
        Ok(lines.render())
    }

    fn block(&self, body: &[Stmt]) -> Result<Lines, TranslateError> {
        let mut lines = Lines::new();
        for stmt in body {
            self.stmt(stmt, &mut lines)?;
        }
        Ok(lines)
    }

    fn stmt(&self, stmt: &Stmt, lines: &mut Lines) -> Result<(), TranslateError> {
        match stmt {
            Stmt::Assign { target, value } => lines.add(0, self.assign(target, value)?),
            Stmt::AugAssign { .. } => {
                return Err(self.error("compound assignment left after desugaring"));
            }
            Stmt::If {
                branches,
                otherwise,
            } => {
                for (i, (cond, body)) in branches.iter().enumerate() {
                    let cond = self.expr(cond, Some(Type::Bool))?.text;
                    if i == 0 {
                        lines.add(0, format!("if {} {{", cond));
                    } else {
                        lines.add(0, format!("}} else if {} {{", cond));
                    }
                    lines.extend(1, self.block(body)?);
                }
                if !otherwise.is_empty() {
                    lines.add(0, "} else {");
                    lines.extend(1, self.block(otherwise)?);
                }
                lines.add(0, "}");
            }
            Stmt::For {
                var,
                start,
                stop,
                step,
                body,
            } => {
                let start = match start {
                    Some(e) => self.expr(e, Some(Type::Usize))?.at(ADD + 1),
                    None => "0".to_string(),
                };
                let stop = self.expr(stop, Some(Type::Usize))?.at(ADD + 1);
                let range = match step {
                    Some(step) => format!(
                        "({}..{}).step_by({})",
                        start,
                        stop,
                        self.expr(step, Some(Type::Usize))?.text
                    ),
                    None => format!("{}..{}", start, stop),
                };
                lines.add(0, format!("for {} in {} {{", var, range));
                lines.extend(1, self.block(body)?);
                lines.add(0, "}");
            }
            Stmt::While { cond, body } => {
                lines.add(0, format!("while {} {{", self.expr(cond, Some(Type::Bool))?.text));
                lines.extend(1, self.block(body)?);
                lines.add(0, "}");
            }
            Stmt::Expr(e) => lines.add(0, format!("{};", self.expr(e, None)?.text)),
            Stmt::Return(Some(e)) => {
                lines.add(0, format!("return {};", self.expr(e, Some(Type::Real))?.text))
            }
            Stmt::Return(None) if self.types.returns => lines.add(0, "return f64::NAN;"),
            Stmt::Return(None) => lines.add(0, "return;"),
            Stmt::Pass => {}
            Stmt::Break => lines.add(0, "break;"),
            Stmt::Continue => lines.add(0, "continue;"),
        }
        Ok(())
    }

    fn assign(&self, target: &Expr, value: &Expr) -> Result<String, TranslateError> {
        if let Expr::Link { field, idx } = target {
            let value = self.expr(value, Some(Type::Real))?.text;
            return Ok(match idx {
                Some(idx) => format!(
                    "self.{}.{}.set({}, {});",
                    field.owner,
                    field.name,
                    self.expr(idx, Some(Type::Usize))?.text,
                    value
                ),
                None => format!("self.{}.{}.set({});", field.owner, field.name, value),
            });
        }
        let ty = match self.env.type_of(target) {
            Type::IntLiteral => Type::Real,
            ty => ty,
        };
        let place = self.place(target)?;
        Ok(format!("{} = {};", place, self.expr(value, Some(ty))?.text))
    }

    /// Assignable location, without the copy-out applied to reads
    fn place(&self, target: &Expr) -> Result<String, TranslateError> {
        match target {
            Expr::Name(n) => Ok(n.clone()),
            Expr::Field(f) => Ok(field_path(f)),
            Expr::ModelVar { path, .. } => Ok(format!("self.{}", path)),
            Expr::Index(base, idx) => match base.as_ref() {
                Expr::Field(f) => Ok(format!("{}{}", field_path(f), self.subscript(idx)?)),
                _ => Err(self.error("only fields can be indexed")),
            },
            other => Err(self.error(format!("cannot assign to {:?}", other))),
        }
    }

    fn subscript(&self, idx: &[Expr]) -> Result<String, TranslateError> {
        let idx = idx
            .iter()
            .map(|i| Ok(self.expr(i, Some(Type::Usize))?.text))
            .collect::<Result<Vec<_>, TranslateError>>()?;
        Ok(match idx.as_slice() {
            [single] => format!("[{}]", single),
            _ => format!("[[{}]]", idx.join(", ")),
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Expressions
    // ═══════════════════════════════════════════════════════════════════════════

    /// Emit `expr` converted to `want`, if given
    fn expr(&self, expr: &Expr, want: Option<Type>) -> Result<Code, TranslateError> {
        let (code, ty) = self.raw(expr, want)?;
        Ok(coerce(code, ty, want))
    }

    /// Emit `expr` in its own type, which literals and operators pick from `want`
    fn raw(&self, expr: &Expr, want: Option<Type>) -> Result<(Code, Type), TranslateError> {
        let natural = self.env.type_of(expr);
        Ok(match expr {
            Expr::Int(v) => {
                let ty = match want {
                    Some(w @ (Type::Real | Type::Usize | Type::Bool)) => w,
                    _ => Type::Int,
                };
                let text = match ty {
                    Type::Real => format!("{}.0", v),
                    Type::Bool => (*v != 0).to_string(),
                    _ => v.to_string(),
                };
                (Code::atom(text), ty)
            }
            Expr::Real(v) => {
                let text = real_literal(*v);
                let prec = if text.starts_with('-') { UNARY } else { ATOM };
                (Code::new(text, prec), Type::Real)
            }
            Expr::Bool(b) => (Code::atom(b.to_string()), Type::Bool),
            Expr::Name(n) | Expr::Const(n, _) => (Code::atom(n.clone()), natural),
            Expr::ModelVar { path, .. } => (Code::atom(format!("self.{}", path)), natural),
            Expr::Field(f) => (Code::atom(read(field_path(f), natural)), natural),
            Expr::Index(base, idx) => match base.as_ref() {
                Expr::Field(f) => {
                    let text = format!("{}{}", field_path(f), self.subscript(idx)?);
                    (Code::atom(read(text, natural)), natural)
                }
                _ => return Err(self.error("only fields can be indexed")),
            },
            Expr::Link { field, idx } => {
                let arg = match idx {
                    Some(idx) => self.expr(idx, Some(Type::Usize))?.text,
                    None => String::new(),
                };
                (
                    Code::atom(format!("self.{}.{}.get({})", field.owner, field.name, arg)),
                    Type::Real,
                )
            }
            Expr::MethodCall { name, args } => {
                let params = self.signatures.get(name).map(|s| s.params.as_slice());
                if let Some(params) = params {
                    if params.len() != args.len() {
                        return Err(self.error(format!(
                            "'{}' takes {} argument(s), {} given",
                            name,
                            params.len(),
                            args.len()
                        )));
                    }
                } else if !args.is_empty() {
                    return Err(self.error(format!("'{}' takes no arguments", name)));
                }
                let args = args
                    .iter()
                    .enumerate()
                    .map(|(i, a)| Ok(self.expr(a, params.map(|p| p[i]))?.text))
                    .collect::<Result<Vec<_>, TranslateError>>()?;
                (
                    Code::atom(format!("self.{}({})", name, args.join(", "))),
                    natural,
                )
            }
            Expr::Builtin(builtin, args) => self.builtin(*builtin, args, want)?,
            Expr::Unary { op, operand } => match op {
                UnaryOp::Not => {
                    let inner = self.expr(operand, Some(Type::Bool))?;
                    (Code::new(format!("!{}", inner.at(UNARY)), UNARY), Type::Bool)
                }
                UnaryOp::Pos => self.raw(operand, want)?,
                UnaryOp::Neg => {
                    let ty = match settle(self.env.type_of(operand), want) {
                        Type::Usize => Type::Int,
                        ty => ty,
                    };
                    let inner = self.expr(operand, Some(ty))?;
                    let text = if inner.text.starts_with('-') {
                        format!("-({})", inner.text)
                    } else {
                        format!("-{}", inner.at(UNARY))
                    };
                    (Code::new(text, UNARY), ty)
                }
            },
            Expr::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs, want)?,
            Expr::Compare { first, rest } => {
                let mut parts = Vec::with_capacity(rest.len());
                let mut left = first.as_ref();
                for (op, right) in rest {
                    parts.push(self.compare(*op, left, right)?);
                    left = right;
                }
                if parts.len() == 1 {
                    (Code::new(parts.remove(0), CMP), Type::Bool)
                } else {
                    let text = parts
                        .iter()
                        .map(|p| p.as_str())
                        .collect::<Vec<_>>()
                        .join(" && ");
                    (Code::new(text, AND), Type::Bool)
                }
            }
            Expr::Ternary {
                cond,
                then,
                otherwise,
            } => {
                let ty = match want {
                    Some(w) if w != Type::Unit => w,
                    _ => settle(natural, None),
                };
                let text = format!(
                    "(if {} {{ {} }} else {{ {} }})",
                    self.expr(cond, Some(Type::Bool))?.text,
                    self.expr(then, Some(ty))?.text,
                    self.expr(otherwise, Some(ty))?.text
                );
                (Code::atom(text), ty)
            }
            Expr::Paren(inner) => {
                let (code, ty) = self.raw(inner, want)?;
                let code = coerce(code, ty, want);
                let ty = want.unwrap_or(ty);
                (Code::atom(format!("({})", code.text)), ty)
            }
            Expr::Attr(..) | Expr::Call(..) => {
                return Err(self.error("unresolved expression reached emission"))
            }
        })
    }

    fn binary(
        &self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        want: Option<Type>,
    ) -> Result<(Code, Type), TranslateError> {
        let joined = self.env.type_of(lhs).join(self.env.type_of(rhs));
        let (ty, prec) = match op {
            BinOp::And => (Type::Bool, AND),
            BinOp::Or => (Type::Bool, OR),
            BinOp::Div => (Type::Real, MUL),
            BinOp::Pow if settle(joined, want) == Type::Real || joined == Type::IntLiteral => {
                (Type::Real, ATOM)
            }
            BinOp::Add | BinOp::Sub => (settle(joined, want), ADD),
            _ => (settle(joined, want), MUL),
        };
        let l = self.expr(lhs, Some(ty))?;
        let r = self.expr(rhs, Some(ty))?;

        let spaced = |symbol: &str| format!("{} {} {}", l.at(prec), symbol, r.at(prec + 1));
        let tight = |symbol: &str| format!("{}{}{}", l.at(prec), symbol, r.at(prec + 1));
        let call = |func: &str| Code::atom(format!("{}({}, {})", func, l.text, r.text));

        let code = match (op, ty) {
            (BinOp::And, _) => Code::new(spaced("&&"), prec),
            (BinOp::Or, _) => Code::new(spaced("||"), prec),
            (BinOp::Add, _) => Code::new(spaced("+"), prec),
            (BinOp::Sub, _) => Code::new(spaced("-"), prec),
            (BinOp::Mul, _) => Code::new(tight("*"), prec),
            (BinOp::Div, _) => Code::new(tight("/"), prec),
            (BinOp::Mod, Type::Real) => call("floor_rem_f64"),
            (BinOp::Mod, Type::Int) => call("floor_rem_i64"),
            (BinOp::Mod, _) => Code::new(tight("%"), prec),
            (BinOp::FloorDiv, Type::Real) => {
                Code::atom(format!("f64::floor({}/{})", l.at(MUL), r.at(MUL + 1)))
            }
            (BinOp::FloorDiv, Type::Int) => call("floor_div_i64"),
            (BinOp::FloorDiv, _) => Code::new(tight("/"), prec),
            (BinOp::Pow, Type::Real) => call("f64::powf"),
            (BinOp::Pow, other) => {
                let exponent = self.expr(rhs, Some(Type::Usize))?;
                Code::atom(format!("{}::pow({}, ({} as u32))", other.rust(), l.text, exponent.at(UNARY)))
            }
        };
        Ok((code, ty))
    }

    fn compare(&self, op: CmpOp, lhs: &Expr, rhs: &Expr) -> Result<String, TranslateError> {
        let joined = self.env.type_of(lhs).join(self.env.type_of(rhs));
        let ty = match joined {
            Type::IntLiteral => Type::Int,
            ty => ty,
        };
        let l = self.expr(lhs, Some(ty))?;
        let r = self.expr(rhs, Some(ty))?;
        Ok(format!("{} {} {}", l.at(CMP + 1), op.symbol(), r.at(CMP + 1)))
    }

    fn builtin(
        &self,
        builtin: Builtin,
        args: &[Expr],
        want: Option<Type>,
    ) -> Result<(Code, Type), TranslateError> {
        let real = |i: usize| -> Result<String, TranslateError> {
            Ok(self.expr(&args[i], Some(Type::Real))?.text)
        };
        let unary_real = |func: &str| -> Result<(Code, Type), TranslateError> {
            Ok((Code::atom(format!("{}({})", func, real(0)?)), Type::Real))
        };
        Ok(match builtin {
            Builtin::Exp => unary_real("f64::exp")?,
            Builtin::Log => unary_real("f64::ln")?,
            Builtin::Sqrt => unary_real("f64::sqrt")?,
            Builtin::Fabs => unary_real("f64::abs")?,
            Builtin::IsNan => (
                Code::atom(format!("f64::is_nan({})", real(0)?)),
                Type::Bool,
            ),
            Builtin::IsInf => (
                Code::atom(format!("f64::is_infinite({})", real(0)?)),
                Type::Bool,
            ),
            Builtin::Pow => (
                Code::atom(format!("f64::powf({}, {})", real(0)?, real(1)?)),
                Type::Real,
            ),
            Builtin::Float => (self.expr(&args[0], Some(Type::Real))?, Type::Real),
            Builtin::Int => {
                let ty = if want == Some(Type::Usize) {
                    Type::Usize
                } else {
                    Type::Int
                };
                let (code, from) = self.raw(&args[0], None)?;
                (coerce(code, from, Some(ty)), ty)
            }
            Builtin::Abs => {
                let ty = settle(self.env.type_of(&args[0]), want);
                let inner = self.expr(&args[0], Some(ty))?;
                match ty {
                    Type::Usize => (inner, ty),
                    _ => (Code::atom(format!("{}::abs({})", ty.rust(), inner.text)), ty),
                }
            }
            Builtin::Max | Builtin::Min => {
                let joined = args
                    .iter()
                    .map(|a| self.env.type_of(a))
                    .fold(Type::IntLiteral, Type::join);
                let ty = settle(joined, want);
                let func = if builtin == Builtin::Max { "max" } else { "min" };
                let mut acc = self.expr(&args[0], Some(ty))?.text;
                for arg in &args[1..] {
                    acc = format!(
                        "{}::{}({}, {})",
                        ty.rust(),
                        func,
                        acc,
                        self.expr(arg, Some(ty))?.text
                    );
                }
                (Code::atom(acc), ty)
            }
        })
    }
}

fn field_path(f: &FieldRef) -> String {
    format!("self.{}.{}", f.owner, f.name)
}

/// Reads of text fields copy the value out
fn read(text: String, ty: Type) -> String {
    if ty == Type::Text {
        format!("{}.clone()", text)
    } else {
        text
    }
}

/// Convert `code` of type `from` into `want`
fn coerce(code: Code, from: Type, want: Option<Type>) -> Code {
    let Some(want) = want else {
        return code;
    };
    let from = match from {
        Type::IntLiteral => Type::Int,
        ty => ty,
    };
    if from == want || matches!(want, Type::IntLiteral | Type::Unit | Type::Text) {
        return code;
    }
    match (from, want) {
        (Type::Unit | Type::Text, _) => code,
        (Type::Bool, Type::Real) => Code::atom(format!("({} as i64 as f64)", code.at(UNARY))),
        (Type::Real, Type::Bool) => Code::atom(format!("({} != 0.0)", code.at(CMP + 1))),
        (_, Type::Bool) => Code::atom(format!("({} != 0)", code.at(CMP + 1))),
        (_, want) => Code::atom(format!("({} as {})", code.at(UNARY), want.rust())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Field, ModelDescriptor, Ndim};
    use crate::translate::passes::{desugar, infer, resolve, Context};
    use crate::translate::parser::parse_routine;
    use std::collections::HashSet;

    fn try_emit(source: &str) -> Result<String, TranslateError> {
        let descriptor = ModelDescriptor::builder("test")
            .group("parameters.control", |g| {
                g.field(Field::integer("nmbzones", Ndim::D0))
                    .field(Field::real("maxq", Ndim::D0))
            })
            .group("sequences.fluxes", |g| g.field(Field::real("q", Ndim::D1)))
            .group("sequences.outlets", |g| g.field(Field::link("q", Ndim::D0)))
            .build()
            .validate()
            .unwrap();
        let callable: HashSet<String> = HashSet::new();
        let ctx = Context {
            descriptor: &descriptor,
            callable: &callable,
        };
        let mut def = resolve(parse_routine("f", source)?, &ctx)?;
        def.body = desugar(def.body);
        let returns = HashMap::new();
        let types = infer(&def, &returns);
        let signatures = HashMap::new();
        Emitter::new("f", &types, &returns, &signatures).function(&def)
    }

    fn emit(source: &str) -> String {
        try_emit(source).unwrap()
    }

    #[test]
    fn test_compound_assignment_is_expanded() {
        let code = emit("def f(model, a, b):\n    x = 0.0\n    x += a*b\n    flu.q[0] = x\n");
        assert!(code.contains("x = x + (a*b);"));
        assert!(!code.contains("+="));
        assert!(code.contains("pub fn f(&mut self, a: f64, b: f64) {"));
    }

    #[test]
    fn test_index_loop_and_casts() {
        let code = emit(
            "def f(model):\n    for k in range(con.nmbzones):\n        flu.q[k] = k / 2 + con.maxq\n",
        );
        assert!(code.contains("for k in 0..(self.control.nmbzones as usize) {"));
        assert!(code.contains("self.fluxes.q[k] = (k as f64)/2.0 + self.control.maxq;"));
    }

    #[test]
    fn test_builtins_and_conditionals() {
        let code = emit(
            "def f(model):\n    for k in range(1, 5, 2):\n        if flu.q[k] < 0 or isnan(flu.q[k]):\n            flu.q[k] = 0\n        elif flu.q[k] > con.maxq:\n            flu.q[k] = min(flu.q[k], con.maxq)\n        else:\n            flu.q[k] = exp(-flu.q[k]) if flu.q[k] > 1 else flu.q[k]**2\n",
        );
        assert!(code.contains("for k in (1..5).step_by(2) {"));
        assert!(code.contains("if self.fluxes.q[k] < 0.0 || f64::is_nan(self.fluxes.q[k]) {"));
        assert!(code.contains("self.fluxes.q[k] = 0.0;"));
        assert!(code.contains("} else if self.fluxes.q[k] > self.control.maxq {"));
        assert!(code.contains("f64::min(self.fluxes.q[k], self.control.maxq)"));
        assert!(code.contains(
            "(if self.fluxes.q[k] > 1.0 { f64::exp(-self.fluxes.q[k]) } else { f64::powf(self.fluxes.q[k], 2.0) })"
        ));
    }

    #[test]
    fn test_link_reads_and_writes() {
        let code = emit("def f(model):\n    out.q[0] += flu.q[0]\n");
        assert!(code.contains("self.outlets.q.set(self.outlets.q.get() + (self.fluxes.q[0]));"));
    }

    #[test]
    fn test_return_value_and_integer_locals() {
        let code = emit("def f(model, k):\n    n = con.nmbzones\n    if k < n:\n        return flu.q[k]\n    return 0\n");
        assert!(code.contains("pub fn f(&mut self, k: usize) -> f64 {"));
        assert!(code.contains("let mut n = 0;"));
        assert!(code.contains("if (k as i64) < n {"));
        assert!(code.contains("return 0.0;"));
        assert!(!code.contains("f64::NAN"));
    }

    #[test]
    fn test_negative_range_step_is_rejected() {
        let err = try_emit("def f(model):\n    for k in range(4, 0, -1):\n        flu.q[k] = 0.\n").unwrap_err();
        assert!(err.to_string().contains("negative range steps"));
    }

    #[test]
    fn test_modulo_and_floor_division_round_down() {
        let code = emit(
            "def f(model, a, b):\n    n = con.nmbzones % 3\n    m = con.nmbzones // 2\n    flu.q[0] = a % b + n + m\n    flu.q[1] = a // b\n",
        );
        assert!(code.contains("n = floor_rem_i64(self.control.nmbzones, 3);"));
        assert!(code.contains("m = floor_div_i64(self.control.nmbzones, 2);"));
        assert!(code.contains("floor_rem_f64(a, b)"));
        assert!(code.contains("self.fluxes.q[1] = f64::floor(a/b);"));
        assert!(!code.contains("euclid"));
    }
}
