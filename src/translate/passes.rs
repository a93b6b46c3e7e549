//! Rewrite passes over parsed routines
//!
//! [resolve] turns shorthand, model and builtin references into resolved
//! nodes, [desugar] expands compound assignments and [infer] assigns a
//! type to every parameter and local. Each pass takes the output of the
//! previous one.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::descriptor::{ConstValue, ElementKind, Group, GroupKind, Ndim, ValidatedDescriptor};
use crate::error::TranslateError;
use crate::translate::ast::{
    BinOp, Builtin, Expr, FieldRef, FieldType, FunctionDef, Stmt, Type, UnaryOp,
};

const FASTACCESS: &str = "fastaccess";
const UTILITY_MODULES: &[&str] = &["modelutils", "math"];

const NUMVARS: &[(&str, Type)] = &[
    ("nmb_calls", Type::Usize),
    ("idx_method", Type::Usize),
    ("idx_stage", Type::Usize),
    ("t0", Type::Real),
    ("t1", Type::Real),
    ("dt", Type::Real),
    ("dt_est", Type::Real),
    ("error", Type::Real),
    ("last_error", Type::Real),
    ("extrapolated_error", Type::Real),
    ("f0_ready", Type::Bool),
];

const NUMCONSTS: &[(&str, Type)] = &[
    ("nmb_methods", Type::Usize),
    ("nmb_stages", Type::Usize),
    ("dt_increase", Type::Real),
    ("dt_decrease", Type::Real),
    ("abs_error_max", Type::Real),
    ("dt_min", Type::Real),
];

/// What name resolution may refer to beyond the routine itself
pub struct Context<'a> {
    pub descriptor: &'a ValidatedDescriptor,
    /// Model routines a routine may call
    pub callable: &'a HashSet<String>,
}

pub fn element_type(kind: ElementKind) -> Type {
    match kind {
        ElementKind::Boolean => Type::Bool,
        ElementKind::Integer => Type::Int,
        ElementKind::Real => Type::Real,
        ElementKind::Text => Type::Text,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Name resolution
// ═══════════════════════════════════════════════════════════════════════════════

/// Resolve shorthand, model, constant and builtin references
///
/// Shorthand bindings (`flu = model.sequences.fluxes.fastaccess`) at the
/// top level of the body are consumed. Names without a binding fall back to
/// the descriptor's conventional shorthands.
pub fn resolve(def: FunctionDef, ctx: &Context) -> Result<FunctionDef, TranslateError> {
    let Some(receiver) = def.receiver().map(str::to_string) else {
        return Err(TranslateError::syntax(&def.name, 1, "routine needs a receiver parameter"));
    };
    let mut resolver = Resolver {
        routine: def.name.clone(),
        ctx,
        receiver,
        params: def.params[1..].iter().cloned().collect(),
        locals: HashSet::new(),
        bindings: HashMap::new(),
    };

    let mut body = Vec::with_capacity(def.body.len());
    for stmt in def.body {
        if !resolver.bind(&stmt)? {
            body.push(stmt);
        }
    }
    for stmt in &body {
        stmt.walk(&mut |s| match s {
            Stmt::Assign {
                target: Expr::Name(n),
                ..
            }
            | Stmt::AugAssign {
                target: Expr::Name(n),
                ..
            } => {
                resolver.locals.insert(n.clone());
            }
            Stmt::For { var, .. } => {
                resolver.locals.insert(var.clone());
            }
            _ => {}
        });
    }
    for name in resolver.bindings.keys() {
        if resolver.locals.contains(name) || resolver.params.contains(name) {
            return Err(TranslateError::syntax(
                &resolver.routine,
                1,
                format!("shorthand '{}' is also used as a variable", name),
            ));
        }
    }

    let body = resolver.block(body)?;
    Ok(FunctionDef {
        name: def.name,
        params: def.params,
        body,
    })
}

struct Resolver<'a> {
    routine: String,
    ctx: &'a Context<'a>,
    receiver: String,
    params: HashSet<String>,
    locals: HashSet<String>,
    /// Shorthand to (model attribute, group)
    bindings: HashMap<String, (String, &'a Group)>,
}

fn dotted(expr: &Expr) -> Option<Vec<&str>> {
    match expr {
        Expr::Name(n) => Some(vec![n.as_str()]),
        Expr::Attr(base, attr) => {
            let mut path = dotted(base)?;
            path.push(attr.as_str());
            Some(path)
        }
        _ => None,
    }
}

impl<'a> Resolver<'a> {
    fn error(&self, message: impl Into<String>) -> TranslateError {
        TranslateError::syntax(&self.routine, 1, message)
    }

    fn is_variable(&self, name: &str) -> bool {
        self.params.contains(name) || self.locals.contains(name)
    }

    /// Record a shorthand binding; true if `stmt` was one
    fn bind(&mut self, stmt: &Stmt) -> Result<bool, TranslateError> {
        let Stmt::Assign {
            target: Expr::Name(shorthand),
            value,
        } = stmt
        else {
            return Ok(false);
        };
        let Some(path) = dotted(value) else {
            return Ok(false);
        };
        let [receiver, family, category, access] = path.as_slice() else {
            return Ok(false);
        };
        if *receiver != self.receiver || !access.starts_with(FASTACCESS) {
            return Ok(false);
        }

        let full = format!("{}.{}", family, category);
        let unknown = || TranslateError::UnknownShorthand {
            routine: self.routine.clone(),
            shorthand: full.clone(),
        };
        let (info, group) = self.ctx.descriptor.group_named(&full).ok_or_else(unknown)?;
        let owner = match (&access[FASTACCESS.len()..], info.kind) {
            ("", _) | ("_new", GroupKind::States) => info.attr.clone(),
            ("_old", GroupKind::States) => "old_states".to_string(),
            _ => return Err(unknown()),
        };
        self.bindings.insert(shorthand.clone(), (owner, group));
        Ok(true)
    }

    fn block(&self, body: Vec<Stmt>) -> Result<Vec<Stmt>, TranslateError> {
        body.into_iter().map(|s| self.stmt(s)).collect()
    }

    fn stmt(&self, stmt: Stmt) -> Result<Stmt, TranslateError> {
        Ok(match stmt {
            Stmt::Assign { target, value } => Stmt::Assign {
                target: self.target(target)?,
                value: self.expr(value)?,
            },
            Stmt::AugAssign { target, op, value } => Stmt::AugAssign {
                target: self.target(target)?,
                op,
                value: self.expr(value)?,
            },
            Stmt::If {
                branches,
                otherwise,
            } => Stmt::If {
                branches: branches
                    .into_iter()
                    .map(|(cond, body)| Ok((self.expr(cond)?, self.block(body)?)))
                    .collect::<Result<_, TranslateError>>()?,
                otherwise: self.block(otherwise)?,
            },
            Stmt::For {
                var,
                start,
                stop,
                step,
                body,
            } => Stmt::For {
                var,
                start: start.map(|e| self.expr(e)).transpose()?,
                stop: self.expr(stop)?,
                step: step.map(|e| self.expr(e)).transpose()?,
                body: self.block(body)?,
            },
            Stmt::While { cond, body } => Stmt::While {
                cond: self.expr(cond)?,
                body: self.block(body)?,
            },
            Stmt::Expr(e) => Stmt::Expr(self.expr(e)?),
            Stmt::Return(e) => Stmt::Return(e.map(|e| self.expr(e)).transpose()?),
            other => other,
        })
    }

    fn target(&self, target: Expr) -> Result<Expr, TranslateError> {
        let resolved = self.expr(target)?;
        match &resolved {
            Expr::Name(_)
            | Expr::Field(_)
            | Expr::Index(..)
            | Expr::Link { .. }
            | Expr::ModelVar { .. } => Ok(resolved),
            other => Err(self.error(format!("cannot assign to {:?}", other))),
        }
    }

    /// Resolve a complete value: fields carry all their indices
    fn expr(&self, expr: Expr) -> Result<Expr, TranslateError> {
        let resolved = self.inner(expr)?;
        let missing = match &resolved {
            Expr::Field(f) => match f.ty {
                FieldType::Value { rank, .. } if rank > 0 => Some((f.name.clone(), rank)),
                FieldType::Link(Ndim::D1) => Some((f.name.clone(), 1)),
                _ => None,
            },
            Expr::Index(base, idx) => match base.as_ref() {
                Expr::Field(FieldRef {
                    name,
                    ty: FieldType::Value { rank, .. },
                    ..
                }) if idx.len() < *rank => Some((name.clone(), *rank)),
                _ => None,
            },
            _ => None,
        };
        if let Some((name, rank)) = missing {
            return Err(self.error(format!("field '{}' needs {} index(es)", name, rank)));
        }
        Ok(resolved)
    }

    fn inner(&self, expr: Expr) -> Result<Expr, TranslateError> {
        Ok(match expr {
            Expr::Name(name) => self.name(name)?,
            Expr::Attr(..) => self.attribute(&expr)?,
            Expr::Index(base, idx) => {
                let base = self.inner(*base)?;
                let idx = idx
                    .into_iter()
                    .map(|e| self.expr(e))
                    .collect::<Result<Vec<_>, _>>()?;
                self.index(base, idx)?
            }
            Expr::Call(func, args) => {
                let args = args
                    .into_iter()
                    .map(|e| self.expr(e))
                    .collect::<Result<Vec<_>, _>>()?;
                self.call(&func, args)?
            }
            Expr::Unary { op, operand } => Expr::Unary {
                op,
                operand: Box::new(self.expr(*operand)?),
            },
            Expr::Binary { op, lhs, rhs } => Expr::Binary {
                op,
                lhs: Box::new(self.expr(*lhs)?),
                rhs: Box::new(self.expr(*rhs)?),
            },
            Expr::Compare { first, rest } => Expr::Compare {
                first: Box::new(self.expr(*first)?),
                rest: rest
                    .into_iter()
                    .map(|(op, e)| Ok((op, self.expr(e)?)))
                    .collect::<Result<_, TranslateError>>()?,
            },
            Expr::Ternary {
                cond,
                then,
                otherwise,
            } => Expr::Ternary {
                cond: Box::new(self.expr(*cond)?),
                then: Box::new(self.expr(*then)?),
                otherwise: Box::new(self.expr(*otherwise)?),
            },
            Expr::Paren(inner) => Expr::Paren(Box::new(self.expr(*inner)?)),
            other => other,
        })
    }

    fn name(&self, name: String) -> Result<Expr, TranslateError> {
        if self.is_variable(&name) {
            return Ok(Expr::Name(name));
        }
        if name == self.receiver {
            return Err(self.error(format!("'{}' can only be used for attribute access", name)));
        }
        if let Some(constant) = self
            .ctx
            .descriptor
            .inner()
            .constants
            .iter()
            .find(|c| c.name == name)
        {
            let ty = match constant.value {
                ConstValue::Bool(_) => Type::Bool,
                ConstValue::Int(_) => Type::Int,
                ConstValue::Real(_) => Type::Real,
            };
            return Ok(Expr::Const(name, ty));
        }
        match name.as_str() {
            "inf" => Ok(Expr::Real(f64::INFINITY)),
            "nan" => Ok(Expr::Real(f64::NAN)),
            _ => Err(self.error(format!("unknown name '{}'", name))),
        }
    }

    fn attribute(&self, expr: &Expr) -> Result<Expr, TranslateError> {
        let Some(path) = dotted(expr) else {
            return Err(self.error("attribute access is only supported on names"));
        };
        let head = path[0];
        if self.is_variable(head) {
            return Err(self.error(format!("attribute access on variable '{}'", head)));
        }

        if head == self.receiver {
            return self.model_path(&path[1..]);
        }
        if UTILITY_MODULES.contains(&head) && path.len() == 2 {
            return self.name(path[1].to_string());
        }
        let [_, field] = path.as_slice() else {
            return Err(self.error(format!("unsupported attribute path '{}'", path.join("."))));
        };
        if let Some((owner, group)) = self.bindings.get(head) {
            return self.field(owner, group, field);
        }
        match self.ctx.descriptor.shorthand(head) {
            Some((_, group, owner)) => self.field(&owner, group, field),
            None => Err(TranslateError::UnknownShorthand {
                routine: self.routine.clone(),
                shorthand: head.to_string(),
            }),
        }
    }

    /// `receiver.<path>` outside of calls
    fn model_path(&self, path: &[&str]) -> Result<Expr, TranslateError> {
        fn lookup(table: &[(&str, Type)], name: &str) -> Option<Type> {
            table.iter().find(|(n, _)| *n == name).map(|(_, ty)| *ty)
        }
        let numerical = self.ctx.descriptor.inner().numerical;
        match path {
            ["idx_sim"] => Ok(Expr::ModelVar {
                path: "idx_sim".to_string(),
                ty: Type::Usize,
            }),
            [holder @ ("numvars" | "numconsts"), name] if numerical => {
                let table = if *holder == "numvars" { NUMVARS } else { NUMCONSTS };
                match lookup(table, name) {
                    Some(ty) => Ok(Expr::ModelVar {
                        path: format!("{}.{}", holder, name),
                        ty,
                    }),
                    None => Err(self.error(format!("unknown attribute '{}.{}'", holder, name))),
                }
            }
            [family @ ("parameters" | "sequences"), category, field] => {
                let full = format!("{}.{}", family, category);
                match self.ctx.descriptor.group_named(&full) {
                    Some((info, group)) => self.field(&info.attr, group, field),
                    None => Err(TranslateError::UnknownShorthand {
                        routine: self.routine.clone(),
                        shorthand: full,
                    }),
                }
            }
            _ => Err(self.error(format!("unknown model attribute '{}'", path.join(".")))),
        }
    }

    fn field(&self, owner: &str, group: &Group, name: &str) -> Result<Expr, TranslateError> {
        let field_ref = |ty| FieldRef {
            owner: owner.to_string(),
            name: name.to_string(),
            ty,
        };
        if let Some(field) = group.fields.iter().find(|f| f.name == name) {
            return Ok(match (field.link, field.ndim) {
                (true, Ndim::D0) => Expr::Link {
                    field: field_ref(FieldType::Link(Ndim::D0)),
                    idx: None,
                },
                (true, ndim) => Expr::Field(field_ref(FieldType::Link(ndim))),
                (false, ndim) => Expr::Field(field_ref(FieldType::Value {
                    ty: element_type(field.kind),
                    rank: ndim.rank(),
                })),
            });
        }

        let is_meta = group.fields.iter().any(|f| {
            let base = format!("_{}_", f.name);
            (f.link && f.ndim == Ndim::D1 && name == format!("len_{}", f.name))
                || name == format!("{}ndim", base)
                || name == format!("{}length", base)
                || (0..f.ndim.rank()).any(|axis| name == format!("{}length_{}", base, axis))
        });
        if is_meta {
            return Ok(Expr::Field(field_ref(FieldType::Meta)));
        }
        Err(TranslateError::UnknownField {
            routine: self.routine.clone(),
            group: group.name.clone(),
            field: name.to_string(),
        })
    }

    fn index(&self, base: Expr, idx: Vec<Expr>) -> Result<Expr, TranslateError> {
        let is_zero = |idx: &[Expr]| matches!(idx, [Expr::Int(0)]);
        match base {
            Expr::Field(f) => match f.ty {
                FieldType::Value { rank, .. } if idx.len() <= rank => {
                    Ok(Expr::Index(Box::new(Expr::Field(f)), idx))
                }
                FieldType::Link(Ndim::D1) if idx.len() == 1 => {
                    let mut idx = idx;
                    Ok(Expr::Link {
                        field: f,
                        idx: idx.pop().map(Box::new),
                    })
                }
                _ => Err(self.error(format!("too many indices for field '{}'", f.name))),
            },
            Expr::Index(field, mut prev) => {
                let rank = match field.as_ref() {
                    Expr::Field(FieldRef {
                        ty: FieldType::Value { rank, .. },
                        ..
                    }) => *rank,
                    _ => 0,
                };
                if prev.len() + idx.len() > rank {
                    return Err(self.error("too many indices"));
                }
                prev.extend(idx);
                Ok(Expr::Index(field, prev))
            }
            link @ Expr::Link { .. } if is_zero(&idx) => Ok(link),
            _ => Err(self.error("only fields can be indexed")),
        }
    }

    fn call(&self, func: &Expr, args: Vec<Expr>) -> Result<Expr, TranslateError> {
        let path = dotted(func).unwrap_or_default();
        let builtin = match path.as_slice() {
            [name] if !self.is_variable(name) => Builtin::lookup(name),
            [module, name] if UTILITY_MODULES.contains(module) && !self.is_variable(module) => {
                Builtin::lookup(name)
            }
            [receiver, name] if *receiver == self.receiver => {
                if !self.ctx.callable.contains(*name) {
                    return Err(TranslateError::UnknownRoutine {
                        routine: self.routine.clone(),
                        callee: name.to_string(),
                    });
                }
                return Ok(Expr::MethodCall {
                    name: name.to_string(),
                    args,
                });
            }
            _ => None,
        };
        let Some(builtin) = builtin else {
            return Err(self.error(format!("unsupported call of '{}'", path.join("."))));
        };
        let (min, max) = builtin.arity();
        if args.len() < min || args.len() > max {
            return Err(self.error(format!(
                "wrong number of arguments for {:?}: {}",
                builtin,
                args.len()
            )));
        }
        Ok(Expr::Builtin(builtin, args))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Compound assignments
// ═══════════════════════════════════════════════════════════════════════════════

/// Rewrite `x op= rhs` into `x = x op (rhs)`
pub fn desugar(body: Vec<Stmt>) -> Vec<Stmt> {
    body.into_iter()
        .map(|stmt| match stmt {
            Stmt::AugAssign { target, op, value } => Stmt::Assign {
                value: Expr::binary(op, target.clone(), Expr::Paren(Box::new(value))),
                target,
            },
            Stmt::If {
                branches,
                otherwise,
            } => Stmt::If {
                branches: branches
                    .into_iter()
                    .map(|(cond, body)| (cond, desugar(body)))
                    .collect(),
                otherwise: desugar(otherwise),
            },
            Stmt::For {
                var,
                start,
                stop,
                step,
                body,
            } => Stmt::For {
                var,
                start,
                stop,
                step,
                body: desugar(body),
            },
            Stmt::While { cond, body } => Stmt::While {
                cond,
                body: desugar(body),
            },
            other => other,
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Type inference
// ═══════════════════════════════════════════════════════════════════════════════

/// Types of a routine's parameters and locals
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Types {
    /// Parameters after the receiver
    pub params: Vec<(String, Type)>,
    /// Assigned locals in order of first assignment
    pub locals: Vec<(String, Type)>,
    pub loop_vars: HashSet<String>,
    /// Parameters that are assigned to
    pub assigned_params: HashSet<String>,
    pub returns: bool,
}

/// Variable and callee types visible while typing expressions
pub struct Env<'a> {
    vars: HashMap<String, Type>,
    returns: &'a HashMap<String, bool>,
}

impl<'a> Env<'a> {
    pub fn new(types: &Types, returns: &'a HashMap<String, bool>) -> Self {
        let mut vars: HashMap<String, Type> = types.params.iter().cloned().collect();
        for var in &types.loop_vars {
            vars.insert(var.clone(), Type::Usize);
        }
        vars.extend(types.locals.iter().cloned());
        Self { vars, returns }
    }

    pub fn var(&self, name: &str) -> Type {
        self.vars.get(name).copied().unwrap_or(Type::IntLiteral)
    }

    /// Natural type of an expression
    pub fn type_of(&self, expr: &Expr) -> Type {
        match expr {
            Expr::Int(_) => Type::IntLiteral,
            Expr::Real(_) => Type::Real,
            Expr::Bool(_) => Type::Bool,
            Expr::Name(n) => self.var(n),
            Expr::Const(_, ty) | Expr::ModelVar { ty, .. } => *ty,
            Expr::Field(f) => match f.ty {
                FieldType::Value { ty, .. } => ty,
                FieldType::Link(_) => Type::Real,
                FieldType::Meta => Type::Usize,
            },
            Expr::Index(base, _) => self.type_of(base),
            Expr::Link { .. } => Type::Real,
            Expr::MethodCall { name, .. } => match self.returns.get(name) {
                Some(true) => Type::Real,
                _ => Type::Unit,
            },
            Expr::Builtin(builtin, args) => match builtin {
                Builtin::IsNan | Builtin::IsInf => Type::Bool,
                Builtin::Int => Type::Int,
                Builtin::Abs | Builtin::Max | Builtin::Min => args
                    .iter()
                    .map(|a| self.type_of(a))
                    .reduce(Type::join)
                    .unwrap_or(Type::Real),
                _ => Type::Real,
            },
            Expr::Unary { op, operand } => match (op, self.type_of(operand)) {
                (UnaryOp::Not, _) => Type::Bool,
                (UnaryOp::Neg, Type::Usize | Type::Bool) => Type::Int,
                (_, ty) => ty,
            },
            Expr::Binary { op, lhs, rhs } => match op {
                BinOp::And | BinOp::Or => Type::Bool,
                BinOp::Div => Type::Real,
                _ => match self.type_of(lhs).join(self.type_of(rhs)) {
                    Type::Bool => Type::Int,
                    ty => ty,
                },
            },
            Expr::Compare { .. } => Type::Bool,
            Expr::Ternary {
                then, otherwise, ..
            } => self.type_of(then).join(self.type_of(otherwise)),
            Expr::Paren(inner) => self.type_of(inner),
            Expr::Attr(..) | Expr::Call(..) => Type::Real,
        }
    }
}

/// Names whose value ends up in an index position of `expr`
fn index_names(expr: &Expr, out: &mut HashSet<String>) {
    match expr {
        Expr::Name(n) => {
            out.insert(n.clone());
        }
        Expr::Binary {
            op: BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::FloorDiv | BinOp::Mod,
            lhs,
            rhs,
        } => {
            index_names(lhs, out);
            index_names(rhs, out);
        }
        Expr::Unary {
            op: UnaryOp::Neg | UnaryOp::Pos,
            operand,
        } => index_names(operand, out),
        Expr::Paren(inner) => index_names(inner, out),
        Expr::Ternary {
            then, otherwise, ..
        } => {
            index_names(then, out);
            index_names(otherwise, out);
        }
        Expr::Builtin(Builtin::Max | Builtin::Min | Builtin::Abs, args) => {
            args.iter().for_each(|a| index_names(a, out))
        }
        _ => {}
    }
}

/// Infer parameter and local types
///
/// Loop counters, names used in index positions and names assigned from
/// index-typed values become `usize`. Other parameters are `f64`; other
/// locals take the common type of everything assigned to them, with bare
/// integer literals defaulting to `f64`.
pub fn infer(def: &FunctionDef, returns: &HashMap<String, bool>) -> Types {
    let params: Vec<String> = def.params.iter().skip(1).cloned().collect();
    let mut assigned: Vec<String> = Vec::new();
    let mut loop_vars = HashSet::new();
    let mut index = HashSet::new();
    let mut assignments: Vec<(String, Expr)> = Vec::new();

    for stmt in &def.body {
        stmt.walk(&mut |s| {
            match s {
                Stmt::Assign {
                    target: Expr::Name(n),
                    value,
                } => {
                    if !assigned.contains(n) {
                        assigned.push(n.clone());
                    }
                    assignments.push((n.clone(), value.clone()));
                }
                Stmt::For {
                    var,
                    start,
                    stop,
                    step,
                    ..
                } => {
                    loop_vars.insert(var.clone());
                    index.insert(var.clone());
                    for bound in start.iter().chain(Some(stop)).chain(step.iter()) {
                        index_names(bound, &mut index);
                    }
                }
                _ => {}
            }
            for expr in s.exprs() {
                expr.walk(&mut |e| match e {
                    Expr::Index(_, idx) => idx.iter().for_each(|i| index_names(i, &mut index)),
                    Expr::Link { idx: Some(i), .. } => index_names(i, &mut index),
                    _ => {}
                });
            }
        });
    }

    let assigned_params: HashSet<String> = assigned
        .iter()
        .filter(|n| params.contains(n))
        .cloned()
        .collect();
    let locals: Vec<String> = assigned
        .into_iter()
        .filter(|n| !params.contains(n))
        .collect();

    let snapshot = |index: &HashSet<String>, local_types: &HashMap<String, Type>| Types {
        params: params
            .iter()
            .map(|p| {
                let ty = if index.contains(p) { Type::Usize } else { Type::Real };
                (p.clone(), ty)
            })
            .collect(),
        locals: locals
            .iter()
            .filter_map(|n| local_types.get(n).map(|ty| (n.clone(), *ty)))
            .collect(),
        loop_vars: loop_vars.clone(),
        assigned_params: assigned_params.clone(),
        returns: def.returns_value(),
    };

    // Index-ness flows both ways through assignments
    let mut local_types: HashMap<String, Type> = HashMap::new();
    loop {
        for name in &index {
            if locals.contains(name) {
                local_types.insert(name.clone(), Type::Usize);
            }
        }
        let types = snapshot(&index, &local_types);
        let env = Env::new(&types, returns);
        let before = index.len();
        let mut found = HashSet::new();
        for (name, value) in &assignments {
            if index.contains(name) {
                index_names(value, &mut found);
            } else if env.type_of(value) == Type::Usize {
                found.insert(name.clone());
            }
        }
        index.extend(found);
        if index.len() == before {
            break;
        }
    }

    // Remaining locals take the join of their assigned values
    for _ in 0..=locals.len() {
        let types = snapshot(&index, &local_types);
        let env = Env::new(&types, returns);
        let mut next: HashMap<String, Type> = HashMap::new();
        for (name, value) in &assignments {
            if index.contains(name) || params.contains(name) {
                continue;
            }
            let ty = env.type_of(value);
            let joined = match next.get(name) {
                Some(prev) => prev.join(ty),
                None => ty,
            };
            next.insert(name.clone(), joined);
        }
        let changed = next
            .iter()
            .any(|(name, ty)| local_types.get(name) != Some(ty));
        local_types.retain(|name, _| index.contains(name));
        local_types.extend(next);
        if !changed {
            break;
        }
    }
    for name in &locals {
        let ty = local_types.entry(name.clone()).or_insert(Type::Real);
        if matches!(*ty, Type::IntLiteral | Type::Unit) {
            *ty = Type::Real;
        }
    }
    snapshot(&index, &local_types)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Routine properties
// ═══════════════════════════════════════════════════════════════════════════════

/// Whether the routine touches link or text fields
pub fn touches_shared(def: &FunctionDef) -> bool {
    let mut shared = false;
    for stmt in &def.body {
        stmt.walk(&mut |s| {
            for expr in s.exprs() {
                expr.walk(&mut |e| match e {
                    Expr::Link { .. } => shared = true,
                    Expr::Field(f) => {
                        if matches!(
                            f.ty,
                            FieldType::Link(_)
                                | FieldType::Value {
                                    ty: Type::Text,
                                    ..
                                }
                        ) {
                            shared = true;
                        }
                    }
                    _ => {}
                });
            }
        });
    }
    shared
}

/// Model routines called by the routine
pub fn callees(def: &FunctionDef) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for stmt in &def.body {
        stmt.walk(&mut |s| {
            for expr in s.exprs() {
                expr.walk(&mut |e| {
                    if let Expr::MethodCall { name, .. } = e {
                        names.insert(name.clone());
                    }
                });
            }
        });
    }
    names
}
