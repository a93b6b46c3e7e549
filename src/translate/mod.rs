//! Translation of user routines into `Model` methods
//!
//! Each routine passes through the same stages: [source] joins it into
//! logical lines, [parser] builds the syntax tree, [passes] resolves
//! shorthands, expands compound assignments and infers types, and [emit]
//! renders the method. Routines are translated as a set because calls
//! between them decide parameter types, return kinds and whether a
//! routine may run without the shared-state lock.

mod ast;
mod emit;
mod parser;
mod passes;
mod source;

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::{debug, info};

use crate::codegen::CodegenOptions;
use crate::descriptor::{RoutineSource, ValidatedDescriptor};
use crate::error::TranslateError;

use ast::FunctionDef;
use emit::{Emitter, Signature};
use passes::{callees, desugar, infer, resolve, touches_shared, Context, Types};

use parser::parse_routine;

/// Scaffolding methods of numerical models that routines may call
const NUMERIC_METHODS: &[&str] = &[
    "solve",
    "calculate_single_terms",
    "calculate_full_terms",
    "get_point_states",
    "set_point_states",
    "set_result_states",
    "get_sum_fluxes",
    "set_point_fluxes",
    "set_result_fluxes",
    "integrate_fluxes",
    "reset_sum_fluxes",
    "addup_fluxes",
    "calculate_error",
];

/// A user routine rendered as a `Model` method
#[derive(Debug, Clone, PartialEq)]
pub struct TranslatedRoutine {
    pub name: String,
    /// Touches no shared state, directly or through the routines it calls
    pub thread_release_safe: bool,
    pub code: String,
}

/// Translates the routines of one descriptor
pub struct FunctionTranslator<'a> {
    descriptor: &'a ValidatedDescriptor,
    options: CodegenOptions,
}

/// One routine after the resolving passes
struct Prepared {
    def: FunctionDef,
    types: Types,
}

impl<'a> FunctionTranslator<'a> {
    pub fn new(descriptor: &'a ValidatedDescriptor, options: CodegenOptions) -> Self {
        Self {
            descriptor,
            options,
        }
    }

    /// Translate every routine of the descriptor, in declaration order
    pub fn translate_all(&self) -> Result<Vec<TranslatedRoutine>, TranslateError> {
        let routines: Vec<&RoutineSource> = self.descriptor.inner().routines.iter().collect();
        let translated = self.translate_set(&routines)?;
        info!(
            model = %self.descriptor.name(),
            routines = translated.len(),
            "translated user routines"
        );
        Ok(translated)
    }

    /// Translate one routine in the context of the descriptor's others
    ///
    /// A descriptor routine of the same name is replaced by `routine`.
    pub fn translate(&self, routine: &RoutineSource) -> Result<TranslatedRoutine, TranslateError> {
        let mut routines: Vec<&RoutineSource> = self
            .descriptor
            .inner()
            .routines
            .iter()
            .filter(|r| r.name != routine.name)
            .collect();
        routines.push(routine);
        self.translate_set(&routines)?
            .into_iter()
            .find(|r| r.name == routine.name)
            .ok_or_else(|| TranslateError::syntax(&routine.name, 1, "routine was not translated"))
    }

    fn translate_set(
        &self,
        routines: &[&RoutineSource],
    ) -> Result<Vec<TranslatedRoutine>, TranslateError> {
        let mut parsed = Vec::with_capacity(routines.len());
        for routine in routines {
            let def = parse_routine(&routine.name, &routine.source)?;
            if def.name != routine.name {
                return Err(TranslateError::syntax(
                    &routine.name,
                    1,
                    format!("source defines '{}'", def.name),
                ));
            }
            parsed.push(def);
        }

        let callable = self.callable(routines);
        let ctx = Context {
            descriptor: self.descriptor,
            callable: &callable,
        };
        let returns: HashMap<String, bool> = parsed
            .iter()
            .map(|def| (def.name.clone(), def.returns_value()))
            .collect();

        let mut prepared = Vec::with_capacity(parsed.len());
        for def in parsed {
            let mut def = resolve(def, &ctx)?;
            def.body = desugar(def.body);
            let types = infer(&def, &returns);
            debug!(routine = %def.name, locals = types.locals.len(), "resolved routine");
            prepared.push(Prepared { def, types });
        }

        let signatures: HashMap<String, Signature> = prepared
            .iter()
            .map(|p| {
                let signature = Signature {
                    params: p.types.params.iter().map(|(_, ty)| *ty).collect(),
                    returns: p.types.returns,
                };
                (p.def.name.clone(), signature)
            })
            .collect();
        let safe = self.thread_release(&prepared);

        prepared
            .iter()
            .map(|p| {
                let name = p.def.name.as_str();
                let code = Emitter::new(name, &p.types, &returns, &signatures).function(&p.def)?;
                Ok(TranslatedRoutine {
                    name: name.to_string(),
                    thread_release_safe: safe.contains(name),
                    code,
                })
            })
            .collect()
    }

    /// Names a routine may call on its receiver
    fn callable(&self, routines: &[&RoutineSource]) -> HashSet<String> {
        let methods = &self.descriptor.inner().methods;
        let numerical = self.descriptor.inner().numerical;

        let mut callable: HashSet<String> = routines.iter().map(|r| r.name.clone()).collect();
        callable.insert("new2old".to_string());
        if numerical {
            callable.extend(NUMERIC_METHODS.iter().map(|m| m.to_string()));
            callable.insert("extrapolate_error".to_string());
        }
        if !numerical || !methods.run.is_empty() {
            callable.insert("run".to_string());
        }
        for (name, list) in [
            ("update_inlets", &methods.inlets),
            ("update_outlets", &methods.outlets),
            ("update_receivers", &methods.receivers),
            ("update_senders", &methods.senders),
        ] {
            if !list.is_empty() {
                callable.insert(name.to_string());
            }
        }
        callable
    }

    /// Routines that may run without the shared-state lock
    ///
    /// A routine qualifies when the build mode allows it, it does not touch
    /// links or text fields, and everything it calls qualifies as well.
    fn thread_release(&self, prepared: &[Prepared]) -> HashSet<String> {
        if !self.options.thread_release() {
            return HashSet::new();
        }
        let methods = &self.descriptor.inner().methods;
        let wrapped = |name: &str| -> Vec<String> {
            match name {
                "run" => methods.run.clone(),
                "update_inlets" => methods.inlets.clone(),
                "update_outlets" => methods.outlets.clone(),
                "update_receivers" => methods.receivers.clone(),
                "update_senders" => methods.senders.clone(),
                "calculate_single_terms" => methods.part_ode.clone(),
                "calculate_full_terms" => methods.full_ode.clone(),
                "solve" => methods
                    .part_ode
                    .iter()
                    .chain(&methods.full_ode)
                    .cloned()
                    .collect(),
                _ => Vec::new(),
            }
        };

        let deps: HashMap<&str, BTreeSet<String>> = prepared
            .iter()
            .map(|p| {
                let mut deps = BTreeSet::new();
                for callee in callees(&p.def) {
                    deps.extend(wrapped(callee.as_str()));
                    deps.insert(callee);
                }
                (p.def.name.as_str(), deps)
            })
            .collect();

        let mut safe: HashSet<String> = prepared
            .iter()
            .filter(|p| !touches_shared(&p.def))
            .map(|p| p.def.name.clone())
            .collect();
        loop {
            let demoted: Vec<String> = safe
                .iter()
                .filter(|name| {
                    deps.get(name.as_str()).is_some_and(|calls| {
                        calls
                            .iter()
                            .any(|d| deps.contains_key(d.as_str()) && !safe.contains(d))
                    })
                })
                .cloned()
                .collect();
            if demoted.is_empty() {
                break;
            }
            for name in demoted {
                safe.remove(&name);
            }
        }
        safe
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Field, ModelDescriptor, Ndim};

    fn descriptor() -> ValidatedDescriptor {
        ModelDescriptor::builder("test")
            .group("parameters.control", |g| g.field(Field::real("k", Ndim::D0)))
            .group("sequences.fluxes", |g| {
                g.field(Field::real("q", Ndim::D0)).field(Field::real("e", Ndim::D1))
            })
            .group("sequences.states", |g| g.field(Field::real("s", Ndim::D0)))
            .group("sequences.outlets", |g| g.field(Field::link("q", Ndim::D0)))
            .routine(
                "calc_q",
                "def calc_q(model):\n    con = model.parameters.control.fastaccess\n    flu = model.sequences.fluxes.fastaccess\n    old = model.sequences.states.fastaccess_old\n    flu.q = con.k * old.s\n    flu.q += model.weight(flu.q, 0)\n",
            )
            .routine(
                "weight",
                "def weight(model, x, idx):\n    return x * model.sequences.fluxes.e[idx]\n",
            )
            .routine("pass_q", "def pass_q(model):\n    out.q[0] = flu.q\n")
            .run(&["calc_q"])
            .outlets(&["pass_q"])
            .build()
            .validate()
            .unwrap()
    }

    #[test]
    fn test_compound_assignment_is_desugared() {
        let routine = FunctionTranslator::new(&descriptor(), CodegenOptions::performance())
            .translate(&RoutineSource {
                name: "calc_x".into(),
                source: "def calc_x(model, a, b):\n    x = 0.0\n    x += a*b\n    flu.q = x\n".into(),
            })
            .unwrap();
        assert!(routine.code.contains("x = x + (a*b);"));
        assert!(!routine.code.contains("+="));
    }

    #[test]
    fn test_signatures_follow_callers() {
        let routines = FunctionTranslator::new(&descriptor(), CodegenOptions::performance())
            .translate_all()
            .unwrap();
        let weight = routines.iter().find(|r| r.name == "weight").unwrap();
        assert!(weight
            .code
            .contains("pub fn weight(&mut self, x: f64, idx: usize) -> f64 {"));
        let calc_q = routines.iter().find(|r| r.name == "calc_q").unwrap();
        assert!(calc_q.code.contains(
            "self.fluxes.q = self.fluxes.q + (self.weight(self.fluxes.q, 0));"
        ));
        assert!(calc_q.code.contains("self.fluxes.q = self.control.k*self.old_states.s;"));
    }

    #[test]
    fn test_thread_release_excludes_links_and_safety_mode() {
        let descriptor = descriptor();
        let routines = FunctionTranslator::new(&descriptor, CodegenOptions::performance())
            .translate_all()
            .unwrap();
        let safe = |name: &str| {
            routines
                .iter()
                .find(|r| r.name == name)
                .unwrap()
                .thread_release_safe
        };
        assert!(safe("calc_q"));
        assert!(safe("weight"));
        assert!(!safe("pass_q"));

        let routines = FunctionTranslator::new(&descriptor, CodegenOptions::safety())
            .translate_all()
            .unwrap();
        assert!(routines.iter().all(|r| !r.thread_release_safe));
    }

    #[test]
    fn test_callers_inherit_unsafe_callees() {
        let routine = FunctionTranslator::new(&descriptor(), CodegenOptions::performance())
            .translate(&RoutineSource {
                name: "calc_x".into(),
                source: "def calc_x(model):\n    model.pass_q()\n".into(),
            })
            .unwrap();
        assert!(!routine.thread_release_safe);
        assert!(routine.code.contains("self.pass_q();"));
    }

    #[test]
    fn test_errors_name_the_routine() {
        let descriptor = descriptor();
        let translator = FunctionTranslator::new(&descriptor, CodegenOptions::performance());
        let err = translator
            .translate(&RoutineSource {
                name: "calc_x".into(),
                source: "def calc_x(model):\n    xyz.q = 1\n".into(),
            })
            .unwrap_err();
        assert!(matches!(
            err,
            TranslateError::UnknownShorthand { ref routine, ref shorthand }
                if routine == "calc_x" && shorthand == "xyz"
        ));

        let err = translator
            .translate(&RoutineSource {
                name: "calc_x".into(),
                source: "def calc_x(model):\n    model.missing()\n".into(),
            })
            .unwrap_err();
        assert!(matches!(err, TranslateError::UnknownRoutine { ref callee, .. } if callee == "missing"));

        let err = translator
            .translate(&RoutineSource {
                name: "calc_x".into(),
                source: "def other(model):\n    pass\n".into(),
            })
            .unwrap_err();
        assert!(matches!(err, TranslateError::Syntax { .. }));
    }
}
