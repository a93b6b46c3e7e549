//! Source generation for compiled models
//!
//! [CodeGenerator] turns a [ValidatedDescriptor] into one Rust source unit:
//! plain data structs per group, the per-step I/O and link routines, the
//! adaptive solver scaffolding, translated user routines and the exported
//! C entry points. Output is deterministic for a given descriptor and
//! [CodegenOptions], which the build pipeline relies on.

mod access;
mod control;
mod declarations;
mod io;
mod lines;
mod links;
mod numeric;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::descriptor::{ConstValue, ElementKind, Field, GroupInfo, GroupKind, ValidatedDescriptor};
use crate::error::TranslateError;
use crate::translate::FunctionTranslator;

pub(crate) use access::Access;
pub use lines::Lines;

/// Routine names owned by the generator
pub const GENERATED_ROUTINES: &[&str] = &[
    "do_it",
    "open_files",
    "close_files",
    "load_data",
    "save_data",
    "new2old",
    "run",
    "update_inlets",
    "update_outlets",
    "update_receivers",
    "update_senders",
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
    "prepare_numerics",
    "set_shape",
    "activate_ram",
    "activate_disk",
    "deactivate",
    "alloc",
    "dealloc",
    "set_pointer0d",
    "set_pointer1d",
    "field_ptr",
    "int_field_ptr",
    "bool_field_ptr",
    "default",
];

// ═══════════════════════════════════════════════════════════════════════════════
// Options
// ═══════════════════════════════════════════════════════════════════════════════

/// Trade-off between raw speed and runtime checks in generated code
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    /// Unchecked element access, thread-release marking, no overflow checks
    #[default]
    Performance,
    /// Checked indexing and debug assertions, no thread-release marking
    Safety,
}

/// Configuration threaded through every emitter and the manifest writer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct CodegenOptions {
    pub mode: BuildMode,
}

impl CodegenOptions {
    pub fn performance() -> Self {
        Self {
            mode: BuildMode::Performance,
        }
    }

    pub fn safety() -> Self {
        Self {
            mode: BuildMode::Safety,
        }
    }

    /// Whether routines may be marked safe to run without external synchronization
    pub fn thread_release(&self) -> bool {
        self.mode == BuildMode::Performance
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Generated source unit
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Declaration,
    Routine,
}

/// One self-contained item (or group of items) of the generated unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceBlock {
    /// Group name, routine name, or one of `header`, `constants`, `model`,
    /// `numerics`, `ffi`
    pub origin: String,
    pub kind: BlockKind,
    pub text: String,
}

/// Ordered declaration and routine blocks of one model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedSource {
    pub model: String,
    pub blocks: Vec<SourceBlock>,
}

impl GeneratedSource {
    fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            blocks: Vec::new(),
        }
    }

    fn push(&mut self, origin: impl Into<String>, kind: BlockKind, lines: Lines) {
        if lines.is_empty() {
            return;
        }
        self.blocks.push(SourceBlock {
            origin: origin.into(),
            kind,
            text: lines.render(),
        });
    }

    /// Blocks derived from the given origin
    pub fn blocks_from<'a>(&'a self, origin: &'a str) -> impl Iterator<Item = &'a SourceBlock> {
        self.blocks.iter().filter(move |b| b.origin == origin)
    }

    /// The complete source file
    pub fn render(&self) -> String {
        self.blocks
            .iter()
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Generator
// ═══════════════════════════════════════════════════════════════════════════════

/// Composes all emitters into one [GeneratedSource]
pub struct CodeGenerator<'a> {
    descriptor: &'a ValidatedDescriptor,
    options: CodegenOptions,
}

impl<'a> CodeGenerator<'a> {
    pub fn new(descriptor: &'a ValidatedDescriptor, options: CodegenOptions) -> Self {
        Self {
            descriptor,
            options,
        }
    }

    pub fn generate(&self) -> Result<GeneratedSource, TranslateError> {
        let routines = FunctionTranslator::new(self.descriptor, self.options).translate_all()?;
        let access = Access::new(self.options);
        let numerical = self.descriptor.inner().numerical;

        let mut source = GeneratedSource::new(self.descriptor.name());
        source.push("header", BlockKind::Declaration, self.header());
        source.push(
            "constants",
            BlockKind::Declaration,
            declarations::constants(&self.descriptor.inner().constants),
        );

        for (info, group) in self.descriptor.groups() {
            source.push(
                &group.name,
                BlockKind::Declaration,
                declarations::group_struct(info, group, numerical),
            );

            let mut body = declarations::lifecycle(info, group);
            body.blank();
            body.extend(0, declarations::field_pointers(info, group));
            if info.kind.is_io() {
                body.blank();
                body.extend(0, io::routines(info, group, &access));
            }
            if info.kind == GroupKind::Link {
                body.blank();
                body.extend(0, links::routines(group));
            }
            if numerical && numeric::has_numerics(info, group) {
                body.blank();
                body.extend(0, numeric::prepare(info, group));
            }
            source.push(&group.name, BlockKind::Routine, impl_block(&info.struct_name, body));
            debug!(group = %group.name, "emitted group declarations");
        }

        source.push("model", BlockKind::Declaration, control::model_struct(self.descriptor));
        source.push(
            "model",
            BlockKind::Routine,
            impl_block("Model", control::standard_routines(self.descriptor, self.options)),
        );
        if numerical {
            source.push(
                "numerics",
                BlockKind::Routine,
                impl_block("Model", numeric::routines(self.descriptor, &access, &routines)),
            );
        }
        for routine in &routines {
            let mut lines = Lines::new();
            if routine.thread_release_safe {
                lines.add(0, "#[inline]");
            }
            lines.add(0, &routine.code);
            source.push(&routine.name, BlockKind::Routine, impl_block("Model", lines));
            debug!(routine = %routine.name, "emitted user routine");
        }
        source.push("ffi", BlockKind::Routine, control::exports(self.descriptor, self.options));
        Ok(source)
    }

    fn header(&self) -> Lines {
        let mut lines = Lines::new();
        lines.add(
            0,
            format!(
                "//! Compiled model `{}`, generated by hydrocomp. Do not edit.",
                self.descriptor.name()
            ),
        );
        lines.blank();
        lines.add(
            0,
            "#![allow(dead_code, unused_variables, unused_mut, unused_parens, unused_unsafe)]",
        );
        lines.add(
            0,
            "#![allow(unused_assignments, unused_imports, unreachable_code, non_snake_case, clippy::all)]",
        );
        lines.blank();
        lines.add(0, "use hydrocomp::runtime::prelude::*;");
        lines
    }
}

fn impl_block(type_name: &str, body: Lines) -> Lines {
    let mut lines = Lines::new();
    lines.add(0, format!("impl {} {{", type_name));
    lines.extend(1, body);
    lines.add(0, "}");
    lines
}

// ═══════════════════════════════════════════════════════════════════════════════
// Shared helpers
// ═══════════════════════════════════════════════════════════════════════════════

pub(crate) fn scalar_type(kind: ElementKind) -> &'static str {
    match kind {
        ElementKind::Boolean => "bool",
        ElementKind::Integer => "i64",
        ElementKind::Real => "f64",
        ElementKind::Text => "String",
    }
}

/// Storage type of `rank` axes holding `scalar`
pub(crate) fn storage_type(scalar: &str, rank: usize) -> String {
    match rank {
        0 => scalar.to_string(),
        _ => format!("Array{}<{}>", rank, scalar),
    }
}

/// Expression allocating default-filled storage of the given dimensions
pub(crate) fn allocate(scalar: &str, dims: &[String]) -> String {
    match dims {
        [] => "Default::default()".to_string(),
        [single] => format!("Array1::<{}>::default({})", scalar, single),
        _ => format!(
            "Array{}::<{}>::default(({}))",
            dims.len(),
            scalar,
            dims.join(", ")
        ),
    }
}

/// Names of the loop variables over `rank` axes
pub(crate) fn loop_vars(prefix: &str, rank: usize) -> Vec<String> {
    (0..rank).map(|axis| format!("{}{}", prefix, axis)).collect()
}

/// Wrap `body` into nested loops over the axis lengths of field `name` of `owner`
pub(crate) fn nested_loops(owner: &str, name: &str, vars: &[String], body: Lines) -> Lines {
    let mut lines = Lines::new();
    for (axis, var) in vars.iter().enumerate() {
        lines.add(
            axis,
            format!("for {} in 0..{}._{}_length_{} {{", var, owner, name, axis),
        );
    }
    lines.extend(vars.len(), body);
    for axis in (0..vars.len()).rev() {
        lines.add(axis, "}");
    }
    lines
}

pub(crate) fn real_literal(value: f64) -> String {
    if value.is_nan() {
        "f64::NAN".to_string()
    } else if value == f64::INFINITY {
        "f64::INFINITY".to_string()
    } else if value == f64::NEG_INFINITY {
        "f64::NEG_INFINITY".to_string()
    } else {
        format!("{:?}", value)
    }
}

pub(crate) fn const_literal(value: ConstValue) -> (&'static str, String) {
    match value {
        ConstValue::Bool(b) => ("bool", b.to_string()),
        ConstValue::Int(i) => ("i64", i.to_string()),
        ConstValue::Real(r) => ("f64", real_literal(r)),
    }
}

/// Fields of a group that take part in integration
pub(crate) fn numeric_fields<'g>(info: &GroupInfo, fields: &'g [Field]) -> Vec<&'g Field> {
    match info.kind {
        GroupKind::Fluxes | GroupKind::States => fields.iter().filter(|f| f.numeric).collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_real_literals() {
        assert_eq!(real_literal(0.5), "0.5");
        assert_eq!(real_literal(2.0), "2.0");
        assert_eq!(real_literal(f64::INFINITY), "f64::INFINITY");
        assert_eq!(real_literal(f64::NAN), "f64::NAN");
    }

    #[test]
    fn test_allocate_by_rank() {
        assert_eq!(allocate("f64", &[]), "Default::default()");
        assert_eq!(allocate("f64", &["n0".into()]), "Array1::<f64>::default(n0)");
        assert_eq!(
            allocate("i64", &["n0".into(), "n1".into()]),
            "Array2::<i64>::default((n0, n1))"
        );
    }

    #[test]
    fn test_nested_loops() {
        let mut body = Lines::new();
        body.add(0, "x[[jdx0, jdx1]] = 0.0;");
        let lines = nested_loops("self", "x", &loop_vars("jdx", 2), body);
        assert_eq!(
            lines.render(),
            "for jdx0 in 0..self._x_length_0 {\n    for jdx1 in 0..self._x_length_1 {\n        x[[jdx0, jdx1]] = 0.0;\n    }\n}\n"
        );
    }

    #[test]
    fn test_options_default_to_performance() {
        let options: CodegenOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options.mode, BuildMode::Performance);
        let options: CodegenOptions = serde_json::from_str(r#"{"mode": "safety"}"#).unwrap();
        assert!(!options.thread_release());
    }
}
