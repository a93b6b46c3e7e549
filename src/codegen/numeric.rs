//! Scaffolding of the embedded explicit multi-stage solver
//!
//! Every routine here is emitted once per model and repeats the same
//! per-field pattern for each numeric flux or state field, specialized by
//! the field's dimensionality. `solve` composes them with the user's
//! `calculate_single_terms` and `calculate_full_terms` routines.

use crate::codegen::{
    allocate, loop_vars, nested_loops, numeric_fields, Access, Lines,
};
use crate::descriptor::{Field, Group, GroupInfo, GroupKind, ValidatedDescriptor};
use crate::translate::TranslatedRoutine;

pub(crate) fn has_numerics(info: &GroupInfo, group: &Group) -> bool {
    !numeric_fields(info, &group.fields).is_empty()
}

/// `prepare_numerics` of a flux or state group
pub(crate) fn prepare(info: &GroupInfo, group: &Group) -> Lines {
    let mut lines = Lines::new();
    lines.add(0, "/// Size the stage, method and sum buffers of all numeric fields");
    lines.add(
        0,
        "pub fn prepare_numerics(&mut self, nmb_stages: usize, nmb_methods: usize) {",
    );
    for field in numeric_fields(info, &group.fields) {
        let name = &field.name;
        let lengths: Vec<String> = (0..field.ndim.rank())
            .map(|axis| format!("self._{}_length_{}", name, axis))
            .collect();
        let with = |first: &str| {
            let mut dims = vec![first.to_string()];
            dims.extend(lengths.iter().cloned());
            dims
        };
        lines.add(
            1,
            format!("self._{}_points = {};", name, allocate("f64", &with("nmb_stages"))),
        );
        lines.add(
            1,
            format!(
                "self._{}_results = {};",
                name,
                allocate("f64", &with("nmb_methods + 1"))
            ),
        );
        if info.kind == GroupKind::Fluxes {
            lines.add(1, format!("self._{}_sum = {};", name, allocate("f64", &lengths)));
        }
    }
    lines.add(0, "}");
    lines
}

/// Numeric fields of the model's fluxes and states
struct Numerics<'d> {
    fluxes: Vec<&'d Field>,
    states: Vec<&'d Field>,
}

impl<'d> Numerics<'d> {
    fn of(descriptor: &'d ValidatedDescriptor) -> Self {
        let collect = |kind: GroupKind| {
            descriptor
                .io_group(kind)
                .map(|(info, group)| numeric_fields(info, &group.fields))
                .unwrap_or_default()
        };
        Self {
            fluxes: collect(GroupKind::Fluxes),
            states: collect(GroupKind::States),
        }
    }
}

/// Element-wise copy between a field and one slot of its buffer
fn assign_values(
    access: &Access,
    owner: &str,
    fields: &[&Field],
    target: &str,
    index: Option<&str>,
    load: bool,
) -> Lines {
    let mut lines = Lines::new();
    for field in fields {
        let name = &field.name;
        let vars = loop_vars("idx", field.ndim.rank());
        let mut buffer_idx: Vec<String> = index.iter().map(|i| i.to_string()).collect();
        buffer_idx.extend(vars.iter().cloned());

        let value = format!("{}.{}", owner, name);
        let buffer = format!("{}._{}_{}", owner, name, target);
        let statement = if load {
            access.write(&value, &vars, &access.read(&buffer, &buffer_idx))
        } else {
            access.write(&buffer, &buffer_idx, &access.read(&value, &vars))
        };
        let mut body = Lines::new();
        body.add(0, statement);
        lines.extend(0, nested_loops(owner, name, &vars, body));
    }
    lines
}

fn method(name: &str, prelude: &[&str], body: Lines) -> Lines {
    let mut lines = Lines::new();
    lines.add(0, format!("pub fn {}(&mut self) {{", name));
    for statement in prelude {
        lines.add(1, statement);
    }
    lines.extend(1, body);
    lines.add(0, "}");
    lines
}

const IDX_STAGE: &str = "let idx_stage = self.numvars.idx_stage;";
const IDX_METHOD: &str = "let idx_method = self.numvars.idx_method;";

/// All numeric routines of the `Model`
pub(crate) fn routines(
    descriptor: &ValidatedDescriptor,
    access: &Access,
    translated: &[TranslatedRoutine],
) -> Lines {
    let numerics = Numerics::of(descriptor);
    let fluxes = "self.fluxes";
    let states = "self.states";

    let mut lines = Lines::new();
    lines.extend(0, solve());

    let copies: [(&str, &str, &[&Field], &str, Option<&str>, bool, &[&str]); 6] = [
        ("get_point_states", states, &numerics.states[..], "points", Some("idx_stage"), true, &[IDX_STAGE]),
        ("set_point_states", states, &numerics.states[..], "points", Some("idx_stage"), false, &[IDX_STAGE]),
        ("set_result_states", states, &numerics.states[..], "results", Some("idx_method"), false, &[IDX_METHOD]),
        ("get_sum_fluxes", fluxes, &numerics.fluxes[..], "sum", None, true, &[]),
        ("set_point_fluxes", fluxes, &numerics.fluxes[..], "points", Some("idx_stage"), false, &[IDX_STAGE]),
        ("set_result_fluxes", fluxes, &numerics.fluxes[..], "results", Some("idx_method"), false, &[IDX_METHOD]),
    ];
    for (name, owner, fields, target, index, load, prelude) in copies {
        let prelude: &[&str] = if fields.is_empty() { &[] } else { prelude };
        lines.blank();
        lines.extend(
            0,
            method(name, prelude, assign_values(access, owner, fields, target, index, load)),
        );
    }

    lines.blank();
    lines.extend(0, integrate_fluxes(access, &numerics.fluxes));
    lines.blank();
    lines.extend(0, reset_sum_fluxes(access, &numerics.fluxes));
    lines.blank();
    lines.extend(0, addup_fluxes(access, &numerics.fluxes));
    lines.blank();
    lines.extend(0, calculate_error(access, &numerics.fluxes));

    if !translated.iter().any(|r| r.name == "extrapolate_error") {
        lines.blank();
        lines.add(0, "pub fn extrapolate_error(&mut self) {}");
    }
    lines
}

fn integrate_fluxes(access: &Access, fields: &[&Field]) -> Lines {
    let mut body = Lines::new();
    for field in fields {
        let name = &field.name;
        let vars = loop_vars("idx", field.ndim.rank());
        let value = format!("self.fluxes.{}", name);
        let mut point_idx = vec!["jdx".to_string()];
        point_idx.extend(vars.iter().cloned());
        let coef = access.read(
            "self.numconsts.a_coefs",
            &["idx_method - 1".into(), "idx_stage".into(), "jdx".into()],
        );
        let points = access.read(&format!("self.fluxes._{}_points", name), &point_idx);

        let mut inner = Lines::new();
        inner.add(0, access.write(&value, &vars, "0.0"));
        inner.add(0, "for jdx in 0..idx_method {");
        inner.add(
            1,
            access.write(
                &value,
                &vars,
                &format!("{} + dt * {} * {}", access.read(&value, &vars), coef, points),
            ),
        );
        inner.add(0, "}");
        body.extend(0, nested_loops("self.fluxes", name, &vars, inner));
    }
    let prelude: &[&str] = if fields.is_empty() {
        &[]
    } else {
        &[IDX_METHOD, IDX_STAGE, "let dt = self.numvars.dt;"]
    };
    method("integrate_fluxes", prelude, body)
}

fn reset_sum_fluxes(access: &Access, fields: &[&Field]) -> Lines {
    let mut body = Lines::new();
    for field in fields {
        let vars = loop_vars("idx", field.ndim.rank());
        let mut inner = Lines::new();
        inner.add(0, access.write(&format!("self.fluxes._{}_sum", field.name), &vars, "0.0"));
        body.extend(0, nested_loops("self.fluxes", &field.name, &vars, inner));
    }
    method("reset_sum_fluxes", &[], body)
}

fn addup_fluxes(access: &Access, fields: &[&Field]) -> Lines {
    let mut body = Lines::new();
    for field in fields {
        let vars = loop_vars("idx", field.ndim.rank());
        let sum = format!("self.fluxes._{}_sum", field.name);
        let value = format!("self.fluxes.{}", field.name);
        let mut inner = Lines::new();
        inner.add(
            0,
            access.write(
                &sum,
                &vars,
                &format!("{} + {}", access.read(&sum, &vars), access.read(&value, &vars)),
            ),
        );
        body.extend(0, nested_loops("self.fluxes", &field.name, &vars, inner));
    }
    method("addup_fluxes", &[], body)
}

/// Largest absolute difference between the results of the current and the
/// previous method, over every element of every numeric flux field
fn calculate_error(access: &Access, fields: &[&Field]) -> Lines {
    let mut body = Lines::new();
    body.add(0, "self.numvars.reset_error();");
    for field in fields {
        let vars = loop_vars("idx", field.ndim.rank());
        let results = format!("self.fluxes._{}_results", field.name);
        let mut current = vec!["idx_method".to_string()];
        current.extend(vars.iter().cloned());
        let mut previous = vec!["idx_method - 1".to_string()];
        previous.extend(vars.iter().cloned());

        let mut inner = Lines::new();
        inner.add(
            0,
            access.wrap(format!(
                "self.numvars.update_error({}, {});",
                access.read(&results, &current),
                access.read(&results, &previous)
            )),
        );
        body.extend(0, nested_loops("self.fluxes", &field.name, &vars, inner));
    }
    let prelude: &[&str] = if fields.is_empty() { &[] } else { &[IDX_METHOD] };
    method("calculate_error", prelude, body)
}

/// Adaptive step over one simulation step, `t` running from 0 to 1
fn solve() -> Lines {
    const SOLVE: &str = r#"pub fn solve(&mut self) {
    self.numvars.t0 = 0.0;
    self.numvars.t1 = 1.0;
    self.numvars.dt_est = 1.0;
    self.numvars.f0_ready = false;
    self.reset_sum_fluxes();
    while self.numvars.t0 < self.numvars.t1 - 1e-14 {
        self.numvars.last_error = f64::INFINITY;
        self.numvars.dt = f64::min(
            self.numvars.t1 - self.numvars.t0,
            f64::max(self.numvars.dt_est, self.numconsts.dt_min),
        );
        if !self.numvars.f0_ready {
            self.calculate_single_terms();
            self.numvars.idx_method = 0;
            self.numvars.idx_stage = 0;
            self.set_point_fluxes();
            self.set_point_states();
            self.set_result_states();
        }
        let nmb_methods = self.numconsts.nmb_methods;
        for idx_method in 1..=nmb_methods {
            self.numvars.idx_method = idx_method;
            for idx_stage in 1..idx_method {
                self.numvars.idx_stage = idx_stage;
                self.get_point_states();
                self.calculate_single_terms();
                self.set_point_fluxes();
            }
            for idx_stage in 1..=idx_method {
                self.numvars.idx_stage = idx_stage;
                self.integrate_fluxes();
                self.calculate_full_terms();
                self.set_point_states();
            }
            self.set_result_fluxes();
            self.set_result_states();
            self.calculate_error();
            self.extrapolate_error();
            if idx_method == 1 {
                continue;
            }
            let accept = self.numvars.error <= self.numconsts.abs_error_max;
            let reducible = self.numvars.dt > self.numconsts.dt_min;
            if accept {
                self.numvars.dt_est = self.numconsts.dt_increase * self.numvars.dt;
            } else if reducible
                && (self.numvars.extrapolated_error > self.numconsts.abs_error_max
                    || idx_method == nmb_methods)
            {
                self.numvars.f0_ready = true;
                self.numvars.dt_est = self.numvars.dt / self.numconsts.dt_decrease;
                break;
            } else if idx_method < nmb_methods {
                self.numvars.last_error = self.numvars.error;
                continue;
            }
            self.numvars.f0_ready = false;
            self.addup_fluxes();
            self.numvars.t0 = self.numvars.t0 + self.numvars.dt;
            self.new2old();
            break;
        }
    }
    self.get_sum_fluxes();
}"#;
    let mut lines = Lines::new();
    lines.add(0, SOLVE);
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::CodegenOptions;
    use crate::descriptor::{ModelDescriptor, Ndim};

    fn descriptor() -> ValidatedDescriptor {
        ModelDescriptor::builder("m")
            .group("sequences.fluxes", |g| {
                g.field(Field::real("q", Ndim::D0).numeric())
                    .field(Field::real("e", Ndim::D1).numeric())
                    .field(Field::real("aux", Ndim::D0))
            })
            .group("sequences.states", |g| g.field(Field::real("s", Ndim::D1).numeric()))
            .routine("calc_q", "def calc_q(model):\n    pass\n")
            .routine("update_s", "def update_s(model):\n    pass\n")
            .numerical(&["calc_q"], &["update_s"])
            .build()
            .validate()
            .unwrap()
    }

    #[test]
    fn test_error_covers_every_numeric_flux_element() {
        let text = routines(&descriptor(), &Access::new(CodegenOptions::safety()), &[]).render();
        assert!(text.contains(
            "self.numvars.update_error(self.fluxes._q_results[idx_method], self.fluxes._q_results[idx_method - 1]);"
        ));
        assert!(text.contains(
            "self.numvars.update_error(self.fluxes._e_results[[idx_method, idx0]], self.fluxes._e_results[[idx_method - 1, idx0]]);"
        ));
        assert!(!text.contains("_aux_"));
        assert!(text.contains("pub fn extrapolate_error(&mut self) {}"));
    }

    #[test]
    fn test_integration_uses_coefficients_of_current_method() {
        let text = routines(&descriptor(), &Access::new(CodegenOptions::safety()), &[]).render();
        assert!(text.contains(
            "self.fluxes.q = self.fluxes.q + dt * self.numconsts.a_coefs[[idx_method - 1, idx_stage, jdx]] * self.fluxes._q_points[jdx];"
        ));
        assert!(text.contains("self.states.s[idx0] = self.states._s_points[[idx_stage, idx0]];"));
    }

    #[test]
    fn test_user_extrapolation_is_not_shadowed() {
        let user = TranslatedRoutine {
            name: "extrapolate_error".into(),
            thread_release_safe: true,
            code: String::new(),
        };
        let text = routines(&descriptor(), &Access::new(CodegenOptions::safety()), &[user]).render();
        assert!(!text.contains("pub fn extrapolate_error"));
    }

    #[test]
    fn test_prepare_sizes_buffers() {
        let validated = descriptor();
        let (info, group) = validated.io_group(GroupKind::Fluxes).unwrap();
        let text = prepare(info, group).render();
        assert!(text.contains("self._e_points = Array2::<f64>::default((nmb_stages, self._e_length_0));"));
        assert!(text.contains("self._q_results = Array1::<f64>::default(nmb_methods + 1);"));
        assert!(text.contains("self._q_sum = Default::default();"));
        assert!(!text.contains("_aux_"));
    }
}
