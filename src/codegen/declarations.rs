use crate::codegen::{
    allocate, const_literal, numeric_fields, scalar_type, storage_type, Lines,
};
use crate::descriptor::{Constant, ElementKind, Field, Group, GroupInfo, GroupKind};

pub(crate) fn constants(constants: &[Constant]) -> Lines {
    let mut lines = Lines::new();
    for constant in constants {
        let (ty, value) = const_literal(constant.value);
        lines.add(0, format!("pub const {}: {} = {};", constant.name, ty, value));
    }
    lines
}

/// Struct declaration of one group with all companion fields
pub(crate) fn group_struct(info: &GroupInfo, group: &Group, numerical: bool) -> Lines {
    let numerics = if numerical {
        numeric_fields(info, &group.fields)
    } else {
        Vec::new()
    };

    let mut lines = Lines::new();
    lines.add(0, "#[derive(Debug, Default)]");
    lines.add(0, format!("pub struct {} {{", info.struct_name));
    for field in &group.fields {
        let rank = field.ndim.rank();
        let name = &field.name;
        if info.kind == GroupKind::Parameters {
            lines.add(
                1,
                format!("pub {}: {},", name, storage_type(scalar_type(field.kind), rank)),
            );
            continue;
        }

        if field.link {
            if rank == 0 {
                lines.add(1, format!("pub {}: LinkPointer,", name));
            } else {
                lines.add(1, format!("pub {}: LinkSlots,", name));
                lines.add(1, format!("pub len_{}: usize,", name));
            }
        } else {
            lines.add(1, format!("pub {}: {},", name, storage_type("f64", rank)));
        }
        lines.add(1, format!("pub _{}_ndim: usize,", name));
        lines.add(1, format!("pub _{}_length: usize,", name));
        for axis in 0..rank {
            lines.add(1, format!("pub _{}_length_{}: usize,", name, axis));
        }

        if numerics.iter().any(|f| f.name == *name) {
            lines.add(1, format!("pub _{}_points: {},", name, storage_type("f64", rank + 1)));
            lines.add(1, format!("pub _{}_results: {},", name, storage_type("f64", rank + 1)));
            if info.kind == GroupKind::Fluxes {
                lines.add(1, format!("pub _{}_sum: {},", name, storage_type("f64", rank)));
            }
        }

        if field.persistent {
            lines.add(1, format!("pub _{}_diskflag: bool,", name));
            lines.add(1, format!("pub _{}_path: String,", name));
            lines.add(1, format!("pub _{}_file: Option<SequenceFile>,", name));
            lines.add(1, format!("pub _{}_ramflag: bool,", name));
            lines.add(1, format!("pub _{}_array: {},", name, storage_type("f64", rank + 1)));
        }
    }
    lines.add(0, "}");
    lines
}

fn shape_pattern(rank: usize) -> (String, Vec<String>) {
    let dims: Vec<String> = (0..rank).map(|axis| format!("n{}", axis)).collect();
    (format!("&[{}]", dims.join(", ")), dims)
}

fn shape_arm(info: &GroupInfo, field: &Field) -> Lines {
    let rank = field.ndim.rank();
    let name = &field.name;
    let (pattern, dims) = shape_pattern(rank);

    let mut body = Lines::new();
    if info.kind == GroupKind::Parameters {
        if rank > 0 {
            body.add(
                0,
                format!("self.{} = {};", name, allocate(scalar_type(field.kind), &dims)),
            );
        }
    } else {
        if field.link {
            if rank == 1 {
                body.add(0, format!("self.{}.alloc(n0);", name));
                body.add(0, format!("self.len_{} = n0;", name));
            }
        } else {
            body.add(0, format!("self.{} = {};", name, allocate("f64", &dims)));
        }
        body.add(0, format!("self._{}_ndim = {};", name, rank));
        let length = if dims.is_empty() {
            "1".to_string()
        } else {
            dims.join(" * ")
        };
        body.add(0, format!("self._{}_length = {};", name, length));
        for (axis, dim) in dims.iter().enumerate() {
            body.add(0, format!("self._{}_length_{} = {};", name, axis, dim));
        }
    }

    let mut lines = Lines::new();
    lines.add(0, format!("(\"{}\", {}) => {{", name, pattern));
    lines.extend(1, body);
    lines.add(0, "}");
    lines
}

/// `set_shape` plus, for input and output groups, the buffering mode switches
pub(crate) fn lifecycle(info: &GroupInfo, group: &Group) -> Lines {
    let mut lines = Lines::new();
    lines.add(0, "/// Set the shape of a field and allocate its storage");
    lines.add(
        0,
        "pub fn set_shape(&mut self, name: &str, shape: &[usize]) -> io::Result<()> {",
    );
    lines.add(1, "match (name, shape) {");
    for field in &group.fields {
        lines.extend(2, shape_arm(info, field));
    }
    lines.add(2, "_ => return Err(shape_error(name, shape)),");
    lines.add(1, "}");
    lines.add(1, "Ok(())");
    lines.add(0, "}");

    if !info.kind.is_io() {
        return lines;
    }
    let persistent: Vec<&Field> = group.fields.iter().filter(|f| f.persistent).collect();

    lines.blank();
    lines.add(0, "/// Buffer a persistent field in memory for `nmb_steps` steps");
    lines.add(
        0,
        "pub fn activate_ram(&mut self, name: &str, nmb_steps: usize) -> io::Result<()> {",
    );
    mode_switch(&mut lines, &persistent, |field| {
        let name = &field.name;
        let mut dims = vec!["nmb_steps".to_string()];
        dims.extend((0..field.ndim.rank()).map(|axis| format!("self._{}_length_{}", name, axis)));
        vec![
            format!("self._{}_diskflag = false;", name),
            format!("self._{}_ramflag = true;", name),
            format!("self._{}_array = {};", name, allocate("f64", &dims)),
        ]
    });

    lines.blank();
    lines.add(0, "/// Read and write a persistent field through the file at `path`");
    lines.add(
        0,
        "pub fn activate_disk(&mut self, name: &str, path: &str) -> io::Result<()> {",
    );
    mode_switch(&mut lines, &persistent, |field| {
        let name = &field.name;
        vec![
            format!("self._{}_ramflag = false;", name),
            format!("self._{}_diskflag = true;", name),
            format!("self._{}_path = path.to_string();", name),
            format!("self._{}_array = Default::default();", name),
        ]
    });

    lines.blank();
    lines.add(0, "pub fn deactivate(&mut self, name: &str) -> io::Result<()> {");
    mode_switch(&mut lines, &persistent, |field| {
        let name = &field.name;
        vec![
            format!("self._{}_ramflag = false;", name),
            format!("self._{}_diskflag = false;", name),
            format!("self._{}_file = None;", name),
            format!("self._{}_array = Default::default();", name),
        ]
    });
    lines
}

/// Addresses of a group's values, for the host and for link targets
///
/// Array fields hand out the address of their first element, which stays
/// valid until the next `set_shape` of that field. Sequence values are
/// always `f64`; parameters also expose their integer and boolean fields.
pub(crate) fn field_pointers(info: &GroupInfo, group: &Group) -> Lines {
    let values: Vec<&Field> = group.fields.iter().filter(|f| !f.link).collect();
    let of_kind = |kind: ElementKind| -> Vec<&Field> {
        values
            .iter()
            .copied()
            .filter(|f| info.kind != GroupKind::Parameters || f.kind == kind)
            .collect()
    };

    let mut lines = Lines::new();
    pointer_accessor(&mut lines, "field_ptr", "f64", &of_kind(ElementKind::Real));
    if info.kind == GroupKind::Parameters {
        lines.blank();
        pointer_accessor(&mut lines, "int_field_ptr", "i64", &of_kind(ElementKind::Integer));
        lines.blank();
        pointer_accessor(&mut lines, "bool_field_ptr", "bool", &of_kind(ElementKind::Boolean));
    }
    lines
}

fn pointer_accessor(lines: &mut Lines, method: &str, scalar: &str, fields: &[&Field]) {
    lines.add(
        0,
        format!("pub fn {}(&mut self, name: &str) -> io::Result<*mut {}> {{", method, scalar),
    );
    lines.add(1, "match name {");
    for field in fields {
        let address = if field.ndim.rank() == 0 {
            format!("&mut self.{} as *mut {}", field.name, scalar)
        } else {
            format!("self.{}.as_mut_ptr()", field.name)
        };
        lines.add(2, format!("\"{}\" => Ok({}),", field.name, address));
    }
    lines.add(2, format!("_ => Err(unknown_name(\"{} field\", name)),", scalar));
    lines.add(1, "}");
    lines.add(0, "}");
}

fn mode_switch(lines: &mut Lines, fields: &[&Field], arm: impl Fn(&Field) -> Vec<String>) {
    lines.add(1, "match name {");
    for field in fields {
        lines.add(2, format!("\"{}\" => {{", field.name));
        for statement in arm(field) {
            lines.add(3, statement);
        }
        lines.add(2, "}");
    }
    lines.add(2, "_ => return Err(unknown_name(\"persistent field\", name)),");
    lines.add(1, "}");
    lines.add(1, "Ok(())");
    lines.add(0, "}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{ConstValue, ModelDescriptor, Ndim};

    #[test]
    fn test_constants() {
        let lines = constants(&[
            Constant {
                name: "FIELD".into(),
                value: ConstValue::Int(1),
            },
            Constant {
                name: "RHO".into(),
                value: ConstValue::Real(1000.0),
            },
        ]);
        assert_eq!(
            lines.render(),
            "pub const FIELD: i64 = 1;\npub const RHO: f64 = 1000.0;\n"
        );
    }

    #[test]
    fn test_one_declaration_per_field_with_matching_rank() {
        let validated = ModelDescriptor::builder("m")
            .group("sequences.fluxes", |g| {
                g.field(Field::real("a", Ndim::D0))
                    .field(Field::real("b", Ndim::D1))
                    .field(Field::real("c", Ndim::D2))
                    .field(Field::real("d", Ndim::D3))
            })
            .build()
            .validate()
            .unwrap();
        let (info, group) = validated.groups().next().unwrap();
        let text = group_struct(info, group, false).render();

        assert!(text.contains("pub a: f64,"));
        assert!(text.contains("pub b: Array1<f64>,"));
        assert!(text.contains("pub c: Array2<f64>,"));
        assert!(text.contains("pub d: Array3<f64>,"));
        assert!(text.contains("pub _d_length_2: usize,"));
        assert!(!text.contains("_d_length_3"));
        assert!(!text.contains("_points"));
    }

    #[test]
    fn test_link_declarations() {
        let validated = ModelDescriptor::builder("m")
            .group("sequences.inlets", |g| {
                g.field(Field::link("q", Ndim::D1))
                    .field(Field::link("t", Ndim::D0))
            })
            .build()
            .validate()
            .unwrap();
        let (info, group) = validated.groups().next().unwrap();
        let text = group_struct(info, group, false).render();

        assert!(text.contains("pub struct InletsSequences {"));
        assert!(text.contains("pub q: LinkSlots,"));
        assert!(text.contains("pub len_q: usize,"));
        assert!(text.contains("pub t: LinkPointer,"));
        assert!(!text.contains("len_t"));

        let text = lifecycle(info, group).render();
        assert!(text.contains("(\"q\", &[n0]) => {"));
        assert!(text.contains("self.q.alloc(n0);"));
        assert!(!text.contains("activate_ram"));
    }

    #[test]
    fn test_persistent_companions() {
        let validated = ModelDescriptor::builder("m")
            .group("sequences.states", |g| {
                g.field(Field::real("sm", Ndim::D2).persistent())
            })
            .build()
            .validate()
            .unwrap();
        let (info, group) = validated.groups().next().unwrap();
        let text = group_struct(info, group, false).render();
        assert!(text.contains("pub _sm_file: Option<SequenceFile>,"));
        assert!(text.contains("pub _sm_array: Array3<f64>,"));

        let text = lifecycle(info, group).render();
        assert!(text.contains(
            "self._sm_array = Array3::<f64>::default((nmb_steps, self._sm_length_0, self._sm_length_1));"
        ));
        assert!(text.contains("self._sm_length = n0 * n1;"));
    }

    #[test]
    fn test_field_pointers() {
        let validated = ModelDescriptor::builder("m")
            .group("parameters.control", |g| {
                g.field(Field::integer("nhru", Ndim::D0))
                    .field(Field::real("fk", Ndim::D1))
                    .field(Field::boolean("frozen", Ndim::D0))
            })
            .group("sequences.inlets", |g| g.field(Field::link("q", Ndim::D1)))
            .group("sequences.states", |g| g.field(Field::real("s", Ndim::D0)))
            .build()
            .validate()
            .unwrap();
        let mut groups = validated.groups();

        let (info, group) = groups.next().unwrap();
        let text = field_pointers(info, group).render();
        assert!(text.contains("\"fk\" => Ok(self.fk.as_mut_ptr()),"));
        assert!(text.contains("\"nhru\" => Ok(&mut self.nhru as *mut i64),"));
        assert!(text.contains("\"frozen\" => Ok(&mut self.frozen as *mut bool),"));
        assert!(!text.contains("\"nhru\" => Ok(&mut self.nhru as *mut f64)"));

        let (info, group) = groups.next().unwrap();
        let text = field_pointers(info, group).render();
        assert!(!text.contains("\"q\""));
        assert!(!text.contains("int_field_ptr"));

        let (info, group) = groups.next().unwrap();
        let text = field_pointers(info, group).render();
        assert!(text.contains("\"s\" => Ok(&mut self.s as *mut f64),"));
    }
}
