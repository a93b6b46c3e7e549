use crate::codegen::Lines;
use crate::descriptor::{Field, Group, Ndim};

/// Pointer installation and slot management of a link group
///
/// Every emitted routine only ever touches the handles; the values they
/// point to belong to other model instances and are never freed here.
pub(crate) fn routines(group: &Group) -> Lines {
    let scalars: Vec<&Field> = group.fields.iter().filter(|f| f.ndim == Ndim::D0).collect();
    let vectors: Vec<&Field> = group.fields.iter().filter(|f| f.ndim == Ndim::D1).collect();

    let mut lines = Lines::new();
    if !scalars.is_empty() {
        lines.add(0, "/// # Safety");
        lines.add(0, "///");
        lines.add(0, "/// `target` must outlive every later access through this model.");
        lines.add(
            0,
            "pub unsafe fn set_pointer0d(&mut self, name: &str, target: *mut f64) -> io::Result<()> {",
        );
        dispatch(&mut lines, &scalars, |name| {
            vec![format!("self.{}.set_pointer(target);", name)]
        });
    }
    if vectors.is_empty() {
        return lines;
    }
    if !lines.is_empty() {
        lines.blank();
    }

    lines.add(0, "pub fn alloc(&mut self, name: &str, len: usize) -> io::Result<()> {");
    dispatch(&mut lines, &vectors, |name| {
        vec![
            format!("self.{}.alloc(len);", name),
            format!("self.len_{} = len;", name),
            format!("self._{}_ndim = 1;", name),
            format!("self._{}_length = len;", name),
            format!("self._{}_length_0 = len;", name),
        ]
    });

    lines.blank();
    lines.add(0, "pub fn dealloc(&mut self, name: &str) -> io::Result<()> {");
    dispatch(&mut lines, &vectors, |name| {
        vec![
            format!("self.{}.dealloc();", name),
            format!("self.len_{} = 0;", name),
            format!("self._{}_length = 0;", name),
            format!("self._{}_length_0 = 0;", name),
        ]
    });

    lines.blank();
    lines.add(0, "/// # Safety");
    lines.add(0, "///");
    lines.add(0, "/// `target` must outlive every later access through this model.");
    lines.add(
        0,
        "pub unsafe fn set_pointer1d(&mut self, name: &str, target: *mut f64, idx: usize) -> io::Result<()> {",
    );
    dispatch(&mut lines, &vectors, |name| {
        vec![format!("self.{}.set_pointer(idx, target);", name)]
    });
    lines
}

fn dispatch(lines: &mut Lines, fields: &[&Field], arm: impl Fn(&str) -> Vec<String>) {
    lines.add(1, "match name {");
    for field in fields {
        lines.add(2, format!("\"{}\" => {{", field.name));
        for statement in arm(&field.name) {
            lines.add(3, statement);
        }
        lines.add(2, "}");
    }
    lines.add(2, "_ => return Err(unknown_name(\"link field\", name)),");
    lines.add(1, "}");
    lines.add(1, "Ok(())");
    lines.add(0, "}");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(fields: Vec<Field>) -> Group {
        Group {
            name: "sequences.inlets".into(),
            fields,
        }
    }

    #[test]
    fn test_scalar_links_only() {
        let text = routines(&group(vec![Field::link("q", Ndim::D0)])).render();
        assert!(text.contains("pub unsafe fn set_pointer0d"));
        assert!(text.contains("self.q.set_pointer(target);"));
        assert!(!text.contains("alloc"));
    }

    #[test]
    fn test_vector_links() {
        let text = routines(&group(vec![Field::link("q", Ndim::D1)])).render();
        assert!(!text.contains("set_pointer0d"));
        assert!(text.contains("self.q.alloc(len);"));
        assert!(text.contains("self.q.dealloc();"));
        assert!(text.contains("self.q.set_pointer(idx, target);"));
        assert!(!text.contains("free"));
    }
}
