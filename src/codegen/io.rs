use crate::codegen::{loop_vars, nested_loops, Access, Lines};
use crate::descriptor::{Field, Group, GroupInfo, GroupKind};

/// Per-step file and buffer routines of an input or output group
///
/// `load_data` is emitted for inputs, `save_data` for fluxes and states.
/// Neither allocates: files are opened and buffers sized beforehand.
pub(crate) fn routines(info: &GroupInfo, group: &Group, access: &Access) -> Lines {
    let persistent: Vec<&Field> = group.fields.iter().filter(|f| f.persistent).collect();

    let mut lines = Lines::new();
    lines.add(0, "pub fn open_files(&mut self, idx: usize) -> io::Result<()> {");
    for field in &persistent {
        let name = &field.name;
        lines.add(1, format!("if self._{}_diskflag {{", name));
        lines.add(
            2,
            format!(
                "self._{0}_file = Some(SequenceFile::open(&self._{0}_path, idx, self._{0}_length)?);",
                name
            ),
        );
        lines.add(1, "}");
    }
    lines.add(1, "Ok(())");
    lines.add(0, "}");

    lines.blank();
    lines.add(0, "pub fn close_files(&mut self) -> io::Result<()> {");
    for field in &persistent {
        lines.add(
            1,
            format!("if let Some(file) = self._{}_file.take() {{", field.name),
        );
        lines.add(2, "file.close()?;");
        lines.add(1, "}");
    }
    lines.add(1, "Ok(())");
    lines.add(0, "}");

    match info.kind {
        GroupKind::Inputs => {
            lines.blank();
            lines.add(0, "pub fn load_data(&mut self, idx: usize) -> io::Result<()> {");
            for field in &persistent {
                lines.extend(1, transfer(field, access, Direction::Load));
            }
            lines.add(1, "Ok(())");
            lines.add(0, "}");
        }
        GroupKind::Fluxes | GroupKind::States => {
            lines.blank();
            lines.add(0, "pub fn save_data(&mut self, idx: usize) -> io::Result<()> {");
            for field in &persistent {
                lines.extend(1, transfer(field, access, Direction::Save));
            }
            lines.add(1, "Ok(())");
            lines.add(0, "}");
        }
        _ => {}
    }
    lines
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    Load,
    Save,
}

fn transfer(field: &Field, access: &Access, direction: Direction) -> Lines {
    let name = &field.name;
    let rank = field.ndim.rank();

    let disk = match (direction, rank) {
        (Direction::Load, 0) => format!("self.{} = file.read_scalar()?;", name),
        (Direction::Load, _) => format!("file.read_into(self.{}.iter_mut())?;", name),
        (Direction::Save, 0) => format!("file.write_scalar(self.{})?;", name),
        (Direction::Save, _) => format!("file.write_from(self.{}.iter())?;", name),
    };

    let vars = loop_vars("jdx", rank);
    let mut buffer_idx = vec!["idx".to_string()];
    buffer_idx.extend(vars.iter().cloned());
    let value = format!("self.{}", name);
    let buffer = format!("self._{}_array", name);
    let statement = match direction {
        Direction::Load => access.write(&value, &vars, &access.read(&buffer, &buffer_idx)),
        Direction::Save => access.write(&buffer, &buffer_idx, &access.read(&value, &vars)),
    };
    let mut body = Lines::new();
    body.add(0, statement);

    let mut lines = Lines::new();
    lines.add(0, format!("if self._{}_diskflag {{", name));
    lines.add(1, format!("if let Some(file) = self._{}_file.as_mut() {{", name));
    lines.add(2, disk);
    lines.add(1, "}");
    lines.add(0, format!("}} else if self._{}_ramflag {{", name));
    lines.extend(1, nested_loops("self", name, &vars, body));
    lines.add(0, "}");
    lines
}
