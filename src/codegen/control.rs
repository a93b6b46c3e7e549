//! The `Model` type, its per-step procedure and the exported entry points
//!
//! Which stages `do_it` runs is decided here, once, from the descriptor.
//! Stages a model does not have are left out of the emitted text entirely.

use crate::codegen::{loop_vars, nested_loops, Access, CodegenOptions, Lines};
use crate::descriptor::{GroupKind, Ndim, ValidatedDescriptor};

pub(crate) fn model_struct(descriptor: &ValidatedDescriptor) -> Lines {
    let mut lines = Lines::new();
    lines.add(0, "#[derive(Debug, Default)]");
    lines.add(0, "pub struct Model {");
    lines.add(1, "pub idx_sim: usize,");
    for (info, _) in descriptor.groups() {
        lines.add(1, format!("pub {}: {},", info.attr, info.struct_name));
    }
    if let Some((info, _)) = descriptor.io_group(GroupKind::States) {
        lines.add(1, format!("pub old_states: {},", info.struct_name));
    }
    if descriptor.inner().numerical {
        lines.add(1, "pub numconsts: NumConsts,");
        lines.add(1, "pub numvars: NumVars,");
    }
    lines.add(0, "}");
    lines
}

pub(crate) fn standard_routines(descriptor: &ValidatedDescriptor, options: CodegenOptions) -> Lines {
    let mut lines = Lines::new();
    lines.extend(0, do_it(descriptor));
    lines.blank();
    lines.extend(0, lifecycle(descriptor));
    lines.blank();
    lines.extend(0, io_routines(descriptor));
    lines.blank();
    lines.extend(0, new2old(descriptor, &Access::new(options)));

    let methods = &descriptor.inner().methods;
    let numerical = descriptor.inner().numerical;
    let lists: [(&str, &[String], bool); 7] = [
        ("run", &methods.run, !numerical),
        ("update_inlets", &methods.inlets, false),
        ("update_outlets", &methods.outlets, false),
        ("update_receivers", &methods.receivers, false),
        ("update_senders", &methods.senders, false),
        ("calculate_single_terms", &methods.part_ode, numerical),
        ("calculate_full_terms", &methods.full_ode, numerical),
    ];
    for (name, calls, required) in lists {
        if calls.is_empty() && !required {
            continue;
        }
        lines.blank();
        lines.add(0, format!("pub fn {}(&mut self) {{", name));
        if name == "calculate_single_terms" {
            lines.add(1, "self.numvars.nmb_calls = self.numvars.nmb_calls + 1;");
        }
        for call in calls {
            lines.add(1, format!("self.{}();", call));
        }
        lines.add(0, "}");
    }
    lines
}

/// The per-step procedure, with absent stages omitted
fn do_it(descriptor: &ValidatedDescriptor) -> Lines {
    let methods = &descriptor.inner().methods;
    let saves = descriptor.io_group(GroupKind::Fluxes).is_some() || descriptor.has_states();

    let mut lines = Lines::new();
    lines.add(0, "/// Perform simulation step `idx`");
    lines.add(0, "pub fn do_it(&mut self, idx: usize) -> io::Result<()> {");
    lines.add(1, "self.idx_sim = idx;");
    if descriptor.io_group(GroupKind::Inputs).is_some() {
        lines.add(1, "self.load_data()?;");
    }
    if !methods.inlets.is_empty() {
        lines.add(1, "self.update_inlets();");
    }
    if descriptor.inner().numerical {
        lines.add(1, "self.solve();");
    } else {
        lines.add(1, "self.run();");
        if descriptor.has_states() {
            lines.add(1, "self.new2old();");
        }
    }
    if !methods.outlets.is_empty() {
        lines.add(1, "self.update_outlets();");
    }
    if saves {
        lines.add(1, "self.save_data()?;");
    }
    lines.add(1, "Ok(())");
    lines.add(0, "}");
    lines
}

/// Forward `call` to the group named by the `group` argument
fn forward(
    lines: &mut Lines,
    signature: &str,
    targets: &[(String, Vec<String>)],
    call: &str,
) {
    lines.add(0, signature);
    lines.add(1, "match group {");
    for (attr, owners) in targets {
        match owners.split_last() {
            Some((owner, [])) => lines.add(2, format!("\"{}\" => self.{}.{},", attr, owner, call)),
            Some((last, rest)) => {
                lines.add(2, format!("\"{}\" => {{", attr));
                for owner in rest {
                    lines.add(3, format!("self.{}.{}?;", owner, call));
                }
                lines.add(3, format!("self.{}.{}", last, call));
                lines.add(2, "}");
            }
            None => {}
        }
    }
    lines.add(2, "_ => Err(unknown_name(\"group\", group)),");
    lines.add(1, "}");
    lines.add(0, "}");
}

fn lifecycle(descriptor: &ValidatedDescriptor) -> Lines {
    let mut lines = Lines::new();

    let shaped: Vec<(String, Vec<String>)> = descriptor
        .groups()
        .map(|(info, _)| {
            let mut owners = vec![info.attr.clone()];
            if info.kind == GroupKind::States {
                owners.push("old_states".to_string());
            }
            (info.attr.clone(), owners)
        })
        .collect();
    lines.add(0, "/// Set the shape of field `name` of `group`, e.g. `(\"states\", \"sm\", &[3])`");
    forward(
        &mut lines,
        "pub fn set_shape(&mut self, group: &str, name: &str, shape: &[usize]) -> io::Result<()> {",
        &shaped,
        "set_shape(name, shape)",
    );

    let io: Vec<(String, Vec<String>)> = descriptor
        .groups()
        .filter(|(info, _)| info.kind.is_io())
        .map(|(info, _)| (info.attr.clone(), vec![info.attr.clone()]))
        .collect();
    for (signature, call) in [
        (
            "pub fn activate_ram(&mut self, group: &str, name: &str, nmb_steps: usize) -> io::Result<()> {",
            "activate_ram(name, nmb_steps)",
        ),
        (
            "pub fn activate_disk(&mut self, group: &str, name: &str, path: &str) -> io::Result<()> {",
            "activate_disk(name, path)",
        ),
        (
            "pub fn deactivate(&mut self, group: &str, name: &str) -> io::Result<()> {",
            "deactivate(name)",
        ),
    ] {
        lines.blank();
        forward(&mut lines, signature, &io, call);
    }

    let links = |ndim: Ndim| -> Vec<(String, Vec<String>)> {
        descriptor
            .groups_of(GroupKind::Link)
            .filter(|(_, group)| group.fields.iter().any(|f| f.ndim == ndim))
            .map(|(info, _)| (info.attr.clone(), vec![info.attr.clone()]))
            .collect()
    };
    let scalars = links(Ndim::D0);
    let vectors = links(Ndim::D1);
    lines.blank();
    lines.add(0, "/// # Safety");
    lines.add(0, "///");
    lines.add(0, "/// `target` must outlive every later access through this model.");
    forward(
        &mut lines,
        "pub unsafe fn set_pointer0d(&mut self, group: &str, name: &str, target: *mut f64) -> io::Result<()> {",
        &scalars,
        "set_pointer0d(name, target)",
    );
    lines.blank();
    forward(
        &mut lines,
        "pub fn alloc(&mut self, group: &str, name: &str, len: usize) -> io::Result<()> {",
        &vectors,
        "alloc(name, len)",
    );
    lines.blank();
    forward(
        &mut lines,
        "pub fn dealloc(&mut self, group: &str, name: &str) -> io::Result<()> {",
        &vectors,
        "dealloc(name)",
    );
    lines.blank();
    lines.add(0, "/// # Safety");
    lines.add(0, "///");
    lines.add(0, "/// `target` must outlive every later access through this model.");
    forward(
        &mut lines,
        "pub unsafe fn set_pointer1d(&mut self, group: &str, name: &str, target: *mut f64, idx: usize) -> io::Result<()> {",
        &vectors,
        "set_pointer1d(name, target, idx)",
    );

    // `old_states` is addressable on its own so hosts can seed both snapshots
    let mut values: Vec<(String, Vec<String>)> = descriptor
        .groups()
        .map(|(info, _)| (info.attr.clone(), vec![info.attr.clone()]))
        .collect();
    if descriptor.has_states() {
        values.push(("old_states".to_string(), vec!["old_states".to_string()]));
    }
    let parameters: Vec<(String, Vec<String>)> = descriptor
        .groups_of(GroupKind::Parameters)
        .map(|(info, _)| (info.attr.clone(), vec![info.attr.clone()]))
        .collect();
    lines.blank();
    lines.add(0, "/// Address of a real value, or of the first element of a real array");
    forward(
        &mut lines,
        "pub fn field_ptr(&mut self, group: &str, name: &str) -> io::Result<*mut f64> {",
        &values,
        "field_ptr(name)",
    );
    for (signature, call) in [
        (
            "pub fn int_field_ptr(&mut self, group: &str, name: &str) -> io::Result<*mut i64> {",
            "int_field_ptr(name)",
        ),
        (
            "pub fn bool_field_ptr(&mut self, group: &str, name: &str) -> io::Result<*mut bool> {",
            "bool_field_ptr(name)",
        ),
    ] {
        lines.blank();
        forward(&mut lines, signature, &parameters, call);
    }

    if descriptor.inner().numerical {
        lines.blank();
        lines.add(0, "/// Size all integration buffers; call after every `set_shape`");
        lines.add(0, "pub fn prepare_numerics(&mut self) {");
        lines.add(1, "let nmb_stages = self.numconsts.nmb_stages;");
        lines.add(1, "let nmb_methods = self.numconsts.nmb_methods;");
        for (info, group) in descriptor.groups() {
            if matches!(info.kind, GroupKind::Fluxes | GroupKind::States)
                && group.fields.iter().any(|f| f.numeric)
            {
                lines.add(
                    1,
                    format!("self.{}.prepare_numerics(nmb_stages, nmb_methods);", info.attr),
                );
            }
        }
        lines.add(0, "}");
    }
    lines
}

fn io_routines(descriptor: &ValidatedDescriptor) -> Lines {
    let io: Vec<(GroupKind, String)> = descriptor
        .groups()
        .filter(|(info, _)| info.kind.is_io())
        .map(|(info, _)| (info.kind, info.attr.clone()))
        .collect();

    let mut lines = Lines::new();
    lines.add(0, "pub fn open_files(&mut self, idx: usize) -> io::Result<()> {");
    lines.add(1, "self.idx_sim = idx;");
    for (_, attr) in &io {
        lines.add(1, format!("self.{}.open_files(idx)?;", attr));
    }
    lines.add(1, "Ok(())");
    lines.add(0, "}");

    lines.blank();
    lines.add(0, "pub fn close_files(&mut self) -> io::Result<()> {");
    for (_, attr) in &io {
        lines.add(1, format!("self.{}.close_files()?;", attr));
    }
    lines.add(1, "Ok(())");
    lines.add(0, "}");

    lines.blank();
    lines.add(0, "pub fn load_data(&mut self) -> io::Result<()> {");
    for (kind, attr) in &io {
        if *kind == GroupKind::Inputs {
            lines.add(1, format!("self.{}.load_data(self.idx_sim)?;", attr));
        }
    }
    lines.add(1, "Ok(())");
    lines.add(0, "}");

    lines.blank();
    lines.add(0, "pub fn save_data(&mut self) -> io::Result<()> {");
    for (kind, attr) in &io {
        if matches!(kind, GroupKind::Fluxes | GroupKind::States) {
            lines.add(1, format!("self.{}.save_data(self.idx_sim)?;", attr));
        }
    }
    lines.add(1, "Ok(())");
    lines.add(0, "}");
    lines
}

/// Copy current states into the old snapshot, element-wise for arrays
///
/// Emitted for every model since `solve` always ends an accepted sub-step
/// with it; the body is empty without a states group.
fn new2old(descriptor: &ValidatedDescriptor, access: &Access) -> Lines {
    let mut lines = Lines::new();
    lines.add(0, "pub fn new2old(&mut self) {");
    if let Some((_, group)) = descriptor.io_group(GroupKind::States) {
        for field in &group.fields {
            let vars = loop_vars("jdx", field.ndim.rank());
            let old = format!("self.old_states.{}", field.name);
            let new = format!("self.states.{}", field.name);
            let mut body = Lines::new();
            body.add(0, access.write(&old, &vars, &access.read(&new, &vars)));
            lines.extend(1, nested_loops("self.states", &field.name, &vars, body));
        }
    }
    lines.add(0, "}");
    lines
}

// ═══════════════════════════════════════════════════════════════════════════════
// Exported entry points
// ═══════════════════════════════════════════════════════════════════════════════

const EXPORTS: &str = r#"#[no_mangle]
pub extern "C" fn hc_model_new() -> *mut c_void {
    Box::into_raw(Box::<Model>::default()) as *mut c_void
}

/// # Safety
///
/// `model` must come from `hc_model_new` and must not be used afterwards.
#[no_mangle]
pub unsafe extern "C" fn hc_model_free(model: *mut c_void) {
    if !model.is_null() {
        drop(Box::from_raw(model as *mut Model));
    }
}

#[no_mangle]
pub unsafe extern "C" fn hc_model_set_shape(
    model: *mut c_void,
    group: *const c_char,
    name: *const c_char,
    shape: *const usize,
    ndim: usize,
) -> c_int {
    let model = &mut *(model as *mut Model);
    status((|| {
        let shape = if ndim == 0 {
            &[][..]
        } else {
            std::slice::from_raw_parts(shape, ndim)
        };
        model.set_shape(c_str(group)?, c_str(name)?, shape)
    })())
}

#[no_mangle]
pub unsafe extern "C" fn hc_model_activate_ram(
    model: *mut c_void,
    group: *const c_char,
    name: *const c_char,
    nmb_steps: usize,
) -> c_int {
    let model = &mut *(model as *mut Model);
    status((|| model.activate_ram(c_str(group)?, c_str(name)?, nmb_steps))())
}

#[no_mangle]
pub unsafe extern "C" fn hc_model_activate_disk(
    model: *mut c_void,
    group: *const c_char,
    name: *const c_char,
    path: *const c_char,
) -> c_int {
    let model = &mut *(model as *mut Model);
    status((|| model.activate_disk(c_str(group)?, c_str(name)?, c_str(path)?))())
}

#[no_mangle]
pub unsafe extern "C" fn hc_model_open_files(model: *mut c_void, idx: usize) -> c_int {
    let model = &mut *(model as *mut Model);
    status(model.open_files(idx))
}

#[no_mangle]
pub unsafe extern "C" fn hc_model_close_files(model: *mut c_void) -> c_int {
    let model = &mut *(model as *mut Model);
    status(model.close_files())
}

#[no_mangle]
pub unsafe extern "C" fn hc_model_load_data(model: *mut c_void, idx: usize) -> c_int {
    let model = &mut *(model as *mut Model);
    model.idx_sim = idx;
    status(model.load_data())
}

#[no_mangle]
pub unsafe extern "C" fn hc_model_do_it(model: *mut c_void, idx: usize) -> c_int {
    let model = &mut *(model as *mut Model);
    status(model.do_it(idx))
}

#[no_mangle]
pub unsafe extern "C" fn hc_model_save_data(model: *mut c_void, idx: usize) -> c_int {
    let model = &mut *(model as *mut Model);
    model.idx_sim = idx;
    status(model.save_data())
}

#[no_mangle]
pub unsafe extern "C" fn hc_model_alloc(
    model: *mut c_void,
    group: *const c_char,
    name: *const c_char,
    len: usize,
) -> c_int {
    let model = &mut *(model as *mut Model);
    status((|| model.alloc(c_str(group)?, c_str(name)?, len))())
}

#[no_mangle]
pub unsafe extern "C" fn hc_model_dealloc(
    model: *mut c_void,
    group: *const c_char,
    name: *const c_char,
) -> c_int {
    let model = &mut *(model as *mut Model);
    status((|| model.dealloc(c_str(group)?, c_str(name)?))())
}

#[no_mangle]
pub unsafe extern "C" fn hc_model_set_pointer0d(
    model: *mut c_void,
    group: *const c_char,
    name: *const c_char,
    target: *mut f64,
) -> c_int {
    let model = &mut *(model as *mut Model);
    status((|| model.set_pointer0d(c_str(group)?, c_str(name)?, target))())
}

#[no_mangle]
pub unsafe extern "C" fn hc_model_set_pointer1d(
    model: *mut c_void,
    group: *const c_char,
    name: *const c_char,
    target: *mut f64,
    idx: usize,
) -> c_int {
    let model = &mut *(model as *mut Model);
    status((|| model.set_pointer1d(c_str(group)?, c_str(name)?, target, idx))())
}

/// Null if the group has no such real field
#[no_mangle]
pub unsafe extern "C" fn hc_model_field_ptr(
    model: *mut c_void,
    group: *const c_char,
    name: *const c_char,
) -> *mut f64 {
    let model = &mut *(model as *mut Model);
    (|| model.field_ptr(c_str(group)?, c_str(name)?))().unwrap_or(std::ptr::null_mut())
}

#[no_mangle]
pub unsafe extern "C" fn hc_model_int_field_ptr(
    model: *mut c_void,
    group: *const c_char,
    name: *const c_char,
) -> *mut i64 {
    let model = &mut *(model as *mut Model);
    (|| model.int_field_ptr(c_str(group)?, c_str(name)?))().unwrap_or(std::ptr::null_mut())
}

#[no_mangle]
pub unsafe extern "C" fn hc_model_bool_field_ptr(
    model: *mut c_void,
    group: *const c_char,
    name: *const c_char,
) -> *mut bool {
    let model = &mut *(model as *mut Model);
    (|| model.bool_field_ptr(c_str(group)?, c_str(name)?))().unwrap_or(std::ptr::null_mut())
}"#;

const PREPARE_EXPORT: &str = r#"#[no_mangle]
pub unsafe extern "C" fn hc_model_prepare_numerics(model: *mut c_void) -> c_int {
    let model = &mut *(model as *mut Model);
    model.prepare_numerics();
    0
}"#;

pub(crate) fn exports(descriptor: &ValidatedDescriptor, options: CodegenOptions) -> Lines {
    let mut lines = Lines::new();
    if options.thread_release() {
        lines.add(0, "// Only the caller may share link targets between threads.");
        lines.add(0, "unsafe impl Send for Model {}");
        lines.blank();
    }
    lines.add(0, EXPORTS);
    if descriptor.inner().numerical {
        lines.blank();
        lines.add(0, PREPARE_EXPORT);
    }
    lines
}
