//! Driving compiled models from the host process
//!
//! [CompiledModel] opens an artifact built by [crate::build] and calls its
//! exported C entry points on one model instance.

use std::ffi::{c_char, c_int, c_void, CString};
use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to load compiled model '{path}': {source}")]
    Library {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("Compiled model does not export '{symbol}': {source}")]
    Symbol {
        symbol: String,
        #[source]
        source: libloading::Error,
    },

    /// An entry point returned a non-zero status
    #[error("'{call}' failed with status {status}")]
    Call { call: &'static str, status: c_int },

    #[error("Argument '{0}' contains a NUL byte")]
    InvalidArgument(String),

    #[error("Compiled model has no field '{name}' of the requested kind in group '{group}'")]
    UnknownField { group: String, name: String },
}

type Constructor = unsafe extern "C" fn() -> *mut c_void;
type Destructor = unsafe extern "C" fn(*mut c_void);
type StepCall = unsafe extern "C" fn(*mut c_void, usize) -> c_int;
type PlainCall = unsafe extern "C" fn(*mut c_void) -> c_int;
type NamedCall = unsafe extern "C" fn(*mut c_void, *const c_char, *const c_char) -> c_int;
type Address<T> = unsafe extern "C" fn(*mut c_void, *const c_char, *const c_char) -> *mut T;

/// One model instance living inside a loaded artifact
///
/// The library stays loaded as long as the instance exists.
pub struct CompiledModel {
    handle: *mut c_void,
    free: Destructor,
    library: Library,
}

impl CompiledModel {
    /// Load the artifact at `path` and create a fresh model instance
    ///
    /// # Safety
    ///
    /// `path` must point to an artifact produced by this crate's generator.
    /// Loading runs the library's initializers and trusts its exported
    /// signatures.
    pub unsafe fn open(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let library = unsafe { Library::new(path) }.map_err(|source| LoadError::Library {
            path: path.to_path_buf(),
            source,
        })?;
        let new: Constructor = unsafe { *symbol::<Constructor>(&library, "hc_model_new")? };
        let free: Destructor = unsafe { *symbol::<Destructor>(&library, "hc_model_free")? };
        let handle = unsafe { new() };
        Ok(Self {
            handle,
            free,
            library,
        })
    }

    fn step(&self, name: &'static str, idx: usize) -> Result<(), LoadError> {
        let call = unsafe { symbol::<StepCall>(&self.library, name)? };
        check(name, unsafe { call(self.handle, idx) })
    }

    fn plain(&self, name: &'static str) -> Result<(), LoadError> {
        let call = unsafe { symbol::<PlainCall>(&self.library, name)? };
        check(name, unsafe { call(self.handle) })
    }

    pub fn set_shape(&mut self, group: &str, name: &str, shape: &[usize]) -> Result<(), LoadError> {
        type SetShape =
            unsafe extern "C" fn(*mut c_void, *const c_char, *const c_char, *const usize, usize) -> c_int;
        let (group, name) = (c_string(group)?, c_string(name)?);
        let call = unsafe { symbol::<SetShape>(&self.library, "hc_model_set_shape")? };
        let status = unsafe {
            call(
                self.handle,
                group.as_ptr(),
                name.as_ptr(),
                shape.as_ptr(),
                shape.len(),
            )
        };
        check("hc_model_set_shape", status)
    }

    pub fn activate_ram(&mut self, group: &str, name: &str, nmb_steps: usize) -> Result<(), LoadError> {
        type ActivateRam = unsafe extern "C" fn(*mut c_void, *const c_char, *const c_char, usize) -> c_int;
        let (group, name) = (c_string(group)?, c_string(name)?);
        let call = unsafe { symbol::<ActivateRam>(&self.library, "hc_model_activate_ram")? };
        let status = unsafe { call(self.handle, group.as_ptr(), name.as_ptr(), nmb_steps) };
        check("hc_model_activate_ram", status)
    }

    pub fn activate_disk(&mut self, group: &str, name: &str, path: &Path) -> Result<(), LoadError> {
        type ActivateDisk =
            unsafe extern "C" fn(*mut c_void, *const c_char, *const c_char, *const c_char) -> c_int;
        let (group, name) = (c_string(group)?, c_string(name)?);
        let path = c_string(&path.to_string_lossy())?;
        let call = unsafe { symbol::<ActivateDisk>(&self.library, "hc_model_activate_disk")? };
        let status = unsafe { call(self.handle, group.as_ptr(), name.as_ptr(), path.as_ptr()) };
        check("hc_model_activate_disk", status)
    }

    fn address<T>(&mut self, entry: &str, group: &str, name: &str) -> Result<*mut T, LoadError> {
        let (c_group, c_name) = (c_string(group)?, c_string(name)?);
        let call = unsafe { symbol::<Address<T>>(&self.library, entry)? };
        let ptr = unsafe { call(self.handle, c_group.as_ptr(), c_name.as_ptr()) };
        if ptr.is_null() {
            return Err(LoadError::UnknownField {
                group: group.to_string(),
                name: name.to_string(),
            });
        }
        Ok(ptr)
    }

    /// Address of a real field, or of the first element of a real array
    ///
    /// Group `old_states` addresses the previous-step snapshot. The address
    /// is invalidated by the next `set_shape` of the field.
    pub fn field_ptr(&mut self, group: &str, name: &str) -> Result<*mut f64, LoadError> {
        self.address("hc_model_field_ptr", group, name)
    }

    /// Address of an integer parameter
    pub fn int_field_ptr(&mut self, group: &str, name: &str) -> Result<*mut i64, LoadError> {
        self.address("hc_model_int_field_ptr", group, name)
    }

    /// Address of a boolean parameter
    pub fn bool_field_ptr(&mut self, group: &str, name: &str) -> Result<*mut bool, LoadError> {
        self.address("hc_model_bool_field_ptr", group, name)
    }

    /// Copy `values` into a real field
    ///
    /// # Safety
    ///
    /// The field must be shaped to hold at least `values.len()` elements.
    pub unsafe fn write_field(&mut self, group: &str, name: &str, values: &[f64]) -> Result<(), LoadError> {
        let ptr = self.field_ptr(group, name)?;
        unsafe { std::ptr::copy_nonoverlapping(values.as_ptr(), ptr, values.len()) };
        Ok(())
    }

    /// Copy the first `len` elements of a real field
    ///
    /// # Safety
    ///
    /// The field must be shaped to hold at least `len` elements.
    pub unsafe fn read_field(&mut self, group: &str, name: &str, len: usize) -> Result<Vec<f64>, LoadError> {
        let ptr = self.field_ptr(group, name)?;
        Ok(unsafe { std::slice::from_raw_parts(ptr, len) }.to_vec())
    }

    /// Size the slots of a vector link field
    pub fn alloc(&mut self, group: &str, name: &str, len: usize) -> Result<(), LoadError> {
        type Alloc = unsafe extern "C" fn(*mut c_void, *const c_char, *const c_char, usize) -> c_int;
        let (group, name) = (c_string(group)?, c_string(name)?);
        let call = unsafe { symbol::<Alloc>(&self.library, "hc_model_alloc")? };
        check("hc_model_alloc", unsafe { call(self.handle, group.as_ptr(), name.as_ptr(), len) })
    }

    pub fn dealloc(&mut self, group: &str, name: &str) -> Result<(), LoadError> {
        let (group, name) = (c_string(group)?, c_string(name)?);
        let call = unsafe { symbol::<NamedCall>(&self.library, "hc_model_dealloc")? };
        check("hc_model_dealloc", unsafe { call(self.handle, group.as_ptr(), name.as_ptr()) })
    }

    /// Point a scalar link field at `target`
    ///
    /// # Safety
    ///
    /// `target` must stay valid for every later step of this model, for
    /// example an address from [CompiledModel::field_ptr] of a model that
    /// outlives this one and is not reshaped.
    pub unsafe fn set_pointer0d(&mut self, group: &str, name: &str, target: *mut f64) -> Result<(), LoadError> {
        type SetPointer = unsafe extern "C" fn(*mut c_void, *const c_char, *const c_char, *mut f64) -> c_int;
        let (group, name) = (c_string(group)?, c_string(name)?);
        let call = unsafe { symbol::<SetPointer>(&self.library, "hc_model_set_pointer0d")? };
        let status = unsafe { call(self.handle, group.as_ptr(), name.as_ptr(), target) };
        check("hc_model_set_pointer0d", status)
    }

    /// Point slot `idx` of a vector link field at `target`
    ///
    /// # Safety
    ///
    /// Same contract as [CompiledModel::set_pointer0d].
    pub unsafe fn set_pointer1d(
        &mut self,
        group: &str,
        name: &str,
        target: *mut f64,
        idx: usize,
    ) -> Result<(), LoadError> {
        type SetPointer =
            unsafe extern "C" fn(*mut c_void, *const c_char, *const c_char, *mut f64, usize) -> c_int;
        let (group, name) = (c_string(group)?, c_string(name)?);
        let call = unsafe { symbol::<SetPointer>(&self.library, "hc_model_set_pointer1d")? };
        let status = unsafe { call(self.handle, group.as_ptr(), name.as_ptr(), target, idx) };
        check("hc_model_set_pointer1d", status)
    }

    /// Size the solver buffers of a numerical model
    pub fn prepare_numerics(&mut self) -> Result<(), LoadError> {
        self.plain("hc_model_prepare_numerics")
    }

    pub fn open_files(&mut self, idx: usize) -> Result<(), LoadError> {
        self.step("hc_model_open_files", idx)
    }

    pub fn close_files(&mut self) -> Result<(), LoadError> {
        self.plain("hc_model_close_files")
    }

    pub fn load_data(&mut self, idx: usize) -> Result<(), LoadError> {
        self.step("hc_model_load_data", idx)
    }

    /// Perform simulation step `idx`
    pub fn do_it(&mut self, idx: usize) -> Result<(), LoadError> {
        self.step("hc_model_do_it", idx)
    }

    pub fn save_data(&mut self, idx: usize) -> Result<(), LoadError> {
        self.step("hc_model_save_data", idx)
    }
}

impl Drop for CompiledModel {
    fn drop(&mut self) {
        unsafe { (self.free)(self.handle) };
    }
}

unsafe fn symbol<'l, T>(library: &'l Library, name: &str) -> Result<Symbol<'l, T>, LoadError> {
    unsafe { library.get(name.as_bytes()) }.map_err(|source| LoadError::Symbol {
        symbol: name.to_string(),
        source,
    })
}

fn c_string(value: &str) -> Result<CString, LoadError> {
    CString::new(value).map_err(|_| LoadError::InvalidArgument(value.to_string()))
}

fn check(call: &'static str, status: c_int) -> Result<(), LoadError> {
    match status {
        0 => Ok(()),
        status => Err(LoadError::Call { call, status }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_library() {
        let err = unsafe { CompiledModel::open("/nonexistent/hydrocomp/m_native.so") }
            .err()
            .unwrap();
        assert!(matches!(err, LoadError::Library { .. }));
        assert!(err.to_string().contains("m_native"));
    }

    #[test]
    fn test_status_check() {
        assert!(check("hc_model_do_it", 0).is_ok());
        let err = check("hc_model_do_it", 1).unwrap_err();
        assert!(err.to_string().contains("hc_model_do_it"));
    }

    #[test]
    fn test_nul_arguments_are_rejected() {
        assert!(matches!(
            c_string("flu\0xes"),
            Err(LoadError::InvalidArgument(_))
        ));
    }
}
