//! Support code linked into every generated model crate
//!
//! Generated sources only import [prelude]; everything they need at runtime
//! lives here so that the emitted text stays small and free of unsafe
//! pointer handling.

mod io;
mod link;
mod numeric;

use std::ffi::{c_char, c_int, CStr};

pub use io::SequenceFile;
pub use link::{LinkPointer, LinkSlots};
pub use numeric::{NumConsts, NumVars, NumericError};

pub mod prelude {
    pub use super::{
        c_str, floor_div_i64, floor_rem_f64, floor_rem_i64, shape_error, status, unknown_name,
        LinkPointer, LinkSlots, NumConsts, NumVars,
        SequenceFile,
    };
    pub use ndarray::{Array1, Array2, Array3, Array4};
    pub use std::ffi::{c_char, c_int, c_void};
    pub use std::io;
}

/// Remainder taking the sign of the divisor, `a - b * floor(a / b)`
pub fn floor_rem_f64(a: f64, b: f64) -> f64 {
    a - b * (a / b).floor()
}

/// Integer remainder taking the sign of the divisor
pub fn floor_rem_i64(a: i64, b: i64) -> i64 {
    let r = a % b;
    if r != 0 && ((r < 0) != (b < 0)) {
        r + b
    } else {
        r
    }
}

/// Integer division rounding towards negative infinity
pub fn floor_div_i64(a: i64, b: i64) -> i64 {
    let q = a / b;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        q - 1
    } else {
        q
    }
}

/// Error for a shape that does not fit the named field
pub fn shape_error(name: &str, shape: &[usize]) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::InvalidInput,
        format!("Shape {shape:?} does not fit field '{name}'"),
    )
}

/// Error for a group or field name the generated model does not know
pub fn unknown_name(kind: &str, name: &str) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("Unknown {kind} '{name}'"),
    )
}

/// Status code of an exported entry point: `0` on success, `1` on failure
pub fn status(result: std::io::Result<()>) -> c_int {
    match result {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

/// Borrow a C string argument of an exported entry point
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string that outlives the call.
pub unsafe fn c_str<'a>(ptr: *const c_char) -> std::io::Result<&'a str> {
    if ptr.is_null() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "Null string argument",
        ));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(status(Ok(())), 0);
        assert_eq!(status(Err(unknown_name("group", "fluxes"))), 1);
    }

    #[test]
    fn test_floor_division_follows_divisor_sign() {
        assert_eq!(floor_rem_i64(5, -3), -1);
        assert_eq!(floor_rem_i64(-5, 3), 1);
        assert_eq!(floor_rem_i64(6, -3), 0);
        assert_eq!(floor_div_i64(7, -2), -4);
        assert_eq!(floor_div_i64(-7, 2), -4);
        assert_eq!(floor_div_i64(7, 2), 3);
        assert_eq!(floor_rem_f64(5.0, -3.0), -1.0);
        assert_eq!(floor_rem_f64(-5.5, 2.0), 0.5);
    }

    #[test]
    fn test_c_str() {
        let name = std::ffi::CString::new("states").unwrap();
        assert_eq!(unsafe { c_str(name.as_ptr()) }.unwrap(), "states");
        assert!(unsafe { c_str(std::ptr::null()) }.is_err());
    }
}
