use std::{
    ffi::{c_char, CStr, CString},
    str::Utf8Error,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StringError {
    #[error(transparent)]
    Utf8Error(#[from] Utf8Error),
    #[error("the string ptr is null")]
    Null,
}

/// A C-compatible, nul-terminated string that either borrows a foreign
/// pointer or owns a freshly allocated copy of a Rust string.
///
/// The owning variants exist so an option value or stream id can be handed
/// to the SRT C API without keeping a separate `CString` binding alive at
/// every call site.
pub struct PSTR {
    ptr: *const c_char,
    drop: bool,
}

impl From<*const c_char> for PSTR {
    fn from(ptr: *const c_char) -> Self {
        Self { drop: false, ptr }
    }
}

impl From<&str> for PSTR {
    fn from(value: &str) -> Self {
        Self {
            ptr: CString::new(value).unwrap().into_raw(),
            drop: true,
        }
    }
}

impl From<String> for PSTR {
    fn from(value: String) -> Self {
        Self {
            ptr: CString::new(value).unwrap().into_raw(),
            drop: true,
        }
    }
}

impl PSTR {
    /// Yields an owned `String` if the pointed-to bytes are valid UTF-8.
    pub fn to_string(&self) -> Result<String, StringError> {
        if !self.ptr.is_null() {
            Ok(unsafe { CStr::from_ptr(self.ptr) }
                .to_str()
                .map(|s| s.to_string())?)
        } else {
            Err(StringError::Null)
        }
    }

    /// Returns the inner pointer to this C string.
    ///
    /// The returned pointer is valid for as long as self is, and is
    /// read-only; passing it to C code that writes to it is undefined
    /// behavior.
    pub fn as_ptr(&self) -> *const c_char {
        self.ptr
    }
}

impl Drop for PSTR {
    fn drop(&mut self) {
        if self.drop && !self.ptr.is_null() {
            drop(unsafe { CString::from_raw(self.ptr as *mut c_char) })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_rust_string() {
        let pstr = PSTR::from("stream-id");
        assert_eq!(pstr.to_string().unwrap(), "stream-id");
    }

    #[test]
    fn borrowed_null_pointer_reports_error() {
        let pstr = PSTR::from(std::ptr::null() as *const c_char);
        assert!(matches!(pstr.to_string(), Err(StringError::Null)));
    }

    #[test]
    fn borrowed_pointer_reads_foreign_string() {
        let owned = CString::new("peer").unwrap();
        let pstr = PSTR::from(owned.as_ptr());
        assert_eq!(pstr.to_string().unwrap(), "peer");
    }
}
