//! Tagged C value crossing the host/extension boundary.

use std::ptr;

pub const TAG_NULL: u32 = 0;
pub const TAG_INTEGER: u32 = 1;
pub const TAG_REAL: u32 = 2;
pub const TAG_TEXT: u32 = 3;
pub const TAG_BLOB: u32 = 4;

/// One engine value in C layout. The host never trusts `tag` blindly; an
/// unknown tag is treated as a call failure, not UB.
///
/// For TEXT/BLOB, `ptr`/`len` reference a buffer owned by whichever side
/// built the value. Argument buffers are host-owned and valid only for the
/// duration of one thunk call; result buffers are module-owned and released
/// through the capability's `free_result` after the host copies them.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct SiltValue {
    pub tag: u32,
    pub int: i64,
    pub real: f64,
    pub ptr: *const u8,
    pub len: usize,
}

impl SiltValue {
    pub fn null() -> Self {
        SiltValue {
            tag: TAG_NULL,
            int: 0,
            real: 0.0,
            ptr: ptr::null(),
            len: 0,
        }
    }

    pub fn integer(v: i64) -> Self {
        SiltValue {
            int: v,
            tag: TAG_INTEGER,
            ..Self::null()
        }
    }

    pub fn real(v: f64) -> Self {
        SiltValue {
            real: v,
            tag: TAG_REAL,
            ..Self::null()
        }
    }

    /// Text backed by a `'static` buffer; pair with a null `free_result`.
    pub fn text_static(s: &'static str) -> Self {
        SiltValue {
            tag: TAG_TEXT,
            ptr: s.as_ptr(),
            len: s.len(),
            ..Self::null()
        }
    }

    /// Text backed by a leaked heap buffer; pair with [`free_owned_value`].
    pub fn owned_text(s: String) -> Self {
        let bytes = s.into_bytes().into_boxed_slice();
        let len = bytes.len();
        let ptr = Box::into_raw(bytes) as *const u8;
        SiltValue {
            tag: TAG_TEXT,
            ptr,
            len,
            ..Self::null()
        }
    }

    /// Blob backed by a leaked heap buffer; pair with [`free_owned_value`].
    pub fn owned_blob(b: Vec<u8>) -> Self {
        let bytes = b.into_boxed_slice();
        let len = bytes.len();
        let ptr = Box::into_raw(bytes) as *const u8;
        SiltValue {
            tag: TAG_BLOB,
            ptr,
            len,
            ..Self::null()
        }
    }
}

/// `FreeValueFn` for values built with `owned_text`/`owned_blob`. Lives in
/// whichever binary built the value, so allocator pairing is preserved.
///
/// # Safety
/// `v` must have been produced by `owned_text`/`owned_blob` in the same
/// binary and must not be freed twice.
pub unsafe extern "C" fn free_owned_value(v: SiltValue) {
    if (v.tag == TAG_TEXT || v.tag == TAG_BLOB) && !v.ptr.is_null() {
        let slice = ptr::slice_from_raw_parts_mut(v.ptr as *mut u8, v.len);
        drop(Box::from_raw(slice));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owned_text_round_trips_and_frees() {
        let v = SiltValue::owned_text("forty-two".to_string());
        assert_eq!(v.tag, TAG_TEXT);
        let copied =
            String::from_utf8(unsafe { std::slice::from_raw_parts(v.ptr, v.len) }.to_vec())
                .unwrap();
        assert_eq!(copied, "forty-two");
        unsafe { free_owned_value(v) };
    }

    #[test]
    fn null_free_is_a_no_op() {
        unsafe { free_owned_value(SiltValue::null()) };
        unsafe { free_owned_value(SiltValue::integer(7)) };
    }
}
