//! Mathx sample extension: C-ABI shim registering scalars, an aggregate, and
//! a table-valued function with a Silt host.

use core::ffi::{c_char, c_void};
use std::ptr;

use silt_abi::ffi::{
    AggregateDef, ExtensionApi, ScalarDef, TableFnDef, ERR_FAIL, ERR_OK, INIT_FAIL, ROW_DONE,
    SILT_ABI_VERSION,
};
use silt_abi::value::{free_owned_value, SiltValue, TAG_INTEGER, TAG_REAL};

fn numeric(v: &SiltValue) -> Option<f64> {
    match v.tag {
        TAG_INTEGER => Some(v.int as f64),
        TAG_REAL => Some(v.real),
        _ => None,
    }
}

// -----------------------------
// Scalars
// -----------------------------

/// `double_it(x)` — doubles an integer or real, preserving the type.
unsafe extern "C" fn double_it(argc: u32, argv: *const SiltValue, out: *mut SiltValue) -> i32 {
    if argc != 1 || argv.is_null() || out.is_null() {
        return ERR_FAIL;
    }
    let v = &*argv;
    match v.tag {
        TAG_INTEGER => {
            *out = SiltValue::integer(v.int.wrapping_mul(2));
            ERR_OK
        }
        TAG_REAL => {
            *out = SiltValue::real(v.real * 2.0);
            ERR_OK
        }
        _ => ERR_FAIL,
    }
}

/// `mathx_version()` — version string, the `js_version()` of this sample.
unsafe extern "C" fn mathx_version(_argc: u32, _argv: *const SiltValue, out: *mut SiltValue) -> i32 {
    if out.is_null() {
        return ERR_FAIL;
    }
    *out = SiltValue::owned_text(format!("mathx {}", env!("CARGO_PKG_VERSION")));
    ERR_OK
}

// -----------------------------
// `product(x)` aggregate
// -----------------------------

unsafe extern "C" fn product_init() -> *mut c_void {
    Box::into_raw(Box::new(1.0f64)) as *mut c_void
}

unsafe extern "C" fn product_step(state: *mut c_void, argc: u32, argv: *const SiltValue) -> i32 {
    if state.is_null() || argc != 1 || argv.is_null() {
        return ERR_FAIL;
    }
    match numeric(&*argv) {
        Some(x) => {
            *(state as *mut f64) *= x;
            ERR_OK
        }
        None => ERR_FAIL,
    }
}

unsafe extern "C" fn product_fin(state: *mut c_void, out: *mut SiltValue) -> i32 {
    if state.is_null() {
        return ERR_FAIL;
    }
    let acc = *Box::from_raw(state as *mut f64);
    if out.is_null() {
        return ERR_FAIL;
    }
    *out = SiltValue::real(acc);
    ERR_OK
}

// -----------------------------
// `int_range(start, stop)` table function (one column, inclusive bounds)
// -----------------------------

struct RangeCursor {
    next: i64,
    stop: i64,
}

unsafe extern "C" fn range_open(argc: u32, argv: *const SiltValue) -> *mut c_void {
    if argc != 2 || argv.is_null() {
        return ptr::null_mut();
    }
    let args = std::slice::from_raw_parts(argv, 2);
    if args[0].tag != TAG_INTEGER || args[1].tag != TAG_INTEGER {
        return ptr::null_mut();
    }
    Box::into_raw(Box::new(RangeCursor {
        next: args[0].int,
        stop: args[1].int,
    })) as *mut c_void
}

unsafe extern "C" fn range_next(cursor: *mut c_void, row: *mut SiltValue) -> i32 {
    if cursor.is_null() || row.is_null() {
        return ERR_FAIL;
    }
    let c = &mut *(cursor as *mut RangeCursor);
    if c.next > c.stop {
        return ROW_DONE;
    }
    *row = SiltValue::integer(c.next);
    c.next += 1;
    ERR_OK
}

unsafe extern "C" fn range_close(cursor: *mut c_void) {
    if !cursor.is_null() {
        drop(Box::from_raw(cursor as *mut RangeCursor));
    }
}

// -----------------------------
// Entry point
// -----------------------------

fn name(bytes: &'static [u8]) -> *const c_char {
    debug_assert_eq!(bytes.last(), Some(&0));
    bytes.as_ptr() as *const c_char
}

/// The host resolves this symbol, passes its ABI version, and expects our
/// required minimum back.
///
/// # Safety
/// `api` must point to a live `ExtensionApi` for the duration of the call.
#[no_mangle]
pub unsafe extern "C" fn silt_extension_init(api: *const ExtensionApi, _host_version: u32) -> u32 {
    let Some(api) = api.as_ref() else {
        return INIT_FAIL;
    };

    let double_def = ScalarDef {
        name: name(b"double_it\0"),
        min_args: 1,
        max_args: 1,
        invoke: double_it,
        free_result: None,
    };
    let version_def = ScalarDef {
        name: name(b"mathx_version\0"),
        min_args: 0,
        max_args: 0,
        invoke: mathx_version,
        free_result: Some(free_owned_value),
    };
    let product_def = AggregateDef {
        name: name(b"product\0"),
        min_args: 1,
        max_args: 1,
        init: product_init,
        step: product_step,
        fin: product_fin,
        free_result: None,
    };
    let range_def = TableFnDef {
        name: name(b"int_range\0"),
        min_args: 2,
        max_args: 2,
        n_cols: 1,
        open: range_open,
        next: range_next,
        close: range_close,
        free_result: None,
    };

    if (api.register_scalar)(api.ctx, &double_def) != ERR_OK
        || (api.register_scalar)(api.ctx, &version_def) != ERR_OK
        || (api.register_aggregate)(api.ctx, &product_def) != ERR_OK
        || (api.register_table_fn)(api.ctx, &range_def) != ERR_OK
    {
        return INIT_FAIL;
    }
    SILT_ABI_VERSION
}

#[cfg(test)]
mod tests {
    use super::*;
    use silt_abi::value::TAG_TEXT;

    #[test]
    fn double_it_doubles_integers() {
        let arg = SiltValue::integer(21);
        let mut out = SiltValue::null();
        let rc = unsafe { double_it(1, &arg, &mut out) };
        assert_eq!(rc, ERR_OK);
        assert_eq!(out.tag, TAG_INTEGER);
        assert_eq!(out.int, 42);
    }

    #[test]
    fn double_it_rejects_text() {
        let arg = SiltValue::text_static("nope");
        let mut out = SiltValue::null();
        assert_eq!(unsafe { double_it(1, &arg, &mut out) }, ERR_FAIL);
    }

    #[test]
    fn version_result_is_owned_text() {
        let mut out = SiltValue::null();
        assert_eq!(unsafe { mathx_version(0, ptr::null(), &mut out) }, ERR_OK);
        assert_eq!(out.tag, TAG_TEXT);
        let s = unsafe { std::slice::from_raw_parts(out.ptr, out.len) };
        assert!(std::str::from_utf8(s).unwrap().starts_with("mathx "));
        unsafe { free_owned_value(out) };
    }

    #[test]
    fn product_aggregate_multiplies() {
        let state = unsafe { product_init() };
        for x in [2i64, 3, 7] {
            let arg = SiltValue::integer(x);
            assert_eq!(unsafe { product_step(state, 1, &arg) }, ERR_OK);
        }
        let mut out = SiltValue::null();
        assert_eq!(unsafe { product_fin(state, &mut out) }, ERR_OK);
        assert_eq!(out.real, 42.0);
    }

    #[test]
    fn int_range_iterates_inclusive_bounds() {
        let args = [SiltValue::integer(1), SiltValue::integer(3)];
        let cursor = unsafe { range_open(2, args.as_ptr()) };
        assert!(!cursor.is_null());

        let mut seen = Vec::new();
        loop {
            let mut row = SiltValue::null();
            match unsafe { range_next(cursor, &mut row) } {
                ERR_OK => seen.push(row.int),
                ROW_DONE => break,
                rc => panic!("unexpected rc {rc}"),
            }
        }
        unsafe { range_close(cursor) };
        assert_eq!(seen, vec![1, 2, 3]);
    }
}
