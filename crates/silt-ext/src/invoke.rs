//! Runtime bridge between engine values and native capability thunks.
//!
//! Argument buffers stay host-owned and outlive exactly one thunk call.
//! Result buffers are copied out immediately and handed back to the module
//! through its `free_result`, so no native allocation outlives the call.
//! Every dispatch re-checks owner liveness via [`LifecycleManager::begin_call`].

use silt_abi::ffi::{FreeValueFn, TableCloseFn, ERR_FAIL, ERR_OK, ROW_DONE};
use silt_abi::value::{SiltValue, TAG_BLOB, TAG_INTEGER, TAG_NULL, TAG_REAL, TAG_TEXT};
use std::ffi::c_void;

use crate::errors::{ExtError, Result};
use crate::lifecycle::LifecycleManager;
use crate::registry::{CapabilityDescriptor, CapabilityImpl};
use crate::value::Value;

fn to_abi(v: &Value) -> SiltValue {
    match v {
        Value::Null => SiltValue::null(),
        Value::Integer(i) => SiltValue::integer(*i),
        Value::Real(r) => SiltValue::real(*r),
        Value::Text(s) => SiltValue {
            tag: TAG_TEXT,
            ptr: s.as_ptr(),
            len: s.len(),
            ..SiltValue::null()
        },
        Value::Blob(b) => SiltValue {
            tag: TAG_BLOB,
            ptr: b.as_ptr(),
            len: b.len(),
            ..SiltValue::null()
        },
    }
}

fn from_abi(raw: &SiltValue, capability: &str) -> Result<Value> {
    match raw.tag {
        TAG_NULL => Ok(Value::Null),
        TAG_INTEGER => Ok(Value::Integer(raw.int)),
        TAG_REAL => Ok(Value::Real(raw.real)),
        TAG_TEXT => {
            if raw.ptr.is_null() {
                return Ok(Value::Text(String::new()));
            }
            let bytes = unsafe { std::slice::from_raw_parts(raw.ptr, raw.len) };
            match std::str::from_utf8(bytes) {
                Ok(s) => Ok(Value::Text(s.to_string())),
                Err(_) => Err(ExtError::MalformedResult {
                    capability: capability.to_string(),
                    tag: raw.tag,
                }),
            }
        }
        TAG_BLOB => {
            if raw.ptr.is_null() {
                return Ok(Value::Blob(Vec::new()));
            }
            let bytes = unsafe { std::slice::from_raw_parts(raw.ptr, raw.len) };
            Ok(Value::Blob(bytes.to_vec()))
        }
        tag => Err(ExtError::MalformedResult {
            capability: capability.to_string(),
            tag,
        }),
    }
}

/// Hand a TEXT/BLOB result buffer back to the module once it has been copied.
fn release(raw: SiltValue, free: Option<FreeValueFn>) {
    if let Some(free) = free {
        if (raw.tag == TAG_TEXT || raw.tag == TAG_BLOB) && !raw.ptr.is_null() {
            unsafe { free(raw) };
        }
    }
}

fn native_error(desc: &CapabilityDescriptor, code: i32) -> ExtError {
    ExtError::NativeError {
        capability: desc.name.clone(),
        code,
    }
}

pub(crate) fn call_scalar(
    mgr: &LifecycleManager,
    desc: &CapabilityDescriptor,
    args: &[Value],
) -> Result<Value> {
    let _live = mgr.begin_call(desc.owner, &desc.name)?;
    let CapabilityImpl::Scalar {
        invoke,
        free_result,
    } = desc.imp
    else {
        return Err(ExtError::InvalidSignature {
            name: desc.name.clone(),
            reason: "capability is not a scalar function".to_string(),
        });
    };

    let abi_args: Vec<SiltValue> = args.iter().map(to_abi).collect();
    let mut out = SiltValue::null();
    let rc = unsafe { invoke(abi_args.len() as u32, abi_args.as_ptr(), &mut out) };
    if rc != ERR_OK {
        return Err(native_error(desc, rc));
    }

    let converted = from_abi(&out, &desc.name);
    release(out, free_result);
    converted
}

pub(crate) fn call_aggregate(
    mgr: &LifecycleManager,
    desc: &CapabilityDescriptor,
    rows: &[Vec<Value>],
) -> Result<Value> {
    let _live = mgr.begin_call(desc.owner, &desc.name)?;
    let CapabilityImpl::Aggregate {
        init,
        step,
        fin,
        free_result,
    } = desc.imp
    else {
        return Err(ExtError::InvalidSignature {
            name: desc.name.clone(),
            reason: "capability is not an aggregate".to_string(),
        });
    };

    let state = unsafe { init() };
    if state.is_null() {
        return Err(native_error(desc, ERR_FAIL));
    }

    for row in rows {
        if !desc.accepts_arity(row.len()) {
            finish_discarding(fin, free_result, state);
            return Err(ExtError::ArityMismatch {
                name: desc.name.clone(),
                given: row.len(),
                min: desc.min_args,
                max: desc.max_args,
            });
        }
        let abi_args: Vec<SiltValue> = row.iter().map(to_abi).collect();
        let rc = unsafe { step(state, abi_args.len() as u32, abi_args.as_ptr()) };
        if rc != ERR_OK {
            finish_discarding(fin, free_result, state);
            return Err(native_error(desc, rc));
        }
    }

    let mut out = SiltValue::null();
    let rc = unsafe { fin(state, &mut out) };
    if rc != ERR_OK {
        return Err(native_error(desc, rc));
    }
    let converted = from_abi(&out, &desc.name);
    release(out, free_result);
    converted
}

/// Finalize consumes the aggregate state; run it on the error path too so the
/// module can release whatever `init` allocated.
fn finish_discarding(
    fin: silt_abi::ffi::AggFinalFn,
    free_result: Option<FreeValueFn>,
    state: *mut c_void,
) {
    let mut scratch = SiltValue::null();
    let rc = unsafe { fin(state, &mut scratch) };
    if rc == ERR_OK {
        release(scratch, free_result);
    }
}

/// Cursor that is always closed, including on conversion errors.
struct Cursor {
    raw: *mut c_void,
    close: TableCloseFn,
}

impl Drop for Cursor {
    fn drop(&mut self) {
        unsafe { (self.close)(self.raw) };
    }
}

pub(crate) fn call_table_fn(
    mgr: &LifecycleManager,
    desc: &CapabilityDescriptor,
    args: &[Value],
) -> Result<Vec<Vec<Value>>> {
    // the guard spans the whole iteration; unload waits for it
    let _live = mgr.begin_call(desc.owner, &desc.name)?;
    let CapabilityImpl::TableValued {
        n_cols,
        open,
        next,
        close,
        free_result,
    } = desc.imp
    else {
        return Err(ExtError::InvalidSignature {
            name: desc.name.clone(),
            reason: "capability is not a table-valued function".to_string(),
        });
    };

    let abi_args: Vec<SiltValue> = args.iter().map(to_abi).collect();
    let raw = unsafe { open(abi_args.len() as u32, abi_args.as_ptr()) };
    if raw.is_null() {
        return Err(native_error(desc, ERR_FAIL));
    }
    let cursor = Cursor { raw, close };

    let mut rows = Vec::new();
    loop {
        let mut row_buf = vec![SiltValue::null(); n_cols as usize];
        let rc = unsafe { next(cursor.raw, row_buf.as_mut_ptr()) };
        match rc {
            ROW_DONE => break,
            ERR_OK => {
                // release every cell buffer even if one fails to convert
                let mut row = Ok(Vec::with_capacity(n_cols as usize));
                for cell in &row_buf {
                    let converted = from_abi(cell, &desc.name);
                    release(*cell, free_result);
                    if let Ok(cells) = row.as_mut() {
                        match converted {
                            Ok(v) => cells.push(v),
                            Err(e) => row = Err(e),
                        }
                    }
                }
                rows.push(row?);
            }
            rc => return Err(native_error(desc, rc)),
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abi_round_trip_preserves_each_type() {
        for v in [
            Value::Null,
            Value::Integer(-7),
            Value::Real(2.5),
            Value::Text("héllo".into()),
            Value::Blob(vec![0, 159, 146, 150]),
        ] {
            let raw = to_abi(&v);
            assert_eq!(from_abi(&raw, "t").unwrap(), v);
        }
    }

    #[test]
    fn unknown_tag_is_malformed_not_ub() {
        let raw = SiltValue {
            tag: 99,
            ..SiltValue::null()
        };
        let err = from_abi(&raw, "mystery").unwrap_err();
        assert!(matches!(err, ExtError::MalformedResult { tag: 99, .. }));
    }

    #[test]
    fn invalid_utf8_text_is_malformed() {
        let bytes = [0xffu8, 0xfe];
        let raw = SiltValue {
            tag: TAG_TEXT,
            ptr: bytes.as_ptr(),
            len: bytes.len(),
            ..SiltValue::null()
        };
        assert!(from_abi(&raw, "t").is_err());
    }
}
