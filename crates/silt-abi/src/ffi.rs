use core::ffi::{c_char, c_void};

use crate::value::SiltValue;

/// Bump this when you break the ABI. Host checks it against the value the
/// module's entry point reports as its required minimum.
pub const SILT_ABI_VERSION: u32 = 2; // was 1

/// Well-known exported symbol every extension must provide (the host accepts
/// a per-load override for modules built with a different convention).
pub const ENTRY_SYMBOL: &str = "silt_extension_init";

/// Sentinel return value from the entry point: hard init failure.
/// Any other return value is the module's required minimum host version.
pub const INIT_FAIL: u32 = u32::MAX;

pub const ERR_OK: i32 = 0;
pub const ERR_FAIL: i32 = 1;
/// Returned by a table-valued cursor's `next` when iteration is finished.
pub const ROW_DONE: i32 = 2;

// ---------- Function pointer types (C ABI) ----------

/// Scalar invocation thunk: `argv` holds `argc` values, result goes in `out`.
pub type ScalarFn =
    unsafe extern "C" fn(argc: u32, argv: *const SiltValue, out: *mut SiltValue) -> i32;

/// Releases a TEXT/BLOB result buffer the module allocated. The host calls it
/// once, right after copying the result out.
pub type FreeValueFn = unsafe extern "C" fn(v: SiltValue);

pub type AggInitFn = unsafe extern "C" fn() -> *mut c_void;
pub type AggStepFn =
    unsafe extern "C" fn(state: *mut c_void, argc: u32, argv: *const SiltValue) -> i32;
/// Finalize consumes the state (the host never touches it again).
pub type AggFinalFn = unsafe extern "C" fn(state: *mut c_void, out: *mut SiltValue) -> i32;

/// Opens a cursor over the table-valued function's rows. Null = open failure.
pub type TableOpenFn = unsafe extern "C" fn(argc: u32, argv: *const SiltValue) -> *mut c_void;
/// Fills `row` (an array of the declared column count) and returns `ERR_OK`,
/// or `ROW_DONE` when exhausted.
pub type TableNextFn = unsafe extern "C" fn(cursor: *mut c_void, row: *mut SiltValue) -> i32;
pub type TableCloseFn = unsafe extern "C" fn(cursor: *mut c_void);

pub type VtabConnectFn = unsafe extern "C" fn(argc: u32, argv: *const SiltValue) -> *mut c_void;
pub type VtabDisconnectFn = unsafe extern "C" fn(table: *mut c_void);

// ---------- Registration payloads ----------

/// Arity bounds: `min_args >= 0`; `max_args == -1` means unbounded.
#[repr(C)]
pub struct ScalarDef {
    pub name: *const c_char,
    pub min_args: i32,
    pub max_args: i32,
    pub invoke: ScalarFn,
    /// Null if every result the thunk produces is statically owned.
    pub free_result: Option<FreeValueFn>,
}

#[repr(C)]
pub struct AggregateDef {
    pub name: *const c_char,
    pub min_args: i32,
    pub max_args: i32,
    pub init: AggInitFn,
    pub step: AggStepFn,
    pub fin: AggFinalFn,
    pub free_result: Option<FreeValueFn>,
}

#[repr(C)]
pub struct TableFnDef {
    pub name: *const c_char,
    pub min_args: i32,
    pub max_args: i32,
    /// Number of columns each row carries; fixed for the function's lifetime.
    pub n_cols: u32,
    pub open: TableOpenFn,
    pub next: TableNextFn,
    pub close: TableCloseFn,
    pub free_result: Option<FreeValueFn>,
}

/// Virtual-table module vtable. The host only stores and resolves it; the
/// engine's planner drives `connect`/`disconnect`.
#[repr(C)]
pub struct VtabModule {
    pub version: u32,
    pub connect: VtabConnectFn,
    pub disconnect: VtabDisconnectFn,
}

#[repr(C)]
pub struct ModuleDef {
    pub name: *const c_char,
    pub module: *const VtabModule,
}

// ---------- Registration vtable ----------

pub type RegisterScalarFn = unsafe extern "C" fn(ctx: *mut c_void, def: *const ScalarDef) -> i32;
pub type RegisterAggregateFn =
    unsafe extern "C" fn(ctx: *mut c_void, def: *const AggregateDef) -> i32;
pub type RegisterTableFnFn = unsafe extern "C" fn(ctx: *mut c_void, def: *const TableFnDef) -> i32;
pub type RegisterModuleFn = unsafe extern "C" fn(ctx: *mut c_void, def: *const ModuleDef) -> i32;

/// Passed to the entry point for the duration of one init call. `ctx` is
/// host-owned and opaque; registrations made through a stashed copy after
/// init returns are rejected with `ERR_FAIL`.
#[repr(C)]
pub struct ExtensionApi {
    pub ctx: *mut c_void,
    pub register_scalar: RegisterScalarFn,
    pub register_aggregate: RegisterAggregateFn,
    pub register_table_fn: RegisterTableFnFn,
    pub register_module: RegisterModuleFn,
}

/// An extension exports `silt_extension_init` with this signature. It
/// registers its capabilities through `api` and returns the minimum host ABI
/// version it needs (or `INIT_FAIL`).
pub type ExtensionEntryFn = unsafe extern "C" fn(api: *const ExtensionApi, host_version: u32) -> u32;
