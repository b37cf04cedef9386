//! C ABI for koko-keywords
//!
//! The language bindings load this library and call
//! `c_koko_keywords_match(input, filter, version)`. Return values follow the
//! tagged-result convention: `1` matched, `0` not matched, negative codes for
//! failures (see `c_koko_keywords_error_description`).
//!
//! The legacy entry points share one process-default engine built lazily from
//! the environment. Hosts that want isolated engines use the
//! `koko_keywords_engine_*` functions instead.

use std::borrow::Cow;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::panic::{self, AssertUnwindSafe};
use std::sync::OnceLock;

use kk_core::types::{CODE_INVALID_FILTER, CODE_NOT_CONFIGURED};
use kk_core::{abi_code, error_description, Engine, MatchError};

/// Opaque engine handle for C callers.
#[repr(C)]
#[allow(non_camel_case_types)]
pub struct koko_keywords_engine {
    _private: [u8; 0],
}

impl koko_keywords_engine {
    fn from_engine(engine: Box<Engine>) -> *mut Self {
        Box::into_raw(engine) as *mut Self
    }

    /// # Safety
    /// Pointer must have come from `from_engine` and not been freed.
    unsafe fn as_engine<'a>(ptr: *const Self) -> &'a Engine {
        &*(ptr as *const Engine)
    }

    /// # Safety
    /// Pointer must have come from `from_engine`; it is consumed.
    unsafe fn into_engine(ptr: *mut Self) -> Box<Engine> {
        Box::from_raw(ptr as *mut Engine)
    }
}

static DEFAULT_ENGINE: OnceLock<Result<Engine, MatchError>> = OnceLock::new();

/// Process-default engine. A configuration failure is remembered and
/// reported on every call.
fn default_engine() -> Result<&'static Engine, MatchError> {
    DEFAULT_ENGINE
        .get_or_init(|| {
            let engine = Engine::from_env();
            if let Err(e) = &engine {
                log::error!("koko_keywords not initialized: {e}");
            }
            engine
        })
        .as_ref()
        .map_err(Clone::clone)
}

/// Borrow a C string, lossily. NULL reads as "".
///
/// # Safety
/// `ptr` must be NULL or a valid NUL-terminated string.
unsafe fn str_arg<'a>(ptr: *const c_char) -> Cow<'a, str> {
    if ptr.is_null() {
        Cow::Borrowed("")
    } else {
        CStr::from_ptr(ptr).to_string_lossy()
    }
}

/// Run `f`, turning a panic into a cache error so no unwind reaches C.
fn guarded<T>(f: impl FnOnce() -> Result<T, MatchError>) -> Result<T, MatchError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(_) => {
            log::error!("panic inside koko_keywords call");
            Err(MatchError::CacheUnavailable("internal error".to_string()))
        }
    }
}

/// Match `input` against the keyword dataset using the process-default engine.
///
/// # Returns
/// * `1` if a keyword accepted by `filter` occurs in `input`
/// * `0` if none does
/// * a negative error code otherwise
///
/// # Safety
/// * Each argument must be NULL or a valid NUL-terminated string
/// * NULL `filter` means no filter, NULL or empty `version` means the current dataset
///
/// # Example
/// ```c
/// int rc = c_koko_keywords_match("sewerslide", "category=self-harm", "");
/// if (rc < 0) {
///     fprintf(stderr, "%s\n", c_koko_keywords_error_description(rc));
/// }
/// ```
#[no_mangle]
pub unsafe extern "C" fn c_koko_keywords_match(
    input: *const c_char,
    filter: *const c_char,
    version: *const c_char,
) -> c_int {
    let (input, filter, version) = (str_arg(input), str_arg(filter), str_arg(version));
    abi_code(&guarded(|| {
        default_engine()?.is_match(&input, &filter, Some(&version))
    }))
}

/// Alias of [`c_koko_keywords_match`].
///
/// # Safety
/// Same contract as [`c_koko_keywords_match`].
#[no_mangle]
pub unsafe extern "C" fn koko_keywords_match(
    input: *const c_char,
    filter: *const c_char,
    version: *const c_char,
) -> c_int {
    c_koko_keywords_match(input, filter, version)
}

fn descriptions() -> &'static [(c_int, CString)] {
    static TABLE: OnceLock<Vec<(c_int, CString)>> = OnceLock::new();
    TABLE.get_or_init(|| {
        (CODE_INVALID_FILTER..=1)
            .map(|code| (code, CString::new(error_description(code)).unwrap_or_default()))
            .collect()
    })
}

fn unknown_description() -> &'static CStr {
    static UNKNOWN: OnceLock<CString> = OnceLock::new();
    UNKNOWN.get_or_init(|| CString::new(error_description(c_int::MIN)).unwrap_or_default())
}

/// Human-readable description of a return code.
///
/// The returned string is static; callers must not free it.
#[no_mangle]
pub extern "C" fn c_koko_keywords_error_description(code: c_int) -> *const c_char {
    descriptions()
        .iter()
        .find(|(c, _)| *c == code)
        .map_or_else(unknown_description, |(_, s)| s.as_c_str())
        .as_ptr()
}

/// Create an engine from the environment.
///
/// Returns `0` and stores the handle in `*out`, or a negative error code.
/// The handle must be released with [`koko_keywords_engine_free`].
///
/// # Safety
/// `out` must be NULL or a valid pointer to writable storage.
#[no_mangle]
pub unsafe extern "C" fn koko_keywords_engine_new(out: *mut *mut koko_keywords_engine) -> c_int {
    if out.is_null() {
        return CODE_NOT_CONFIGURED;
    }
    *out = std::ptr::null_mut();
    match guarded(Engine::from_env) {
        Ok(engine) => {
            *out = koko_keywords_engine::from_engine(Box::new(engine));
            0
        }
        Err(e) => e.code(),
    }
}

/// Match using an explicit engine. Arguments and return values as in
/// [`c_koko_keywords_match`]; a NULL engine yields `-1`.
///
/// # Safety
/// * `engine` must be NULL or a live handle from [`koko_keywords_engine_new`]
/// * String arguments as in [`c_koko_keywords_match`]
#[no_mangle]
pub unsafe extern "C" fn koko_keywords_engine_match(
    engine: *const koko_keywords_engine,
    input: *const c_char,
    filter: *const c_char,
    version: *const c_char,
) -> c_int {
    if engine.is_null() {
        return CODE_NOT_CONFIGURED;
    }
    let engine = koko_keywords_engine::as_engine(engine);
    let (input, filter, version) = (str_arg(input), str_arg(filter), str_arg(version));
    abi_code(&guarded(|| engine.is_match(&input, &filter, Some(&version))))
}

/// Release an engine handle. NULL is ignored.
///
/// # Safety
/// `engine` must be NULL or a handle from [`koko_keywords_engine_new`] that
/// has not been freed.
#[no_mangle]
pub unsafe extern "C" fn koko_keywords_engine_free(engine: *mut koko_keywords_engine) {
    if engine.is_null() {
        return;
    }
    let engine = koko_keywords_engine::into_engine(engine);
    if panic::catch_unwind(AssertUnwindSafe(move || engine.shutdown())).is_err() {
        log::error!("panic while releasing koko_keywords engine");
    }
}
