//! The raw engine call surface.
//!
//! [`Engine`] mirrors the native ABI of the round-robin storage engine one to
//! one: raw C strings in, out-pointers written by the engine, and an
//! engine-allocated error string (or null) as the return value. Everything
//! above this trait is safe Rust; everything below it is foreign code.
//!
//! The production implementation is [`Librrd`], available with the `librrd`
//! cargo feature. It links the system librrd and translates its
//! thread-local error state into the error-string convention used here.
//!
//! # Memory
//!
//! Every pointer an engine hands back (error strings, name arrays and their
//! elements, value matrices) is owned by the caller afterwards and must be
//! released with the function returned by [`Engine::releaser`], exactly once.
//! The gateway and [`ForeignMatrix`](crate::matrix::ForeignMatrix) are the
//! only places that do so.

use std::ffi::c_void;

use libc::{c_char, c_int, c_ulong, time_t};

/// Deallocator for memory handed out by an engine.
pub type Release = unsafe fn(*mut c_void);

/// Releases memory that was allocated with the C allocator.
///
/// # Safety
///
/// `ptr` must be null or a live allocation from `malloc`/`strdup` that no
/// one else will release.
pub unsafe fn release_with_free(ptr: *mut c_void) {
    // SAFETY: The caller guarantees `ptr` is null or an unreleased C
    // allocation; `free(NULL)` is a no-op.
    unsafe { libc::free(ptr) }
}

/// The native call surface of the storage engine.
///
/// Each method returns null on success, or an error message allocated by the
/// engine that the caller must release with [`Engine::releaser`].
///
/// # Safety
///
/// Implementations must honor the pointer contracts documented on each
/// method, and must allocate every returned buffer so that [`Engine::releaser`]
/// can free it.
pub unsafe trait Engine {
    /// Creates a new store at `filename`.
    ///
    /// # Safety
    ///
    /// `filename` must be a valid C string and `argv` must point to `argc`
    /// valid C strings, all alive for the duration of the call.
    unsafe fn create(
        &self,
        filename: *const c_char,
        step: c_ulong,
        start: time_t,
        argc: c_int,
        argv: *const *const c_char,
    ) -> *mut c_char;

    /// Appends the samples in `argv` to the store at `filename`.
    ///
    /// # Safety
    ///
    /// `filename` must be a valid C string, `template` null or a valid C
    /// string, and `argv` must point to `argc` valid C strings.
    unsafe fn update(
        &self,
        filename: *const c_char,
        template: *const c_char,
        argc: c_int,
        argv: *const *const c_char,
    ) -> *mut c_char;

    /// Fetches a matrix for one consolidation function.
    ///
    /// On success the engine overwrites `start`, `end` and `step` with the
    /// bounds it actually used and writes the column count, a names array of
    /// `ds_cnt` strings and a row-major value buffer.
    ///
    /// # Safety
    ///
    /// `filename` and `cf` must be valid C strings; every out-pointer must be
    /// valid for writes.
    #[allow(clippy::too_many_arguments)]
    unsafe fn fetch(
        &self,
        filename: *const c_char,
        cf: *const c_char,
        start: *mut time_t,
        end: *mut time_t,
        step: *mut c_ulong,
        ds_cnt: *mut c_ulong,
        ds_names: *mut *mut *mut c_char,
        data: *mut *mut f64,
    ) -> *mut c_char;

    /// Runs an export over the definitions in `argv`.
    ///
    /// Not reentrant: callers must serialize all invocations process-wide.
    ///
    /// # Safety
    ///
    /// `argv` must point to `argc` valid C strings followed by a null pointer;
    /// the engine may permute the pointer array (but not the strings). Every
    /// out-pointer must be valid for writes.
    #[allow(clippy::too_many_arguments)]
    unsafe fn xport(
        &self,
        argc: c_int,
        argv: *mut *mut c_char,
        xsize: *mut c_int,
        start: *mut time_t,
        end: *mut time_t,
        step: *mut c_ulong,
        col_cnt: *mut c_ulong,
        legends: *mut *mut *mut c_char,
        data: *mut *mut f64,
    ) -> *mut c_char;

    /// Returns the deallocator for memory this engine hands out.
    fn releaser(&self) -> Release {
        release_with_free
    }
}

#[cfg(feature = "librrd")]
pub use self::librrd::Librrd;

#[cfg(feature = "librrd")]
mod librrd {
    use std::ptr;

    use libc::{c_char, c_int, c_ulong, time_t};

    use super::Engine;

    #[link(name = "rrd")]
    unsafe extern "C" {
        fn rrd_create_r(
            filename: *const c_char,
            pdp_step: c_ulong,
            last_up: time_t,
            argc: c_int,
            argv: *const *const c_char,
        ) -> c_int;

        fn rrd_update_r(
            filename: *const c_char,
            template: *const c_char,
            argc: c_int,
            argv: *const *const c_char,
        ) -> c_int;

        fn rrd_fetch_r(
            filename: *const c_char,
            cf: *const c_char,
            start: *mut time_t,
            end: *mut time_t,
            step: *mut c_ulong,
            ds_cnt: *mut c_ulong,
            ds_namv: *mut *mut *mut c_char,
            data: *mut *mut f64,
        ) -> c_int;

        fn rrd_xport(
            argc: c_int,
            argv: *mut *mut c_char,
            xsize: *mut c_int,
            start: *mut time_t,
            end: *mut time_t,
            step: *mut c_ulong,
            col_cnt: *mut c_ulong,
            legend_v: *mut *mut *mut c_char,
            data: *mut *mut f64,
        ) -> c_int;

        fn rrd_test_error() -> c_int;
        fn rrd_get_error() -> *mut c_char;
        fn rrd_clear_error();
    }

    /// The system librrd.
    ///
    /// A unit handle; librrd keeps its error state per thread, so the same
    /// value can be shared freely.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct Librrd;

    /// Converts librrd's thread-local error state into an owned message.
    ///
    /// Must run on the thread that made the call, right after it.
    fn take_error(status: c_int) -> *mut c_char {
        // SAFETY: librrd's error accessors only touch the calling thread's
        // context.
        unsafe {
            if status == 0 && rrd_test_error() == 0 {
                return ptr::null_mut();
            }
            let message = rrd_get_error();
            let owned = if message.is_null() || *message == 0 {
                libc::strdup(c"unknown librrd error".as_ptr())
            } else {
                libc::strdup(message)
            };
            rrd_clear_error();
            owned
        }
    }

    // SAFETY: librrd allocates every returned buffer with malloc, and the
    // error strings are strdup'd above, so `free` releases all of them.
    unsafe impl Engine for Librrd {
        unsafe fn create(
            &self,
            filename: *const c_char,
            step: c_ulong,
            start: time_t,
            argc: c_int,
            argv: *const *const c_char,
        ) -> *mut c_char {
            // SAFETY: Pointer validity is forwarded from the caller's contract.
            let status = unsafe {
                rrd_clear_error();
                rrd_create_r(filename, step, start, argc, argv)
            };
            take_error(status)
        }

        unsafe fn update(
            &self,
            filename: *const c_char,
            template: *const c_char,
            argc: c_int,
            argv: *const *const c_char,
        ) -> *mut c_char {
            // SAFETY: Pointer validity is forwarded from the caller's contract.
            let status = unsafe {
                rrd_clear_error();
                rrd_update_r(filename, template, argc, argv)
            };
            take_error(status)
        }

        unsafe fn fetch(
            &self,
            filename: *const c_char,
            cf: *const c_char,
            start: *mut time_t,
            end: *mut time_t,
            step: *mut c_ulong,
            ds_cnt: *mut c_ulong,
            ds_names: *mut *mut *mut c_char,
            data: *mut *mut f64,
        ) -> *mut c_char {
            // SAFETY: Pointer validity is forwarded from the caller's contract.
            let status = unsafe {
                rrd_clear_error();
                rrd_fetch_r(filename, cf, start, end, step, ds_cnt, ds_names, data)
            };
            take_error(status)
        }

        unsafe fn xport(
            &self,
            argc: c_int,
            argv: *mut *mut c_char,
            xsize: *mut c_int,
            start: *mut time_t,
            end: *mut time_t,
            step: *mut c_ulong,
            col_cnt: *mut c_ulong,
            legends: *mut *mut *mut c_char,
            data: *mut *mut f64,
        ) -> *mut c_char {
            // SAFETY: Pointer validity is forwarded from the caller's contract;
            // the caller holds the xport lock.
            let status = unsafe {
                rrd_clear_error();
                rrd_xport(argc, argv, xsize, start, end, step, col_cnt, legends, data)
            };
            take_error(status)
        }
    }
}
