// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Direct-call checkpointing through a dynamically loaded `libcriu`.
//!
//! The library is opened at runtime so hosts without it still build and
//! run; failing to load it is the capability probe's negative answer.

use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use super::transport::{CheckpointTransport, ServiceHandles};
use super::wire::{SnapshotRequest, SnapshotResult};
use crate::error::{TransportError, WaypointResult};

/// Sonames tried in order.
const LIBRARY_NAMES: [&CStr; 2] = [c"libcriu.so.2", c"libcriu.so"];

type InitOptsFn = unsafe extern "C" fn(*mut *mut c_void) -> c_int;
type SetServiceAddressFn = unsafe extern "C" fn(*mut c_void, *const c_char) -> c_int;
type SetIntFn = unsafe extern "C" fn(*mut c_void, c_int);
type SetBoolFn = unsafe extern "C" fn(*mut c_void, bool);
type DumpFn = unsafe extern "C" fn(*mut c_void) -> c_int;
type FreeOptsFn = unsafe extern "C" fn(*mut c_void);

/// Something that performs a blocking self-dump and returns the raw code:
/// negative on error, 0 once the image is written, 1 when resuming from it.
pub trait DumpLibrary {
    fn dump(&self, request: &SnapshotRequest, service_address: &Path) -> Result<i32, TransportError>;
}

/// Handle to a `dlopen`ed shared library.
struct DynLib {
    handle: *mut c_void,
}

impl DynLib {
    fn open(name: &CStr) -> Result<Self, String> {
        // SAFETY: name is a valid C string.
        let handle = unsafe { libc::dlopen(name.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };
        if handle.is_null() {
            return Err(last_dl_error());
        }
        Ok(Self { handle })
    }

    /// # Safety
    /// `T` must be the function pointer type matching the symbol.
    unsafe fn sym<T: Copy>(&self, name: &CStr) -> Result<T, String> {
        libc::dlerror();
        let ptr = libc::dlsym(self.handle, name.as_ptr());
        if ptr.is_null() {
            return Err(format!("{}: {}", name.to_string_lossy(), last_dl_error()));
        }
        Ok(std::mem::transmute_copy::<*mut c_void, T>(&ptr))
    }
}

impl Drop for DynLib {
    fn drop(&mut self) {
        // SAFETY: handle came from a successful dlopen.
        unsafe {
            libc::dlclose(self.handle);
        }
    }
}

fn last_dl_error() -> String {
    // SAFETY: dlerror returns null or a valid C string.
    let err = unsafe { libc::dlerror() };
    if err.is_null() {
        "unknown dlopen error".to_string()
    } else {
        unsafe { CStr::from_ptr(err) }.to_string_lossy().into_owned()
    }
}

/// Resolved `libcriu` entry points.
pub struct LibCriu {
    init_opts: InitOptsFn,
    set_service_address: SetServiceAddressFn,
    set_images_dir_fd: SetIntFn,
    set_log_level: SetIntFn,
    set_leave_running: SetBoolFn,
    dump: DumpFn,
    free_opts: FreeOptsFn,
    // Keeps the function pointers above valid.
    _lib: DynLib,
}

impl LibCriu {
    /// Load the library and resolve every symbol.
    pub fn load() -> Result<Self, TransportError> {
        let mut failures = Vec::with_capacity(LIBRARY_NAMES.len());
        let lib = LIBRARY_NAMES
            .iter()
            .find_map(|name| match DynLib::open(name) {
                Ok(lib) => Some(lib),
                Err(e) => {
                    failures.push(e);
                    None
                }
            })
            .ok_or_else(|| TransportError::LibraryUnavailable {
                reason: failures.join("; "),
            })?;

        let unavailable = |reason: String| TransportError::LibraryUnavailable { reason };

        // SAFETY: each type alias matches the libcriu prototype of its symbol.
        let loaded = unsafe {
            Self {
                init_opts: lib.sym(c"criu_local_init_opts").map_err(unavailable)?,
                set_service_address: lib
                    .sym(c"criu_local_set_service_address")
                    .map_err(unavailable)?,
                set_images_dir_fd: lib.sym(c"criu_local_set_images_dir_fd").map_err(unavailable)?,
                set_log_level: lib.sym(c"criu_local_set_log_level").map_err(unavailable)?,
                set_leave_running: lib.sym(c"criu_local_set_leave_running").map_err(unavailable)?,
                dump: lib.sym(c"criu_local_dump").map_err(unavailable)?,
                free_opts: lib.sym(c"criu_local_free_opts").map_err(unavailable)?,
                _lib: lib,
            }
        };

        tracing::debug!("Checkpoint library loaded");
        Ok(loaded)
    }
}

impl DumpLibrary for LibCriu {
    fn dump(&self, request: &SnapshotRequest, service_address: &Path) -> Result<i32, TransportError> {
        let address = CString::new(service_address.as_os_str().as_bytes()).map_err(|e| {
            TransportError::Encode {
                reason: format!("service address: {}", e),
            }
        })?;

        let mut opts: *mut c_void = std::ptr::null_mut();
        // SAFETY: opts is an out-pointer filled by the library; every setter
        // receives the handle it returned, which is freed exactly once below.
        unsafe {
            if (self.init_opts)(&mut opts) < 0 || opts.is_null() {
                return Err(TransportError::Encode {
                    reason: "criu_local_init_opts failed".to_string(),
                });
            }

            let code = if (self.set_service_address)(opts, address.as_ptr()) < 0 {
                Err(TransportError::Encode {
                    reason: "criu_local_set_service_address failed".to_string(),
                })
            } else {
                (self.set_images_dir_fd)(opts, request.images_dir_fd);
                (self.set_log_level)(opts, c_int::from(request.log_level.value()));
                (self.set_leave_running)(opts, request.leave_running);
                Ok((self.dump)(opts))
            };

            (self.free_opts)(opts);
            code
        }
    }
}

/// Transport that calls the dump entry point in-process.
pub struct DirectTransport<L> {
    library: L,
    service_address: PathBuf,
}

impl<L: DumpLibrary> DirectTransport<L> {
    pub fn new(library: L, service_address: impl Into<PathBuf>) -> Self {
        Self {
            library,
            service_address: service_address.into(),
        }
    }
}

impl<L: DumpLibrary> CheckpointTransport for DirectTransport<L> {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn dump(
        &mut self,
        request: &SnapshotRequest,
        _handles: &mut ServiceHandles,
    ) -> WaypointResult<SnapshotResult> {
        let code = self.library.dump(request, &self.service_address)?;
        tracing::debug!(code = code, "Direct dump returned");
        Ok(SnapshotResult::from_dump_code(code)?)
    }
}
