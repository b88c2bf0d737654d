//! C ABI entry points.
//!
//! Foreign callbacks have nowhere to carry a context pointer, so the
//! embedding bootstrap installs one pipeline process-wide with
//! [`install_global`] and every exported function resolves it from there.
//! Before installation every function is a no-op reporting failure.

#![allow(unsafe_code)]

use std::ffi::{CStr, c_char, c_int};
use std::sync::{Arc, OnceLock};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pipeline::Pipeline;
use crate::runtime::{RuntimeBridge, ThreadRef, TypeRef};

static GLOBAL_PIPELINE: OnceLock<Pipeline> = OnceLock::new();

/// Make `pipeline` the process-wide instance. Fails if one is already set,
/// in which case `pipeline` is shut down and dropped.
pub fn install_global(pipeline: Pipeline) -> Result<&'static Pipeline, PipelineError> {
    GLOBAL_PIPELINE
        .set(pipeline)
        .map_err(|_rejected| PipelineError::AlreadyInstalled)?;
    global()
}

/// Start a pipeline from a startup option string and install it.
pub fn start_global(
    options: &str,
    bridge: Arc<dyn RuntimeBridge>,
) -> Result<&'static Pipeline, PipelineError> {
    if GLOBAL_PIPELINE.get().is_some() {
        return Err(PipelineError::AlreadyInstalled);
    }
    let pipeline = Pipeline::start(PipelineConfig::from_options(options), bridge)?;
    install_global(pipeline)
}

/// The installed pipeline.
pub fn global() -> Result<&'static Pipeline, PipelineError> {
    GLOBAL_PIPELINE.get().ok_or(PipelineError::NotInstalled)
}

/// Write `[total_allocated, total_freed, current_usage, alloc_count,
/// free_count]` into `out`.
///
/// Returns 0 on success, -1 when no pipeline is installed, `out` is null or
/// `len < 5`.
///
/// # Safety
///
/// `out` must be valid for writes of `len` consecutive `i64`s.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn heapscope_get_memory_stats(out: *mut i64, len: usize) -> c_int {
    let Ok(pipeline) = global() else {
        return -1;
    };
    if out.is_null() || len < 5 {
        return -1;
    }
    let stats = pipeline.control().stats_array();
    for (i, value) in stats.into_iter().enumerate() {
        // SAFETY: caller guarantees `out` is valid for `len >= 5` writes.
        unsafe {
            out.add(i).write(i64::try_from(value).unwrap_or(i64::MAX));
        }
    }
    0
}

/// Send a command string.
///
/// Returns 1 if the command was recognised, 0 if it was ignored, -1 when no
/// pipeline is installed or `command` is null.
///
/// # Safety
///
/// `command` must point to a NUL-terminated string valid for the call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn heapscope_send_command(command: *const c_char) -> c_int {
    let Ok(pipeline) = global() else {
        return -1;
    };
    if command.is_null() {
        return -1;
    }
    // SAFETY: non-null and NUL-terminated per the caller contract.
    let text = unsafe { CStr::from_ptr(command) };
    match text.to_str() {
        Ok(text) => c_int::from(pipeline.control().send_command(text).is_some()),
        Err(_) => 0,
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn heapscope_is_active() -> bool {
    global().is_ok_and(Pipeline::is_active)
}

/// Approximate channel depth, or -1 when no pipeline is installed.
#[unsafe(no_mangle)]
pub extern "C" fn heapscope_event_queue_size() -> c_int {
    global().map_or(-1, |p| {
        c_int::try_from(p.control().queue_depth()).unwrap_or(c_int::MAX)
    })
}

/// `interval > 0` samples one in `interval`; otherwise record everything.
#[unsafe(no_mangle)]
pub extern "C" fn heapscope_set_sampling_interval(interval: c_int) {
    if let Ok(pipeline) = global() {
        pipeline.control().set_sampling_interval(i64::from(interval));
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn heapscope_notify_alloc(identity: u64, size: u64, type_ref: u64, thread_ref: u64) {
    if let Ok(pipeline) = global() {
        pipeline.notify_alloc(identity, size, TypeRef(type_ref), ThreadRef(thread_ref));
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn heapscope_notify_free(identity: u64) {
    if let Ok(pipeline) = global() {
        pipeline.notify_free(identity);
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn heapscope_notify_gc_start() {
    if let Ok(pipeline) = global() {
        pipeline.notify_gc_start();
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn heapscope_notify_gc_finish() {
    if let Ok(pipeline) = global() {
        pipeline.notify_gc_finish();
    }
}

/// Stop admitting events and wait for the consumer to drain.
#[unsafe(no_mangle)]
pub extern "C" fn heapscope_notify_shutdown() {
    if let Ok(pipeline) = global() {
        pipeline.notify_shutdown();
        pipeline.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::DetachedRuntime;
    use std::ffi::CString;

    // Single test: the global can only be installed once per process.
    #[test]
    fn global_lifecycle() {
        let mut stats = [0_i64; 5];
        // SAFETY: `stats` holds five writable i64s.
        assert_eq!(
            unsafe { heapscope_get_memory_stats(stats.as_mut_ptr(), stats.len()) },
            -1
        );
        assert!(!heapscope_is_active());
        assert_eq!(heapscope_event_queue_size(), -1);

        let pipeline = start_global("nosampling,capacity=256", Arc::new(DetachedRuntime))
            .expect("first install succeeds");
        assert!(heapscope_is_active());
        assert_eq!(pipeline.config().channel_capacity, 256);

        heapscope_notify_alloc(0x1000, 64, 1, 1);
        heapscope_notify_alloc(0x2000, 32, 1, 1);
        heapscope_notify_free(0x1000);
        heapscope_notify_free(0x9999);

        // SAFETY: `stats` holds five writable i64s.
        assert_eq!(
            unsafe { heapscope_get_memory_stats(stats.as_mut_ptr(), stats.len()) },
            0
        );
        assert_eq!(stats, [96, 64, 32, 2, 1]);
        // SAFETY: length check rejects the short buffer before any write.
        assert_eq!(unsafe { heapscope_get_memory_stats(stats.as_mut_ptr(), 4) }, -1);

        let cmd = CString::new("sampling:7").unwrap();
        // SAFETY: `cmd` is a valid NUL-terminated string.
        assert_eq!(unsafe { heapscope_send_command(cmd.as_ptr()) }, 1);
        assert_eq!(pipeline.control().sampling().1, 7);
        let bogus = CString::new("sampling:x").unwrap();
        // SAFETY: as above.
        assert_eq!(unsafe { heapscope_send_command(bogus.as_ptr()) }, 0);
        // SAFETY: null is explicitly handled.
        assert_eq!(unsafe { heapscope_send_command(std::ptr::null()) }, -1);

        heapscope_set_sampling_interval(0);
        assert!(!pipeline.control().sampling().0);

        assert!(matches!(
            start_global("", Arc::new(DetachedRuntime)),
            Err(PipelineError::AlreadyInstalled)
        ));

        heapscope_notify_shutdown();
        assert!(!heapscope_is_active());
        assert!(heapscope_event_queue_size() >= 0);
    }
}
