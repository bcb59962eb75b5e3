//! The foreign boundary: the only two calls the native engine exposes.
//!
//! ```text
//!   send(subsystem, json) -> bool      fire-and-forget, false = rejected outright
//!   poll(subsystem)       -> json?     dequeue at most one event, NULL = empty
//! ```
//!
//! `ForeignBoundary` adapts the engine's C symbols to the [`Boundary`] trait.
//! Strings returned by `poll` are owned by the engine and handed back through
//! its `free` function.

use std::ffi::{c_char, CStr, CString};

/// Polling-based transport to the engine, one independent queue per subsystem.
pub trait Boundary: Send + Sync {
    /// Hand a payload to the engine. `false` means the call was rejected
    /// (e.g. engine not initialised), not that the operation failed.
    fn send(&self, subsystem: &str, payload: &str) -> bool;

    /// Dequeue the next pending event for `subsystem`, if any.
    fn poll(&self, subsystem: &str) -> Option<String>;
}

pub type SendFn = unsafe extern "C" fn(subsystem: *const c_char, payload: *const c_char) -> bool;
pub type PollFn = unsafe extern "C" fn(subsystem: *const c_char) -> *mut c_char;
pub type FreeFn = unsafe extern "C" fn(ptr: *mut c_char);

/// [`Boundary`] over the engine's exported C functions.
#[derive(Clone, Copy)]
pub struct ForeignBoundary {
    send_fn: SendFn,
    poll_fn: PollFn,
    free_fn: FreeFn,
}

impl ForeignBoundary {
    /// # Safety
    ///
    /// The functions must follow the engine contract: `send` and `poll` accept
    /// NUL-terminated UTF-8, `poll` returns NULL or a NUL-terminated string that
    /// stays valid until passed to `free`, and all three are callable from any
    /// thread.
    pub unsafe fn new(send_fn: SendFn, poll_fn: PollFn, free_fn: FreeFn) -> Self {
        Self {
            send_fn,
            poll_fn,
            free_fn,
        }
    }
}

impl Boundary for ForeignBoundary {
    fn send(&self, subsystem: &str, payload: &str) -> bool {
        let (Ok(subsystem_c), Ok(payload_c)) = (CString::new(subsystem), CString::new(payload))
        else {
            log::warn!("[{subsystem}] refusing to send payload with interior NUL");
            return false;
        };
        // SAFETY: both pointers are valid NUL-terminated strings for the call.
        unsafe { (self.send_fn)(subsystem_c.as_ptr(), payload_c.as_ptr()) }
    }

    fn poll(&self, subsystem: &str) -> Option<String> {
        let subsystem_c = CString::new(subsystem).ok()?;
        // SAFETY: subsystem_c outlives the call.
        let ptr = unsafe { (self.poll_fn)(subsystem_c.as_ptr()) };
        if ptr.is_null() {
            return None;
        }

        // SAFETY: non-null poll results are NUL-terminated and owned by the
        // engine until released with free_fn below.
        let text = unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned();
        unsafe { (self.free_fn)(ptr) };

        // Lossy text still counts as a payload so the drain loop keeps going;
        // the codec rejects it downstream.
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    static SENT: Mutex<Vec<(String, String)>> = Mutex::new(Vec::new());
    static QUEUE: Mutex<VecDeque<CString>> = Mutex::new(VecDeque::new());

    unsafe extern "C" fn test_send(subsystem: *const c_char, payload: *const c_char) -> bool {
        let subsystem = CStr::from_ptr(subsystem).to_string_lossy().into_owned();
        let payload = CStr::from_ptr(payload).to_string_lossy().into_owned();
        SENT.lock().unwrap().push((subsystem, payload));
        true
    }

    unsafe extern "C" fn test_poll(_subsystem: *const c_char) -> *mut c_char {
        match QUEUE.lock().unwrap().pop_front() {
            Some(s) => s.into_raw(),
            None => std::ptr::null_mut(),
        }
    }

    unsafe extern "C" fn test_free(ptr: *mut c_char) {
        drop(CString::from_raw(ptr));
    }

    unsafe extern "C" fn empty_poll(_subsystem: *const c_char) -> *mut c_char {
        std::ptr::null_mut()
    }

    #[test]
    fn test_foreign_send_and_poll() {
        let boundary = unsafe { ForeignBoundary::new(test_send, test_poll, test_free) };

        assert!(boundary.send("file_tree", r#"{"type":"Snapshot"}"#));
        assert_eq!(
            SENT.lock().unwrap().last().cloned(),
            Some(("file_tree".to_string(), r#"{"type":"Snapshot"}"#.to_string()))
        );

        QUEUE
            .lock()
            .unwrap()
            .push_back(CString::new(r#"{"type":"GroupDeleted","id":"g1"}"#).unwrap());
        assert_eq!(
            boundary.poll("file_tree").as_deref(),
            Some(r#"{"type":"GroupDeleted","id":"g1"}"#)
        );
        assert!(boundary.poll("file_tree").is_none());
    }

    #[test]
    fn test_foreign_send_rejects_interior_nul() {
        let boundary = unsafe { ForeignBoundary::new(test_send, empty_poll, test_free) };
        assert!(!boundary.send("chat_panel", "bad\0payload"));
    }

    #[test]
    fn test_foreign_null_poll_is_empty() {
        let boundary = unsafe { ForeignBoundary::new(test_send, empty_poll, test_free) };
        assert!(boundary.poll("network").is_none());
    }
}
