//! Kernel read-ahead / drop-behind hints (spec §4.2 steps 1 and 5d).
//!
//! Gated behind a small trait rather than `cfg!` sprinkled through
//! `engine.rs`. The `libc` bindings below follow the pack's own
//! precedent for raw syscalls at a narrow boundary (e.g. `libc::statvfs`
//! in Goldziher-kreuzberg's disk-space cache).

/// Advises the kernel about expected access patterns for a file.
pub trait FileHinting: Send + Sync {
    /// Called when an item becomes "next" (prefetched): the file's pages
    /// will be needed soon.
    fn advise_will_need(&self, path: &str);

    /// Called after a handler completes: the file's pages are no longer
    /// needed.
    fn advise_dont_need(&self, path: &str);
}

/// No-op implementation for platforms without `posix_fadvise`, or for
/// tests that don't want real syscalls in the hot path.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHinting;

impl FileHinting for NoopHinting {
    fn advise_will_need(&self, _path: &str) {}
    fn advise_dont_need(&self, _path: &str) {}
}

#[cfg(unix)]
pub use unix::PosixFadviseHinting;

#[cfg(unix)]
mod unix {
    use super::FileHinting;
    use std::fs::File;
    use std::os::unix::io::AsRawFd;

    /// Issues `posix_fadvise(POSIX_FADV_WILLNEED)` / `POSIX_FADV_DONTNEED`
    /// against the path, converting the file URL the same way the engine
    /// does before dispatch.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct PosixFadviseHinting;

    impl FileHinting for PosixFadviseHinting {
        fn advise_will_need(&self, path: &str) {
            self.advise(path, libc::POSIX_FADV_WILLNEED);
        }

        fn advise_dont_need(&self, path: &str) {
            self.advise(path, libc::POSIX_FADV_DONTNEED);
        }
    }

    impl PosixFadviseHinting {
        fn advise(&self, path: &str, advice: libc::c_int) {
            let Ok(file) = File::open(path) else {
                return;
            };
            let fd = file.as_raw_fd();
            // SAFETY: `fd` is a valid, open file descriptor for the
            // lifetime of this call; `posix_fadvise` does not retain it.
            let rc = unsafe { libc::posix_fadvise(fd, 0, 0, advice) };
            if rc != 0 {
                tracing::debug!(
                    target: "extract_core::hints",
                    path,
                    advice,
                    errno = rc,
                    "posix_fadvise failed, ignoring"
                );
            }
        }
    }
}
