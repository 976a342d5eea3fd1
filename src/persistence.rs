//! Crash-Persistence Channel (spec §4.3): a one-slot rendezvous between a
//! supervising process and its extraction worker.
//!
//! The source negotiates a raw shared-memory FD out-of-band at worker
//! startup. This workspace has no supervisor/worker *process* split (the
//! worker is a dedicated thread within the same process, see
//! `src/engine.rs` and DESIGN.md ADR-0001), so the slot is backed by a
//! `memmap2`-mapped fixed-size file instead of `shm_open`. The FD-handoff
//! contract is preserved as `PersistenceSlot::from_fd` for a future split
//! into a real child process; the daemon uses `PersistenceSlot::open_at_path`.

use memmap2::{MmapMut, MmapOptions};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// Buffer size; large enough for any path the OS permits in practice
/// (spec §6: "a 2 KB buffer is sufficient in practice").
pub const SLOT_SIZE: usize = 2048;

/// The crash-victim rendezvous (spec glossary: "Persistence Slot").
pub struct PersistenceSlot {
    map: MmapMut,
}

impl PersistenceSlot {
    /// Open (creating if necessary) a fixed-size file at `path` and map it.
    pub fn open_at_path(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.set_len(SLOT_SIZE as u64)?;
        let map = unsafe { MmapOptions::new().len(SLOT_SIZE).map_mut(&file)? };
        Ok(Self { map })
    }

    /// Map an already-open file descriptor negotiated out-of-band (spec
    /// §6: "obtained from the supervising process via an out-of-band
    /// call returning a single FD"). Kept for a future split into a real
    /// supervisor/worker process pair; unused by the in-process daemon.
    #[cfg(unix)]
    pub fn from_fd(fd: std::os::unix::io::RawFd) -> std::io::Result<Self> {
        use std::os::unix::io::FromRawFd;
        let file = unsafe { std::fs::File::from_raw_fd(fd) };
        file.set_len(SLOT_SIZE as u64)?;
        let map = unsafe { MmapOptions::new().len(SLOT_SIZE).map_mut(&file)? };
        std::mem::forget(file); // ownership of the fd was handed to us, not duplicated
        Ok(Self { map })
    }

    /// Read the slot. Empty (first byte NUL) means "no victim" (spec
    /// §4.3 step 1, §3 invariant).
    pub fn read(&self) -> Option<String> {
        if self.map[0] == 0 {
            return None;
        }
        let end = self.map.iter().position(|&b| b == 0).unwrap_or(SLOT_SIZE);
        String::from_utf8(self.map[..end].to_vec()).ok()
    }

    /// Write `path` followed by a NUL terminator at offset 0, before the
    /// handler starts (spec §4.3 step 2). Padding beyond the terminator
    /// is irrelevant and left untouched.
    pub fn mark_current(&mut self, path: &str) -> std::io::Result<()> {
        let bytes = path.as_bytes();
        let len = bytes.len().min(SLOT_SIZE - 1);
        (&mut self.map[..len]).write_all(&bytes[..len])?;
        self.map[len] = 0;
        self.map.flush()?;
        Ok(())
    }

    /// Clear the slot after the handler invocation completes, success or
    /// reported failure (spec §4.3 step 3).
    pub fn clear(&mut self) -> std::io::Result<()> {
        self.map[0] = 0;
        self.map.flush()?;
        Ok(())
    }
}
