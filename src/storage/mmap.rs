use std::fs::File;
use std::io;

/// A read-only memory-mapped view of a log file.
///
/// Used only while recovering a log on open, before any writer exists. The
/// file must not be written or truncated while the region is alive; the
/// recovery scan drops the region before it repairs a torn tail.
///
/// Drop is provided by `memmap2::Mmap`, which unmaps the region.
#[derive(Debug)]
pub struct MmapRegion {
    mmap: memmap2::Mmap,
}

impl MmapRegion {
    /// Map `file` read-only.
    ///
    /// # Errors
    /// - `InvalidInput` for an empty file (zero-length maps are rejected)
    /// - OS mmap failures
    pub fn open_readonly(file: &File) -> io::Result<Self> {
        let len = file.metadata()?.len();
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot mmap empty file",
            ));
        }

        // SAFETY: the mapping is read-only and the caller holds the only
        // handle that could modify the file until this region is dropped.
        let mmap = unsafe { memmap2::Mmap::map(file)? };

        Ok(MmapRegion { mmap })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.mmap
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }
}
