use crate::protocol::{decode, Decoded};
use crate::storage::mmap::MmapRegion;
use std::fs::File;
use std::io;

/// Location of one entry inside the log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Byte position of the frame's length prefix.
    pub position: u64,
    /// Full frame length, prefix included.
    pub len: u32,
}

/// Why a scan stopped before the end of the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailState {
    /// The last frame was cut short (crash during append).
    Torn { bytes: u64 },
    /// The bytes after the last good frame do not parse as a frame.
    Corrupt { bytes: u64, reason: String },
}

/// Result of rebuilding the offset index from log bytes.
#[derive(Debug)]
pub struct ScanResult {
    /// One entry per recovered offset, in offset order.
    pub entries: Vec<IndexEntry>,
    /// Length of the valid prefix of the file.
    pub valid_len: u64,
    /// Set when trailing bytes had to be discarded.
    pub tail: Option<TailState>,
}

/// Walk `data` frame by frame.
///
/// The log file uses the wire format, so the wire decoder drives the scan.
/// Frames are counted from the start of the file: the N-th complete frame is
/// offset N. Scanning stops at the first incomplete or invalid frame.
pub fn scan_frames(data: &[u8]) -> ScanResult {
    let mut entries = Vec::new();
    let mut cursor = 0usize;

    let tail = loop {
        if cursor == data.len() {
            break None;
        }
        match decode(&data[cursor..]) {
            Ok(Decoded::Frame { consumed, .. }) => {
                entries.push(IndexEntry {
                    position: cursor as u64,
                    len: consumed as u32,
                });
                cursor += consumed;
            }
            Ok(Decoded::Incomplete) => {
                break Some(TailState::Torn {
                    bytes: (data.len() - cursor) as u64,
                });
            }
            Err(e) => {
                break Some(TailState::Corrupt {
                    bytes: (data.len() - cursor) as u64,
                    reason: e.to_string(),
                });
            }
        }
    };

    ScanResult {
        entries,
        valid_len: cursor as u64,
        tail,
    }
}

/// Rebuild the index of an existing log file through a read-only mmap.
///
/// The map is dropped before returning, so the caller may truncate the file
/// to `valid_len` afterwards.
pub fn rebuild_index(file: &File) -> io::Result<ScanResult> {
    if file.metadata()?.len() == 0 {
        return Ok(ScanResult {
            entries: Vec::new(),
            valid_len: 0,
            tail: None,
        });
    }

    let region = MmapRegion::open_readonly(file)?;
    Ok(scan_frames(region.as_slice()))
}
