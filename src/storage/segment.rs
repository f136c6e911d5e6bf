use crate::error::LogError;
use crate::protocol::{decode, encode, Decoded, Message};
use crate::storage::recovery::{rebuild_index, IndexEntry, TailState};
use crate::storage::{check_offset, MessageLog};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use tracing::{info, warn};

/// File name of the single segment. Base offset is always 0.
pub const SEGMENT_FILE_NAME: &str = "00000000000000000000.log";

/// Options for [`FileLog`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FileLogOptions {
    /// Call `sync_data` before `append` returns.
    ///
    /// Off by default: appends are then bounded by OS write buffering and a
    /// crash may lose the most recent entries (never corrupt earlier ones).
    pub sync_on_append: bool,
}

/// Write side of the log. Only touched under the writer mutex.
#[derive(Debug)]
struct Writer {
    file: File,
    size: u64,
}

/// File-backed append-only log.
///
/// ## On-disk format
/// One file, `00000000000000000000.log`, holding frames back to back in
/// exactly the wire format:
/// ```text
/// | total_length: u32 | timestamp: i64 | type: u8 | payload |
/// ```
/// No offsets are stored: the N-th frame in the file is offset N.
///
/// ## Index
/// An in-memory `Vec<IndexEntry>` maps offset → (position, length). It is
/// rebuilt on open by scanning the file; a torn or corrupt tail is truncated.
///
/// ## Concurrency
/// - `append` holds the writer mutex for the whole write, then pushes the
///   index entry. Offset = index length, so offsets are gapless and unique.
/// - `read` takes the index read lock only to copy the entry, then does a
///   positional read through a separate handle. An entry is indexed only
///   after its bytes are written, so reads never see partial frames.
#[derive(Debug)]
pub struct FileLog {
    path: PathBuf,
    writer: Mutex<Writer>,
    reader: File,
    index: RwLock<Vec<IndexEntry>>,
    options: FileLogOptions,
}

impl FileLog {
    /// Open or create the log under `dir`.
    ///
    /// Existing entries are recovered; their offsets are unchanged.
    ///
    /// # Errors
    /// - I/O errors creating the directory, opening, scanning or truncating
    ///   the file
    pub fn open(dir: impl AsRef<Path>, options: FileLogOptions) -> Result<Self, LogError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(SEGMENT_FILE_NAME);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;

        let scan = rebuild_index(&file)?;
        match &scan.tail {
            Some(TailState::Torn { bytes }) => {
                warn!(path = %path.display(), bytes, "truncating torn tail of log");
                file.set_len(scan.valid_len)?;
            }
            Some(TailState::Corrupt { bytes, reason }) => {
                warn!(path = %path.display(), bytes, %reason, "truncating corrupt tail of log");
                file.set_len(scan.valid_len)?;
            }
            None => {}
        }

        info!(
            path = %path.display(),
            entries = scan.entries.len(),
            bytes = scan.valid_len,
            "opened file log"
        );

        let reader = File::open(&path)?;

        Ok(FileLog {
            path,
            writer: Mutex::new(Writer {
                file,
                size: scan.valid_len,
            }),
            reader,
            index: RwLock::new(scan.entries),
            options,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size in bytes of the valid log contents.
    pub fn size(&self) -> u64 {
        self.writer.lock().map(|w| w.size).unwrap_or(0)
    }
}

impl MessageLog for FileLog {
    fn append(&self, message: &Message) -> Result<u64, LogError> {
        let frame = encode(message);

        let mut writer = self.writer.lock().map_err(|_| LogError::LockPoisoned)?;
        let position = writer.size;

        let written = writer.file.write_all(&frame).and_then(|_| {
            if self.options.sync_on_append {
                writer.file.sync_data()
            } else {
                Ok(())
            }
        });

        if let Err(e) = written {
            // Cut any partial frame so the next append starts on a boundary.
            if let Err(trunc) = writer.file.set_len(position) {
                warn!(error = %trunc, position, "failed to roll back partial append");
            }
            return Err(LogError::Io(e));
        }

        writer.size += frame.len() as u64;

        let mut index = self.index.write().map_err(|_| LogError::LockPoisoned)?;
        let offset = index.len() as u64;
        index.push(IndexEntry {
            position,
            len: frame.len() as u32,
        });

        Ok(offset)
    }

    fn read(&self, offset: i64) -> Result<Message, LogError> {
        let entry = {
            let index = self.index.read().map_err(|_| LogError::LockPoisoned)?;
            let idx = check_offset(offset, index.len() as u64)?;
            index[idx]
        };

        let mut buf = vec![0u8; entry.len as usize];
        read_exact_at(&self.reader, &mut buf, entry.position)?;

        match decode(&buf) {
            Ok(Decoded::Frame { message, consumed }) if consumed == buf.len() => Ok(message),
            Ok(_) => Err(LogError::Corrupt {
                offset,
                reason: "frame length does not match index".to_string(),
            }),
            Err(e) => Err(LogError::Corrupt {
                offset,
                reason: e.to_string(),
            }),
        }
    }

    fn len(&self) -> u64 {
        self.index.read().map(|i| i.len() as u64).unwrap_or(0)
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], position: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, position)
}

#[cfg(windows)]
fn read_exact_at(file: &File, buf: &mut [u8], position: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    let mut done = 0;
    while done < buf.len() {
        let n = file.seek_read(&mut buf[done..], position + done as u64)?;
        if n == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        done += n;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::TempDir;

    #[test]
    fn test_append_and_read() {
        let dir = TempDir::new().unwrap();
        let log = FileLog::open(dir.path(), FileLogOptions::default()).unwrap();

        let first = Message::produce(&b"hello"[..]).unwrap();
        let second = Message::produce(&b"world"[..]).unwrap();
        assert_eq!(log.append(&first).unwrap(), 0);
        assert_eq!(log.append(&second).unwrap(), 1);

        assert_eq!(log.read(0).unwrap(), first);
        assert_eq!(log.read(1).unwrap(), second);
        assert!(matches!(log.read(2), Err(LogError::OffsetNotFound(2))));
        assert!(matches!(log.read(-1), Err(LogError::OffsetOutOfRange(-1))));
        assert_eq!(log.size(), 36);
    }

    #[test]
    fn test_file_is_wire_format() {
        let dir = TempDir::new().unwrap();
        let log = FileLog::open(dir.path(), FileLogOptions::default()).unwrap();
        let msg = Message::produce(&b"abc"[..]).unwrap();
        log.append(&msg).unwrap();

        let on_disk = fs::read(log.path()).unwrap();
        assert_eq!(on_disk, encode(&msg).to_vec());
    }

    #[test]
    fn test_reopen_preserves_offsets() {
        let dir = TempDir::new().unwrap();
        {
            let log = FileLog::open(dir.path(), FileLogOptions { sync_on_append: true }).unwrap();
            for i in 0..10 {
                log.append(&Message::produce(format!("record-{}", i)).unwrap())
                    .unwrap();
            }
        }

        let log = FileLog::open(dir.path(), FileLogOptions::default()).unwrap();
        assert_eq!(log.len(), 10);
        assert_eq!(log.read(7).unwrap().payload().as_ref(), b"record-7");
        assert_eq!(
            log.append(&Message::produce(&b"next"[..]).unwrap()).unwrap(),
            10
        );
    }

    #[test]
    fn test_reopen_truncates_torn_tail() {
        let dir = TempDir::new().unwrap();
        let good_len;
        {
            let log = FileLog::open(dir.path(), FileLogOptions::default()).unwrap();
            log.append(&Message::produce(&b"kept"[..]).unwrap()).unwrap();
            good_len = log.size();
        }

        // Simulate a crash halfway through the next frame.
        let path = dir.path().join(SEGMENT_FILE_NAME);
        let partial = encode(&Message::produce(&b"lost in crash"[..]).unwrap());
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&partial[..10]).unwrap();
        drop(file);

        let log = FileLog::open(dir.path(), FileLogOptions::default()).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log.size(), good_len);
        assert_eq!(fs::metadata(&path).unwrap().len(), good_len);
        assert_eq!(
            log.append(&Message::produce(&b"after"[..]).unwrap()).unwrap(),
            1
        );
        assert_eq!(log.read(1).unwrap().payload().as_ref(), b"after");
    }
}
