//! Platform file stream with sleep/wake, grounded on
//! `original_source/streams/filestream.{hpp,cpp}`.

use super::Stream;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

pub struct FileStream {
    file: Option<File>,
    path: PathBuf,
}

impl FileStream {
    /// Opens `path` read-write, creating it if `create` is set.
    pub fn open(path: impl Into<PathBuf>, create: bool) -> std::io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(create)
            .create(create)
            .open(&path)?;
        Ok(FileStream { file: Some(file), path })
    }

    /// `Dormant`: handle released, path retained.
    pub fn dormant(&self) -> bool {
        self.file.is_none()
    }

    /// Re-acquires the OS handle if dormant.
    pub fn wake_up(&mut self) -> bool {
        if !self.dormant() {
            return true;
        }
        match OpenOptions::new().read(true).write(true).open(&self.path) {
            Ok(f) => {
                self.file = Some(f);
                true
            }
            Err(_) => false,
        }
    }

    /// Releases the OS handle while retaining the path, to bound
    /// simultaneously open descriptors during deep recursion.
    pub fn sleep(&mut self) -> bool {
        if self.dormant() {
            return true;
        }
        self.file = None;
        true
    }
}

impl Stream for FileStream {
    fn seek(&mut self, offset: i64) -> bool {
        let Some(f) = self.file.as_mut() else { return false };
        f.seek(SeekFrom::Start(offset.max(0) as u64)).is_ok()
    }

    fn position(&mut self) -> i64 {
        let Some(f) = self.file.as_mut() else { return -1 };
        f.stream_position().map(|p| p as i64).unwrap_or(-1)
    }

    fn size(&mut self) -> i64 {
        let Some(f) = self.file.as_mut() else { return -1 };
        let cur = match f.stream_position() {
            Ok(p) => p,
            Err(_) => return -1,
        };
        let end = match f.seek(SeekFrom::End(0)) {
            Ok(e) => e,
            Err(_) => return -1,
        };
        let _ = f.seek(SeekFrom::Start(cur));
        end as i64
    }

    fn get_byte(&mut self) -> i32 {
        let mut buf = [0u8; 1];
        match self.read(&mut buf) {
            1 => buf[0] as i32,
            _ => -1,
        }
    }

    fn put_byte(&mut self, b: u8) -> bool {
        self.write(&[b]) == 1
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        let Some(f) = self.file.as_mut() else { return 0 };
        f.read(buf).unwrap_or(0)
    }

    fn write(&mut self, buf: &[u8]) -> usize {
        let Some(f) = self.file.as_mut() else { return 0 };
        f.write(buf).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_then_wake_preserves_position_semantics() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), b"abcdef").unwrap();
        let mut fs = FileStream::open(tmp.path(), false).unwrap();
        fs.seek(2);
        assert!(fs.sleep());
        assert!(fs.dormant());
        assert!(fs.wake_up());
        assert!(!fs.dormant());
        // position resets on reopen; caller re-seeks as needed.
        fs.seek(2);
        assert_eq!(fs.get_byte(), b'c' as i32);
    }
}
