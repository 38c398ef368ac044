//! File system handles injected into writers and readers.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Arc;

pub trait File: Send + std::fmt::Debug {
    /// Fills `buf` from `offset`; short reads are errors.
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<()>;
    fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
    fn size(&self) -> Result<u64>;
    fn path(&self) -> &str;
}

pub trait FileSystem: Send + Sync + std::fmt::Debug {
    fn open(&self, path: &str) -> Result<Box<dyn File>>;
    /// Creates or truncates `path` for writing.
    fn create(&self, path: &str) -> Result<Box<dyn File>>;
    fn delete(&self, path: &str) -> Result<()>;
    fn exists(&self, path: &str) -> bool;
}

/// Operating system files, paths resolved against an optional root.
#[derive(Debug, Clone, Default)]
pub struct LocalFileSystem {
    root: Option<PathBuf>,
}

impl LocalFileSystem {
    pub fn new() -> Self {
        Self { root: None }
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        match &self.root {
            Some(root) => root.join(path),
            None => PathBuf::from(path),
        }
    }
}

#[derive(Debug)]
pub struct LocalFile {
    file: std::fs::File,
    path: String,
}

impl File for LocalFile {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn path(&self) -> &str {
        &self.path
    }
}

impl FileSystem for LocalFileSystem {
    fn open(&self, path: &str) -> Result<Box<dyn File>> {
        let file = OpenOptions::new().read(true).open(self.resolve(path))?;
        Ok(Box::new(LocalFile {
            file,
            path: path.to_string(),
        }))
    }

    fn create(&self, path: &str) -> Result<Box<dyn File>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.resolve(path))?;
        Ok(Box::new(LocalFile {
            file,
            path: path.to_string(),
        }))
    }

    fn delete(&self, path: &str) -> Result<()> {
        std::fs::remove_file(self.resolve(path))?;
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).exists()
    }
}

type SharedBuffer = Arc<Mutex<Vec<u8>>>;

/// In-process file system, used by tests and tools.
#[derive(Debug, Clone, Default)]
pub struct MemoryFileSystem {
    files: Arc<Mutex<HashMap<String, SharedBuffer>>>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Snapshot of a file's content.
    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().get(path).map(|buf| buf.lock().clone())
    }
}

#[derive(Debug)]
pub struct MemoryFile {
    data: SharedBuffer,
    path: String,
}

impl File for MemoryFile {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<()> {
        let data = self.data.lock();
        let start = offset as usize;
        let src = data.get(start..start + buf.len()).ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("{}: read {}@{} past end {}", self.path, buf.len(), offset, data.len()),
            ))
        })?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<()> {
        let mut data = self.data.lock();
        let start = offset as usize;
        if data.len() < start + buf.len() {
            data.resize(start + buf.len(), 0);
        }
        data[start..start + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.data.lock().len() as u64)
    }

    fn path(&self) -> &str {
        &self.path
    }
}

impl FileSystem for MemoryFileSystem {
    fn open(&self, path: &str) -> Result<Box<dyn File>> {
        let data = self.files.lock().get(path).cloned().ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found", path),
            ))
        })?;
        Ok(Box::new(MemoryFile {
            data,
            path: path.to_string(),
        }))
    }

    fn create(&self, path: &str) -> Result<Box<dyn File>> {
        let data: SharedBuffer = Arc::new(Mutex::new(Vec::new()));
        self.files.lock().insert(path.to_string(), data.clone());
        Ok(Box::new(MemoryFile {
            data,
            path: path.to_string(),
        }))
    }

    fn delete(&self, path: &str) -> Result<()> {
        match self.files.lock().remove(path) {
            Some(_) => Ok(()),
            None => Err(Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found", path),
            ))),
        }
    }

    fn exists(&self, path: &str) -> bool {
        self.files.lock().contains_key(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn exercise(fs: &dyn FileSystem) {
        let mut file = fs.create("part-1").unwrap();
        file.write_at(b"hello", 0).unwrap();
        file.write_at(b" world", 5).unwrap();
        file.flush().unwrap();
        assert_eq!(file.size().unwrap(), 11);
        assert_eq!(file.path(), "part-1");

        let mut reader = fs.open("part-1").unwrap();
        let mut buf = [0u8; 5];
        reader.read_at(&mut buf, 6).unwrap();
        assert_eq!(&buf, b"world");
        assert!(matches!(reader.read_at(&mut buf, 8), Err(Error::Io(_))));

        assert!(fs.exists("part-1"));
        fs.delete("part-1").unwrap();
        assert!(!fs.exists("part-1"));
        assert!(fs.open("part-1").is_err());
    }

    #[test]
    fn test_local_file_system() {
        let dir = TempDir::new().unwrap();
        exercise(&LocalFileSystem::with_root(dir.path()));
    }

    #[test]
    fn test_memory_file_system() {
        let fs = MemoryFileSystem::new();
        exercise(&fs);
        fs.create("b").unwrap();
        fs.create("a").unwrap();
        assert_eq!(fs.file_names(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(fs.contents("a"), Some(Vec::new()));
    }
}
