use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use memmap2::MmapOptions;

use crate::error::{Error, Result};
use crate::format::codec;
use crate::format::Dataset;

/// How a dataset file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenMode {
    /// Start a new file, replacing any existing one.
    #[default]
    Write,
    /// Resume an existing file.
    Append,
    ReadOnly,
}

/// A netCDF classic file held in memory and written back atomically.
#[derive(Debug)]
pub struct NcFile {
    path: PathBuf,
    mode: OpenMode,
    dataset: Dataset,
    dirty: bool,
}

impl NcFile {
    pub fn open(path: impl AsRef<Path>, mode: OpenMode) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let (dataset, dirty) = match mode {
            OpenMode::Write => (Dataset::new(), true),
            OpenMode::Append | OpenMode::ReadOnly => (read_dataset(&path)?, false),
        };
        let mut file = Self {
            path,
            mode,
            dataset,
            dirty,
        };
        if mode == OpenMode::Write {
            file.sync()?;
        }
        Ok(file)
    }

    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(path, OpenMode::Write)
    }

    pub fn open_append(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(path, OpenMode::Append)
    }

    pub fn read_only(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(path, OpenMode::ReadOnly)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Mutable access marks the file dirty. Read-only files refuse it.
    pub fn dataset_mut(&mut self) -> Result<&mut Dataset> {
        if self.mode == OpenMode::ReadOnly {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{} is open read-only", self.path.display()),
            )));
        }
        self.dirty = true;
        Ok(&mut self.dataset)
    }

    /// Encode the dataset and replace the file on disk through a synced
    /// temporary file. Clean and read-only files are left alone.
    pub fn sync(&mut self) -> Result<()> {
        if self.mode == OpenMode::ReadOnly || !self.dirty {
            return Ok(());
        }
        let bytes = codec::encode(&self.dataset)?;
        let tmp = tmp_path(&self.path);
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        std::fs::rename(&tmp, &self.path)?;
        self.dirty = false;
        log::debug!("synced {} ({} bytes)", self.path.display(), bytes.len());
        Ok(())
    }

    pub fn close(mut self) -> Result<()> {
        self.sync()
    }
}

/// Decode the file at `path` through a read-only mapping.
pub fn read_dataset(path: &Path) -> Result<Dataset> {
    let file = File::open(path)?;
    let len = file.metadata()?.len() as usize;
    if len == 0 {
        return Err(Error::corrupt(format!("{} is empty", path.display())));
    }
    let map = unsafe { MmapOptions::new().len(len).map(&file)? };
    codec::decode(&map)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp: OsString = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}
