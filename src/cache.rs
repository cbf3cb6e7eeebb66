//! On-disk result bundles
//!
//! Orbits, action-angle results and frequency maps are written with
//! `bincode` to a named file. A later run that finds the file loads it
//! instead of recomputing, unless the cache was opened with `overwrite`.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{io_err, Error};

/// A single cache file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cache {
    path: PathBuf,
    overwrite: bool,
}

impl Cache {
    /// Cache backed by `path`; with `overwrite` an existing file is ignored
    /// and replaced
    pub fn new(path: impl Into<PathBuf>, overwrite: bool) -> Self {
        Self {
            path: path.into(),
            overwrite,
        }
    }

    /// Cache file `name` inside `dir`
    pub fn in_dir(dir: impl AsRef<Path>, name: &str, overwrite: bool) -> Self {
        Self::new(dir.as_ref().join(name), overwrite)
    }

    /// Path of the cache file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a bundle exists on disk
    pub fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }

    /// Read the bundle, or `None` when there is no file
    pub fn load<T: DeserializeOwned>(&self) -> Result<Option<T>, Error> {
        if !self.exists() {
            return Ok(None);
        }
        let file = File::open(&self.path).map_err(|e| io_err(&self.path, e))?;
        let value = bincode::deserialize_from(BufReader::new(file)).map_err(|source| {
            Error::Cache {
                path: self.path.clone(),
                source,
            }
        })?;
        Ok(Some(value))
    }

    /// Write the bundle, replacing any existing file
    ///
    /// The data goes to a temporary file that is renamed into place, so an
    /// interrupted write never leaves a truncated bundle behind.
    pub fn store<T: Serialize>(&self, value: &T) -> Result<(), Error> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
            }
        }
        let temp_path = self.path.with_extension("tmp");
        if let Err(err) = self.write_temp(&temp_path, value) {
            // the write error takes precedence over a failed cleanup
            let _ = fs::remove_file(&temp_path);
            return Err(err);
        }
        fs::rename(&temp_path, &self.path).map_err(|e| io_err(&self.path, e))?;
        debug!(path = %self.path.display(), "cache written");
        Ok(())
    }

    fn write_temp<T: Serialize>(&self, temp_path: &Path, value: &T) -> Result<(), Error> {
        let file = File::create(temp_path).map_err(|e| io_err(temp_path, e))?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, value).map_err(|source| Error::Cache {
            path: self.path.clone(),
            source,
        })?;
        writer.flush().map_err(|e| io_err(temp_path, e))
    }

    /// Load the bundle if present, otherwise compute it with `compute` and
    /// store the result
    pub fn load_or_compute<T, F>(&self, compute: F) -> Result<T, Error>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, Error>,
    {
        if !self.overwrite {
            if let Some(value) = self.load()? {
                info!(path = %self.path.display(), "cache hit");
                return Ok(value);
            }
        }
        info!(path = %self.path.display(), overwrite = self.overwrite, "cache miss");
        let value = compute()?;
        self.store(&value)?;
        Ok(value)
    }
}
