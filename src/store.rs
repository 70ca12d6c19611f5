//! Append-only line-delimited record store.
//!
//! Every store identifier maps to one file, `{dir}/{identifier}.db`, holding
//! one JSON object per line. A store is opened either for reading or for
//! appending; records are never rewritten in place. Derived stores are
//! rebuilt from scratch by [`RecordStore::truncate`] followed by appends.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::models::Record;

/// File extension of every record log.
const STORE_EXTENSION: &str = "db";

/// Errors raised by [`RecordStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store '{path}' is open for {actual:?}, operation requires {required:?}")]
    InvalidMode {
        path: PathBuf,
        required: Mode,
        actual: Mode,
    },
    #[error("malformed record at {path}:{line}: {source}")]
    Decode {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("record at {path}:{line} has no field '{key}'")]
    MissingField {
        path: PathBuf,
        line: usize,
        key: String,
    },
    #[error("failed to serialize record for {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("I/O error on store '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// How a store is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Read,
    Append,
}

enum Handle {
    Read(BufReader<File>),
    Append(BufWriter<File>),
}

/// A single keyed record log opened in one [`Mode`].
pub struct RecordStore {
    path: PathBuf,
    handle: Handle,
}

impl RecordStore {
    /// Path of the log backing `identifier` under `dir`.
    pub fn path_for(dir: &Path, identifier: &str) -> PathBuf {
        dir.join(format!("{}.{}", identifier, STORE_EXTENSION))
    }

    /// Open the store for `identifier`.
    ///
    /// The backing log (and its parent directory) is created when missing,
    /// so opening a never-written identifier for reading yields an empty
    /// store instead of an error.
    pub fn open(dir: &Path, identifier: &str, mode: Mode) -> Result<Self, StoreError> {
        let path = Self::path_for(dir, identifier);
        let io_err = |source| StoreError::Io {
            path: path.clone(),
            source,
        };

        std::fs::create_dir_all(dir).map_err(io_err)?;

        let handle = match mode {
            Mode::Append => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .map_err(io_err)?;
                Handle::Append(BufWriter::new(file))
            }
            Mode::Read => {
                // Ensure an empty log exists before opening for read.
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .map_err(io_err)?;
                let file = File::open(&path).map_err(io_err)?;
                Handle::Read(BufReader::new(file))
            }
        };

        Ok(Self { path, handle })
    }

    /// Empty the log for `identifier`, creating it when missing.
    pub fn truncate(dir: &Path, identifier: &str) -> Result<(), StoreError> {
        let path = Self::path_for(dir, identifier);
        std::fs::create_dir_all(dir).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        File::create(&path).map_err(|source| StoreError::Io { path, source })?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> Mode {
        match self.handle {
            Handle::Read(_) => Mode::Read,
            Handle::Append(_) => Mode::Append,
        }
    }

    fn invalid_mode(&self, required: Mode) -> StoreError {
        StoreError::InvalidMode {
            path: self.path.clone(),
            required,
            actual: self.mode(),
        }
    }

    /// Serialize `record` and append it as one line.
    pub fn insert<T: Serialize + ?Sized>(&mut self, record: &T) -> Result<(), StoreError> {
        if self.mode() != Mode::Append {
            return Err(self.invalid_mode(Mode::Append));
        }
        let mut line = serde_json::to_string(record).map_err(|source| StoreError::Encode {
            path: self.path.clone(),
            source,
        })?;
        line.push('\n');
        if let Handle::Append(writer) = &mut self.handle {
            writer
                .write_all(line.as_bytes())
                .map_err(|source| StoreError::Io {
                    path: self.path.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Flush pending writes and release the file.
    pub fn commit(self) -> Result<(), StoreError> {
        if let Handle::Append(mut writer) = self.handle {
            writer.flush().map_err(|source| StoreError::Io {
                path: self.path,
                source,
            })?;
        }
        Ok(())
    }

    /// Whether any unread bytes remain, without consuming them.
    pub fn has_content(&mut self) -> Result<bool, StoreError> {
        let actual = self.mode();
        match &mut self.handle {
            Handle::Read(reader) => reader
                .fill_buf()
                .map(|buf| !buf.is_empty())
                .map_err(|source| StoreError::Io {
                    path: self.path.clone(),
                    source,
                }),
            Handle::Append(_) => Err(StoreError::InvalidMode {
                path: self.path.clone(),
                required: Mode::Read,
                actual,
            }),
        }
    }

    /// Lazily iterate over the remaining records.
    ///
    /// The sequence can only be restarted by reopening the store.
    pub fn iterate(&mut self) -> Result<Records<'_>, StoreError> {
        let actual = self.mode();
        match &mut self.handle {
            Handle::Read(reader) => Ok(Records {
                reader,
                path: &self.path,
                line_no: 0,
                buf: String::new(),
            }),
            Handle::Append(_) => Err(StoreError::InvalidMode {
                path: self.path.clone(),
                required: Mode::Read,
                actual,
            }),
        }
    }

    /// Iterate records decoded into `T`.
    pub fn iterate_as<T: DeserializeOwned>(
        &mut self,
    ) -> Result<impl Iterator<Item = Result<T, StoreError>> + '_, StoreError> {
        let mut records = self.iterate()?;
        Ok(std::iter::from_fn(move || {
            let path = records.path;
            records.next_numbered().map(|item| {
                let (line, record) = item?;
                serde_json::from_value(Value::Object(record)).map_err(|source| {
                    StoreError::Decode {
                        path: path.to_path_buf(),
                        line,
                        source,
                    }
                })
            })
        }))
    }

    /// Project every record onto the value of `key`.
    ///
    /// A record without the field yields [`StoreError::MissingField`].
    pub fn fetch_key<'a>(
        &'a mut self,
        key: &'a str,
    ) -> Result<impl Iterator<Item = Result<Value, StoreError>> + 'a, StoreError> {
        let mut records = self.iterate()?;
        Ok(std::iter::from_fn(move || {
            let path = records.path;
            records.next_numbered().map(|item| {
                let (line, mut record) = item?;
                record.remove(key).ok_or_else(|| StoreError::MissingField {
                    path: path.to_path_buf(),
                    line,
                    key: key.to_string(),
                })
            })
        }))
    }
}

/// Lazy record sequence returned by [`RecordStore::iterate`].
pub struct Records<'a> {
    reader: &'a mut BufReader<File>,
    path: &'a Path,
    line_no: usize,
    buf: String,
}

impl<'a> Records<'a> {
    /// Next record together with its 1-based line number.
    fn next_numbered(&mut self) -> Option<Result<(usize, Record), StoreError>> {
        self.buf.clear();
        match self.reader.read_line(&mut self.buf) {
            Ok(0) => return None,
            Ok(_) => {}
            Err(source) => {
                return Some(Err(StoreError::Io {
                    path: self.path.to_path_buf(),
                    source,
                }))
            }
        }
        self.line_no += 1;
        // A blank line is damage like any other and fails to decode.
        Some(
            serde_json::from_str::<Record>(self.buf.trim())
                .map(|record| (self.line_no, record))
                .map_err(|source| StoreError::Decode {
                    path: self.path.to_path_buf(),
                    line: self.line_no,
                    source,
                }),
        )
    }
}

impl Iterator for Records<'_> {
    type Item = Result<Record, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_numbered().map(|item| item.map(|(_, record)| record))
    }
}
