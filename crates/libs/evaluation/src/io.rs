use common_types::{Record, RecordError};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter,
    Lines,
};

#[derive(Error, Debug)]
pub enum InputError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}: {source}")]
    Record {
        path: PathBuf,
        #[source]
        source: RecordError,
    },
    #[error("{path}: invalid JSON array: {source}")]
    InvalidArray {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

enum Entries {
    Lines(Lines<BufReader<Box<dyn AsyncRead + Send + Unpin>>>),
    Buffered(VecDeque<Value>),
}

/// Records read lazily from a JSON Lines file, or from a JSON array held in memory.
///
/// Blank lines are skipped. Anything that is not a JSON object is an error.
pub struct RecordSource {
    path: PathBuf,
    entries: Entries,
    next_index: usize,
    line: usize,
}

impl RecordSource {
    pub async fn open(path: &Path) -> Result<Self, InputError> {
        let io_err = |source| InputError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).await.map_err(io_err)?;
        Self::from_reader(path, file).await
    }

    /// Detects a JSON array by its leading `[`; everything else is read as JSON Lines.
    pub async fn from_reader<R>(path: &Path, reader: R) -> Result<Self, InputError>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let io_err = |source| InputError::Io {
            path: path.to_path_buf(),
            source,
        };
        let boxed: Box<dyn AsyncRead + Send + Unpin> = Box::new(reader);
        let mut reader = BufReader::new(boxed);
        let mut skipped_lines = 0;
        let first = loop {
            let buf = reader.fill_buf().await.map_err(io_err)?;
            if buf.is_empty() {
                break None;
            }
            if let Some(pos) = buf.iter().position(|b| !b.is_ascii_whitespace()) {
                skipped_lines += buf[..pos].iter().filter(|b| **b == b'\n').count();
                let first = buf[pos];
                reader.consume(pos);
                break Some(first);
            }
            let len = buf.len();
            skipped_lines += buf.iter().filter(|b| **b == b'\n').count();
            reader.consume(len);
        };

        let entries = if first == Some(b'[') {
            let mut text = String::new();
            reader.read_to_string(&mut text).await.map_err(io_err)?;
            let values: Vec<Value> =
                serde_json::from_str(&text).map_err(|source| InputError::InvalidArray {
                    path: path.to_path_buf(),
                    source,
                })?;
            Entries::Buffered(values.into())
        } else {
            Entries::Lines(reader.lines())
        };
        Ok(Self {
            path: path.to_path_buf(),
            entries,
            next_index: 0,
            line: skipped_lines,
        })
    }

    #[must_use]
    pub fn from_values(values: Vec<Value>) -> Self {
        Self {
            path: PathBuf::from("<memory>"),
            entries: Entries::Buffered(values.into()),
            next_index: 0,
            line: 0,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Up to `size` further records; empty once the input is exhausted.
    pub async fn next_chunk(&mut self, size: usize) -> Result<Vec<Record>, InputError> {
        let mut chunk = Vec::with_capacity(size.min(256));
        while chunk.len() < size {
            let Some(value) = self.next_value().await? else {
                break;
            };
            let parsed = match self.entries {
                Entries::Buffered(_) => Record::from_element(self.next_index, value),
                Entries::Lines(_) => Record::from_value(self.next_index, self.line, value),
            };
            let record = parsed.map_err(|source| InputError::Record {
                path: self.path.clone(),
                source,
            })?;
            self.next_index += 1;
            chunk.push(record);
        }
        Ok(chunk)
    }

    /// Reads every remaining record.
    pub async fn read_all(&mut self) -> Result<Vec<Record>, InputError> {
        self.next_chunk(usize::MAX).await
    }

    async fn next_value(&mut self) -> Result<Option<Value>, InputError> {
        match &mut self.entries {
            Entries::Buffered(values) => Ok(values.pop_front()),
            Entries::Lines(lines) => loop {
                let next = lines.next_line().await.map_err(|source| InputError::Io {
                    path: self.path.clone(),
                    source,
                })?;
                let Some(text) = next else {
                    return Ok(None);
                };
                self.line += 1;
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }
                let value = serde_json::from_str(text).map_err(|source| InputError::Record {
                    path: self.path.clone(),
                    source: RecordError::InvalidJson {
                        line: self.line,
                        source,
                    },
                })?;
                return Ok(Some(value));
            },
        }
    }
}

/// JSON Lines writer. Non-ASCII text is written as-is and key order is kept.
pub struct JsonlSink<W> {
    writer: BufWriter<W>,
    written: usize,
}

impl JsonlSink<File> {
    pub async fn create(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(Self::new(File::create(path).await?))
    }
}

impl<W: AsyncWrite + Unpin> JsonlSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
            written: 0,
        }
    }

    pub async fn write_record(&mut self, fields: &Map<String, Value>) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(fields)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.written += 1;
        Ok(())
    }

    pub async fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush().await
    }

    #[must_use]
    pub const fn written(&self) -> usize {
        self.written
    }

    #[must_use]
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}
