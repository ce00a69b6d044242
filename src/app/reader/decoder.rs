//! Paired record files and the decoder trait
//!
//! A paired resource is a directory holding two files:
//!
//! - `data`: records `[u32 LE key len][key][u32 LE value len][value]` in
//!   strictly ascending key order
//! - `index`: records in the same framing whose value is the u64 LE byte
//!   offset of a data record, written for every `index_interval`-th data
//!   record starting with the first
//!
//! [`PairedFileWriter`] produces both files; the decoders in
//! [`super::sequence`] and [`super::map`] read them.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};

use crate::constants::{files, layout};
use crate::errors::{DecodeError, DecodeResult};

/// Decoder that reads a paired resource from a local directory
#[async_trait]
pub trait LocalDecoder: Send + Sized {
    /// Short name used in logs and CLI output
    const FORMAT: &'static str;

    /// Open the resource staged in `dir`
    async fn open(dir: &Path) -> DecodeResult<Self>;
}

/// A key-value record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Path of a part inside `dir`, failing if it is not there
pub(crate) async fn require_part(dir: &Path, part: &'static str) -> DecodeResult<PathBuf> {
    let path = dir.join(part);
    match tokio::fs::metadata(&path).await {
        Ok(metadata) if metadata.is_file() => Ok(path),
        Ok(_) => Err(DecodeError::MissingPart {
            dir: dir.to_path_buf(),
            part,
        }),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(DecodeError::MissingPart {
            dir: dir.to_path_buf(),
            part,
        }),
        Err(e) => Err(DecodeError::Io(e)),
    }
}

fn corrupt(path: &Path, reason: impl Into<String>) -> DecodeError {
    DecodeError::Corrupt {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

async fn read_field<R>(reader: &mut R, path: &Path, what: &str) -> DecodeResult<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    let len = match reader.read_u32_le().await {
        Ok(len) => len,
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
            return Err(corrupt(path, format!("truncated {} length", what)))
        }
        Err(e) => return Err(e.into()),
    };
    if len > files::MAX_FIELD_LEN {
        return Err(corrupt(path, format!("{} length {} exceeds limit", what, len)));
    }

    let mut buf = vec![0u8; len as usize];
    match reader.read_exact(&mut buf).await {
        Ok(_) => Ok(buf),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
            Err(corrupt(path, format!("truncated {}", what)))
        }
        Err(e) => Err(e.into()),
    }
}

/// Read the next record; `None` at a clean end of file
pub(crate) async fn read_record<R>(reader: &mut R, path: &Path) -> DecodeResult<Option<Record>>
where
    R: AsyncBufRead + Unpin,
{
    if reader.fill_buf().await?.is_empty() {
        return Ok(None);
    }
    let key = read_field(reader, path, "key").await?;
    let value = read_field(reader, path, "value").await?;
    Ok(Some(Record { key, value }))
}

async fn write_record<W>(writer: &mut W, key: &[u8], value: &[u8]) -> std::io::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    for field in [key, value] {
        if field.len() as u64 > files::MAX_FIELD_LEN as u64 {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("field of {} bytes exceeds limit", field.len()),
            ));
        }
        writer.write_u32_le(field.len() as u32).await?;
        writer.write_all(field).await?;
    }
    Ok(8 + key.len() as u64 + value.len() as u64)
}

/// Totals reported by [`PairedFileWriter::finish`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSummary {
    pub records: u64,
    pub index_entries: u64,
    pub data_bytes: u64,
}

/// Writes the `index` and `data` parts of a paired resource
#[derive(Debug)]
pub struct PairedFileWriter {
    dir: PathBuf,
    index: BufWriter<File>,
    data: BufWriter<File>,
    index_interval: u64,
    records: u64,
    index_entries: u64,
    offset: u64,
    last_key: Option<Vec<u8>>,
}

impl PairedFileWriter {
    /// Create both parts in `dir`, creating the directory if needed
    pub async fn create(dir: &Path, index_interval: usize) -> DecodeResult<Self> {
        tokio::fs::create_dir_all(dir).await?;
        let index = File::create(dir.join(layout::INDEX_PART)).await?;
        let data = File::create(dir.join(layout::DATA_PART)).await?;

        Ok(Self {
            dir: dir.to_path_buf(),
            index: BufWriter::new(index),
            data: BufWriter::new(data),
            index_interval: index_interval.max(1) as u64,
            records: 0,
            index_entries: 0,
            offset: 0,
            last_key: None,
        })
    }

    /// Directory being written
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append a record; keys must be strictly ascending
    pub async fn append(&mut self, key: &[u8], value: &[u8]) -> DecodeResult<()> {
        if let Some(last) = &self.last_key {
            if key <= last.as_slice() {
                return Err(DecodeError::UnsortedKey {
                    record: self.records,
                });
            }
        }

        if self.records % self.index_interval == 0 {
            write_record(&mut self.index, key, &self.offset.to_le_bytes()).await?;
            self.index_entries += 1;
        }
        self.offset += write_record(&mut self.data, key, value).await?;
        self.records += 1;
        self.last_key = Some(key.to_vec());
        Ok(())
    }

    /// Flush both parts to disk
    pub async fn finish(mut self) -> DecodeResult<WriteSummary> {
        self.index.flush().await?;
        self.data.flush().await?;
        self.index.get_ref().sync_all().await?;
        self.data.get_ref().sync_all().await?;

        tracing::debug!(
            "Wrote {} records ({} indexed) to {}",
            self.records,
            self.index_entries,
            self.dir.display()
        );
        Ok(WriteSummary {
            records: self.records,
            index_entries: self.index_entries,
            data_bytes: self.offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_record_framing() {
        let mut buf = Vec::new();
        let written = write_record(&mut buf, b"tile-7", b"\x01\x02\x03").await.unwrap();
        assert_eq!(written, buf.len() as u64);
        assert_eq!(&buf[..4], &6u32.to_le_bytes());

        let mut reader = BufReader::new(Cursor::new(buf));
        let path = Path::new("data");
        let record = read_record(&mut reader, path).await.unwrap().unwrap();
        assert_eq!(record.key, b"tile-7");
        assert_eq!(record.value, vec![1, 2, 3]);
        assert!(read_record(&mut reader, path).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_truncated_record_is_corrupt() {
        let mut buf = Vec::new();
        write_record(&mut buf, b"key", b"value").await.unwrap();
        buf.truncate(buf.len() - 2);

        let mut reader = BufReader::new(Cursor::new(buf));
        let result = read_record(&mut reader, Path::new("data")).await;
        assert!(matches!(result, Err(DecodeError::Corrupt { .. })));
    }

    #[tokio::test]
    async fn test_oversized_length_is_corrupt() {
        let buf = u32::MAX.to_le_bytes().to_vec();
        let mut reader = BufReader::new(Cursor::new(buf));
        let result = read_record(&mut reader, Path::new("data")).await;
        assert!(matches!(result, Err(DecodeError::Corrupt { .. })));
    }

    #[tokio::test]
    async fn test_writer_indexes_every_interval() {
        let dir = TempDir::new().unwrap();
        let mut writer = PairedFileWriter::create(dir.path(), 4).await.unwrap();
        for i in 0..10u32 {
            writer
                .append(format!("k{:03}", i).as_bytes(), &i.to_le_bytes())
                .await
                .unwrap();
        }
        let summary = writer.finish().await.unwrap();

        assert_eq!(summary.records, 10);
        // records 0, 4 and 8
        assert_eq!(summary.index_entries, 3);
        assert_eq!(summary.data_bytes, 10 * (8 + 4 + 4));
        assert!(dir.path().join("index").is_file());
        assert!(dir.path().join("data").is_file());
    }

    #[tokio::test]
    async fn test_writer_rejects_unsorted_keys() {
        let dir = TempDir::new().unwrap();
        let mut writer = PairedFileWriter::create(dir.path(), 128).await.unwrap();
        writer.append(b"b", b"1").await.unwrap();

        let result = writer.append(b"a", b"2").await;
        assert!(matches!(result, Err(DecodeError::UnsortedKey { record: 1 })));
        let result = writer.append(b"b", b"3").await;
        assert!(matches!(result, Err(DecodeError::UnsortedKey { record: 1 })));
    }

    #[tokio::test]
    async fn test_require_part() {
        let dir = TempDir::new().unwrap();
        let result = require_part(dir.path(), "index").await;
        assert!(matches!(
            result,
            Err(DecodeError::MissingPart { part: "index", .. })
        ));

        tokio::fs::write(dir.path().join("index"), b"").await.unwrap();
        assert!(require_part(dir.path(), "index").await.is_ok());
    }
}
