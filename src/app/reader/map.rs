//! Random access through the sparse index

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, BufReader};

use crate::constants::layout;
use crate::errors::{DecodeError, DecodeResult};

use super::decoder::{read_record, require_part, LocalDecoder};

/// Looks up values by key in a paired resource
///
/// The index part is loaded into memory on open. A lookup binary-searches it
/// for the last indexed key not greater than the wanted key, seeks the data
/// part to that record and scans forward.
#[derive(Debug)]
pub struct MapDecoder {
    data_path: PathBuf,
    index: Vec<(Vec<u8>, u64)>,
    data: BufReader<File>,
}

impl MapDecoder {
    /// Value stored under `key`, if any
    pub async fn get(&mut self, key: &[u8]) -> DecodeResult<Option<Vec<u8>>> {
        let slot = self
            .index
            .partition_point(|(indexed, _)| indexed.as_slice() <= key);
        if slot == 0 {
            return Ok(None);
        }

        let start = self.index[slot - 1].1;
        let end = self.index.get(slot).map(|(_, offset)| *offset);

        self.data.seek(SeekFrom::Start(start)).await?;
        let mut position = start;
        while end.map_or(true, |end| position < end) {
            let Some(record) = read_record(&mut self.data, &self.data_path).await? else {
                break;
            };
            if record.key.as_slice() == key {
                return Ok(Some(record.value));
            }
            if record.key.as_slice() > key {
                break;
            }
            position += 8 + record.key.len() as u64 + record.value.len() as u64;
        }

        Ok(None)
    }

    /// Number of index entries loaded
    pub fn index_entries(&self) -> usize {
        self.index.len()
    }

    async fn load_index(path: &Path) -> DecodeResult<Vec<(Vec<u8>, u64)>> {
        let mut reader = BufReader::new(File::open(path).await?);
        let mut index: Vec<(Vec<u8>, u64)> = Vec::new();

        while let Some(record) = read_record(&mut reader, path).await? {
            let offset: [u8; 8] =
                record
                    .value
                    .as_slice()
                    .try_into()
                    .map_err(|_| DecodeError::Corrupt {
                        path: path.to_path_buf(),
                        reason: format!("index value of {} bytes", record.value.len()),
                    })?;
            if let Some((last, _)) = index.last() {
                if record.key <= *last {
                    return Err(DecodeError::Corrupt {
                        path: path.to_path_buf(),
                        reason: "index keys out of order".to_string(),
                    });
                }
            }
            index.push((record.key, u64::from_le_bytes(offset)));
        }

        Ok(index)
    }
}

#[async_trait]
impl LocalDecoder for MapDecoder {
    const FORMAT: &'static str = "map";

    async fn open(dir: &Path) -> DecodeResult<Self> {
        let index_path = require_part(dir, layout::INDEX_PART).await?;
        let data_path = require_part(dir, layout::DATA_PART).await?;

        let index = Self::load_index(&index_path).await?;
        let data = BufReader::new(File::open(&data_path).await?);
        tracing::debug!(
            "Loaded {} index entries from {}",
            index.len(),
            index_path.display()
        );

        Ok(Self {
            data_path,
            index,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::reader::decoder::PairedFileWriter;
    use tempfile::TempDir;

    async fn write_tiles(dir: &Path, interval: usize, count: u32) {
        let mut writer = PairedFileWriter::create(dir, interval).await.unwrap();
        for i in 0..count {
            // Only even tile ids so odd ids fall between records
            let id = i * 2;
            writer
                .append(format!("tile-{:05}", id).as_bytes(), format!("raster {}", id).as_bytes())
                .await
                .unwrap();
        }
        writer.finish().await.unwrap();
    }

    #[tokio::test]
    async fn test_lookup_across_index_blocks() {
        let dir = TempDir::new().unwrap();
        write_tiles(dir.path(), 8, 100).await;

        let mut decoder = MapDecoder::open(dir.path()).await.unwrap();
        assert_eq!(decoder.index_entries(), 13);

        for id in [0u32, 14, 16, 98, 198] {
            let value = decoder
                .get(format!("tile-{:05}", id).as_bytes())
                .await
                .unwrap();
            assert_eq!(value, Some(format!("raster {}", id).into_bytes()), "tile {}", id);
        }
    }

    #[tokio::test]
    async fn test_missing_keys() {
        let dir = TempDir::new().unwrap();
        write_tiles(dir.path(), 8, 100).await;
        let mut decoder = MapDecoder::open(dir.path()).await.unwrap();

        // Before the first key, between keys, and after the last key
        assert_eq!(decoder.get(b"a").await.unwrap(), None);
        assert_eq!(decoder.get(b"tile-00015").await.unwrap(), None);
        assert_eq!(decoder.get(b"tile-00199").await.unwrap(), None);
        assert_eq!(decoder.get(b"zzz").await.unwrap(), None);

        // Lookups still work after misses
        assert!(decoder.get(b"tile-00050").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_empty_resource() {
        let dir = TempDir::new().unwrap();
        write_tiles(dir.path(), 8, 0).await;
        let mut decoder = MapDecoder::open(dir.path()).await.unwrap();
        assert_eq!(decoder.index_entries(), 0);
        assert_eq!(decoder.get(b"tile-00000").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_missing_index_part() {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("data"), b"").await.unwrap();
        let result = MapDecoder::open(dir.path()).await;
        assert!(matches!(
            result,
            Err(DecodeError::MissingPart { part: "index", .. })
        ));
    }

    #[tokio::test]
    async fn test_malformed_index_value() {
        let dir = TempDir::new().unwrap();
        let mut index = Vec::new();
        index.extend_from_slice(&1u32.to_le_bytes());
        index.push(b'k');
        index.extend_from_slice(&3u32.to_le_bytes());
        index.extend_from_slice(b"abc");
        tokio::fs::write(dir.path().join("index"), index).await.unwrap();
        tokio::fs::write(dir.path().join("data"), b"").await.unwrap();

        let result = MapDecoder::open(dir.path()).await;
        assert!(matches!(result, Err(DecodeError::Corrupt { .. })));
    }
}
