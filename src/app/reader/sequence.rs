//! Sequential scan over the data part

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::BufReader;

use crate::constants::layout;
use crate::errors::DecodeResult;

use super::decoder::{read_record, require_part, LocalDecoder, Record};

/// Reads every record of a paired resource in key order
#[derive(Debug)]
pub struct SequenceDecoder {
    path: PathBuf,
    reader: BufReader<File>,
    records_read: u64,
}

impl SequenceDecoder {
    /// Next record, or `None` once the data part is exhausted
    pub async fn next_record(&mut self) -> DecodeResult<Option<Record>> {
        let record = read_record(&mut self.reader, &self.path).await?;
        if record.is_some() {
            self.records_read += 1;
        }
        Ok(record)
    }

    /// Records returned so far
    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    /// Path of the data part being read
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LocalDecoder for SequenceDecoder {
    const FORMAT: &'static str = "sequence";

    async fn open(dir: &Path) -> DecodeResult<Self> {
        let path = require_part(dir, layout::DATA_PART).await?;
        let file = File::open(&path).await?;
        Ok(Self {
            path,
            reader: BufReader::new(file),
            records_read: 0,
        })
    }
}
