use super::OutputHandler;
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

/// Writes all items as a single JSON array.
pub struct JsonOutput {
    writer: BufWriter<File>,
    first: bool,
}

impl JsonOutput {
    pub fn new(path: PathBuf) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut writer = BufWriter::new(file);
        write!(writer, "[")?;

        Ok(Self {
            writer,
            first: true,
        })
    }
}

#[async_trait]
impl OutputHandler for JsonOutput {
    async fn write(&mut self, item: Value) -> Result<()> {
        if !self.first {
            write!(self.writer, ",")?;
        } else {
            self.first = false;
        }

        serde_json::to_writer(&mut self.writer, &item)?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        write!(self.writer, "]")?;
        self.writer.flush()?;
        Ok(())
    }
}
