use super::OutputHandler;
use crate::error::{Error, Result};
use async_trait::async_trait;
use indicatif::MultiProgress;
use serde_json::Value;
use std::sync::Arc;

/// Prints one compact JSON line per item, above the progress bars when present.
pub struct ConsoleOutput {
    multi: Option<Arc<MultiProgress>>,
}

impl ConsoleOutput {
    pub fn new(multi: Option<Arc<MultiProgress>>) -> Self {
        Self { multi }
    }
}

impl Default for ConsoleOutput {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl OutputHandler for ConsoleOutput {
    async fn write(&mut self, item: Value) -> Result<()> {
        let line = serde_json::to_string(&item)?;

        match &self.multi {
            Some(multi) => multi
                .println(line)
                .map_err(|e| Error::Internal(e.to_string())),
            None => {
                println!("{}", line);
                Ok(())
            }
        }
    }
}
