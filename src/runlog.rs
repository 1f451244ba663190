//! Append-only binary run-length log.
//!
//! A raw little-endian stream of u32 step counts: one value per pair per
//! epoch in pair-index order, with no header or framing. Consumers
//! reshape the file as `epochs x (population / 2)`.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

pub struct RunLog {
    writer: BufWriter<File>,
}

impl RunLog {
    /// Create (truncate) the log file. Called before any arena work so an
    /// unopenable path aborts the run up front.
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Ok(Self {
            writer: BufWriter::new(File::create(path)?),
        })
    }

    /// Append one epoch's per-pair step counts.
    pub fn append_epoch(&mut self, steps: &[u32]) -> io::Result<()> {
        for &s in steps {
            self.writer.write_all(&s.to_le_bytes())?;
        }
        Ok(())
    }

    /// Flush and close the log.
    pub fn finish(mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epochs_append_in_order() {
        let path = std::env::temp_dir().join(format!("bff-runlog-{}.bin", std::process::id()));

        let mut log = RunLog::create(&path).unwrap();
        log.append_epoch(&[1, 2, 8192]).unwrap();
        log.append_epoch(&[128, 64, 3]).unwrap();
        log.finish().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 6 * 4);
        let vals: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(vals, vec![1, 2, 8192, 128, 64, 3]);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_unopenable_path_errors() {
        let missing = std::env::temp_dir().join("no-such-dir-bff").join("runlog.bin");
        assert!(RunLog::create(&missing).is_err());
    }
}
