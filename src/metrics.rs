//! Metrics for tracking soup phase transitions.
//!
//! Uses the Brotli compression ratio of the arena's char plane as the key
//! signal for detecting when self-replicators emerge: replicators flood
//! the soup with copies of themselves, so the byte stream compresses far
//! better than the uniform-random baseline.
//!
//! Based on: "Computational Life: How Well-formed, Self-replicating
//! Programs Emerge from Simple Interaction" (Agüera y Arcas et al., 2024)
//! https://arxiv.org/pdf/2406.19108

use std::fs::File;
use std::io::{self, BufWriter, Write};

use crate::bff::{self, SINGLE_TAPE_SIZE};
use crate::soup::SoupShared;

/// Configuration for metrics collection.
#[derive(Clone, Debug)]
pub struct MetricsConfig {
    /// Interval (in epochs) between metric calculations.
    pub interval: usize,
    /// Path to the CSV output file.
    pub output_path: String,
    /// Brotli compression quality (1-11, lower = faster).
    pub brotli_quality: u32,
}

/// Collected metrics for a single tick.
#[derive(Clone, Debug)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub compression_ratio: f64,
    pub compressed_size: usize,
    pub original_size: usize,
    pub unique_bytes: usize,
    pub command_fraction: f64,
}

impl EpochMetrics {
    /// Format as CSV row.
    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{:.4},{},{},{},{:.4}",
            self.epoch,
            self.compression_ratio,
            self.compressed_size,
            self.original_size,
            self.unique_bytes,
            self.command_fraction,
        )
    }

    /// CSV header.
    pub fn csv_header() -> &'static str {
        "epoch,compression_ratio,compressed_size,original_size,unique_bytes,command_fraction"
    }
}

/// Collects compression metrics and watches for the phase transition.
pub struct MetricsTracker {
    config: MetricsConfig,
    csv_writer: BufWriter<File>,
    /// Baseline ratio from the first measurement (uniform-random soup).
    baseline_ratio: Option<f64>,
    /// Count of consecutive elevated measurements.
    elevated_count: usize,
    phase_transition_epoch: Option<usize>,
}

impl MetricsTracker {
    /// Create a tracker and its CSV sink. Fails up front if the path is
    /// unwritable.
    pub fn new(config: MetricsConfig) -> io::Result<Self> {
        let file = File::create(&config.output_path)?;
        let mut csv_writer = BufWriter::new(file);
        writeln!(csv_writer, "{}", EpochMetrics::csv_header())?;

        Ok(Self {
            config,
            csv_writer,
            baseline_ratio: None,
            elevated_count: 0,
            phase_transition_epoch: None,
        })
    }

    /// Check if metrics should be collected this epoch.
    pub fn should_collect(&self, epoch: usize) -> bool {
        epoch % self.config.interval == 0
    }

    /// Collect metrics for the current arena state.
    pub fn collect(&mut self, epoch: usize, shared: &SoupShared) -> EpochMetrics {
        let total = shared.num_tapes() * SINGLE_TAPE_SIZE;
        let chars: Vec<u8> = (0..total).map(|i| shared.cell(i).char()).collect();

        let (compressed_size, compression_ratio) = self.calculate_compression_ratio(&chars);

        let mut byte_counts = [0u32; 256];
        for &b in &chars {
            byte_counts[b as usize] += 1;
        }
        let unique_bytes = byte_counts.iter().filter(|&&c| c > 0).count();

        let command_count = chars.iter().filter(|&&b| bff::is_command(b)).count();
        let command_fraction = command_count as f64 / chars.len() as f64;

        let metrics = EpochMetrics {
            epoch,
            compression_ratio,
            compressed_size,
            original_size: chars.len(),
            unique_bytes,
            command_fraction,
        };

        // The first measurement of a run is the baseline: a fresh soup is
        // uniform-random and nearly incompressible.
        if self.baseline_ratio.is_none() {
            self.baseline_ratio = Some(compression_ratio);
        }

        // Phase transition: ratio sustained well above both the baseline
        // and an absolute floor, over several consecutive measurements.
        let baseline = self.baseline_ratio.unwrap_or(1.0);
        let elevated = compression_ratio > baseline * 2.0 && compression_ratio > 2.5;

        if self.phase_transition_epoch.is_none() {
            if elevated {
                self.elevated_count += 1;
                if self.elevated_count >= 5 {
                    self.phase_transition_epoch = Some(epoch);
                    eprintln!(
                        "Phase transition at epoch {}: compression ratio {:.2} (baseline {:.2}) - self-replicators have likely emerged",
                        epoch, compression_ratio, baseline
                    );
                }
            } else {
                self.elevated_count = 0;
            }
        }

        let _ = writeln!(self.csv_writer, "{}", metrics.to_csv_row());
        let _ = self.csv_writer.flush();

        metrics
    }

    /// Calculate Brotli compression ratio.
    fn calculate_compression_ratio(&self, data: &[u8]) -> (usize, f64) {
        use brotli::enc::BrotliEncoderParams;

        let mut compressed = Vec::new();
        let mut params = BrotliEncoderParams::default();
        params.quality = self.config.brotli_quality as i32;

        let result = brotli::BrotliCompress(
            &mut std::io::Cursor::new(data),
            &mut compressed,
            &params,
        );

        match result {
            Ok(_) => {
                let ratio = data.len() as f64 / compressed.len() as f64;
                (compressed.len(), ratio)
            }
            Err(_) => (data.len(), 1.0), // Fallback if compression fails
        }
    }

    /// Get the phase transition epoch if detected.
    pub fn phase_transition_epoch(&self) -> Option<usize> {
        self.phase_transition_epoch
    }
}
