//! On-disk formats
//!
//! - `record_log`: the line-delimited record log written by capture adapters
//!   and the merge engine
//! - `raw`: normalisation of raw chat exports from external capture tools

pub mod raw;
pub mod record_log;

pub use raw::{parse_raw_export, parse_raw_line, read_raw_export, RawImport};
pub use record_log::{read_log, parse_log_bytes, write_log, LoadStats, LogLoad, LogWriter};

use crate::types::{Result, ViewerSample};
use std::path::Path;

/// Read a viewer-count series (one `{"timestamp", "viewers"}` object per line)
///
/// Unreadable lines are skipped; the series is returned sorted by time.
pub fn read_viewer_series(path: &Path) -> Result<Vec<ViewerSample>> {
    let content = std::fs::read_to_string(path)?;
    let mut samples: Vec<ViewerSample> = content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<ViewerSample>(line) {
            Ok(sample) if sample.timestamp.is_finite() => Some(sample),
            Ok(_) => None,
            Err(e) => {
                log::warn!("Skipping viewer sample: {}", e);
                None
            }
        })
        .collect();
    samples.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
    log::info!("Loaded {} viewer samples from {:?}", samples.len(), path);
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_read_viewer_series() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{{\"timestamp\": 20.0, \"viewers\": 300}}").unwrap();
        writeln!(file, "garbage").unwrap();
        writeln!(file, "{{\"timestamp\": 10.0, \"viewers\": 250}}").unwrap();
        file.flush().unwrap();

        let series = read_viewer_series(file.path()).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].viewers, 250);
        assert_eq!(series[1].viewers, 300);
    }
}
