//! Temporal binning and anomaly detection

pub mod bins;
pub mod detector;

pub use bins::{bin_series, bin_votes, cumulative_series, BinId, BinSeries, CumulativePoint, TemporalBin};
pub use detector::{
    AnomalyDetector, AnomalyFinding, AnomalyKind, BurstScanStats, Detection, Evidence, Subject,
};
