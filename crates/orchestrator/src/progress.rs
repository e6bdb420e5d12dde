//! Progress tracking across the backends of one scan

use aegis_common::{ScanProgress, ScanStatus};

/// Collects the answers of every backend that responded to a status query.
#[derive(Debug, Default)]
pub struct ProgressTally {
    statuses: Vec<ScanStatus>,
    percent_total: u32,
    reporting: u32,
}

impl ProgressTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unknown answers do not count toward the mean.
    pub fn record(&mut self, progress: ScanProgress) {
        if progress.status == ScanStatus::Unknown {
            return;
        }
        self.statuses.push(progress.status);
        self.percent_total += u32::from(progress.percent);
        self.reporting += 1;
    }

    pub fn reporting(&self) -> usize {
        self.reporting as usize
    }

    /// Aggregate status with the mean completion of reporting backends.
    pub fn summary(&self) -> ScanProgress {
        if self.reporting == 0 {
            return ScanProgress::unknown();
        }
        let status = ScanStatus::aggregate(self.statuses.iter().copied());
        let percent = (self.percent_total / self.reporting) as u8;
        ScanProgress::new(status, percent)
    }
}
