use serde::{Deserialize, Serialize};

use crate::{Result, WaveState};

use super::{RenderAdapter, ValueRange};

/// Sample indices per labelled second on the time axis.
pub const SAMPLES_PER_LABEL_SECOND: usize = 30;

/// One labelled point of a chart data series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChartRecord {
    pub time: usize,
    pub value: f64,
}

/// Data-series back-end: turns each snapshot into `{time, value}` records
/// for a charting library, plus the y domain it would scale by.
#[derive(Debug, Clone, Default)]
pub struct SeriesAdapter {
    records: Vec<ChartRecord>,
    domain: Option<ValueRange>,
}

impl SeriesAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[ChartRecord] {
        &self.records
    }

    /// Y domain of the latest snapshot; `None` before the first draw or for
    /// an empty snapshot.
    pub fn domain(&self) -> Option<ValueRange> {
        self.domain
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.records)?)
    }

    /// Time-axis label for a record, e.g. `time = 45` is `"2s"`.
    pub fn time_label(time: usize) -> String {
        let seconds = (time as f64 / SAMPLES_PER_LABEL_SECOND as f64).round();
        format!("{seconds}s")
    }
}

impl RenderAdapter for SeriesAdapter {
    fn name(&self) -> &str {
        "series"
    }

    fn draw(&mut self, state: &WaveState) -> Result<()> {
        self.records.clear();
        self.records.extend(
            state
                .points
                .iter()
                .enumerate()
                .map(|(time, value)| ChartRecord {
                    time,
                    value: *value,
                }),
        );
        self.domain = ValueRange::of(&state.points);
        Ok(())
    }
}
