//! JSON-lines time-series writer.

use super::{TimeSeriesPoint, TimeSeriesStore};
use crate::error::GatewayResult;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Appends each point as one JSON object to `<dir>/<experiment>.jsonl`.
#[derive(Debug)]
pub struct JsonLinesTimeSeries {
    dir: PathBuf,
    // serialises appends so lines from concurrent cycles never interleave
    write_lock: Mutex<()>,
}

impl JsonLinesTimeSeries {
    /// Writer rooted at `dir`, created if missing.
    pub async fn create(dir: impl Into<PathBuf>) -> GatewayResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        tracing::info!(dir = %dir.display(), "Time-series points will be written as JSON lines");
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    /// File receiving the points of `experiment`.
    ///
    /// ASCII letters, digits and `-` are kept; every other byte, `_` included, becomes `_`
    /// plus two hex digits, so distinct experiment names never share a file.
    pub fn path_for(&self, experiment: &str) -> PathBuf {
        let mut name = String::with_capacity(experiment.len());
        for byte in experiment.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' {
                name.push(char::from(byte));
            } else {
                name.push_str(&format!("_{byte:02X}"));
            }
        }
        self.dir.join(format!("{name}.jsonl"))
    }

    /// Output directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl TimeSeriesStore for JsonLinesTimeSeries {
    async fn insert_point(&self, point: &TimeSeriesPoint) -> GatewayResult<()> {
        let mut line = serde_json::to_vec(point)?;
        line.push(b'\n');

        let _lock = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(&point.experiment))
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{FieldKey, SensorFields};
    use chrono::Local;

    fn point(experiment: &str, counter: u64) -> TimeSeriesPoint {
        let mut fields = SensorFields::new();
        fields.insert(FieldKey::Temperature, 21.0 + counter as f64);
        TimeSeriesPoint {
            experiment: experiment.to_string(),
            address: "fd00::1".to_string(),
            location: "row 2".to_string(),
            flush_counter: counter,
            timestamp: Local::now(),
            fields,
        }
    }

    #[tokio::test]
    async fn test_points_append_per_experiment() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonLinesTimeSeries::create(dir.path().join("ts")).await.unwrap();

        store.insert_point(&point("exp A/1", 1)).await.unwrap();
        store.insert_point(&point("exp A/1", 2)).await.unwrap();
        store.insert_point(&point("expB", 1)).await.unwrap();

        let path = store.path_for("exp A/1");
        assert!(path.ends_with("exp_20A_2F1.jsonl"));
        let content = tokio::fs::read_to_string(path).await.unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["flush_counter"], 2);
        assert_eq!(lines[1]["fields"]["temperature"], 23.0);
    }

    #[tokio::test]
    async fn test_similar_names_get_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonLinesTimeSeries::create(dir.path()).await.unwrap();
        assert_ne!(store.path_for("exp A/1"), store.path_for("exp_A_1"));
        assert_ne!(store.path_for("a_2F"), store.path_for("a/"));
        assert!(store.path_for("exp_A_1").ends_with("exp_5FA_5F1.jsonl"));

        store.insert_point(&point("exp A/1", 1)).await.unwrap();
        store.insert_point(&point("exp_A_1", 1)).await.unwrap();
        let first = tokio::fs::read_to_string(store.path_for("exp A/1")).await.unwrap();
        assert_eq!(first.lines().count(), 1);
    }
}
