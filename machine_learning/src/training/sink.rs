use std::{
    fs::{self, File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

use crate::{MlErr, Result};

/// The name of the file scalar logs are written to, inside the log directory.
pub const SCALARS_FILE: &str = "scalars.jsonl";

/// Receives named scalar time series, indexed by step.
pub trait ScalarSink {
    /// Records `value` for the series `name` at `step`.
    fn log_value(&mut self, name: &str, value: f64, step: usize) -> Result<()>;

    /// Persists whatever was recorded so far.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Discards every value.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ScalarSink for NullSink {
    fn log_value(&mut self, _name: &str, _value: f64, _step: usize) -> Result<()> {
        Ok(())
    }
}

/// A single recorded scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarEvent {
    pub name: String,
    /// `None` for values that aren't finite.
    pub value: Option<f64>,
    pub step: usize,
    pub wall_time: f64,
}

/// Appends scalars as JSON lines to `{log_dir}/scalars.jsonl`.
pub struct ScalarLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl ScalarLog {
    /// Opens the scalar log of `log_dir`, creating the directory if needed.
    pub fn create(log_dir: &Path) -> Result<Self> {
        fs::create_dir_all(log_dir)?;
        let path = log_dir.join(SCALARS_FILE);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads back every event of a scalar log file.
    pub fn read(path: &Path) -> Result<Vec<ScalarEvent>> {
        fs::read_to_string(path)?
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line)
                    .map_err(|e| MlErr::InvalidArgument(format!("malformed scalar event: {e}")))
            })
            .collect()
    }
}

impl ScalarSink for ScalarLog {
    fn log_value(&mut self, name: &str, value: f64, step: usize) -> Result<()> {
        let wall_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0.0, |d| d.as_secs_f64());

        let event = ScalarEvent {
            name: name.to_string(),
            value: value.is_finite().then_some(value),
            step,
            wall_time,
        };

        serde_json::to_writer(&mut self.writer, &event).map_err(std::io::Error::from)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_one_line_per_value() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("nested").join("run");

        let mut log = ScalarLog::create(&log_dir).unwrap();
        log.log_value("train_loss", 0.5, 0).unwrap();
        log.log_value("val_loss", f64::INFINITY, 0).unwrap();
        log.flush().unwrap();

        let events = ScalarLog::read(log.path()).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].name, "train_loss");
        assert_eq!(events[0].value, Some(0.5));
        assert_eq!(events[1].value, None);
        assert_eq!(events[1].step, 0);
    }

    #[test]
    fn reopening_appends() {
        let dir = tempfile::tempdir().unwrap();

        for step in 0..2 {
            let mut log = ScalarLog::create(dir.path()).unwrap();
            log.log_value("train_loss", 1.0, step).unwrap();
            log.flush().unwrap();
        }

        let events = ScalarLog::read(&dir.path().join(SCALARS_FILE)).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].step, 1);
    }
}
