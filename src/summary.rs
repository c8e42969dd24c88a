use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const EVENTS_FILE: &str = "events.jsonl";

/// One line of the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryEvent {
    pub step: u64,
    pub wall_time: f64,
    pub tag: String,
    pub value: f32,
}

/// Accumulates scalars between flushes and appends their means to `events.jsonl`.
#[derive(Debug)]
pub struct SummaryWriter {
    path: PathBuf,
    // Tags in first-seen order, with their running sum and count.
    pending: Vec<(String, f64, u32)>,
}

impl SummaryWriter {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(EVENTS_FILE),
            pending: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records `value` under `tag`.
    pub fn add_scalar(&mut self, tag: &str, value: f32) {
        match self.pending.iter_mut().find(|(t, ..)| t == tag) {
            Some((_, sum, count)) => {
                *sum += value as f64;
                *count += 1;
            }
            None => self.pending.push((tag.to_string(), value as f64, 1)),
        }
    }

    pub fn add_scalars<'a>(&mut self, scalars: impl IntoIterator<Item = &'a (String, f32)>) {
        for (tag, value) in scalars {
            self.add_scalar(tag, *value);
        }
    }

    /// Whether there's anything to flush.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Writes the mean of every tag recorded since the last flush.
    ///
    /// # Returns
    /// The amount of events written.
    pub fn flush(&mut self, step: u64) -> Result<usize> {
        if self.pending.is_empty() {
            return Ok(0);
        }

        let wall_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut out = BufWriter::new(file);

        let written = self.pending.len();
        for (tag, sum, count) in self.pending.drain(..) {
            let event = SummaryEvent {
                step,
                wall_time,
                tag,
                value: (sum / count as f64) as f32,
            };
            serde_json::to_writer(&mut out, &event)?;
            out.write_all(b"\n")?;
        }

        out.flush()?;
        Ok(written)
    }
}

/// Reads every event of an event log.
pub fn read_events(path: &Path) -> Result<Vec<SummaryEvent>> {
    let file = File::open(path)?;
    serde_json::Deserializer::from_reader(file)
        .into_iter::<SummaryEvent>()
        .map(|event| event.map_err(Into::into))
        .collect()
}
