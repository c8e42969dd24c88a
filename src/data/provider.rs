use std::{
    fmt, fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{debug, info};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use tokio::{sync::mpsc, task};

use super::{Batch, Record, RecordDims, shard};
use crate::{TrainErr, error::Result};

const RECORD_EXTENSION: &str = "safetensors";

/// The subsets a dataset directory is divided into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Valid,
    Test,
}

impl Split {
    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Valid => "valid",
            Split::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The records of one split of the dataset, `{dataset_dir}/{split}/*.safetensors`.
#[derive(Debug, Clone)]
pub struct DataProvider {
    files: Vec<PathBuf>,
    dims: RecordDims,
}

impl DataProvider {
    /// Lists the records of `split` and probes the first one for the dimensions every other
    /// record must share.
    ///
    /// # Errors
    /// If the split directory can't be read, holds no records, or its first record is
    /// malformed.
    pub fn open(dataset_dir: &Path, split: Split) -> Result<Self> {
        let dir = dataset_dir.join(split.as_str());
        let entries = fs::read_dir(&dir).map_err(|e| {
            TrainErr::InvalidConfig(format!("can't read split directory {}: {e}", dir.display()))
        })?;

        let mut files = entries
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == RECORD_EXTENSION))
            .collect::<Vec<_>>();
        files.sort();

        let Some(first) = files.first() else {
            return Err(TrainErr::EmptySplit { dir });
        };

        let dims = Record::load(first)?.dims();
        info!(
            "found {} {split} records in {}, {dims:?}",
            files.len(),
            dir.display()
        );

        Ok(Self { files, dims })
    }

    /// The amount of records in the split.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn dims(&self) -> RecordDims {
        self.dims
    }

    /// Starts the background workers and returns the stream they feed.
    ///
    /// Each worker owns a shard of the records, reads them in a random order that is reshuffled
    /// on every pass and never stops on its own. A worker stops after reporting its first error
    /// or once the returned stream is dropped.
    ///
    /// # Arguments
    /// * `batch_size` - The amount of records per batch.
    /// * `num_threads` - The amount of workers, capped to the amount of records.
    /// * `seed` - An optional seed for the shuffling.
    pub fn spawn(self, batch_size: usize, num_threads: usize, seed: Option<u64>) -> BatchStream {
        let num_workers = num_threads.clamp(1, self.files.len());
        let (tx, rx) = mpsc::channel(2 * num_workers);
        let files = Arc::new(self.files);

        for worker_id in 0..num_workers {
            let tx = tx.clone();
            let files = Arc::clone(&files);
            let rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(worker_id as u64)),
                None => StdRng::from_os_rng(),
            };

            let producer = Producer {
                worker_id,
                dims: self.dims,
                batch_size: batch_size.max(1),
                rng,
                tx,
            };

            task::spawn_blocking(move || {
                producer.run(shard(&files[..], worker_id, num_workers));
            });
        }

        BatchStream::new(rx)
    }
}

struct Producer {
    worker_id: usize,
    dims: RecordDims,
    batch_size: usize,
    rng: StdRng,
    tx: mpsc::Sender<Result<Batch>>,
}

impl Producer {
    fn run(mut self, files: &[PathBuf]) {
        let worker_id = self.worker_id;
        debug!(worker_id = worker_id; "data worker started with {} records", files.len());

        let mut order: Vec<usize> = (0..files.len()).collect();
        let mut cursor = order.len();

        loop {
            let mut records = Vec::with_capacity(self.batch_size);

            while records.len() < self.batch_size {
                if cursor == order.len() {
                    order.shuffle(&mut self.rng);
                    cursor = 0;
                }

                let path = &files[order[cursor]];
                cursor += 1;

                match self.load(path) {
                    Ok(record) => records.push(record),
                    Err(e) => {
                        let _ = self.tx.blocking_send(Err(e));
                        return;
                    }
                }
            }

            let batch = Batch::from_records(&records);
            let failed = batch.is_err();

            if self.tx.blocking_send(batch).is_err() || failed {
                debug!(worker_id = worker_id; "data worker stopping");
                return;
            }
        }
    }

    fn load(&self, path: &Path) -> Result<Record> {
        let record = Record::load(path)?;
        let dims = record.dims();

        if dims != self.dims {
            return Err(TrainErr::MalformedRecord {
                path: path.to_path_buf(),
                reason: format!("expected {:?}, found {dims:?}", self.dims),
            });
        }

        Ok(record)
    }
}

/// The consuming end of the data pipeline.
pub struct BatchStream {
    rx: mpsc::Receiver<Result<Batch>>,
}

impl BatchStream {
    pub fn new(rx: mpsc::Receiver<Result<Batch>>) -> Self {
        Self { rx }
    }

    /// Waits for the next batch.
    ///
    /// # Errors
    /// The error a worker reported, or `DataPipelineClosed` if every worker is gone.
    pub async fn next(&mut self) -> Result<Batch> {
        self.rx
            .recv()
            .await
            .unwrap_or(Err(TrainErr::DataPipelineClosed))
    }
}
