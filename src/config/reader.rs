//! Data reader configuration.
//!
//! The raw formats store one fixed-size record per sample: label, dense
//! features and one key per slot, each 4 bytes. The async reader's queue
//! depth is sized from that record size.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config_error;
use crate::error::ForgeResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataReaderType {
    Raw,
    RawAsync,
    Parquet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CheckType {
    #[default]
    Non,
    Sum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AlignmentType {
    #[default]
    Auto,
    None,
}

/// Fields of one raw sample record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleLayout {
    pub label_dim: usize,
    pub dense_dim: usize,
    pub num_slots: usize,
}

impl SampleLayout {
    pub fn new(label_dim: usize, dense_dim: usize, num_slots: usize) -> Self {
        Self {
            label_dim,
            dense_dim,
            num_slots,
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        (self.num_slots + self.label_dim + self.dense_dim) * 4
    }
}

/// Knobs of the asynchronous raw reader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncParam {
    pub num_reading_threads: usize,
    pub num_batches_per_thread: usize,
    /// Outstanding I/O requests per reading thread
    pub max_nr_per_thread: usize,
    pub io_depth: usize,
    pub io_alignment: usize,
    pub shuffle: bool,
    pub aligned_type: AlignmentType,
}

impl AsyncParam {
    pub const DEFAULT_IO_DEPTH: usize = 2;
    pub const DEFAULT_IO_ALIGNMENT: usize = 512;

    /// Expected size of one I/O block: ten bytes per sample in the batch.
    pub fn io_block_size(batchsize: usize) -> usize {
        batchsize * 10
    }

    /// Requests each thread must be able to keep in flight to cover
    /// `num_batches_per_thread` batches, plus two for slack.
    pub fn max_nr_for(num_batches_per_thread: usize, batchsize: usize, layout: &SampleLayout) -> usize {
        let bytes_per_batch = layout.bytes_per_sample() * batchsize;
        let io_block = Self::io_block_size(batchsize).max(1);
        num_batches_per_thread * (bytes_per_batch / io_block + 2)
    }

    /// Parameters for a single reading thread with the default I/O settings.
    pub fn derive(batchsize: usize, layout: &SampleLayout, num_batches_per_thread: usize) -> Self {
        Self {
            num_reading_threads: 1,
            num_batches_per_thread,
            max_nr_per_thread: Self::max_nr_for(num_batches_per_thread, batchsize, layout),
            io_depth: Self::DEFAULT_IO_DEPTH,
            io_alignment: Self::DEFAULT_IO_ALIGNMENT,
            shuffle: false,
            aligned_type: AlignmentType::Auto,
        }
    }

    pub fn with_num_reading_threads(mut self, n: usize) -> Self {
        self.num_reading_threads = n;
        self
    }

    pub fn with_io_depth(mut self, io_depth: usize) -> Self {
        self.io_depth = io_depth;
        self
    }

    pub fn with_io_alignment(mut self, io_alignment: usize) -> Self {
        self.io_alignment = io_alignment;
        self
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn validate(&self) -> ForgeResult<()> {
        if self.num_reading_threads == 0 || self.num_batches_per_thread == 0 {
            return Err(config_error!("async reader needs at least one thread and one batch per thread"));
        }
        if self.io_depth == 0 {
            return Err(config_error!("io_depth must be > 0"));
        }
        if !self.io_alignment.is_power_of_two() {
            return Err(config_error!(
                "io_alignment must be a power of two, got {}",
                self.io_alignment
            ));
        }
        if self.max_nr_per_thread < self.num_batches_per_thread {
            return Err(config_error!(
                "max_nr_per_thread {} cannot cover {} batches",
                self.max_nr_per_thread,
                self.num_batches_per_thread
            ));
        }
        Ok(())
    }
}

/// Where training and evaluation data come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataReaderParams {
    pub data_reader_type: DataReaderType,
    pub source: Vec<PathBuf>,
    pub eval_source: PathBuf,
    #[serde(default)]
    pub check_type: CheckType,
    pub num_samples: u64,
    pub eval_num_samples: u64,
    /// Evaluation batches kept in device memory
    #[serde(default)]
    pub cache_eval_data: usize,
    #[serde(default)]
    pub slot_size_array: Vec<u64>,
    #[serde(default)]
    pub async_param: Option<AsyncParam>,
}

impl DataReaderParams {
    pub fn new(data_reader_type: DataReaderType, source: Vec<PathBuf>, eval_source: PathBuf) -> Self {
        Self {
            data_reader_type,
            source,
            eval_source,
            check_type: CheckType::Non,
            num_samples: 0,
            eval_num_samples: 0,
            cache_eval_data: 0,
            slot_size_array: Vec::new(),
            async_param: None,
        }
    }

    pub fn with_num_samples(mut self, num_samples: u64, eval_num_samples: u64) -> Self {
        self.num_samples = num_samples;
        self.eval_num_samples = eval_num_samples;
        self
    }

    pub fn with_cache_eval_data(mut self, batches: usize) -> Self {
        self.cache_eval_data = batches;
        self
    }

    pub fn with_slot_size_array(mut self, slot_size_array: Vec<u64>) -> Self {
        self.slot_size_array = slot_size_array;
        self
    }

    pub fn with_async_param(mut self, async_param: AsyncParam) -> Self {
        self.async_param = Some(async_param);
        self
    }

    pub fn validate(&self) -> ForgeResult<()> {
        if self.source.is_empty() {
            return Err(config_error!("reader has no training source"));
        }
        if self.eval_source.as_os_str().is_empty() {
            return Err(config_error!("reader has no evaluation source"));
        }
        if self.slot_size_array.iter().any(|&s| s == 0) {
            return Err(config_error!("slot_size_array contains a zero-sized slot"));
        }
        match self.data_reader_type {
            DataReaderType::Raw | DataReaderType::RawAsync if self.num_samples == 0 => {
                return Err(config_error!("raw readers need num_samples"));
            }
            DataReaderType::RawAsync => {
                let param = self
                    .async_param
                    .as_ref()
                    .ok_or_else(|| config_error!("RawAsync reader needs async_param"))?;
                param.validate()?;
                if self.slot_size_array.is_empty() {
                    return Err(config_error!("RawAsync reader needs slot_size_array"));
                }
            }
            DataReaderType::Raw | DataReaderType::Parquet => {}
        }
        Ok(())
    }
}
