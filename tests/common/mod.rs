//! Shared fixtures for integration tests

#![allow(dead_code)]

use anyhow::Context;
use dlrmforge::config::{
    AsyncParam, DataReaderParams, DataReaderType, SampleLayout, TrainingConfig,
};
use std::path::PathBuf;

/// Create a temp directory with a helpful error message.
pub fn create_temp_dir() -> anyhow::Result<tempfile::TempDir> {
    tempfile::tempdir().context("Failed to create temporary directory for test")
}

/// A small two-GPU config with two large and two small tables.
pub fn small_config() -> TrainingConfig {
    let slots = vec![203931, 4, 14, 90000];
    let mut config = TrainingConfig::reference();
    config.solver = config.solver.with_local_gpus(2);
    config.model.bottom_mlp = vec![64, 128];
    config.model.top_mlp = vec![32, 1];
    config.reader = DataReaderParams::new(
        DataReaderType::RawAsync,
        vec![PathBuf::from("train.bin")],
        PathBuf::from("test.bin"),
    )
    .with_num_samples(1000, 100)
    .with_slot_size_array(slots.clone())
    .with_async_param(AsyncParam::derive(
        8,
        &SampleLayout::new(1, 13, slots.len()),
        2,
    ));
    config.fit = config
        .fit
        .with_max_iter(50)
        .with_display(10)
        .with_eval_interval(25)
        .with_snapshot(50, "small");
    config
}
