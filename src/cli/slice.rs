// src/cli/slice.rs
// Entry point of the `tileforge` binary
// RELEVANT FILES: src/cli/args.rs, src/pipeline/orchestrator.rs, src/io/storage.rs

use std::sync::Arc;

use anyhow::Context;
use log::info;

use crate::io::FsStorage;
use crate::pipeline::{Pipeline, SlicingTask};

use super::args::{SliceCliArgs, USAGE};

/// Slice the model named on the command line into `--out`
pub fn run_slice_cli(args: &[String]) -> anyhow::Result<()> {
    let cli = SliceCliArgs::parse(args).map_err(|e| anyhow::anyhow!("{e}\n\n{USAGE}"))?;
    if cli.help {
        print!("{USAGE}");
        return Ok(());
    }

    let config = cli.to_config().context("invalid slicing configuration")?;
    let origin = cli.origin().context("invalid georeference origin")?;
    std::fs::create_dir_all(cli.output_dir())
        .with_context(|| format!("cannot create output directory {}", cli.output_dir().display()))?;

    info!(
        "slicing {} into {} ({:?}, {} LODs, {})",
        cli.input.display(),
        cli.output_dir().display(),
        config.split_strategy,
        config.lod_levels,
        config.texture_strategy.as_str()
    );

    let storage = Arc::new(FsStorage::new(cli.output_dir()));
    let pipeline = Pipeline::new(storage);
    let task = SlicingTask::new(cli.task_id(), config);
    let output = pipeline
        .run(&task, &cli.input, origin)
        .with_context(|| format!("slicing {} failed", cli.input.display()))?;

    let bytes: usize = output.records.iter().map(|r| r.byte_size).sum();
    println!(
        "{} tiles ({} bytes), {} failed cells, index at {}",
        output.records.len(),
        bytes,
        output.failed_cells.len(),
        output.tileset_uri.as_deref().unwrap_or("-")
    );
    Ok(())
}
