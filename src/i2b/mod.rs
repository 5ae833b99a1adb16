//! The `i2b` command: convert one lane of an Illumina run folder into an
//! unaligned SAM/BAM/CRAM stream, one record per cluster (two per paired-end
//! cluster).

use crossbeam_channel::bounded;
use rayon;
use rayon::prelude::*;
use slog;
use std::env;
use std::thread;

use errors::*;
use settings::Settings;

pub mod assemble;
pub mod bcl;
pub mod filter;
pub mod header;
pub mod options;
pub mod output;
pub mod plan;
pub mod pos;
pub mod run_meta;

/// Capacity of the worker-to-writer queue, in record groups.
const QUEUE_CAPACITY: usize = 5_000;

/// Main entry point for the `i2b` command.
pub fn run(logger: &slog::Logger, settings: &Settings) -> Result<()> {
    info!(logger, "Running: bcl2bam i2b");

    let opts = options::I2bOptions::from_settings(settings)?;
    debug!(logger, "Options: {:?}", &opts);

    let layout = run_meta::guess_folder_layout(&opts.basecalls_dir, opts.lane)?;
    info!(logger, "Guessed lane layout to be {:?}", layout);

    info!(logger, "Reading run metadata...");
    let meta = run_meta::load_run_meta(
        logger,
        &opts.run_folder,
        &opts.intensity_dir,
        &opts.basecalls_dir,
        opts.lane,
        opts.run_start_date.as_ref().map(|s| s.as_str()),
    )?;
    let run_id = meta.run_identifier();
    info!(logger, "Run identifier is '{}'", &run_id);

    let plan = if !opts.first_cycles.is_empty() || !opts.first_index_cycles.is_empty() {
        plan::CyclePlan::from_cycle_lists(
            &opts.first_cycles,
            &opts.final_cycles,
            &opts.first_index_cycles,
            &opts.final_index_cycles,
        )?
    } else {
        plan::CyclePlan::from_read_descriptions(&meta.reads)?
    };
    debug!(logger, "Cycle plan: {:?}", &plan);

    let barcodes = plan::assign_barcode_tags(&plan, &opts.barcode_tags, &opts.quality_tags)?;
    let tiles = plan::plan_tiles(logger, &meta.tiles, opts.first_tile, opts.tile_limit)?;
    info!(logger, "{} tile(s) to process", tiles.len());

    let bci = match layout {
        run_meta::FolderLayout::NextSeq => {
            let path = run_meta::lane_dir(&opts.basecalls_dir, opts.lane)
                .join(format!("s_{}.bci", opts.lane));
            Some(bcl::BgzfIndex::open(&path)?)
        }
        _ => None,
    };

    let command_line = env::args().collect::<Vec<String>>().join(" ");
    let header = header::build_header(&opts, &meta, &command_line);

    let ctx = assemble::ConversionContext {
        opts: opts,
        plan: plan,
        barcodes: barcodes,
        layout: layout,
        run_id: run_id,
        bci: bci,
    };

    // One task is reserved for the writer and one for the dispatcher; the
    // rest decode tiles.
    let workers = ctx.opts.threads - 2;
    debug!(logger, "Using {} worker(s)", workers);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("i2b-worker-{}", i))
        .build()
        .chain_err(|| "Problem creating the worker pool")?;

    let (sender, receiver) = bounded(QUEUE_CAPACITY);

    let writer_opts = ctx.opts.clone();
    let writer_logger = logger.new(o!("thread" => "writer"));
    let writer_handle = thread::Builder::new()
        .name("i2b-writer".to_string())
        .spawn(move || -> Result<u64> {
            let mut out = output::open_writer(&writer_opts, &header)?;
            let mut written = 0u64;
            for group in receiver {
                for record in &group {
                    out.write(record).map_err(|e| {
                        Error::from(ErrorKind::WriteFailure(format!("{}", e)))
                    })?;
                    written += 1;
                }
            }
            debug!(writer_logger, "Queue drained, all tiles complete");
            Ok(written)
        })
        .chain_err(|| "Problem starting the writer")?;

    let worker_logger = logger.clone();
    let ctx_ref = &ctx;
    let worker_result = pool.install(move || {
        tiles.par_iter().try_for_each_with(sender, |sender, &tile| {
            let tile_logger = worker_logger.new(o!("tile" => tile));
            assemble::process_tile(ctx_ref, &tile_logger, tile, sender).map(|_| ())
        })
    });

    // Every queue sender is gone once the pool is done, so the writer sees
    // the disconnect and drains the remainder.
    let writer_result = match writer_handle.join() {
        Ok(result) => result,
        Err(_) => bail!(ErrorKind::WriteFailure("writer thread panicked".to_string())),
    };
    let written = writer_result?;
    worker_result?;

    info!(
        logger,
        "Done, {} record(s) written to {}", written, &ctx.opts.output_file
    );
    Ok(())
}
