//! File ingest client: memory-maps a binary tuple file, sketches it
//! with a thread per shard and reports the cardinality estimate.
//!
//! With `--raw` the serialized sketch is printed instead of the
//! estimate; `--merge` reads such sketches from stdin (one per line)
//! and reports on their union. Together they allow multi-level
//! aggregation across processes or machines.

use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::process;

use byte_slice_cast::AsSliceOf;
use memmap2::Mmap;
use structopt::StructOpt;
use tracing::warn;

use sktrs::reducers::SketchMerger;
use sktrs::{collect_sharded, Geometry, HashKind, SketchCollector};

/// Sketches a memory-mapped file of little-endian u32 tuples.
#[derive(Debug, StructOpt)]
#[structopt(name = "fileclient", about = "Sketches a binary tuple file.")]
struct Opt {
    /// Binary file of little-endian u32 tuples. Not used with --merge.
    file: Option<PathBuf>,

    /// Worker threads, one contiguous shard each.
    #[structopt(default_value = "1")]
    threads: usize,

    /// Print the base64 sketch instead of the estimate.
    #[structopt(long)]
    raw: bool,

    /// Merge base64 sketches from stdin (one per line) and report on
    /// their union.
    #[structopt(long)]
    merge: bool,

    /// Hash driving all sketches.
    #[structopt(long, default_value = "MURMUR3_128")]
    hash: HashKind,
}

fn report(collector: &SketchCollector, raw: bool) {
    if raw {
        println!("{}", collector.to_base64());
    } else {
        println!("Estimated cardinality: {}", collector.estimate_cardinality());
    }
}

fn merge_stdin(raw: bool) {
    let stdin = io::stdin();
    let merger = SketchMerger::default()
        .read_from(stdin.lock())
        .unwrap_or_else(|err| {
            eprintln!("cannot read stdin: {}", err);
            process::exit(1);
        });
    match merger.finish() {
        Ok(Some(collector)) => report(&collector, raw),
        Ok(None) => {
            eprintln!("no sketches on stdin");
            process::exit(1);
        }
        Err(err) => {
            eprintln!("{}", err);
            process::exit(1);
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let opt = Opt::from_args();
    if opt.merge {
        merge_stdin(opt.raw);
        return;
    }

    let path = opt.file.unwrap_or_else(|| {
        eprintln!("missing <file> argument");
        process::exit(1);
    });
    let file = File::open(&path).unwrap_or_else(|err| {
        eprintln!("cannot open {}: {}", path.display(), err);
        process::exit(1);
    });
    // Safety contract of the mmap: the file must not be truncated or
    // rewritten while the map is alive.
    let map = unsafe { Mmap::map(&file) }.unwrap_or_else(|err| {
        eprintln!("cannot map {}: {}", path.display(), err);
        process::exit(1);
    });

    let residual = map.len() % 4;
    if residual != 0 {
        warn!("{} trailing bytes do not form a whole tuple; discarded", residual);
    }
    let tuples = map[..map.len() - residual]
        .as_slice_of::<u32>()
        .unwrap_or_else(|err| {
            eprintln!("cannot view {} as u32 tuples: {}", path.display(), err);
            process::exit(1);
        });

    println!("Processing {} items by {} threads.", tuples.len(), opt.threads);
    let collector = collect_sharded(tuples, opt.threads, Geometry::DEFAULT, opt.hash);
    report(&collector, opt.raw);
}
