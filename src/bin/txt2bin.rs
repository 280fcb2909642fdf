//! Converts whitespace-separated decimal u32 text files to the raw
//! little-endian binary layout the file and TCP clients consume.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process;

use structopt::StructOpt;
use tracing::warn;

use sktrs::reducers::TupleReader;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "txt2bin",
    about = "Converts whitespace-separated decimal u32s to raw little-endian binary."
)]
struct Opt {
    /// Text file of decimal tuples.
    input: PathBuf,

    /// Binary output file (overwritten).
    output: PathBuf,
}

fn run(opt: &Opt) -> io::Result<()> {
    let input = File::open(&opt.input)?;
    let reader = TupleReader::default().read_from(BufReader::new(input))?;
    if reader.skipped > 0 {
        warn!("{} tokens were not valid u32 tuples; skipped", reader.skipped);
    }

    let mut output = BufWriter::new(File::create(&opt.output)?);
    for value in &reader.tuples {
        output.write_all(&value.to_le_bytes())?;
    }
    output.flush()
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let opt = Opt::from_args();
    if let Err(err) = run(&opt) {
        eprintln!("{}", err);
        process::exit(1);
    }
}
