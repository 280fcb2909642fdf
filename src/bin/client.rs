//! TCP load client: opens one connection per thread and streams each
//! connection's share of the tuple buffer to an ingest server.

use std::fs::File;
use std::io::{BufReader, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::process;
use std::thread;
use std::time::Instant;

use byte_slice_cast::AsByteSlice;
use structopt::StructOpt;
use tracing::info;

use sktrs::reducers::TupleReader;
use sktrs::INGEST_PORT;

/// Streams u32 tuples to a sketch ingest server.
///
/// Without a datafile the buffer is filled with sequential values; with
/// one, its whitespace-separated decimals are cycled until the buffer
/// is full. Each connection sends its contiguous share `repetitions`
/// times and then closes, which is the server's shutdown signal.
#[derive(Debug, StructOpt)]
#[structopt(name = "client", about = "Streams u32 tuples to a sketch ingest server.")]
struct Opt {
    /// Total tuples spread across all connections.
    #[structopt(short = "t", long = "tuples")]
    tuples: u64,

    /// How many times each connection resends its share.
    #[structopt(short = "r", long = "repetitions", default_value = "1")]
    repetitions: u32,

    /// Server address (the port is fixed at 5017).
    #[structopt(long = "address")]
    address: String,

    /// Connections to open, one sender thread each.
    #[structopt(long = "threads", default_value = "1")]
    threads: usize,

    /// Text datafile of decimal tuples, cycled until the buffer is full.
    #[structopt(short = "f", long = "datafile")]
    datafile: Option<PathBuf>,
}

fn fill_buffer(opt: &Opt) -> Vec<u32> {
    let total = opt.tuples as usize;
    match &opt.datafile {
        None => (0..total).map(|i| i as u32).collect(),
        Some(path) => {
            let file = File::open(path).unwrap_or_else(|err| {
                eprintln!("cannot open datafile {}: {}", path.display(), err);
                process::exit(1);
            });
            let reader = TupleReader::default()
                .read_from(BufReader::new(file))
                .unwrap_or_else(|err| {
                    eprintln!("cannot read datafile {}: {}", path.display(), err);
                    process::exit(1);
                });
            if reader.tuples.is_empty() {
                eprintln!("datafile {} holds no tuples", path.display());
                process::exit(1);
            }
            (0..total)
                .map(|i| reader.tuples[i % reader.tuples.len()])
                .collect()
        }
    }
}

fn send_share(address: &str, share: &[u32], repetitions: u32) {
    let mut stream = TcpStream::connect((address, INGEST_PORT)).unwrap_or_else(|err| {
        eprintln!("connection to {}:{} failed: {}", address, INGEST_PORT, err);
        process::exit(1);
    });
    stream.set_nodelay(true).expect("TCP_NODELAY");

    let bytes = share.as_byte_slice();
    for _ in 0..repetitions {
        if let Err(err) = stream.write_all(bytes) {
            eprintln!("write error: {}", err);
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
    if opt.threads < 1 {
        eprintln!("at least one connection is required");
        process::exit(1);
    }

    let buffer = fill_buffer(&opt);
    let total_bytes = buffer.len() as u64 * 4 * u64::from(opt.repetitions);
    info!(
        "sending {} tuples to {}:{} over {} connections, {} repetitions",
        buffer.len(),
        opt.address,
        INGEST_PORT,
        opt.threads,
        opt.repetitions
    );

    let started = Instant::now();
    thread::scope(|s| {
        for i in 0..opt.threads {
            let share = &buffer[i * buffer.len() / opt.threads..(i + 1) * buffer.len() / opt.threads];
            let address = &opt.address;
            let repetitions = opt.repetitions;
            s.spawn(move || send_share(address, share, repetitions));
        }
    });
    let elapsed = started.elapsed();

    println!("Duration[s]: {}", elapsed.as_secs_f64());
    println!(
        "Throughput[GB/s]: {}",
        total_bytes as f64 / elapsed.as_nanos() as f64
    );
}
