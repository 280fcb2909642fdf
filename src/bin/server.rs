//! Sketch ingest server executable.

use std::process;
use std::str::FromStr;

use structopt::StructOpt;

use sktrs::{HashKind, IngestServer, ServerConfig};

/// Reader thread count with an optional collector multiple, written
/// `<threads>[x<collectors>]` (for example `8` or `8x4`).
#[derive(Debug, Clone, Copy)]
struct ThreadSpec {
    threads: usize,
    collectors: usize,
}

impl FromStr for ThreadSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (threads, collectors) = match s.find('x') {
            Some(ix) => (&s[..ix], Some(&s[ix + 1..])),
            None => (s, None),
        };
        let threads = threads
            .parse()
            .map_err(|_| format!("invalid thread count in '{}'", s))?;
        let collectors = match collectors {
            Some(c) => c
                .parse()
                .map_err(|_| format!("invalid collector multiple in '{}'", s))?,
            None => 4,
        };
        Ok(ThreadSpec {
            threads,
            collectors,
        })
    }
}

/// Listens on TCP port 5017 for raw little-endian u32 tuple streams and
/// sketches every connection in parallel.
///
/// Each reader thread serves exactly one connection and fans its bytes
/// out to `collectors` collector threads; bring up as many reader
/// threads as connections you intend to open. When all peers have
/// closed, the per-thread sketches are merged and the run is reported
/// on stdout: item count, collect throughput, total throughput and the
/// cardinality estimate, one line each.
#[derive(Debug, StructOpt)]
#[structopt(name = "server", about = "Sketch ingest server for raw TCP tuple streams.")]
struct Opt {
    /// Hash driving all sketches: IDENT, SIP, MURMUR3_32, MURMUR3_64 or
    /// MURMUR3_128.
    hash: HashKind,

    /// Reader threads, optionally with a collector multiple:
    /// `<threads>[x<collectors>]`.
    threads: ThreadSpec,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let opt = Opt::from_args();
    let config = ServerConfig::new(opt.hash, opt.threads.threads, opt.threads.collectors);
    let report = match IngestServer::bind(config).and_then(IngestServer::run) {
        Ok(report) => report,
        Err(err) => {
            eprintln!("{}", err);
            process::exit(1);
        }
    };

    println!("Item Count: {}", report.items);
    println!(
        "Collect Throughput [GB/s]: {}",
        report.collect_throughput_gbps()
    );
    println!(
        "Total Throughput   [GB/s]: {}",
        report.total_throughput_gbps()
    );
    println!("Cardinality: {}", report.cardinality);
}
