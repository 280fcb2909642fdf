//! Multi-worker TCP ingest server.
//!
//! One reader thread per expected connection accepts a socket and
//! drives a pool of collector threads through a free/full job-queue
//! pair. Tuples arrive as a raw little-endian `u32` stream with no
//! framing; a partial trailing word is carried from one job into the
//! next so no tuple is ever split. When every connection has drained,
//! the per-thread collectors are merged serially and the final
//! estimates computed.

use std::io::{self, Read};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use byte_slice_cast::AsMutByteSlice;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{error, info, warn};

use crate::collector::{Geometry, SketchCollector};
use crate::hash::HashKind;
use crate::queue::{Job, JobQueue};
use crate::SketchError;

/// Default TCP port for tuple ingest.
pub const INGEST_PORT: u16 = 5017;

const MAX_THREADS: usize = 128;
const MAX_MUL_COLLECTORS: usize = 64;

/// Ingest server parameters. `threads` reader threads each accept one
/// connection and feed `mul_collectors` dedicated collector threads.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub hash: HashKind,
    pub threads: usize,
    pub mul_collectors: usize,
    pub geometry: Geometry,
    pub addr: SocketAddr,
}

impl ServerConfig {
    pub fn new(hash: HashKind, threads: usize, mul_collectors: usize) -> Self {
        ServerConfig {
            hash,
            threads,
            mul_collectors,
            geometry: Geometry::DEFAULT,
            addr: SocketAddr::from(([0, 0, 0, 0], INGEST_PORT)),
        }
    }
}

/// What a completed ingest run produced.
#[derive(Debug)]
pub struct ServerReport {
    pub items: u64,
    pub connections: u64,
    pub cardinality: f64,
    pub f2_median: f64,
    /// First accept through the last worker join.
    pub collect_time: Duration,
    /// First accept through the final merge and estimates.
    pub total_time: Duration,
}

impl ServerReport {
    pub fn collect_throughput_gbps(&self) -> f64 {
        throughput_gbps(self.items, self.collect_time)
    }

    pub fn total_throughput_gbps(&self) -> f64 {
        throughput_gbps(self.items, self.total_time)
    }
}

fn throughput_gbps(items: u64, elapsed: Duration) -> f64 {
    let nanos = elapsed.as_nanos() as f64;
    if nanos == 0.0 {
        return 0.0;
    }
    items as f64 * 4.0 / nanos
}

/// A bound ingest server, ready to accept connections.
pub struct IngestServer {
    config: ServerConfig,
    listener: TcpListener,
}

impl IngestServer {
    /// Validates the configuration and binds the listening socket with
    /// `SO_REUSEPORT`, so several server processes can share the port.
    pub fn bind(config: ServerConfig) -> Result<Self, SketchError> {
        if config.threads < 1 || config.threads > MAX_THREADS {
            return Err(SketchError::InvalidArgument(format!(
                "threads out of bounds, expected 1..{}",
                MAX_THREADS
            )));
        }
        if config.mul_collectors < 1 || config.mul_collectors > MAX_MUL_COLLECTORS {
            return Err(SketchError::InvalidArgument(format!(
                "collectors multiple out of bounds, expected 1..{}",
                MAX_MUL_COLLECTORS
            )));
        }
        config.geometry.validate()?;

        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_port(true)?;
        socket.bind(&config.addr.into())?;
        socket.listen(config.threads as i32)?;
        let listener: TcpListener = socket.into();
        info!(
            "listening on {} ({} reader threads x {} collectors)",
            listener.local_addr()?,
            config.threads,
            config.mul_collectors
        );
        Ok(IngestServer { config, listener })
    }

    /// The bound address; useful when the config requested port 0.
    pub fn local_addr(&self) -> Result<SocketAddr, SketchError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts one connection per reader thread, ingests until every
    /// peer closes, then merges and estimates. Blocks until done.
    pub fn run(self) -> Result<ServerReport, SketchError> {
        let ServerConfig {
            hash,
            threads,
            mul_collectors,
            geometry,
            ..
        } = self.config;

        let mut collectors: Vec<SketchCollector> = (0..threads * mul_collectors)
            .map(|_| SketchCollector::new(geometry, hash))
            .collect();
        let items = AtomicU64::new(0);
        let connects = AtomicU64::new(0);
        let started = Mutex::new(None::<Instant>);
        let listener = &self.listener;

        thread::scope(|s| {
            let (items, connects, started) = (&items, &connects, &started);
            for chunk in collectors.chunks_mut(mul_collectors) {
                s.spawn(move || reader_pipeline(listener, chunk, items, connects, started));
            }
        });
        let t1 = Instant::now();
        let t0 = started.lock().expect("start mutex poisoned").unwrap_or(t1);

        let (master, rest) = collectors
            .split_first_mut()
            .expect("at least one collector");
        for part in rest.iter() {
            master.merge(part)?;
        }
        let cardinality = master.estimate_cardinality();

        let mut columns =
            SketchCollector::new(Geometry::column_accumulator(geometry.agms_rows), hash);
        columns.merge_columns(master)?;
        let f2_median = columns.median();
        let t2 = Instant::now();

        Ok(ServerReport {
            items: items.load(Ordering::SeqCst),
            connections: connects.load(Ordering::SeqCst),
            cardinality,
            f2_median,
            collect_time: t1 - t0,
            total_time: t2 - t0,
        })
    }
}

/// One reader thread: accept a connection, pump jobs to this chunk's
/// collector threads, flush shutdown sentinels when the peer closes.
fn reader_pipeline(
    listener: &TcpListener,
    collectors: &mut [SketchCollector],
    items: &AtomicU64,
    connects: &AtomicU64,
    started: &Mutex<Option<Instant>>,
) {
    let mul = collectors.len();
    let free = JobQueue::with_pool(mul + 1);
    let full: JobQueue<Option<Job>> = JobQueue::new();

    thread::scope(|s| {
        let (free, full) = (&free, &full);
        for collector in collectors.iter_mut() {
            s.spawn(move || {
                while let Some(job) = full.pop() {
                    collector.collect(&job.buf[..job.cnt]);
                    items.fetch_add(job.cnt as u64, Ordering::Relaxed);
                    free.push(Some(job));
                }
            });
        }

        let outcome = serve_connection(listener, free, full, connects, started);
        for _ in 0..mul {
            full.push(None);
        }
        match outcome {
            Ok(0) => {}
            Ok(residual) => warn!("{} trailing bytes do not form a whole tuple; discarded", residual),
            Err(err) => error!("connection pipeline aborted: {}", err),
        }
    });
}

/// Feeds one connection's byte stream through the job cycle. Returns
/// the number of residual bytes that never formed a whole tuple.
fn serve_connection(
    listener: &TcpListener,
    free: &JobQueue<Option<Job>>,
    full: &JobQueue<Option<Job>>,
    connects: &AtomicU64,
    started: &Mutex<Option<Instant>>,
) -> io::Result<usize> {
    let (mut stream, peer) = listener.accept()?;
    if connects.fetch_add(1, Ordering::SeqCst) == 0 {
        *started.lock().expect("start mutex poisoned") = Some(Instant::now());
    }
    info!("accepted connection from {}", peer);

    // `cnt` is the byte count carried into the current job: 0..=3 bytes
    // of a split tuple, re-materialized from `carry` at the buffer head.
    let mut cnt = 0usize;
    let mut carry = 0u32;
    loop {
        let mut job = free.pop().expect("free queue never carries a sentinel");
        job.buf[0] = carry;
        let filled = {
            let bytes = job.buf.as_mut_byte_slice();
            read_full(&mut stream, &mut bytes[cnt..])?
        };
        if filled == 0 {
            free.push(Some(job));
            break;
        }
        cnt += filled;

        let tuples = cnt / 4;
        cnt %= 4;
        if cnt != 0 {
            carry = job.buf[tuples];
        }
        job.cnt = tuples;
        full.push(Some(job));
    }
    Ok(cnt)
}

/// MSG_WAITALL semantics over std: keeps reading until the buffer is
/// full or the peer closes. Returns the bytes filled; 0 means EOF.
fn read_full(stream: &mut TcpStream, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0usize;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}
