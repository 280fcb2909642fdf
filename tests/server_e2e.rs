//! End-to-end ingest over real TCP sockets.

use std::io::Write;
use std::net::{SocketAddr, TcpStream};
use std::thread;

use byte_slice_cast::AsByteSlice;

use sktrs::{HashKind, IngestServer, ServerConfig, ServerReport};

fn ephemeral_config(hash: HashKind, threads: usize, mul_collectors: usize) -> ServerConfig {
    let mut config = ServerConfig::new(hash, threads, mul_collectors);
    config.addr = SocketAddr::from(([127, 0, 0, 1], 0));
    config
}

fn run_ingest(
    config: ServerConfig,
    send: impl FnOnce(SocketAddr),
) -> ServerReport {
    let server = IngestServer::bind(config).expect("bind on an ephemeral port");
    let addr = server.local_addr().expect("bound address");
    let handle = thread::spawn(move || server.run().expect("ingest run"));
    send(addr);
    handle.join().expect("server thread")
}

#[test]
fn million_distinct_tuples_over_four_connections() {
    let report = run_ingest(ephemeral_config(HashKind::Murmur128, 4, 2), |addr| {
        let total: u32 = 1_000_000;
        let share = total / 4;
        let mut streams: Vec<TcpStream> = (0..4)
            .map(|_| TcpStream::connect(addr).expect("connect"))
            .collect();
        for (i, stream) in streams.iter_mut().enumerate() {
            let tuples: Vec<u32> = (i as u32 * share..(i as u32 + 1) * share).collect();
            stream.set_nodelay(true).expect("TCP_NODELAY");
            stream.write_all(tuples.as_byte_slice()).expect("send share");
        }
        drop(streams); // closing is the shutdown signal
    });

    assert_eq!(report.items, 1_000_000);
    assert_eq!(report.connections, 4);
    let relative_error = (report.cardinality / 1_000_000.0 - 1.0).abs();
    assert!(
        relative_error <= 0.03,
        "cardinality {} off by {}",
        report.cardinality,
        relative_error
    );
    // One million distinct tuples: F2 equals the item count.
    let f2_error = (report.f2_median / 1_000_000.0 - 1.0).abs();
    assert!(
        f2_error <= 0.1,
        "F2 median {} off by {}",
        report.f2_median,
        f2_error
    );
}

#[test]
fn trailing_partial_tuple_is_discarded() {
    let report = run_ingest(ephemeral_config(HashKind::Murmur128, 1, 1), |addr| {
        let tuples: Vec<u32> = (0..10).collect();
        let mut stream = TcpStream::connect(addr).expect("connect");
        stream.write_all(tuples.as_byte_slice()).expect("send tuples");
        stream.write_all(&[0xAB, 0xCD]).expect("send stray bytes");
    });

    assert_eq!(report.items, 10);
    assert_eq!(report.connections, 1);
}

#[test]
fn duplicate_shares_do_not_inflate_cardinality() {
    // Both connections send the same 50k tuples; distinct count stays 50k
    // while the item count doubles.
    let report = run_ingest(ephemeral_config(HashKind::Murmur64, 2, 2), |addr| {
        let tuples: Vec<u32> = (0..50_000).collect();
        let mut streams: Vec<TcpStream> = (0..2)
            .map(|_| TcpStream::connect(addr).expect("connect"))
            .collect();
        for stream in streams.iter_mut() {
            stream.write_all(tuples.as_byte_slice()).expect("send share");
        }
    });

    assert_eq!(report.items, 100_000);
    let relative_error = (report.cardinality / 50_000.0 - 1.0).abs();
    assert!(
        relative_error <= 0.05,
        "cardinality {} off by {}",
        report.cardinality,
        relative_error
    );
}

#[test]
fn rejects_out_of_range_configuration() {
    assert!(IngestServer::bind(ephemeral_config(HashKind::Sip, 0, 4)).is_err());
    assert!(IngestServer::bind(ephemeral_config(HashKind::Sip, 129, 4)).is_err());
    assert!(IngestServer::bind(ephemeral_config(HashKind::Sip, 2, 0)).is_err());
    assert!(IngestServer::bind(ephemeral_config(HashKind::Sip, 2, 65)).is_err());
}
