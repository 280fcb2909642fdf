//! The streaming sketch collector.
//!
//! A [`SketchCollector`] consumes batches of `u32` tuples and maintains,
//! in one pass per tuple, a basic summary (count/min/max/sum/sum²), a
//! HyperLogLog bucket array, an AGMS tug-of-war table and a Count-Min
//! table. All four are driven by a single hash evaluation per tuple;
//! each sketch carves its own bit stream out of that one value.
//!
//! Collectors with identical geometry merge cell-wise (max for HLL, sum
//! for AGMS/CM), so a stream may be sharded across threads or machines
//! and the partial sketches combined afterwards with no loss.

use std::thread;

use serde::{Deserialize, Serialize};

use crate::hash::{self, HashKind, HashWord};
use crate::SketchError;

/// The five parameters that fix a collector's buffer sizes and bit
/// slicings. Two collectors can merge only when all five match.
///
/// CLI-facing ranges are `p ∈ [4, 16]` and `rows ∈ [1, 8]` (checked by
/// [`Geometry::validate`]); the constructor itself accepts degenerate
/// shapes because column accumulators are built with `hll_p = 0` and
/// `cm_rows = 0`. AGMS rows consume `agms_p + 1` hash bits each and CM
/// rows `cm_p` each; rows past the hash width read zero bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub hll_p: u32,
    pub agms_rows: u32,
    pub agms_p: u32,
    pub cm_rows: u32,
    pub cm_p: u32,
}

impl Geometry {
    /// The geometry the ingest server and file client pre-allocate.
    pub const DEFAULT: Geometry = Geometry {
        hll_p: 13,
        agms_rows: 5,
        agms_p: 13,
        cm_rows: 5,
        cm_p: 13,
    };

    /// Degenerate geometry for an F2 column accumulator over `rows`
    /// AGMS rows; only the first `rows` AGMS cells are ever touched.
    pub fn column_accumulator(rows: u32) -> Geometry {
        Geometry {
            hll_p: 0,
            agms_rows: rows,
            agms_p: 1,
            cm_rows: 0,
            cm_p: 0,
        }
    }

    /// Range-checks the CLI-facing parameters.
    pub fn validate(&self) -> Result<(), SketchError> {
        if self.hll_p < 4 || self.hll_p > 16 {
            return Err(SketchError::InvalidArgument(format!(
                "HLL precision {} out of valid range [4:16]",
                self.hll_p
            )));
        }
        for (what, rows, p) in [
            ("AGMS", self.agms_rows, self.agms_p),
            ("CM", self.cm_rows, self.cm_p),
        ] {
            if rows < 1 || rows > 8 {
                return Err(SketchError::InvalidArgument(format!(
                    "{} row count {} out of valid range [1:8]",
                    what, rows
                )));
            }
            if p < 4 || p > 16 {
                return Err(SketchError::InvalidArgument(format!(
                    "{} bucket bits {} out of valid range [4:16]",
                    what, p
                )));
            }
        }
        Ok(())
    }
}

mod u128_parts {
    //! Serializes a u128 as its (high, low) u64 halves; MessagePack has
    //! no native 128-bit integer.
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        ((*value >> 64) as u64, *value as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let (hi, lo) = <(u64, u64)>::deserialize(deserializer)?;
        Ok((u128::from(hi) << 64) | u128::from(lo))
    }
}

/// Exact per-batch statistics maintained alongside the sketches.
///
/// `min` is `u32::MAX` and `max` is 0 while `count` is 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSummary {
    pub count: u64,
    pub min: u32,
    pub max: u32,
    pub sum: u64,
    #[serde(with = "u128_parts")]
    pub sum_squares: u128,
}

impl Default for StreamSummary {
    fn default() -> Self {
        StreamSummary {
            count: 0,
            min: u32::MAX,
            max: 0,
            sum: 0,
            sum_squares: 0,
        }
    }
}

impl StreamSummary {
    #[inline]
    fn observe(&mut self, key: u32) {
        self.count += 1;
        self.min = self.min.min(key);
        self.max = self.max.max(key);
        self.sum = self.sum.wrapping_add(u64::from(key));
        let sq = u64::from(key) * u64::from(key);
        self.sum_squares = self.sum_squares.wrapping_add(u128::from(sq));
    }

    fn merge(&mut self, other: &StreamSummary) {
        self.count += other.count;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.sum = self.sum.wrapping_add(other.sum);
        self.sum_squares = self.sum_squares.wrapping_add(other.sum_squares);
    }
}

/// Parallel sketch collector: HLL buckets, AGMS table, CM table and a
/// stream summary, all updated from one hash evaluation per tuple.
///
/// A collector is mutated by exactly one thread at a time; cross-thread
/// aggregation goes through [`SketchCollector::merge`].
///
/// CM cells are plain `u32` with wrapping addition; callers size `cm_p`
/// so that per-cell counts stay far from overflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SketchCollector {
    geometry: Geometry,
    hash: HashKind,
    hll: Vec<u32>,
    agms: Vec<i32>,
    cm: Vec<u32>,
    summary: StreamSummary,
}

impl SketchCollector {
    /// Creates an empty collector: all buffers zeroed, geometry and hash
    /// kind bound for the collector's lifetime.
    pub fn new(geometry: Geometry, hash: HashKind) -> Self {
        SketchCollector {
            geometry,
            hash,
            hll: vec![0; 1 << geometry.hll_p],
            agms: vec![0; (1 << geometry.agms_p) * geometry.agms_rows as usize],
            cm: vec![0; (1 << geometry.cm_p) * geometry.cm_rows as usize],
            summary: StreamSummary::default(),
        }
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn hash_kind(&self) -> HashKind {
        self.hash
    }

    pub fn hll_buckets(&self) -> &[u32] {
        &self.hll
    }

    pub fn agms_table(&self) -> &[i32] {
        &self.agms
    }

    pub fn cm_table(&self) -> &[u32] {
        &self.cm
    }

    pub fn summary(&self) -> &StreamSummary {
        &self.summary
    }

    /// Folds every tuple into all four sketches.
    pub fn collect(&mut self, tuples: &[u32]) {
        match self.hash {
            HashKind::Ident => self.collect_with(tuples, hash::ident),
            HashKind::Sip => self.collect_with(tuples, hash::siphash24),
            HashKind::Murmur32 => self.collect_with(tuples, hash::murmur3_32),
            HashKind::Murmur64 => self.collect_with(tuples, hash::murmur3_64),
            HashKind::Murmur128 => self.collect_with(tuples, hash::murmur3_128),
        }
    }

    fn collect_with<W, F>(&mut self, tuples: &[u32], hash: F)
    where
        W: HashWord,
        F: Fn(u32) -> W,
    {
        let Geometry {
            hll_p,
            agms_rows,
            agms_p,
            cm_rows,
            cm_p,
        } = self.geometry;

        for &key in tuples {
            self.summary.observe(key);
            let h = hash(key);

            // HLL: bucket from the top hll_p bits, rank from the rest.
            // rank_field fills the vacated low bits with ones, which both
            // caps the rank at W - hll_p + 1 and keeps an all-zero hash
            // defined.
            let bucket = h.top_index(hll_p);
            let rank = h.rank_field(hll_p).leading_zeros() + 1;
            if rank > self.hll[bucket] {
                self.hll[bucket] = rank;
            }

            // AGMS: agms_p offset bits per row, then one sign bit. The
            // shift pattern makes offset and sign overlap by one
            // position; it is frozen, since changing it would break
            // cross-producer merges.
            let mut ah = h;
            for row in 0..agms_rows as usize {
                let offset = ah.low_index(agms_p);
                ah = ah.shr(agms_p - 1);
                let sign = (ah.low_index(2) as i32 & 2) - 1;
                ah = ah.shr(2);
                let cell = (row << agms_p) + offset;
                self.agms[cell] = self.agms[cell].wrapping_add(sign);
            }

            // CM: cm_p offset bits per row.
            let mut ch = h;
            for row in 0..cm_rows as usize {
                let offset = ch.low_index(cm_p);
                ch = ch.shr(cm_p);
                let cell = (row << cm_p) + offset;
                self.cm[cell] = self.cm[cell].wrapping_add(1);
            }
        }
    }

    /// Folds `other` into `self` cell-wise: max for HLL buckets, wrapping
    /// sums for AGMS and CM. `other` is unchanged.
    pub fn merge(&mut self, other: &Self) -> Result<(), SketchError> {
        if self.geometry.hll_p != other.geometry.hll_p {
            return Err(SketchError::GeometryMismatch("incompatible HLL bucket sets"));
        }
        if self.geometry.agms_rows != other.geometry.agms_rows
            || self.geometry.agms_p != other.geometry.agms_p
        {
            return Err(SketchError::GeometryMismatch("incompatible AGMS tables"));
        }
        if self.geometry.cm_rows != other.geometry.cm_rows
            || self.geometry.cm_p != other.geometry.cm_p
        {
            return Err(SketchError::GeometryMismatch("incompatible CM tables"));
        }

        for (cell, cand) in self.hll.iter_mut().zip(&other.hll) {
            if *cell < *cand {
                *cell = *cand;
            }
        }
        for (cell, cand) in self.agms.iter_mut().zip(&other.agms) {
            *cell = cell.wrapping_add(*cand);
        }
        for (cell, cand) in self.cm.iter_mut().zip(&other.cm) {
            *cell = cell.wrapping_add(*cand);
        }
        self.summary.merge(&other.summary);
        Ok(())
    }

    /// HyperLogLog estimate with the small-range linear-counting branch.
    /// There is no large-range correction.
    pub fn estimate_cardinality(&self) -> f64 {
        let m = self.hll.len() as f64;
        let alpha = 0.7213 * m / (m + 1.079);

        let mut zeros = 0usize;
        let mut harmonic = 0.0f64;
        for &rank in &self.hll {
            if rank == 0 {
                zeros += 1;
            }
            harmonic += (-f64::from(rank)).exp2();
        }
        let raw = alpha * m * m / harmonic;

        if raw <= 2.5 * m && zeros > 0 {
            return m * (m / zeros as f64).ln();
        }
        raw
    }

    /// Collapses each AGMS row of `src` into one scalar, the sum of its
    /// squared cells, and adds it to this accumulator's cell for that
    /// row. Feed several collectors in, then take [`median`] for the F2
    /// estimate.
    ///
    /// [`median`]: SketchCollector::median
    pub fn merge_columns(&mut self, src: &Self) -> Result<(), SketchError> {
        if self.geometry.agms_rows != src.geometry.agms_rows {
            return Err(SketchError::GeometryMismatch("incompatible AGMS row counts"));
        }
        let cols = 1usize << src.geometry.agms_p;
        for row in 0..src.geometry.agms_rows as usize {
            let mut sq = 0i32;
            for &cell in &src.agms[row * cols..(row + 1) * cols] {
                sq = sq.wrapping_add(cell.wrapping_mul(cell));
            }
            self.agms[row] = self.agms[row].wrapping_add(sq);
        }
        Ok(())
    }

    /// Median over the first `agms_rows` cells (the mean of the two
    /// middle elements, which handles odd and even row counts alike).
    pub fn median(&self) -> f64 {
        let rows = self.geometry.agms_rows as usize;
        let mut cells = self.agms[..rows].to_vec();
        cells.sort_unstable();
        (f64::from(cells[(rows - 1) / 2]) + f64::from(cells[rows / 2])) / 2.0
    }

    /// Count-Min point query: the minimum over all rows of the cell this
    /// key hashes to. Never underestimates the true frequency.
    pub fn estimate_frequency(&self, key: u32) -> u32 {
        match self.hash {
            HashKind::Ident => self.frequency_with(key, hash::ident),
            HashKind::Sip => self.frequency_with(key, hash::siphash24),
            HashKind::Murmur32 => self.frequency_with(key, hash::murmur3_32),
            HashKind::Murmur64 => self.frequency_with(key, hash::murmur3_64),
            HashKind::Murmur128 => self.frequency_with(key, hash::murmur3_128),
        }
    }

    fn frequency_with<W, F>(&self, key: u32, hash: F) -> u32
    where
        W: HashWord,
        F: Fn(u32) -> W,
    {
        let Geometry { cm_rows, cm_p, .. } = self.geometry;
        if cm_rows == 0 {
            return 0;
        }
        let mut ch = hash(key);
        let mut estimate = u32::MAX;
        for row in 0..cm_rows as usize {
            let offset = ch.low_index(cm_p);
            ch = ch.shr(cm_p);
            estimate = estimate.min(self.cm[(row << cm_p) + offset]);
        }
        estimate
    }

    /// Zeroes every buffer and the summary. Geometry and hash binding are
    /// retained; all observables afterwards equal a freshly constructed
    /// collector.
    pub fn clear(&mut self) {
        for cell in &mut self.hll {
            *cell = 0;
        }
        for cell in &mut self.agms {
            *cell = 0;
        }
        for cell in &mut self.cm {
            *cell = 0;
        }
        self.summary = StreamSummary::default();
    }

    /// Serializes to base64 (MessagePack inside, no `=` padding), one
    /// line per sketch, suitable for piping between processes.
    pub fn to_base64(&self) -> String {
        let bytes = rmp_serde::to_vec(self).expect("in-memory encoding cannot fail");
        base64::encode_config(bytes, base64::STANDARD_NO_PAD)
    }

    /// Deserializes a sketch produced by [`to_base64`]. Payloads whose
    /// buffer lengths disagree with their declared geometry are rejected.
    ///
    /// [`to_base64`]: SketchCollector::to_base64
    pub fn from_base64(s: &str) -> Result<Self, SketchError> {
        let bytes = base64::decode_config(s, base64::STANDARD_NO_PAD)?;
        let collector: SketchCollector = rmp_serde::from_slice(&bytes)?;
        let geometry = collector.geometry;
        if collector.hll.len() != 1 << geometry.hll_p
            || collector.agms.len() != (1 << geometry.agms_p) * geometry.agms_rows as usize
            || collector.cm.len() != (1 << geometry.cm_p) * geometry.cm_rows as usize
        {
            return Err(SketchError::Decode(
                "sketch buffers do not match their geometry".to_owned(),
            ));
        }
        Ok(collector)
    }
}

/// Shards `tuples` into `threads` contiguous slices, collects each on
/// its own thread, then merges serially into the first collector.
/// Bit-for-bit identical to a single-threaded collect of the whole
/// slice.
pub fn collect_sharded(
    tuples: &[u32],
    threads: usize,
    geometry: Geometry,
    hash: HashKind,
) -> SketchCollector {
    let threads = threads.max(1);
    let mut collectors: Vec<SketchCollector> = (0..threads)
        .map(|_| SketchCollector::new(geometry, hash))
        .collect();

    thread::scope(|s| {
        for (i, collector) in collectors.iter_mut().enumerate() {
            let shard = &tuples[i * tuples.len() / threads..(i + 1) * tuples.len() / threads];
            s.spawn(move || collector.collect(shard));
        }
    });

    let mut parts = collectors.into_iter();
    let mut master = parts.next().expect("at least one collector");
    for part in parts {
        master.merge(&part).expect("collectors share geometry");
    }
    master
}
