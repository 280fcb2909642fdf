//! Byte-line readers feeding the sketch engine: text-tuple parsing and
//! serialized-sketch merging. Both consume a buffered stream line by
//! line, with `\n` and `\r\n` terminators stripped.

use std::io::{self, BufRead};

use bstr::io::BufReadExt;
use bstr::ByteSlice;

use crate::collector::SketchCollector;
use crate::SketchError;

/// Accumulates whitespace-separated decimal `u32` tuples from a text
/// stream. Tokens that do not parse are counted and skipped.
#[derive(Default)]
pub struct TupleReader {
    pub tuples: Vec<u32>,
    pub skipped: usize,
}

impl TupleReader {
    /// Reads every line of `input`, accumulating its tuples.
    pub fn read_from<R: BufRead>(mut self, input: R) -> io::Result<Self> {
        input.for_byte_line(|line| {
            self.read_line(line);
            Ok(true)
        })?;
        Ok(self)
    }

    fn read_line(&mut self, line: &[u8]) {
        for field in line.fields() {
            match field.to_str().ok().and_then(|s| s.parse::<u32>().ok()) {
                Some(value) => self.tuples.push(value),
                None => self.skipped += 1,
            }
        }
    }
}

/// Merges base64 sketch lines (one sketch per line, as printed by
/// `--raw`) into a single collector. Blank lines are ignored; the first
/// decode or compatibility failure is kept and surfaced by `finish`.
#[derive(Default)]
pub struct SketchMerger {
    master: Option<SketchCollector>,
    error: Option<SketchError>,
}

impl SketchMerger {
    /// Reads every sketch line of `input` and merges it in.
    pub fn read_from<R: BufRead>(mut self, input: R) -> io::Result<Self> {
        input.for_byte_line(|line| {
            self.read_line(line);
            Ok(true)
        })?;
        Ok(self)
    }

    /// The merged collector, or `None` when no sketch line was seen.
    pub fn finish(self) -> Result<Option<SketchCollector>, SketchError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.master),
        }
    }

    fn read_line(&mut self, line: &[u8]) {
        if self.error.is_some() {
            return;
        }
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let text = match line.to_str() {
            Ok(text) => text,
            Err(err) => {
                self.error = Some(SketchError::Decode(format!("{}", err)));
                return;
            }
        };
        match SketchCollector::from_base64(text) {
            Ok(sketch) => match self.master.as_mut() {
                None => self.master = Some(sketch),
                Some(master) => {
                    if master.hash_kind() != sketch.hash_kind() {
                        self.error = Some(SketchError::GeometryMismatch(
                            "sketches were built with different hashes",
                        ));
                    } else if let Err(err) = master.merge(&sketch) {
                        self.error = Some(err);
                    }
                }
            },
            Err(err) => self.error = Some(err),
        }
    }
}
