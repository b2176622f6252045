//! Stress-period seeking.
//!
//! Budget files repeat the same term set with the same sizes every saved
//! period, so the byte stride of the first period locates every later one.
//! Head files repeat one header plus one layer grid per layer. Neither stride
//! is self-describing, so every jump is re-validated against the header found
//! at the landing offset and abandoned for a sequential scan when it disagrees.

use crate::codec::{BudgetHeader, RecordReader, SNAPSHOT_HEADER_LEN, VALUE_LEN};
use crate::domain::{DecodeError, DecodeResult, GridGeometry};
use std::io::{Read, Seek};
use tracing::{debug, warn};

/// Sorted stress periods known to have produced output.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PeriodIndex {
    periods: Vec<i32>,
}

impl PeriodIndex {
    pub fn new(periods: impl IntoIterator<Item = i32>) -> Self {
        let mut periods: Vec<i32> = periods.into_iter().collect();
        periods.sort_unstable();
        periods.dedup();
        Self { periods }
    }

    pub fn periods(&self) -> &[i32] {
        &self.periods
    }

    pub fn len(&self) -> usize {
        self.periods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }

    pub fn contains(&self, period: i32) -> bool {
        self.periods.binary_search(&period).is_ok()
    }

    /// Zero-based position of `period` among the saved periods.
    pub fn ordinal(&self, period: i32) -> Option<usize> {
        self.periods.binary_search(&period).ok()
    }
}

/// Offset of `target` relative to the start of the data region.
pub fn offset_for_period(target: i32, index: &[i32], bytes_per_period: u64) -> DecodeResult<u64> {
    let ordinal = index
        .iter()
        .position(|period| *period == target)
        .ok_or(DecodeError::PeriodNotPresent { period: target })?;
    Ok(ordinal as u64 * bytes_per_period)
}

/// Terms and stride of a budget file, measured from its first saved period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetCatalog {
    pub terms: Vec<String>,
    pub first_period: i32,
    pub data_start: u64,
    pub bytes_per_period: u64,
}

impl BudgetCatalog {
    /// Walks the first period's records and rewinds to where it started.
    pub fn scan<R: Read + Seek>(
        reader: &mut RecordReader<R>,
        geometry: &GridGeometry,
    ) -> DecodeResult<Self> {
        let data_start = reader.position();
        let Some(first) = reader.peek_budget_header()? else {
            return Err(DecodeError::UnexpectedEof {
                offset: data_start,
                expected: reader.framing().budget_header_kind().len(),
                found: 0,
            });
        };

        let mut terms: Vec<String> = Vec::new();
        while let Some(header) = reader.peek_budget_header()? {
            if header.stress_period != first.stress_period {
                break;
            }
            reader.next_budget_header()?;
            let term = header.term_name.identifier().unwrap_or_default();
            if !terms.contains(&term) {
                terms.push(term);
            }
            reader.skip_budget_payload(&header, geometry)?;
        }

        let bytes_per_period = reader.position() - data_start;
        reader.seek_to(data_start)?;
        debug!(
            first_period = first.stress_period,
            terms = terms.len(),
            bytes_per_period,
            "measured budget period stride"
        );

        Ok(Self {
            terms,
            first_period: first.stress_period,
            data_start,
            bytes_per_period,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    Stride,
    Sequential,
}

/// Where a positioning request left the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekStatus {
    /// Jumped to the computed offset and the landing header was accepted.
    Jumped { offset: u64 },
    /// Stayed at the current position; the caller scans forward.
    Scanning,
    /// The jump was rejected and the reader was restored.
    FellBack,
}

/// Budget-file seek engine driven by the output-control index.
#[derive(Debug, Clone)]
pub struct SeekEngine {
    index: PeriodIndex,
    first_term: Option<String>,
    bytes_per_period: u64,
    data_start: u64,
    mode: SeekMode,
    seeks: usize,
    fallbacks: usize,
}

impl SeekEngine {
    pub fn new(index: PeriodIndex, catalog: &BudgetCatalog) -> Self {
        let mode = if catalog.bytes_per_period == 0 {
            SeekMode::Sequential
        } else {
            SeekMode::Stride
        };
        Self {
            index,
            first_term: catalog.terms.first().cloned(),
            bytes_per_period: catalog.bytes_per_period,
            data_start: catalog.data_start,
            mode,
            seeks: 0,
            fallbacks: 0,
        }
    }

    pub fn index(&self) -> &PeriodIndex {
        &self.index
    }

    pub const fn mode(&self) -> SeekMode {
        self.mode
    }

    pub const fn seeks(&self) -> usize {
        self.seeks
    }

    pub const fn fallbacks(&self) -> usize {
        self.fallbacks
    }

    /// Positions `reader` at or before the first record of `target`.
    ///
    /// The current reader position is the last known-good boundary. A jump is
    /// only taken forward of it, and only kept when the landing header opens a
    /// period (its term is the first catalogued term) no later than `target`.
    /// Anything else restores the boundary and switches the engine to
    /// sequential scanning for the rest of the pass.
    pub fn position<R: Read + Seek>(
        &mut self,
        reader: &mut RecordReader<R>,
        target: i32,
    ) -> DecodeResult<SeekStatus> {
        let relative = offset_for_period(target, self.index.periods(), self.bytes_per_period)?;
        if self.mode == SeekMode::Sequential {
            return Ok(SeekStatus::Scanning);
        }

        let last_good = reader.position();
        let offset = self.data_start + relative;
        if offset <= last_good {
            return Ok(SeekStatus::Scanning);
        }

        let landing = if offset < reader.len() {
            reader.seek_to(offset)?;
            reader.peek_budget_header().ok().flatten()
        } else {
            None
        };

        match landing {
            Some(header) if self.opens_period(&header, target) => {
                self.seeks += 1;
                debug!(period = target, offset, "seeked to budget period");
                Ok(SeekStatus::Jumped { offset })
            }
            _ => {
                let inconsistency = DecodeError::SeekInconsistency {
                    target,
                    offset,
                    found: landing.map(|header| header.stress_period),
                };
                warn!(
                    period = target,
                    offset,
                    restored = last_good,
                    "{inconsistency}; scanning sequentially"
                );
                reader.seek_to(last_good)?;
                self.mode = SeekMode::Sequential;
                self.fallbacks += 1;
                Ok(SeekStatus::FellBack)
            }
        }
    }

    fn opens_period(&self, header: &BudgetHeader, target: i32) -> bool {
        let opens = header.term_name.identifier() == self.first_term;
        let not_past = header.stress_period < target
            || (header.stress_period == target && header.time_step <= 1);
        opens && not_past
    }
}

/// Bytes one stress period occupies in a head file with one step per period.
pub fn snapshot_period_stride(geometry: &GridGeometry, framing_overhead: u64) -> u64 {
    let header = SNAPSHOT_HEADER_LEN as u64 + framing_overhead;
    let grid = (geometry.cells_per_layer() * VALUE_LEN) as u64 + framing_overhead;
    u64::from(geometry.layers) * (header + grid)
}

/// Whether a head scan at `position` should jump ahead to the start of `target`.
///
/// Only forward jumps are taken; a target whose start lies at or behind the
/// current position is reached by reading on.
pub fn snapshot_seek_offset(position: u64, target: i32, stride: u64) -> Option<u64> {
    if target < 1 || stride == 0 {
        return None;
    }
    let offset = (target as u64 - 1) * stride;
    (offset > position).then_some(offset)
}
