//! Binary record layouts of the simulator's unformatted output.
//!
//! Integers and floats are little-endian 4-byte values; term names are 16-byte
//! space-padded ASCII. Layouts are bit-exact with the simulator and must not change.

mod reader;
mod writer;

pub use reader::{RecordReader, read_header, read_int_payload, read_payload};
pub use writer::{RecordWriter, write_header, write_int_payload, write_payload};

use crate::domain::{DecodeError, DecodeResult};
use byteorder::{ByteOrder, LittleEndian};
use std::fmt::{Debug, Display, Formatter};

pub const TERM_NAME_LEN: usize = 16;
pub const SNAPSHOT_HEADER_LEN: usize = 44;
pub const BUDGET_HEADER_LEN: usize = 36;
pub const BUDGET_HEADER_BOR_LEN: usize = BUDGET_HEADER_LEN + 2 * MARKER_LEN;
pub const COMPACT_TRAILER_LEN: usize = 16;
pub const MARKER_LEN: usize = 4;
pub const VALUE_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderKind {
    Snapshot,
    Budget,
    BudgetWithBor,
    CompactTrailer,
}

impl HeaderKind {
    pub const fn len(self) -> usize {
        match self {
            Self::Snapshot => SNAPSHOT_HEADER_LEN,
            Self::Budget => BUDGET_HEADER_LEN,
            Self::BudgetWithBor => BUDGET_HEADER_BOR_LEN,
            Self::CompactTrailer => COMPACT_TRAILER_LEN,
        }
    }
}

/// How records are delimited inside a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RecordFraming {
    /// Stream access: records follow each other with no delimiters.
    #[default]
    Stream,
    /// Unformatted sequential access: each record is bracketed by its byte length.
    Sequential,
}

impl RecordFraming {
    /// Detects sequential framing from the first bytes of a budget file.
    ///
    /// A sequential file opens with a 36-byte header record, so its leading and
    /// trailing markers both read 36. In stream files the first word is a time step.
    pub fn detect(prefix: &[u8]) -> Self {
        if prefix.len() < BUDGET_HEADER_BOR_LEN {
            return Self::Stream;
        }
        let leading = LittleEndian::read_i32(prefix);
        let trailing = LittleEndian::read_i32(&prefix[BUDGET_HEADER_BOR_LEN - MARKER_LEN..]);
        if leading == BUDGET_HEADER_LEN as i32 && trailing == BUDGET_HEADER_LEN as i32 {
            Self::Sequential
        } else {
            Self::Stream
        }
    }

    pub const fn overhead(self) -> u64 {
        match self {
            Self::Stream => 0,
            Self::Sequential => 2 * MARKER_LEN as u64,
        }
    }

    pub const fn budget_header_kind(self) -> HeaderKind {
        match self {
            Self::Stream => HeaderKind::Budget,
            Self::Sequential => HeaderKind::BudgetWithBor,
        }
    }
}

/// Fixed-width, space-padded ASCII term name.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TermName([u8; TERM_NAME_LEN]);

impl TermName {
    pub const fn from_bytes(bytes: [u8; TERM_NAME_LEN]) -> Self {
        Self(bytes)
    }

    /// Builds a name right-justified the way the simulator writes budget text.
    pub fn new(text: &str) -> DecodeResult<Self> {
        if text.len() > TERM_NAME_LEN || !text.bytes().all(is_term_byte) {
            return Err(DecodeError::invalid_argument(format!(
                "term name '{text}' must be at most {TERM_NAME_LEN} ASCII characters"
            )));
        }
        let mut bytes = [b' '; TERM_NAME_LEN];
        bytes[TERM_NAME_LEN - text.len()..].copy_from_slice(text.as_bytes());
        Ok(Self(bytes))
    }

    pub const fn as_bytes(&self) -> &[u8; TERM_NAME_LEN] {
        &self.0
    }

    /// Term identifier: padding stripped, inner spaces folded to underscores.
    ///
    /// `None` when the field holds bytes other than printable ASCII.
    pub fn identifier(&self) -> Option<String> {
        if !self.0.iter().copied().all(is_term_byte) {
            return None;
        }
        let text = std::str::from_utf8(&self.0).ok()?;
        Some(text.trim().replace(' ', "_"))
    }
}

impl Debug for TermName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "TermName({:?})", String::from_utf8_lossy(&self.0))
    }
}

impl Display for TermName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(String::from_utf8_lossy(&self.0).trim())
    }
}

fn is_term_byte(byte: u8) -> bool {
    byte == b' ' || byte.is_ascii_graphic()
}

/// Head or concentration layer header.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapshotHeader {
    pub time_step: i32,
    pub stress_period: i32,
    pub partial_time: f32,
    pub total_time: f32,
    pub term_name: TermName,
    pub cols: i32,
    pub rows: i32,
    pub layer: i32,
}

/// Cell-by-cell budget header; the sign of `layer_flag` selects compact (`< 0`)
/// or full 3D (`> 0`) payloads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetHeader {
    pub time_step: i32,
    pub stress_period: i32,
    pub term_name: TermName,
    pub cols: i32,
    pub rows: i32,
    pub layer_flag: i32,
}

impl BudgetHeader {
    pub const fn is_compact(&self) -> bool {
        self.layer_flag < 0
    }

    pub const fn layer_count(&self) -> u32 {
        self.layer_flag.unsigned_abs()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompactTrailer {
    pub method: i32,
    pub delta_t: f32,
    pub partial_time: f32,
    pub total_time: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecordHeader {
    Snapshot(SnapshotHeader),
    Budget(BudgetHeader),
    BudgetWithBor(BudgetHeader),
    CompactTrailer(CompactTrailer),
}

impl RecordHeader {
    pub const fn kind(&self) -> HeaderKind {
        match self {
            Self::Snapshot(_) => HeaderKind::Snapshot,
            Self::Budget(_) => HeaderKind::Budget,
            Self::BudgetWithBor(_) => HeaderKind::BudgetWithBor,
            Self::CompactTrailer(_) => HeaderKind::CompactTrailer,
        }
    }

    pub const fn stress_period(&self) -> Option<i32> {
        match self {
            Self::Snapshot(header) => Some(header.stress_period),
            Self::Budget(header) | Self::BudgetWithBor(header) => Some(header.stress_period),
            Self::CompactTrailer(_) => None,
        }
    }
}

/// Compact-record payload layout, selected by the trailer's method code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactMethod {
    /// Dense `rows*cols*layers` volume.
    Volume,
    /// Layer-indicator grid followed by one value grid.
    LayerIndicator,
    /// One value grid for layer 1.
    TopLayer,
}

impl CompactMethod {
    pub fn from_code(code: i32, offset: u64) -> DecodeResult<Self> {
        match code {
            1 => Ok(Self::Volume),
            3 => Ok(Self::LayerIndicator),
            4 => Ok(Self::TopLayer),
            2 | 5 => Err(DecodeError::unsupported(
                offset,
                format!("list-based compact budget method {code} is not supported"),
            )),
            other => Err(DecodeError::unsupported(
                offset,
                format!("unknown compact budget method {other}"),
            )),
        }
    }
}

/// Compact record holding one layer.
#[derive(Debug, Clone, PartialEq)]
pub struct CompactLayer {
    pub trailer: CompactTrailer,
    pub layer: i32,
    pub layer_grid: Option<Vec<i32>>,
    pub values: Vec<f32>,
}

/// Dense volume, one row-major layer after another.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseVolume {
    pub trailer: Option<CompactTrailer>,
    pub layers: usize,
    pub cells_per_layer: usize,
    pub values: Vec<f32>,
}

impl DenseVolume {
    /// Values of a 1-based layer.
    pub fn layer(&self, layer: i32) -> Option<&[f32]> {
        if layer < 1 || layer as usize > self.layers {
            return None;
        }
        let start = (layer as usize - 1) * self.cells_per_layer;
        self.values.get(start..start + self.cells_per_layer)
    }
}

/// Budget payload, decided once from the header and trailer.
#[derive(Debug, Clone, PartialEq)]
pub enum BudgetPayload {
    Compact(CompactLayer),
    Full(DenseVolume),
}

impl BudgetPayload {
    pub fn total_time(&self) -> Option<f32> {
        match self {
            Self::Compact(layer) => Some(layer.trailer.total_time),
            Self::Full(volume) => volume.trailer.map(|trailer| trailer.total_time),
        }
    }
}

/// Cell holding the in-band layer index of a compact layer-indicator grid.
///
/// Row 1, column 1 (zero based), clamped for grids smaller than 2x2.
pub const fn compact_layer_cell(rows: usize, cols: usize) -> usize {
    let row = if rows > 1 { 1 } else { 0 };
    let col = if cols > 1 { 1 } else { 0 };
    row * cols + col
}
