use super::{
    BUDGET_HEADER_LEN, BudgetHeader, CompactTrailer, HeaderKind, RecordFraming, RecordHeader,
    SnapshotHeader, VALUE_LEN,
};
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::{self, Write};

/// Writes one header in its exact binary shape.
pub fn write_header<W: Write>(out: &mut W, header: &RecordHeader) -> io::Result<()> {
    let mut bytes = Vec::with_capacity(header.kind().len());
    match header {
        RecordHeader::Snapshot(header) => put_snapshot_header(&mut bytes, header)?,
        RecordHeader::Budget(header) => put_budget_header(&mut bytes, header)?,
        RecordHeader::BudgetWithBor(header) => {
            bytes.write_i32::<LittleEndian>(BUDGET_HEADER_LEN as i32)?;
            put_budget_header(&mut bytes, header)?;
            bytes.write_i32::<LittleEndian>(BUDGET_HEADER_LEN as i32)?;
        }
        RecordHeader::CompactTrailer(trailer) => put_trailer(&mut bytes, trailer)?,
    }
    out.write_all(&bytes)
}

pub fn write_payload<W: Write>(out: &mut W, values: &[f32]) -> io::Result<()> {
    out.write_all(&encode_f32s(values)?)
}

pub fn write_int_payload<W: Write>(out: &mut W, values: &[i32]) -> io::Result<()> {
    out.write_all(&encode_i32s(values)?)
}

/// Writes complete records in the simulator's layout, the inverse of
/// [`super::RecordReader`]. Used to build fixture files.
#[derive(Debug)]
pub struct RecordWriter<W> {
    out: W,
    framing: RecordFraming,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            framing: RecordFraming::Stream,
        }
    }

    pub fn with_framing(mut self, framing: RecordFraming) -> Self {
        self.framing = framing;
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn write_snapshot(&mut self, header: &SnapshotHeader, values: &[f32]) -> io::Result<()> {
        let mut bytes = Vec::with_capacity(HeaderKind::Snapshot.len());
        put_snapshot_header(&mut bytes, header)?;
        self.write_record(&bytes)?;
        self.write_record(&encode_f32s(values)?)
    }

    pub fn write_full_budget(&mut self, header: &BudgetHeader, values: &[f32]) -> io::Result<()> {
        self.write_budget_header(header)?;
        self.write_record(&encode_f32s(values)?)
    }

    /// Compact layer-indicator record: every cell of the indicator grid holds `layer`.
    pub fn write_compact_layer(
        &mut self,
        header: &BudgetHeader,
        total_time: f32,
        layer: i32,
        values: &[f32],
    ) -> io::Result<()> {
        let trailer = CompactTrailer {
            method: 3,
            delta_t: 1.0,
            partial_time: total_time,
            total_time,
        };
        let layer_grid = vec![layer; values.len()];
        self.write_compact_record(header, &trailer, Some(layer_grid.as_slice()), values)
    }

    pub fn write_compact_record(
        &mut self,
        header: &BudgetHeader,
        trailer: &CompactTrailer,
        layer_grid: Option<&[i32]>,
        values: &[f32],
    ) -> io::Result<()> {
        self.write_budget_header(header)?;
        let mut bytes = Vec::with_capacity(HeaderKind::CompactTrailer.len());
        put_trailer(&mut bytes, trailer)?;
        self.write_record(&bytes)?;
        if let Some(grid) = layer_grid {
            self.write_record(&encode_i32s(grid)?)?;
        }
        self.write_record(&encode_f32s(values)?)
    }

    fn write_budget_header(&mut self, header: &BudgetHeader) -> io::Result<()> {
        let mut bytes = Vec::with_capacity(HeaderKind::Budget.len());
        put_budget_header(&mut bytes, header)?;
        self.write_record(&bytes)
    }

    fn write_record(&mut self, body: &[u8]) -> io::Result<()> {
        match self.framing {
            RecordFraming::Stream => self.out.write_all(body),
            RecordFraming::Sequential => {
                self.out.write_i32::<LittleEndian>(body.len() as i32)?;
                self.out.write_all(body)?;
                self.out.write_i32::<LittleEndian>(body.len() as i32)
            }
        }
    }
}

fn put_snapshot_header<W: Write>(out: &mut W, header: &SnapshotHeader) -> io::Result<()> {
    out.write_i32::<LittleEndian>(header.time_step)?;
    out.write_i32::<LittleEndian>(header.stress_period)?;
    out.write_f32::<LittleEndian>(header.partial_time)?;
    out.write_f32::<LittleEndian>(header.total_time)?;
    out.write_all(header.term_name.as_bytes())?;
    out.write_i32::<LittleEndian>(header.cols)?;
    out.write_i32::<LittleEndian>(header.rows)?;
    out.write_i32::<LittleEndian>(header.layer)
}

fn put_budget_header<W: Write>(out: &mut W, header: &BudgetHeader) -> io::Result<()> {
    out.write_i32::<LittleEndian>(header.time_step)?;
    out.write_i32::<LittleEndian>(header.stress_period)?;
    out.write_all(header.term_name.as_bytes())?;
    out.write_i32::<LittleEndian>(header.cols)?;
    out.write_i32::<LittleEndian>(header.rows)?;
    out.write_i32::<LittleEndian>(header.layer_flag)
}

fn put_trailer<W: Write>(out: &mut W, trailer: &CompactTrailer) -> io::Result<()> {
    out.write_i32::<LittleEndian>(trailer.method)?;
    out.write_f32::<LittleEndian>(trailer.delta_t)?;
    out.write_f32::<LittleEndian>(trailer.partial_time)?;
    out.write_f32::<LittleEndian>(trailer.total_time)
}

fn encode_f32s(values: &[f32]) -> io::Result<Vec<u8>> {
    let mut bytes = Vec::with_capacity(values.len() * VALUE_LEN);
    for value in values {
        bytes.write_f32::<LittleEndian>(*value)?;
    }
    Ok(bytes)
}

fn encode_i32s(values: &[i32]) -> io::Result<Vec<u8>> {
    let mut bytes = Vec::with_capacity(values.len() * VALUE_LEN);
    for value in values {
        bytes.write_i32::<LittleEndian>(*value)?;
    }
    Ok(bytes)
}
