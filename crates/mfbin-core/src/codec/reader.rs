use super::{
    BUDGET_HEADER_LEN, BudgetHeader, BudgetPayload, CompactLayer, CompactMethod, CompactTrailer,
    DenseVolume, HeaderKind, MARKER_LEN, RecordFraming, RecordHeader, SnapshotHeader,
    TERM_NAME_LEN, TermName, VALUE_LEN, compact_layer_cell,
};
use crate::domain::{DecodeError, DecodeResult, GridGeometry};
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use std::io::{Read, Seek, SeekFrom};

/// Reads one header of the given shape at the current stream position.
pub fn read_header<R: Read + Seek>(stream: &mut R, kind: HeaderKind) -> DecodeResult<RecordHeader> {
    let offset = stream_position(stream)?;
    let bytes = read_bytes(stream, kind.len(), offset)?;
    decode_header(&bytes, kind, offset)
}

/// Reads `count` little-endian `f32` values.
pub fn read_payload<R: Read + Seek>(stream: &mut R, count: usize) -> DecodeResult<Vec<f32>> {
    let offset = stream_position(stream)?;
    let bytes = read_bytes(stream, count * VALUE_LEN, offset)?;
    Ok(decode_f32s(&bytes))
}

/// Reads `count` little-endian `i32` values.
pub fn read_int_payload<R: Read + Seek>(stream: &mut R, count: usize) -> DecodeResult<Vec<i32>> {
    let offset = stream_position(stream)?;
    let bytes = read_bytes(stream, count * VALUE_LEN, offset)?;
    Ok(decode_i32s(&bytes))
}

/// Sequential little-endian field reader over one header's bytes.
struct HeaderFields<'a> {
    bytes: &'a [u8],
    offset: u64,
}

impl<'a> HeaderFields<'a> {
    fn new(bytes: &'a [u8], offset: u64) -> Self {
        Self { bytes, offset }
    }

    fn i32(&mut self) -> DecodeResult<i32> {
        let offset = self.offset;
        self.bytes
            .read_i32::<LittleEndian>()
            .map_err(|source| DecodeError::io(format!("short header field at byte {offset}"), source))
    }

    fn f32(&mut self) -> DecodeResult<f32> {
        let offset = self.offset;
        self.bytes
            .read_f32::<LittleEndian>()
            .map_err(|source| DecodeError::io(format!("short header field at byte {offset}"), source))
    }

    fn term(&mut self) -> DecodeResult<TermName> {
        let offset = self.offset;
        let mut name = [b' '; TERM_NAME_LEN];
        self.bytes
            .read_exact(&mut name)
            .map_err(|source| DecodeError::io(format!("short term name at byte {offset}"), source))?;
        Ok(TermName::from_bytes(name))
    }

    fn budget_header(&mut self) -> DecodeResult<BudgetHeader> {
        Ok(BudgetHeader {
            time_step: self.i32()?,
            stress_period: self.i32()?,
            term_name: self.term()?,
            cols: self.i32()?,
            rows: self.i32()?,
            layer_flag: self.i32()?,
        })
    }
}

pub(crate) fn decode_header(bytes: &[u8], kind: HeaderKind, offset: u64) -> DecodeResult<RecordHeader> {
    let mut fields = HeaderFields::new(bytes, offset);
    match kind {
        HeaderKind::Snapshot => {
            let header = SnapshotHeader {
                time_step: fields.i32()?,
                stress_period: fields.i32()?,
                partial_time: fields.f32()?,
                total_time: fields.f32()?,
                term_name: fields.term()?,
                cols: fields.i32()?,
                rows: fields.i32()?,
                layer: fields.i32()?,
            };
            if header.term_name.identifier().is_none() {
                return Err(DecodeError::unsupported(
                    offset,
                    "snapshot term name is not ASCII text",
                ));
            }
            if header.cols <= 0 || header.rows <= 0 {
                return Err(DecodeError::unsupported(
                    offset,
                    format!("snapshot grid of {}x{} has no cells", header.rows, header.cols),
                ));
            }
            Ok(RecordHeader::Snapshot(header))
        }
        HeaderKind::Budget => {
            let header = fields.budget_header()?;
            validate_budget_header(header, offset).map(RecordHeader::Budget)
        }
        HeaderKind::BudgetWithBor => {
            let leading = fields.i32()?;
            let header = fields.budget_header()?;
            let trailing = fields.i32()?;
            if leading != BUDGET_HEADER_LEN as i32 || trailing != BUDGET_HEADER_LEN as i32 {
                return Err(DecodeError::unsupported(
                    offset,
                    format!(
                        "budget header markers {leading}/{trailing} do not bracket a {BUDGET_HEADER_LEN}-byte record"
                    ),
                ));
            }
            validate_budget_header(header, offset).map(RecordHeader::BudgetWithBor)
        }
        HeaderKind::CompactTrailer => Ok(RecordHeader::CompactTrailer(CompactTrailer {
            method: fields.i32()?,
            delta_t: fields.f32()?,
            partial_time: fields.f32()?,
            total_time: fields.f32()?,
        })),
    }
}

fn validate_budget_header(header: BudgetHeader, offset: u64) -> DecodeResult<BudgetHeader> {
    if header.term_name.identifier().is_none() {
        return Err(DecodeError::unsupported(
            offset,
            "budget term name is not ASCII text",
        ));
    }
    if header.layer_flag == 0 {
        return Err(DecodeError::unsupported(offset, "budget layer flag is zero"));
    }
    if header.cols <= 0 || header.rows <= 0 {
        return Err(DecodeError::unsupported(
            offset,
            format!("budget grid of {}x{} has no cells", header.rows, header.cols),
        ));
    }
    Ok(header)
}

fn decode_f32s(bytes: &[u8]) -> Vec<f32> {
    let mut values = vec![0.0_f32; bytes.len() / VALUE_LEN];
    LittleEndian::read_f32_into(&bytes[..values.len() * VALUE_LEN], &mut values);
    values
}

fn decode_i32s(bytes: &[u8]) -> Vec<i32> {
    let mut values = vec![0_i32; bytes.len() / VALUE_LEN];
    LittleEndian::read_i32_into(&bytes[..values.len() * VALUE_LEN], &mut values);
    values
}

fn stream_position<R: Seek>(stream: &mut R) -> DecodeResult<u64> {
    stream
        .stream_position()
        .map_err(|source| DecodeError::io("failed to query stream position", source))
}

/// Reads exactly `len` bytes, reporting how many existed when the stream ends early.
fn read_bytes<R: Read>(stream: &mut R, len: usize, offset: u64) -> DecodeResult<Vec<u8>> {
    let mut buffer = Vec::with_capacity(len);
    stream
        .by_ref()
        .take(len as u64)
        .read_to_end(&mut buffer)
        .map_err(|source| {
            DecodeError::io(format!("failed to read record at byte {offset}"), source)
        })?;
    if buffer.len() < len {
        return Err(DecodeError::UnexpectedEof {
            offset,
            expected: len,
            found: buffer.len(),
        });
    }
    Ok(buffer)
}

/// Positioned record reader over one binary output file.
///
/// Tracks its own byte position and the stream length so payloads can be
/// skipped by seeking without losing truncation checks.
#[derive(Debug)]
pub struct RecordReader<R> {
    inner: R,
    framing: RecordFraming,
    position: u64,
    len: u64,
}

impl<R: Read + Seek> RecordReader<R> {
    pub fn new(mut inner: R) -> DecodeResult<Self> {
        let len = inner
            .seek(SeekFrom::End(0))
            .map_err(|source| DecodeError::io("failed to measure record stream", source))?;
        inner
            .seek(SeekFrom::Start(0))
            .map_err(|source| DecodeError::io("failed to rewind record stream", source))?;
        Ok(Self {
            inner,
            framing: RecordFraming::Stream,
            position: 0,
            len,
        })
    }

    pub fn with_framing(mut self, framing: RecordFraming) -> Self {
        self.framing = framing;
        self
    }

    /// Inspects the file prefix and switches to the framing it uses.
    pub fn detect_framing(&mut self) -> DecodeResult<RecordFraming> {
        let start = self.position;
        self.seek_to(0)?;
        let available = self.len.min(super::BUDGET_HEADER_BOR_LEN as u64) as usize;
        let prefix = read_bytes(&mut self.inner, available, 0)?;
        self.framing = RecordFraming::detect(&prefix);
        self.seek_to(start)?;
        Ok(self.framing)
    }

    pub const fn framing(&self) -> RecordFraming {
        self.framing
    }

    pub const fn position(&self) -> u64 {
        self.position
    }

    pub const fn len(&self) -> u64 {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub const fn is_at_end(&self) -> bool {
        self.position >= self.len
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    pub fn seek_to(&mut self, offset: u64) -> DecodeResult<()> {
        self.inner
            .seek(SeekFrom::Start(offset))
            .map_err(|source| DecodeError::io(format!("failed to seek to byte {offset}"), source))?;
        self.position = offset;
        Ok(())
    }

    /// Next head/concentration header, or `None` at the clean end of the stream.
    pub fn next_snapshot_header(&mut self) -> DecodeResult<Option<SnapshotHeader>> {
        if self.is_at_end() {
            return Ok(None);
        }
        match self.read_framed_header(HeaderKind::Snapshot)? {
            RecordHeader::Snapshot(header) => Ok(Some(header)),
            other => Err(self.unexpected_header(other)),
        }
    }

    pub fn peek_snapshot_header(&mut self) -> DecodeResult<Option<SnapshotHeader>> {
        let start = self.position;
        let header = self.next_snapshot_header();
        self.seek_to(start)?;
        header
    }

    /// Next budget header, or `None` at the clean end of the stream.
    pub fn next_budget_header(&mut self) -> DecodeResult<Option<BudgetHeader>> {
        if self.is_at_end() {
            return Ok(None);
        }
        let offset = self.position;
        let kind = self.framing.budget_header_kind();
        let bytes = read_bytes(&mut self.inner, kind.len(), offset)?;
        self.position += kind.len() as u64;
        match decode_header(&bytes, kind, offset)? {
            RecordHeader::Budget(header) | RecordHeader::BudgetWithBor(header) => Ok(Some(header)),
            other => Err(self.unexpected_header(other)),
        }
    }

    pub fn peek_budget_header(&mut self) -> DecodeResult<Option<BudgetHeader>> {
        let start = self.position;
        let header = self.next_budget_header();
        self.seek_to(start)?;
        header
    }

    pub fn read_compact_trailer(&mut self) -> DecodeResult<CompactTrailer> {
        match self.read_framed_header(HeaderKind::CompactTrailer)? {
            RecordHeader::CompactTrailer(trailer) => Ok(trailer),
            other => Err(self.unexpected_header(other)),
        }
    }

    pub fn read_values(&mut self, count: usize) -> DecodeResult<Vec<f32>> {
        let bytes = self.read_record(count * VALUE_LEN)?;
        Ok(decode_f32s(&bytes))
    }

    pub fn read_ints(&mut self, count: usize) -> DecodeResult<Vec<i32>> {
        let bytes = self.read_record(count * VALUE_LEN)?;
        Ok(decode_i32s(&bytes))
    }

    /// Skips a record of `count` values without reading it.
    pub fn skip_values(&mut self, count: usize) -> DecodeResult<()> {
        let record_len = (count * VALUE_LEN) as u64 + self.framing.overhead();
        let available = self.len.saturating_sub(self.position);
        if record_len > available {
            return Err(DecodeError::UnexpectedEof {
                offset: self.position,
                expected: record_len as usize,
                found: available as usize,
            });
        }
        self.seek_to(self.position + record_len)
    }

    /// Decodes the payload that follows `header`, choosing the compact or full layout once.
    pub fn read_budget_payload(
        &mut self,
        header: &BudgetHeader,
        geometry: &GridGeometry,
    ) -> DecodeResult<BudgetPayload> {
        let cells = self.check_budget_shape(header, geometry)?;
        let layers = header.layer_count() as usize;
        if !header.is_compact() {
            let values = self.read_values(layers * cells)?;
            return Ok(BudgetPayload::Full(DenseVolume {
                trailer: None,
                layers,
                cells_per_layer: cells,
                values,
            }));
        }

        let trailer_offset = self.position;
        let trailer = self.read_compact_trailer()?;
        match CompactMethod::from_code(trailer.method, trailer_offset)? {
            CompactMethod::Volume => {
                let values = self.read_values(layers * cells)?;
                Ok(BudgetPayload::Full(DenseVolume {
                    trailer: Some(trailer),
                    layers,
                    cells_per_layer: cells,
                    values,
                }))
            }
            CompactMethod::LayerIndicator => {
                let grid_offset = self.position;
                let layer_grid = self.read_ints(cells)?;
                let cell = compact_layer_cell(geometry.rows as usize, geometry.cols as usize);
                let layer = layer_grid.get(cell).copied().unwrap_or_default();
                if layer < 1 || layer > layers as i32 {
                    return Err(DecodeError::unsupported(
                        grid_offset,
                        format!("compact layer indicator {layer} is outside 1..={layers}"),
                    ));
                }
                let values = self.read_values(cells)?;
                Ok(BudgetPayload::Compact(CompactLayer {
                    trailer,
                    layer,
                    layer_grid: Some(layer_grid),
                    values,
                }))
            }
            CompactMethod::TopLayer => {
                let values = self.read_values(cells)?;
                Ok(BudgetPayload::Compact(CompactLayer {
                    trailer,
                    layer: 1,
                    layer_grid: None,
                    values,
                }))
            }
        }
    }

    /// Skips the payload that follows `header`; compact trailers are still read
    /// because they decide the payload size.
    pub fn skip_budget_payload(
        &mut self,
        header: &BudgetHeader,
        geometry: &GridGeometry,
    ) -> DecodeResult<()> {
        let cells = self.check_budget_shape(header, geometry)?;
        let layers = header.layer_count() as usize;
        if !header.is_compact() {
            return self.skip_values(layers * cells);
        }

        let trailer_offset = self.position;
        let trailer = self.read_compact_trailer()?;
        match CompactMethod::from_code(trailer.method, trailer_offset)? {
            CompactMethod::Volume => self.skip_values(layers * cells),
            CompactMethod::LayerIndicator => {
                self.skip_values(cells)?;
                self.skip_values(cells)
            }
            CompactMethod::TopLayer => self.skip_values(cells),
        }
    }

    fn check_budget_shape(&self, header: &BudgetHeader, geometry: &GridGeometry) -> DecodeResult<usize> {
        if header.rows as u32 != geometry.rows || header.cols as u32 != geometry.cols {
            return Err(DecodeError::unsupported(
                self.position,
                format!(
                    "budget record grid {}x{} does not match model grid {}x{}",
                    header.rows, header.cols, geometry.rows, geometry.cols
                ),
            ));
        }
        if header.layer_count() != geometry.layers {
            return Err(DecodeError::unsupported(
                self.position,
                format!(
                    "budget record declares {} layers, model has {}",
                    header.layer_count(),
                    geometry.layers
                ),
            ));
        }
        Ok(geometry.cells_per_layer())
    }

    fn read_framed_header(&mut self, kind: HeaderKind) -> DecodeResult<RecordHeader> {
        let offset = self.position;
        let bytes = self.read_record(kind.len())?;
        decode_header(&bytes, kind, offset)
    }

    fn read_record(&mut self, body_len: usize) -> DecodeResult<Vec<u8>> {
        if self.framing == RecordFraming::Sequential {
            self.read_marker(body_len)?;
        }
        let offset = self.position;
        let body = read_bytes(&mut self.inner, body_len, offset)?;
        self.position += body_len as u64;
        if self.framing == RecordFraming::Sequential {
            self.read_marker(body_len)?;
        }
        Ok(body)
    }

    fn read_marker(&mut self, body_len: usize) -> DecodeResult<()> {
        let offset = self.position;
        let marker = read_bytes(&mut self.inner, MARKER_LEN, offset)?;
        self.position += MARKER_LEN as u64;
        let declared = LittleEndian::read_i32(&marker);
        if declared as i64 != body_len as i64 {
            return Err(DecodeError::unsupported(
                offset,
                format!("record marker declares {declared} bytes, expected {body_len}"),
            ));
        }
        Ok(())
    }

    fn unexpected_header(&self, header: RecordHeader) -> DecodeError {
        DecodeError::unsupported(
            self.position,
            format!("unexpected {:?} header", header.kind()),
        )
    }
}
