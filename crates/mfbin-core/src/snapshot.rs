//! Head and concentration snapshot decoding.

use crate::codec::{RecordReader, SnapshotHeader};
use crate::domain::{
    CancellationToken, DecodeError, DecodeResult, DecodedSlice, Grid2D, GridGeometry, ScanOutcome,
    ScanReport,
};
use crate::seek::{snapshot_period_stride, snapshot_seek_offset};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use tracing::{debug, info, warn};

pub const NAN_SENTINEL: f32 = -998.0;
pub const NOISE_FLOOR: f32 = -999.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    /// Records keyed by stress period number.
    Head,
    /// Records keyed by elapsed simulation time.
    Concentration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRequest {
    pub kind: SnapshotKind,
    pub layers: BTreeSet<i32>,
    /// Stress periods (heads) or integral elapsed times (concentration).
    /// `None` matches every record.
    pub periods: Option<BTreeSet<i32>>,
}

impl SnapshotRequest {
    /// Empty selections widen to every layer. An empty head period selection
    /// becomes every stress period of `geometry`; an empty concentration
    /// selection matches every record, since its keys are elapsed times.
    pub fn new(
        kind: SnapshotKind,
        geometry: &GridGeometry,
        layers: BTreeSet<i32>,
        periods: BTreeSet<i32>,
    ) -> Self {
        let periods = if !periods.is_empty() {
            Some(periods)
        } else if kind == SnapshotKind::Head {
            Some(geometry.all_periods())
        } else {
            None
        };
        Self {
            kind,
            layers: if layers.is_empty() {
                geometry.all_layers()
            } else {
                layers
            },
            periods,
        }
    }
}

/// Scan state between records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Scanning,
    MatchFound,
    Done(ScanOutcome),
}

/// Replaces inactive-cell markers with the fixed sentinels.
pub fn apply_sentinels(values: &mut [f32]) {
    for value in values {
        if value.is_nan() {
            *value = NAN_SENTINEL;
        } else if *value < NOISE_FLOOR {
            *value = NOISE_FLOOR;
        }
    }
}

/// Downstream identifier of a decoded snapshot slice.
pub fn slice_label(kind: SnapshotKind, slice: &DecodedSlice) -> String {
    match kind {
        SnapshotKind::Head => format!("HEAD_{:05}_{}", slice.stress_period, slice.layer),
        SnapshotKind::Concentration if slice.total_time.fract() == 0.0 && slice.total_time >= 1.0 => {
            format!("CONC_{:05}_{}", slice.total_time as i64, slice.layer)
        }
        SnapshotKind::Concentration => format!("CONC{:.7}_{}", slice.total_time, slice.layer),
    }
}

pub struct SnapshotDecoder<R> {
    reader: RecordReader<R>,
    geometry: GridGeometry,
    request: SnapshotRequest,
    stride: u64,
    seeking: bool,
    last_period: i32,
}

impl SnapshotDecoder<BufReader<File>> {
    pub fn open(path: &Path, geometry: GridGeometry, request: SnapshotRequest) -> DecodeResult<Self> {
        let file = File::open(path).map_err(|source| {
            DecodeError::io(format!("failed to open '{}'", path.display()), source)
        })?;
        Self::new(RecordReader::new(BufReader::new(file))?, geometry, request)
    }
}

impl<R: Read + Seek> SnapshotDecoder<R> {
    pub fn new(
        reader: RecordReader<R>,
        geometry: GridGeometry,
        request: SnapshotRequest,
    ) -> DecodeResult<Self> {
        if request.layers.iter().any(|layer| *layer < 1 || *layer as u32 > geometry.layers) {
            return Err(DecodeError::invalid_argument(format!(
                "requested layers must lie in 1..={}",
                geometry.layers
            )));
        }
        let stride = snapshot_period_stride(&geometry, reader.framing().overhead());
        Ok(Self {
            seeking: request.kind == SnapshotKind::Head && request.periods.is_some(),
            reader,
            geometry,
            request,
            stride,
            last_period: 0,
        })
    }

    /// Decodes every requested slice, handing each to `sink` as soon as it is complete.
    pub fn decode<F>(&mut self, cancel: &CancellationToken, mut sink: F) -> DecodeResult<ScanReport>
    where
        F: FnMut(DecodedSlice),
    {
        let mut report = ScanReport::new();
        let max_key = match &self.request.periods {
            Some(periods) => match periods.last() {
                Some(last) => Some(*last),
                None => {
                    report.outcome = ScanOutcome::PastMaxPeriod;
                    return Ok(report);
                }
            },
            None => None,
        };

        let mut state = ScanState::Scanning;
        while let ScanState::Scanning | ScanState::MatchFound = state {
            if cancel.is_cancelled() {
                state = ScanState::Done(ScanOutcome::Cancelled);
                continue;
            }
            self.seek_ahead(&mut report)?;

            let Some(header) = self.reader.next_snapshot_header()? else {
                state = ScanState::Done(ScanOutcome::EndOfStream);
                continue;
            };
            report.records_scanned += 1;
            self.last_period = header.stress_period;
            self.check_shape(&header)?;

            if self.past_max(&header, max_key) {
                state = ScanState::Done(ScanOutcome::PastMaxPeriod);
                continue;
            }

            let cells = self.geometry.cells_per_layer();
            if self.matches(&header) {
                let mut values = self.reader.read_values(cells)?;
                apply_sentinels(&mut values);
                let grid = Grid2D::from_vec(
                    self.geometry.rows as usize,
                    self.geometry.cols as usize,
                    values,
                )?;
                sink(DecodedSlice {
                    term: header.term_name.identifier().unwrap_or_default(),
                    stress_period: header.stress_period,
                    time_step: header.time_step,
                    layer: header.layer,
                    total_time: f64::from(header.total_time),
                    values: grid,
                });
                report.slices_emitted += 1;
                state = ScanState::MatchFound;
            } else {
                self.reader.skip_values(cells)?;
                state = ScanState::Scanning;
            }
        }

        if let ScanState::Done(outcome) = state {
            report.outcome = outcome;
        }
        info!(
            outcome = ?report.outcome,
            slices = report.slices_emitted,
            records = report.records_scanned,
            seeks = report.seeks,
            "snapshot pass finished"
        );
        Ok(report)
    }

    /// Collects every requested slice in file order.
    pub fn collect(&mut self, cancel: &CancellationToken) -> DecodeResult<(Vec<DecodedSlice>, ScanReport)> {
        let mut slices = Vec::new();
        let report = self.decode(cancel, |slice| slices.push(slice))?;
        Ok((slices, report))
    }

    pub fn into_reader(self) -> RecordReader<R> {
        self.reader
    }

    /// Jumps to the next wanted head period when it starts ahead of the reader.
    fn seek_ahead(&mut self, report: &mut ScanReport) -> DecodeResult<()> {
        if !self.seeking {
            return Ok(());
        }
        let Some(target) = self
            .request
            .periods
            .as_ref()
            .and_then(|periods| periods.range(self.last_period.max(1)..).next().copied())
        else {
            return Ok(());
        };
        let position = self.reader.position();
        let Some(offset) = snapshot_seek_offset(position, target, self.stride) else {
            return Ok(());
        };

        let landing = if offset < self.reader.len() {
            self.reader.seek_to(offset)?;
            self.reader.peek_snapshot_header().ok().flatten()
        } else {
            None
        };
        match landing {
            Some(header) if lands_before_or_opens(&header, target) => {
                debug!(period = target, offset, "seeked to head period");
                report.seeks += 1;
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
                    restored = position,
                    "{inconsistency}; scanning sequentially"
                );
                self.reader.seek_to(position)?;
                self.seeking = false;
                report.seek_fallbacks += 1;
            }
        }
        Ok(())
    }

    fn check_shape(&self, header: &SnapshotHeader) -> DecodeResult<()> {
        if header.rows as u32 != self.geometry.rows || header.cols as u32 != self.geometry.cols {
            return Err(DecodeError::unsupported(
                self.reader.position(),
                format!(
                    "snapshot grid {}x{} does not match model grid {}x{}",
                    header.rows, header.cols, self.geometry.rows, self.geometry.cols
                ),
            ));
        }
        Ok(())
    }

    fn past_max(&self, header: &SnapshotHeader, max_key: Option<i32>) -> bool {
        let Some(max_key) = max_key else {
            return false;
        };
        match self.request.kind {
            SnapshotKind::Head => header.stress_period > max_key,
            SnapshotKind::Concentration => f64::from(header.total_time) > f64::from(max_key),
        }
    }

    fn matches(&self, header: &SnapshotHeader) -> bool {
        if !self.request.layers.contains(&header.layer) {
            return false;
        }
        let Some(periods) = &self.request.periods else {
            return true;
        };
        match self.request.kind {
            SnapshotKind::Head => periods.contains(&header.stress_period),
            SnapshotKind::Concentration => {
                let time = header.total_time;
                time.fract() == 0.0 && periods.contains(&(time as i32))
            }
        }
    }
}

/// A seek landing is usable when it sits in an earlier period or on the first
/// record of the target; anywhere later in the target would skip its first layers.
fn lands_before_or_opens(header: &SnapshotHeader, target: i32) -> bool {
    header.stress_period < target
        || (header.stress_period == target && header.layer == 1 && header.time_step <= 1)
}

#[cfg(test)]
mod tests {
    use super::{SnapshotDecoder, SnapshotKind, SnapshotRequest, apply_sentinels, slice_label};
    use crate::codec::{RecordReader, RecordWriter, SnapshotHeader, TermName};
    use crate::domain::{CancellationToken, DecodeError, GridGeometry, ScanOutcome};
    use std::collections::BTreeSet;
    use std::io::Cursor;

    fn geometry() -> GridGeometry {
        GridGeometry::new(2, 2, 2, 4).expect("geometry should build")
    }

    fn header(term: &str, period: i32, layer: i32, total_time: f32) -> SnapshotHeader {
        SnapshotHeader {
            time_step: 1,
            stress_period: period,
            partial_time: 1.0,
            total_time,
            term_name: TermName::new(term).expect("term should build"),
            cols: 2,
            rows: 2,
            layer,
        }
    }

    fn head_file(periods: i32) -> Vec<u8> {
        let mut writer = RecordWriter::new(Vec::new());
        for period in 1..=periods {
            for layer in 1..=2 {
                let value = (period * 10 + layer) as f32;
                writer
                    .write_snapshot(&header("HEAD", period, layer, period as f32), &[value; 4])
                    .expect("record should write");
            }
        }
        writer.into_inner()
    }

    fn set(values: &[i32]) -> BTreeSet<i32> {
        values.iter().copied().collect()
    }

    fn decoder(bytes: Vec<u8>, request: SnapshotRequest) -> SnapshotDecoder<Cursor<Vec<u8>>> {
        let reader = RecordReader::new(Cursor::new(bytes)).expect("reader");
        SnapshotDecoder::new(reader, geometry(), request).expect("decoder")
    }

    #[test]
    fn sentinels_replace_nan_and_noise() {
        let mut values = [f32::NAN, -1.0e30, -999.0, 12.5, -998.5];
        apply_sentinels(&mut values);
        assert_eq!(values, [-998.0, -999.0, -999.0, 12.5, -998.5]);
    }

    #[test]
    fn heads_seek_to_requested_periods() {
        let request = SnapshotRequest::new(SnapshotKind::Head, &geometry(), set(&[2]), set(&[3, 4]));
        let mut decoder = decoder(head_file(4), request);
        let (slices, report) = decoder.collect(&CancellationToken::new()).expect("decode");

        let found: Vec<(i32, i32)> = slices
            .iter()
            .map(|slice| (slice.stress_period, slice.layer))
            .collect();
        assert_eq!(found, vec![(3, 2), (4, 2)]);
        assert_eq!(slices[0].values.values(), &[32.0; 4]);
        assert_eq!(report.seeks, 1);
        assert_eq!(report.seek_fallbacks, 0);
        assert_eq!(report.outcome, ScanOutcome::EndOfStream);
        assert!(report.records_scanned < 8);
    }

    #[test]
    fn scan_stops_past_the_last_requested_period() {
        let request = SnapshotRequest::new(SnapshotKind::Head, &geometry(), set(&[]), set(&[1]));
        let mut decoder = decoder(head_file(4), request);
        let (slices, report) = decoder.collect(&CancellationToken::new()).expect("decode");
        assert_eq!(slices.len(), 2);
        assert_eq!(report.outcome, ScanOutcome::PastMaxPeriod);
        assert_eq!(report.records_scanned, 3);
    }

    #[test]
    fn irregular_head_file_falls_back_to_sequential_scan() {
        // Two time steps per period break the one-step stride.
        let mut writer = RecordWriter::new(Vec::new());
        for period in 1..=3 {
            for step in 1..=2 {
                for layer in 1..=2 {
                    let mut record = header("HEAD", period, layer, period as f32);
                    record.time_step = step;
                    writer
                        .write_snapshot(&record, &[step as f32; 4])
                        .expect("record");
                }
            }
        }
        let request = SnapshotRequest::new(SnapshotKind::Head, &geometry(), set(&[1]), set(&[3]));
        let mut decoder = decoder(writer.into_inner(), request);
        let (slices, report) = decoder.collect(&CancellationToken::new()).expect("decode");

        let steps: Vec<(i32, i32)> = slices
            .iter()
            .map(|slice| (slice.stress_period, slice.time_step))
            .collect();
        assert_eq!(steps, vec![(3, 1), (3, 2)]);
        assert_eq!(report.seeks + report.seek_fallbacks, 1);
    }

    #[test]
    fn concentration_matches_on_total_time() {
        let mut writer = RecordWriter::new(Vec::new());
        for (period, time) in [(1, 10.0_f32), (1, 20.0), (2, 30.0)] {
            for layer in 1..=2 {
                writer
                    .write_snapshot(&header("CONCENTRATION", period, layer, time), &[time; 4])
                    .expect("record");
            }
        }
        let request = SnapshotRequest::new(
            SnapshotKind::Concentration,
            &geometry(),
            set(&[1]),
            set(&[20, 30]),
        );
        let mut decoder = decoder(writer.into_inner(), request);
        let (slices, report) = decoder.collect(&CancellationToken::new()).expect("decode");

        let times: Vec<f64> = slices.iter().map(|slice| slice.total_time).collect();
        assert_eq!(times, vec![20.0, 30.0]);
        assert_eq!(slice_label(SnapshotKind::Concentration, &slices[0]), "CONC_00020_1");
        assert_eq!(report.seeks, 0);
    }

    #[test]
    fn concentration_without_time_selection_emits_every_record() {
        let mut writer = RecordWriter::new(Vec::new());
        for (period, time) in [(1, 10.0_f32), (2, 20.0), (3, 30.0)] {
            for layer in 1..=2 {
                writer
                    .write_snapshot(&header("CONCENTRATION", period, layer, time), &[time; 4])
                    .expect("record");
            }
        }
        let request = SnapshotRequest::new(SnapshotKind::Concentration, &geometry(), set(&[]), set(&[]));
        assert_eq!(request.periods, None);
        let (slices, report) = decoder(writer.into_inner(), request)
            .collect(&CancellationToken::new())
            .expect("decode");

        assert_eq!(slices.len(), 6);
        let times: BTreeSet<i32> = slices.iter().map(|slice| slice.total_time as i32).collect();
        assert_eq!(times, set(&[10, 20, 30]));
        assert_eq!(report.outcome, ScanOutcome::EndOfStream);
    }

    #[test]
    fn head_seek_landing_inside_the_target_period_falls_back() {
        // Period 1 saved only layer 1, so the stride overshoots by one record
        // and lands on layer 2 of period 3.
        let mut writer = RecordWriter::new(Vec::new());
        writer
            .write_snapshot(&header("HEAD", 1, 1, 1.0), &[11.0; 4])
            .expect("record");
        for period in 2..=4 {
            for layer in 1..=2 {
                let value = (period * 10 + layer) as f32;
                writer
                    .write_snapshot(&header("HEAD", period, layer, period as f32), &[value; 4])
                    .expect("record");
            }
        }
        let request = SnapshotRequest::new(SnapshotKind::Head, &geometry(), set(&[]), set(&[3]));
        let (slices, report) = decoder(writer.into_inner(), request)
            .collect(&CancellationToken::new())
            .expect("decode");

        let found: Vec<(i32, i32)> = slices
            .iter()
            .map(|slice| (slice.stress_period, slice.layer))
            .collect();
        assert_eq!(found, vec![(3, 1), (3, 2)]);
        assert_eq!(slices[0].values.values(), &[31.0; 4]);
        assert_eq!(report.seeks, 0);
        assert_eq!(report.seek_fallbacks, 1);
        assert_eq!(report.outcome, ScanOutcome::PastMaxPeriod);
    }

    #[test]
    fn labels_follow_kind() {
        let request = SnapshotRequest::new(SnapshotKind::Head, &geometry(), set(&[1]), set(&[2]));
        let (mut slices, _) = decoder(head_file(2), request)
            .collect(&CancellationToken::new())
            .expect("decode");
        assert_eq!(slice_label(SnapshotKind::Head, &slices[0]), "HEAD_00002_1");

        slices[0].total_time = 0.5;
        assert_eq!(
            slice_label(SnapshotKind::Concentration, &slices[0]),
            "CONC0.5000000_1"
        );
    }

    #[test]
    fn cancelled_pass_emits_nothing() {
        let request = SnapshotRequest::new(SnapshotKind::Head, &geometry(), set(&[]), set(&[]));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (slices, report) = decoder(head_file(2), request).collect(&cancel).expect("decode");
        assert!(slices.is_empty());
        assert_eq!(report.outcome, ScanOutcome::Cancelled);
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let mut bytes = head_file(1);
        bytes.truncate(bytes.len() - 3);
        let request = SnapshotRequest::new(SnapshotKind::Head, &geometry(), set(&[2]), set(&[1]));
        let error = decoder(bytes, request)
            .collect(&CancellationToken::new())
            .expect_err("truncated file");
        assert!(matches!(error, DecodeError::UnexpectedEof { .. }));
    }

    #[test]
    fn out_of_range_layers_are_rejected() {
        let request = SnapshotRequest::new(SnapshotKind::Head, &geometry(), set(&[3]), set(&[1]));
        let reader = RecordReader::new(Cursor::new(head_file(1))).expect("reader");
        assert!(matches!(
            SnapshotDecoder::new(reader, geometry(), request),
            Err(DecodeError::InvalidArgument { .. })
        ));
    }
}
