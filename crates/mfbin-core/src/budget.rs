//! Cell-by-cell budget decoding.
//!
//! Requested periods are visited in ascending order. Each one is located
//! through the [`SeekEngine`], then read until the declared period changes.
//! Periods the output-control index does not know are collected on the report
//! instead of aborting the pass.

use crate::codec::{BudgetPayload, RecordReader};
use crate::domain::{
    CancellationToken, DecodeError, DecodeResult, DecodedSlice, Grid2D, GridGeometry, ScanOutcome,
    ScanReport,
};
use crate::seek::{BudgetCatalog, PeriodIndex, SeekEngine};
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

pub const FLOW_RIGHT_FACE: &str = "FLOW_RIGHT_FACE";
pub const FLOW_FRONT_FACE: &str = "FLOW_FRONT_FACE";
pub const FLOW_LOWER_FACE: &str = "FLOW_LOWER_FACE";
pub const WELLS: &str = "WELLS";

const MGD_PER_CFD: f64 = 7.480519 / 1.0e6;
const INCHES_PER_FOOT: f64 = 12.0;
const DAYS_PER_YEAR: f64 = 365.0;
const DAYS_PER_MONTH: f64 = 30.4;

/// Named groups of budget terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AliasGroup {
    /// Horizontal face flows, the inputs of the vector compiler.
    RightFront,
    /// Every face flow.
    Face,
    Well,
}

impl AliasGroup {
    pub const fn terms(self) -> &'static [&'static str] {
        match self {
            Self::RightFront => &[FLOW_RIGHT_FACE, FLOW_FRONT_FACE],
            Self::Face => &[FLOW_RIGHT_FACE, FLOW_FRONT_FACE, FLOW_LOWER_FACE],
            Self::Well => &[WELLS],
        }
    }

    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword.trim().to_ascii_uppercase().as_str() {
            "RIGHT|FRONT" => Some(Self::RightFront),
            "FACE" => Some(Self::Face),
            "WELL" => Some(Self::Well),
            _ => None,
        }
    }
}

/// Which budget terms a pass emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TermFilter {
    All,
    Named(BTreeSet<String>),
    Alias(AliasGroup),
}

impl TermFilter {
    /// Parses `ALL`, an alias keyword, or a comma-separated term list.
    ///
    /// Term names are normalized the way record headers are: upper case, with
    /// inner spaces folded to underscores.
    pub fn parse(text: &str) -> DecodeResult<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("ALL") {
            return Ok(Self::All);
        }
        if let Some(group) = AliasGroup::from_keyword(trimmed) {
            return Ok(Self::Alias(group));
        }

        let mut names = BTreeSet::new();
        for token in trimmed.split(',') {
            let name = token.trim();
            if name.is_empty() {
                return Err(DecodeError::invalid_argument(format!(
                    "empty term name in '{trimmed}'"
                )));
            }
            names.insert(name.to_ascii_uppercase().replace(' ', "_"));
        }
        Ok(Self::Named(names))
    }

    pub fn matches(&self, term: &str) -> bool {
        match self {
            Self::All => true,
            Self::Named(names) => names.contains(term),
            Self::Alias(group) => group.terms().contains(&term),
        }
    }
}

impl FromStr for TermFilter {
    type Err = DecodeError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        Self::parse(text)
    }
}

/// Unit conversion applied to budget values, which the simulator writes in
/// cubic feet per day.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum FlowUnits {
    #[default]
    CubicFeetPerDay,
    MillionGallonsPerDay,
    /// Inches of water over one cell during a stress period of `period_days`.
    InchesPerPeriod { period_days: f64 },
    InchesPerDay,
    InchesPerYear,
}

impl FlowUnits {
    /// Multiplier for one cell of `cell_size` feet on a side.
    pub fn factor(self, cell_size: f64) -> f64 {
        let area = cell_size * cell_size;
        match self {
            Self::CubicFeetPerDay => 1.0,
            Self::MillionGallonsPerDay => MGD_PER_CFD,
            Self::InchesPerPeriod { period_days } => period_days * INCHES_PER_FOOT / area,
            Self::InchesPerDay => INCHES_PER_FOOT / area,
            Self::InchesPerYear => DAYS_PER_YEAR * INCHES_PER_FOOT / area,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::CubicFeetPerDay => "cfd",
            Self::MillionGallonsPerDay => "mgd",
            Self::InchesPerPeriod { .. } => "in-per-period",
            Self::InchesPerDay => "in-per-day",
            Self::InchesPerYear => "in-per-year",
        }
    }
}

impl FromStr for FlowUnits {
    type Err = DecodeError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text.trim().to_ascii_lowercase().as_str() {
            "cfd" => Ok(Self::CubicFeetPerDay),
            "mgd" => Ok(Self::MillionGallonsPerDay),
            "in-per-period" => Ok(Self::InchesPerPeriod { period_days: 1.0 }),
            "in-per-month" => Ok(Self::InchesPerPeriod {
                period_days: DAYS_PER_MONTH,
            }),
            "in-per-day" => Ok(Self::InchesPerDay),
            "in-per-year" => Ok(Self::InchesPerYear),
            other => Err(DecodeError::invalid_argument(format!(
                "unknown flow units '{other}' (expected cfd, mgd, in-per-period, in-per-month, in-per-day or in-per-year)"
            ))),
        }
    }
}

impl Display for FlowUnits {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BudgetRequest {
    pub terms: TermFilter,
    pub layers: BTreeSet<i32>,
    pub periods: BTreeSet<i32>,
    pub units: FlowUnits,
}

impl BudgetRequest {
    /// Empty layer or period selections widen to the whole model.
    pub fn new(
        geometry: &GridGeometry,
        terms: TermFilter,
        layers: BTreeSet<i32>,
        periods: BTreeSet<i32>,
    ) -> Self {
        Self {
            terms,
            layers: if layers.is_empty() {
                geometry.all_layers()
            } else {
                layers
            },
            periods: if periods.is_empty() {
                geometry.all_periods()
            } else {
                periods
            },
            units: FlowUnits::default(),
        }
    }

    pub fn with_units(mut self, units: FlowUnits) -> Self {
        self.units = units;
        self
    }
}

/// `TERM_LAYER_PPPPP_STEP`.
pub fn slice_label(slice: &DecodedSlice) -> String {
    format!(
        "{}_{}_{:05}_{}",
        slice.term, slice.layer, slice.stress_period, slice.time_step
    )
}

pub struct BudgetDecoder<R> {
    reader: RecordReader<R>,
    geometry: GridGeometry,
    request: BudgetRequest,
    catalog: BudgetCatalog,
    engine: SeekEngine,
}

impl BudgetDecoder<BufReader<File>> {
    pub fn open(
        path: &Path,
        geometry: GridGeometry,
        output_periods: &[i32],
        request: BudgetRequest,
    ) -> DecodeResult<Self> {
        let file = File::open(path).map_err(|source| {
            DecodeError::io(format!("failed to open '{}'", path.display()), source)
        })?;
        let reader = RecordReader::new(BufReader::new(file))?;
        Self::new(reader, geometry, output_periods, request)
    }
}

impl<R: Read + Seek> BudgetDecoder<R> {
    /// Detects the record framing and measures the period stride.
    pub fn new(
        mut reader: RecordReader<R>,
        geometry: GridGeometry,
        output_periods: &[i32],
        request: BudgetRequest,
    ) -> DecodeResult<Self> {
        if request.layers.iter().any(|layer| *layer < 1 || *layer as u32 > geometry.layers) {
            return Err(DecodeError::invalid_argument(format!(
                "requested layers must lie in 1..={}",
                geometry.layers
            )));
        }
        let framing = reader.detect_framing()?;
        let catalog = BudgetCatalog::scan(&mut reader, &geometry)?;
        debug!(?framing, terms = ?catalog.terms, "budget file opened");
        let engine = SeekEngine::new(PeriodIndex::new(output_periods.iter().copied()), &catalog);
        Ok(Self {
            reader,
            geometry,
            request,
            catalog,
            engine,
        })
    }

    pub fn catalog(&self) -> &BudgetCatalog {
        &self.catalog
    }

    pub fn decode<F>(&mut self, cancel: &CancellationToken, mut sink: F) -> DecodeResult<ScanReport>
    where
        F: FnMut(DecodedSlice),
    {
        let mut report = ScanReport::new();
        report.outcome = ScanOutcome::PastMaxPeriod;
        let factor = self.request.units.factor(self.geometry.cell_size_x) as f32;
        let periods: Vec<i32> = self.request.periods.iter().copied().collect();

        for period in periods {
            if cancel.is_cancelled() {
                report.outcome = ScanOutcome::Cancelled;
                break;
            }
            match self.engine.position(&mut self.reader, period) {
                Ok(_) => {}
                Err(DecodeError::PeriodNotPresent { period }) => {
                    warn!(period, "stress period not saved in output control; skipping");
                    report.missing_periods.push(period);
                    continue;
                }
                Err(error) => return Err(error),
            }

            let present = self.read_period(period, factor, &mut report, cancel, &mut sink)?;
            if report.outcome == ScanOutcome::Cancelled {
                break;
            }
            if !present {
                warn!(period, "stress period has no budget records; skipping");
                report.missing_periods.push(period);
            }
            if self.reader.is_at_end() {
                report.outcome = ScanOutcome::EndOfStream;
            }
        }

        report.seeks = self.engine.seeks();
        report.seek_fallbacks = self.engine.fallbacks();
        info!(
            outcome = ?report.outcome,
            slices = report.slices_emitted,
            records = report.records_scanned,
            seeks = report.seeks,
            missing = report.missing_periods.len(),
            "budget pass finished"
        );
        Ok(report)
    }

    /// Collects every requested slice in file order.
    pub fn collect(&mut self, cancel: &CancellationToken) -> DecodeResult<(Vec<DecodedSlice>, ScanReport)> {
        let mut slices = Vec::new();
        let report = self.decode(cancel, |slice| slices.push(slice))?;
        Ok((slices, report))
    }

    /// Reads records up to the first one declaring a later period. Returns
    /// whether the file holds any record of `period`, matched or not.
    fn read_period<F>(
        &mut self,
        period: i32,
        factor: f32,
        report: &mut ScanReport,
        cancel: &CancellationToken,
        sink: &mut F,
    ) -> DecodeResult<bool>
    where
        F: FnMut(DecodedSlice),
    {
        let mut present = false;
        let mut matched = false;
        while let Some(header) = self.reader.peek_budget_header()? {
            if header.stress_period > period {
                break;
            }
            if cancel.is_cancelled() {
                report.outcome = ScanOutcome::Cancelled;
                break;
            }
            self.reader.next_budget_header()?;
            report.records_scanned += 1;

            let term = header.term_name.identifier().unwrap_or_default();
            present |= header.stress_period == period;
            if header.stress_period < period || !self.request.terms.matches(&term) {
                self.reader.skip_budget_payload(&header, &self.geometry)?;
                continue;
            }
            matched = true;

            let payload = self.reader.read_budget_payload(&header, &self.geometry)?;
            let total_time = payload.total_time().map(f64::from).unwrap_or(0.0);
            let base = SliceBase {
                term: &term,
                stress_period: header.stress_period,
                time_step: header.time_step,
                total_time,
            };
            for (layer, values) in self.requested_layers(payload) {
                let slice = self.build_slice(&base, layer, values, factor)?;
                sink(slice);
                report.slices_emitted += 1;
            }
        }
        if present && !matched {
            debug!(period, "no budget term of this period matches the filter");
        }
        Ok(present)
    }

    /// Layers of one payload that the request selects, with their values.
    fn requested_layers(&self, payload: BudgetPayload) -> Vec<(i32, Vec<f32>)> {
        match payload {
            BudgetPayload::Compact(compact) => {
                if self.request.layers.contains(&compact.layer) {
                    vec![(compact.layer, compact.values)]
                } else {
                    Vec::new()
                }
            }
            BudgetPayload::Full(volume) => self
                .request
                .layers
                .iter()
                .filter_map(|layer| volume.layer(*layer).map(|values| (*layer, values.to_vec())))
                .collect(),
        }
    }

    fn build_slice(
        &self,
        base: &SliceBase<'_>,
        layer: i32,
        mut values: Vec<f32>,
        factor: f32,
    ) -> DecodeResult<DecodedSlice> {
        if factor != 1.0 {
            for value in &mut values {
                *value *= factor;
            }
        }
        Ok(DecodedSlice {
            term: base.term.to_string(),
            stress_period: base.stress_period,
            time_step: base.time_step,
            layer,
            total_time: base.total_time,
            values: Grid2D::from_vec(
                self.geometry.rows as usize,
                self.geometry.cols as usize,
                values,
            )?,
        })
    }
}

struct SliceBase<'a> {
    term: &'a str,
    stress_period: i32,
    time_step: i32,
    total_time: f64,
}
