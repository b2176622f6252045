use super::CliError;
use super::commands::GeometryArgs;
use anyhow::Context;
use mfbin_core::codec::{RecordFraming, RecordReader};
use mfbin_core::domain::{
    CancellationToken, DecodeError, DecodedSlice, GridGeometry, GridSummary, ScanReport,
};
use mfbin_core::model::ModelDescription;
use mfbin_core::output_control::load_output_periods;
use mfbin_core::range::parse_range;
use mfbin_core::seek::BudgetCatalog;
use mfbin_core::vector::VectorSlice;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub(super) struct ModelContext {
    pub(super) geometry: GridGeometry,
    pub(super) model: Option<ModelDescription>,
}

pub(super) fn resolve_model(args: &GeometryArgs) -> Result<ModelContext, CliError> {
    if let Some(name_file) = &args.nam {
        let model = ModelDescription::load(name_file).map_err(CliError::Decode)?;
        let geometry = model.geometry().map_err(CliError::Decode)?;
        info!(
            name_file = %name_file.display(),
            layers = geometry.layers,
            rows = geometry.rows,
            cols = geometry.cols,
            periods = geometry.periods,
            "model loaded"
        );
        return Ok(ModelContext {
            geometry,
            model: Some(model),
        });
    }

    let Some(grid) = args.grid.as_deref() else {
        return Err(CliError::Usage(
            "either --nam or --grid LAYERS,ROWS,COLS,PERIODS is required".to_string(),
        ));
    };
    let geometry = parse_grid(grid, args.cell_size)?;
    Ok(ModelContext {
        geometry,
        model: None,
    })
}

fn parse_grid(grid: &str, cell_size: f64) -> Result<GridGeometry, CliError> {
    let dims = grid
        .split(',')
        .map(|part| part.trim().parse::<u32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| CliError::Usage(format!("--grid '{grid}' must be four integers")))?;
    let [layers, rows, cols, periods] = dims[..] else {
        return Err(CliError::Usage(format!(
            "--grid '{grid}' must be LAYERS,ROWS,COLS,PERIODS"
        )));
    };
    GridGeometry::with_cell_size(layers, rows, cols, periods, cell_size, cell_size)
        .map_err(CliError::Decode)
}

pub(super) fn parse_selection(text: Option<&str>) -> Result<BTreeSet<i32>, CliError> {
    parse_range(text).map_err(CliError::Decode)
}

pub(super) fn budget_file(explicit: Option<PathBuf>, context: &ModelContext) -> Result<PathBuf, CliError> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    match &context.model {
        Some(model) => model.budget_file().map_err(CliError::Decode),
        None => Err(CliError::Usage(
            "--file is required when no --nam is given".to_string(),
        )),
    }
}

/// Periods with saved budgets: `--oc`, then the model's OC file, then every period.
pub(super) fn output_periods(explicit: Option<PathBuf>, context: &ModelContext) -> Result<Vec<i32>, CliError> {
    let geometry = &context.geometry;
    let source = explicit.or_else(|| {
        context
            .model
            .as_ref()
            .and_then(ModelDescription::output_control_file)
    });
    match source {
        Some(path) => {
            debug!(oc = %path.display(), "reading output control");
            load_output_periods(&path, geometry.periods as i32, geometry.layers as i32)
                .map_err(CliError::Decode)
        }
        None => Ok((1..=geometry.periods as i32).collect()),
    }
}

pub(super) fn open_reader(path: &Path) -> Result<RecordReader<BufReader<File>>, CliError> {
    let file = File::open(path)
        .map_err(|source| {
            DecodeError::io(format!("failed to open '{}'", path.display()), source)
        })
        .map_err(CliError::Decode)?;
    RecordReader::new(BufReader::new(file)).map_err(CliError::Decode)
}

/// Newline-delimited JSON sink fed from decode callbacks.
///
/// The first failure is kept and cancels the scan; [`JsonLines::finish`]
/// returns it once the decoder has stopped.
pub(super) struct JsonLines<W: Write> {
    out: W,
    cancel: CancellationToken,
    failure: Option<CliError>,
}

impl<W: Write> JsonLines<W> {
    pub(super) fn new(out: W, cancel: CancellationToken) -> Self {
        Self {
            out,
            cancel,
            failure: None,
        }
    }

    pub(super) fn emit<T: Serialize>(&mut self, line: &T) {
        if self.failure.is_some() {
            return;
        }
        if let Err(error) = self.write_line(line) {
            self.fail(CliError::Internal(error));
        }
    }

    pub(super) fn fail(&mut self, error: CliError) {
        self.cancel.cancel();
        if self.failure.is_none() {
            self.failure = Some(error);
        }
    }

    pub(super) fn finish(mut self) -> Result<(), CliError> {
        if let Some(error) = self.failure.take() {
            return Err(error);
        }
        self.out.flush().context("failed to flush output")?;
        Ok(())
    }

    fn write_line<T: Serialize>(&mut self, line: &T) -> anyhow::Result<()> {
        serde_json::to_writer(&mut self.out, line).context("failed to serialize output line")?;
        self.out
            .write_all(b"\n")
            .context("failed to write output line")?;
        Ok(())
    }
}

#[derive(Serialize)]
pub(super) struct SliceLine<'a> {
    kind: &'static str,
    label: String,
    term: &'a str,
    period: i32,
    step: i32,
    layer: i32,
    total_time: f64,
    rows: usize,
    cols: usize,
    summary: GridSummary,
}

impl<'a> SliceLine<'a> {
    pub(super) fn new(label: String, slice: &'a DecodedSlice) -> Self {
        Self {
            kind: "slice",
            label,
            term: &slice.term,
            period: slice.stress_period,
            step: slice.time_step,
            layer: slice.layer,
            total_time: slice.total_time,
            rows: slice.values.rows(),
            cols: slice.values.cols(),
            summary: slice.values.summary(),
        }
    }
}

#[derive(Serialize)]
pub(super) struct VectorLine {
    kind: &'static str,
    direction_label: String,
    magnitude_label: String,
    period: i32,
    step: i32,
    layer: i32,
    resample: usize,
    rows: usize,
    cols: usize,
    magnitude: GridSummary,
    direction: GridSummary,
}

impl VectorLine {
    pub(super) fn new(vector: &VectorSlice) -> Self {
        Self {
            kind: "vector",
            direction_label: vector.direction_label(),
            magnitude_label: vector.magnitude_label(),
            period: vector.stress_period,
            step: vector.time_step,
            layer: vector.layer,
            resample: vector.resample,
            rows: vector.field.magnitude.rows(),
            cols: vector.field.magnitude.cols(),
            magnitude: vector.field.magnitude.summary(),
            direction: vector.field.direction_degrees.summary(),
        }
    }
}

#[derive(Serialize)]
pub(super) struct ReportLine<'a> {
    kind: &'static str,
    command: &'static str,
    #[serde(flatten)]
    report: &'a ScanReport,
}

impl<'a> ReportLine<'a> {
    pub(super) fn new(command: &'static str, report: &'a ScanReport) -> Self {
        Self {
            kind: "report",
            command,
            report,
        }
    }
}

#[derive(Serialize)]
pub(super) struct TermsLine<'a> {
    kind: &'static str,
    framing: &'static str,
    first_period: i32,
    bytes_per_period: u64,
    terms: &'a [String],
}

impl<'a> TermsLine<'a> {
    pub(super) fn new(framing: RecordFraming, catalog: &'a BudgetCatalog) -> Self {
        Self {
            kind: "terms",
            framing: match framing {
                RecordFraming::Stream => "stream",
                RecordFraming::Sequential => "sequential",
            },
            first_period: catalog.first_period,
            bytes_per_period: catalog.bytes_per_period,
            terms: &catalog.terms,
        }
    }
}
