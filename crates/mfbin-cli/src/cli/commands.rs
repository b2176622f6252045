use super::CliError;
use super::helpers::*;
use mfbin_core::budget::{AliasGroup, BudgetDecoder, BudgetRequest, FlowUnits, TermFilter, slice_label};
use mfbin_core::domain::CancellationToken;
use mfbin_core::seek::BudgetCatalog;
use mfbin_core::snapshot::{self, SnapshotDecoder, SnapshotKind, SnapshotRequest};
use mfbin_core::vector::VectorAssembler;
use std::io;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(clap::Args)]
pub(super) struct GeometryArgs {
    /// Model name file supplying the grid, output control and budget file
    #[arg(long, conflicts_with = "grid")]
    pub(super) nam: Option<PathBuf>,

    /// Grid dimensions when no name file is given
    #[arg(long, value_name = "LAYERS,ROWS,COLS,PERIODS")]
    pub(super) grid: Option<String>,

    /// Cell size used with --grid
    #[arg(long, default_value_t = 1.0)]
    pub(super) cell_size: f64,
}

#[derive(clap::Args)]
pub(super) struct SnapshotArgs {
    /// Binary head or concentration file
    #[arg(long)]
    file: PathBuf,

    /// Layers to decode, e.g. 1-3,5 (default: all)
    #[arg(long)]
    layers: Option<String>,

    /// Stress periods (heads) or elapsed times (concentration) to decode (default: all)
    #[arg(long)]
    periods: Option<String>,

    #[command(flatten)]
    geometry: GeometryArgs,
}

#[derive(clap::Args)]
pub(super) struct BudgetArgs {
    /// Cell-by-cell budget file (default: the flow package's unit in --nam)
    #[arg(long)]
    file: Option<PathBuf>,

    /// Output control file (default: the OC entry of --nam, else every period)
    #[arg(long)]
    oc: Option<PathBuf>,

    /// Layers to decode (default: all)
    #[arg(long)]
    layers: Option<String>,

    /// Stress periods to decode (default: all)
    #[arg(long)]
    periods: Option<String>,

    /// ALL, RIGHT|FRONT, FACE, WELL, or a comma-separated list of terms
    #[arg(long, default_value = "ALL")]
    terms: String,

    /// cfd, mgd, in-per-period, in-per-month, in-per-day or in-per-year
    #[arg(long, default_value = "cfd")]
    units: String,

    #[command(flatten)]
    geometry: GeometryArgs,
}

#[derive(clap::Args)]
pub(super) struct VectorArgs {
    /// Cell-by-cell budget file (default: the flow package's unit in --nam)
    #[arg(long)]
    file: Option<PathBuf>,

    /// Output control file (default: the OC entry of --nam, else every period)
    #[arg(long)]
    oc: Option<PathBuf>,

    /// Layers to decode (default: all)
    #[arg(long)]
    layers: Option<String>,

    /// Stress periods to decode (default: all)
    #[arg(long)]
    periods: Option<String>,

    /// Sum KxK cell blocks before computing vectors
    #[arg(long, default_value_t = 1)]
    resample: usize,

    #[command(flatten)]
    geometry: GeometryArgs,
}

#[derive(clap::Args)]
pub(super) struct TermsArgs {
    /// Cell-by-cell budget file (default: the flow package's unit in --nam)
    #[arg(long)]
    file: Option<PathBuf>,

    #[command(flatten)]
    geometry: GeometryArgs,
}

pub(super) fn run_snapshot_command(kind: SnapshotKind, args: SnapshotArgs) -> Result<i32, CliError> {
    let context = resolve_model(&args.geometry)?;
    let request = SnapshotRequest::new(
        kind,
        &context.geometry,
        parse_selection(args.layers.as_deref())?,
        parse_selection(args.periods.as_deref())?,
    );
    let mut decoder =
        SnapshotDecoder::open(&args.file, context.geometry, request).map_err(CliError::Decode)?;

    let cancel = CancellationToken::new();
    let mut lines = JsonLines::new(io::stdout().lock(), cancel.clone());
    let report = decoder
        .decode(&cancel, |slice| {
            let line = SliceLine::new(snapshot::slice_label(kind, &slice), &slice);
            lines.emit(&line);
        })
        .map_err(CliError::Decode)?;
    lines.emit(&ReportLine::new(command_name(kind), &report));
    lines.finish()?;
    Ok(0)
}

pub(super) fn run_budget_command(args: BudgetArgs) -> Result<i32, CliError> {
    let context = resolve_model(&args.geometry)?;
    let file = budget_file(args.file, &context)?;
    let output_periods = output_periods(args.oc, &context)?;
    let terms = TermFilter::parse(&args.terms).map_err(CliError::Decode)?;
    let units: FlowUnits = args.units.parse().map_err(CliError::Decode)?;
    let request = BudgetRequest::new(
        &context.geometry,
        terms,
        parse_selection(args.layers.as_deref())?,
        parse_selection(args.periods.as_deref())?,
    )
    .with_units(units);
    let mut decoder = BudgetDecoder::open(&file, context.geometry, &output_periods, request)
        .map_err(CliError::Decode)?;

    let cancel = CancellationToken::new();
    let mut lines = JsonLines::new(io::stdout().lock(), cancel.clone());
    let report = decoder
        .decode(&cancel, |slice| {
            lines.emit(&SliceLine::new(slice_label(&slice), &slice));
        })
        .map_err(CliError::Decode)?;
    if !report.missing_periods.is_empty() {
        warn!(missing = ?report.missing_periods, "some requested periods were not decoded");
    }
    lines.emit(&ReportLine::new("budget", &report));
    lines.finish()?;
    Ok(0)
}

pub(super) fn run_vectors_command(args: VectorArgs) -> Result<i32, CliError> {
    if args.resample == 0 {
        return Err(CliError::Usage("--resample must be at least 1".to_string()));
    }
    let context = resolve_model(&args.geometry)?;
    let file = budget_file(args.file, &context)?;
    let output_periods = output_periods(args.oc, &context)?;
    let request = BudgetRequest::new(
        &context.geometry,
        TermFilter::Alias(AliasGroup::RightFront),
        parse_selection(args.layers.as_deref())?,
        parse_selection(args.periods.as_deref())?,
    );
    let mut decoder = BudgetDecoder::open(&file, context.geometry, &output_periods, request)
        .map_err(CliError::Decode)?;

    let cancel = CancellationToken::new();
    let mut lines = JsonLines::new(io::stdout().lock(), cancel.clone());
    let mut assembler = VectorAssembler::new(args.resample);
    let report = decoder
        .decode(&cancel, |slice| match assembler.push(slice) {
            Ok(Some(vector)) => lines.emit(&VectorLine::new(&vector)),
            Ok(None) => {}
            Err(error) => lines.fail(CliError::Decode(error)),
        })
        .map_err(CliError::Decode)?;
    if assembler.unpaired() > 0 {
        warn!(
            unpaired = assembler.unpaired(),
            "face flow slices without a matching partner were dropped"
        );
    }
    lines.emit(&ReportLine::new("vectors", &report));
    lines.finish()?;
    Ok(0)
}

pub(super) fn run_terms_command(args: TermsArgs) -> Result<i32, CliError> {
    let context = resolve_model(&args.geometry)?;
    let file = budget_file(args.file, &context)?;
    let mut reader = open_reader(&file)?;
    let framing = reader.detect_framing().map_err(CliError::Decode)?;
    let catalog = BudgetCatalog::scan(&mut reader, &context.geometry).map_err(CliError::Decode)?;
    info!(file = %file.display(), terms = catalog.terms.len(), "budget catalog read");

    let mut lines = JsonLines::new(io::stdout().lock(), CancellationToken::new());
    lines.emit(&TermsLine::new(framing, &catalog));
    lines.finish()?;
    Ok(0)
}

fn command_name(kind: SnapshotKind) -> &'static str {
    match kind {
        SnapshotKind::Head => "heads",
        SnapshotKind::Concentration => "conc",
    }
}
