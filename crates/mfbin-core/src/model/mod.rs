//! Model name-file lookups: which file holds which package, the grid
//! discretization, and the cell-by-cell budget file of the flow package.

mod parser;

use crate::domain::{DecodeError, DecodeResult, GridGeometry};
use parser::{
    NameEntry, content_rows, invalid, parse_budget_unit, parse_cell_sizes, parse_dimensions,
    parse_name_file,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Flow packages searched for the budget unit, in order.
pub const FLOW_PACKAGES: [&str; 4] = ["LPF", "BCF6", "BCF", "UPW"];

#[derive(Debug, Clone)]
pub struct ModelDescription {
    name_file: PathBuf,
    directory: PathBuf,
    entries: Vec<NameEntry>,
}

impl ModelDescription {
    pub fn load(name_file: &Path) -> DecodeResult<Self> {
        let source = read_text(name_file)?;
        let entries = parse_name_file(&source, name_file)?;
        let directory = name_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(Self {
            name_file: name_file.to_path_buf(),
            directory,
            entries,
        })
    }

    pub fn name_file(&self) -> &Path {
        &self.name_file
    }

    /// File registered for a package such as `DIS` or `OC`, resolved against
    /// the name file's directory.
    pub fn file_by_package(&self, package: &str) -> Option<PathBuf> {
        self.entries
            .iter()
            .find(|entry| entry.package.eq_ignore_ascii_case(package))
            .map(|entry| self.resolve(&entry.file_name))
    }

    pub fn file_by_unit(&self, unit: i32) -> Option<PathBuf> {
        self.entries
            .iter()
            .find(|entry| entry.unit == unit)
            .map(|entry| self.resolve(&entry.file_name))
    }

    pub fn output_control_file(&self) -> Option<PathBuf> {
        self.file_by_package("OC")
    }

    /// Grid geometry from `DIS`, or from `BAS` dimensions and `BCF` cell sizes
    /// for models without a discretization file.
    pub fn geometry(&self) -> DecodeResult<GridGeometry> {
        if let Some(path) = self.file_by_package("DIS") {
            let source = read_text(&path)?;
            let rows = content_rows(&source);
            let dims = parse_dimensions(&rows, 0, &path)?;
            let (size_x, size_y) = parse_cell_sizes(&rows, 2);
            return build_geometry(&path, dims, size_x, size_y);
        }

        let bas = self
            .file_by_package("BAS")
            .ok_or_else(|| invalid(&self.name_file, "neither DIS nor BAS is listed"))?;
        let bas_source = read_text(&bas)?;
        let dims = parse_dimensions(&content_rows(&bas_source), 2, &bas)?;
        let (size_x, size_y) = match self.file_by_package("BCF") {
            Some(bcf) => parse_cell_sizes(&content_rows(&read_text(&bcf)?), 4),
            None => (1.0, 1.0),
        };
        debug!(bas = %bas.display(), "geometry read from BAS and BCF");
        build_geometry(&bas, dims, size_x, size_y)
    }

    /// Budget file written by the first flow package listed in [`FLOW_PACKAGES`].
    pub fn budget_file(&self) -> DecodeResult<PathBuf> {
        let package = FLOW_PACKAGES
            .iter()
            .find_map(|package| self.file_by_package(package))
            .ok_or_else(|| {
                invalid(
                    &self.name_file,
                    format!("no supported flow package ({}) is listed", FLOW_PACKAGES.join(", ")),
                )
            })?;
        let unit = parse_budget_unit(&read_text(&package)?, &package)?;
        self.file_by_unit(unit).ok_or_else(|| {
            invalid(
                &self.name_file,
                format!("budget unit {unit} named by '{}' is not listed", package.display()),
            )
        })
    }

    fn resolve(&self, file_name: &str) -> PathBuf {
        self.directory.join(file_name)
    }
}

fn build_geometry(path: &Path, dims: parser::Dimensions, size_x: f64, size_y: f64) -> DecodeResult<GridGeometry> {
    GridGeometry::with_cell_size(dims.layers, dims.rows, dims.cols, dims.periods, size_x, size_y)
        .map_err(|error| invalid(path, error.to_string()))
}

fn read_text(path: &Path) -> DecodeResult<String> {
    fs::read_to_string(path).map_err(|source| {
        DecodeError::io(format!("failed to read '{}'", path.display()), source)
    })
}
