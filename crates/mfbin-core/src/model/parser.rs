use crate::domain::{DecodeError, DecodeResult};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct NameEntry {
    pub(super) package: String,
    pub(super) unit: i32,
    pub(super) file_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Dimensions {
    pub(super) layers: u32,
    pub(super) rows: u32,
    pub(super) cols: u32,
    pub(super) periods: u32,
}

/// Whitespace-split tokens of every non-blank, non-comment line.
pub(super) fn content_rows(source: &str) -> Vec<Vec<&str>> {
    source
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .map(|line| line.split_whitespace().collect::<Vec<_>>())
        .filter(|tokens| !tokens.is_empty())
        .collect()
}

pub(super) fn parse_name_file(source: &str, path: &Path) -> DecodeResult<Vec<NameEntry>> {
    let mut entries = Vec::new();
    for tokens in content_rows(source) {
        let [package, unit, file_name, ..] = tokens.as_slice() else {
            return Err(invalid(
                path,
                format!("name file entry '{}' needs a package, unit and file", tokens.join(" ")),
            ));
        };
        let unit = unit.parse::<i32>().map_err(|_| {
            invalid(path, format!("unit '{unit}' of package {package} is not an integer"))
        })?;
        entries.push(NameEntry {
            package: package.to_ascii_uppercase(),
            unit,
            file_name: (*file_name).to_string(),
        });
    }
    Ok(entries)
}

/// First data row of a discretization file: layers, rows, columns, periods.
pub(super) fn parse_dimensions(rows: &[Vec<&str>], row: usize, path: &Path) -> DecodeResult<Dimensions> {
    let tokens = rows
        .get(row)
        .ok_or_else(|| invalid(path, format!("missing dimension row {}", row + 1)))?;
    let value = |index: usize, name: &str| -> DecodeResult<u32> {
        tokens
            .get(index)
            .and_then(|token| token.parse::<u32>().ok())
            .ok_or_else(|| invalid(path, format!("{name} on row {} is not a count", row + 1)))
    };
    Ok(Dimensions {
        layers: value(0, "layer count")?,
        rows: value(1, "row count")?,
        cols: value(2, "column count")?,
        periods: value(3, "stress period count")?,
    })
}

/// Cell sizes from the second token of two consecutive rows. Constants carry
/// an optional Fortran format, as in `100.0(10F10.0)`. Unreadable sizes
/// default to 1.
pub(super) fn parse_cell_sizes(rows: &[Vec<&str>], first_row: usize) -> (f64, f64) {
    let size = |row: usize| -> f64 {
        rows.get(row)
            .and_then(|tokens| tokens.get(1))
            .map(|token| token.split('(').next().unwrap_or_default())
            .and_then(|token| token.parse::<f64>().ok())
            .filter(|size| size.is_finite() && *size > 0.0)
            .unwrap_or(1.0)
    };
    (size(first_row), size(first_row + 1))
}

/// Cell-by-cell output unit of a flow package: the first item of its first
/// data row, or the second when the first is zero.
pub(super) fn parse_budget_unit(source: &str, path: &Path) -> DecodeResult<i32> {
    let rows = content_rows(source);
    let first = rows
        .first()
        .ok_or_else(|| invalid(path, "flow package has no data rows"))?;
    let item = |index: usize| -> DecodeResult<i32> {
        first
            .get(index)
            .and_then(|token| token.parse::<i32>().ok())
            .ok_or_else(|| invalid(path, format!("item {} of the first row is not a unit number", index + 1)))
    };
    match item(0)? {
        0 => item(1),
        unit => Ok(unit),
    }
}

pub(super) fn invalid(path: &Path, message: impl Into<String>) -> DecodeError {
    DecodeError::InvalidModelDescription {
        path: path.to_path_buf(),
        message: message.into(),
    }
}
