//! Output-control scanning: which stress periods saved budget output.
//!
//! Two encodings exist. The tabular form has one flag row per period followed by
//! one row per layer; a fourth-column value of 5 means "save and sum". The word
//! form has `PERIOD n` blocks containing `SAVE BUDGET` lines.

use crate::domain::{DecodeError, DecodeResult};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::debug;

const WORD_KEYWORDS: [&str; 5] = ["PERIOD", "HEAD", "DRAWDOWN", "COMPACT", "IBOUND"];
const BUDGET_FLAG_COLUMN: usize = 3;
const SAVE_AND_SUM_FLAG: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputControlEncoding {
    Tabular,
    Words,
}

impl OutputControlEncoding {
    /// Decided by the first token of the first non-comment line.
    pub fn detect(source: &str) -> Option<Self> {
        let (_, line) = content_lines(source).next()?;
        let keyword = line.split_whitespace().next()?.to_ascii_uppercase();
        if WORD_KEYWORDS.contains(&keyword.as_str()) {
            Some(Self::Words)
        } else {
            Some(Self::Tabular)
        }
    }
}

/// Stress periods flagged as saving budget output, ascending.
///
/// When nothing is flagged every period `1..=max_period` is assumed saved, since
/// control files may rely on defaults declared elsewhere.
pub fn discover_output_periods(source: &str, max_period: i32, layers: i32) -> DecodeResult<Vec<i32>> {
    let flagged = match OutputControlEncoding::detect(source) {
        Some(OutputControlEncoding::Tabular) => tabular_periods(source, max_period, layers),
        Some(OutputControlEncoding::Words) => word_periods(source, max_period)?,
        None => BTreeSet::new(),
    };

    if flagged.is_empty() {
        debug!(max_period, "no budget save flags found; assuming every period saved");
        return Ok((1..=max_period).collect());
    }
    Ok(flagged.into_iter().collect())
}

pub fn load_output_periods(path: &Path, max_period: i32, layers: i32) -> DecodeResult<Vec<i32>> {
    let source = fs::read_to_string(path).map_err(|source| {
        DecodeError::io(
            format!("failed to read output control '{}'", path.display()),
            source,
        )
    })?;
    discover_output_periods(&source, max_period, layers)
}

fn tabular_periods(source: &str, max_period: i32, layers: i32) -> BTreeSet<i32> {
    let stride = layers.max(0) as usize + 1;
    // The first content line holds unit numbers and formats, not period flags.
    content_lines(source)
        .skip(1)
        .step_by(stride)
        .take(max_period.max(0) as usize)
        .enumerate()
        .filter(|(_, (_, line))| is_save_and_sum(line))
        .map(|(index, _)| index as i32 + 1)
        .collect()
}

fn is_save_and_sum(line: &str) -> bool {
    line.split_whitespace()
        .nth(BUDGET_FLAG_COLUMN)
        .and_then(|token| token.parse::<f64>().ok())
        .is_some_and(|flag| flag == SAVE_AND_SUM_FLAG)
}

fn word_periods(source: &str, max_period: i32) -> DecodeResult<BTreeSet<i32>> {
    let mut flagged = BTreeSet::new();
    let mut current = None;

    for (line_number, line) in content_lines(source) {
        let tokens: Vec<String> = line
            .split_whitespace()
            .map(|token| token.to_ascii_uppercase())
            .collect();
        match tokens.first().map(String::as_str) {
            Some("PERIOD") => {
                let period = tokens
                    .get(1)
                    .and_then(|token| token.parse::<i32>().ok())
                    .ok_or_else(|| DecodeError::InvalidOutputControl {
                        line: line_number,
                        message: format!("PERIOD line without a period number: '{}'", line.trim()),
                    })?;
                current = Some(period);
            }
            Some("SAVE") if tokens.get(1).map(String::as_str) == Some("BUDGET") => {
                let adds = tokens.get(2).map(String::as_str) == Some("ADD");
                if let Some(period) = current
                    && !adds
                    && (1..=max_period).contains(&period)
                {
                    flagged.insert(period);
                }
            }
            _ => {}
        }
    }

    Ok(flagged)
}

/// Non-blank, non-comment lines with their 1-based line numbers.
fn content_lines(source: &str) -> impl Iterator<Item = (usize, &str)> {
    source
        .lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line))
        .filter(|(_, line)| {
            let trimmed = line.trim_start();
            !trimmed.is_empty() && !trimmed.starts_with('#')
        })
}

#[cfg(test)]
mod tests {
    use super::{OutputControlEncoding, discover_output_periods, load_output_periods};
    use crate::domain::DecodeError;
    use std::fs;
    use tempfile::TempDir;

    const TABULAR_TWO_LAYERS: &str = "\
# output control
   0   0  30  31
   0   1   0   5
   0   0   0   0
   0   0   0   0
   0   1   0   0
   0   0   0   0
   0   0   0   0
   0   1   0   5
   0   0   0   0
   0   0   0   0
";

    const WORDS: &str = "\
# MODFLOW output control
HEAD SAVE UNIT 30
COMPACT BUDGET AUX

PERIOD 1 STEP 1
    SAVE HEAD
    SAVE BUDGET
PERIOD 2 STEP 1
    SAVE HEAD
PERIOD 3 STEP 1
    SAVE BUDGET
    PRINT BUDGET
PERIOD 4 STEP 1
    SAVE BUDGET ADD
";

    #[test]
    fn encoding_is_detected_from_first_content_line() {
        assert_eq!(
            OutputControlEncoding::detect(TABULAR_TWO_LAYERS),
            Some(OutputControlEncoding::Tabular)
        );
        assert_eq!(
            OutputControlEncoding::detect(WORDS),
            Some(OutputControlEncoding::Words)
        );
        assert_eq!(
            OutputControlEncoding::detect("period 1 step 1\n"),
            Some(OutputControlEncoding::Words)
        );
        assert_eq!(OutputControlEncoding::detect("# only comments\n\n"), None);
    }

    #[test]
    fn tabular_flags_select_periods_every_layer_block() {
        let periods =
            discover_output_periods(TABULAR_TWO_LAYERS, 3, 2).expect("tabular should parse");
        assert_eq!(periods, vec![1, 3]);
    }

    #[test]
    fn tabular_rows_beyond_max_period_are_ignored() {
        let periods =
            discover_output_periods(TABULAR_TWO_LAYERS, 2, 2).expect("tabular should parse");
        assert_eq!(periods, vec![1]);
    }

    #[test]
    fn word_blocks_flag_saved_budgets() {
        let periods = discover_output_periods(WORDS, 4, 1).expect("words should parse");
        assert_eq!(periods, vec![1, 3]);
    }

    #[test]
    fn word_periods_beyond_max_are_ignored() {
        let periods = discover_output_periods(WORDS, 2, 1).expect("words should parse");
        assert_eq!(periods, vec![1]);
    }

    #[test]
    fn unflagged_control_falls_back_to_every_period() {
        let source = "HEAD SAVE UNIT 30\nPERIOD 1\n  SAVE HEAD\nPERIOD 2\n  PRINT HEAD\n";
        assert_eq!(
            discover_output_periods(source, 3, 1).expect("words should parse"),
            vec![1, 2, 3]
        );
        assert_eq!(
            discover_output_periods("", 2, 1).expect("empty should parse"),
            vec![1, 2]
        );
    }

    #[test]
    fn malformed_period_line_is_reported() {
        let error = discover_output_periods("PERIOD one\n SAVE BUDGET\n", 3, 1)
            .expect_err("non-numeric period should fail");
        assert!(matches!(
            error,
            DecodeError::InvalidOutputControl { line: 1, .. }
        ));
    }

    #[test]
    fn control_file_is_loaded_from_disk() {
        let temp = TempDir::new().expect("tempdir should be created");
        let path = temp.path().join("model.oc");
        fs::write(&path, WORDS).expect("control file should be written");
        assert_eq!(
            load_output_periods(&path, 4, 1).expect("control should load"),
            vec![1, 3]
        );

        let missing = load_output_periods(&temp.path().join("absent.oc"), 4, 1)
            .expect_err("missing file should fail");
        assert!(matches!(missing, DecodeError::Io { .. }));
    }
}
