use std::path::PathBuf;

pub type DecodeResult<T> = Result<T, DecodeError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Success,
    InputValidationError,
    IoSystemError,
    DecodeError,
    InternalError,
}

impl ErrorCategory {
    pub const fn exit_placeholder(self) -> ExitPlaceholder {
        match self {
            Self::Success => ExitPlaceholder {
                exit_code: 0,
                category: "Success",
                class: "SUCCESS",
            },
            Self::InputValidationError => ExitPlaceholder {
                exit_code: 2,
                category: "InputValidationError",
                class: "INPUT_FATAL",
            },
            Self::IoSystemError => ExitPlaceholder {
                exit_code: 3,
                category: "IoSystemError",
                class: "IO_FATAL",
            },
            Self::DecodeError => ExitPlaceholder {
                exit_code: 4,
                category: "DecodeError",
                class: "DECODE_FATAL",
            },
            Self::InternalError => ExitPlaceholder {
                exit_code: 5,
                category: "InternalError",
                class: "SYS_FATAL",
            },
        }
    }

    pub const fn exit_code(self) -> i32 {
        self.exit_placeholder().exit_code
    }

    pub const fn name(self) -> &'static str {
        self.exit_placeholder().category
    }

    pub const fn class(self) -> &'static str {
        self.exit_placeholder().class
    }

    pub const fn is_fatal(self) -> bool {
        !matches!(self, Self::Success)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitPlaceholder {
    pub exit_code: i32,
    pub category: &'static str,
    pub class: &'static str,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid range token '{token}' in '{input}'")]
    InvalidRangeSyntax { input: String, token: String },
    #[error("unexpected end of stream at byte {offset}: needed {expected} bytes, found {found}")]
    UnexpectedEof {
        offset: u64,
        expected: usize,
        found: usize,
    },
    #[error("unsupported record shape at byte {offset}: {reason}")]
    UnsupportedRecordShape { offset: u64, reason: String },
    #[error("seek to byte {offset} for stress period {target} found {}", describe_found(.found))]
    SeekInconsistency {
        target: i32,
        offset: u64,
        found: Option<i32>,
    },
    #[error("stress period {period} is not present in the budget output")]
    PeriodNotPresent { period: i32 },
    #[error("invalid grid geometry: {message}")]
    InvalidGeometry { message: String },
    #[error("grid shape mismatch: expected {expected_rows}x{expected_cols}, got {rows}x{cols}")]
    GridShapeMismatch {
        expected_rows: usize,
        expected_cols: usize,
        rows: usize,
        cols: usize,
    },
    #[error("invalid output control at line {line}: {message}")]
    InvalidOutputControl { line: usize, message: String },
    #[error("invalid model description '{}': {message}", .path.display())]
    InvalidModelDescription { path: PathBuf, message: String },
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

fn describe_found(found: &Option<i32>) -> String {
    match found {
        Some(period) => format!("stress period {period}"),
        None => "end of stream".to_string(),
    }
}

impl DecodeError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn unsupported(offset: u64, reason: impl Into<String>) -> Self {
        Self::UnsupportedRecordShape {
            offset,
            reason: reason.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidRangeSyntax { .. }
            | Self::InvalidGeometry { .. }
            | Self::InvalidOutputControl { .. }
            | Self::InvalidModelDescription { .. }
            | Self::InvalidArgument { .. } => ErrorCategory::InputValidationError,
            Self::Io { .. } => ErrorCategory::IoSystemError,
            Self::UnexpectedEof { .. }
            | Self::UnsupportedRecordShape { .. }
            | Self::SeekInconsistency { .. }
            | Self::PeriodNotPresent { .. } => ErrorCategory::DecodeError,
            Self::GridShapeMismatch { .. } => ErrorCategory::InternalError,
        }
    }

    pub const fn placeholder(&self) -> &'static str {
        match self {
            Self::InvalidRangeSyntax { .. } => "INPUT.RANGE_SYNTAX",
            Self::UnexpectedEof { .. } => "DECODE.UNEXPECTED_EOF",
            Self::UnsupportedRecordShape { .. } => "DECODE.RECORD_SHAPE",
            Self::SeekInconsistency { .. } => "DECODE.SEEK_INCONSISTENCY",
            Self::PeriodNotPresent { .. } => "DECODE.PERIOD_NOT_PRESENT",
            Self::InvalidGeometry { .. } => "INPUT.GEOMETRY",
            Self::GridShapeMismatch { .. } => "SYS.GRID_SHAPE",
            Self::InvalidOutputControl { .. } => "INPUT.OUTPUT_CONTROL",
            Self::InvalidModelDescription { .. } => "INPUT.MODEL_DESCRIPTION",
            Self::InvalidArgument { .. } => "INPUT.ARGUMENT",
            Self::Io { .. } => "IO.READ",
        }
    }

    pub const fn exit_code(&self) -> i32 {
        self.category().exit_code()
    }

    /// True for the clean end of a record stream: no bytes of the next header exist.
    pub const fn is_clean_eof(&self) -> bool {
        matches!(self, Self::UnexpectedEof { found: 0, .. })
    }

    pub fn diagnostic_line(&self) -> String {
        let severity = if self.category().is_fatal() {
            "ERROR"
        } else {
            "INFO"
        };
        format!("{}: [{}] {}", severity, self.placeholder(), self)
    }

    pub fn fatal_exit_line(&self) -> Option<String> {
        self.category()
            .is_fatal()
            .then(|| format!("FATAL EXIT CODE: {}", self.exit_code()))
    }
}
