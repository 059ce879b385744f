use ferry_observability::ObservabilityError;
use ferry_sink_core::{DispatchError, ErrorKind};
use snafu::Snafu;

/// CLI error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CliError {
    #[snafu(display("Failed to set up observability"))]
    Observability { source: ObservabilityError },
    #[snafu(display("Failed to read {path}"))]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("Invalid record on line {line}"))]
    JsonParse {
        line: usize,
        source: serde_json::Error,
    },
    #[snafu(display("Invalid {name} argument: {message}"))]
    InvalidArgument { name: &'static str, message: String },
    #[snafu(display("Failed to deliver records"))]
    Dispatch { source: DispatchError },
}

pub type Result<T, E = CliError> = std::result::Result<T, E>;

impl CliError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Observability { .. } | Self::InvalidArgument { .. } => ErrorKind::Configuration,
            Self::Io { .. } => ErrorKind::NotFound,
            Self::JsonParse { .. } => ErrorKind::Validation,
            Self::Dispatch { source } => source.kind(),
        }
    }
}
