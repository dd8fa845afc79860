use crate::builtin::BuiltinError;
use crate::env::EnvError;
use crate::module::ModuleError;
use crate::parser::ParseError;
use std::time::Duration;

/// Everything that can go wrong while dispatching one input line.
///
/// None of these stop the interactive loop; the dispatcher reports them and
/// reads the next line.
#[derive(thiserror::Error, Debug)]
pub enum ShellError {
    /// The line could not be classified or a for-loop header was malformed.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A builtin or module name did not resolve.
    #[error("unknown {kind}: {name}")]
    Lookup {
        /// What was being looked up ("module", "builtin", "function").
        kind: &'static str,
        /// The name that failed to resolve.
        name: String,
    },

    /// An assignment was rejected by the environment store.
    #[error(transparent)]
    Env(#[from] EnvError),

    /// A module, builtin or shell command ran and failed.
    #[error("{detail} ({})", format_duration(*.elapsed))]
    Execution {
        /// Human readable failure description.
        detail: String,
        /// How long the command ran before failing.
        elapsed: Duration,
    },

    /// Console or child-process I/O failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// One stage of a pipe chain failed; later stages were not run.
    #[error("pipe error at stage {index} (`{stage}`): {source}")]
    Stage {
        /// 1-based position of the failing stage.
        index: usize,
        /// The stage as written in the chain.
        stage: String,
        /// The underlying failure.
        source: Box<ShellError>,
    },

    /// A meta-command was called with missing arguments.
    #[error("usage: {0}")]
    Usage(&'static str),
}

impl ShellError {
    pub(crate) fn execution(detail: impl Into<String>, elapsed: Duration) -> Self {
        Self::Execution {
            detail: detail.into(),
            elapsed,
        }
    }

    /// Whether the error stems from an unresolved name, possibly nested in a stage.
    pub fn is_lookup(&self) -> bool {
        match self {
            Self::Lookup { .. } => true,
            Self::Stage { source, .. } => source.is_lookup(),
            _ => false,
        }
    }

    /// The 1-based index of the failing pipe stage, if any.
    pub fn stage_index(&self) -> Option<usize> {
        match self {
            Self::Stage { index, .. } => Some(*index),
            _ => None,
        }
    }
}

impl From<BuiltinError> for ShellError {
    fn from(err: BuiltinError) -> Self {
        match err {
            BuiltinError::NotFound(name) => Self::Lookup {
                kind: "builtin",
                name,
            },
            other => Self::execution(other.to_string(), Duration::ZERO),
        }
    }
}

impl From<ModuleError> for ShellError {
    fn from(err: ModuleError) -> Self {
        match err {
            ModuleError::NotFound(name) => Self::Lookup {
                kind: "module",
                name,
            },
            ModuleError::Failed { elapsed, .. } | ModuleError::Spawn { elapsed, .. } => {
                Self::execution(err.to_string(), elapsed)
            }
            other => Self::execution(other.to_string(), Duration::ZERO),
        }
    }
}

/// Render a duration the way the status lines print it (`1.234s`, `15ms`).
pub fn format_duration(elapsed: Duration) -> String {
    if elapsed.as_secs() > 0 {
        format!("{:.3}s", elapsed.as_secs_f64())
    } else {
        format!("{}ms", elapsed.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_error_reports_index_and_nested_lookup() {
        let err = ShellError::Stage {
            index: 2,
            stage: "nope input=\"x\"".to_string(),
            source: Box::new(ShellError::Lookup {
                kind: "module",
                name: "nope".to_string(),
            }),
        };
        assert_eq!(err.stage_index(), Some(2));
        assert!(err.is_lookup());
        assert_eq!(
            err.to_string(),
            "pipe error at stage 2 (`nope input=\"x\"`): unknown module: nope"
        );
    }

    #[test]
    fn durations_render_compactly() {
        assert_eq!(format_duration(Duration::from_millis(15)), "15ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.500s");
    }
}
