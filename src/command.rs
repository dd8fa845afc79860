use crate::env::Environment;

/// Errors returned by the builtin dispatcher.
#[derive(thiserror::Error, Debug)]
pub enum BuiltinError {
    /// No builtin with this name exists.
    #[error("builtin function '{0}' not found")]
    NotFound(String),
    /// The arguments were rejected by the builtin's argument parser.
    #[error("{name}: invalid arguments: {message}")]
    InvalidArgs {
        /// Builtin name.
        name: &'static str,
        /// Parser output describing the problem.
        message: String,
    },
    /// The builtin ran and failed.
    #[error("{name}: {source:#}")]
    Failed {
        /// Builtin name.
        name: &'static str,
        /// Underlying failure.
        source: anyhow::Error,
    },
}

/// Object-safe trait for a builtin invocation whose arguments are already parsed.
///
/// Builtins are pure `(args) -> string` functions; the only state they may
/// touch is the interpreter's working directory.
pub trait ExecutableCommand {
    /// Run the command and return its textual result.
    fn execute(self: Box<Self>, env: &mut Environment) -> Result<String, BuiltinError>;
}

/// Factory that tries to create a command from a name and its arguments.
///
/// Returns `None` when the factory doesn't recognize the `name`.
pub trait CommandFactory {
    /// Name the factory answers to.
    fn name(&self) -> &'static str;

    /// One-line description for listings.
    fn summary(&self) -> &'static str;

    /// Attempt to create a command instance for the provided name and arguments.
    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>>;

    /// Full usage text as produced by the argument parser.
    fn usage(&self) -> String;
}
