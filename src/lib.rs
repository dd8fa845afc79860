//! An interactive runner for script modules, builtin functions and `|>` pipe chains.
//!
//! Each input line is classified by [`parser`] and routed by the [`Interpreter`] to
//! one of several targets:
//!
//! - `key=value` / `key=?` set or show a variable in the [`env::Environment`];
//! - `$ cmd` goes to the system shell;
//! - `for i in 1..5 -> cmd $i` repeats a command over an inclusive range;
//! - `a() |> b key=$x |> "lit"` runs stages left to right, feeding each result
//!   into the next stage;
//! - `name(args)` calls a builtin function, `name key=value` runs a module.
//!
//! Modules are directories with an entry script, discovered by
//! [`ModuleRegistry`]. Their stdout is captured when they run inside a chain.

mod builtin;
pub mod command;
mod display;
pub mod env;
pub mod error;
mod external;
mod interpreter;
mod io_adapters;
pub mod lexer;
pub mod module;
pub mod parser;
mod pipeline;
pub mod signals;

pub use builtin::BuiltinDispatcher;
pub use error::ShellError;
pub use external::{ShellOutcome, ShellPassthrough};
pub use interpreter::Interpreter;
pub use io_adapters::{CaptureError, CaptureGuard, MemWriter, OutputCapture};
pub use module::{ModuleError, ModuleRegistry, ModuleResolver};
