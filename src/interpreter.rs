use crate::builtin::BuiltinDispatcher;
use crate::display;
use crate::env::{Environment, expand_home};
use crate::error::{ShellError, format_duration};
use crate::external::ShellPassthrough;
use crate::io_adapters::OutputCapture;
use crate::lexer::{self, Argument};
use crate::module::{ModuleKind, ModuleOutput, ModuleResolver, default_shell};
use crate::parser::{self, MetaCommand, ParseError, ParsedCommand, RawStage, PIPE};
use crate::pipeline;
use crate::signals::{ExecutionGuard, ExecutionState};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use std::rc::Rc;
use std::time::Duration;

type Confirm = Box<dyn FnMut(&str) -> bool>;

/// Line-oriented interpreter: classifies each input line and routes it to the
/// environment store, the builtin library, a module, the system shell or a
/// meta-command.
///
/// All console output goes through one writer, so the interpreter can be driven
/// from tests with a [`crate::MemWriter`].
///
/// Example
/// ```
/// use modsh::{Interpreter, ModuleRegistry, MemWriter};
/// let (out, buf) = MemWriter::with_handle();
/// let mut sh = Interpreter::new(Box::new(ModuleRegistry::new("/nonexistent")))
///     .with_output(Box::new(out));
/// sh.execute("greeting=hello");
/// assert_eq!(sh.env().get("greeting"), Some("hello"));
/// let value = sh.evaluate_chain("\"abc\" |> toupper()").unwrap();
/// assert_eq!(value, "ABC");
/// assert!(!buf.borrow().is_empty());
/// ```
pub struct Interpreter {
    env: Environment,
    modules: Box<dyn ModuleResolver>,
    builtins: BuiltinDispatcher,
    shell: ShellPassthrough,
    capture: Rc<OutputCapture>,
    state: ExecutionState,
    history: Vec<String>,
    out: Box<dyn Write>,
    confirm: Confirm,
}

impl Interpreter {
    /// Create an interpreter over `modules`, writing to stdout.
    pub fn new(modules: Box<dyn ModuleResolver>) -> Self {
        Self {
            env: Environment::new(),
            modules,
            builtins: BuiltinDispatcher::default(),
            shell: ShellPassthrough::new(default_shell()),
            capture: Rc::default(),
            state: ExecutionState::default(),
            history: Vec::new(),
            out: Box::new(std::io::stdout()),
            confirm: Box::new(confirm_with_editor),
        }
    }

    /// Send console output to `out` instead of stdout.
    pub fn with_output(mut self, out: Box<dyn Write>) -> Self {
        self.out = out;
        self
    }

    /// Default shell for `$` lines.
    pub fn with_shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = ShellPassthrough::new(shell);
        self
    }

    /// Replace the yes/no prompt used by `delete`.
    pub fn with_confirm(mut self, confirm: impl FnMut(&str) -> bool + 'static) -> Self {
        self.confirm = Box::new(confirm);
        self
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut Environment {
        &mut self.env
    }

    /// Lines that parsed successfully, oldest first.
    pub fn history(&self) -> &[String] {
        &self.history
    }

    /// Shared handle on the module-running flag, for the interrupt listener.
    pub fn execution_state(&self) -> ExecutionState {
        self.state.clone()
    }

    pub fn modules(&self) -> &dyn ModuleResolver {
        self.modules.as_ref()
    }

    pub fn should_exit(&self) -> bool {
        self.env.should_exit
    }

    /// Execute one input line, reporting any failure on the console.
    pub fn execute(&mut self, line: &str) {
        let line = line.trim();
        let outcome = match parser::parse_command(line) {
            Ok(cmd) => {
                self.history.push(line.to_string());
                self.run_command(cmd)
            }
            Err(ParseError::Empty) => Ok(()),
            Err(err) => Err(err.into()),
        };
        if let Err(err) = outcome {
            self.report(&err);
        }
        if let Err(err) = self.out.flush() {
            tracing::warn!(%err, "can't flush console");
        }
    }

    /// Classify and run one line without recording it in history.
    pub fn dispatch(&mut self, line: &str) -> Result<(), ShellError> {
        let cmd = parser::parse_command(line)?;
        self.run_command(cmd)
    }

    /// Evaluate a `|>` chain and return the final stage's value without printing it.
    pub fn evaluate_chain(&mut self, line: &str) -> Result<String, ShellError> {
        let stages: Vec<RawStage> = parser::split_pipeline(line)?
            .iter()
            .map(|stage| RawStage::parse(stage))
            .collect();
        self.evaluate_stages(&stages, false)
    }

    /// Banner plus a count of the loaded modules.
    pub fn print_banner(&mut self, version: &str) -> std::io::Result<()> {
        display::banner(&mut *self.out, version)?;
        let count = self.modules.list().len();
        display::success(&mut *self.out, &format!("Loaded {count} module(s)"))?;
        writeln!(self.out)
    }

    /// Interactive loop over a line editor until `exit` or end of input.
    pub fn repl(&mut self) -> rustyline::Result<()> {
        let mut rl = DefaultEditor::new()?;

        while !self.env.should_exit {
            match rl.readline(&display::prompt()) {
                Ok(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    rl.add_history_entry(line)?;
                    self.execute(line);
                }
                Err(ReadlineError::Interrupted) => {
                    writeln!(self.out)?;
                }
                Err(ReadlineError::Eof) => break,
                Err(err) => return Err(err),
            }
        }

        Ok(())
    }

    fn report(&mut self, err: &ShellError) {
        tracing::debug!(?err, "command failed");
        if let Err(io) = display::error(&mut *self.out, &err.to_string()) {
            tracing::warn!(%io, "can't write to console");
        }
    }

    fn run_command(&mut self, cmd: ParsedCommand) -> Result<(), ShellError> {
        match cmd {
            ParsedCommand::Assignment { key, value } => {
                self.env.set(&key, value.as_str())?;
                display::success(&mut *self.out, &format!("Set {key} = {value}"))?;
            }
            ParsedCommand::View { key } => match self.env.get(&key) {
                Some(value) => writeln!(self.out, "   {key} = {value}")?,
                None => display::warning(
                    &mut *self.out,
                    &format!("Environment variable '{key}' not set, skipping..."),
                )?,
            },
            ParsedCommand::ShellPassthrough { raw } => self.run_shell(&raw)?,
            ParsedCommand::ForLoop {
                var,
                start,
                end,
                body,
            } => self.expand_for_loop(&var, start, end, &body)?,
            ParsedCommand::PipeChain { stages } => self.run_chain(&stages)?,
            ParsedCommand::Invocation(stage) => self.run_invocation(&stage)?,
            ParsedCommand::Meta { command, args } => self.run_meta(command, &args)?,
        }
        Ok(())
    }

    fn run_shell(&mut self, raw: &str) -> Result<(), ShellError> {
        if raw.is_empty() {
            display::warning(&mut *self.out, "Empty command")?;
            return Ok(());
        }
        let (shell, _) = self.shell.select(raw);
        display::info(
            &mut *self.out,
            &format!("Executing in {}", shell.display()),
        )?;
        self.out.flush()?;

        let outcome = self.shell.run(raw, &mut self.env)?;
        if outcome.success() {
            display::success(
                &mut *self.out,
                &format!("Command completed in {}", format_duration(outcome.elapsed)),
            )?;
            Ok(())
        } else {
            Err(ShellError::execution(
                format!("Command failed: exit status {}", outcome.code()),
                outcome.elapsed,
            ))
        }
    }

    fn expand_for_loop(
        &mut self,
        var: &str,
        start: i64,
        end: i64,
        body: &str,
    ) -> Result<(), ShellError> {
        if start > end {
            display::warning(
                &mut *self.out,
                &format!("Range {start}..{end} is empty, nothing to run"),
            )?;
            return Ok(());
        }
        display::info(
            &mut *self.out,
            &format!("Executing loop: for {var} in {start}..{end}"),
        )?;

        let placeholder = format!("${var}");
        let total = iteration_count(start, end);
        let mut results = Vec::new();
        for (step, value) in (start..=end).enumerate() {
            let line = body.replace(&placeholder, &value.to_string());
            writeln!(self.out, "  [{}/{total}] Executing: {line}", step + 1)?;
            if line.contains(PIPE) {
                match self.evaluate_chain(&line) {
                    Ok(result) => results.push(result),
                    Err(err) => {
                        self.report(&err);
                        results.push(String::new());
                    }
                }
            } else if let Err(err) = self.dispatch(&line) {
                self.report(&err);
            }
        }

        if !results.is_empty() {
            writeln!(self.out)?;
            display::success(&mut *self.out, "Loop Results:")?;
            for (idx, result) in results.iter().enumerate() {
                writeln!(self.out, "   [{idx}] {result}")?;
            }
            writeln!(self.out)?;
        }
        Ok(())
    }

    fn run_chain(&mut self, stages: &[RawStage]) -> Result<(), ShellError> {
        let last = stages.last().ok_or(ParseError::Empty)?;
        let self_printing = pipeline::prints_itself(last);
        let result = self.evaluate_stages(stages, self_printing)?;
        self.present(last, self_printing, &result)
    }

    fn run_invocation(&mut self, stage: &RawStage) -> Result<(), ShellError> {
        if let RawStage::Bare { name, args } = stage {
            if self.modules.get(name).is_ok() {
                return self.run_module_invocation(name, args);
            }
        }
        let self_printing = pipeline::prints_itself(stage);
        let result = self.evaluate_stage(stage, "", self_printing)?;
        self.present(stage, self_printing, &result)
    }

    /// Print a final value, unless the stage already wrote its own output.
    fn present(&mut self, last: &RawStage, self_printing: bool, result: &str) -> Result<(), ShellError> {
        if !self_printing {
            writeln!(self.out, "{result}")?;
        } else if last.name().is_some_and(|name| self.builtins.contains(name)) {
            display::success(&mut *self.out, result)?;
        }
        Ok(())
    }

    fn evaluate_stages(&mut self, stages: &[RawStage], stream_last: bool) -> Result<String, ShellError> {
        let mut value = String::new();
        for (idx, stage) in stages.iter().enumerate() {
            let stream = stream_last && idx + 1 == stages.len();
            value = self
                .evaluate_stage(stage, &value, stream)
                .map_err(|source| ShellError::Stage {
                    index: idx + 1,
                    stage: stage.to_source(),
                    source: Box::new(source),
                })?;
            tracing::debug!(target: "pipeline", index = idx + 1, %value, "stage finished");
        }
        Ok(value)
    }

    /// Run one stage with `input` injected. `stream` sends a module's output
    /// straight to the console instead of capturing it.
    fn evaluate_stage(&mut self, stage: &RawStage, input: &str, stream: bool) -> Result<String, ShellError> {
        match pipeline::inject(stage, input) {
            RawStage::Literal(text) => Ok(format!("{input}{}", pipeline::unescape_literal(&text))),
            RawStage::Call { name, args } => {
                let values = self.evaluate_arguments(&args)?;
                if self.builtins.contains(&name) {
                    return Ok(self.builtins.execute(&name, &values, &mut self.env)?.trim().to_string());
                }
                if self.modules.get(&name).is_ok() {
                    return self.run_module_for_pipe(&name, pipeline::module_args(&values), stream);
                }
                Err(ShellError::Lookup {
                    kind: "function",
                    name,
                })
            }
            RawStage::Bare { name, args } => {
                let values = self.evaluate_arguments(&args)?;
                if self.modules.get(&name).is_ok() {
                    return self.run_module_for_pipe(&name, pipeline::module_args(&values), stream);
                }
                if self.builtins.contains(&name) {
                    let values = pipeline::builtin_values(values);
                    return Ok(self.builtins.execute(&name, &values, &mut self.env)?.trim().to_string());
                }
                Err(ShellError::Lookup { kind: "module", name })
            }
        }
    }

    /// Tokenize `raw`, replacing nested builtin calls with their results.
    fn evaluate_arguments(&mut self, raw: &str) -> Result<Vec<String>, ShellError> {
        let mut values = Vec::new();
        for arg in lexer::tokenize_arguments(raw, &self.env) {
            let value = match arg {
                Argument::Call(call) => match lexer::split_call(&call) {
                    Some((name, inner)) if self.builtins.contains(name) => {
                        let nested = self.evaluate_arguments(inner)?;
                        self.builtins
                            .execute(name, &nested, &mut self.env)?
                            .trim()
                            .to_string()
                    }
                    _ => lexer::expand_variables(&call, &self.env),
                },
                Argument::Text(text) => text,
            };
            values.push(value);
        }
        Ok(values)
    }

    fn enter_guard(&self) -> Result<ExecutionGuard, ShellError> {
        self.state
            .enter()
            .map_err(|err| ShellError::execution(err.to_string(), Duration::ZERO))
    }

    fn run_module_for_pipe(
        &mut self,
        name: &str,
        mut args: HashMap<String, String>,
        stream: bool,
    ) -> Result<String, ShellError> {
        pipeline::merge_environment(&mut args, self.env.snapshot());
        if stream {
            let result = self.run_module(name, &args)?;
            return Ok(result.output.trim().to_string());
        }
        self.run_module_capturing(name, &args)
    }

    /// Run a module with its console output redirected into memory.
    ///
    /// When the capture is already taken the module runs uncaptured and its
    /// structured output is used instead.
    pub fn run_module_capturing(
        &mut self,
        name: &str,
        args: &HashMap<String, String>,
    ) -> Result<String, ShellError> {
        let guard = self.enter_guard()?;
        let output = match self.capture.acquire() {
            Ok(mut sink) => {
                self.modules.execute(name, args, &mut sink, &guard)?;
                sink.captured()
            }
            Err(err) => {
                tracing::warn!(target: "pipeline", %err, "running module uncaptured");
                self.modules
                    .execute(name, args, &mut *self.out, &guard)?
                    .output
            }
        };
        Ok(output.trim().to_string())
    }

    fn run_module(&mut self, name: &str, args: &HashMap<String, String>) -> Result<ModuleOutput, ShellError> {
        let guard = self.enter_guard()?;
        self.out.flush()?;
        Ok(self.modules.execute(name, args, &mut *self.out, &guard)?)
    }

    fn run_module_invocation(&mut self, name: &str, raw_args: &str) -> Result<(), ShellError> {
        self.modules.get(name)?;
        let values = self.evaluate_arguments(raw_args)?;
        let mut args = pipeline::module_args(&values);
        pipeline::merge_environment(&mut args, self.env.snapshot());

        display::info(&mut *self.out, &format!("Running module {name}"))?;
        let result = self.run_module(name, &args)?;
        display::success(
            &mut *self.out,
            &format!("Module {name} completed in {}", format_duration(result.elapsed)),
        )?;
        Ok(())
    }

    fn run_meta(&mut self, command: MetaCommand, args: &[String]) -> Result<(), ShellError> {
        let out = &mut *self.out;
        match command {
            MetaCommand::Help => match args.first() {
                Some(name) => match self.builtins.usage(name) {
                    Some(usage) => write!(out, "{usage}")?,
                    None => return Err(ShellError::Lookup {
                        kind: "builtin",
                        name: name.clone(),
                    }),
                },
                None => display::help(out, &self.builtins)?,
            },
            MetaCommand::List => {
                let modules = self.modules.list();
                if modules.is_empty() {
                    display::warning(out, "No modules loaded.")?;
                } else {
                    display::module_list(out, &format!("AVAILABLE MODULES ({})", modules.len()), &modules)?;
                    display::success(out, &format!("Total: {} modules loaded", modules.len()))?;
                }
            }
            MetaCommand::Env => {
                if self.env.is_empty() {
                    display::warning(out, "No environment variables set")?;
                } else {
                    display::environment(out, &self.env.snapshot())?;
                }
            }
            MetaCommand::Search => {
                if args.is_empty() {
                    return Err(ShellError::Usage("search <keyword>"));
                }
                let keyword = args.join(" ");
                let found: Vec<_> = self
                    .modules
                    .list()
                    .into_iter()
                    .filter(|m| m.matches(&keyword))
                    .collect();
                if found.is_empty() {
                    display::warning(out, &format!("No modules found for '{keyword}'"))?;
                } else {
                    display::module_list(out, &format!("SEARCH: {keyword} ({} results)", found.len()), &found)?;
                    display::success(out, &format!("Found {} module(s)", found.len()))?;
                }
            }
            MetaCommand::Info => {
                let name = args.first().ok_or(ShellError::Usage("info <module>"))?;
                display::module_info(out, self.modules.get(name)?)?;
            }
            MetaCommand::Run => {
                let (name, rest) = args.split_first().ok_or(ShellError::Usage("run <module> [args...]"))?;
                let rest = rest.join(" ");
                return self.run_module_invocation(name, &rest);
            }
            MetaCommand::Create => {
                let name = args.first().ok_or(ShellError::Usage("create <name> [python|bash]"))?;
                let kind = match args.get(1) {
                    None => ModuleKind::Python,
                    Some(kind) => ModuleKind::from_name(kind).ok_or(ShellError::Usage("create <name> [python|bash]"))?,
                };
                let entry = self.modules.create(name, kind)?;
                display::success(out, &format!("Created {kind} module {name} at {}", entry.display()))?;
            }
            MetaCommand::Edit => {
                let name = args.first().ok_or(ShellError::Usage("edit <module>"))?;
                return self.edit_module(name);
            }
            MetaCommand::Delete => {
                let name = args.first().ok_or(ShellError::Usage("delete <module>"))?;
                self.modules.get(name)?;
                if (self.confirm)(&format!("Delete module '{name}'? [y/N] ")) {
                    self.modules.remove(name)?;
                    display::success(&mut *self.out, &format!("Deleted module {name}"))?;
                } else {
                    display::info(&mut *self.out, "Cancelled")?;
                }
            }
            MetaCommand::History => {
                if self.history.is_empty() {
                    display::warning(out, "No command history")?;
                } else {
                    display::history(out, &self.history)?;
                }
            }
            MetaCommand::Clear => write!(out, "\x1B[2J\x1B[H")?,
            MetaCommand::Refresh => {
                display::info(out, "Refreshing modules...")?;
                let count = self.modules.discover()?;
                display::success(out, &format!("Modules refreshed, loaded {count} module(s)"))?;
            }
            MetaCommand::Import => {
                let [dir] = args else {
                    return Err(ShellError::Usage("import /path/to/modules"));
                };
                let count = self.modules.import(&expand_home(dir))?;
                if count == 0 {
                    display::warning(out, "No valid modules found")?;
                } else {
                    display::success(out, &format!("Imported {count} modules (temporary)"))?;
                }
            }
            MetaCommand::Exit => {
                self.env.should_exit = true;
                display::success(out, "Goodbye!")?;
            }
        }
        Ok(())
    }

    fn edit_module(&mut self, name: &str) -> Result<(), ShellError> {
        let entry = self.modules.get(name)?.entry.clone();
        let editor = self
            .env
            .lookup("VISUAL")
            .or_else(|| self.env.lookup("EDITOR"))
            .unwrap_or_else(|| "vi".to_string());
        display::info(&mut *self.out, &format!("Opening {} with {editor}", entry.display()))?;
        self.out.flush()?;

        let status = Command::new(&editor).arg(&entry).status()?;
        if !status.success() {
            return Err(ShellError::execution(
                format!("{editor} exited with {status}"),
                Duration::ZERO,
            ));
        }
        self.modules.discover()?;
        Ok(())
    }
}

/// Number of values in `start..=end`, exact over the whole `i64` range.
fn iteration_count(start: i64, end: i64) -> i128 {
    i128::from(end) - i128::from(start) + 1
}

fn confirm_with_editor(prompt: &str) -> bool {
    DefaultEditor::new()
        .and_then(|mut rl| rl.readline(prompt))
        .map(|answer| matches!(answer.trim(), "y" | "Y" | "yes"))
        .unwrap_or(false)
}
