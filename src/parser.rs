//! Line classification: turns one raw input line into a [`ParsedCommand`].

use crate::lexer::split_call;
use regex::Regex;
use std::sync::LazyLock;

/// The pipe operator separating chain stages.
pub const PIPE: &str = "|>";

static FOR_LOOP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^for\s+(?P<var>\S+)\s+in\s+(?P<range>.+?)\s+->\s+(?P<body>.+)$")
        .expect("for-loop pattern is valid")
});

/// Errors that can occur while classifying a line.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Nothing but whitespace.
    #[error("empty command")]
    Empty,
    /// The loop header did not match `for VAR in START..END -> COMMAND`.
    #[error("invalid for loop syntax, use: for VAR in 0..255 -> COMMAND")]
    InvalidLoop,
    /// A range bound was missing or not an integer.
    #[error("invalid range '{0}', use integers like 0..255")]
    InvalidRange(String),
    /// A `|>` had nothing on one of its sides.
    #[error("empty stage {index} in pipe chain")]
    EmptyStage {
        /// 1-based position of the empty stage.
        index: usize,
    },
}

/// One element of a pipe chain, or the target of a single invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawStage {
    /// A quoted literal, stored without the surrounding quotes and not yet unescaped.
    Literal(String),
    /// `name(args)`; `args` is the raw text between the parentheses.
    Call {
        /// The function or module name.
        name: String,
        /// Raw argument text.
        args: String,
    },
    /// `name key=value ...`; `args` is the raw text after the name.
    Bare {
        /// The module (or builtin) name.
        name: String,
        /// Raw argument text.
        args: String,
    },
}

impl RawStage {
    /// Classify stage text. Never fails: anything that is neither a literal nor a
    /// complete call expression is a bare invocation.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if let Some(inner) = strip_literal_quotes(text) {
            return Self::Literal(inner.to_string());
        }
        if let Some((name, args)) = split_call(text) {
            return Self::Call {
                name: name.to_string(),
                args: args.to_string(),
            };
        }
        let (name, args) = match text.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (text, ""),
        };
        Self::Bare {
            name: name.to_string(),
            args: args.to_string(),
        }
    }

    /// The invoked name; literals have none.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Literal(_) => None,
            Self::Call { name, .. } | Self::Bare { name, .. } => Some(name),
        }
    }

    /// Render back to source text.
    pub fn to_source(&self) -> String {
        match self {
            Self::Literal(inner) => format!("\"{inner}\""),
            Self::Call { name, args } => format!("{name}({args})"),
            Self::Bare { name, args } if args.is_empty() => name.clone(),
            Self::Bare { name, args } => format!("{name} {args}"),
        }
    }
}

/// Only the outer characters are checked, so `"a" x "b"` is the single
/// literal `a" x "b`.
fn strip_literal_quotes(text: &str) -> Option<&str> {
    let mut chars = text.chars();
    let first = chars.next()?;
    let last = chars.next_back()?;
    if (first == '"' || first == '\'') && first == last {
        Some(&text[1..text.len() - 1])
    } else {
        None
    }
}

/// Meta-commands handled by the interpreter itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaCommand {
    /// `help`, `h`, `?`
    Help,
    /// `list`, `ls`
    List,
    /// `env`, `envs`
    Env,
    /// `search <keyword>`
    Search,
    /// `info <module>` or `<module>!`
    Info,
    /// `run <module> [args]`
    Run,
    /// `create <name> [python|bash]`
    Create,
    /// `edit <module>`
    Edit,
    /// `delete <module>`
    Delete,
    /// `history`
    History,
    /// `clear`, `cls`
    Clear,
    /// `refresh`, `reload`
    Refresh,
    /// `import <dir>`
    Import,
    /// `exit`, `quit`, `q`
    Exit,
}

impl MetaCommand {
    /// Match the first word of a line against the meta-command table.
    pub fn from_word(word: &str) -> Option<Self> {
        let cmd = match word {
            "help" | "h" | "?" => Self::Help,
            "list" | "ls" => Self::List,
            "env" | "envs" => Self::Env,
            "search" => Self::Search,
            "info" => Self::Info,
            "run" => Self::Run,
            "create" | "new" => Self::Create,
            "edit" => Self::Edit,
            "delete" | "remove" | "rm" => Self::Delete,
            "history" => Self::History,
            "clear" | "cls" => Self::Clear,
            "refresh" | "reload" => Self::Refresh,
            "import" | "include" => Self::Import,
            "exit" | "quit" | "q" => Self::Exit,
            _ => return None,
        };
        Some(cmd)
    }
}

/// A classified input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedCommand {
    /// `key=value`
    Assignment {
        /// Variable name.
        key: String,
        /// New value.
        value: String,
    },
    /// `key=?`
    View {
        /// Variable name.
        key: String,
    },
    /// `$ command`, with the `$` and surrounding whitespace removed.
    ShellPassthrough {
        /// The command handed to the system shell.
        raw: String,
    },
    /// `for var in start..end -> body`
    ForLoop {
        /// Loop variable name, referenced as `$var` in the body.
        var: String,
        /// First value (inclusive).
        start: i64,
        /// Last value (inclusive).
        end: i64,
        /// Command template.
        body: String,
    },
    /// `stage |> stage |> ...`
    PipeChain {
        /// Stages in execution order.
        stages: Vec<RawStage>,
    },
    /// A single builtin call, module invocation or literal.
    Invocation(RawStage),
    /// One of the [`MetaCommand`]s with its whitespace-separated arguments.
    Meta {
        /// Which meta-command.
        command: MetaCommand,
        /// Remaining words.
        args: Vec<String>,
    },
}

/// Whether `line` has the shape of a for loop.
pub fn is_for_loop(line: &str) -> bool {
    line.starts_with("for ") && line.contains(" in ") && line.contains(" -> ")
}

/// Classify one line. Classification order is fixed and the first match wins.
pub fn parse_command(line: &str) -> Result<ParsedCommand, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ParseError::Empty);
    }

    if is_for_loop(line) {
        return parse_for_loop(line);
    }

    if line.contains(PIPE) {
        let stages = split_pipeline(line)?
            .iter()
            .map(|stage| RawStage::parse(stage))
            .collect();
        return Ok(ParsedCommand::PipeChain { stages });
    }

    if line.contains('=') && !line.chars().any(char::is_whitespace) {
        if let Some((key, value)) = line.split_once('=') {
            if value == "?" {
                return Ok(ParsedCommand::View {
                    key: key.to_string(),
                });
            }
            return Ok(ParsedCommand::Assignment {
                key: key.to_string(),
                value: value.to_string(),
            });
        }
    }

    if let Some(rest) = line.strip_prefix('$') {
        return Ok(ParsedCommand::ShellPassthrough {
            raw: rest.trim().to_string(),
        });
    }

    let mut words = line.split_whitespace();
    let first = words.next().ok_or(ParseError::Empty)?;
    if let Some(command) = MetaCommand::from_word(first) {
        return Ok(ParsedCommand::Meta {
            command,
            args: words.map(str::to_string).collect(),
        });
    }
    if let Some(module) = first.strip_suffix('!').filter(|m| !m.is_empty()) {
        return Ok(ParsedCommand::Meta {
            command: MetaCommand::Info,
            args: vec![module.to_string()],
        });
    }

    Ok(ParsedCommand::Invocation(RawStage::parse(line)))
}

/// Parse `for VAR in START..END -> COMMAND`.
pub fn parse_for_loop(line: &str) -> Result<ParsedCommand, ParseError> {
    let caps = FOR_LOOP.captures(line.trim()).ok_or(ParseError::InvalidLoop)?;
    let range = caps["range"].trim();
    let (start, end) = range
        .split_once("..")
        .filter(|(_, end)| !end.contains(".."))
        .ok_or_else(|| ParseError::InvalidRange(range.to_string()))?;
    let parse_bound = |bound: &str| {
        bound
            .trim()
            .parse::<i64>()
            .map_err(|_| ParseError::InvalidRange(range.to_string()))
    };
    Ok(ParsedCommand::ForLoop {
        var: caps["var"].to_string(),
        start: parse_bound(start)?,
        end: parse_bound(end)?,
        body: caps["body"].trim().to_string(),
    })
}

/// Split a line on `|>` outside of quotes. Every stage must be non-empty.
pub fn split_pipeline(line: &str) -> Result<Vec<String>, ParseError> {
    let mut stages = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match quote {
            Some(q) => {
                current.push(ch);
                if ch == '\\' {
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                } else if ch == q {
                    quote = None;
                }
            }
            None => match ch {
                '|' if chars.peek() == Some(&'>') => {
                    chars.next();
                    stages.push(std::mem::take(&mut current));
                }
                '"' | '\'' => {
                    quote = Some(ch);
                    current.push(ch);
                }
                c => current.push(c),
            },
        }
    }
    stages.push(current);

    stages
        .into_iter()
        .enumerate()
        .map(|(idx, stage)| {
            let stage = stage.trim();
            if stage.is_empty() {
                Err(ParseError::EmptyStage { index: idx + 1 })
            } else {
                Ok(stage.to_string())
            }
        })
        .collect()
}
