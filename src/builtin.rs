pub use crate::command::BuiltinError;
use crate::command::{CommandFactory, ExecutableCommand};
use crate::env::Environment;
use crate::external::find_command_path;
use anyhow::{Context, Result, anyhow, bail};
use argh::{EarlyExit, FromArgs};
use base64::{Engine as _, engine::general_purpose};
use md5::Md5;
use rand::Rng;
use rand::distr::Alphanumeric;
use regex::Regex;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::ffi::OsStr;
use std::fmt::Write as _;
use std::fs;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

/// Built-in functions known to the interpreter at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed directly
/// in-process. Every builtin maps its arguments to a single string result.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the function, e.g. "sha256" or "cat".
    fn name() -> &'static str;

    /// One-line description shown by `help`.
    fn summary() -> &'static str;

    /// Compute the result.
    fn run(self, env: &mut Environment) -> Result<String>;
}

impl<T: BuiltinCommand> ExecutableCommand for T {
    fn execute(self: Box<Self>, env: &mut Environment) -> Result<String, BuiltinError> {
        T::run(*self, env).map_err(|source| BuiltinError::Failed {
            name: T::name(),
            source,
        })
    }
}

struct InvalidArgs {
    name: &'static str,
    output: String,
    is_error: bool,
}

impl ExecutableCommand for InvalidArgs {
    fn execute(self: Box<Self>, _env: &mut Environment) -> Result<String, BuiltinError> {
        if self.is_error {
            Err(BuiltinError::InvalidArgs {
                name: self.name,
                message: self.output.trim().to_string(),
            })
        } else {
            Ok(self.output)
        }
    }
}

/// Factory allows creating instances of a builtin by name.
pub(crate) struct Factory<T> {
    _phantom: std::marker::PhantomData<T>,
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self {
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<T: BuiltinCommand + 'static> CommandFactory for Factory<T> {
    fn name(&self) -> &'static str {
        T::name()
    }

    fn summary(&self) -> &'static str {
        T::summary()
    }

    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>> {
        if name != T::name() {
            return None;
        }
        // Everything after `--` is positional, so data like "-5" never parses as a flag.
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push("--");
        argv.extend_from_slice(args);
        Some(match T::from_args(&[name], &argv) {
            Ok(cmd) => Box::new(cmd),
            Err(EarlyExit { output, status }) => Box::new(InvalidArgs {
                name: T::name(),
                output,
                is_error: status.is_err(),
            }),
        })
    }

    fn usage(&self) -> String {
        match T::from_args(&[T::name()], &["--help"]) {
            Ok(_) => String::new(),
            Err(EarlyExit { output, .. }) => output,
        }
    }
}

/// Name-based dispatch over the builtin library.
pub struct BuiltinDispatcher {
    commands: Vec<Box<dyn CommandFactory>>,
}

impl BuiltinDispatcher {
    /// Run builtin `name` with positional `args`.
    pub fn execute(
        &self,
        name: &str,
        args: &[String],
        env: &mut Environment,
    ) -> Result<String, BuiltinError> {
        let args_ref: Vec<&str> = args.iter().map(String::as_str).collect();
        let cmd = self
            .commands
            .iter()
            .find_map(|factory| factory.try_create(name, &args_ref))
            .ok_or_else(|| BuiltinError::NotFound(name.to_string()))?;
        tracing::debug!(target: "builtins", name, ?args, "executing builtin");
        cmd.execute(env)
    }

    /// Whether a builtin with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.commands.iter().any(|f| f.name() == name)
    }

    /// `(name, summary)` for every builtin, in registration order.
    pub fn list(&self) -> impl Iterator<Item = (&'static str, &'static str)> + '_ {
        self.commands.iter().map(|f| (f.name(), f.summary()))
    }

    /// Usage text of one builtin.
    pub fn usage(&self, name: &str) -> Option<String> {
        self.commands
            .iter()
            .find(|f| f.name() == name)
            .map(|f| f.usage())
    }
}

impl Default for BuiltinDispatcher {
    /// The complete builtin library.
    fn default() -> Self {
        Self {
            commands: vec![
                Box::new(Factory::<Pwd>::default()),
                Box::new(Factory::<Cd>::default()),
                Box::new(Factory::<Ls>::default()),
                Box::new(Factory::<Cat>::default()),
                Box::new(Factory::<ReadFile>::default()),
                Box::new(Factory::<WriteFile>::default()),
                Box::new(Factory::<Mkdir>::default()),
                Box::new(Factory::<Rm>::default()),
                Box::new(Factory::<Cp>::default()),
                Box::new(Factory::<Mv>::default()),
                Box::new(Factory::<Whoami>::default()),
                Box::new(Factory::<Hostname>::default()),
                Box::new(Factory::<Uname>::default()),
                Box::new(Factory::<Date>::default()),
                Box::new(Factory::<EnvVars>::default()),
                Box::new(Factory::<Which>::default()),
                Box::new(Factory::<Echo>::default()),
                Box::new(Factory::<Md5Sum>::default()),
                Box::new(Factory::<Sha1Sum>::default()),
                Box::new(Factory::<Sha256Sum>::default()),
                Box::new(Factory::<Base64>::default()),
                Box::new(Factory::<Hex>::default()),
                Box::new(Factory::<UrlEncode>::default()),
                Box::new(Factory::<Json>::default()),
                Box::new(Factory::<Strlen>::default()),
                Box::new(Factory::<ToUpper>::default()),
                Box::new(Factory::<ToLower>::default()),
                Box::new(Factory::<Reverse>::default()),
                Box::new(Factory::<Trim>::default()),
                Box::new(Factory::<Calc>::default()),
                Box::new(Factory::<Sleep>::default()),
                Box::new(Factory::<Timestamp>::default()),
                Box::new(Factory::<Uuid>::default()),
                Box::new(Factory::<RandomStr>::default()),
                Box::new(Factory::<Nslookup>::default()),
                Box::new(Factory::<IpAddr>::default()),
                Box::new(Factory::<Ping>::default()),
            ],
        }
    }
}

fn resolve(env: &Environment, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        env.current_dir.join(path)
    }
}

fn joined(name: &str, input: &[String]) -> Result<String> {
    if input.is_empty() {
        bail!("{name} requires input");
    }
    Ok(input.join(" "))
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().fold(String::new(), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

/// Render `time` with a user-supplied strftime `format`, rejecting unknown specifiers.
fn strftime<Tz>(time: &chrono::DateTime<Tz>, format: &str) -> Result<String>
where
    Tz: chrono::TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let mut out = String::new();
    write!(out, "{}", time.format(format)).map_err(|_| anyhow!("invalid format '{format}'"))?;
    Ok(out)
}

fn digest<D: Digest>(name: &str, input: &[String]) -> Result<String> {
    let data = joined(name, input)?;
    Ok(hex_string(&D::digest(data.as_bytes())))
}

// File system

#[derive(FromArgs)]
/// print the current working directory
pub struct Pwd {}

impl BuiltinCommand for Pwd {
    fn name() -> &'static str {
        "pwd"
    }

    fn summary() -> &'static str {
        "Print current working directory"
    }

    fn run(self, env: &mut Environment) -> Result<String> {
        Ok(env.current_dir.to_string_lossy().into_owned())
    }
}

#[derive(FromArgs)]
/// change the working directory and return the new path
pub struct Cd {
    #[argh(positional)]
    /// directory to switch to; defaults to $HOME when omitted.
    pub target: Option<String>,
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn summary() -> &'static str {
        "Change directory (returns new path)"
    }

    fn run(self, env: &mut Environment) -> Result<String> {
        let target = match self.target.filter(|t| !t.is_empty()) {
            Some(t) => resolve(env, &t),
            None => env
                .lookup("HOME")
                .map(PathBuf::from)
                .ok_or_else(|| anyhow!("no target and HOME not set"))?,
        };

        let canonical = fs::canonicalize(&target)
            .with_context(|| format!("can't canonicalize {}", target.display()))?;
        if !canonical.is_dir() {
            bail!("{} is not a directory", canonical.display());
        }
        env.current_dir = canonical;
        Ok(env.current_dir.to_string_lossy().into_owned())
    }
}

#[derive(FromArgs)]
/// list directory contents, directories get a trailing slash
pub struct Ls {
    #[argh(positional)]
    /// directory to list; defaults to the working directory.
    pub dir: Option<String>,
}

impl BuiltinCommand for Ls {
    fn name() -> &'static str {
        "ls"
    }

    fn summary() -> &'static str {
        "List directory contents"
    }

    fn run(self, env: &mut Environment) -> Result<String> {
        let dir = resolve(env, self.dir.as_deref().unwrap_or("."));
        let mut names = Vec::new();
        for entry in fs::read_dir(&dir).with_context(|| format!("{}", dir.display()))? {
            let entry = entry?;
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type()?.is_dir() {
                name.push('/');
            }
            names.push(name);
        }
        names.sort();
        Ok(names.join("\n"))
    }
}

#[derive(FromArgs)]
/// read a text file
pub struct Cat {
    #[argh(positional)]
    /// file to read.
    pub path: String,
}

impl BuiltinCommand for Cat {
    fn name() -> &'static str {
        "cat"
    }

    fn summary() -> &'static str {
        "Read file contents"
    }

    fn run(self, env: &mut Environment) -> Result<String> {
        let path = resolve(env, &self.path);
        fs::read_to_string(&path).with_context(|| format!("{}", path.display()))
    }
}

#[derive(FromArgs)]
/// read any file, replacing invalid UTF-8
pub struct ReadFile {
    #[argh(positional)]
    /// file to read.
    pub path: String,
}

impl BuiltinCommand for ReadFile {
    fn name() -> &'static str {
        "readfile"
    }

    fn summary() -> &'static str {
        "Read file and return content"
    }

    fn run(self, env: &mut Environment) -> Result<String> {
        let path = resolve(env, &self.path);
        let bytes = fs::read(&path).with_context(|| format!("{}", path.display()))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[derive(FromArgs)]
/// write text to a file and report where it went
pub struct WriteFile {
    #[argh(positional)]
    /// destination file.
    pub path: String,

    #[argh(positional, greedy)]
    /// content to write, joined by spaces.
    pub content: Vec<String>,
}

impl BuiltinCommand for WriteFile {
    fn name() -> &'static str {
        "file"
    }

    fn summary() -> &'static str {
        "Save input to a file"
    }

    fn run(self, env: &mut Environment) -> Result<String> {
        let path = resolve(env, &self.path);
        let content = self.content.join(" ");
        fs::write(&path, &content).with_context(|| format!("{}", path.display()))?;
        Ok(format!("Saved {} bytes to {}", content.len(), path.display()))
    }
}

#[derive(FromArgs)]
/// create a directory and any missing parents
pub struct Mkdir {
    #[argh(positional)]
    /// directory to create.
    pub path: String,
}

impl BuiltinCommand for Mkdir {
    fn name() -> &'static str {
        "mkdir"
    }

    fn summary() -> &'static str {
        "Create directory"
    }

    fn run(self, env: &mut Environment) -> Result<String> {
        let path = resolve(env, &self.path);
        fs::create_dir_all(&path).with_context(|| format!("{}", path.display()))?;
        Ok(format!("Directory '{}' created", self.path))
    }
}

#[derive(FromArgs)]
/// remove a file or a whole directory tree; a missing path is not an error
pub struct Rm {
    #[argh(positional)]
    /// file or directory to remove.
    pub path: String,
}

impl BuiltinCommand for Rm {
    fn name() -> &'static str {
        "rm"
    }

    fn summary() -> &'static str {
        "Remove file or directory"
    }

    fn run(self, env: &mut Environment) -> Result<String> {
        let path = resolve(env, &self.path);
        let removed = match fs::symlink_metadata(&path) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&path),
            Ok(_) => fs::remove_file(&path),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        };
        removed.with_context(|| format!("{}", path.display()))?;
        Ok(format!("Removed '{}'", self.path))
    }
}

#[derive(FromArgs)]
/// copy a file
pub struct Cp {
    #[argh(positional)]
    /// file to copy.
    pub source: String,
    #[argh(positional)]
    /// destination path.
    pub dest: String,
}

impl BuiltinCommand for Cp {
    fn name() -> &'static str {
        "cp"
    }

    fn summary() -> &'static str {
        "Copy file"
    }

    fn run(self, env: &mut Environment) -> Result<String> {
        let (from, to) = (resolve(env, &self.source), resolve(env, &self.dest));
        fs::copy(&from, &to)
            .with_context(|| format!("{} -> {}", from.display(), to.display()))?;
        Ok(format!("Copied '{}' to '{}'", self.source, self.dest))
    }
}

#[derive(FromArgs)]
/// move or rename a file
pub struct Mv {
    #[argh(positional)]
    /// path to move.
    pub source: String,
    #[argh(positional)]
    /// new path.
    pub dest: String,
}

impl BuiltinCommand for Mv {
    fn name() -> &'static str {
        "mv"
    }

    fn summary() -> &'static str {
        "Move or rename file"
    }

    fn run(self, env: &mut Environment) -> Result<String> {
        let (from, to) = (resolve(env, &self.source), resolve(env, &self.dest));
        fs::rename(&from, &to)
            .with_context(|| format!("{} -> {}", from.display(), to.display()))?;
        Ok(format!("Moved '{}' to '{}'", self.source, self.dest))
    }
}

// System information

#[derive(FromArgs)]
/// print the current user name
pub struct Whoami {}

impl BuiltinCommand for Whoami {
    fn name() -> &'static str {
        "whoami"
    }

    fn summary() -> &'static str {
        "Get current user"
    }

    fn run(self, _env: &mut Environment) -> Result<String> {
        Ok(whoami::username())
    }
}

#[derive(FromArgs)]
/// print the system host name
pub struct Hostname {}

impl BuiltinCommand for Hostname {
    fn name() -> &'static str {
        "hostname"
    }

    fn summary() -> &'static str {
        "Get system hostname"
    }

    fn run(self, _env: &mut Environment) -> Result<String> {
        Ok(whoami::fallible::hostname()?)
    }
}

#[derive(FromArgs)]
/// operating system, host name, distribution and architecture on one line
pub struct Uname {}

impl BuiltinCommand for Uname {
    fn name() -> &'static str {
        "uname"
    }

    fn summary() -> &'static str {
        "Get system information"
    }

    fn run(self, _env: &mut Environment) -> Result<String> {
        let host = whoami::fallible::hostname().unwrap_or_else(|_| "unknown".to_string());
        Ok(format!(
            "{} {host} {} {}",
            whoami::platform(),
            whoami::distro(),
            whoami::arch()
        ))
    }
}

#[derive(FromArgs)]
/// print the local date and time
pub struct Date {
    #[argh(positional)]
    /// strftime format; defaults to "%Y-%m-%d %H:%M:%S".
    pub format: Option<String>,
}

impl BuiltinCommand for Date {
    fn name() -> &'static str {
        "date"
    }

    fn summary() -> &'static str {
        "Get current date and time"
    }

    fn run(self, _env: &mut Environment) -> Result<String> {
        let format = self.format.as_deref().unwrap_or("%Y-%m-%d %H:%M:%S");
        strftime(&chrono::Local::now(), format)
    }
}

#[derive(FromArgs)]
/// print the process environment as KEY=VALUE lines
pub struct EnvVars {}

impl BuiltinCommand for EnvVars {
    fn name() -> &'static str {
        "env"
    }

    fn summary() -> &'static str {
        "Show process environment variables"
    }

    fn run(self, _env: &mut Environment) -> Result<String> {
        let mut vars: Vec<String> = std::env::vars().map(|(k, v)| format!("{k}={v}")).collect();
        vars.sort();
        Ok(vars.join("\n"))
    }
}

#[derive(FromArgs)]
/// locate a command on PATH
pub struct Which {
    #[argh(positional)]
    /// command name.
    pub command: String,
}

impl BuiltinCommand for Which {
    fn name() -> &'static str {
        "which"
    }

    fn summary() -> &'static str {
        "Find command location"
    }

    fn run(self, env: &mut Environment) -> Result<String> {
        let paths = env.lookup("PATH").unwrap_or_default();
        find_command_path(OsStr::new(&paths), Path::new(&self.command))
            .map(|p| p.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow!("{} not found", self.command))
    }
}

#[derive(FromArgs)]
/// join the arguments with spaces
pub struct Echo {
    #[argh(positional, greedy)]
    /// values to print as-is, separated by spaces.
    pub args: Vec<String>,
}

impl BuiltinCommand for Echo {
    fn name() -> &'static str {
        "echo"
    }

    fn summary() -> &'static str {
        "Print text"
    }

    fn run(self, _env: &mut Environment) -> Result<String> {
        Ok(self.args.join(" "))
    }
}

// Hashing and encoding

#[derive(FromArgs)]
/// md5 digest of the input, lowercase hex
pub struct Md5Sum {
    #[argh(positional, greedy)]
    /// text to hash, joined by spaces.
    pub input: Vec<String>,
}

impl BuiltinCommand for Md5Sum {
    fn name() -> &'static str {
        "md5"
    }

    fn summary() -> &'static str {
        "MD5 hash"
    }

    fn run(self, _env: &mut Environment) -> Result<String> {
        digest::<Md5>(Self::name(), &self.input)
    }
}

#[derive(FromArgs)]
/// sha1 digest of the input, lowercase hex
pub struct Sha1Sum {
    #[argh(positional, greedy)]
    /// text to hash, joined by spaces.
    pub input: Vec<String>,
}

impl BuiltinCommand for Sha1Sum {
    fn name() -> &'static str {
        "sha1"
    }

    fn summary() -> &'static str {
        "SHA1 hash"
    }

    fn run(self, _env: &mut Environment) -> Result<String> {
        digest::<Sha1>(Self::name(), &self.input)
    }
}

#[derive(FromArgs)]
/// sha256 digest of the input, lowercase hex
pub struct Sha256Sum {
    #[argh(positional, greedy)]
    /// text to hash, joined by spaces.
    pub input: Vec<String>,
}

impl BuiltinCommand for Sha256Sum {
    fn name() -> &'static str {
        "sha256"
    }

    fn summary() -> &'static str {
        "SHA256 hash"
    }

    fn run(self, _env: &mut Environment) -> Result<String> {
        digest::<Sha256>(Self::name(), &self.input)
    }
}

#[derive(FromArgs)]
/// decode base64 input when it is valid base64 of UTF-8 text, otherwise encode it
pub struct Base64 {
    #[argh(positional, greedy)]
    /// text to encode or decode.
    pub input: Vec<String>,
}

impl BuiltinCommand for Base64 {
    fn name() -> &'static str {
        "base64"
    }

    fn summary() -> &'static str {
        "Base64 encode/decode"
    }

    fn run(self, _env: &mut Environment) -> Result<String> {
        let input = joined(Self::name(), &self.input)?;
        let decoded = general_purpose::STANDARD
            .decode(input.as_bytes())
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok());
        Ok(decoded.unwrap_or_else(|| general_purpose::STANDARD.encode(input.as_bytes())))
    }
}

#[derive(FromArgs)]
/// decode hex input when it is valid hex of UTF-8 text, otherwise encode it
pub struct Hex {
    #[argh(positional, greedy)]
    /// text to encode or decode.
    pub input: Vec<String>,
}

impl Hex {
    fn decode(input: &str) -> Option<String> {
        if input.len() % 2 != 0 || !input.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        let bytes = (0..input.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&input[i..i + 2], 16))
            .collect::<Result<Vec<u8>, _>>()
            .ok()?;
        String::from_utf8(bytes).ok()
    }
}

impl BuiltinCommand for Hex {
    fn name() -> &'static str {
        "hex"
    }

    fn summary() -> &'static str {
        "Hex encode/decode"
    }

    fn run(self, _env: &mut Environment) -> Result<String> {
        let input = joined(Self::name(), &self.input)?;
        Ok(Self::decode(&input).unwrap_or_else(|| hex_string(input.as_bytes())))
    }
}

static URL_UNSAFE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9\-_.]").expect("url pattern is valid"));

#[derive(FromArgs)]
/// percent-encode everything except letters, digits, '-', '_' and '.'
pub struct UrlEncode {
    #[argh(positional, greedy)]
    /// text to encode.
    pub input: Vec<String>,
}

impl BuiltinCommand for UrlEncode {
    fn name() -> &'static str {
        "url"
    }

    fn summary() -> &'static str {
        "URL encode"
    }

    fn run(self, _env: &mut Environment) -> Result<String> {
        let input = joined(Self::name(), &self.input)?;
        let encoded = URL_UNSAFE.replace_all(&input, |caps: &regex::Captures<'_>| {
            caps[0].bytes().fold(String::new(), |mut out, b| {
                let _ = write!(out, "%{b:02X}");
                out
            })
        });
        Ok(encoded.into_owned())
    }
}

#[derive(FromArgs)]
/// pretty-print a JSON document
pub struct Json {
    #[argh(positional, greedy)]
    /// JSON text.
    pub input: Vec<String>,
}

impl BuiltinCommand for Json {
    fn name() -> &'static str {
        "json"
    }

    fn summary() -> &'static str {
        "JSON format"
    }

    fn run(self, _env: &mut Environment) -> Result<String> {
        let input = joined(Self::name(), &self.input)?;
        let value: serde_json::Value = serde_json::from_str(&input).context("invalid JSON")?;
        Ok(serde_json::to_string_pretty(&value)?)
    }
}

// String operations

#[derive(FromArgs)]
/// number of characters in the input
pub struct Strlen {
    #[argh(positional, greedy)]
    /// text to measure, joined by spaces.
    pub input: Vec<String>,
}

impl BuiltinCommand for Strlen {
    fn name() -> &'static str {
        "strlen"
    }

    fn summary() -> &'static str {
        "Get string length"
    }

    fn run(self, _env: &mut Environment) -> Result<String> {
        Ok(joined(Self::name(), &self.input)?.chars().count().to_string())
    }
}

#[derive(FromArgs)]
/// convert the input to uppercase
pub struct ToUpper {
    #[argh(positional, greedy)]
    /// text to convert.
    pub input: Vec<String>,
}

impl BuiltinCommand for ToUpper {
    fn name() -> &'static str {
        "toupper"
    }

    fn summary() -> &'static str {
        "Convert to uppercase"
    }

    fn run(self, _env: &mut Environment) -> Result<String> {
        Ok(joined(Self::name(), &self.input)?.to_uppercase())
    }
}

#[derive(FromArgs)]
/// convert the input to lowercase
pub struct ToLower {
    #[argh(positional, greedy)]
    /// text to convert.
    pub input: Vec<String>,
}

impl BuiltinCommand for ToLower {
    fn name() -> &'static str {
        "tolower"
    }

    fn summary() -> &'static str {
        "Convert to lowercase"
    }

    fn run(self, _env: &mut Environment) -> Result<String> {
        Ok(joined(Self::name(), &self.input)?.to_lowercase())
    }
}

#[derive(FromArgs)]
/// reverse the input character by character
pub struct Reverse {
    #[argh(positional, greedy)]
    /// text to reverse.
    pub input: Vec<String>,
}

impl BuiltinCommand for Reverse {
    fn name() -> &'static str {
        "reverse"
    }

    fn summary() -> &'static str {
        "Reverse string"
    }

    fn run(self, _env: &mut Environment) -> Result<String> {
        Ok(joined(Self::name(), &self.input)?.chars().rev().collect())
    }
}

#[derive(FromArgs)]
/// strip surrounding whitespace
pub struct Trim {
    #[argh(positional, greedy)]
    /// text to trim.
    pub input: Vec<String>,
}

impl BuiltinCommand for Trim {
    fn name() -> &'static str {
        "trim"
    }

    fn summary() -> &'static str {
        "Trim whitespace"
    }

    fn run(self, _env: &mut Environment) -> Result<String> {
        Ok(joined(Self::name(), &self.input)?.trim().to_string())
    }
}

// Math, time and utilities

#[derive(FromArgs)]
/// evaluate `number operator number` with one of + - * / %
pub struct Calc {
    #[argh(positional)]
    /// left operand.
    pub lhs: String,
    #[argh(positional)]
    /// operator.
    pub op: String,
    #[argh(positional)]
    /// right operand.
    pub rhs: String,
}

impl BuiltinCommand for Calc {
    fn name() -> &'static str {
        "calc"
    }

    fn summary() -> &'static str {
        "Simple calculator"
    }

    fn run(self, _env: &mut Environment) -> Result<String> {
        let a: f64 = self.lhs.parse().context("invalid numbers")?;
        let b: f64 = self.rhs.parse().context("invalid numbers")?;
        let result = match self.op.as_str() {
            "+" => a + b,
            "-" => a - b,
            "*" => a * b,
            "/" if b == 0.0 => bail!("division by zero"),
            "/" => a / b,
            "%" if b.trunc() == 0.0 => bail!("division by zero"),
            "%" => a.trunc() % b.trunc(),
            op => bail!("unknown operator: {op}"),
        };
        if result.fract() == 0.0 && result.abs() < 1e15 {
            Ok(format!("{}", result as i64))
        } else {
            Ok(result.to_string())
        }
    }
}

#[derive(FromArgs)]
/// block for a number of seconds
pub struct Sleep {
    #[argh(positional)]
    /// seconds to sleep.
    pub seconds: u64,
}

impl BuiltinCommand for Sleep {
    fn name() -> &'static str {
        "sleep"
    }

    fn summary() -> &'static str {
        "Sleep for seconds"
    }

    fn run(self, _env: &mut Environment) -> Result<String> {
        std::thread::sleep(Duration::from_secs(self.seconds));
        Ok(format!("Slept for {} seconds", self.seconds))
    }
}

#[derive(FromArgs)]
/// current time as unix seconds, milli, nano, or a strftime format
pub struct Timestamp {
    #[argh(positional)]
    /// one of unix (default), milli, nano, or a strftime format.
    pub format: Option<String>,
}

impl BuiltinCommand for Timestamp {
    fn name() -> &'static str {
        "timestamp"
    }

    fn summary() -> &'static str {
        "Get current timestamp"
    }

    fn run(self, _env: &mut Environment) -> Result<String> {
        let now = chrono::Utc::now();
        Ok(match self.format.as_deref().unwrap_or("unix") {
            "unix" => now.timestamp().to_string(),
            "milli" => now.timestamp_millis().to_string(),
            "nano" => now
                .timestamp_nanos_opt()
                .ok_or_else(|| anyhow!("timestamp out of range"))?
                .to_string(),
            format => strftime(&now, format)?,
        })
    }
}

#[derive(FromArgs)]
/// generate a random version 4 UUID
pub struct Uuid {}

impl BuiltinCommand for Uuid {
    fn name() -> &'static str {
        "uuid"
    }

    fn summary() -> &'static str {
        "Generate UUID"
    }

    fn run(self, _env: &mut Environment) -> Result<String> {
        Ok(uuid::Uuid::new_v4().to_string())
    }
}

const MAX_RANDOM_LEN: usize = 64 * 1024;

#[derive(FromArgs)]
/// random alphanumeric string
pub struct RandomStr {
    #[argh(positional)]
    /// length, defaults to 16.
    pub length: Option<usize>,
}

impl BuiltinCommand for RandomStr {
    fn name() -> &'static str {
        "randomstr"
    }

    fn summary() -> &'static str {
        "Generate random string"
    }

    fn run(self, _env: &mut Environment) -> Result<String> {
        let length = self.length.unwrap_or(16);
        if length > MAX_RANDOM_LEN {
            bail!("length {length} exceeds the limit of {MAX_RANDOM_LEN}");
        }
        Ok(rand::rng()
            .sample_iter(&Alphanumeric)
            .take(length)
            .map(char::from)
            .collect())
    }
}

// Network

#[derive(FromArgs)]
/// resolve a host name to its IP addresses
pub struct Nslookup {
    #[argh(positional)]
    /// host to resolve.
    pub host: String,
}

impl BuiltinCommand for Nslookup {
    fn name() -> &'static str {
        "nslookup"
    }

    fn summary() -> &'static str {
        "DNS lookup"
    }

    fn run(self, _env: &mut Environment) -> Result<String> {
        let mut ips: Vec<String> = (self.host.as_str(), 0)
            .to_socket_addrs()
            .with_context(|| format!("lookup {}", self.host))?
            .map(|addr| addr.ip().to_string())
            .collect();
        ips.dedup();
        Ok(ips.join("\n"))
    }
}

#[derive(FromArgs)]
/// addresses the local host name resolves to, as `host: ip` lines
pub struct IpAddr {}

impl BuiltinCommand for IpAddr {
    fn name() -> &'static str {
        "ipaddr"
    }

    fn summary() -> &'static str {
        "Get IP addresses"
    }

    fn run(self, _env: &mut Environment) -> Result<String> {
        let host = whoami::fallible::hostname()?;
        let mut ips: Vec<String> = (host.as_str(), 0)
            .to_socket_addrs()
            .with_context(|| format!("lookup {host}"))?
            .map(|addr| addr.ip().to_string())
            .collect();
        ips.sort();
        ips.dedup();
        Ok(ips
            .iter()
            .map(|ip| format!("{host}: {ip}"))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

#[derive(FromArgs)]
/// check reachability with a TCP connect to port 80
pub struct Ping {
    #[argh(positional)]
    /// host to contact.
    pub host: String,
    #[argh(positional)]
    /// timeout in seconds, defaults to 5.
    pub timeout: Option<u64>,
}

impl BuiltinCommand for Ping {
    fn name() -> &'static str {
        "ping"
    }

    fn summary() -> &'static str {
        "Ping host"
    }

    fn run(self, _env: &mut Environment) -> Result<String> {
        let timeout = Duration::from_secs(self.timeout.unwrap_or(5));
        let attempt = (self.host.as_str(), 80)
            .to_socket_addrs()
            .and_then(|mut addrs| {
                addrs
                    .next()
                    .ok_or_else(|| std::io::Error::other("no address"))
            })
            .and_then(|addr| TcpStream::connect_timeout(&addr, timeout));
        Ok(match attempt {
            Ok(_) => format!("Ping to {} successful", self.host),
            Err(e) => format!("Ping failed: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn run(name: &str, args: &[&str]) -> Result<String, BuiltinError> {
        let dispatcher = BuiltinDispatcher::default();
        let mut env = Environment::new();
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        dispatcher.execute(name, &args, &mut env)
    }

    #[test]
    fn hashes_are_lowercase_hex() {
        assert_eq!(
            run("sha256", &["hello"]).unwrap(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(
            run("md5", &["hello"]).unwrap(),
            "5d41402abc4b2a76b9719d911017c592"
        );
        assert_eq!(
            run("sha1", &["hello"]).unwrap(),
            "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d"
        );
        // arguments are joined with single spaces
        assert_eq!(
            run("md5", &["hello", "world"]).unwrap(),
            run("md5", &["hello world"]).unwrap()
        );
    }

    #[test]
    fn hash_without_input_fails() {
        let err = run("sha256", &[]).unwrap_err();
        assert!(matches!(err, BuiltinError::Failed { name: "sha256", .. }));
        assert_eq!(err.to_string(), "sha256: sha256 requires input");
    }

    #[test]
    fn base64_and_hex_decode_or_encode() {
        assert_eq!(run("base64", &["hello"]).unwrap(), "aGVsbG8=");
        assert_eq!(run("base64", &["aGVsbG8="]).unwrap(), "hello");
        assert_eq!(run("hex", &["hi"]).unwrap(), "6869");
        assert_eq!(run("hex", &["6869"]).unwrap(), "hi");
    }

    #[test]
    fn url_encodes_reserved_characters() {
        assert_eq!(run("url", &["a b&c=d/é"]).unwrap(), "a%20b%26c%3Dd%2F%C3%A9");
    }

    #[test]
    fn string_helpers() {
        assert_eq!(run("toupper", &["abc"]).unwrap(), "ABC");
        assert_eq!(run("tolower", &["ABC"]).unwrap(), "abc");
        assert_eq!(run("reverse", &["héllo"]).unwrap(), "olléh");
        assert_eq!(run("strlen", &["héllo", "w"]).unwrap(), "7");
        assert_eq!(run("trim", &["  x  "]).unwrap(), "x");
        assert_eq!(run("echo", &["a", "-n", "b"]).unwrap(), "a -n b");
    }

    #[test]
    fn json_pretty_prints() {
        assert_eq!(
            run("json", &[r#"{"a":[1,2]}"#]).unwrap(),
            "{\n  \"a\": [\n    1,\n    2\n  ]\n}"
        );
        assert!(run("json", &["{nope"]).is_err());
    }

    #[test]
    fn calc_operations() {
        assert_eq!(run("calc", &["5", "+", "3"]).unwrap(), "8");
        assert_eq!(run("calc", &["-5", "*", "2"]).unwrap(), "-10");
        assert_eq!(run("calc", &["7", "/", "2"]).unwrap(), "3.5");
        assert_eq!(run("calc", &["7", "%", "4"]).unwrap(), "3");
        assert!(run("calc", &["1", "/", "0"]).is_err());
        assert!(run("calc", &["1", "^", "0"]).is_err());
    }

    #[test]
    fn missing_positional_is_invalid_args() {
        let err = run("calc", &["1"]).unwrap_err();
        assert!(matches!(err, BuiltinError::InvalidArgs { name: "calc", .. }));
        let err = run("cat", &[]).unwrap_err();
        assert!(matches!(err, BuiltinError::InvalidArgs { name: "cat", .. }));
    }

    #[test]
    fn unknown_builtin_is_not_found() {
        assert!(matches!(
            run("nope", &[]),
            Err(BuiltinError::NotFound(name)) if name == "nope"
        ));
    }

    #[test]
    fn file_round_trip_through_cat() -> Result<(), anyhow::Error> {
        let dir = tempfile::tempdir()?;
        let dispatcher = BuiltinDispatcher::default();
        let mut env = Environment::new();
        env.current_dir = dir.path().to_path_buf();

        let saved = dispatcher.execute(
            "file",
            &["out.txt".to_string(), "some".to_string(), "text".to_string()],
            &mut env,
        )?;
        assert!(saved.starts_with("Saved 9 bytes to "));
        assert_eq!(
            dispatcher.execute("cat", &["out.txt".to_string()], &mut env)?,
            "some text"
        );
        assert_eq!(dispatcher.execute("ls", &[], &mut env)?, "out.txt");
        assert!(
            dispatcher
                .execute("cat", &["missing.txt".to_string()], &mut env)
                .is_err()
        );
        Ok(())
    }

    #[test]
    fn mkdir_cp_mv_rm_work_in_current_dir() -> Result<(), anyhow::Error> {
        let dir = tempfile::tempdir()?;
        let dispatcher = BuiltinDispatcher::default();
        let mut env = Environment::new();
        env.current_dir = dir.path().to_path_buf();
        let mut exec = |name: &str, args: &[&str]| {
            let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
            dispatcher.execute(name, &args, &mut env)
        };

        assert_eq!(exec("mkdir", &["a/b"])?, "Directory 'a/b' created");
        assert!(dir.path().join("a/b").is_dir());

        fs::write(dir.path().join("src.txt"), "payload")?;
        assert_eq!(exec("cp", &["src.txt", "a/b/copy.txt"])?, "Copied 'src.txt' to 'a/b/copy.txt'");
        assert_eq!(fs::read_to_string(dir.path().join("a/b/copy.txt"))?, "payload");

        assert_eq!(exec("mv", &["src.txt", "moved.txt"])?, "Moved 'src.txt' to 'moved.txt'");
        assert!(!dir.path().join("src.txt").exists());
        assert!(dir.path().join("moved.txt").is_file());
        assert!(exec("mv", &["src.txt", "again.txt"]).is_err());
        assert!(exec("cp", &["only-one"]).is_err());

        assert_eq!(exec("rm", &["moved.txt"])?, "Removed 'moved.txt'");
        assert_eq!(exec("rm", &["a"])?, "Removed 'a'");
        assert!(!dir.path().join("a").exists());
        assert_eq!(exec("rm", &["never-existed"])?, "Removed 'never-existed'");
        Ok(())
    }

    #[test]
    fn uname_names_the_platform() {
        let text = run("uname", &[]).unwrap();
        assert!(text.starts_with(&whoami::platform().to_string()));
    }

    #[test]
    fn ipaddr_lines_are_host_prefixed() {
        // name resolution may be unavailable; it must fail cleanly then
        match run("ipaddr", &[]) {
            Ok(text) => {
                let host = whoami::fallible::hostname().unwrap();
                assert!(text.lines().all(|l| l.starts_with(&format!("{host}: "))));
            }
            Err(err) => assert!(matches!(err, BuiltinError::Failed { name: "ipaddr", .. })),
        }
    }

    #[test]
    fn unknown_strftime_specifier_is_an_error() {
        for name in ["date", "timestamp"] {
            let err = run(name, &["%Q"]).unwrap_err();
            assert!(matches!(err, BuiltinError::Failed { .. }), "{name}: {err}");
            assert!(err.to_string().contains("invalid format '%Q'"));
        }
        assert_eq!(run("date", &["%Y"]).unwrap().len(), 4);
        assert_eq!(run("timestamp", &["%%"]).unwrap(), "%");
    }

    #[test]
    fn randomstr_and_uuid_shapes() {
        assert_eq!(run("randomstr", &["8"]).unwrap().len(), 8);
        assert_eq!(run("randomstr", &[]).unwrap().len(), 16);
        assert_eq!(run("uuid", &[]).unwrap().len(), 36);
    }

    #[test]
    fn randomstr_length_is_capped() {
        assert_eq!(run("randomstr", &["65536"]).unwrap().len(), 65536);
        let err = run("randomstr", &["99999999999"]).unwrap_err();
        assert!(err.to_string().contains("exceeds the limit"));
    }

    #[test]
    fn dispatcher_lists_and_describes() {
        let dispatcher = BuiltinDispatcher::default();
        assert!(dispatcher.contains("sha256"));
        assert!(!dispatcher.contains("portscan"));
        assert!(dispatcher.list().any(|(name, _)| name == "base64"));
        let usage = dispatcher.usage("calc").unwrap();
        assert!(usage.contains("Usage: calc"));
    }
}
