//! Externally defined modules: directories holding an entry script plus optional metadata.

use crate::external::find_command_path;
use crate::signals::ExecutionGuard;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

/// File names probed, in order, when looking for a module's entry script.
const ENTRY_SCRIPTS: [(&str, ModuleKind); 4] = [
    ("main.py", ModuleKind::Python),
    ("run.py", ModuleKind::Python),
    ("main.sh", ModuleKind::Shell),
    ("run.sh", ModuleKind::Shell),
];

const METADATA_FILE: &str = "module.yaml";

#[derive(thiserror::Error, Debug)]
pub enum ModuleError {
    #[error("module '{0}' not found")]
    NotFound(String),

    #[error("modules directory {}: {source}", path.display())]
    Discovery {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("module '{module}' requires option '{option}'")]
    MissingOption { module: String, option: String },

    #[error("can't start module '{name}': {source}")]
    Spawn {
        name: String,
        source: std::io::Error,
        elapsed: Duration,
    },

    #[error("module '{name}' exited with {status}")]
    Failed {
        name: String,
        status: ExitStatus,
        output: String,
        elapsed: Duration,
    },

    #[error("module '{0}' already exists")]
    AlreadyExists(String),

    #[error("invalid module name '{0}'")]
    InvalidName(String),

    #[error("{0} is not supported by this module source")]
    Unsupported(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// How the entry script is launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    Python,
    Shell,
}

impl ModuleKind {
    /// Parse the `create` type argument.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "python" | "py" => Some(Self::Python),
            "bash" | "sh" | "shell" => Some(Self::Shell),
            _ => None,
        }
    }

    fn interpreter(self) -> PathBuf {
        match self {
            Self::Python => PathBuf::from("python3"),
            Self::Shell => default_shell(),
        }
    }

    fn entry_file(self) -> &'static str {
        match self {
            Self::Python => "main.py",
            Self::Shell => "main.sh",
        }
    }

    fn template(self, name: &str) -> String {
        match self {
            Self::Python => format!(
                "#!/usr/bin/env python3\nimport os\n\ninput_value = os.getenv('ARG_INPUT', '')\nprint(f'[+] {name}: {{input_value}}')\n"
            ),
            Self::Shell => format!("#!/bin/sh\necho \"[+] {name}: $ARG_INPUT\"\n"),
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Python => "python",
            Self::Shell => "bash",
        })
    }
}

/// `bash` when it is on PATH, otherwise `sh`.
pub fn default_shell() -> PathBuf {
    let paths = std::env::var_os("PATH").unwrap_or_default();
    match find_command_path(&paths, Path::new("bash")) {
        Some(_) => PathBuf::from("bash"),
        None => PathBuf::from("sh"),
    }
}

/// Contents of `module.yaml`. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModuleMetadata {
    pub description: String,
    pub author: String,
    pub version: String,
    pub tags: Vec<String>,
    pub options: BTreeMap<String, ModuleOption>,
}

/// One declared module option.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModuleOption {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub required: bool,
    pub default: Option<serde_yaml::Value>,
}

impl ModuleOption {
    /// The default rendered as the string handed to the script.
    pub fn default_value(&self) -> Option<String> {
        match self.default.as_ref()? {
            serde_yaml::Value::Null => None,
            serde_yaml::Value::String(s) => Some(s.clone()),
            serde_yaml::Value::Bool(b) => Some(b.to_string()),
            serde_yaml::Value::Number(n) => Some(n.to_string()),
            other => serde_yaml::to_string(other)
                .ok()
                .map(|s| s.trim().to_string()),
        }
    }
}

/// A discovered module.
#[derive(Debug, Clone)]
pub struct ModuleDescriptor {
    pub name: String,
    pub dir: PathBuf,
    pub entry: PathBuf,
    pub kind: ModuleKind,
    pub metadata: Option<ModuleMetadata>,
}

impl ModuleDescriptor {
    /// Whether the name, description or any tag contains `keyword` (case-insensitive).
    pub fn matches(&self, keyword: &str) -> bool {
        let keyword = keyword.to_lowercase();
        if self.name.to_lowercase().contains(&keyword) {
            return true;
        }
        self.metadata.as_ref().is_some_and(|meta| {
            meta.description.to_lowercase().contains(&keyword)
                || meta
                    .tags
                    .iter()
                    .any(|tag| tag.to_lowercase().contains(&keyword))
        })
    }

    /// Fill declared defaults and check required options.
    fn resolve_args(
        &self,
        args: &HashMap<String, String>,
    ) -> Result<BTreeMap<String, String>, ModuleError> {
        let mut resolved: BTreeMap<String, String> =
            args.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let Some(meta) = &self.metadata else {
            return Ok(resolved);
        };
        for (option, spec) in &meta.options {
            if resolved.contains_key(option) {
                continue;
            }
            match spec.default_value() {
                Some(value) => {
                    resolved.insert(option.clone(), value);
                }
                None if spec.required => {
                    return Err(ModuleError::MissingOption {
                        module: self.name.clone(),
                        option: option.clone(),
                    });
                }
                None => {}
            }
        }
        Ok(resolved)
    }
}

/// Result of a successful module run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleOutput {
    /// Everything the module printed on stdout.
    pub output: String,
    pub elapsed: Duration,
}

/// Source of modules consulted by the interpreter.
pub trait ModuleResolver {
    /// (Re)scan the module source. Returns the number of modules found.
    fn discover(&mut self) -> Result<usize, ModuleError>;

    /// All known modules, sorted by name.
    fn list(&self) -> Vec<&ModuleDescriptor>;

    /// Look up one module by name.
    fn get(&self, name: &str) -> Result<&ModuleDescriptor, ModuleError>;

    /// Run a module. Its stdout is streamed into `console` line by line and also
    /// returned in [`ModuleOutput::output`].
    fn execute(
        &self,
        name: &str,
        args: &HashMap<String, String>,
        console: &mut dyn Write,
        guard: &ExecutionGuard,
    ) -> Result<ModuleOutput, ModuleError>;

    /// Add modules from another directory for this session.
    fn import(&mut self, _dir: &Path) -> Result<usize, ModuleError> {
        Err(ModuleError::Unsupported("import"))
    }

    /// Scaffold a new module.
    fn create(&mut self, _name: &str, _kind: ModuleKind) -> Result<PathBuf, ModuleError> {
        Err(ModuleError::Unsupported("create"))
    }

    /// Remove a module from disk.
    fn remove(&mut self, _name: &str) -> Result<(), ModuleError> {
        Err(ModuleError::Unsupported("delete"))
    }
}

/// Copy `stdout` into `console` line by line, accumulating it into `output`.
/// Bytes that are not UTF-8 are replaced rather than ending the stream.
fn stream_lines(stdout: impl Read, console: &mut dyn Write, output: &mut String) -> io::Result<()> {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(());
        }
        let text = String::from_utf8_lossy(&buf);
        let line = text.trim_end_matches(['\n', '\r']);
        writeln!(console, "{line}")?;
        output.push_str(line);
        output.push('\n');
    }
}

/// Filesystem-backed [`ModuleResolver`].
pub struct ModuleRegistry {
    root: PathBuf,
    modules: BTreeMap<String, ModuleDescriptor>,
    imported: BTreeMap<String, ModuleDescriptor>,
}

impl ModuleRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            modules: BTreeMap::new(),
            imported: BTreeMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn scan(dir: &Path) -> Result<Vec<ModuleDescriptor>, ModuleError> {
        let entries = fs::read_dir(dir).map_err(|source| ModuleError::Discovery {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut found = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let module_dir = entry.path();
            let Some((file, kind)) = ENTRY_SCRIPTS
                .iter()
                .find(|(file, _)| module_dir.join(file).is_file())
            else {
                tracing::debug!(target: "modules", dir = %module_dir.display(), "no entry script, skipping");
                continue;
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            found.push(ModuleDescriptor {
                metadata: Self::load_metadata(&module_dir),
                entry: module_dir.join(file),
                dir: module_dir,
                name,
                kind: *kind,
            });
        }
        Ok(found)
    }

    fn load_metadata(dir: &Path) -> Option<ModuleMetadata> {
        let path = dir.join(METADATA_FILE);
        let text = fs::read_to_string(&path).ok()?;
        match serde_yaml::from_str(&text) {
            Ok(meta) => Some(meta),
            Err(err) => {
                tracing::warn!(target: "modules", path = %path.display(), %err, "ignoring malformed metadata");
                None
            }
        }
    }

    fn validate_name(name: &str) -> Result<(), ModuleError> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(())
        } else {
            Err(ModuleError::InvalidName(name.to_string()))
        }
    }
}

impl ModuleResolver for ModuleRegistry {
    fn discover(&mut self) -> Result<usize, ModuleError> {
        let found = Self::scan(&self.root)?;
        self.modules = found.into_iter().map(|m| (m.name.clone(), m)).collect();
        tracing::info!(target: "modules", root = %self.root.display(), count = self.modules.len(), "discovered modules");
        Ok(self.modules.len())
    }

    fn list(&self) -> Vec<&ModuleDescriptor> {
        let mut all: BTreeMap<&str, &ModuleDescriptor> = self
            .imported
            .values()
            .map(|m| (m.name.as_str(), m))
            .collect();
        all.extend(self.modules.values().map(|m| (m.name.as_str(), m)));
        all.into_values().collect()
    }

    fn get(&self, name: &str) -> Result<&ModuleDescriptor, ModuleError> {
        self.modules
            .get(name)
            .or_else(|| self.imported.get(name))
            .ok_or_else(|| ModuleError::NotFound(name.to_string()))
    }

    fn execute(
        &self,
        name: &str,
        args: &HashMap<String, String>,
        console: &mut dyn Write,
        guard: &ExecutionGuard,
    ) -> Result<ModuleOutput, ModuleError> {
        let module = self.get(name)?;
        let resolved = module.resolve_args(args)?;
        tracing::debug!(target: "modules", name, args = ?resolved, "executing module");

        let started = Instant::now();
        let mut child = Command::new(module.kind.interpreter())
            .arg(&module.entry)
            .current_dir(&module.dir)
            .envs(
                resolved
                    .iter()
                    .map(|(k, v)| (format!("ARG_{}", k.to_uppercase()), v)),
            )
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| ModuleError::Spawn {
                name: name.to_string(),
                source,
                elapsed: started.elapsed(),
            })?;
        guard.record_pid(child.id());

        let mut output = String::new();
        if let Some(stdout) = child.stdout.take() {
            if let Err(err) = stream_lines(stdout, console, &mut output) {
                tracing::warn!(target: "modules", name, %err, "output stream broke, stopping module");
                if let Err(kill) = child.kill() {
                    tracing::debug!(target: "modules", name, %kill, "kill failed");
                }
                child.wait()?;
                return Err(err.into());
            }
        }
        let status = child.wait()?;
        let elapsed = started.elapsed();

        if status.success() {
            Ok(ModuleOutput { output, elapsed })
        } else {
            Err(ModuleError::Failed {
                name: name.to_string(),
                status,
                output,
                elapsed,
            })
        }
    }

    fn import(&mut self, dir: &Path) -> Result<usize, ModuleError> {
        let found = Self::scan(dir)?;
        let count = found.len();
        for module in found {
            tracing::debug!(target: "modules", name = %module.name, "imported module");
            self.imported.insert(module.name.clone(), module);
        }
        Ok(count)
    }

    fn create(&mut self, name: &str, kind: ModuleKind) -> Result<PathBuf, ModuleError> {
        Self::validate_name(name)?;
        let dir = self.root.join(name);
        if dir.exists() {
            return Err(ModuleError::AlreadyExists(name.to_string()));
        }
        fs::create_dir_all(&dir)?;
        let entry = dir.join(kind.entry_file());
        fs::write(&entry, kind.template(name))?;
        fs::write(
            dir.join(METADATA_FILE),
            format!(
                "description: {name} module\nauthor: {}\nversion: 0.1.0\ntags: []\noptions:\n  input:\n    type: string\n    description: input value\n    required: false\n",
                whoami::username()
            ),
        )?;
        self.discover()?;
        Ok(entry)
    }

    fn remove(&mut self, name: &str) -> Result<(), ModuleError> {
        let dir = self
            .modules
            .get(name)
            .map(|m| m.dir.clone())
            .ok_or_else(|| ModuleError::NotFound(name.to_string()))?;
        fs::remove_dir_all(&dir)?;
        self.discover()?;
        Ok(())
    }
}
