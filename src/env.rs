use std::collections::HashMap;
use std::env as stdenv;
use std::path::{Path, PathBuf};

/// Errors raised when mutating the [`Environment`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvError {
    /// The key was empty or contained whitespace.
    #[error("invalid variable name '{0}'")]
    InvalidKey(String),
}

/// Mutable, user-level state shared by every command the interpreter runs.
///
/// The environment contains:
/// - `vars`: variables defined with `key=value`. Unlike a POSIX shell, the table starts
///   empty; process variables are only consulted as a fallback by [`Environment::lookup`].
/// - `current_dir`: the working directory for builtins and shell passthrough.
/// - `should_exit`: a flag that the interactive loop checks after every line.
#[derive(Debug, Clone)]
pub struct Environment {
    vars: HashMap<String, String>,
    /// The current working directory for command execution.
    pub current_dir: PathBuf,
    /// When set to true, indicates that the interactive loop should exit.
    pub should_exit: bool,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    /// Create an empty variable table rooted at the process working directory.
    pub fn new() -> Self {
        let current_dir = stdenv::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            vars: HashMap::new(),
            current_dir,
            should_exit: false,
        }
    }

    /// Insert or overwrite a variable.
    ///
    /// Fails with [`EnvError::InvalidKey`] when `key` is empty or contains whitespace;
    /// the table is left untouched in that case.
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> Result<(), EnvError> {
        if key.is_empty() || key.chars().any(char::is_whitespace) {
            return Err(EnvError::InvalidKey(key.to_string()));
        }
        self.vars.insert(key.to_string(), value.into());
        Ok(())
    }

    /// Get a user-defined variable.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Resolve `$name`: user variables first, then the process environment.
    pub fn lookup(&self, key: &str) -> Option<String> {
        self.get(key)
            .map(str::to_string)
            .or_else(|| stdenv::var(key).ok())
    }

    /// Snapshot of all user-defined variables. Mutating it does not affect the store.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.vars.clone()
    }

    /// Number of user-defined variables.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Whether no variable has been defined yet.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Expand a leading `~` or `~/` using `HOME`.
pub fn expand_home(path: &str) -> PathBuf {
    let home = || stdenv::var_os("HOME").map(PathBuf::from);
    if path == "~" {
        if let Some(home) = home() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = home() {
            return home.join(rest);
        }
    }
    Path::new(path).to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_home() {
        let Some(home) = stdenv::var_os("HOME").map(PathBuf::from) else {
            return;
        };
        assert_eq!(expand_home("~"), home);
        assert_eq!(expand_home("~/mods"), home.join("mods"));
        assert_eq!(expand_home("~user/x"), PathBuf::from("~user/x"));
        assert_eq!(expand_home("./modules"), PathBuf::from("./modules"));
    }

    #[test]
    fn test_env_set_and_get_var() {
        let mut env = Environment::new();

        // initially absent
        assert_eq!(env.get("SOME_RANDOM_ENV_VAR_12345"), None);

        env.set("KEY", "VALUE").unwrap();
        assert_eq!(env.get("KEY"), Some("VALUE"));

        env.set("KEY", "OTHER").unwrap();
        assert_eq!(env.get("KEY"), Some("OTHER"));
    }

    #[test]
    fn test_env_rejects_bad_keys() {
        let mut env = Environment::new();
        assert_eq!(env.set("", "x"), Err(EnvError::InvalidKey(String::new())));
        assert_eq!(
            env.set("a b", "x"),
            Err(EnvError::InvalidKey("a b".to_string()))
        );
        assert!(env.set("a\tb", "x").is_err());
        assert!(env.is_empty());
    }

    #[test]
    fn test_env_lookup_falls_back_to_process_env() {
        let mut env = Environment::new();
        assert!(env.get("PATH").is_none());
        assert!(env.lookup("PATH").is_some());

        env.set("PATH", "shadowed").unwrap();
        assert_eq!(env.lookup("PATH").as_deref(), Some("shadowed"));
    }

    #[test]
    fn test_env_snapshot_is_detached() {
        let mut env = Environment::new();
        env.set("target", "10.0.0.1").unwrap();

        let mut snap = env.snapshot();
        snap.insert("target".to_string(), "changed".to_string());
        snap.insert("extra".to_string(), "1".to_string());

        assert_eq!(env.get("target"), Some("10.0.0.1"));
        assert_eq!(env.get("extra"), None);
        assert_eq!(env.len(), 1);
    }
}
