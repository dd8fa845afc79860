use crate::env::Environment;
use std::borrow::Cow;
use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

/// Runs `$ ...` lines through a system shell with inherited stdio.
pub struct ShellPassthrough {
    default_shell: PathBuf,
}

/// How one passthrough command ended.
#[derive(Debug)]
pub struct ShellOutcome {
    /// The shell that ran the command.
    pub shell: PathBuf,
    pub status: ExitStatus,
    pub elapsed: Duration,
}

impl ShellOutcome {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Exit code, with signal terminations mapped to `128 + signal`.
    pub fn code(&self) -> i32 {
        match self.status.code() {
            Some(code) => code,
            None => terminated_by_signal(self.status),
        }
    }
}

impl ShellPassthrough {
    pub fn new(default_shell: impl Into<PathBuf>) -> Self {
        Self {
            default_shell: default_shell.into(),
        }
    }

    /// Pick the shell for `raw`: a leading `bash ` or `zsh ` selects that shell and is
    /// stripped, anything else goes to the default shell unchanged.
    pub fn select<'a>(&self, raw: &'a str) -> (PathBuf, &'a str) {
        for shell in ["bash", "zsh"] {
            if let Some(rest) = raw.strip_prefix(shell).and_then(|r| r.strip_prefix(' ')) {
                return (PathBuf::from(shell), rest.trim_start());
            }
        }
        (self.default_shell.clone(), raw)
    }

    /// Run `raw` in the interpreter's current directory and wait for it.
    ///
    /// A `cd <dir>` command moves the interpreter's current directory too.
    pub fn run(&self, raw: &str, env: &mut Environment) -> io::Result<ShellOutcome> {
        let (shell, command) = self.select(raw);
        tracing::debug!(target: "shell", shell = %shell.display(), command, "passthrough");

        let started = Instant::now();
        let status = Command::new(&shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .current_dir(&env.current_dir)
            .spawn()?
            .wait()?;
        let elapsed = started.elapsed();

        if let Some(dir) = cd_target(command) {
            if let Some(new_dir) = resolve_directory(&shell, dir, &env.current_dir) {
                tracing::debug!(target: "shell", dir = %new_dir.display(), "current directory changed");
                env.current_dir = new_dir;
            }
        }

        Ok(ShellOutcome {
            shell,
            status,
            elapsed,
        })
    }
}

fn cd_target(command: &str) -> Option<&str> {
    command
        .trim()
        .strip_prefix("cd ")
        .map(str::trim)
        .filter(|dir| !dir.is_empty())
}

/// Ask `shell` where `cd <dir>` lands when started from `cwd`.
fn resolve_directory(shell: &Path, dir: &str, cwd: &Path) -> Option<PathBuf> {
    let script = if dir == "-" {
        "pwd".to_string()
    } else {
        format!("cd {dir} && pwd")
    };
    let output = Command::new(shell)
        .arg("-c")
        .arg(script)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let path = String::from_utf8(output.stdout).ok()?;
    let path = path.trim();
    (!path.is_empty()).then(|| PathBuf::from(path))
}

#[cfg(unix)]
fn terminated_by_signal(exit_status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    if let Some(signal) = ExitStatusExt::signal(&exit_status) {
        128 + signal
    } else if ExitStatusExt::core_dumped(&exit_status) {
        255
    } else {
        -1
    }
}

#[cfg(not(unix))]
fn terminated_by_signal(_exit_status: ExitStatus) -> i32 {
    -1
}

/// Resolve a command path the way a typical shell would.
///
/// Behavior:
/// - Absolute path: returns it if it exists.
/// - Relative with multiple components (e.g., `bin/sh`): returns it if it exists.
/// - `./foo` on Unix or any `./`-prefixed path on other platforms: returns it if it exists.
/// - Single path component (no separators): search each directory in `search_paths` (PATH)
///   and return the first existing match.
/// - Empty path: returns `None`.
pub fn find_command_path<'a>(search_paths: &OsStr, path: &'a Path) -> Option<Cow<'a, Path>> {
    if path.is_absolute() {
        return find_by_path(path).map(Cow::Borrowed);
    }

    let search_in_current_dir = cfg!(not(unix)) || path.starts_with("./");
    if search_in_current_dir && path.exists() {
        return Some(Cow::Borrowed(path));
    }

    let mut components = path.components();
    match (components.next(), components.next()) {
        (None, _) => None,
        (Some(x), None) => find_in_path(search_paths, x.as_os_str()).map(Cow::Owned),
        _ => find_by_path(path).map(Cow::Borrowed),
    }
}

fn find_in_path(search_paths: &OsStr, cmd: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(search_paths)
        .map(|dir| dir.join(cmd))
        .find(|path| path.is_file())
}

fn find_by_path(path: &Path) -> Option<&Path> {
    if path.exists() { Some(path) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn select_honours_shell_prefixes() {
        let runner = ShellPassthrough::new("sh");
        assert_eq!(
            runner.select("bash echo hi"),
            (PathBuf::from("bash"), "echo hi")
        );
        assert_eq!(runner.select("zsh ls"), (PathBuf::from("zsh"), "ls"));
        assert_eq!(runner.select("bashful"), (PathBuf::from("sh"), "bashful"));
        assert_eq!(runner.select("ls -la"), (PathBuf::from("sh"), "ls -la"));
    }

    #[test]
    fn cd_target_extracts_directory() {
        assert_eq!(cd_target("cd /tmp"), Some("/tmp"));
        assert_eq!(cd_target("  cd  sub dir "), Some("sub dir"));
        assert_eq!(cd_target("cd"), None);
        assert_eq!(cd_target("echo cd /tmp"), None);
    }

    #[test]
    #[cfg(unix)]
    fn run_reports_status_and_tracks_cd() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        fs::create_dir(tmp.path().join("inner"))?;
        let mut env = Environment::new();
        env.current_dir = tmp.path().canonicalize()?;

        let runner = ShellPassthrough::new("sh");
        let outcome = runner.run("exit 4", &mut env)?;
        assert!(!outcome.success());
        assert_eq!(outcome.code(), 4);

        let outcome = runner.run("cd inner", &mut env)?;
        assert!(outcome.success());
        assert_eq!(env.current_dir, tmp.path().canonicalize()?.join("inner"));

        // a failing cd leaves the directory alone
        let outcome = runner.run("cd missing", &mut env)?;
        assert!(!outcome.success());
        assert!(env.current_dir.ends_with("inner"));
        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn absolute_existing_and_missing() {
        let found = find_command_path(OsStr::new("/bin"), Path::new("/bin/sh"));
        assert_eq!(found.as_deref(), Some(Path::new("/bin/sh")));
        assert!(find_command_path(OsStr::new("/bin"), Path::new("/bin/nonexisting")).is_none());
    }

    #[test]
    fn single_component_searches_path_in_order() -> anyhow::Result<()> {
        let first = TempDir::new()?;
        let second = TempDir::new()?;
        fs::write(second.path().join("tool"), "")?;
        let paths = std::env::join_paths([first.path(), second.path()])?;

        let found = find_command_path(&paths, Path::new("tool"));
        assert_eq!(found.as_deref(), Some(second.path().join("tool").as_path()));

        fs::write(first.path().join("tool"), "")?;
        let found = find_command_path(&paths, Path::new("tool"));
        assert_eq!(found.as_deref(), Some(first.path().join("tool").as_path()));

        assert!(find_command_path(&paths, Path::new("nonexisting")).is_none());
        Ok(())
    }

    #[test]
    fn directories_on_path_are_not_commands() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        fs::create_dir(dir.path().join("tool"))?;
        assert!(find_command_path(dir.path().as_os_str(), Path::new("tool")).is_none());
        Ok(())
    }

    #[test]
    fn empty_path_is_none() {
        assert!(find_command_path(OsStr::new("/bin"), Path::new("")).is_none());
    }
}
