//! Console rendering: status lines, boxed titles and the module views.

use crate::builtin::BuiltinDispatcher;
use crate::module::{ModuleDescriptor, ModuleKind};
use colored::Colorize;
use std::collections::HashMap;
use std::io::{Result, Write};

const BOX_WIDTH: usize = 64;

pub fn success(out: &mut dyn Write, msg: &str) -> Result<()> {
    writeln!(out, "{} {msg}", "[+]".green().bold())
}

pub fn info(out: &mut dyn Write, msg: &str) -> Result<()> {
    writeln!(out, "{} {msg}", "[*]".cyan().bold())
}

pub fn warning(out: &mut dyn Write, msg: &str) -> Result<()> {
    writeln!(out, "{} {msg}", "[!]".yellow().bold())
}

pub fn error(out: &mut dyn Write, msg: &str) -> Result<()> {
    writeln!(out, "{} {msg}", "[-]".red().bold())
}

/// A title framed by box-drawing characters.
pub fn section(out: &mut dyn Write, title: &str) -> Result<()> {
    let inner = BOX_WIDTH.saturating_sub(2);
    let title_len = title.chars().count();
    let left = inner.saturating_sub(title_len) / 2;
    let right = inner.saturating_sub(title_len + left);
    let bar = "═".repeat(inner);
    writeln!(out, "{}", format!("╔{bar}╗").cyan().bold())?;
    writeln!(
        out,
        "{}",
        format!("║{}{title}{}║", " ".repeat(left), " ".repeat(right))
            .cyan()
            .bold()
    )?;
    writeln!(out, "{}", format!("╚{bar}╝").cyan().bold())
}

fn kind_badge(kind: ModuleKind) -> String {
    match kind {
        ModuleKind::Python => "[PY]".blue().to_string(),
        ModuleKind::Shell => "[SH]".cyan().to_string(),
    }
}

fn shorten(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}

const META_HELP: [(&str, &str); 20] = [
    ("help [function]", "Show this help, or one builtin's usage"),
    ("list, ls", "List all modules"),
    ("search <keyword>", "Search modules by name/tag"),
    ("info <module>", "Show detailed module information"),
    ("<module>!", "Quick show module options and usage"),
    ("run <module> [args]", "Execute a module with arguments"),
    ("<module> [args]", "Shorthand: <module> arg_key=value"),
    ("<module> arg_key = value", "Format with spaces (alternative)"),
    ("env, envs", "Show all global environment variables"),
    ("key=value", "Set global environment variable"),
    ("key=?", "View global environment variable value"),
    ("$ <command>", "Run through the system shell (bash/zsh prefix)"),
    ("a() |> b |> \"lit\"", "Pipe each result into the next stage"),
    ("for i in 1..5 -> cmd $i", "Repeat a command over a range"),
    ("create <name> [type]", "Create a new module (python/bash)"),
    ("edit <module>", "Edit module files"),
    ("delete <module>", "Delete a module"),
    ("import <dir>", "Load modules from another directory"),
    ("history, clear, refresh", "History, clear screen, rescan modules"),
    ("exit, quit, q", "Exit"),
];

pub fn help(out: &mut dyn Write, builtins: &BuiltinDispatcher) -> Result<()> {
    writeln!(out)?;
    section(out, "AVAILABLE COMMANDS")?;
    writeln!(out)?;
    for (name, desc) in META_HELP {
        writeln!(out, "  {}{:<32} {desc}", "❯".green(), name.cyan())?;
    }
    writeln!(out)?;
    section(out, "BUILTIN FUNCTIONS")?;
    writeln!(out)?;
    for (name, summary) in builtins.list() {
        writeln!(out, "  {}{:<32} {summary}", "❯".green(), format!("{name}()").cyan())?;
    }
    writeln!(out)
}

/// Modules as an indented list with badges, descriptions and first tag.
pub fn module_list(out: &mut dyn Write, title: &str, modules: &[&ModuleDescriptor]) -> Result<()> {
    writeln!(out)?;
    section(out, title)?;
    for module in modules {
        let (desc, tag) = match &module.metadata {
            Some(meta) => (
                shorten(&meta.description, 50),
                meta.tags.first().cloned().unwrap_or_default(),
            ),
            None => (String::new(), String::new()),
        };
        writeln!(
            out,
            "   \\_ {} {}  {} {}",
            module.name.cyan(),
            kind_badge(module.kind),
            desc,
            tag.magenta()
        )?;
    }
    writeln!(out)
}

pub fn module_info(out: &mut dyn Write, module: &ModuleDescriptor) -> Result<()> {
    writeln!(out)?;
    section(out, &format!("MODULE: {}", module.name))?;
    let Some(meta) = &module.metadata else {
        writeln!(out, "   ├─ Type: {}", kind_badge(module.kind))?;
        writeln!(out, "   ├─ Entry: {}", module.entry.display())?;
        writeln!(out, "   └─ (No metadata available)")?;
        return writeln!(out);
    };

    writeln!(out, "   ├─ Description: {}", meta.description)?;
    writeln!(out, "   ├─ Type: {}", kind_badge(module.kind))?;
    writeln!(out, "   ├─ Author: {}", meta.author.yellow())?;
    writeln!(out, "   ├─ Version: {}", meta.version.magenta())?;
    if !meta.tags.is_empty() {
        writeln!(out, "   ├─ Tags: {}", meta.tags.join(", ").cyan())?;
    }
    writeln!(out, "   └─ Options:")?;
    if meta.options.is_empty() {
        writeln!(out, "       (none)")?;
    }
    for (name, opt) in &meta.options {
        let required = if opt.required {
            " [REQUIRED]".red().to_string()
        } else {
            String::new()
        };
        let default = opt
            .default_value()
            .map(|d| format!(" default: {d}"))
            .unwrap_or_default();
        writeln!(out, "       ├─ {} ({}){required}{default}", name.green(), opt.kind)?;
        writeln!(out, "       │  └─ {}", opt.description)?;
    }
    let example: Vec<String> = meta.options.keys().map(|k| format!("{k}=<value>")).collect();
    writeln!(out)?;
    writeln!(out, "   Usage: {} {}", module.name.cyan(), example.join(" "))?;
    writeln!(out)
}

pub fn history(out: &mut dyn Write, lines: &[String]) -> Result<()> {
    writeln!(out)?;
    section(out, &format!("COMMAND HISTORY ({})", lines.len()))?;
    for (idx, line) in lines.iter().enumerate() {
        writeln!(out, "   \\_ {} {line}", format!("[{}]", idx + 1).green())?;
    }
    writeln!(out)
}

pub fn environment(out: &mut dyn Write, vars: &HashMap<String, String>) -> Result<()> {
    let mut keys: Vec<&String> = vars.keys().collect();
    keys.sort();
    writeln!(out)?;
    section(out, &format!("ENVIRONMENT ({})", keys.len()))?;
    for key in keys {
        writeln!(out, "   {} = {}", key.cyan(), vars[key].green())?;
    }
    writeln!(out)
}

pub fn banner(out: &mut dyn Write, version: &str) -> Result<()> {
    writeln!(out)?;
    writeln!(
        out,
        "{}",
        r"
 ███╗   ███╗ ██████╗ ██████╗ ███████╗██╗  ██╗
 ████╗ ████║██╔═══██╗██╔══██╗██╔════╝██║  ██║
 ██╔████╔██║██║   ██║██║  ██║███████╗███████║
 ██║╚██╔╝██║██║   ██║██║  ██║╚════██║██╔══██║
 ██║ ╚═╝ ██║╚██████╔╝██████╔╝███████║██║  ██║
 ╚═╝     ╚═╝ ╚═════╝ ╚═════╝ ╚══════╝╚═╝  ╚═╝"
            .cyan()
            .bold()
    )?;
    writeln!(out)?;
    writeln!(
        out,
        "   {} {}  {}",
        "modsh".green().bold(),
        version,
        "type 'help' for commands".white()
    )?;
    writeln!(out)
}

/// `user@host ❯ ` for the line editor.
pub fn prompt() -> String {
    let host = whoami::fallible::hostname().unwrap_or_else(|_| "localhost".to_string());
    format!(
        "{}{}{}{} ",
        whoami::username().cyan(),
        "@".white(),
        host.magenta(),
        " ❯".green()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{ModuleMetadata, ModuleOption};
    use std::path::PathBuf;

    fn render(f: impl FnOnce(&mut dyn Write) -> Result<()>) -> String {
        let mut buf = Vec::new();
        f(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn status_lines_carry_message() {
        let text = render(|out| warning(out, "careful"));
        assert!(text.contains("[!]"));
        assert!(text.ends_with(" careful\n"));
    }

    #[test]
    fn section_is_three_lines() {
        let text = render(|out| section(out, "TITLE"));
        assert_eq!(text.lines().count(), 3);
        assert!(text.contains("TITLE"));
    }

    #[test]
    fn shorten_respects_char_boundaries() {
        assert_eq!(shorten("short", 10), "short");
        assert_eq!(shorten("ééééééééééé", 6), "ééé...");
    }

    #[test]
    fn info_lists_options_and_usage() {
        let mut meta = ModuleMetadata {
            description: "scan ports".into(),
            ..Default::default()
        };
        meta.options.insert(
            "target".into(),
            ModuleOption {
                kind: "string".into(),
                description: "host to scan".into(),
                required: true,
                default: None,
            },
        );
        let module = ModuleDescriptor {
            name: "portscan".into(),
            dir: PathBuf::from("/m/portscan"),
            entry: PathBuf::from("/m/portscan/main.py"),
            kind: ModuleKind::Python,
            metadata: Some(meta),
        };
        let text = render(|out| module_info(out, &module));
        assert!(text.contains("scan ports"));
        assert!(text.contains("host to scan"));
        assert!(text.contains("[REQUIRED]"));
        assert!(text.contains("target=<value>"));
    }

    #[test]
    fn help_lists_builtins() {
        let builtins = BuiltinDispatcher::default();
        let text = render(|out| help(out, &builtins));
        assert!(text.contains("sha256()"));
        assert!(text.contains("search <keyword>"));
    }
}
