//! Stage rewriting for `|>` chains: how one stage's output becomes part of the next stage.

use crate::lexer::escape_quoted;
use crate::parser::RawStage;
use std::collections::HashMap;

/// Argument keys that are never forwarded to modules.
const DROPPED_KEYS: [&str; 2] = ["threads", "save"];

/// Expand `\n`, `\t`, `\r` and `\\` in a literal stage.
pub fn unescape_literal(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    let mut chars = literal.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn quoted(input: &str) -> String {
    format!("\"{}\"", escape_quoted(input))
}

/// Rewrite `stage` so that it receives `input`.
///
/// Literals are returned unchanged; their concatenation happens at evaluation.
/// Empty input is never injected.
pub fn inject(stage: &RawStage, input: &str) -> RawStage {
    if input.is_empty() {
        return stage.clone();
    }
    match stage {
        RawStage::Literal(_) => stage.clone(),
        RawStage::Call { name, args } => {
            let args = if args.trim().is_empty() {
                quoted(input)
            } else {
                format!("{args}, {}", quoted(input))
            };
            RawStage::Call {
                name: name.clone(),
                args,
            }
        }
        RawStage::Bare { name, args } => RawStage::Bare {
            name: name.clone(),
            args: inject_bare_args(args, input),
        },
    }
}

/// `key=$var` as the last assignment gets `$var` replaced; everything else gets
/// an extra `input=` argument.
fn inject_bare_args(args: &str, input: &str) -> String {
    if args.contains('=') && args.contains('$') {
        if let Some((_, value)) = args.rsplit_once('=') {
            if value.starts_with('$') {
                let variable = value.trim();
                return args.replacen(variable, &quoted(input), 1);
            }
        }
    }
    let extra = format!("input={}", quoted(input));
    if args.is_empty() {
        extra
    } else {
        format!("{args} {extra}")
    }
}

/// Whether the stage writes its own output, so the chain must not print its result.
pub fn prints_itself(stage: &RawStage) -> bool {
    stage
        .name()
        .is_some_and(|name| name == "file" || name.starts_with("file-"))
}

/// Collect `key=value` tokens into module arguments.
///
/// `key = value` written with spaces is accepted too. Free-standing tokens are
/// joined into `input` unless an explicit `input=` was given.
pub fn module_args(tokens: &[String]) -> HashMap<String, String> {
    let mut args = HashMap::new();
    let mut positional = Vec::new();
    let mut iter = tokens.iter().peekable();

    while let Some(token) = iter.next() {
        if let Some((key, value)) = token.split_once('=') {
            if key.is_empty() {
                positional.push(token.clone());
            } else if value.is_empty() {
                // `key= value`
                let value = iter.next_if(|next| !next.contains('=')).cloned();
                args.insert(key.to_string(), value.unwrap_or_default());
            } else {
                args.insert(key.to_string(), value.to_string());
            }
            continue;
        }
        if iter.peek().map(|t| t.as_str()) == Some("=") {
            iter.next();
            let value = iter.next().cloned().unwrap_or_default();
            args.insert(token.clone(), value);
            continue;
        }
        positional.push(token.clone());
    }

    if !positional.is_empty() && !args.contains_key("input") {
        args.insert("input".to_string(), positional.join(" "));
    }
    for key in DROPPED_KEYS {
        args.remove(key);
    }
    args
}

/// Fill keys missing from `args` with environment-store values.
pub fn merge_environment(args: &mut HashMap<String, String>, vars: HashMap<String, String>) {
    for (key, value) in vars {
        args.entry(key).or_insert(value);
    }
}

/// Values handed to a builtin reached through a bare stage: `key=value` contributes its value.
pub fn builtin_values(tokens: Vec<String>) -> Vec<String> {
    tokens
        .into_iter()
        .map(|token| match token.split_once('=') {
            Some((key, value)) if !key.is_empty() => value.to_string(),
            _ => token,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn bare(name: &str, args: &str) -> RawStage {
        RawStage::Bare {
            name: name.to_string(),
            args: args.to_string(),
        }
    }

    fn call(name: &str, args: &str) -> RawStage {
        RawStage::Call {
            name: name.to_string(),
            args: args.to_string(),
        }
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn literal_escapes_expand() {
        assert_eq!(unescape_literal(r"a\nb\tc\rd\\e"), "a\nb\tc\rd\\e");
        assert_eq!(unescape_literal(r"keep \x and trailing \"), "keep \\x and trailing \\");
    }

    #[test]
    fn call_stage_gets_input_as_extra_argument() {
        assert_eq!(inject(&call("sha256", ""), "abc"), call("sha256", "\"abc\""));
        assert_eq!(
            inject(&call("calc", "1, +"), "2"),
            call("calc", "1, +, \"2\"")
        );
    }

    #[test]
    fn bare_stage_replaces_trailing_variable() {
        assert_eq!(
            inject(&bare("portscan", "ports=80 ip=$target"), "10.0.0.1"),
            bare("portscan", "ports=80 ip=\"10.0.0.1\"")
        );
    }

    #[test]
    fn bare_stage_appends_input_otherwise() {
        assert_eq!(
            inject(&bare("hashgen", ""), "x"),
            bare("hashgen", "input=\"x\"")
        );
        assert_eq!(
            inject(&bare("hashgen", "algo=md5"), "x"),
            bare("hashgen", "algo=md5 input=\"x\"")
        );
        // the variable is not the value of the last assignment
        assert_eq!(
            inject(&bare("m", "a=$x b=1"), "v"),
            bare("m", "a=$x b=1 input=\"v\"")
        );
    }

    #[test]
    fn injected_quotes_are_escaped() {
        assert_eq!(
            inject(&call("echo", ""), "say \"hi\""),
            call("echo", "\"say \\\"hi\\\"\"")
        );
    }

    #[test]
    fn empty_input_and_literals_are_untouched() {
        assert_eq!(inject(&bare("m", "a=1"), ""), bare("m", "a=1"));
        let literal = RawStage::Literal("x".into());
        assert_eq!(inject(&literal, "in"), literal);
    }

    #[test]
    fn file_stages_print_themselves() {
        assert!(prints_itself(&call("file", "out.txt")));
        assert!(prints_itself(&bare("file-creator", "")));
        assert!(!prints_itself(&call("filer", "")));
        assert!(!prints_itself(&RawStage::Literal("file".into())));
    }

    #[test]
    fn module_args_accept_both_assignment_styles() {
        let args = module_args(&strings(&["ip=1.2.3.4", "port", "=", "80", "mode=", "fast"]));
        assert_eq!(args.get("ip").map(String::as_str), Some("1.2.3.4"));
        assert_eq!(args.get("port").map(String::as_str), Some("80"));
        assert_eq!(args.get("mode").map(String::as_str), Some("fast"));
        assert!(!args.contains_key("input"));
    }

    #[test]
    fn module_args_drop_reserved_keys_and_collect_positionals() {
        let args = module_args(&strings(&["threads=8", "save=yes", "hello", "world"]));
        assert_eq!(args.len(), 1);
        assert_eq!(args["input"], "hello world");

        let args = module_args(&strings(&["stray", "input=given"]));
        assert_eq!(args["input"], "given");
    }

    #[test]
    fn environment_fills_only_missing_keys() {
        let mut args = module_args(&strings(&["ip=explicit"]));
        merge_environment(
            &mut args,
            HashMap::from([
                ("ip".to_string(), "global".to_string()),
                ("port".to_string(), "22".to_string()),
            ]),
        );
        assert_eq!(args["ip"], "explicit");
        assert_eq!(args["port"], "22");
    }

    #[test]
    fn builtin_values_strip_keys() {
        assert_eq!(
            builtin_values(strings(&["input=hello", "plain", "=odd"])),
            strings(&["hello", "plain", "=odd"])
        );
    }
}
