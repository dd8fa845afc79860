//! Argument tokenizer for call arguments (`sha256("a b", $x)`) and bare module
//! arguments (`portscan host=$target ports="22,80"`).

use crate::env::Environment;

/// One argument produced by the tokenizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Argument {
    /// Plain text, with quotes removed and variables expanded.
    Text(String),
    /// An unquoted nested call such as `whoami()`, kept verbatim so the caller
    /// can evaluate it. Variables inside are expanded when it is evaluated.
    Call(String),
}

impl Argument {
    /// The token text regardless of kind.
    pub fn as_str(&self) -> &str {
        match self {
            Argument::Text(s) | Argument::Call(s) => s,
        }
    }

    /// Consume into the token text.
    pub fn into_string(self) -> String {
        match self {
            Argument::Text(s) | Argument::Call(s) => s,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexingState {
    Unquoted,
    Quoted(char),
    /// Inside `(...)`; tracks depth and the quote, if any, open inside the group.
    Nested(usize, Option<char>),
}

struct ArgumentLexer<'a> {
    input: Vec<char>,
    pos: usize,
    state: LexingState,
    current: String,
    /// The current token contained a quoted section, so an empty token is kept.
    quoted: bool,
    /// The current token contained a parenthesised group.
    nested: bool,
    env: &'a Environment,
    out: Vec<Argument>,
}

impl<'a> ArgumentLexer<'a> {
    fn new(raw: &str, env: &'a Environment) -> Self {
        Self {
            input: raw.chars().collect(),
            pos: 0,
            state: LexingState::Unquoted,
            current: String::new(),
            quoted: false,
            nested: false,
            env,
            out: Vec::new(),
        }
    }

    fn read_char(&mut self) -> Option<char> {
        let ch = self.input.get(self.pos).copied();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn peek_char(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn run(mut self) -> Vec<Argument> {
        while let Some(ch) = self.read_char() {
            match self.state {
                LexingState::Unquoted => self.handle_unquoted(ch),
                LexingState::Quoted(quote) => self.handle_quoted(ch, quote),
                LexingState::Nested(depth, quote) => self.handle_nested(ch, depth, quote),
            }
        }

        match self.state {
            LexingState::Quoted(quote) => {
                tracing::debug!(target: "tokenize", %quote, "unterminated quote consumed to end of input");
            }
            LexingState::Nested(depth, _) => {
                tracing::debug!(target: "tokenize", depth, "unmatched parenthesis consumed to end of input");
            }
            LexingState::Unquoted => {}
        }
        self.finish_token();
        self.out
    }

    fn handle_unquoted(&mut self, ch: char) {
        match ch {
            ' ' | '\t' | ',' => self.finish_token(),
            '"' | '\'' => {
                self.quoted = true;
                self.state = LexingState::Quoted(ch);
            }
            '$' if self.peek_char().is_some_and(is_var_char) => self.expand_variable(),
            '(' => {
                self.nested = true;
                self.current.push(ch);
                self.state = LexingState::Nested(1, None);
            }
            c => self.current.push(c),
        }
    }

    fn handle_quoted(&mut self, ch: char, quote: char) {
        match ch {
            '\\' if self.peek_char().is_some_and(|next| next == quote || next == '\\') => {
                if let Some(next) = self.read_char() {
                    self.current.push(next);
                }
            }
            c if c == quote => self.state = LexingState::Unquoted,
            c => self.current.push(c),
        }
    }

    fn handle_nested(&mut self, ch: char, depth: usize, quote: Option<char>) {
        self.current.push(ch);
        match quote {
            Some(q) => {
                if ch == '\\' {
                    if let Some(next) = self.read_char() {
                        self.current.push(next);
                    }
                } else if ch == q {
                    self.state = LexingState::Nested(depth, None);
                }
            }
            None => match ch {
                '"' | '\'' => self.state = LexingState::Nested(depth, Some(ch)),
                '(' => self.state = LexingState::Nested(depth + 1, None),
                ')' if depth == 1 => self.state = LexingState::Unquoted,
                ')' => self.state = LexingState::Nested(depth - 1, None),
                _ => {}
            },
        }
    }

    fn expand_variable(&mut self) {
        let mut name = String::new();
        while let Some(c) = self.peek_char().filter(|c| is_var_char(*c)) {
            name.push(c);
            self.pos += 1;
        }
        push_reference(&mut self.current, &name, self.env);
    }

    fn finish_token(&mut self) {
        let quoted = std::mem::take(&mut self.quoted);
        let nested = std::mem::take(&mut self.nested);
        if self.current.is_empty() && !quoted {
            return;
        }
        let text = std::mem::take(&mut self.current);
        if nested && !quoted && split_call(&text).is_some() {
            self.out.push(Argument::Call(text));
        } else {
            self.out.push(Argument::Text(text));
        }
    }
}

/// Append the value of `$name`, or the reference itself when it is undefined.
fn push_reference(out: &mut String, name: &str, env: &Environment) {
    match env.lookup(name) {
        Some(value) => out.push_str(&value),
        None => {
            out.push('$');
            out.push_str(name);
        }
    }
}

/// Replace every `$name` in `text`, quoted or not. Used for call text that is
/// passed on without being evaluated.
pub fn expand_variables(text: &str, env: &Environment) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' || !chars.peek().is_some_and(|next| is_var_char(*next)) {
            out.push(c);
            continue;
        }
        let mut name = String::new();
        while let Some(next) = chars.next_if(|next| is_var_char(*next)) {
            name.push(next);
        }
        push_reference(&mut out, &name, env);
    }
    out
}

/// Characters allowed in a `$name` reference.
pub fn is_var_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Tokenize `raw` into arguments, keeping nested calls distinguishable.
pub fn tokenize_arguments(raw: &str, env: &Environment) -> Vec<Argument> {
    let args = ArgumentLexer::new(raw, env).run();
    tracing::trace!(target: "tokenize", ?raw, ?args, "tokenized");
    args
}

/// Tokenize `raw` into plain token strings.
///
/// Tokens are separated by top-level spaces or commas; quoted sections are taken
/// verbatim (only `\"`, `\'` and `\\` are unescaped); `$name` expands from the
/// environment store, then the process environment, else stays literal.
pub fn tokenize(raw: &str, env: &Environment) -> Vec<String> {
    tokenize_arguments(raw, env)
        .into_iter()
        .map(Argument::into_string)
        .collect()
}

/// Byte index of the `)` that closes the `(` at `open`, skipping parentheses
/// inside quoted substrings. `None` when the group is never closed.
pub fn find_matching_paren(s: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (idx, ch) in s.get(open..)?.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => quote = Some(ch),
            '(' => depth += 1,
            ')' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(open + idx);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split `name(args)` into its name and raw argument text.
///
/// The closing parenthesis must end the text; an unmatched parenthesis means
/// the text is not a call.
pub fn split_call(text: &str) -> Option<(&str, &str)> {
    let text = text.trim();
    let open = text.find('(')?;
    let name = &text[..open];
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return None;
    }
    let close = find_matching_paren(text, open)?;
    if close + 1 != text.len() {
        return None;
    }
    Some((name, &text[open + 1..close]))
}

/// Escape `"` and `\` so `value` survives a round trip through a double-quoted token.
pub fn escape_quoted(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn env_with(pairs: &[(&str, &str)]) -> Environment {
        let mut env = Environment::new();
        for (k, v) in pairs {
            env.set(k, *v).unwrap();
        }
        env
    }

    #[test]
    fn quoted_comma_is_not_a_separator_and_variables_expand() {
        let env = env_with(&[("X", "1")]);
        assert_eq!(tokenize(r#""a,b", $X"#, &env), vec!["a,b", "1"]);
    }

    #[test]
    fn variables_expand_inside_unevaluated_call_text() {
        let env = env_with(&[("X", "1"), ("host", "db")]);
        assert_eq!(expand_variables("g($X, \"$host\")", &env), "g(1, \"db\")");
        assert_eq!(expand_variables("cost $ 5 $UNSET_MODSH_VAR", &env), "cost $ 5 $UNSET_MODSH_VAR");
    }

    #[test]
    fn spaces_and_commas_separate_and_empty_tokens_drop() {
        let env = Environment::new();
        assert_eq!(tokenize("a,,b   c , d", &env), vec!["a", "b", "c", "d"]);
        assert!(tokenize("  , ,  ", &env).is_empty());
    }

    #[test]
    fn explicit_empty_quotes_are_kept() {
        let env = Environment::new();
        assert_eq!(tokenize(r#"a "" b"#, &env), vec!["a", "", "b"]);
    }

    #[test]
    fn quotes_only_unescape_quote_and_backslash() {
        let env = Environment::new();
        assert_eq!(
            tokenize(r#""say \"hi\" \\ \n" 'it\'s'"#, &env),
            vec![r#"say "hi" \ \n"#, "it's"]
        );
    }

    #[test]
    fn quoted_sections_glue_to_surrounding_text() {
        let env = env_with(&[("target", "10.0.0.1")]);
        assert_eq!(
            tokenize(r#"host=$target ports="22, 80""#, &env),
            vec!["host=10.0.0.1", "ports=22, 80"]
        );
    }

    #[test]
    fn variables_are_not_expanded_inside_quotes() {
        let env = env_with(&[("X", "1")]);
        assert_eq!(tokenize(r#"'$X' "$X""#, &env), vec!["$X", "$X"]);
    }

    #[test]
    fn unknown_variables_stay_literal() {
        let env = Environment::new();
        assert_eq!(
            tokenize("$MODSH_SURELY_UNDEFINED_VAR_42 $ cost$", &env),
            vec!["$MODSH_SURELY_UNDEFINED_VAR_42", "$", "cost$"]
        );
    }

    #[test]
    fn nested_calls_stay_whole() {
        let env = Environment::new();
        let args = tokenize_arguments(r#"sha256(echo("a, b)", c)), x"#, &env);
        assert_eq!(
            args,
            vec![
                Argument::Call(r#"sha256(echo("a, b)", c))"#.to_string()),
                Argument::Text("x".to_string()),
            ]
        );
    }

    #[test]
    fn parenthesised_text_without_name_is_plain_text() {
        let env = Environment::new();
        assert_eq!(
            tokenize_arguments("(a b) c", &env),
            vec![
                Argument::Text("(a b)".to_string()),
                Argument::Text("c".to_string())
            ]
        );
    }

    #[test]
    fn unterminated_quote_consumes_rest_of_input() {
        let env = Environment::new();
        assert_eq!(tokenize(r#"a "b c, d"#, &env), vec!["a", "b c, d"]);
    }

    #[test]
    fn unmatched_parenthesis_consumes_rest_of_input() {
        let env = Environment::new();
        assert_eq!(
            tokenize_arguments("f(a, b c", &env),
            vec![Argument::Text("f(a, b c".to_string())]
        );
    }

    #[test]
    fn matching_paren_ignores_quoted_parens() {
        let s = r#"f("(", ')', g(x))"#;
        assert_eq!(find_matching_paren(s, 1), Some(s.len() - 1));
        assert_eq!(find_matching_paren("f(a", 1), None);
        assert_eq!(find_matching_paren(r#"f(")"#, 1), None);
    }

    #[test]
    fn split_call_requires_name_and_closing_paren_at_end() {
        assert_eq!(split_call("sha256()"), Some(("sha256", "")));
        assert_eq!(split_call(" cat(a.txt) "), Some(("cat", "a.txt")));
        assert_eq!(split_call(r#"echo("x)")"#), Some(("echo", r#""x)""#)));
        assert_eq!(split_call("(a)"), None);
        assert_eq!(split_call("f(a) tail"), None);
        assert_eq!(split_call("f(a"), None);
        assert_eq!(split_call("my mod(a)"), None);
    }

    #[test]
    fn escape_quoted_round_trips_through_the_tokenizer() {
        let env = Environment::new();
        let raw = r#"he said "x\y""#;
        let quoted = format!("\"{}\"", escape_quoted(raw));
        assert_eq!(tokenize(&quoted, &env), vec![raw]);
    }
}
