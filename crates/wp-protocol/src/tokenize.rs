//! Shell-like command line tokenizer
//!
//! Agents receive a single line of text. The leading bareword selects the
//! handler and the rest are `--flag value` options. Supported quoting:
//! - `'single quotes'` keep their content literally
//! - `"double quotes"` allow `\"` and `\\` escapes
//! - outside quotes, `\ ` is a literal space and `\t` a literal tab

use std::collections::BTreeMap;

use crate::error::ProtocolError;

/// Split a command line into tokens
pub fn parse_cmd(line: &str) -> Result<Vec<String>, ProtocolError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    // A token exists even if empty, e.g. `""`
    let mut in_token = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => current.push(ch),
                        None => return Err(ProtocolError::UnterminatedQuote('\'')),
                    }
                }
            }
            '"' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.peek() {
                            Some(&next @ ('"' | '\\')) => {
                                current.push(next);
                                chars.next();
                            }
                            _ => current.push('\\'),
                        },
                        Some(ch) => current.push(ch),
                        None => return Err(ProtocolError::UnterminatedQuote('"')),
                    }
                }
            }
            '\\' => {
                in_token = true;
                match chars.peek() {
                    Some(' ') => {
                        current.push(' ');
                        chars.next();
                    }
                    Some('t') => {
                        current.push('\t');
                        chars.next();
                    }
                    _ => current.push('\\'),
                }
            }
            c if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                in_token = true;
                current.push(c);
            }
        }
    }

    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

/// Quote a single argument so that [`parse_cmd`] yields it back unchanged
pub fn quote_arg(arg: &str) -> String {
    let needs_quotes = arg.is_empty()
        || arg
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '\\'));
    if !needs_quotes {
        return arg.to_string();
    }

    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    for c in arg.chars() {
        if matches!(c, '"' | '\\') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// A tokenized command: verb, `--flag value` options and positional args
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Leading bareword selecting the remote handler
    pub verb: String,
    /// Options; bare switches map to `"true"`
    pub options: BTreeMap<String, String>,
    /// Tokens that are not options
    pub positional: Vec<String>,
}

impl ParsedCommand {
    /// Get an option value
    pub fn get(&self, name: &str) -> Option<&str> {
        self.options.get(name).map(String::as_str)
    }
}

/// Interpret tokens as `verb [--flag [value]]... [positional]...`
pub fn parse_flags(tokens: &[String]) -> Result<ParsedCommand, ProtocolError> {
    let (verb, rest) = tokens.split_first().ok_or(ProtocolError::EmptyCommand)?;
    let mut parsed = ParsedCommand {
        verb: verb.clone(),
        ..Default::default()
    };

    let mut iter = rest.iter().peekable();
    while let Some(token) = iter.next() {
        match token.strip_prefix("--") {
            Some(name) if !name.is_empty() => {
                let value = match iter.peek() {
                    Some(next) if !next.starts_with("--") => iter.next().cloned(),
                    _ => None,
                };
                parsed
                    .options
                    .insert(name.to_string(), value.unwrap_or_else(|| "true".to_string()));
            }
            _ => parsed.positional.push(token.clone()),
        }
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(line: &str) -> Vec<String> {
        parse_cmd(line).unwrap()
    }

    #[test]
    fn test_plain_whitespace() {
        assert_eq!(toks("ls  -la\t/tmp"), vec!["ls", "-la", "/tmp"]);
    }

    #[test]
    fn test_single_quotes_are_literal() {
        assert_eq!(toks(r"echo 'a \ b' c"), vec!["echo", r"a \ b", "c"]);
    }

    #[test]
    fn test_double_quotes_with_escapes() {
        assert_eq!(
            toks(r#"echo "say \"hi\" now" x"#),
            vec!["echo", r#"say "hi" now"#, "x"]
        );
    }

    #[test]
    fn test_escaped_space_and_tab() {
        assert_eq!(toks(r"cat my\ file a\tb"), vec!["cat", "my file", "a\tb"]);
    }

    #[test]
    fn test_empty_quoted_token() {
        assert_eq!(toks(r#"run --env """#), vec!["run", "--env", ""]);
    }

    #[test]
    fn test_unterminated_quote() {
        assert!(matches!(
            parse_cmd("echo 'oops"),
            Err(ProtocolError::UnterminatedQuote('\''))
        ));
    }

    #[test]
    fn test_quote_arg_recovers_value() {
        for value in ["plain", "", "two words", r#"q"uote"#, r"back\slash", "it's"] {
            let line = format!("verb {}", quote_arg(value));
            assert_eq!(toks(&line), vec!["verb".to_string(), value.to_string()]);
        }
    }

    #[test]
    fn test_parse_flags() {
        let parsed = parse_flags(&toks("!port_fwd --shID 42 --operation stop --force extra")).unwrap();
        assert_eq!(parsed.verb, "!port_fwd");
        assert_eq!(parsed.get("shID"), Some("42"));
        assert_eq!(parsed.get("operation"), Some("stop"));
        assert_eq!(parsed.get("force"), Some("extra"));

        let parsed = parse_flags(&toks("!proxy --in_mem --mode on")).unwrap();
        assert_eq!(parsed.get("in_mem"), Some("true"));
        assert_eq!(parsed.get("mode"), Some("on"));
    }

    #[test]
    fn test_parse_flags_empty() {
        assert!(matches!(parse_flags(&[]), Err(ProtocolError::EmptyCommand)));
    }
}
