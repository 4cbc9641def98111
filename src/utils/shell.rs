/// Escape a value for use inside single quotes.
/// Replaces `'` with `'\''` (end quote, escaped quote, start quote).
pub fn escape_single_quote_content(value: &str) -> String {
    value.replace('\'', "'\\''")
}

/// Quote a single argument for a POSIX shell.
/// - Empty strings become `''`
/// - Strings with shell metacharacters are wrapped in single quotes
/// - Embedded single quotes are escaped
pub fn quote_arg(arg: &str) -> String {
    if arg.is_empty() {
        return "''".to_string();
    }

    const SHELL_META: &[char] = &[
        ' ', '\t', '\n', '\'', '"', '\\', '$', '`', '!', '*', '?', '[', ']', '(', ')', '{', '}',
        '<', '>', '|', '&', ';', '#', '~',
    ];

    if !arg.contains(SHELL_META) {
        return arg.to_string();
    }

    format!("'{}'", escape_single_quote_content(arg))
}

/// Quote and join multiple arguments for a POSIX shell.
pub fn quote_args(args: &[String]) -> String {
    args.iter()
        .map(|a| quote_arg(a))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Quote a single word for a systemd `ExecStart=` line.
///
/// systemd splits on whitespace and honours double quotes with C-style
/// escapes; `%` and `$` are specifier/variable sigils and are doubled.
/// Escape systemd specifiers (`%h`, `%n`, ...) in a unit setting value.
pub fn systemd_escape(value: &str) -> String {
    value.replace('%', "%%")
}

pub fn systemd_quote(arg: &str) -> String {
    let escaped = systemd_escape(arg).replace('$', "$$");
    if escaped.is_empty() || escaped.contains([' ', '\t', '"', '\\', '\'', ';']) {
        format!("\"{}\"", escaped.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        escaped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_arg_simple() {
        assert_eq!(quote_arg("--dtype"), "--dtype");
        assert_eq!(quote_arg("0.90"), "0.90");
    }

    #[test]
    fn quote_arg_with_spaces() {
        assert_eq!(quote_arg("/srv/my models"), "'/srv/my models'");
    }

    #[test]
    fn quote_arg_with_single_quote() {
        assert_eq!(quote_arg("it's"), "'it'\\''s'");
    }

    #[test]
    fn quote_arg_empty() {
        assert_eq!(quote_arg(""), "''");
    }

    #[test]
    fn quote_args_mixed() {
        let args = vec!["serve".to_string(), "a b".to_string()];
        assert_eq!(quote_args(&args), "serve 'a b'");
    }

    #[test]
    fn systemd_quote_plain_word() {
        assert_eq!(systemd_quote("Qwen/Qwen2.5-7B"), "Qwen/Qwen2.5-7B");
    }

    #[test]
    fn systemd_quote_whitespace_and_sigils() {
        assert_eq!(systemd_quote("/srv/my model"), "\"/srv/my model\"");
        assert_eq!(systemd_quote("100%"), "100%%");
        assert_eq!(systemd_quote("$HOME"), "$$HOME");
    }
}
