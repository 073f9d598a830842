//! Hides credentials in command lines before they are logged.

use std::sync::LazyLock;

use regex::{Captures, Regex};

/// Replacement for every credential.
pub const MASK: &str = "********";

// `--password=pw`, `--password pw`
static LONG_PASSWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(--password(?:=|\s+))("[^"]*"|'[^']*'|\S+)"#).unwrap()
});

// mysql style `-ppw` and `-p"pw"`, the value has to follow immediately
static SHORT_PASSWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(^|\s)(-p)("[^"]*"|'[^']*'|[^\s"']\S*)"#).unwrap());

/// Masks password arguments in a free-form command line.
pub fn mask_password_args(line: &str) -> String {
    let line = LONG_PASSWORD.replace_all(line, |caps: &Captures| format!("{}{MASK}", &caps[1]));
    SHORT_PASSWORD
        .replace_all(&line, |caps: &Captures| {
            format!("{}{}{MASK}", &caps[1], &caps[2])
        })
        .into_owned()
}

/// Masks every occurrence of the given secrets in `text`.
pub fn mask_secrets<'a>(text: &str, secrets: impl IntoIterator<Item = &'a str>) -> String {
    secrets
        .into_iter()
        .filter(|secret| !secret.is_empty())
        .fold(text.to_string(), |text, secret| text.replace(secret, MASK))
}
