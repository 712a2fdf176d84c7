//! Error Classifier
//!
//! Decides whether a failed API call means "this resource does not apply here"
//! ([`Classification::Ignore`]) or "the query is broken" ([`Classification::Fatal`]).
//! The decision is data: each table declares, per operation, which error codes
//! are benign for it. Anything not on a list is fatal.

use crate::error::ApiError;

/// Codes every get-by-key operation treats as "no such row"
pub const DEFAULT_GET_IGNORE: &[&str] = &["ResourceNotFoundException", "NoSuchEntity", "NotFound"];

/// Outcome of classifying an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Ignore,
    Fatal,
}

/// An error together with its classification
#[derive(Debug, Clone)]
pub struct ClassifiedError {
    pub class: Classification,
    pub error: ApiError,
}

impl ClassifiedError {
    pub fn is_fatal(&self) -> bool {
        self.class == Classification::Fatal
    }
}

/// Classify against a single ignore list
pub fn classify<S: AsRef<str>>(ignore_list: &[S], error: ApiError) -> ClassifiedError {
    let class = if matches_any(ignore_list, &error.code) {
        Classification::Ignore
    } else {
        Classification::Fatal
    };
    ClassifiedError { class, error }
}

fn matches_any<S: AsRef<str>>(patterns: &[S], code: &str) -> bool {
    patterns.iter().any(|p| glob_match(p.as_ref(), code))
}

/// Classifier carrying the connection-level ignore codes from the user config
#[derive(Debug, Clone, Default)]
pub struct ErrorClassifier {
    connection_ignore: Vec<String>,
}

impl ErrorClassifier {
    pub fn new(connection_ignore: Vec<String>) -> Self {
        Self { connection_ignore }
    }

    /// Classify an error raised by an operation with the given table-declared ignore list
    pub fn classify(&self, table_ignore: &[String], error: ApiError) -> ClassifiedError {
        if matches_any(&self.connection_ignore, &error.code) {
            return ClassifiedError {
                class: Classification::Ignore,
                error,
            };
        }
        classify(table_ignore, error)
    }

    /// Classify a get-by-key failure; not-found codes are always benign there
    pub fn classify_get(&self, table_ignore: &[String], error: ApiError) -> ClassifiedError {
        if matches_any(DEFAULT_GET_IGNORE, &error.code) {
            return ClassifiedError {
                class: Classification::Ignore,
                error,
            };
        }
        self.classify(table_ignore, error)
    }
}

/// Shell-style match supporting `*` (any run) and `?` (one character)
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<usize> = None;
    let mut mark = 0;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            mark = ti;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            mark += 1;
            ti = mark;
        } else {
            return false;
        }
    }

    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }

    pi == p.len()
}
