//! Log line severity classification.
//!
//! Lines are parsed once into a [`ParsedLine`]: either a JSON object or raw
//! text. Structured lines are classified by their level field, falling back to
//! keyword matching; raw lines only by keyword matching. Everything that is not
//! an error or a warning is discarded.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl AsRef<str> for Severity {
    fn as_ref(&self) -> &str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
        }
    }
}

/// A level value after normalisation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Level {
    Error,
    Warning,
    Info,
    Other(String),
}

impl Level {
    fn severity(&self) -> Option<Severity> {
        match self {
            Self::Error => Some(Severity::Error),
            Self::Warning => Some(Severity::Warning),
            Self::Info | Self::Other(_) => None,
        }
    }

    fn from_code(code: i64) -> Self {
        if code >= 40 {
            Self::Error
        } else if code >= 30 {
            Self::Warning
        } else {
            Self::Info
        }
    }

    pub fn normalize(value: &Value) -> Self {
        match value {
            Value::Number(n) => match n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)) {
                Some(code) => Self::from_code(code),
                None => Self::Other(n.to_string()),
            },
            Value::String(s) => Self::normalize_str(s),
            other => Self::Other(other.to_string()),
        }
    }

    fn normalize_str(raw: &str) -> Self {
        let lowered = raw.trim().to_lowercase();
        match lowered.as_str() {
            "err" | "error" | "fatal" | "panic" | "crit" | "critical" | "severe" => Self::Error,
            "warn" | "warning" | "deprecated" => Self::Warning,
            "info" | "information" | "notice" | "debug" | "trace" => Self::Info,
            _ => match lowered.parse::<i64>() {
                Ok(code) => Self::from_code(code),
                Err(_) => Self::Other(lowered),
            },
        }
    }
}

const LEVEL_KEYS: [&str; 4] = ["level", "severity", "lvl", "log_level"];
const MESSAGE_KEYS: [&str; 2] = ["msg", "message"];

const ERROR_KEYWORDS: [&str; 7] = [
    "error",
    "exception",
    "traceback",
    "failed",
    "critical",
    "panic",
    "fatal",
];
const WARNING_KEYWORDS: [&str; 5] = ["warning", "warn", "deprecated", "timeout", "slow"];

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine<'a> {
    Structured(Map<String, Value>),
    Raw(&'a str),
}

impl<'a> ParsedLine<'a> {
    pub fn parse(line: &'a str, structured: bool) -> Self {
        if structured && line.trim_start().starts_with('{') {
            if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(line) {
                return Self::Structured(map);
            }
        }
        Self::Raw(line)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Classifier {
    structured: bool,
}

impl Classifier {
    pub fn new(structured: bool) -> Self {
        Self { structured }
    }

    pub fn classify(&self, line: &str) -> Option<Severity> {
        match ParsedLine::parse(line, self.structured) {
            ParsedLine::Structured(object) => classify_object(&object),
            ParsedLine::Raw(text) => match_keywords(text),
        }
    }
}

fn classify_object(object: &Map<String, Value>) -> Option<Severity> {
    if let Some(level) = LEVEL_KEYS.iter().find_map(|key| object.get(*key)) {
        return Level::normalize(level).severity();
    }

    let message = MESSAGE_KEYS
        .iter()
        .find_map(|key| object.get(*key))
        .map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_default();
    let serialized = Value::Object(object.clone()).to_string();
    match_keywords(&format!("{message} {serialized}"))
}

/// Case-insensitive keyword search. Error keywords win over warning ones.
pub fn match_keywords(text: &str) -> Option<Severity> {
    let lowered = text.to_lowercase();
    if ERROR_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        Some(Severity::Error)
    } else if WARNING_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        Some(Severity::Warning)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::{Arbitrary, Gen};
    use quickcheck_macros::quickcheck;

    fn classify(line: &str) -> Option<Severity> {
        Classifier::new(true).classify(line)
    }

    #[test]
    fn test_structured_levels() {
        assert_eq!(
            classify(r#"{"level":"error","msg":"db timeout"}"#),
            Some(Severity::Error)
        );
        assert_eq!(classify(r#"{"level":"warn"}"#), Some(Severity::Warning));
        assert_eq!(classify(r#"{"level":"info"}"#), None);
        assert_eq!(classify(r#"{"level":"INFO","msg":"request failed"}"#), None);
    }

    #[test]
    fn test_numeric_levels() {
        assert_eq!(classify(r#"{"level":50}"#), Some(Severity::Error));
        assert_eq!(classify(r#"{"level":35}"#), Some(Severity::Warning));
        assert_eq!(classify(r#"{"level":10}"#), None);
        assert_eq!(classify(r#"{"level":"40"}"#), Some(Severity::Error));
    }

    #[test]
    fn test_level_key_precedence() {
        assert_eq!(
            classify(r#"{"lvl":"error","severity":"warning"}"#),
            Some(Severity::Warning)
        );
        assert_eq!(classify(r#"{"log_level":"FATAL"}"#), Some(Severity::Error));
    }

    #[test]
    fn test_unknown_level_is_discarded() {
        assert_eq!(classify(r#"{"level":"verbose","msg":"fatal crash"}"#), None);
        assert_eq!(classify(r#"{"level":null}"#), None);
    }

    #[test]
    fn test_structured_without_level_uses_keywords() {
        assert_eq!(
            classify(r#"{"msg":"slow query detected"}"#),
            Some(Severity::Warning)
        );
        assert_eq!(
            classify(r#"{"msg":"ok","detail":"Traceback (most recent call last)"}"#),
            Some(Severity::Error)
        );
        assert_eq!(classify(r#"{"msg":"all good"}"#), None);
    }

    #[test]
    fn test_text_lines() {
        assert_eq!(classify("ERROR: db connection failed"), Some(Severity::Error));
        assert_eq!(classify("Warning: slow query"), Some(Severity::Warning));
        assert_eq!(classify("all good"), None);
    }

    #[test]
    fn test_error_wins_over_warning() {
        assert_eq!(classify("warning: request failed"), Some(Severity::Error));
    }

    #[test]
    fn test_structured_parsing_disabled() {
        let classifier = Classifier::new(false);
        assert_eq!(classifier.classify(r#"{"level":"info","msg":"x"}"#), None);
        assert_eq!(
            classifier.classify(r#"{"level":"warn","msg":"x"}"#),
            Some(Severity::Warning)
        );
        assert_eq!(classifier.classify(r#"{"level":50}"#), None);
    }

    #[test]
    fn test_malformed_json_falls_back_to_text() {
        assert_eq!(classify(r#"{"level":"info", oops error"#), Some(Severity::Error));
        assert_eq!(classify("[1, 2, 3]"), None);
    }

    #[test]
    fn test_parse_variants() {
        assert!(matches!(
            ParsedLine::parse(r#"{"a":1}"#, true),
            ParsedLine::Structured(_)
        ));
        assert_eq!(ParsedLine::parse(r#"{"a":1}"#, false), ParsedLine::Raw(r#"{"a":1}"#));
        assert_eq!(ParsedLine::parse("plain", true), ParsedLine::Raw("plain"));
    }

    #[derive(Debug, Clone)]
    struct ErrorLine(String);

    impl Arbitrary for ErrorLine {
        fn arbitrary(g: &mut Gen) -> Self {
            let keyword = *g.choose(&ERROR_KEYWORDS).unwrap_or(&"error");
            let cased: String = keyword
                .chars()
                .map(|c| {
                    if bool::arbitrary(g) {
                        c.to_ascii_uppercase()
                    } else {
                        c
                    }
                })
                .collect();
            let prefix = String::arbitrary(g);
            let suffix = String::arbitrary(g);
            ErrorLine(format!("{prefix}{cased}{suffix}"))
        }
    }

    #[quickcheck]
    fn prop_error_keyword_always_classifies_as_error(line: ErrorLine) -> bool {
        Classifier::new(false).classify(&line.0) == Some(Severity::Error)
    }

    #[quickcheck]
    fn prop_classification_is_deterministic(line: String) -> bool {
        let classifier = Classifier::new(true);
        classifier.classify(&line) == classifier.classify(&line)
    }
}
