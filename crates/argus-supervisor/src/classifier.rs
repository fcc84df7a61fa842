//! Line classifier turning raw process output into [`StreamError`] values.
//!
//! Built-in patterns are tiered (language-specific hard failures first, then generic
//! case-insensitive fallbacks) and compiled once per process lifetime. Caller patterns
//! supplied with a [`crate::ProcessCommand`] are compiled once per start and consulted
//! after the built-ins.

use std::sync::OnceLock;

use regex::{Regex, RegexSet};

use crate::error::CommandValidationError;
use crate::types::{ErrorSeverity, ErrorType, OutputStream, StreamError};

pub const CONTEXT_WINDOW_LINES: usize = 5;

const BUILTIN_SPECIFIC_PATTERNS: &[&str] = &[
    // JavaScript / TypeScript
    r"Error: .+",
    r"TypeError: .+",
    r"SyntaxError: .+",
    r"Module not found: .+",
    r"Failed to compile",
    r"Compilation error",
    // Go
    r"panic: .+",
    r"fatal error: .+",
    r#"cannot find package ".+""#,
    r"undefined: .+",
    // Python
    r"Traceback \(most recent call last\)",
    r"ImportError: .+",
    r"NameError: .+",
    // Test runners
    r"FAIL .+",
    r"Error: expect\(.+\)",
    r"AssertionError",
    // Servers
    r"EADDRINUSE .+",
    r"listen EADDRINUSE .+",
    r"Connection refused",
    r"ECONNREFUSED",
];

const BUILTIN_GENERIC_PATTERNS: &[&str] = &[
    r"(?i)error.*",
    r"(?i)exception.*",
    r"(?i)failed.*",
    r"(?i)fatal.*",
];

const WARNING_PATTERN: &str = r"(?i)(warn|warning)";
const COMPILATION_PATTERN: &str = r"(?i)(syntax|parse|compile)";
const TEST_PATTERN: &str = r"(?i)(test|spec|assertion)";
const SERVER_PATTERN: &str = r"(?i)(server|port|listen|connect)";

const LOCATION_FILE_LINE_COLUMN_PATTERN: &str =
    r"[\w./\\-]+\.[A-Za-z0-9]+:(\d+)(?::(\d+))?";
const LOCATION_PAREN_PATTERN: &str = r"\((\d+),(\d+)\)";
const LOCATION_LINE_WORD_PATTERN: &str = r"(?i)\bline (\d+)";

/// Which tier produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternTier {
    Specific,
    Generic,
    Caller,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub tier: PatternTier,
    pub error_type: ErrorType,
    pub severity: ErrorSeverity,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

/// Identity of the process a classified line is attributed to.
#[derive(Debug, Clone, Copy)]
pub struct LineOrigin<'a> {
    pub pid: u32,
    pub command: &'a str,
    pub source: OutputStream,
}

/// Caller-supplied patterns compiled for one process start.
#[derive(Debug, Clone, Default)]
pub struct CustomPatterns {
    patterns: Vec<Regex>,
}

impl CustomPatterns {
    pub fn compile(raw_patterns: &[String]) -> Result<Self, CommandValidationError> {
        let patterns = raw_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|error| CommandValidationError::InvalidErrorPattern {
                    pattern: pattern.clone(),
                    reason: error.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    fn is_match(&self, line: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern.is_match(line))
    }
}

#[derive(Debug)]
pub struct ErrorClassifier {
    specific: RegexSet,
    generic: RegexSet,
    warning: Regex,
    compilation: Regex,
    test: Regex,
    server: Regex,
    location_file: Regex,
    location_paren: Regex,
    location_line_word: Regex,
}

impl ErrorClassifier {
    /// Shared classifier with the built-in pattern set.
    pub fn builtin() -> &'static ErrorClassifier {
        static CLASSIFIER: OnceLock<ErrorClassifier> = OnceLock::new();
        CLASSIFIER
            .get_or_init(|| Self::try_new().expect("built-in patterns are hardcoded and must be valid"))
    }

    fn try_new() -> Result<Self, regex::Error> {
        Ok(Self {
            specific: RegexSet::new(BUILTIN_SPECIFIC_PATTERNS)?,
            generic: RegexSet::new(BUILTIN_GENERIC_PATTERNS)?,
            warning: Regex::new(WARNING_PATTERN)?,
            compilation: Regex::new(COMPILATION_PATTERN)?,
            test: Regex::new(TEST_PATTERN)?,
            server: Regex::new(SERVER_PATTERN)?,
            location_file: Regex::new(LOCATION_FILE_LINE_COLUMN_PATTERN)?,
            location_paren: Regex::new(LOCATION_PAREN_PATTERN)?,
            location_line_word: Regex::new(LOCATION_LINE_WORD_PATTERN)?,
        })
    }

    pub fn classify(&self, line: &str, custom: &CustomPatterns) -> Option<Classification> {
        let tier = if self.specific.is_match(line) {
            PatternTier::Specific
        } else if self.generic.is_match(line) {
            PatternTier::Generic
        } else if custom.is_match(line) {
            PatternTier::Caller
        } else {
            return None;
        };

        let severity = if self.warning.is_match(line) {
            ErrorSeverity::Warning
        } else {
            ErrorSeverity::Error
        };
        let error_type = if self.compilation.is_match(line) {
            ErrorType::Compilation
        } else if self.test.is_match(line) {
            ErrorType::Test
        } else if self.server.is_match(line) {
            ErrorType::Server
        } else {
            ErrorType::Runtime
        };
        let (line_number, column) = self.extract_location(line);

        Some(Classification {
            tier,
            error_type,
            severity,
            line: line_number,
            column,
        })
    }

    /// Classifies `line` and, on a match, builds the [`StreamError`] carrying `context`.
    pub fn classify_output_line(
        &self,
        line: &str,
        origin: LineOrigin<'_>,
        context: &[String],
        custom: &CustomPatterns,
        timestamp_unix_ms: u64,
    ) -> Option<StreamError> {
        let classification = self.classify(line, custom)?;
        let context_start = context.len().saturating_sub(CONTEXT_WINDOW_LINES);
        Some(StreamError {
            process_pid: origin.pid,
            command: origin.command.to_string(),
            error_type: classification.error_type,
            severity: classification.severity,
            message: line.to_string(),
            context: context[context_start..].to_vec(),
            source: origin.source,
            timestamp_unix_ms,
            line: classification.line,
            column: classification.column,
        })
    }

    fn extract_location(&self, line: &str) -> (Option<u32>, Option<u32>) {
        let parse = |capture: Option<regex::Match<'_>>| {
            capture.and_then(|value| value.as_str().parse::<u32>().ok())
        };
        if let Some(captures) = self.location_file.captures(line) {
            return (parse(captures.get(1)), parse(captures.get(2)));
        }
        if let Some(captures) = self.location_paren.captures(line) {
            return (parse(captures.get(1)), parse(captures.get(2)));
        }
        if let Some(captures) = self.location_line_word.captures(line) {
            return (parse(captures.get(1)), None);
        }
        (None, None)
    }
}
