//! Ordered pattern table mapping log text to failure types.

use regex::Regex;
use tracing::warn;

use super::FailureType;

/// How a pattern is matched against the logs.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Case-sensitive substring.
    Literal(String),
    /// Regular expression.
    Regex(Regex),
}

/// A single weighted pattern.
#[derive(Debug, Clone)]
pub struct Pattern {
    matcher: Matcher,
    confidence: f64,
}

impl Pattern {
    /// Creates a literal pattern.
    #[must_use]
    pub fn literal(text: impl Into<String>, confidence: f64) -> Self {
        Self {
            matcher: Matcher::Literal(text.into()),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// Creates a regex pattern.
    pub fn regex(source: &str, confidence: f64) -> Result<Self, regex::Error> {
        Ok(Self {
            matcher: Matcher::Regex(Regex::new(source)?),
            confidence: confidence.clamp(0.0, 1.0),
        })
    }

    /// The pattern source text.
    #[must_use]
    pub fn source(&self) -> &str {
        match &self.matcher {
            Matcher::Literal(text) => text,
            Matcher::Regex(re) => re.as_str(),
        }
    }

    /// The confidence assigned to a hit.
    #[must_use]
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Returns the byte range of the first hit.
    #[must_use]
    pub fn find(&self, logs: &str) -> Option<(usize, usize)> {
        match &self.matcher {
            Matcher::Literal(text) => logs.find(text.as_str()).map(|at| (at, at + text.len())),
            Matcher::Regex(re) => re.find(logs).map(|m| (m.start(), m.end())),
        }
    }
}

/// A pattern hit.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternMatch {
    /// The type the pattern belongs to.
    pub failure_type: FailureType,
    /// The pattern source.
    pub pattern: String,
    /// The matched text.
    pub matched: String,
    /// The line containing the hit.
    pub line: String,
    /// Confidence of the hit.
    pub confidence: f64,
}

/// Patterns grouped by failure type, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct PatternTable {
    entries: Vec<(FailureType, Vec<Pattern>)>,
}

impl PatternTable {
    /// Creates an empty table.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Adds a pattern under a type.
    pub fn add(&mut self, failure_type: FailureType, pattern: Pattern) {
        if let Some((_, patterns)) = self.entries.iter_mut().find(|(t, _)| *t == failure_type) {
            patterns.push(pattern);
        } else {
            self.entries.push((failure_type, vec![pattern]));
        }
    }

    /// Adds a pattern, builder style.
    #[must_use]
    pub fn with(mut self, failure_type: FailureType, pattern: Pattern) -> Self {
        self.add(failure_type, pattern);
        self
    }

    /// Number of patterns across all types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.iter().map(|(_, p)| p.len()).sum()
    }

    /// Returns true if no patterns are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns every hit, in table order.
    #[must_use]
    pub fn matches(&self, logs: &str) -> Vec<PatternMatch> {
        let mut hits = Vec::new();
        for (failure_type, patterns) in &self.entries {
            for pattern in patterns {
                if let Some((start, end)) = pattern.find(logs) {
                    hits.push(PatternMatch {
                        failure_type: *failure_type,
                        pattern: pattern.source().to_string(),
                        matched: logs[start..end].to_string(),
                        line: line_around(logs, start, end),
                        confidence: pattern.confidence(),
                    });
                }
            }
        }
        hits
    }

    /// The built-in table.
    ///
    /// Strong markers (exception class names, tool-specific output) score
    /// near 1.0; generic words score below the default floor and only
    /// matter when the floor is lowered.
    #[must_use]
    pub fn builtin() -> Self {
        let mut table = Self::empty();

        let security: &[(&str, f64)] = &[
            (r"SecurityViolation", 1.0),
            (r"CVE-\d{4}-\d{4,}", 0.95),
            (r"(?i)hard-?coded (secret|password|credential|api[ _]?key)", 0.9),
            (r"(?i)sql injection", 0.9),
            (r"(?i)secret (detected|leak(ed)?)", 0.85),
            (r"(?i)\bvulnerab(le|ility|ilities)\b", 0.6),
            (r"(?i)\binsecure\b", 0.45),
        ];
        let test_assert: &[(&str, f64)] = &[
            (r"(?m)^FAILED \S+::\S+", 0.9),
            (r"assertion (`[^`]*` )?failed", 0.95),
            (r"(?i)\b\d+ failed\b", 0.75),
            (r"(?i)\btests? failed\b", 0.6),
            (r"(?i)expected .{1,80} (but )?(got|found|received)", 0.45),
        ];
        let lint: &[(&str, f64)] = &[
            (r"clippy::[a-z_]+", 0.9),
            (r"(?i)\blint(ing|er)? (error|errors|failed|failure)\b", 0.85),
            (r"(?i)\bwould reformat\b", 0.8),
            (r"(?i)\b(eslint|pylint|flake8|ruff)\b", 0.75),
            (r"(?m):\d+:\d+: [EWF]\d{3,4}\b", 0.7),
            (r"(?i)\bstyle violation", 0.55),
        ];
        let dependency: &[(&str, f64)] = &[
            (r"(?i)no module named", 0.9),
            (r"(?i)cannot find module", 0.9),
            (r"(?i)could not resolve (dependency|package|import)", 0.85),
            (r"(?i)unresolved import", 0.85),
            (r"ImportError", 0.8),
        ];
        let rate_limit: &[(&str, f64)] = &[
            (r"(?i)429 too many requests", 1.0),
            (r"(?i)rate[ _-]?limit(ed|s)?", 0.9),
            (r"(?i)too many requests", 0.9),
            (r"(?i)quota exceeded", 0.8),
            (r"\b429\b", 0.6),
        ];
        let transient: &[(&str, f64)] = &[
            (r"(?i)connection (reset|refused|aborted)", 0.85),
            (r"(?i)temporar(il)?y unavailable", 0.8),
            (r"(?i)service unavailable", 0.8),
            (r"(?i)\btime(d)?[ _-]?out\b", 0.75),
            (r"(?i)broken pipe", 0.7),
            (r"\b50[234]\b", 0.55),
            (r"(?i)try again", 0.5),
            (r"(?i)\berror\b", 0.2),
            (r"(?i)\bfailed\b", 0.15),
        ];

        for literal in ["AssertionError", "assert_eq!"] {
            table.add(FailureType::TestAssert, Pattern::literal(literal, 1.0));
        }
        table.add(FailureType::Dependency, Pattern::literal("ModuleNotFoundError", 1.0));
        table.add(FailureType::RateLimit, Pattern::literal("RateLimitError", 1.0));
        table.add(FailureType::Transient, Pattern::literal("ConnectionResetError", 0.9));

        for (failure_type, sources) in [
            (FailureType::Security, security),
            (FailureType::TestAssert, test_assert),
            (FailureType::Lint, lint),
            (FailureType::Dependency, dependency),
            (FailureType::RateLimit, rate_limit),
            (FailureType::Transient, transient),
        ] {
            for (source, confidence) in sources {
                match Pattern::regex(source, *confidence) {
                    Ok(pattern) => table.add(failure_type, pattern),
                    Err(e) => warn!(pattern = *source, error = %e, "Skipping invalid failure pattern"),
                }
            }
        }

        table
    }
}

fn line_around(logs: &str, start: usize, end: usize) -> String {
    let line_start = logs[..start].rfind('\n').map_or(0, |i| i + 1);
    let line_end = logs[end..].find('\n').map_or(logs.len(), |i| end + i);
    logs[line_start..line_end].trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_table_compiles_all_patterns() {
        let table = PatternTable::builtin();
        assert_eq!(table.len(), 42);
    }

    #[test]
    fn test_literal_match_reports_line() {
        let table = PatternTable::empty()
            .with(FailureType::TestAssert, Pattern::literal("AssertionError", 1.0));

        let hits = table.matches("collected 3 items\nE   AssertionError: assert 1 == 2\ndone");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].matched, "AssertionError");
        assert_eq!(hits[0].line, "E   AssertionError: assert 1 == 2");
    }

    #[test]
    fn test_regex_match() {
        let table = PatternTable::empty().with(
            FailureType::RateLimit,
            Pattern::regex(r"(?i)rate[ _-]?limit", 0.9).unwrap(),
        );

        let hits = table.matches("upstream said: Rate-Limit reached");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].failure_type, FailureType::RateLimit);
        assert!((hits[0].confidence - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_confidence_is_clamped() {
        let pattern = Pattern::literal("x", 3.0);
        assert!((pattern.confidence() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_invalid_regex_rejected() {
        assert!(Pattern::regex("(unclosed", 0.5).is_err());
    }
}
