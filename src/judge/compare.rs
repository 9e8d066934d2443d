use crate::config::types::{ComparisonResult, LineDifference};
use serde::{Deserialize, Serialize};

/// Normalization policy for [`compare`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompareOptions {
    /// Collapse every whitespace run, newlines included, to one space
    /// before splitting into lines
    pub ignore_whitespace: bool,
    pub ignore_case: bool,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            ignore_whitespace: true,
            ignore_case: false,
        }
    }
}

fn normalize(text: &str, options: &CompareOptions) -> String {
    let mut text = if options.ignore_whitespace {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    } else {
        text.to_string()
    };
    if options.ignore_case {
        text = text.to_lowercase();
    }
    text
}

/// Positional line diff of `actual` against `expected`.
///
/// With `ignore_whitespace` the whole text collapses onto one line first,
/// so a multi-line mismatch is reported as a single difference on line 1.
pub fn compare(actual: &str, expected: &str, options: &CompareOptions) -> ComparisonResult {
    let actual = normalize(actual, options);
    let expected = normalize(expected, options);

    let actual_lines: Vec<&str> = actual.trim().split('\n').collect();
    let expected_lines: Vec<&str> = expected.trim().split('\n').collect();

    let longest = actual_lines.len().max(expected_lines.len());
    let differences: Vec<LineDifference> = (0..longest)
        .filter_map(|i| {
            let a = actual_lines.get(i).copied().unwrap_or("");
            let e = expected_lines.get(i).copied().unwrap_or("");
            (a != e).then(|| LineDifference {
                line: i + 1,
                actual: a.to_string(),
                expected: e.to_string(),
            })
        })
        .collect();

    ComparisonResult {
        matched: differences.is_empty(),
        differences,
        actual_line_count: actual_lines.len(),
        expected_line_count: expected_lines.len(),
    }
}
