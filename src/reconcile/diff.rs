//! Line-level comparison of extracted text.

/// Differences kept in a report before truncating.
const MAX_REPORTED: usize = 5;

/// Result of comparing two line sequences position by position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineDiff {
    pub expected_lines: usize,
    pub actual_lines: usize,
    /// Count of positions whose lines differ (including the length overhang).
    pub differing: usize,
    /// The first few differing positions: (1-based line, expected, actual).
    pub samples: Vec<(usize, Option<String>, Option<String>)>,
}

impl LineDiff {
    /// Record the next position. `None` means that side has run out of lines.
    pub fn push(&mut self, expected: Option<&str>, actual: Option<&str>) {
        let line = self.expected_lines.max(self.actual_lines) + 1;
        self.expected_lines += usize::from(expected.is_some());
        self.actual_lines += usize::from(actual.is_some());
        if expected != actual {
            self.differing += 1;
            if self.samples.len() < MAX_REPORTED {
                self.samples
                    .push((line, expected.map(str::to_string), actual.map(str::to_string)));
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.differing == 0
    }

    pub fn summary(&self) -> String {
        let mut out = format!(
            "{} differing line(s); expected {} lines, actual {} lines",
            self.differing, self.expected_lines, self.actual_lines
        );
        for (line, exp, act) in &self.samples {
            out.push_str(&format!(
                "\n  {}: < {}\n  {}: > {}",
                line,
                exp.as_deref().unwrap_or("<missing>"),
                line,
                act.as_deref().unwrap_or("<missing>"),
            ));
        }
        if self.differing > self.samples.len() {
            out.push_str(&format!("\n  ... {} more", self.differing - self.samples.len()));
        }
        out
    }
}

pub fn diff_lines<S: AsRef<str>>(expected: &[S], actual: &[S]) -> LineDiff {
    let mut diff = LineDiff::default();
    for i in 0..expected.len().max(actual.len()) {
        diff.push(
            expected.get(i).map(AsRef::as_ref),
            actual.get(i).map(AsRef::as_ref),
        );
    }
    diff
}
