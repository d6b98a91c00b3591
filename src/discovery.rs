//! Test discovery: input descriptors, the disabled list, and workflow lookup.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

/// One CI test: an input descriptor paired with the workflow it exercises.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestCase {
    /// File stem of the input descriptor, e.g. `sample1.download`.
    pub id: String,
    /// File name of the input descriptor, e.g. `sample1.download.json`.
    pub file_name: String,
    pub input_path: PathBuf,
}

impl TestCase {
    pub fn from_path(path: &Path) -> Option<Self> {
        let file_name = path.file_name()?.to_str()?.to_string();
        let id = file_name
            .strip_suffix(".json")
            .unwrap_or(&file_name)
            .to_string();
        Some(Self {
            id,
            file_name,
            input_path: path.to_path_buf(),
        })
    }

    /// First dot-delimited segment of the identifier.
    pub fn workflow_prefix(&self) -> &str {
        self.id.split('.').next().unwrap_or(&self.id)
    }

    /// Workflow definition file name this test runs.
    pub fn workflow_file_name(&self) -> String {
        format!("{}.wdl", self.workflow_prefix())
    }

    /// Download tests must not reuse cached results.
    pub fn is_download_test(&self) -> bool {
        self.id.to_ascii_lowercase().contains("download")
    }

    fn matches_entry(&self, entry: &str) -> bool {
        entry == self.id
            || entry == self.file_name
            || Path::new(entry) == self.input_path.as_path()
    }
}

/// Candidate tests and the disabled list.
#[derive(Debug, Default)]
pub struct Discovery {
    pub candidates: Vec<TestCase>,
    pub disabled: BTreeSet<String>,
}

impl Discovery {
    pub fn is_disabled(&self, test: &TestCase) -> bool {
        self.disabled.iter().any(|entry| test.matches_entry(entry))
    }

    /// Candidates minus the disabled list, in discovery order.
    pub fn active(&self) -> Vec<TestCase> {
        self.candidates
            .iter()
            .filter(|t| !self.is_disabled(t))
            .cloned()
            .collect()
    }

    pub fn disabled_count(&self) -> usize {
        self.candidates.iter().filter(|t| self.is_disabled(t)).count()
    }

    /// Log the `[*]` / `[ ]` listing.
    pub fn log_listing(&self) {
        info!(
            "Found {} tests, {} disabled.",
            self.candidates.len(),
            self.disabled_count()
        );
        for test in &self.candidates {
            if self.is_disabled(test) {
                warn!(test = %test.id, "[ ] {}", test.input_path.display());
            } else {
                info!(test = %test.id, "[*] {}", test.input_path.display());
            }
        }
    }
}

/// Enumerate input descriptors and load the disabled list.
pub fn discover(inputs_dir: &Path, disabled_list: &Path) -> Result<Discovery> {
    Ok(Discovery {
        candidates: list_test_inputs(inputs_dir)?,
        disabled: list_disabled_tests(disabled_list)?,
    })
}

/// All `*.json` files directly under `dir`, sorted by file name.
/// A missing directory is an empty suite.
pub fn list_test_inputs(dir: &Path) -> Result<Vec<TestCase>> {
    if !dir.is_dir() {
        debug!(dir = %dir.display(), "test input directory missing");
        return Ok(Vec::new());
    }

    let mut tests = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to read {}", dir.display()))?
    {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == "json") {
            if let Some(test) = TestCase::from_path(&path) {
                tests.push(test);
            }
        }
    }
    tests.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(tests)
}

/// One identifier per line; blank lines and `#` comments are ignored.
pub fn list_disabled_tests(path: &Path) -> Result<BTreeSet<String>> {
    if !path.exists() {
        return Ok(BTreeSet::new());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Walk `root` for a file whose normalized path ends with `file_name`.
pub fn find_workflow(root: &Path, file_name: &str) -> Result<Option<PathBuf>> {
    if !root.is_dir() {
        return Ok(None);
    }

    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(&dir)
            .with_context(|| format!("failed to read {}", dir.display()))?
            .map(|e| e.map(|e| e.path()))
            .collect::<std::io::Result<_>>()?;
        entries.sort();

        for path in entries {
            if path.is_dir() {
                pending.push(path);
            } else if path.to_string_lossy().ends_with(file_name) {
                return Ok(Some(path));
            }
        }
    }
    Ok(None)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
