//! Content comparators: format-aware checks used when checksums disagree.

use std::path::Path;

use thiserror::Error;

use crate::config::CompareConfig;

use super::tools::{BamComparator, GzipTextComparator, PdfTextComparator, SequenceComparator};

#[derive(Debug, Error)]
pub enum CompareError {
    #[error("{tool} failed: {detail}")]
    ToolFailed { tool: String, detail: String },

    #[error("comparison I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of a content-level comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Comparison {
    /// Contents are equivalent for this format.
    Same,
    /// Contents differ; `detail` is shown to the operator.
    Different { detail: String },
}

/// A format-specific equivalence check between two local files.
#[async_trait::async_trait]
pub trait ContentComparator: Send + Sync {
    fn name(&self) -> &'static str;

    /// File name suffixes this comparator is registered for.
    fn suffixes(&self) -> &[&'static str];

    async fn compare(&self, expected: &Path, actual: &Path) -> Result<Comparison, CompareError>;
}

/// Comparators keyed by file name suffix. The longest matching suffix wins,
/// so `.fastq.gz` reaches the sequence comparator before `.gz` reaches the
/// gzip-text one.
#[derive(Default)]
pub struct ComparatorSet {
    comparators: Vec<Box<dyn ContentComparator>>,
}

impl ComparatorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stock comparators, using the tool paths and thresholds in `cfg`.
    pub fn standard(cfg: &CompareConfig) -> Self {
        Self::new()
            .with(SequenceComparator {
                mash: cfg.mash_path.clone(),
                max_distance: cfg.mash_max_distance,
            })
            .with(BamComparator {
                samtools: cfg.samtools_path.clone(),
            })
            .with(GzipTextComparator {
                volatile_marker: cfg.volatile_header.clone(),
            })
            .with(PdfTextComparator {
                pdftotext: cfg.pdftotext_path.clone(),
            })
    }

    pub fn with(mut self, comparator: impl ContentComparator + 'static) -> Self {
        self.comparators.push(Box::new(comparator));
        self
    }

    /// The comparator registered for `file_name`, if any.
    pub fn select(&self, file_name: &str) -> Option<&dyn ContentComparator> {
        self.comparators
            .iter()
            .filter_map(|c| {
                c.suffixes()
                    .iter()
                    .filter(|s| file_name.ends_with(*s))
                    .map(|s| s.len())
                    .max()
                    .map(|len| (len, c))
            })
            .max_by_key(|(len, _)| *len)
            .map(|(_, c)| c.as_ref())
    }
}

impl std::fmt::Debug for ComparatorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.comparators.iter().map(|c| c.name()))
            .finish()
    }
}
