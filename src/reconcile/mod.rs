//! Output reconciliation: expected vs actual outputs of a succeeded test.
//!
//! Outputs are keyed by basename. Equal checksums pass without any download;
//! otherwise both objects are fetched and handed to the content comparator
//! registered for the file name.

pub mod compare;
pub mod diff;
pub mod tools;

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::{CompareConfig, StorageConfig};
use crate::discovery::TestCase;
use crate::storage::{ObjectInfo, ObjectRef, ObjectStore, StorageError};

pub use compare::{CompareError, ComparatorSet, Comparison, ContentComparator};

/// Expected and (if found) actual object for one output basename.
#[derive(Debug, Clone, Serialize)]
pub struct OutputRecord {
    pub basename: String,
    pub expected: ObjectInfo,
    pub actual: Option<ObjectInfo>,
}

impl OutputRecord {
    /// Both checksums are known and equal.
    pub fn checksums_match(&self) -> bool {
        match (&self.expected.md5, self.actual.as_ref().and_then(|a| a.md5.as_ref())) {
            (Some(exp), Some(act)) => exp == act,
            _ => false,
        }
    }
}

/// Output records of one test plus actual files nobody expected.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OutputSet {
    pub records: BTreeMap<String, OutputRecord>,
    pub unexpected: Vec<ObjectRef>,
}

/// Every distinct `gs://<bucket>/...` reference in `text`, as an object-name
/// prefix with the scheme, bucket, and trailing slashes removed.
pub fn result_prefixes(text: &str, bucket: &str) -> BTreeSet<String> {
    let marker = format!("gs://{bucket}/");
    let mut prefixes = BTreeSet::new();
    for line in text.lines() {
        let mut rest = line;
        while let Some(start) = rest.find(&marker) {
            let after = &rest[start + marker.len()..];
            let end = after
                .find(|c: char| c == '"' || c == ',' || c == '\'' || c.is_whitespace())
                .unwrap_or(after.len());
            let prefix = after[..end].trim_end_matches('/');
            if !prefix.is_empty() {
                prefixes.insert(prefix.to_string());
            }
            rest = &after[end..];
        }
    }
    prefixes
}

/// Build the output records for a succeeded test.
pub async fn find_outputs(
    store: &dyn ObjectStore,
    storage: &StorageConfig,
    test: &TestCase,
) -> Result<OutputSet, StorageError> {
    let mut set = OutputSet::default();

    let reference_prefix = storage.reference_prefix_for(&test.id);
    for object in store.list(&storage.resources_bucket, &reference_prefix).await? {
        let name = object.location.basename().to_string();
        if name.is_empty() {
            continue;
        }
        set.records.insert(
            name.clone(),
            OutputRecord {
                basename: name,
                expected: object,
                actual: None,
            },
        );
    }

    let descriptor = tokio::fs::read_to_string(&test.input_path).await?;
    for prefix in result_prefixes(&descriptor, &storage.results_bucket) {
        for object in store.list(&storage.results_bucket, &prefix).await? {
            let name = object.location.basename();
            if name.is_empty() {
                continue;
            }
            match set.records.get_mut(name) {
                Some(record) => record.actual = Some(object),
                None => {
                    warn!(
                        test = %test.id,
                        "Found an actual output file {} that is not in the expected directory",
                        name
                    );
                    set.unexpected.push(object.location);
                }
            }
        }
    }

    Ok(set)
}

/// How one expected output fared.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// Checksums are equal.
    Match,
    /// Checksums differ but the content comparator found them equivalent.
    Equivalent { comparator: String },
    /// Known-nondeterministic output; never a mismatch.
    Exempt,
    /// No comparator for this file type; not counted as a mismatch.
    Unverifiable,
    Mismatch { reason: String },
}

impl Verdict {
    pub fn is_mismatch(&self) -> bool {
        matches!(self, Self::Mismatch { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileResult {
    pub basename: String,
    pub expected: ObjectInfo,
    pub actual: Option<ObjectInfo>,
    #[serde(flatten)]
    pub verdict: Verdict,
}

/// Per-test reconciliation outcome.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OutputReport {
    pub files: Vec<FileResult>,
    pub unexpected: Vec<String>,
}

impl OutputReport {
    pub fn checked(&self) -> usize {
        self.files.len()
    }

    pub fn mismatches(&self) -> usize {
        self.files.iter().filter(|f| f.verdict.is_mismatch()).count()
    }

    pub fn count(&self, pred: impl Fn(&Verdict) -> bool) -> usize {
        self.files.iter().filter(|f| pred(&f.verdict)).count()
    }
}

/// Compares output sets using a store for downloads and a comparator set.
pub struct Reconciler<'a> {
    pub store: &'a dyn ObjectStore,
    pub comparators: &'a ComparatorSet,
    pub config: &'a CompareConfig,
}

impl Reconciler<'_> {
    pub async fn compare_outputs(&self, outputs: &OutputSet) -> OutputReport {
        let mut report = OutputReport {
            files: Vec::with_capacity(outputs.records.len()),
            unexpected: outputs.unexpected.iter().map(ToString::to_string).collect(),
        };

        for record in outputs.records.values() {
            let verdict = self.check(record).await;
            if let Verdict::Mismatch { reason } = &verdict {
                info!("- {} versions are different:", record.basename);
                error!(
                    verdict = "FAIL",
                    "    exp: ({}) {}",
                    record.expected.md5.as_deref().unwrap_or("None"),
                    record.expected.location
                );
                match &record.actual {
                    Some(act) => error!(
                        verdict = "FAIL",
                        "    act: ({}) {}",
                        act.md5.as_deref().unwrap_or("None"),
                        act.location
                    ),
                    None => error!(verdict = "FAIL", "    act: (None) None"),
                }
                warn!("    {}", reason);
            }
            report.files.push(FileResult {
                basename: record.basename.clone(),
                expected: record.expected.clone(),
                actual: record.actual.clone(),
                verdict,
            });
        }

        report
    }

    async fn check(&self, record: &OutputRecord) -> Verdict {
        if record.checksums_match() {
            return Verdict::Match;
        }
        if self.config.is_exempt(&record.basename) {
            return Verdict::Exempt;
        }
        let Some(actual) = &record.actual else {
            return Verdict::Mismatch {
                reason: "no actual output found".to_string(),
            };
        };

        let Some(comparator) = self.comparators.select(&record.basename) else {
            warn!(
                "Unknown file extension for file {} and {}",
                record.expected.location, actual.location
            );
            return if self.config.unverifiable_is_mismatch {
                Verdict::Mismatch {
                    reason: "no content comparator for this file type".to_string(),
                }
            } else {
                Verdict::Unverifiable
            };
        };

        match self
            .compare_contents(comparator, &record.expected.location, &actual.location, &record.basename)
            .await
        {
            Ok(Comparison::Same) => Verdict::Equivalent {
                comparator: comparator.name().to_string(),
            },
            Ok(Comparison::Different { detail }) => {
                warn!(
                    "comparing \"{}\" vs \"{}\"",
                    record.expected.location, actual.location
                );
                Verdict::Mismatch { reason: detail }
            }
            Err(e) => Verdict::Mismatch {
                reason: e.to_string(),
            },
        }
    }

    async fn compare_contents(
        &self,
        comparator: &dyn ContentComparator,
        expected: &ObjectRef,
        actual: &ObjectRef,
        basename: &str,
    ) -> anyhow::Result<Comparison> {
        let scratch = tempfile::TempDir::new()?;
        let exp_path = scratch.path().join(format!("exp.{basename}"));
        let act_path = scratch.path().join(format!("act.{basename}"));

        self.store.download(expected, &exp_path).await?;
        self.store.download(actual, &act_path).await?;

        Ok(comparator.compare(&exp_path, &act_path).await?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Reports every pair as equivalent and counts calls.
    struct AlwaysSame {
        suffix: &'static [&'static str],
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl ContentComparator for AlwaysSame {
        fn name(&self) -> &'static str {
            "always-same"
        }
        fn suffixes(&self) -> &[&'static str] {
            self.suffix
        }
        async fn compare(&self, e: &Path, a: &Path) -> Result<Comparison, CompareError> {
            assert!(e.exists() && a.exists());
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Comparison::Same)
        }
    }

    fn info(bucket: &str, name: &str, md5: Option<&str>) -> ObjectInfo {
        ObjectInfo {
            location: ObjectRef::new(bucket, name),
            md5: md5.map(str::to_string),
        }
    }

    fn record(name: &str, exp: Option<&str>, act: Option<Option<&str>>) -> OutputRecord {
        OutputRecord {
            basename: name.to_string(),
            expected: info("res", &format!("ref/{name}"), exp),
            actual: act.map(|md5| info("out", &format!("T/{name}"), md5)),
        }
    }

    fn set(records: Vec<OutputRecord>) -> OutputSet {
        OutputSet {
            records: records.into_iter().map(|r| (r.basename.clone(), r)).collect(),
            unexpected: Vec::new(),
        }
    }

    #[test]
    fn test_result_prefixes_from_descriptor() {
        let json = r#"{
  "PBFlowcell.bam": "gs://other-bucket/inputs/reads.bam",
  "PBFlowcell.gcs_out_root_dir": "gs://broad-dsp-lrma-ci/PBFlowcell/",
  "PBFlowcell.extra": ["gs://broad-dsp-lrma-ci/PBFlowcell/extra", "gs://broad-dsp-lrma-ci/PBFlowcell"]
}"#;
        let prefixes = result_prefixes(json, "broad-dsp-lrma-ci");
        let got: Vec<_> = prefixes.into_iter().collect();
        assert_eq!(got, vec!["PBFlowcell", "PBFlowcell/extra"]);
    }

    #[test]
    fn test_checksums_match_requires_both() {
        assert!(record("a.bam", Some("md5:abc=="), Some(Some("md5:abc=="))).checksums_match());
        assert!(!record("a.bam", Some("md5:abc=="), Some(Some("md5:xyz=="))).checksums_match());
        assert!(!record("a.bam", None, Some(None)).checksums_match());
        assert!(!record("a.bam", Some("md5:abc=="), None).checksums_match());
    }

    #[tokio::test]
    async fn test_find_outputs_keys_by_basename_and_flags_extras() {
        let dir = tempfile::TempDir::new().unwrap();
        let input = dir.path().join("T.json");
        std::fs::write(&input, "{\n  \"T.out\": \"gs://out/T/run1/\"\n}\n").unwrap();
        let test = TestCase::from_path(&input).unwrap();

        let store = MemoryStore::new();
        store.insert(ObjectRef::new("res", "test_data/T/output_data/a.bam"), b"A".to_vec());
        store.insert(ObjectRef::new("res", "test_data/T/output_data/b.vcf.gz"), b"B".to_vec());
        store.insert(ObjectRef::new("out", "T/run1/sub/a.bam"), b"A".to_vec());
        store.insert(ObjectRef::new("out", "T/run1/extra.log"), b"x".to_vec());

        let storage = StorageConfig {
            results_bucket: "out".to_string(),
            resources_bucket: "res".to_string(),
            ..StorageConfig::default()
        };
        let outputs = find_outputs(&store, &storage, &test).await.unwrap();

        assert_eq!(outputs.records.len(), 2);
        let a = &outputs.records["a.bam"];
        assert_eq!(a.actual.as_ref().unwrap().location.name, "T/run1/sub/a.bam");
        assert!(a.checksums_match());
        assert!(outputs.records["b.vcf.gz"].actual.is_none());
        assert_eq!(outputs.unexpected, vec![ObjectRef::new("out", "T/run1/extra.log")]);
    }

    #[tokio::test]
    async fn test_equal_checksums_pass_without_download() {
        let store = MemoryStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let comparators = ComparatorSet::new().with(AlwaysSame {
            suffix: &[".bam"],
            calls: calls.clone(),
        });
        let config = CompareConfig::default();
        let r = Reconciler { store: &store, comparators: &comparators, config: &config };

        let report = r
            .compare_outputs(&set(vec![record("a.bam", Some("md5:abc=="), Some(Some("md5:abc==")))]))
            .await;

        assert_eq!(report.mismatches(), 0);
        assert_eq!(report.files[0].verdict, Verdict::Match);
        assert_eq!(store.download_count(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_bam_with_equivalent_records_passes() {
        let store = MemoryStore::new();
        store.insert_with_md5(ObjectRef::new("res", "ref/a.bam"), b"exp".to_vec(), "md5:1");
        store.insert_with_md5(ObjectRef::new("out", "T/a.bam"), b"act".to_vec(), "md5:2");
        let calls = Arc::new(AtomicUsize::new(0));
        let comparators = ComparatorSet::new().with(AlwaysSame {
            suffix: &[".bam"],
            calls: calls.clone(),
        });
        let config = CompareConfig::default();
        let r = Reconciler { store: &store, comparators: &comparators, config: &config };

        let report = r
            .compare_outputs(&set(vec![record("a.bam", Some("md5:1"), Some(Some("md5:2")))]))
            .await;

        assert_eq!(report.mismatches(), 0);
        assert!(matches!(report.files[0].verdict, Verdict::Equivalent { .. }));
        assert_eq!(store.download_count(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exempt_files_never_mismatch() {
        let store = MemoryStore::new();
        let comparators = ComparatorSet::new();
        let config = CompareConfig::default();
        let r = Reconciler { store: &store, comparators: &comparators, config: &config };

        let report = r
            .compare_outputs(&set(vec![
                record("coverage.png", Some("md5:1"), Some(Some("md5:2"))),
                record("calls.vcf.gz.tbi", Some("md5:1"), None),
                record("sequencing_summary.txt", Some("md5:1"), Some(Some("md5:3"))),
            ]))
            .await;

        assert_eq!(report.mismatches(), 0);
        assert_eq!(report.count(|v| *v == Verdict::Exempt), 3);
        assert_eq!(store.download_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_actual_is_a_mismatch() {
        let store = MemoryStore::new();
        let comparators = ComparatorSet::new();
        let config = CompareConfig::default();
        let r = Reconciler { store: &store, comparators: &comparators, config: &config };

        let report = r
            .compare_outputs(&set(vec![record("a.bam", Some("md5:1"), None)]))
            .await;
        assert_eq!(report.mismatches(), 1);
    }

    #[tokio::test]
    async fn test_unknown_extension_is_unverifiable_by_default() {
        let store = MemoryStore::new();
        let comparators = ComparatorSet::new();
        let mut config = CompareConfig::default();
        let outputs = set(vec![record("stats.txt", Some("md5:1"), Some(Some("md5:2")))]);

        let r = Reconciler { store: &store, comparators: &comparators, config: &config };
        let report = r.compare_outputs(&outputs).await;
        assert_eq!(report.mismatches(), 0);
        assert_eq!(report.files[0].verdict, Verdict::Unverifiable);
        assert_eq!(store.download_count(), 0);

        config.unverifiable_is_mismatch = true;
        let r = Reconciler { store: &store, comparators: &comparators, config: &config };
        assert_eq!(r.compare_outputs(&outputs).await.mismatches(), 1);
    }

    #[tokio::test]
    async fn test_download_failure_is_a_mismatch() {
        let store = MemoryStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let comparators = ComparatorSet::new().with(AlwaysSame {
            suffix: &[".bam"],
            calls: calls.clone(),
        });
        let config = CompareConfig::default();
        let r = Reconciler { store: &store, comparators: &comparators, config: &config };

        let report = r
            .compare_outputs(&set(vec![record("a.bam", Some("md5:1"), Some(Some("md5:2")))]))
            .await;
        assert_eq!(report.mismatches(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
