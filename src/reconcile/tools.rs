//! Stock comparators backed by external tools or in-process decoding.

use std::collections::hash_map::DefaultHasher;
use std::ffi::OsStr;
use std::hash::{Hash, Hasher};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncReadExt};
use tokio::process::Command;
use tracing::debug;

use super::compare::{CompareError, Comparison, ContentComparator};
use super::diff::{diff_lines, LineDiff};

/// Run `program args...` and return stdout, failing on a non-zero exit.
async fn run_tool(program: &str, args: &[&OsStr]) -> Result<Vec<u8>, CompareError> {
    debug!(program, ?args, "running comparison tool");
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| CompareError::ToolFailed {
            tool: program.to_string(),
            detail: format!("could not execute: {e}"),
        })?;

    if !output.status.success() {
        return Err(CompareError::ToolFailed {
            tool: program.to_string(),
            detail: format!(
                "exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    Ok(output.stdout)
}

fn to_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::to_string)
        .collect()
}

fn line_comparison(expected: &[String], actual: &[String]) -> Comparison {
    diff_comparison(diff_lines(expected, actual))
}

fn diff_comparison(diff: LineDiff) -> Comparison {
    if diff.is_empty() {
        Comparison::Same
    } else {
        Comparison::Different {
            detail: diff.summary(),
        }
    }
}

// ---------------------------------------------------------------------------
// Sequences (mash)
// ---------------------------------------------------------------------------

/// Approximate sequence comparison by MinHash distance.
#[derive(Debug, Clone)]
pub struct SequenceComparator {
    pub mash: String,
    /// Distances at or above this are a mismatch.
    pub max_distance: f64,
}

/// Distance from `mash dist -t` output: a `#query` header line followed by
/// one `<reference>\t<distance>` row. Columns are tab-separated; paths may
/// contain spaces.
pub fn parse_mash_table(output: &str) -> Option<f64> {
    output
        .lines()
        .filter(|l| !l.starts_with('#'))
        .find_map(|l| {
            let (_, distance) = l.rsplit_once('\t')?;
            distance.trim().parse().ok()
        })
}

#[async_trait::async_trait]
impl ContentComparator for SequenceComparator {
    fn name(&self) -> &'static str {
        "mash"
    }

    fn suffixes(&self) -> &[&'static str] {
        &[".fastq", ".fastq.gz", ".fq.gz", ".fasta", ".fasta.gz", ".fa.gz"]
    }

    async fn compare(&self, expected: &Path, actual: &Path) -> Result<Comparison, CompareError> {
        let stdout = run_tool(
            &self.mash,
            &[
                OsStr::new("dist"),
                OsStr::new("-t"),
                expected.as_os_str(),
                actual.as_os_str(),
            ],
        )
        .await?;
        let table = String::from_utf8_lossy(&stdout);
        let distance = parse_mash_table(&table).ok_or_else(|| CompareError::ToolFailed {
            tool: self.mash.clone(),
            detail: format!("no distance in output: {}", table.trim()),
        })?;

        if distance < self.max_distance {
            Ok(Comparison::Same)
        } else {
            Ok(Comparison::Different {
                detail: format!("mash distance {distance} >= {}", self.max_distance),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// BAM (samtools)
// ---------------------------------------------------------------------------

/// Alignment records compared as a multiset, so record order does not
/// matter. Records are streamed from `samtools view` and kept only as
/// 64-bit hashes.
#[derive(Debug, Clone)]
pub struct BamComparator {
    pub samtools: String,
}

fn line_hash(line: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    line.hash(&mut hasher);
    hasher.finish()
}

/// Entries present in one sorted sequence but not matched in the other.
fn unmatched(expected: &[u64], actual: &[u64]) -> usize {
    let (mut i, mut j, mut count) = (0, 0, 0);
    while i < expected.len() && j < actual.len() {
        match expected[i].cmp(&actual[j]) {
            std::cmp::Ordering::Equal => {
                i += 1;
                j += 1;
            }
            std::cmp::Ordering::Less => {
                count += 1;
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                count += 1;
                j += 1;
            }
        }
    }
    count + (expected.len() - i) + (actual.len() - j)
}

impl BamComparator {
    async fn sorted_record_hashes(&self, bam: &Path) -> Result<Vec<u64>, CompareError> {
        let tool_failed = |detail: String| CompareError::ToolFailed {
            tool: self.samtools.clone(),
            detail,
        };
        debug!(program = %self.samtools, bam = %bam.display(), "streaming alignment records");

        let mut child = Command::new(&self.samtools)
            .arg("view")
            .arg(bam)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| tool_failed(format!("could not execute: {e}")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| tool_failed("stdout not captured".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| tool_failed("stderr not captured".to_string()))?;

        let read_records = async {
            let mut lines = tokio::io::BufReader::new(stdout).lines();
            let mut hashes = Vec::new();
            while let Some(line) = lines.next_line().await? {
                hashes.push(line_hash(&line));
            }
            Ok::<_, std::io::Error>(hashes)
        };
        let read_errors = async {
            let mut buf = Vec::new();
            stderr.read_to_end(&mut buf).await?;
            Ok::<_, std::io::Error>(buf)
        };
        let (mut hashes, errors) = tokio::try_join!(read_records, read_errors)?;

        let status = child.wait().await?;
        if !status.success() {
            return Err(tool_failed(format!(
                "exited with {}: {}",
                status,
                String::from_utf8_lossy(&errors).trim()
            )));
        }
        hashes.sort_unstable();
        Ok(hashes)
    }
}

#[async_trait::async_trait]
impl ContentComparator for BamComparator {
    fn name(&self) -> &'static str {
        "samtools"
    }

    fn suffixes(&self) -> &[&'static str] {
        &[".bam"]
    }

    async fn compare(&self, expected: &Path, actual: &Path) -> Result<Comparison, CompareError> {
        let exp = self.sorted_record_hashes(expected).await?;
        let act = self.sorted_record_hashes(actual).await?;
        let differing = unmatched(&exp, &act);
        if differing == 0 {
            Ok(Comparison::Same)
        } else {
            Ok(Comparison::Different {
                detail: format!(
                    "{} unmatched alignment record(s); expected {} records, actual {} records",
                    differing,
                    exp.len(),
                    act.len()
                ),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Gzip text
// ---------------------------------------------------------------------------

/// Decompressed text minus lines carrying a volatile header (e.g. a VCF
/// `##fileDate=` line).
#[derive(Debug, Clone)]
pub struct GzipTextComparator {
    pub volatile_marker: String,
}

fn filtered_lines<'a>(
    path: &Path,
    volatile_marker: &'a str,
) -> Result<impl Iterator<Item = std::io::Result<String>> + 'a, CompareError> {
    let file = std::fs::File::open(path)?;
    let reader = BufReader::new(flate2::read::MultiGzDecoder::new(file));
    Ok(reader
        .split(b'\n')
        .map(|line| line.map(|l| String::from_utf8_lossy(&l).into_owned()))
        .filter(move |line| line.as_ref().map_or(true, |l| !l.contains(volatile_marker))))
}

/// Walk both decompressed streams in lockstep; only the diff samples are kept.
fn gunzip_diff(
    expected: PathBuf,
    actual: PathBuf,
    volatile_marker: String,
) -> Result<LineDiff, CompareError> {
    let mut exp = filtered_lines(&expected, &volatile_marker)?;
    let mut act = filtered_lines(&actual, &volatile_marker)?;
    let mut diff = LineDiff::default();
    loop {
        let e = exp.next().transpose()?;
        let a = act.next().transpose()?;
        if e.is_none() && a.is_none() {
            return Ok(diff);
        }
        diff.push(e.as_deref(), a.as_deref());
    }
}

#[async_trait::async_trait]
impl ContentComparator for GzipTextComparator {
    fn name(&self) -> &'static str {
        "gzip-text"
    }

    fn suffixes(&self) -> &[&'static str] {
        &[".gz"]
    }

    async fn compare(&self, expected: &Path, actual: &Path) -> Result<Comparison, CompareError> {
        let (exp, act) = (expected.to_path_buf(), actual.to_path_buf());
        let marker = self.volatile_marker.clone();
        let diff = tokio::task::spawn_blocking(move || gunzip_diff(exp, act, marker))
            .await
            .map_err(|e| CompareError::Io(std::io::Error::other(e)))??;
        Ok(diff_comparison(diff))
    }
}

// ---------------------------------------------------------------------------
// PDF (pdftotext)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PdfTextComparator {
    pub pdftotext: String,
}

impl PdfTextComparator {
    async fn text(&self, pdf: &Path) -> Result<Vec<String>, CompareError> {
        let stdout = run_tool(&self.pdftotext, &[pdf.as_os_str(), OsStr::new("-")]).await?;
        Ok(to_lines(&stdout))
    }
}

#[async_trait::async_trait]
impl ContentComparator for PdfTextComparator {
    fn name(&self) -> &'static str {
        "pdftotext"
    }

    fn suffixes(&self) -> &[&'static str] {
        &[".pdf"]
    }

    async fn compare(&self, expected: &Path, actual: &Path) -> Result<Comparison, CompareError> {
        let exp = self.text(expected).await?;
        let act = self.text(actual).await?;
        Ok(line_comparison(&exp, &act))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
