//! CI failure log capture.
//!
//! Downloads complete logs for failed jobs only and writes them under the
//! PR's `ci/` directory, split into fixed-size chunks so no single file
//! blows past what a fix session can comfortably read.

use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use super::client::{GitHubError, Result};
use super::ops::GitHubOps;

/// Lines per chunk file.
pub const MAX_LINES_PER_CHUNK: usize = 500;

/// Context lines kept around each extracted error line.
pub const ERROR_CONTEXT_LINES: usize = 3;

/// Error blocks quoted per job in the summary file.
pub const MAX_ERRORS_PER_JOB: usize = 5;

/// One error line with its surrounding context, distilled from a job log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorBlock {
    pub content: String,
    /// 1-based line number of the error line in the original log.
    pub line_number: usize,
}

fn is_error_line(line: &str) -> bool {
    const INDICATORS: [&str; 8] = [
        "##[error]",
        "Exit status",
        "Error:",
        "error:",
        "ERROR:",
        "FAIL",
        "Failed",
        "AssertionError",
    ];
    INDICATORS.iter().any(|needle| line.contains(needle))
}

/// Extract error lines with `context_lines` of context on each side.
/// Scanning resumes past each block's end so overlapping errors collapse
/// into one block.
pub fn extract_error_blocks(logs: &str, context_lines: usize) -> Vec<ErrorBlock> {
    let lines: Vec<&str> = logs.lines().collect();
    let mut blocks = Vec::new();

    let mut i = 0;
    while i < lines.len() {
        if is_error_line(lines[i]) {
            let start = i.saturating_sub(context_lines);
            let end = (i + context_lines + 1).min(lines.len());
            blocks.push(ErrorBlock {
                content: lines[start..end].join("\n"),
                line_number: i + 1,
            });
            i = end;
        } else {
            i += 1;
        }
    }
    blocks
}

fn render_error_summary(jobs: &[(String, Vec<ErrorBlock>)]) -> String {
    let mut summary = format!("Failed jobs: {}\n", jobs.len());
    for (name, blocks) in jobs {
        summary.push_str(&format!("\n## {name}\nErrors found: {}\n\n", blocks.len()));
        for block in blocks.iter().take(MAX_ERRORS_PER_JOB) {
            summary.push_str(&format!("```\n{}\n```\n\n", block.content));
        }
        if blocks.len() > MAX_ERRORS_PER_JOB {
            summary.push_str(&format!(
                "... and {} more errors\n",
                blocks.len() - MAX_ERRORS_PER_JOB
            ));
        }
    }
    summary
}

/// Split log text into chunks of at most `max_lines` lines each.
pub fn chunk_lines(logs: &str, max_lines: usize) -> Vec<String> {
    let lines: Vec<&str> = logs.lines().collect();
    lines
        .chunks(max_lines.max(1))
        .map(|chunk| chunk.join("\n"))
        .collect()
}

/// Directory-safe job name. GitHub job names may contain spaces and
/// slashes.
pub fn sanitize_job_name(name: &str) -> String {
    name.replace([' ', '/'], "_")
}

/// Write one job's logs as `<ci_dir>/<job>/<k>.log`, clearing any chunks
/// left over from a previous run of the same job first.
pub fn save_job_logs_chunked(ci_dir: &Path, job_name: &str, logs: &str) -> Result<usize> {
    let job_dir = ci_dir.join(sanitize_job_name(job_name));
    if job_dir.exists() {
        fs::remove_dir_all(&job_dir)?;
    }
    fs::create_dir_all(&job_dir)?;

    // Original job name kept for display, the directory name is mangled.
    fs::write(job_dir.join(".jobname"), job_name)?;

    let chunks = chunk_lines(logs, MAX_LINES_PER_CHUNK);
    for (i, chunk) in chunks.iter().enumerate() {
        fs::write(job_dir.join(format!("{}.log", i + 1)), chunk)?;
    }
    Ok(chunks.len())
}

/// Download and persist logs for every failed job in `run_id`.
///
/// Individual download failures are tolerated as long as at least one
/// job's logs land on disk; only a total wipeout is an error. Returns the
/// names of jobs whose logs were saved.
pub async fn save_failed_run_logs(
    ops: &dyn GitHubOps,
    ci_dir: &Path,
    run_id: u64,
) -> Result<Vec<String>> {
    let failed_jobs = ops.get_failed_jobs(run_id).await?;
    if failed_jobs.is_empty() {
        debug!(run_id, "no failed jobs found");
        return Ok(Vec::new());
    }

    let mut saved = Vec::new();
    let mut errors = Vec::new();
    let mut job_blocks = Vec::new();
    for job in &failed_jobs {
        match ops.download_job_logs(job.id).await {
            Ok(logs) => {
                let chunks = save_job_logs_chunked(ci_dir, &job.name, &logs)?;
                debug!(job = %job.name, chunks, "saved CI logs");
                job_blocks.push((
                    job.name.clone(),
                    extract_error_blocks(&logs, ERROR_CONTEXT_LINES),
                ));
                saved.push(job.name.clone());
            }
            Err(e) => {
                warn!(job = %job.name, error = %e, "failed to download job logs");
                errors.push(format!("{}: {e}", job.name));
            }
        }
    }

    if saved.is_empty() {
        return Err(GitHubError::Malformed(format!(
            "failed to download logs for {} jobs: {}",
            failed_jobs.len(),
            errors.join("; ")
        )));
    }

    // Distilled view first; fix sessions read this before the raw chunks.
    fs::write(
        ci_dir.join("error_summary.txt"),
        render_error_summary(&job_blocks),
    )?;
    Ok(saved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn short_logs_are_one_chunk() {
        let logs = "line one\nline two\nline three";
        let chunks = chunk_lines(logs, 500);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], logs);
    }

    #[test]
    fn long_logs_split_on_line_boundaries() {
        let logs: String = (0..1200).map(|i| format!("line {i}\n")).collect();
        let chunks = chunk_lines(&logs, 500);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].lines().count(), 500);
        assert_eq!(chunks[2].lines().count(), 200);
        assert!(chunks[2].ends_with("line 1199"));
    }

    #[test]
    fn sanitizes_awkward_job_names() {
        assert_eq!(sanitize_job_name("build / test (ubuntu)"), "build___test_(ubuntu)");
    }

    #[test]
    fn extracts_error_lines_with_context() {
        let logs = "setup\ncompiling\nerror: mismatched types\nnote: expected u64\nmore output\n";
        let blocks = extract_error_blocks(logs, 1);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].line_number, 3);
        assert_eq!(blocks[0].content, "compiling\nerror: mismatched types\nnote: expected u64");
    }

    #[test]
    fn adjacent_errors_collapse_into_one_block() {
        let logs = "a\nerror: first\nerror: second\nb\nc\nd\ne\nFAILED tests\nf\n";
        let blocks = extract_error_blocks(logs, 2);
        // The second error sits inside the first block's context window.
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].line_number, 2);
        assert!(blocks[0].content.contains("error: second"));
        assert_eq!(blocks[1].line_number, 8);
    }

    #[test]
    fn context_clamps_at_log_boundaries() {
        let blocks = extract_error_blocks("##[error]boom", 3);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].content, "##[error]boom");
        assert_eq!(blocks[0].line_number, 1);
    }

    #[test]
    fn clean_logs_yield_no_blocks() {
        assert!(extract_error_blocks("all good\ntests passed\n", 3).is_empty());
    }

    #[test]
    fn summary_caps_blocks_per_job() {
        let blocks: Vec<ErrorBlock> = (0..7)
            .map(|i| ErrorBlock {
                content: format!("error {i}"),
                line_number: i + 1,
            })
            .collect();
        let summary = render_error_summary(&[("tests".into(), blocks)]);
        assert!(summary.contains("## tests"));
        assert!(summary.contains("Errors found: 7"));
        assert!(summary.contains("error 4"));
        assert!(!summary.contains("error 5"));
        assert!(summary.contains("... and 2 more errors"));
    }

    #[test]
    fn stale_chunks_are_cleared() {
        let dir = TempDir::new().unwrap();
        let ci_dir = dir.path();

        let long: String = (0..1100).map(|i| format!("old {i}\n")).collect();
        assert_eq!(save_job_logs_chunked(ci_dir, "test job", &long).unwrap(), 3);

        // A shorter rerun must not leave 2.log and 3.log behind.
        assert_eq!(save_job_logs_chunked(ci_dir, "test job", "new output").unwrap(), 1);
        let job_dir = ci_dir.join("test_job");
        assert!(job_dir.join("1.log").exists());
        assert!(!job_dir.join("2.log").exists());
        assert_eq!(
            fs::read_to_string(job_dir.join(".jobname")).unwrap(),
            "test job"
        );
    }
}
