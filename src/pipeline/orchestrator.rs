// 全ジョブ実行: ジョブファイルの展開、出力先の重複検査、rayonによる並列実行

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::Serialize;

use crate::config::job::{JobFile, default_output_path, resolve_path};
use crate::config::merged::MergedConfig;
use crate::config::{self, CompressionConfig};
use crate::error::PdfCompressError;
use crate::pipeline::document_pipeline::compress_pdf;
use crate::pipeline::progress::TracingProgress;
use crate::pipeline::result::CompressionResult;

/// Configuration for a single job.
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub config: CompressionConfig,
}

/// Result of processing a single job.
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub result: CompressionResult,
}

/// Expand a job file into runnable jobs.
///
/// `settings.yaml` next to the job file supplies defaults; relative paths are
/// resolved against the job file's directory. Returns the jobs together with
/// the configured worker count.
pub fn load_job_file(job_file_path: &Path) -> crate::error::Result<(Vec<BatchJob>, usize)> {
    let settings = config::load_settings_for(job_file_path)?;
    let job_file = JobFile::from_file(job_file_path)?;

    let job_dir = match job_file_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let jobs = job_file
        .jobs
        .iter()
        .map(|job| -> crate::error::Result<BatchJob> {
            let merged = MergedConfig::new(&settings, job);
            let input_path = resolve_path(&job_dir, &job.input);
            let output_path = match &job.output {
                Some(output) => resolve_path(&job_dir, output),
                None => default_output_path(&input_path, &merged.output_suffix),
            };
            Ok(BatchJob {
                input_path,
                output_path,
                config: merged.compression_config()?,
            })
        })
        .collect::<crate::error::Result<Vec<_>>>()?;

    Ok((jobs, settings.parallel_workers))
}

/// True when both paths name the same file, comparing canonical forms when
/// both exist.
pub fn is_same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Reject batches where two jobs write the same file, or a job overwrites its input.
pub fn check_output_paths(jobs: &[BatchJob]) -> crate::error::Result<()> {
    let mut seen = HashSet::new();
    for job in jobs {
        if is_same_file(&job.input_path, &job.output_path) {
            return Err(PdfCompressError::config(format!(
                "output path equals input path: {}",
                job.output_path.display()
            )));
        }
        if !seen.insert(&job.output_path) {
            return Err(PdfCompressError::config(format!(
                "duplicate output path: {}",
                job.output_path.display()
            )));
        }
    }
    Ok(())
}

pub fn run_job(job: &BatchJob) -> JobResult {
    let _span = tracing::info_span!("job", input = %job.input_path.display()).entered();
    let result = compress_pdf(
        &job.input_path,
        &job.output_path,
        &job.config,
        &mut TracingProgress,
    );
    JobResult {
        input_path: job.input_path.clone(),
        output_path: job.output_path.clone(),
        result,
    }
}

/// Run multiple jobs, collecting results in job order.
/// One job failure does NOT prevent other jobs from running.
///
/// `parallel_workers`: 0 = rayon default, 1 = sequential.
pub fn run_all_jobs(
    jobs: &[BatchJob],
    parallel_workers: usize,
) -> crate::error::Result<Vec<JobResult>> {
    check_output_paths(jobs)?;

    if parallel_workers == 1 || jobs.len() <= 1 {
        return Ok(jobs.iter().map(run_job).collect());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(parallel_workers)
        .build()
        .map_err(|e| PdfCompressError::config(format!("cannot start worker pool: {}", e)))?;
    Ok(pool.install(|| jobs.par_iter().map(run_job).collect()))
}
