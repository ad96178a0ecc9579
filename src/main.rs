use std::path::{Path, PathBuf};
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use pdf_compress::config::job::{Job, default_output_path};
use pdf_compress::config::merged::MergedConfig;
use pdf_compress::config::{self};
use pdf_compress::pipeline::compress_pdf;
use pdf_compress::pipeline::orchestrator::{
    BatchJob, JobResult, check_output_paths, is_same_file, load_job_file, run_all_jobs,
};

const USAGE: &str = "\
Usage: pdf_compress <input.pdf> [-o <output.pdf>] [-q <quality>] [-t <target_mb>] [--json]
       pdf_compress <jobs.yaml>...
  Recompress the images of a PDF to reduce its size.

Options:
  -o, --output <path>      Output PDF (default: <input>_comprimido.pdf)
  -q, --quality <1-100>    JPEG quality (default: settings.yaml or 50)
  -t, --target <mb>        Target size in MB, reported only (default: 15)
      --json               Print the result as JSON on stdout
  -h, --help               Show this help
  -V, --version            Show the version";

/// Parsed command line.
enum Command {
    Single {
        input: PathBuf,
        output: Option<PathBuf>,
        quality: Option<u8>,
        target: Option<f64>,
        json: bool,
    },
    Jobs {
        job_files: Vec<PathBuf>,
        json: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.is_empty() || args.iter().any(|a| a == "--help" || a == "-h") {
        eprintln!("{USAGE}");
        return if args.is_empty() {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        };
    }

    if args.iter().any(|a| a == "--version" || a == "-V") {
        eprintln!("pdf_compress {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    let command = match parse_args(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("ERROR: {e}");
            eprintln!("{USAGE}");
            return ExitCode::FAILURE;
        }
    };

    match command {
        Command::Single {
            input,
            output,
            quality,
            target,
            json,
        } => run_single(&input, output, quality, target, json),
        Command::Jobs { job_files, json } => run_jobs(&job_files, json),
    }
}

fn is_job_file(arg: &str) -> bool {
    let lower = arg.to_ascii_lowercase();
    lower.ends_with(".yaml") || lower.ends_with(".yml")
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let json = args.iter().any(|a| a == "--json");

    if args.iter().any(|a| is_job_file(a)) {
        let job_files: Vec<PathBuf> = args
            .iter()
            .filter(|a| a.as_str() != "--json")
            .map(|a| {
                if is_job_file(a) {
                    Ok(PathBuf::from(a))
                } else {
                    Err(format!("unexpected argument in job-file mode: {a}"))
                }
            })
            .collect::<Result<_, _>>()?;
        return Ok(Command::Jobs { job_files, json });
    }

    let mut input: Option<PathBuf> = None;
    let mut output: Option<PathBuf> = None;
    let mut quality: Option<u8> = None;
    let mut target: Option<f64> = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--json" => {}
            "-o" | "--output" => {
                let value = iter.next().ok_or("missing value for -o")?;
                output = Some(PathBuf::from(value));
            }
            "-q" | "--quality" => {
                let value = iter.next().ok_or("missing value for -q")?;
                let q: u8 = value
                    .parse()
                    .map_err(|_| format!("invalid quality: {value}"))?;
                quality = Some(q);
            }
            "-t" | "--target" => {
                let value = iter.next().ok_or("missing value for -t")?;
                let t: f64 = value
                    .parse()
                    .map_err(|_| format!("invalid target size: {value}"))?;
                target = Some(t);
            }
            flag if flag.starts_with('-') && flag.len() > 1 => {
                return Err(format!("unknown option: {flag}"));
            }
            positional => {
                if input.is_some() {
                    return Err(format!("unexpected argument: {positional}"));
                }
                input = Some(PathBuf::from(positional));
            }
        }
    }

    let input = input.ok_or("missing input PDF")?;
    Ok(Command::Single {
        input,
        output,
        quality,
        target,
        json,
    })
}

fn run_single(
    input: &Path,
    output: Option<PathBuf>,
    quality: Option<u8>,
    target: Option<f64>,
    json: bool,
) -> ExitCode {
    // Load settings from the same directory as the input PDF.
    let settings = match config::load_settings_for(input) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("ERROR: Failed to load settings for {}: {e}", input.display());
            return ExitCode::FAILURE;
        }
    };

    let job = Job {
        input: input.to_string_lossy().into_owned(),
        output: None,
        target_size_mb: target,
        image_quality: quality,
    };
    let merged = MergedConfig::new(&settings, &job);
    let compression = match merged.compression_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("ERROR: {e}");
            return ExitCode::FAILURE;
        }
    };
    let output = output.unwrap_or_else(|| default_output_path(input, &merged.output_suffix));
    if is_same_file(input, &output) {
        eprintln!("ERROR: output path equals input path: {}", output.display());
        return ExitCode::FAILURE;
    }

    let mut print_progress = |message: &str, percent: f64| {
        // 100% is the final summary, printed below
        if percent < 100.0 {
            eprintln!("[{percent:>3.0}%] {message}");
        }
    };
    let result = compress_pdf(input, &output, &compression, &mut print_progress);

    if json {
        match serde_json::to_string_pretty(&result) {
            Ok(s) => println!("{s}"),
            Err(e) => {
                eprintln!("ERROR: Failed to serialize result: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        eprintln!("{}", result.message);
        if result.success {
            eprintln!("{}", output.display());
        }
    }

    if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn run_jobs(job_files: &[PathBuf], json: bool) -> ExitCode {
    // Expand every job file first so a bad file aborts before any work starts.
    let mut batches: Vec<(Vec<BatchJob>, usize)> = Vec::new();
    for job_file in job_files {
        match load_job_file(job_file) {
            Ok(batch) => batches.push(batch),
            Err(e) => {
                eprintln!("ERROR: Failed to load job file {}: {e}", job_file.display());
                return ExitCode::FAILURE;
            }
        }
    }

    let all_jobs: Vec<BatchJob> = batches.iter().flat_map(|(jobs, _)| jobs.clone()).collect();
    if let Err(e) = check_output_paths(&all_jobs) {
        eprintln!("ERROR: {e}");
        return ExitCode::FAILURE;
    }

    let mut results: Vec<JobResult> = Vec::new();
    for (jobs, workers) in &batches {
        match run_all_jobs(jobs, *workers) {
            Ok(r) => results.extend(r),
            Err(e) => {
                eprintln!("ERROR: {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    let has_error = results.iter().any(|r| !r.result.success);

    if json {
        match serde_json::to_string_pretty(&results) {
            Ok(s) => println!("{s}"),
            Err(e) => {
                eprintln!("ERROR: Failed to serialize results: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        for job in &results {
            if job.result.success {
                eprintln!(
                    "OK: {} -> {}\n{}",
                    job.input_path.display(),
                    job.output_path.display(),
                    job.result.message
                );
            } else {
                eprintln!(
                    "ERROR: {} -> {}: {}",
                    job.input_path.display(),
                    job.output_path.display(),
                    job.result.message
                );
            }
        }
    }

    if has_error {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
