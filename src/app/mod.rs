use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use crossbeam_channel::{Sender, bounded};
use rayon::prelude::*;
use serde_json::{Map, Value as Json};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use sift::Expr;
use sift::record::{FieldTypes, JsonRecord};

use crate::config::SiftConfig;

/// Lines evaluated per parallel batch.
const BATCH_SIZE: usize = 4096;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Filter expression, e.g. 'age >= 18 && name =~ "^A"'
    #[arg(short, long, required_unless_present = "name", conflicts_with = "name")]
    pub filter: Option<String>,

    /// Use a named filter from the configuration file
    #[arg(short, long, requires = "config")]
    pub name: Option<String>,

    /// Input JSON Lines file ("-" for stdin)
    #[arg(short, long, default_value = "-")]
    pub input: PathBuf,

    /// Output file (default: stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Configuration file (YAML) with named filters and field types
    #[arg(short, long, env = "SIFT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Number of threads (default: all cores)
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Print the number of matching records instead of the records
    #[arg(long)]
    pub count: bool,

    /// Log and skip records that fail to parse or evaluate
    #[arg(long)]
    pub skip_errors: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub records: u64,
    pub matched: u64,
    pub skipped: u64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RunOptions {
    pub count_only: bool,
    pub skip_errors: bool,
}

impl From<&Cli> for RunOptions {
    fn from(cli: &Cli) -> Self {
        Self {
            count_only: cli.count,
            skip_errors: cli.skip_errors,
        }
    }
}

/// Filter text from `--filter` or from the named entry in the config.
pub fn resolve_filter(cli: &Cli, config: &SiftConfig) -> Result<String> {
    match (&cli.filter, &cli.name) {
        (Some(filter), _) => Ok(filter.clone()),
        (None, Some(name)) => Ok(config.filter(name)?.to_string()),
        (None, None) => bail!("CLI: Either --filter or --name is required"),
    }
}

pub fn open_input(path: &Path) -> Result<Box<dyn BufRead>> {
    if path == Path::new("-") {
        return Ok(Box::new(BufReader::new(io::stdin())));
    }
    let file = File::open(path)
        .with_context(|| format!("Input: Failed to open {}", path.display()))?;
    Ok(Box::new(BufReader::new(file)))
}

pub fn open_output(path: Option<&Path>) -> Result<Box<dyn Write + Send>> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Output: Failed to create {}", path.display()))?;
            Ok(Box::new(BufWriter::new(file)))
        }
        None => Ok(Box::new(BufWriter::new(io::stdout()))),
    }
}

/// Stream `reader` through `expr`, writing matching lines to `writer`.
///
/// Lines are read in batches, each batch is evaluated in parallel, and
/// matches are handed to a writer thread in input order.
pub fn filter_lines<R, W>(
    reader: R,
    writer: W,
    expr: &Expr,
    fields: &FieldTypes,
    options: RunOptions,
) -> Result<Summary>
where
    R: BufRead,
    W: Write + Send + 'static,
{
    let (tx, rx) = bounded::<Vec<String>>(16);

    let writer = std::thread::spawn(move || -> Result<u64> {
        let mut out = writer;
        let mut written = 0u64;
        for batch in rx {
            written += batch.len() as u64;
            if options.count_only {
                continue;
            }
            for line in batch {
                out.write_all(line.as_bytes())
                    .and_then(|_| out.write_all(b"\n"))
                    .context("Output: Failed to write record")?;
            }
        }
        if options.count_only {
            writeln!(out, "{written}").context("Output: Failed to write count")?;
        }
        out.flush().context("Output: Failed to flush")?;
        Ok(written)
    });

    let scan_result = scan_batches(reader, &tx, expr, fields, options);
    drop(tx);

    // Get writer thread result - it contains the root cause if the channel disconnected
    let written = match writer.join() {
        Ok(Ok(written)) => written,
        Ok(Err(writer_err)) => {
            return if scan_result.is_err() {
                Err(writer_err
                    .context("Pipeline: Writer thread failed (caused channel disconnect)"))
            } else {
                Err(writer_err)
            };
        }
        Err(panic_payload) => {
            let panic_msg = panic_payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic_payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            return Err(anyhow!("Pipeline: Writer thread panicked: {}", panic_msg));
        }
    };

    let summary = scan_result?;
    debug_assert_eq!(written, summary.matched);
    Ok(summary)
}

fn scan_batches<R: BufRead>(
    reader: R,
    tx: &Sender<Vec<String>>,
    expr: &Expr,
    fields: &FieldTypes,
    options: RunOptions,
) -> Result<Summary> {
    let mut summary = Summary::default();
    let mut lines = reader.lines();
    let mut line_no = 0u64;

    loop {
        let mut batch = Vec::with_capacity(BATCH_SIZE);
        let mut read = 0usize;
        for line in lines.by_ref().take(BATCH_SIZE) {
            read += 1;
            line_no += 1;
            let line = line.with_context(|| format!("Input: Failed to read line {line_no}"))?;
            if !line.trim().is_empty() {
                batch.push((line_no, line));
            }
        }
        if read == 0 {
            break;
        }

        let outcomes: Vec<Result<bool>> = batch
            .par_iter()
            .map(|(_, line)| evaluate_line(line, expr, fields))
            .collect();

        let mut matched = Vec::new();
        for ((line_no, line), outcome) in batch.into_iter().zip(outcomes) {
            summary.records += 1;
            match outcome {
                Ok(true) => matched.push(line),
                Ok(false) => {}
                Err(err) if options.skip_errors => {
                    tracing::warn!("Skipping line {}: {:#}", line_no, err);
                    summary.skipped += 1;
                }
                Err(err) => return Err(err.context(format!("Input: Line {line_no}"))),
            }
        }

        summary.matched += matched.len() as u64;
        if !matched.is_empty() {
            tx.send(matched)
                .map_err(|err| anyhow!("Pipeline: Failed to send record batch: {}", err))?;
        }
    }

    Ok(summary)
}

fn evaluate_line(line: &str, expr: &Expr, fields: &FieldTypes) -> Result<bool> {
    let object: Map<String, Json> =
        serde_json::from_str(line).context("Record is not a JSON object")?;
    Ok(expr.eval(&JsonRecord::new(&object, fields))?)
}

/// Run the CLI against its input and output.
pub fn run(cli: &Cli, expr: &Expr, config: &SiftConfig) -> Result<Summary> {
    let reader = open_input(&cli.input)?;
    let writer = open_output(cli.output.as_deref())?;
    filter_lines(reader, writer, expr, &config.fields, RunOptions::from(cli))
}
