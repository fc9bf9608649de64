//! PDF Grayscale CLI tool
//!
//! A command-line tool for converting PDF pages to grayscale.

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use glob::glob;
use std::path::{Path, PathBuf};
use std::process;

use pdf_grayscale::pages::PageSelection;
use pdf_grayscale::pdf::{grayscale, ConvertOptions, GrayscaleOptions};

/// PDF Grayscale - Convert PDF pages from color to grayscale
#[derive(Parser)]
#[command(name = "pdf-grayscale")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "EXAMPLES:
    # Convert a file in place
    pdf-grayscale report.pdf

    # Write the result to a new file
    pdf-grayscale report.pdf -o report-gray.pdf

    # Convert only some pages
    pdf-grayscale -P \"1-3,5\" report.pdf -o report-gray.pdf

    # Convert several files into a directory
    pdf-grayscale -o gray/ \"chapters/*.pdf\"")]
struct Cli {
    /// Input PDF files. Supports glob patterns like "*.pdf"
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Output file, or output directory when there are several inputs
    /// (default: convert in place)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Pages to convert, e.g. "1-3,4,6-7" (default: all pages)
    #[arg(short = 'P', long)]
    pages: Option<String>,

    /// Password for encrypted input files
    #[arg(short, long)]
    password: Option<String>,

    /// Maximum nesting depth of forms and tiling patterns
    #[arg(long, default_value_t = 32)]
    max_depth: usize,

    /// JPEG quality for re-encoded images (1-100)
    #[arg(long, default_value_t = 90, value_parser = clap::value_parser!(u8).range(1..=100))]
    jpeg_quality: u8,

    /// Log every converted resource
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let inputs = expand_globs(cli.inputs)?;

    let pages = cli
        .pages
        .as_deref()
        .map(PageSelection::parse)
        .transpose()
        .context("Invalid --pages value")?;

    let convert = ConvertOptions {
        max_depth: cli.max_depth,
        jpeg_quality: cli.jpeg_quality,
    };

    let several = inputs.len() > 1;
    let mut failed = 0;

    for input in &inputs {
        let output = output_path(input, cli.output.as_deref(), several)?;
        let options = GrayscaleOptions {
            input_path: input.clone(),
            output_path: output.clone(),
            password: cli.password.clone(),
            pages: pages.clone(),
            convert: convert.clone(),
        };

        eprintln!("Converting {}...", input.display());
        match grayscale(&options).with_context(|| format!("Could not convert {} to grayscale", input.display())) {
            Ok(count) => eprintln!("Converted {} page(s) to: {}", count, output.display()),
            Err(e) => {
                eprintln!("Error: {:#}", e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} file(s) failed to convert", failed, inputs.len());
    }
    Ok(())
}

/// Expand glob patterns in input paths
fn expand_globs(patterns: Vec<String>) -> anyhow::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();

    for pattern in patterns {
        // Check if pattern contains glob characters
        if pattern.contains('*') || pattern.contains('?') || pattern.contains('[') {
            let mut matched = false;
            for entry in glob(&pattern)? {
                match entry {
                    Ok(path) => {
                        paths.push(path);
                        matched = true;
                    }
                    Err(e) => eprintln!("Warning: glob error for {}: {}", pattern, e),
                }
            }
            if !matched {
                bail!("No files matched pattern: {}", pattern);
            }
        } else {
            paths.push(PathBuf::from(pattern));
        }
    }

    paths.sort();
    paths.dedup();

    Ok(paths)
}

/// Where the converted copy of `input` goes
fn output_path(input: &Path, output: Option<&Path>, several: bool) -> anyhow::Result<PathBuf> {
    match output {
        None => Ok(input.to_path_buf()),
        Some(dir) if several || dir.is_dir() => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Could not create output directory {}", dir.display()))?;
            let name = input
                .file_name()
                .ok_or_else(|| anyhow!("Input path has no file name: {}", input.display()))?;
            Ok(dir.join(name))
        }
        Some(file) => Ok(file.to_path_buf()),
    }
}
