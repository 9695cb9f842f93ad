//! cmc - the C-minus compiler driver
//!
//! Reads one source file, compiles it and writes the program image as a
//! listing or as JSON.

use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use cminus::frontend::lexer::Lexer;
use cminus::frontend::parser::Parser as CmParser;
use cminus::middle::codegen::CodeGenerator;
use cminus::middle::printer::print_listing;
use cminus::ProgramImage;

/// C-minus Compiler
#[derive(Parser, Debug)]
#[command(name = "cmc")]
#[command(version = "0.1.0")]
#[command(about = "C-minus compiler - lowers C-minus source to stack machine instructions")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Input source file
    #[arg(value_name = "FILE")]
    input: Option<PathBuf>,

    /// Output file (stdout if omitted)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = Emit::Listing)]
    emit: Emit,

    /// Print the token stream before compiling
    #[arg(long)]
    tokens: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Emit {
    /// Human-readable instruction listing
    Listing,
    /// Program image as JSON
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check a source file for errors without writing output
    Check {
        /// Input source file
        input: PathBuf,
    },
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();

    let result = match (&cli.command, &cli.input) {
        (Some(Commands::Check { input }), _) => check_file(input),
        (None, Some(input)) => compile_file(input, &cli),
        (None, None) => {
            eprintln!("error: no input file specified");
            eprintln!("Usage: cmc <FILE> or cmc check <FILE>");
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("error: {:#}", e);
        process::exit(1);
    }
}

fn read_source(input: &Path) -> Result<String> {
    fs::read_to_string(input).with_context(|| format!("failed to read {}", input.display()))
}

fn build(source: &str) -> Result<ProgramImage> {
    let program = CmParser::new(Lexer::new(source)).parse_program()?;
    let image = CodeGenerator::new().generate(&program)?;
    Ok(image)
}

/// Compile a source file and write the result
fn compile_file(input: &Path, cli: &Cli) -> Result<()> {
    log::info!("compiling {}", input.display());
    let source = read_source(input)?;

    if cli.tokens {
        for token in Lexer::new(&source).tokenize() {
            println!("{:>4}  {}", token.line, token);
        }
    }

    let image = build(&source).with_context(|| format!("in {}", input.display()))?;
    if image.entry_point().is_none() {
        log::warn!("{} declares no main function", input.display());
    }

    let text = match cli.emit {
        Emit::Listing => print_listing(&image),
        Emit::Json => serde_json::to_string_pretty(&image).context("failed to serialize program image")?,
    };

    match &cli.output {
        Some(path) => {
            fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?;
            log::info!("wrote {}", path.display());
        }
        None => print!("{}", text),
    }
    Ok(())
}

/// Check a source file for errors without generating output
fn check_file(input: &Path) -> Result<()> {
    let source = read_source(input)?;
    let image = build(&source).with_context(|| format!("in {}", input.display()))?;
    println!(
        "{}: ok ({} functions, {} static slots)",
        input.display(),
        image.functions.len(),
        image.statics.len()
    );
    Ok(())
}
