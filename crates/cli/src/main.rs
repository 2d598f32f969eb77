mod config;
mod render;

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{event, Level};
use tracing_subscriber::prelude::*;
use vfr_core::lexer::{Spanned, Token};
use vfr_core::{ParserConfig, VfrError};

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// VFR form-description language front end.
#[derive(Parser)]
#[command(name = "vfrc", version, about = "VFR form-description language front end")]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a preprocessed .vfr file and print its opcode tree
    Parse {
        /// Path to the preprocessed .vfr source file
        file: PathBuf,
        /// Parser configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Leave forward references unresolved
        #[arg(long)]
        unlinked: bool,
    },

    /// Print the token stream of a .vfr file
    Tokens {
        /// Path to the preprocessed .vfr source file
        file: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Commands::Parse {
            file,
            config,
            unlinked,
        } => {
            cmd_parse(&file, config.as_deref(), unlinked, cli.output, cli.quiet);
        }
        Commands::Tokens { file } => {
            cmd_tokens(&file, cli.output, cli.quiet);
        }
    }
}

/// Diagnostics go to stderr; `RUST_LOG` selects what is printed.
fn init_tracing() {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);
    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}

fn fail(message: &str, output: OutputFormat, quiet: bool) -> ! {
    match output {
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": message }));
        }
        OutputFormat::Text => {
            if !quiet {
                eprintln!("error: {}", message);
            }
        }
    }
    process::exit(1);
}

fn report(file: &Path, e: &VfrError, output: OutputFormat, quiet: bool) -> ! {
    match output {
        OutputFormat::Json => {
            let err_json = serde_json::to_string_pretty(&e.to_json_value())
                .unwrap_or_else(|_| format!("{{\"error\": \"{:?}\"}}", e));
            eprintln!("{}", err_json);
        }
        OutputFormat::Text => {
            if !quiet {
                eprintln!("{}: {}", file.display(), e);
            }
        }
    }
    process::exit(1);
}

fn read_source(file: &Path, output: OutputFormat, quiet: bool) -> String {
    match std::fs::read_to_string(file) {
        Ok(src) => src,
        Err(e) => fail(
            &format!("could not read '{}': {}", file.display(), e),
            output,
            quiet,
        ),
    }
}

fn cmd_parse(
    file: &Path,
    config_path: Option<&Path>,
    unlinked: bool,
    output: OutputFormat,
    quiet: bool,
) {
    let config = match config_path {
        Some(path) => match config::read_parser_config(path) {
            Ok(c) => c,
            Err(msg) => fail(&msg, output, quiet),
        },
        None => ParserConfig::default(),
    };
    event!(Level::DEBUG, "parser config: {:?}", config);

    let src = read_source(file, output, quiet);
    let tokens = match vfr_core::lex(&src) {
        Ok(t) => t,
        Err(e) => report(file, &e, output, quiet),
    };
    let result = if unlinked {
        vfr_core::parse_unlinked(&tokens, &config)
    } else {
        vfr_core::parse(&tokens, &config)
    };
    let unit = match result {
        Ok(u) => u,
        Err(e) => report(file, &e, output, quiet),
    };

    match output {
        OutputFormat::Json => {
            let value = serde_json::json!({
                "formset": unit.formset,
                "varstores": unit.symbols.varstores(),
                "questions": unit.symbols.question_count(),
            });
            let pretty = serde_json::to_string_pretty(&value)
                .unwrap_or_else(|e| format!("serialization error: {}", e));
            println!("{}", pretty);
        }
        OutputFormat::Text => {
            print!("{}", render::render_tree(&unit.formset));
            if !quiet {
                println!(
                    "{} opcodes, {} questions, {} varstores",
                    unit.formset.count(),
                    unit.symbols.question_count(),
                    unit.symbols.varstores().len()
                );
            }
        }
    }
}

fn cmd_tokens(file: &Path, output: OutputFormat, quiet: bool) {
    let src = read_source(file, output, quiet);
    let tokens = match vfr_core::lex(&src) {
        Ok(t) => t,
        Err(e) => report(file, &e, output, quiet),
    };
    let tokens: Vec<&Spanned> = tokens.iter().filter(|t| t.token != Token::Eof).collect();
    match output {
        OutputFormat::Json => {
            let list: Vec<serde_json::Value> = tokens
                .iter()
                .map(|t| serde_json::json!({ "line": t.line, "token": t.token.to_string() }))
                .collect();
            let pretty = serde_json::to_string_pretty(&list)
                .unwrap_or_else(|e| format!("serialization error: {}", e));
            println!("{}", pretty);
        }
        OutputFormat::Text => {
            for t in tokens {
                println!("{:>5}  {}", t.line, t.token);
            }
        }
    }
}
