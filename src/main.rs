use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use historic_dates::{ParseOptions, PatternFactory, PatternParser, languages};

#[derive(Parser)]
#[command(
    name = "historic_dates",
    about = "Recognize dates and numerals in inscriptions"
)]
struct Cli {
    /// Directory holding `<lang>.json` specifications and their tables
    #[arg(
        long,
        global = true,
        env = "HISTORIC_DATES_PATTERNS",
        default_value = "patterns"
    )]
    patterns: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print every match per token position as JSON
    Parse {
        /// Language, e.g. "english"
        lang: String,
        /// Pattern type, e.g. "date"
        kind: String,
        text: Vec<String>,
        /// Keep spans consumed by a larger match
        #[arg(long)]
        keep_captured: bool,
        /// Keep spans lying inside a longer match
        #[arg(long)]
        show_overlap: bool,
        /// Skip evaluation of the matched templates
        #[arg(long)]
        no_eval: bool,
    },
    /// Print the text as alternating unmatched runs and match groups (JSON)
    Search {
        lang: String,
        kind: String,
        text: Vec<String>,
    },
    /// Print the known words of a pattern type, one per line
    Dictionary { lang: String, kind: String },
    /// List the languages found in the pattern directory
    Languages,
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Parse {
            lang,
            kind,
            text,
            keep_captured,
            show_overlap,
            no_eval,
        } => {
            let parser = load_parser(&cli.patterns, &lang, &kind);
            let options = ParseOptions {
                omit_captured: !keep_captured,
                hide_overlap: !show_overlap,
                eval_values: !no_eval,
            };
            print_json(&parser.parse(&text.join(" "), options));
        }
        Command::Search { lang, kind, text } => {
            let parser = load_parser(&cli.patterns, &lang, &kind);
            print_json(&parser.search(&text.join(" ")));
        }
        Command::Dictionary { lang, kind } => {
            for word in load_parser(&cli.patterns, &lang, &kind).dictionary() {
                println!("{word}");
            }
        }
        Command::Languages => {
            for lang in languages(&cli.patterns) {
                println!("{lang}");
            }
        }
    }
}

/// Logs go to stderr, filtered by `RUST_LOG`; stdout carries only results.
fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .with(EnvFilter::from_default_env())
        .init();
}

fn load_parser(root: &Path, lang: &str, kind: &str) -> Arc<PatternParser> {
    let mut parsers = PatternFactory::new(root)
        .build(lang)
        .unwrap_or_else(|e| fail(&format!("cannot load language `{lang}`: {e}")));
    parsers.remove(kind).unwrap_or_else(|| {
        let known: Vec<String> = parsers.into_keys().collect();
        fail(&format!(
            "language `{lang}` has no pattern type `{kind}` (known: {})",
            known.join(", ")
        ))
    })
}

fn print_json<T: serde::Serialize>(data: &T) {
    match serde_json::to_string_pretty(data) {
        Ok(json) => println!("{json}"),
        Err(e) => fail(&format!("cannot serialize result: {e}")),
    }
}

fn fail(message: &str) -> ! {
    eprintln!("{message}");
    process::exit(1);
}
