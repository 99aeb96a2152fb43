//! track_report - summarise an NDJSON record stream written by frametrack

use anyhow::{Context, Result};
use clap::Parser;
use std::io::BufReader;
use std::path::PathBuf;

use frametrack::TrackReport;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// NDJSON file ("-" reads stdin).
    path: PathBuf,
    /// Print the report as JSON.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let report = if args.path.as_os_str() == "-" {
        TrackReport::from_reader(std::io::stdin().lock())?
    } else {
        let file = std::fs::File::open(&args.path)
            .with_context(|| format!("open {}", args.path.display()))?;
        TrackReport::from_reader(BufReader::new(file))
            .with_context(|| format!("summarise {}", args.path.display()))?
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report);
    }
    Ok(())
}
