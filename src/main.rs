//! SafeCopy CLI - verified file synchronization
//!
//! Copies sources to a destination, verifying every copy.

use clap::Parser;
use safecopy::config::{CliArgs, LogFormat, OutputFormat, SyncOptions};
use safecopy::core::{run_self_test, SyncEngine, SyncReport};
use safecopy::error::Result;
use tracing_subscriber::EnvFilter;

fn main() {
    // Parse CLI arguments
    let args = CliArgs::parse();

    init_logging(&args);

    match run(&args) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            if e.is_config_error() {
                eprintln!("Nothing was copied. Run safecopy --help for usage.");
            }
            std::process::exit(1);
        }
    }
}

fn init_logging(args: &CliArgs) {
    let default_level = match args.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match args.log_format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn run(args: &CliArgs) -> Result<i32> {
    if args.test {
        run_self_test()?;
        println!("Self-test passed");
        return Ok(0);
    }

    let (sources, destination) = args.split_paths()?;
    let options = SyncOptions::from_cli(args)?;

    if args.verbose > 0 {
        print_options(&options);
    }

    if options.dry_run && args.output_format == OutputFormat::Text {
        println!("=== Dry Run Mode ===");
        println!("Nothing will be copied or deleted.");
    }

    let engine = SyncEngine::new(options);
    let report = engine.execute(&sources, &destination)?;

    print_report(&report, args.output_format)?;

    Ok(report.exit_code())
}

fn print_report(report: &SyncReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => report.print_summary(),
        OutputFormat::Json => {
            let counts: serde_json::Map<String, serde_json::Value> = report
                .counts()
                .into_iter()
                .map(|(status, count)| (status.label().to_string(), count.into()))
                .collect();
            let output = serde_json::json!({
                "summary": {
                    "counts": counts,
                    "bytes_copied": report.bytes_copied(),
                    "success": report.is_success(),
                },
                "report": report,
            });
            let text = serde_json::to_string_pretty(&output)
                .map_err(|e| safecopy::SafeCopyError::config(format!("Failed to serialize report: {}", e)))?;
            println!("{}", text);
        }
    }
    Ok(())
}

fn print_options(options: &SyncOptions) {
    println!("=== SafeCopy Configuration ===");
    println!("Compare:       {}", if options.quick { "quick (size, mtime)" } else { "full content" });
    println!("Transfer:      {}", options.transfer.name());
    println!("Verify:        {}", options.verify || options.verify_only);
    println!("Delete:        {}", options.delete);
    println!("Persist:       {}", options.persist);
    println!("Retries:       {} (base delay {})", options.retries, humantime::format_duration(options.retry_delay));
    println!("Workers:       {}", options.effective_workers());
    println!("Buffer size:   {}", humansize::format_size(options.buffer_size as u64, humansize::BINARY));
    if !options.exclude.is_empty() {
        println!("Exclude:       {}", options.exclude.join(", "));
    }
    println!();
}
