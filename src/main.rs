// File: main.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use anyhow::{Context, Result};
use bleedscan::cli::Cli;
use bleedscan::config::TargetEndpoint;
use bleedscan::report::{ReportFormat, ReportGenerator, ScanSummary};
use bleedscan::scanner::OffsetScanner;
use clap::Parser;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use simple_logger::SimpleLogger;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    SimpleLogger::new()
        .with_level(cli.log_level())
        .init()
        .context("failed to initialise logger")?;
    if cli.no_color {
        colored::control::set_override(false);
    }

    let endpoint = cli.endpoint()?;
    let range = cli.range()?;
    let config = cli.scan_config()?;

    if !confirm_authorization(&endpoint, cli.skip_authorization_check)? {
        println!("{}", "Authorization not confirmed. Exiting.".red());
        return Ok(());
    }

    let mut scanner = OffsetScanner::new(endpoint.clone(), range, config)?;
    if !cli.quiet {
        let pb = ProgressBar::new(scanner.planned_probes());
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>7}/{len:7} {msg}",
                )
                .context("invalid progress template")?
                .progress_chars("##-"),
        );
        scanner = scanner.with_progress(pb);
    }

    let cancel = scanner.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing current probe");
            cancel.cancel();
        }
    });

    let outcome = scanner.run().await;

    outcome
        .result
        .write_artifact(&cli.output)
        .with_context(|| format!("failed to write {}", cli.output.display()))?;

    let summary = ScanSummary::new(&endpoint, range, &outcome);
    if let Some(path) = &cli.summary {
        ReportGenerator::generate_report(&summary, path, ReportFormat::from_path(path))
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("Summary written to {}", path.display());
    }

    if !cli.quiet {
        println!();
        println!("{}", "Scan Summary".bold());
        println!("{}", "=".repeat(40));
        print!("{}", summary.render_text());
        let headline = format!(
            "{} unique fragment(s), {} bytes written to {}",
            summary.unique_fragments,
            summary.total_bytes_leaked,
            cli.output.display()
        );
        if summary.unique_fragments > 0 {
            println!("{}", headline.bright_red().bold());
        } else {
            println!("{}", headline.green());
        }
    }

    Ok(())
}

/// Loopback targets pass; anything else needs the flag or an interactive "yes".
fn confirm_authorization(endpoint: &TargetEndpoint, preconfirmed: bool) -> Result<bool> {
    if endpoint.is_loopback() || preconfirmed {
        return Ok(true);
    }

    println!(
        "{}",
        "This tool sends malformed messages that make the server disclose memory."
            .bright_yellow()
    );
    println!("   Only test systems you own or are explicitly authorized to assess.");
    println!(
        "{}",
        format!(
            "Do you have authorization to test {}? (yes/NO):",
            endpoint
        )
        .bright_yellow()
    );

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("yes"))
}
