// Copyright 2026 The Streamtap Project
// SPDX-License-Identifier: Apache-2.0

// Summarize a saved upstream capture.
// Usage: streamtap-inspect capture.sse
// Usage: streamtap-inspect capture.sse --json

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use streamtap::capture;

#[derive(Parser)]
#[command(name = "streamtap-inspect", about = "Summarize a saved chat stream capture")]
struct Cli {
    /// Capture file (raw SSE as received from the upstream)
    path: PathBuf,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let text = match std::fs::read_to_string(&cli.path) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("failed to read {}: {e}", cli.path.display());
            return ExitCode::FAILURE;
        }
    };

    let summary = capture::summarize(&text);

    if cli.json {
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("failed to encode summary: {e}");
                return ExitCode::FAILURE;
            }
        }
        return ExitCode::SUCCESS;
    }

    let info = &summary.info;
    let show = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
    println!("records:   {}", summary.records);
    println!("thread_id: {}", show(&info.thread_id));
    println!("agent:     {}", show(&info.agent));
    println!("id:        {}", show(&info.id));
    println!("role:      {}", show(&info.role));
    println!("tools:     {}", summary.tool_names.join(", "));
    println!("fragments: {}", summary.fragments.len());
    println!("\n{}", summary.content());
    ExitCode::SUCCESS
}
