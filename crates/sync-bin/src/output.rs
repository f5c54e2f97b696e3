//! Human and machine renderings of command results.

use clap::ValueEnum;
use serde::Serialize;

const LABEL_WIDTH: usize = 16;
const RULE_WIDTH: usize = 50;

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

/// One-line confirmation; `{"status":"success","message":..}` in JSON mode.
pub fn print_success(message: &str, format: &OutputFormat) {
    if let OutputFormat::Json = format {
        let body = serde_json::json!({ "status": "success", "message": message });
        println!("{body}");
    } else {
        println!("{message}");
    }
}

/// Indented `label: value` with labels padded to a common column.
pub fn print_row(label: &str, value: &str) {
    let label = format!("{label}:");
    println!("  {label:<width$} {value}", width = LABEL_WIDTH);
}

pub fn print_heading(text: &str) {
    println!("\n{text}\n{}", "-".repeat(RULE_WIDTH));
}
