//! Output formatting for airctrl (table, json, csv)

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{Table, Tabled};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
    /// CSV format
    Csv,
}

impl OutputFormat {
    /// Parse a format name from the config file, falling back to table
    pub fn from_name(name: &str) -> Self {
        <Self as ValueEnum>::from_str(name, true).unwrap_or_default()
    }
}

/// Context for output rendering
pub struct OutputContext {
    pub format: OutputFormat,
    pub quiet: bool,
}

impl OutputContext {
    pub fn new(format: OutputFormat, no_color: bool, quiet: bool) -> Self {
        if no_color {
            colored::control::set_override(false);
        }
        Self { format, quiet }
    }

    /// Whether human-readable text (not data) should be printed
    fn chatty(&self) -> bool {
        !self.quiet && self.format == OutputFormat::Table
    }

    /// Print a success message (unless in quiet mode)
    pub fn success(&self, msg: &str) {
        if self.chatty() {
            println!("{}", msg.green());
        }
    }

    /// Print an info message (unless in quiet mode)
    pub fn info(&self, msg: &str) {
        if self.chatty() {
            println!("{}", msg);
        }
    }

    /// Print a warning message
    pub fn warn(&self, msg: &str) {
        eprintln!("{}", msg.yellow());
    }

    /// Print an error message
    pub fn error(&self, msg: &str) {
        eprintln!("{}", msg.red());
    }

    /// Print data in the configured format
    pub fn print<T: Tabled + Serialize>(&self, data: &[T]) {
        match self.format {
            OutputFormat::Table => {
                if data.is_empty() {
                    if !self.quiet {
                        println!("No data");
                    }
                } else {
                    println!("{}", Table::new(data));
                }
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(data).unwrap_or_else(|_| "[]".to_string())
                );
            }
            OutputFormat::Csv => print_csv(data),
        }
    }

    /// Print any serializable value as JSON
    pub fn print_json<T: Serialize>(&self, data: &T) {
        println!(
            "{}",
            serde_json::to_string_pretty(data).unwrap_or_else(|_| "{}".to_string())
        );
    }

    /// Print key-value pairs
    pub fn print_kv(&self, pairs: &[(&str, String)]) {
        match self.format {
            OutputFormat::Table => {
                for (key, value) in pairs {
                    println!("{}: {}", key.bold(), value);
                }
            }
            OutputFormat::Json => {
                let map: serde_json::Map<String, serde_json::Value> = pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.clone())))
                    .collect();
                self.print_json(&map);
            }
            OutputFormat::Csv => {
                let keys: Vec<&str> = pairs.iter().map(|(k, _)| *k).collect();
                println!("{}", keys.join(","));
                let values: Vec<String> = pairs.iter().map(|(_, v)| escape_csv(v)).collect();
                println!("{}", values.join(","));
            }
        }
    }
}

/// Print data as CSV
fn print_csv<T: Serialize>(data: &[T]) {
    let Some(first) = data.first() else {
        return;
    };

    if let Ok(serde_json::Value::Object(map)) = serde_json::to_value(first) {
        let headers: Vec<&str> = map.keys().map(|s| s.as_str()).collect();
        println!("{}", headers.join(","));

        for item in data {
            if let Ok(serde_json::Value::Object(row)) = serde_json::to_value(item) {
                let values: Vec<String> = headers
                    .iter()
                    .map(|h| row.get(*h).map(csv_cell).unwrap_or_default())
                    .collect();
                println!("{}", values.join(","));
            }
        }
    }
}

fn csv_cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => escape_csv(s),
        other => escape_csv(&other.to_string()),
    }
}

/// Escape a value for CSV output
fn escape_csv(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

// =============================================================================
// Display types for various commands
// =============================================================================

/// Capability value display for status command
#[derive(Debug, Tabled, Serialize)]
pub struct CapabilityRow {
    #[tabled(rename = "Capability")]
    pub capability: String,
    #[tabled(rename = "Value")]
    pub value: String,
    #[tabled(rename = "Unit")]
    pub unit: String,
}

/// Profile display for profiles command
#[derive(Debug, Tabled, Serialize)]
pub struct ProfileRow {
    #[tabled(rename = "Model")]
    pub model: String,
    #[tabled(rename = "Family")]
    pub family: String,
    #[tabled(rename = "Aliases")]
    pub aliases: String,
    #[tabled(rename = "Capabilities")]
    pub capabilities: usize,
    #[tabled(rename = "Description")]
    pub description: String,
}

/// Descriptor display for profiles command with a model
#[derive(Debug, Tabled, Serialize)]
pub struct DescriptorRow {
    #[tabled(rename = "Capability")]
    pub capability: String,
    #[tabled(rename = "Rule")]
    pub rule: String,
    #[tabled(rename = "Raw Keys")]
    pub keys: String,
    #[tabled(rename = "Domain")]
    pub domain: String,
    #[tabled(rename = "Unit")]
    pub unit: String,
    #[tabled(rename = "Writable")]
    pub writable: String,
}

/// Event display for watch command
#[derive(Debug, Tabled, Serialize)]
pub struct ChangeRow {
    #[tabled(rename = "Time")]
    pub timestamp: String,
    #[tabled(rename = "Capability")]
    pub capability: String,
    #[tabled(rename = "Old")]
    pub old: String,
    #[tabled(rename = "New")]
    pub new: String,
}
