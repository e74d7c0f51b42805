use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use crossterm::style::Stylize;

use crate::core::alert::{derive_display_id, AlertRecord};
use crate::core::error::KestrelError;
use crate::core::time::{fmt_ts, parse_iso_utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Console,
    Json,
    Csv,
}

impl OutputFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "console" => Some(OutputFormat::Console),
            "json" => Some(OutputFormat::Json),
            "csv" => Some(OutputFormat::Csv),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            OutputFormat::Console => "console",
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
        }
    }
}

/// Render one accepted alert to stdout in the selected format, and append a
/// plain rendering to `log_file` when one is configured.
pub fn emit_record(
    alert: &AlertRecord,
    format: OutputFormat,
    log_file: Option<&Path>,
) -> Result<(), KestrelError> {
    let rendered = match format {
        OutputFormat::Console => console_line(alert, true),
        OutputFormat::Json => serde_json::to_string(alert)
            .map_err(|e| KestrelError::Config(e.to_string()))?,
        OutputFormat::Csv => csv_line(alert),
    };
    println!("{rendered}");

    if let Some(path) = log_file {
        let line = match format {
            OutputFormat::Console => format!("{} | {}", created_display(alert), console_line(alert, false)),
            _ => rendered,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| KestrelError::Config(e.to_string()))?;
        writeln!(file, "{line}").map_err(|e| KestrelError::Config(e.to_string()))?;
    }

    Ok(())
}

fn created_display(alert: &AlertRecord) -> String {
    alert
        .best_created()
        .and_then(parse_iso_utc)
        .map(fmt_ts)
        .unwrap_or_else(|| "-".to_string())
}

fn console_line(alert: &AlertRecord, color: bool) -> String {
    let ts = created_display(alert);
    let display_id = derive_display_id(alert.full_id().unwrap_or("unknown-id"));
    let name = alert.name().unwrap_or("Alert");
    let status = alert.status().unwrap_or("");
    let host = alert.hostname().unwrap_or("-");
    let product = alert
        .product()
        .map(|p| p.trim().to_uppercase())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| "UNKNOWN".to_string());
    let sev = alert.severity_display();

    if !color {
        return format!(
            "[{ts}] [{product}] sev={sev} status={status} id={display_id} host={host} :: {name}"
        );
    }

    format!(
        "[{ts}] [{}] sev={} status={} id={} host={} :: {}",
        product.green(),
        styled_severity(alert),
        status.to_string().dark_yellow().bold(),
        display_id.to_string().blue(),
        host.to_string().cyan(),
        name.to_string().bold(),
    )
}

fn styled_severity(alert: &AlertRecord) -> String {
    let sev = alert.severity_display();
    let tier = match alert.severity_i64() {
        Some(n) if n >= 60 => 2,
        Some(n) if n >= 30 => 1,
        Some(_) => 0,
        None => match sev.to_uppercase().as_str() {
            "CRITICAL" | "HIGH" => 2,
            "MEDIUM" => 1,
            _ => 0,
        },
    };
    match tier {
        2 => sev.red().to_string(),
        1 => sev.blue().to_string(),
        _ => sev.green().to_string(),
    }
}

fn csv_line(alert: &AlertRecord) -> String {
    let display_id = derive_display_id(alert.full_id().unwrap_or("unknown-id"));
    let severity = alert.severity_display();
    [
        display_id,
        alert.name().unwrap_or(""),
        severity.as_str(),
        alert.status().unwrap_or(""),
        alert.product().unwrap_or(""),
        alert.hostname().unwrap_or(""),
        alert.created_timestamp().unwrap_or(""),
        alert.updated_timestamp().unwrap_or(""),
        alert.description().unwrap_or(""),
    ]
    .iter()
    .map(|field| csv_field(field))
    .collect::<Vec<_>>()
    .join(",")
}

/// Quote a CSV field when it contains a delimiter, quote, or newline.
pub fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> AlertRecord {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn csv_field_quotes_only_when_needed() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_field("two\nlines"), "\"two\nlines\"");
    }

    #[test]
    fn csv_line_uses_display_id_and_fixed_columns() {
        let alert = record(json!({
            "id": "cid:ind:42",
            "name": "Name, with comma",
            "severity": 70,
            "status": "new",
            "product": "EDR",
            "device": {"hostname": "web01"},
            "created_timestamp": "2025-06-01T00:00:01Z",
            "updated_timestamp": "2025-06-01T00:00:02Z",
            "description": "desc",
        }));
        assert_eq!(
            csv_line(&alert),
            "ind:42,\"Name, with comma\",70,new,EDR,web01,2025-06-01T00:00:01Z,2025-06-01T00:00:02Z,desc"
        );
    }

    #[test]
    fn plain_console_line_has_no_escape_codes() {
        let alert = record(json!({
            "id": "cid:det:7",
            "name": "Suspicious process",
            "severity": "high",
            "created_timestamp": "2025-06-01T00:00:01Z",
        }));
        let line = console_line(&alert, false);
        assert!(!line.contains('\u{1b}'));
        assert!(line.contains("id=det:7"));
        assert!(line.contains(":: Suspicious process"));
    }
}
