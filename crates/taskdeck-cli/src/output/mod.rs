//! Output formatting for taskdeck.
//!
//! Commands build serializable report structs; this module renders them as
//! JSON or as compact text.

use anyhow::Result;
use serde::Serialize;
use std::io::{self, Write};

/// Output format selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Machine-readable JSON.
    Json,
    /// Compact line-oriented text.
    #[default]
    Text,
}

#[derive(Debug, Clone)]
pub struct Formatter {
    format: OutputFormat,
}

impl Formatter {
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Format data according to the configured output format.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn format<T: Serialize>(&self, data: &T) -> Result<String> {
        match self.format {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(data)?),
            OutputFormat::Text => {
                let value = serde_json::to_value(data)?;
                Ok(render_text(&value))
            }
        }
    }

    /// Format and print data to stdout.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn print<T: Serialize>(&self, data: &T) -> Result<()> {
        let output = self.format(data)?;
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{output}")?;
        Ok(())
    }

    /// Print a list, with a custom message when it is empty (text mode).
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn print_list<T: Serialize>(&self, data: &[T], empty_message: &str) -> Result<()> {
        if data.is_empty() && self.format == OutputFormat::Text {
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "{empty_message}")?;
            return Ok(());
        }
        self.print(&data)
    }
}

impl Default for Formatter {
    fn default() -> Self {
        Self::new(OutputFormat::default())
    }
}

/// Render a JSON value as one compact line per record, id and name first.
fn render_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let lead_keys = ["id", "name", "title"];
            let mut parts = Vec::new();
            for key in &lead_keys {
                if let Some(val) = map.get(*key) {
                    parts.push(render_field(val));
                }
            }
            for (key, val) in map {
                if lead_keys.contains(&key.as_str()) {
                    continue;
                }
                match val {
                    serde_json::Value::Null => {}
                    serde_json::Value::Array(arr) if arr.is_empty() => {}
                    _ => parts.push(format!("{}={}", key, render_field(val))),
                }
            }
            parts.join("  ")
        }
        serde_json::Value::Array(arr) => {
            arr.iter().map(render_text).collect::<Vec<_>>().join("\n")
        }
        _ => render_field(value),
    }
}

fn render_field(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => {
            if s.contains(' ') || s.contains('\n') {
                format!("\"{}\"", s.replace('\n', "\\n"))
            } else {
                s.clone()
            }
        }
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Null => "null".to_string(),
        serde_json::Value::Array(arr) => {
            let items: Vec<String> = arr.iter().map(render_field).collect();
            format!("[{}]", items.join(","))
        }
        serde_json::Value::Object(map) => {
            let parts: Vec<String> = map
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| format!("{}={}", k, render_field(v)))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize)]
    struct Row {
        id: i64,
        title: String,
        status: String,
        notes: Option<String>,
    }

    #[test]
    fn test_json_output_is_valid() {
        let row = Row {
            id: 7,
            title: "write docs".to_string(),
            status: "todo".to_string(),
            notes: None,
        };
        let out = Formatter::new(OutputFormat::Json).format(&row).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["id"], 7);
        assert_eq!(parsed["title"], "write docs");
    }

    #[test]
    fn test_text_leads_with_id_and_title() {
        let row = Row {
            id: 7,
            title: "write docs".to_string(),
            status: "todo".to_string(),
            notes: None,
        };
        let out = Formatter::new(OutputFormat::Text).format(&row).unwrap();
        assert!(out.starts_with("7  \"write docs\""));
        assert!(out.contains("status=todo"));
        assert!(!out.contains("notes"));
    }

    #[test]
    fn test_text_array_is_one_line_per_record() {
        let rows = vec![
            Row {
                id: 1,
                title: "a".to_string(),
                status: "todo".to_string(),
                notes: None,
            },
            Row {
                id: 2,
                title: "b".to_string(),
                status: "done".to_string(),
                notes: None,
            },
        ];
        let out = Formatter::new(OutputFormat::Text).format(&rows).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('1'));
        assert!(lines[1].starts_with('2'));
    }
}
