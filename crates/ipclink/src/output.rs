use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use ipclink_wire::Value;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct ValueOutput<'a> {
    channel: &'a str,
    name: &'a str,
    value: serde_json::Value,
}

pub fn print_value(channel: &str, name: &str, value: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = ValueOutput {
                channel,
                name,
                value: value_to_json(value),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CHANNEL", "NAME", "VALUE"])
                .add_row(vec![
                    channel.to_string(),
                    name.to_string(),
                    value_preview(value),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("channel={channel} name={name} value={}", value_preview(value));
        }
        OutputFormat::Raw => print_raw(value),
    }
}

pub fn print_raw(value: &Value) {
    let mut out = std::io::stdout();
    match value {
        Value::Buffer(bytes) | Value::Bytes(bytes) => {
            let _ = out.write_all(bytes);
        }
        other => {
            let _ = out.write_all(value_preview(other).as_bytes());
            let _ = out.write_all(b"\n");
        }
    }
    let _ = out.flush();
}

pub fn value_preview(value: &Value) -> String {
    match value {
        Value::Undefined => "undefined".to_string(),
        Value::String(s) => s.clone(),
        Value::Buffer(bytes) | Value::Bytes(bytes) => {
            format!("<binary {} bytes>", bytes.len())
        }
        Value::Array(items) => format!("<array of {} values>", items.len()),
        Value::Object(json) => json.to_string(),
    }
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Undefined => serde_json::Value::Null,
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Buffer(bytes) | Value::Bytes(bytes) => {
            serde_json::Value::String(format!("<binary {} bytes>", bytes.len()))
        }
        Value::Array(items) => serde_json::Value::Array(items.iter().map(value_to_json).collect()),
        Value::Object(json) => json.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_of_common_values() {
        assert_eq!(value_preview(&Value::Undefined), "undefined");
        assert_eq!(value_preview(&Value::String("hi".to_string())), "hi");
        assert_eq!(
            value_preview(&Value::Object(serde_json::json!({"a": 1}))),
            "{\"a\":1}"
        );
    }

    #[test]
    fn json_output_maps_undefined_to_null() {
        assert_eq!(value_to_json(&Value::Undefined), serde_json::Value::Null);
    }
}
