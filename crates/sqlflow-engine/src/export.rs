//! Escritura de resultados de exportación a disco.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use sqlflow_core::ExportFormat;
use uuid::Uuid;

use crate::connector::QueryRows;
use crate::errors::EngineError;

/// Ruta del archivo: `<dir>/<order>/<task>.<ext>`.
pub fn export_path(dir: &Path, order_id: Uuid, task_id: Uuid, format: ExportFormat) -> PathBuf {
    dir.join(order_id.to_string()).join(format!("{task_id}.{}", format.extension()))
}

pub async fn write_export(dir: &Path, order_id: Uuid, task_id: Uuid, format: ExportFormat, data: &QueryRows) -> Result<PathBuf, EngineError> {
    let path = export_path(dir, order_id, task_id, format);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let body = match format {
        ExportFormat::Json => render_json(data)?,
        ExportFormat::Csv => render_csv(data),
    };
    tokio::fs::write(&path, body).await?;
    Ok(path)
}

fn render_json(data: &QueryRows) -> Result<String, EngineError> {
    let records: Vec<Value> = data.rows
                                  .iter()
                                  .map(|row| {
                                      let obj: Map<String, Value> = data.columns.iter().cloned().zip(row.iter().cloned()).collect();
                                      Value::Object(obj)
                                  })
                                  .collect();
    serde_json::to_string_pretty(&records).map_err(|e| EngineError::Sql(format!("encode export: {e}")))
}

fn csv_field(v: &Value) -> String {
    let raw = match v {
        Value::Null => return String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw
    }
}

fn render_csv(data: &QueryRows) -> String {
    let mut out = String::new();
    let header: Vec<String> = data.columns.iter().map(|c| csv_field(&Value::String(c.clone()))).collect();
    out.push_str(&header.join(","));
    out.push('\n');
    for row in &data.rows {
        let line: Vec<String> = row.iter().map(csv_field).collect();
        out.push_str(&line.join(","));
        out.push('\n');
    }
    out
}
