use bytes::Bytes;
use chrono::{DateTime, Utc};
use parquet::file::reader::FileReader;
use parquet::file::serialized_reader::SerializedFileReader;
use parquet::record::{Field, Row};
use serde::Deserialize;
use std::collections::HashSet;

use crate::codec::{format_date, parse_date};
use crate::entities::Visit;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct ExportRow {
    pub id: String,
    pub ip: String,
    #[serde(default)]
    pub user: Option<String>,
    pub title: String,
    pub slug: String,
    #[serde(default)]
    pub app: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub width: Option<u32>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub height: Option<u32>,
}

impl ExportRow {
    pub fn date(&self) -> Result<DateTime<Utc>> {
        parse_date(&self.id)
            .ok_or_else(|| Error::Export(format!("{} is not a timestamp", self.id)))
    }

    /// Signed-in user id; blank and `None` mean anonymous.
    pub fn user(&self) -> Option<i64> {
        let raw = self.user.as_deref()?.trim();
        raw.parse::<i64>()
            .ok()
            .or_else(|| raw.parse::<f64>().ok().map(|u| u as i64))
    }

    pub fn device(&self) -> Option<(&str, u32, u32)> {
        let app = self.app.as_deref().filter(|a| !a.trim().is_empty())?;
        Some((app, self.width?, self.height?))
    }

    pub fn to_visit(&self) -> Result<Visit> {
        Ok(Visit::new(
            self.date()?,
            self.ip.clone(),
            self.user(),
            self.title.clone(),
            self.slug.clone(),
        ))
    }
}

// Exports hold `id,ip,user,title,slug,app,width,height`, where `id` is the
// view's timestamp.
pub fn parse_object(key: &str, data: Bytes) -> Result<Vec<ExportRow>> {
    match key.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
        Some(ext) if ext == "parquet" => parse_parquet(data),
        Some(ext) if ext == "csv" => parse_export(&data),
        _ => Err(Error::Export(format!("{key} is neither .parquet nor .csv"))),
    }
}

pub fn parse_export(data: &[u8]) -> Result<Vec<ExportRow>> {
    let mut reader = csv::Reader::from_reader(data);
    let rows = reader
        .deserialize::<ExportRow>()
        .enumerate()
        .map(|(line, record)| record.map_err(|e| Error::Export(format!("row {}: {e}", line + 1))));
    distinct(rows)
}

pub fn parse_parquet(data: Bytes) -> Result<Vec<ExportRow>> {
    let reader = SerializedFileReader::new(data)
        .map_err(|e| Error::Export(format!("not a parquet file: {e}")))?;
    let rows = reader
        .get_row_iter(None)
        .map_err(|e| Error::Export(format!("parquet rows: {e}")))?
        .enumerate()
        .map(|(line, row)| {
            row.map_err(|e| e.to_string())
                .and_then(|row| row_from_parquet(&row))
                .map_err(|e| Error::Export(format!("row {}: {e}", line + 1)))
        });
    distinct(rows)
}

fn distinct(rows: impl Iterator<Item = Result<ExportRow>>) -> Result<Vec<ExportRow>> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for row in rows {
        let row = row?;
        if seen.insert(row.clone()) {
            out.push(row);
        }
    }
    Ok(out)
}

fn row_from_parquet(row: &Row) -> std::result::Result<ExportRow, String> {
    let mut export = ExportRow {
        id: String::new(),
        ip: String::new(),
        user: None,
        title: String::new(),
        slug: String::new(),
        app: None,
        width: None,
        height: None,
    };
    let mut missing: HashSet<&str> = ["id", "ip", "title", "slug"].into();
    for (name, field) in row.get_column_iter() {
        match name.as_str() {
            "id" => export.id = required(name, field)?,
            "ip" => export.ip = required(name, field)?,
            "title" => export.title = required(name, field)?,
            "slug" => export.slug = required(name, field)?,
            "user" => export.user = text(field),
            "app" => export.app = text(field),
            "width" => export.width = dimension(field),
            "height" => export.height = dimension(field),
            _ => continue,
        }
        missing.remove(name.as_str());
    }
    match missing.into_iter().min() {
        Some(column) => Err(format!("missing column {column}")),
        None => Ok(export),
    }
}

fn required(name: &str, field: &Field) -> std::result::Result<String, String> {
    text(field).ok_or_else(|| format!("{name} is null"))
}

fn text(field: &Field) -> Option<String> {
    match field {
        Field::Str(v) => Some(v.clone()),
        Field::Bytes(v) => std::str::from_utf8(v.data()).ok().map(str::to_string),
        Field::Int(v) => Some(v.to_string()),
        Field::Long(v) => Some(v.to_string()),
        Field::Double(v) if v.is_finite() => Some(v.to_string()),
        Field::TimestampMillis(ms) => DateTime::from_timestamp_millis(*ms).map(|d| format_date(&d)),
        Field::TimestampMicros(us) => DateTime::from_timestamp_micros(*us).map(|d| format_date(&d)),
        _ => None,
    }
}

// Screen sizes arrive as floats when the column held nulls.
fn dimension(field: &Field) -> Option<u32> {
    match field {
        Field::Int(v) => u32::try_from(*v).ok(),
        Field::Long(v) => u32::try_from(*v).ok(),
        Field::Double(v) if v.is_finite() && *v >= 0.0 => Some(*v as u32),
        Field::Str(v) => v.trim().parse().ok(),
        _ => None,
    }
}
