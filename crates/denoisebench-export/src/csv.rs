//! Results table serializer.
//!
//! One header line followed by one line per [`ResultRecord`], columns
//! `image,denoiser,metric,value,time`. `time` is the denoiser duration
//! in seconds. Failure rows carry `NaN` in the value column.
//!
//! Text fields are quoted only when they contain a comma, a quote, or a
//! line break; embedded quotes are doubled.
//!
//! This is a pure function with no I/O -- it returns a `String`.

use std::borrow::Cow;
use std::fmt::Write;

use denoisebench_pipeline::ResultRecord;

/// Column names of the results table.
pub const HEADER: [&str; 5] = ["image", "denoiser", "metric", "value", "time"];

/// Serialize `records` into the full results table, header included.
#[must_use]
pub fn to_csv(records: &[ResultRecord]) -> String {
    let mut out = HEADER.join(",");
    out.push('\n');
    for record in records {
        out.push_str(&csv_row(record));
        out.push('\n');
    }
    out
}

/// Serialize one record, without the trailing newline.
#[must_use]
pub fn csv_row(record: &ResultRecord) -> String {
    let mut row = String::new();
    let _ = write!(
        row,
        "{},{},{},{},{}",
        field(&record.image),
        field(&record.denoiser),
        field(&record.metric),
        number(record.value),
        number(record.duration.as_secs_f64()),
    );
    row
}

fn field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

fn number(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "inf" } else { "-inf" }.to_string()
    } else {
        value.to_string()
    }
}
