//! Prometheus text exposition format.
//!
//! Low-level writers shared by the metric families. Output follows text
//! format 0.0.4: `# HELP` and `# TYPE` per family, then one sample line
//! per series, label values escaped.

use std::fmt::Write as _;

use crate::family::Descriptor;

/// Content type for the `/metrics` response.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub(crate) fn write_header(out: &mut String, desc: &Descriptor, kind: &str) {
    let _ = writeln!(out, "# HELP {} {}", desc.name, escape_help(desc.help));
    let _ = writeln!(out, "# TYPE {} {kind}", desc.name);
}

pub(crate) fn write_sample(out: &mut String, name: &str, labels: &str, value: &str) {
    let _ = writeln!(out, "{name}{labels} {value}");
}

/// Build `{a="x",b="y"}`, optionally with a trailing `le`. Empty when there
/// are no labels at all.
pub(crate) fn labels(names: &[&str], values: &[String], le: Option<&str>) -> String {
    let mut pairs: Vec<String> = names
        .iter()
        .zip(values)
        .map(|(n, v)| format!("{n}=\"{}\"", escape_label(v)))
        .collect();
    if let Some(le) = le {
        pairs.push(format!("le=\"{le}\""));
    }
    if pairs.is_empty() {
        String::new()
    } else {
        format!("{{{}}}", pairs.join(","))
    }
}

/// Floats always carry a decimal point or exponent (`1.0`, `0.005`).
pub(crate) fn format_float(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v == f64::INFINITY {
        "+Inf".to_string()
    } else if v == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        format!("{v:?}")
    }
}

fn escape_label(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}

fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}
