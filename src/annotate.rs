//! Annotated source listing
//!
//! Renders one block per reported file: a per-line table of hits, time,
//! time per hit and share of the total duration, with the source text
//! alongside and one `(call)` sub-row per outgoing edge. Rendering is a
//! pure function of the profile and the source cache, so annotating the
//! same profile twice yields byte-identical output.

use std::io::{self, Write};

use crate::aggregate::GlobalProfile;
use crate::site::CodeRef;
use crate::source::SourceCache;

const HEADER: &str = "Line #|      Hits|         Time| Time per hit|      %|Source code";

/// `%g`-style rendering: six significant digits, scientific notation when
/// the magnitude calls for it, trailing zeros trimmed.
pub fn fmt_g(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    if !value.is_finite() {
        return value.to_string();
    }
    let exp = value.abs().log10().floor() as i32;
    if !(-4..6).contains(&exp) {
        let formatted = format!("{:.5e}", value);
        let (mantissa, exponent) = formatted
            .split_once('e')
            .expect("{:e} always contains an exponent");
        let mantissa = mantissa.trim_end_matches('0').trim_end_matches('.');
        let exponent: i32 = exponent.parse().unwrap_or(0);
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exponent.abs())
    } else {
        let decimals = (5 - exp).max(0) as usize;
        let formatted = format!("{:.*}", decimals, value);
        if formatted.contains('.') {
            formatted
                .trim_end_matches('0')
                .trim_end_matches('.')
                .to_string()
        } else {
            formatted
        }
    }
}

fn percent(value: u64, scale: u64) -> f64 {
    if scale == 0 {
        0.0
    } else {
        value as f64 * 100.0 / scale as f64
    }
}

fn seconds(nanos: u64) -> f64 {
    nanos as f64 / 1e9
}

/// Label a callee the way readers expect: the file itself for top-level
/// code, `name:first_line` otherwise.
pub fn code_label(code: &CodeRef) -> String {
    if code.is_module() {
        code.file.to_string()
    } else {
        format!("{}:{}", code.name, code.first_line)
    }
}

fn horizontal_rule() -> String {
    HEADER
        .chars()
        .map(|c| if c == '|' { '+' } else { '-' })
        .collect()
}

/// Write the annotated listing for every reported file.
pub fn annotate<W: Write>(
    profile: &GlobalProfile,
    sources: &mut SourceCache,
    out: &mut W,
) -> io::Result<()> {
    if let Some(command_line) = &profile.command_line {
        writeln!(out, "Command line: {}", command_line)?;
    }
    writeln!(out, "Total duration: {}s", fmt_g(seconds(profile.total_ns)))?;
    if profile.dropped.any() {
        writeln!(
            out,
            "Dropped deltas: stack underflow={}, backwards clock={}",
            profile.dropped.underflow, profile.dropped.backwards
        )?;
    }
    if profile.total_ns == 0 {
        return Ok(());
    }
    let rule = horizontal_rule();
    for file in profile.files_by_weight() {
        let (file_ns, _) = profile.file_totals(&file);
        let calls_by_line = profile.calls_by_line(&file);
        writeln!(out, "File: {}", file)?;
        writeln!(
            out,
            "File duration: {}s ({:.2}%)",
            fmt_g(seconds(file_ns)),
            percent(file_ns, profile.total_ns)
        )?;
        writeln!(out, "{}", HEADER)?;
        writeln!(out, "{}", rule)?;
        let source = sources.lines(&file);
        let last = profile.last_line(&file).max(source.len() as u32);
        for lineno in 1..=last {
            let stat = profile
                .line_at(&file, lineno)
                .map(|r| r.stat)
                .unwrap_or_default();
            let time_per_hit = if stat.hits == 0 {
                0.0
            } else {
                seconds(stat.nanos) / stat.hits as f64
            };
            let text = source
                .get(lineno as usize - 1)
                .map(|l| l.as_str())
                .unwrap_or("");
            writeln!(
                out,
                "{:>6}|{:>10}|{:>13}|{:>13}|{:>6.2}%|{}",
                lineno,
                stat.hits,
                fmt_g(seconds(stat.nanos)),
                fmt_g(time_per_hit),
                percent(stat.nanos, profile.total_ns),
                text
            )?;
            if let Some(calls) = calls_by_line.get(&lineno) {
                for (edge, record) in calls {
                    let per_hit = if record.stat.hits == 0 {
                        0.0
                    } else {
                        seconds(record.stat.nanos) / record.stat.hits as f64
                    };
                    writeln!(
                        out,
                        "(call)|{:>10}|{:>13}|{:>13}|{:>6.2}%|# {}:{} {}",
                        record.stat.hits,
                        fmt_g(seconds(record.stat.nanos)),
                        fmt_g(per_hit),
                        percent(record.stat.nanos, profile.total_ns),
                        edge.callee.file,
                        edge.callee.first_line,
                        edge.callee.name
                    )?;
                }
            }
        }
    }
    Ok(())
}

/// Render to a string; reports are small relative to profiled runs.
pub fn annotate_to_string(profile: &GlobalProfile, sources: &mut SourceCache) -> String {
    let mut buffer = Vec::new();
    annotate(profile, sources, &mut buffer).expect("writing to a Vec cannot fail");
    String::from_utf8(buffer).expect("annotation is UTF-8")
}
