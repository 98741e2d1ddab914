//! Callgrind-format profile emitter
//!
//! Writes the profile in the textual format kcachegrind and friends read:
//! `fl`/`fn` blocks of per-line costs with `cfl`/`cfn`/`calls` records for
//! outgoing edges. Two cost events are declared, hit count and time in
//! nanoseconds. The cost invariant readers rely on holds by construction:
//! a block's self costs plus its outbound edge costs equal its inclusive
//! time, because child time is discounted from the caller's lines as it is
//! posted to the edge.

use std::io::{self, Write};

use crate::aggregate::GlobalProfile;
use crate::annotate::code_label;
use crate::site::CodeRef;

/// Strip absolute components from a path so archive members resolve
/// relative to the profile file. Also forces forward slashes, which the
/// Windows build of qcachegrind needs to locate files at all.
pub fn relative_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    let path = if path.len() >= 2
        && path.as_bytes()[1] == b':'
        && path.as_bytes()[0].is_ascii_alphabetic()
    {
        &path[2..]
    } else {
        path.as_str()
    };
    path.trim_start_matches('/').to_string()
}

fn display_path(path: &str, relative: bool) -> String {
    if relative {
        relative_path(path)
    } else {
        path.replace('\\', "/")
    }
}

fn block_label(code: &CodeRef, relative: bool) -> String {
    if code.is_module() {
        display_path(&code.file, relative)
    } else {
        code_label(code)
    }
}

/// Write the profile in callgrind format. With `relative`, absolute path
/// components are stripped (used together with source archives).
pub fn callgrind<W: Write>(
    profile: &GlobalProfile,
    out: &mut W,
    relative: bool,
) -> io::Result<()> {
    writeln!(out, "# callgrind format")?;
    writeln!(out, "version: 1")?;
    if let Some(command_line) = &profile.command_line {
        writeln!(out, "cmd: {}", command_line)?;
    }
    writeln!(
        out,
        "creator: lineprof/{}",
        env!("CARGO_PKG_VERSION")
    )?;
    writeln!(out, "positions: line")?;
    writeln!(out, "events: Hits Time")?;
    writeln!(out, "summary: {}", profile.total_ns)?;
    if profile.dropped.any() {
        writeln!(
            out,
            "# dropped deltas: stack underflow={}, backwards clock={}",
            profile.dropped.underflow, profile.dropped.backwards
        )?;
    }
    writeln!(out)?;
    let mut files: Vec<_> = profile.files().into_iter().collect();
    files.sort();
    for file in files {
        let calls_by_line = profile.calls_by_line(&file);
        writeln!(out, "fl={}", display_path(&file, relative))?;
        let mut current_fn: Option<String> = None;
        let last = profile.last_line(&file);
        for lineno in 1..=last {
            let record = profile.line_at(&file, lineno);
            let calls = calls_by_line.get(&lineno);
            let (hits, nanos) = match record {
                Some(record) => (record.stat.hits, record.stat.nanos),
                None => (0, 0),
            };
            if record.is_none() && calls.is_none() {
                continue;
            }
            // Function attribution: the line's owner, or for call-only
            // lines (sampled profiles) the caller recorded on the edge.
            let owner = record
                .map(|r| &r.owner)
                .or_else(|| calls.and_then(|c| c.first()).map(|(_, r)| &r.owner));
            let label = owner
                .map(|code| block_label(code, relative))
                .unwrap_or_else(|| display_path(&file, relative));
            if current_fn.as_deref() != Some(label.as_str()) {
                writeln!(out, "fn={}", label)?;
                current_fn = Some(label);
            }
            writeln!(out, "{} {} {}", lineno, hits, nanos)?;
            if let Some(calls) = calls {
                for (edge, record) in calls {
                    writeln!(out, "cfl={}", display_path(&edge.callee.file, relative))?;
                    writeln!(out, "cfn={}", block_label(&edge.callee, relative))?;
                    writeln!(
                        out,
                        "calls={} {}",
                        record.stat.hits, edge.callee.first_line
                    )?;
                    writeln!(out, "{} {} {}", lineno, record.stat.hits, record.stat.nanos)?;
                }
            }
        }
        writeln!(out)?;
    }
    Ok(())
}

/// Render to a string, for archive members and tests.
pub fn callgrind_to_string(profile: &GlobalProfile, relative: bool) -> String {
    let mut buffer = Vec::new();
    callgrind(profile, &mut buffer, relative).expect("writing to a Vec cannot fail");
    String::from_utf8(buffer).expect("callgrind output is UTF-8")
}
