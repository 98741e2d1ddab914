//! Launcher: wires the CLI to a profiling session and the renderers
//!
//! Loads the target trace, builds the filter policy, runs either the
//! deterministic tracer or the statistical sampler over the replay host,
//! then renders to the requested format. The profiled program's exit code
//! is passed through; configuration failures are reported by `main` with
//! exit code 2. Output write failures only lose the dump, never the run's
//! exit status: the run has already completed by then.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{debug, warn};

use crate::aggregate::GlobalProfile;
use crate::annotate;
use crate::archive;
use crate::callgrind;
use crate::cli::{Cli, OutputFormat};
use crate::clock::{ManualClock, MonotonicClock};
use crate::filter::FilterPolicy;
use crate::profiler::{ProfileOptions, Profiler};
use crate::replay::{ReplayHost, ReplayStacks};
use crate::sampler::Sampler;
use crate::source::SourceCache;

/// Run the launcher. Returns the process exit code.
pub fn run(cli: Cli) -> Result<i32> {
    let target = resolve_target(&cli)?;
    let mut host = ReplayHost::load(&target)?;

    let syspath: Vec<String> = if cli.exclude_syspath {
        host.syspath().to_vec()
    } else {
        Vec::new()
    };
    let filter = FilterPolicy::new(&cli.include, &cli.exclude, &syspath);
    let format = cli.effective_format();
    let relative = format != OutputFormat::Text && (cli.zipfile.is_some() || format == OutputFormat::CallgrindZip);

    let (profile, exit_code, clean) = if cli.statistic > 0.0 {
        run_statistical(&cli, &mut host, filter)?
    } else {
        run_deterministic(&cli, &mut host, filter)?
    };

    if let Err(error) = render(&cli, format, relative, &profile) {
        warn!(%error, "profile dump failed");
        eprintln!("lineprof: profile dump failed: {:#}", error);
    }

    // An unclean sampler exit must not masquerade as a clean run;
    // exceptions raised in threads do not change exit status otherwise.
    if !clean {
        return Ok(1);
    }
    Ok(exit_code)
}

fn resolve_target(cli: &Cli) -> Result<PathBuf> {
    if let Some(module) = &cli.module {
        return ReplayHost::resolve_module(module);
    }
    match &cli.script {
        Some(script) => Ok(PathBuf::from(script)),
        None => bail!("no target given; pass a trace file or -m MODULE"),
    }
}

fn run_deterministic(
    cli: &Cli,
    host: &mut ReplayHost,
    filter: FilterPolicy,
) -> Result<(GlobalProfile, i32, bool)> {
    let clock = Arc::new(ManualClock::new());
    let profiler = Profiler::new(ProfileOptions {
        clock: clock.clone(),
        filter,
        propagate: cli.threads != 0,
        command_line: cli.command_line(),
    });
    profiler
        .enable(host.main_thread())
        .context("failed to enable profiling")?;
    let exit_code = host.run_deterministic(&profiler, &clock)?;
    let profile = profiler
        .disable()
        .context("failed to disable profiling")?;
    debug!(
        threads = profile.lines.len(),
        total_ns = profile.total_ns,
        "deterministic session complete"
    );
    Ok((profile, exit_code, true))
}

fn run_statistical(
    cli: &Cli,
    host: &mut ReplayHost,
    filter: FilterPolicy,
) -> Result<(GlobalProfile, i32, bool)> {
    let profiler = Arc::new(Profiler::new(ProfileOptions {
        clock: Arc::new(MonotonicClock::new()),
        filter,
        propagate: cli.threads != 0,
        command_line: cli.command_line(),
    }));
    let single = (cli.threads == 0).then(|| host.main_thread());
    let stacks = Arc::new(ReplayStacks::new());
    profiler
        .enable(host.main_thread())
        .context("failed to enable profiling")?;
    let sampler = Sampler::start(
        profiler.clone(),
        stacks.clone(),
        Duration::from_secs_f64(cli.statistic),
        single,
    )
    .context("failed to start sampler thread")?;
    let exit_code = host.run_timed(&stacks)?;
    let clean = sampler.stop();
    let profile = profiler
        .disable()
        .context("failed to disable profiling")?;
    Ok((profile, exit_code, clean))
}

fn render(
    cli: &Cli,
    format: OutputFormat,
    relative: bool,
    profile: &GlobalProfile,
) -> Result<()> {
    let mut sources = SourceCache::new();
    match format {
        OutputFormat::Text => {
            let mut out = open_out(&cli.out)?;
            annotate::annotate(profile, &mut sources, &mut out)
                .context("failed to write annotation")?;
        }
        OutputFormat::Callgrind => {
            let mut out = open_out(&cli.out)?;
            callgrind::callgrind(profile, &mut out, relative)
                .context("failed to write callgrind profile")?;
        }
        OutputFormat::CallgrindZip => {
            if cli.out == "-" {
                bail!("callgrindzip needs an output file (-o PATH)");
            }
            let text = callgrind::callgrind_to_string(profile, true);
            archive::write_profile_archive(Path::new(&cli.out), &text, profile, &mut sources)?;
        }
    }
    if let Some(zipfile) = &cli.zipfile {
        archive::write_source_archive(Path::new(zipfile), profile, &mut sources, relative)?;
    }
    Ok(())
}

fn open_out(path: &str) -> Result<Box<dyn Write>> {
    if path == "-" {
        Ok(Box::new(io::stdout().lock()))
    } else {
        let file =
            File::create(path).with_context(|| format!("cannot write output file {}", path))?;
        Ok(Box::new(file))
    }
}
