// Copyright 2026 the lenstrace developers and collaborators
// Licensed under the GPL version 3.

//! Run a weak lensing ray-tracing campaign.

extern crate clap;
extern crate lenstrace;
#[macro_use] extern crate slog;
extern crate slog_async;
extern crate slog_term;

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use lenstrace::driver;
use lenstrace::pipeline::SimulationBatch;
use lenstrace::plane::FitsPlaneLoader;
use lenstrace::pool;
use lenstrace::settings::{EnvironmentSettings, Settings};
use lenstrace::{Error, Result};
use slog::{Drain, Level, Logger};
use std::path::PathBuf;
use std::process;


fn make_log(verbosity: u8) -> Logger {
    let level = match verbosity {
        0 => Level::Info,
        1 => Level::Debug,
        _ => Level::Trace,
    };

    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let drain = slog::LevelFilter::new(drain, level).fuse();
    Logger::root(drain, o!())
}


fn required<'m, T: Clone + Send + Sync + 'static>(matches: &'m ArgMatches, name: &str) -> Result<&'m T> {
    matches.get_one::<T>(name).ok_or_else(|| Error::Config(format!("missing argument {}", name)))
}


fn run(matches: &ArgMatches, log: &Logger) -> Result<()> {
    let environment = EnvironmentSettings::load(required::<PathBuf>(matches, "ENVIRONMENT")?)?;
    let settings = Settings::load(required::<PathBuf>(matches, "CONFIG")?)?;
    let id = required::<String>(matches, "ID")?;
    let workers = *required::<usize>(matches, "WORKERS")?;

    info!(log, "starting campaign"; "id" => id, "mode" => settings.mode(), "workers" => workers);

    let batch = SimulationBatch::new(environment);
    let loader = FitsPlaneLoader;

    pool::run_workers(workers, log, |worker| {
        let wlog = log.new(o!("rank" => worker.ctx.rank));
        driver::run(worker, &batch, &settings, id, &loader, &wlog)
    })?;

    Ok(())
}


fn main() {
    let matches = Command::new("lenstrace")
        .version(clap::crate_version!())
        .about("Make weak lensing maps and catalogs by multi-plane ray tracing")
        .arg(Arg::new("ENVIRONMENT")
             .short('e')
             .long("environment")
             .help("TOML file giving the home and storage directories")
             .required(true)
             .value_parser(value_parser!(PathBuf)))
        .arg(Arg::new("CONFIG")
             .short('c')
             .long("config")
             .help("TOML file describing the campaign")
             .required(true)
             .value_parser(value_parser!(PathBuf)))
        .arg(Arg::new("WORKERS")
             .short('w')
             .long("workers")
             .help("How many workers to split the realizations over")
             .default_value("1")
             .value_parser(value_parser!(usize)))
        .arg(Arg::new("VERBOSE")
             .short('v')
             .long("verbose")
             .help("Log more; repeat for even more")
             .action(ArgAction::Count))
        .arg(Arg::new("ID")
             .help("\"<model>|<collection>\" for maps and catalogs, \"<model>\" for telescopic maps")
             .required(true)
             .index(1))
        .get_matches();

    let log = make_log(matches.get_count("VERBOSE"));

    let code = match run(&matches, &log) {
        Ok(()) => 0,
        Err(e) => {
            crit!(log, "campaign failed"; "err" => %e);
            1
        },
    };

    // Let the async drain flush before exiting.
    drop(log);
    process::exit(code);
}
