// `error_chain!` can recurse deeply.
#![recursion_limit = "1024"]

#[macro_use]
extern crate error_chain;
extern crate config;
extern crate serde;
#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate slog;
extern crate slog_async;
extern crate slog_term;
#[macro_use]
extern crate clap;
extern crate byteorder;
extern crate chrono;
extern crate crossbeam_channel;
extern crate flate2;
extern crate glob;
extern crate libc;
extern crate rayon;
extern crate regex;
extern crate rust_htslib;
extern crate shellexpand;
extern crate sxd_document;
extern crate sxd_xpath;

mod i2b;
mod settings;

use slog::Drain;

use std::result;
use std::sync::atomic::Ordering;
use std::sync::{atomic, Arc};

mod errors {
    // Create the Error, ErrorKind, ResultExt, and Result types
    error_chain! {
        foreign_links {
            Io(::std::io::Error);
        }

        errors {
            BadOption(msg: String) {
                description("invalid option")
                display("invalid option: {}", msg)
            }
            MissingRequired(name: String) {
                description("missing required option")
                display("missing required option: {}", name)
            }
            TruncatedFile(path: String) {
                description("file shorter than its header promises")
                display("truncated file: {}", path)
            }
            UnknownFormat(path: String) {
                description("file format not recognized")
                display("unknown file format: {}", path)
            }
            UnsupportedEncoding(msg: String) {
                description("encoding not supported")
                display("unsupported encoding: {}", msg)
            }
            InflateError(path: String) {
                description("compressed block failed to inflate")
                display("could not inflate block from {}", path)
            }
            TileNotFound(tile: u32, path: String) {
                description("tile absent from basecall file")
                display("tile {} not found in {}", tile, path)
            }
            NoTiles {
                description("no tiles to process")
                display("no tiles to process for this lane")
            }
            NoCycleRange {
                description("no cycle range available")
                display("no cycle range from command line or run metadata")
            }
            MissingRunStartDate {
                description("run start date unavailable")
                display("run start date not given and not present in run metadata")
            }
            WriteFailure(msg: String) {
                description("could not write output record")
                display("write failure: {}", msg)
            }
        }
    }
}

pub use errors::*;

use clap::{App, ArgMatches};

use settings::Settings;

/// Custom `slog` Drain logic
struct RuntimeLevelFilter<D> {
    drain: D,
    log_level: Arc<atomic::AtomicIsize>,
}

impl<D> Drain for RuntimeLevelFilter<D>
where
    D: Drain,
{
    type Ok = Option<D::Ok>;
    type Err = Option<D::Err>;

    fn log(
        &self,
        record: &slog::Record,
        values: &slog::OwnedKVList,
    ) -> result::Result<Self::Ok, Self::Err> {
        let current_level = match self.log_level.load(Ordering::Relaxed) {
            0 => slog::Level::Warning,
            1 => slog::Level::Info,
            _ => slog::Level::Trace,
        };

        if record.level().is_at_least(current_level) {
            self.drain.log(record, values).map(Some).map_err(Some)
        } else {
            Ok(None)
        }
    }
}

fn run(matches: ArgMatches) -> Result<()> {
    // Logging setup ------------------------------------------------------------------------------

    // Atomic variable controlling logging level
    let log_level = Arc::new(atomic::AtomicIsize::new(1));

    // Perform slog setup; records go to stderr so that `--output-file -` can
    // stream SAM to stdout.
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::FullFormat::new(decorator).build();
    let drain = RuntimeLevelFilter {
        drain: drain,
        log_level: log_level.clone(),
    }
    .fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    let logger = slog::Logger::root(drain, o!());

    // Switch log level
    if matches.is_present("quiet") {
        log_level.store(0, Ordering::Relaxed);
    } else {
        log_level.store(
            1 + matches.occurrences_of("verbose") as isize,
            Ordering::Relaxed,
        );
    };

    // Command Line Handling ----------------------------------------------------------------------

    // Dispatch commands from command line.
    match matches.subcommand() {
        ("i2b", Some(_m)) => {
            let settings = Settings::new(&matches)
                .map_err(|e| Error::from(ErrorKind::BadOption(format!("{}", e))))?;
            i2b::run(&logger, &settings).chain_err(|| "Could not execute 'i2b' command")?
        }
        _ => bail!("Invalid command: {}", matches.subcommand().0),
    }

    Ok(())
}

fn main() {
    let yaml = load_yaml!("cli.yaml");
    let matches = App::from_yaml(yaml).get_matches();
    let command = matches.subcommand().0.to_string();

    if let Err(ref e) = run(matches) {
        eprintln!("{}: error: {}", &command, e);

        for e in e.iter().skip(1) {
            eprintln!("caused by: {}", e);
        }

        // The backtrace is not always generated. Try to run this example
        // with `RUST_BACKTRACE=1`.
        if let Some(backtrace) = e.backtrace() {
            eprintln!("backtrace: {:?}", backtrace);
        }

        ::std::process::exit(1);
    }
}
