//! this binary starts the kvs server
//! to see the list of arguments, type: `kvs-server --help`
//!
//! `kvs-server <JOBS_DIR> <MAX_THREADS> <MAX_BACKUPS> <SERVER_FIFO>`
//!
//!     Executes every .job file in JOBS_DIR using MAX_THREADS job workers, with at most
//!     MAX_BACKUPS backups in flight, while serving clients that register on SERVER_FIFO.
//!     A SERVER_FIFO without a '/' is created in the system temp directory.

use std::path::PathBuf;
use std::process::exit;

use clap::{crate_version, value_t, App, Arg, ArgMatches};
use pipekvs::channel::resolve_channel_path;
use pipekvs::{
    KvStore, KvsError, KvsServer, Result, ServerConfig, DEFAULT_CONNECTION_WORKERS,
    DEFAULT_QUEUE_CAPACITY,
};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// ['Opt'] holds parsed and validated options from the command line
#[derive(Debug)]
struct Opt {
    config: ServerConfig,
    verbose: bool,
}

impl Opt {
    /// validates the command line arguments
    /// returns `Ok<Opt>` if everything is valid
    /// # Errors
    /// returns [`KvsError::Parsing`] if one of the parameters is invalid
    ///
    fn build(matches: &ArgMatches) -> Result<Opt> {
        let jobs_dir = PathBuf::from(matches.value_of("JOBS_DIR").unwrap_or_default());
        if !jobs_dir.is_dir() {
            return Err(KvsError::Parsing(format!(
                "{:?} is not a directory",
                &jobs_dir
            )));
        }

        let mut config = ServerConfig::new(
            jobs_dir,
            positive(matches, "MAX_THREADS")?,
            positive(matches, "MAX_BACKUPS")?,
            resolve_channel_path(matches.value_of("SERVER_FIFO").unwrap_or_default()),
        );
        config.connection_workers = positive(matches, "workers")?;
        config.queue_capacity = positive(matches, "queue-capacity")?;

        Ok(Opt {
            config,
            verbose: matches.is_present("verbose"),
        })
    }
}

/// parses the argument `name` into a number greater than zero
fn positive(matches: &ArgMatches, name: &str) -> Result<usize> {
    let value = value_t!(matches, name, usize).map_err(|_| {
        KvsError::Parsing(format!(
            "invalid {}: {:?} is not a positive number",
            name,
            matches.value_of(name).unwrap_or_default()
        ))
    })?;
    if value == 0 {
        return Err(KvsError::Parsing(format!("invalid {}: must be greater than 0", name)));
    }
    Ok(value)
}

fn main() {
    let default_workers = DEFAULT_CONNECTION_WORKERS.to_string();
    let default_capacity = DEFAULT_QUEUE_CAPACITY.to_string();

    // parse command line args
    let matches = App::new("kvs-server")
        .version(crate_version!())
        .author("strohs <strohs1@gmail.com>")
        .about("a multi-threaded key-value store served over named pipes")
        .arg(Arg::with_name("JOBS_DIR")
            .required(true)
            .index(1)
            .help("directory holding the .job files to execute"))
        .arg(Arg::with_name("MAX_THREADS")
            .required(true)
            .index(2)
            .allow_hyphen_values(true)
            .help("number of threads executing jobs"))
        .arg(Arg::with_name("MAX_BACKUPS")
            .required(true)
            .index(3)
            .allow_hyphen_values(true)
            .help("maximum number of backups running at the same time"))
        .arg(Arg::with_name("SERVER_FIFO")
            .required(true)
            .index(4)
            .help("name or path of the registration pipe clients connect through"))
        .arg(Arg::with_name("workers")
            .long("workers")
            .value_name("N")
            .help("number of threads servicing client connections")
            .default_value(&default_workers))
        .arg(Arg::with_name("queue-capacity")
            .long("queue-capacity")
            .value_name("N")
            .help("number of accepted connections that may wait for a free worker")
            .default_value(&default_capacity))
        .arg(Arg::with_name("verbose")
            .long("verbose")
            .short("v")
            .help("log debug output"))
        .get_matches();

    // validate command line options, store them in Opt
    let opt = match Opt::build(&matches) {
        Ok(opt) => opt,
        Err(err) => {
            eprintln!("{}", err);
            exit(1);
        }
    };

    // set up a tracing subscriber to log to STDERR
    subscriber_config(opt.verbose);

    // start the server
    if let Err(e) = run(opt) {
        eprintln!("{}", e);
        exit(1);
    }
}

fn run(opt: Opt) -> Result<()> {
    info!("kvs-server {}", env!("CARGO_PKG_VERSION"));
    info!("Jobs directory: {:?}", opt.config.jobs_dir);
    info!(
        "Job threads: {}, max backups: {}",
        opt.config.max_threads, opt.config.max_backups
    );

    let server = KvsServer::new(KvStore::new(), opt.config);
    server.run()
}

/// configures a tracing subscriber that will log to STDERR
fn subscriber_config(verbose: bool) {
    let subscriber = FmtSubscriber::builder()
        // all spans/events with a level higher than the max level will be written
        .with_max_level(if verbose { Level::DEBUG } else { Level::INFO })
        // log to stderr instead of stdout
        .with_writer(std::io::stderr)
        // completes the builder.
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting tracing default subscriber failed");
}
