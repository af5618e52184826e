//! The kvs-client executable supports the following command line arguments:
//!
//! `kvs-client <CLIENT_ID> <SERVER_FIFO>`
//!
//!     Connects to the kvs-server registered on SERVER_FIFO. The client's own pipes are
//!     created as req<CLIENT_ID>, resp<CLIENT_ID> and notif<CLIENT_ID> in the system temp
//!     directory. Notifications are printed as they arrive.
//!
//! Commands are then read from standard input, one per line:
//!
//!     SUBSCRIBE [key]     subscribe to changes of key
//!     UNSUBSCRIBE [key]   cancel the subscription of key
//!     DELAY <delay_ms>    wait before reading the next command
//!     DISCONNECT          disconnect from the server and exit

use std::io::{self, BufRead};
use std::thread;
use std::time::Duration;

use clap::{crate_version, App, Arg};
use pipekvs::channel::resolve_channel_path;
use pipekvs::protocol::{ChannelPaths, MAX_STRING_SIZE};
use pipekvs::{KvsClient, KvsError, Result};
use tracing::{debug, error, Level};
use tracing_subscriber::FmtSubscriber;

/// the commands a client can read from standard input
#[derive(Debug, PartialEq)]
enum ClientCommand {
    Subscribe(String),
    Unsubscribe(String),
    Delay(u64),
    Disconnect,
    Empty,
}

impl ClientCommand {
    /// parses one line of input
    fn parse(line: &str) -> Result<ClientCommand> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(ClientCommand::Empty);
        }
        let (name, args) = match line.find(char::is_whitespace) {
            Some(pos) => (&line[..pos], line[pos..].trim()),
            None => (line, ""),
        };
        match name {
            "SUBSCRIBE" => parse_key(args).map(ClientCommand::Subscribe),
            "UNSUBSCRIBE" => parse_key(args).map(ClientCommand::Unsubscribe),
            "DELAY" => args
                .parse::<u64>()
                .map(ClientCommand::Delay)
                .map_err(|_| KvsError::Parsing(format!("invalid delay {:?}", args))),
            "DISCONNECT" if args.is_empty() => Ok(ClientCommand::Disconnect),
            _ => Err(KvsError::Parsing(format!("invalid command {:?}", line))),
        }
    }
}

/// parses a `[key]` argument
fn parse_key(args: &str) -> Result<String> {
    let key = args
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .map(str::trim)
        .ok_or_else(|| KvsError::Parsing(format!("expected [key], got {:?}", args)))?;
    if key.is_empty() || key.len() > MAX_STRING_SIZE || key.contains(',') {
        return Err(KvsError::Parsing(format!("invalid key {:?}", key)));
    }
    Ok(key.to_string())
}

fn main() -> Result<()> {
    // configure a subscriber that will log messages to STDERR
    subscriber_config();

    let matches = App::new("kvs-client")
        .version(crate_version!())
        .author("strohs <strohs1@gmail.com>")
        .about("subscribes to keys of a kvs-server")
        .arg(Arg::with_name("CLIENT_ID").required(true).index(1))
        .arg(Arg::with_name("SERVER_FIFO").required(true).index(2))
        .get_matches();

    let client_id = matches.value_of("CLIENT_ID").unwrap_or_default();
    let server = resolve_channel_path(matches.value_of("SERVER_FIFO").unwrap_or_default());
    let paths = ChannelPaths::for_client(&std::env::temp_dir(), client_id);

    let mut client = KvsClient::connect(paths, &server)?;
    println!("Server returned 0 for operation: connect");

    if let Some(notifications) = client.notifications() {
        thread::Builder::new()
            .name("notifications".to_string())
            .spawn(move || {
                for notification in notifications {
                    match notification {
                        Ok(message) => println!("{}", message),
                        Err(e) => {
                            error!("could not read notifications: {}", e);
                            break;
                        }
                    }
                }
                debug!("notification channel closed");
            })?;
    }

    run(client)
}

/// executes the commands read from standard input
fn run(mut client: KvsClient) -> Result<()> {
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let command = match ClientCommand::parse(&line?) {
            Ok(command) => command,
            Err(e) => {
                eprintln!("Invalid command: {}", e);
                continue;
            }
        };
        match command {
            ClientCommand::Subscribe(key) => {
                let ok = client.subscribe(&key)?;
                report("subscribe", ok);
            }
            ClientCommand::Unsubscribe(key) => {
                let ok = client.unsubscribe(&key)?;
                report("unsubscribe", ok);
            }
            ClientCommand::Delay(delay) => {
                if delay > 0 {
                    println!("Waiting...");
                    thread::sleep(Duration::from_millis(delay));
                }
            }
            ClientCommand::Disconnect => {
                let ok = client.disconnect()?;
                report("disconnect", ok);
                println!("Disconnected from server");
                return Ok(());
            }
            ClientCommand::Empty => {}
        }
    }
    // input ended without a DISCONNECT
    let ok = client.disconnect()?;
    report("disconnect", ok);
    Ok(())
}

fn report(operation: &str, ok: bool) {
    println!(
        "Server returned {} for operation: {}",
        if ok { 0 } else { 1 },
        operation
    );
}

/// configures a tracing subscriber that will log to STDERR
fn subscriber_config() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        // log to stderr instead of stdout
        .with_writer(std::io::stderr)
        // completes the builder.
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting tracing default subscriber failed");
}
