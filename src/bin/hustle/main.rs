mod args;
mod util;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use hustle::line_reader::LineReader;
use hustle::{
    ConsumerOptions, Hustle, HustleConfig, Message, PutOptions, Queue,
    ReleaseOptions, StorageConfig, SubscriberOptions,
};
use tokio::{select, signal};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Level};

use crate::args::{Args, Command};
use crate::util::{escape_input, parse_payload, print_json, print_yaml};

const DEFAULT_DB: &str = "hustle.redb";

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Logging. Stdout carries command output, so logs go to stderr.
    if args.debug {
        tracing_subscriber::fmt()
            .with_max_level(Level::TRACE)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .json()
            .with_writer(std::io::stderr)
            .init();
    }

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(error) => {
            error!(error = format!("{error:#}"), "unusable configuration");
            return ExitCode::from(2);
        },
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(error) = signal::ctrl_c().await {
                warn!(%error, "something strange with ctrl-c handling!");
            };
            cancel.cancel();
        });
    }

    let hustle = Hustle::new(config);
    let result = run(&hustle, args.command, cancel).await;
    hustle.close();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(error = format!("{error:#}"), "command failed");
            ExitCode::FAILURE
        },
    }
}

/// The configuration file if given, with `--db` applied over it. Without
/// either, a database file in the working directory.
fn load_config(args: &Args) -> Result<HustleConfig> {
    let mut config = match &args.config {
        Some(path) => HustleConfig::load(path)?,
        None => HustleConfig {
            storage: StorageConfig::Disk {
                path: PathBuf::from(DEFAULT_DB),
            },
            ..HustleConfig::default()
        },
    };
    if let Some(path) = &args.db {
        config.storage = StorageConfig::Disk { path: path.clone() };
    }
    Ok(config)
}

async fn run(
    hustle: &Hustle,
    command: Command,
    cancel: CancellationToken,
) -> Result<()> {
    // Wiping a closed store removes the database file, which works even when
    // the file can't be opened.
    if !matches!(command, Command::Wipe) {
        hustle.open().context("opening store")?;
    }
    let queue = hustle.queue();

    match command {
        Command::Put {
            tube,
            priority,
            delay_ms,
            payload,
        } => {
            let mut options = PutOptions::new(tube);
            options.priority = priority;
            options.delay = delay_ms.map(Duration::from_millis);

            match payload {
                Some(payload) => {
                    let data = parse_payload(payload.as_bytes())?;
                    print_json(&queue.put(data, options)?)?;
                },
                None => put_from_stdin(&queue, options, cancel).await?,
            }
        },
        Command::Reserve { tube } => print_json(&queue.reserve(&tube)?)?,
        Command::Peek { id } => print_json(&queue.peek(id)?)?,
        Command::Delete { id } => print_json(&queue.delete(id)?)?,
        Command::Release {
            id,
            priority,
            delay_ms,
        } => {
            let options = ReleaseOptions {
                priority,
                delay: delay_ms.map(Duration::from_millis),
            };
            print_json(&queue.release(id, options)?)?;
        },
        Command::Bury { id } => print_json(&queue.bury(id)?)?,
        Command::Kick { bound } => println!("{}", queue.kick(bound)?),
        Command::KickJob { id } => print_json(&queue.kick_job(id)?)?,
        Command::CountReady { tube } => {
            println!("{}", queue.count_ready(&tube)?)
        },
        Command::StatsTube { tube } => print_yaml(&queue.stats_tube(&tube)?)?,
        Command::Consume { tube } => consume(&queue, tube, cancel).await,
        Command::Publish { channel, payload } => {
            let data = parse_payload(payload.as_bytes())?;
            print_json(&hustle.pubsub().publish(&channel, data)?)?;
        },
        Command::Subscribe { channel, name } => {
            subscribe(hustle, &channel, name, cancel).await?
        },
        Command::Wipe => {
            hustle.wipe().context("wiping")?;
            info!("wiped");
        },
    }

    Ok(())
}

/// Puts one job per line of stdin. Blank lines are skipped, as are lines that
/// aren't JSON, with a warning.
async fn put_from_stdin(
    queue: &Queue,
    options: PutOptions,
    cancel: CancellationToken,
) -> Result<()> {
    let mut lines: LineReader<_> = tokio::io::stdin().into();
    let mut put = 0usize;

    loop {
        let line = select! {
            x = lines.read_line() => match x.context("reading stdin")? {
                Some(x) => x,
                None => break,
            },
            _ = cancel.cancelled() => break,
        };

        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let data = match parse_payload(&line) {
            Ok(data) => data,
            Err(error) => {
                warn!(
                    line = escape_input(&line),
                    error = format!("{error:#}"),
                    "skipping line"
                );
                continue;
            },
        };

        print_json(&queue.put(data, options.clone())?)?;
        put += 1;
    }

    debug!(put, "finished reading stdin");
    Ok(())
}

async fn consume(queue: &Queue, tube: String, cancel: CancellationToken) {
    let handle = queue.clone();
    let consumer = queue.consumer(
        move |job| {
            let queue = handle.clone();
            async move {
                if let Err(error) = print_json(&job) {
                    warn!(id = job.id, %error, "failed to print job");
                }
                if let Err(error) = queue.delete(job.id) {
                    warn!(id = job.id, %error, "failed to delete job");
                }
            }
        },
        ConsumerOptions::new(tube),
    );

    cancel.cancelled().await;
    consumer.join().await;
}

async fn subscribe(
    hustle: &Hustle,
    channel: &str,
    name: Option<String>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut options = SubscriberOptions::default();
    options.name = name;

    let subscriber = hustle.pubsub().subscribe(
        channel,
        |message: Message| async move {
            if let Err(error) = print_json(&message) {
                warn!(id = message.id, %error, "failed to print message");
            }
        },
        options,
    )?;
    info!(channel, cursor = ?subscriber.last_delivered_id(), "subscribed");

    cancel.cancelled().await;
    subscriber.join().await;
    Ok(())
}
