use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(about, long_about = None, version)]
pub(crate) struct Args {
    /// Database file to use. Overrides the configured storage.
    #[arg(short = 'b', long, global = true)]
    pub(crate) db: Option<PathBuf>,
    /// YAML configuration file.
    #[arg(short, long, global = true)]
    pub(crate) config: Option<PathBuf>,
    /// Enables human-friendly logging.
    #[arg(short, long, default_value_t, global = true)]
    pub(crate) debug: bool,
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Puts a job. Without a payload, puts one job per line of JSON on stdin.
    Put {
        #[arg(short, long, default_value = "default")]
        tube: String,
        #[arg(short, long)]
        priority: Option<u32>,
        /// Keeps the job delayed for this many milliseconds.
        #[arg(long)]
        delay_ms: Option<u64>,
        /// JSON payload.
        payload: Option<String>,
    },
    /// Reserves the most urgent ready job in a tube.
    Reserve {
        #[arg(default_value = "default")]
        tube: String,
    },
    /// Shows a job.
    Peek { id: u64 },
    /// Deletes a job.
    Delete { id: u64 },
    /// Returns a reserved job to its tube.
    Release {
        id: u64,
        #[arg(short, long)]
        priority: Option<u32>,
        #[arg(long)]
        delay_ms: Option<u64>,
    },
    /// Buries a job.
    Bury { id: u64 },
    /// Moves up to `bound` buried or delayed jobs back to ready.
    Kick { bound: u64 },
    /// Moves one buried or delayed job back to ready.
    KickJob { id: u64 },
    /// Counts the ready jobs in a tube.
    CountReady {
        #[arg(default_value = "default")]
        tube: String,
    },
    /// Prints per-state job counts for a tube, as YAML.
    StatsTube {
        #[arg(default_value = "default")]
        tube: String,
    },
    /// Prints and deletes jobs from a tube as they become ready, until
    /// interrupted.
    Consume {
        #[arg(default_value = "default")]
        tube: String,
    },
    /// Publishes a JSON message to a channel.
    Publish { channel: String, payload: String },
    /// Prints messages published to a channel until interrupted.
    Subscribe {
        channel: String,
        /// Resumes from, and records, this subscriber's position.
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Removes every job and message.
    Wipe,
}
