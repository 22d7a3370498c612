//! An embeddable work queue in the style of beanstalkd, plus ordered
//! publish/subscribe, over a pluggable transactional key-value store.
//!
//! ```no_run
//! # async fn demo() -> hustle::Result<()> {
//! use hustle::{Hustle, HustleConfig, PutOptions};
//!
//! let hustle = Hustle::new(HustleConfig::default());
//! hustle.open()?;
//!
//! let queue = hustle.queue();
//! queue.put(serde_json::json!({ "task": "resize" }), PutOptions::new("img"))?;
//! if let Some(job) = queue.reserve("img")? {
//!     queue.delete(job.id)?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod hustle;
pub mod line_reader;
pub mod pubsub;
pub mod queue;
pub(crate) mod records;
pub mod store;
pub mod types;

pub use crate::config::{HustleConfig, StorageConfig};
pub use crate::error::{Error, Result};
pub use crate::hustle::Hustle;
pub use crate::pubsub::{Pubsub, Subscriber, SubscriberOptions};
pub use crate::queue::{Consumer, ConsumerOptions, ErrorHook, Queue};
pub use crate::types::job::{Job, PutOptions, ReleaseOptions};
pub use crate::types::message::Message;
pub use crate::types::states::{JobState, StateKind};
pub use crate::types::stats::TubeStats;
