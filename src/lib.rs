//! # midjourney-rs
//!
//! Async Rust client for Midjourney trigger APIs: submit a job, poll it to
//! completion, and fetch the resulting image.
//!
//! Provides job submission (imagine, blend, upscale/vary), a status poller
//! that normalizes the interaction metadata of finished tasks, an image
//! downloader that falls back across proxies and TLS policies, and
//! concurrent batch follow-ups with per-action failure isolation.
//!
//! ## Quick Start
//!
//! ```no_run
//! use midjourney_rs::{Action, ImagineParams, MjClient, MjConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> midjourney_rs::Result<()> {
//! let config = MjConfig::builder()
//!     .with_api_url("https://mj.example.com")
//!     .with_api_key("sk-...")
//!     .with_max_wait(Duration::from_secs(600))
//!     .build()?;
//! let client = MjClient::new(config).await?;
//!
//! // Build a prompt with parameter flags
//! let prompt = ImagineParams::new("a lighthouse at dusk")
//!     .aspect_ratio("16:9")
//!     .stylize(250)
//!     .build()?;
//!
//! // Submit and wait for the grid
//! let outcome = client.imagine(&prompt).await?;
//! if let Some(grid) = &outcome.image {
//!     std::fs::write("grid.png", grid.encode_png()?).unwrap();
//! }
//!
//! // Upscale all four quadrants concurrently
//! let upscales = client.batch(&outcome.task_id, &Action::upscale_all()).await?;
//! for (i, image) in upscales.iter().enumerate() {
//!     match image {
//!         Some(img) => println!("U{}: {}x{}", i + 1, img.width, img.height),
//!         None => println!("U{}: failed", i + 1),
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Logging goes through `tracing`; install any subscriber to see it.

pub mod batch;
pub mod buttons;
pub mod client;
pub mod config;
pub mod diagnostic;
pub mod download;
pub mod error;
pub mod http;
pub mod poll;
pub mod proxy;
pub mod submit;
pub mod types;

pub use batch::BatchCoordinator;
pub use buttons::{normalize_buttons, InteractionMetadata, RawButtons};
pub use client::MjClient;
pub use config::{DownloadConfig, MjConfig, MjConfigBuilder, ProxyMode};
pub use diagnostic::{network_diagnostic, DiagnosticCheck, DiagnosticReport, DiagnosticStep};
pub use download::{AssetDownloader, DownloadStrategy, ImageSource};
pub use error::{MjError, Result, SubmissionCause};
pub use http::{HeaderProfile, HttpSession, Timeouts, TlsPolicy};
pub use poll::{HttpStatusSource, StatusPoller, StatusSource};
pub use proxy::{ProxyConfig, ProxyDetector};
pub use submit::{ActionSubmitter, BlendRequest, ImagineParams, SubmitReply, TaskSubmitter};
pub use types::{
    encode_data_url, Action, ActionType, BlendDimensions, BotType, CustomId, DecodedImage, Task,
    TaskOutcome, TaskStatus,
};
