//! # cutout-core
//!
//! Lifecycle and concurrency runtime for a background-removal model.
//!
//! The model is expensive to load and large in memory, so it is loaded on
//! first use, shared by all concurrent requests, and evicted again after a
//! period without traffic. Blocking model work runs on a bounded pool so the
//! async control path stays responsive.
//!
//! | Module | Role |
//! |--------|------|
//! | [`lifecycle`] | load/unload state machine with double-checked acquisition |
//! | [`reaper`] | periodic idle eviction |
//! | [`executor`] | bounded pool for blocking loads and inference |
//! | [`batch`] | all-or-nothing fan-out/fan-in |
//! | [`health`] | read-only status snapshot |
//! | [`service`] | the [`BackgroundRemover`] facade |
//!
//! The segmentation model itself is supplied by the caller through
//! [`SegmentationBackend`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cutout_core::{BackgroundRemover, ImageBuffer, PixelFormat, RemoverConfig, SegmentationBackend};
//!
//! async fn run(backend: Arc<dyn SegmentationBackend>) -> cutout_core::Result<()> {
//!     let remover = BackgroundRemover::new(RemoverConfig::from_env()?, backend)?;
//!     remover.initialize().await?;
//!
//!     let image = ImageBuffer::from_raw(1, 1, PixelFormat::Rgb8, vec![255u8, 0, 0]).unwrap();
//!     let cutout = remover.remove_background(image, None).await?;
//!     println!("{}x{} {}", cutout.width(), cutout.height(), cutout.format());
//!
//!     remover.cleanup().await;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod batch;
pub mod config;
pub mod error;
pub mod executor;
pub mod health;
pub mod lifecycle;
pub mod reaper;
pub mod request;
pub mod service;

pub use backend::{BackendError, BackendResult, ImageBuffer, ModelSession, PixelFormat, SegmentationBackend};
pub use config::{LoadPolicy, RemoverConfig};
pub use error::{RemoverError, Result};
pub use executor::BoundedExecutor;
pub use health::{HealthStatus, StatusSnapshot};
pub use lifecycle::{LifecycleController, ServiceState};
pub use request::RequestId;
pub use service::BackgroundRemover;
