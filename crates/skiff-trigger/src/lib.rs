//! skiff-trigger: turns a git push into a deploy.
//!
//! ```text
//! post-receive hook
//!   │  "prevSha currentSha ref"
//!   ▼
//! PushTrigger ── ref != refs/heads/master ──▶ Skipped
//!   │
//!   ├── Checkout      (git --work-tree {staging}/{repo} checkout -f)
//!   ├── ImageBuilder  (docker build + push)
//!   ▼
//! Deployer::deploy(app, image)
//! ```

pub mod builder;
pub mod checkout;
pub mod error;
pub mod push;

mod command;

pub use builder::{DockerBuilder, ImageBuilder, timestamp_tag};
pub use checkout::{Checkout, GitCheckout};
pub use error::{TriggerError, TriggerResult};
pub use push::{DEPLOY_REF, PushTrigger, PushUpdate, TriggerOutcome};
