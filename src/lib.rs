//! # SecureSupport (library root)
//!
//! Retrieval-augmented answers for customer-support questions, where the ticket
//! embeddings live in a remote **encrypted** vector index and the encryption key never
//! leaves the customer:
//! - Index lifecycle and key management ([`lifecycle`], [`key_store`]).
//! - Remote encrypted vector service client ([`vector_service`]).
//! - Sentence embeddings with a pure Rust BERT ([`embedder`]).
//! - Prompt templates and answer generation ([`template`], [`generator`]).
//! - Synthetic ticket data ([`tickets`]).
//! - The stage-tagged facade used by the CLI ([`support`]).
//! - CLI parsing, configuration and terminal output ([`commands`], [`config`], [`display`]).
//!
//! ## Configuration directory
//! Configuration, answer templates and the default key file live under the per-platform
//! directory returned by [`config_dir`]:
//!
//! - macOS: `~/Library/Application Support/com.secure-support.secsup`
//! - Linux (XDG): `~/.config/secsup`
//! - Windows: `C:\Users\<you>\AppData\Roaming\secure-support\secsup\config`
//!
//! ```text
//! <config_dir>/
//! ├── config.yaml
//! ├── encryption_key.bin
//! └── templates/
//!     └── support_answer.yaml
//! ```

use directories::ProjectDirs;
use std::error::Error;

pub mod commands;
pub mod config;
pub mod display;
pub mod embedder;
pub mod error;
pub mod generator;
pub mod key_store;
pub mod lifecycle;
pub mod support;
pub mod template;
pub mod tickets;
pub mod vector_service;

#[cfg(test)]
mod testing;

pub use error::{Stage, StageError, SupportError, SupportResult};
pub use lifecycle::IndexLifecycleManager;
pub use support::SecureSupport;

/// Return the per-platform configuration directory used by SecureSupport.
///
/// This uses [`directories::ProjectDirs`] with the application triple
/// `("com", "secure-support", "secsup")`.
///
/// The directory is **not** created by this function; callers that need it should
/// create it with `fs::create_dir_all`.
///
/// # Errors
/// Returns an error if the platform configuration directory cannot be determined
/// (which is rare but possible in heavily sandboxed environments).
///
/// # Examples
/// ```rust
/// let cfg = secure_support::config_dir().expect("has a config dir");
/// println!("config at {}", cfg.display());
/// ```
pub fn config_dir() -> Result<std::path::PathBuf, Box<dyn Error>> {
    let proj_dirs = ProjectDirs::from("com", "secure-support", "secsup")
        .ok_or("Unable to determine config directory")?;
    let config_dir = proj_dirs.config_dir().to_path_buf();

    Ok(config_dir)
}
