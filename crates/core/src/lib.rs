//! stack-core: Core library for the STACK storage client
//!
//! This crate provides the client logic for a STACK account, including:
//! - Profile and configuration management
//! - Path normalization and resolution
//! - The authenticated [`Session`] with CSRF handling
//! - Directory navigation, node operations and WebDAV transfers
//! - User administration
//!
//! All network access goes through the [`Transport`] trait, so this crate is
//! independent of any particular HTTP library and can be tested with a mock.

pub mod config;
pub mod csrf;
pub mod error;
pub mod navigator;
pub mod node;
pub mod path;
pub mod profile;
pub mod session;
pub mod transfer;
pub mod transport;
pub mod user;

mod wire;

#[cfg(test)]
mod testing;

pub use config::{Config, ConfigManager, Defaults};
pub use error::{Error, ErrorKind, Result};
pub use navigator::{ListOptions, Navigator, Order};
pub use node::{Node, NodeKind, NodeRecord, ShareOptions};
pub use path::{RemotePath, normalize, resolve};
pub use profile::{Credentials, Profile, ProfileManager, TimeoutConfig};
pub use session::Session;
pub use transfer::{TransferEngine, TreeUpload};
pub use transport::{Body, ByteStream, Method, Request, Response, StreamingResponse, Transport};
pub use user::{NewUser, QUOTA_UNLIMITED, User, UserRecord};
