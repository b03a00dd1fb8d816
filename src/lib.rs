#![crate_name = "bush"]

//! bush is a simplistic file sharing registry.
//!
//! Clients upload files under human-chosen _tags_ and fetch them back by tag. Uploading to a tag
//! that already exists replaces the file it held. Each upload becomes visible all at once or not
//! at all.
//!
//! ## The registry
//!
//! The server keeps one record per tag: the declared file name, the time it was stored, its size
//! and SHA256 digest, and a private handle to the bytes on disk. See [record::Store].
//!
//! The HTTP interface lives below `/files/`:
//!
//! ``` ignore,
//! GET    /files/        list all records
//! DELETE /files/        delete everything
//! POST   /files/        upload, tag derived from the X-Filename header
//! PUT    /files/<tag>   upload or replace
//! GET    /files/<tag>   download
//! DELETE /files/<tag>   delete
//! ```
//!
//! ## Waiting for files
//!
//! `bush wait` turns the registry into a simple notification channel: it lists the registry
//! repeatedly until a file shows up that is newer than the moment the wait started, then
//! downloads it. See the [poll] module for how "new" is decided.
//!
//! ## Running the daemon
//!
//! `bush serve` listens on `127.0.0.1:5000` unless another URL is given, and stores its data in
//! `./data` unless the configuration file says otherwise.

/// Errors shared by all layers.
pub mod error;

/// Time sources.
pub mod clock;

/// Shared-credential HTTP Basic authentication.
pub mod auth;

/// The tag-keyed file store.
pub mod record;

/// Listing entries as clients see them.
pub mod entry;

/// Encapsulates an incoming remote request.
pub mod request;

/// Encapsulates an outgoing response to remote.
pub mod response;

/// The HTTP server loop.
pub mod server;

/// Zip bundling of multi-path uploads.
pub mod bundle;

/// HTTP client for the registry.
pub mod client;

/// Change detection for `wait`.
pub mod poll;

/// Configuration file and endpoint resolution.
pub mod config;

/// Command line parsing.
pub mod arg;
