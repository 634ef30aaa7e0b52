//! Retention and archival policy engine for database backups kept in one or
//! more S3-compatible locations.
//!
//! - [`archive`] decides whether a backup is protected by an archival policy
//! - [`retention`] periodically deletes backups no policy still needs
//! - [`services`] records backups, manages operator holds and re-syncs the
//!   catalog from storage
//! - [`db`] is the backup catalog, [`tool`] the external backup tool

pub mod archive;
pub mod config;
pub mod db;
pub mod events;
pub mod models;
pub mod observability;
pub mod retention;
pub mod services;
pub mod settings;
pub mod tool;
