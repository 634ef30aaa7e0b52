//! Shared catalog repository tests
//!
//! The same test bodies run against both backends:
//!
//! - **SQLite**: in-memory databases, run with every `cargo test`
//! - **PostgreSQL**: testcontainers-backed, run with `cargo test -- --ignored`
//!
//! ```bash
//! cargo test                       # SQLite only
//! cargo test -- --ignored          # PostgreSQL (requires Docker)
//! cargo test -- --include-ignored  # Both
//! ```
