//! Shardcache.
//!
//! Operates a sharded disk cache from the command line: serves keys through the cache from a
//! configured origin, and inspects or trims the cache directory.

#![warn(
    missing_docs,
    missing_debug_implementations,
    unused_crate_dependencies,
    clippy::all
)]

mod cli;
mod logging;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
