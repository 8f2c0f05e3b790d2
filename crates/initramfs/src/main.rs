//! The snap-bootstrap binary, run from the initramfs.
// SPDX-License-Identifier: Apache-2.0 OR MIT

use anyhow::Result;

fn run() -> Result<()> {
    snap_bootstrap_utils::initialize_tracing();
    tracing::trace!("starting snap-bootstrap");
    snap_bootstrap_lib::cli::run_from_iter(std::env::args())
}

fn main() {
    // Errors go to stderr; stdout only ever carries mount instructions.
    if let Err(e) = run() {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
