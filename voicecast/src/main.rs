//! Binary entry point for the voice broadcast orchestrator.

use std::process;

fn main() {
    if voicecast::run().is_err() {
        process::exit(1);
    }
}
