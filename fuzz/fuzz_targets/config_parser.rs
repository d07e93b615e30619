#![no_main]

use clap::Parser;
use libfuzzer_sys::fuzz_target;
use schedbench::cli::Cli;
use schedbench::config::RunConfig;

fuzz_target!(|data: &[u8]| {
    // Whitespace-separated words become argv; resolution must never panic
    if let Ok(input) = std::str::from_utf8(data) {
        let argv = std::iter::once("schedbench").chain(input.split_whitespace());
        if let Ok(cli) = Cli::try_parse_from(argv) {
            let _ = RunConfig::try_from(&cli);
        }
    }
});
