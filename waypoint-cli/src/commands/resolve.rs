// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `waypoint resolve` command - Print one resolved configuration value.

use std::path::Path;

use waypoint_core::EnvResolver;

pub fn execute(env_file: &Path, name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let resolver = EnvResolver::new(env_file);

    match resolver.resolve(name)? {
        Some(value) => {
            println!("{}", value);
            Ok(())
        }
        None => {
            eprintln!("{} is not set", name);
            std::process::exit(1);
        }
    }
}
