// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `waypoint status` command - Read the persisted exit code.

use std::path::Path;

use serde::Serialize;
use waypoint_core::exit_code;
use waypoint_core::{EnvResolver, ExitCodeFile, RuntimeConfig};

#[derive(Serialize)]
struct Status<'a> {
    path: &'a Path,
    code: i32,
    meaning: &'static str,
}

pub fn execute(env_file: &Path, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = RuntimeConfig::load(&EnvResolver::new(env_file))?;
    let file = ExitCodeFile::new(&config.exit_code_file);

    let Some(code) = file.read()? else {
        eprintln!("No exit code persisted at {}", file.path().display());
        std::process::exit(1);
    };

    let status = Status {
        path: file.path(),
        code,
        meaning: exit_code::describe(code),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("{} ({})", status.code, status.meaning);
    }
    Ok(())
}
