// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Helpers for `build.rs` scripts in this workspace.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::env;
use std::path::PathBuf;

/// Environment variable carrying the boot-bank configuration as TOML.
pub const BOOTBANK_CONFIG_VAR: &str = "BOOTBANK_CONFIG";

///
/// Pulls the boot-bank configuration for purposes of a build task, falling
/// back to `T::default()` if the environment variable is missing. If the
/// variable is present but fails to parse, this fails with `Err` rather than
/// quietly building with defaults. Serde takes care of filling in any keys
/// the configuration leaves out, provided `T` is `#[serde(default)]`.
///
pub fn bootbank_config_or_default<T: DeserializeOwned + Default>() -> Result<T>
{
    toml_from_env_def(BOOTBANK_CONFIG_VAR)
}

/// Returns the build script's `OUT_DIR`.
pub fn out_dir() -> Result<PathBuf> {
    Ok(PathBuf::from(env::var("OUT_DIR").context("OUT_DIR not set")?))
}

fn toml_from_env_def<T: DeserializeOwned + Default>(var: &str) -> Result<T> {
    // We want to emit this whether or not the env var is present, so that we'll
    // be re-run if it becomes present.
    println!("cargo:rerun-if-env-changed={}", var);

    let config = match env::var(var) {
        Ok(text) => {
            println!("--- toml for ${} ---", var);
            println!("{}", text);
            text
        }
        Err(_) => {
            println!("--- var ${} not present, using default ---", var);
            return Ok(T::default());
        }
    };
    parse_config(&config).with_context(|| format!("parsing ${}", var))
}

/// Parses a configuration document.
pub fn parse_config<T: DeserializeOwned>(text: &str) -> Result<T> {
    Ok(toml::from_str(text)?)
}
