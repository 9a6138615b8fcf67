//! Application-level configuration: defaults and command line.

use std::path::PathBuf;

use clap::Parser;

/// Fill colors from light to dark.
pub const DEFAULT_PALETTE: [&str; 9] = [
    "#FFFFDD", "#AAF191", "#80D385", "#61B385", "#3E9583", "#217681", "#285285", "#1F2D86",
    "#000086",
];
pub const DEFAULT_HIGHLIGHT: &str = "black";
pub const CLICK_COLOR: &str = "red";

pub const DEFAULT_HOST: &str = "http://localhost:3000/";
pub const DEFAULT_MENU: &str = "menu.json";
pub const DEFAULT_CITY: &str = "Milano";
pub const DEFAULT_LOG_FILE: &str = "quartieri.log";

// UI
pub const TICK_MS: u64 = 250;
pub const MAX_DIAGNOSTICS: usize = 50;

pub fn default_palette() -> Vec<String> {
    DEFAULT_PALETTE.iter().map(|c| c.to_string()).collect()
}

/// Neighbourhood map dashboard.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(version, about)]
pub struct Args {
    /// Base url the menu and datasets are served from
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,
    /// Read datasets from this directory instead of the host
    #[arg(short, long)]
    pub data_dir: Option<PathBuf>,
    /// Path of the menu document, relative to the host or data directory
    #[arg(short, long, default_value = DEFAULT_MENU)]
    pub menu: String,
    /// City shown at startup
    #[arg(short, long, default_value = DEFAULT_CITY)]
    pub city: String,
    /// Join every layer of a city so the detail panel lists all indicators
    #[arg(long)]
    pub eager: bool,
    #[arg(long, default_value = DEFAULT_LOG_FILE)]
    pub log_file: PathBuf,
}

impl Args {
    /// Host used to resolve catalog urls; empty when reading from a directory.
    pub fn base(&self) -> &str {
        if self.data_dir.is_some() { "" } else { &self.host }
    }
}
