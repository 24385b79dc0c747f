use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the pagewire binary.
#[derive(Debug, Parser)]
#[command(
    name = "pagewire",
    version,
    about = "Cached CMS client with stale-while-revalidate reads"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "PAGEWIRE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// GET an endpoint through the cache and print the JSON body.
    Get(GetArgs),
    /// Read a page by slug with stale-while-revalidate semantics.
    Page(PageArgs),
    /// Print the cache contents.
    Stats,
    /// Remove every cached entry and the persisted blob.
    Clear,
    /// Remove expired entries.
    Prune,
    /// Drop the cached entries of one page.
    #[command(name = "invalidate-page")]
    InvalidatePage(InvalidatePageArgs),
}

#[derive(Debug, Args, Clone)]
pub struct GetArgs {
    /// Endpoint path, e.g. `/api/pages`.
    #[arg(value_name = "ENDPOINT")]
    pub endpoint: String,

    /// Query parameter as NAME=VALUE; repeatable.
    #[arg(long = "param", value_name = "NAME=VALUE", value_parser = parse_param)]
    pub params: Vec<(String, String)>,

    /// Skip the cache read; the fresh response is still stored.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub bypass: bool,

    /// TTL for the stored response, overriding the client default.
    #[arg(long = "ttl-ms", value_name = "MILLISECONDS")]
    pub ttl_ms: Option<u64>,
}

#[derive(Debug, Args, Clone)]
pub struct PageArgs {
    /// Page slug.
    #[arg(value_name = "SLUG", default_value = "home")]
    pub slug: String,

    /// Keep printing state changes until the background refresh settles.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub watch: bool,

    /// Skip the cache and fetch from the network.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub force: bool,
}

#[derive(Debug, Args, Clone)]
pub struct InvalidatePageArgs {
    /// Page slug.
    #[arg(value_name = "SLUG")]
    pub slug: String,
}

/// Overrides applied on top of files and environment.
#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
    /// Override the CMS base URL.
    #[arg(long = "base-url", value_name = "URL", global = true)]
    pub base_url: Option<String>,

    /// Override the default cache TTL.
    #[arg(long = "default-cache-time-ms", value_name = "MILLISECONDS", global = true)]
    pub default_cache_time_ms: Option<u64>,

    /// Toggle response caching.
    #[arg(
        long = "enable-cache",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub enable_cache: Option<bool>,

    /// Override the directory holding the persisted cache.
    #[arg(
        long = "storage-directory",
        value_name = "PATH",
        value_hint = ValueHint::DirPath,
        global = true
    )]
    pub storage_directory: Option<PathBuf>,

    /// Toggle persistence of the cache between runs.
    #[arg(
        long = "storage-persist",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub storage_persist: Option<bool>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got `{raw}`"))?;
    if name.is_empty() {
        return Err(format!("parameter name missing in `{raw}`"));
    }
    Ok((name.to_string(), value.to_string()))
}
