pub mod init;
pub mod migrate;
pub mod normalize;
pub mod serve;
pub mod sitemap;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "folio")]
#[command(version)]
#[command(about = "A small blog with image normalization", long_about = None)]
pub struct Cli {
    #[arg(short, long, default_value = "folio.toml", env = "FOLIO_CONFIG")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new site directory with a default config
    Init {
        #[arg(default_value = ".")]
        path: PathBuf,
        #[arg(long)]
        name: Option<String>,
    },
    /// Apply pending database migrations
    Migrate {
        /// Only show which migrations are applied
        #[arg(long)]
        status: bool,
    },
    /// Run the web server and background jobs
    Serve {
        #[arg(short = 'H', long)]
        host: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Regenerate the sitemap once
    Sitemap,
    /// Normalize article images to bounded WebP
    Normalize {
        /// Slug of a single article
        #[arg(conflicts_with = "all", required_unless_present = "all")]
        slug: Option<String>,
        /// Every article that has an image
        #[arg(long)]
        all: bool,
    },
}
