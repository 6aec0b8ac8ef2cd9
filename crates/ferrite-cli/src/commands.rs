//! CLI command definitions.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a pipeline definition
    Validate {
        /// Path to the pipeline file
        #[arg(default_value = "ferrite.yaml")]
        path: PathBuf,
    },

    /// Run a pipeline invocation locally
    Run {
        /// Path to the pipeline file
        #[arg(default_value = "ferrite.yaml")]
        path: PathBuf,

        /// Branch the invocation is for
        #[arg(short, long, default_value = "main")]
        branch: String,

        /// Commit identifier the invocation is for
        #[arg(short, long, default_value = "HEAD")]
        commit: String,

        /// Parameter override as name=value; repeatable
        #[arg(short, long = "param")]
        param: Vec<String>,

        /// Cap on concurrently executing job runs
        #[arg(long, default_value_t = 4)]
        max_concurrency: usize,

        /// Directory for leased workdirs and stored blobs
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Print the invocation report as JSON
        #[arg(long)]
        json: bool,
    },
}
