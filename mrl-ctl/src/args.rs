use std::path::PathBuf;

use clap::{command, Parser, Subcommand};

//
// For parsing user specified command.
//
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Root directory of the local cluster's filesystem.
    #[arg(long, env = "MRL_DFS_ROOT", default_value = "/tmp/mrl-dfs", global = true)]
    pub dfs_root: PathBuf,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the main class and driver candidates of an artifact.
    Info {
        /// Artifact manifest, as a path or file:// URL
        jar: String,
    },
    /// Run a driver in this process.
    Run {
        /// Artifact manifest, as a path or file:// URL
        jar: String,

        /// Driver class, overriding the artifact's main class
        #[arg(short, long)]
        driver: Option<String>,

        /// Seconds to wait before killing the driver
        #[arg(short, long, default_value_t = 300)]
        timeout: u64,

        /// Arguments passed to the driver.
        #[clap(value_parser, last = true)]
        args: Vec<String>,
    },
    /// Submit a job to the local cluster and wait for it
    Submit(SubmitArgs),
    /// Install the shared runtime environment.
    Install {
        #[command(flatten)]
        install: InstallArgs,

        #[command(flatten)]
        minio: MinioArgs,
    },
}

#[derive(clap::Args, Debug)]
pub struct SubmitArgs {
    /// Input paths
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<String>,

    /// Output directory
    #[arg(short, long)]
    pub output: String,

    #[arg(long)]
    pub job_name: Option<String>,

    #[arg(long)]
    pub mapper: Option<String>,

    #[arg(long)]
    pub combiner: Option<String>,

    #[arg(long)]
    pub reducer: Option<String>,

    #[arg(long)]
    pub input_format: Option<String>,

    #[arg(long)]
    pub output_format: Option<String>,

    /// Artifact the driver class is resolved from
    #[arg(long)]
    pub jar: Option<String>,

    #[arg(long)]
    pub driver: Option<String>,

    #[arg(long, default_value = "1")]
    pub map_tasks: String,

    #[arg(long, default_value = "1")]
    pub reduce_tasks: String,

    /// Delete the output directory before submitting
    #[arg(long)]
    pub clean: bool,

    /// Job property, as key=value
    #[arg(short = 'D', long = "property")]
    pub properties: Vec<String>,

    /// Seconds to wait for the job before giving up
    #[arg(short, long, default_value_t = 300)]
    pub timeout: u64,

    #[command(flatten)]
    pub install: InstallArgs,
}

#[derive(clap::Args, Debug)]
pub struct InstallArgs {
    /// Directory environments are installed under. `s3://bucket/dir` installs
    /// into MinIO.
    #[arg(long, env = "MRL_INSTALL_DIR")]
    pub install_dir: Option<String>,

    #[arg(long, env = "MRL_INSTALLATION_ID")]
    pub installation_id: Option<String>,

    /// Local directory holding environment archives
    #[arg(long, env = "MRL_RESOURCES", default_value = ".")]
    pub resources: PathBuf,

    /// Archive file name inside the resources directory
    #[arg(long)]
    pub archive: Option<String>,

    /// Local plugin directories copied into the environment
    #[arg(long, value_delimiter = ',')]
    pub plugins: Vec<String>,
}

#[derive(clap::Args, Debug)]
pub struct MinioArgs {
    #[arg(long, env = "MINIO_URL", default_value = "http://127.0.0.1:9000")]
    pub minio_url: String,

    #[arg(long, env = "MINIO_ACCESS_KEY", default_value = "minioadmin")]
    pub minio_access_key: String,

    #[arg(long, env = "MINIO_SECRET_KEY", default_value = "minioadmin")]
    pub minio_secret_key: String,

    #[arg(long, env = "MINIO_REGION", default_value = "us-east-1")]
    pub minio_region: String,
}

/// Parse the user command line.
pub fn parse_args() -> Args {
    Args::parse()
}
