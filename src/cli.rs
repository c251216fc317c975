//! Command-line interface definitions.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Tracks remote transcoding jobs and materializes finished encodings.
#[derive(Parser, Debug)]
#[command(name = "transcode-reconciler", version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "/config/transcode.yaml", env = "CONFIG_PATH", global = true)]
    pub config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Returns the log level based on verbosity flags.
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the callback server and background reconciler.
    Run,

    /// Validate the configuration file without starting.
    #[command(name = "config-validate")]
    ConfigValidate,

    /// Display the parsed configuration.
    #[command(name = "config-show")]
    ConfigShow,

    /// Verify the remote credentials by fetching the cloud.
    #[command(name = "cloud-check")]
    CloudCheck,

    /// List the remote encoding profiles.
    Profiles,

    /// Register a media file with the local media library.
    #[command(name = "register-file")]
    RegisterFile(RegisterFileArgs),

    /// Submit a media file for transcoding.
    Submit(SubmitArgs),

    /// Reconcile a file's tracked videos against the remote service.
    Reconcile {
        file_id: String,

        /// Only reconcile this video.
        #[arg(long)]
        video_id: Option<String>,
    },

    /// Show the aggregate transcode progress of a file.
    Progress { file_id: String },

    /// Show each associated video with its encodings.
    Status { file_id: String },

    /// List the videos associated with a file.
    Associations {
        file_id: String,

        /// Include completed associations.
        #[arg(long)]
        all: bool,
    },

    /// Cancel a tracked video and forget it.
    Cancel { file_id: String, video_id: String },

    /// Replace a failed encoding with a fresh one.
    Retry { file_id: String, encoding_id: String },
}

/// Arguments for the register-file subcommand.
#[derive(Args, Debug)]
pub struct RegisterFileArgs {
    pub file_id: String,

    /// The media item the file belongs to.
    pub media_id: String,

    /// Display name, including the extension.
    pub display_name: String,

    /// The file is a remote URL.
    #[arg(long, conflicts_with = "file", required_unless_present = "file")]
    pub url: Option<String>,

    /// The file is stored in the local media directory under this name.
    #[arg(long)]
    pub file: Option<String>,
}

/// Arguments for the submit subcommand.
#[derive(Args, Debug)]
pub struct SubmitArgs {
    pub file_id: String,

    /// Source URL; defaults to the file's own download URL.
    #[arg(long)]
    pub source_url: Option<String>,

    /// Comma-separated profile names; defaults to the configured profiles.
    #[arg(long)]
    pub profiles: Option<String>,

    /// Callback URL; defaults to the webhook's public URL.
    #[arg(long)]
    pub callback_url: Option<String>,
}
