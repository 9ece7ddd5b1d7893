use std::path::PathBuf;

use clap::Parser;

/// Command-line configuration, read once at startup.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Model to serve (resnet18, resnet50, resnet101); unknown names fall
    /// back to resnet18
    #[arg(long, default_value = "resnet18")]
    pub model: String,

    /// Device override ("cpu" or "cuda"); auto-detected when unset
    #[arg(long)]
    pub device: Option<String>,

    /// Local ONNX weights path; downloaded into the cache dir when unset
    #[arg(long)]
    pub weights: Option<PathBuf>,

    /// Class label list, one label per line, ordered by model output index
    #[arg(long)]
    pub labels: Option<PathBuf>,

    /// Bind address
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Bind port
    #[arg(long, default_value_t = 8000)]
    pub port: u16,

    /// Maximum upload size in bytes
    #[arg(long, default_value_t = 10 * 1024 * 1024)]
    pub body_limit: usize,

    /// Load the model at startup instead of on the first request
    #[arg(long)]
    pub warm_up: bool,
}
