use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_KILL_DELAY_SECS: u64 = 3;
pub const DEFAULT_SEGMENTER_BIN: &str = "TotalSegmentator";
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 30;

/// Server settings, taken from flags or the environment.
#[derive(Debug, Clone, Args)]
pub struct ServiceConfig {
    #[arg(long, env = "SEGMENT_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "SEGMENT_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Uploaded and downloaded volumes. Wiped at startup.
    #[arg(long, env = "SEGMENT_INPUTS_DIR", default_value = "inputs")]
    pub inputs_dir: PathBuf,

    /// Label volumes produced by the engine. Wiped at startup.
    #[arg(long, env = "SEGMENT_OUTPUTS_DIR", default_value = "outputs")]
    pub outputs_dir: PathBuf,

    /// Wall-clock limit for one segmentation request.
    #[arg(long, env = "SEGMENT_TIMEOUT_SECS", default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout_secs: u64,

    /// Pause between a termination request and the process exit.
    #[arg(long, env = "SEGMENT_KILL_DELAY_SECS", default_value_t = DEFAULT_KILL_DELAY_SECS)]
    pub kill_delay_secs: u64,

    /// How long in-flight responses may drain once shutdown starts.
    #[arg(long, env = "SEGMENT_SHUTDOWN_GRACE_SECS", default_value_t = DEFAULT_SHUTDOWN_GRACE_SECS)]
    pub shutdown_grace_secs: u64,

    #[arg(long, env = "SEGMENTER_BIN", default_value = DEFAULT_SEGMENTER_BIN)]
    pub segmenter_bin: PathBuf,

    /// Extra arguments placed before the engine's own flags. Repeatable.
    #[arg(
        long = "segmenter-arg",
        env = "SEGMENTER_ARGS",
        value_delimiter = ' ',
        allow_hyphen_values = true
    )]
    pub segmenter_args: Vec<String>,

    /// Exit after every request. Defaults to on under WSL, off elsewhere.
    #[arg(long, env = "SEGMENT_RECYCLE_AFTER_REQUEST", action = clap::ArgAction::Set)]
    pub recycle_after_request: Option<bool>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            inputs_dir: PathBuf::from("inputs"),
            outputs_dir: PathBuf::from("outputs"),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            kill_delay_secs: DEFAULT_KILL_DELAY_SECS,
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
            segmenter_bin: PathBuf::from(DEFAULT_SEGMENTER_BIN),
            segmenter_args: Vec::new(),
            recycle_after_request: None,
        }
    }
}

impl ServiceConfig {
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn kill_delay(&self) -> Duration {
        Duration::from_secs(self.kill_delay_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Explicit setting, else WSL detection.
    pub fn recycle_after_request(&self) -> bool {
        self.recycle_after_request
            .unwrap_or_else(crate::watchdog::running_under_wsl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        config: ServiceConfig,
    }

    #[test]
    fn default_config() {
        let cfg = ServiceConfig::default();
        assert_eq!(cfg.port, 8000);
        assert_eq!(cfg.timeout(), Duration::from_secs(600));
        assert_eq!(cfg.kill_delay(), Duration::from_secs(3));
        assert_eq!(cfg.socket_addr().unwrap().port(), 8000);
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::parse_from([
            "segment-server",
            "--port",
            "9100",
            "--timeout-secs",
            "30",
            "--recycle-after-request",
            "true",
            "--segmenter-arg=-m",
            "--segmenter-arg=totalsegmentator",
        ]);
        assert_eq!(cli.config.port, 9100);
        assert_eq!(cli.config.timeout(), Duration::from_secs(30));
        assert!(cli.config.recycle_after_request());
        assert_eq!(cli.config.segmenter_bin, PathBuf::from("TotalSegmentator"));
        assert_eq!(cli.config.segmenter_args, ["-m", "totalsegmentator"]);
        assert_eq!(cli.config.shutdown_grace(), Duration::from_secs(30));
    }
}
