//! # Command Line
//!
//! Flags of the controller binary. Every flag overrides the matching
//! environment variable.

use crate::config::ControllerConfig;
use crate::requeue::jitter;
use clap::Parser;

#[derive(Debug, Default, Parser)]
#[command(
    name = "release-pipeline-controller",
    version,
    about = "Schedules Tekton PipelineRuns for GitHub releases with missing artifacts",
    long_about = None
)]
pub struct Cli {
    /// Port of the metrics and health server
    #[arg(long)]
    pub metrics_port: Option<u16>,

    /// Only watch Repositories in this namespace
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Seconds between two regular checks of a repository
    #[arg(long)]
    pub requeue_interval_secs: Option<u64>,

    /// Jitter applied to the regular interval, in percent
    #[arg(long, value_parser = parse_jitter_percent)]
    pub jitter_percent: Option<f64>,

    /// First UTC hour requeues may land in
    #[arg(long, requires = "requeue_on_hours_to")]
    pub requeue_on_hours_from: Option<u32>,

    /// UTC hour the requeue window closes (exclusive)
    #[arg(long, requires = "requeue_on_hours_from")]
    pub requeue_on_hours_to: Option<u32>,

    /// Base URL of the GitHub REST API
    #[arg(long)]
    pub github_api_url: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,
}

fn parse_jitter_percent(value: &str) -> Result<f64, String> {
    let percent: f64 = value.trim().parse().map_err(|e| format!("{e}"))?;
    if jitter::is_valid_percentage(percent) {
        Ok(percent)
    } else {
        Err(format!("jitter percent must be finite and not negative, got {value}"))
    }
}

impl Cli {
    /// Overlay the flags that were given onto `config`
    #[must_use]
    pub fn apply(self, mut config: ControllerConfig) -> ControllerConfig {
        if let Some(port) = self.metrics_port {
            config.metrics_port = port;
        }
        if let Some(namespace) = self.namespace {
            config.watch_namespace = Some(namespace);
        }
        if let Some(interval) = self.requeue_interval_secs {
            config.requeue_interval_secs = interval;
        }
        if let Some(percent) = self.jitter_percent {
            config.jitter_percent = percent;
        }
        if self.requeue_on_hours_from.is_some() {
            config.requeue_on_hours_from = self.requeue_on_hours_from;
            config.requeue_on_hours_to = self.requeue_on_hours_to;
        }
        if let Some(url) = self.github_api_url {
            config.github_api_url = url;
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
        config
    }
}
