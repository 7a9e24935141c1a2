use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Banking API load generator
#[derive(Parser, Debug)]
#[command(name = "bankload")]
#[command(about = "Stage-driven load generator for the banking HTTP API")]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub profile: Profile,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Base URL of the API under test
    #[arg(
        long,
        global = true,
        default_value = "http://localhost:8080",
        env = "BASE_URL"
    )]
    pub base_url: String,

    /// Live metrics refresh interval in seconds
    #[arg(long, global = true, default_value = "5")]
    pub report_interval: u64,

    /// Per-request timeout in seconds
    #[arg(long, global = true, default_value = "30")]
    pub timeout: u64,

    /// Seed every random generator for a reproducible run
    #[arg(long, global = true)]
    pub seed: Option<u64>,

    /// Multiply every start offset and stage duration, e.g. 0.1 for a 10x shorter run
    #[arg(long, global = true, default_value = "1.0", value_parser = positive_factor)]
    pub time_scale: f64,

    /// Override the number of identities provisioned before the run
    #[arg(long, global = true)]
    pub setup_users: Option<usize>,

    /// Log progress instead of redrawing the live metrics screen
    #[arg(long, global = true)]
    pub no_live: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Profile {
    /// One VU for a minute: register, health check, list accounts
    Smoke,

    /// Ramp to 50 VUs over 18 minutes with transfers between provisioned users
    Load,

    /// Burst to 300 VUs and back down
    Spike,

    /// Registration, banking and read-heavy scenarios running side by side
    Full,

    /// Run a JSON configuration file
    Custom(CustomArgs),
}

#[derive(Args, Debug, Clone)]
pub struct CustomArgs {
    /// Path to the run configuration
    #[arg(long)]
    pub config: PathBuf,
}

impl Profile {
    pub fn name(&self) -> &'static str {
        match self {
            Profile::Smoke => "smoke",
            Profile::Load => "load",
            Profile::Spike => "spike",
            Profile::Full => "full",
            Profile::Custom(_) => "custom",
        }
    }
}

fn positive_factor(value: &str) -> Result<f64, String> {
    let factor: f64 = value
        .parse()
        .map_err(|_| format!("'{}' is not a number", value))?;
    if factor.is_finite() && factor > 0.0 {
        Ok(factor)
    } else {
        Err("time scale must be greater than zero".to_string())
    }
}
