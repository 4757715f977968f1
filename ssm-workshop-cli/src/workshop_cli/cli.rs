use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::{Args, Parser, Subcommand, ValueHint};
use ssm_workshop::{
    settings::parse_duration,
    workshop::{provision::ProvisionArgs, teardown::TeardownArgs},
};
use tracing_subscriber::filter::LevelFilter;

pub mod workshop;

#[derive(Parser, Debug)]
#[command(about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Whether to run in development mode.
    #[arg(long)]
    pub dev: bool,
    /// The verbosity level (0-3).
    #[arg(long, default_value_t = 1)]
    pub verbosity: u8,
    /// The AWS profile to use.
    #[arg(long)]
    pub profile: Option<Arc<str>>,
    /// The AWS region to use.
    #[arg(long)]
    pub region: Option<Arc<str>>,
    /// The account expected to own the template bucket.
    #[arg(long, env = "AWS_ACCOUNT_ID")]
    pub account_id: Option<Arc<str>>,
    /// Workshop settings file (TOML).
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,
    /// The CloudFormation stack name.
    #[arg(long)]
    pub stack_name: Option<String>,
    /// Your part of the template bucket name, e.g. your alias.
    #[arg(long, env = "WORKSHOP_BUCKET_PLACEHOLDER")]
    pub bucket_placeholder: Option<String>,
    /// Local path of the CloudFormation template.
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub template: Option<PathBuf>,
    /// How often to poll the stack status (e.g. `15s`).
    #[arg(long, value_parser = parse_duration)]
    pub poll_interval: Option<Duration>,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the workshop IAM service role if it does not exist.
    Role(Role),
    /// Create the bucket, upload the template and create the stack.
    Up(ProvisionArgs),
    /// Show the stack and instance status.
    Status,
    /// Delete the stack and the template bucket.
    Down(Down),
}

#[derive(Args, Debug)]
pub struct Role {
    /// Silently agree to disclaimer.
    #[arg(long)]
    pub agree: bool,
}

#[derive(Args, Debug)]
pub struct Down {
    /// Do not ask for confirmation.
    #[arg(long)]
    pub yes: bool,
    #[command(flatten)]
    pub teardown: TeardownArgs,
}

impl Cli {
    /// Log level for this crate's own events.
    pub fn log_level(&self) -> LevelFilter {
        if self.dev {
            return LevelFilter::TRACE;
        }
        match self.verbosity {
            0 => LevelFilter::WARN,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }
}

#[test]
fn log_level_test() {
    let parse = |args: &[&str]| {
        Cli::try_parse_from(
            ["ssm-workshop-cli"].iter().chain(args).chain(&["status"]),
        )
        .unwrap()
    };
    assert_eq!(parse(&[]).log_level(), LevelFilter::INFO);
    assert_eq!(parse(&["--verbosity", "0"]).log_level(), LevelFilter::WARN);
    assert_eq!(parse(&["--verbosity", "7"]).log_level(), LevelFilter::TRACE);
    assert_eq!(parse(&["--dev"]).log_level(), LevelFilter::TRACE);
}

#[test]
fn down_args_test() {
    use ssm_workshop::workshop::teardown::BucketRemoval;

    let cli = Cli::try_parse_from([
        "ssm-workshop-cli",
        "--bucket-placeholder",
        "alice",
        "down",
        "--yes",
        "--bucket-removal",
        "aws-cli",
        "--max-wait",
        "10m",
    ])
    .unwrap();
    let Commands::Down(down) = cli.command else {
        panic!("expected down");
    };
    assert!(down.yes);
    assert_eq!(down.teardown.bucket_removal, BucketRemoval::AwsCli);
    assert_eq!(down.teardown.max_wait, Duration::from_secs(600));
    assert_eq!(cli.bucket_placeholder.as_deref(), Some("alice"));
}

#[test]
fn up_args_test() {
    let cli = Cli::try_parse_from([
        "ssm-workshop-cli",
        "--poll-interval",
        "5s",
        "up",
        "--timeout",
        "20m",
    ])
    .unwrap();
    assert_eq!(cli.poll_interval, Some(Duration::from_secs(5)));
    let Commands::Up(up) = cli.command else {
        panic!("expected up");
    };
    assert_eq!(up.timeout, Some(Duration::from_secs(1200)));
}
