use clap::Parser;
use tracing_subscriber::{
    self,
    filter::{filter_fn, LevelFilter},
    prelude::*,
    Layer,
};
use workshop_cli::Cli;

mod workshop_cli;

fn init_tracing(cli: &Cli) {
    let own_level = cli.log_level();
    // SDK request logs are only useful while debugging the workflow itself.
    let sdk_level = if cli.dev {
        LevelFilter::INFO
    } else {
        LevelFilter::WARN
    };

    let layer = tracing_subscriber::fmt::layer()
        .with_level(true)
        .with_target(cli.dev)
        .without_time()
        .with_filter(filter_fn(move |metadata| {
            let target = metadata.target();
            if target.starts_with("ssm_workshop") {
                metadata.level() <= &own_level
            } else if target.starts_with("aws_") {
                metadata.level() <= &sdk_level
            } else {
                metadata.level() <= &LevelFilter::WARN
            }
        }));
    tracing_subscriber::registry().with(layer).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    cli.run().await?;

    Ok(())
}
