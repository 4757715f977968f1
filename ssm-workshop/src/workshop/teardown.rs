use std::time::Duration;

use super::{
    cloudformation::{self, delete_stack},
    s3::{self, delete_bucket, empty_bucket, force_remove_bucket_cli},
    WorkshopConfig,
};
use crate::settings::parse_duration;

#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BucketRemoval {
    /// Empty and delete the bucket through the S3 API.
    #[default]
    Sdk,
    /// Run `aws s3 rb --force`.
    AwsCli,
}

#[derive(clap::Args, Debug)]
pub struct TeardownArgs {
    /// How to remove the template bucket.
    #[arg(long, value_enum, default_value_t = BucketRemoval::Sdk)]
    pub bucket_removal: BucketRemoval,
    /// Longest time to wait for the stack deletion to finish.
    #[arg(long, default_value = "30m", value_parser = parse_duration)]
    pub max_wait: Duration,
}

/// Delete the stack, wait for it to be gone, then remove the bucket with
/// everything in it.
#[tracing::instrument(level = "info", skip(config))]
pub async fn teardown(
    config: &impl WorkshopConfig,
    args: &TeardownArgs,
) -> anyhow::Result<()> {
    let stack_name = config.get_stack_name();
    let cfn_client = cloudformation::get_client(config);
    if delete_stack(&cfn_client, config, args.max_wait).await? {
        println!("Stack {stack_name} deleted.");
    } else {
        println!("Stack {stack_name} does not exist.");
    }

    let bucket = config.get_bucket_name();
    match args.bucket_removal {
        BucketRemoval::Sdk => {
            let client = s3::get_client(config);
            let count = empty_bucket(&client, config).await?;
            tracing::debug!(count, "Bucket emptied");
            delete_bucket(&client, config).await?;
        },
        BucketRemoval::AwsCli => {
            let region = config.get_region().ok();
            force_remove_bucket_cli(bucket, config.get_profile(), region)?;
        },
    }
    println!("Bucket {bucket} removed.");

    Ok(())
}
