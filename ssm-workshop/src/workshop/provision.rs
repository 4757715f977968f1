use std::time::Duration;

use aws_sdk_cloudformation::types::StackStatus;
use url::Url;

use super::{
    cloudformation::{
        self, await_stack_status, create_stack, load_stack_outputs,
        CreateStackArgs, WorkshopStackOutputs,
    },
    ec2::session_manager_url,
    s3::{
        self, create_bucket, read_template, template_url, upload_template,
        BucketCreation,
    },
    WorkshopConfig, IND,
};
use crate::settings::{parse_duration, OutputKeys, WorkshopSettings};

#[derive(clap::Args, Debug, Default)]
pub struct ProvisionArgs {
    /// Stop waiting for the stack after this long (e.g. `20m`). Waits
    /// indefinitely when not set.
    #[arg(long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,
}

#[derive(Debug)]
pub struct ProvisionReport {
    pub bucket: BucketCreation,
    pub template_url: Url,
    pub stack_id: Box<str>,
    pub outputs: WorkshopStackOutputs,
}

/// Bucket, template upload, stack creation, then wait for the stack and
/// print the links it exports.
#[tracing::instrument(level = "info", skip_all)]
pub async fn provision(
    config: &impl WorkshopConfig,
    settings: &WorkshopSettings,
    args: &ProvisionArgs,
) -> anyhow::Result<ProvisionReport> {
    let region = config.get_region()?;
    let bucket_name = config.get_bucket_name();
    let key = settings.template_key()?;
    let template = read_template(&settings.template_path).await?;

    let s3_client = s3::get_client(config);
    let bucket = create_bucket(&s3_client, config).await;
    println!("{bucket}");

    let template_hash =
        upload_template(&s3_client, config, template, &key).await?;
    println!(
        "Uploaded {} to s3://{bucket_name}/{key}.",
        settings.template_path.display()
    );

    let url = template_url(bucket_name, region, &key)?;
    let client = cloudformation::get_client(config);
    let stack_id = create_stack(
        &client,
        config,
        CreateStackArgs::builder()
            .template_url(&url)
            .template_hash(&template_hash)
            .build(),
    )
    .await?;
    println!("Creating stack {}: {stack_id}", config.get_stack_name());

    await_stack_status(
        &client,
        config.get_stack_name(),
        StackStatus::CreateComplete,
        settings.poll_interval,
        args.timeout,
    )
    .await?;
    println!("Stack {} is ready.", config.get_stack_name());

    let outputs = resolve_outputs(
        load_stack_outputs(&client, config.get_stack_name()).await?,
        &settings.outputs,
        region,
    )?;

    println!();
    println!("Open a shell on the instance:");
    println!("{IND}{}", outputs.session_url);
    println!("Instance in the EC2 console:");
    println!("{IND}{}", outputs.console_url);
    println!();

    Ok(ProvisionReport {
        bucket,
        template_url: url,
        stack_id,
        outputs,
    })
}

/// Extract the workshop links, building the Session Manager link from the
/// instance id when the template does not export one.
pub fn resolve_outputs(
    mut outputs: serde_json::Value,
    keys: &OutputKeys,
    region: &str,
) -> anyhow::Result<WorkshopStackOutputs> {
    if outputs.get(&keys.session_url_key).is_none() {
        let instance_id = outputs
            .get(&keys.instance_id_key)
            .and_then(|v| v.as_str())
            .map(str::to_owned);
        if let Some(instance_id) = instance_id {
            tracing::debug!(%instance_id, "Building session link");
            outputs[keys.session_url_key.as_str()] =
                session_manager_url(region, &instance_id)?.to_string().into();
        }
    }

    WorkshopStackOutputs::extract(&outputs, keys)
}

#[test]
fn resolve_outputs_prefers_exported_link() -> anyhow::Result<()> {
    let outputs = resolve_outputs(
        serde_json::json!({
            "SessionManagerUrl": "https://example.com/session",
            "InstanceConsoleUrl": "https://example.com/console",
            "InstanceId": "i-0abc",
        }),
        &OutputKeys::default(),
        "us-west-2",
    )?;
    assert_eq!(outputs.session_url.as_ref(), "https://example.com/session");
    assert_eq!(outputs.instance_id.as_deref(), Some("i-0abc"));
    Ok(())
}

#[test]
fn resolve_outputs_builds_session_link() -> anyhow::Result<()> {
    let outputs = resolve_outputs(
        serde_json::json!({
            "InstanceConsoleUrl": "https://example.com/console",
            "InstanceId": "i-0abc",
        }),
        &OutputKeys::default(),
        "us-west-2",
    )?;
    assert_eq!(
        outputs.session_url.as_ref(),
        "https://us-west-2.console.aws.amazon.com/systems-manager/\
         session-manager/i-0abc?region=us-west-2"
    );
    Ok(())
}

#[test]
fn resolve_outputs_without_instance_fails() {
    let res = resolve_outputs(
        serde_json::json!({ "InstanceConsoleUrl": "x" }),
        &OutputKeys::default(),
        "us-west-2",
    );
    assert!(res.is_err());
}
