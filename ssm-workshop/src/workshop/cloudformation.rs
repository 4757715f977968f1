use std::time::Duration;

use aws_sdk_cloudformation::{
    client::Waiters,
    error::ProvideErrorMetadata,
    types::{Capability, Output, Stack, StackStatus, Tag},
    Client,
};
use aws_smithy_types::date_time::Format;
use bon::builder;
use duration_str::HumanFormat;
use tokio::time::Instant;
use url::Url;

use super::config::{AwsConfigProvider, CloudFormationStackProvider};
use crate::settings::OutputKeys;

const WORKSHOP_VERSION_TAG: &str = "ssm-workshop:version";
const WORKSHOP_TEMPLATE_TAG: &str = "ssm-workshop:template-hash";

#[builder]
#[derive(Debug)]
pub struct CreateStackArgs<'a> {
    pub template_url: &'a Url,
    /// Content hash of the uploaded template, recorded as a stack tag.
    pub template_hash: &'a str,
}

/// Where a stack stands relative to the status being waited for.
#[derive(Debug, PartialEq, Eq)]
pub enum StatusCheck {
    Reached,
    InProgress,
    Failed,
}

pub fn get_client(config: &impl AwsConfigProvider) -> Client {
    Client::new(config.get_aws_config())
}

pub fn check_status(
    status: &StackStatus,
    target: &StackStatus,
) -> StatusCheck {
    let s = status.as_str();
    if status == target {
        StatusCheck::Reached
    } else if s.ends_with("_FAILED") || s.ends_with("ROLLBACK_COMPLETE") {
        StatusCheck::Failed
    } else {
        StatusCheck::InProgress
    }
}

/// Start stack creation from the uploaded template. Returns the stack id.
#[tracing::instrument(level = "info", skip(client, config))]
pub async fn create_stack(
    client: &Client,
    config: &impl CloudFormationStackProvider,
    args: CreateStackArgs<'_>,
) -> anyhow::Result<Box<str>> {
    let res = client
        .create_stack()
        .stack_name(config.get_stack_name())
        .template_url(args.template_url.as_str())
        .capabilities(Capability::CapabilityIam)
        .client_request_token(uuid::Uuid::new_v4().to_string())
        .tags(
            Tag::builder()
                .key(WORKSHOP_TEMPLATE_TAG)
                .value(args.template_hash)
                .build(),
        )
        .tags(
            Tag::builder()
                .key(WORKSHOP_VERSION_TAG)
                .value(env!("CARGO_PKG_VERSION"))
                .build(),
        )
        .send()
        .await?;

    let stack_id = res
        .stack_id
        .ok_or_else(|| anyhow::anyhow!("CreateStack returned no stack id"))?;
    tracing::debug!(%stack_id, "Stack creation initiated");

    Ok(stack_id.into())
}

/// Poll the stack every `interval` until its status equals `target`.
/// A `*_FAILED` or `*ROLLBACK_COMPLETE` status ends the wait with an error.
/// Without a timeout this waits for as long as the stack takes.
#[tracing::instrument(level = "info", skip(client))]
pub async fn await_stack_status(
    client: &Client,
    stack_name: &str,
    target: StackStatus,
    interval: Duration,
    timeout: Option<Duration>,
) -> anyhow::Result<Stack> {
    let started = Instant::now();
    loop {
        let stack = describe_stack(client, stack_name)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Stack {stack_name} not found"))?;

        let status = stack.stack_status.clone().ok_or_else(|| {
            anyhow::anyhow!("Stack {stack_name} status not found")
        })?;
        let elapsed = started.elapsed();
        tracing::info!(status = status.as_str(),
            elapsed = %elapsed.human_format(), "Stack status");

        match check_status(&status, &target) {
            StatusCheck::Reached => return Ok(stack),
            StatusCheck::Failed => {
                anyhow::bail!(
                    "Stack {stack_name} ended in {status}: {}",
                    stack.stack_status_reason().unwrap_or("no reason given")
                )
            },
            StatusCheck::InProgress => {},
        }

        let pause = match timeout {
            Some(timeout) if elapsed >= timeout => {
                anyhow::bail!(
                    "Stack {stack_name} did not reach {target} within {}",
                    timeout.human_format()
                );
            },
            Some(timeout) => interval.min(timeout - elapsed),
            None => interval,
        };
        tokio::time::sleep(pause).await;
    }
}

fn is_missing_stack_message(msg: &str) -> bool {
    msg.contains("does not exist")
}

/// Describe a single stack, `None` when it does not exist.
#[tracing::instrument(level = "debug", skip(client))]
pub async fn describe_stack(
    client: &Client,
    stack_name: &str,
) -> anyhow::Result<Option<Stack>> {
    match client.describe_stacks().stack_name(stack_name).send().await {
        Ok(res) => Ok(res.stacks.into_iter().flatten().next()),
        Err(err)
            if err
                .as_service_error()
                .and_then(|e| e.message())
                .is_some_and(is_missing_stack_message) =>
        {
            Ok(None)
        },
        Err(err) => Err(err.into()),
    }
}

#[derive(Debug)]
pub struct StackSummary {
    pub name: Box<str>,
    pub status: StackStatus,
    pub status_reason: Option<Box<str>>,
    pub created: Option<Box<str>>,
    pub outputs: serde_json::Value,
}

impl StackSummary {
    pub fn from_stack(stack: Stack) -> anyhow::Result<Self> {
        let created = stack
            .creation_time
            .map(|t| t.fmt(Format::DateTime))
            .transpose()?
            .map(Into::into);
        Ok(Self {
            name: stack.stack_name.unwrap_or_default().into(),
            status: stack.stack_status.ok_or_else(|| {
                anyhow::anyhow!("Stack status not found")
            })?,
            status_reason: stack.stack_status_reason.map(Into::into),
            created,
            outputs: outputs_to_json_obj(stack.outputs),
        })
    }
}

/// Load the workshop stack summary, `None` when the stack does not exist.
#[tracing::instrument(level = "debug", skip_all)]
pub async fn load_stack_summary(
    client: &Client,
    config: &impl CloudFormationStackProvider,
) -> anyhow::Result<Option<StackSummary>> {
    describe_stack(client, config.get_stack_name())
        .await?
        .map(StackSummary::from_stack)
        .transpose()
}

/// Convert the stack outputs to a JSON object for easier lookup
pub fn outputs_to_json_obj(outputs: Option<Vec<Output>>) -> serde_json::Value {
    serde_json::Value::Object(
        outputs
            .into_iter()
            .flatten()
            .filter_map(|o| match (o.output_key, o.output_value) {
                (Some(k), Some(v)) => Some((k, serde_json::Value::String(v))),
                _ => None,
            })
            .collect::<serde_json::Map<_, _>>(),
    )
}

/// Load the stack outputs
#[tracing::instrument(level = "debug", skip(client))]
pub async fn load_stack_outputs(
    client: &Client,
    stack_name: &str,
) -> anyhow::Result<serde_json::Value> {
    let stack = describe_stack(client, stack_name)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Stack {stack_name} not found"))?;

    Ok(outputs_to_json_obj(stack.outputs))
}

/// The workshop links exported by the stack.
#[derive(Debug, PartialEq, Eq)]
pub struct WorkshopStackOutputs {
    pub session_url: Box<str>,
    pub console_url: Box<str>,
    pub instance_id: Option<Box<str>>,
}

impl WorkshopStackOutputs {
    pub fn extract(
        outputs: &serde_json::Value,
        keys: &OutputKeys,
    ) -> anyhow::Result<Self> {
        let get = |key: &str| outputs.get(key).and_then(|v| v.as_str());
        let require = |key: &str| {
            get(key).map(Into::into).ok_or_else(|| {
                anyhow::anyhow!("Stack output {key} not found")
            })
        };

        Ok(Self {
            session_url: require(keys.session_url_key.as_str())?,
            console_url: require(keys.console_url_key.as_str())?,
            instance_id: get(keys.instance_id_key.as_str()).map(Into::into),
        })
    }
}

/// Delete the workshop stack and block until the deletion completes.
/// Returns `false` when there was no stack to delete.
#[tracing::instrument(level = "info", skip(client, config))]
pub async fn delete_stack(
    client: &Client,
    config: &impl CloudFormationStackProvider,
    max_wait: Duration,
) -> anyhow::Result<bool> {
    let stack_name = config.get_stack_name();

    if describe_stack(client, stack_name).await?.is_none() {
        tracing::info!(stack_name, "Stack does not exist, nothing to delete");
        return Ok(false);
    }

    client
        .delete_stack()
        .stack_name(stack_name)
        .client_request_token(uuid::Uuid::new_v4().to_string())
        .send()
        .await?;
    tracing::debug!(stack_name, "Stack deletion initiated");

    client
        .wait_until_stack_delete_complete()
        .stack_name(stack_name)
        .wait(max_wait)
        .await?;
    tracing::info!(stack_name, "Stack deleted");

    Ok(true)
}

#[test]
fn status_classification() {
    let target = StackStatus::CreateComplete;
    assert_eq!(
        check_status(&StackStatus::CreateComplete, &target),
        StatusCheck::Reached
    );
    assert_eq!(
        check_status(&StackStatus::CreateInProgress, &target),
        StatusCheck::InProgress
    );
    assert_eq!(
        check_status(&StackStatus::RollbackInProgress, &target),
        StatusCheck::InProgress
    );
    assert_eq!(
        check_status(&StackStatus::CreateFailed, &target),
        StatusCheck::Failed
    );
    assert_eq!(
        check_status(&StackStatus::RollbackComplete, &target),
        StatusCheck::Failed
    );
}

#[test]
fn missing_stack_message() {
    assert!(is_missing_stack_message(
        "Stack with id ssm-workshop does not exist"
    ));
    assert!(!is_missing_stack_message("Rate exceeded"));
}

#[test]
fn outputs_skip_incomplete_pairs() {
    let outputs = outputs_to_json_obj(Some(vec![
        Output::builder()
            .output_key("SessionManagerUrl")
            .output_value("https://example.com/session")
            .build(),
        Output::builder().output_key("Dangling").build(),
    ]));
    assert_eq!(
        outputs,
        serde_json::json!({ "SessionManagerUrl": "https://example.com/session" })
    );
    assert_eq!(outputs_to_json_obj(None), serde_json::json!({}));
}

#[test]
fn extract_workshop_outputs() -> anyhow::Result<()> {
    let keys = OutputKeys::default();
    let outputs = serde_json::json!({
        "SessionManagerUrl": "https://console.aws.amazon.com/ssm/session",
        "InstanceConsoleUrl": "https://console.aws.amazon.com/ec2/instance",
        "VpcId": "vpc-123",
    });
    let extracted = WorkshopStackOutputs::extract(&outputs, &keys)?;
    assert_eq!(
        extracted,
        WorkshopStackOutputs {
            session_url: "https://console.aws.amazon.com/ssm/session".into(),
            console_url: "https://console.aws.amazon.com/ec2/instance".into(),
            instance_id: None,
        }
    );

    let err = WorkshopStackOutputs::extract(
        &serde_json::json!({ "SessionManagerUrl": "x" }),
        &keys,
    )
    .unwrap_err();
    assert_eq!(err.to_string(), "Stack output InstanceConsoleUrl not found");
    Ok(())
}

#[cfg(test)]
fn stack_with_status(
    status: StackStatus,
) -> aws_sdk_cloudformation::operation::describe_stacks::DescribeStacksOutput {
    use aws_sdk_cloudformation::operation::describe_stacks::DescribeStacksOutput;

    DescribeStacksOutput::builder()
        .stacks(
            Stack::builder()
                .stack_name("ssm-workshop")
                .stack_status(status)
                .stack_status_reason("Instance failed to stabilize")
                .creation_time(aws_smithy_types::DateTime::from_secs(
                    1_700_000_000,
                ))
                .build(),
        )
        .build()
}

#[tokio::test]
async fn await_polls_until_target() {
    use aws_smithy_mocks::{mock, mock_client, RuleMode};

    let describe = mock!(Client::describe_stacks)
        .match_requests(|req| req.stack_name() == Some("ssm-workshop"))
        .sequence()
        .output(|| stack_with_status(StackStatus::CreateInProgress))
        .times(2)
        .output(|| stack_with_status(StackStatus::CreateComplete))
        .build();
    let client =
        mock_client!(aws_sdk_cloudformation, RuleMode::MatchAny, [&describe]);

    let interval = Duration::from_millis(20);
    let started = Instant::now();
    let stack = await_stack_status(
        &client,
        "ssm-workshop",
        StackStatus::CreateComplete,
        interval,
        None,
    )
    .await
    .unwrap();

    assert_eq!(stack.stack_status(), Some(&StackStatus::CreateComplete));
    assert_eq!(describe.num_calls(), 3);
    assert!(started.elapsed() >= interval * 2);
}

#[tokio::test]
async fn await_stops_on_rollback() {
    use aws_smithy_mocks::{mock, mock_client, RuleMode};

    let describe = mock!(Client::describe_stacks)
        .sequence()
        .output(|| stack_with_status(StackStatus::CreateInProgress))
        .output(|| stack_with_status(StackStatus::RollbackInProgress))
        .output(|| stack_with_status(StackStatus::RollbackComplete))
        .output(|| stack_with_status(StackStatus::RollbackComplete))
        .build();
    let client =
        mock_client!(aws_sdk_cloudformation, RuleMode::MatchAny, [&describe]);

    let err = await_stack_status(
        &client,
        "ssm-workshop",
        StackStatus::CreateComplete,
        Duration::from_millis(1),
        None,
    )
    .await
    .unwrap_err()
    .to_string();

    assert!(err.contains("ROLLBACK_COMPLETE"), "{err}");
    assert!(err.contains("Instance failed to stabilize"), "{err}");
    assert_eq!(describe.num_calls(), 3);
}

#[tokio::test]
async fn await_gives_up_at_timeout() {
    use aws_smithy_mocks::{mock, mock_client, RuleMode};

    let describe = mock!(Client::describe_stacks)
        .sequence()
        .output(|| stack_with_status(StackStatus::CreateInProgress))
        .times(5)
        .build();
    let client =
        mock_client!(aws_sdk_cloudformation, RuleMode::MatchAny, [&describe]);

    // An interval longer than the timeout still gets one last check once
    // the timeout has passed.
    let timeout = Duration::from_millis(200);
    let started = Instant::now();
    let err = await_stack_status(
        &client,
        "ssm-workshop",
        StackStatus::CreateComplete,
        Duration::from_secs(10),
        Some(timeout),
    )
    .await
    .unwrap_err()
    .to_string();

    assert!(err.contains("did not reach CREATE_COMPLETE"), "{err}");
    assert_eq!(describe.num_calls(), 2);
    assert!(started.elapsed() >= timeout);
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn delete_missing_stack_is_a_noop() {
    use aws_sdk_cloudformation::{
        error::ErrorMetadata,
        operation::{
            delete_stack::DeleteStackOutput,
            describe_stacks::DescribeStacksError,
        },
    };
    use aws_smithy_mocks::{mock, mock_client, RuleMode};

    use super::config::StaticConfig;

    let describe = mock!(Client::describe_stacks).then_error(|| {
        DescribeStacksError::generic(
            ErrorMetadata::builder()
                .code("ValidationError")
                .message("Stack with id ssm-workshop does not exist")
                .build(),
        )
    });
    let delete = mock!(Client::delete_stack)
        .then_output(|| DeleteStackOutput::builder().build());
    let client = mock_client!(
        aws_sdk_cloudformation,
        RuleMode::MatchAny,
        [&describe, &delete]
    );

    let deleted = delete_stack(
        &client,
        &StaticConfig::new("eu-west-1"),
        Duration::from_secs(1),
    )
    .await
    .unwrap();

    assert!(!deleted);
    assert_eq!(describe.num_calls(), 1);
    assert_eq!(delete.num_calls(), 0);
}
