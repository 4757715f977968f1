use aws_sdk_iam::Client;

use super::config::AwsConfigProvider;
use crate::settings::RoleSettings;

const SERVICE_ROLE_PATH: &str = "/service-role/";

pub fn assume_role_policy(
    services: impl IntoIterator<Item = impl AsRef<str>>,
) -> serde_json::Value {
    let services = services
        .into_iter()
        .map(|s| s.as_ref().to_owned())
        .collect::<Vec<_>>();
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Sid": "",
            "Effect": "Allow",
            "Principal": { "Service": services },
            "Action": "sts:AssumeRole",
        }],
    })
}

/// Workshop accounts are disposable; the role may do anything.
pub fn inline_policy() -> serde_json::Value {
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Action": ["*"],
            "Resource": ["*"],
            "Effect": "Allow",
        }],
    })
}

/// Look up a role by name, `None` when IAM reports no such entity.
#[tracing::instrument(level = "debug", skip(client))]
async fn get_role_arn(
    client: &Client,
    role_name: &str,
) -> anyhow::Result<Option<Box<str>>> {
    match client.get_role().role_name(role_name).send().await {
        Ok(res) => Ok(res.role().map(|r| r.arn().into())),
        Err(err)
            if err
                .as_service_error()
                .is_some_and(|e| e.is_no_such_entity_exception()) =>
        {
            Ok(None)
        },
        Err(err) => Err(err.into()),
    }
}

/// Create the workshop service role unless a role with that name already
/// exists. Returns the role ARN.
#[tracing::instrument(level = "info", skip(config))]
pub async fn ensure_service_role(
    config: &impl AwsConfigProvider,
    role: &RoleSettings,
) -> anyhow::Result<Box<str>> {
    let client = Client::new(config.get_aws_config());

    if let Some(arn) = get_role_arn(&client, &role.name).await? {
        tracing::info!(role = %role.name,
            "Role already exists. Assuming correct values.");
        return Ok(arn);
    }

    let res = client
        .create_role()
        .role_name(&role.name)
        .path(SERVICE_ROLE_PATH)
        .assume_role_policy_document(
            assume_role_policy(&role.trusted_services).to_string(),
        )
        .send()
        .await?;
    let arn: Box<str> = res
        .role()
        .map(|r| r.arn().into())
        .ok_or_else(|| anyhow::anyhow!("CreateRole returned no role"))?;
    tracing::debug!(%arn, "Role created");

    if let Some(policy_name) = &role.inline_policy_name {
        client
            .put_role_policy()
            .role_name(&role.name)
            .policy_name(policy_name)
            .policy_document(inline_policy().to_string())
            .send()
            .await?;
        tracing::debug!(%policy_name, "Inline policy attached");
    }

    Ok(arn)
}

#[test]
fn assume_role_policy_lists_services() {
    let doc =
        assume_role_policy(["sagemaker.amazonaws.com", "glue.amazonaws.com"]);
    let statement = &doc["Statement"][0];
    assert_eq!(statement["Action"], "sts:AssumeRole");
    assert_eq!(
        statement["Principal"]["Service"],
        serde_json::json!(["sagemaker.amazonaws.com", "glue.amazonaws.com"])
    );
    assert_eq!(doc["Version"], "2012-10-17");
}

#[test]
fn inline_policy_allows_everything() {
    let doc = inline_policy();
    assert_eq!(doc["Statement"][0]["Effect"], "Allow");
    assert_eq!(doc["Statement"][0]["Action"], serde_json::json!(["*"]));
}
