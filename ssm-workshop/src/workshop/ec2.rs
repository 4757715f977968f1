use aws_sdk_ec2::{types::Instance, Client};
use url::Url;

use super::config::AwsConfigProvider;

#[derive(Debug, PartialEq, Eq)]
pub struct InstanceSummary {
    pub instance_id: Box<str>,
    pub state: Box<str>,
    pub instance_type: Option<Box<str>>,
    pub private_ip: Option<Box<str>>,
}

impl InstanceSummary {
    fn from_instance(instance: &Instance) -> Option<Self> {
        Some(Self {
            instance_id: instance.instance_id()?.into(),
            state: instance
                .state()
                .and_then(|s| s.name())
                .map(|n| n.as_str())
                .unwrap_or("unknown")
                .into(),
            instance_type: instance.instance_type().map(|t| t.as_str().into()),
            private_ip: instance.private_ip_address().map(Into::into),
        })
    }
}

#[tracing::instrument(level = "debug", skip(config))]
pub async fn describe_instance(
    config: &impl AwsConfigProvider,
    instance_id: &str,
) -> anyhow::Result<InstanceSummary> {
    let client = Client::new(config.get_aws_config());
    let resp = client
        .describe_instances()
        .instance_ids(instance_id)
        .send()
        .await?;

    let summary = resp
        .reservations()
        .iter()
        .flat_map(|r| r.instances())
        .find_map(InstanceSummary::from_instance)
        .ok_or_else(|| anyhow::anyhow!("Instance {instance_id} not found"))?;
    tracing::debug!(?summary);

    Ok(summary)
}

/// Console link that opens a Session Manager shell on the instance.
pub fn session_manager_url(
    region: &str,
    instance_id: &str,
) -> anyhow::Result<Url> {
    let mut url = Url::parse(&format!(
        "https://{region}.console.aws.amazon.com/systems-manager/\
         session-manager/"
    ))?;
    url.path_segments_mut()
        .map_err(|_| anyhow::anyhow!("Invalid console URL for {region}"))?
        .pop_if_empty()
        .push(instance_id);
    url.query_pairs_mut().append_pair("region", region);
    Ok(url)
}

#[test]
fn session_url_test() -> anyhow::Result<()> {
    let url = session_manager_url("eu-west-1", "i-0123456789abcdef0")?;
    assert_eq!(
        url.as_str(),
        "https://eu-west-1.console.aws.amazon.com/systems-manager/\
         session-manager/i-0123456789abcdef0?region=eu-west-1"
    );
    Ok(())
}

#[test]
fn instance_summary_test() {
    use aws_sdk_ec2::types::{InstanceState, InstanceStateName, InstanceType};

    let instance = Instance::builder()
        .instance_id("i-0123456789abcdef0")
        .instance_type(InstanceType::T3Micro)
        .state(
            InstanceState::builder()
                .name(InstanceStateName::Running)
                .build(),
        )
        .build();
    assert_eq!(
        InstanceSummary::from_instance(&instance),
        Some(InstanceSummary {
            instance_id: "i-0123456789abcdef0".into(),
            state: "running".into(),
            instance_type: Some("t3.micro".into()),
            private_ip: None,
        })
    );
    assert_eq!(
        InstanceSummary::from_instance(&Instance::builder().build()),
        None
    );
}
