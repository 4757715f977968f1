use aws_config::SdkConfig;

pub trait AwsConfigProvider {
    fn get_aws_config(&self) -> &SdkConfig;

    /// Named profile, forwarded to the AWS CLI when it is used.
    fn get_profile(&self) -> Option<&str> { None }

    fn get_region(&self) -> anyhow::Result<&str> {
        self.get_aws_config()
            .region()
            .map(|r| r.as_ref())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "AWS region is not configured. Pass `--region` or set \
                     AWS_REGION."
                )
            })
    }
}

pub trait CloudFormationStackProvider {
    fn get_stack_name(&self) -> &str;
}

pub trait S3Provider {
    fn get_bucket_name(&self) -> &str;

    /// Account id expected to own the bucket, if known.
    fn get_expected_bucket_owner(&self) -> Option<&str> { None }
}

/// Fixed names and region for running the workshop calls against mocked
/// clients.
#[cfg(test)]
pub(crate) struct StaticConfig {
    pub aws_config: SdkConfig,
    pub stack_name: &'static str,
    pub bucket_name: &'static str,
    pub bucket_owner: Option<&'static str>,
}

#[cfg(test)]
impl StaticConfig {
    pub fn new(region: &'static str) -> Self {
        Self {
            aws_config: SdkConfig::builder()
                .region(aws_config::Region::from_static(region))
                .build(),
            stack_name: "ssm-workshop",
            bucket_name: "ssm-workshop-templates-alice",
            bucket_owner: None,
        }
    }
}

#[cfg(test)]
impl AwsConfigProvider for StaticConfig {
    fn get_aws_config(&self) -> &SdkConfig { &self.aws_config }
}

#[cfg(test)]
impl CloudFormationStackProvider for StaticConfig {
    fn get_stack_name(&self) -> &str { self.stack_name }
}

#[cfg(test)]
impl S3Provider for StaticConfig {
    fn get_bucket_name(&self) -> &str { self.bucket_name }

    fn get_expected_bucket_owner(&self) -> Option<&str> { self.bucket_owner }
}
