use std::{fmt, path::Path};

use anyhow::anyhow;
use aws_config::Region;
use aws_sdk_s3::{
    primitives::ByteStream,
    types::{
        BucketLocationConstraint, CreateBucketConfiguration, Delete,
        ObjectIdentifier,
    },
    Client,
};
use cmd_lib::run_cmd;
use url::Url;

use super::config::{AwsConfigProvider, S3Provider};

/// DeleteObjects accepts at most this many keys per request.
const DELETE_BATCH_SIZE: usize = 1000;

/// Buckets in this region must be created without a location constraint.
const DEFAULT_S3_REGION: &str = "us-east-1";

pub fn get_client(config: &impl AwsConfigProvider) -> Client {
    Client::new(config.get_aws_config())
}

/// Result of [`create_bucket`]. Its `Display` is the status line shown to
/// the user.
#[derive(Debug, PartialEq, Eq)]
pub enum BucketCreation {
    Created { bucket: Box<str> },
    Failed { bucket: Box<str>, reason: Box<str> },
}

impl BucketCreation {
    pub fn from_result<T, E>(bucket: &str, res: Result<T, E>) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        match res {
            Ok(_) => Self::Created {
                bucket: bucket.into(),
            },
            Err(err) => {
                let reason = format!("{:#}", anyhow::Error::new(err));
                tracing::error!(bucket, error = %reason,
                    "Bucket creation failed");
                Self::Failed {
                    bucket: bucket.into(),
                    reason: reason.into(),
                }
            },
        }
    }

    pub fn is_created(&self) -> bool { matches!(self, Self::Created { .. }) }
}

impl fmt::Display for BucketCreation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created { bucket } => write!(f, "Bucket {bucket} created."),
            Self::Failed { bucket, reason } => {
                write!(f, "Failed to create bucket {bucket}: {reason}")
            },
        }
    }
}

fn location_constraint(
    region: Option<&Region>,
) -> Option<BucketLocationConstraint> {
    match region.map(|r| r.as_ref()) {
        None | Some(DEFAULT_S3_REGION) => None,
        Some(r) => Some(BucketLocationConstraint::from(r)),
    }
}

/// Create the template bucket. Failures are logged and reported through
/// the returned value, never as an error.
#[tracing::instrument(level = "info", skip_all)]
pub async fn create_bucket(
    client: &Client,
    config: &(impl AwsConfigProvider + S3Provider),
) -> BucketCreation {
    let bucket = config.get_bucket_name();
    let mut req = client.create_bucket().bucket(bucket);
    if let Some(constraint) =
        location_constraint(config.get_aws_config().region())
    {
        req = req.create_bucket_configuration(
            CreateBucketConfiguration::builder()
                .location_constraint(constraint)
                .build(),
        );
    }

    BucketCreation::from_result(bucket, req.send().await)
}

/// Read the local template document. Missing and empty files are errors.
#[tracing::instrument(level = "debug")]
pub async fn read_template(file_path: &Path) -> anyhow::Result<Vec<u8>> {
    let data = tokio::fs::read(file_path).await.map_err(|e| {
        anyhow!("Failed to read template {}: {e}", file_path.display())
    })?;
    if data.is_empty() {
        anyhow::bail!("Template {} is empty.", file_path.display());
    }
    Ok(data)
}

/// Upload the template document. Returns the content hash of the uploaded
/// bytes.
#[tracing::instrument(level = "info", skip(client, config, data))]
pub async fn upload_template(
    client: &Client,
    config: &(impl AwsConfigProvider + S3Provider),
    data: Vec<u8>,
    s3_key: &str,
) -> anyhow::Result<Box<str>> {
    let hash = crate::hasher::get_hash_value(&data);

    client
        .put_object()
        .bucket(config.get_bucket_name())
        .key(s3_key)
        .set_expected_bucket_owner(
            config.get_expected_bucket_owner().map(str::to_owned),
        )
        .body(ByteStream::from(data))
        .send()
        .await?;

    tracing::debug!(%hash, "Template uploaded.");

    Ok(hash.into())
}

/// Virtual-hosted URL of an object, as CloudFormation expects for
/// `TemplateURL`.
pub fn template_url(
    bucket: &str,
    region: &str,
    key: &str,
) -> anyhow::Result<Url> {
    let mut url =
        Url::parse(&format!("https://{bucket}.s3.{region}.amazonaws.com/"))?;
    url.path_segments_mut()
        .map_err(|_| anyhow!("Invalid bucket URL for {bucket}"))?
        .pop_if_empty()
        .extend(key.split('/'));
    Ok(url)
}

/// Delete every object in the bucket. Returns the number of deleted
/// objects.
#[tracing::instrument(level = "info", skip_all)]
pub async fn empty_bucket(
    client: &Client,
    config: &(impl AwsConfigProvider + S3Provider),
) -> anyhow::Result<usize> {
    let objects = client
        .list_objects_v2()
        .bucket(config.get_bucket_name())
        .set_expected_bucket_owner(
            config.get_expected_bucket_owner().map(str::to_owned),
        )
        .into_paginator()
        .send()
        .collect::<Result<Vec<_>, _>>()
        .await?
        .into_iter()
        .filter_map(|res| res.contents)
        .flatten()
        .filter_map(|o| o.key)
        .map(|key| ObjectIdentifier::builder().key(key).build())
        .collect::<Result<Vec<_>, _>>()?;

    if objects.is_empty() {
        tracing::info!("No objects to delete.");
        return Ok(0);
    }

    for batch in objects.chunks(DELETE_BATCH_SIZE) {
        tracing::debug!(count = batch.len(), "Deleting objects");
        let res = client
            .delete_objects()
            .bucket(config.get_bucket_name())
            .set_expected_bucket_owner(
                config.get_expected_bucket_owner().map(str::to_owned),
            )
            .delete(
                Delete::builder()
                    .set_objects(Some(batch.to_vec()))
                    .quiet(true)
                    .build()?,
            )
            .send()
            .await?;
        if let Some(err) = res.errors().first() {
            anyhow::bail!(
                "Failed to delete {}: {}",
                err.key().unwrap_or("<unknown>"),
                err.message().unwrap_or("unknown error")
            );
        }
    }

    Ok(objects.len())
}

#[tracing::instrument(level = "info", skip_all)]
pub async fn delete_bucket(
    client: &Client,
    config: &(impl AwsConfigProvider + S3Provider),
) -> anyhow::Result<()> {
    client
        .delete_bucket()
        .bucket(config.get_bucket_name())
        .set_expected_bucket_owner(
            config.get_expected_bucket_owner().map(str::to_owned),
        )
        .send()
        .await?;

    tracing::debug!("Bucket deleted.");

    Ok(())
}

/// Remove the bucket and its contents with the AWS CLI
/// (`aws s3 rb --force`).
#[tracing::instrument(level = "info")]
pub fn force_remove_bucket_cli(
    bucket: &str,
    profile: Option<&str>,
    region: Option<&str>,
) -> anyhow::Result<()> {
    let target = format!("s3://{bucket}");
    let extra = aws_cli_args(profile, region);

    run_cmd! {
        aws s3 rb $target --force $[extra]
    }?;

    Ok(())
}

fn aws_cli_args(profile: Option<&str>, region: Option<&str>) -> Vec<String> {
    let mut args = vec![];
    if let Some(profile) = profile {
        args.extend(["--profile".to_string(), profile.to_string()]);
    }
    if let Some(region) = region {
        args.extend(["--region".to_string(), region.to_string()]);
    }
    args
}

#[test]
fn bucket_creation_success_string() {
    let res = BucketCreation::from_result::<_, std::io::Error>(
        "workshop-bucket",
        Ok(()),
    );
    assert!(res.is_created());
    assert_eq!(res.to_string(), "Bucket workshop-bucket created.");
}

#[test]
fn bucket_creation_failure_string() {
    let res = BucketCreation::from_result::<(), _>(
        "workshop-bucket",
        Err(std::io::Error::other("BucketAlreadyOwnedByYou")),
    );
    assert!(!res.is_created());
    assert_eq!(
        res.to_string(),
        "Failed to create bucket workshop-bucket: BucketAlreadyOwnedByYou"
    );
}

#[test]
fn bucket_creation_sdk_failure_is_not_raised() {
    use aws_sdk_s3::{
        config::http::HttpResponse, error::SdkError,
        operation::create_bucket::CreateBucketError,
    };

    let err: SdkError<CreateBucketError, HttpResponse> =
        SdkError::construction_failure("missing region");
    let res = BucketCreation::from_result::<(), _>("b", Err(err));
    let msg = res.to_string();
    assert!(msg.starts_with("Failed to create bucket b: "), "{msg}");
    assert!(msg.contains("missing region"), "{msg}");
}

#[test]
fn location_constraint_skips_default_region() {
    assert_eq!(location_constraint(None), None);
    assert_eq!(
        location_constraint(Some(&Region::from_static("us-east-1"))),
        None
    );
    assert_eq!(
        location_constraint(Some(&Region::from_static("eu-west-1"))),
        Some(BucketLocationConstraint::EuWest1)
    );
}

#[test]
fn template_url_encodes_key() -> anyhow::Result<()> {
    let url = template_url("my-bucket", "eu-west-1", "cfn/ec2 ssm.yaml")?;
    assert_eq!(
        url.as_str(),
        "https://my-bucket.s3.eu-west-1.amazonaws.com/cfn/ec2%20ssm.yaml"
    );
    Ok(())
}

#[test]
fn aws_cli_args_test() {
    assert!(aws_cli_args(None, None).is_empty());
    assert_eq!(
        aws_cli_args(Some("workshop"), Some("eu-west-1")),
        ["--profile", "workshop", "--region", "eu-west-1"]
    );
}

#[tokio::test]
async fn create_bucket_sends_region_constraint() {
    use aws_sdk_s3::operation::create_bucket::CreateBucketOutput;
    use aws_smithy_mocks::{mock, mock_client};

    use super::config::StaticConfig;

    let create = mock!(Client::create_bucket)
        .match_requests(|req| {
            req.bucket() == Some("ssm-workshop-templates-alice")
                && req
                    .create_bucket_configuration()
                    .and_then(|c| c.location_constraint())
                    == Some(&BucketLocationConstraint::EuWest1)
        })
        .then_output(|| CreateBucketOutput::builder().build());
    let client = mock_client!(aws_sdk_s3, [&create]);

    let res = create_bucket(&client, &StaticConfig::new("eu-west-1")).await;

    assert!(res.is_created(), "{res}");
    assert_eq!(
        res.to_string(),
        "Bucket ssm-workshop-templates-alice created."
    );
    assert_eq!(create.num_calls(), 1);
}

#[tokio::test]
async fn create_bucket_reports_service_error() {
    use aws_sdk_s3::{
        operation::create_bucket::CreateBucketError,
        types::error::BucketAlreadyOwnedByYou,
    };
    use aws_smithy_mocks::{mock, mock_client};

    use super::config::StaticConfig;

    let create = mock!(Client::create_bucket).then_error(|| {
        CreateBucketError::BucketAlreadyOwnedByYou(
            BucketAlreadyOwnedByYou::builder().build(),
        )
    });
    let client = mock_client!(aws_sdk_s3, [&create]);

    let res = create_bucket(&client, &StaticConfig::new("us-east-1")).await;

    assert!(!res.is_created());
    let msg = res.to_string();
    assert!(
        msg.starts_with(
            "Failed to create bucket ssm-workshop-templates-alice: \
             service error"
        ),
        "{msg}"
    );
    assert!(msg.contains("BucketAlreadyOwnedByYou"), "{msg}");
}

#[tokio::test]
async fn empty_bucket_deletes_in_batches() {
    use aws_sdk_s3::{
        operation::{
            delete_objects::DeleteObjectsOutput,
            list_objects_v2::ListObjectsV2Output,
        },
        types::Object,
    };
    use aws_smithy_mocks::{mock, mock_client, RuleMode};

    use super::config::StaticConfig;

    const OWNER: &str = "123456789012";

    let list = mock!(Client::list_objects_v2)
        .match_requests(|req| req.expected_bucket_owner() == Some(OWNER))
        .then_output(|| {
            ListObjectsV2Output::builder()
                .set_contents(Some(
                    (0..1500)
                        .map(|i| {
                            Object::builder()
                                .key(format!("templates/{i}.yaml"))
                                .build()
                        })
                        .collect(),
                ))
                .is_truncated(false)
                .build()
        });
    let batch_of = |size: usize| {
        mock!(Client::delete_objects)
            .match_requests(move |req| {
                req.expected_bucket_owner() == Some(OWNER)
                    && req.delete().map(|d| d.objects().len()) == Some(size)
            })
            .then_output(|| DeleteObjectsOutput::builder().build())
    };
    let full = batch_of(1000);
    let rest = batch_of(500);
    let client = mock_client!(
        aws_sdk_s3,
        RuleMode::MatchAny,
        [&list, &full, &rest]
    );

    let config = StaticConfig {
        bucket_owner: Some(OWNER),
        ..StaticConfig::new("eu-west-1")
    };
    let count = empty_bucket(&client, &config).await.unwrap();

    assert_eq!(count, 1500);
    assert_eq!(list.num_calls(), 1);
    assert_eq!(full.num_calls(), 1);
    assert_eq!(rest.num_calls(), 1);
}

#[tokio::test]
async fn read_template_rejects_missing_and_empty() -> anyhow::Result<()> {
    let dir = std::env::temp_dir();
    let missing = dir.join(format!("{}.yaml", uuid::Uuid::new_v4()));
    let err = read_template(&missing).await.unwrap_err().to_string();
    assert!(err.starts_with("Failed to read template"), "{err}");

    let empty = dir.join(format!("{}.yaml", uuid::Uuid::new_v4()));
    std::fs::write(&empty, "")?;
    let res = read_template(&empty).await;
    std::fs::remove_file(&empty)?;
    assert!(res.unwrap_err().to_string().ends_with("is empty."));

    let data = read_template(Path::new(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../templates/ec2-ssm.yaml"
    )))
    .await?;
    assert!(!data.is_empty());
    Ok(())
}
