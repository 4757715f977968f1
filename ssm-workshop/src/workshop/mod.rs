pub mod provision;
pub mod status;
pub mod teardown;

pub mod cloudformation;
pub mod config;
pub mod ec2;
pub mod iam;
pub mod s3;

use self::config::{AwsConfigProvider, CloudFormationStackProvider, S3Provider};

/// Everything the workshop steps need to reach AWS.
pub trait WorkshopConfig:
    AwsConfigProvider + CloudFormationStackProvider + S3Provider
{
}

impl<T> WorkshopConfig for T where
    T: AwsConfigProvider + CloudFormationStackProvider + S3Provider
{
}

const IND: &str = "    ";
