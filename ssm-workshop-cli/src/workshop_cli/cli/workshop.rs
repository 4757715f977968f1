use std::{io::Write, sync::Arc};

use aws_config::Region;
use ssm_workshop::{
    settings::WorkshopSettings,
    workshop::{
        config::{AwsConfigProvider, CloudFormationStackProvider, S3Provider},
        iam::ensure_service_role,
        provision::{provision, ProvisionArgs},
        status::print_status,
        teardown::teardown,
    },
};

use super::{Cli, Down, Role};

impl Cli {
    /// Settings file overlaid with the command-line overrides.
    fn load_settings(&self) -> anyhow::Result<WorkshopSettings> {
        let mut settings = WorkshopSettings::load(self.config.as_deref())?;
        if let Some(stack_name) = &self.stack_name {
            settings.stack_name = stack_name.clone();
        }
        if let Some(placeholder) = &self.bucket_placeholder {
            settings.bucket_placeholder = Some(placeholder.clone());
        }
        if let Some(template) = &self.template {
            settings.template_path = template.clone();
        }
        if let Some(interval) = self.poll_interval {
            settings.poll_interval = interval;
        }
        tracing::debug!(?settings, "Loaded settings");
        Ok(settings)
    }

    async fn load_aws(&self) -> AwsSession {
        let mut aws_config = aws_config::from_env();
        if let Some(profile) = &self.profile {
            aws_config = aws_config.profile_name(profile.as_ref());
        }
        if let Some(region) = &self.region {
            aws_config =
                aws_config.region(Region::new(region.as_ref().to_owned()));
        }
        AwsSession {
            aws_config: aws_config.load().await,
            profile: self.profile.clone(),
        }
    }

    async fn load_workshop(
        &self,
        settings: &WorkshopSettings,
    ) -> anyhow::Result<WorkshopSession> {
        let bucket_name = settings.bucket_name()?;
        let aws = self.load_aws().await;
        // Fail early rather than halfway through the workflow.
        aws.get_region()?;
        Ok(WorkshopSession {
            aws,
            stack_name: settings.stack_name.as_str().into(),
            bucket_name,
            account_id: self.account_id.clone(),
        })
    }

    pub async fn run_role(&self, args: &Role) -> anyhow::Result<()> {
        let settings = self.load_settings()?;
        if !args.agree {
            confirm(include_str!("disclaimer.txt"))?;
        }

        let aws = self.load_aws().await;
        let arn = ensure_service_role(&aws, &settings.role).await?;
        println!("{arn}");

        Ok(())
    }

    pub async fn run_up(&self, args: &ProvisionArgs) -> anyhow::Result<()> {
        let settings = self.load_settings()?;
        let session = self.load_workshop(&settings).await?;
        let report = provision(&session, &settings, args).await?;
        tracing::debug!(?report, "Provisioned");

        Ok(())
    }

    pub async fn run_status(&self) -> anyhow::Result<()> {
        let settings = self.load_settings()?;
        let session = self.load_workshop(&settings).await?;
        print_status(&session, &settings).await
    }

    pub async fn run_down(&self, args: &Down) -> anyhow::Result<()> {
        let settings = self.load_settings()?;
        let session = self.load_workshop(&settings).await?;
        if !args.yes {
            confirm(&format!(
                "This deletes stack {} and bucket {} with all its objects.\n\
                 Type `yes` to continue.",
                session.stack_name, session.bucket_name
            ))?;
        }

        teardown(&session, &args.teardown).await
    }
}

fn confirm(message: &str) -> anyhow::Result<()> {
    println!("\n\n{}\n", message.trim_end());

    print!("> ");
    std::io::stdout().flush()?;
    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    if input.trim().to_lowercase() != "yes" {
        anyhow::bail!("User did not confirm.");
    }

    Ok(())
}

struct AwsSession {
    aws_config: aws_config::SdkConfig,
    profile: Option<Arc<str>>,
}

impl AwsConfigProvider for AwsSession {
    fn get_aws_config(&self) -> &aws_config::SdkConfig { &self.aws_config }

    fn get_profile(&self) -> Option<&str> { self.profile.as_deref() }
}

struct WorkshopSession {
    aws: AwsSession,
    stack_name: Box<str>,
    bucket_name: Box<str>,
    account_id: Option<Arc<str>>,
}

impl AwsConfigProvider for WorkshopSession {
    fn get_aws_config(&self) -> &aws_config::SdkConfig {
        self.aws.get_aws_config()
    }

    fn get_profile(&self) -> Option<&str> { self.aws.get_profile() }
}

impl CloudFormationStackProvider for WorkshopSession {
    fn get_stack_name(&self) -> &str { &self.stack_name }
}

impl S3Provider for WorkshopSession {
    fn get_bucket_name(&self) -> &str { &self.bucket_name }

    fn get_expected_bucket_owner(&self) -> Option<&str> {
        self.account_id.as_deref()
    }
}
