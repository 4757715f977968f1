use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Deserializer};

/// Workshop settings, read from an optional TOML file. Every field has a
/// default so an empty file is valid.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkshopSettings {
    pub stack_name: String,
    pub bucket_prefix: String,
    /// User-supplied part of the bucket name, bucket names are global.
    pub bucket_placeholder: Option<String>,
    pub template_path: PathBuf,
    pub template_key: Option<String>,
    #[serde(deserialize_with = "deserialize_duration")]
    pub poll_interval: Duration,
    pub outputs: OutputKeys,
    pub role: RoleSettings,
}

/// Stack output keys the workshop template exports.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputKeys {
    pub session_url_key: String,
    pub console_url_key: String,
    pub instance_id_key: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RoleSettings {
    pub name: String,
    pub inline_policy_name: Option<String>,
    pub trusted_services: Vec<String>,
}

impl Default for WorkshopSettings {
    fn default() -> Self {
        Self {
            stack_name: "ssm-workshop".into(),
            bucket_prefix: "ssm-workshop-templates".into(),
            bucket_placeholder: None,
            template_path: PathBuf::from("templates/ec2-ssm.yaml"),
            template_key: None,
            poll_interval: Duration::from_secs(15),
            outputs: OutputKeys::default(),
            role: RoleSettings::default(),
        }
    }
}

impl Default for OutputKeys {
    fn default() -> Self {
        Self {
            session_url_key: "SessionManagerUrl".into(),
            console_url_key: "InstanceConsoleUrl".into(),
            instance_id_key: "InstanceId".into(),
        }
    }
}

impl Default for RoleSettings {
    fn default() -> Self {
        Self {
            name: "ResearchWorkshops-AmazonSageMaker-ExecutionRole".into(),
            inline_policy_name: Some("Inline-Research-Workshops-Policy".into()),
            trusted_services: vec![
                "sagemaker.amazonaws.com".into(),
                "robomaker.amazonaws.com".into(),
                "glue.amazonaws.com".into(),
            ],
        }
    }
}

/// Parse a human duration such as `15s` or `30m`. Zero is rejected.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let duration = duration_str::parse(s).map_err(|e| e.to_string())?;
    if duration.is_zero() {
        return Err(format!("duration `{s}` must be greater than zero"));
    }
    Ok(duration)
}

fn deserialize_duration<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Duration, D::Error> {
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(serde::de::Error::custom)
}

impl WorkshopSettings {
    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let toml_doc = contents.parse::<toml_edit::DocumentMut>()?;
        Ok(toml_edit::de::from_document(toml_doc)?)
    }

    /// Load settings from `path`, or the defaults when no path is given.
    #[tracing::instrument(level = "debug")]
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read settings {}: {e}", path.display())
        })?;
        Self::from_toml(&content)
    }

    pub fn bucket_name(&self) -> anyhow::Result<Box<str>> {
        bucket_name(
            &self.bucket_prefix,
            self.bucket_placeholder.as_deref().unwrap_or_default(),
        )
    }

    /// Object key of the uploaded template. Falls back to the template's
    /// file name.
    pub fn template_key(&self) -> anyhow::Result<Box<str>> {
        if let Some(key) = &self.template_key {
            return Ok(key.as_str().into());
        }
        self.template_path
            .file_name()
            .and_then(|n| n.to_str())
            .map(Into::into)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Cannot derive template key from {}",
                    self.template_path.display()
                )
            })
    }
}

pub fn bucket_name(
    prefix: &str,
    placeholder: &str,
) -> anyhow::Result<Box<str>> {
    let placeholder = placeholder.trim();
    if placeholder.is_empty() {
        anyhow::bail!(
            "Bucket placeholder is not set. Pass `--bucket-placeholder` or \
             set `bucket_placeholder` in the settings file."
        );
    }
    Ok(format!("{prefix}-{placeholder}").to_lowercase().into())
}

#[test]
fn defaults_from_empty_file() -> anyhow::Result<()> {
    let settings = WorkshopSettings::from_toml("")?;
    assert_eq!(settings.stack_name, "ssm-workshop");
    assert_eq!(settings.poll_interval, Duration::from_secs(15));
    assert_eq!(settings.outputs.session_url_key, "SessionManagerUrl");
    assert_eq!(settings.role.trusted_services.len(), 3);
    assert_eq!(
        settings.template_path,
        PathBuf::from("templates/ec2-ssm.yaml")
    );
    assert_eq!(settings.template_key()?.as_ref(), "ec2-ssm.yaml");
    assert!(settings.bucket_name().is_err());
    Ok(())
}

#[test]
fn overrides_from_file() -> anyhow::Result<()> {
    let settings = WorkshopSettings::from_toml(
        r#"
stack_name = "ec2-ssm"
bucket_placeholder = "Alice"
template_path = "templates/workshop.yaml"
poll_interval = "5s"

[outputs]
console_url_key = "EC2Url"
"#,
    )?;
    assert_eq!(settings.stack_name, "ec2-ssm");
    assert_eq!(settings.poll_interval, Duration::from_secs(5));
    assert_eq!(
        settings.bucket_name()?.as_ref(),
        "ssm-workshop-templates-alice"
    );
    assert_eq!(settings.template_key()?.as_ref(), "workshop.yaml");
    assert_eq!(settings.outputs.console_url_key, "EC2Url");
    assert_eq!(settings.outputs.session_url_key, "SessionManagerUrl");
    Ok(())
}

#[test]
fn rejects_unknown_keys_and_bad_durations() {
    assert!(WorkshopSettings::from_toml("stack = \"x\"").is_err());
    assert!(WorkshopSettings::from_toml("poll_interval = \"soon\"").is_err());
    assert!(WorkshopSettings::from_toml("poll_interval = \"0s\"").is_err());
}

#[test]
fn zero_duration_is_rejected() {
    assert!(parse_duration("0s").is_err());
    assert!(parse_duration("0m").is_err());
    assert_eq!(parse_duration("1s"), Ok(Duration::from_secs(1)));
    assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
}

#[test]
fn default_template_path_points_at_bundled_template() {
    let bundled = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join(WorkshopSettings::default().template_path);
    assert!(bundled.is_file(), "{}", bundled.display());
}

#[test]
fn bucket_name_requires_placeholder() {
    assert!(bucket_name("prefix", "  ").is_err());
    assert_eq!(bucket_name("Prefix", "bob").unwrap().as_ref(), "prefix-bob");
}

#[test]
fn example_settings_match_bundled_template() -> anyhow::Result<()> {
    let settings = WorkshopSettings::from_toml(include_str!(
        "../../workshop.example.toml"
    ))?;
    assert_eq!(
        settings.bucket_name()?.as_ref(),
        "ssm-workshop-templates-your-alias"
    );

    let template = include_str!("../../templates/ec2-ssm.yaml");
    for key in [
        &settings.outputs.session_url_key,
        &settings.outputs.console_url_key,
        &settings.outputs.instance_id_key,
    ] {
        assert!(template.contains(&format!("\n  {key}:\n")), "{key}");
    }
    Ok(())
}
