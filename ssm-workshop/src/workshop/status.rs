use super::{
    cloudformation::{self, load_stack_summary, StackSummary},
    ec2::describe_instance,
    WorkshopConfig, IND,
};
use crate::settings::WorkshopSettings;

/// Print the stack status, its outputs and, when the stack exports an
/// instance id, the instance state.
#[tracing::instrument(level = "info", skip_all)]
pub async fn print_status(
    config: &impl WorkshopConfig,
    settings: &WorkshopSettings,
) -> anyhow::Result<()> {
    println!();

    let client = cloudformation::get_client(config);
    let Some(summary) = load_stack_summary(&client, config).await? else {
        println!("Stack {} does not exist.", config.get_stack_name());
        println!();
        return Ok(());
    };

    print_summary(&summary);

    let instance_id = summary
        .outputs
        .get(&settings.outputs.instance_id_key)
        .and_then(|v| v.as_str());
    if let Some(instance_id) = instance_id {
        let instance = describe_instance(config, instance_id).await?;
        println!("- instance {}", instance.instance_id);
        println!("{IND}state: {}", instance.state);
        if let Some(t) = &instance.instance_type {
            println!("{IND}type: {t}");
        }
        if let Some(ip) = &instance.private_ip {
            println!("{IND}private ip: {ip}");
        }
    }

    println!();

    Ok(())
}

fn print_summary(summary: &StackSummary) {
    println!("- stack {}", summary.name);
    println!("{IND}status: {}", summary.status);
    if let Some(reason) = &summary.status_reason {
        println!("{IND}reason: {reason}");
    }
    if let Some(created) = &summary.created {
        println!("{IND}created: {created}");
    }
    if let Some(outputs) = summary.outputs.as_object().filter(|o| !o.is_empty())
    {
        println!("{IND}outputs:");
        for (k, v) in outputs {
            println!("{IND}{IND}{k}: {}", v.as_str().unwrap_or_default());
        }
    }
}
