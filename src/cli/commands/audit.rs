use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::config::Config;
use crate::db::{AuditQuery, Store};

pub async fn cmd_audit(
    config: &Config,
    days: u32,
    actor: Option<&str>,
    limit: u64,
) -> anyhow::Result<()> {
    let actor = match actor.map(Uuid::parse_str).transpose() {
        Ok(actor) => actor,
        Err(_) => {
            println!("Invalid actor id.");
            return Ok(());
        }
    };

    let store = Store::new(&config.general.database_path).await?;
    let entries = store
        .query_audit(&AuditQuery {
            actor,
            since: Some(Utc::now() - Duration::days(i64::from(days))),
            limit: Some(limit),
            ..AuditQuery::default()
        })
        .await?;

    if entries.is_empty() {
        println!("No audit entries in the last {days} days.");
        return Ok(());
    }

    println!(
        "{:<20} {:<7} {:<36} {:<16} {}",
        "Time", "Action", "Actor", "Resource", "IP"
    );
    println!("{:-<110}", "");

    for entry in entries {
        let actor = entry
            .actor_id
            .map_or_else(|| "-".to_string(), |id| id.to_string());
        let resource = entry.resource_type.as_deref().unwrap_or("-");
        let ip = entry.ip_address.as_deref().unwrap_or("-");
        println!(
            "{:<20} {:<7} {:<36} {:<16} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.action.as_str(),
            actor,
            resource,
            ip
        );
    }
    Ok(())
}
