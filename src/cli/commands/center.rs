use super::{find_account, open};
use crate::config::Config;
use crate::domain::{AccountId, UnitId};
use crate::services::NewCenter;

pub async fn cmd_create_center(
    config: &Config,
    code: &str,
    name: &str,
    capacity: i32,
) -> anyhow::Result<()> {
    let (state, ctx) = open(config).await?;
    let request = NewCenter {
        code: code.to_string(),
        name: name.to_string(),
        capacity,
        administrator: None,
    };

    match state.gate.create_center(&ctx, request).await {
        Ok(center) => {
            println!("✓ Created center {} ({})", center.code, center.name);
            println!("  ID: {}", center.id);
        }
        Err(e) => println!("✗ {e}"),
    }
    Ok(())
}

pub async fn cmd_assign(
    config: &Config,
    identifier: &str,
    center_code: &str,
    primary: bool,
) -> anyhow::Result<()> {
    let (state, ctx) = open(config).await?;
    let Some(account) = find_account(&state, identifier).await? else {
        return Ok(());
    };

    let code = center_code.trim().to_ascii_uppercase();
    let Some(center) = state.store.get_center_by_code(&code).await? else {
        println!("No center with code {code}.");
        return Ok(());
    };

    match state
        .gate
        .assign(
            &ctx,
            AccountId::from(account.id),
            UnitId::from(center.id),
            primary,
        )
        .await
    {
        Ok(_) => {
            let kind = if primary { "primary" } else { "secondary" };
            println!("✓ {} assigned to {} ({kind})", account.login_name, center.code);
        }
        Err(e) => println!("✗ {e}"),
    }
    Ok(())
}
