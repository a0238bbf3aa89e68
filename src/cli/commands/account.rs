use chrono::Utc;

use super::{find_account, open};
use crate::config::Config;
use crate::domain::{AccountId, Role};
use crate::services::NewAccount;

#[allow(clippy::too_many_arguments)]
pub async fn cmd_create_account(
    config: &Config,
    login_name: &str,
    employee_code: &str,
    name: &str,
    role: &str,
    password: &str,
    superuser: bool,
    multi_unit: bool,
    no_forced_change: bool,
) -> anyhow::Result<()> {
    let role: Role = match role.parse() {
        Ok(role) => role,
        Err(e) => {
            println!("{e}");
            return Ok(());
        }
    };

    let (state, ctx) = open(config).await?;
    let request = NewAccount {
        login_name: login_name.to_string(),
        employee_code: employee_code.to_string(),
        display_name: name.to_string(),
        password: password.to_string(),
        role,
        is_superuser: superuser,
        is_multi_unit: multi_unit || superuser,
        must_change_password: !no_forced_change,
    };

    match state.accounts.create_account(&ctx, request).await {
        Ok(account) => {
            println!("✓ Created account {}", account.login_name);
            println!("  ID:            {}", account.id);
            println!("  Employee code: {}", account.employee_code);
            println!("  Role:          {}", account.role);
            if account.is_multi_unit {
                println!("  Access:        all centers");
            } else {
                println!("  Access:        none yet, use 'centergate assign'");
            }
        }
        Err(e) => println!("✗ {e}"),
    }
    Ok(())
}

pub async fn cmd_unlock(config: &Config, identifier: &str) -> anyhow::Result<()> {
    let (state, ctx) = open(config).await?;
    let Some(account) = find_account(&state, identifier).await? else {
        return Ok(());
    };

    let account = state
        .accounts
        .unlock(&ctx, AccountId::from(account.id))
        .await?;
    println!("✓ Unlocked {}", account.login_name);
    Ok(())
}

pub async fn cmd_issue_reset_token(config: &Config, identifier: &str) -> anyhow::Result<()> {
    let (state, ctx) = open(config).await?;

    match state.auth.issue_reset_token(identifier, &ctx).await? {
        Some(token) => {
            println!("Reset token for {identifier} (shown once):");
            println!("{token}");
            println!(
                "Valid for {} hours.",
                config.security.reset_token_hours
            );
        }
        None => println!("No active account matches '{identifier}'."),
    }
    Ok(())
}

pub async fn cmd_accounts(config: &Config, locked: bool, expired: bool) -> anyhow::Result<()> {
    let (state, _) = open(config).await?;
    let now = Utc::now();

    let (accounts, empty) = if locked {
        (state.accounts.locked_accounts(now).await?, "No locked accounts.")
    } else if expired {
        (
            state.accounts.password_expired(now).await?,
            "No accounts with expired passwords.",
        )
    } else {
        (state.accounts.list_accounts().await?, "No accounts.")
    };

    if accounts.is_empty() {
        println!("{empty}");
        return Ok(());
    }

    println!(
        "{:<20} {:<10} {:<13} {:<8} {:<20} {}",
        "Login", "Code", "Role", "Failed", "Locked until", "Password changed"
    );
    println!("{:-<95}", "");

    for account in accounts {
        let locked_until = account
            .locked_until
            .filter(|until| *until > now)
            .map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M").to_string());
        let changed = if account.must_change_password {
            "change required".to_string()
        } else {
            account
                .password_changed_at
                .map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d").to_string())
        };
        println!(
            "{:<20} {:<10} {:<13} {:<8} {:<20} {}",
            account.login_name,
            account.employee_code,
            account.role.to_string(),
            account.failed_attempt_count,
            locked_until,
            changed
        );
    }
    Ok(())
}
