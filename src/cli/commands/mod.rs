mod account;
mod audit;
mod center;

pub use account::{cmd_accounts, cmd_create_account, cmd_issue_reset_token, cmd_unlock};
pub use audit::cmd_audit;
pub use center::{cmd_assign, cmd_create_center};

use crate::config::Config;
use crate::context::RequestContext;
use crate::db::{Account, IdentityResolution};
use crate::state::SharedState;

const CLI_AGENT: &str = "centergate-cli";

async fn open(config: &Config) -> anyhow::Result<(SharedState, RequestContext)> {
    let state = SharedState::new(config.clone()).await?;
    Ok((state, RequestContext::system(CLI_AGENT)))
}

async fn find_account(state: &SharedState, identifier: &str) -> anyhow::Result<Option<Account>> {
    match state.store.resolve_identity(identifier).await? {
        IdentityResolution::Found(account) => Ok(Some(*account)),
        IdentityResolution::NotFound => {
            println!("No account matches '{identifier}'.");
            Ok(None)
        }
        IdentityResolution::Ambiguous(count) => {
            println!("'{identifier}' matches {count} accounts; resolve the conflict first.");
            Ok(None)
        }
    }
}
