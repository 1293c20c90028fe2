use std::io::{BufRead, Write};

use {
    anyhow::{Context as _, Result},
    clap::Subcommand,
    drivelink_oauth::{AuthorizationCode, CredentialStore, now_unix},
    tracing::info,
    url::Url,
};

use crate::{Context, exchanger_for};

#[derive(Subcommand)]
pub enum AuthAction {
    /// Authorize this client and store the resulting credential.
    Login {
        /// Account name to store the credential under.
        #[arg(long, default_value = "default")]
        account: String,
        /// Print the authorization URL instead of opening a browser.
        #[arg(long, default_value_t = false)]
        no_browser: bool,
    },
    /// Show stored accounts and token expiry.
    Status,
    /// Forget a stored credential.
    Logout {
        #[arg(long, default_value = "default")]
        account: String,
    },
    /// Refresh a stored credential now.
    Refresh {
        #[arg(long, default_value = "default")]
        account: String,
    },
}

pub async fn handle_auth(action: AuthAction, ctx: &Context) -> Result<()> {
    match action {
        AuthAction::Login {
            account,
            no_browser,
        } => login(ctx, &account, no_browser).await,
        AuthAction::Status => status(ctx),
        AuthAction::Logout { account } => logout(ctx, &account),
        AuthAction::Refresh { account } => refresh(ctx, &account).await,
    }
}

async fn login(ctx: &Context, account: &str, no_browser: bool) -> Result<()> {
    let config = ctx.load_config()?;
    let exchanger = exchanger_for(&config);
    let req = exchanger.start()?;

    if no_browser || open::that(&req.url).is_err() {
        println!("Visit this URL to authorize drivelink:\n{}", req.url);
    } else {
        println!("Opening browser for authorization...");
    }

    print!("Paste the full redirect URL: ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("reading redirect URL")?;

    let code = parse_redirect(&line, &req.state)?;

    println!("Exchanging code for tokens...");
    let credential = exchanger
        .exchange(AuthorizationCode::new(code).with_verifier(req.pkce.verifier))
        .await?;

    ctx.store.save(account, &credential)?;
    info!(account, "stored credential");
    println!(
        "Logged in as '{account}' (token valid for {})",
        format_remaining(credential.remaining_secs())
    );
    Ok(())
}

/// Extract the authorization code from the redirect the user landed on.
fn parse_redirect(input: &str, expected_state: &str) -> Result<String> {
    let url = Url::parse(input.trim()).context("redirect is not a valid URL")?;

    let mut code = None;
    let mut state = None;
    let mut error = None;
    let mut description = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => description = Some(value.into_owned()),
            _ => {},
        }
    }

    if let Some(error) = error {
        match description {
            Some(description) => anyhow::bail!("authorization denied: {error}: {description}"),
            None => anyhow::bail!("authorization denied: {error}"),
        }
    }
    if state.as_deref() != Some(expected_state) {
        anyhow::bail!("state mismatch in redirect; start the login again");
    }
    match code {
        Some(code) if !code.is_empty() => Ok(code),
        _ => anyhow::bail!("redirect does not contain an authorization code"),
    }
}

fn status(ctx: &Context) -> Result<()> {
    let accounts = ctx.store.list()?;
    if accounts.is_empty() {
        println!("No stored accounts in {}.", ctx.store.path().display());
        return Ok(());
    }
    let now = now_unix();
    for account in accounts {
        if let Some(credential) = ctx.store.load(&account)? {
            let expiry = if credential.is_expired_at(now) {
                "expired".to_string()
            } else {
                format!(
                    "valid ({} remaining)",
                    format_remaining(credential.expires_at - now)
                )
            };
            println!("{account} [{expiry}]");
        }
    }
    Ok(())
}

fn logout(ctx: &Context, account: &str) -> Result<()> {
    if ctx.store.delete(account)? {
        println!("Logged out '{account}'");
    } else {
        println!("No credential stored for '{account}'");
    }
    Ok(())
}

async fn refresh(ctx: &Context, account: &str) -> Result<()> {
    let config = ctx.load_config()?;
    let Some(credential) = ctx.store.load(account)? else {
        anyhow::bail!("account '{account}' is not logged in");
    };

    let exchanger = exchanger_for(&config);
    let refreshed = match exchanger.refresh(&credential).await {
        Ok(refreshed) => refreshed,
        Err(e) if e.requires_reauthorization() => {
            anyhow::bail!("{e}; run `drivelink auth login --account {account}`")
        },
        Err(e) => return Err(e.into()),
    };

    ctx.store.save(account, &refreshed)?;
    println!(
        "Refreshed '{account}' (token valid for {})",
        format_remaining(refreshed.remaining_secs())
    );
    Ok(())
}

fn format_remaining(secs: u64) -> String {
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    format!("{hours}h {mins}m")
}
