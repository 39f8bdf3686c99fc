use std::{
    future::Future,
    io::{self, Write},
    path::PathBuf,
    time::Duration,
};

use clap::Parser;
use color_eyre::eyre::WrapErr;
use grantor::{
    exchange::{HttpTokenExchanger, GOOGLE_TOKEN_URL},
    IssuedToken, Scopes, ServiceAccount, TokenLifetimeConfig, TokenManager,
};
use grantor_clock::{Clock, DurationSecs, System};
use tokio::time;

/// Clears the current terminal line and returns the cursor to its start
const CLEAR_LINE: &str = "\r\x1b[K";

/// Obtain an access token for a service account
#[derive(Debug, Parser)]
#[command(name = "grantor", version, about)]
struct Opts {
    /// Service account key file path
    #[arg(env = "GRANTOR_KEY_FILE")]
    path: PathBuf,

    /// Authentication scopes, either bare names or absolute URLs
    #[arg(
        short,
        long = "scope",
        env = "GRANTOR_SCOPES",
        value_delimiter = ',',
        required = true
    )]
    scopes: Vec<String>,

    /// Only show the access token
    #[arg(short, long)]
    terse: bool,

    /// Token lifetime in seconds (max. 3600)
    #[arg(short, long, env = "GRANTOR_LIFETIME", default_value_t = 3600)]
    lifetime: u64,

    /// Seconds before expiry at which the token is no longer handed out
    #[arg(short = 'm', long, env = "GRANTOR_SAFETY_MARGIN")]
    safety_margin: Option<u64>,

    /// The token endpoint; defaults to the key file's `token_uri`
    #[arg(long, env = "GRANTOR_TOKEN_URL")]
    token_url: Option<reqwest::Url>,
}

impl Opts {
    fn lifetime_config(&self) -> color_eyre::Result<TokenLifetimeConfig> {
        let config = TokenLifetimeConfig::new(DurationSecs(self.lifetime))?;
        match self.safety_margin {
            Some(margin) => Ok(config.with_safety_margin(DurationSecs(margin))?),
            None => Ok(config),
        }
    }

    fn token_url(&self, account: &ServiceAccount) -> color_eyre::Result<reqwest::Url> {
        if let Some(url) = &self.token_url {
            return Ok(url.clone());
        }

        let raw = account.token_uri().unwrap_or(GOOGLE_TOKEN_URL);
        raw.parse()
            .wrap_err_with(|| format!("key file has an invalid token_uri: {raw}"))
    }
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let lifetime_config = opts.lifetime_config()?;
    let scopes = Scopes::normalized(&opts.scopes)?;

    let account = ServiceAccount::from_file(&opts.path)
        .await
        .wrap_err_with(|| format!("could not load service account from {}", opts.path.display()))?;

    let token_url = opts.token_url(&account)?;
    let client = reqwest::Client::builder().https_only(true).build()?;
    let exchanger = HttpTokenExchanger::new(client).with_token_url(token_url);

    let manager = TokenManager::new(account, scopes, lifetime_config, exchanger);
    let token = manager
        .get_token()
        .await
        .wrap_err("error retrieving the access token")?;

    if opts.terse {
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{}", token.access_token().as_str())?;
        return Ok(());
    }

    let shutdown = shutdown_signal()?;
    let mut stdout = io::stdout().lock();

    writeln!(stdout, "{}", details(manager.subject().as_str(), manager.scopes(), &token))?;
    writeln!(stdout, "Status:")?;
    stdout.flush()?;
    drop(stdout);

    tokio::select! {
        res = countdown(&token) => Ok(res?),
        () = shutdown => {
            let mut stdout = io::stdout().lock();
            write!(stdout, "{CLEAR_LINE}")?;
            stdout.flush()?;
            Ok(())
        }
    }
}

/// Resolves once the process is asked to stop by Ctrl-C or, on Unix, `SIGTERM`
///
/// Handlers are installed before this returns.
#[cfg(unix)]
fn shutdown_signal() -> io::Result<impl Future<Output = ()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => tracing::debug!("received SIGINT"),
            _ = terminate.recv() => tracing::debug!("received SIGTERM"),
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> io::Result<impl Future<Output = ()>> {
    Ok(async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "unable to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    })
}

fn details(email: &str, scopes: &Scopes, token: &IssuedToken) -> String {
    let scopes = scopes
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Email:\n{email}\n\nScopes:\n{scopes}\n\nAccess Token:\n{}\n",
        token.access_token().as_str()
    )
}

fn status_line(remaining: DurationSecs) -> String {
    if remaining.0 == 0 {
        format!("{CLEAR_LINE}Expired\n")
    } else {
        format!("{CLEAR_LINE}Valid for another {} seconds", remaining.0)
    }
}

async fn countdown(token: &IssuedToken) -> io::Result<()> {
    let mut interval = time::interval(Duration::from_secs(1));
    loop {
        interval.tick().await;

        let remaining = token.until_expired_at(System.now());
        let mut stdout = io::stdout().lock();
        stdout.write_all(status_line(remaining).as_bytes())?;
        stdout.flush()?;

        if remaining.0 == 0 {
            tracing::debug!(expiry = token.expiry().0, "access token expired");
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_definition_is_consistent() {
        Opts::command().debug_assert();
    }

    #[test]
    fn scopes_are_required() {
        let err = Opts::try_parse_from(["grantor", "key.json"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn repeated_scope_flags_accumulate() -> color_eyre::Result<()> {
        let opts = Opts::try_parse_from([
            "grantor",
            "key.json",
            "-s",
            "drive.readonly",
            "--scope",
            "https://www.googleapis.com/auth/cloud-platform",
        ])?;

        assert_eq!(
            opts.scopes,
            ["drive.readonly", "https://www.googleapis.com/auth/cloud-platform"]
        );
        assert_eq!(opts.lifetime, 3600);
        assert!(!opts.terse);
        assert_eq!(opts.safety_margin, None);
        assert_eq!(opts.path, PathBuf::from("key.json"));
        Ok(())
    }

    #[test]
    fn lifetime_above_maximum_is_rejected() -> color_eyre::Result<()> {
        let opts = Opts::try_parse_from(["grantor", "key.json", "-s", "x", "-l", "3601"])?;
        assert!(opts.lifetime_config().is_err());
        Ok(())
    }

    #[test]
    fn safety_margin_is_applied() -> color_eyre::Result<()> {
        let opts =
            Opts::try_parse_from(["grantor", "key.json", "-s", "x", "-t", "-l", "60", "-m", "5"])?;
        let config = opts.lifetime_config()?;

        assert!(opts.terse);
        assert_eq!(config.lifetime(), DurationSecs(60));
        assert_eq!(config.safety_margin(), DurationSecs(5));
        Ok(())
    }

    #[test]
    fn status_line_counts_down_then_expires() {
        assert_eq!(
            status_line(DurationSecs(42)),
            "\r\x1b[KValid for another 42 seconds"
        );
        assert_eq!(status_line(DurationSecs(0)), "\r\x1b[KExpired\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn terminate_signal_resolves_shutdown() -> color_eyre::Result<()> {
        let shutdown = shutdown_signal()?;

        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()?;
        assert!(status.success());

        time::timeout(Duration::from_secs(5), shutdown).await?;
        Ok(())
    }
}
