use clap::Parser;
use reqwest::Client;
use reqwest_middleware::ClientBuilder;
use tokenward::identity::IdentityProvider;
use tokenward::refresh::{HttpRefreshBackend, RefreshCoordinator};
use tokenward::store::{FileStorage, TokenStore};
use tokenward::{AccessToken, RefreshToken};
use tokenward_reqwest::BearerAuthMiddleware;

#[derive(Debug, Parser)]
struct Opts {
    /// The URL of the protected resource to fetch
    #[clap(short, long, env)]
    resource_url: reqwest::Url,

    /// The refresh endpoint used to renew the session
    #[clap(short = 'u', long, env)]
    refresh_url: reqwest::Url,

    /// An initial access token, if starting a fresh session
    #[clap(long, env, hide_env_values = true)]
    access_token: Option<AccessToken>,

    /// An initial refresh token, if starting a fresh session
    #[clap(long, env, hide_env_values = true)]
    refresh_token: Option<RefreshToken>,

    /// The local file used to persist the session
    #[clap(short = 'f', long, env, value_name = "FILE", default_value = ".session.json")]
    session_file: std::path::PathBuf,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let store = TokenStore::new(FileStorage::new(opts.session_file));

    if let (Some(access), Some(refresh)) = (opts.access_token, opts.refresh_token) {
        store.set_tokens(&access, &refresh).await?;
    }

    // The refresh client deliberately bypasses the middleware stack so a
    // failed refresh cannot recursively trigger another refresh.
    let coordinator = RefreshCoordinator::new(
        store.clone(),
        HttpRefreshBackend::new(Client::new(), opts.refresh_url),
    );

    let identity = IdentityProvider::new(store.clone());
    let mut changes = identity.changes();
    tokio::spawn({
        let identity = identity.clone();
        async move {
            while changes.changed().await.is_ok() {
                let current = identity.current_identity().await;
                tracing::info!(
                    authenticated = current.is_authenticated(),
                    "identity changed"
                );
            }
        }
    });

    let client = ClientBuilder::new(Client::default())
        .with(BearerAuthMiddleware::new(coordinator))
        .build();

    let response = client.get(opts.resource_url).send().await?;
    tracing::info!(
        status = response.status().as_u16(),
        "fetched protected resource"
    );

    match identity.current_identity().await.claims() {
        Some(claims) => tracing::info!(
            subject = claims.subject().unwrap_or("<unknown>"),
            role = claims.role().unwrap_or("<none>"),
            "session active"
        ),
        None => tracing::info!("session is anonymous"),
    }

    Ok(())
}
