//! Entry point: parse CLI args, load configuration, start either the
//! MD5-rewriting pipeline or the JWT auth-termination handshake on the
//! configured listen address.

mod config;
mod errors;
mod framer;
mod jwt;
mod messages;
mod pipeline;
mod processors;
mod supervisor;
mod tls;

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use config::{Config, Mode};
use errors::ProxyError;
use processors::Md5AuthConfig;

/// A PostgreSQL wire-protocol proxy that authenticates clients by a
/// different mechanism than the one it uses upstream.
#[derive(Parser, Debug)]
#[command(name = "pgproxy")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "pgproxy.toml")]
    config: String,
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let cli = Cli::parse();
    let config = match Config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            log::error!("failed to load config: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config).await {
        log::error!("fatal: {e}");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), ProxyError> {
    let listener = TcpListener::bind(config.listen_address).await?;
    log::info!("listening on {}", config.listen_address);

    match config.mode {
        Mode::Md5 => run_md5_listener(listener, &config).await,
        Mode::Jwt => run_jwt_listener(listener, &config).await,
    }
}

async fn run_md5_listener(listener: TcpListener, config: &Config) -> Result<(), ProxyError> {
    let auth_config = config
        .md5_auth
        .as_ref()
        .expect("validated at load time: md5 mode always has md5_auth");
    let auth = Md5AuthConfig {
        proxy_user: auth_config.proxy_user.clone().into(),
        proxy_password: auth_config.proxy_password.clone().into(),
        server_user: auth_config.server_user.clone().into(),
        server_password: auth_config.server_password.clone().into(),
    };
    let upstream_address = config.upstream_address;

    loop {
        let (client, peer) = listener.accept().await?;
        let auth = auth.clone();
        log::info!("accepted md5 connection from {peer}");

        tokio::spawn(async move {
            if let Err(e) = supervisor::run_md5_connection(client, upstream_address, auth).await {
                log::warn!("md5 connection from {peer} ended: {e}");
            }
        });
    }
}

async fn run_jwt_listener(listener: TcpListener, config: &Config) -> Result<(), ProxyError> {
    let tls_config = config
        .tls
        .as_ref()
        .expect("validated at load time: jwt mode always has tls");
    let jwt_auth_config = config
        .jwt_auth
        .as_ref()
        .expect("validated at load time: jwt mode always has jwt_auth");

    let server_tls = tls::server_config(&tls_config.cert_path, &tls_config.key_path)?;
    let upstream_tls = tls::client_config(tls_config.verify_upstream)?;
    let verifying_key = jwt::token::load_verifying_key(&jwt_auth_config.public_key_path)?;

    let jwt_config = Arc::new(jwt::JwtAuthConfig {
        server_tls,
        upstream_tls,
        verifying_key,
        upstream_address: config.upstream_address,
        upstream_server_name: config.upstream_address.ip().to_string(),
        max_message_bytes: config.max_message_bytes,
    });

    loop {
        let (client, peer) = listener.accept().await?;
        let jwt_config = jwt_config.clone();
        log::info!("accepted jwt connection from {peer}");

        tokio::spawn(async move {
            jwt::run_downstream(client, jwt_config).await;
        });
    }
}
