//! TOML configuration file format. See SPEC_FULL.md §6 for the documented
//! layout; loaded once at startup via `serde` + `toml`.

use std::net::SocketAddr;

use serde::Deserialize;

use crate::errors::ProxyError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Md5,
    Jwt,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub mode: Mode,
    pub listen_address: SocketAddr,
    pub upstream_address: SocketAddr,
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
    pub tls: Option<TlsConfig>,
    pub md5_auth: Option<Md5AuthConfig>,
    pub jwt_auth: Option<JwtAuthConfig>,
}

#[derive(Debug, Deserialize)]
pub struct TlsConfig {
    pub cert_path: String,
    pub key_path: String,
    #[serde(default)]
    pub verify_upstream: bool,
}

#[derive(Debug, Deserialize)]
pub struct Md5AuthConfig {
    pub proxy_user: String,
    pub proxy_password: String,
    pub server_user: String,
    pub server_password: String,
}

#[derive(Debug, Deserialize)]
pub struct JwtAuthConfig {
    pub public_key_path: String,
}

fn default_max_message_bytes() -> usize {
    66560
}

impl Config {
    pub fn load(path: &str) -> Result<Config, ProxyError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ProxyError::Config(format!("reading config file '{path}': {e}")))?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| ProxyError::Config(format!("parsing config file '{path}': {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ProxyError> {
        match self.mode {
            Mode::Md5 => {
                if self.md5_auth.is_none() {
                    return Err(ProxyError::Config(
                        "mode = \"md5\" requires a [md5_auth] section".to_string(),
                    ));
                }
            }
            Mode::Jwt => {
                if self.jwt_auth.is_none() {
                    return Err(ProxyError::Config(
                        "mode = \"jwt\" requires a [jwt_auth] section".to_string(),
                    ));
                }
                if self.tls.is_none() {
                    return Err(ProxyError::Config(
                        "mode = \"jwt\" requires a [tls] section for the mandatory downstream leg"
                            .to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_complete_md5_config() {
        let toml_text = r#"
            mode = "md5"
            listen_address = "0.0.0.0:7777"
            upstream_address = "127.0.0.1:5432"

            [md5_auth]
            proxy_user = "proxy_postgres"
            proxy_password = "proxy_mysecret"
            server_user = "postgres"
            server_password = "mysecret"
        "#;
        let config: Config = toml::from_str(toml_text).unwrap();
        config.validate().unwrap();
        assert_eq!(config.max_message_bytes, 66560);
        assert!(matches!(config.mode, Mode::Md5));
    }

    #[test]
    fn rejects_jwt_mode_without_tls() {
        let toml_text = r#"
            mode = "jwt"
            listen_address = "0.0.0.0:7777"
            upstream_address = "127.0.0.1:5432"

            [jwt_auth]
            public_key_path = "jwt_ed25519_public.pem"
        "#;
        let config: Config = toml::from_str(toml_text).unwrap();
        assert!(config.validate().is_err());
    }
}
