use std::time::Duration;

use miette::{Context, IntoDiagnostic};
use repo_archive::BearerTokenMiddleware;
use repo_archive_config::Config;
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};

const READ_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Builds the HTTP client archives are fetched with.
///
/// The access token, when configured, is only sent to the configured host.
pub fn build_reqwest_client(config: &Config) -> miette::Result<ClientWithMiddleware> {
    if config.tls_no_verify() {
        tracing::warn!(
            "TLS verification is disabled. This is insecure and should only be used for testing or internal networks."
        );
    }

    let client = Client::builder()
        .pool_max_idle_per_host(20)
        .user_agent(config.user_agent())
        .danger_accept_invalid_certs(config.tls_no_verify())
        .read_timeout(READ_TIMEOUT)
        .build()
        .into_diagnostic()
        .wrap_err("failed to create the http client")?;

    let mut client_builder = ClientBuilder::new(client);

    if let Some(token) = config.access_token() {
        tracing::debug!("attaching the access token to requests for {}", config.host());
        let middleware = BearerTokenMiddleware::new(token)
            .into_diagnostic()
            .wrap_err("the access token contains characters that cannot be sent in a header")?
            .for_host(config.host());
        client_builder = client_builder.with(middleware);
    }

    Ok(client_builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builds_without_token() {
        assert!(build_reqwest_client(&Config::default()).is_ok());
    }

    #[test]
    fn test_invalid_token_is_reported() {
        let config = Config {
            access_token: Some("line\nbreak".to_string()),
            ..Default::default()
        };
        let err = build_reqwest_client(&config).unwrap_err();
        insta::assert_snapshot!(
            err.to_string(),
            @"the access token contains characters that cannot be sent in a header"
        );
    }
}
