use reqwest::Client;
use tracing::debug;

use crate::{CacheConfig, error::Result};

/// Create a reqwest Client for origin range requests
pub fn create_client(config: &CacheConfig) -> Result<Client> {
    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(5) // Several readers may hit the same origin
        .user_agent(&config.user_agent)
        .default_headers(config.headers.clone())
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if !config.timeout.is_zero() {
        client_builder = client_builder.timeout(config.timeout);
    }

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    if !config.read_timeout.is_zero() {
        client_builder = client_builder
            .read_timeout(config.read_timeout)
            .pool_idle_timeout(config.read_timeout);
    }

    debug!(
        user_agent = %config.user_agent,
        follow_redirects = config.follow_redirects,
        "Building origin HTTP client"
    );

    Ok(client_builder.build()?)
}
