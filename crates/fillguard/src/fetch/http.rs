use crate::{error::FetchError, fetch::OriginFetcher};
use core::time::Duration;
use reqwest::{Client, header};
use tokio_util::sync::CancellationToken;

/// User agent sent with every origin request.
pub const USER_AGENT: &str = concat!("fillguard/", env!("CARGO_PKG_VERSION"));

/// Default bound on a single origin request, connect through body.
pub const DEFAULT_ORIGIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Fetches resources with an HTTP `GET`, treating the key as the URL.
///
/// The response body is returned whatever the status code: an origin that
/// answers `404` with a body has still answered, and that answer is what gets
/// cached. Only transport-level failures (DNS, connect, TLS, timeout, body
/// read) become a [`FetchError`].
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub const fn new(client: Client) -> Self {
        Self { client }
    }

    /// Builds a fetcher whose requests are bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Fails if the TLS backend cannot be initialized.
    pub fn with_timeout(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self::new(client))
    }

    async fn get(&self, url: &str) -> Result<String, reqwest::Error> {
        let response = self
            .client
            .get(url)
            .header(header::ACCEPT, "*/*")
            .send()
            .await?;

        #[cfg(feature = "tracing")]
        tracing::trace!(status = %response.status(), "Origin responded for `{}`", url);

        response.text().await
    }
}

impl OriginFetcher for HttpFetcher {
    async fn fetch(&self, cancel: &CancellationToken, url: &str) -> Result<String, FetchError> {
        #[cfg(feature = "tracing")]
        tracing::debug!("Fetching `{}` from origin", url);

        // Dropping the request future tears down the connection, so losing
        // the race against `cancelled()` aborts the transport call itself.
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(FetchError::Cancelled { url: url.to_owned() }),
            result = self.get(url) => result.map_err(|err| describe(url, &err)),
        }
    }
}

fn describe(url: &str, err: &reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::Timeout { url: url.to_owned() };
    }

    // reqwest's top-level message is generic ("error sending request");
    // the useful detail lives further down the source chain.
    let mut reason = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        reason.push_str(": ");
        reason.push_str(&cause.to_string());
        source = cause.source();
    }

    FetchError::Request {
        url: url.to_owned(),
        reason,
    }
}
