use crate::error::FetchError;
use tokio_util::sync::CancellationToken;

/// Retrieves a resource from the origin.
///
/// One call is one attempt: implementations must not retry, since every
/// retry decision belongs to the coordinator. They must also observe
/// `cancel` promptly and abort the underlying transport call when it fires,
/// returning [`FetchError::Cancelled`].
pub trait OriginFetcher: Send + Sync + 'static {
    fn fetch(
        &self,
        cancel: &CancellationToken,
        url: &str,
    ) -> impl Future<Output = Result<String, FetchError>> + Send;
}
