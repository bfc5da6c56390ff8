//! Finding the remote counterpart of a desired resource.

use async_trait::async_trait;
use tracing::debug;

use crate::error::{GatewayError, GatewayResultExt, ReconcileResult};

/// Lookup capability of a remote resource gateway, bound to one scope.
#[async_trait]
pub trait RemoteLookup: Send + Sync {
    /// Stable identifier recorded in a status record.
    type Identity: std::fmt::Display + Send + Sync;
    /// Name (and optional parent) used when no identity is known.
    type Query: std::fmt::Debug + Send + Sync;
    type Resource: Send;

    async fn fetch_by_identity(
        &self,
        identity: &Self::Identity,
    ) -> Result<Self::Resource, GatewayError>;

    async fn search_by_name(
        &self,
        query: &Self::Query,
    ) -> Result<Vec<Self::Resource>, GatewayError>;
}

/// Resolves at most one remote resource.
///
/// A known identity is fetched directly, and a not found or forbidden answer
/// means absent without falling back to search. Without an identity the
/// first search hit wins. Any other gateway failure is returned.
pub async fn resolve<L>(
    lookup: &L,
    identity: Option<&L::Identity>,
    query: &L::Query,
) -> ReconcileResult<Option<L::Resource>>
where
    L: RemoteLookup + ?Sized,
{
    if let Some(identity) = identity {
        return match lookup.fetch_by_identity(identity).await {
            Ok(resource) => Ok(Some(resource)),
            Err(e) if e.is_absence_equivalent() => {
                debug!(%identity, error = %e, "treating lookup failure as absence");
                Ok(None)
            }
            Err(e) => Err(e).during(format!("fetch {identity}")),
        };
    }

    let hits = lookup
        .search_by_name(query)
        .await
        .during(format!("search {query:?}"))?;

    Ok(hits.into_iter().next())
}
