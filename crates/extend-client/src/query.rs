//! Paged Query Engine: cookie-driven iteration over query responses,
//! honoring limit-filter anchor advance.

use crate::convert::map_failure;
use extend_core::{CacheRequest, CacheResponse, Channel, ExtendError, Filter, QueryRow, Result};
use std::sync::Arc;

/// Run a paged query to completion and return every matched row.
///
/// Each round trip advances either the limit filter's own anchors (when
/// `filter` downcasts to a `LimitFilter`) or a plain response cookie,
/// until the server signals termination with an empty cookie.
pub async fn run_query(
    channel: &dyn Channel,
    cache: &str,
    filter: Option<Arc<dyn Filter>>,
    keys_only: bool,
) -> Result<Vec<QueryRow>> {
    let limit = filter.as_ref().and_then(|f| f.as_limit_filter());
    let mut cookie = None;
    let mut pages: Vec<Vec<QueryRow>> = Vec::new();

    loop {
        let filter_cookie = limit.map(|lf| lf.cookie()).flatten();
        let resp = channel
            .request(CacheRequest::Query {
                cache: cache.to_string(),
                filter: filter.clone(),
                keys_only,
                cookie: cookie.clone(),
                filter_cookie,
            })
            .await?;

        match resp {
            CacheResponse::QueryPage { rows, cookie: next_cookie, limit_advance } => {
                if !rows.is_empty() {
                    pages.push(rows);
                }
                match (limit, limit_advance) {
                    (Some(lf), Some(adv)) => {
                        let terminal = adv.cookie.is_none();
                        lf.advance(adv.bottom_anchor, adv.top_anchor, adv.cookie);
                        if terminal {
                            break;
                        }
                    }
                    _ => {
                        cookie = next_cookie;
                        if cookie.is_none() {
                            break;
                        }
                    }
                }
            }
            CacheResponse::Failure(payload) => return Err(map_failure(payload)),
            other => {
                return Err(ExtendError::ProtocolFraming(format!("unexpected response to query: {other:?}")));
            }
        }
    }

    Ok(pages.into_iter().flatten().collect())
}

/// Key-iteration over `get_keys_page`, via the same cookie mechanism.
/// `remove` removes the current entry by its (already decorated) binary
/// key directly through the `BinaryCache`'s channel.
pub struct Advancer {
    cache: String,
    cookie: Option<Vec<u8>>,
    done: bool,
}

impl Advancer {
    pub fn new(cache: impl Into<String>) -> Self {
        Self { cache: cache.into(), cookie: None, done: false }
    }

    pub async fn next_page(&mut self, channel: &dyn Channel) -> Result<Option<Vec<Vec<u8>>>> {
        if self.done {
            return Ok(None);
        }
        let resp = channel
            .request(CacheRequest::GetKeysPage { cache: self.cache.clone(), cookie: self.cookie.clone() })
            .await?;
        match resp {
            CacheResponse::QueryPage { rows, cookie, .. } => {
                self.done = cookie.is_none();
                self.cookie = cookie;
                if rows.is_empty() && self.done {
                    return Ok(None);
                }
                Ok(Some(rows.into_iter().map(|r| r.key).collect()))
            }
            CacheResponse::Failure(payload) => Err(map_failure(payload)),
            other => Err(ExtendError::ProtocolFraming(format!("unexpected response to get_keys_page: {other:?}"))),
        }
    }

    pub async fn remove(&self, channel: &dyn Channel, decorated_key: Vec<u8>) -> Result<()> {
        channel
            .request(CacheRequest::Remove { cache: self.cache.clone(), key: decorated_key, return_old: false })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extend_transport::MockConnection;
    use extend_core::{AlwaysFilter, Connection, LimitFilter, TtlSpec, UnsolicitedReceiver};
    use async_trait::async_trait;

    struct NullReceiver;
    #[async_trait]
    impl UnsolicitedReceiver for NullReceiver {
        async fn on_message(&self, _event: extend_core::CacheEvent) {}
        async fn on_channel_closed(&self) {}
    }

    #[tokio::test]
    async fn test_paged_query_with_limit_filter_terminates() {
        let conn = MockConnection::new();
        let channel = conn.open_channel("proxy", Arc::new(NullReceiver), None).await.unwrap();

        for i in 0u32..1000 {
            channel
                .request(CacheRequest::Put {
                    cache: "nums".into(),
                    key: i.to_be_bytes().to_vec(),
                    value: i.to_be_bytes().to_vec(),
                    ttl: TtlSpec::Default,
                    return_old: false,
                })
                .await
                .unwrap();
        }

        let filter: Arc<dyn Filter> = Arc::new(LimitFilter::new(Arc::new(AlwaysFilter), 100));
        let rows = run_query(channel.as_ref(), "nums", Some(filter), false).await.unwrap();
        assert_eq!(rows.len(), 1000);
    }

    #[tokio::test]
    async fn test_advancer_paginates_keys() {
        let conn = MockConnection::new();
        let channel = conn.open_channel("proxy", Arc::new(NullReceiver), None).await.unwrap();
        for i in 0u32..10 {
            channel
                .request(CacheRequest::Put {
                    cache: "c".into(),
                    key: vec![i as u8],
                    value: vec![i as u8],
                    ttl: TtlSpec::Default,
                    return_old: false,
                })
                .await
                .unwrap();
        }

        let mut advancer = Advancer::new("c");
        let mut total = 0;
        while let Some(page) = advancer.next_page(channel.as_ref()).await.unwrap() {
            total += page.len();
        }
        assert_eq!(total, 10);
    }
}
