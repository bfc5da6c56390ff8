//! Page-by-page collection of remote listings.

use std::future::Future;

/// Page size used for full directory and organization listings.
pub const DEFAULT_PAGE_SIZE: u32 = 1000;

/// Fetches pages starting at page 1 until a page comes back shorter than
/// `per_page`.
///
/// A full final page costs one extra, empty request.
pub async fn collect_pages<T, E, F, Fut>(per_page: u32, mut fetch: F) -> Result<Vec<T>, E>
where
    F: FnMut(u32, u32) -> Fut,
    Fut: Future<Output = Result<Vec<T>, E>>,
{
    let per_page = per_page.max(1);
    let mut items = Vec::new();
    let mut page = 1;

    loop {
        let batch = fetch(page, per_page).await?;
        let last = batch.len() < per_page as usize;
        items.extend(batch);
        if last {
            break;
        }
        page += 1;
    }

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn listing(
        calls: &AtomicU32,
        total: u32,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<u32>, ()> {
        calls.fetch_add(1, Ordering::SeqCst);
        let start = (page - 1) * per_page;
        Ok((start..total.min(start + per_page)).collect())
    }

    #[tokio::test]
    async fn test_stops_on_short_page() {
        let calls = AtomicU32::new(0);
        let items = collect_pages(2, |page, per_page| listing(&calls, 5, page, per_page))
            .await
            .unwrap();

        assert_eq!(items, vec![0, 1, 2, 3, 4]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_full_last_page_costs_one_empty_request() {
        let calls = AtomicU32::new(0);
        let items = collect_pages(2, |page, per_page| listing(&calls, 4, page, per_page))
            .await
            .unwrap();

        assert_eq!(items.len(), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_first_page_is_one() {
        let mut seen = Vec::new();
        let _ = collect_pages(10, |page, _| {
            seen.push(page);
            async { Ok::<Vec<u8>, ()>(Vec::new()) }
        })
        .await;

        assert_eq!(seen, vec![1]);
    }

    #[tokio::test]
    async fn test_error_aborts() {
        let result: Result<Vec<u8>, &str> = collect_pages(1, |page, _| async move {
            if page == 2 {
                Err("boom")
            } else {
                Ok(vec![1])
            }
        })
        .await;

        assert_eq!(result, Err("boom"));
    }
}
