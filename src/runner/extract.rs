//! Identifier extraction for created records.
//!
//! Two explicit paths: the redirect URL after a create, or the listing row
//! carrying the flow's marker text.

use regex::Regex;
use std::time::Duration;

use crate::driver::traits::BrowserPage;
use crate::error::{HarnessError, Result};
use crate::wait::wait_until;
use crate::widget::actions::TABLE_ROWS;
use crate::widget::normalize_text;

const LISTING_SEARCH: &str = ".fi-ta-search-field input, input[type=\"search\"]";

/// Numeric id following `/<resource>/` in a URL or href
pub fn id_from_url(url: &str, resource: &str) -> Option<String> {
    let pattern = format!(r"/{}/(\d+)(?:[/?#]|$)", regex::escape(resource.trim_matches('/')));
    let re = Regex::new(&pattern).ok()?;
    re.captures(url).map(|caps| caps[1].to_string())
}

/// Wait for the page to settle on a record URL and take its id
pub async fn extract_from_url(
    page: &dyn BrowserPage,
    kind: &str,
    resource: &str,
    timeout: Duration,
) -> Result<String> {
    let found = wait_until("record URL", timeout, move || async move {
        let url = page.current_url().await?;
        Ok::<_, HarnessError>(id_from_url(&url, resource))
    })
    .await;

    match found {
        Ok(id) => Ok(id),
        Err(HarnessError::Timeout { .. }) => Err(HarnessError::IdentifierNotFound {
            kind: kind.to_string(),
            detail: format!(
                "no /{}/<id> segment in {}",
                resource,
                page.current_url().await.unwrap_or_default()
            ),
        }),
        Err(e) => Err(e),
    }
}

/// Find the listing row containing `match_text` and read the id from its
/// record link. The caller has already navigated to the listing page.
pub async fn extract_from_listing(
    page: &dyn BrowserPage,
    kind: &str,
    match_text: &str,
    resource: &str,
    timeout: Duration,
) -> Result<String> {
    if page.is_visible(LISTING_SEARCH).await? {
        page.fill(LISTING_SEARCH, match_text).await?;
    }

    let needle = normalize_text(match_text);
    let row = wait_until("listing row", timeout, || {
        let needle = needle.clone();
        async move {
            let rows = page.elements(TABLE_ROWS).await?;
            Ok::<_, HarnessError>(
                rows.iter()
                    .position(|r| normalize_text(&r.text).contains(&needle)),
            )
        }
    })
    .await;

    let row = match row {
        Ok(i) => i,
        Err(HarnessError::Timeout { .. }) => {
            return Err(HarnessError::IdentifierNotFound {
                kind: kind.to_string(),
                detail: format!("no listing row contains '{}'", match_text),
            })
        }
        Err(e) => return Err(e),
    };

    let link = format!(
        "{} >> nth={} >> a[href*=\"/{}/\"]",
        TABLE_ROWS,
        row,
        resource.trim_matches('/')
    );
    let href = page.attribute(&link, "href").await?.unwrap_or_default();

    id_from_url(&href, resource).ok_or_else(|| HarnessError::IdentifierNotFound {
        kind: kind.to_string(),
        detail: format!("row for '{}' has no /{}/<id> link (href '{}')", match_text, resource, href),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::FakePage;

    #[test]
    fn test_id_from_url() {
        assert_eq!(
            id_from_url("http://localhost:8009/admin/quotations/42", "quotations"),
            Some("42".to_string())
        );
        assert_eq!(
            id_from_url("http://localhost:8009/admin/quotations/42/edit?tab=1", "/quotations/"),
            Some("42".to_string())
        );
        assert_eq!(
            id_from_url("http://localhost:8009/admin/quotations/create", "quotations"),
            None
        );
        assert_eq!(
            id_from_url("/admin/sale-orders/7", "sale-orders"),
            Some("7".to_string())
        );
        assert_eq!(id_from_url("/admin/quotations/42x", "quotations"), None);
    }

    #[tokio::test]
    async fn test_extract_from_redirect_url() {
        let page = FakePage::new("http://localhost:8009/admin/quotations/118/edit");
        let id = extract_from_url(&page, "quotation", "quotations", Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(id, "118");
    }

    #[tokio::test]
    async fn test_no_redirect_is_identifier_not_found() {
        let page = FakePage::new("http://localhost:8009/admin/quotations/create");
        let err = extract_from_url(&page, "quotation", "quotations", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::IdentifierNotFound { ref kind, .. } if kind == "quotation"));
    }

    #[tokio::test]
    async fn test_extract_from_listing_row_href() {
        let page = FakePage::new("http://localhost:8009/admin/sale-orders");
        page.with(|s| {
            s.show_many(
                TABLE_ROWS,
                &["SO-0001 QT-OLD", "SO-0002  QT-E2E-1700000000123  draft"],
            );
            s.attributes.insert(
                (
                    format!("{} >> nth=1 >> a[href*=\"/sale-orders/\"]", TABLE_ROWS),
                    "href".to_string(),
                ),
                "/admin/sale-orders/77".to_string(),
            );
        });

        let id = extract_from_listing(
            &page,
            "sale_order",
            "QT-E2E-1700000000123",
            "sale-orders",
            Duration::from_millis(50),
        )
        .await
        .unwrap();

        assert_eq!(id, "77");
    }

    #[tokio::test]
    async fn test_listing_without_row_fails() {
        let page = FakePage::new("http://localhost:8009/admin/sale-orders");
        let err = extract_from_listing(&page, "sale_order", "QT-X", "sale-orders", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("QT-X"));
    }
}
