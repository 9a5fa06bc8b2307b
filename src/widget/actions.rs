//! Page header actions, table row actions and confirmation modals.

use regex::Regex;

use super::{normalize_text, WidgetAdapter};
use crate::error::{HarnessError, Result};
use crate::wait::{eventually, wait_until};

const HEADER_BUTTONS: &str = ".fi-header .fi-btn";
const HEADER_GROUP_TRIGGERS: &str = ".fi-header button[aria-haspopup=\"true\"], .fi-header .fi-dropdown-trigger button";
pub(crate) const TABLE_ROWS: &str = ":is(table tbody tr, .fi-ta-row)";
const ROW_GROUP_TRIGGER: &str = "button[aria-haspopup=\"true\"]";
const MENU_ITEMS: &str = ".fi-dropdown-list-item";
const DIALOG_BUTTONS: &str = "[role=\"dialog\"] button";
const CONFIRM_WORDS: &str = r"(?i)\b(konfirmasi|confirm|yes|ya|lanjut|ok|approve|submit)\b";

/// Where an action button lives
#[derive(Debug, Clone, PartialEq)]
pub enum ActionScope {
    /// Record page header
    Header,
    /// Listing row whose text contains `match_text`
    Row { match_text: String },
}

impl<'a> WidgetAdapter<'a> {
    /// Click the action labelled exactly `label` (case-insensitive)
    ///
    /// Tries a direct button first, then opens each action group and looks
    /// for a menu item with that label.
    pub async fn click_action(&self, label: &str, scope: &ActionScope) -> Result<()> {
        let (buttons, triggers) = match scope {
            ActionScope::Header => (HEADER_BUTTONS.to_string(), HEADER_GROUP_TRIGGERS.to_string()),
            ActionScope::Row { match_text } => {
                let row = self.find_row(match_text).await?;
                (
                    format!("{} >> nth={} >> button", TABLE_ROWS, row),
                    format!("{} >> nth={} >> {}", TABLE_ROWS, row, ROW_GROUP_TRIGGER),
                )
            }
        };
        let page = self.page();
        let wanted = normalize_text(label);

        if let Some(i) = exact_index(&page.elements(&buttons).await?, &wanted) {
            log::info!("action '{}' (direct)", label);
            page.click_nth(&buttons, i).await?;
            return Ok(());
        }

        let trigger_count = page.elements(&triggers).await?.len();
        for t in 0..trigger_count {
            page.click_nth(&triggers, t).await?;
            let found = wait_until("action menu", self.timeouts().dom(), || {
                let wanted = wanted.clone();
                async move {
                    let items = page.elements(MENU_ITEMS).await?;
                    Ok::<_, HarnessError>(exact_index(&items, &wanted))
                }
            })
            .await;

            match found {
                Ok(i) => {
                    log::info!("action '{}' (menu {})", label, t);
                    page.click_nth(MENU_ITEMS, i).await?;
                    return Ok(());
                }
                Err(HarnessError::Timeout { .. }) => {
                    // Close this menu before trying the next group
                    page.press_key("Escape").await?;
                }
                Err(e) => return Err(e),
            }
        }

        Err(HarnessError::WidgetNotInteractable {
            field: format!("action '{}'", label),
            waited_ms: self.timeouts().dom_ms,
        })
    }

    /// Index of the first listing row containing `match_text`
    async fn find_row(&self, match_text: &str) -> Result<usize> {
        let page = self.page();
        let needle = normalize_text(match_text);
        let found = wait_until("listing row", self.timeouts().navigation(), || {
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

        match found {
            Err(HarnessError::Timeout { waited_ms, .. }) => Err(HarnessError::WidgetNotInteractable {
                field: format!("row containing '{}'", match_text),
                waited_ms,
            }),
            other => other,
        }
    }

    /// Click the affirmative button of an open dialog
    ///
    /// Returns `false` when no dialog with a confirm button shows up.
    pub async fn confirm_modal(&self) -> Result<bool> {
        let page = self.page();
        let confirm = Regex::new(CONFIRM_WORDS).map_err(|e| HarnessError::Config(e.to_string()))?;

        let found = wait_until("confirmation dialog", self.timeouts().dom(), || {
            let confirm = confirm.clone();
            async move {
                let buttons = page.elements(DIALOG_BUTTONS).await?;
                Ok::<_, HarnessError>(
                    buttons
                        .iter()
                        .rposition(|b| b.visible && confirm.is_match(&b.text))
                        .map(|i| (i, buttons[i].text.clone())),
                )
            }
        })
        .await;

        let (index, text) = match found {
            Ok(hit) => hit,
            Err(HarnessError::Timeout { .. }) => return Ok(false),
            Err(e) => return Err(e),
        };
        log::info!("confirming dialog with '{}'", text);
        page.click_nth(DIALOG_BUTTONS, index).await?;

        let closed = eventually(self.timeouts().dom(), move || async move {
            Ok::<_, HarnessError>(!page.is_visible(DIALOG_BUTTONS).await?)
        })
        .await?;
        if !closed {
            log::debug!("dialog still visible after confirming");
        }
        Ok(true)
    }
}

fn exact_index(elements: &[crate::driver::ElementInfo], wanted: &str) -> Option<usize> {
    elements
        .iter()
        .position(|e| e.visible && normalize_text(&e.text) == wanted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::FakePage;
    use crate::widget::tests::fast_timeouts;

    fn listing() -> FakePage {
        let page = FakePage::new("http://localhost:8009/admin/quotations");
        page.with(|s| {
            s.show_many(
                TABLE_ROWS,
                &["QT-001 Budi Makmur draft", "QT-E2E-1700000000 Aminah Corp draft"],
            );
        });
        page
    }

    #[tokio::test]
    async fn test_header_direct_button() {
        let page = FakePage::new("http://localhost:8009/admin/quotations/7");
        page.with(|s| s.show_many(HEADER_BUTTONS, &["Edit", "Request Approve", "Approve"]));
        let adapter = WidgetAdapter::new(&page, fast_timeouts());

        adapter.click_action("approve", &ActionScope::Header).await.unwrap();

        assert!(page.calls().contains(&format!("click:{}#2", HEADER_BUTTONS)));
    }

    #[tokio::test]
    async fn test_row_action_from_menu() {
        let page = listing();
        let adapter = WidgetAdapter::new(&page, fast_timeouts());
        let triggers = format!("{} >> nth=1 >> {}", TABLE_ROWS, ROW_GROUP_TRIGGER);
        page.with(|s| s.show(&triggers, ""));
        page.on_click(&format!("{}#0", triggers), |s| {
            s.show_many(MENU_ITEMS, &["View", "Request Approve", "Buat Sales Order"]);
        });

        adapter
            .click_action(
                "Buat Sales Order",
                &ActionScope::Row {
                    match_text: "QT-E2E-1700000000".to_string(),
                },
            )
            .await
            .unwrap();

        assert!(page.calls().contains(&format!("click:{}#2", MENU_ITEMS)));
    }

    #[tokio::test]
    async fn test_missing_action_closes_menus_and_fails() {
        let page = FakePage::new("http://localhost:8009/admin/quotations/7");
        page.with(|s| s.show(HEADER_GROUP_TRIGGERS, ""));
        page.on_click(&format!("{}#0", HEADER_GROUP_TRIGGERS), |s| {
            s.show_many(MENU_ITEMS, &["Request Approve"]);
        });
        let adapter = WidgetAdapter::new(&page, fast_timeouts());

        let err = adapter.click_action("Approve", &ActionScope::Header).await.unwrap_err();

        assert!(matches!(err, HarnessError::WidgetNotInteractable { .. }));
        assert_eq!(page.count_calls("press:Escape"), 1);
    }

    #[tokio::test]
    async fn test_missing_row_fails() {
        let page = listing();
        let adapter = WidgetAdapter::new(&page, fast_timeouts());
        let err = adapter
            .click_action(
                "Approve",
                &ActionScope::Row {
                    match_text: "QT-NOPE".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("QT-NOPE"));
    }

    #[tokio::test]
    async fn test_confirm_modal_picks_last_affirmative_button() {
        let page = FakePage::new("http://localhost:8009/admin/quotations/7");
        page.with(|s| s.show_many(DIALOG_BUTTONS, &["Batal", "Ya, setujui", "Cancel"]));
        page.on_click(&format!("{}#1", DIALOG_BUTTONS), |s| s.hide(DIALOG_BUTTONS));
        let adapter = WidgetAdapter::new(&page, fast_timeouts());

        assert!(adapter.confirm_modal().await.unwrap());
        assert!(page.calls().contains(&format!("click:{}#1", DIALOG_BUTTONS)));
    }

    #[tokio::test]
    async fn test_confirm_modal_without_dialog() {
        let page = FakePage::new("http://localhost:8009/admin/quotations/7");
        let adapter = WidgetAdapter::new(&page, fast_timeouts());
        assert!(!adapter.confirm_modal().await.unwrap());
    }
}
