//! Searchable-select widgets and other enhanced form controls.
//!
//! Flows never address widget internals. A field is named by its label, and a
//! [`WidgetProfile`] knows how a given JS library renders the trigger, the
//! search box and the options. Supporting a new library means adding a
//! profile here.

pub mod actions;

use std::time::Duration;

use crate::driver::traits::{BrowserPage, ElementInfo};
use crate::error::{HarnessError, Result};
use crate::utils::Timeouts;
use crate::wait::{eventually, wait_until};

pub use actions::ActionScope;

/// How to find one part of a widget
#[derive(Debug, Clone, PartialEq)]
pub enum LocatorStrategy {
    /// Selector evaluated against the whole page
    Page(String),
    /// Selector evaluated inside the form field whose label contains `label`
    Field {
        wrapper: String,
        label: String,
        selector: String,
    },
}

impl LocatorStrategy {
    /// Playwright selector string
    pub fn selector(&self) -> String {
        match self {
            LocatorStrategy::Page(s) => s.clone(),
            LocatorStrategy::Field {
                wrapper,
                label,
                selector,
            } => format!(
                "{}:has(label:has-text(\"{}\")) >> {}",
                wrapper,
                escape_text(label),
                selector
            ),
        }
    }
}

fn escape_text(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

/// DOM shape of one searchable-select library
#[derive(Debug, Clone, PartialEq)]
pub struct WidgetProfile {
    pub name: String,
    /// Form field container carrying the label
    pub field_wrapper: String,
    pub trigger: String,
    pub search_input: String,
    /// Enabled, selectable options only
    pub option: String,
    /// Options render outside the field (appended to body)
    pub detached_options: bool,
    /// Underlying plain control holding the submitted value
    pub native_select: String,
}

impl WidgetProfile {
    /// Choices.js inside admin-panel form fields
    pub fn choices() -> Self {
        Self {
            name: "choices".to_string(),
            field_wrapper: ".fi-fo-field-wrp".to_string(),
            trigger: ".choices__inner".to_string(),
            search_input: "input.choices__input".to_string(),
            option: ".choices__list--dropdown .choices__item--selectable:not(.choices__item--disabled)"
                .to_string(),
            detached_options: false,
            native_select: "select".to_string(),
        }
    }

    pub fn tom_select() -> Self {
        Self {
            name: "tom_select".to_string(),
            field_wrapper: ".fi-fo-field-wrp".to_string(),
            trigger: ".ts-control".to_string(),
            search_input: ".ts-dropdown input.dropdown-input, .ts-control input".to_string(),
            option: ".ts-dropdown .option:not(.disabled)".to_string(),
            detached_options: false,
            native_select: "select".to_string(),
        }
    }

    pub fn select2() -> Self {
        Self {
            name: "select2".to_string(),
            field_wrapper: ".form-group".to_string(),
            trigger: ".select2-selection".to_string(),
            search_input: ".select2-container--open .select2-search__field".to_string(),
            option: ".select2-results__option:not([aria-disabled=\"true\"])".to_string(),
            detached_options: true,
            native_select: "select".to_string(),
        }
    }

    pub fn by_name(name: &str) -> Option<Self> {
        match name.to_lowercase().replace('-', "_").as_str() {
            "choices" | "choices.js" => Some(Self::choices()),
            "tom_select" | "tomselect" => Some(Self::tom_select()),
            "select2" => Some(Self::select2()),
            _ => None,
        }
    }
}

impl Default for WidgetProfile {
    fn default() -> Self {
        Self::choices()
    }
}

/// Locators for one enhanced select, built per interaction
#[derive(Debug, Clone)]
pub struct WidgetHandle {
    pub field_label: String,
    pub profile: WidgetProfile,
    pub trigger: LocatorStrategy,
    pub search_input: LocatorStrategy,
    pub option: LocatorStrategy,
    pub native_select: LocatorStrategy,
}

impl WidgetHandle {
    pub fn new(field_label: &str, profile: WidgetProfile) -> Self {
        let in_field = |selector: &str| LocatorStrategy::Field {
            wrapper: profile.field_wrapper.clone(),
            label: field_label.to_string(),
            selector: selector.to_string(),
        };
        let trigger = in_field(&profile.trigger);
        let native_select = in_field(&profile.native_select);
        let (search_input, option) = if profile.detached_options {
            (
                LocatorStrategy::Page(profile.search_input.clone()),
                LocatorStrategy::Page(profile.option.clone()),
            )
        } else {
            (in_field(&profile.search_input), in_field(&profile.option))
        };

        Self {
            field_label: field_label.to_string(),
            profile,
            trigger,
            search_input,
            option,
            native_select,
        }
    }
}

/// Drives widgets on one page
pub struct WidgetAdapter<'a> {
    page: &'a dyn BrowserPage,
    timeouts: Timeouts,
}

impl<'a> WidgetAdapter<'a> {
    pub fn new(page: &'a dyn BrowserPage, timeouts: Timeouts) -> Self {
        Self { page, timeouts }
    }

    pub(crate) fn page(&self) -> &'a dyn BrowserPage {
        self.page
    }

    pub(crate) fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    /// Pick the option matching `query` and return its label
    ///
    /// Falls back to assigning the plain `<select>` when the enhanced wrapper
    /// never renders.
    pub async fn select_option(&self, handle: &WidgetHandle, query: &str) -> Result<String> {
        let page = self.page;
        let trigger = handle.trigger.selector();
        let native = handle.native_select.selector();

        let enhanced = eventually(self.timeouts.dom(), || {
            let trigger = trigger.clone();
            async move { Ok::<_, HarnessError>(page.is_visible(&trigger).await?) }
        })
        .await?;

        if !enhanced {
            if page.elements(&native).await?.is_empty() {
                return Err(HarnessError::WidgetNotInteractable {
                    field: handle.field_label.clone(),
                    waited_ms: self.timeouts.dom_ms,
                });
            }
            log::warn!(
                "'{}': {} wrapper absent, assigning plain select",
                handle.field_label,
                handle.profile.name
            );
            return self.select_native(handle, &native, query).await;
        }

        let before = page.input_value(&native).await?;
        page.click(&trigger).await?;

        let search = handle.search_input.selector();
        let search_timeout = self.timeouts.dom().min(Duration::from_millis(500));
        let has_search = eventually(search_timeout, || {
            let search = search.clone();
            async move { Ok::<_, HarnessError>(page.is_visible(&search).await?) }
        })
        .await?;
        if has_search {
            page.fill(&search, query).await?;
        } else {
            log::debug!("'{}': no search input, picking from full list", handle.field_label);
        }

        let (index, label) = self.pick_option(handle, query).await?;
        page.click_nth(&handle.option.selector(), index).await?;

        self.confirm_applied(handle, &native, &before, &label).await?;
        log::info!("'{}' = '{}'", handle.field_label, label);
        Ok(label)
    }

    /// Index and label of the option to click
    async fn pick_option(&self, handle: &WidgetHandle, query: &str) -> Result<(usize, String)> {
        let page = self.page;
        let option = handle.option.selector();
        let needle = query.trim().to_lowercase();

        let matched = wait_until("matching option", self.timeouts.option(), || {
            let option = option.clone();
            let needle = needle.clone();
            async move {
                let options = page.elements(&option).await?;
                Ok::<_, HarnessError>(find_matching(&options, &needle))
            }
        })
        .await;

        match matched {
            Ok(found) => Ok(found),
            Err(HarnessError::Timeout { waited_ms, .. }) => {
                // Nothing contains the query: take the first enabled option
                let options = page.elements(&option).await?;
                match options.iter().position(|o| o.visible) {
                    Some(i) => {
                        log::warn!(
                            "'{}': no option contains '{}', taking '{}'",
                            handle.field_label,
                            query,
                            options[i].text
                        );
                        Ok((i, options[i].text.clone()))
                    }
                    None => Err(HarnessError::NoMatchingOption {
                        field: handle.field_label.clone(),
                        query: query.to_string(),
                        waited_ms,
                    }),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Read back the underlying select until it reflects `label`
    ///
    /// A value that differs from `before` counts, and so does an unchanged
    /// value whose selected option reads `label` (reselecting the current one).
    async fn confirm_applied(
        &self,
        handle: &WidgetHandle,
        native: &str,
        before: &str,
        label: &str,
    ) -> Result<()> {
        let page = self.page;
        let wanted = normalize_text(label);
        let wanted = wanted.as_str();
        let applied = eventually(self.timeouts.dom(), move || async move {
            let value = page.input_value(native).await?;
            if value.trim().is_empty() {
                return Ok::<_, HarnessError>(false);
            }
            if value != before {
                return Ok(true);
            }
            let selected = page.selected_label(native).await?;
            Ok(selected.map_or(false, |s| normalize_text(&s) == wanted))
        })
        .await?;

        if applied {
            Ok(())
        } else {
            Err(HarnessError::SelectionNotApplied {
                field: handle.field_label.clone(),
                label: label.to_string(),
            })
        }
    }

    async fn select_native(&self, handle: &WidgetHandle, native: &str, query: &str) -> Result<String> {
        let before = self.page.input_value(native).await?;
        match self.page.select_native(native, query).await? {
            Some(selection) => {
                self.confirm_applied(handle, native, &before, &selection.label).await?;
                Ok(selection.label)
            }
            None => Err(HarnessError::NoMatchingOption {
                field: handle.field_label.clone(),
                query: query.to_string(),
                waited_ms: 0,
            }),
        }
    }
}

/// First visible option whose text contains `needle` (lowercased)
fn find_matching(options: &[ElementInfo], needle: &str) -> Option<(usize, String)> {
    options
        .iter()
        .enumerate()
        .find(|(_, o)| o.visible && o.text.to_lowercase().contains(needle))
        .map(|(i, o)| (i, o.text.clone()))
}

/// Lowercased text with runs of whitespace collapsed
pub(crate) fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
