use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A business flow parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Flow {
    pub name: String,

    /// Source file, empty for flows built in code
    #[serde(default)]
    pub path: String,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Initial variables, substituted like `setVar`
    #[serde(default)]
    pub vars: HashMap<String, String>,

    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Flow {
    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        tags.is_empty() || self.tags.iter().any(|t| tags.contains(t))
    }
}

/// One named unit of a flow
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub name: String,

    /// Identifier kinds that earlier steps must have extracted
    #[serde(default)]
    pub requires: Vec<String>,

    #[serde(default)]
    pub actions: Vec<Action>,
}

/// A single UI action
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    /// Path relative to the base URL, or an absolute URL
    Goto(String),
    Fill(FillParams),
    Select(SelectParams),
    Click(ClickParams),
    Press(String),
    Submit(SubmitParams),
    HeaderAction(String),
    RowAction(RowActionParams),
    ConfirmModal,
    ExpectUrl(ExpectParams),
    ExpectVisible(ExpectParams),
    ExpectText(ExpectTextParams),
    ExtractId(ExtractIdParams),
    SetVar(SetVarParams),
}

impl Action {
    /// Short human-readable form for logs and events
    pub fn describe(&self) -> String {
        match self {
            Action::Goto(url) => format!("goto {}", url),
            Action::Fill(p) => format!("fill {}", p.target()),
            Action::Select(p) => format!("select '{}' in {}", p.value, p.field),
            Action::Click(p) => format!("click {}", p.selector.as_deref().or(p.text.as_deref()).unwrap_or("?")),
            Action::Press(key) => format!("press {}", key),
            Action::Submit(_) => "submit".to_string(),
            Action::HeaderAction(label) => format!("header action '{}'", label),
            Action::RowAction(p) => format!("row action '{}' on '{}'", p.label, p.match_text),
            Action::ConfirmModal => "confirm modal".to_string(),
            Action::ExpectUrl(p) => format!("expect url {}", p.value),
            Action::ExpectVisible(p) => format!("expect visible {}", p.value),
            Action::ExpectText(p) => format!("expect text '{}'", p.text),
            Action::ExtractId(p) => format!("extract {} id", p.kind),
            Action::SetVar(p) => format!("set {}", p.name),
        }
    }
}

/// Input addressed by CSS selector or by its field label
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct FillParams {
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub field: Option<String>,
    pub value: String,
}

impl FillParams {
    pub fn target(&self) -> &str {
        self.selector
            .as_deref()
            .or(self.field.as_deref())
            .unwrap_or("?")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SelectParams {
    /// Field label
    pub field: String,
    /// Search text; the first option containing it is picked
    pub value: String,
    /// Widget profile name; defaults to the admin panel's select library
    #[serde(default)]
    pub widget: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClickParams {
    #[serde(default)]
    pub selector: Option<String>,
    /// Visible button or link text
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SubmitParams {
    /// Exact button text to use instead of the primary form button
    #[serde(default)]
    pub button: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RowActionParams {
    pub label: String,
    /// Text identifying the row, usually a marker code
    #[serde(rename = "match")]
    pub match_text: String,
    /// Listing page to open first
    #[serde(default)]
    pub url: Option<String>,
}

/// URL pattern (regex) or selector, required unless `optional` gives a reason
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExpectParams {
    pub value: String,
    #[serde(default)]
    pub optional: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExpectTextParams {
    pub text: String,
    /// Limit the search to this element; whole page when absent
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub optional: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtractIdParams {
    /// Key under which the id is stored, referenced as `${id.<kind>}`
    pub kind: String,
    pub from: ExtractSource,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ExtractSource {
    /// `/<resource>/<digits>` in the current URL
    Url { resource: String },
    /// Row link in a listing page, row found by its marker text
    Listing {
        url: String,
        #[serde(rename = "match")]
        match_text: String,
        resource: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SetVarParams {
    pub name: String,
    pub value: String,
}
