use super::types::{
    Action, ClickParams, ExpectParams, ExpectTextParams, ExtractIdParams, ExtractSource, Flow,
    Step, SubmitParams,
};
use crate::error::{HarnessError, Result};
use serde::Deserialize;
use serde_yaml::Value;
use std::path::Path;

/// Parse a YAML flow file
pub fn parse_flow_file(path: &Path) -> Result<Flow> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        HarnessError::Flow(format!("failed to read {}: {}", path.display(), e))
    })?;
    parse_yaml_content(&content, path)
}

/// Parse YAML content into a Flow
pub fn parse_yaml_content(content: &str, source_path: &Path) -> Result<Flow> {
    let value: Value = serde_yaml::from_str(content)?;
    let Value::Mapping(map) = value else {
        return Err(invalid(source_path, "expected a mapping with `name` and `steps`"));
    };

    let mut flow = Flow {
        path: source_path.display().to_string(),
        ..Flow::default()
    };

    flow.name = match map.get("name").and_then(Value::as_str) {
        Some(name) => name.to_string(),
        None => source_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default(),
    };

    if let Some(val) = map.get("tags") {
        flow.tags = serde_yaml::from_value(val.clone())
            .map_err(|e| invalid(source_path, &format!("tags: {}", e)))?;
    }

    if let Some(val) = map.get("vars") {
        flow.vars = serde_yaml::from_value(val.clone())
            .map_err(|e| invalid(source_path, &format!("vars: {}", e)))?;
    }

    let Some(Value::Sequence(steps)) = map.get("steps") else {
        return Err(invalid(source_path, "`steps` must be a list"));
    };
    for (i, step) in steps.iter().enumerate() {
        flow.steps.push(
            parse_step(step, i).map_err(|e| invalid(source_path, &e.to_string()))?,
        );
    }

    if flow.steps.is_empty() {
        return Err(invalid(source_path, "flow has no steps"));
    }
    Ok(flow)
}

fn invalid(path: &Path, detail: &str) -> HarnessError {
    HarnessError::Flow(format!("{}: {}", path.display(), detail))
}

fn parse_step(value: &Value, index: usize) -> Result<Step> {
    let Value::Mapping(map) = value else {
        return Err(HarnessError::Flow(format!("step {} must be a mapping", index + 1)));
    };

    let name = map
        .get("name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("step {}", index + 1));

    let requires = match map.get("requires") {
        Some(Value::String(kind)) => vec![kind.clone()],
        Some(val) => serde_yaml::from_value(val.clone())?,
        None => Vec::new(),
    };

    let mut actions = Vec::new();
    if let Some(Value::Sequence(items)) = map.get("actions") {
        for item in items {
            let action = parse_action_value(item)
                .map_err(|e| HarnessError::Flow(format!("step '{}': {}", name, e)))?;
            actions.push(action);
        }
    }
    if actions.is_empty() {
        return Err(HarnessError::Flow(format!("step '{}' has no actions", name)));
    }

    Ok(Step {
        name,
        requires,
        actions,
    })
}

/// Parse one entry of an `actions` list
pub fn parse_action_value(value: &Value) -> Result<Action> {
    match value {
        // Bare action like "- confirmModal" or "- submit"
        Value::String(s) => parse_simple_action(s)
            .ok_or_else(|| HarnessError::Flow(format!("unknown action '{}'", s))),

        // Action with parameters like "- goto: /admin/quotations"
        Value::Mapping(map) => {
            let mut entries = map.iter();
            let (Some((key, params)), None) = (entries.next(), entries.next()) else {
                return Err(HarnessError::Flow(
                    "action must be a single-key mapping".to_string(),
                ));
            };
            let name = key
                .as_str()
                .ok_or_else(|| HarnessError::Flow("action name must be a string".to_string()))?;

            if params.is_null() {
                if let Some(action) = parse_simple_action(name) {
                    return Ok(action);
                }
            }
            parse_action_with_params(name, params)
        }

        _ => Err(HarnessError::Flow(format!("invalid action: {:?}", value))),
    }
}

fn parse_simple_action(name: &str) -> Option<Action> {
    match name {
        "submit" | "save" => Some(Action::Submit(SubmitParams::default())),
        "confirmModal" | "confirm" => Some(Action::ConfirmModal),
        _ => None,
    }
}

fn parse_action_with_params(name: &str, params: &Value) -> Result<Action> {
    let action = match name {
        "goto" | "open" => Action::Goto(string_param(name, params)?),
        "fill" => {
            let p: super::types::FillParams = from_value(name, params)?;
            if p.selector.is_none() && p.field.is_none() {
                return Err(HarnessError::Flow(
                    "fill needs `selector` or `field`".to_string(),
                ));
            }
            Action::Fill(p)
        }
        "select" => Action::Select(from_value(name, params)?),
        "click" => match params {
            Value::String(s) => Action::Click(ClickParams {
                selector: Some(s.clone()),
                text: None,
            }),
            _ => {
                let p: ClickParams = from_value(name, params)?;
                if p.selector.is_none() && p.text.is_none() {
                    return Err(HarnessError::Flow(
                        "click needs `selector` or `text`".to_string(),
                    ));
                }
                Action::Click(p)
            }
        },
        "press" | "pressKey" => Action::Press(string_param(name, params)?),
        "submit" | "save" => Action::Submit(from_value(name, params)?),
        "headerAction" => Action::HeaderAction(string_param(name, params)?),
        "rowAction" => Action::RowAction(from_value(name, params)?),
        "expectUrl" => Action::ExpectUrl(expect_param(name, params)?),
        "expectVisible" => Action::ExpectVisible(expect_param(name, params)?),
        "expectText" => match params {
            Value::String(s) => Action::ExpectText(ExpectTextParams {
                text: s.clone(),
                selector: None,
                optional: None,
            }),
            _ => Action::ExpectText(from_value(name, params)?),
        },
        "extractId" => Action::ExtractId(extract_param(params)?),
        "setVar" => Action::SetVar(from_value(name, params)?),
        _ => return Err(HarnessError::Flow(format!("unknown action '{}'", name))),
    };
    Ok(action)
}

fn from_value<T: for<'de> Deserialize<'de>>(name: &str, params: &Value) -> Result<T> {
    serde_yaml::from_value(params.clone())
        .map_err(|e| HarnessError::Flow(format!("{}: {}", name, e)))
}

fn string_param(name: &str, params: &Value) -> Result<String> {
    match params {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(HarnessError::Flow(format!("{} expects a string", name))),
    }
}

fn expect_param(name: &str, params: &Value) -> Result<ExpectParams> {
    match params {
        Value::String(s) => Ok(ExpectParams {
            value: s.clone(),
            optional: None,
        }),
        _ => from_value(name, params),
    }
}

/// `extractId` accepts a flat mapping with `from: url | listing`
#[derive(Deserialize)]
struct ExtractIdInput {
    kind: String,
    #[serde(default = "default_source")]
    from: String,
    resource: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default, rename = "match")]
    match_text: Option<String>,
}

fn default_source() -> String {
    "url".to_string()
}

fn extract_param(params: &Value) -> Result<ExtractIdParams> {
    let input: ExtractIdInput = from_value("extractId", params)?;
    let from = match input.from.as_str() {
        "url" => ExtractSource::Url {
            resource: input.resource,
        },
        "listing" => {
            let (Some(url), Some(match_text)) = (input.url, input.match_text) else {
                return Err(HarnessError::Flow(
                    "extractId from listing needs `url` and `match`".to_string(),
                ));
            };
            ExtractSource::Listing {
                url,
                match_text,
                resource: input.resource,
            }
        }
        other => {
            return Err(HarnessError::Flow(format!(
                "extractId: unknown source '{}', expected url or listing",
                other
            )))
        }
    };
    Ok(ExtractIdParams {
        kind: input.kind,
        from,
    })
}
