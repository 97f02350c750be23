//! WebAssembly bindings for SiteBlock
//!
//! The background script owns the browser APIs. For every call it passes in
//! the current dynamic rules and the relevant storage values; the Rust side
//! runs the handler against an in-memory copy and hands back the single
//! `updateDynamicRules` call and the storage writes that bring the browser
//! to the new state. The script must apply them before sending the next
//! message.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use serde_json::{Map, Value};
use wasm_bindgen::prelude::*;

use sb_core::host::{ManualClock, MemoryRuleEngine, MemoryStore, MemoryTabs, RuleEngine, RuleUpdate};
use sb_core::pattern::{self, validate_url};
use sb_core::{Action, Background, DnrRule, Response, Settings};

mod console;

static SETTINGS: OnceLock<Settings> = OnceLock::new();

type WasmBackground = Background<MemoryRuleEngine, MemoryStore, MemoryTabs, ManualClock>;

/// Everything the script has to write back after a call.
///
/// `ruleUpdate` is left out when the rules did not change.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HostChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    rule_update: Option<RuleUpdate>,
    storage_update: Map<String, Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MessageResult {
    response: Response,
    #[serde(flatten)]
    changes: HostChanges,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NavigationResult {
    reactivated: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    redirect_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rule_id: Option<u32>,
    #[serde(flatten)]
    changes: HostChanges,
}

#[wasm_bindgen]
pub fn init(settings: JsValue, log_level: Option<String>) -> Result<(), JsValue> {
    if SETTINGS.get().is_some() {
        return Err(JsValue::from_str("Already initialized. Reload the extension to reinitialize."));
    }

    let settings: Settings = if settings.is_undefined() || settings.is_null() {
        Settings::default()
    } else {
        from_js(&settings).map_err(|e| JsValue::from_str(&format!("Invalid settings: {}", e)))?
    };

    console::install(log_level.as_deref().unwrap_or("warn"));

    SETTINGS
        .set(settings)
        .map_err(|_| JsValue::from_str("Failed to set settings"))?;

    Ok(())
}

#[wasm_bindgen]
pub fn is_initialized() -> bool {
    SETTINGS.get().is_some()
}

/// Handle one runtime message.
///
/// `rules` is the result of `getDynamicRules()`, `storage` the object
/// returned by `storage.local.get()`.
///
/// A successful `response` only holds once the changes are applied. If
/// `updateDynamicRules` or `storage.local.set` rejects, the script must
/// answer the sender with `{ success: false }` and the host error instead.
#[wasm_bindgen]
pub fn handle_message(
    message: JsValue,
    rules: JsValue,
    storage: JsValue,
    tab_url: Option<String>,
    now_ms: f64,
    seed: f64,
) -> Result<JsValue, JsValue> {
    let action: Action = from_js(&message).map_err(|e| JsValue::from_str(&format!("Unhandled action: {}", e)))?;
    let (mut bg, before) = load_background(&rules, &storage, tab_url, now_ms, seed)?;

    let response = bg.handle(action);
    let changes = collect_changes(&mut bg, &before)?;

    to_js(&MessageResult { response, changes })
}

/// Run on `tabs.onUpdated` when a load completes or the URL changes.
#[wasm_bindgen]
pub fn on_navigation(
    changed_url: Option<String>,
    rules: JsValue,
    storage: JsValue,
    now_ms: f64,
) -> Result<JsValue, JsValue> {
    let (mut bg, before) = load_background(&rules, &storage, None, now_ms, now_ms)?;

    let outcome = bg
        .on_navigation(changed_url.as_deref())
        .map_err(|e| JsValue::from_str(&e.to_string()))?;
    let changes = collect_changes(&mut bg, &before)?;

    to_js(&NavigationResult {
        reactivated: outcome.reactivated,
        rule_id: outcome.redirect.as_ref().map(|m| m.rule_id),
        redirect_url: outcome.redirect.map(|m| m.redirect_url),
        changes,
    })
}

#[wasm_bindgen]
pub fn url_to_pattern_js(url: &str, block_domain: bool) -> Result<String, JsValue> {
    pattern::url_to_pattern(url, block_domain, &settings()).map_err(|e| JsValue::from_str(&e.to_string()))
}

#[wasm_bindgen]
pub fn strip_pattern_js(pattern: &str) -> String {
    pattern::strip_pattern(pattern)
}

/// Validation message for the popup form, or None if the URL is acceptable.
#[wasm_bindgen]
pub fn validate_url_js(url: &str) -> Option<String> {
    validate_url(url, &settings()).err().map(|e| e.to_string())
}

fn settings() -> Settings {
    SETTINGS.get().cloned().unwrap_or_default()
}

fn load_background(
    rules: &JsValue,
    storage: &JsValue,
    tab_url: Option<String>,
    now_ms: f64,
    seed: f64,
) -> Result<(WasmBackground, Vec<DnrRule>), JsValue> {
    let rules: Vec<DnrRule> = from_js(rules).map_err(|e| JsValue::from_str(&format!("Invalid rules: {}", e)))?;
    let storage: Map<String, Value> = if storage.is_undefined() || storage.is_null() {
        Map::new()
    } else {
        from_js(storage).map_err(|e| JsValue::from_str(&format!("Invalid storage: {}", e)))?
    };
    let now = DateTime::<Utc>::from_timestamp_millis(now_ms as i64)
        .ok_or_else(|| JsValue::from_str("Invalid timestamp"))?;

    let bg = Background::new(
        MemoryRuleEngine::with_rules(rules.iter().cloned()),
        MemoryStore::with_values(storage),
        MemoryTabs { url: tab_url },
        ManualClock::new(now),
        settings(),
        StdRng::seed_from_u64(seed.to_bits()),
    );
    Ok((bg, rules))
}

fn collect_changes(bg: &mut WasmBackground, before: &[DnrRule]) -> Result<HostChanges, JsValue> {
    let after = bg
        .engine
        .get_dynamic_rules()
        .map_err(|e| JsValue::from_str(&e.to_string()))?;
    Ok(HostChanges {
        rule_update: Some(RuleUpdate::between(before, &after)).filter(|update| !update.is_empty()),
        storage_update: bg.storage.take_changes().into_iter().collect(),
    })
}

fn from_js<T: serde::de::DeserializeOwned>(value: &JsValue) -> Result<T, String> {
    let text = js_sys::JSON::stringify(value)
        .map_err(|_| "value is not JSON-serializable".to_string())?
        .as_string()
        .unwrap_or_default();
    serde_json::from_str(&text).map_err(|e| e.to_string())
}

fn to_js<T: Serialize>(value: &T) -> Result<JsValue, JsValue> {
    let text = serde_json::to_string(value).map_err(|e| JsValue::from_str(&e.to_string()))?;
    js_sys::JSON::parse(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sb_core::host::{KeyValueStore, STRICT_MODE_KEY};

    fn background() -> WasmBackground {
        Background::new(
            MemoryRuleEngine::new(),
            MemoryStore::new(),
            MemoryTabs::default(),
            ManualClock::new(DateTime::from_timestamp(1_700_000_000, 0).unwrap()),
            Settings::default(),
            StdRng::seed_from_u64(5),
        )
    }

    #[test]
    fn test_collect_changes_after_block() {
        let mut bg = background();
        let res = bg.handle(Action::BlockUrl {
            url: "example.com".to_string(),
            block_domain: true,
        });
        assert!(res.success);

        let changes = collect_changes(&mut bg, &[]).unwrap();
        let update = changes.rule_update.unwrap();
        assert!(update.remove_rule_ids.is_empty());
        assert_eq!(update.add_rules.len(), 1);
        assert!(changes.storage_update.is_empty());
    }

    #[test]
    fn test_unchanged_rules_omit_update() {
        let mut bg = background();
        bg.handle(Action::BlockUrl {
            url: "example.com".to_string(),
            block_domain: true,
        });
        let before = bg.engine.get_dynamic_rules().unwrap();
        bg.handle(Action::GetRules);

        let changes = collect_changes(&mut bg, &before).unwrap();
        assert!(changes.rule_update.is_none());
        assert!(serde_json::to_value(&changes).unwrap().get("ruleUpdate").is_none());
    }

    #[test]
    fn test_storage_changes_reported() {
        let mut bg = background();
        bg.handle(Action::SetStrictMode { enabled: true });
        let changes = collect_changes(&mut bg, &[]).unwrap();
        assert_eq!(changes.storage_update.get(STRICT_MODE_KEY), Some(&Value::Bool(true)));
        assert_eq!(bg.storage.get(STRICT_MODE_KEY).unwrap(), Some(Value::Bool(true)));
    }
}
