//! Hook installation into the host assistant's settings document.
//!
//! One DES pre-tool-use entry and one subagent-stop entry per
//! installation. Detection matches both the legacy script-path command
//! form and the canonical module-invocation form, so repeated installs
//! never duplicate and uninstall removes every DES-originated entry
//! (including duplicates) while preserving non-DES hooks and unknown
//! settings keys.

use camino::Utf8Path;
use serde_json::{Value, json};

use des_utils::atomic_write::write_file_atomic;
use des_utils::error::HookInstallError;

/// Settings key for pre-tool-use hook entries.
pub const PRE_TOOL_USE_EVENT: &str = "PreToolUse";

/// Settings key for subagent-stop hook entries.
pub const SUBAGENT_STOP_EVENT: &str = "SubagentStop";

/// Canonical modern command forms.
pub const MODERN_PRE_TOOL_USE: &str = "nwave-des hook pre-tool-use";
pub const MODERN_SUBAGENT_STOP: &str = "nwave-des hook subagent-stop";

/// Legacy script-path markers still recognised for detection.
pub const LEGACY_PRE_TOOL_USE: &str = "des/hooks/pre_tool_use.py";
pub const LEGACY_SUBAGENT_STOP: &str = "des/hooks/subagent_stop.py";

/// Whether a command string is a DES pre-tool-use hook (either generation).
#[must_use]
pub fn is_des_pre_tool_use_command(command: &str) -> bool {
    command.contains(MODERN_PRE_TOOL_USE) || command.contains(LEGACY_PRE_TOOL_USE)
}

/// Whether a command string is a DES subagent-stop hook (either generation).
#[must_use]
pub fn is_des_subagent_stop_command(command: &str) -> bool {
    command.contains(MODERN_SUBAGENT_STOP) || command.contains(LEGACY_SUBAGENT_STOP)
}

fn is_des_command(command: &str) -> bool {
    is_des_pre_tool_use_command(command) || is_des_subagent_stop_command(command)
}

fn entry_has_des_command(entry: &Value, detect: fn(&str) -> bool) -> bool {
    entry
        .get("hooks")
        .and_then(Value::as_array)
        .is_some_and(|hooks| {
            hooks.iter().any(|h| {
                h.get("command")
                    .and_then(Value::as_str)
                    .is_some_and(detect)
            })
        })
}

fn event_entries_mut<'a>(settings: &'a mut Value, event: &str) -> &'a mut Vec<Value> {
    let hooks = settings
        .as_object_mut()
        .expect("settings document is an object")
        .entry("hooks")
        .or_insert_with(|| json!({}));
    let entries = hooks
        .as_object_mut()
        .expect("hooks is an object")
        .entry(event)
        .or_insert_with(|| json!([]));
    entries.as_array_mut().expect("hook event is an array")
}

fn des_pre_tool_use_entry() -> Value {
    json!({
        "matcher": "Task",
        "hooks": [{"type": "command", "command": MODERN_PRE_TOOL_USE}]
    })
}

fn des_subagent_stop_entry() -> Value {
    json!({
        "hooks": [{"type": "command", "command": MODERN_SUBAGENT_STOP}]
    })
}

/// Install the two DES hook entries.
///
/// Returns true when the document changed. An entry already present in
/// either the legacy or the modern command form is left alone.
pub fn install_hooks(settings: &mut Value) -> Result<bool, HookInstallError> {
    require_object(settings)?;
    let mut changed = false;

    let pre = event_entries_mut(settings, PRE_TOOL_USE_EVENT);
    if !pre
        .iter()
        .any(|e| entry_has_des_command(e, is_des_pre_tool_use_command))
    {
        pre.push(des_pre_tool_use_entry());
        changed = true;
    }

    let stop = event_entries_mut(settings, SUBAGENT_STOP_EVENT);
    if !stop
        .iter()
        .any(|e| entry_has_des_command(e, is_des_subagent_stop_command))
    {
        stop.push(des_subagent_stop_entry());
        changed = true;
    }

    Ok(changed)
}

/// Remove every DES-originated hook entry, duplicates included.
///
/// Non-DES hooks are preserved; a hook item list that mixes DES and
/// custom commands keeps its custom items. Returns the number of hook
/// items removed.
pub fn uninstall_hooks(settings: &mut Value) -> Result<usize, HookInstallError> {
    require_object(settings)?;
    let mut removed = 0usize;

    let Some(hooks) = settings.get_mut("hooks").and_then(Value::as_object_mut) else {
        return Ok(0);
    };

    for event in [PRE_TOOL_USE_EVENT, SUBAGENT_STOP_EVENT] {
        let Some(entries) = hooks.get_mut(event).and_then(Value::as_array_mut) else {
            continue;
        };
        for entry in entries.iter_mut() {
            if let Some(items) = entry.get_mut("hooks").and_then(Value::as_array_mut) {
                let before = items.len();
                items.retain(|h| {
                    !h.get("command")
                        .and_then(Value::as_str)
                        .is_some_and(is_des_command)
                });
                removed += before - items.len();
            }
        }
        entries.retain(|entry| {
            entry
                .get("hooks")
                .and_then(Value::as_array)
                .is_none_or(|items| !items.is_empty())
        });
        if entries.is_empty() {
            hooks.remove(event);
        }
    }

    if hooks.is_empty() {
        settings.as_object_mut().expect("checked above").remove("hooks");
    }

    Ok(removed)
}

fn require_object(settings: &Value) -> Result<(), HookInstallError> {
    if settings.is_object() {
        Ok(())
    } else {
        Err(HookInstallError::InvalidSettings {
            path: "<memory>".to_string(),
            reason: "settings document root is not a JSON object".to_string(),
        })
    }
}

fn load_settings(path: &Utf8Path) -> Result<Value, HookInstallError> {
    match std::fs::read_to_string(path.as_std_path()) {
        Ok(content) => {
            serde_json::from_str(&content).map_err(|e| HookInstallError::InvalidSettings {
                path: path.to_string(),
                reason: e.to_string(),
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(json!({})),
        Err(e) => Err(HookInstallError::InvalidSettings {
            path: path.to_string(),
            reason: e.to_string(),
        }),
    }
}

fn store_settings(path: &Utf8Path, settings: &Value) -> Result<(), HookInstallError> {
    let mut content =
        serde_json::to_string_pretty(settings).map_err(|e| HookInstallError::WriteFailed {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
    content.push('\n');
    write_file_atomic(path, &content).map_err(|e| HookInstallError::WriteFailed {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

/// Install into a settings file (created when missing). Returns true when
/// the file changed.
pub fn install_into_file(path: &Utf8Path) -> Result<bool, HookInstallError> {
    let mut settings = load_settings(path)?;
    let changed = install_hooks(&mut settings)?;
    if changed || !path.as_std_path().exists() {
        store_settings(path, &settings)?;
    }
    Ok(changed)
}

/// Uninstall from a settings file. A missing file is a no-op. Returns the
/// number of hook items removed.
pub fn uninstall_from_file(path: &Utf8Path) -> Result<usize, HookInstallError> {
    if !path.as_std_path().exists() {
        return Ok(0);
    }
    let mut settings = load_settings(path)?;
    let removed = uninstall_hooks(&mut settings)?;
    if removed > 0 {
        store_settings(path, &settings)?;
    }
    Ok(removed)
}

/// Count DES hook entries per event in a settings document.
#[must_use]
pub fn installed_des_hooks(settings: &Value) -> (usize, usize) {
    let count = |event: &str, detect: fn(&str) -> bool| {
        settings
            .get("hooks")
            .and_then(|h| h.get(event))
            .and_then(Value::as_array)
            .map_or(0, |entries| {
                entries
                    .iter()
                    .filter(|e| entry_has_des_command(e, detect))
                    .count()
            })
    };
    (
        count(PRE_TOOL_USE_EVENT, is_des_pre_tool_use_command),
        count(SUBAGENT_STOP_EVENT, is_des_subagent_stop_command),
    )
}
