//! Hook-installation idempotence against a real settings file.

use camino::Utf8PathBuf;
use serde_json::{Value, json};
use tempfile::TempDir;

use nwave_des::hooks::{install_into_file, installed_des_hooks, uninstall_from_file};

fn settings_path(dir: &TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(dir.path().join(".claude/settings.json")).unwrap()
}

fn read_settings(path: &Utf8PathBuf) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path.as_std_path()).unwrap()).unwrap()
}

#[test]
fn install_twice_uninstall_once_leaves_no_des_hooks() {
    let dir = TempDir::new().unwrap();
    let path = settings_path(&dir);

    // Host settings initially carry one custom hook and unrelated keys.
    std::fs::create_dir_all(path.parent().unwrap().as_std_path()).unwrap();
    std::fs::write(
        path.as_std_path(),
        serde_json::to_string_pretty(&json!({
            "model": "opus",
            "hooks": {
                "PreToolUse": [{
                    "matcher": "Bash",
                    "hooks": [{"type": "command", "command": "./check-shell.sh"}]
                }]
            }
        }))
        .unwrap(),
    )
    .unwrap();

    assert!(install_into_file(&path).unwrap());
    assert!(!install_into_file(&path).unwrap());

    let installed = read_settings(&path);
    assert_eq!(installed_des_hooks(&installed), (1, 1));

    let removed = uninstall_from_file(&path).unwrap();
    assert_eq!(removed, 2);

    let end = read_settings(&path);
    assert_eq!(installed_des_hooks(&end), (0, 0));
    assert_eq!(end["model"], "opus");
    let pre = end["hooks"]["PreToolUse"].as_array().unwrap();
    assert_eq!(pre.len(), 1);
    assert_eq!(pre[0]["hooks"][0]["command"], "./check-shell.sh");
}

#[test]
fn n_installs_leave_exactly_one_entry_per_event() {
    let dir = TempDir::new().unwrap();
    let path = settings_path(&dir);

    for _ in 0..5 {
        install_into_file(&path).unwrap();
    }

    assert_eq!(installed_des_hooks(&read_settings(&path)), (1, 1));
}

#[test]
fn legacy_deployment_upgrades_without_duplication() {
    let dir = TempDir::new().unwrap();
    let path = settings_path(&dir);

    std::fs::create_dir_all(path.parent().unwrap().as_std_path()).unwrap();
    std::fs::write(
        path.as_std_path(),
        serde_json::to_string_pretty(&json!({
            "hooks": {
                "PreToolUse": [{
                    "hooks": [{"type": "command",
                               "command": "python3 .nwave/des/hooks/pre_tool_use.py"}]
                }],
                "SubagentStop": [{
                    "hooks": [{"type": "command",
                               "command": "python3 .nwave/des/hooks/subagent_stop.py"}]
                }]
            }
        }))
        .unwrap(),
    )
    .unwrap();

    // Legacy entries satisfy the install; nothing is added.
    assert!(!install_into_file(&path).unwrap());
    assert_eq!(installed_des_hooks(&read_settings(&path)), (1, 1));

    // Uninstall removes the legacy generation too.
    assert_eq!(uninstall_from_file(&path).unwrap(), 2);
    assert_eq!(installed_des_hooks(&read_settings(&path)), (0, 0));
}
