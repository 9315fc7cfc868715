use std::path::{Path, PathBuf};

/// 获取客户端状态目录 (~/.campus_qa)
pub fn state_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
        .join(".campus_qa")
}

/// 获取 config.json 路径
pub fn config_json_path() -> PathBuf {
    state_dir().join("config.json")
}

/// 获取 credentials.json 路径
pub fn credentials_json_path() -> PathBuf {
    state_dir().join("credentials.json")
}

/// 获取 last_session.json 路径
pub fn last_session_json_path() -> PathBuf {
    state_dir().join("last_session.json")
}

/// 确保状态目录存在
pub fn ensure_state_dir() -> std::io::Result<PathBuf> {
    let dir = state_dir();
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// 加载 JSON 状态文件
pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, String> {
    if !path.exists() {
        return Err(format!("State file not found: {}", path.display()));
    }
    let content =
        std::fs::read_to_string(path).map_err(|e| format!("Failed to read state file: {e}"))?;
    serde_json::from_str(&content).map_err(|e| format!("Failed to parse state file: {e}"))
}

/// 保存 JSON 状态文件
pub fn save_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create directory: {e}"))?;
    }
    let content = serde_json::to_string_pretty(value)
        .map_err(|e| format!("Failed to serialize state: {e}"))?;
    std::fs::write(path, content).map_err(|e| format!("Failed to write state file: {e}"))
}
