use std::path::{Path, PathBuf};

use crate::app::error::AppError;

/// File name the app ships its ADB binary under inside the native library dir.
pub const BUNDLED_ADB_NAME: &str = "libadb.so";

pub fn normalize_command_path(value: &str) -> String {
    let trimmed = value.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = trimmed
            .strip_prefix(quote)
            .and_then(|candidate| candidate.strip_suffix(quote))
        {
            return inner.trim().to_string();
        }
    }
    trimmed.to_string()
}

/// Configured path, else `adb` from `PATH`.
pub fn resolve_adb_program(configured: &str) -> String {
    let normalized = normalize_command_path(configured);
    if normalized.is_empty() {
        "adb".to_string()
    } else {
        normalized
    }
}

pub fn bundled_adb_path(native_library_dir: &Path) -> PathBuf {
    native_library_dir.join(BUNDLED_ADB_NAME)
}

/// An explicit `adb_path` wins; otherwise the binary bundled in the native library dir, then
/// `adb` from `PATH`.
pub fn shell_adb_program(adb_path: &str, native_library_dir: &str) -> String {
    let native_library_dir = normalize_command_path(native_library_dir);
    if normalize_command_path(adb_path).is_empty() && !native_library_dir.is_empty() {
        return bundled_adb_path(Path::new(&native_library_dir))
            .to_string_lossy()
            .to_string();
    }
    resolve_adb_program(adb_path)
}

pub fn validate_adb_program(program: &str, trace_id: &str) -> Result<(), AppError> {
    if program.trim().is_empty() {
        return Err(AppError::validation("ADB command is empty", trace_id));
    }
    if program == "adb" {
        return Ok(());
    }
    let path = Path::new(program);
    if path.is_dir() {
        return Err(AppError::validation(
            "ADB path must point to an executable file",
            trace_id,
        ));
    }
    if !path.exists() {
        return Err(AppError::dependency(
            format!("ADB executable not found at {program}"),
            trace_id,
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_wrapping_quotes() {
        assert_eq!(
            normalize_command_path("  \"/data/app/lib/arm64/libadb.so\"  "),
            "/data/app/lib/arm64/libadb.so"
        );
        assert_eq!(
            normalize_command_path("'/data/app/lib/arm64/libadb.so'"),
            "/data/app/lib/arm64/libadb.so"
        );
    }

    #[test]
    fn resolves_empty_to_default_adb() {
        assert_eq!(resolve_adb_program(""), "adb");
        assert_eq!(resolve_adb_program("   "), "adb");
    }

    #[test]
    fn bundled_path_points_into_library_dir() {
        assert_eq!(
            bundled_adb_path(Path::new("/data/app/lib/arm64")),
            PathBuf::from("/data/app/lib/arm64/libadb.so")
        );
    }

    #[test]
    fn shell_program_prefers_explicit_path_then_bundled() {
        assert_eq!(shell_adb_program("/opt/adb", "/data/app/lib/arm64"), "/opt/adb");
        assert_eq!(
            shell_adb_program("", "/data/app/lib/arm64"),
            "/data/app/lib/arm64/libadb.so"
        );
        assert_eq!(shell_adb_program("", ""), "adb");
    }

    #[test]
    fn validates_nonexistent_path() {
        let err = validate_adb_program("/this/path/should/not/exist/adb", "t").unwrap_err();
        assert_eq!(err.code, "ERR_DEPENDENCY");
        assert!(err.error.contains("not found"));
    }
}
