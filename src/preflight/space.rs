/*!
 * Target free-space verification
 */

use std::path::Path;

use sysinfo::Disks;

use crate::config::PreflightConfig;
use crate::error::{ExodusError, Result};

/// Space the migration needs at the target:
/// source total × ratio, plus a fixed buffer, plus the temp-part allowance.
pub fn required_bytes(source_total: u64, config: &PreflightConfig) -> u64 {
    let scaled = (source_total as f64 * config.space_ratio) as u64;
    scaled
        .saturating_add(config.space_buffer_bytes)
        .saturating_add(config.temp_allowance_bytes)
}

/// Free space on the disk holding `path`
pub fn free_space_at(path: &Path) -> Option<u64> {
    let disks = Disks::new_with_refreshed_list();
    disks
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        // Nested mounts: the longest matching mount point wins
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space())
}

/// Resolve available target space: a local mount is measured, a remote
/// target uses its configured capacity minus what it already holds.
pub fn available_bytes(
    target_mount: Option<&Path>,
    target_used: u64,
    config: &PreflightConfig,
) -> Result<u64> {
    if let Some(path) = target_mount {
        if let Some(free) = free_space_at(path) {
            return Ok(free);
        }
    }
    if let Some(capacity) = config.target_capacity_bytes {
        return Ok(capacity.saturating_sub(target_used));
    }
    Err(ExodusError::Config(
        "target free space unknown: no local mount and no target_capacity_bytes".to_string(),
    ))
}

/// Verify the target can hold the migration
pub fn verify_space(source_total: u64, available: u64, config: &PreflightConfig) -> Result<u64> {
    let required = required_bytes(source_total, config);
    if available < required {
        return Err(ExodusError::InsufficientSpace {
            required,
            available,
        });
    }
    Ok(required)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(ratio: f64, buffer: u64, temp: u64) -> PreflightConfig {
        let mut config = PreflightConfig::default();
        config.space_ratio = ratio;
        config.space_buffer_bytes = buffer;
        config.temp_allowance_bytes = temp;
        config
    }

    #[test]
    fn test_required_bytes_formula() {
        let config = config(1.2, 5, 2);
        assert_eq!(required_bytes(100, &config), 127);
    }

    #[test]
    fn test_spec_scenario_space_failure() {
        // 100 GB source, ratio 1.2, 5 GB buffer, 2 GB temp, 110 GB free
        const GB: u64 = 1024 * 1024 * 1024;
        let config = config(1.2, 5 * GB, 2 * GB);
        let result = verify_space(100 * GB, 110 * GB, &config);
        match result {
            Err(ExodusError::InsufficientSpace {
                required,
                available,
            }) => {
                assert_eq!(required, 127 * GB);
                assert_eq!(available, 110 * GB);
            }
            other => panic!("expected SPACE failure, got {:?}", other),
        }
    }

    #[test]
    fn test_verify_space_passes() {
        let config = config(1.2, 0, 0);
        assert_eq!(verify_space(100, 130, &config).unwrap(), 120);
    }

    #[test]
    fn test_available_from_configured_capacity() {
        let mut config = config(1.2, 0, 0);
        config.target_capacity_bytes = Some(1000);
        assert_eq!(available_bytes(None, 400, &config).unwrap(), 600);
    }

    #[test]
    fn test_available_unknown_is_config_error() {
        let config = config(1.2, 0, 0);
        assert!(available_bytes(None, 0, &config).is_err());
    }

    #[test]
    fn test_free_space_at_root() {
        // Any real mount should report some figure
        let free = free_space_at(Path::new("/"));
        assert!(free.is_some());
    }
}
