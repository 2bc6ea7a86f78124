/*!
 * Credential validation
 *
 * Probes the target store with live list/read/write/delete operations on a
 * scratch key, and checks that configured credentials will outlive the
 * validity window. S3-compatible APIs expose no key-expiry call, so the
 * expiry check relies on a configured RFC 3339 timestamp when present.
 */

use chrono::{DateTime, Duration, Utc};

use crate::config::PreflightConfig;
use crate::error::{ExodusError, Result};
use crate::store::ObjectStore;

const PROBE_KEY: &str = ".exodus-preflight-probe";
const PROBE_BODY: &[u8] = b"exodus credential probe";

/// Verify the caller holds list/read/write/delete permission on the store
pub fn probe_permissions(store: &dyn ObjectStore) -> Result<()> {
    store
        .put(PROBE_KEY, PROBE_BODY)
        .map_err(|e| ExodusError::Credentials(format!("write probe failed: {}", e)))?;

    let read_back = store
        .get(PROBE_KEY)
        .map_err(|e| ExodusError::Credentials(format!("read probe failed: {}", e)))?;
    if read_back != PROBE_BODY {
        return Err(ExodusError::Credentials(
            "read probe returned unexpected content".to_string(),
        ));
    }

    store
        .list(PROBE_KEY)
        .map_err(|e| ExodusError::Credentials(format!("list probe failed: {}", e)))?;

    store
        .delete(PROBE_KEY)
        .map_err(|e| ExodusError::Credentials(format!("delete probe failed: {}", e)))?;

    Ok(())
}

/// Verify configured credentials stay valid through the validity window
pub fn verify_expiry(config: &PreflightConfig, now: DateTime<Utc>) -> Result<()> {
    let Some(expiry) = &config.credential_expiry else {
        // Nothing configured: provider-chain credentials, assumed long-lived
        return Ok(());
    };

    let expiry = DateTime::parse_from_rfc3339(expiry)
        .map_err(|e| ExodusError::Config(format!("invalid credential_expiry: {}", e)))?
        .with_timezone(&Utc);

    let window = Duration::hours(config.credential_validity_hours);
    if expiry <= now + window {
        return Err(ExodusError::Credentials(format!(
            "credentials expire at {} which is within the {}h validity window",
            expiry.to_rfc3339(),
            config.credential_validity_hours
        )));
    }
    Ok(())
}

/// Full credential check: expiry window first, then live permission probes
pub fn validate_credentials(
    store: &dyn ObjectStore,
    config: &PreflightConfig,
) -> Result<()> {
    verify_expiry(config, Utc::now())?;
    probe_permissions(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LocalStore;
    use tempfile::tempdir;

    #[test]
    fn test_probe_against_local_store() {
        let dir = tempdir().unwrap();
        let store = LocalStore::new(dir.path(), "target").unwrap();
        probe_permissions(&store).unwrap();
        // Probe key is cleaned up afterwards
        assert!(!store.exists(PROBE_KEY).unwrap());
    }

    #[test]
    fn test_expiry_inside_window_rejected() {
        let mut config = PreflightConfig::default();
        let now = Utc::now();
        config.credential_expiry = Some((now + Duration::hours(6)).to_rfc3339());
        let result = verify_expiry(&config, now);
        assert!(matches!(result, Err(ExodusError::Credentials(_))));
    }

    #[test]
    fn test_expiry_outside_window_accepted() {
        let mut config = PreflightConfig::default();
        let now = Utc::now();
        config.credential_expiry = Some((now + Duration::hours(48)).to_rfc3339());
        verify_expiry(&config, now).unwrap();
    }

    #[test]
    fn test_no_expiry_configured_accepted() {
        let config = PreflightConfig::default();
        verify_expiry(&config, Utc::now()).unwrap();
    }

    #[test]
    fn test_malformed_expiry_is_config_error() {
        let mut config = PreflightConfig::default();
        config.credential_expiry = Some("next tuesday".to_string());
        let result = verify_expiry(&config, Utc::now());
        assert!(matches!(result, Err(ExodusError::Config(_))));
    }
}
