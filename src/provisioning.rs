//! One-time appliance setup performed before the engine starts
//!
//! The kiosk's own FPP must run in remote mode (following the show player),
//! and the show player must emit MultiSync packets for it to follow.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::adapters::fpp::{FppClient, FppError};

const MODE_SETTING: &str = "fppMode";
const REMOTE_MODE: &str = "remote";
const MULTISYNC_SETTING: &str = "MultiSyncEnabled";

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("unable to put the local FPP into remote mode: {0}")]
    RemoteMode(#[source] FppError),
}

/// Make sure the local appliance is a remote. Failure is fatal.
pub async fn ensure_remote_mode(local: &FppClient) -> Result<(), ProvisionError> {
    let mode = local
        .get_setting(MODE_SETTING)
        .await
        .map_err(ProvisionError::RemoteMode)?;
    debug!(mode = %mode, "Local FPP mode");

    if mode.contains(REMOTE_MODE) {
        debug!("Already in remote mode");
        return Ok(());
    }

    info!(from = %mode, "Not in remote mode. Switching to remote mode");
    local
        .put_setting(MODE_SETTING, REMOTE_MODE)
        .await
        .map_err(ProvisionError::RemoteMode)
}

/// Make sure the show player emits MultiSync packets.
///
/// Best-effort: returns whether the player ended up configured.
pub async fn ensure_multisync(player: &FppClient) -> bool {
    let result = async {
        let enabled = player.get_setting(MULTISYNC_SETTING).await?;
        debug!(value = %enabled, "Player MultiSync setting");
        if enabled.trim().trim_matches('"') == "1" {
            debug!("Player MultiSync already set up");
            return Ok(());
        }
        info!("Player not emitting MultiSync packets. Enabling");
        player.put_setting(MULTISYNC_SETTING, "1").await
    }
    .await;

    match result {
        Ok(()) => true,
        Err(e) => {
            warn!(
                "Unable to communicate with player {}. Skipping MultiSync check: {}",
                player.base_url(),
                e
            );
            false
        }
    }
}
