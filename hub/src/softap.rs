//! SoftAP + DHCP bring-up. On real hub hardware this configures the
//! wireless interface nodes join before control-plane discovery; on a
//! desktop/server deployment there is no radio to configure and this is a
//! no-op that logs the SSID it would have advertised. Treated as a named
//! external collaborator: its internals are out of scope, but every
//! startup path still calls through this module rather than skipping it.

use tracing::{info, warn};

use crate::config::HubConfig;

/// Brings up the SoftAP. Returns `Ok(())` whether or not a radio is
/// actually present — bring-up failure here is never fatal to the rest of
/// the hub, unlike a UDP socket bind failing.
pub async fn bring_up(config: &HubConfig) -> anyhow::Result<()> {
    match std::env::var("LW_HAS_RADIO") {
        Ok(v) if v == "1" => {
            // Real bring-up would hand off to a platform HAL here.
            warn!(ssid = %config.softap_ssid, "LW_HAS_RADIO=1 but no radio HAL is linked in; skipping");
        }
        _ => {
            info!(ssid = %config.softap_ssid, "no radio present, running control-plane-only");
        }
    }
    Ok(())
}
