// MAC-OUI vendor lookup (§4.6).
//
// Used as the first, cheapest classification signal before any SSH session
// opens: the OUI narrows which `VendorDriver` to try, and stands alone as
// `Device::vendor` when a device is never accessible.

use crate::model::device::OuiHint;

/// Looks up the IEEE-registered vendor name for a canonical
/// (`AA:BB:CC:DD:EE:FF`) MAC address, using the bundled `oui-data` table.
pub fn vendor_name(canonical_mac: &str) -> Option<&'static str> {
    let oui: String = canonical_mac.chars().take(8).filter(|c| *c != ':').collect();
    if oui.len() != 6 {
        return None;
    }
    oui_data::lookup(&oui)
}

/// Maps a vendor string onto the coarse `OuiHint` the driver registry
/// dispatches on (§4.5). Substring matching since `oui-data` vendor names
/// vary in formatting across registrations by the same company.
pub fn hint_from_vendor(vendor: &str) -> OuiHint {
    let lower = vendor.to_lowercase();
    if lower.contains("mikrotik") || lower.contains("routerboard") {
        OuiHint::Mikrotik
    } else if lower.contains("zyxel") {
        OuiHint::Zyxel
    } else if lower.contains("3com") || lower.contains("h3c") {
        OuiHint::ThreeCom
    } else if lower.contains("ruckus") || lower.contains("commscope") {
        OuiHint::Ruckus
    } else {
        OuiHint::Unknown
    }
}

/// Convenience: OUI lookup plus hint classification in one call.
pub fn classify(canonical_mac: &str) -> (Option<&'static str>, OuiHint) {
    match vendor_name(canonical_mac) {
        Some(vendor) => (Some(vendor), hint_from_vendor(vendor)),
        None => (None, OuiHint::Unknown),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hint_from_vendor_matches_mikrotik() {
        assert_eq!(hint_from_vendor("Mikrotikls SIA"), OuiHint::Mikrotik);
    }

    #[test]
    fn test_hint_from_vendor_matches_zyxel() {
        assert_eq!(hint_from_vendor("Zyxel Communications Corp"), OuiHint::Zyxel);
    }

    #[test]
    fn test_hint_from_vendor_unknown_default() {
        assert_eq!(hint_from_vendor("Some Random Manufacturer"), OuiHint::Unknown);
    }
}
