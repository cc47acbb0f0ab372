//! Out-of-band identity signals that complement SSH-derived `DeviceInfo`:
//! mDNS hostname resolution, SNMP v2c identity queries, and MAC-OUI vendor
//! lookup (§4.6, §4.7).

pub mod mdns;
pub mod oui;
pub mod snmp;
