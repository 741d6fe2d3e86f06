//! Deterministic device-type classification for SNMP discovery.

/// Hostname prefix → device type. Checked first; operators name gear by
/// role more reliably than vendors describe it.
const HOSTNAME_PREFIXES: &[(&str, &str)] = &[
    ("sw-", "switch"),
    ("switch-", "switch"),
    ("rtr-", "router"),
    ("router-", "router"),
    ("fw-", "firewall"),
    ("ap-", "wireless_ap"),
    ("wap-", "wireless_ap"),
    ("ups-", "ups"),
    ("prn-", "printer"),
];

/// sysDescr substring (lowercased haystack) → device type.
const SYS_DESCR_MARKERS: &[(&str, &str)] = &[
    ("ios xr", "router"),
    ("junos", "router"),
    ("routeros", "router"),
    ("catalyst", "switch"),
    ("nexus", "switch"),
    ("procurve", "switch"),
    ("adaptive security appliance", "firewall"),
    ("fortigate", "firewall"),
    ("pan-os", "firewall"),
    ("airos", "wireless_ap"),
    ("aironet", "wireless_ap"),
    ("linux", "server"),
    ("windows", "server"),
    ("jetdirect", "printer"),
    ("ups", "ups"),
];

/// sysObjectID enterprise-arc prefix → device type.
const SYS_OBJECT_ID_PREFIXES: &[(&str, &str)] = &[
    ("1.3.6.1.4.1.9.1.", "router"),     // cisco chassis
    ("1.3.6.1.4.1.9.12.", "switch"),    // cisco stack
    ("1.3.6.1.4.1.2636.", "router"),    // juniper
    ("1.3.6.1.4.1.12356.", "firewall"), // fortinet
    ("1.3.6.1.4.1.25461.", "firewall"), // palo alto
    ("1.3.6.1.4.1.14823.", "wireless_ap"), // aruba
    ("1.3.6.1.4.1.11.2.3.9.", "printer"),  // hp printer
    ("1.3.6.1.4.1.318.", "ups"),        // apc
    ("1.3.6.1.4.1.8072.", "server"),    // net-snmp
];

const FALLBACK: &str = "network_device";

/// Table-lookup classification over hostname prefix, sysDescr substring,
/// and sysObjectID prefix, in that order.
pub fn classify_device_type(
    hostname: Option<&str>,
    sys_descr: &str,
    sys_object_id: &str,
) -> &'static str {
    if let Some(host) = hostname {
        let host = host.to_ascii_lowercase();
        for (prefix, ty) in HOSTNAME_PREFIXES {
            if host.starts_with(prefix) {
                return ty;
            }
        }
    }

    let descr = sys_descr.to_ascii_lowercase();
    for (marker, ty) in SYS_DESCR_MARKERS {
        if !descr.is_empty() && descr.contains(marker) {
            return ty;
        }
    }

    for (prefix, ty) in SYS_OBJECT_ID_PREFIXES {
        if sys_object_id.starts_with(prefix) {
            return ty;
        }
    }

    FALLBACK
}
