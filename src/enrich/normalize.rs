use crate::lookup::RawHostData;
use crate::storage::NewHostRecord;
use std::net::IpAddr;

/// Placeholder stored for any field the lookup service did not report
pub const NOT_AVAILABLE: &str = "N/A";

/// Map a raw lookup response onto a fully populated record.
///
/// The record is keyed by the requested address (canonical form) so replace
/// semantics line up with what the caller submitted.
pub fn normalize(address: IpAddr, raw: RawHostData) -> NewHostRecord {
    NewHostRecord {
        ip_address: address.to_string(),
        country: or_sentinel(raw.country_name),
        city: or_sentinel(raw.city),
        org: or_sentinel(raw.org),
        os: or_sentinel(raw.os),
        hostname: raw.hostnames.unwrap_or_default().join(", "),
        isp: or_sentinel(raw.isp),
        asn: or_sentinel(raw.asn),
        last_shodan_update: or_sentinel(raw.last_update),
        vulns: raw.vulns.unwrap_or_default(),
        ports: raw.ports.unwrap_or_default(),
    }
}

fn or_sentinel(value: Option<String>) -> String {
    value.unwrap_or_else(|| NOT_AVAILABLE.to_string())
}
