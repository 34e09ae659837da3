use webrtc::ice::mdns::MulticastDnsMode;

/// Environment variable selecting the ICE mDNS mode
pub const MDNS_MODE_ENV: &str = "VISION_STREAM_WEBRTC_MDNS_MODE";

pub fn parse_mdns_mode(raw: &str) -> Option<MulticastDnsMode> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "disabled" | "off" | "false" | "0" => Some(MulticastDnsMode::Disabled),
        "query" | "query_only" | "query-only" => Some(MulticastDnsMode::QueryOnly),
        "gather" | "query_and_gather" | "query-and-gather" | "on" | "true" | "1" => {
            Some(MulticastDnsMode::QueryAndGather)
        }
        _ => None,
    }
}

pub fn mdns_mode() -> MulticastDnsMode {
    // QueryOnly keeps .local host candidates out of the offer
    std::env::var(MDNS_MODE_ENV)
        .ok()
        .and_then(|raw| parse_mdns_mode(&raw))
        .unwrap_or(MulticastDnsMode::QueryOnly)
}

pub fn mdns_host_name(session_id: &str) -> String {
    format!("{session_id}.local")
}
