use std::sync::OnceLock;

use regex::Regex;

/// Endpoint address allow-list.
///
/// Accepted: `scheme://[user[:pass]@]host[:port][/path][?query]` where scheme is
/// one of http, ftp, rtsp, grpc (each optionally with a trailing `s`) and host
/// is a DNS name (single label allowed), `localhost` or a dotted-quad IPv4
/// address. Matching is case-insensitive.
pub fn validate_uri(uri: &str) -> bool {
    static URI_RE: OnceLock<Regex> = OnceLock::new();
    let re = URI_RE.get_or_init(|| {
        Regex::new(concat!(
            r"(?i)^(?:http|ftp|rtsp|grpc)s?://",
            r"(?:[^:@/\s]+(?::[^:@/\s]*)?@)?",
            r"(?:",
            r"localhost",
            r"|\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}",
            r"|[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?(?:\.[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?)*\.?",
            r")",
            r"(?::\d{1,5})?",
            r"(?:/?|[/?][^#\s]*)$",
        ))
        .unwrap()
    });
    re.is_match(uri)
}
