//! Request URL construction for the speed test endpoints.
//!
//! Every measured request carries a random `r` query value so that proxies
//! and browser-style caches in between never answer on the server's behalf.

use rand::Rng;

/// Returns the separator to use before appending a query parameter.
///
/// The URL is scanned backwards: a `?` seen before the last path separator
/// (`/` or `\`) means a query already exists and `&` is returned.
///
/// # Examples
///
/// ```
/// use rspeed::url::url_sep;
///
/// assert_eq!(url_sep("https://host/garbage.php"), "?");
/// assert_eq!(url_sep("https://host/garbage.php?cors=true"), "&");
/// assert_eq!(url_sep("https://host/x?a=1/empty.php"), "?");
/// ```
pub fn url_sep(url: &str) -> &'static str {
    for c in url.chars().rev() {
        match c {
            '?' => return "&",
            '/' | '\\' => break,
            _ => {}
        }
    }
    "?"
}

/// Random cache-busting value in `[0, 1)`.
pub fn cache_buster() -> String {
    format!("{:.6}", rand::thread_rng().gen::<f64>())
}

/// `GET {url}?r={random}&ckSize={chunk}`
pub fn download_url(base: &str, chunk_size: u32) -> String {
    format!(
        "{}{}r={}&ckSize={}",
        base,
        url_sep(base),
        cache_buster(),
        chunk_size
    )
}

/// `POST {url}?r={random}`
pub fn upload_url(base: &str) -> String {
    format!("{}{}r={}", base, url_sep(base), cache_buster())
}

/// `GET {url}?r={random}`
pub fn ping_url(base: &str) -> String {
    format!("{}{}r={}", base, url_sep(base), cache_buster())
}

/// `GET {url}?isp=true&r={random}`, the ISP flag being optional.
pub fn get_ip_url(base: &str, isp_info: bool) -> String {
    let isp = if isp_info { "isp=true&" } else { "" };
    format!("{}{}{}r={}", base, url_sep(base), isp, cache_buster())
}

/// Server probes concatenate the path without any separator logic.
pub fn probe_url(server_base: &str) -> String {
    format!("{}empty.php", server_base)
}
