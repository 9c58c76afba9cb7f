//! Search-domain expansion (spec §4.G).

/// Expand `host` into the ordered list of fully-qualified names to try,
/// given `search_domains` and `ndots`.
///
/// - If `host` has `>= ndots` dots, try it first, then `host.<domain>` for
///   each search domain.
/// - Otherwise try `host.<domain>` for each search domain first, then
///   `host` last.
/// - Search domains are normalized to end with `.`.
pub fn expand(host: &str, search_domains: &[String], ndots: u32) -> Vec<String> {
    let dots = host.chars().filter(|c| *c == '.').count() as u32;
    let qualified: Vec<String> = search_domains
        .iter()
        .map(|domain| {
            let domain = if domain.ends_with('.') {
                domain.clone()
            } else {
                format!("{domain}.")
            };
            format!("{host}.{domain}")
        })
        .collect();
    let bare = if host.ends_with('.') { host.to_string() } else { format!("{host}.") };

    let mut out = Vec::with_capacity(qualified.len() + 1);
    if dots >= ndots {
        out.push(bare);
        out.extend(qualified);
    } else {
        out.extend(qualified);
        out.push(bare);
    }
    out
}
