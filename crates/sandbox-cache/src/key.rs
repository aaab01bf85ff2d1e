use sha2::{Digest, Sha256};

/// Deterministic short cache key for a dependency set.
///
/// Pure function of the normalized set: specs are trimmed, lowercased,
/// sorted and deduplicated, so ordering, case and surrounding whitespace
/// never change the key. An optional tenant identifier salts the hash so
/// tenants never share cache entries.
pub fn cache_key(dependencies: &[String], tenant_id: Option<&str>) -> String {
    let mut specs: Vec<String> = dependencies
        .iter()
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect();
    specs.sort_unstable();
    specs.dedup();

    let mut hasher = Sha256::new();
    hasher.update(specs.join("\n").as_bytes());
    if let Some(tenant) = tenant_id {
        hasher.update(b"\n");
        hasher.update(tenant.as_bytes());
    }

    let mut hex = format!("{:x}", hasher.finalize());
    hex.truncate(16);
    hex
}
