// Provider-name normalization and namespaced-name resolution
//
// Published tool names keep the `<normalized provider>_<tool>` shape.
// Because normalized names may themselves contain underscores, the resolver
// matches namespaced names against the set of known providers and takes the
// longest normalized name that is a full prefix. Combined with the
// registration-time rejection of normalized-name collisions this makes
// resolution deterministic for every registered provider.

/// Lower-case the name and replace every non-alphanumeric character with
/// an underscore.
pub fn normalize_provider_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Build the catalog-wide name for a provider's tool.
pub fn namespaced_name(provider_name: &str, tool_name: &str) -> String {
    format!("{}_{}", normalize_provider_name(provider_name), tool_name)
}

/// Split a namespaced name back into (normalized provider name, tool name).
///
/// `normalized_providers` is the full set of registered normalized names.
/// The longest matching prefix wins, so a provider `my_server` never
/// shadows `my_server_v2` and multi-word provider names resolve correctly.
/// The tool segment must be non-empty; a bare `provider_` never resolves
/// to an empty tool name.
pub fn resolve_namespaced<'a>(
    namespaced: &'a str,
    normalized_providers: impl IntoIterator<Item = &'a str>,
) -> Option<(&'a str, &'a str)> {
    let mut best: Option<&str> = None;
    for candidate in normalized_providers {
        if namespaced.len() > candidate.len() + 1
            && namespaced.starts_with(candidate)
            && namespaced.as_bytes()[candidate.len()] == b'_'
            && best.map_or(true, |b| candidate.len() > b.len())
        {
            best = Some(candidate);
        }
    }
    best.map(|provider| (provider, &namespaced[provider.len() + 1..]))
}
