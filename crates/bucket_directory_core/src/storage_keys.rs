use std::path::{Component, Path};

/// Object key that holds the in-transit archive. The leading underscores keep
/// it apart from anything a site directory would normally contain.
pub const STAGING_ARCHIVE_KEY: &str = "__bucket_directory.archive.tar.gz";

pub fn is_staging_key(key: &str, staging_key: &str) -> bool {
    key.trim_start_matches('/') == staging_key.trim_start_matches('/')
}

/// Converts a path relative to the synchronized root into an object key.
///
/// Returns `None` for paths that would escape the root or have no normal
/// components.
pub fn object_key_for(relative_path: &Path) -> Option<String> {
    let mut segments = Vec::new();
    for component in relative_path.components() {
        match component {
            Component::Normal(segment) => segments.push(segment.to_str()?.to_string()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

/// File name for the persisted lifecycle record of a spec.
pub fn state_file_stem(spec_name: &str) -> String {
    spec_name
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect()
}
