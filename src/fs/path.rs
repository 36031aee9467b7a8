// Filesystem path <-> object key translation.
//
// A path `/a/b.txt` maps to key `a/b.txt`; `/` maps to the empty key, which
// stands for the bucket root.

pub const SEPARATOR: char = '/';

/// Object key for a filesystem path: exactly one leading separator is stripped.
pub fn to_key(path: &str) -> &str {
    path.strip_prefix(SEPARATOR).unwrap_or(path)
}

/// Filesystem path for an object key.
pub fn to_path(key: &str) -> String {
    format!("{}{}", SEPARATOR, key)
}

/// Final segment of a path or key, used to name staged files.
pub fn local_name(path: &str) -> &str {
    path.rsplit(SEPARATOR).next().unwrap_or(path)
}

/// Join a child name onto a directory path.
pub fn join(parent: &str, name: &str) -> String {
    if parent == "/" { format!("/{}", name) } else { format!("{}/{}", parent, name) }
}

/// Parent directory of a path; the root is its own parent.
pub fn parent(path: &str) -> &str {
    match path.rfind(SEPARATOR) {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}

/// Listing prefix for the children of `key`: the root lists everything,
/// any other key lists `key/`.
pub fn child_prefix(key: &str) -> String {
    if key.is_empty() { String::new() } else { format!("{}{}", key, SEPARATOR) }
}

/// Whether a key names a regular file.
///
/// The store has no type information, so a final segment containing a dot is a
/// file and anything else is a directory. Extension-less files are therefore
/// reported as directories.
pub fn is_file_key(key: &str) -> bool {
    !key.is_empty() && local_name(key).contains('.')
}
