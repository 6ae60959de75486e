//===============
// Path Handling
//===============

/// Normalize a requested filename into an absolute object path.
///
/// Both `/` and `\` separate segments; empty and `.` segments are dropped and
/// `..` removes the previous segment but never climbs above the root, so
/// the result always starts with `/` and contains no traversal.
pub fn normalize_path(filename: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();

    for segment in filename.split(['/', '\\']) {
        match segment {
            "" | "." => continue, // redundant separators, "./"
            ".." => {
                // pop at root is a no-op, traversal stops at "/"
                segments.pop();
            }
            normal => segments.push(normal),
        }
    }

    format!("/{}", segments.join("/"))
}

/// Segments of a normalized path, for joining onto a base URL.
pub fn path_segments(filename: &str) -> Vec<String> {
    normalize_path(filename)
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}
