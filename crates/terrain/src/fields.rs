//! Field-name inference for loosely structured survey sources.
//!
//! Resolution is first-match in *source field order*: the outer loop walks
//! the source fields, the inner loop the candidates, and the first source
//! field that matches any candidate wins. There is no scoring.

/// Fallback names for the elevation field, after the caller's own name.
pub const ELEVATION_CANDIDATES: [&str; 3] = ["z", "elevation", "height"];

/// Fallback names for the classification tag field, after the caller's own name.
pub const TAG_CANDIDATES: [&str; 5] = ["comment", "descriptio", "description", "note", "tag"];

/// Fallback name for a breakline's name field.
pub const NAME_CANDIDATES: [&str; 1] = ["name"];

/// Resolve a field by case-insensitive match of `preferred` followed by
/// `fallbacks`. Returns the source field's own spelling.
pub fn resolve_field<'a, S: AsRef<str>>(
    source_fields: &'a [S],
    preferred: Option<&str>,
    fallbacks: &[&str],
) -> Option<&'a str> {
    let candidates: Vec<&str> = preferred.into_iter().chain(fallbacks.iter().copied()).collect();

    source_fields
        .iter()
        .map(|f| f.as_ref())
        .find(|field| candidates.iter().any(|c| field.eq_ignore_ascii_case(c)))
}

/// Resolve the elevation field, honouring the caller's exact name first.
///
/// A requested field present in the source is used even with
/// `use_geometry_z`; that flag only turns off the heuristic fallback.
/// Returns `None` when elevations should come from the geometry.
pub fn resolve_elevation_field<'a, S: AsRef<str>>(
    source_fields: &'a [S],
    requested: Option<&str>,
    use_geometry_z: bool,
) -> Option<&'a str> {
    if let Some(name) = requested {
        if let Some(exact) = source_fields.iter().map(|f| f.as_ref()).find(|f| *f == name) {
            return Some(exact);
        }
    }

    if use_geometry_z {
        return None;
    }

    resolve_field(source_fields, requested, &ELEVATION_CANDIDATES)
}

/// Resolve the tag field, honouring the caller's exact name first.
pub fn resolve_tag_field<'a, S: AsRef<str>>(
    source_fields: &'a [S],
    requested: Option<&str>,
) -> Option<&'a str> {
    if let Some(name) = requested {
        if let Some(exact) = source_fields.iter().map(|f| f.as_ref()).find(|f| *f == name) {
            return Some(exact);
        }
    }

    resolve_field(source_fields, requested, &TAG_CANDIDATES)
}

/// Resolve the breakline name field.
pub fn resolve_name_field<'a, S: AsRef<str>>(
    source_fields: &'a [S],
    requested: Option<&str>,
) -> Option<&'a str> {
    resolve_field(source_fields, requested, &NAME_CANDIDATES)
}
