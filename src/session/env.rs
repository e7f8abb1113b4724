//! Environment layering for remote commands

/// Merge environment layers; a later layer's value wins for a repeated key
///
/// Keys keep the position of their first appearance.
pub fn merge_env<'a, I>(layers: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = &'a [(String, String)]>,
{
    let mut merged: Vec<(String, String)> = Vec::new();
    for layer in layers {
        for (key, value) in layer {
            match merged.iter_mut().find(|(k, _)| k == key) {
                Some(existing) => existing.1 = value.clone(),
                None => merged.push((key.clone(), value.clone())),
            }
        }
    }
    merged
}
