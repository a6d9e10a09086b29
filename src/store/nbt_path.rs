use std::fmt::Display;

use quartz_nbt::{NbtCompound, NbtTag};

use crate::err::WorldError;

/**
 * Looks up a tag by a "/"-separated path of compound names, e.g. `Level/Blocks`.
 */
pub(crate) fn lookup<'a>(root: &'a NbtCompound, path: &str) -> Result<&'a NbtTag, WorldError> {
    let (parents, name) = match path.rsplit_once('/') {
        Some((parents, name)) => (Some(parents), name),
        None => (None, path),
    };
    let mut compound = root;
    for part in parents.into_iter().flat_map(|parents| parents.split('/')) {
        compound = match compound.inner().get(part) {
            Some(NbtTag::Compound(child)) => child,
            Some(_) => {
                return Err(WorldError::MalformedData(
                    path.into(),
                    format!("{part} is not a compound"),
                ))
            }
            None => return Err(WorldError::MalformedData(path.into(), format!("{part} is missing"))),
        };
    }
    compound
        .inner()
        .get(name)
        .ok_or_else(|| WorldError::MalformedData(path.into(), "tag is missing".into()))
}

/**
 * Looks up a tag by path and converts it to the requested type.
 */
pub(crate) fn get<'a, T>(root: &'a NbtCompound, path: &str) -> Result<T, WorldError>
where
    T: TryFrom<&'a NbtTag>,
    T::Error: Display,
{
    T::try_from(lookup(root, path)?).map_err(|e| WorldError::MalformedData(path.into(), e.to_string()))
}

/// Like [`get`], but a missing tag is not an error.
pub(crate) fn get_opt<'a, T>(root: &'a NbtCompound, path: &str) -> Result<Option<T>, WorldError>
where
    T: TryFrom<&'a NbtTag>,
    T::Error: Display,
{
    match lookup(root, path) {
        Ok(tag) => T::try_from(tag)
            .map(Some)
            .map_err(|e| WorldError::MalformedData(path.into(), e.to_string())),
        Err(_) => Ok(None),
    }
}
