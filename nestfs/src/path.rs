//! Absolute path parsing and resolution against the directory tree.

use std::fmt;
use std::str::FromStr;

use log::debug;

use crate::config::FILE_NAME_MAX_LEN;
use crate::directory::Directory;
use crate::error::{FsError, Result};
use crate::io::{BlockStorage, SectorNumber};

/// A parsed absolute path. "/" has no components and a depth of 0.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AbsolutePath {
    components: Vec<String>,
}

impl AbsolutePath {
    pub fn parse(text: &str) -> Result<Self> {
        let rest = text
            .strip_prefix('/')
            .ok_or_else(|| FsError::InvalidPath(format!("path must start with \"/\": {}", text)))?;
        if rest.is_empty() {
            return Ok(AbsolutePath { components: vec![] });
        }

        let components = rest
            .split('/')
            .map(|name| {
                if name.is_empty() {
                    Err(FsError::InvalidPath(format!("empty component in {}", text)))
                } else if name.len() > FILE_NAME_MAX_LEN {
                    Err(FsError::InvalidPath(format!(
                        "{} is longer than {} bytes",
                        name, FILE_NAME_MAX_LEN
                    )))
                } else {
                    Ok(name.to_string())
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(AbsolutePath { components })
    }

    pub fn depth(&self) -> usize {
        self.components.len()
    }

    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    pub fn component(&self, index: usize) -> Option<&str> {
        self.components.get(index).map(String::as_str)
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.components.iter().map(String::as_str)
    }

    pub fn last_name(&self) -> Option<&str> {
        self.components.last().map(String::as_str)
    }

    /// The path one level up. "/" has none.
    pub fn parent(&self) -> Option<AbsolutePath> {
        let (_, prefix) = self.components.split_last()?;
        Some(AbsolutePath {
            components: prefix.to_vec(),
        })
    }

    /// Resolves the path to a header sector and whether it names a directory.
    /// "/" resolves to `root_sector` without a lookup.
    pub fn resolve(
        &self,
        dev: &mut impl BlockStorage,
        root: &Directory,
        root_sector: SectorNumber,
    ) -> Result<(SectorNumber, bool)> {
        if self.is_root() {
            return Ok((root_sector, true));
        }
        let found = root.find_by_absolute_path(dev, self, 0)?;
        debug!("resolved {} to sector {}", self, found.0);
        Ok(found)
    }

    pub fn get_sector(
        &self,
        dev: &mut impl BlockStorage,
        root: &Directory,
        root_sector: SectorNumber,
    ) -> Result<SectorNumber> {
        self.resolve(dev, root, root_sector).map(|(sector, _)| sector)
    }

    /// Resolves the directory holding the last component.
    pub fn get_upper_level_sector(
        &self,
        dev: &mut impl BlockStorage,
        root: &Directory,
        root_sector: SectorNumber,
    ) -> Result<SectorNumber> {
        let parent = self
            .parent()
            .ok_or_else(|| FsError::InvalidPath("\"/\" has no parent directory".to_string()))?;
        let (sector, is_directory) = parent.resolve(dev, root, root_sector)?;
        if !is_directory {
            return Err(FsError::NotADirectory);
        }
        Ok(sector)
    }
}

impl FromStr for AbsolutePath {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self> {
        AbsolutePath::parse(s)
    }
}

impl fmt::Display for AbsolutePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return write!(f, "/");
        }
        for name in &self.components {
            write!(f, "/{}", name)?;
        }
        Ok(())
    }
}
