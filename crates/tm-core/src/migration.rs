//! Migration records and the ordered migration set.
//!
//! Migration files are named `<version>[-|_]<name>.sql`, where `<version>` is
//! the leading run of ASCII digits. A [`MigrationSet`] is always sorted
//! ascending by version and never contains two records with the same
//! version.

use crate::error::{CoreError, CoreResult};
use rust_embed::RustEmbed;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// File extension of migration scripts.
pub const MIGRATION_EXTENSION: &str = "sql";

/// One versioned, named unit of schema-change SQL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Migration {
    /// Version; the bookkeeping table stores the highest applied one
    pub version: u64,

    /// Display name (file name without version prefix and extension)
    pub name: String,

    /// Origin of the script, the file name for loaded migrations
    pub path: String,

    /// Raw SQL statements executed as a single transaction
    pub sql: String,
}

impl Migration {
    /// Create a migration record directly.
    pub fn new(
        version: u64,
        name: impl Into<String>,
        path: impl Into<String>,
        sql: impl Into<String>,
    ) -> Self {
        Self {
            version,
            name: name.into(),
            path: path.into(),
            sql: sql.into(),
        }
    }

    /// Build a migration from a file name and its contents.
    ///
    /// `0001_create_users.sql` becomes version 1 named `create_users`.
    pub fn from_file(file_name: &str, sql: impl Into<String>) -> CoreResult<Self> {
        let (version, name) = parse_file_name(file_name)?;
        Ok(Self::new(version, name, file_name, sql))
    }
}

/// Split a migration file name into its version and display name.
fn parse_file_name(file_name: &str) -> CoreResult<(u64, String)> {
    let digits = file_name.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return Err(CoreError::InvalidVersion {
            file: file_name.to_string(),
            reason: "file name must start with a numeric version".to_string(),
        });
    }

    let version: u64 = file_name[..digits]
        .parse()
        .map_err(|_| CoreError::InvalidVersion {
            file: file_name.to_string(),
            reason: "version does not fit in an unsigned 64-bit integer".to_string(),
        })?;

    let rest = &file_name[digits..];
    let rest = rest.strip_prefix('-').unwrap_or(rest);
    let rest = rest.strip_prefix('_').unwrap_or(rest);
    let name = rest
        .strip_suffix(&format!(".{MIGRATION_EXTENSION}"))
        .unwrap_or(rest);

    Ok((version, name.to_string()))
}

fn has_migration_extension(file_name: impl AsRef<Path>) -> bool {
    file_name
        .as_ref()
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext == MIGRATION_EXTENSION)
}

/// Ordered, duplicate-free collection of migrations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct MigrationSet {
    migrations: Vec<Migration>,
}

impl MigrationSet {
    /// Build a set from records in any order.
    ///
    /// Records are sorted ascending by version. Version 0 is reserved for
    /// "nothing applied" and is rejected, as are duplicate versions.
    pub fn new(mut migrations: Vec<Migration>) -> CoreResult<Self> {
        {
            let mut seen: HashMap<u64, &str> = HashMap::with_capacity(migrations.len());
            for migration in &migrations {
                if migration.version == 0 {
                    return Err(CoreError::InvalidVersion {
                        file: migration.path.clone(),
                        reason: "version 0 is reserved for an empty database".to_string(),
                    });
                }
                if let Some(first) = seen.insert(migration.version, &migration.path) {
                    return Err(CoreError::DuplicateVersion {
                        version: migration.version,
                        first: first.to_string(),
                        second: migration.path.clone(),
                    });
                }
            }
        }

        migrations.sort_by_key(|m| m.version);
        Ok(Self { migrations })
    }

    /// Build a set from `(file_name, contents)` pairs.
    ///
    /// Entries without a `.sql` extension are skipped.
    pub fn from_files<I, N, S>(files: I) -> CoreResult<Self>
    where
        I: IntoIterator<Item = (N, S)>,
        N: AsRef<str>,
        S: Into<String>,
    {
        let mut migrations = Vec::new();
        for (file_name, sql) in files {
            let file_name = file_name.as_ref();
            if !has_migration_extension(file_name) {
                log::debug!("Skipping non-migration file {file_name}");
                continue;
            }
            migrations.push(Migration::from_file(file_name, sql)?);
        }
        Self::new(migrations)
    }

    /// Load every `.sql` file directly inside `dir`.
    ///
    /// Subdirectories are not traversed.
    pub fn from_dir(dir: &Path) -> CoreResult<Self> {
        if !dir.is_dir() {
            return Err(CoreError::MigrationsDirNotFound {
                path: dir.display().to_string(),
            });
        }

        let io_err = |path: &Path, source| CoreError::IoWithPath {
            path: path.display().to_string(),
            source,
        };

        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(|e| io_err(dir, e))? {
            let entry = entry.map_err(|e| io_err(dir, e))?;
            let path = entry.path();
            let file_type = entry.file_type().map_err(|e| io_err(&path, e))?;
            if file_type.is_dir() {
                continue;
            }

            let file_name = entry.file_name();
            if !has_migration_extension(&file_name) {
                continue;
            }
            let Some(file_name) = file_name.to_str() else {
                return Err(CoreError::InvalidEncoding {
                    file: path.display().to_string(),
                });
            };

            let sql = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
            files.push((file_name.to_string(), sql));
        }

        Self::from_files(files)
    }

    /// Load the `.sql` files bundled at `prefix` inside a [`RustEmbed`] asset set.
    ///
    /// Only direct children of `prefix` are considered; an empty prefix means
    /// the root of the embedded folder.
    pub fn from_embedded<A: RustEmbed>(prefix: &str) -> CoreResult<Self> {
        let prefix = prefix.trim_matches('/');

        let mut files = Vec::new();
        for path in A::iter() {
            let relative = if prefix.is_empty() {
                Some(&*path)
            } else {
                path.strip_prefix(prefix)
                    .and_then(|rest| rest.strip_prefix('/'))
            };
            let Some(file_name) = relative else {
                continue;
            };
            if file_name.contains('/') || !has_migration_extension(file_name) {
                continue;
            }

            let file = A::get(&path).ok_or_else(|| CoreError::EmbeddedFileNotFound {
                file: path.to_string(),
            })?;
            let sql = String::from_utf8(file.data.into_owned()).map_err(|_| {
                CoreError::InvalidEncoding {
                    file: path.to_string(),
                }
            })?;
            files.push((file_name.to_string(), sql));
        }

        Self::from_files(files)
    }

    /// Iterate migrations in ascending version order.
    pub fn iter(&self) -> std::slice::Iter<'_, Migration> {
        self.migrations.iter()
    }

    /// Number of migrations in the set.
    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    /// Whether the set has no migrations.
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Highest version in the set, `None` when empty.
    pub fn latest_version(&self) -> Option<u64> {
        self.migrations.last().map(|m| m.version)
    }

    /// Look up a migration by version.
    pub fn get(&self, version: u64) -> Option<&Migration> {
        self.migrations
            .binary_search_by_key(&version, |m| m.version)
            .ok()
            .map(|idx| &self.migrations[idx])
    }

    /// Migrations with a version strictly greater than `applied`, ascending.
    pub fn pending(&self, applied: u64) -> impl Iterator<Item = &Migration> {
        let start = self.migrations.partition_point(|m| m.version <= applied);
        self.migrations[start..].iter()
    }
}

impl<'a> IntoIterator for &'a MigrationSet {
    type Item = &'a Migration;
    type IntoIter = std::slice::Iter<'a, Migration>;

    fn into_iter(self) -> Self::IntoIter {
        self.migrations.iter()
    }
}

#[cfg(test)]
#[path = "migration_test.rs"]
mod tests;
