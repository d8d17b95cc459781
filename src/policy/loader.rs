//! Manifest directory loader.
//!
//! Reads every `*.json` file in a directory. A file holds either a single
//! manifest object or an array of them, each tagged by `kind`:
//!
//! ```json
//! [
//!   {"kind": "Namespace", "name": "team-a", "labels": {"env": "prod"}},
//!   {"kind": "Policy", "name": "team-a-issuer", "spec": { ... }},
//!   {"kind": "RoleBinding", "name": "team-a-users", "policies": ["team-a-*"],
//!    "subjects": [{"kind": "Group", "name": "team-a"}]}
//! ]
//! ```
//!
//! A file that cannot be read, parsed, or validated is skipped as a whole
//! and a warning is logged; the remaining files still load.
//! [`ManifestLoader::load_files`] exposes the per-file results so a caller
//! can substitute an earlier good copy of a broken file.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::binding::RoleBinding;
use crate::models::namespace::Namespace;
use crate::models::policy::Policy;
use crate::{AppError, Result};

/// One object declared in a manifest file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind")]
pub enum Manifest {
    /// A certificate request policy.
    Policy(Policy),
    /// A namespace and its labels.
    Namespace(Namespace),
    /// A grant of policy use to subjects.
    RoleBinding(RoleBinding),
}

impl Manifest {
    fn validate(&self) -> Result<()> {
        match self {
            Self::Policy(policy) => policy.validate(),
            Self::Namespace(namespace) if namespace.name.trim().is_empty() => {
                Err(AppError::Invalid("namespace name must not be empty".into()))
            }
            Self::Namespace(_) => Ok(()),
            Self::RoleBinding(binding) => binding.validate(),
        }
    }
}

/// Everything declared in a manifest directory, keyed by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManifestSet {
    /// Policies by name.
    pub policies: BTreeMap<String, Policy>,
    /// Namespaces by name.
    pub namespaces: BTreeMap<String, Namespace>,
    /// Role bindings by `(namespace, name)`.
    pub bindings: BTreeMap<(Option<String>, String), RoleBinding>,
}

/// Result of reading one manifest file.
pub type FileLoad = (PathBuf, Result<Vec<Manifest>>);

impl ManifestSet {
    /// Assemble a set from per-file manifests, in the order given.
    #[must_use]
    pub fn from_files<'a>(files: impl IntoIterator<Item = (&'a Path, &'a [Manifest])>) -> Self {
        let mut set = Self::default();
        for (path, manifests) in files {
            for manifest in manifests {
                set.insert(manifest.clone(), path);
            }
        }
        set
    }

    fn insert(&mut self, manifest: Manifest, path: &Path) {
        let replaced = match manifest {
            Manifest::Policy(policy) => self
                .policies
                .insert(policy.name.clone(), policy)
                .is_some(),
            Manifest::Namespace(namespace) => self
                .namespaces
                .insert(namespace.name.clone(), namespace)
                .is_some(),
            Manifest::RoleBinding(binding) => self
                .bindings
                .insert((binding.namespace.clone(), binding.name.clone()), binding)
                .is_some(),
        };
        if replaced {
            warn!(path = %path.display(), "duplicate manifest overrides an earlier file");
        }
    }

    /// Role bindings in key order.
    #[must_use]
    pub fn role_bindings(&self) -> Vec<RoleBinding> {
        self.bindings.values().cloned().collect()
    }
}

/// Loads manifests from a directory.
pub struct ManifestLoader;

impl ManifestLoader {
    /// Load every manifest under `dir`, in file name order, skipping bad
    /// files.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if `dir` does not exist and
    /// `AppError::Io` if it cannot be listed.
    pub fn load(dir: &Path) -> Result<ManifestSet> {
        let files = Self::load_files(dir)?;
        let good = files.iter().filter_map(|(path, result)| match result {
            Ok(manifests) => Some((path.as_path(), manifests.as_slice())),
            Err(err) => {
                warn!(path = %path.display(), %err, "skipping manifest file");
                None
            }
        });
        Ok(ManifestSet::from_files(good))
    }

    /// Parse every manifest file under `dir`, in file name order, keeping
    /// each file's result.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if `dir` does not exist and
    /// `AppError::Io` if it cannot be listed.
    pub fn load_files(dir: &Path) -> Result<Vec<FileLoad>> {
        if !dir.is_dir() {
            return Err(AppError::NotFound(format!(
                "manifest directory {} does not exist",
                dir.display()
            )));
        }

        let mut files: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| is_manifest_file(path))
            .collect();
        files.sort();

        Ok(files
            .into_iter()
            .map(|path| {
                let result = Self::load_file(&path);
                if let Ok(manifests) = &result {
                    debug!(path = %path.display(), count = manifests.len(), "parsed manifests");
                }
                (path, result)
            })
            .collect())
    }

    /// Parse and validate one file. All-or-nothing.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io`, `AppError::Policy`, or `AppError::Invalid` if
    /// the file cannot be read, parsed, or validated.
    pub fn load_file(path: &Path) -> Result<Vec<Manifest>> {
        let raw = fs::read_to_string(path)?;
        if raw.trim().is_empty() {
            return Err(AppError::Policy("manifest file is empty".into()));
        }

        let value: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|err| AppError::Policy(format!("malformed JSON: {err}")))?;
        let items = match value {
            serde_json::Value::Array(items) => items,
            single => vec![single],
        };

        let mut manifests = Vec::with_capacity(items.len());
        for item in items {
            let manifest: Manifest = serde_json::from_value(item)
                .map_err(|err| AppError::Policy(format!("invalid manifest: {err}")))?;
            manifest.validate()?;
            manifests.push(manifest);
        }
        Ok(manifests)
    }
}

/// Whether `path` is a JSON manifest file.
#[must_use]
pub fn is_manifest_file(path: &Path) -> bool {
    path.is_file() && path.extension().is_some_and(|ext| ext == "json")
}
