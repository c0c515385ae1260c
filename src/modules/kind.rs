//! Content modules and their static dependencies

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A content-type-specific exporter/importer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModuleKind {
    Stack,
    Locales,
    GlobalFields,
    ContentTypes,
    Assets,
    Entries,
    Experiences,
}

impl ModuleKind {
    /// Every module, in declaration order
    pub const ALL: [ModuleKind; 7] = [
        ModuleKind::Stack,
        ModuleKind::Locales,
        ModuleKind::GlobalFields,
        ModuleKind::ContentTypes,
        ModuleKind::Assets,
        ModuleKind::Entries,
        ModuleKind::Experiences,
    ];

    /// Name used for directories, mapper files and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleKind::Stack => "stack",
            ModuleKind::Locales => "locales",
            ModuleKind::GlobalFields => "global-fields",
            ModuleKind::ContentTypes => "content-types",
            ModuleKind::Assets => "assets",
            ModuleKind::Entries => "entries",
            ModuleKind::Experiences => "experiences",
        }
    }

    /// Name of the remote collection the module reads and writes
    pub fn collection(&self) -> &'static str {
        match self {
            ModuleKind::Stack => "stack",
            ModuleKind::Locales => "locales",
            ModuleKind::GlobalFields => "global_fields",
            ModuleKind::ContentTypes => "content_types",
            ModuleKind::Assets => "assets",
            ModuleKind::Entries => "entries",
            ModuleKind::Experiences => "experiences",
        }
    }

    /// Modules that must complete first
    pub fn dependencies(&self) -> &'static [ModuleKind] {
        match self {
            ModuleKind::Stack => &[],
            ModuleKind::Locales => &[ModuleKind::Stack],
            ModuleKind::GlobalFields => &[ModuleKind::Stack],
            ModuleKind::ContentTypes => &[ModuleKind::Stack, ModuleKind::GlobalFields],
            ModuleKind::Assets => &[ModuleKind::Stack],
            ModuleKind::Entries => &[
                ModuleKind::Stack,
                ModuleKind::Locales,
                ModuleKind::ContentTypes,
                ModuleKind::Assets,
            ],
            ModuleKind::Experiences => &[ModuleKind::Stack, ModuleKind::ContentTypes],
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModuleKind::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| format!("unknown module '{}'", s))
    }
}
