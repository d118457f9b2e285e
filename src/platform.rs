use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Package ecosystem a record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    Macos,
    Ubuntu,
    Debian,
    Arch,
    Fedora,
}

impl Platform {
    pub const ALL: [Platform; 6] = [
        Platform::Windows,
        Platform::Macos,
        Platform::Ubuntu,
        Platform::Debian,
        Platform::Arch,
        Platform::Fedora,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Windows => "windows",
            Platform::Macos => "macos",
            Platform::Ubuntu => "ubuntu",
            Platform::Debian => "debian",
            Platform::Arch => "arch",
            Platform::Fedora => "fedora",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str() == s.to_ascii_lowercase())
            .ok_or_else(|| format!("unknown platform '{s}'"))
    }
}

/// Which repository values of a platform a prune is allowed to touch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryScope {
    /// Every record of the platform, whatever its repository
    Any,
    /// Only records without a repository
    Unset,
    /// Only records of one named repository
    Named(String),
}

impl RepositoryScope {
    pub fn matches(&self, repository: Option<&str>) -> bool {
        match self {
            RepositoryScope::Any => true,
            RepositoryScope::Unset => repository.is_none(),
            RepositoryScope::Named(name) => repository == Some(name.as_str()),
        }
    }
}

/// The set of records one sync run is authoritative for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruneScope {
    pub platform: Platform,
    pub repository: RepositoryScope,
}

impl PruneScope {
    pub fn contains(&self, platform: Platform, repository: Option<&str>) -> bool {
        self.platform == platform && self.repository.matches(repository)
    }
}

/// One independently syncable source. Arch is split into the official
/// repositories and the AUR, everything else maps one to one onto a platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncTarget {
    Debian,
    Ubuntu,
    Windows,
    Macos,
    Fedora,
    Arch,
    Aur,
}

impl SyncTarget {
    /// Order in which an unattended sweep visits the targets
    pub const ALL: [SyncTarget; 7] = [
        SyncTarget::Debian,
        SyncTarget::Ubuntu,
        SyncTarget::Windows,
        SyncTarget::Macos,
        SyncTarget::Fedora,
        SyncTarget::Arch,
        SyncTarget::Aur,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SyncTarget::Debian => "debian",
            SyncTarget::Ubuntu => "ubuntu",
            SyncTarget::Windows => "windows",
            SyncTarget::Macos => "macos",
            SyncTarget::Fedora => "fedora",
            SyncTarget::Arch => "arch",
            SyncTarget::Aur => "aur",
        }
    }

    pub fn platform(self) -> Platform {
        match self {
            SyncTarget::Debian => Platform::Debian,
            SyncTarget::Ubuntu => Platform::Ubuntu,
            SyncTarget::Windows => Platform::Windows,
            SyncTarget::Macos => Platform::Macos,
            SyncTarget::Fedora => Platform::Fedora,
            SyncTarget::Arch | SyncTarget::Aur => Platform::Arch,
        }
    }

    /// Repository value records fetched for this target are stored under
    pub fn repository(self) -> Option<&'static str> {
        match self {
            SyncTarget::Arch => Some("official"),
            SyncTarget::Aur => Some("aur"),
            _ => None,
        }
    }

    /// Records a completed listing of this target is authoritative for.
    ///
    /// Debian and Ubuntu listings span several suites, so they prune the whole
    /// platform; the remaining targets only prune their own repository value.
    pub fn prune_scope(self) -> PruneScope {
        let repository = match self {
            SyncTarget::Debian | SyncTarget::Ubuntu => RepositoryScope::Any,
            SyncTarget::Arch => RepositoryScope::Named("official".to_string()),
            SyncTarget::Aur => RepositoryScope::Named("aur".to_string()),
            SyncTarget::Windows | SyncTarget::Macos | SyncTarget::Fedora => {
                RepositoryScope::Unset
            }
        };
        PruneScope {
            platform: self.platform(),
            repository,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            SyncTarget::Debian => "Debian",
            SyncTarget::Ubuntu => "Ubuntu",
            SyncTarget::Windows => "Winget",
            SyncTarget::Macos => "Homebrew",
            SyncTarget::Fedora => "Fedora",
            SyncTarget::Arch => "Arch Linux",
            SyncTarget::Aur => "AUR",
        }
    }
}

impl fmt::Display for SyncTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.to_ascii_lowercase();
        let alias = match lowered.as_str() {
            "winget" => "windows",
            "homebrew" | "brew" => "macos",
            other => other,
        };
        SyncTarget::ALL
            .into_iter()
            .find(|t| t.as_str() == alias)
            .ok_or_else(|| format!("unknown sync target '{s}'"))
    }
}

/// Display metadata for a platform row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformInfo {
    pub id: String,
    pub name: String,
    pub icon: String,
    pub color: String,
    pub package_manager: String,
    pub install_command: String,
    pub sort_order: i64,
}

impl PlatformInfo {
    fn seed(
        platform: Platform,
        name: &str,
        icon: &str,
        color: &str,
        package_manager: &str,
        install_command: &str,
        sort_order: i64,
    ) -> Self {
        Self {
            id: platform.as_str().to_string(),
            name: name.to_string(),
            icon: icon.to_string(),
            color: color.to_string(),
            package_manager: package_manager.to_string(),
            install_command: install_command.to_string(),
            sort_order,
        }
    }
}

/// Rows written by `init-platforms`
pub fn default_platforms() -> Vec<PlatformInfo> {
    vec![
        PlatformInfo::seed(Platform::Windows, "Windows", "windows", "#0078D4", "winget", "winget install --id {name} -e", 1),
        PlatformInfo::seed(Platform::Macos, "macOS", "apple", "#000000", "brew", "brew install {name}", 2),
        PlatformInfo::seed(Platform::Ubuntu, "Ubuntu", "ubuntu", "#E95420", "apt", "sudo apt install -y {name}", 3),
        PlatformInfo::seed(Platform::Debian, "Debian", "debian", "#A81D33", "apt", "sudo apt install -y {name}", 4),
        PlatformInfo::seed(Platform::Arch, "Arch Linux", "arch", "#1793D1", "pacman", "sudo pacman -S --needed {name}", 5),
        PlatformInfo::seed(Platform::Fedora, "Fedora", "fedora", "#51A2DA", "dnf", "sudo dnf install -y {name}", 6),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aur_and_arch_share_a_platform_but_not_a_scope() {
        assert_eq!(SyncTarget::Aur.platform(), Platform::Arch);
        assert_eq!(SyncTarget::Arch.platform(), Platform::Arch);

        let official = SyncTarget::Arch.prune_scope();
        assert!(official.contains(Platform::Arch, Some("official")));
        assert!(!official.contains(Platform::Arch, Some("aur")));
        assert!(!official.contains(Platform::Arch, None));
    }

    #[test]
    fn winget_scope_only_covers_records_without_repository() {
        let scope = SyncTarget::Windows.prune_scope();
        assert!(scope.contains(Platform::Windows, None));
        assert!(!scope.contains(Platform::Windows, Some("msstore")));
        assert!(!scope.contains(Platform::Macos, None));
    }

    #[test]
    fn debian_scope_spans_every_repository() {
        let scope = SyncTarget::Debian.prune_scope();
        assert!(scope.contains(Platform::Debian, Some("bookworm")));
        assert!(scope.contains(Platform::Debian, None));
        assert!(!scope.contains(Platform::Ubuntu, None));
    }

    #[test]
    fn targets_parse_with_aliases() {
        assert_eq!("winget".parse::<SyncTarget>().unwrap(), SyncTarget::Windows);
        assert_eq!("AUR".parse::<SyncTarget>().unwrap(), SyncTarget::Aur);
        assert!("gentoo".parse::<SyncTarget>().is_err());
    }

    #[test]
    fn seeds_cover_every_platform_once() {
        let seeds = default_platforms();
        assert_eq!(seeds.len(), Platform::ALL.len());
        for platform in Platform::ALL {
            assert_eq!(seeds.iter().filter(|s| s.id == platform.as_str()).count(), 1);
        }
    }
}
