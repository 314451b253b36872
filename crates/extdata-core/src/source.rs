use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, ErrorRecord};

/// Source kind discriminator used to select a connector variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Web,
    File,
    Soap,
    Ldap,
    Db,
    Program,
}

impl SourceKind {
    pub const ALL: [Self; 6] = [
        Self::Web,
        Self::File,
        Self::Soap,
        Self::Ldap,
        Self::Db,
        Self::Program,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::File => "file",
            Self::Soap => "soap",
            Self::Ldap => "ldap",
            Self::Db => "db",
            Self::Program => "program",
        }
    }

    /// Name of the entry point the binding layer registers for this kind.
    pub const fn entry_point(self) -> &'static str {
        match self {
            Self::Web => "get_web_data",
            Self::File => "get_file_data",
            Self::Soap => "get_soap_data",
            Self::Ldap => "get_ldap_data",
            Self::Db => "get_db_data",
            Self::Program => "get_program_data",
        }
    }
}

impl Display for SourceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = ErrorRecord;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "web" | "url" | "http" | "https" => Ok(Self::Web),
            "file" => Ok(Self::File),
            "soap" => Ok(Self::Soap),
            "ldap" | "directory" => Ok(Self::Ldap),
            "db" | "database" | "sql" => Ok(Self::Db),
            "program" | "exe" => Ok(Self::Program),
            other => Err(ErrorRecord::new(ErrorCode::UnknownSource, [other])),
        }
    }
}
