//! Local files reachable through configured aliases.

use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::cache::FingerprintBuilder;
use crate::config::Settings;
use crate::context::CallContext;
use crate::error::{ErrorCode, ErrorList, ErrorRecord};
use crate::params::ParamSet;
use crate::parser::Format;
use crate::source::SourceKind;
use crate::BoxFuture;

use super::{Payload, SourceDriver};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRequest {
    /// Alias-qualified name used in messages and fingerprints.
    pub label: String,
    pub path: PathBuf,
}

impl FileRequest {
    /// `file` names a configured file alias; alternatively `directory`
    /// names a configured directory and `file name` a relative path in it.
    pub fn from_params(params: &ParamSet, settings: &Settings) -> Result<Self, ErrorList> {
        let mut errors = ErrorList::new();

        if let Some(alias) = params.text("file") {
            return match settings.files.get(alias) {
                Some(path) => Ok(Self {
                    label: alias.to_owned(),
                    path: path.clone(),
                }),
                None => {
                    errors.add(ErrorCode::NoSuchFile, [alias]);
                    Err(errors)
                }
            };
        }

        let directory = params.text("directory");
        let file_name = params.text("file name");
        if directory.is_none() {
            errors.add(ErrorCode::NoParamSpecified, ["file"]);
            return Err(errors);
        }
        if file_name.is_none() {
            errors.add(ErrorCode::NoParamSpecified, ["file name"]);
        }

        let root = directory.and_then(|alias| {
            let root = settings.directories.get(alias);
            if root.is_none() {
                errors.add(ErrorCode::NoSuchDirectory, [alias]);
            }
            root
        });
        if let Some(name) = file_name {
            if !is_contained(Path::new(name)) {
                errors.add(ErrorCode::PathNotAllowed, [name]);
            }
        }

        match (directory, root, file_name) {
            (Some(directory), Some(root), Some(name)) if errors.is_empty() => Ok(Self {
                label: format!("{directory}/{name}"),
                path: root.join(name),
            }),
            _ => Err(errors),
        }
    }
}

/// Relative, with no `..` and no root or drive prefix.
fn is_contained(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}

pub struct FileDriver {
    request: FileRequest,
}

impl FileDriver {
    pub fn new(request: FileRequest) -> Self {
        Self { request }
    }
}

impl SourceDriver for FileDriver {
    fn kind(&self) -> SourceKind {
        SourceKind::File
    }

    fn fingerprint(&self, builder: &mut FingerprintBuilder) {
        builder.field("path", &self.request.path.to_string_lossy());
    }

    fn connect<'a>(&'a mut self, _ctx: &'a CallContext) -> BoxFuture<'a, Result<(), ErrorList>> {
        Box::pin(async { Ok(()) })
    }

    fn fetch<'a>(&'a mut self, _ctx: &'a CallContext) -> BoxFuture<'a, Result<Payload, ErrorList>> {
        Box::pin(async move {
            debug!(file = %self.request.label, "reading file");
            let body = tokio::fs::read(&self.request.path).await.map_err(|error| {
                ErrorList::single(ErrorRecord::new(
                    ErrorCode::FileNotReadable,
                    [self.request.label.clone(), error.to_string()],
                ))
            })?;
            Ok(Payload::Text {
                body,
                content_type: None,
                format_hint: Format::from_extension(&self.request.path),
            })
        })
    }

    fn disconnect(&mut self) -> BoxFuture<'_, Result<(), ErrorList>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.files.insert("report".into(), PathBuf::from("/srv/report.csv"));
        settings.directories.insert("data".into(), PathBuf::from("/srv/data"));
        settings
    }

    #[test]
    fn file_alias_resolves() {
        let request = FileRequest::from_params(&ParamSet::new().with("file", "report"), &settings())
            .expect("valid");
        assert_eq!(request.path, PathBuf::from("/srv/report.csv"));
    }

    #[test]
    fn directory_and_relative_name_resolve() {
        let params = ParamSet::new()
            .with("directory", "data")
            .with("file name", "2024/q1.json");
        let request = FileRequest::from_params(&params, &settings()).expect("valid");
        assert_eq!(request.path, PathBuf::from("/srv/data/2024/q1.json"));
    }

    #[test]
    fn escaping_paths_are_rejected() {
        for name in ["../secret", "/etc/passwd", "a/../../b"] {
            let params = ParamSet::new().with("directory", "data").with("file name", name);
            let errors = FileRequest::from_params(&params, &settings()).expect_err("must fail");
            assert!(errors.contains(ErrorCode::PathNotAllowed), "{name}");
        }
    }

    #[test]
    fn unknown_aliases_are_reported() {
        let errors = FileRequest::from_params(&ParamSet::new().with("file", "nope"), &settings())
            .expect_err("must fail");
        assert!(errors.contains(ErrorCode::NoSuchFile));

        let params = ParamSet::new().with("directory", "nope");
        let errors = FileRequest::from_params(&params, &settings()).expect_err("must fail");
        assert!(errors.contains(ErrorCode::NoSuchDirectory));
        assert!(errors.contains(ErrorCode::NoParamSpecified));
    }
}
