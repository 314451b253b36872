//! External programs run with caller-supplied arguments.
//!
//! A program is addressed by its configured id. Each token of the
//! configured command may carry `$name$` placeholders, filled from the
//! request parameters first and the configured defaults second. The
//! program's standard output is decoded like any other text payload.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::cache::FingerprintBuilder;
use crate::config::Settings;
use crate::context::CallContext;
use crate::error::{ErrorCode, ErrorList, ErrorRecord};
use crate::params::ParamSet;
use crate::parser::Format;
use crate::record::canonical_text;
use crate::source::SourceKind;
use crate::BoxFuture;

use super::{Payload, SourceDriver};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

fn placeholder() -> Option<&'static Regex> {
    static PLACEHOLDER: OnceLock<Option<Regex>> = OnceLock::new();
    PLACEHOLDER
        .get_or_init(|| Regex::new(r"\$([A-Za-z0-9_ ]+)\$").ok())
        .as_ref()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramRequest {
    pub id: String,
    /// Fully substituted program and arguments.
    pub argv: Vec<String>,
    /// Written to the program's standard input, then closed.
    pub input: Option<String>,
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
    pub format: Option<Format>,
}

impl ProgramRequest {
    pub fn from_params(params: &ParamSet, settings: &Settings) -> Result<Self, ErrorList> {
        let mut errors = ErrorList::new();
        let Some(id) = params.require("program", &mut errors) else {
            return Err(errors);
        };
        let program = match settings.programs.get(&id) {
            Some(program) if !program.command.is_empty() => program,
            _ => {
                errors.add(ErrorCode::NoSuchProgram, [id.as_str()]);
                return Err(errors);
            }
        };

        let mut missing = Vec::new();
        let argv = program
            .command
            .iter()
            .map(|token| substitute(token, params, &program.defaults, &mut missing))
            .collect();
        for name in missing {
            errors.add(ErrorCode::NoParamSpecified, [name]);
        }

        let format = program.format.as_deref().and_then(|name| {
            Format::from_name(name, None)
                .map_err(|error| errors.push(error.to_record()))
                .ok()
        });

        errors.into_result(Self {
            id,
            argv,
            input: params.text("input").map(str::to_owned),
            env: program.env.clone(),
            timeout: program
                .timeout_ms
                .map_or(DEFAULT_TIMEOUT, Duration::from_millis),
            format,
        })
    }
}

/// Replace every `$name$` in `token`; names with no value are collected
/// into `missing` once each.
fn substitute(
    token: &str,
    params: &ParamSet,
    defaults: &BTreeMap<String, String>,
    missing: &mut Vec<String>,
) -> String {
    let Some(pattern) = placeholder() else {
        return token.to_owned();
    };
    pattern
        .replace_all(token, |captures: &regex::Captures<'_>| {
            let name = captures[1].trim();
            params
                .text(name)
                .map(str::to_owned)
                .or_else(|| defaults.get(name).cloned())
                .unwrap_or_else(|| {
                    if !missing.iter().any(|seen| seen == name) {
                        missing.push(name.to_owned());
                    }
                    String::new()
                })
        })
        .into_owned()
}

pub struct ProgramDriver {
    request: ProgramRequest,
    child: Option<Child>,
}

impl ProgramDriver {
    pub fn new(request: ProgramRequest) -> Self {
        Self {
            request,
            child: None,
        }
    }

    fn failure<I, S>(&self, code: ErrorCode, details: I) -> ErrorList
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let params = std::iter::once(self.request.id.clone()).chain(details.into_iter().map(Into::into));
        ErrorList::single(ErrorRecord::new(code, params))
    }
}

impl SourceDriver for ProgramDriver {
    fn kind(&self) -> SourceKind {
        SourceKind::Program
    }

    fn fingerprint(&self, builder: &mut FingerprintBuilder) {
        builder
            .field("program", &self.request.id)
            .fields("arg", self.request.argv.iter().map(String::as_str));
        if let Some(input) = &self.request.input {
            builder.field("input", input);
        }
    }

    fn connect<'a>(&'a mut self, _ctx: &'a CallContext) -> BoxFuture<'a, Result<(), ErrorList>> {
        Box::pin(async move {
            let Some((program, args)) = self.request.argv.split_first() else {
                return Err(self.failure(ErrorCode::ProgramCouldNotStart, ["empty command"]));
            };
            debug!(program = %self.request.id, "starting program");
            let child = Command::new(program)
                .args(args)
                .envs(&self.request.env)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|error| {
                    self.failure(ErrorCode::ProgramCouldNotStart, [error.to_string()])
                })?;
            self.child = Some(child);
            Ok(())
        })
    }

    fn fetch<'a>(&'a mut self, _ctx: &'a CallContext) -> BoxFuture<'a, Result<Payload, ErrorList>> {
        Box::pin(async move {
            let Some(mut child) = self.child.take() else {
                return Err(self.failure(ErrorCode::ProgramCouldNotStart, ["not started"]));
            };

            // Input is fed while output drains, both under the one deadline.
            // Dropping the handle closes stdin so the program sees EOF.
            let stdin = child.stdin.take();
            let request = &self.request;
            let feed = async move {
                if let (Some(mut stdin), Some(input)) = (stdin, &request.input) {
                    if let Err(error) = stdin.write_all(input.as_bytes()).await {
                        warn!(program = %request.id, error = %error, "writing input failed");
                    }
                }
            };
            let run = async move {
                let ((), output) = tokio::join!(feed, child.wait_with_output());
                output
            };

            let output = match tokio::time::timeout(self.request.timeout, run).await {
                Ok(Ok(output)) => output,
                Ok(Err(error)) => {
                    return Err(self.failure(
                        ErrorCode::ProgramFailed,
                        ["io".to_owned(), error.to_string()],
                    ))
                }
                Err(_) => {
                    return Err(self.failure(
                        ErrorCode::ProgramTimedOut,
                        [self.request.timeout.as_millis().to_string()],
                    ))
                }
            };

            if !output.status.success() {
                let status = output
                    .status
                    .code()
                    .map_or_else(|| "signal".to_owned(), |code| code.to_string());
                let stderr = canonical_text(&output.stderr).trim().to_owned();
                return Err(self.failure(ErrorCode::ProgramFailed, [status, stderr]));
            }

            Ok(Payload::Text {
                body: output.stdout,
                content_type: None,
                format_hint: self.request.format.clone(),
            })
        })
    }

    fn disconnect(&mut self) -> BoxFuture<'_, Result<(), ErrorList>> {
        Box::pin(async move {
            if let Some(mut child) = self.child.take() {
                if let Err(error) = child.start_kill() {
                    return Err(self.failure(ErrorCode::DisconnectFailed, [error.to_string()]));
                }
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProgramSettings;

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.programs.insert(
            "lookup".into(),
            ProgramSettings {
                command: vec![
                    "lookup-tool".into(),
                    "--id=$id$".into(),
                    "--region".into(),
                    "$region$".into(),
                ],
                defaults: BTreeMap::from([("region".to_string(), "eu".to_string())]),
                format: Some("csv with header".into()),
                ..ProgramSettings::default()
            },
        );
        settings
    }

    #[test]
    fn placeholders_take_params_then_defaults() {
        let params = ParamSet::new().with("program", "lookup").with("id", "42");
        let request = ProgramRequest::from_params(&params, &settings()).expect("valid");
        assert_eq!(
            request.argv,
            vec!["lookup-tool", "--id=42", "--region", "eu"]
        );
        assert_eq!(
            request.format,
            Some(Format::Delimited {
                delimiter: b',',
                header: true
            })
        );
    }

    #[test]
    fn missing_placeholder_values_are_reported_once() {
        let mut settings = settings();
        if let Some(program) = settings.programs.get_mut("lookup") {
            program.command.push("$id$".into());
        }
        let params = ParamSet::new().with("program", "lookup");
        let errors = ProgramRequest::from_params(&params, &settings).expect_err("must fail");
        assert_eq!(errors.count(ErrorCode::NoParamSpecified), 1);
    }

    #[test]
    fn unknown_program_is_rejected() {
        let params = ParamSet::new().with("program", "rm");
        let errors = ProgramRequest::from_params(&params, &settings()).expect_err("must fail");
        assert!(errors.contains(ErrorCode::NoSuchProgram));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_program_and_captures_output() {
        let request = ProgramRequest {
            id: "cat".into(),
            argv: vec!["cat".into()],
            input: Some("a,b\n1,2\n".into()),
            env: BTreeMap::new(),
            timeout: Duration::from_secs(5),
            format: None,
        };
        let mut driver = ProgramDriver::new(request);
        let ctx = CallContext::default();
        driver.connect(&ctx).await.expect("spawn");
        let payload = driver.fetch(&ctx).await.expect("output");
        driver.disconnect().await.expect("disconnect");

        match payload {
            Payload::Text { body, .. } => assert_eq!(body, b"a,b\n1,2\n"),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_a_failure() {
        let request = ProgramRequest {
            id: "false".into(),
            argv: vec!["false".into()],
            input: None,
            env: BTreeMap::new(),
            timeout: Duration::from_secs(5),
            format: None,
        };
        let mut driver = ProgramDriver::new(request);
        let ctx = CallContext::default();
        driver.connect(&ctx).await.expect("spawn");
        let errors = driver.fetch(&ctx).await.expect_err("must fail");
        assert!(errors.contains(ErrorCode::ProgramFailed));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn input_a_program_never_reads_is_bounded_by_the_timeout() {
        // Given: A program that ignores stdin and more input than a pipe buffers
        let request = ProgramRequest {
            id: "sleeper".into(),
            argv: vec!["sleep".into(), "3".into()],
            input: Some("x".repeat(1 << 20)),
            env: BTreeMap::new(),
            timeout: Duration::from_millis(200),
            format: None,
        };
        let mut driver = ProgramDriver::new(request);
        let ctx = CallContext::default();
        driver.connect(&ctx).await.expect("spawn");

        // When: It is run
        let started = std::time::Instant::now();
        let errors = driver.fetch(&ctx).await.expect_err("must time out");

        // Then: The deadline covers the blocked write too
        assert!(started.elapsed() < Duration::from_secs(1), "{:?}", started.elapsed());
        assert!(errors.contains(ErrorCode::ProgramTimedOut), "{errors:?}");
    }
}
