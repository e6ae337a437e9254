//! Package dependency checks and installation for extensions
//!
//! Extensions declare pip-style requirements (`requests>=2,<3`). The resolver
//! translates each specifier into a `semver` range, asks a
//! [`PackageEnvironment`] what is installed, and installs what is missing one
//! package at a time. A failing package never aborts the batch.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use docbridge_core::types::DependencyConfig;
use semver::{Version, VersionReq};
use serde::Serialize;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info};

/// Parse a version leniently: `2` -> `2.0.0`, `2.5` -> `2.5.0`, `2.0rc1` -> `2.0.0`
pub fn parse_lenient_version(version: &str) -> Option<Version> {
    let version = version.trim().trim_start_matches('v');
    if let Ok(parsed) = Version::parse(version) {
        return Some(parsed);
    }

    let mut parts = [0u64; 3];
    let mut segments = version.split('.');
    for (index, part) in parts.iter_mut().enumerate() {
        let Some(segment) = segments.next() else {
            if index == 0 {
                return None;
            }
            break;
        };
        let digits: String = segment.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            if index == 0 {
                return None;
            }
            break;
        }
        *part = digits.parse().ok()?;
        if digits.len() != segment.len() {
            break;
        }
    }

    Some(Version::new(parts[0], parts[1], parts[2]))
}

/// A parsed package requirement
#[derive(Debug, Clone)]
pub struct Requirement {
    /// Original requirement string
    pub raw: String,
    pub name: String,
    /// Specifier as written (e.g. `>=2,<3`)
    pub specifier: Option<String>,
    range: Option<VersionReq>,
    excluded: Vec<Version>,
}

impl Requirement {
    /// Parse a pip-style requirement string
    pub fn parse(raw: &str) -> Result<Self> {
        let spec = raw.split(';').next().unwrap_or_default().trim();
        let name_end = spec
            .find(|c: char| matches!(c, '=' | '<' | '>' | '!' | '~' | '[' | ' ' | '('))
            .unwrap_or(spec.len());
        let name = spec[..name_end].trim().to_string();
        if name.is_empty() {
            return Err(anyhow!("Requirement '{}' has no package name", raw));
        }

        let mut rest = spec[name_end..].trim();
        if rest.starts_with('[') {
            let close = rest
                .find(']')
                .ok_or_else(|| anyhow!("Unclosed extras in requirement '{}'", raw))?;
            rest = rest[close + 1..].trim();
        }
        let rest = rest.trim_start_matches('(').trim_end_matches(')').trim();

        if rest.is_empty() {
            return Ok(Self {
                raw: raw.to_string(),
                name,
                specifier: None,
                range: None,
                excluded: Vec::new(),
            });
        }

        let mut comparators = Vec::new();
        let mut excluded = Vec::new();
        for clause in rest.split(',').map(str::trim).filter(|c| !c.is_empty()) {
            let (op, version) = split_operator(clause)
                .ok_or_else(|| anyhow!("Unsupported specifier '{}' in '{}'", clause, raw))?;

            match op {
                "!=" => excluded.push(
                    parse_lenient_version(version)
                        .ok_or_else(|| anyhow!("Invalid version '{}' in '{}'", version, raw))?,
                ),
                "==" | "===" if version.contains('*') => comparators.push(version.to_string()),
                "==" | "===" => comparators.push(format!("={}", padded(version, raw)?)),
                "~=" => {
                    let (lower, upper) = compatible_release(version)
                        .ok_or_else(|| anyhow!("Invalid compatible release '{}' in '{}'", version, raw))?;
                    comparators.push(format!(">={}", lower));
                    comparators.push(format!("<{}", upper));
                }
                _ => comparators.push(format!("{}{}", op, padded(version, raw)?)),
            }
        }

        let range = if comparators.is_empty() {
            None
        } else {
            Some(
                VersionReq::parse(&comparators.join(", "))
                    .with_context(|| format!("Invalid version range in '{}'", raw))?,
            )
        };

        Ok(Self {
            raw: raw.to_string(),
            name,
            specifier: Some(rest.to_string()),
            range,
            excluded,
        })
    }

    /// Whether `version` satisfies the requirement
    pub fn matches(&self, version: &str) -> bool {
        let Some(version) = parse_lenient_version(version) else {
            return false;
        };
        if self.excluded.contains(&version) {
            return false;
        }
        self.range.as_ref().is_none_or(|range| range.matches(&version))
    }
}

fn split_operator(clause: &str) -> Option<(&str, &str)> {
    for op in ["===", "==", ">=", "<=", "~=", "!=", ">", "<"] {
        if let Some(version) = clause.strip_prefix(op) {
            return Some((op, version.trim()));
        }
    }
    None
}

fn padded(version: &str, raw: &str) -> Result<Version> {
    parse_lenient_version(version).ok_or_else(|| anyhow!("Invalid version '{}' in '{}'", version, raw))
}

/// `~=2.5` -> (2.5.0, 3.0.0); `~=2.5.1` -> (2.5.1, 2.6.0)
fn compatible_release(version: &str) -> Option<(Version, Version)> {
    let segments = version.split('.').count();
    let lower = parse_lenient_version(version)?;
    let upper = match segments {
        2 => Version::new(lower.major + 1, 0, 0),
        n if n >= 3 => Version::new(lower.major, lower.minor + 1, 0),
        _ => return None,
    };
    Some((lower, upper))
}

/// State of one requirement in the environment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DependencyStatus {
    /// Original requirement string
    pub package: String,
    pub name: String,
    pub required_version: Option<String>,
    pub installed: bool,
    pub installed_version: Option<String>,
    /// Installed and within the required range
    pub satisfied: bool,
}

/// Outcome of an install batch
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InstallReport {
    pub success: bool,
    pub installed: Vec<String>,
    pub failed: Vec<String>,
    pub output: String,
}

/// The package environment extensions run in
#[async_trait]
pub trait PackageEnvironment: Send + Sync {
    /// Installed version of `name`, or `None` when absent
    async fn installed_version(&self, name: &str) -> Result<Option<String>>;

    /// Install one requirement; returns the installer's output
    async fn install(&self, requirement: &str, timeout: Duration) -> Result<String>;
}

/// Package environment driven by external query/install commands
#[derive(Debug, Clone)]
pub struct CommandEnvironment {
    query_command: Vec<String>,
    install_command: Vec<String>,
    query_timeout: Duration,
}

impl CommandEnvironment {
    pub fn new(query_command: Vec<String>, install_command: Vec<String>) -> Self {
        Self {
            query_command,
            install_command,
            query_timeout: Duration::from_secs(30),
        }
    }

    pub fn from_config(config: &DependencyConfig) -> Self {
        Self::new(config.query_command.clone(), config.install_command.clone())
    }

    fn command(parts: &[String], arg: &str) -> Result<Command> {
        let (program, args) = parts
            .split_first()
            .ok_or_else(|| anyhow!("Package command is not configured"))?;
        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg(arg)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok(cmd)
    }
}

/// Extract `Version: x` from package metadata output
pub fn parse_version_line(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        line.strip_prefix("Version:")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    })
}

#[async_trait]
impl PackageEnvironment for CommandEnvironment {
    async fn installed_version(&self, name: &str) -> Result<Option<String>> {
        let child = Self::command(&self.query_command, name)?
            .spawn()
            .context("Failed to spawn package query command")?;

        let output = tokio::time::timeout(self.query_timeout, child.wait_with_output())
            .await
            .map_err(|_| anyhow!("Package query for {} timed out", name))?
            .context("Failed to wait for package query command")?;

        if !output.status.success() {
            debug!("Package {} is not installed", name);
            return Ok(None);
        }
        Ok(parse_version_line(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn install(&self, requirement: &str, timeout: Duration) -> Result<String> {
        let child = Self::command(&self.install_command, requirement)?
            .spawn()
            .context("Failed to spawn package install command")?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| anyhow!("Timeout installing {}", requirement))?
            .context("Failed to wait for package install command")?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            Err(anyhow!(
                "{}",
                String::from_utf8_lossy(&output.stderr).trim().to_string()
            ))
        }
    }
}

/// Checks and installs extension requirements
#[derive(Clone)]
pub struct DependencyResolver {
    environment: Arc<dyn PackageEnvironment>,
    install_timeout: Duration,
}

impl DependencyResolver {
    pub fn new(environment: Arc<dyn PackageEnvironment>, install_timeout: Duration) -> Self {
        Self {
            environment,
            install_timeout,
        }
    }

    pub fn from_config(config: &DependencyConfig) -> Self {
        Self::new(
            Arc::new(CommandEnvironment::from_config(config)),
            Duration::from_secs(config.install_timeout_secs),
        )
    }

    /// Check one requirement
    pub async fn check_one(&self, requirement: &str) -> DependencyStatus {
        let parsed = match Requirement::parse(requirement) {
            Ok(parsed) => parsed,
            Err(e) => {
                error!("Failed to parse requirement '{}': {}", requirement, e);
                return DependencyStatus {
                    package: requirement.to_string(),
                    name: requirement.to_string(),
                    required_version: None,
                    installed: false,
                    installed_version: None,
                    satisfied: false,
                };
            }
        };

        let installed_version = match self.environment.installed_version(&parsed.name).await {
            Ok(version) => version,
            Err(e) => {
                debug!("Could not query {}: {}", parsed.name, e);
                None
            }
        };

        let satisfied = installed_version
            .as_deref()
            .is_some_and(|version| parsed.matches(version));

        DependencyStatus {
            package: requirement.to_string(),
            name: parsed.name,
            required_version: parsed.specifier,
            installed: installed_version.is_some(),
            installed_version,
            satisfied,
        }
    }

    /// Check every requirement
    pub async fn check(&self, requirements: &[String]) -> Vec<DependencyStatus> {
        let mut statuses = Vec::with_capacity(requirements.len());
        for requirement in requirements {
            statuses.push(self.check_one(requirement).await);
        }
        statuses
    }

    /// Requirements that are missing or outside their range
    pub async fn missing(&self, requirements: &[String]) -> Vec<DependencyStatus> {
        self.check(requirements)
            .await
            .into_iter()
            .filter(|status| !status.satisfied)
            .collect()
    }

    /// Install every requirement, one at a time
    pub async fn install(&self, requirements: &[String]) -> InstallReport {
        if requirements.is_empty() {
            return InstallReport {
                success: true,
                output: "No dependencies to install".to_string(),
                ..Default::default()
            };
        }

        let mut report = InstallReport::default();
        let mut outputs = Vec::new();

        for requirement in requirements {
            match self.environment.install(requirement, self.install_timeout).await {
                Ok(_) => {
                    info!("Successfully installed dependency: {}", requirement);
                    outputs.push(format!("Successfully installed {}", requirement));
                    report.installed.push(requirement.clone());
                }
                Err(e) => {
                    error!("Failed to install dependency {}: {}", requirement, e);
                    outputs.push(format!("Failed to install {}: {}", requirement, e));
                    report.failed.push(requirement.clone());
                }
            }
        }

        report.success = report.failed.is_empty();
        report.output = outputs.join("\n");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("2", "2.0.0")]
    #[test_case("2.5", "2.5.0")]
    #[test_case("2.31.0", "2.31.0")]
    #[test_case("2.0rc1", "2.0.0")]
    #[test_case("1.26.4.post1", "1.26.4")]
    fn test_parse_lenient_version(input: &str, expected: &str) {
        assert_eq!(parse_lenient_version(input).unwrap().to_string(), expected);
    }

    #[test]
    fn test_parse_lenient_version_rejects_garbage() {
        assert!(parse_lenient_version("latest").is_none());
    }

    #[test]
    fn test_range_requirement() {
        let req = Requirement::parse("requests>=2,<3").unwrap();
        assert_eq!(req.name, "requests");
        assert_eq!(req.specifier.as_deref(), Some(">=2,<3"));
        assert!(!req.matches("1.9.0"));
        assert!(req.matches("2.5.0"));
        assert!(req.matches("2.5"));
        assert!(!req.matches("3.0.0"));
    }

    #[test]
    fn test_bare_requirement_matches_anything() {
        let req = Requirement::parse("boto3").unwrap();
        assert!(req.specifier.is_none());
        assert!(req.matches("1.34.0"));
    }

    #[test_case("httpx==0.24", "0.24.0", true)]
    #[test_case("httpx==0.24", "0.24.1", false)]
    #[test_case("httpx==0.*", "0.27.0", true)]
    #[test_case("httpx~=0.24", "0.99.0", true)]
    #[test_case("httpx~=0.24", "1.0.0", false)]
    #[test_case("httpx~=0.24.1", "0.24.9", true)]
    #[test_case("httpx~=0.24.1", "0.25.0", false)]
    #[test_case("httpx>=0.24,!=0.25.0", "0.25.0", false)]
    #[test_case("httpx[http2]>=0.24", "0.26.0", true)]
    #[test_case("pywin32>=300; sys_platform == 'win32'", "306", true)]
    fn test_specifiers(requirement: &str, version: &str, expected: bool) {
        assert_eq!(Requirement::parse(requirement).unwrap().matches(version), expected);
    }

    #[test]
    fn test_invalid_requirements() {
        assert!(Requirement::parse(">=2").is_err());
        assert!(Requirement::parse("requests>=two").is_err());
        assert!(Requirement::parse("requests^2").is_err());
    }

    #[test]
    fn test_parse_version_line() {
        let output = "Name: requests\nVersion: 2.31.0\nSummary: HTTP\n";
        assert_eq!(parse_version_line(output).as_deref(), Some("2.31.0"));
        assert!(parse_version_line("Name: requests\n").is_none());
    }
}
