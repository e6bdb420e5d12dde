//! Manifest checks

use aegis_common::{AegisError, AegisResult, Finding, ScanKind, Severity};

/// Dependency manifests the scanner knows how to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Manifest {
    Cargo,
    Npm,
    Pip,
    GoMod,
}

impl Manifest {
    pub const ALL: [Manifest; 4] = [Manifest::Cargo, Manifest::Npm, Manifest::Pip, Manifest::GoMod];

    pub const fn file_name(&self) -> &'static str {
        match self {
            Manifest::Cargo => "Cargo.toml",
            Manifest::Npm => "package.json",
            Manifest::Pip => "requirements.txt",
            Manifest::GoMod => "go.mod",
        }
    }

    /// Findings for one manifest's contents. Malformed manifests are an error.
    pub fn check(&self, contents: &str) -> AegisResult<Vec<Finding>> {
        match self {
            Manifest::Cargo => check_cargo(contents),
            Manifest::Npm => check_package_json(contents),
            Manifest::Pip => Ok(check_requirements(contents)),
            Manifest::GoMod => Ok(check_go_mod(contents)),
        }
    }
}

fn finding(severity: Severity, title: &str, description: String, remediation: &str) -> Finding {
    Finding::new(ScanKind::Dependency, severity, title)
        .with_description(description)
        .with_remediation(remediation)
}

fn wildcard(name: &str, manifest: &str) -> Finding {
    finding(
        Severity::High,
        "Unbounded Dependency Version",
        format!("{name} accepts any version in {manifest}"),
        "Constrain the dependency to a tested version range",
    )
}

fn check_cargo(contents: &str) -> AegisResult<Vec<Finding>> {
    let manifest: toml::Table = contents
        .parse()
        .map_err(|e| AegisError::Validation(format!("Cargo.toml: {e}")))?;

    let workspace_deps = manifest
        .get("workspace")
        .and_then(|w| w.get("dependencies"));
    let sections = ["dependencies", "dev-dependencies", "build-dependencies"]
        .into_iter()
        .filter_map(|s| manifest.get(s))
        .chain(workspace_deps);

    let mut findings = Vec::new();
    for section in sections {
        let Some(deps) = section.as_table() else {
            continue;
        };
        for (name, spec) in deps {
            match spec {
                toml::Value::String(version) if version.trim() == "*" => {
                    findings.push(wildcard(name, "Cargo.toml"));
                }
                toml::Value::Table(table) => {
                    if table.get("version").and_then(|v| v.as_str()).map(str::trim) == Some("*") {
                        findings.push(wildcard(name, "Cargo.toml"));
                    }
                    let pinned = table.contains_key("rev") || table.contains_key("tag");
                    if table.contains_key("git") && !pinned {
                        findings.push(finding(
                            Severity::Medium,
                            "Unpinned Git Dependency",
                            format!("{name} tracks a moving git reference in Cargo.toml"),
                            "Pin git dependencies to a rev or tag",
                        ));
                    }
                }
                _ => {}
            }
        }
    }
    Ok(findings)
}

fn check_package_json(contents: &str) -> AegisResult<Vec<Finding>> {
    let manifest: serde_json::Value = serde_json::from_str(contents)
        .map_err(|e| AegisError::Validation(format!("package.json: {e}")))?;

    let mut findings = Vec::new();
    for section in ["dependencies", "devDependencies", "optionalDependencies"] {
        let Some(deps) = manifest.get(section).and_then(|d| d.as_object()) else {
            continue;
        };
        for (name, version) in deps {
            let version = version.as_str().unwrap_or_default().trim();
            if matches!(version, "" | "*" | "latest") {
                findings.push(wildcard(name, "package.json"));
            } else if ["git:", "git+", "github:", "http://", "https://"]
                .iter()
                .any(|prefix| version.starts_with(prefix))
            {
                findings.push(finding(
                    Severity::Medium,
                    "Dependency From Unverified Source",
                    format!("{name} is fetched from {version} instead of the registry"),
                    "Publish the package to a registry or pin a commit hash",
                ));
            }
        }
    }
    Ok(findings)
}

fn check_requirements(contents: &str) -> Vec<Finding> {
    contents
        .lines()
        .map(|line| line.split('#').next().unwrap_or_default().trim())
        .filter(|line| !line.is_empty() && !line.starts_with('-'))
        .filter(|line| !line.contains("=="))
        .map(|line| {
            let name = line
                .split(|c: char| "<>=!~[; ".contains(c))
                .next()
                .unwrap_or(line);
            finding(
                Severity::Medium,
                "Unpinned Python Requirement",
                format!("{name} is not pinned to an exact version in requirements.txt"),
                "Pin requirements with == and use a lock file",
            )
        })
        .collect()
}

fn check_go_mod(contents: &str) -> Vec<Finding> {
    let mut findings = Vec::new();
    let mut in_block = false;
    for line in contents.lines().map(str::trim) {
        let directive = if in_block {
            if line == ")" {
                in_block = false;
                continue;
            }
            line
        } else if line == "replace (" {
            in_block = true;
            continue;
        } else if let Some(rest) = line.strip_prefix("replace ") {
            rest.trim()
        } else {
            continue;
        };

        let Some((module, replacement)) = directive.split_once("=>") else {
            continue;
        };
        let replacement = replacement.trim();
        if replacement.starts_with("./") || replacement.starts_with("../") || replacement.starts_with('/') {
            let module = module.split_whitespace().next().unwrap_or_default();
            findings.push(finding(
                Severity::Low,
                "Local Module Replacement",
                format!("{module} is replaced by local path {replacement} in go.mod"),
                "Remove local replace directives before release builds",
            ));
        }
    }
    findings
}
