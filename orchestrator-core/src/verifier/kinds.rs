//! The five verifier kinds of spec §4.3.

use super::pipeline::{binary_on_path, run_command};
use crate::model::{VerificationKind, VerificationResult};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct VerifierContext {
    pub project_dir: PathBuf,
    pub test_files: Vec<String>,
    pub source_files: Vec<String>,
    pub task_id: String,
    pub iteration: u32,
    pub timeout: Duration,
}

#[async_trait]
pub trait Verifier: Send + Sync {
    fn kind(&self) -> VerificationKind;
    async fn verify(&self, ctx: &VerifierContext) -> VerificationResult;
}

fn timed_out_result(kind: VerificationKind, elapsed: Duration) -> VerificationResult {
    VerificationResult {
        passed: false,
        kind,
        summary: "timed out".into(),
        failures: vec![],
        warnings: vec![],
        duration: elapsed,
        raw_output: String::new(),
    }
}

/// Auto-detects a test framework by probing well-known marker files, runs
/// it, and parses pass/fail counts from stdout.
pub struct TestVerifier {
    pub project_dir: PathBuf,
}

#[async_trait]
impl Verifier for TestVerifier {
    fn kind(&self) -> VerificationKind {
        VerificationKind::Tests
    }

    async fn verify(&self, ctx: &VerifierContext) -> VerificationResult {
        let started = Instant::now();
        let (program, mut args): (&str, Vec<&str>) = if self.project_dir.join("Cargo.toml").exists() {
            ("cargo", vec!["test"])
        } else if self.project_dir.join("package.json").exists() {
            ("npm", vec!["test"])
        } else if self.project_dir.join("pytest.ini").exists()
            || self.project_dir.join("pyproject.toml").exists()
        {
            ("pytest", vec![])
        } else {
            return VerificationResult {
                passed: true,
                kind: VerificationKind::Tests,
                summary: "No test framework configured".into(),
                failures: vec![],
                warnings: vec![],
                duration: started.elapsed(),
                raw_output: String::new(),
            };
        };
        for f in &ctx.test_files {
            args.push(f.as_str());
        }

        let outcome = run_command(program, &args, &self.project_dir, ctx.timeout).await;
        if outcome.timed_out {
            return timed_out_result(VerificationKind::Tests, started.elapsed());
        }

        let failures = extract_failing_tests(&outcome.stdout);
        VerificationResult {
            passed: outcome.exit_code == 0,
            kind: VerificationKind::Tests,
            summary: if outcome.exit_code == 0 {
                "tests passed".into()
            } else {
                format!("{} failing test(s)", failures.len().max(1))
            },
            failures,
            warnings: vec![],
            duration: started.elapsed(),
            raw_output: outcome.stdout,
        }
    }
}

fn extract_failing_tests(stdout: &str) -> Vec<String> {
    let re = regex::Regex::new(r"(?m)^FAILED\s+(\S+)|^test (\S+) \.\.\. FAILED$").unwrap();
    re.captures_iter(stdout)
        .filter_map(|c| c.get(1).or_else(|| c.get(2)).map(|m| m.as_str().to_string()))
        .collect()
}

/// Auto-detects via linter-config presence or a linter binary on PATH.
pub struct LintVerifier {
    pub project_dir: PathBuf,
}

#[async_trait]
impl Verifier for LintVerifier {
    fn kind(&self) -> VerificationKind {
        VerificationKind::Lint
    }

    async fn verify(&self, ctx: &VerifierContext) -> VerificationResult {
        let started = Instant::now();
        let (program, args): (&str, Vec<&str>) = if self.project_dir.join("Cargo.toml").exists() {
            ("cargo", vec!["clippy", "--", "-D", "warnings"])
        } else if binary_on_path("eslint") {
            ("eslint", vec!["."])
        } else {
            return VerificationResult {
                passed: true,
                kind: VerificationKind::Lint,
                summary: "No linter configured".into(),
                failures: vec![],
                warnings: vec![],
                duration: started.elapsed(),
                raw_output: String::new(),
            };
        };

        let outcome = run_command(program, &args, &self.project_dir, ctx.timeout).await;
        if outcome.timed_out {
            return timed_out_result(VerificationKind::Lint, started.elapsed());
        }

        let combined = format!("{}\n{}", outcome.stdout, outcome.stderr);
        let error_re = regex::Regex::new(r"(?i)error(\[[^\]]*\])?:\s*(.+)").unwrap();
        let warn_re = regex::Regex::new(r"(?i)warning:\s*(.+)").unwrap();
        let failures: Vec<String> = error_re
            .captures_iter(&combined)
            .filter_map(|c| c.get(2).map(|m| m.as_str().to_string()))
            .collect();
        let warnings: Vec<String> = warn_re
            .captures_iter(&combined)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
            .collect();

        VerificationResult {
            passed: outcome.exit_code == 0,
            kind: VerificationKind::Lint,
            summary: format!("{} error(s), {} warning(s)", failures.len(), warnings.len()),
            failures,
            warnings,
            duration: started.elapsed(),
            raw_output: outcome.stdout,
        }
    }
}

/// Auto-detects a security scanner per ecosystem; passes unless a
/// HIGH/CRITICAL finding is present.
pub struct SecurityVerifier {
    pub project_dir: PathBuf,
}

#[async_trait]
impl Verifier for SecurityVerifier {
    fn kind(&self) -> VerificationKind {
        VerificationKind::Security
    }

    async fn verify(&self, ctx: &VerifierContext) -> VerificationResult {
        let started = Instant::now();
        if !(self.project_dir.join("Cargo.toml").exists() && binary_on_path("cargo-audit")) {
            return VerificationResult {
                passed: true,
                kind: VerificationKind::Security,
                summary: "No security scanner configured".into(),
                failures: vec![],
                warnings: vec![],
                duration: started.elapsed(),
                raw_output: String::new(),
            };
        }

        let outcome = run_command("cargo", &["audit", "--json"], &self.project_dir, ctx.timeout).await;
        if outcome.timed_out {
            return timed_out_result(VerificationKind::Security, started.elapsed());
        }

        let high_or_critical = outcome.stdout.to_lowercase().contains("\"severity\":\"high\"")
            || outcome.stdout.to_lowercase().contains("\"severity\":\"critical\"");

        VerificationResult {
            passed: outcome.exit_code == 0 && !high_or_critical,
            kind: VerificationKind::Security,
            summary: if high_or_critical {
                "HIGH/CRITICAL findings present".into()
            } else {
                "no blocking findings".into()
            },
            failures: if high_or_critical {
                vec!["HIGH/CRITICAL severity vulnerability reported".into()]
            } else {
                vec![]
            },
            warnings: vec![],
            duration: started.elapsed(),
            raw_output: outcome.stdout,
        }
    }
}

/// Always passes; used when no verification is configured for a task.
pub struct NoneVerifier;

#[async_trait]
impl Verifier for NoneVerifier {
    fn kind(&self) -> VerificationKind {
        VerificationKind::None
    }
    async fn verify(&self, _ctx: &VerifierContext) -> VerificationResult {
        VerificationResult {
            passed: true,
            kind: VerificationKind::None,
            summary: "no verification configured".into(),
            failures: vec![],
            warnings: vec![],
            duration: Duration::from_secs(0),
            raw_output: String::new(),
        }
    }
}

pub struct CompositeVerifier {
    pub members: Vec<Box<dyn Verifier>>,
    pub require_all: bool,
}

#[async_trait]
impl Verifier for CompositeVerifier {
    fn kind(&self) -> VerificationKind {
        VerificationKind::Composite
    }

    async fn verify(&self, ctx: &VerifierContext) -> VerificationResult {
        let started = Instant::now();
        let mut results = Vec::with_capacity(self.members.len());
        for m in &self.members {
            results.push(m.verify(ctx).await);
        }

        let passed = if self.require_all {
            results.iter().all(|r| r.passed)
        } else {
            results.iter().any(|r| r.passed)
        };

        let failures = results.iter().flat_map(|r| r.failures.clone()).collect();
        let warnings = results.iter().flat_map(|r| r.warnings.clone()).collect();
        let raw_output = results
            .iter()
            .map(|r| r.raw_output.clone())
            .collect::<Vec<_>>()
            .join("\n---\n");

        VerificationResult {
            passed,
            kind: VerificationKind::Composite,
            summary: format!(
                "{}/{} verifiers passed ({})",
                results.iter().filter(|r| r.passed).count(),
                results.len(),
                if self.require_all { "require_all" } else { "require_any" }
            ),
            failures,
            warnings,
            duration: started.elapsed(),
            raw_output,
        }
    }
}

pub fn create_verifier(kind: VerificationKind, project_dir: PathBuf) -> Box<dyn Verifier> {
    match kind {
        VerificationKind::Tests => Box::new(TestVerifier { project_dir }),
        VerificationKind::Lint => Box::new(LintVerifier { project_dir }),
        VerificationKind::Security => Box::new(SecurityVerifier { project_dir }),
        VerificationKind::None => Box::new(NoneVerifier),
        VerificationKind::Composite => Box::new(CompositeVerifier {
            members: vec![],
            require_all: true,
        }),
    }
}

pub struct CompositeOptions {
    pub include_tests: bool,
    pub include_lint: bool,
    pub include_security: bool,
    pub require_all: bool,
}

pub fn create_composite(project_dir: PathBuf, opts: CompositeOptions) -> CompositeVerifier {
    let mut members: Vec<Box<dyn Verifier>> = vec![];
    if opts.include_tests {
        members.push(Box::new(TestVerifier {
            project_dir: project_dir.clone(),
        }));
    }
    if opts.include_lint {
        members.push(Box::new(LintVerifier {
            project_dir: project_dir.clone(),
        }));
    }
    if opts.include_security {
        members.push(Box::new(SecurityVerifier {
            project_dir: project_dir.clone(),
        }));
    }
    CompositeVerifier {
        members,
        require_all: opts.require_all,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn none_verifier_always_passes() {
        let v = NoneVerifier;
        let ctx = VerifierContext {
            project_dir: PathBuf::from("."),
            test_files: vec![],
            source_files: vec![],
            task_id: "t1".into(),
            iteration: 1,
            timeout: Duration::from_secs(1),
        };
        let result = v.verify(&ctx).await;
        assert!(result.passed);
    }

    #[tokio::test]
    async fn test_verifier_passes_with_no_framework_configured() {
        let dir = tempfile::tempdir().unwrap();
        let v = TestVerifier {
            project_dir: dir.path().to_path_buf(),
        };
        let ctx = VerifierContext {
            project_dir: dir.path().to_path_buf(),
            test_files: vec![],
            source_files: vec![],
            task_id: "t1".into(),
            iteration: 1,
            timeout: Duration::from_secs(1),
        };
        let result = v.verify(&ctx).await;
        assert!(result.passed);
        assert!(result.summary.contains("No test framework"));
    }

    #[tokio::test]
    async fn composite_require_any_passes_if_one_passes() {
        let composite = CompositeVerifier {
            members: vec![Box::new(NoneVerifier)],
            require_all: false,
        };
        let ctx = VerifierContext {
            project_dir: PathBuf::from("."),
            test_files: vec![],
            source_files: vec![],
            task_id: "t1".into(),
            iteration: 1,
            timeout: Duration::from_secs(1),
        };
        assert!(composite.verify(&ctx).await.passed);
    }
}
