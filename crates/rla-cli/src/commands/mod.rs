pub(crate) mod estimate;
pub(crate) mod simulate;

use std::fs;
use std::path::Path;

use miette::IntoDiagnostic;
use rla_core::test_data::{make_election, TestContest};
use rla_core::{make_fuzzed_cards, AuditConfig, Card, Contest, RunContext};
use serde::{Deserialize, Serialize};

/// Contents of an election file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ElectionInput {
    #[serde(default)]
    pub(crate) audit: AuditConfig,
    pub(crate) contests: Vec<TestContest>,
    pub(crate) ncards: usize,
    /// Seed for card PRNs; the audit seed when absent.
    #[serde(default)]
    pub(crate) card_seed: Option<u64>,
    #[serde(default)]
    pub(crate) mvr_fuzz_pct: f64,
}

pub(crate) struct Election {
    pub(crate) config: AuditConfig,
    pub(crate) contests: Vec<Contest>,
    pub(crate) cvrs: Vec<Card>,
    pub(crate) mvr_fuzz_pct: f64,
}

impl Election {
    /// Hand-audit results: the CVRs with `mvr_fuzz_pct` of them altered.
    pub(crate) fn mvrs(&self) -> miette::Result<Vec<Card>> {
        let mut ctx = RunContext::new(self.config.seed ^ 0x5eed);
        make_fuzzed_cards(&self.cvrs, &self.contests, self.mvr_fuzz_pct, &mut ctx).into_diagnostic()
    }
}

pub(crate) fn load_election(path: &Path) -> miette::Result<ElectionInput> {
    let text = fs::read_to_string(path)
        .map_err(|e| miette::miette!("cannot read {}: {e}", path.display()))?;
    let input: ElectionInput = serde_json::from_str(&text)
        .map_err(|e| miette::miette!("invalid election file {}: {e}", path.display()))?;
    Ok(input)
}

pub(crate) fn build_election(input: ElectionInput) -> miette::Result<Election> {
    input.audit.validate().into_diagnostic()?;
    if !(0.0..=1.0).contains(&input.mvr_fuzz_pct) {
        miette::bail!("mvr_fuzz_pct {} must lie in [0, 1]", input.mvr_fuzz_pct);
    }
    let seed = input.card_seed.unwrap_or(input.audit.seed);
    let (contests, cvrs) = make_election(&input.contests, input.ncards, seed).into_diagnostic()?;
    Ok(Election {
        config: input.audit,
        contests,
        cvrs,
        mvr_fuzz_pct: input.mvr_fuzz_pct,
    })
}

pub(crate) fn write_json_artifact<T: Serialize>(path: &Path, value: &T) -> miette::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).into_diagnostic()?;
    }
    fs::write(path, serde_json::to_string_pretty(value).into_diagnostic()?).into_diagnostic()?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::io::Write;

    pub(crate) const ELECTION: &str = r#"{
        "audit": {"n_trials": 10, "n_workers": 2, "seed": 99},
        "contests": [
            {"id": 1, "choice": {"kind": "plurality"}, "votes": [600, 380], "nc": 1000},
            {"id": 2, "choice": {"kind": "plurality"}, "votes": [300, 180], "nc": 500, "n_phantoms": 5}
        ],
        "ncards": 1000,
        "mvr_fuzz_pct": 0.0
    }"#;

    pub(crate) fn election_file(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn loads_and_builds_election() {
        let file = election_file(ELECTION);
        let input = load_election(file.path()).unwrap();
        assert_eq!(input.audit.n_trials, 10);
        assert_eq!(input.audit.risk_limit, 0.05);
        let election = build_election(input).unwrap();
        assert_eq!(election.contests.len(), 2);
        assert_eq!(election.cvrs.len(), 1005);
        assert_eq!(election.mvrs().unwrap(), election.cvrs);
    }

    #[test]
    fn rejects_bad_fuzz_share() {
        let file = election_file(&ELECTION.replace("\"mvr_fuzz_pct\": 0.0", "\"mvr_fuzz_pct\": 3.0"));
        let input = load_election(file.path()).unwrap();
        assert!(build_election(input).is_err());
    }

    #[test]
    fn malformed_file_is_reported() {
        let file = election_file("{\"contests\": ");
        let err = load_election(file.path()).unwrap_err();
        assert!(err.to_string().contains("invalid election file"));
    }

    #[test]
    fn writes_nested_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("record.json");
        write_json_artifact(&path, &serde_json::json!({"ok": true})).unwrap();
        assert!(path.exists());
    }
}
