use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

/// One catalog entry from `challenges.json`.
///
/// `dir` is the sandbox build directory. `port` is the port the challenge
/// listens on inside the sandbox; when absent the engine falls back to the
/// build recipe. `challenge_id` and `title` default to the catalog key.
#[derive(Deserialize, Debug, Clone)]
pub struct Challenge {
    pub dir: PathBuf,
    pub port: Option<u16>,
    pub challenge_id: Option<String>,
    pub title: Option<String>,
}

/// The deployable-challenge catalog, loaded once at startup and shared
/// read-only across requests.
#[derive(Deserialize, Debug, Default)]
pub struct Catalog {
    #[serde(flatten)]
    challenges: HashMap<String, Challenge>,
}

/// A catalog entry resolved for a start request, with display metadata
/// filled in.
#[derive(Debug, Clone)]
pub struct ResolvedChallenge {
    pub key: String,
    pub build_dir: PathBuf,
    pub internal_port: Option<u16>,
    pub challenge_id: String,
    pub title: String,
}

impl Catalog {
    /// Load the catalog from the given JSON file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open challenge catalog {}", path.display()))?;
        let reader = std::io::BufReader::new(file);
        serde_json::from_reader(reader)
            .with_context(|| format!("invalid challenge catalog {}", path.display()))
    }

    pub fn resolve(&self, key: &str) -> Option<ResolvedChallenge> {
        let challenge = self.challenges.get(key)?;
        Some(ResolvedChallenge {
            key: key.to_string(),
            build_dir: challenge.dir.clone(),
            internal_port: challenge.port,
            challenge_id: challenge
                .challenge_id
                .clone()
                .unwrap_or_else(|| key.to_string()),
            title: challenge.title.clone().unwrap_or_else(|| key.to_string()),
        })
    }

    pub fn len(&self) -> usize {
        self.challenges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.challenges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_fills_display_defaults_from_the_key() {
        let catalog: Catalog = serde_json::from_str(
            r#"{
                "web1": {"dir": "/challenges/web1", "port": 8080, "title": "Web One"},
                "pwn1": {"dir": "/challenges/pwn1"}
            }"#,
        )
        .unwrap();

        let web1 = catalog.resolve("web1").unwrap();
        assert_eq!(web1.title, "Web One");
        assert_eq!(web1.challenge_id, "web1");
        assert_eq!(web1.internal_port, Some(8080));

        let pwn1 = catalog.resolve("pwn1").unwrap();
        assert_eq!(pwn1.title, "pwn1");
        assert_eq!(pwn1.internal_port, None);

        assert!(catalog.resolve("nope").is_none());
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn unknown_entry_fields_are_ignored() {
        // Catalog files may carry extra metadata (downloads, flags) used by
        // other tooling.
        let catalog: Catalog = serde_json::from_str(
            r#"{"web1": {"dir": "/c/web1", "downloads": ["a.zip"], "points": 100}}"#,
        )
        .unwrap();
        assert!(catalog.resolve("web1").is_some());
    }
}
