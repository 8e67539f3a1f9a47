//! Cumulative per-release changelog.
//!
//! Each release keeps a `CHANGELOG.json` under `<changelog root>/<release>/`
//! that grows as repositories are tagged. After every update the JSON is
//! re-sorted and rendered to `CHANGELOG.md`; website digests are rendered
//! on demand into `docs_changelog.md`.
use chrono::{DateTime, Utc};
use log::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{Result, manifest::Release, version::compare_tags};

pub const CHANGELOG_JSON: &str = "CHANGELOG.json";
pub const CHANGELOG_MD: &str = "CHANGELOG.md";
pub const DOCS_CHANGELOG_MD: &str = "docs_changelog.md";

const CHANGELOG_TEMPLATE: &str =
    include_str!("../templates/changelog.md.tera");
const STANDALONE_TEMPLATE: &str =
    include_str!("../templates/standalone-changelog.md.tera");
const SHARED_TEMPLATE: &str =
    include_str!("../templates/shared-changelog.md.tera");

/// Markdown view rendered from a [`Changelog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangelogTemplate {
    /// in-repo `CHANGELOG.md`
    Default,
    /// digest for a website dedicated to the product line
    Standalone,
    /// digest for a website shared by several product lines
    Shared,
}

impl ChangelogTemplate {
    fn name(&self) -> &'static str {
        match self {
            ChangelogTemplate::Default => "changelog.md",
            ChangelogTemplate::Standalone => "standalone-changelog.md",
            ChangelogTemplate::Shared => "shared-changelog.md",
        }
    }

    fn source(&self) -> &'static str {
        match self {
            ChangelogTemplate::Default => CHANGELOG_TEMPLATE,
            ChangelogTemplate::Standalone => STANDALONE_TEMPLATE,
            ChangelogTemplate::Shared => SHARED_TEMPLATE,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    #[serde(rename = "SHA")]
    pub sha: String,
    #[serde(rename = "Subject")]
    pub subject: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseChangelog {
    pub tag: String,
    #[serde(default)]
    pub commits: Vec<Commit>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectChangelog {
    pub url: String,
    #[serde(default)]
    pub releases: Vec<ReleaseChangelog>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changelog {
    pub product_line: String,
    pub release: String,
    pub release_date: DateTime<Utc>,
    pub release_project_url: String,
    #[serde(default)]
    pub docs_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kubernetes_version: String,
    #[serde(default)]
    pub projects: Vec<ProjectChangelog>,
}

impl Changelog {
    pub fn new(release: &Release, release_tracker: &str) -> Self {
        Self {
            product_line: release.product_line.clone(),
            release: release.release.clone(),
            release_date: Utc::now(),
            release_project_url: release_tracker.to_string(),
            docs_url: release.docs_url(),
            kubernetes_version: release.kubernetes_version.clone(),
            projects: vec![],
        }
    }

    /// Load `CHANGELOG.json` from `dir`, or start a new changelog. Release
    /// metadata is refreshed from the manifest either way; the release date
    /// of an existing changelog is kept.
    pub fn load(
        dir: &Path,
        release: &Release,
        release_tracker: &str,
    ) -> Result<Self> {
        let path = dir.join(CHANGELOG_JSON);
        let fresh = Self::new(release, release_tracker);

        if !path.exists() {
            return Ok(fresh);
        }

        let content = std::fs::read_to_string(&path)?;
        let existing: Changelog = serde_json::from_str(&content)?;

        Ok(Self {
            release_date: existing.release_date,
            projects: existing.projects,
            ..fresh
        })
    }

    /// Record `commits` for `(url, tag)`, replacing any previous entry for
    /// the same tag.
    pub fn upsert(&mut self, url: &str, tag: &str, commits: Vec<Commit>) {
        let project = match self.projects.iter().position(|p| p.url == url) {
            Some(idx) => &mut self.projects[idx],
            None => {
                self.projects.push(ProjectChangelog {
                    url: url.to_string(),
                    releases: vec![],
                });
                let last = self.projects.len() - 1;
                &mut self.projects[last]
            }
        };

        match project.releases.iter_mut().find(|r| r.tag == tag) {
            Some(existing) => existing.commits = commits,
            None => project.releases.push(ReleaseChangelog {
                tag: tag.to_string(),
                commits,
            }),
        }
    }

    /// Projects by url, each project's releases by version.
    pub fn sort(&mut self) {
        self.projects.sort_by(|a, b| a.url.cmp(&b.url));
        for project in self.projects.iter_mut() {
            project.releases.sort_by(|a, b| compare_tags(&a.tag, &b.tag));
        }
    }

    pub fn render(&self, template: ChangelogTemplate) -> Result<String> {
        let mut tera = tera::Tera::default();
        tera.add_raw_template(template.name(), template.source())?;
        let context = tera::Context::from_serialize(self)?;
        Ok(tera.render(template.name(), &context)?)
    }

    pub fn write_json(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(CHANGELOG_JSON);
        let mut content = serde_json::to_string_pretty(self)?;
        content.push('\n');
        std::fs::write(&path, content)?;
        Ok(path)
    }

    pub fn write_markdown(
        &self,
        path: &Path,
        template: ChangelogTemplate,
    ) -> Result<()> {
        let content = self.render(template)?;
        debug!("rendered changelog {}:\n{content}", path.display());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Upsert `(repo_url, tag)` into the changelog stored in `dir`, then
/// rewrite both `CHANGELOG.json` and `CHANGELOG.md`.
pub fn update_changelog(
    dir: &Path,
    release: &Release,
    release_tracker: &str,
    repo_url: &str,
    tag: &str,
    commits: Vec<Commit>,
) -> Result<Changelog> {
    let mut changelog = Changelog::load(dir, release, release_tracker)?;
    changelog.upsert(repo_url, tag, commits);
    changelog.sort();

    let json = changelog.write_json(dir)?;
    info!("updated changelog {}", json.display());

    changelog.write_markdown(&dir.join(CHANGELOG_MD), ChangelogTemplate::Default)?;

    Ok(changelog)
}
