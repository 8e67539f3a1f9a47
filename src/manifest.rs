//! Release manifest model, validation and loading.
//!
//! A manifest describes one product line release as an ordered list of
//! groups. Repositories inside a group are released independently of each
//! other, but a group is only started once every earlier group is resolved.
use log::*;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::PathBuf};

use crate::{AutomatonError, Result, version::ReleaseVersion};

/// How a project's tags show up in changelogs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangelogStatus {
    /// Append the tag's commits to the release changelog.
    #[default]
    #[serde(rename = "")]
    AddToChangelog,
    #[serde(rename = "Skip")]
    Skip,
    /// Render the release digest for a website dedicated to this product.
    #[serde(rename = "StandaloneWebsite")]
    StandaloneWebsite,
    /// Render the release digest for a website shared by product lines.
    #[serde(rename = "SharedWebsite")]
    SharedWebsite,
}

impl ChangelogStatus {
    fn is_default(&self) -> bool {
        matches!(self, ChangelogStatus::AddToChangelog)
    }
}

/// One repository taking part in a release.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Asset/product lookup key, also exported as `<KEY>_VERSION`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,
    /// Single tag released against an inferred or templated branch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// tag -> pre-existing branch, updated via cherry-pick before tagging.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeMap<String, String>>,
    #[serde(
        default,
        rename = "chartNames",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub chart_names: Vec<String>,
    /// Upstream repositories whose charts this project republishes.
    #[serde(default, rename = "charts", skip_serializing_if = "Vec::is_empty")]
    pub chart_repos: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<String>,
    /// Branch template, e.g. `release-${TAG}`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub release_branch: String,
    /// Seeds a ready-to-tag fact so the project skips the prepare step.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ready_to_tag: bool,
    #[serde(default, skip_serializing_if = "ChangelogStatus::is_default")]
    pub changelog: ChangelogStatus,
}

impl Project {
    pub fn uses_cherry_pick(&self) -> bool {
        self.tags.is_some() && self.tag.is_none()
    }

    pub fn is_chart_consumer(&self) -> bool {
        !self.chart_repos.is_empty()
    }

    pub fn is_tagless(&self) -> bool {
        self.tag.is_none()
            && self.tags.as_ref().map(|t| t.is_empty()).unwrap_or(true)
    }

    /// Ensure the project uses a single addressing mode.
    pub fn check_addressing(&self, repo_url: &str) -> Result<()> {
        if self.tag.is_some() && self.tags.is_some() {
            return Err(AutomatonError::invalid_config(format!(
                "repo {repo_url} is provided an invalid project configuration which uses both tag and tags"
            )));
        }
        Ok(())
    }

    /// All tags this project will carry once released.
    pub fn tag_names(&self) -> Vec<String> {
        if let Some(tag) = &self.tag {
            return vec![tag.clone()];
        }
        self.tags
            .as_ref()
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// Maintenance-only repository processed after every group is released.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalProject {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<String>,
}

/// repo url -> project, released independently within the group
pub type IndependentProjects = BTreeMap<String, Project>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub product_line: String,
    pub release: String,
    /// e.g. `https://stash.run/docs/%s`
    #[serde(default)]
    pub docs_url_template: String,
    #[serde(default)]
    pub kubernetes_version: String,
    /// Groups released in sequence.
    pub projects: Vec<IndependentProjects>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub external_projects: BTreeMap<String, ExternalProject>,
}

impl Release {
    pub fn validate(&self) -> Result<()> {
        if self.release.is_empty() {
            return Err(AutomatonError::invalid_config(
                "missing release number",
            ));
        }

        let release_version = ReleaseVersion::parse_strict(&self.release)?;

        for (repo_url, project) in self.projects.iter().flatten() {
            project.check_addressing(repo_url)?;

            // only check projects that use their own semver tags
            let Some(tag) = &project.tag else {
                continue;
            };
            if *tag == self.release {
                continue;
            }

            let version = ReleaseVersion::parse_strict(tag).map_err(|e| {
                AutomatonError::invalid_config(format!(
                    "invalid tag for repo {repo_url}: {e}"
                ))
            })?;

            if version.is_patch_release() && !version.prerelease().is_empty()
            {
                return Err(AutomatonError::invalid_config(format!(
                    "{repo_url} tag {tag} is invalid because it is a patch release but includes a pre-release component"
                )));
            }

            if (version.major() != 0 || version.minor() != 0)
                && version.prerelease() != release_version.prerelease()
            {
                return Err(AutomatonError::invalid_config(format!(
                    "repo {repo_url} uses different prerelease version {tag} compared to product release number {}",
                    self.release
                )));
            }
        }

        Ok(())
    }

    /// Tags planned for `repo_url` anywhere in the manifest.
    pub fn find_repo_tags(&self, repo_url: &str) -> Option<Vec<String>> {
        self.projects
            .iter()
            .flat_map(|group| group.get(repo_url))
            .find(|project| project.tag.is_some() || project.tags.is_some())
            .map(|project| project.tag_names())
    }

    pub fn docs_url(&self) -> String {
        if self.docs_url_template.is_empty() {
            return String::new();
        }
        self.docs_url_template.replacen("%s", &self.release, 1)
    }

    /// Distinct single-tag versions across all groups.
    pub fn project_tags(&self) -> Vec<String> {
        let mut tags = self
            .projects
            .iter()
            .flatten()
            .filter_map(|(_, project)| project.tag.clone())
            .collect::<Vec<_>>();
        tags.sort();
        tags.dedup();
        tags
    }
}

enum ManifestFormat {
    Json,
    Yaml,
}

fn detect_format(location: &str) -> ManifestFormat {
    let lower = location.to_lowercase();
    if lower.ends_with(".yaml") || lower.ends_with(".yml") {
        ManifestFormat::Yaml
    } else {
        ManifestFormat::Json
    }
}

/// Parse manifest content, choosing the format from the file name.
pub fn parse_manifest(location: &str, content: &str) -> Result<Release> {
    let release: Release = match detect_format(location) {
        ManifestFormat::Json => serde_json::from_str(content)?,
        ManifestFormat::Yaml => serde_yaml::from_str(content)?,
    };
    Ok(release)
}

/// Load a manifest from a local path or an http(s) url.
pub async fn load_manifest(location: &str) -> Result<Release> {
    let content = if location.starts_with("http://")
        || location.starts_with("https://")
    {
        info!("fetching release file: {location}");
        reqwest::get(location)
            .await?
            .error_for_status()?
            .text()
            .await?
    } else {
        let path = PathBuf::from(location);
        info!("reading release file: {}", path.display());
        tokio::fs::read_to_string(&path).await?
    };

    parse_manifest(location, &content)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(tag: &str) -> Project {
        Project {
            tag: Some(tag.to_string()),
            ..Project::default()
        }
    }

    fn release_with(
        release: &str,
        groups: Vec<Vec<(&str, Project)>>,
    ) -> Release {
        Release {
            product_line: "stash".into(),
            release: release.into(),
            projects: groups
                .into_iter()
                .map(|g| {
                    g.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
                })
                .collect(),
            ..Release::default()
        }
    }

    #[test]
    fn test_parse_json_manifest() {
        let content = r#"{
  "product_line": "stash",
  "release": "v2020.6.16",
  "docs_url_template": "https://stash.run/docs/%s",
  "projects": [
    {
      "github.com/stashed/apimachinery": { "tag": "v0.1.0" }
    },
    {
      "github.com/stashed/postgres": {
        "tags": { "9.6-v1": "release-9.6", "10.2-v1": "release-10.2" },
        "changelog": "Skip"
      },
      "github.com/stashed/installer": {
        "charts": ["github.com/stashed/stash"],
        "commands": ["make gen"]
      }
    }
  ],
  "external_projects": {
    "github.com/appscode/static-assets": { "commands": ["make fmt"] }
  }
}"#;
        let release = parse_manifest("release.json", content).unwrap();
        assert_eq!(release.projects.len(), 2);
        assert_eq!(release.docs_url(), "https://stash.run/docs/v2020.6.16");

        let postgres = &release.projects[1]["github.com/stashed/postgres"];
        assert!(postgres.uses_cherry_pick());
        assert_eq!(postgres.changelog, ChangelogStatus::Skip);

        let installer = &release.projects[1]["github.com/stashed/installer"];
        assert!(installer.is_chart_consumer());
        assert!(installer.is_tagless());
        assert_eq!(release.external_projects.len(), 1);
    }

    #[test]
    fn test_parse_yaml_manifest() {
        let content = r#"
product_line: kubedb
release: v2021.1.1
projects:
  - github.com/kubedb/apimachinery:
      tag: v0.16.0
      release_branch: release-${TAG}
      changelog: StandaloneWebsite
"#;
        let release = parse_manifest("release.yaml", content).unwrap();
        let p = &release.projects[0]["github.com/kubedb/apimachinery"];
        assert_eq!(p.release_branch, "release-${TAG}");
        assert_eq!(p.changelog, ChangelogStatus::StandaloneWebsite);
    }

    #[test]
    fn test_validate_accepts_consistent_manifest() {
        let release = release_with(
            "v2020.6.16",
            vec![
                vec![("github.com/a/a", project("v0.1.0"))],
                vec![("github.com/a/b", project("v1.2.3"))],
            ],
        );
        assert!(release.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_tag_and_tags() {
        let mut p = project("v1.0.0");
        p.tags = Some(BTreeMap::from([(
            "v1.0.0".to_string(),
            "release-1.0".to_string(),
        )]));
        let release =
            release_with("v2020.6.16", vec![vec![("github.com/a/a", p)]]);
        let err = release.validate().unwrap_err();
        assert!(err.to_string().contains("both tag and tags"));
    }

    #[test]
    fn test_validate_rejects_patch_prerelease() {
        let release = release_with(
            "v2020.6.16-rc.0",
            vec![vec![("github.com/a/a", project("v1.2.3-rc.0"))]],
        );
        let err = release.validate().unwrap_err();
        assert!(err.to_string().contains("patch release"));
    }

    #[test]
    fn test_validate_rejects_mismatched_prerelease() {
        let release = release_with(
            "v2020.6.16-rc.0",
            vec![vec![("github.com/a/a", project("v1.2.0"))]],
        );
        assert!(release.validate().is_err());

        // 0.0.x tags are exempt
        let release = release_with(
            "v2020.6.16-rc.0",
            vec![vec![("github.com/a/a", project("v0.0.1"))]],
        );
        assert!(release.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_or_invalid_release() {
        let release = release_with("", vec![]);
        assert!(release.validate().is_err());

        let release = release_with("2020.6", vec![]);
        assert!(release.validate().is_err());
    }

    #[test]
    fn test_find_repo_tags() {
        let cherry = Project {
            tags: Some(BTreeMap::from([
                ("9.6-v1".to_string(), "release-9.6".to_string()),
                ("10.2-v1".to_string(), "release-10.2".to_string()),
            ])),
            ..Project::default()
        };
        let release = release_with(
            "v2020.6.16",
            vec![
                vec![("github.com/a/a", project("v0.1.0"))],
                vec![("github.com/a/pg", cherry)],
            ],
        );
        assert_eq!(
            release.find_repo_tags("github.com/a/a"),
            Some(vec!["v0.1.0".to_string()])
        );
        assert_eq!(release.find_repo_tags("github.com/a/pg").unwrap().len(), 2);
        assert_eq!(release.find_repo_tags("github.com/a/missing"), None);
    }
}
