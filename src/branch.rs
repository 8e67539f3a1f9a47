//! Decides which branch a release tag is cut from.
use crate::{
    AutomatonError, Result,
    env::{TemplateVars, substitute},
    version::ReleaseVersion,
};

/// How the tagged commit is produced on the target branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleasePlan {
    /// Check out the existing branch, reset to the recorded merge commit if
    /// any, and tag.
    Pinned,
    /// Check out the existing branch and merge trunk (or the recorded merge
    /// commit) into it before tagging.
    MergeInto,
    /// Branch off trunk (or the recorded merge commit) and tag.
    Create,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseTarget {
    pub branch: String,
    pub plan: ReleasePlan,
}

/// Branch naming inputs for one tag of one project.
#[derive(Debug, Clone, Copy)]
pub struct BranchRequest<'a> {
    pub repo_url: &'a str,
    pub tag: &'a str,
    /// Branch from the manifest's tag map, for cherry-pick projects.
    pub cherry_pick_branch: Option<&'a str>,
    /// Branch template such as `release-${TAG}`.
    pub release_branch_template: &'a str,
}

/// Resolve the release branch for a tag.
///
/// `remote_branch_exists` is consulted for every candidate branch.
pub fn resolve_branch<F>(
    req: BranchRequest<'_>,
    vars: &TemplateVars,
    mut remote_branch_exists: F,
) -> Result<ReleaseTarget>
where
    F: FnMut(&str) -> Result<bool>,
{
    let missing = |branch: &str| {
        AutomatonError::missing_branch(req.repo_url, req.tag, branch)
    };

    if let Some(branch) = req.cherry_pick_branch {
        if !remote_branch_exists(branch)? {
            return Err(missing(branch));
        }
        return Ok(ReleaseTarget {
            branch: branch.to_string(),
            plan: ReleasePlan::Pinned,
        });
    }

    let version = ReleaseVersion::parse(req.tag)?;

    let existing_or_new = |branch: String, exists: bool| ReleaseTarget {
        branch,
        plan: if exists {
            ReleasePlan::MergeInto
        } else {
            ReleasePlan::Create
        },
    };

    if !req.release_branch_template.is_empty() {
        let branch = substitute(req.release_branch_template, vars);
        let exists = remote_branch_exists(&branch)?;
        return Ok(existing_or_new(branch, exists));
    }

    if version.is_patch_release() {
        if !version.prerelease().is_empty() {
            return Err(AutomatonError::PatchPrerelease(req.tag.to_string()));
        }

        let patch_branch = format!(
            "release-{}.{}.{}",
            version.major(),
            version.minor(),
            version.patch()
        );
        if remote_branch_exists(&patch_branch)? {
            return Ok(ReleaseTarget {
                branch: patch_branch,
                plan: ReleasePlan::Pinned,
            });
        }

        let minor_branch =
            format!("release-{}.{}", version.major(), version.minor());
        if remote_branch_exists(&minor_branch)? {
            return Ok(ReleaseTarget {
                branch: minor_branch,
                plan: ReleasePlan::Pinned,
            });
        }

        return Err(missing(&minor_branch));
    }

    let branch = format!("release-{}.{}", version.major(), version.minor());
    let exists = remote_branch_exists(&branch)?;
    Ok(existing_or_new(branch, exists))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request<'a>(tag: &'a str) -> BranchRequest<'a> {
        BranchRequest {
            repo_url: "github.com/a/a",
            tag,
            cherry_pick_branch: None,
            release_branch_template: "",
        }
    }

    fn branches(list: &'static [&'static str]) -> impl FnMut(&str) -> Result<bool> {
        move |b| Ok(list.contains(&b))
    }

    #[test]
    fn test_minor_release_creates_branch_when_missing() {
        let target =
            resolve_branch(request("v1.2.0"), &TemplateVars::new(), branches(&[]))
                .unwrap();
        assert_eq!(
            target,
            ReleaseTarget {
                branch: "release-1.2".into(),
                plan: ReleasePlan::Create
            }
        );
    }

    #[test]
    fn test_minor_release_merges_into_existing_branch() {
        let target = resolve_branch(
            request("v1.2.0-rc.0"),
            &TemplateVars::new(),
            branches(&["release-1.2"]),
        )
        .unwrap();
        assert_eq!(target.branch, "release-1.2");
        assert_eq!(target.plan, ReleasePlan::MergeInto);
    }

    #[test]
    fn test_patch_release_prefers_patch_branch() {
        let target = resolve_branch(
            request("v1.2.3"),
            &TemplateVars::new(),
            branches(&["release-1.2", "release-1.2.3"]),
        )
        .unwrap();
        assert_eq!(target.branch, "release-1.2.3");
        assert_eq!(target.plan, ReleasePlan::Pinned);

        let target = resolve_branch(
            request("v1.2.3"),
            &TemplateVars::new(),
            branches(&["release-1.2"]),
        )
        .unwrap();
        assert_eq!(target.branch, "release-1.2");
    }

    #[test]
    fn test_patch_release_without_branch_fails() {
        let err = resolve_branch(
            request("v1.2.3"),
            &TemplateVars::new(),
            branches(&["master"]),
        )
        .unwrap_err();
        assert!(matches!(err, AutomatonError::MissingBranch { .. }));
    }

    #[test]
    fn test_patch_release_with_prerelease_fails() {
        let err = resolve_branch(
            request("v1.2.3-rc.0"),
            &TemplateVars::new(),
            branches(&["release-1.2"]),
        )
        .unwrap_err();
        assert!(matches!(err, AutomatonError::PatchPrerelease(_)));
    }

    #[test]
    fn test_template_is_used_verbatim() {
        let vars = TemplateVars::from([("TAG".to_string(), "v1.2.3".to_string())]);
        let req = BranchRequest {
            release_branch_template: "release-${TAG}",
            ..request("v1.2.3")
        };
        let target = resolve_branch(req, &vars, branches(&[])).unwrap();
        assert_eq!(target.branch, "release-v1.2.3");
        assert_eq!(target.plan, ReleasePlan::Create);

        let target =
            resolve_branch(req, &vars, branches(&["release-v1.2.3"])).unwrap();
        assert_eq!(target.plan, ReleasePlan::MergeInto);
    }

    #[test]
    fn test_cherry_pick_branch_must_exist() {
        let req = BranchRequest {
            cherry_pick_branch: Some("release-9.6"),
            ..request("9.6-v1")
        };
        let target =
            resolve_branch(req, &TemplateVars::new(), branches(&["release-9.6"]))
                .unwrap();
        assert_eq!(target.branch, "release-9.6");
        assert_eq!(target.plan, ReleasePlan::Pinned);

        let err =
            resolve_branch(req, &TemplateVars::new(), branches(&[])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "repo github.com/a/a is missing branch release-9.6 for tag 9.6-v1"
        );
    }
}
