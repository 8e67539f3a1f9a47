//! `list-versions` command.
use crate::{
    Result, manifest::Release, manifest::load_manifest, version::sort_versions,
};

/// Print every distinct single-tag version of the manifest, newest first.
pub async fn execute(release_file: &str) -> Result<Vec<String>> {
    let release = load_manifest(release_file).await?;
    let versions = descending_versions(&release)?;
    for version in versions.iter() {
        println!("{version}");
    }
    Ok(versions)
}

pub fn descending_versions(release: &Release) -> Result<Vec<String>> {
    let mut versions = sort_versions(&release.project_tags())?;
    versions.reverse();
    Ok(versions)
}
