//! go.mod maintenance across sibling repositories of one release.
//!
//! Repositories tagged earlier in a run publish their module path through a
//! `/go` reply. Repositories prepared later rewrite their `go.mod` so that
//! `require`/`replace` directives point at the versions just minted.
use async_trait::async_trait;
use log::*;
use regex::Regex;
use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
    sync::LazyLock,
};
use url::Url;

use crate::{AutomatonError, Result};

pub const GO_MOD: &str = "go.mod";

static META_TAG_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<meta\s[^>]*>").expect("meta tag regex is valid")
});

static GO_IMPORT_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)name\s*=\s*["']go-import["']"#)
        .expect("go-import name regex is valid")
});

static CONTENT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)content\s*=\s*["']([^"']*)["']"#)
        .expect("content regex is valid")
});

/// Where a Go module lives during this run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GoImport {
    /// Repository the module was cloned from.
    pub repo_root: String,
    /// Canonical repository announced by the module's go-import tag, when
    /// it differs from `repo_root` (a fork).
    pub vcs_root: Option<String>,
}

/// module path -> import location
pub type ModCache = BTreeMap<String, GoImport>;

/// Discovers the repository behind a Go module path.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VcsRootResolver: Send + Sync {
    async fn detect_vcs_root(&self, module_path: &str) -> Result<String>;
}

/// Resolves module paths through the `?go-get=1` go-import meta tag.
pub struct GoImportResolver {
    client: reqwest::Client,
}

impl GoImportResolver {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for GoImportResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VcsRootResolver for GoImportResolver {
    async fn detect_vcs_root(&self, module_path: &str) -> Result<String> {
        let raw = if module_path.contains("://") {
            module_path.to_string()
        } else {
            format!("https://{module_path}")
        };
        let mut url = Url::parse(&raw)?;
        url.query_pairs_mut().append_pair("go-get", "1");

        debug!("fetching go-import meta tag: {url}");
        let html = self
            .client
            .get(url.clone())
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        parse_go_import(url.as_str(), &html)
    }
}

/// Extract the repository root (`host/path`, no scheme or extension) from
/// a go-get page.
pub fn parse_go_import(source: &str, html: &str) -> Result<String> {
    let content = META_TAG_REGEX
        .find_iter(html)
        .map(|m| m.as_str())
        .filter(|tag| GO_IMPORT_NAME_REGEX.is_match(tag))
        .find_map(|tag| CONTENT_REGEX.captures(tag))
        .map(|caps| caps[1].to_string())
        .ok_or_else(|| {
            AutomatonError::GoModError(format!(
                "{source} is missing go-import meta tag"
            ))
        })?;

    info!("go-import: {content}");

    // e.g. "stash.appscode.dev/cli git https://github.com/stashed/cli"
    let fields = content.split_whitespace().collect::<Vec<_>>();
    let [_, _, vcs] = fields.as_slice() else {
        return Err(AutomatonError::GoModError(format!(
            "{source} contains badly formatted go-import meta tag {content}"
        )));
    };

    let vcs_url = Url::parse(vcs)?;
    let host = vcs_url.host_str().unwrap_or_default();
    let root = format!("{host}{}", vcs_url.path().trim_end_matches('/'));

    Ok(trim_extension(&root).to_string())
}

fn trim_extension(path: &str) -> &str {
    let last = path.rsplit('/').next().unwrap_or(path);
    match last.rfind('.') {
        Some(idx) => &path[..path.len() - (last.len() - idx)],
        None => path,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Require,
    Replace,
}

impl Verb {
    fn keyword(&self) -> &'static str {
        match self {
            Verb::Require => "require",
            Verb::Replace => "replace",
        }
    }
}

/// A single `require` or `replace` entry and where it sits in the file.
#[derive(Debug, Clone)]
struct Entry {
    line: usize,
    verb: Verb,
    in_block: bool,
    fields: Vec<String>,
    comment: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Require {
    pub path: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replace {
    pub old_path: String,
    pub old_version: String,
    pub new_path: String,
    pub new_version: String,
}

impl Replace {
    fn render(&self) -> String {
        let old = join_path_version(&self.old_path, &self.old_version);
        let new = join_path_version(&self.new_path, &self.new_version);
        format!("{old} => {new}")
    }
}

fn join_path_version(path: &str, version: &str) -> String {
    if version.is_empty() {
        path.to_string()
    } else {
        format!("{path} {version}")
    }
}

/// Line preserving go.mod editor.
#[derive(Debug, Clone)]
pub struct GoModFile {
    lines: Vec<String>,
    trailing_newline: bool,
}

impl GoModFile {
    pub fn parse(content: &str) -> Self {
        Self {
            lines: content.lines().map(String::from).collect(),
            trailing_newline: content.ends_with('\n'),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::parse(&std::fs::read_to_string(path)?))
    }

    pub fn format(&self) -> String {
        let mut out = self.lines.join("\n");
        if self.trailing_newline {
            out.push('\n');
        }
        out
    }

    pub fn module_path(&self) -> Option<String> {
        self.lines.iter().find_map(|line| {
            let (body, _) = split_comment(line);
            let rest = body.trim().strip_prefix("module")?;
            if !rest.starts_with(char::is_whitespace) {
                return None;
            }
            Some(rest.trim().trim_matches('"').to_string())
        })
    }

    pub fn requires(&self) -> Vec<Require> {
        self.entries()
            .into_iter()
            .filter(|e| e.verb == Verb::Require)
            .filter_map(|e| match e.fields.as_slice() {
                [path, version] => Some(Require {
                    path: path.clone(),
                    version: version.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    pub fn replaces(&self) -> Vec<Replace> {
        self.entries()
            .into_iter()
            .filter(|e| e.verb == Verb::Replace)
            .filter_map(|e| parse_replace(&e.fields))
            .collect()
    }

    /// Update the version of an existing require.
    pub fn set_require(&mut self, path: &str, version: &str) -> Result<()> {
        let entry = self
            .entries()
            .into_iter()
            .find(|e| {
                e.verb == Verb::Require
                    && e.fields.first().map(String::as_str) == Some(path)
            })
            .ok_or_else(|| {
                AutomatonError::GoModError(format!(
                    "no require directive for {path}"
                ))
            })?;

        self.rewrite(&entry, &format!("{path} {version}"));
        Ok(())
    }

    pub fn drop_replace(&mut self, old_path: &str, old_version: &str) {
        if let Some(entry) = self.find_replace(old_path, old_version) {
            self.lines.remove(entry.line);
        }
    }

    /// Add a replace directive, or retarget the one already present for
    /// `old_path`/`old_version`.
    pub fn add_replace(
        &mut self,
        old_path: &str,
        old_version: &str,
        new_path: &str,
        new_version: &str,
    ) {
        let replace = Replace {
            old_path: old_path.to_string(),
            old_version: old_version.to_string(),
            new_path: new_path.to_string(),
            new_version: new_version.to_string(),
        };

        if let Some(entry) = self.find_replace(old_path, old_version) {
            self.rewrite(&entry, &replace.render());
            return;
        }

        if let Some(close) = self.block_end(Verb::Replace) {
            self.lines.insert(close, format!("\t{}", replace.render()));
            return;
        }

        if self.lines.last().is_some_and(|l| !l.trim().is_empty()) {
            self.lines.push(String::new());
        }
        self.lines.push(format!("replace {}", replace.render()));
        self.trailing_newline = true;
    }

    fn find_replace(&self, old_path: &str, old_version: &str) -> Option<Entry> {
        self.entries().into_iter().find(|e| {
            e.verb == Verb::Replace
                && parse_replace(&e.fields).is_some_and(|r| {
                    r.old_path == old_path && r.old_version == old_version
                })
        })
    }

    /// Index of the closing parenthesis of the last block for `verb`.
    fn block_end(&self, verb: Verb) -> Option<usize> {
        let mut open = false;
        let mut end = None;
        for (idx, line) in self.lines.iter().enumerate() {
            let (body, _) = split_comment(line);
            let body = body.trim();
            if open {
                if body == ")" {
                    open = false;
                    end = Some(idx);
                }
            } else if is_block_start(body, verb) {
                open = true;
            }
        }
        end
    }

    fn rewrite(&mut self, entry: &Entry, body: &str) {
        let prefix = if entry.in_block {
            "\t".to_string()
        } else {
            format!("{} ", entry.verb.keyword())
        };
        self.lines[entry.line] = format!("{prefix}{body}{}", entry.comment);
    }

    fn entries(&self) -> Vec<Entry> {
        let mut entries = vec![];
        let mut block: Option<Verb> = None;

        for (idx, line) in self.lines.iter().enumerate() {
            let (body, comment) = split_comment(line);
            let body = body.trim();

            if let Some(verb) = block {
                if body == ")" {
                    block = None;
                    continue;
                }
                if body.is_empty() {
                    continue;
                }
                entries.push(Entry {
                    line: idx,
                    verb,
                    in_block: true,
                    fields: body.split_whitespace().map(String::from).collect(),
                    comment: comment.to_string(),
                });
                continue;
            }

            for verb in [Verb::Require, Verb::Replace] {
                if is_block_start(body, verb) {
                    block = Some(verb);
                    break;
                }
                let Some(rest) = body.strip_prefix(verb.keyword()) else {
                    continue;
                };
                if !rest.starts_with(char::is_whitespace) {
                    continue;
                }
                entries.push(Entry {
                    line: idx,
                    verb,
                    in_block: false,
                    fields: rest.split_whitespace().map(String::from).collect(),
                    comment: comment.to_string(),
                });
                break;
            }
        }

        entries
    }
}

fn is_block_start(body: &str, verb: Verb) -> bool {
    body.strip_prefix(verb.keyword())
        .is_some_and(|rest| rest.trim() == "(")
}

/// Split a line into its directive body and trailing ` // comment`.
fn split_comment(line: &str) -> (&str, &str) {
    match line.find("//") {
        Some(idx) => {
            let body = line[..idx].trim_end();
            (body, &line[body.len()..])
        }
        None => (line, ""),
    }
}

fn parse_replace(fields: &[String]) -> Option<Replace> {
    let arrow = fields.iter().position(|f| f == "=>")?;
    let (old, new) = (&fields[..arrow], &fields[arrow + 1..]);
    let field = |list: &[String], idx: usize| {
        list.get(idx).cloned().unwrap_or_default()
    };
    if old.is_empty() || new.is_empty() || old.len() > 2 || new.len() > 2 {
        return None;
    }
    Some(Replace {
        old_path: field(old, 0),
        old_version: field(old, 1),
        new_path: field(new, 0),
        new_version: field(new, 1),
    })
}

/// Module path of the go.mod in `dir`, unless absent or already cached.
pub fn detect_go_mod(dir: &Path, mod_cache: &ModCache) -> Result<Option<String>> {
    let path = dir.join(GO_MOD);
    if !path.exists() {
        return Ok(None);
    }

    let gomod = GoModFile::load(&path)?;
    let module = gomod.module_path().ok_or_else(|| {
        AutomatonError::GoModError(format!(
            "{} has no module directive",
            path.display()
        ))
    })?;

    if mod_cache.contains_key(&module) {
        return Ok(None);
    }
    Ok(Some(module))
}

/// Point `require`/`replace` directives of the go.mod in `dir` at the
/// versions tagged earlier in this run. Returns true if the file changed.
pub fn update_go_mod(
    dir: &Path,
    mod_cache: &ModCache,
    repo_versions: &HashMap<String, String>,
) -> Result<bool> {
    let path = dir.join(GO_MOD);
    if !path.exists() {
        return Ok(false);
    }

    let original = std::fs::read_to_string(&path)?;
    let mut gomod = GoModFile::parse(&original);

    // forked modules are rewired through replace directives
    for replace in gomod.replaces() {
        let Some(import) = mod_cache.get(&replace.old_path) else {
            continue;
        };
        if import.vcs_root.is_none() {
            continue;
        }
        gomod.drop_replace(&replace.old_path, &replace.old_version);
        if let Some(version) = repo_versions.get(&import.repo_root) {
            gomod.add_replace(
                &replace.old_path,
                &replace.old_version,
                &import.repo_root,
                version,
            );
        }
    }

    for require in gomod.requires() {
        let Some(import) = mod_cache.get(&require.path) else {
            continue;
        };
        let Some(version) = repo_versions.get(&import.repo_root) else {
            continue;
        };
        if import.vcs_root.is_some() {
            gomod.add_replace(&require.path, "", &import.repo_root, version);
        } else {
            gomod.set_require(&require.path, version)?;
        }
    }

    let updated = gomod.format();
    if updated == original {
        return Ok(false);
    }

    info!("updating {}", path.display());
    std::fs::write(&path, updated)?;
    Ok(true)
}
