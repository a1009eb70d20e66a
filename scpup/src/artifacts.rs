//! Artifact rules: which local files go where below the upload base.
//!
//! A rule is `SOURCE[=>TARGET]`. SOURCE is a file, a directory (uploaded
//! recursively) or a glob; TARGET is a directory relative to the base path.

use anyhow::{Context, Result, anyhow};
use async_recursion::async_recursion;
use remote::protocol::FileMapping;

const RULE_SEPARATOR: &str = "=>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRule {
    pub source: String,
    /// slash-separated, no leading or trailing slash; empty is the base directory
    pub target: String,
}

impl std::str::FromStr for ArtifactRule {
    type Err = anyhow::Error;

    fn from_str(rule: &str) -> Result<Self> {
        let (source, target) = rule.split_once(RULE_SEPARATOR).unwrap_or((rule, ""));
        let source = source.trim();
        if source.is_empty() {
            return Err(anyhow!("artifact rule {:?} has no source", rule));
        }
        let target = target.trim().replace('\\', "/");
        Ok(Self {
            source: source.to_string(),
            target: target.trim_matches('/').to_string(),
        })
    }
}

/// Files collected for one rule, labeled for reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactGroup {
    pub label: String,
    pub mappings: Vec<FileMapping>,
}

fn is_glob(source: &str) -> bool {
    source.contains(['*', '?', '[', '{'])
}

fn join_remote(target: &str, relative: &str) -> String {
    if target.is_empty() {
        relative.to_string()
    } else {
        format!("{target}/{relative}")
    }
}

fn relative_str(path: &std::path::Path, base: &std::path::Path) -> Result<String> {
    let relative = path
        .strip_prefix(base)
        .with_context(|| format!("{path:?} is not below {base:?}"))?;
    let mut parts = Vec::new();
    for component in relative.components() {
        let part = component
            .as_os_str()
            .to_str()
            .with_context(|| format!("path {path:?} is not valid UTF-8"))?;
        parts.push(part);
    }
    Ok(parts.join("/"))
}

/// Every regular file below `dir`, following symlinks to files only.
#[async_recursion]
async fn walk(dir: &std::path::Path, files: &mut Vec<std::path::PathBuf>) -> Result<()> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("cannot read directory {dir:?}"))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("failed traversing directory {dir:?}"))?
    {
        let path = entry.path();
        let file_type = entry
            .file_type()
            .await
            .with_context(|| format!("failed reading file type of {path:?}"))?;
        if file_type.is_dir() {
            walk(&path, files).await?;
        } else if file_type.is_file() {
            files.push(path);
        } else if file_type.is_symlink() {
            match tokio::fs::metadata(&path).await {
                Ok(metadata) if metadata.is_file() => files.push(path),
                Ok(_) => tracing::debug!("skipping symlink {:?}, not a file", path),
                Err(error) => tracing::warn!("skipping dangling symlink {:?}: {}", path, error),
            }
        }
    }
    Ok(())
}

/// Directory part of a glob that contains no wildcard.
fn literal_prefix(pattern: &str) -> std::path::PathBuf {
    let mut prefix = std::path::PathBuf::new();
    let mut parts = pattern.split('/').peekable();
    while let Some(part) = parts.next() {
        // the last part names files, never a directory to walk from
        if is_glob(part) || parts.peek().is_none() {
            break;
        }
        if part.is_empty() && prefix.as_os_str().is_empty() {
            prefix.push("/");
        } else {
            prefix.push(part);
        }
    }
    prefix
}

async fn collect_glob(rule: &ArtifactRule) -> Result<Vec<FileMapping>> {
    let pattern = rule.source.replace('\\', "/");
    let matcher = globset::GlobBuilder::new(&pattern)
        .literal_separator(true)
        .build()
        .with_context(|| format!("invalid glob pattern: {}", rule.source))?
        .compile_matcher();
    let prefix = literal_prefix(&pattern);
    let root = if prefix.as_os_str().is_empty() {
        std::path::PathBuf::from(".")
    } else {
        prefix.clone()
    };
    if !tokio::fs::metadata(&root).await.is_ok_and(|m| m.is_dir()) {
        tracing::debug!(
            "glob {:?}: {:?} is not a directory, nothing matches",
            pattern,
            root
        );
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    walk(&root, &mut files).await?;
    let mut mappings = Vec::new();
    for file in files {
        let relative = relative_str(&file, &root)?;
        // match against the path as it is spelled in the pattern
        let candidate = if prefix.as_os_str().is_empty() {
            relative.clone()
        } else {
            file.to_string_lossy().to_string()
        };
        if matcher.is_match(&candidate) {
            mappings.push(FileMapping::new(file, join_remote(&rule.target, &relative)));
        }
    }
    Ok(mappings)
}

/// Enumerates the files of one rule.
///
/// A glob that matches nothing gives an empty group; a missing literal
/// source is an error.
pub async fn collect(rule: &ArtifactRule) -> Result<ArtifactGroup> {
    let mut mappings = if is_glob(&rule.source) {
        collect_glob(rule).await?
    } else {
        let source = std::path::PathBuf::from(&rule.source);
        let metadata = tokio::fs::metadata(&source)
            .await
            .with_context(|| format!("artifact source {:?} does not exist", rule.source))?;
        if metadata.is_dir() {
            let mut files = Vec::new();
            walk(&source, &mut files).await?;
            let mut mappings = Vec::with_capacity(files.len());
            for file in files {
                let relative = relative_str(&file, &source)?;
                mappings.push(FileMapping::new(file, join_remote(&rule.target, &relative)));
            }
            mappings
        } else {
            let name = source
                .file_name()
                .and_then(|name| name.to_str())
                .with_context(|| format!("artifact source {:?} has no file name", rule.source))?
                .to_string();
            vec![FileMapping::new(source, join_remote(&rule.target, &name))]
        }
    };
    mappings.sort_by(|a, b| a.remote.cmp(&b.remote));
    tracing::debug!("rule {:?} matched {} files", rule.source, mappings.len());
    Ok(ArtifactGroup {
        label: rule.source.clone(),
        mappings,
    })
}

pub async fn collect_all(rules: &[ArtifactRule]) -> Result<Vec<ArtifactGroup>> {
    let mut groups = Vec::with_capacity(rules.len());
    for rule in rules {
        groups.push(collect(rule).await?);
    }
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remotes(group: &ArtifactGroup) -> Vec<&str> {
        group.mappings.iter().map(|m| m.remote.as_str()).collect()
    }

    async fn setup() -> tempfile::TempDir {
        // dist
        // |- index.html
        // |- app.js
        // |- assets
        //    |- logo.png
        //    |- css
        //       |- site.css
        let tmp = tempfile::tempdir().unwrap();
        let dist = tmp.path().join("dist");
        tokio::fs::create_dir_all(dist.join("assets/css")).await.unwrap();
        tokio::fs::write(dist.join("index.html"), "<html/>").await.unwrap();
        tokio::fs::write(dist.join("app.js"), "main()").await.unwrap();
        tokio::fs::write(dist.join("assets/logo.png"), [0u8, 1, 2]).await.unwrap();
        tokio::fs::write(dist.join("assets/css/site.css"), "body{}").await.unwrap();
        tmp
    }

    #[test]
    fn parse_rules() {
        let rule: ArtifactRule = "dist/**/*.js => web\\static/".parse().unwrap();
        assert_eq!(rule.source, "dist/**/*.js");
        assert_eq!(rule.target, "web/static");
        let rule: ArtifactRule = "build.log".parse().unwrap();
        assert_eq!(rule.target, "");
        assert!("=>x".parse::<ArtifactRule>().is_err());
    }

    #[test]
    fn literal_prefix_stops_at_wildcard() {
        assert_eq!(literal_prefix("dist/**/*.js"), std::path::PathBuf::from("dist"));
        assert_eq!(literal_prefix("*.txt"), std::path::PathBuf::new());
        assert_eq!(literal_prefix("/a/b/c*"), std::path::PathBuf::from("/a/b"));
        assert_eq!(literal_prefix("a/b/file.txt"), std::path::PathBuf::from("a/b"));
    }

    #[tokio::test]
    async fn single_file_goes_into_target() {
        let tmp = setup().await;
        let source = tmp.path().join("dist/app.js");
        let rule = ArtifactRule {
            source: source.to_string_lossy().to_string(),
            target: "js".to_string(),
        };
        let group = collect(&rule).await.unwrap();
        assert_eq!(group.label, rule.source);
        assert_eq!(group.mappings, vec![FileMapping::new(source, "js/app.js")]);
    }

    #[tokio::test]
    async fn directory_is_uploaded_recursively() {
        let tmp = setup().await;
        let rule = ArtifactRule {
            source: tmp.path().join("dist").to_string_lossy().to_string(),
            target: String::new(),
        };
        let group = collect(&rule).await.unwrap();
        assert_eq!(
            remotes(&group),
            vec!["app.js", "assets/css/site.css", "assets/logo.png", "index.html"]
        );
    }

    #[tokio::test]
    async fn glob_is_relative_to_literal_prefix() {
        let tmp = setup().await;
        let rule = ArtifactRule {
            source: format!("{}/dist/**/*.css", tmp.path().display()),
            target: "static".to_string(),
        };
        let group = collect(&rule).await.unwrap();
        assert_eq!(remotes(&group), vec!["static/assets/css/site.css"]);
        let rule = ArtifactRule {
            source: format!("{}/dist/*", tmp.path().display()),
            target: String::new(),
        };
        let group = collect(&rule).await.unwrap();
        // `*` does not cross directories
        assert_eq!(remotes(&group), vec!["app.js", "index.html"]);
    }

    #[tokio::test]
    async fn glob_without_matches_is_empty_group() {
        let tmp = setup().await;
        let rule = ArtifactRule {
            source: format!("{}/dist/*.exe", tmp.path().display()),
            target: String::new(),
        };
        let group = collect(&rule).await.unwrap();
        assert!(group.mappings.is_empty());
        let rule = ArtifactRule {
            source: format!("{}/missing/*.exe", tmp.path().display()),
            target: String::new(),
        };
        assert!(collect(&rule).await.unwrap().mappings.is_empty());
    }

    #[tokio::test]
    async fn missing_literal_source_is_error() {
        let tmp = setup().await;
        let rule = ArtifactRule {
            source: tmp.path().join("nope.txt").to_string_lossy().to_string(),
            target: String::new(),
        };
        let error = collect(&rule).await.unwrap_err();
        assert!(format!("{error:#}").contains("does not exist"));
    }

    #[tokio::test]
    async fn collect_all_keeps_rule_order() {
        let tmp = setup().await;
        let rules = vec![
            ArtifactRule {
                source: tmp.path().join("dist/index.html").to_string_lossy().to_string(),
                target: String::new(),
            },
            ArtifactRule {
                source: format!("{}/dist/*.js", tmp.path().display()),
                target: String::new(),
            },
        ];
        let groups = collect_all(&rules).await.unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(remotes(&groups[0]), vec!["index.html"]);
        assert_eq!(remotes(&groups[1]), vec!["app.js"]);
    }
}
