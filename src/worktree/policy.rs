// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Which untracked files auto-commit may stage.
//!
//! Tracked modifications are always staged. Untracked files must pass, in
//! order: no blocked directory segment, no secret-like name, no dotfile
//! outside the safe set, and an allow-listed extension or basename.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::Serialize;
use tracing::error;

/// Directory segments whose contents are never staged.
pub const BLOCKED_SEGMENTS: &[&str] = &[
    ".git",
    "node_modules",
    "dist",
    "build",
    "target",
    ".next",
    "coverage",
    ".climpire-worktrees",
    ".turbo",
    ".cache",
    "__pycache__",
    ".venv",
    "venv",
    ".idea",
    ".vscode",
];

/// Dotfiles that are ordinary project configuration.
pub const SAFE_DOTFILES: &[&str] = &[
    ".gitignore",
    ".gitattributes",
    ".editorconfig",
    ".prettierrc",
    ".prettierignore",
    ".eslintrc",
    ".eslintrc.js",
    ".eslintrc.cjs",
    ".eslintrc.json",
    ".eslintignore",
    ".nvmrc",
    ".node-version",
    ".npmrc.example",
    ".dockerignore",
    ".babelrc",
    ".stylelintrc",
    ".rustfmt.toml",
];

const SECRET_PATTERNS: &[&str] = &[
    ".env",
    ".env.*",
    "*.env",
    "*secret*",
    "*credential*",
    "*password*",
    "*.pem",
    "*.key",
    "*.p12",
    "*.pfx",
    "*.keystore",
    "id_rsa*",
    "id_ed25519*",
    "id_ecdsa*",
    ".npmrc",
    ".pypirc",
    ".netrc",
];

const ALLOWED_PATTERNS: &[&str] = &[
    "*.ts", "*.tsx", "*.js", "*.jsx", "*.mjs", "*.cjs", "*.json", "*.md", "*.mdx", "*.css",
    "*.scss", "*.sass", "*.less", "*.html", "*.vue", "*.svelte", "*.py", "*.rs", "*.go",
    "*.java", "*.kt", "*.swift", "*.rb", "*.php", "*.c", "*.h", "*.cpp", "*.hpp", "*.cs",
    "*.sh", "*.yml", "*.yaml", "*.toml", "*.sql", "*.graphql", "*.proto", "*.svg", "*.png",
    "*.jpg", "*.jpeg", "*.gif", "*.webp", "*.ico", "*.txt", "*.csv", "*.xml", "*.ini",
    "Dockerfile", "Makefile", "Procfile", "LICENSE", "README", "CHANGELOG",
];

/// Why a path was or was not staged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PathVerdict {
    Allowed,
    BlockedDirectory,
    SecretLike,
    Dotfile,
    NotAllowListed,
}

impl PathVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, PathVerdict::Allowed)
    }
}

/// Compiled allow/block lists.
#[derive(Debug, Clone)]
pub struct UntrackedPolicy {
    secrets: GlobSet,
    allowed: GlobSet,
    /// Set when a pattern failed to compile; every untracked path is refused.
    deny_all: bool,
}

fn build_set(patterns: &[&str]) -> Result<GlobSet, globset::Error> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(
            GlobBuilder::new(pattern)
                .case_insensitive(true)
                .literal_separator(true)
                .build()?,
        );
    }
    builder.build()
}

impl UntrackedPolicy {
    /// Build a policy with extra allowed patterns on top of the defaults.
    pub fn with_extra_allowed(extra: &[&str]) -> Self {
        let mut allowed: Vec<&str> = ALLOWED_PATTERNS.to_vec();
        allowed.extend_from_slice(extra);
        match (build_set(SECRET_PATTERNS), build_set(&allowed)) {
            (Ok(secrets), Ok(allowed)) => Self {
                secrets,
                allowed,
                deny_all: false,
            },
            (Err(e), _) | (_, Err(e)) => {
                error!(error = %e, "untracked file policy failed to compile, refusing all untracked files");
                Self {
                    secrets: GlobSet::empty(),
                    allowed: GlobSet::empty(),
                    deny_all: true,
                }
            }
        }
    }

    /// Classify a repository-relative path.
    pub fn classify(&self, path: &str) -> PathVerdict {
        if self.deny_all {
            return PathVerdict::NotAllowListed;
        }
        let normalized = path.replace('\\', "/");
        let mut segments: Vec<&str> = normalized.split('/').filter(|s| !s.is_empty()).collect();
        let Some(basename) = segments.pop() else {
            return PathVerdict::NotAllowListed;
        };

        if segments.iter().any(|s| BLOCKED_SEGMENTS.contains(s)) {
            return PathVerdict::BlockedDirectory;
        }
        if self.secrets.is_match(basename) {
            return PathVerdict::SecretLike;
        }
        // A dot-directory anywhere in the path is treated like a dotfile.
        let hidden_dir = segments.iter().any(|s| s.starts_with('.') && *s != ".github");
        if hidden_dir || (basename.starts_with('.') && !SAFE_DOTFILES.contains(&basename)) {
            return PathVerdict::Dotfile;
        }
        if basename.starts_with('.') || self.allowed.is_match(basename) {
            return PathVerdict::Allowed;
        }
        PathVerdict::NotAllowListed
    }
}

impl Default for UntrackedPolicy {
    fn default() -> Self {
        Self::with_extra_allowed(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_files_allowed() {
        let policy = UntrackedPolicy::default();
        assert_eq!(policy.classify("src/new-feature.ts"), PathVerdict::Allowed);
        assert_eq!(policy.classify("docs/README.md"), PathVerdict::Allowed);
        assert_eq!(policy.classify("Dockerfile"), PathVerdict::Allowed);
        assert_eq!(policy.classify(".gitignore"), PathVerdict::Allowed);
        assert_eq!(policy.classify(".github/workflows/ci.yml"), PathVerdict::Allowed);
    }

    #[test]
    fn test_secrets_blocked() {
        let policy = UntrackedPolicy::default();
        assert_eq!(policy.classify(".env"), PathVerdict::SecretLike);
        assert_eq!(policy.classify("config/.env.production"), PathVerdict::SecretLike);
        assert_eq!(policy.classify("certs/server.PEM"), PathVerdict::SecretLike);
        assert_eq!(policy.classify("aws_credentials.json"), PathVerdict::SecretLike);
        assert_eq!(policy.classify("id_rsa"), PathVerdict::SecretLike);
    }

    #[test]
    fn test_blocked_directories_and_dotfiles() {
        let policy = UntrackedPolicy::default();
        assert_eq!(policy.classify("node_modules/x/index.js"), PathVerdict::BlockedDirectory);
        assert_eq!(policy.classify("app/dist/bundle.js"), PathVerdict::BlockedDirectory);
        assert_eq!(policy.classify(".climpire-worktrees/abc/x.ts"), PathVerdict::BlockedDirectory);
        assert_eq!(policy.classify(".bash_history"), PathVerdict::Dotfile);
        assert_eq!(policy.classify(".aws/config.yml"), PathVerdict::Dotfile);
    }

    #[test]
    fn test_unknown_extensions_not_staged() {
        let policy = UntrackedPolicy::default();
        assert_eq!(policy.classify("dump.sqlite"), PathVerdict::NotAllowListed);
        assert_eq!(policy.classify("core"), PathVerdict::NotAllowListed);

        let extended = UntrackedPolicy::with_extra_allowed(&["*.sqlite"]);
        assert!(extended.classify("dump.sqlite").is_allowed());
    }
}
