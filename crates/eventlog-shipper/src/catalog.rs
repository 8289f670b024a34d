// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Metadata catalog: id to name dictionaries loaded from the metadata file
//! that sits next to the rotated log files.
//!
//! Each relevant line of the metadata file starts with a record type tag
//! (`{1,` to `{6,`) and ends with the numeric id the log records refer to:
//!
//! ```text
//! {1,3ee0bd4d-5ec4-4c1e-a8b4-4ab3cde0c5a3,"alice",7},
//! {2,"ws-01",1},
//! {3,"1CV8C",3},
//! {4,"_$Data$_.Update",2},
//! {5,9e5cfa1e-7c5d-4b55-9a8b-6bdaf6a1ea0e,"Document.Invoice",5},
//! {6,"srv-app",1},
//! ```
//!
//! Other record types are ignored. The catalog is rebuilt from scratch on
//! every load; there is no incremental merge.

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, error};

use crate::errors::CatalogError;

/// The six dictionaries of the metadata file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CatalogKind {
    Users,
    Computers,
    Applications,
    Events,
    MetaObjects,
    Servers,
}

impl CatalogKind {
    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "{1," => Some(CatalogKind::Users),
            "{2," => Some(CatalogKind::Computers),
            "{3," => Some(CatalogKind::Applications),
            "{4," => Some(CatalogKind::Events),
            "{5," => Some(CatalogKind::MetaObjects),
            "{6," => Some(CatalogKind::Servers),
            _ => None,
        }
    }

    fn tag_number(self) -> u8 {
        match self {
            CatalogKind::Users => 1,
            CatalogKind::Computers => 2,
            CatalogKind::Applications => 3,
            CatalogKind::Events => 4,
            CatalogKind::MetaObjects => 5,
            CatalogKind::Servers => 6,
        }
    }

    fn pattern(self) -> &'static Regex {
        static PATTERNS: OnceLock<[Regex; 6]> = OnceLock::new();
        #[allow(clippy::expect_used)]
        let patterns = PATTERNS.get_or_init(|| {
            [
                r#"^\{1,[a-z0-9-]+,"(.*)",(\d+)\}"#,
                r#"^\{2,"?(.*?)"?,(\d+)\}"#,
                r#"^\{3,"(.*)",(\d+)\}"#,
                r#"^\{4,"(.*)",(\d+)\}"#,
                r#"^\{5,[a-z0-9-]+,"(.*)",(\d+)"#,
                r#"^\{6,"(.*)",(\d+)\}"#,
            ]
            .map(|p| Regex::new(p).expect("static catalog pattern must compile"))
        });
        &patterns[usize::from(self.tag_number() - 1)]
    }
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    users: HashMap<i64, String>,
    computers: HashMap<i64, String>,
    applications: HashMap<i64, String>,
    events: HashMap<i64, String>,
    meta_objects: HashMap<i64, String>,
    servers: HashMap<i64, String>,
}

impl Catalog {
    /// Reads and parses the metadata file at `path`.
    pub async fn load(path: &Path) -> Result<Self, CatalogError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| CatalogError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let catalog = Self::parse(&String::from_utf8_lossy(&bytes))?;
        debug!(
            users = catalog.users.len(),
            computers = catalog.computers.len(),
            applications = catalog.applications.len(),
            events = catalog.events.len(),
            meta_objects = catalog.meta_objects.len(),
            servers = catalog.servers.len(),
            "CATALOG | Loaded {}",
            path.display()
        );
        Ok(catalog)
    }

    /// Parses metadata file contents. Lines that carry a known tag but do not
    /// match its layout are logged and skipped; an id that does not fit into
    /// an i64 fails the whole load.
    pub fn parse(contents: &str) -> Result<Self, CatalogError> {
        let mut catalog = Catalog::default();

        for line in contents.lines() {
            let Some(kind) = line.get(..3).and_then(CatalogKind::from_tag) else {
                continue;
            };

            let Some(captures) = kind.pattern().captures(line) else {
                error!("CATALOG | {} metadata line does not match: {line}", kind.tag_number());
                continue;
            };

            let raw_id = &captures[2];
            let id = raw_id
                .parse::<i64>()
                .map_err(|_| CatalogError::InvalidId {
                    kind: kind.tag_number(),
                    raw: raw_id.to_string(),
                })?;

            let name = captures[1].replace("\"\"", "\"");
            catalog.dictionary_mut(kind).insert(id, name);
        }

        Ok(catalog)
    }

    /// Name registered for `id`, or the id itself when unknown.
    pub fn resolve(&self, kind: CatalogKind, id: i64) -> String {
        self.dictionary(kind)
            .get(&id)
            .cloned()
            .unwrap_or_else(|| id.to_string())
    }

    pub fn len(&self, kind: CatalogKind) -> usize {
        self.dictionary(kind).len()
    }

    fn dictionary(&self, kind: CatalogKind) -> &HashMap<i64, String> {
        match kind {
            CatalogKind::Users => &self.users,
            CatalogKind::Computers => &self.computers,
            CatalogKind::Applications => &self.applications,
            CatalogKind::Events => &self.events,
            CatalogKind::MetaObjects => &self.meta_objects,
            CatalogKind::Servers => &self.servers,
        }
    }

    fn dictionary_mut(&mut self, kind: CatalogKind) -> &mut HashMap<i64, String> {
        match kind {
            CatalogKind::Users => &mut self.users,
            CatalogKind::Computers => &mut self.computers,
            CatalogKind::Applications => &mut self.applications,
            CatalogKind::Events => &mut self.events,
            CatalogKind::MetaObjects => &mut self.meta_objects,
            CatalogKind::Servers => &mut self.servers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const METADATA: &str = r#"1CV8LOG(ver 2.0)
3ee0bd4d-5ec4-4c1e-a8b4-4ab3cde0c5a3

{1,3ee0bd4d-5ec4-4c1e-a8b4-4ab3cde0c5a3,"alice",7},
{1,8a6e1a0c-43d1-4b86-bc55-9f0e3c8d1f00,"",8},
{2,"ws-01",1},
{3,"1CV8C",3},
{4,"_$Data$_.Update",2},
{5,9e5cfa1e-7c5d-4b55-9a8b-6bdaf6a1ea0e,"Document.Invoice",5},
{6,"srv-app",1},
{7,"1541",1},
{8,"bad line"},
"#;

    #[test]
    fn test_parse_all_kinds() {
        let catalog = Catalog::parse(METADATA).unwrap();
        assert_eq!(catalog.resolve(CatalogKind::Users, 7), "alice");
        assert_eq!(catalog.resolve(CatalogKind::Users, 8), "");
        assert_eq!(catalog.resolve(CatalogKind::Computers, 1), "ws-01");
        assert_eq!(catalog.resolve(CatalogKind::Applications, 3), "1CV8C");
        assert_eq!(catalog.resolve(CatalogKind::Events, 2), "_$Data$_.Update");
        assert_eq!(catalog.resolve(CatalogKind::MetaObjects, 5), "Document.Invoice");
        assert_eq!(catalog.resolve(CatalogKind::Servers, 1), "srv-app");
    }

    #[test]
    fn test_unknown_id_falls_back_to_numeral() {
        let catalog = Catalog::parse(METADATA).unwrap();
        assert_eq!(catalog.resolve(CatalogKind::Users, 42), "42");
        assert_eq!(Catalog::default().resolve(CatalogKind::Servers, 0), "0");
    }

    #[test]
    fn test_dictionaries_are_independent() {
        let catalog = Catalog::parse("{3,\"Designer\",1},\n{6,\"srv\",1},\n").unwrap();
        assert_eq!(catalog.resolve(CatalogKind::Applications, 1), "Designer");
        assert_eq!(catalog.resolve(CatalogKind::Servers, 1), "srv");
        assert_eq!(catalog.resolve(CatalogKind::Users, 1), "1");
    }

    #[test]
    fn test_doubled_quotes_are_unescaped() {
        let catalog =
            Catalog::parse("{3,\"Ext \"\"A\"\"\",3},\n{1,abc-1,\"O\"\"Brien\",7},\n").unwrap();
        assert_eq!(catalog.resolve(CatalogKind::Applications, 3), "Ext \"A\"");
        assert_eq!(catalog.resolve(CatalogKind::Users, 7), "O\"Brien");
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_malformed_line_is_skipped() {
        let catalog = Catalog::parse("{3,no quotes here},\n{4,\"ok\",9},\n").unwrap();
        assert_eq!(catalog.len(CatalogKind::Applications), 0);
        assert_eq!(catalog.resolve(CatalogKind::Events, 9), "ok");
        assert!(logs_contain("3 metadata line does not match"));
    }

    #[test]
    fn test_id_overflow_is_an_error() {
        let result = Catalog::parse("{6,\"srv\",99999999999999999999}\n");
        match result {
            Err(CatalogError::InvalidId { kind, raw }) => {
                assert_eq!(kind, 6);
                assert_eq!(raw, "99999999999999999999");
            }
            other => panic!("expected InvalidId, got {other:?}"),
        }
    }

    #[test]
    fn test_short_lines_are_ignored() {
        let catalog = Catalog::parse("{\n}\n\n{1\n").unwrap();
        assert_eq!(catalog.len(CatalogKind::Users), 0);
    }

    #[tokio::test]
    async fn test_load_replaces_wholesale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1Cv8.lgf");

        std::fs::write(&path, "{1,abc-1,\"alice\",7},\n").unwrap();
        let first = Catalog::load(&path).await.unwrap();
        assert_eq!(first.resolve(CatalogKind::Users, 7), "alice");

        std::fs::write(&path, "{1,abc-1,\"bob\",8},\n").unwrap();
        let second = Catalog::load(&path).await.unwrap();
        assert_eq!(second.resolve(CatalogKind::Users, 7), "7");
        assert_eq!(second.resolve(CatalogKind::Users, 8), "bob");
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = Catalog::load(&dir.path().join("1Cv8.lgf")).await;
        assert!(matches!(result, Err(CatalogError::Io { .. })));
    }
}
