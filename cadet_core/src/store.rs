use crate::graph::{GraphInput, ReferenceGraph};
use crate::models::{EntityKeys, Table, Version, key_string};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

pub type Records = BTreeMap<String, Value>;

/// A consistent read of a set of tables, all taken at `version`.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub version: Version,
    pub tables: BTreeMap<Table, Records>,
}

/// In-memory source of truth: every entity table plus the version counter.
///
/// Records are replaced on write and never deleted. The store is not
/// synchronized itself; `Broker` owns it behind a single lock.
#[derive(Debug)]
pub struct VersionedStore {
    version: Version,
    tables: BTreeMap<Table, Records>,
    // (table, alias) -> primary id
    aliases: HashMap<(Table, String), String>,
    // (table, primary id) -> current alias
    alias_of: HashMap<(Table, String), String>,
    graphs: Vec<ReferenceGraph>,
    graph_version: u64,
    graphs_built_at: Option<DateTime<Utc>>,
}

impl Default for VersionedStore {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionedStore {
    pub fn new() -> Self {
        Self {
            version: Version::INITIAL,
            tables: BTreeMap::new(),
            aliases: HashMap::new(),
            alias_of: HashMap::new(),
            graphs: Vec::new(),
            graph_version: 0,
            graphs_built_at: None,
        }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Insert or replace `record` under its id (and alias), returning the new version.
    #[tracing::instrument(level = "trace", skip(self, record))]
    pub fn apply(&mut self, table: Table, keys: &EntityKeys, record: Value) -> Version {
        self.tables
            .entry(table)
            .or_default()
            .insert(keys.id.clone(), record);
        self.rekey_alias(table, keys);
        self.version = self.version.next();
        self.version
    }

    // A record written under a new alias no longer answers to the old one.
    fn rekey_alias(&mut self, table: Table, keys: &EntityKeys) {
        let id_key = (table, keys.id.clone());
        let previous = match &keys.alias {
            Some(alias) => self.alias_of.insert(id_key, alias.clone()),
            None => self.alias_of.remove(&id_key),
        };
        if let Some(old) = previous.filter(|old| keys.alias.as_ref() != Some(old)) {
            let old_key = (table, old);
            if self.aliases.get(&old_key) == Some(&keys.id) {
                self.aliases.remove(&old_key);
            }
        }
        if let Some(alias) = &keys.alias {
            self.aliases.insert((table, alias.clone()), keys.id.clone());
        }
    }

    /// Look a record up by primary id or alias.
    pub fn get(&self, table: Table, key: &str) -> Option<&Value> {
        let records = self.tables.get(&table)?;
        if let Some(v) = records.get(key) {
            return Some(v);
        }
        let id = self.aliases.get(&(table, key.to_string()))?;
        records.get(id)
    }

    pub fn snapshot(&self, tables: &[Table]) -> Snapshot {
        let tables = tables
            .iter()
            .map(|t| (*t, self.tables.get(t).cloned().unwrap_or_default()))
            .collect();
        Snapshot {
            version: self.version,
            tables,
        }
    }

    /// Inputs for a reference graph rebuild: open issue/PR ids and every stored
    /// reference list.
    pub fn graph_input(&self) -> GraphInput {
        let mut card_ids = Vec::new();
        for table in [Table::Issues, Table::Prs] {
            let Some(records) = self.tables.get(&table) else {
                continue;
            };
            card_ids.extend(
                records
                    .iter()
                    .filter(|(_, r)| r.get("state").and_then(Value::as_str) == Some("OPEN"))
                    .map(|(id, _)| id.clone()),
            );
        }

        let references = self
            .tables
            .get(&Table::References)
            .map(|refs| {
                refs.iter()
                    .map(|(id, v)| {
                        let ids = v
                            .as_array()
                            .map(|a| a.iter().filter_map(key_string).collect())
                            .unwrap_or_default();
                        (id.clone(), ids)
                    })
                    .collect()
            })
            .unwrap_or_default();

        GraphInput {
            card_ids,
            references,
        }
    }

    /// Publish a new graph list. Does not touch the data version.
    pub fn set_graphs(&mut self, graphs: Vec<ReferenceGraph>) -> u64 {
        self.graphs = graphs;
        self.graph_version += 1;
        self.graphs_built_at = Some(Utc::now());
        self.graph_version
    }

    pub fn graphs(&self) -> &[ReferenceGraph] {
        &self.graphs
    }

    pub fn graph_version(&self) -> u64 {
        self.graph_version
    }

    pub fn graphs_built_at(&self) -> Option<DateTime<Utc>> {
        self.graphs_built_at
    }
}
