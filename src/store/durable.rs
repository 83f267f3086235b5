//! ACID-durable graph store backed by redb.
//!
//! Every commit batch of the knowledge base becomes exactly one redb write
//! transaction, so a crash leaves either the whole batch on disk or none of it.
//! Values are bincode-encoded; vectors keep their exact f32 bit patterns.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};

use crate::error::StoreError;
use crate::graph::{Edge, Node, NodeId};
use crate::store::{PersistedGraph, StoreResult};
use crate::vector::EmbeddingSpace;

/// Insertion sequence → bincode `Node`.
const NODES_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("nodes");
/// Edge rank → bincode `Edge`.
const EDGES_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("edges");
/// Scenario id → bincode `Vec<f32>`.
const VECTORS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("vectors");
/// Store-level metadata (string keys → binary values).
const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

const META_EMBEDDING_MODEL: &str = "embedding.model";
const META_EMBEDDING_DIMENSION: &str = "embedding.dimension";
const META_ALLOCATOR_NEXT: &str = "allocator.next";

/// Name of the database file inside the data directory.
pub const DB_FILE: &str = "lexgraph.redb";

fn redb_err(context: &str, e: impl std::fmt::Display) -> StoreError {
    StoreError::Redb {
        message: format!("{context} failed: {e}"),
    }
}

fn encode<T: serde::Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StoreError::Serialization {
        message: e.to_string(),
    })
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Serialization {
        message: e.to_string(),
    })
}

fn decode_u64(bytes: &[u8]) -> StoreResult<u64> {
    let arr: [u8; 8] = bytes.try_into().map_err(|_| StoreError::Serialization {
        message: format!("expected 8-byte integer, got {} bytes", bytes.len()),
    })?;
    Ok(u64::from_le_bytes(arr))
}

/// Durable mirror of the knowledge graph and its vector index.
pub struct GraphStore {
    db: Arc<Database>,
    path: PathBuf,
}

impl GraphStore {
    /// Open or create the store in the given directory.
    pub fn open(data_dir: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(data_dir).map_err(|e| StoreError::Io { source: e })?;
        let db_path = data_dir.join(DB_FILE);
        let db = Database::create(&db_path).map_err(|e| StoreError::Redb {
            message: format!("failed to open redb at {}: {e}", db_path.display()),
        })?;

        // Create every table up front so read transactions never miss one.
        let txn = db.begin_write().map_err(|e| redb_err("begin_write", e))?;
        {
            txn.open_table(NODES_TABLE)
                .map_err(|e| redb_err("open_table", e))?;
            txn.open_table(EDGES_TABLE)
                .map_err(|e| redb_err("open_table", e))?;
            txn.open_table(VECTORS_TABLE)
                .map_err(|e| redb_err("open_table", e))?;
            txn.open_table(META_TABLE)
                .map_err(|e| redb_err("open_table", e))?;
        }
        txn.commit().map_err(|e| redb_err("commit", e))?;

        Ok(Self {
            db: Arc::new(db),
            path: db_path,
        })
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one commit batch in a single transaction.
    ///
    /// Nodes are appended after the highest stored sequence number; edges are
    /// keyed by the rank the in-memory graph assigned them.
    pub fn write_batch(
        &self,
        nodes: &[Node],
        edges: &[(u64, Edge)],
        vectors: &[(NodeId, Vec<f32>)],
        allocator_next: Option<u64>,
    ) -> StoreResult<()> {
        let txn = self
            .db
            .begin_write()
            .map_err(|e| redb_err("begin_write", e))?;
        {
            let mut table = txn
                .open_table(NODES_TABLE)
                .map_err(|e| redb_err("open_table", e))?;
            let mut seq = table
                .last()
                .map_err(|e| redb_err("last", e))?
                .map(|(k, _)| k.value() + 1)
                .unwrap_or(0);
            for node in nodes {
                let bytes = encode(node)?;
                table
                    .insert(seq, bytes.as_slice())
                    .map_err(|e| redb_err("insert", e))?;
                seq += 1;
            }
        }
        {
            let mut table = txn
                .open_table(EDGES_TABLE)
                .map_err(|e| redb_err("open_table", e))?;
            for (rank, edge) in edges {
                let bytes = encode(edge)?;
                table
                    .insert(*rank, bytes.as_slice())
                    .map_err(|e| redb_err("insert", e))?;
            }
        }
        {
            let mut table = txn
                .open_table(VECTORS_TABLE)
                .map_err(|e| redb_err("open_table", e))?;
            for (id, values) in vectors {
                let bytes = encode(values)?;
                table
                    .insert(id.as_str(), bytes.as_slice())
                    .map_err(|e| redb_err("insert", e))?;
            }
        }
        if let Some(next) = allocator_next {
            let mut table = txn
                .open_table(META_TABLE)
                .map_err(|e| redb_err("open_table", e))?;
            let bytes = next.to_le_bytes();
            table
                .insert(META_ALLOCATOR_NEXT, bytes.as_slice())
                .map_err(|e| redb_err("insert", e))?;
        }
        txn.commit().map_err(|e| redb_err("commit", e))?;

        tracing::debug!(
            nodes = nodes.len(),
            edges = edges.len(),
            vectors = vectors.len(),
            "durable commit"
        );
        Ok(())
    }

    /// Record the embedding space of the stored vectors.
    pub fn set_space(&self, space: &EmbeddingSpace) -> StoreResult<()> {
        let txn = self
            .db
            .begin_write()
            .map_err(|e| redb_err("begin_write", e))?;
        {
            let mut table = txn
                .open_table(META_TABLE)
                .map_err(|e| redb_err("open_table", e))?;
            table
                .insert(META_EMBEDDING_MODEL, space.model.as_bytes())
                .map_err(|e| redb_err("insert", e))?;
            let dim = (space.dimension as u64).to_le_bytes();
            table
                .insert(META_EMBEDDING_DIMENSION, dim.as_slice())
                .map_err(|e| redb_err("insert", e))?;
        }
        txn.commit().map_err(|e| redb_err("commit", e))?;
        Ok(())
    }

    /// Read one metadata value.
    fn get_meta(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let txn = self
            .db
            .begin_read()
            .map_err(|e| redb_err("begin_read", e))?;
        let table = txn
            .open_table(META_TABLE)
            .map_err(|e| redb_err("open_table", e))?;
        let result = table.get(key).map_err(|e| redb_err("get", e))?;
        Ok(result.map(|guard| guard.value().to_vec()))
    }

    /// The embedding space recorded on disk, if any vectors were ever stored.
    pub fn space(&self) -> StoreResult<Option<EmbeddingSpace>> {
        let model = self.get_meta(META_EMBEDDING_MODEL)?;
        let dimension = self.get_meta(META_EMBEDDING_DIMENSION)?;
        match (model, dimension) {
            (Some(model), Some(dim)) => {
                let model = String::from_utf8(model).map_err(|e| StoreError::Serialization {
                    message: e.to_string(),
                })?;
                Ok(Some(EmbeddingSpace::new(model, decode_u64(&dim)? as usize)))
            }
            _ => Ok(None),
        }
    }

    /// Load everything, nodes in insertion order and edges in rank order.
    pub fn load(&self) -> StoreResult<PersistedGraph> {
        let txn = self
            .db
            .begin_read()
            .map_err(|e| redb_err("begin_read", e))?;

        let mut nodes = Vec::new();
        {
            let table = txn
                .open_table(NODES_TABLE)
                .map_err(|e| redb_err("open_table", e))?;
            for entry in table.iter().map_err(|e| redb_err("iter", e))? {
                let (_, value) = entry.map_err(|e| redb_err("iter", e))?;
                nodes.push(decode::<Node>(value.value())?);
            }
        }

        let mut edges = Vec::new();
        {
            let table = txn
                .open_table(EDGES_TABLE)
                .map_err(|e| redb_err("open_table", e))?;
            for entry in table.iter().map_err(|e| redb_err("iter", e))? {
                let (rank, value) = entry.map_err(|e| redb_err("iter", e))?;
                edges.push((rank.value(), decode::<Edge>(value.value())?));
            }
        }

        let mut vectors = Vec::new();
        {
            let table = txn
                .open_table(VECTORS_TABLE)
                .map_err(|e| redb_err("open_table", e))?;
            for entry in table.iter().map_err(|e| redb_err("iter", e))? {
                let (id, value) = entry.map_err(|e| redb_err("iter", e))?;
                let id = NodeId::new(id.value()).ok_or_else(|| StoreError::Serialization {
                    message: "blank vector key".into(),
                })?;
                vectors.push((id, decode::<Vec<f32>>(value.value())?));
            }
        }
        drop(txn);

        let allocator_next = match self.get_meta(META_ALLOCATOR_NEXT)? {
            Some(bytes) => decode_u64(&bytes)?,
            None => 0,
        };

        Ok(PersistedGraph {
            nodes,
            edges,
            vectors,
            space: self.space()?,
            allocator_next,
        })
    }
}

impl std::fmt::Debug for GraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphStore")
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EdgeKind, NodeKind};
    use tempfile::TempDir;

    fn id(raw: &str) -> NodeId {
        NodeId::new(raw).unwrap()
    }

    #[test]
    fn empty_store_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = GraphStore::open(dir.path()).unwrap();
        let loaded = store.load().unwrap();
        assert!(loaded.nodes.is_empty());
        assert!(loaded.edges.is_empty());
        assert!(loaded.space.is_none());
        assert_eq!(loaded.allocator_next, 0);
    }

    #[test]
    fn batches_append_in_order_across_reopens() {
        let dir = TempDir::new().unwrap();
        let vector = vec![0.1f32, -2.5, f32::MIN_POSITIVE];
        {
            let store = GraphStore::open(dir.path()).unwrap();
            store.set_space(&EmbeddingSpace::new("test", 3)).unwrap();
            store
                .write_batch(
                    &[
                        Node::new(id("S1"), NodeKind::Scenario, "police search"),
                        Node::new(id("P1"), NodeKind::Principle, "right to privacy"),
                    ],
                    &[(0, Edge::new(id("S1"), id("P1"), EdgeKind::Supports))],
                    &[(id("S1"), vector.clone())],
                    Some(7),
                )
                .unwrap();
        }

        let store = GraphStore::open(dir.path()).unwrap();
        store
            .write_batch(
                &[Node::new(id("A1"), NodeKind::Article, "Article 21")],
                &[(1, Edge::new(id("P1"), id("A1"), EdgeKind::Explains))],
                &[],
                None,
            )
            .unwrap();

        let loaded = store.load().unwrap();
        let ids: Vec<&str> = loaded.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["S1", "P1", "A1"]);
        assert_eq!(loaded.edges.len(), 2);
        assert_eq!(loaded.edges[1].0, 1);
        assert_eq!(loaded.vectors, vec![(id("S1"), vector)]);
        assert_eq!(loaded.space, Some(EmbeddingSpace::new("test", 3)));
        assert_eq!(loaded.allocator_next, 7);
    }
}
