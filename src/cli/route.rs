//! CLI route: single route table and run context. Dispatches to clustering
//! sessions and presentation.

use crate::cli::parse::Commands;
use crate::cli::presentation::{format_entries, format_stats, TreeStats};
use crate::config::{CanopyConfig, ConfigLoader};
use crate::graph::{ClusteringStrategy, DagForm};
use crate::node::Node;
use crate::revtree::RevTree;
use crate::store::persistence::SledObjectStore;
use crate::store::ObjectStore;
use crate::types::ObjectId;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Runtime context for CLI execution: resolved config and the object store.
pub struct RunContext {
    config: CanopyConfig,
    store: Arc<SledObjectStore>,
    store_path: PathBuf,
}

impl RunContext {
    /// Load configuration and open the object store. `store_path` overrides
    /// the configured location.
    pub fn new(
        workspace_root: PathBuf,
        config_path: Option<PathBuf>,
        store_path: Option<PathBuf>,
    ) -> Result<Self> {
        let config = match config_path {
            Some(ref path) => ConfigLoader::load_from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => ConfigLoader::load(&workspace_root).context("loading config")?,
        };
        Self::with_config(config, &workspace_root, store_path)
    }

    pub fn with_config(
        config: CanopyConfig,
        workspace_root: &Path,
        store_path: Option<PathBuf>,
    ) -> Result<Self> {
        let store_path = store_path
            .unwrap_or_else(|| config.storage.resolve_object_store_path(workspace_root));
        std::fs::create_dir_all(&store_path)
            .with_context(|| format!("creating object store {}", store_path.display()))?;
        let store = SledObjectStore::new(&store_path)
            .with_context(|| format!("opening object store {}", store_path.display()))?;

        Ok(Self {
            config,
            store: Arc::new(store),
            store_path,
        })
    }

    pub fn config(&self) -> &CanopyConfig {
        &self.config
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    pub fn execute(&self, command: &Commands) -> Result<String> {
        let start = Instant::now();
        let output = match command {
            Commands::Build { input, base } => self.handle_build(input, base.as_deref()),
            Commands::Remove { base, input } => self.handle_remove(base, input),
            Commands::Ls { tree, format } => self.handle_ls(tree, format),
            Commands::Stats { tree, format } => self.handle_stats(tree, format),
        }?;
        info!(
            command = command.name(),
            duration_ms = start.elapsed().as_millis(),
            "Command finished"
        );
        Ok(output)
    }

    fn source(&self) -> Arc<dyn ObjectStore> {
        Arc::clone(&self.store) as Arc<dyn ObjectStore>
    }

    fn load_tree(&self, id: &str) -> Result<RevTree> {
        let id: ObjectId = id
            .parse()
            .with_context(|| format!("invalid tree id '{}'", id))?;
        Ok(self.store.get_tree_required(&id)?)
    }

    fn session(&self, base: &RevTree) -> Result<ClusteringStrategy> {
        Ok(ClusteringStrategy::from_config(
            &self.config,
            self.source(),
            base,
        )?)
    }

    fn handle_build(&self, input: &Path, base: Option<&str>) -> Result<String> {
        let base = match base {
            Some(id) => self.load_tree(id)?,
            None => RevTree::empty(),
        };
        let text = std::fs::read_to_string(input)
            .with_context(|| format!("reading {}", input.display()))?;

        let mut session = self.session(&base)?;
        let mut added = 0usize;
        let mut replaced = 0usize;
        for node in parse_entries(&text) {
            if session.put(node)? {
                added += 1;
            } else {
                replaced += 1;
            }
        }
        let tree = session.build()?;
        session.dispose();
        self.store.flush()?;

        info!(%added, %replaced, tree = %tree.id(), "Built tree");
        Ok(tree.id().to_hex())
    }

    fn handle_remove(&self, base: &str, input: &Path) -> Result<String> {
        let base = self.load_tree(base)?;
        let text = std::fs::read_to_string(input)
            .with_context(|| format!("reading {}", input.display()))?;

        let mut session = self.session(&base)?;
        let mut removed = 0usize;
        for name in parse_names(&text) {
            if session.remove(&name)? {
                removed += 1;
            }
        }
        let tree = session.build()?;
        session.dispose();
        self.store.flush()?;

        info!(%removed, tree = %tree.id(), "Removed entries");
        Ok(tree.id().to_hex())
    }

    fn handle_ls(&self, tree: &str, format: &str) -> Result<String> {
        let tree = self.load_tree(tree)?;
        let session = self.session(&tree)?;
        let entries = session
            .entries()
            .map(|entry| entry.map(|(_, node)| node))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(format_entries(&entries, format)?)
    }

    fn handle_stats(&self, tree: &str, format: &str) -> Result<String> {
        let tree = self.load_tree(tree)?;
        let session = self.session(&tree)?;
        let root = session.get_root()?;
        let (root_form, root_buckets) = match root.form() {
            DagForm::Leaf(_) => ("leaf", 0),
            DagForm::Buckets(buckets) => ("buckets", buckets.len()),
        };

        let mut persisted_trees = 0;
        let mut pinned_entries = 0;
        self.count_trees(&tree, &mut persisted_trees, &mut pinned_entries)?;

        let stats = TreeStats {
            tree_id: tree.id().to_hex(),
            size: session.size()?,
            depth: session.depth()?,
            root_form: root_form.to_string(),
            root_buckets,
            persisted_trees,
            pinned_entries,
        };
        Ok(format_stats(&stats, format)?)
    }

    fn count_trees(&self, tree: &RevTree, trees: &mut u64, pinned: &mut u64) -> Result<()> {
        *trees += 1;
        if tree.is_leaf() {
            return Ok(());
        }
        *pinned += tree.entries().len() as u64;
        for child in tree.buckets().values() {
            let child = self.store.get_tree_required(child)?;
            self.count_trees(&child, trees, pinned)?;
        }
        Ok(())
    }
}

/// Entries from `name` or `name<TAB>content` lines. An entry's object id is
/// the hash of its content, or of its name when no content is given.
pub fn parse_entries(text: &str) -> Vec<Node> {
    text.lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
        .map(|line| match line.split_once('\t') {
            Some((name, content)) => Node::feature(name, ObjectId::for_string(content)),
            None => Node::feature(line, ObjectId::for_string(line)),
        })
        .collect()
}

/// Names from non-empty lines, accepting the same `name<TAB>content` lines
/// as [`parse_entries`]
pub fn parse_names(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
        .map(|line| match line.split_once('\t') {
            Some((name, _)) => name.to_string(),
            None => line.to_string(),
        })
        .collect()
}
