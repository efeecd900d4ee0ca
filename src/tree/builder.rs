use crate::channels::{ChannelRegistry, ChannelStorage, MaxCurrentSearch};
use crate::config::FitConfig;
use crate::error::TreeError;
use crate::fit::FitSession;
use crate::node::{CompartmentNode, NodeParams};
use crate::tree::CompartmentTree;

/// Incremental construction of a [CompartmentTree]
///
/// The root is added first, every other node is attached to an already added parent, so the
/// resulting node indices form a topological order.
#[derive(Clone, Debug, Default)]
pub struct CompartmentTreeBuilder {
    nodes: Vec<CompartmentNode>,
    registry: Option<ChannelRegistry>,
    config: Option<FitConfig>,
    search: Option<MaxCurrentSearch>,
}

impl CompartmentTreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the root node, returns its index
    pub fn add_root(&mut self, loc_ind: usize, params: NodeParams) -> Result<usize, TreeError> {
        if !self.nodes.is_empty() {
            return Err(TreeError::RootExists);
        }
        self.nodes.push(CompartmentNode::new(0, loc_ind, None, &params));
        Ok(0)
    }

    /// Add a node coupled to `parent` through `params.g_c`, returns its index
    pub fn add_node(
        &mut self,
        parent: usize,
        loc_ind: usize,
        params: NodeParams,
    ) -> Result<usize, TreeError> {
        if self.nodes.is_empty() {
            return Err(TreeError::NoRoot);
        }
        let index = self.nodes.len();
        if parent >= index {
            return Err(TreeError::UnknownNode {
                index: parent,
                size: index,
            });
        }
        if params.g_c <= 0.0 {
            return Err(TreeError::NonPositiveCoupling {
                index,
                g_c: params.g_c,
            });
        }
        self.nodes
            .push(CompartmentNode::new(index, loc_ind, Some(parent), &params));
        self.nodes[parent].push_child(index);
        Ok(index)
    }

    /// Channel registry of the tree, [ChannelRegistry::default] if not set
    pub fn registry(&mut self, registry: ChannelRegistry) -> &mut Self {
        self.registry = Some(registry);
        self
    }

    pub fn config(&mut self, config: FitConfig) -> &mut Self {
        self.config = Some(config);
        self
    }

    pub fn max_current_search(&mut self, search: MaxCurrentSearch) -> &mut Self {
        self.search = Some(search);
        self
    }

    pub fn build(self) -> Result<CompartmentTree, TreeError> {
        if self.nodes.is_empty() {
            return Err(TreeError::NoRoot);
        }
        let size = self.nodes.len();
        let mut seen = vec![false; size];
        for node in &self.nodes {
            match seen.get_mut(node.loc_ind()) {
                Some(seen) if !*seen => *seen = true,
                _ => {
                    return Err(TreeError::NonBijectiveLocations {
                        loc_inds: self.nodes.iter().map(CompartmentNode::loc_ind).collect(),
                        size,
                    });
                }
            }
        }
        Ok(CompartmentTree {
            nodes: self.nodes,
            registry: self.registry.unwrap_or_default(),
            channel_storage: ChannelStorage::default(),
            fit_data: FitSession::new(),
            config: self.config.unwrap_or_default(),
            search: self.search.unwrap_or_default(),
            eigen_cache: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coupled() -> NodeParams {
        NodeParams {
            g_c: 1e-2,
            ..NodeParams::default()
        }
    }

    #[test]
    fn root_must_come_first() {
        let mut builder = CompartmentTreeBuilder::new();
        assert_eq!(builder.add_node(0, 0, coupled()), Err(TreeError::NoRoot));
        builder.add_root(0, NodeParams::default()).unwrap();
        assert_eq!(
            builder.add_root(1, NodeParams::default()),
            Err(TreeError::RootExists)
        );
    }

    #[test]
    fn parent_must_exist() {
        let mut builder = CompartmentTreeBuilder::new();
        builder.add_root(0, NodeParams::default()).unwrap();
        assert_eq!(
            builder.add_node(3, 1, coupled()),
            Err(TreeError::UnknownNode { index: 3, size: 1 })
        );
    }

    #[test]
    fn coupling_must_be_positive() {
        let mut builder = CompartmentTreeBuilder::new();
        builder.add_root(0, NodeParams::default()).unwrap();
        assert_eq!(
            builder.add_node(0, 1, NodeParams::default()),
            Err(TreeError::NonPositiveCoupling { index: 1, g_c: 0.0 })
        );
    }

    #[test]
    fn locations_must_be_bijective() {
        let mut builder = CompartmentTreeBuilder::new();
        builder.add_root(0, NodeParams::default()).unwrap();
        builder.add_node(0, 2, coupled()).unwrap();
        assert_eq!(
            builder.build().err(),
            Some(TreeError::NonBijectiveLocations {
                loc_inds: vec![0, 2],
                size: 2
            })
        );
    }

    #[test]
    fn children_are_linked() {
        let mut builder = CompartmentTreeBuilder::new();
        let root = builder.add_root(1, NodeParams::default()).unwrap();
        let child = builder.add_node(root, 0, coupled()).unwrap();
        let tree = builder.build().unwrap();
        assert_eq!(tree.root().children(), &[child]);
        assert_eq!(tree.node(child).unwrap().parent(), Some(root));
        assert_eq!(tree.node(child).unwrap().g_c, 1e-2);
        assert_eq!(tree.root().g_c, 0.0);
    }
}
