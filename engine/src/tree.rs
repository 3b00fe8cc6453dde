/// One node of a regression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Rows with `x[feature] <= threshold` descend into `left`, the rest
    /// (missing and NaN values included) into `right`.
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

/// A regression tree stored as a flat list of nodes, the root comes first.
#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    /// Creates a tree made of a single zero valued leaf.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::Leaf { value: 0.0 }],
        }
    }

    /// Turns the leaf `node` into a split and returns its `(left, right)` leaves.
    pub fn split(&mut self, node: usize, feature: usize, threshold: f64) -> (usize, usize) {
        let left = self.nodes.len();
        let right = left + 1;

        self.nodes.push(Node::Leaf { value: 0.0 });
        self.nodes.push(Node::Leaf { value: 0.0 });
        self.nodes[node] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };

        (left, right)
    }

    /// Sets the output of the leaf `node`, other nodes are left untouched.
    pub fn set_leaf_value(&mut self, node: usize, value: f64) {
        if let Node::Leaf { value: v } = &mut self.nodes[node] {
            *v = value;
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn num_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|node| matches!(node, Node::Leaf { .. }))
            .count()
    }

    /// Evaluates the tree on one feature vector.
    pub fn predict(&self, features: &[f64]) -> f64 {
        let mut idx = 0;

        loop {
            match self.nodes[idx] {
                Node::Leaf { value } => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let x = features.get(feature).copied().unwrap_or(f64::NAN);
                    idx = if x <= threshold { left } else { right };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stump() -> Tree {
        let mut tree = Tree::new();
        let (left, right) = tree.split(0, 1, 0.5);
        tree.set_leaf_value(left, -1.0);
        tree.set_leaf_value(right, 2.0);
        tree
    }

    #[test]
    fn predict_follows_threshold() {
        let tree = stump();

        assert_eq!(tree.num_leaves(), 2);
        assert_eq!(tree.predict(&[9.0, 0.5]), -1.0);
        assert_eq!(tree.predict(&[9.0, 0.6]), 2.0);
    }

    #[test]
    fn missing_values_go_right() {
        let tree = stump();

        assert_eq!(tree.predict(&[0.0, f64::NAN]), 2.0);
        assert_eq!(tree.predict(&[0.0]), 2.0);
    }
}
