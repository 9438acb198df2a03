//! Graph engine error types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Ordering is impossible; `cycle` lists the nodes on one cycle in edge order.
    #[error("Cyclic dependency detected: {}", render_cycle(.cycle))]
    CyclicGraph { cycle: Vec<String> },

    #[error("Unknown node referenced: {0}")]
    UnknownNode(String),
}

fn render_cycle(cycle: &[String]) -> String {
    match cycle.first() {
        Some(first) => format!("{} -> {}", cycle.join(" -> "), first),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, GraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_closes_the_loop() {
        let err = GraphError::CyclicGraph {
            cycle: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "Cyclic dependency detected: a -> b -> a");
    }
}
